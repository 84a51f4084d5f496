//! Wire shapes of Roundup replies and their conversion to domain types.
//!
//! Issue records are decoded through a fixed table from wire key to `Item`
//! field. Keys missing from the table are ignored; a record without `id`
//! is rejected.

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;

use super::types::{Attachment, Comment, Item};
use crate::cache::EnumCache;
use crate::error::{Error, Result};

// ============================================================================
// Issue attribute table
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemField {
  Id,
  Title,
  Status,
  Priority,
  Keywords,
  Assignee,
  Creator,
  Created,
  ModifiedBy,
  Modified,
  Nosy,
  Components,
  Versions,
  Dependencies,
  Superseder,
  Resolution,
  Severity,
  Stage,
  IssueType,
  PullRequests,
  Files,
  Messages,
}

/// An issue property the client understands.
#[derive(Debug)]
pub struct ItemAttribute {
  pub wire: &'static str,
  field: ItemField,
}

const fn attr(wire: &'static str, field: ItemField) -> ItemAttribute {
  ItemAttribute { wire, field }
}

// assumes the bugs.python.org issue schema
pub const ITEM_ATTRIBUTES: &[ItemAttribute] = &[
  attr("title", ItemField::Title),
  attr("assignee", ItemField::Assignee),
  attr("creation", ItemField::Created),
  attr("creator", ItemField::Creator),
  attr("activity", ItemField::Modified),
  attr("actor", ItemField::ModifiedBy),
  attr("id", ItemField::Id),
  attr("status", ItemField::Status),
  attr("dependencies", ItemField::Dependencies),
  attr("resolution", ItemField::Resolution),
  attr("priority", ItemField::Priority),
  attr("superseder", ItemField::Superseder),
  attr("keywords", ItemField::Keywords),
  attr("components", ItemField::Components),
  attr("files", ItemField::Files),
  attr("messages", ItemField::Messages),
  attr("nosy", ItemField::Nosy),
  attr("pull_requests", ItemField::PullRequests),
  attr("severity", ItemField::Severity),
  attr("stage", ItemField::Stage),
  attr("type", ItemField::IssueType),
  attr("versions", ItemField::Versions),
];

/// Wire names of every known issue attribute.
pub fn attribute_names() -> impl Iterator<Item = &'static str> {
  ITEM_ATTRIBUTES.iter().map(|a| a.wire)
}

pub fn decode_item(value: Value, cache: &EnumCache) -> Result<Item> {
  let Value::Object(map) = value else {
    return Err(Error::Protocol(format!(
      "expected an issue record, got {}",
      value
    )));
  };

  let mut item = Item::default();
  let mut has_id = false;

  for (key, value) in map {
    let Some(attribute) = ITEM_ATTRIBUTES.iter().find(|a| a.wire == key) else {
      continue;
    };
    match attribute.field {
      ItemField::Id => {
        item.id = code(&value)
          .ok_or_else(|| Error::Protocol(format!("invalid issue id: {}", value)))?;
        has_id = true;
      }
      ItemField::Title => item.title = text(&value),
      ItemField::Status => item.status = link(&value, cache, "status"),
      ItemField::Priority => item.priority = link(&value, cache, "priority"),
      ItemField::Keywords => item.keywords = links(&value, cache, "keyword"),
      ItemField::Assignee => item.assignee = link(&value, cache, "users"),
      ItemField::Creator => item.creator = link(&value, cache, "users"),
      ItemField::ModifiedBy => item.modified_by = link(&value, cache, "users"),
      ItemField::Nosy => item.nosy = links(&value, cache, "users"),
      ItemField::Created => item.created = optional_time(&value)?,
      ItemField::Modified => item.modified = optional_time(&value)?,
      ItemField::Components => item.components = strings(&value),
      ItemField::Versions => item.versions = strings(&value),
      ItemField::Dependencies => item.dependencies = strings(&value),
      ItemField::Superseder => item.superseder = strings(&value),
      ItemField::PullRequests => item.pull_requests = strings(&value),
      ItemField::Files => item.files = strings(&value),
      ItemField::Messages => item.messages = strings(&value),
      ItemField::Resolution => item.resolution = text(&value),
      ItemField::Severity => item.severity = text(&value),
      ItemField::Stage => item.stage = text(&value),
      ItemField::IssueType => item.issue_type = text(&value),
    }
  }

  if !has_id {
    return Err(Error::Protocol(
      "issue record is missing required key `id`".to_string(),
    ));
  }
  Ok(item)
}

// ============================================================================
// Message and file records
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiMessage {
  pub content: String,
  pub date: String,
  #[serde(default)]
  pub author: Value,
}

#[derive(Debug, Deserialize)]
pub struct ApiFile {
  pub name: String,
  #[serde(rename = "type", default)]
  pub mimetype: String,
  #[serde(default)]
  pub creator: Value,
  pub creation: String,
  #[serde(default)]
  pub content: Option<String>,
}

/// Deserialize a record, treating any shape mismatch as a protocol error.
pub fn record<T: DeserializeOwned>(kind: &str, value: Value) -> Result<T> {
  serde_json::from_value(value)
    .map_err(|e| Error::Protocol(format!("malformed {} record: {}", kind, e)))
}

impl ApiMessage {
  pub fn into_comment(self, id: String, count: usize, cache: &EnumCache) -> Result<Comment> {
    Ok(Comment {
      id,
      count,
      text: self.content.trim().to_string(),
      creator: link(&self.author, cache, "users").unwrap_or_default(),
      created: parse_time(&self.date)?,
    })
  }
}

impl ApiFile {
  pub fn into_attachment(self, id: String, cache: &EnumCache) -> Result<Attachment> {
    Ok(Attachment {
      id,
      filename: self.name,
      mimetype: self.mimetype,
      creator: link(&self.creator, cache, "users").unwrap_or_default(),
      created: parse_time(&self.creation)?,
      data: self.content,
    })
  }
}

// ============================================================================
// Helpers
// ============================================================================

/// Parse Roundup's `<Date 2019-01-31.17:05:12.482>` format.
///
/// Sub-second precision is dropped and the time is taken as UTC.
pub fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
  let trimmed = raw
    .trim()
    .trim_start_matches("<Date ")
    .trim_end_matches('>');
  NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d.%H:%M:%S%.f")
    .ok()
    .and_then(|t| t.and_utc().with_nanosecond(0))
    .ok_or_else(|| Error::Protocol(format!("invalid date: {:?}", raw)))
}

/// Numeric id of a record reference, sent either as `"12"` or `12`.
pub fn code(value: &Value) -> Option<u64> {
  match value {
    Value::String(s) => s.trim().parse().ok(),
    Value::Number(n) => n.as_u64(),
    _ => None,
  }
}

fn text(value: &Value) -> Option<String> {
  match value {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    other => Some(other.to_string()),
  }
}

fn strings(value: &Value) -> Vec<String> {
  match value {
    Value::Array(values) => values.iter().filter_map(text).collect(),
    Value::Null => Vec::new(),
    other => text(other).into_iter().collect(),
  }
}

fn link(value: &Value, cache: &EnumCache, attribute: &str) -> Option<String> {
  match code(value) {
    Some(c) => Some(cache.resolve(attribute, c)),
    None => text(value),
  }
}

fn links(value: &Value, cache: &EnumCache, attribute: &str) -> Vec<String> {
  match value {
    Value::Array(values) => values
      .iter()
      .filter_map(|v| link(v, cache, attribute))
      .collect(),
    other => link(other, cache, attribute).into_iter().collect(),
  }
}

fn optional_time(value: &Value) -> Result<Option<DateTime<Utc>>> {
  match value {
    Value::Null => Ok(None),
    Value::String(s) => parse_time(s).map(Some),
    other => Err(Error::Protocol(format!("invalid date: {}", other))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;
  use serde_json::json;

  fn cache() -> EnumCache {
    let mut cache = EnumCache::detached();
    cache.update("status", vec!["open".into(), "closed".into()]);
    cache.update("priority", vec!["high".into(), "low".into()]);
    cache.update("keyword", vec!["easy".into(), "security".into()]);
    cache.update("users", vec!["admin".into(), "alice".into()]);
    cache
  }

  #[test]
  fn test_parse_roundup_time() {
    let time = parse_time("<Date 2019-01-31.17:05:12.482>").unwrap();
    assert_eq!(time, Utc.with_ymd_and_hms(2019, 1, 31, 17, 5, 12).unwrap());
    assert_eq!(
      parse_time("2019-01-31.17:05:12").unwrap(),
      Utc.with_ymd_and_hms(2019, 1, 31, 17, 5, 12).unwrap()
    );
    assert!(matches!(parse_time("yesterday"), Err(Error::Protocol(_))));
  }

  #[test]
  fn test_decode_item_resolves_codes() {
    let item = decode_item(
      json!({
        "id": "42",
        "title": "crash on start",
        "status": "2",
        "priority": "1",
        "keywords": ["2", "9"],
        "creator": "2",
        "assignee": null,
        "creation": "<Date 2020-05-01.10:00:00.000>",
        "messages": ["7", "8"],
        "files": [],
        "unexpected": "ignored",
      }),
      &cache(),
    )
    .unwrap();

    assert_eq!(item.id, 42);
    assert_eq!(item.title.as_deref(), Some("crash on start"));
    assert_eq!(item.status.as_deref(), Some("closed"));
    assert_eq!(item.priority.as_deref(), Some("high"));
    assert_eq!(item.keywords, vec!["security", "9"]);
    assert_eq!(item.creator.as_deref(), Some("alice"));
    assert_eq!(item.assignee, None);
    assert_eq!(
      item.created,
      Some(Utc.with_ymd_and_hms(2020, 5, 1, 10, 0, 0).unwrap())
    );
    assert_eq!(item.messages, vec!["7", "8"]);
    assert!(item.files.is_empty());
  }

  #[test]
  fn test_decode_item_requires_id() {
    let err = decode_item(json!({ "title": "no id" }), &cache()).unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));

    let err = decode_item(json!(["not", "a", "record"]), &cache()).unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
  }

  #[test]
  fn test_message_into_comment() {
    let message: ApiMessage = record(
      "message",
      json!({ "content": "  it broke\n", "date": "<Date 2021-02-03.04:05:06.7>", "author": "1" }),
    )
    .unwrap();
    let comment = message.into_comment("77".into(), 3, &cache()).unwrap();
    assert_eq!(comment.text, "it broke");
    assert_eq!(comment.creator, "admin");
    assert_eq!(comment.count, 3);
  }

  #[test]
  fn test_malformed_record_is_protocol_error() {
    let err = record::<ApiFile>("file", json!({ "name": "x.txt" })).unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
  }

  #[test]
  fn test_attribute_names_cover_defaults() {
    let names: Vec<_> = attribute_names().collect();
    for field in ["id", "assignee", "title", "files", "messages"] {
      assert!(names.contains(&field), "{} missing", field);
    }
  }
}
