//! Roundup search parameters.

use serde_json::{json, Value};

use super::api_types::attribute_names;
use crate::error::{Error, Result};
use crate::query::{sort_step, OptionValue, ParamParser, ParseState, Target};

/// User-facing sort keys and the issue properties they sort by.
pub const SORT_MAP: &[(&str, &str)] = &[
  ("assignee", "assignee"),
  ("id", "id"),
  ("creator", "creator"),
  ("created", "creation"),
  ("modified", "activity"),
  ("modified-by", "actor"),
  ("components", "components"),
  ("depends", "dependencies"),
  ("keywords", "keywords"),
  ("comments", "message_count"),
  ("cc", "nosy_count"),
  ("priority", "priority"),
  ("prs", "pull_requests"),
  ("resolution", "resolution"),
  ("severity", "severity"),
  ("stage", "stage"),
  ("status", "status"),
  ("title", "title"),
  ("type", "type"),
];

/// Fields fetched for search results when none are requested.
pub const DEFAULT_FIELDS: &[&str] = &["id", "assignee", "title"];

pub fn search_parser() -> ParamParser {
  ParamParser::new()
    .register("terms", "title", terms)
    .register("created", "creation", since)
    .alias("modified", "created", "activity")
    .register("status", "status", enum_step("status"))
    .register("priority", "priority", enum_step("priority"))
    .register("assignee", "assignee", enum_step("users"))
    .register("creator", "creator", enum_step("users"))
    .register("sort", "sort", sort_step(SORT_MAP))
    .finalize_with(finalize)
}

fn terms(state: &mut ParseState<'_>, target: Target<'_>, value: OptionValue) -> Result<()> {
  let terms = value.into_strings(target.field)?;
  state.options.push(format!("Summary: {}", terms.join(", ")));
  state.params.insert(target.wire_key.to_string(), json!(terms));
  Ok(())
}

fn since(state: &mut ParseState<'_>, target: Target<'_>, value: OptionValue) -> Result<()> {
  let time = value.into_time(target.field)?;
  state.params.insert(
    target.wire_key.to_string(),
    json!(format!("{};.", time.format("%Y-%m-%d.%H:%M:%S"))),
  );
  state.options.push(format!(
    "{}: {} (since {})",
    target.label(),
    time.format("%Y-%m-%d %H:%M:%S"),
    time.to_rfc3339()
  ));
  Ok(())
}

/// Resolve names through the cached `attribute` table; numeric values pass
/// through unchanged.
fn enum_step(
  attribute: &'static str,
) -> impl Fn(&mut ParseState<'_>, Target<'_>, OptionValue) -> Result<()> + Send + Sync + 'static {
  move |state: &mut ParseState<'_>, target: Target<'_>, value: OptionValue| {
    let names = value.into_strings(target.field)?;
    let codes = names
      .iter()
      .map(|name| {
        name
          .parse::<u64>()
          .ok()
          .or_else(|| state.cache.code_of(attribute, name))
          .ok_or_else(|| {
            Error::InvalidQuery(format!(
              "unknown {} value: {:?} (try `trk cache update`)",
              target.field, name
            ))
          })
      })
      .collect::<Result<Vec<u64>>>()?;
    state.params.insert(target.wire_key.to_string(), json!(codes));
    state
      .options
      .push(format!("{}: {}", target.label(), names.join(", ")));
    Ok(())
  }
}

fn finalize(state: &mut ParseState<'_>) -> Result<()> {
  if !state.has_search_terms() {
    return Err(Error::InvalidQuery(
      "no supported search terms or options specified".to_string(),
    ));
  }

  state
    .params
    .entry("sort")
    .or_insert_with(|| json!([["+", "id"]]));

  // hide closed issues unless a status was requested
  if !state.params.contains_key("status") {
    let open: Vec<u64> = state
      .cache
      .values("status")
      .iter()
      .zip(1u64..)
      .filter(|(name, _)| name.as_str() != "closed")
      .map(|(_, code)| code)
      .collect();
    if !open.is_empty() {
      state.params.insert("status".to_string(), json!(open));
    }
  }
  Ok(())
}

/// Fields to display for each search hit, plus the option line describing an
/// explicit selection.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSelection {
  fields: Vec<String>,
  option: Option<String>,
}

impl FieldSelection {
  pub fn new(requested: Option<Vec<String>>) -> Result<Self> {
    let Some(requested) = requested.filter(|f| !f.is_empty()) else {
      return Ok(Self {
        fields: DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect(),
        option: None,
      });
    };

    let unknown: Vec<&str> = requested
      .iter()
      .map(String::as_str)
      .filter(|f| !attribute_names().any(|known| known == *f))
      .collect();
    if !unknown.is_empty() {
      return Err(Error::InvalidQuery(format!(
        "unknown fields: {}",
        unknown.join(", ")
      )));
    }

    let option = Some(format!("Fields: {}", requested.join(" ")));
    // records can't be decoded without their id
    let mut fields = requested;
    if !fields.iter().any(|f| f == "id") {
      fields.insert(0, "id".to_string());
    }
    Ok(Self { fields, option })
  }

  pub fn fields(&self) -> &[String] {
    &self.fields
  }

  pub fn option(&self) -> Option<&str> {
    self.option.as_deref()
  }
}

/// `filter` params: class, search text, filterspec, sort terms.
pub fn filter_params(mut params: serde_json::Map<String, Value>) -> Vec<Value> {
  let sort = params.remove("sort").unwrap_or_else(|| json!([["+", "id"]]));
  vec![json!("issue"), Value::Null, Value::Object(params), sort]
}
