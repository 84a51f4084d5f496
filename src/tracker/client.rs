use serde_json::{json, Value};
use std::iter;
use std::sync::Arc;
use tracing::debug;

use super::api_types::{attribute_names, code, decode_item, record, ApiFile, ApiMessage};
use super::search::{filter_params, search_parser, FieldSelection};
use super::types::{Attachment, Comment, IssueComments, Item, SearchResults};
use crate::cache::EnumCache;
use crate::error::{Error, Result};
use crate::query::{ParamParser, QueryOptions};
use crate::rpc::{collect_slots, Aggregator, Call, MergedAggregator, Slot, Transport};

/// Roundup classes mirrored into the enum cache, with their cache attribute.
const CACHED_CLASSES: &[(&str, &str)] = &[
  ("status", "status"),
  ("priority", "priority"),
  ("keyword", "keyword"),
  ("user", "users"),
];

const FILE_FIELDS: &[&str] = &["name", "type", "creator", "creation"];
const MESSAGE_FIELDS: &[&str] = &["content", "date", "author"];

/// What `get` fetches besides the issue records themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOptions {
  pub comments: bool,
  pub attachments: bool,
}

impl Default for GetOptions {
  fn default() -> Self {
    Self {
      comments: true,
      attachments: true,
    }
  }
}

/// Output of the per-issue batches merged by `get`.
enum Related {
  Attachments(Result<Vec<Attachment>>),
  Comments(Result<Vec<Comment>>),
}

/// Roundup tracker client
pub struct RoundupClient {
  transport: Arc<dyn Transport>,
  cache: Arc<EnumCache>,
  parser: ParamParser,
}

impl RoundupClient {
  pub fn new(transport: Arc<dyn Transport>, cache: EnumCache) -> Self {
    Self {
      transport,
      cache: Arc::new(cache),
      parser: search_parser(),
    }
  }

  pub fn cache(&self) -> &EnumCache {
    &self.cache
  }

  /// Search issues, then fetch the matching records in one batch.
  pub async fn search(
    &self,
    options: QueryOptions,
    fields: Option<Vec<String>>,
  ) -> Result<SearchResults> {
    let selection = FieldSelection::new(fields)?;
    let (params, mut options) = self.parser.parse(options, &self.cache)?.into_parts();
    options.extend(selection.option().map(str::to_string));

    let ids = Call::new("filter", filter_params(params), issue_ids)
      .send(self.transport.as_ref())
      .await?;
    debug!(matches = ids.len(), "search finished");

    let items = self
      .display_issues(ids, selection.fields().to_vec())
      .send(self.transport.as_ref())
      .await?
      .into_iter()
      .map(single)
      .collect();

    Ok(SearchResults { options, items })
  }

  /// Fetch full issue records, with their attachments and comments fetched
  /// together in one merged round trip.
  pub async fn get(&self, ids: &[u64], options: GetOptions) -> Result<Vec<Result<Item>>> {
    if ids.is_empty() {
      return Err(Error::InvalidQuery("no issue IDs specified".to_string()));
    }

    let fields = attribute_names().map(str::to_string).collect();
    let items: Vec<Result<Item>> = self
      .display_issues(ids.to_vec(), fields)
      .send(self.transport.as_ref())
      .await?
      .into_iter()
      .map(single)
      .collect();

    // two batches per issue, attachments then comments
    let mut merged = MergedAggregator::new();
    for item in &items {
      let (files, messages) = match item {
        Ok(item) => (item.files.as_slice(), item.messages.as_slice()),
        Err(_) => (&[][..], &[][..]),
      };

      let attachments = if options.attachments && !files.is_empty() {
        self.display_files(files.to_vec(), false)
      } else {
        Aggregator::noop()
      };
      merged.push(attachments.map(|slots| Related::Attachments(collect_slots(slots))));

      let comments = if options.comments && !messages.is_empty() {
        self.display_messages(messages.iter().cloned().enumerate().collect())
      } else {
        Aggregator::noop()
      };
      merged.push(comments.map(|slots| Related::Comments(collect_slots(slots))));
    }

    let mut related = merged.send(self.transport.as_ref()).await?.into_iter();
    Ok(
      items
        .into_iter()
        .map(|item| {
          let attachments = related.next();
          let comments = related.next();
          let item = item?;
          Ok(item.with_related(attachments_of(attachments)?, comments_of(comments)?))
        })
        .collect(),
    )
  }

  /// Comments of each issue.
  ///
  /// Message ids are looked up first, then every message of every issue is
  /// fetched in one batch and split back per issue.
  pub async fn comments(&self, ids: &[u64]) -> Result<Vec<IssueComments>> {
    if ids.is_empty() {
      return Err(Error::InvalidQuery("no issue IDs specified".to_string()));
    }

    let issues: Vec<Result<Item>> = self
      .display_issues(ids.to_vec(), vec!["id".to_string(), "messages".to_string()])
      .send(self.transport.as_ref())
      .await?
      .into_iter()
      .map(single)
      .collect();

    // counts restart at zero for each issue
    let messages: Vec<(usize, String)> = issues
      .iter()
      .flat_map(|issue| {
        issue
          .iter()
          .flat_map(|i| i.messages.iter().cloned().enumerate())
      })
      .collect();
    debug!(issues = issues.len(), messages = messages.len(), "fetching comments");

    let mut slots = self
      .display_messages(messages)
      .send(self.transport.as_ref())
      .await?
      .into_iter();

    Ok(
      ids
        .iter()
        .zip(issues)
        .map(|(id, issue)| {
          let comments = issue.and_then(|issue| {
            let slots: Vec<Slot<Comment>> = slots.by_ref().take(issue.messages.len()).collect();
            collect_slots(slots)
          });
          IssueComments { id: *id, comments }
        })
        .collect(),
    )
  }

  pub async fn attachments(&self, ids: &[u64], data: bool) -> Result<Vec<Result<Attachment>>> {
    if ids.is_empty() {
      return Err(Error::InvalidQuery("no attachment IDs specified".to_string()));
    }

    let files = ids.iter().map(u64::to_string).collect();
    Ok(
      self
        .display_files(files, data)
        .send(self.transport.as_ref())
        .await?
        .into_iter()
        .map(single)
        .collect(),
    )
  }

  /// The tracker's raw class schema.
  pub async fn schema(&self) -> Result<Value> {
    let reply = Call::new("schema", iter::empty(), |reply| Ok(vec![reply]))
      .send(self.transport.as_ref())
      .await?;
    single(Ok(reply))
  }

  /// Current enum tables from the tracker, keyed by cache attribute.
  ///
  /// `list` returns names in no particular order, so each name's id is looked
  /// up and the names are ordered by id before being handed to the cache.
  pub async fn cache_updates(&self) -> Result<Vec<(String, Vec<String>)>> {
    let names: Vec<Vec<String>> = Aggregator::from_params(
      "list",
      CACHED_CLASSES.iter().map(|(class, _)| vec![json!(class)]),
      |reply| Ok(vec![record::<Vec<String>>("list", reply)?]),
    )
    .abort_on_fault()
    .send(self.transport.as_ref())
    .await?
    .into_iter()
    .map(single)
    .collect::<Result<_>>()?;

    let mut lookups = MergedAggregator::new();
    for ((class, _), values) in CACHED_CLASSES.iter().zip(&names) {
      let class = *class;
      let batch = Aggregator::from_params(
        "lookup",
        values
          .clone()
          .into_iter()
          .map(move |name| vec![json!(class), json!(name)]),
        |reply| {
          let id = code(&reply)
            .ok_or_else(|| Error::Protocol(format!("invalid lookup reply: {}", reply)))?;
          Ok(vec![id])
        },
      )
      .abort_on_fault();
      lookups.push(batch.map(collect_slots::<u64>));
    }
    let ids = lookups.send(self.transport.as_ref()).await?;

    CACHED_CLASSES
      .iter()
      .zip(names)
      .zip(ids)
      .map(|(((_, attribute), names), ids)| {
        let ids = ids??;
        if ids.len() != names.len() {
          return Err(Error::Protocol(format!(
            "looked up {} ids for {} {} names",
            ids.len(),
            names.len(),
            attribute
          )));
        }
        let mut ordered: Vec<(u64, String)> = ids.into_iter().zip(names).collect();
        ordered.sort_by_key(|(id, _)| *id);
        Ok((
          attribute.to_string(),
          ordered.into_iter().map(|(_, name)| name).collect(),
        ))
      })
      .collect()
  }

  /// One `display` call per issue. Params are generated lazily when the
  /// batch is encoded.
  fn display_issues(&self, ids: Vec<u64>, fields: Vec<String>) -> Aggregator<Item> {
    let cache = self.cache.clone();
    Aggregator::from_params(
      "display",
      ids.into_iter().map(move |id| {
        iter::once(json!(format!("issue{}", id))).chain(fields.clone().into_iter().map(Value::from))
      }),
      move |reply| Ok(vec![decode_item(reply, &cache)?]),
    )
  }

  fn display_files(&self, ids: Vec<String>, data: bool) -> Aggregator<Attachment> {
    let mut fields: Vec<Value> = FILE_FIELDS.iter().map(|f| json!(f)).collect();
    if data {
      fields.push(json!("content"));
    }

    Aggregator::new(ids.into_iter().map(|id| {
      let cache = self.cache.clone();
      let params = iter::once(json!(format!("file{}", id))).chain(fields.clone());
      Call::new("display", params, move |reply| {
        let file: ApiFile = record("file", reply)?;
        Ok(vec![file.into_attachment(id.clone(), &cache)?])
      })
    }))
  }

  /// Messages paired with their position within the parent issue.
  fn display_messages(&self, messages: Vec<(usize, String)>) -> Aggregator<Comment> {
    Aggregator::new(messages.into_iter().map(|(count, id)| {
      let cache = self.cache.clone();
      let params = iter::once(json!(format!("msg{}", id)))
        .chain(MESSAGE_FIELDS.iter().map(|f| json!(f)));
      Call::new("display", params, move |reply| {
        let message: ApiMessage = record("message", reply)?;
        Ok(vec![message.into_comment(id.clone(), count, &cache)?])
      })
    }))
  }
}

fn issue_ids(reply: Value) -> Result<Vec<u64>> {
  match reply {
    Value::Array(values) => values
      .iter()
      .map(|v| code(v).ok_or_else(|| Error::Protocol(format!("invalid issue id: {}", v))))
      .collect(),
    other => Err(Error::Protocol(format!("expected a list of ids, got {}", other))),
  }
}

/// The one value a per-record call decodes to.
fn single<T>(slot: Slot<T>) -> Result<T> {
  slot?
    .into_iter()
    .next()
    .ok_or_else(|| Error::Protocol("empty reply".to_string()))
}

fn attachments_of(related: Option<Result<Related>>) -> Result<Vec<Attachment>> {
  match related {
    Some(Ok(Related::Attachments(attachments))) => attachments,
    Some(Err(e)) => Err(e),
    _ => Err(Error::Protocol("attachment batch out of order".to_string())),
  }
}

fn comments_of(related: Option<Result<Related>>) -> Result<Vec<Comment>> {
  match related {
    Some(Ok(Related::Comments(comments))) => comments,
    Some(Err(e)) => Err(e),
    _ => Err(Error::Protocol("comment batch out of order".to_string())),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::FaultKind;
  use crate::rpc::testing::MockTransport;
  use crate::tracker::errors::translate;

  fn cache() -> EnumCache {
    let mut cache = EnumCache::detached();
    cache.update("status", vec!["open".into(), "closed".into()]);
    cache.update("users", vec!["admin".into(), "alice".into()]);
    cache
  }

  fn client(replies: Vec<Value>) -> (Arc<MockTransport>, RoundupClient) {
    let transport = Arc::new(MockTransport::new(replies).with_translator(translate));
    let client = RoundupClient::new(transport.clone(), cache());
    (transport, client)
  }

  fn ok(value: Value) -> Value {
    json!({ "result": value })
  }

  fn issue(id: &str, files: &[&str], messages: &[&str]) -> Value {
    json!({
      "id": id,
      "title": format!("issue {}", id),
      "status": "1",
      "files": files,
      "messages": messages,
    })
  }

  fn message(text: &str) -> Value {
    json!({ "content": text, "date": "<Date 2020-01-01.00:00:00.0>", "author": "2" })
  }

  fn file(name: &str) -> Value {
    json!({
      "name": name,
      "type": "text/plain",
      "creator": "1",
      "creation": "<Date 2020-01-02.00:00:00.0>",
    })
  }

  #[tokio::test]
  async fn test_search_filters_then_displays() {
    let (transport, client) = client(vec![
      json!(["3", "5"]),
      json!([
        ok(json!({ "id": "3", "title": "first" })),
        ok(json!({ "id": "5", "title": "second" })),
      ]),
    ]);

    let results = client
      .search(
        QueryOptions::new()
          .with("status", "open")
          .with("sort", "-modified"),
        None,
      )
      .await
      .unwrap();

    assert_eq!(results.options, vec!["Status: open", "Sort order: -modified"]);
    let titles: Vec<_> = results
      .items
      .into_iter()
      .map(|i| i.unwrap().title.unwrap())
      .collect();
    assert_eq!(titles, vec!["first", "second"]);

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, "filter");
    assert_eq!(
      requests[0].params,
      vec![
        json!("issue"),
        Value::Null,
        json!({ "status": [1] }),
        json!([["-", "activity"]]),
      ]
    );
    assert_eq!(requests[1].method, "system.multicall");
    assert_eq!(
      requests[1].params[0],
      json!({ "method": "display", "params": ["issue3", "id", "assignee", "title"] })
    );
  }

  #[tokio::test]
  async fn test_search_without_matches_skips_display() {
    let (transport, client) = client(vec![json!([])]);
    let results = client
      .search(QueryOptions::new().with("terms", "nothing"), None)
      .await
      .unwrap();
    assert!(results.items.is_empty());
    assert_eq!(transport.requests().len(), 1);
  }

  #[tokio::test]
  async fn test_invalid_query_makes_no_request() {
    let (transport, client) = client(vec![]);
    let err = client
      .search(QueryOptions::new().with("sort", "id"), None)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::InvalidQuery(_)));
    assert!(transport.requests().is_empty());
  }

  #[tokio::test]
  async fn test_get_merges_related_fetches_into_one_round_trip() {
    // 1 has attachments only, 2 comments only, 3 neither
    let (transport, client) = client(vec![
      json!([
        ok(issue("1", &["10", "11"], &[])),
        ok(issue("2", &[], &["20", "21"])),
        ok(issue("3", &[], &[])),
      ]),
      json!([
        ok(file("log.txt")),
        ok(file("trace.txt")),
        ok(message("first")),
        ok(message("second")),
      ]),
    ]);

    let items: Vec<Item> = client
      .get(&[1, 2, 3], GetOptions::default())
      .await
      .unwrap()
      .into_iter()
      .map(|i| i.unwrap())
      .collect();

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].params.len(), 4);
    assert_eq!(
      requests[1].params[2],
      json!({ "method": "display", "params": ["msg20", "content", "date", "author"] })
    );

    let ids: Vec<u64> = items.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(items[0].status.as_deref(), Some("open"));

    let files: Vec<_> = items[0].attachments.iter().map(|a| a.filename.as_str()).collect();
    assert_eq!(files, vec!["log.txt", "trace.txt"]);
    assert_eq!(items[0].attachments[1].id, "11");
    assert_eq!(items[0].attachments[0].creator, "admin");
    assert!(items[0].comments.is_empty());

    assert!(items[1].attachments.is_empty());
    let texts: Vec<_> = items[1].comments.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["first", "second"]);
    assert_eq!(items[1].comments[1].count, 1);

    assert!(items[2].attachments.is_empty() && items[2].comments.is_empty());
  }

  #[tokio::test]
  async fn test_get_without_related_skips_second_round_trip() {
    let (transport, client) = client(vec![json!([ok(issue("1", &["10"], &["20"]))])]);
    let items = client
      .get(
        &[1],
        GetOptions {
          comments: false,
          attachments: false,
        },
      )
      .await
      .unwrap();
    assert!(items[0].as_ref().unwrap().comments.is_empty());
    assert_eq!(transport.requests().len(), 1);
  }

  #[tokio::test]
  async fn test_get_missing_issue_is_not_found() {
    let (_, client) = client(vec![json!([
      ok(issue("1", &[], &[])),
      { "error": { "kind": null, "message": "<class 'exceptions.IndexError'>:no such issue 9" } },
    ])]);

    let items = client.get(&[1, 9], GetOptions::default()).await.unwrap();
    assert!(items[0].is_ok());
    let err = items[1].as_ref().unwrap_err();
    assert_eq!(err.fault().map(|f| f.kind), Some(FaultKind::NotFound));
  }

  #[tokio::test]
  async fn test_comments_split_per_issue() {
    let (transport, client) = client(vec![
      json!([
        ok(json!({ "id": "1", "messages": ["5", "6"] })),
        ok(json!({ "id": "2", "messages": ["7"] })),
      ]),
      json!([ok(message("a")), ok(message("b")), ok(message("c"))]),
    ]);

    let comments = client.comments(&[1, 2]).await.unwrap();
    assert_eq!(comments[0].id, 1);
    let first = comments[0].comments.as_ref().unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[1].id, "6");
    assert_eq!(first[1].count, 1);
    let second = comments[1].comments.as_ref().unwrap();
    assert_eq!(second[0].text, "c");
    assert_eq!(second[0].count, 0);
    assert_eq!(second[0].creator, "alice");
    assert_eq!(transport.requests().len(), 2);
  }

  #[tokio::test]
  async fn test_attachments_with_data() {
    let mut with_content = file("patch.diff");
    with_content["content"] = json!("diff --git");
    let (transport, client) = client(vec![json!([ok(with_content)])]);

    let attachments = client.attachments(&[4], true).await.unwrap();
    let attachment = attachments[0].as_ref().unwrap();
    assert_eq!(attachment.id, "4");
    assert_eq!(attachment.data.as_deref(), Some("diff --git"));
    assert_eq!(
      transport.requests()[0].params[0]["params"],
      json!(["file4", "name", "type", "creator", "creation", "content"])
    );
  }

  #[tokio::test]
  async fn test_schema_passes_reply_through() {
    let (_, client) = client(vec![json!({ "issue": [["title", "<roundup.hyperdb.String>"]] })]);
    let schema = client.schema().await.unwrap();
    assert!(schema.get("issue").is_some());
  }

  #[tokio::test]
  async fn test_cache_updates_orders_names_by_id() {
    let (transport, client) = client(vec![
      json!([
        ok(json!(["closed", "open"])),
        ok(json!(["low"])),
        ok(json!([])),
        ok(json!(["bob", "admin"])),
      ]),
      json!([ok(json!("2")), ok(json!("1")), ok(json!("1")), ok(json!("3")), ok(json!("1"))]),
    ]);

    let updates = client.cache_updates().await.unwrap();
    assert_eq!(
      updates,
      vec![
        ("status".to_string(), vec!["open".to_string(), "closed".to_string()]),
        ("priority".to_string(), vec!["low".to_string()]),
        ("keyword".to_string(), vec![]),
        ("users".to_string(), vec!["admin".to_string(), "bob".to_string()]),
      ]
    );

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].params.len(), 5);
    assert_eq!(
      requests[1].params[3],
      json!({ "method": "lookup", "params": ["user", "bob"] })
    );
  }

  #[tokio::test]
  async fn test_cache_updates_abort_on_list_fault() {
    let (_, client) = client(vec![json!([
      ok(json!(["open"])),
      { "error": { "kind": null, "message": "permission denied" } },
      ok(json!([])),
      ok(json!([])),
    ])]);
    let err = client.cache_updates().await.unwrap_err();
    assert!(matches!(err, Error::Request(_)));
  }
}
