use chrono::{DateTime, Utc};
use serde::Serialize;

/// A tracker issue
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Item {
  pub id: u64,
  pub title: Option<String>,
  pub status: Option<String>,
  pub priority: Option<String>,
  pub keywords: Vec<String>,
  pub assignee: Option<String>,
  pub creator: Option<String>,
  pub created: Option<DateTime<Utc>>,
  pub modified_by: Option<String>,
  pub modified: Option<DateTime<Utc>>,
  pub nosy: Vec<String>,
  pub components: Vec<String>,
  pub versions: Vec<String>,
  pub dependencies: Vec<String>,
  pub superseder: Vec<String>,
  pub resolution: Option<String>,
  pub severity: Option<String>,
  pub stage: Option<String>,
  pub issue_type: Option<String>,
  pub pull_requests: Vec<String>,
  /// Attachment (file) ids
  pub files: Vec<String>,
  /// Comment (message) ids
  pub messages: Vec<String>,
  /// Filled in by `get` when requested
  pub attachments: Vec<Attachment>,
  /// Filled in by `get` when requested
  pub comments: Vec<Comment>,
}

impl Item {
  /// The same item with its attachments and comments attached.
  pub fn with_related(self, attachments: Vec<Attachment>, comments: Vec<Comment>) -> Self {
    Self {
      attachments,
      comments,
      ..self
    }
  }
}

/// A comment on an issue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comment {
  pub id: String,
  /// Position of the comment within its issue, starting at 0
  pub count: usize,
  pub text: String,
  pub creator: String,
  pub created: DateTime<Utc>,
}

/// A file attached to an issue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
  pub id: String,
  pub filename: String,
  pub mimetype: String,
  pub creator: String,
  pub created: DateTime<Utc>,
  pub data: Option<String>,
}

/// Comments of one issue, as returned by the `comments` command
#[derive(Debug)]
pub struct IssueComments {
  pub id: u64,
  pub comments: crate::error::Result<Vec<Comment>>,
}

/// Result of a search
#[derive(Debug)]
pub struct SearchResults {
  /// Human-readable description of the query that ran
  pub options: Vec<String>,
  pub items: Vec<crate::error::Result<Item>>,
}
