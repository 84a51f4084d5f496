use std::fmt;
use thiserror::Error;

/// How a backend fault was classified by the service's error translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
  /// The requested record does not exist
  NotFound,
  /// A requested field does not exist on the record class
  UnknownField,
  /// Anything the translator does not recognize
  Other,
}

/// A failure reported by the backend for one specific call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
  pub code: Option<String>,
  pub message: String,
  pub kind: FaultKind,
}

impl Fault {
  pub fn new(code: Option<String>, message: impl Into<String>) -> Self {
    Self {
      code,
      message: message.into(),
      kind: FaultKind::Other,
    }
  }

  pub fn with_kind(mut self, kind: FaultKind) -> Self {
    self.kind = kind;
    self
  }
}

impl fmt::Display for Fault {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.code {
      Some(code) => write!(f, "{} (code: {})", self.message, code),
      None => f.write_str(&self.message),
    }
  }
}

#[derive(Error, Debug)]
pub enum Error {
  #[error("invalid query: {0}")]
  InvalidQuery(String),

  #[error("request failed: {0}")]
  Request(Fault),

  #[error("protocol error: {0}")]
  Protocol(String),

  #[error("HTTP request failed: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("JSON parsing failed: {0}")]
  Json(#[from] serde_json::Error),

  #[error("cache database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("cache error: {0}")]
  Cache(String),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

impl Error {
  /// The backend fault behind this error, if the backend rejected a call.
  #[cfg(test)]
  pub fn fault(&self) -> Option<&Fault> {
    match self {
      Error::Request(fault) => Some(fault),
      _ => None,
    }
  }
}

impl From<Fault> for Error {
  fn from(fault: Fault) -> Self {
    Error::Request(fault)
  }
}

pub type Result<T> = std::result::Result<T, Error>;
