use serde_json::{json, Value};
use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
  Ascending,
  Descending,
}

impl SortOrder {
  pub fn as_wire(&self) -> &'static str {
    match self {
      SortOrder::Ascending => "+",
      SortOrder::Descending => "-",
    }
  }
}

/// One resolved sort term: direction plus the backend's field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortTerm {
  pub order: SortOrder,
  pub key: String,
}

impl SortTerm {
  #[cfg(test)]
  pub fn ascending(key: impl Into<String>) -> Self {
    Self {
      order: SortOrder::Ascending,
      key: key.into(),
    }
  }

  #[cfg(test)]
  pub fn descending(key: impl Into<String>) -> Self {
    Self {
      order: SortOrder::Descending,
      key: key.into(),
    }
  }

  /// `["+", key]` / `["-", key]`
  pub fn to_wire(&self) -> Value {
    json!([self.order.as_wire(), self.key])
  }
}

impl fmt::Display for SortTerm {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}", self.order.as_wire(), self.key)
  }
}

/// Resolve `[-]field` terms through `sort_map` (user name, wire name).
///
/// Terms may also be comma-separated within one value. Precedence follows the
/// order given.
pub fn parse_sort(terms: &[String], sort_map: &[(&str, &str)]) -> Result<Vec<SortTerm>> {
  terms
    .iter()
    .flat_map(|t| t.split(','))
    .map(str::trim)
    .filter(|t| !t.is_empty())
    .map(|term| {
      let (order, field) = match term.strip_prefix('-') {
        Some(field) => (SortOrder::Descending, field),
        None => (SortOrder::Ascending, term),
      };
      let key = sort_map
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, wire)| wire.to_string())
        .ok_or_else(|| {
          let mut choices: Vec<&str> = sort_map.iter().map(|(name, _)| *name).collect();
          choices.sort_unstable();
          Error::InvalidQuery(format!(
            "unable to sort by: {:?} (available choices: {})",
            field,
            choices.join(", ")
          ))
        })?;
      Ok(SortTerm { order, key })
    })
    .collect()
}
