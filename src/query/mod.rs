//! Translation of generic query options into backend wire parameters.
//!
//! A `ParamParser` is an explicit registration table: each recognized field
//! name maps to one step that consumes the user's value, writes wire
//! parameters and appends a human-readable line to the option summary.
//! Aliases reuse another field's step under a different wire key. After all
//! steps ran, the parser's finalize hook validates the result and applies
//! backend defaults.

mod options;
mod sort;

pub use options::{parse_time, OptionValue, QueryOptions};
pub use sort::{parse_sort, SortTerm};

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::EnumCache;
use crate::error::{Error, Result};

/// Wire parameters plus the option summary shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRequest {
  params: Map<String, Value>,
  options: Vec<String>,
}

impl ParsedRequest {
  #[cfg(test)]
  pub fn params(&self) -> &Map<String, Value> {
    &self.params
  }

  #[cfg(test)]
  pub fn options(&self) -> &[String] {
    &self.options
  }

  pub fn into_parts(self) -> (Map<String, Value>, Vec<String>) {
    (self.params, self.options)
  }
}

/// Mutable state threaded through the steps of one parse.
pub struct ParseState<'a> {
  pub params: Map<String, Value>,
  pub options: Vec<String>,
  pub cache: &'a EnumCache,
}

impl ParseState<'_> {
  /// Whether anything besides sorting was requested.
  pub fn has_search_terms(&self) -> bool {
    self.params.keys().any(|k| k != "sort")
  }
}

/// The field a step runs for and the wire key it should write.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
  pub field: &'a str,
  pub wire_key: &'a str,
}

impl Target<'_> {
  /// Field name with its first letter upper-cased, for option summaries.
  pub fn label(&self) -> String {
    let mut chars = self.field.chars();
    match chars.next() {
      Some(first) => first.to_uppercase().chain(chars).collect(),
      None => String::new(),
    }
  }
}

pub type Step =
  Arc<dyn Fn(&mut ParseState<'_>, Target<'_>, OptionValue) -> Result<()> + Send + Sync>;

pub type Finalize = fn(&mut ParseState<'_>) -> Result<()>;

struct Registration {
  wire_key: &'static str,
  step: Step,
}

#[derive(Default)]
pub struct ParamParser {
  steps: BTreeMap<&'static str, Registration>,
  finalize: Option<Finalize>,
}

impl ParamParser {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register<F>(mut self, field: &'static str, wire_key: &'static str, step: F) -> Self
  where
    F: Fn(&mut ParseState<'_>, Target<'_>, OptionValue) -> Result<()> + Send + Sync + 'static,
  {
    self.steps.insert(
      field,
      Registration {
        wire_key,
        step: Arc::new(step),
      },
    );
    self
  }

  /// Route `alias` through the step registered for `target`.
  pub fn alias(
    mut self,
    alias: &'static str,
    target: &'static str,
    wire_key: &'static str,
  ) -> Self {
    match self.steps.get(target).map(|r| r.step.clone()) {
      Some(step) => {
        self.steps.insert(alias, Registration { wire_key, step });
      }
      None => warn!(alias, target, "alias target is not registered"),
    }
    self
  }

  pub fn finalize_with(mut self, finalize: Finalize) -> Self {
    self.finalize = Some(finalize);
    self
  }

  /// Every recognized field name, aliases included.
  pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
    self.steps.keys().copied()
  }

  pub fn parse(&self, options: QueryOptions, cache: &EnumCache) -> Result<ParsedRequest> {
    let mut state = ParseState {
      params: Map::new(),
      options: Vec::new(),
      cache,
    };

    for (field, value) in options {
      let registration = self.steps.get(field.as_str()).ok_or_else(|| {
        Error::InvalidQuery(format!(
          "unsupported search field: {} (supported: {})",
          field,
          self.fields().collect::<Vec<_>>().join(", ")
        ))
      })?;
      let target = Target {
        field: &field,
        wire_key: registration.wire_key,
      };
      (registration.step)(&mut state, target, value)?;
    }

    if let Some(finalize) = self.finalize {
      finalize(&mut state)?;
    }

    debug!(params = ?state.params, "parsed query");
    Ok(ParsedRequest {
      params: state.params,
      options: state.options,
    })
  }
}

impl fmt::Debug for ParamParser {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ParamParser")
      .field("fields", &self.fields().collect::<Vec<_>>())
      .finish_non_exhaustive()
  }
}

/// Step for `[-]field` sort terms resolved through `sort_map`.
pub fn sort_step(
  sort_map: &'static [(&'static str, &'static str)],
) -> impl Fn(&mut ParseState<'_>, Target<'_>, OptionValue) -> Result<()> + Send + Sync + 'static {
  move |state: &mut ParseState<'_>, target: Target<'_>, value: OptionValue| {
    let raw = value.into_strings(target.field)?;
    let terms = parse_sort(&raw, sort_map)?;
    state.params.insert(
      target.wire_key.to_string(),
      Value::Array(terms.iter().map(SortTerm::to_wire).collect()),
    );
    state.options.push(format!("Sort order: {}", raw.join(", ")));
    Ok(())
  }
}
