use regex::Regex;
use std::sync::OnceLock;

use crate::error::{Fault, FaultKind};

const NOT_FOUND: &str = "exceptions.IndexError";
const UNKNOWN_FIELD: &str = "exceptions.KeyError";

fn exception_pattern() -> &'static Regex {
  static PATTERN: OnceLock<Regex> = OnceLock::new();
  // Roundup renders server-side exceptions as `<class 'exceptions.X'>:message`
  PATTERN.get_or_init(|| Regex::new(r"^<\w+ '(.+)'>:(.+)$").unwrap())
}

/// Classify a raw Roundup fault.
///
/// The exception class embedded in the message becomes the fault code and the
/// message is prefixed with `Roundup error: `.
pub fn translate(fault: Fault) -> Fault {
  let (code, message) = match exception_pattern().captures(&fault.message) {
    Some(caps) => (Some(caps[1].to_string()), caps[2].trim().to_string()),
    None => (fault.code, fault.message),
  };

  let (kind, message) = match code.as_deref() {
    Some(NOT_FOUND) => (FaultKind::NotFound, message),
    Some(UNKNOWN_FIELD) => (
      FaultKind::UnknownField,
      format!("field doesn't exist: {}", message),
    ),
    _ => (FaultKind::Other, message),
  };

  Fault::new(code, format!("Roundup error: {}", message)).with_kind(kind)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_index_error_is_not_found() {
    let fault = translate(Fault::new(
      None,
      "<class 'exceptions.IndexError'>:no such issue 99999",
    ));
    assert_eq!(fault.kind, FaultKind::NotFound);
    assert_eq!(fault.code.as_deref(), Some("exceptions.IndexError"));
    assert_eq!(fault.message, "Roundup error: no such issue 99999");
  }

  #[test]
  fn test_key_error_is_unknown_field() {
    let fault = translate(Fault::new(None, "<type 'exceptions.KeyError'>:'colour'"));
    assert_eq!(fault.kind, FaultKind::UnknownField);
    assert_eq!(fault.message, "Roundup error: field doesn't exist: 'colour'");
  }

  #[test]
  fn test_unrecognized_fault_keeps_code() {
    let fault = translate(Fault::new(Some("-32601".into()), "method not found"));
    assert_eq!(fault.kind, FaultKind::Other);
    assert_eq!(fault.code.as_deref(), Some("-32601"));
    assert_eq!(fault.message, "Roundup error: method not found");
  }
}
