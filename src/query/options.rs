use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use std::fmt;

use crate::error::{Error, Result};

/// A user-supplied value for one query field.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
  Strings(Vec<String>),
  Time(DateTime<Utc>),
}

impl OptionValue {
  pub fn into_strings(self, field: &str) -> Result<Vec<String>> {
    match self {
      OptionValue::Strings(values) => Ok(values),
      OptionValue::Time(_) => Err(Error::InvalidQuery(format!(
        "{} expects one or more values, not a time",
        field
      ))),
    }
  }

  pub fn into_time(self, field: &str) -> Result<DateTime<Utc>> {
    match self {
      OptionValue::Time(time) => Ok(time),
      OptionValue::Strings(values) => match values.as_slice() {
        [value] => parse_time(value),
        _ => Err(Error::InvalidQuery(format!("{} expects a single time", field))),
      },
    }
  }
}

impl From<Vec<String>> for OptionValue {
  fn from(values: Vec<String>) -> Self {
    OptionValue::Strings(values)
  }
}

impl From<&str> for OptionValue {
  fn from(value: &str) -> Self {
    OptionValue::Strings(vec![value.to_string()])
  }
}

impl From<&[&str]> for OptionValue {
  fn from(values: &[&str]) -> Self {
    OptionValue::Strings(values.iter().map(|v| v.to_string()).collect())
  }
}

impl From<DateTime<Utc>> for OptionValue {
  fn from(time: DateTime<Utc>) -> Self {
    OptionValue::Time(time)
  }
}

impl fmt::Display for OptionValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OptionValue::Strings(values) => f.write_str(&values.join(", ")),
      OptionValue::Time(time) => write!(f, "{}", time.format("%Y-%m-%d %H:%M:%S")),
    }
  }
}

/// Insertion-ordered field/value map describing a search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
  entries: Vec<(String, OptionValue)>,
}

impl QueryOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Set a field; replacing an existing field keeps its original position.
  pub fn insert(&mut self, field: impl Into<String>, value: impl Into<OptionValue>) {
    let field = field.into();
    let value = value.into();
    match self.entries.iter_mut().find(|(k, _)| *k == field) {
      Some((_, existing)) => *existing = value,
      None => self.entries.push((field, value)),
    }
  }

  #[cfg(test)]
  pub fn with(mut self, field: impl Into<String>, value: impl Into<OptionValue>) -> Self {
    self.insert(field, value);
    self
  }

  #[cfg(test)]
  pub fn get(&self, field: &str) -> Option<&OptionValue> {
    self
      .entries
      .iter()
      .find(|(k, _)| k == field)
      .map(|(_, v)| v)
  }

  pub fn fields(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(|(k, _)| k.as_str())
  }
}

impl IntoIterator for QueryOptions {
  type Item = (String, OptionValue);
  type IntoIter = std::vec::IntoIter<(String, OptionValue)>;

  fn into_iter(self) -> Self::IntoIter {
    self.entries.into_iter()
  }
}

/// Parse a user-supplied time.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD`, or a relative
/// offset into the past such as `90m`, `2d` or `1w`.
pub fn parse_time(input: &str) -> Result<DateTime<Utc>> {
  let input = input.trim();

  if let Ok(time) = DateTime::parse_from_rfc3339(input) {
    return Ok(time.with_timezone(&Utc));
  }
  if let Ok(time) = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S") {
    return Ok(time.and_utc());
  }
  if let Some(time) = NaiveDate::parse_from_str(input, "%Y-%m-%d")
    .ok()
    .and_then(|date| date.and_hms_opt(0, 0, 0))
  {
    return Ok(time.and_utc());
  }
  if let Some(offset) = parse_offset(input) {
    return Utc::now()
      .checked_sub_signed(offset)
      .ok_or_else(|| Error::InvalidQuery(format!("time offset out of range: {:?}", input)));
  }

  Err(Error::InvalidQuery(format!("invalid time: {:?}", input)))
}

fn parse_offset(input: &str) -> Option<Duration> {
  let unit = input.chars().last()?;
  let amount: i64 = input[..input.len() - unit.len_utf8()].parse().ok()?;
  match unit {
    's' => Duration::try_seconds(amount),
    'm' => Duration::try_minutes(amount),
    'h' => Duration::try_hours(amount),
    'd' => Duration::try_days(amount),
    'w' => Duration::try_weeks(amount),
    'y' => Duration::try_days(amount.checked_mul(365)?),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_insert_keeps_position() {
    let mut options = QueryOptions::new()
      .with("status", "open")
      .with("sort", "-id");
    options.insert("status", "closed");

    assert_eq!(options.fields().collect::<Vec<_>>(), vec!["status", "sort"]);
    assert_eq!(options.get("status"), Some(&OptionValue::from("closed")));
    assert_eq!(options.get("sort"), Some(&OptionValue::from("-id")));
  }

  #[test]
  fn test_parse_absolute_times() {
    let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
    assert_eq!(parse_time("2024-03-01T12:30:00Z").unwrap(), expected);
    assert_eq!(parse_time("2024-03-01 12:30:00").unwrap(), expected);
    assert_eq!(
      parse_time("2024-03-01").unwrap(),
      Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    );
  }

  #[test]
  fn test_parse_relative_time() {
    let before = Utc::now();
    let time = parse_time("2d").unwrap();
    let elapsed = before - time;
    assert!(elapsed >= Duration::days(2) - Duration::seconds(5));
    assert!(elapsed <= Duration::days(2) + Duration::seconds(5));
  }

  #[test]
  fn test_parse_time_rejects_garbage() {
    assert!(matches!(parse_time("yesterday-ish"), Err(Error::InvalidQuery(_))));
    assert!(matches!(parse_time("5q"), Err(Error::InvalidQuery(_))));
    assert!(matches!(parse_time(""), Err(Error::InvalidQuery(_))));
  }

  #[test]
  fn test_parse_time_offset_before_earliest_date() {
    // a valid duration, but far past the earliest representable date
    assert!(matches!(
      parse_time("100000000d"),
      Err(Error::InvalidQuery(_))
    ));
  }

  #[test]
  fn test_into_time_accepts_single_string() {
    let value = OptionValue::from("2024-03-01");
    assert!(value.into_time("created").is_ok());

    let value = OptionValue::from(&["2024-03-01", "2024-03-02"][..]);
    assert!(value.into_time("created").is_err());
  }
}
