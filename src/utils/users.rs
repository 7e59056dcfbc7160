use std::{collections::HashMap, path::Path};

use anyhow::Context;
use chrono::NaiveDate;
use thiserror::Error;

use crate::auth::account::AccountProfile;

const DATE_FORMAT: &str = "%Y-%m-%d";
const FIELD_COUNT: usize = 7;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecordError {
  #[error("expected 7 comma separated fields, found {0}")]
  FieldCount(usize),
  #[error("empty username")]
  EmptyUsername,
  #[error("invalid {0} date {1:?}")]
  InvalidDate(&'static str, String),
  #[error("invalid {0} value {1:?}")]
  InvalidNumber(&'static str, String),
  #[error("valid_from {0} is after valid_until {1}")]
  InvertedWindow(NaiveDate, NaiveDate),
}

/// Reads a users file. Malformed records are skipped with a warning; only an
/// unreadable file is an error.
pub async fn load_users(path: impl AsRef<Path>) -> anyhow::Result<HashMap<String, AccountProfile>> {
  let path = path.as_ref();
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read users file {}", path.display()))?;
  Ok(parse_users(&content))
}

/// One record per line: `username,password,valid_from,valid_until,connection_limit,max_data,max_bandwidth`.
pub fn parse_users(content: &str) -> HashMap<String, AccountProfile> {
  let mut users = HashMap::new();

  for (idx, line) in content.lines().enumerate() {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
      continue;
    }

    match parse_record(line) {
      Ok((username, profile)) => {
        if users.insert(username.clone(), profile).is_some() {
          warn!("users file line {}: duplicate user {}, last record wins", idx + 1, username);
        }
      }
      Err(e) => warn!("users file line {}: skipped malformed record. Err = {}", idx + 1, e),
    }
  }

  users
}

fn parse_record(line: &str) -> Result<(String, AccountProfile), RecordError> {
  let fields: Vec<&str> = line.split(',').map(str::trim).collect();
  if fields.len() != FIELD_COUNT {
    return Err(RecordError::FieldCount(fields.len()));
  }

  let username = fields[0];
  if username.is_empty() {
    return Err(RecordError::EmptyUsername);
  }

  let valid_from = parse_date("valid_from", fields[2])?;
  let valid_until = parse_date("valid_until", fields[3])?;
  if valid_from > valid_until {
    return Err(RecordError::InvertedWindow(valid_from, valid_until));
  }

  let profile = AccountProfile {
    password: fields[1].to_string(),
    valid_from,
    valid_until,
    connection_limit: parse_number("connection_limit", fields[4])?,
    max_data: parse_number("max_data", fields[5])?,
    max_bandwidth: parse_number("max_bandwidth", fields[6])?,
  };

  Ok((username.to_string(), profile))
}

fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, RecordError> {
  NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| RecordError::InvalidDate(field, value.to_string()))
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, RecordError> {
  value.parse::<T>().map_err(|_| RecordError::InvalidNumber(field, value.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_well_formed_records() {
    let users = parse_users("alice,secret,2024-01-01,2024-12-31,3,1048576,65536\n\n# comment\nbob,pw,2024-02-01,2025-02-01,1,10,0\n");
    assert_eq!(users.len(), 2);

    let alice = &users["alice"];
    assert_eq!(alice.password, "secret");
    assert_eq!(alice.valid_from, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    assert_eq!(alice.valid_until, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
    assert_eq!(alice.connection_limit, 3);
    assert_eq!(alice.max_data, 1_048_576);
    assert_eq!(alice.max_bandwidth, 65_536);
  }

  #[test]
  fn skips_malformed_records() {
    let users = parse_users(
      "short,line\n\
       ,pw,2024-01-01,2024-12-31,1,1,1\n\
       bad-date,pw,2024-13-01,2024-12-31,1,1,1\n\
       bad-limit,pw,2024-01-01,2024-12-31,-1,1,1\n\
       inverted,pw,2024-12-31,2024-01-01,1,1,1\n\
       good,pw,2024-01-01,2024-12-31,1,1,1\n",
    );
    assert_eq!(users.keys().collect::<Vec<_>>(), vec!["good"]);
  }

  #[test]
  fn record_errors_name_the_problem() {
    assert_eq!(parse_record("a,b,c"), Err(RecordError::FieldCount(3)));
    assert_eq!(
      parse_record("a,b,2024-01-01,2024-01-02,x,1,1"),
      Err(RecordError::InvalidNumber("connection_limit", "x".into()))
    );
  }

  #[test]
  fn duplicate_usernames_keep_last_record() {
    let users = parse_users("alice,old,2024-01-01,2024-12-31,1,1,1\nalice,new,2024-01-01,2024-12-31,1,1,1\n");
    assert_eq!(users["alice"].password, "new");
  }

  #[tokio::test]
  async fn missing_file_is_an_error() {
    assert!(load_users("/nonexistent/socksgate/users.conf").await.is_err());
  }
}
