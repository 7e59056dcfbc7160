pub mod account;
pub mod registry;
pub mod reloader;

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use thiserror::Error;

use self::{account::Account, registry::UserRegistry};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
  #[error("unknown user {0}")]
  UnknownUser(String),
  #[error("invalid credentials for user {0}")]
  BadCredential(String),
  #[error("account {0} is outside of its validity window")]
  AccountExpired(String),
  #[error("account {0} reached its connection limit ({1})")]
  ConnectionLimitExceeded(String, u32),
  #[error("account {0} exhausted its data quota ({1} bytes)")]
  DataQuotaExhausted(String, u64),
}

/// Outcome of a `charge` call.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charge {
  Allowed,
  QuotaExceeded,
}

/// A reserved connection slot. Dropping it releases the slot, so every exit path
/// of a session gives the slot back exactly once.
pub struct Admission {
  account: Arc<Account>,
}

impl Admission {
  pub fn account(&self) -> &Arc<Account> {
    &self.account
  }

  pub fn username(&self) -> &str {
    self.account.username()
  }
}

impl Drop for Admission {
  fn drop(&mut self) {
    let mut state = self.account.lock();
    state.usage.current_connections = state.usage.current_connections.saturating_sub(1);
    debug!("released slot for {}. Connections = {}", self.account.username(), state.usage.current_connections);
  }
}

impl std::fmt::Debug for Admission {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("Admission").field(&self.account.username()).finish()
  }
}

/// Credential, validity and quota checks. The only writer of account counters.
#[derive(Clone)]
pub struct AuthManager {
  registry: UserRegistry,
}

impl AuthManager {
  pub fn new(registry: UserRegistry) -> Self {
    Self { registry }
  }

  pub fn registry(&self) -> &UserRegistry {
    &self.registry
  }

  pub fn authenticate(&self, username: &str, password: &str) -> Result<Admission, AuthError> {
    self.admit_on(username, Some(password), Utc::now().date_naive())
  }

  /// Admission without a password, for SOCKS4 sessions bound to a configured account.
  pub fn admit(&self, username: &str) -> Result<Admission, AuthError> {
    self.admit_on(username, None, Utc::now().date_naive())
  }

  pub(crate) fn admit_on(&self, username: &str, password: Option<&str>, today: NaiveDate) -> Result<Admission, AuthError> {
    let account = self.registry.lookup(username).ok_or_else(|| AuthError::UnknownUser(username.to_string()))?;

    {
      // Checks and the increment happen under one lock: two racing sessions
      // cannot both pass the limit check.
      let mut state = account.lock();

      if state.retired {
        return Err(AuthError::UnknownUser(username.to_string()));
      }
      if let Some(password) = password {
        if state.profile.password != password {
          return Err(AuthError::BadCredential(username.to_string()));
        }
      }
      if !state.profile.is_valid_on(today) {
        return Err(AuthError::AccountExpired(username.to_string()));
      }
      if state.usage.current_connections >= state.profile.connection_limit {
        return Err(AuthError::ConnectionLimitExceeded(username.to_string(), state.profile.connection_limit));
      }
      if state.usage.current_data_usage >= state.profile.max_data {
        return Err(AuthError::DataQuotaExhausted(username.to_string(), state.profile.max_data));
      }

      state.usage.current_connections += 1;
      debug!("admitted {}. Connections = {}/{}", username, state.usage.current_connections, state.profile.connection_limit);
    }

    Ok(Admission { account })
  }

  /// Gives the slot back. Equivalent to dropping the admission.
  pub fn release(&self, admission: Admission) {
    drop(admission);
  }

  /// Adds `bytes` to the account's cumulative usage unless that would exceed
  /// `max_data`, in which case nothing is recorded.
  pub fn charge(&self, account: &Account, bytes: u64) -> Charge {
    let mut state = account.lock();
    let total = state.usage.current_data_usage.saturating_add(bytes);
    if total > state.profile.max_data {
      return Charge::QuotaExceeded;
    }
    state.usage.current_data_usage = total;
    Charge::Allowed
  }
}
