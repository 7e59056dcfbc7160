use chrono::NaiveDate;
use parking_lot::{Mutex, MutexGuard};

/// Static account fields, replaced wholesale on reload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountProfile {
  pub password: String,
  pub valid_from: NaiveDate,
  pub valid_until: NaiveDate,
  pub connection_limit: u32,
  pub max_data: u64,
  pub max_bandwidth: u64,
}

impl AccountProfile {
  pub fn is_valid_on(&self, day: NaiveDate) -> bool {
    self.valid_from <= day && day <= self.valid_until
  }
}

/// Live counters. Survive reloads for usernames present on both sides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccountUsage {
  pub current_connections: u32,
  pub current_data_usage: u64,
}

pub(super) struct AccountState {
  pub(super) profile: AccountProfile,
  pub(super) usage: AccountUsage,
  pub(super) retired: bool,
}

/// One registry entry. Profile and counters share a single lock so that a check
/// never observes a half-applied reload.
pub struct Account {
  username: String,
  state: Mutex<AccountState>,
}

impl Account {
  pub(super) fn new(username: String, profile: AccountProfile) -> Self {
    Self {
      username,
      state: Mutex::new(AccountState {
        profile,
        usage: AccountUsage::default(),
        retired: false,
      }),
    }
  }

  pub fn username(&self) -> &str {
    &self.username
  }

  pub fn profile(&self) -> AccountProfile {
    self.state.lock().profile.clone()
  }

  pub fn usage(&self) -> AccountUsage {
    self.state.lock().usage
  }

  pub(super) fn lock(&self) -> MutexGuard<'_, AccountState> {
    self.state.lock()
  }

  /// Returns true when the stored profile actually changed.
  pub(super) fn replace_profile(&self, profile: AccountProfile) -> bool {
    let mut state = self.state.lock();
    if state.profile == profile {
      return false;
    }
    state.profile = profile;
    true
  }

  /// Retired accounts were dropped by a reload; sessions holding them may finish.
  pub(super) fn retire(&self) {
    self.state.lock().retired = true;
  }
}

impl std::fmt::Debug for Account {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let state = self.state.lock();
    f.debug_struct("Account")
      .field("username", &self.username)
      .field("usage", &state.usage)
      .field("retired", &state.retired)
      .finish()
  }
}
