use std::{collections::HashMap, sync::Arc};

use parking_lot::{Mutex, RwLock};

use super::account::{Account, AccountProfile, AccountUsage};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReloadSummary {
  pub added: usize,
  pub updated: usize,
  pub unchanged: usize,
  pub removed: usize,
}

/// Username -> account map shared by every listener and the reload task.
#[derive(Clone, Default)]
pub struct UserRegistry {
  accounts: Arc<RwLock<HashMap<String, Arc<Account>>>>,
  reload_lock: Arc<Mutex<()>>,
}

impl UserRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn lookup(&self, username: &str) -> Option<Arc<Account>> {
    self.accounts.read().get(username).cloned()
  }

  pub fn len(&self) -> usize {
    self.accounts.read().len()
  }

  /// Merges `profiles` into the registry.
  ///
  /// Accounts present before and after keep their `Arc` and live counters, only
  /// their profile is swapped (under the account lock). Missing usernames are
  /// retired and become undiscoverable, new ones start with zero counters. The
  /// map itself is replaced in a single write-locked swap.
  pub fn reload(&self, profiles: HashMap<String, AccountProfile>) -> ReloadSummary {
    let _guard = self.reload_lock.lock();
    let mut summary = ReloadSummary::default();

    let current = self.accounts.read().clone();
    let mut next = HashMap::with_capacity(profiles.len());

    for (username, profile) in profiles {
      let account = match current.get(&username) {
        Some(existing) => {
          if existing.replace_profile(profile) {
            summary.updated += 1;
          } else {
            summary.unchanged += 1;
          }
          existing.clone()
        }
        None => {
          summary.added += 1;
          Arc::new(Account::new(username.clone(), profile))
        }
      };
      next.insert(username, account);
    }

    for (username, account) in current.iter() {
      if !next.contains_key(username) {
        debug!("retiring account {} ({} live sessions)", username, account.usage().current_connections);
        account.retire();
        summary.removed += 1;
      }
    }

    // The write guard is released at the end of this statement; the old map is freed after it.
    let previous = std::mem::replace(&mut *self.accounts.write(), next);
    drop(previous);
    summary
  }

  pub fn snapshot(&self) -> Vec<(String, AccountUsage)> {
    let accounts: Vec<Arc<Account>> = self.accounts.read().values().cloned().collect();
    let mut usage: Vec<(String, AccountUsage)> = accounts.iter().map(|a| (a.username().to_string(), a.usage())).collect();
    usage.sort_by(|a, b| a.0.cmp(&b.0));
    usage
  }
}
