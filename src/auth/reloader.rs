use std::{path::PathBuf, time::Duration};

use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::utils::users::load_users;

use super::registry::UserRegistry;

/// Periodically re-reads the users file into the registry.
pub struct ReloadManager {
  registry: UserRegistry,
  location: PathBuf,
  interval: Duration,
}

impl ReloadManager {
  pub fn new(registry: UserRegistry, location: PathBuf, interval: Duration) -> Self {
    Self { registry, location, interval }
  }

  pub async fn monitor(&self) {
    info!("Started users reload task ({} every {:?})", self.location.display(), self.interval);

    let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      ticker.tick().await;
      self.reload_once().await;
    }
  }

  /// A failed read leaves the registry untouched.
  pub async fn reload_once(&self) -> bool {
    match load_users(&self.location).await {
      Ok(profiles) => {
        let summary = self.registry.reload(profiles);
        debug!(
          "users reloaded. Added = {}, Updated = {}, Unchanged = {}, Removed = {}",
          summary.added, summary.updated, summary.unchanged, summary.removed
        );
        if summary.added + summary.updated + summary.removed > 0 {
          for (username, usage) in self.registry.snapshot() {
            info!(
              "account {}: connections = {}, data usage = {} bytes",
              username, usage.current_connections, usage.current_data_usage
            );
          }
        }
        true
      }
      Err(e) => {
        warn!("users reload failed, keeping previous registry. Err = {:#}", e);
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::auth::registry::tests::{profile, registry_with};

  #[tokio::test]
  async fn failed_reload_keeps_previous_registry() {
    let registry = registry_with(&[("alice", profile("pw", 1, 10))]);
    let reloader = ReloadManager::new(registry.clone(), PathBuf::from("/nonexistent/socksgate/users.conf"), Duration::from_secs(10));

    assert!(!reloader.reload_once().await);
    assert!(registry.lookup("alice").is_some());
  }

  #[tokio::test]
  async fn reload_reads_users_file() {
    let path = std::env::temp_dir().join(format!("socksgate-users-{}.conf", std::process::id()));
    tokio::fs::write(&path, "bob,pw,2024-01-01,2999-12-31,2,100,0\n").await.unwrap();

    let registry = registry_with(&[("alice", profile("pw", 1, 10))]);
    let reloader = ReloadManager::new(registry.clone(), path.clone(), Duration::from_secs(10));
    assert!(reloader.reload_once().await);
    tokio::fs::remove_file(&path).await.unwrap();

    assert!(registry.lookup("alice").is_none());
    assert_eq!(registry.lookup("bob").unwrap().profile().connection_limit, 2);
  }
}
