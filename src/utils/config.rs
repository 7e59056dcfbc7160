use config::{Config, ConfigError};
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub fn parse_args() -> Option<String> {
  let args: Vec<String> = env::args().collect();

  let mut opts = getopts::Options::new();
  opts.optopt("c", "config", "config file source (basename only, ex: /etc/socksgate/config)", "CONFIG");

  let matches = match opts.parse(&args[1..]) {
    Ok(m) => m,
    Err(f) => {
      panic!("{}", f.to_string())
    }
  };
  matches.opt_str("c")
}

pub fn load_config(path: String) -> Result<GlobalConfig, ConfigError> {
  let config = Config::builder().add_source(config::File::with_name(&path)).build()?;
  config.try_deserialize::<GlobalConfig>()
}

#[derive(Clone, Debug, Deserialize)]
pub struct GlobalConfig {
  pub system: SystemConfig,
  #[serde(default)]
  pub proxy: ProxyConfig,
  pub users: UsersConfig,
  pub log4rs: Log4rsConfig,
}

/// Process-wide limits, read once at startup.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SystemConfig {
  /// Ceiling on concurrent client connections across all accounts. 0 disables it.
  #[serde(default)]
  pub max_connections: usize,
  /// Bytes per second for sessions without an account-level rate. 0 disables throttling.
  #[serde(default)]
  pub max_bandwidth: u64,
  /// Seconds allowed for dialing a destination. 0 leaves it to the OS.
  #[serde(default)]
  pub connection_timeout: u64,
  #[serde(default)]
  pub gc_percent: i32,
}

impl SystemConfig {
  pub fn connection_timeout(&self) -> Option<Duration> {
    (self.connection_timeout > 0).then(|| Duration::from_secs(self.connection_timeout))
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProxyConfig {
  #[serde(default = "default_listeners")]
  pub listeners: Vec<SocketAddr>,
  #[serde(default = "default_backlog")]
  pub backlog: u32,
  #[serde(with = "humantime_serde", default = "default_handshake_timeout")]
  pub handshake_timeout: Duration,
  #[serde(default)]
  pub socks4: Socks4Config,
}

impl Default for ProxyConfig {
  fn default() -> Self {
    Self {
      listeners: default_listeners(),
      backlog: default_backlog(),
      handshake_timeout: default_handshake_timeout(),
      socks4: Socks4Config::default(),
    }
  }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Socks4Mode {
  #[default]
  Disabled,
  Unrestricted,
  Account,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Socks4Config {
  #[serde(default)]
  pub mode: Socks4Mode,
  pub account: Option<String>,
}

/// How SOCKS4 sessions, which carry no password, are admitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Socks4Policy {
  Disabled,
  Unrestricted,
  Account(String),
}

impl Socks4Config {
  pub fn policy(&self) -> Result<Socks4Policy, ConfigError> {
    match (self.mode, &self.account) {
      (Socks4Mode::Disabled, _) => Ok(Socks4Policy::Disabled),
      (Socks4Mode::Unrestricted, _) => Ok(Socks4Policy::Unrestricted),
      (Socks4Mode::Account, Some(account)) if !account.is_empty() => Ok(Socks4Policy::Account(account.clone())),
      (Socks4Mode::Account, _) => Err(ConfigError::Message(String::from("proxy.socks4.mode = \"account\" requires proxy.socks4.account"))),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct UsersConfig {
  pub location: PathBuf,
  #[serde(with = "humantime_serde", default = "default_reload_interval")]
  pub reload_interval: Duration,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Log4rsConfig {
  pub location: String,
}

fn default_listeners() -> Vec<SocketAddr> {
  vec![SocketAddr::from(([0, 0, 0, 0], 1080))]
}

fn default_backlog() -> u32 {
  1024
}

fn default_handshake_timeout() -> Duration {
  Duration::from_secs(10)
}

fn default_reload_interval() -> Duration {
  Duration::from_secs(10)
}

#[cfg(test)]
mod tests {
  use super::*;
  use config::{File, FileFormat};

  fn from_toml(source: &str) -> Result<GlobalConfig, ConfigError> {
    Config::builder().add_source(File::from_str(source, FileFormat::Toml)).build()?.try_deserialize()
  }

  #[test]
  fn minimal_config_uses_defaults() {
    let config = from_toml(
      r#"
      [system]
      max_connections = 100
      max_bandwidth = 1048576
      connection_timeout = 5
      gc_percent = 50

      [users]
      location = "users.conf"

      [log4rs]
      location = "log4rs.yaml"
      "#,
    )
    .unwrap();

    assert_eq!(config.system.max_connections, 100);
    assert_eq!(config.system.connection_timeout(), Some(Duration::from_secs(5)));
    assert_eq!(config.proxy.listeners, vec!["0.0.0.0:1080".parse::<SocketAddr>().unwrap()]);
    assert_eq!(config.proxy.handshake_timeout, Duration::from_secs(10));
    assert_eq!(config.users.reload_interval, Duration::from_secs(10));
    assert_eq!(config.proxy.socks4.policy().unwrap(), Socks4Policy::Disabled);
  }

  #[test]
  fn proxy_section_overrides() {
    let config = from_toml(
      r#"
      [system]
      connection_timeout = 0

      [proxy]
      listeners = ["127.0.0.1:1080", "[::1]:1080"]
      backlog = 64
      handshake_timeout = "3s"

      [proxy.socks4]
      mode = "account"
      account = "legacy"

      [users]
      location = "/etc/socksgate/users.conf"
      reload_interval = "1m"

      [log4rs]
      location = "log4rs.yaml"
      "#,
    )
    .unwrap();

    assert_eq!(config.system.connection_timeout(), None);
    assert_eq!(config.proxy.listeners.len(), 2);
    assert!(config.proxy.listeners[1].is_ipv6());
    assert_eq!(config.proxy.handshake_timeout, Duration::from_secs(3));
    assert_eq!(config.users.reload_interval, Duration::from_secs(60));
    assert_eq!(config.proxy.socks4.policy().unwrap(), Socks4Policy::Account("legacy".into()));
  }

  #[test]
  fn account_mode_requires_account_name() {
    let socks4 = Socks4Config {
      mode: Socks4Mode::Account,
      account: None,
    };
    assert!(socks4.policy().is_err());
  }
}
