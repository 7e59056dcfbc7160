use auth::{registry::UserRegistry, reloader::ReloadManager, AuthManager};
use proxy::{Dispatcher, HandlerContext, ListenerManager};
use utils::{
  config::{load_config, parse_args},
  users::load_users,
};

#[macro_use]
extern crate log;

mod auth;
mod proxy;
mod utils;

#[tokio::main]
async fn main() {
  let config_path = parse_args().expect("Missing required option c (config)");
  let config = load_config(config_path).expect("Error parsing config file");
  log4rs::init_file(&config.log4rs.location, Default::default()).expect("Failed to initialize log4rs");

  info!("System configuration loaded: {:?}", config.system);
  if config.system.gc_percent != 0 {
    debug!("gc_percent = {} has no effect on this runtime", config.system.gc_percent);
  }

  let socks4 = config.proxy.socks4.policy().expect("Invalid [proxy.socks4] section");
  info!("SOCKS4 admission policy: {:?}", socks4);

  let profiles = load_users(&config.users.location).await.expect("Unable to load user list");
  let registry = UserRegistry::new();
  registry.reload(profiles);
  info!("Loaded {} accounts from {}", registry.len(), config.users.location.display());

  let auth_manager = AuthManager::new(registry);
  let reload_manager = ReloadManager::new(auth_manager.registry().clone(), config.users.location.clone(), config.users.reload_interval);

  let context = HandlerContext::new(auth_manager, &config.system, &config.proxy, socks4);
  let listeners = ListenerManager::new(Dispatcher::new(context, config.system.max_connections), config.proxy.backlog);

  for &addr in config.proxy.listeners.iter() {
    if let Err(e) = listeners.start(addr).await {
      error!("Failed to initialize listener. Err = {}", e);
    }
  }

  if listeners.addrs().is_empty() {
    return error!("No listener could be started, exiting");
  }

  tokio::select! {
    _ = reload_manager.monitor() => {},
    result = tokio::signal::ctrl_c() => {
      if let Err(e) = result {
        error!("Failed to listen for shutdown signal. Err = {}", e);
      }
      info!("Shutting down listeners");
      listeners.stop_all().await;
    }
  }
}
