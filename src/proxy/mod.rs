use std::{collections::HashMap, net::SocketAddr, time::Duration};

use parking_lot::Mutex;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};

use crate::utils::socket::make_listener;

pub use self::{
  dispatcher::{Dispatcher, HandlerContext},
  error::ListenerError,
};

mod dispatcher;
mod error;
mod io;
mod rate_limit;
mod relay;
mod socks4;
mod socks5;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

struct ListenerHandle {
  shutdown: oneshot::Sender<()>,
  task: JoinHandle<()>,
}

/// Owns every bound listener. Each one has its own accept task and shutdown
/// channel; stopping a listener leaves established sessions running.
pub struct ListenerManager {
  dispatcher: Dispatcher,
  backlog: u32,
  listeners: Mutex<HashMap<SocketAddr, ListenerHandle>>,
}

impl ListenerManager {
  pub fn new(dispatcher: Dispatcher, backlog: u32) -> Self {
    Self {
      dispatcher,
      backlog,
      listeners: Mutex::new(HashMap::new()),
    }
  }

  /// Binds `addr` and starts accepting. Returns the bound address, which differs
  /// from `addr` when port 0 was requested.
  pub async fn start(&self, addr: SocketAddr) -> Result<SocketAddr, ListenerError> {
    if addr.port() != 0 && self.is_running(addr) {
      return Err(ListenerError::AlreadyRunning(addr));
    }

    let listener = make_listener(addr, self.backlog).await.map_err(|e| ListenerError::Bind(e, addr))?;
    let local_addr = listener.local_addr().map_err(|e| ListenerError::Bind(e, addr))?;

    let (shutdown, signal) = oneshot::channel();
    let task = tokio::spawn(accept_loop(listener, local_addr, self.dispatcher.clone(), signal));

    self.listeners.lock().insert(local_addr, ListenerHandle { shutdown, task });
    info!("Listening on {}", local_addr);
    Ok(local_addr)
  }

  /// Stops accepting on `addr` and waits for the listening socket to close.
  pub async fn stop(&self, addr: SocketAddr) -> Result<(), ListenerError> {
    let handle = self.listeners.lock().remove(&addr).ok_or(ListenerError::NotRunning(addr))?;

    let _ = handle.shutdown.send(());
    if let Err(e) = handle.task.await {
      warn!("listener {} task ended abnormally. Err = {}", addr, e);
    }
    Ok(())
  }

  pub async fn stop_all(&self) {
    for addr in self.addrs() {
      if let Err(e) = self.stop(addr).await {
        debug!("{}", e);
      }
    }
  }

  pub fn is_running(&self, addr: SocketAddr) -> bool {
    self.listeners.lock().get(&addr).map_or(false, |h| !h.task.is_finished())
  }

  pub fn addrs(&self) -> Vec<SocketAddr> {
    self.listeners.lock().keys().copied().collect()
  }
}

async fn accept_loop(listener: TcpListener, local_addr: SocketAddr, dispatcher: Dispatcher, mut shutdown: oneshot::Receiver<()>) {
  loop {
    tokio::select! {
      _ = &mut shutdown => break,
      accepted = listener.accept() => match accepted {
        Ok((stream, peer)) => dispatcher.dispatch(stream, peer),
        Err(e) => {
          warn!("accept failed on {}. Err = {}", local_addr, e);
          tokio::time::sleep(ACCEPT_BACKOFF).await;
        }
      },
    }
  }

  info!("Listener {} stopped", local_addr);
}
