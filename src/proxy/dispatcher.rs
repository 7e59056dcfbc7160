use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
  net::TcpStream,
  sync::{OwnedSemaphorePermit, Semaphore},
  time::timeout,
};

use crate::{
  auth::{Admission, AuthManager},
  utils::{
    config::{ProxyConfig, Socks4Policy, SystemConfig},
    constants::{SOCKS4_VERSION, SOCKS5_VERSION},
  },
};

use super::{error::HandlerError, socks4::Socks4Handler, socks5::Socks5Handler};

/// Everything a handshake handler needs, cloned into each connection task.
#[derive(Clone)]
pub struct HandlerContext {
  pub auth: AuthManager,
  pub socks4: Socks4Policy,
  pub default_bandwidth: u64,
  pub connection_timeout: Option<Duration>,
  pub handshake_timeout: Duration,
}

impl HandlerContext {
  pub fn new(auth: AuthManager, system: &SystemConfig, proxy: &ProxyConfig, socks4: Socks4Policy) -> Self {
    Self {
      auth,
      socks4,
      default_bandwidth: system.max_bandwidth,
      connection_timeout: system.connection_timeout(),
      handshake_timeout: proxy.handshake_timeout,
    }
  }

  /// Per-session rate: the account's own ceiling, else the system default.
  pub fn bandwidth_for(&self, admission: Option<&Admission>) -> u64 {
    match admission.map(|a| a.account().profile().max_bandwidth) {
      Some(rate) if rate > 0 => rate,
      _ => self.default_bandwidth,
    }
  }
}

/// Global ceiling on concurrent client connections.
#[derive(Clone)]
pub struct ConnectionGate {
  semaphore: Option<Arc<Semaphore>>,
}

/// Held for the lifetime of a connection task.
pub struct ConnectionPermit(#[allow(dead_code)] Option<OwnedSemaphorePermit>);

impl ConnectionGate {
  pub fn new(limit: usize) -> Self {
    Self {
      semaphore: (limit > 0).then(|| Arc::new(Semaphore::new(limit))),
    }
  }

  pub fn try_enter(&self) -> Option<ConnectionPermit> {
    match &self.semaphore {
      None => Some(ConnectionPermit(None)),
      Some(semaphore) => match semaphore.clone().try_acquire_owned() {
        Ok(permit) => {
          trace!("entered connection gate. Available = {}", semaphore.available_permits());
          Some(ConnectionPermit(Some(permit)))
        }
        Err(_) => None,
      },
    }
  }
}

/// Protocol chosen once from the leading byte of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
  Socks4,
  Socks5,
}

impl Protocol {
  pub fn from_leading_byte(byte: u8) -> Option<Self> {
    match byte {
      SOCKS4_VERSION => Some(Protocol::Socks4),
      SOCKS5_VERSION => Some(Protocol::Socks5),
      _ => None,
    }
  }

  /// Peeks the first byte without consuming it; the handler re-reads it.
  async fn detect(stream: &TcpStream, limit: Duration) -> Result<Self, HandlerError> {
    let mut byte = [0u8; 1];
    match timeout(limit, stream.peek(&mut byte)).await {
      Ok(Ok(0)) => Err(HandlerError::Protocol("connection closed before the version byte")),
      Ok(Ok(_)) => Self::from_leading_byte(byte[0]).ok_or(HandlerError::UnsupportedVersion(byte[0])),
      Ok(Err(e)) => Err(HandlerError::StreamReadError(e)),
      Err(_) => Err(HandlerError::StreamReadTimeout(limit)),
    }
  }
}

#[derive(Clone)]
pub struct Dispatcher {
  context: HandlerContext,
  gate: ConnectionGate,
}

impl Dispatcher {
  pub fn new(context: HandlerContext, max_connections: usize) -> Self {
    Self {
      context,
      gate: ConnectionGate::new(max_connections),
    }
  }

  /// Hands the connection to its own task; never waits on the handshake.
  pub fn dispatch(&self, mut stream: TcpStream, peer: SocketAddr) {
    let permit = match self.gate.try_enter() {
      Some(permit) => permit,
      None => return warn!("global connection limit reached, dropping {}", peer),
    };

    let context = self.context.clone();

    tokio::spawn(async move {
      let _permit = permit;

      let protocol = match Protocol::detect(&stream, context.handshake_timeout).await {
        Ok(p) => p,
        Err(e) => return debug!("dropping {}: {}", peer, e),
      };

      match protocol {
        Protocol::Socks4 => Socks4Handler::new(&mut stream, peer, context).execute().await,
        Protocol::Socks5 => Socks5Handler::new(&mut stream, peer, context).execute().await,
      }
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn leading_byte_selects_protocol() {
    assert_eq!(Protocol::from_leading_byte(0x04), Some(Protocol::Socks4));
    assert_eq!(Protocol::from_leading_byte(0x05), Some(Protocol::Socks5));
    assert_eq!(Protocol::from_leading_byte(b'G'), None);
  }

  #[tokio::test]
  async fn gate_caps_concurrent_permits() {
    let gate = ConnectionGate::new(2);
    let first = gate.try_enter().unwrap();
    let _second = gate.try_enter().unwrap();
    assert!(gate.try_enter().is_none());

    drop(first);
    assert!(gate.try_enter().is_some());
  }

  #[test]
  fn zero_limit_means_unbounded() {
    let gate = ConnectionGate::new(0);
    let permits: Vec<_> = (0..1_000).map(|_| gate.try_enter()).collect();
    assert!(permits.iter().all(Option::is_some));
  }
}
