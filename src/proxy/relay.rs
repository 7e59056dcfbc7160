use std::{
  net::SocketAddr,
  sync::atomic::{AtomicU64, Ordering},
};

use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::auth::{Admission, AuthManager, Charge};

use super::{error::RelayError, rate_limit::BandwidthLimiter};

const RELAY_BUFFER_SIZE: usize = 16 * 1024;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// An established proxy session. Holds the connection slot until dropped.
pub struct Session {
  id: u64,
  auth: AuthManager,
  peer: SocketAddr,
  target: SocketAddr,
  admission: Option<Admission>,
  bandwidth: u64,
  uploaded: AtomicU64,
  downloaded: AtomicU64,
}

impl Session {
  pub fn new(auth: AuthManager, peer: SocketAddr, target: SocketAddr, admission: Option<Admission>, bandwidth: u64) -> Self {
    Self {
      id: SESSION_COUNTER.fetch_add(1, Ordering::Relaxed),
      auth,
      peer,
      target,
      admission,
      bandwidth,
      uploaded: AtomicU64::new(0),
      downloaded: AtomicU64::new(0),
    }
  }

  pub fn username(&self) -> &str {
    self.admission.as_ref().map_or("-", |a| a.username())
  }

  pub fn uploaded(&self) -> u64 {
    self.uploaded.load(Ordering::Relaxed)
  }

  pub fn downloaded(&self) -> u64 {
    self.downloaded.load(Ordering::Relaxed)
  }

  /// Pumps both directions concurrently. The first direction to finish, fail or
  /// hit the data quota ends the whole relay; the other one is dropped with it.
  pub async fn relay<C, T>(&self, client: C, target: T) -> Result<(), RelayError>
  where
    C: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
  {
    debug!("session {} established ({} -> {}, user {})", self.id, self.peer, self.target, self.username());

    let (mut client_reader, mut client_writer) = split(client);
    let (mut target_reader, mut target_writer) = split(target);

    tokio::select! {
      result = self.pump(&mut client_reader, &mut target_writer, &self.uploaded) => result,
      result = self.pump(&mut target_reader, &mut client_writer, &self.downloaded) => result,
    }
  }

  async fn pump<R, W>(&self, reader: &mut R, writer: &mut W, counter: &AtomicU64) -> Result<(), RelayError>
  where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
  {
    let mut limiter = BandwidthLimiter::per_second(self.bandwidth);
    let chunk = limiter.as_ref().map_or(RELAY_BUFFER_SIZE, |l| l.burst().min(RELAY_BUFFER_SIZE));
    let mut buf = vec![0u8; chunk];

    loop {
      let n = reader.read(&mut buf).await.map_err(RelayError::ClosedConnection)?;
      if n == 0 {
        if let Err(e) = writer.shutdown().await {
          debug!("session {} half-close failed. Err = {}", self.id, e);
        }
        return Ok(());
      }

      if let Some(admission) = &self.admission {
        if self.auth.charge(admission.account(), n as u64) == Charge::QuotaExceeded {
          return Err(RelayError::QuotaExceeded(admission.username().to_string()));
        }
      }

      if let Some(limiter) = limiter.as_mut() {
        limiter.throttle(n).await;
      }

      writer.write_all(&buf[..n]).await.map_err(RelayError::ClosedConnection)?;
      counter.fetch_add(n as u64, Ordering::Relaxed);
    }
  }
}

impl Drop for Session {
  fn drop(&mut self) {
    debug!(
      "session {} closed ({} -> {}, user {}). Up = {} bytes, Down = {} bytes",
      self.id,
      self.peer,
      self.target,
      self.username(),
      self.uploaded(),
      self.downloaded()
    );
    if let Some(admission) = self.admission.take() {
      self.auth.release(admission);
    }
  }
}
