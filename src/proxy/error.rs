use std::{io::Error as IoError, net::SocketAddr, time::Duration};
use thiserror::Error;

use crate::auth::AuthError;

#[derive(Error, Debug)]
pub enum HandlerError {
  #[error("protocol violation: {0}")]
  Protocol(&'static str),
  #[error("unsupported socks version {0:#04x}")]
  UnsupportedVersion(u8),
  #[error("socks5-proto error. Err = {0}")]
  Socks5Proto(IoError),
  #[error("authentication refused: {0}")]
  Authentication(AuthError),
  #[error("socks4 sessions are disabled")]
  Socks4Disabled,
  #[error("command {0:#04x} is not supported")]
  CommandNotSupported(u8),
  #[error("address type {0:#04x} is not supported")]
  AddressTypeNotSupported(u8),
  #[error("failed to create outbound TcpStream ({1}). Err = {0}")]
  OutboundError(IoError, SocketAddr),
  #[error("error while reading from stream. Err = {0}")]
  StreamReadError(IoError),
  #[error("error while writing to stream. Err = {0}")]
  StreamWriteError(IoError),
  #[error("stream read timeout ({0:?})")]
  StreamReadTimeout(Duration),
  #[error("stream write timeout ({0:?})")]
  StreamWriteTimeout(Duration),
  #[error("relay terminated. Err = {0}")]
  Relay(RelayError),
}

impl HandlerError {
  /// Refusals a client can trigger at will; logged below warn level.
  pub fn is_refusal(&self) -> bool {
    matches!(self, HandlerError::Authentication(_) | HandlerError::Socks4Disabled)
  }
}

#[derive(Error, Debug)]
pub enum RelayError {
  #[error("account {0} exceeded its data quota")]
  QuotaExceeded(String),
  #[error("connection closed by the client/upstream. Err = {0}")]
  ClosedConnection(IoError),
}

#[derive(Error, Debug)]
pub enum ListenerError {
  #[error("failed to bind listener on {1}. Err = {0}")]
  Bind(IoError, SocketAddr),
  #[error("listener {0} is already running")]
  AlreadyRunning(SocketAddr),
  #[error("no listener running on {0}")]
  NotRunning(SocketAddr),
}
