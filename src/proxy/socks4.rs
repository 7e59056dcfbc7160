use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::TcpStream;

use crate::{
  auth::Admission,
  utils::{
    config::Socks4Policy,
    constants::{CMD_CONNECT, SOCKS4_GRANTED, SOCKS4_MAX_USER_ID, SOCKS4_REJECTED, SOCKS4_REPLY_VERSION, SOCKS4_VERSION},
    socket::make_outbound,
  },
};

use super::{
  dispatcher::HandlerContext,
  error::HandlerError,
  io::{read_exact, read_u8, write_all},
  relay::Session,
};

pub struct Socks4Handler<'a> {
  stream: &'a mut TcpStream,
  peer: SocketAddr,
  context: HandlerContext,
}

impl<'a> Socks4Handler<'a> {
  pub fn new(stream: &'a mut TcpStream, peer: SocketAddr, context: HandlerContext) -> Socks4Handler<'a> {
    Socks4Handler { stream, peer, context }
  }

  pub async fn execute(&mut self) {
    if let Err(e) = self.handle().await {
      if e.is_refusal() {
        return debug!("socks4 {}: {}", self.peer, e);
      }
      warn!("socks4 {}: {}", self.peer, e);
    }
  }

  async fn handle(&mut self) -> Result<(), HandlerError> {
    let target_addr = self.request_read().await?;

    let admission = match self.admit() {
      Ok(a) => a,
      Err(e) => {
        self.reply(SOCKS4_REJECTED).await?;
        return Err(e);
      }
    };

    let outbound = match make_outbound(target_addr, self.context.connection_timeout).await {
      Ok(outbound) => outbound,
      Err(e) => {
        self.reply(SOCKS4_REJECTED).await?;
        return Err(HandlerError::OutboundError(e, target_addr));
      }
    };

    self.reply(SOCKS4_GRANTED).await?;

    let bandwidth = self.context.bandwidth_for(admission.as_ref());
    let session = Session::new(self.context.auth.clone(), self.peer, target_addr, admission, bandwidth);
    session.relay(&mut *self.stream, outbound).await.map_err(HandlerError::Relay)
  }

  /// Reads `VN CD DSTPORT DSTIP USERID NUL`. The user id is discarded.
  async fn request_read(&mut self) -> Result<SocketAddr, HandlerError> {
    let mut header = [0u8; 8];
    read_exact(self.stream, &mut header, self.context.handshake_timeout).await?;

    if header[0] != SOCKS4_VERSION {
      return Err(HandlerError::UnsupportedVersion(header[0]));
    }

    if header[1] != CMD_CONNECT {
      self.reply(SOCKS4_REJECTED).await?;
      return Err(HandlerError::CommandNotSupported(header[1]));
    }

    let port = u16::from_be_bytes([header[2], header[3]]);
    let ip = Ipv4Addr::new(header[4], header[5], header[6], header[7]);

    self.skip_user_id().await?;

    Ok(SocketAddr::from((ip, port)))
  }

  async fn skip_user_id(&mut self) -> Result<(), HandlerError> {
    for _ in 0..=SOCKS4_MAX_USER_ID {
      if read_u8(self.stream, self.context.handshake_timeout).await? == 0x00 {
        return Ok(());
      }
    }
    Err(HandlerError::Protocol("socks4 user id exceeds maximum length"))
  }

  fn admit(&self) -> Result<Option<Admission>, HandlerError> {
    match &self.context.socks4 {
      Socks4Policy::Disabled => Err(HandlerError::Socks4Disabled),
      Socks4Policy::Unrestricted => Ok(None),
      Socks4Policy::Account(username) => self.context.auth.admit(username).map(Some).map_err(HandlerError::Authentication),
    }
  }

  /// Status followed by the ignored DSTPORT/DSTIP fields.
  async fn reply(&mut self, status: u8) -> Result<(), HandlerError> {
    let reply = [SOCKS4_REPLY_VERSION, status, 0, 0, 0, 0, 0, 0];
    write_all(self.stream, &reply, self.context.handshake_timeout).await
  }
}
