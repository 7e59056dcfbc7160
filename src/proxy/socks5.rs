use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use socks5_proto::{
  handshake::password::Request as PasswordRequest,
  handshake::{Method as HandshakeMethod, Request as HandshakeRequest, Response as HandshakeResponse},
  Address, Reply, Response,
};
use tokio::{net::TcpStream, time::timeout};

use crate::{
  auth::Admission,
  utils::{
    constants::{
      ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, CMD_CONNECT, SOCKS5_AUTH_FAILED, SOCKS5_AUTH_SUCCEEDED, SOCKS5_AUTH_VERSION, SOCKS5_VERSION,
    },
    socket::make_outbound,
  },
};

use super::{
  dispatcher::HandlerContext,
  error::HandlerError,
  io::{read_exact, write_all},
  relay::Session,
};

pub struct Socks5Handler<'a> {
  stream: &'a mut TcpStream,
  peer: SocketAddr,
  context: HandlerContext,
}

impl<'a> Socks5Handler<'a> {
  pub fn new(stream: &'a mut TcpStream, peer: SocketAddr, context: HandlerContext) -> Socks5Handler<'a> {
    Socks5Handler { stream, peer, context }
  }

  pub async fn execute(&mut self) {
    if let Err(e) = self.handle().await {
      if e.is_refusal() {
        return debug!("socks5 {}: {}", self.peer, e);
      }
      warn!("socks5 {}: {}", self.peer, e);
    }
  }

  async fn handle(&mut self) -> Result<(), HandlerError> {
    self.check_methods().await?;
    let admission = self.handle_authentication().await?;
    let target_addr = self.request_read().await?;

    let outbound = match make_outbound(target_addr, self.context.connection_timeout).await {
      Ok(outbound) => outbound,
      Err(e) => {
        self.reply(Reply::HostUnreachable, Address::unspecified()).await?;
        return Err(HandlerError::OutboundError(e, target_addr));
      }
    };

    let bound_addr = outbound.local_addr().unwrap_or_else(|_| unspecified_like(target_addr));
    self.reply(Reply::Succeeded, Address::SocketAddress(bound_addr)).await?;

    let bandwidth = self.context.bandwidth_for(Some(&admission));
    let session = Session::new(self.context.auth.clone(), self.peer, target_addr, Some(admission), bandwidth);
    session.relay(&mut *self.stream, outbound).await.map_err(HandlerError::Relay)
  }

  /// Username/password is always selected, whatever the client offered. A client
  /// that did not offer it fails on the next step.
  async fn check_methods(&mut self) -> Result<(), HandlerError> {
    let req = self.handshake_read().await?;

    if !req.methods.contains(&HandshakeMethod::PASSWORD) {
      debug!("socks5 {} did not offer username/password auth, selecting it anyway", self.peer);
    }

    self.handshake_reply(HandshakeMethod::PASSWORD).await
  }

  async fn handle_authentication(&mut self) -> Result<Admission, HandlerError> {
    let req = self.handshake_password_read().await?;

    let (username, password) = match (std::str::from_utf8(&req.username), std::str::from_utf8(&req.password)) {
      (Ok(username), Ok(password)) => (username, password),
      _ => {
        self.handshake_password_reply(false).await?;
        return Err(HandlerError::Protocol("credentials are not valid utf-8"));
      }
    };

    match self.context.auth.authenticate(username, password) {
      Ok(admission) => {
        self.handshake_password_reply(true).await?;
        Ok(admission)
      }
      Err(e) => {
        self.handshake_password_reply(false).await?;
        Err(HandlerError::Authentication(e))
      }
    }
  }

  /// Reads `VER CMD RSV ATYP DST.ADDR DST.PORT`; only CONNECT to an IP literal is served.
  async fn request_read(&mut self) -> Result<SocketAddr, HandlerError> {
    let limit = self.context.handshake_timeout;
    let mut header = [0u8; 4];
    read_exact(self.stream, &mut header, limit).await?;

    if header[0] != SOCKS5_VERSION {
      return Err(HandlerError::UnsupportedVersion(header[0]));
    }

    if header[1] != CMD_CONNECT {
      self.reply(Reply::CommandNotSupported, Address::unspecified()).await?;
      return Err(HandlerError::CommandNotSupported(header[1]));
    }

    match header[3] {
      ATYP_IPV4 => {
        let mut buf = [0u8; 6];
        read_exact(self.stream, &mut buf, limit).await?;
        let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
        Ok(SocketAddr::from((ip, u16::from_be_bytes([buf[4], buf[5]]))))
      }
      ATYP_IPV6 => {
        let mut buf = [0u8; 18];
        read_exact(self.stream, &mut buf, limit).await?;
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&buf[..16]);
        Ok(SocketAddr::from((Ipv6Addr::from(octets), u16::from_be_bytes([buf[16], buf[17]]))))
      }
      ATYP_DOMAIN => {
        debug!("socks5 {} requested a domain name target, which is not served", self.peer);
        self.reply(Reply::AddressTypeNotSupported, Address::unspecified()).await?;
        Err(HandlerError::AddressTypeNotSupported(ATYP_DOMAIN))
      }
      _ => Err(HandlerError::Protocol("undefined socks5 address type")),
    }
  }

  async fn handshake_read(&mut self) -> Result<HandshakeRequest, HandlerError> {
    let limit = self.context.handshake_timeout;
    match timeout(limit, HandshakeRequest::read_from(self.stream)).await {
      Ok(req) => match req {
        Ok(req) => Ok(req),
        Err(e) => Err(HandlerError::Socks5Proto(e.into())),
      },
      Err(_) => Err(HandlerError::StreamReadTimeout(limit)),
    }
  }

  async fn handshake_reply(&mut self, method: HandshakeMethod) -> Result<(), HandlerError> {
    let limit = self.context.handshake_timeout;
    match timeout(limit, HandshakeResponse::new(method).write_to(self.stream)).await {
      Ok(result) => result.map_err(HandlerError::StreamWriteError),
      Err(_) => Err(HandlerError::StreamWriteTimeout(limit)),
    }
  }

  async fn handshake_password_read(&mut self) -> Result<PasswordRequest, HandlerError> {
    let limit = self.context.handshake_timeout;
    match timeout(limit, PasswordRequest::read_from(self.stream)).await {
      Ok(req) => match req {
        Ok(req) => Ok(req),
        Err(e) => Err(HandlerError::Socks5Proto(e.into())),
      },
      Err(_) => Err(HandlerError::StreamReadTimeout(limit)),
    }
  }

  /// Every refusal is answered with status 0x01.
  async fn handshake_password_reply(&mut self, authorized: bool) -> Result<(), HandlerError> {
    let status = if authorized { SOCKS5_AUTH_SUCCEEDED } else { SOCKS5_AUTH_FAILED };
    write_all(self.stream, &[SOCKS5_AUTH_VERSION, status], self.context.handshake_timeout).await
  }

  async fn reply(&mut self, reply: Reply, address: Address) -> Result<(), HandlerError> {
    let limit = self.context.handshake_timeout;
    match timeout(limit, Response::new(reply, address).write_to(self.stream)).await {
      Ok(result) => result.map_err(HandlerError::StreamWriteError),
      Err(_) => Err(HandlerError::StreamWriteTimeout(limit)),
    }
  }
}

fn unspecified_like(addr: SocketAddr) -> SocketAddr {
  match addr.ip() {
    IpAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
    IpAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
  }
}
