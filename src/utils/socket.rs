use std::{io::ErrorKind, net::SocketAddr, time::Duration};

use tokio::{
  io::Error as IoError,
  net::{TcpListener, TcpSocket, TcpStream},
  time::timeout,
};

pub async fn make_listener(listen_addr: SocketAddr, backlog: u32) -> Result<TcpListener, IoError> {
  let socket = if listen_addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };

  socket.set_reuseaddr(true)?;
  socket.bind(listen_addr)?;

  socket.listen(backlog)
}

/// Dials `target_addr`, giving up after `connect_timeout` when one is set.
pub async fn make_outbound(target_addr: SocketAddr, connect_timeout: Option<Duration>) -> Result<TcpStream, IoError> {
  let outbound = match connect_timeout {
    Some(limit) => match timeout(limit, TcpStream::connect(target_addr)).await {
      Ok(result) => result?,
      Err(_) => return Err(IoError::new(ErrorKind::TimedOut, format!("connect timed out after {:?}", limit))),
    },
    None => TcpStream::connect(target_addr).await?,
  };

  outbound.set_nodelay(true)?;
  Ok(outbound)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn listener_binds_ephemeral_port() {
    let listener = make_listener("127.0.0.1:0".parse().unwrap(), 16).await.unwrap();
    assert_ne!(listener.local_addr().unwrap().port(), 0);
  }

  #[tokio::test]
  async fn outbound_to_closed_port_fails() {
    let listener = make_listener("127.0.0.1:0".parse().unwrap(), 16).await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    assert!(make_outbound(addr, Some(Duration::from_secs(2))).await.is_err());
  }
}
