use std::time::Duration;

use tokio::{
  io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
  time::timeout,
};

use super::error::HandlerError;

pub async fn read_exact<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut [u8], limit: Duration) -> Result<(), HandlerError> {
  match timeout(limit, stream.read_exact(buf)).await {
    Ok(Ok(_)) => Ok(()),
    Ok(Err(e)) => Err(HandlerError::StreamReadError(e)),
    Err(_) => Err(HandlerError::StreamReadTimeout(limit)),
  }
}

pub async fn read_u8<S: AsyncRead + Unpin>(stream: &mut S, limit: Duration) -> Result<u8, HandlerError> {
  let mut byte = [0u8; 1];
  read_exact(stream, &mut byte, limit).await?;
  Ok(byte[0])
}

pub async fn write_all<S: AsyncWrite + Unpin>(stream: &mut S, buf: &[u8], limit: Duration) -> Result<(), HandlerError> {
  match timeout(limit, stream.write_all(buf)).await {
    Ok(Ok(())) => Ok(()),
    Ok(Err(e)) => Err(HandlerError::StreamWriteError(e)),
    Err(_) => Err(HandlerError::StreamWriteTimeout(limit)),
  }
}
