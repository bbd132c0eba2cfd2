//! Length-prefixed JSON framing
//!
//! Every frame is a big-endian `u32` byte length followed by a UTF-8 JSON
//! document. The same framing is used on the relay channel, the sender
//! socket and the control socket.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ChannelError;

/// Largest accepted frame body
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Read one frame; `Ok(None)` means the peer closed the stream cleanly
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, ChannelError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(ChannelError::FrameTooLarge(len));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), ChannelError> {
    if payload.len() > MAX_FRAME_BYTES {
        return Err(ChannelError::FrameTooLarge(payload.len()));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and decode one message
///
/// A frame that fails to decode is consumed entirely, so the stream stays
/// usable after a `ChannelError::Protocol`.
pub async fn read_message<T, R>(reader: &mut R) -> Result<Option<T>, ChannelError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    match read_frame(reader).await? {
        Some(buf) => Ok(Some(serde_json::from_slice(&buf)?)),
        None => Ok(None),
    }
}

pub async fn write_message<T, W>(writer: &mut W, message: &T) -> Result<(), ChannelError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_vec(message)?;
    write_frame(writer, &json).await
}

/// Blocking variant of [`write_message`] for short-lived CLI clients
pub fn write_message_blocking<T: Serialize, W: Write>(
    writer: &mut W,
    message: &T,
) -> Result<(), ChannelError> {
    let json = serde_json::to_vec(message)?;
    if json.len() > MAX_FRAME_BYTES {
        return Err(ChannelError::FrameTooLarge(json.len()));
    }
    writer.write_all(&(json.len() as u32).to_be_bytes())?;
    writer.write_all(&json)?;
    writer.flush()?;
    Ok(())
}

/// Blocking variant of [`read_message`]
pub fn read_message_blocking<T: DeserializeOwned, R: Read>(
    reader: &mut R,
) -> Result<T, ChannelError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(ChannelError::FrameTooLarge(len));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(serde_json::from_slice(&buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::protocol::ChannelMessage;

    #[tokio::test]
    async fn test_message_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_message(&mut a, &ChannelMessage::Pong).await.unwrap();
        drop(a);

        let msg: Option<ChannelMessage> = read_message(&mut b).await.unwrap();
        assert_eq!(msg, Some(ChannelMessage::Pong));

        // peer closed
        let msg: Option<ChannelMessage> = read_message(&mut b).await.unwrap();
        assert!(msg.is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = (MAX_FRAME_BYTES as u32 + 1).to_be_bytes();
        a.write_all(&len).await.unwrap();

        let result = read_frame(&mut b).await;
        assert!(matches!(result, Err(ChannelError::FrameTooLarge(_))));
    }

    #[tokio::test]
    async fn test_bad_json_leaves_stream_usable() {
        let (mut a, mut b) = tokio::io::duplex(256);
        write_frame(&mut a, b"not json").await.unwrap();
        write_message(&mut a, &ChannelMessage::Ping).await.unwrap();

        let first: Result<Option<ChannelMessage>, _> = read_message(&mut b).await;
        assert!(matches!(first, Err(ChannelError::Protocol(_))));
        let second: Option<ChannelMessage> = read_message(&mut b).await.unwrap();
        assert_eq!(second, Some(ChannelMessage::Ping));
    }

    #[test]
    fn test_blocking_framing_is_big_endian() {
        let mut buf = Vec::new();
        write_message_blocking(&mut buf, &ChannelMessage::Ping).unwrap();
        assert_eq!(&buf[..4], &(15u32).to_be_bytes());
        let msg: ChannelMessage = read_message_blocking(&mut buf.as_slice()).unwrap();
        assert_eq!(msg, ChannelMessage::Ping);
    }
}
