//! Length-prefixed framing for stream transports.
//!
//! ```text
//! [u32 BE: len][len bytes of envelope]
//! ```
//!
//! Empty frames are legal. Frames above `ProtocolConfig::MAX_FRAME_SIZE` are
//! refused in both directions.

use crate::config::ProtocolConfig;
use crate::error::{CallwireError, Result};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const HEADER_LEN: usize = 4;

fn check_size(len: usize, direction: &str) -> Result<()> {
    if len > ProtocolConfig::MAX_FRAME_SIZE {
        return Err(CallwireError::Framing {
            message: format!(
                "{} frame of {} bytes exceeds maximum {}",
                direction,
                len,
                ProtocolConfig::MAX_FRAME_SIZE
            ),
        });
    }
    Ok(())
}

/// Read one frame. `None` means the peer closed the stream between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; HEADER_LEN];
    if let Err(e) = reader.read_exact(&mut header).await {
        return match e.kind() {
            ErrorKind::UnexpectedEof => Ok(None),
            _ => Err(e.into()),
        };
    }

    let len = u32::from_be_bytes(header) as usize;
    check_size(len, "inbound")?;

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

/// Write one frame as a single buffer and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> Result<()> {
    check_size(frame.len(), "outbound")?;

    let mut buffer = Vec::with_capacity(HEADER_LEN + frame.len());
    buffer.extend_from_slice(&(frame.len() as u32).to_be_bytes());
    buffer.extend_from_slice(frame);
    writer.write_all(&buffer).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_are_delimited() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"first").await.unwrap();
        write_frame(&mut buf, b"").await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).await.unwrap(), Some(b"first".to_vec()));
        assert_eq!(read_frame(&mut cursor).await.unwrap(), Some(Vec::new()));
        assert_eq!(read_frame(&mut cursor).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_refused() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((ProtocolConfig::MAX_FRAME_SIZE + 1) as u32).to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);

        let mut cursor = std::io::Cursor::new(buf);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(CallwireError::Framing { .. })
        ));
    }

    #[tokio::test]
    async fn test_header_is_big_endian_length() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"abc").await.unwrap();
        assert_eq!(buf, vec![0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_truncated_frame_is_io_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(b"short");

        let mut cursor = std::io::Cursor::new(buf);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(CallwireError::Transport { .. })
        ));
    }
}
