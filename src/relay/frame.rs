//! Length-prefixed framing for the relay wire protocol.
//!
//! Each frame is a big-endian u64 byte count followed by that many bytes of
//! UTF-8 JSON. The prefix comes first so a reader never has to scan for a
//! delimiter inside producer-defined payloads.

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{PipedashError, Result};

/// Default upper bound on a frame body. Anything larger is refused before
/// the body is allocated.
pub const MAX_FRAME_LEN: u64 = 16 * 1024 * 1024;

/// Write one frame: the length prefix, the body, one flush.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u64(body.len() as u64).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame body, or `Ok(None)` if the peer closed the stream between
/// frames.
///
/// EOF inside a frame (partial prefix or partial body) is an I/O error, and
/// a declared length above `max_len` fails with [`PipedashError::FrameTooLarge`]
/// without allocating.
pub async fn read_frame<R>(reader: &mut R, max_len: u64) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 8];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "connection closed inside a frame prefix",
            )
            .into());
        }
        filled += n;
    }

    let len = u64::from_be_bytes(prefix);
    if len > max_len {
        return Err(PipedashError::FrameTooLarge { len, max: max_len });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}
