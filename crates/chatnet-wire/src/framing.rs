//! Length-prefixed frame reading and writing shared by the chat and admin wires.
//!
//! Every frame on either wire is `[u32 big-endian length L][L bytes payload]`. This
//! module only owns the length prefix; the payload itself (JSON, in this protocol)
//! is the caller's concern.

use crate::error::{Result, WireError};
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const LENGTH_PREFIX_SIZE: usize = 4;

/// Reads one frame from `reader`, enforcing `max_size` on the declared length.
///
/// Returns `Err(WireError::UnexpectedEof)` if the stream ends mid-frame; this is the
/// signal the caller should treat as a clean peer disconnect rather than a protocol fault.
pub async fn read_frame<R>(reader: &mut R, max_size: u32) -> Result<BytesMut>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::UnexpectedEof);
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > max_size {
        return Err(WireError::FrameTooLarge(len, max_size));
    }

    let mut payload = BytesMut::zeroed(len as usize);
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            WireError::UnexpectedEof
        } else {
            e.into()
        }
    })?;
    Ok(payload)
}

/// Encodes `payload` as a single frame: length prefix followed by the bytes.
pub fn encode_frame(payload: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    out.put_u32(payload.len() as u32);
    out.put_slice(payload);
    out
}

/// Writes `payload` as a single frame and flushes the stream.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Attempts to pull one complete frame out of `buf`, advancing past it if present.
/// Used by readers that accumulate bytes themselves rather than reading from a socket directly.
pub fn try_parse_frame(buf: &mut BytesMut, max_size: u32) -> Result<Option<BytesMut>> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }
    let len = u32::from_be_bytes(buf[..LENGTH_PREFIX_SIZE].try_into().unwrap());
    if len > max_size {
        return Err(WireError::FrameTooLarge(len, max_size));
    }
    let total = LENGTH_PREFIX_SIZE + len as usize;
    if buf.len() < total {
        return Ok(None);
    }
    buf.advance(LENGTH_PREFIX_SIZE);
    Ok(Some(buf.split_to(len as usize)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").await.unwrap();

        let mut reader = &buf[..];
        let frame = read_frame(&mut reader, 65536).await.unwrap();
        assert_eq!(&frame[..], b"hello");
    }

    #[tokio::test]
    async fn rejects_oversized_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &vec![0u8; 100]).await.unwrap();

        let mut reader = &buf[..];
        let err = read_frame(&mut reader, 50).await.unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge(100, 50)));
    }

    #[tokio::test]
    async fn reports_eof_on_truncated_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").await.unwrap();
        buf.truncate(buf.len() - 2);

        let mut reader = &buf[..];
        let err = read_frame(&mut reader, 65536).await.unwrap_err();
        assert!(matches!(err, WireError::UnexpectedEof));
    }

    #[test]
    fn try_parse_frame_waits_for_full_payload() {
        let mut buf = BytesMut::from(&encode_frame(b"abc")[..6]);
        assert!(try_parse_frame(&mut buf, 65536).unwrap().is_none());

        buf.extend_from_slice(&encode_frame(b"abc")[6..]);
        let frame = try_parse_frame(&mut buf, 65536).unwrap().unwrap();
        assert_eq!(&frame[..], b"abc");
        assert!(buf.is_empty());
    }
}
