// Length-prefixed framing.
//
// Every message travels as a big-endian u32 byte count followed by the
// bincode payload. Both blocking (std) and async (tokio) variants exist;
// the worker server reads async while test harnesses use the blocking pair.

use std::io::{Read, Write};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};

/// Frames above this size indicate a corrupt stream or a runaway payload.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::Transport(format!("frame too large: {} bytes", payload.len())))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame. `Ok(None)` signals a clean end of stream at a frame
/// boundary; anything truncated mid-frame is an error.
pub fn read_frame<R: Read>(reader: &mut R, max_bytes: usize) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_bytes {
        return Err(Error::Transport(format!(
            "frame of {len} bytes exceeds cap of {max_bytes}"
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}

pub async fn write_frame_async<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::Transport(format!("frame too large: {} bytes", payload.len())))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame_async<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    max_bytes: usize,
) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_bytes {
        return Err(Error::Transport(format!(
            "frame of {len} bytes exceeds cap of {max_bytes}"
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_blocking() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").unwrap();
        write_frame(&mut buf, b"").unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(
            read_frame(&mut cursor, 1024).unwrap(),
            Some(b"hello".to_vec())
        );
        assert_eq!(read_frame(&mut cursor, 1024).unwrap(), Some(Vec::new()));
        assert_eq!(read_frame(&mut cursor, 1024).unwrap(), None);
    }

    #[test]
    fn prefix_is_big_endian() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"abc").unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 3]);
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &[0u8; 100]).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_frame(&mut cursor, 10).is_err());
    }

    #[test]
    fn truncated_frame_is_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").unwrap();
        buf.truncate(6);
        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_frame(&mut cursor, 1024).is_err());
    }

    #[tokio::test]
    async fn roundtrip_async() {
        let (client, server) = tokio::io::duplex(256);
        let (mut read_half, _keep) = tokio::io::split(server);
        let (_discard, mut write_half) = tokio::io::split(client);
        write_frame_async(&mut write_half, b"ping").await.unwrap();
        let got = read_frame_async(&mut read_half, 1024).await.unwrap();
        assert_eq!(got, Some(b"ping".to_vec()));
    }
}
