//! Primitive frame encoding.
//!
//! All integers are big-endian. Strings carry a 2-byte unsigned length
//! prefix followed by that many UTF-8 bytes.

use crate::error::{ProtocolError, ProtocolResult};
use std::io::{ErrorKind, Read, Write};

/// Maximum encoded length of a string frame.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Buffer size used when streaming payload bytes.
const COPY_BUFFER_SIZE: usize = 8 * 1024;

/// Writes a length-prefixed UTF-8 string.
///
/// # Errors
///
/// Returns `StringTooLong` if the string exceeds [`MAX_STRING_LEN`] bytes.
pub fn write_string<W: Write>(writer: &mut W, value: &str) -> ProtocolResult<()> {
    let bytes = value.as_bytes();
    let len = u16::try_from(bytes.len()).map_err(|_| ProtocolError::StringTooLong {
        len: bytes.len(),
        max: MAX_STRING_LEN,
    })?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(bytes)?;
    Ok(())
}

/// Reads a length-prefixed UTF-8 string.
pub fn read_string<R: Read>(reader: &mut R) -> ProtocolResult<String> {
    let mut len = [0u8; 2];
    reader.read_exact(&mut len)?;
    let len = usize::from(u16::from_be_bytes(len));

    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Writes a 4-byte big-endian integer.
pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> ProtocolResult<()> {
    writer.write_all(&value.to_be_bytes())?;
    Ok(())
}

/// Reads a 4-byte big-endian integer.
pub fn read_u32<R: Read>(reader: &mut R) -> ProtocolResult<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// Writes an 8-byte big-endian integer.
pub fn write_u64<W: Write>(writer: &mut W, value: u64) -> ProtocolResult<()> {
    writer.write_all(&value.to_be_bytes())?;
    Ok(())
}

/// Reads an 8-byte big-endian integer.
pub fn read_u64<R: Read>(reader: &mut R) -> ProtocolResult<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

/// Copies exactly `len` bytes from `reader` to `writer`.
///
/// The reader may deliver the bytes in arbitrarily small chunks. If it
/// reaches end of stream before `len` bytes have been copied, the copy
/// fails with [`ProtocolError::ShortRead`]; bytes already written to
/// `writer` are left for the caller to discard.
///
/// # Errors
///
/// Returns `ShortRead` on early end of stream, or `Io` on read/write failure.
pub fn copy_exact<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
    len: u64,
) -> ProtocolResult<u64> {
    let mut buffer = [0u8; COPY_BUFFER_SIZE];
    let mut copied = 0u64;

    while copied < len {
        let want = usize::try_from(len - copied)
            .unwrap_or(COPY_BUFFER_SIZE)
            .min(COPY_BUFFER_SIZE);
        let read = match reader.read(&mut buffer[..want]) {
            Ok(0) => {
                return Err(ProtocolError::ShortRead {
                    expected: len,
                    received: copied,
                })
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&buffer[..read])?;
        copied += read as u64;
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// A reader that hands out at most `chunk` bytes per call.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn string_layout() {
        let mut out = Vec::new();
        write_string(&mut out, "SYNC").unwrap();
        assert_eq!(out, vec![0x00, 0x04, b'S', b'Y', b'N', b'C']);
    }

    #[test]
    fn string_utf8_length_is_bytes() {
        let mut out = Vec::new();
        write_string(&mut out, "héllo").unwrap();
        assert_eq!(&out[..2], &[0x00, 0x06]);
        assert_eq!(read_string(&mut Cursor::new(out)).unwrap(), "héllo");
    }

    #[test]
    fn string_too_long_rejected() {
        let long = "x".repeat(MAX_STRING_LEN + 1);
        let result = write_string(&mut Vec::new(), &long);
        assert!(matches!(result, Err(ProtocolError::StringTooLong { .. })));
    }

    #[test]
    fn string_invalid_utf8_rejected() {
        let frame = vec![0x00, 0x02, 0xff, 0xfe];
        let result = read_string(&mut Cursor::new(frame));
        assert!(matches!(result, Err(ProtocolError::InvalidUtf8)));
    }

    #[test]
    fn integers_are_big_endian() {
        let mut out = Vec::new();
        write_u32(&mut out, 1).unwrap();
        write_u64(&mut out, 258).unwrap();
        assert_eq!(out, vec![0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 1, 2]);

        let mut cursor = Cursor::new(out);
        assert_eq!(read_u32(&mut cursor).unwrap(), 1);
        assert_eq!(read_u64(&mut cursor).unwrap(), 258);
    }

    #[test]
    fn copy_exact_across_small_chunks() {
        let data: Vec<u8> = (0..=255u8).cycle().take(20_000).collect();
        let mut reader = Trickle {
            data: data.clone(),
            pos: 0,
            chunk: 7,
        };
        let mut out = Vec::new();

        let copied = copy_exact(&mut reader, &mut out, 20_000).unwrap();
        assert_eq!(copied, 20_000);
        assert_eq!(out, data);
    }

    #[test]
    fn copy_exact_leaves_trailing_bytes() {
        let mut reader = Cursor::new(b"hello world".to_vec());
        let mut out = Vec::new();

        copy_exact(&mut reader, &mut out, 5).unwrap();
        assert_eq!(out, b"hello");
        assert_eq!(reader.position(), 5);
    }

    #[test]
    fn copy_exact_short_stream_fails() {
        let mut reader = Cursor::new(vec![1u8; 9]);
        let mut out = Vec::new();

        let result = copy_exact(&mut reader, &mut out, 10);
        match result {
            Err(ProtocolError::ShortRead { expected, received }) => {
                assert_eq!(expected, 10);
                assert_eq!(received, 9);
            }
            other => panic!("expected short read, got {:?}", other),
        }
    }

    #[test]
    fn copy_exact_zero_length() {
        let mut reader = Cursor::new(Vec::<u8>::new());
        let mut out = Vec::new();
        assert_eq!(copy_exact(&mut reader, &mut out, 0).unwrap(), 0);
    }
}
