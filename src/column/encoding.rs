//! Binary encoding for column values and file headers.
//!
//! Everything is big-endian. Variable-length fields are a 4-byte length
//! followed by that many bytes.

use std::io::{Read, Write};

use thiserror::Error;

/// An error of any sort
#[derive(Debug, Error)]
pub enum StorageError {
    /// An IO error
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    /// A header block started with a tag we do not know
    #[error("Bad tag: {0:#04x}")]
    BadTag(u8),
    /// A column type name we do not know
    #[error("Unknown column type: {0:?}")]
    UnknownType(String),
    /// Text that is not utf8
    #[error("Invalid utf8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    /// A length that does not fit in the 4-byte prefix
    #[error("Block of {0} bytes is too long")]
    TooLong(usize),
}

impl StorageError {
    /// Did the underlying reader run out of bytes?
    pub fn is_eof(&self) -> bool {
        matches!(self, StorageError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

/// An extension trait for reading our encoding
pub trait ReadEncoded: Read {
    /// Reads a single `u8` value.
    fn read_u8(&mut self) -> Result<u8, StorageError> {
        let mut v = [0];
        self.read_exact(&mut v)?;
        Ok(v[0])
    }
    /// Reads a single 4-byte `u32` value.
    fn read_u32(&mut self) -> Result<u32, StorageError> {
        let mut v = [0; 4];
        self.read_exact(&mut v)?;
        Ok(u32::from_be_bytes(v))
    }
    /// Reads a single 4-byte `i32` value.
    fn read_i32(&mut self) -> Result<i32, StorageError> {
        let mut v = [0; 4];
        self.read_exact(&mut v)?;
        Ok(i32::from_be_bytes(v))
    }
    /// Reads a single 8-byte `i64` value.
    fn read_i64(&mut self) -> Result<i64, StorageError> {
        let mut v = [0; 8];
        self.read_exact(&mut v)?;
        Ok(i64::from_be_bytes(v))
    }
    /// Reads a single 8-byte `f64` value.
    fn read_f64(&mut self) -> Result<f64, StorageError> {
        let mut v = [0; 8];
        self.read_exact(&mut v)?;
        Ok(f64::from_be_bytes(v))
    }
    /// Reads a length-prefixed block of bytes.
    fn read_block(&mut self) -> Result<Vec<u8>, StorageError> {
        let len = self.read_u32()? as u64;
        let mut buf = Vec::new();
        self.take(len).read_to_end(&mut buf)?;
        if (buf.len() as u64) < len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "block shorter than its length",
            )
            .into());
        }
        Ok(buf)
    }
    /// Reads a length-prefixed utf8 string.
    fn read_string(&mut self) -> Result<String, StorageError> {
        Ok(String::from_utf8(self.read_block()?)?)
    }
    /// Discards exactly `n` bytes.
    fn skip_bytes(&mut self, n: u64) -> Result<(), StorageError> {
        let skipped = std::io::copy(&mut self.take(n), &mut std::io::sink())?;
        if skipped < n {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "failed to skip",
            )
            .into());
        }
        Ok(())
    }
    /// Discards a length-prefixed block without reading it into memory.
    fn skip_block(&mut self) -> Result<(), StorageError> {
        let len = self.read_u32()?;
        self.skip_bytes(len as u64)
    }
}

impl<T: Read + ?Sized> ReadEncoded for T {}

/// An extension trait for our encoding
pub trait WriteEncoded: Write {
    /// Writes a byte
    fn write_u8(&mut self, v: u8) -> Result<(), StorageError> {
        self.write_all(&[v]).map_err(StorageError::from)
    }
    /// Writes a 4-byte u32
    fn write_u32(&mut self, v: u32) -> Result<(), StorageError> {
        self.write_all(&v.to_be_bytes()).map_err(StorageError::from)
    }
    /// Writes a 4-byte i32
    fn write_i32(&mut self, v: i32) -> Result<(), StorageError> {
        self.write_all(&v.to_be_bytes()).map_err(StorageError::from)
    }
    /// Writes a 8-byte i64
    fn write_i64(&mut self, v: i64) -> Result<(), StorageError> {
        self.write_all(&v.to_be_bytes()).map_err(StorageError::from)
    }
    /// Writes a 8-byte f64
    fn write_f64(&mut self, v: f64) -> Result<(), StorageError> {
        self.write_all(&v.to_be_bytes()).map_err(StorageError::from)
    }
    /// Writes a length-prefixed block of bytes.
    fn write_block(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        let len = u32::try_from(bytes.len()).map_err(|_| StorageError::TooLong(bytes.len()))?;
        self.write_u32(len)?;
        self.write_all(bytes).map_err(StorageError::from)
    }
}

impl<T: Write + ?Sized> WriteEncoded for T {}

#[cfg(test)]
mod test {
    use super::{ReadEncoded, WriteEncoded};

    #[test]
    fn big_endian_layout() {
        let mut out = Vec::new();
        out.write_i32(1).unwrap();
        out.write_block(b"ab").unwrap();
        out.write_f64(1.5).unwrap();
        assert_eq!(
            out,
            vec![0, 0, 0, 1, 0, 0, 0, 2, b'a', b'b', 0x3f, 0xf8, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn skip_matches_read() {
        let mut out = Vec::new();
        out.write_block("héllo".as_bytes()).unwrap();
        out.write_u8(7).unwrap();
        let mut input = out.as_slice();
        input.skip_block().unwrap();
        assert_eq!(input.read_u8().unwrap(), 7);
        assert!(input.read_u8().unwrap_err().is_eof());
    }

    #[test]
    fn huge_lengths_do_not_allocate_up_front() {
        let mut out = Vec::new();
        out.write_u32(u32::MAX).unwrap();
        out.extend(b"abc");
        let e = out.as_slice().read_block().unwrap_err();
        assert!(e.is_eof(), "{e}");
        let e = [0xff, 0xff, 0xff, 0xf0].as_slice().read_string().unwrap_err();
        assert!(e.is_eof(), "{e}");
    }

    #[test]
    fn truncated_skip_is_eof() {
        let mut out = Vec::new();
        out.write_u32(10).unwrap();
        out.extend([1, 2, 3]);
        let mut input = out.as_slice();
        assert!(input.skip_block().unwrap_err().is_eof());
    }
}
