//! Low-level primitives for the on-disk wire format (spec §6): big-endian
//! `u32` integers and length-prefixed UTF-8 strings. `FilesDelta` and
//! `FsState` build their record formats out of these.

use std::io::{Read, Write};

use crate::error::{FssError, FssResult};

pub fn write_u32<W: Write>(w: &mut W, v: u32) -> FssResult<()> {
    w.write_all(&v.to_be_bytes()).map_err(io_err)
}

pub fn read_u32<R: Read>(r: &mut R) -> FssResult<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FssError::Truncated { what: "u32" }
        } else {
            io_err(e)
        }
    })?;
    Ok(u32::from_be_bytes(buf))
}

pub fn write_str<W: Write>(w: &mut W, s: &str) -> FssResult<()> {
    let bytes = s.as_bytes();
    write_u32(w, bytes.len() as u32)?;
    w.write_all(bytes).map_err(io_err)
}

pub fn read_str<R: Read>(r: &mut R) -> FssResult<String> {
    let len = read_u32(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FssError::Truncated { what: "utf8 string body" }
        } else {
            io_err(e)
        }
    })?;
    String::from_utf8(buf).map_err(|_| FssError::InvalidUtf8)
}

/// Consume a length-prefixed string without materializing it, for `skip`.
pub fn skip_str<R: Read>(r: &mut R) -> FssResult<()> {
    let len = read_u32(r)? as u64;
    std::io::copy(&mut r.by_ref().take(len), &mut std::io::sink()).map_err(io_err)?;
    Ok(())
}

fn io_err(source: std::io::Error) -> FssError {
    FssError::Wire(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_roundtrip() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 0xdead_beef).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_u32(&mut cursor).unwrap(), 0xdead_beef);
    }

    #[test]
    fn str_roundtrip() {
        let mut buf = Vec::new();
        write_str(&mut buf, "/a/b.txt").unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_str(&mut cursor).unwrap(), "/a/b.txt");
    }

    #[test]
    fn truncated_u32_is_an_error() {
        let buf = vec![0u8; 2];
        let mut cursor = std::io::Cursor::new(buf);
        assert!(matches!(
            read_u32(&mut cursor),
            Err(FssError::Truncated { .. })
        ));
    }

    #[test]
    fn skip_str_consumes_exact_bytes() {
        let mut buf = Vec::new();
        write_str(&mut buf, "hello").unwrap();
        write_u32(&mut buf, 7).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        skip_str(&mut cursor).unwrap();
        assert_eq!(read_u32(&mut cursor).unwrap(), 7);
    }
}
