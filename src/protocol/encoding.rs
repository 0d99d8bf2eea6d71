//! Primitive payload encodings: CompactSize integers and length-prefixed bytes

use crate::core::Sha256Hash;
use crate::error::{Error, Result};
use bytes::{Buf, BufMut};

/// Upper bound on any single length-prefixed field
pub const MAX_VAR_BYTES: u64 = 32 * 1024 * 1024;

/// Fail unless `buf` still holds `needed` bytes
pub fn ensure_remaining(buf: &impl Buf, needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(Error::invalid_payload(format!(
            "truncated {what}: need {needed} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

/// Write a CompactSize integer
pub fn write_compact_size(buf: &mut impl BufMut, value: u64) {
    match value {
        0..=0xfc => buf.put_u8(value as u8),
        0xfd..=0xffff => {
            buf.put_u8(0xfd);
            buf.put_u16_le(value as u16);
        }
        0x1_0000..=0xffff_ffff => {
            buf.put_u8(0xfe);
            buf.put_u32_le(value as u32);
        }
        _ => {
            buf.put_u8(0xff);
            buf.put_u64_le(value);
        }
    }
}

/// Read a CompactSize integer, rejecting non-minimal encodings
pub fn read_compact_size(buf: &mut impl Buf) -> Result<u64> {
    ensure_remaining(buf, 1, "compact size")?;
    let prefix = buf.get_u8();
    let (value, minimum) = match prefix {
        0xfd => {
            ensure_remaining(buf, 2, "compact size")?;
            (buf.get_u16_le() as u64, 0xfd)
        }
        0xfe => {
            ensure_remaining(buf, 4, "compact size")?;
            (buf.get_u32_le() as u64, 0x1_0000)
        }
        0xff => {
            ensure_remaining(buf, 8, "compact size")?;
            (buf.get_u64_le(), 0x1_0000_0000)
        }
        small => return Ok(small as u64),
    };
    if value < minimum {
        return Err(Error::invalid_payload("non-canonical compact size"));
    }
    Ok(value)
}

/// Write a CompactSize-prefixed byte string
pub fn write_var_bytes(buf: &mut impl BufMut, bytes: &[u8]) {
    write_compact_size(buf, bytes.len() as u64);
    buf.put_slice(bytes);
}

/// Read a CompactSize-prefixed byte string
pub fn read_var_bytes(buf: &mut impl Buf) -> Result<Vec<u8>> {
    let length = read_compact_size(buf)?;
    if length > MAX_VAR_BYTES {
        return Err(Error::invalid_payload(format!("field length {length} too large")));
    }
    let length = length as usize;
    ensure_remaining(buf, length, "byte string")?;
    let mut bytes = vec![0u8; length];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

/// Read a 32-byte digest in wire order
pub fn read_hash(buf: &mut impl Buf) -> Result<Sha256Hash> {
    ensure_remaining(buf, 32, "hash")?;
    let mut bytes = [0u8; 32];
    buf.copy_to_slice(&mut bytes);
    Ok(Sha256Hash::from_bytes(bytes))
}
