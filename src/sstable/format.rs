//! Record encoding for sorted runs.
//!
//! Decoding works on the data region slice only and checks every length
//! against it, so a damaged file yields [`Error::Corruption`] instead of a
//! read past the record.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes};

use crate::clock::MAX_TIMESTAMP;
use crate::error::{Error, Result};
use crate::value::{Entry, Value};

/// Size of the trailing row count.
pub const FOOTER_SIZE: usize = 4;

/// Size of one index slot.
pub const OFFSET_SIZE: usize = 4;

/// Set in the timestamp field of a live record that carries a TTL.
const TTL_FLAG: i64 = 1 << 62;

/// Appends the encoded record for `entry` to `buf`.
pub fn encode_entry(buf: &mut Vec<u8>, entry: &Entry) -> Result<()> {
    let key = entry.key();
    let value = entry.value();
    let timestamp = value.timestamp();

    if timestamp >= MAX_TIMESTAMP {
        return Err(Error::invalid_argument(format!("timestamp {} out of range", timestamp)));
    }
    let key_len = i32::try_from(key.len())
        .map_err(|_| Error::invalid_argument("key longer than i32::MAX"))?;

    buf.put_i32(key_len);
    buf.put_slice(key);

    match value.payload() {
        None => {
            if timestamp == 0 {
                return Err(Error::invalid_argument("tombstone timestamp must be positive"));
            }
            buf.put_i64(-(timestamp as i64));
        }
        Some(payload) => {
            let value_len = i32::try_from(payload.len())
                .map_err(|_| Error::invalid_argument("value longer than i32::MAX"))?;
            match value.ttl() {
                None => buf.put_i64(timestamp as i64),
                Some(ttl) => {
                    let millis = i64::try_from(ttl.as_millis())
                        .map_err(|_| Error::invalid_argument("ttl out of range"))?;
                    buf.put_i64(timestamp as i64 | TTL_FLAG);
                    buf.put_i64(millis);
                }
            }
            buf.put_i32(value_len);
            buf.put_slice(payload);
        }
    }
    Ok(())
}

/// Bounds-checked cursor over the data region.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn at(data: &'a [u8], pos: usize) -> Result<Self> {
        if pos > data.len() {
            return Err(Error::corruption(format!(
                "record offset {} outside data region of {} bytes",
                pos,
                data.len()
            )));
        }
        Ok(Self { data, pos })
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                Error::corruption(format!("record at {} runs past data region", self.pos))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(self.take(4)?.get_i32())
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(self.take(8)?.get_i64())
    }

    fn len(&mut self) -> Result<usize> {
        let len = self.i32()?;
        usize::try_from(len).map_err(|_| Error::corruption(format!("negative length {}", len)))
    }
}

/// Returns the key of the record at `offset` without decoding the rest.
pub fn key_at(data: &[u8], offset: usize) -> Result<&[u8]> {
    let mut cursor = Cursor::at(data, offset)?;
    let key_len = cursor.len()?;
    cursor.take(key_len)
}

/// Decodes the full record at `offset`.
pub fn decode_entry(data: &[u8], offset: usize) -> Result<Entry> {
    let mut cursor = Cursor::at(data, offset)?;
    let key_len = cursor.len()?;
    let key = Bytes::copy_from_slice(cursor.take(key_len)?);

    let raw = cursor.i64()?;
    if raw < 0 {
        let timestamp = raw.unsigned_abs();
        if timestamp >= MAX_TIMESTAMP {
            return Err(Error::corruption(format!("tombstone timestamp {} out of range", timestamp)));
        }
        return Ok(Entry::new(key, Value::tombstone(timestamp)));
    }

    let ttl = if raw & TTL_FLAG != 0 {
        let millis = cursor.i64()?;
        let millis = u64::try_from(millis)
            .map_err(|_| Error::corruption(format!("negative ttl {}", millis)))?;
        Some(Duration::from_millis(millis))
    } else {
        None
    };
    let timestamp = (raw & !TTL_FLAG) as u64;

    let value_len = cursor.len()?;
    let payload = Bytes::copy_from_slice(cursor.take(value_len)?);
    Ok(Entry::new(key, Value::live(timestamp, payload, ttl)))
}
