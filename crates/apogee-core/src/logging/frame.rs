// logging/frame.rs
//
// Wire format: each record is a postcard payload behind a 2-byte
// little-endian length prefix. A power loss mid-write leaves at most one
// short frame at the tail; the reader stops there and everything before it
// replays cleanly.

use crate::error::StorageFault;

use super::LogRecord;

/// Upper bound on one framed record.
pub const MAX_FRAME: usize = 256;

const LEN_PREFIX: usize = 2;

/// Encode `record` into `scratch`, returning the framed prefix.
pub fn encode_frame<'a>(
    record: &LogRecord,
    scratch: &'a mut [u8; MAX_FRAME],
) -> Result<&'a [u8], StorageFault> {
    let payload_len = {
        let payload = postcard::to_slice(record, &mut scratch[LEN_PREFIX..])
            .map_err(|_| StorageFault::FrameOverflow)?;
        payload.len()
    };
    scratch[..LEN_PREFIX].copy_from_slice(&(payload_len as u16).to_le_bytes());
    Ok(&scratch[..LEN_PREFIX + payload_len])
}

/// Iterates the records of a raw log image. Tolerates a truncated trailing
/// frame (abrupt power loss) by ending the iteration there.
pub struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not consumed (zero unless the tail was truncated or corrupt).
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

impl Iterator for FrameReader<'_> {
    type Item = LogRecord;

    fn next(&mut self) -> Option<LogRecord> {
        let rest = &self.buf[self.pos..];
        if rest.len() < LEN_PREFIX {
            return None;
        }
        let len = u16::from_le_bytes([rest[0], rest[1]]) as usize;
        let body = rest.get(LEN_PREFIX..LEN_PREFIX + len)?;

        match postcard::from_bytes(body) {
            Ok(record) => {
                self.pos += LEN_PREFIX + len;
                Some(record)
            }
            // Corrupt frame: stop rather than resynchronize on garbage.
            Err(_) => None,
        }
    }
}
