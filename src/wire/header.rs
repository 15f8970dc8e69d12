//! The 16-byte MongoDB wire-protocol message header (component J) and the
//! monotonic request-ID counter every outgoing message carries.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicI32, Ordering};

use crate::checked::length_to_usize;
use crate::error::{Error, Result};

pub const HEADER_LEN: usize = 16;

/// `OP_MSG`, the only opcode this crate speaks (every modern server
/// requires it; older opcodes like `OP_QUERY` are not implemented).
pub const OP_MSG: i32 = 2013;

/// Issues strictly increasing request IDs for one connection, as the
/// protocol requires so `responseTo` can be matched against the request
/// that elicited it.
#[derive(Default)]
pub struct RequestIdSource {
    next: AtomicI32,
}

impl RequestIdSource {
    #[must_use]
    pub fn new() -> Self {
        Self { next: AtomicI32::new(1) }
    }

    pub fn next_id(&self) -> i32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MsgHeader {
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

impl MsgHeader {
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_i32::<LittleEndian>(self.message_length).map_err(Error::Io)?;
        out.write_i32::<LittleEndian>(self.request_id).map_err(Error::Io)?;
        out.write_i32::<LittleEndian>(self.response_to).map_err(Error::Io)?;
        out.write_i32::<LittleEndian>(self.op_code).map_err(Error::Io)?;
        Ok(())
    }

    pub fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Protocol("message header shorter than 16 bytes"));
        }
        let mut cursor = Cursor::new(bytes);
        let message_length = cursor.read_i32::<LittleEndian>().map_err(Error::Io)?;
        let request_id = cursor.read_i32::<LittleEndian>().map_err(Error::Io)?;
        let response_to = cursor.read_i32::<LittleEndian>().map_err(Error::Io)?;
        let op_code = cursor.read_i32::<LittleEndian>().map_err(Error::Io)?;
        length_to_usize(message_length).ok_or(Error::LengthOverflow)?;
        Ok(Self { message_length, request_id, response_to, op_code })
    }
}

/// Reads exactly one header's worth of bytes from a synchronous reader.
/// Used by tests against in-memory buffers; the live connection path reads
/// asynchronously instead (see [`crate::wire::op_msg`]).
pub fn read_header_sync(r: &mut impl Read) -> Result<MsgHeader> {
    let mut buf = [0_u8; HEADER_LEN];
    r.read_exact(&mut buf).map_err(Error::Io)?;
    MsgHeader::read(&buf)
}

pub fn write_header_sync(w: &mut impl Write, header: &MsgHeader) -> Result<()> {
    let mut buf = Vec::with_capacity(HEADER_LEN);
    header.write(&mut buf)?;
    w.write_all(&buf).map_err(Error::Io)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_ids_strictly_increase() {
        let src = RequestIdSource::new();
        let a = src.next_id();
        let b = src.next_id();
        assert!(b > a);
    }

    #[test]
    fn header_roundtrips_through_bytes() {
        let header = MsgHeader { message_length: 21, request_id: 7, response_to: 0, op_code: OP_MSG };
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_LEN);
        let back = MsgHeader::read(&buf).unwrap();
        assert_eq!(back, header);
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(MsgHeader::read(&[0_u8; 10]).is_err());
    }
}
