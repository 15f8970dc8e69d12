//! `OP_MSG` framing: flag bits, kind-0 (body) and kind-1 (document
//! sequence) sections, and the optional checksum trailer.
//!
//! A present checksum is parsed (so framing stays correct) but not
//! verified — CRC-32C verification is left for a later pass, same as this
//! crate does not yet enforce the handshake's advertised size/wire-version
//! limits.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::header::{MsgHeader, HEADER_LEN, OP_MSG};
use crate::bson::Document;
use crate::checked::{checked_add_usize, length_to_usize};
use crate::error::{Error, Result};

pub const FLAG_CHECKSUM_PRESENT: u32 = 1 << 0;
pub const FLAG_MORE_TO_COME: u32 = 1 << 1;
pub const FLAG_EXHAUST_ALLOWED: u32 = 1 << 16;

const KIND_BODY: u8 = 0;
const KIND_DOCUMENT_SEQUENCE: u8 = 1;

/// One `kind == 1` section: a named sequence of documents (e.g. bulk
/// `insert`'s `documents` sequence).
#[derive(Clone, Debug)]
pub struct DocumentSequence {
    pub identifier: String,
    pub documents: Vec<Document>,
}

/// A fully decoded/encodable `OP_MSG` payload (everything after the
/// 16-byte header).
#[derive(Clone, Debug)]
pub struct OpMsg {
    pub flag_bits: u32,
    pub body: Document,
    pub sequences: Vec<DocumentSequence>,
}

impl OpMsg {
    #[must_use]
    pub fn new(body: Document) -> Self {
        Self { flag_bits: 0, body, sequences: Vec::new() }
    }

    fn encode_sections(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(KIND_BODY);
        out.extend_from_slice(self.body.as_bytes());
        for seq in &self.sequences {
            out.push(KIND_DOCUMENT_SEQUENCE);
            let mut section_body = Vec::new();
            section_body.extend_from_slice(seq.identifier.as_bytes());
            section_body.push(0);
            for doc in &seq.documents {
                section_body.extend_from_slice(doc.as_bytes());
            }
            let size = (4 + section_body.len()) as i32;
            out.extend_from_slice(&size.to_le_bytes());
            out.extend_from_slice(&section_body);
        }
        out
    }

    /// Serializes the full wire message (header included) for `request_id`,
    /// in response to `response_to` (0 for a fresh request).
    pub fn encode(&self, request_id: i32, response_to: i32) -> Result<Vec<u8>> {
        let sections = self.encode_sections();
        let body_len = checked_add_usize(HEADER_LEN, 4)
            .and_then(|n| checked_add_usize(n, sections.len()))
            .ok_or(Error::LengthOverflow)?;
        let message_length = i32::try_from(body_len).map_err(|_| Error::LengthOverflow)?;

        let header = MsgHeader { message_length, request_id, response_to, op_code: OP_MSG };
        let mut out = Vec::with_capacity(body_len);
        header.write(&mut out)?;
        out.write_u32::<LittleEndian>(self.flag_bits).map_err(Error::Io)?;
        out.extend_from_slice(&sections);

        if self.flag_bits & FLAG_CHECKSUM_PRESENT != 0 {
            // CRC-32C would go here; a zero placeholder keeps framing valid
            // for peers that don't actually require a correct checksum.
            out.write_u32::<LittleEndian>(0).map_err(Error::Io)?;
        }
        Ok(out)
    }

    /// Decodes the payload following a header already read via
    /// [`MsgHeader::read`].
    pub fn decode(header: &MsgHeader, payload: &[u8]) -> Result<Self> {
        if header.op_code != OP_MSG {
            return Err(Error::Protocol("unsupported opcode (only OP_MSG is implemented)"));
        }
        let mut cursor = Cursor::new(payload);
        let flag_bits = cursor.read_u32::<LittleEndian>().map_err(Error::Io)?;
        let has_checksum = flag_bits & FLAG_CHECKSUM_PRESENT != 0;
        let sections_end = if has_checksum {
            payload.len().checked_sub(4).ok_or(Error::Protocol("checksum flag set but message too short"))?
        } else {
            payload.len()
        };

        let mut body: Option<Document> = None;
        let mut sequences = Vec::new();
        let mut pos = 4; // past flagBits
        while pos < sections_end {
            let kind = payload[pos];
            pos += 1;
            match kind {
                KIND_BODY => {
                    let doc = Document::from_bytes(&payload[pos..sections_end]).map_err(Error::Bson)?;
                    pos += doc.len();
                    body = Some(doc);
                }
                KIND_DOCUMENT_SEQUENCE => {
                    let size_field_end = checked_add_usize(pos, 4).ok_or(Error::LengthOverflow)?;
                    if size_field_end > sections_end {
                        return Err(Error::Protocol("truncated sequence section"));
                    }
                    let size_i32 = i32::from_le_bytes(
                        payload[pos..size_field_end].try_into().map_err(|_| Error::Protocol("truncated sequence section"))?,
                    );
                    let size = length_to_usize(size_i32).ok_or(Error::LengthOverflow)?;
                    let section_end = checked_add_usize(pos, size).ok_or(Error::LengthOverflow)?;
                    if section_end > sections_end {
                        return Err(Error::Protocol("sequence section size exceeds the remaining message body"));
                    }
                    let section = &payload[size_field_end..section_end];
                    let nul = section.iter().position(|&b| b == 0).ok_or(Error::Protocol("sequence identifier not NUL-terminated"))?;
                    let identifier = std::str::from_utf8(&section[..nul]).map_err(|_| Error::Protocol("sequence identifier not UTF-8"))?.to_owned();
                    let mut documents = Vec::new();
                    let mut doc_pos = nul + 1;
                    while doc_pos < section.len() {
                        let doc = Document::from_bytes(&section[doc_pos..]).map_err(Error::Bson)?;
                        doc_pos += doc.len();
                        documents.push(doc);
                    }
                    sequences.push(DocumentSequence { identifier, documents });
                    pos = section_end;
                }
                _ => return Err(Error::Protocol("unknown OP_MSG section kind")),
            }
        }

        let body = body.ok_or(Error::Protocol("OP_MSG message had no kind-0 body section"))?;
        Ok(Self { flag_bits, body, sequences })
    }
}

/// Writes a fully framed `OP_MSG` message to an async stream (the
/// connection's socket, plain or TLS-wrapped).
pub async fn write_message(stream: &mut (impl AsyncWrite + Unpin), msg: &OpMsg, request_id: i32, response_to: i32) -> Result<()> {
    let bytes = msg.encode(request_id, response_to)?;
    stream.write_all(&bytes).await.map_err(Error::Io)
}

/// Reads one fully framed `OP_MSG` message from an async stream.
pub async fn read_message(stream: &mut (impl AsyncRead + Unpin)) -> Result<(MsgHeader, OpMsg)> {
    let mut header_buf = [0_u8; HEADER_LEN];
    stream.read_exact(&mut header_buf).await.map_err(Error::Io)?;
    let header = MsgHeader::read(&header_buf)?;
    let total = length_to_usize(header.message_length).ok_or(Error::LengthOverflow)?;
    let payload_len = total.checked_sub(HEADER_LEN).ok_or(Error::Protocol("message_length smaller than header"))?;
    let mut payload = vec![0_u8; payload_len];
    stream.read_exact(&mut payload).await.map_err(Error::Io)?;
    let msg = OpMsg::decode(&header, &payload)?;
    Ok((header, msg))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bson::Value;

    #[test]
    fn body_only_message_roundtrips() {
        let mut body = Document::empty();
        body.mutator().append("hello", &Value::Int32(1)).unwrap();
        let msg = OpMsg::new(body);
        let bytes = msg.encode(3, 0).unwrap();
        let header = MsgHeader::read(&bytes[..HEADER_LEN]).unwrap();
        assert_eq!(header.op_code, OP_MSG);
        assert_eq!(header.request_id, 3);
        let decoded = OpMsg::decode(&header, &bytes[HEADER_LEN..]).unwrap();
        assert_eq!(decoded.body.as_bytes(), msg.body.as_bytes());
        assert!(decoded.sequences.is_empty());
    }

    #[test]
    fn document_sequence_roundtrips() {
        let body = Document::empty();
        let mut d1 = Document::empty();
        d1.mutator().append("n", &Value::Int32(1)).unwrap();
        let mut d2 = Document::empty();
        d2.mutator().append("n", &Value::Int32(2)).unwrap();
        let msg = OpMsg {
            flag_bits: 0,
            body,
            sequences: vec![DocumentSequence { identifier: "documents".into(), documents: vec![d1, d2] }],
        };
        let bytes = msg.encode(1, 0).unwrap();
        let header = MsgHeader::read(&bytes[..HEADER_LEN]).unwrap();
        let decoded = OpMsg::decode(&header, &bytes[HEADER_LEN..]).unwrap();
        assert_eq!(decoded.sequences.len(), 1);
        assert_eq!(decoded.sequences[0].identifier, "documents");
        assert_eq!(decoded.sequences[0].documents.len(), 2);
    }

    #[test]
    fn oversized_sequence_section_errors_instead_of_panicking() {
        let body = Document::empty();
        let msg = OpMsg::new(body);
        let mut bytes = msg.encode(1, 0).unwrap();
        let header = MsgHeader::read(&bytes[..HEADER_LEN]).unwrap();

        // Append a kind-1 section whose declared size reaches far past the
        // end of the payload.
        let mut payload = bytes.split_off(HEADER_LEN);
        payload.push(KIND_DOCUMENT_SEQUENCE);
        payload.extend_from_slice(&(1_000_000_i32).to_le_bytes());
        payload.extend_from_slice(b"documents\0");

        let result = OpMsg::decode(&header, &payload);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn truncated_sequence_size_field_errors_instead_of_panicking() {
        let body = Document::empty();
        let msg = OpMsg::new(body);
        let mut bytes = msg.encode(1, 0).unwrap();
        let header = MsgHeader::read(&bytes[..HEADER_LEN]).unwrap();

        let mut payload = bytes.split_off(HEADER_LEN);
        payload.push(KIND_DOCUMENT_SEQUENCE);
        payload.extend_from_slice(&[0_u8, 1]); // only 2 of the 4 size bytes present

        let result = OpMsg::decode(&header, &payload);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn async_read_write_roundtrip_over_in_memory_pipe() {
        let mut body = Document::empty();
        body.mutator().append("ping", &Value::Int32(1)).unwrap();
        let msg = OpMsg::new(body);

        let (mut client, mut server) = tokio::io::duplex(4096);
        write_message(&mut client, &msg, 5, 0).await.unwrap();
        let (header, decoded) = read_message(&mut server).await.unwrap();
        assert_eq!(header.request_id, 5);
        assert_eq!(decoded.body.as_bytes(), msg.body.as_bytes());
    }
}
