//! `OP_MSG` wire-protocol framing (component J): the 16-byte message
//! header and the flag-bits/section layout carrying BSON documents.

pub mod header;
pub mod op_msg;

pub use header::{MsgHeader, RequestIdSource, HEADER_LEN, OP_MSG};
pub use op_msg::{read_message, write_message, DocumentSequence, OpMsg};
