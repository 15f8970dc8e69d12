//! `hello` handshake (component L): builds the initial handshake command
//! and parses the server's reply into the limits a connection needs.
//!
//! The parsed limits are recorded but not enforced — a document larger
//! than `max_bson_object_size` is not yet rejected before being sent.
//! Enforcing them is future work once a caller actually needs it.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bson::parser::{doc, field, require, store_i32, store_i64, store_utf8, typed, Outcome};
use crate::bson::{Document, Value};
use crate::error::{Error, Result};

/// Limits and identifying information advertised by a server's `hello`
/// reply that the rest of the crate cares about.
#[derive(Clone, Debug)]
pub struct ServerDescription {
    pub max_bson_object_size: i32,
    pub max_message_size_bytes: i32,
    pub max_write_batch_size: i32,
    pub min_wire_version: i32,
    pub max_wire_version: i32,
    pub read_only: bool,
}

/// Builds the `hello` command document this crate sends as the first
/// message on every new connection.
#[must_use]
pub fn build_hello_command(app_name: Option<&str>) -> Document {
    let mut cmd = Document::empty();
    let mut m = cmd.mutator();
    m.append("hello", &Value::Int32(1)).unwrap();
    if let Some(name) = app_name {
        let mut client = Document::empty();
        client.mutator().append("application", &{
            let mut app = Document::empty();
            app.mutator().append("name", &Value::Utf8(name.to_owned())).unwrap();
            Value::Document(app)
        }).unwrap();
        m.append("client", &Value::Document(client)).unwrap();
    }
    cmd
}

/// Parses a `hello` reply body into a [`ServerDescription`], via the
/// parser combinators (component G) rather than ad hoc field lookups.
pub fn parse_hello_reply(reply: &Document) -> Result<ServerDescription> {
    let max_bson_object_size = Rc::new(RefCell::new(None));
    let max_message_size_bytes = Rc::new(RefCell::new(None));
    let max_write_batch_size = Rc::new(RefCell::new(None));
    let min_wire_version = Rc::new(RefCell::new(None));
    let max_wire_version = Rc::new(RefCell::new(None));
    let is_writable_primary = Rc::new(RefCell::new(None));

    let mut rule = doc(vec![
        require(
            "ok",
            typed(|v| {
                let accepted = matches!(v, crate::bson::ValueRef::Double(d) if *d == 1.0)
                    || matches!(v, crate::bson::ValueRef::Int32(1) | crate::bson::ValueRef::Bool(true));
                if accepted {
                    Outcome::Accept
                } else {
                    Outcome::Error("server reported ok: 0".to_owned())
                }
            }),
        ),
        require("maxBsonObjectSize", store_i32(max_bson_object_size.clone())),
        require("maxMessageSizeBytes", store_i32(max_message_size_bytes.clone())),
        field("maxWriteBatchSize", store_i32(max_write_batch_size.clone())),
        require("minWireVersion", store_i32(min_wire_version.clone())),
        require("maxWireVersion", store_i32(max_wire_version.clone())),
        field(
            "isWritablePrimary",
            store_i32_as_bool(is_writable_primary.clone()),
        ),
        field("ismaster", store_i32_as_bool(is_writable_primary.clone())),
        field("secondary", store_utf8(Rc::new(RefCell::new(None)))),
        field("setName", store_utf8(Rc::new(RefCell::new(None)))),
        field("topologyVersion", store_i64(Rc::new(RefCell::new(None)))),
    ]);

    match rule.validate(&reply.view()) {
        Outcome::Accept => {}
        Outcome::Error(msg) => return Err(Error::Validation(msg)),
        Outcome::Reject => return Err(Error::Validation("hello reply missing a required field".to_owned())),
    }

    Ok(ServerDescription {
        max_bson_object_size: max_bson_object_size.borrow().ok_or(Error::Validation("maxBsonObjectSize missing".into()))?,
        max_message_size_bytes: max_message_size_bytes.borrow().ok_or(Error::Validation("maxMessageSizeBytes missing".into()))?,
        max_write_batch_size: max_write_batch_size.borrow().unwrap_or(100_000),
        min_wire_version: min_wire_version.borrow().ok_or(Error::Validation("minWireVersion missing".into()))?,
        max_wire_version: max_wire_version.borrow().ok_or(Error::Validation("maxWireVersion missing".into()))?,
        read_only: !is_writable_primary.borrow().unwrap_or(true),
    })
}

/// `isWritablePrimary`/`ismaster` are booleans on modern servers but were
/// historically sometimes sent as 0/1 integers; accept either.
fn store_i32_as_bool(dest: Rc<RefCell<Option<bool>>>) -> crate::bson::parser::Rule {
    typed(move |v| match v {
        crate::bson::ValueRef::Bool(b) => {
            *dest.borrow_mut() = Some(*b);
            Outcome::Accept
        }
        crate::bson::ValueRef::Int32(i) => {
            *dest.borrow_mut() = Some(*i != 0);
            Outcome::Accept
        }
        _ => Outcome::Reject,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_reply() -> Document {
        let mut d = Document::empty();
        let mut m = d.mutator();
        m.append("ok", &Value::Double(1.0)).unwrap();
        m.append("isWritablePrimary", &Value::Bool(true)).unwrap();
        m.append("maxBsonObjectSize", &Value::Int32(16_777_216)).unwrap();
        m.append("maxMessageSizeBytes", &Value::Int32(48_000_000)).unwrap();
        m.append("maxWriteBatchSize", &Value::Int32(100_000)).unwrap();
        m.append("minWireVersion", &Value::Int32(0)).unwrap();
        m.append("maxWireVersion", &Value::Int32(17)).unwrap();
        drop(m);
        d
    }

    #[test]
    fn hello_command_always_requests_hello() {
        let cmd = build_hello_command(None);
        let view = cmd.view();
        let el = view.get("hello").unwrap().unwrap();
        assert_eq!(el.tag, crate::bson::TypeTag::Int32);
    }

    #[test]
    fn parses_a_well_formed_reply() {
        let reply = sample_reply();
        let desc = parse_hello_reply(&reply).unwrap();
        assert_eq!(desc.max_bson_object_size, 16_777_216);
        assert_eq!(desc.max_wire_version, 17);
        assert!(!desc.read_only);
    }

    #[test]
    fn rejects_reply_missing_required_field() {
        let mut d = Document::empty();
        d.mutator().append("ok", &Value::Double(1.0)).unwrap();
        assert!(parse_hello_reply(&d).is_err());
    }

    #[test]
    fn rejects_not_ok_reply() {
        let mut fresh = Document::empty();
        let mut m = fresh.mutator();
        m.append("ok", &Value::Double(0.0)).unwrap();
        m.append("maxBsonObjectSize", &Value::Int32(1)).unwrap();
        m.append("maxMessageSizeBytes", &Value::Int32(1)).unwrap();
        m.append("minWireVersion", &Value::Int32(0)).unwrap();
        m.append("maxWireVersion", &Value::Int32(1)).unwrap();
        drop(m);
        assert!(parse_hello_reply(&fresh).is_err());
    }
}
