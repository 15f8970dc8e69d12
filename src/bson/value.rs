//! BSON value reference and owned value (component F): a tagged-union
//! reference form that borrows directly out of an [`ElementRef`], and an
//! owning form used when building new elements for the mutator.

use super::document::Document;
use super::view::{BsonError, ElementRef, TypeTag, View};
use crate::checked::length_to_usize;

/// Borrowed, zero-copy view of one element's value. Produced from an
/// [`ElementRef`] without any allocation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ValueRef<'a> {
    Double(f64),
    Utf8(&'a str),
    Document(View<'a>),
    Array(View<'a>),
    Binary { subtype: u8, data: &'a [u8] },
    Undefined,
    ObjectId([u8; 12]),
    Bool(bool),
    DateTime(i64),
    Null,
    Regex { pattern: &'a str, options: &'a str },
    DbPointer { namespace: &'a str, id: [u8; 12] },
    Code(&'a str),
    Symbol(&'a str),
    CodeWithScope { code: &'a str, scope: View<'a> },
    Int32(i32),
    Timestamp(u64),
    Int64(i64),
    Decimal128([u8; 16]),
    MaxKey,
    MinKey,
}

fn read_utf8_field(bytes: &[u8]) -> Result<&str, BsonError> {
    // [len:4][utf8 bytes...][0x00], len includes the trailing NUL.
    let len_i32 = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let len = length_to_usize(len_i32).ok_or(BsonError::InvalidLength)?;
    if len == 0 {
        return Err(BsonError::InvalidLength);
    }
    let s = &bytes[4..4 + len - 1];
    std::str::from_utf8(s).map_err(|_| BsonError::InvalidDocument)
}

impl<'a> ValueRef<'a> {
    /// Decodes the tagged value carried by `el`. `el.value_bytes` is assumed
    /// to already satisfy the length invariants checked when `el` was
    /// produced by [`super::view::Iter`].
    pub fn from_element(el: &ElementRef<'a>) -> Result<Self, BsonError> {
        let b = el.value_bytes;
        Ok(match el.tag {
            TypeTag::Double => ValueRef::Double(f64::from_le_bytes(b[0..8].try_into().unwrap())),
            TypeTag::Utf8 => ValueRef::Utf8(read_utf8_field(b)?),
            TypeTag::Document => ValueRef::Document(View::from_bytes(b)?),
            TypeTag::Array => ValueRef::Array(View::from_bytes(b)?),
            TypeTag::Binary => {
                let len_i32 = i32::from_le_bytes(b[0..4].try_into().unwrap());
                let len = length_to_usize(len_i32).ok_or(BsonError::InvalidLength)?;
                let subtype = b[4];
                ValueRef::Binary { subtype, data: &b[5..5 + len] }
            }
            TypeTag::Undefined => ValueRef::Undefined,
            TypeTag::ObjectId => {
                let mut oid = [0_u8; 12];
                oid.copy_from_slice(&b[0..12]);
                ValueRef::ObjectId(oid)
            }
            TypeTag::Bool => ValueRef::Bool(b[0] != 0),
            TypeTag::DateTime => ValueRef::DateTime(i64::from_le_bytes(b[0..8].try_into().unwrap())),
            TypeTag::Null => ValueRef::Null,
            TypeTag::Regex => {
                let nul = b.iter().position(|&c| c == 0).ok_or(BsonError::ShortRead)?;
                let pattern = std::str::from_utf8(&b[..nul]).map_err(|_| BsonError::InvalidDocument)?;
                let rest = &b[nul + 1..];
                let nul2 = rest.iter().position(|&c| c == 0).ok_or(BsonError::ShortRead)?;
                let options = std::str::from_utf8(&rest[..nul2]).map_err(|_| BsonError::InvalidDocument)?;
                ValueRef::Regex { pattern, options }
            }
            TypeTag::DbPointer => {
                let namespace = read_utf8_field(b)?;
                let len_i32 = i32::from_le_bytes(b[0..4].try_into().unwrap());
                let len = length_to_usize(len_i32).ok_or(BsonError::InvalidLength)?;
                let mut id = [0_u8; 12];
                id.copy_from_slice(&b[4 + len..4 + len + 12]);
                ValueRef::DbPointer { namespace, id }
            }
            TypeTag::Code => ValueRef::Code(read_utf8_field(b)?),
            TypeTag::Symbol => ValueRef::Symbol(read_utf8_field(b)?),
            TypeTag::CodeWithScope => {
                // [total_len:4][code as string field][scope: document]
                let code = read_utf8_field(&b[4..])?;
                let code_field_len = 4 + code.len() + 1;
                let scope = View::from_bytes(&b[4 + code_field_len..])?;
                ValueRef::CodeWithScope { code, scope }
            }
            TypeTag::Int32 => ValueRef::Int32(i32::from_le_bytes(b[0..4].try_into().unwrap())),
            TypeTag::Timestamp => ValueRef::Timestamp(u64::from_le_bytes(b[0..8].try_into().unwrap())),
            TypeTag::Int64 => ValueRef::Int64(i64::from_le_bytes(b[0..8].try_into().unwrap())),
            TypeTag::Decimal128 => {
                let mut d = [0_u8; 16];
                d.copy_from_slice(&b[0..16]);
                ValueRef::Decimal128(d)
            }
            TypeTag::MaxKey => ValueRef::MaxKey,
            TypeTag::MinKey => ValueRef::MinKey,
        })
    }

    /// Deep-copies into an owned [`Value`].
    #[must_use]
    pub fn to_owned_value(&self) -> Value {
        match *self {
            ValueRef::Double(d) => Value::Double(d),
            ValueRef::Utf8(s) => Value::Utf8(s.to_owned()),
            ValueRef::Document(v) => Value::Document(Document::from_bytes(v.as_bytes()).expect("already validated")),
            ValueRef::Array(v) => Value::Array(Document::from_bytes(v.as_bytes()).expect("already validated")),
            ValueRef::Binary { subtype, data } => Value::Binary { subtype, data: data.to_vec() },
            ValueRef::Undefined => Value::Undefined,
            ValueRef::ObjectId(oid) => Value::ObjectId(oid),
            ValueRef::Bool(b) => Value::Bool(b),
            ValueRef::DateTime(dt) => Value::DateTime(dt),
            ValueRef::Null => Value::Null,
            ValueRef::Regex { pattern, options } => Value::Regex { pattern: pattern.to_owned(), options: options.to_owned() },
            ValueRef::DbPointer { namespace, id } => Value::DbPointer { namespace: namespace.to_owned(), id },
            ValueRef::Code(s) => Value::Code(s.to_owned()),
            ValueRef::Symbol(s) => Value::Symbol(s.to_owned()),
            ValueRef::CodeWithScope { code, scope } => Value::CodeWithScope {
                code: code.to_owned(),
                scope: Document::from_bytes(scope.as_bytes()).expect("already validated"),
            },
            ValueRef::Int32(i) => Value::Int32(i),
            ValueRef::Timestamp(t) => Value::Timestamp(t),
            ValueRef::Int64(i) => Value::Int64(i),
            ValueRef::Decimal128(d) => Value::Decimal128(d),
            ValueRef::MaxKey => Value::MaxKey,
            ValueRef::MinKey => Value::MinKey,
        }
    }
}

/// Owning form of a BSON value. Copy (via `Clone`) is deep because
/// `Document`/`String`/`Vec<u8>` leaves own their bytes; move is a cheap
/// pointer/length swap.
#[derive(Clone, Debug)]
pub enum Value {
    Double(f64),
    Utf8(String),
    Document(Document),
    Array(Document),
    Binary { subtype: u8, data: Vec<u8> },
    Undefined,
    ObjectId([u8; 12]),
    Bool(bool),
    DateTime(i64),
    Null,
    Regex { pattern: String, options: String },
    DbPointer { namespace: String, id: [u8; 12] },
    Code(String),
    Symbol(String),
    CodeWithScope { code: String, scope: Document },
    Int32(i32),
    Timestamp(u64),
    Int64(i64),
    Decimal128([u8; 16]),
    MaxKey,
    MinKey,
}

impl Value {
    #[must_use]
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::Double(_) => TypeTag::Double,
            Value::Utf8(_) => TypeTag::Utf8,
            Value::Document(_) => TypeTag::Document,
            Value::Array(_) => TypeTag::Array,
            Value::Binary { .. } => TypeTag::Binary,
            Value::Undefined => TypeTag::Undefined,
            Value::ObjectId(_) => TypeTag::ObjectId,
            Value::Bool(_) => TypeTag::Bool,
            Value::DateTime(_) => TypeTag::DateTime,
            Value::Null => TypeTag::Null,
            Value::Regex { .. } => TypeTag::Regex,
            Value::DbPointer { .. } => TypeTag::DbPointer,
            Value::Code(_) => TypeTag::Code,
            Value::Symbol(_) => TypeTag::Symbol,
            Value::CodeWithScope { .. } => TypeTag::CodeWithScope,
            Value::Int32(_) => TypeTag::Int32,
            Value::Timestamp(_) => TypeTag::Timestamp,
            Value::Int64(_) => TypeTag::Int64,
            Value::Decimal128(_) => TypeTag::Decimal128,
            Value::MaxKey => TypeTag::MaxKey,
            Value::MinKey => TypeTag::MinKey,
        }
    }

    fn write_utf8_field(out: &mut Vec<u8>, s: &str) {
        let len = (s.len() + 1) as i32;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(s.as_bytes());
        out.push(0);
    }

    /// Appends just the value payload (no type tag, no key) to `out`, in the
    /// exact wire layout `ElementRef::from_element` expects to read back.
    pub fn encode_payload(&self, out: &mut Vec<u8>) {
        match self {
            Value::Double(d) => out.extend_from_slice(&d.to_le_bytes()),
            Value::Utf8(s) => Self::write_utf8_field(out, s),
            Value::Document(d) | Value::Array(d) => out.extend_from_slice(d.as_bytes()),
            Value::Binary { subtype, data } => {
                out.extend_from_slice(&(data.len() as i32).to_le_bytes());
                out.push(*subtype);
                out.extend_from_slice(data);
            }
            Value::Undefined | Value::Null | Value::MaxKey | Value::MinKey => {}
            Value::ObjectId(oid) => out.extend_from_slice(oid),
            Value::Bool(b) => out.push(u8::from(*b)),
            Value::DateTime(dt) => out.extend_from_slice(&dt.to_le_bytes()),
            Value::Regex { pattern, options } => {
                out.extend_from_slice(pattern.as_bytes());
                out.push(0);
                out.extend_from_slice(options.as_bytes());
                out.push(0);
            }
            Value::DbPointer { namespace, id } => {
                Self::write_utf8_field(out, namespace);
                out.extend_from_slice(id);
            }
            Value::Code(s) | Value::Symbol(s) => Self::write_utf8_field(out, s),
            Value::CodeWithScope { code, scope } => {
                let mut body = Vec::new();
                Self::write_utf8_field(&mut body, code);
                body.extend_from_slice(scope.as_bytes());
                let total = (4 + body.len()) as i32;
                out.extend_from_slice(&total.to_le_bytes());
                out.extend_from_slice(&body);
            }
            Value::Int32(i) => out.extend_from_slice(&i.to_le_bytes()),
            Value::Timestamp(t) => out.extend_from_slice(&t.to_le_bytes()),
            Value::Int64(i) => out.extend_from_slice(&i.to_le_bytes()),
            Value::Decimal128(d) => out.extend_from_slice(d),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bson::document::Document;

    #[test]
    fn utf8_roundtrip_through_element() {
        let mut doc = Document::empty();
        doc.mutator().append("name", &Value::Utf8("bar".into())).unwrap();
        let view = doc.view();
        let el = view.get("name").unwrap().unwrap();
        let v = ValueRef::from_element(&el).unwrap();
        assert!(matches!(v, ValueRef::Utf8("bar")));
    }

    #[test]
    fn int32_and_bool_roundtrip() {
        let mut doc = Document::empty();
        doc.mutator().append("n", &Value::Int32(42)).unwrap();
        doc.mutator().append("b", &Value::Bool(true)).unwrap();
        let view = doc.view();
        let n = ValueRef::from_element(&view.get("n").unwrap().unwrap()).unwrap();
        let b = ValueRef::from_element(&view.get("b").unwrap().unwrap()).unwrap();
        assert!(matches!(n, ValueRef::Int32(42)));
        assert!(matches!(b, ValueRef::Bool(true)));
    }
}
