//! Owned, growable BSON document with a splicing mutator (component E).
//!
//! Growth is geometric (`Vec<u8>`'s own amortized doubling); `insert`/
//! `erase` perform exactly one splice of the backing buffer each. Ancestor
//! subdocument length headers are tracked as byte *offsets* into the root
//! buffer rather than raw parent pointers: a header's position never moves
//! once its content region is what's being edited (all edits happen
//! strictly after the header bytes), so only its stored value needs
//! bumping after each splice.

use super::value::Value;
use super::view::{BsonError, ElementRef, TypeTag, View};
use crate::error::{Error, Result};

/// An owned BSON document. Always starts as `[5,0,0,0,0]` (the empty
/// document) and is always a validly framed BSON buffer between mutations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Document {
    buf: Vec<u8>,
}

impl Default for Document {
    fn default() -> Self {
        Self::empty()
    }
}

impl Document {
    #[must_use]
    pub fn empty() -> Self {
        Self { buf: vec![5, 0, 0, 0, 0] }
    }

    /// Validates and copies `bytes` into a new owned document.
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, BsonError> {
        let view = View::from_bytes(bytes)?;
        Ok(Self { buf: view.as_bytes().to_vec() })
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty_doc(&self) -> bool {
        self.buf.len() == 5
    }

    #[must_use]
    pub fn view(&self) -> View<'_> {
        View::from_bytes(&self.buf).expect("Document invariant: buf is always valid BSON")
    }

    /// A mutator scoped to this document's top level.
    pub fn mutator(&mut self) -> Mutator<'_> {
        Mutator { doc: self, ancestor_length_offsets: vec![0] }
    }
}

fn read_len(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn write_len(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// An in-place editor over one (sub)document of a [`Document`]. Exactly one
/// `Mutator` may be live for a given subdocument at a time — enforced here
/// simply by Rust's borrow checker, since `child()` takes `&mut self`.
pub struct Mutator<'doc> {
    doc: &'doc mut Document,
    /// Offsets (within `doc.buf`) of the `i32` length header of this
    /// mutator's scope and of every enclosing ancestor, root first.
    ancestor_length_offsets: Vec<usize>,
}

impl<'doc> Mutator<'doc> {
    fn length_offset(&self) -> usize {
        *self.ancestor_length_offsets.last().expect("at least the root offset is always present")
    }

    /// Absolute offset of the first byte (the length header) of this
    /// mutator's scope.
    #[must_use]
    pub fn scope_start(&self) -> usize {
        self.length_offset()
    }

    /// Absolute offset one past this scope's terminator — i.e. where a new
    /// top-level element of this scope would be appended.
    #[must_use]
    pub fn scope_len(&self) -> usize {
        read_len(&self.doc.buf, self.length_offset()) as usize
    }

    /// Offset of this scope's terminating `0x00` byte — the natural append
    /// point.
    #[must_use]
    pub fn append_offset(&self) -> usize {
        self.scope_start() + self.scope_len() - 1
    }

    fn apply_delta(&mut self, delta: i64) {
        for &offset in &self.ancestor_length_offsets {
            let cur = read_len(&self.doc.buf, offset);
            let new_len = cur as i64 + delta;
            write_len(&mut self.doc.buf, offset, new_len as i32);
        }
    }

    /// Inserts a new element `key: value` at absolute byte offset `at`
    /// (which must point at an element's type-tag byte within this scope,
    /// or at [`Self::append_offset`] to append). Opens a gap of the exact
    /// element size and writes the header + payload in one splice.
    pub fn insert(&mut self, at: usize, key: &str, value: &Value) -> Result<()> {
        if at < self.scope_start() || at > self.append_offset() {
            return Err(Error::Usage("insert offset outside mutator scope"));
        }
        let mut bytes = Vec::with_capacity(1 + key.len() + 1 + 16);
        bytes.push(value.tag() as u8);
        bytes.extend_from_slice(key.as_bytes());
        bytes.push(0);
        value.encode_payload(&mut bytes);

        let delta = bytes.len() as i64;
        self.doc.buf.splice(at..at, bytes);
        self.apply_delta(delta);
        Ok(())
    }

    /// Convenience for `insert` at [`Self::append_offset`].
    pub fn append(&mut self, key: &str, value: &Value) -> Result<()> {
        let at = self.append_offset();
        self.insert(at, key, value)
    }

    /// Erases the element of size `element_size` starting at absolute
    /// offset `at`. The inverse of `insert` with the same arguments.
    pub fn erase(&mut self, at: usize, element_size: usize) -> Result<()> {
        if at < self.scope_start() || at + element_size > self.append_offset() + 1 {
            return Err(Error::Usage("erase range outside mutator scope"));
        }
        self.doc.buf.drain(at..at + element_size);
        self.apply_delta(-(element_size as i64));
        Ok(())
    }

    /// Returns the elements of this scope (key, absolute offset, element
    /// size, tag) without holding a live borrow across the call, so the
    /// caller can immediately follow up with `insert`/`erase`/`child`.
    pub fn elements(&self) -> Result<Vec<(String, usize, usize, TypeTag)>> {
        let view = View::from_bytes(&self.doc.buf[self.scope_start()..self.scope_start() + self.scope_len()])
            .map_err(Error::Bson)?;
        let base = self.scope_start();
        let mut out = Vec::new();
        for el in view.iter() {
            let el: ElementRef = el.map_err(Error::Bson)?;
            out.push((el.key.to_owned(), base + el.offset, el.element_size, el.tag));
        }
        Ok(out)
    }

    /// Descends into the `Document`/`Array`-typed element whose type-tag
    /// byte is at absolute offset `at`, returning a mutator scoped to its
    /// nested document. On drop, the child's final length is already
    /// reflected in `self`'s own ancestor chain (both share the same
    /// length-header offsets vector prefix), so no explicit "write back on
    /// release" step is needed — each `insert`/`erase` already bumped every
    /// enclosing header, this one included.
    pub fn child(&mut self, at: usize) -> Result<Mutator<'_>> {
        let view = View::from_bytes(&self.doc.buf[self.scope_start()..self.scope_start() + self.scope_len()])
            .map_err(Error::Bson)?;
        let base = self.scope_start();
        let rel = at - base;
        let el = view
            .iter()
            .find_map(|r| r.ok().filter(|e| e.offset == rel))
            .ok_or(Error::Usage("no element at that offset"))?;
        if !matches!(el.tag, TypeTag::Document | TypeTag::Array) {
            return Err(Error::Usage("child() requires a Document or Array element"));
        }
        let nested_length_offset = base + el.offset + el.element_size - el.value_bytes.len();
        let mut ancestor_length_offsets = self.ancestor_length_offsets.clone();
        ancestor_length_offsets.push(nested_length_offset);
        Ok(Mutator { doc: self.doc, ancestor_length_offsets })
    }

    /// Rewrites the decimal-string keys of this scope's elements to `"0"`,
    /// `"1"`, … matching their position, only touching the suffix whose
    /// keys actually need to change.
    pub fn relabel_array(&mut self) -> Result<()> {
        self.relabel_array_from(0)
    }

    /// Relabels starting at `start_index`, re-scanning after every key whose
    /// decimal width changes (since that shifts every later offset). Keys
    /// that already match their index are left untouched, so only the
    /// affected suffix is ever rewritten.
    fn relabel_array_from(&mut self, start_index: usize) -> Result<()> {
        let elements = self.elements()?;
        for (index, (key, offset, element_size, _tag)) in elements.iter().enumerate().skip(start_index) {
            let want = index.to_string();
            if *key == want {
                continue;
            }
            let old_end = offset + element_size;
            let tag_byte = self.doc.buf[*offset];
            let value_start = offset + 1 + key.len() + 1;
            let value_bytes = self.doc.buf[value_start..old_end].to_vec();

            let mut replacement = Vec::with_capacity(1 + want.len() + 1 + value_bytes.len());
            replacement.push(tag_byte);
            replacement.extend_from_slice(want.as_bytes());
            replacement.push(0);
            replacement.extend_from_slice(&value_bytes);

            let delta = replacement.len() as i64 - *element_size as i64;
            self.doc.buf.splice(*offset..old_end, replacement);
            self.apply_delta(delta);
            if delta != 0 {
                return self.relabel_array_from(index + 1);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scenario_d_insert_then_erase_is_identity() {
        let mut doc = Document::empty();
        let (offset, size) = {
            let mut m = doc.mutator();
            let at = m.append_offset();
            m.insert(at, "foo", &Value::Int32(42)).unwrap();
            (at, m.elements().unwrap()[0].2)
        };
        assert_eq!(doc.as_bytes(), &[18, 0, 0, 0, 0x10, b'f', b'o', b'o', 0, 42, 0, 0, 0, 0][..]);
        doc.mutator().erase(offset, size).unwrap();
        assert_eq!(doc.as_bytes(), &[5, 0, 0, 0, 0]);
    }

    #[test]
    fn property_insert_erase_roundtrip_bytewise() {
        let original = Document::empty();
        let mut doc = original.clone();
        let (offset, size) = {
            let mut m = doc.mutator();
            let at = m.append_offset();
            m.insert(at, "x", &Value::Bool(true)).unwrap();
            (at, m.elements().unwrap()[0].2)
        };
        doc.mutator().erase(offset, size).unwrap();
        assert_eq!(doc.as_bytes(), original.as_bytes());
    }

    #[test]
    fn nested_child_mutator_updates_all_ancestor_lengths() {
        let mut doc = Document::empty();
        {
            let mut m = doc.mutator();
            let at = m.append_offset();
            m.insert(at, "sub", &Value::Document(Document::empty())).unwrap();
        }
        let sub_offset = doc.mutator().elements().unwrap()[0].1;
        {
            let mut m = doc.mutator();
            let mut child = m.child(sub_offset).unwrap();
            let at = child.append_offset();
            child.insert(at, "a", &Value::Int32(7)).unwrap();
        }
        let view = doc.view();
        let el = view.get("sub").unwrap().unwrap();
        let nested = View::from_bytes(el.value_bytes).unwrap();
        assert_eq!(nested.get("a").unwrap().unwrap().key, "a");
        // the outer document's declared length must still match its actual
        // byte length after the nested insert grew the child's header.
        assert_eq!(view.size(), doc.as_bytes().len());
    }

    #[test]
    fn array_relabel_rewrites_suffix_keys() {
        let mut doc = Document::empty();
        {
            let mut m = doc.mutator();
            for (k, v) in [("0", 1), ("1", 2), ("2", 3)] {
                let at = m.append_offset();
                m.insert(at, k, &Value::Int32(v)).unwrap();
            }
        }
        // erase index 1 ("1"), leaving keys "0", "2" which must relabel to "0","1"
        let (offset, size) = {
            let els = doc.mutator().elements().unwrap();
            let (_, offset, size, _) = els[1].clone();
            (offset, size)
        };
        doc.mutator().erase(offset, size).unwrap();
        doc.mutator().relabel_array().unwrap();
        let els = doc.mutator().elements().unwrap();
        for (i, (key, ..)) in els.iter().enumerate() {
            assert_eq!(key, &i.to_string());
        }
    }
}
