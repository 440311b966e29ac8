// SPDX-License-Identifier: MIT
//! Label table: interns element and attribute names to dense ids

use crate::reader::ReadError;
use crate::varint::{self, ByteReader};
use rustc_hash::FxHashMap;
use std::fmt;

/// Attribute flag inside a packed [`LabelId`]
const ATTRIBUTE_FLAG: u32 = 1 << 31;

/// Element or attribute namespace of a label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LabelKind {
    Element,
    Attribute,
}

/// Interned label: dense index plus namespace flag
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(u32);

impl LabelId {
    /// `#`, matches any element
    pub const ELEMENT_POUND: LabelId = LabelId(0);
    /// `@#`, matches any attribute
    pub const ATTRIBUTE_POUND: LabelId = LabelId(1 | ATTRIBUTE_FLAG);

    #[inline]
    fn new(index: u32, kind: LabelKind) -> Self {
        match kind {
            LabelKind::Element => LabelId(index),
            LabelKind::Attribute => LabelId(index | ATTRIBUTE_FLAG),
        }
    }

    /// Dense position in the table
    #[inline]
    pub fn index(self) -> u32 {
        self.0 & !ATTRIBUTE_FLAG
    }

    #[inline]
    pub fn kind(self) -> LabelKind {
        if self.0 & ATTRIBUTE_FLAG != 0 {
            LabelKind::Attribute
        } else {
            LabelKind::Element
        }
    }

    #[inline]
    pub fn is_attribute(self) -> bool {
        self.0 & ATTRIBUTE_FLAG != 0
    }

    /// True for the two wildcard labels
    #[inline]
    pub fn is_pound(self) -> bool {
        self == Self::ELEMENT_POUND || self == Self::ATTRIBUTE_POUND
    }

    /// Wildcard of the given namespace
    #[inline]
    pub fn pound(kind: LabelKind) -> Self {
        match kind {
            LabelKind::Element => Self::ELEMENT_POUND,
            LabelKind::Attribute => Self::ATTRIBUTE_POUND,
        }
    }

    /// Wildcard of this label's namespace
    #[inline]
    pub fn pound_of(self) -> Self {
        Self::pound(self.kind())
    }
}

impl fmt::Debug for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            LabelKind::Element => write!(f, "L{}", self.index()),
            LabelKind::Attribute => write!(f, "L@{}", self.index()),
        }
    }
}

#[derive(Debug, Clone)]
struct LabelEntry {
    name: Box<[u8]>,
    kind: LabelKind,
}

/// Name table shared by the path compiler, the router and the codecs
///
/// Ids are assigned monotonically. Labels created before
/// [`LabelTable::seal_predefined`] survive [`LabelTable::reset`].
#[derive(Debug, Clone)]
pub struct LabelTable {
    entries: Vec<LabelEntry>,
    elements: FxHashMap<Box<[u8]>, LabelId>,
    attributes: FxHashMap<Box<[u8]>, LabelId>,
    predefined: usize,
    stored: usize,
}

impl LabelTable {
    /// Table holding the two wildcard labels
    pub fn new() -> Self {
        let mut table = Self::empty();
        table.intern(b"#", LabelKind::Element);
        table.intern(b"#", LabelKind::Attribute);
        table.predefined = table.entries.len();
        table
    }

    /// Table without wildcards, filled from stored deltas on decompression
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            elements: FxHashMap::default(),
            attributes: FxHashMap::default(),
            predefined: 0,
            stored: 0,
        }
    }

    /// Return the id of `name`, creating it on first sight
    pub fn intern(&mut self, name: &[u8], kind: LabelKind) -> LabelId {
        if let Some(id) = self.find(name, kind) {
            return id;
        }
        let id = LabelId::new(self.entries.len() as u32, kind);
        let name: Box<[u8]> = name.into();
        match kind {
            LabelKind::Element => self.elements.insert(name.clone(), id),
            LabelKind::Attribute => self.attributes.insert(name.clone(), id),
        };
        self.entries.push(LabelEntry { name, kind });
        id
    }

    #[inline]
    pub fn find(&self, name: &[u8], kind: LabelKind) -> Option<LabelId> {
        match kind {
            LabelKind::Element => self.elements.get(name).copied(),
            LabelKind::Attribute => self.attributes.get(name).copied(),
        }
    }

    /// Id for a dense index
    pub fn id_at(&self, index: u32) -> Option<LabelId> {
        self.entries
            .get(index as usize)
            .map(|e| LabelId::new(index, e.kind))
    }

    /// Raw name bytes (without the `@` of attributes)
    pub fn name(&self, id: LabelId) -> &[u8] {
        self.entries
            .get(id.index() as usize)
            .map(|e| &*e.name)
            .unwrap_or(b"?")
    }

    /// Printable name, attributes prefixed with `@`
    pub fn display(&self, id: LabelId) -> String {
        let name = String::from_utf8_lossy(self.name(id));
        if id.is_attribute() {
            format!("@{}", name)
        } else {
            name.into_owned()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All ids in creation order
    pub fn ids(&self) -> impl Iterator<Item = LabelId> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| LabelId::new(i as u32, e.kind))
    }

    /// Mark every current label as surviving [`reset`](Self::reset)
    pub fn seal_predefined(&mut self) {
        self.predefined = self.entries.len();
    }

    /// Forget document labels, keep predefined ones, restart delta storage
    pub fn reset(&mut self) {
        for entry in self.entries.drain(self.predefined..) {
            match entry.kind {
                LabelKind::Element => self.elements.remove(&entry.name),
                LabelKind::Attribute => self.attributes.remove(&entry.name),
            };
        }
        self.stored = 0;
    }

    /// Append labels created since the previous call
    pub fn store_delta(&mut self, out: &mut Vec<u8>) {
        let fresh = &self.entries[self.stored..];
        varint::put_u32(out, fresh.len() as u32);
        for entry in fresh {
            varint::put_signed(
                out,
                entry.kind == LabelKind::Attribute,
                entry.name.len() as u32,
            );
            out.extend_from_slice(&entry.name);
        }
        self.stored = self.entries.len();
    }

    /// Read a delta written by [`store_delta`](Self::store_delta)
    pub fn load_delta(&mut self, input: &mut ByteReader<'_>) -> Result<(), ReadError> {
        let count = input.u32()?;
        for _ in 0..count {
            let (is_attribute, len) = input.signed()?;
            let name = input.raw(len as usize)?;
            let kind = if is_attribute {
                LabelKind::Attribute
            } else {
                LabelKind::Element
            };
            let before = self.entries.len();
            self.intern(name, kind);
            if self.entries.len() == before {
                return Err(ReadError::Corrupt(format!(
                    "duplicate label '{}' in label dictionary",
                    String::from_utf8_lossy(name)
                )));
            }
        }
        self.stored = self.entries.len();
        Ok(())
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pounds_come_first() {
        let table = LabelTable::new();
        assert_eq!(table.find(b"#", LabelKind::Element), Some(LabelId::ELEMENT_POUND));
        assert_eq!(table.find(b"#", LabelKind::Attribute), Some(LabelId::ATTRIBUTE_POUND));
        assert_eq!(LabelId::ATTRIBUTE_POUND.index(), 1);
        assert!(LabelId::ATTRIBUTE_POUND.is_attribute());
    }

    #[test]
    fn test_intern_is_stable() {
        let mut table = LabelTable::new();
        let a = table.intern(b"price", LabelKind::Element);
        let b = table.intern(b"price", LabelKind::Attribute);
        assert_ne!(a, b);
        assert_eq!(a.index() + 1, b.index());
        assert_eq!(table.intern(b"price", LabelKind::Element), a);
        assert_eq!(table.display(b), "@price");
        assert_eq!(b.pound_of(), LabelId::ATTRIBUTE_POUND);
    }

    #[test]
    fn test_reset_keeps_predefined() {
        let mut table = LabelTable::new();
        let kept = table.intern(b"a", LabelKind::Element);
        table.seal_predefined();
        table.intern(b"b", LabelKind::Element);
        table.reset();

        assert_eq!(table.len(), 3);
        assert_eq!(table.find(b"a", LabelKind::Element), Some(kept));
        assert_eq!(table.find(b"b", LabelKind::Element), None);
    }

    #[test]
    fn test_delta_round_trip() {
        let mut table = LabelTable::new();
        table.intern(b"a", LabelKind::Element);
        let mut first = Vec::new();
        table.store_delta(&mut first);
        table.intern(b"x", LabelKind::Attribute);
        let mut second = Vec::new();
        table.store_delta(&mut second);

        let mut decoded = LabelTable::empty();
        decoded.load_delta(&mut ByteReader::new(&first)).unwrap();
        assert_eq!(decoded.len(), 3);
        decoded.load_delta(&mut ByteReader::new(&second)).unwrap();

        let ids: Vec<_> = table.ids().collect();
        assert_eq!(decoded.ids().collect::<Vec<_>>(), ids);
        assert_eq!(decoded.name(ids[3]), b"x");
    }

    #[test]
    fn test_duplicate_delta_is_corrupt() {
        let mut table = LabelTable::new();
        let mut delta = Vec::new();
        table.store_delta(&mut delta);
        let mut decoded = LabelTable::new();
        assert!(decoded.load_delta(&mut ByteReader::new(&delta)).is_err());
    }
}
