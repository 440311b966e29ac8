// SPDX-License-Identifier: MIT
//! Shared dictionary behind the `e` codec
//!
//! All `e` instances of a run block share one hash table keyed by
//! (instance, string). Each instance still gets its own dense numbering and
//! its own dictionary, written as codec global data when the run block is
//! stored.

use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};

use crate::container::SMALL_THRESHOLD;
use crate::reader::ReadError;
use crate::varint::{self, ByteReader};

#[derive(Debug, Default)]
struct EnumInstance {
    /// `put_bytes` encoding of every string, in index order
    dictionary: Vec<u8>,
    /// Start and length of each string inside `dictionary`
    entries: Vec<(usize, usize)>,
}

impl EnumInstance {
    fn get(&self, index: u32) -> &[u8] {
        let (start, len) = self.entries[index as usize];
        &self.dictionary[start..start + len]
    }
}

/// Compressor-side enumeration table
#[derive(Debug, Default)]
pub struct EnumTable {
    buckets: FxHashMap<u64, Vec<(u32, u32)>>,
    instances: Vec<EnumInstance>,
}

fn bucket_key(instance: u32, text: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    instance.hash(&mut hasher);
    text.hash(&mut hasher);
    hasher.finish()
}

impl EnumTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dense index of `text` for `instance`, assigning the next one if unseen
    pub fn lookup(&mut self, instance: u32, text: &[u8]) -> u32 {
        let slot = instance as usize;
        if self.instances.len() <= slot {
            self.instances.resize_with(slot + 1, EnumInstance::default);
        }
        let bucket = self.buckets.entry(bucket_key(instance, text)).or_default();
        for &(owner, index) in bucket.iter() {
            if owner == instance && self.instances[slot].get(index) == text {
                return index;
            }
        }
        let entry = &mut self.instances[slot];
        let index = entry.entries.len() as u32;
        varint::put_u32(&mut entry.dictionary, text.len() as u32);
        entry.entries.push((entry.dictionary.len(), text.len()));
        entry.dictionary.extend_from_slice(text);
        bucket.push((instance, index));
        index
    }

    /// Dictionary bytes across all instances
    pub fn data_size(&self) -> usize {
        self.instances.iter().map(|i| i.dictionary.len()).sum()
    }

    /// Instance count, per instance the entry count and dictionary size, then
    /// the small dictionaries themselves
    pub fn store_global(&self, instances: u32, out: &mut Vec<u8>) {
        varint::put_u32(out, instances);
        for slot in 0..instances as usize {
            let (entries, size) = self
                .instances
                .get(slot)
                .map(|i| (i.entries.len(), i.dictionary.len()))
                .unwrap_or((0, 0));
            varint::put_u32(out, entries as u32);
            varint::put_u32(out, size as u32);
        }
        for dictionary in self.dictionaries(instances) {
            if dictionary.len() < SMALL_THRESHOLD {
                out.extend_from_slice(dictionary);
            }
        }
    }

    /// Dictionaries that travel as their own compressed stream
    pub fn large_dictionaries(&self, instances: u32) -> impl Iterator<Item = &[u8]> {
        self.dictionaries(instances)
            .filter(|dictionary| dictionary.len() >= SMALL_THRESHOLD)
    }

    fn dictionaries(&self, instances: u32) -> impl Iterator<Item = &[u8]> {
        self.instances
            .iter()
            .take(instances as usize)
            .map(|i| i.dictionary.as_slice())
    }

    pub fn reset(&mut self) {
        self.buckets.clear();
        self.instances.clear();
    }
}

/// Declared shape of one instance's dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictionaryShape {
    pub entries: u32,
    pub size: u32,
}

/// Decompressor-side dictionaries, one per `e` instance
#[derive(Debug, Default)]
pub struct EnumDictionaries {
    instances: Vec<Vec<Box<[u8]>>>,
}

impl EnumDictionaries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the instance table written by [`EnumTable::store_global`]
    pub fn load_shapes(input: &mut ByteReader<'_>) -> Result<Vec<DictionaryShape>, ReadError> {
        let count = input.u32()? as usize;
        if count > input.remaining() {
            return Err(ReadError::Truncated("enumeration table"));
        }
        (0..count)
            .map(|_| {
                Ok(DictionaryShape {
                    entries: input.u32()?,
                    size: input.u32()?,
                })
            })
            .collect()
    }

    /// Append the dictionary of the next instance
    pub fn push(&mut self, shape: DictionaryShape, data: &[u8]) -> Result<(), ReadError> {
        if data.len() != shape.size as usize {
            return Err(ReadError::Corrupt(format!(
                "enumeration dictionary has {} bytes, expected {}",
                data.len(),
                shape.size
            )));
        }
        let mut input = ByteReader::new(data);
        let mut strings = Vec::with_capacity((shape.entries as usize).min(data.len()));
        for _ in 0..shape.entries {
            strings.push(Box::from(input.bytes()?));
        }
        if !input.is_empty() {
            return Err(ReadError::Corrupt("trailing bytes in enumeration dictionary".into()));
        }
        self.instances.push(strings);
        Ok(())
    }

    pub fn get(&self, instance: u32, index: u32) -> Result<&[u8], ReadError> {
        self.instances
            .get(instance as usize)
            .and_then(|strings| strings.get(index as usize))
            .map(|s| &s[..])
            .ok_or_else(|| {
                ReadError::Corrupt(format!(
                    "enumeration index {} out of range for instance {}",
                    index, instance
                ))
            })
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn reset(&mut self) {
        self.instances.clear();
    }
}
