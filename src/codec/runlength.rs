// SPDX-License-Identifier: MIT
//! State of the `rl` run-length codec

use crate::container::{Container, InputContainer};
use crate::reader::ReadError;
use crate::varint::MAX_UNSIGNED;

const CHUNK_SIZE: usize = 32;

/// Byte string kept in fixed-size chunks
///
/// Assigning a new value reuses the chunks already allocated, so a long run
/// of long values does not reallocate.
#[derive(Debug, Clone, Default)]
pub struct ChunkList {
    chunks: Vec<Box<[u8; CHUNK_SIZE]>>,
    len: usize,
}

impl ChunkList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, value: &[u8]) {
        let needed = value.len().div_ceil(CHUNK_SIZE);
        while self.chunks.len() < needed {
            self.chunks.push(Box::new([0; CHUNK_SIZE]));
        }
        for (chunk, piece) in self.chunks.iter_mut().zip(value.chunks(CHUNK_SIZE)) {
            chunk[..piece.len()].copy_from_slice(piece);
        }
        self.len = value.len();
    }

    pub fn matches(&self, value: &[u8]) -> bool {
        value.len() == self.len
            && self
                .chunks
                .iter()
                .zip(value.chunks(CHUNK_SIZE))
                .all(|(chunk, piece)| &chunk[..piece.len()] == piece)
    }

    /// Filled part of every chunk, in order
    pub fn pieces(&self) -> impl Iterator<Item = &[u8]> {
        let len = self.len;
        self.chunks
            .iter()
            .enumerate()
            .take(len.div_ceil(CHUNK_SIZE))
            .map(move |(i, chunk)| &chunk[..(len - i * CHUNK_SIZE).min(CHUNK_SIZE)])
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        for piece in self.pieces() {
            out.extend_from_slice(piece);
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Current value and the number of further repetitions
#[derive(Debug, Clone, Default)]
pub struct RunState {
    value: ChunkList,
    /// Compressor: repetitions after the first. Decompressor: repetitions left.
    count: u32,
    active: bool,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compress(&mut self, text: &[u8], container: &mut Container) {
        if self.active && self.count < MAX_UNSIGNED && self.value.matches(text) {
            self.count += 1;
            return;
        }
        self.flush(container);
        self.value.assign(text);
        self.count = 0;
        self.active = true;
    }

    /// Write the pending run, if any
    pub fn flush(&mut self, container: &mut Container) {
        if !self.active {
            return;
        }
        container.put_u32(self.value.len() as u32);
        for piece in self.value.pieces() {
            container.extend(piece);
        }
        container.put_u32(self.count);
        self.active = false;
    }

    pub fn decode(&mut self, container: &mut InputContainer, out: &mut Vec<u8>) -> Result<(), ReadError> {
        if self.active && self.count > 0 {
            self.count -= 1;
        } else {
            let value = container.bytes()?;
            self.value.assign(value);
            self.count = container.u32()?;
            self.active = true;
        }
        self.value.write_to(out);
        Ok(())
    }
}
