// SPDX-License-Identifier: MIT
//! Containers, container blocks and the per-run container manager

use crate::arena::{Arena, Handle};
use crate::codec::CodecState;
use crate::reader::ReadError;
use crate::varint::{self, ByteReader};

/// Containers below this size are batched into one compressed stream
pub const SMALL_THRESHOLD: usize = 1024;

/// Size thresholds of the decoder's allocation passes, largest first
pub const ALLOCATION_PASSES: [usize; 5] = [1_000_000, 200_000, 40_000, 8_000, 0];

/// Index of the structure token container inside the structural block
pub const TREE: usize = 0;
/// Index of the global whitespace container inside the structural block
pub const WHITESPACE: usize = 1;
/// Index of the comment / PI / DOCTYPE / CDATA container inside the structural block
pub const SPECIAL: usize = 2;
/// Containers of the structural block
pub const STRUCTURAL_CONTAINERS: usize = 3;

/// Append-only output buffer of one codec slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Container {
    data: Vec<u8>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn put_u32(&mut self, value: u32) {
        varint::put_u32(&mut self.data, value);
    }

    #[inline]
    pub fn put_signed(&mut self, negative: bool, magnitude: u32) {
        varint::put_signed(&mut self.data, negative, magnitude);
    }

    /// Length-prefixed byte string
    #[inline]
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        varint::put_bytes(&mut self.data, bytes);
    }

    #[inline]
    pub fn push(&mut self, byte: u8) {
        self.data.push(byte);
    }

    #[inline]
    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

/// Decoded container being consumed by a decompressor
#[derive(Debug, Clone, Default)]
pub struct InputContainer {
    data: Vec<u8>,
    pos: usize,
}

impl InputContainer {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    pub fn u32(&mut self) -> Result<u32, ReadError> {
        varint::decode_u32(&self.data, &mut self.pos)
    }

    #[inline]
    pub fn signed(&mut self) -> Result<(bool, u32), ReadError> {
        varint::decode_signed(&self.data, &mut self.pos)
    }

    #[inline]
    pub fn byte(&mut self) -> Result<u8, ReadError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(ReadError::Truncated("container byte"))?;
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    pub fn raw(&mut self, len: usize) -> Result<&[u8], ReadError> {
        varint::decode_raw(&self.data, &mut self.pos, len)
    }

    /// Byte string written by [`Container::put_bytes`]
    pub fn bytes(&mut self) -> Result<&[u8], ReadError> {
        let len = self.u32()? as usize;
        self.raw(len)
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len()
    }
}

/// Containers and codec state of one (path expression, dictionary node) pair
#[derive(Debug)]
pub struct ContainerBlock {
    /// 1-based path expression index, 0 for the structural block
    pub path: u32,
    pub containers: Vec<Container>,
    pub state: CodecState,
}

impl ContainerBlock {
    pub fn new(path: u32, containers: usize, state: CodecState) -> Self {
        Self {
            path,
            containers: vec![Container::new(); containers],
            state,
        }
    }

    pub fn data_size(&self) -> usize {
        self.containers.iter().map(Container::len).sum()
    }
}

pub type BlockId = Handle<ContainerBlock>;

/// Owns every container block of the current run block
#[derive(Debug)]
pub struct ContainerManager {
    blocks: Arena<ContainerBlock>,
}

impl ContainerManager {
    /// Manager holding only the structural block
    pub fn new() -> Self {
        let mut manager = Self {
            blocks: Arena::new(),
        };
        manager.begin_run();
        manager
    }

    /// Drop all blocks of the previous run and recreate the structural block
    pub fn begin_run(&mut self) {
        self.blocks.reset();
        self.blocks.alloc(ContainerBlock::new(
            0,
            STRUCTURAL_CONTAINERS,
            CodecState::Stateless,
        ));
    }

    /// Register a new block (`CreateNewContainerBlock`)
    pub fn create_block(&mut self, path: u32, containers: usize, state: CodecState) -> BlockId {
        self.blocks.alloc(ContainerBlock::new(path, containers, state))
    }

    pub fn block(&self, id: BlockId) -> &ContainerBlock {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut ContainerBlock {
        &mut self.blocks[id]
    }

    /// Structure token, whitespace and special containers
    pub fn structural_mut(&mut self) -> &mut [Container] {
        match self.blocks.handle_at(0) {
            Some(handle) => &mut self.blocks[handle].containers,
            None => &mut [],
        }
    }

    pub fn blocks(&self) -> impl Iterator<Item = &ContainerBlock> {
        self.blocks.iter()
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut ContainerBlock> {
        self.blocks.iter_mut()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Bytes currently held in all containers
    pub fn data_size(&self) -> usize {
        self.blocks.iter().map(ContainerBlock::data_size).sum()
    }

    /// Block count, then per block the path index, container count and sizes
    pub fn store_layout(&self, out: &mut Vec<u8>) {
        varint::put_u32(out, self.blocks.len() as u32);
        for block in self.blocks.iter() {
            varint::put_u32(out, block.path);
            varint::put_u32(out, block.containers.len() as u32);
            for container in &block.containers {
                varint::put_u32(out, container.len() as u32);
            }
        }
    }

    /// Concatenation of all small containers, in layout order
    pub fn small_data(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for container in self.all_containers() {
            if container.len() < SMALL_THRESHOLD {
                out.extend_from_slice(container.as_slice());
            }
        }
        out
    }

    /// Large containers, in layout order
    pub fn large_containers(&self) -> impl Iterator<Item = &Container> {
        self.all_containers()
            .filter(|container| container.len() >= SMALL_THRESHOLD)
    }

    fn all_containers(&self) -> impl Iterator<Item = &Container> {
        self.blocks.iter().flat_map(|block| block.containers.iter())
    }
}

impl Default for ContainerManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Layout entry of one block as read back from a run header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    pub path: u32,
    pub sizes: Vec<u32>,
}

/// Container layout of one run block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunLayout {
    pub blocks: Vec<BlockLayout>,
}

impl RunLayout {
    pub fn load(input: &mut ByteReader<'_>) -> Result<Self, ReadError> {
        let count = input.u32()? as usize;
        if count == 0 {
            return Err(ReadError::Corrupt("run without structural block".into()));
        }
        // Every block needs at least two bytes of layout.
        if count > input.remaining() {
            return Err(ReadError::Truncated("container layout"));
        }
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            let path = input.u32()?;
            let containers = input.u32()? as usize;
            if containers > input.remaining() {
                return Err(ReadError::Truncated("container layout"));
            }
            let sizes = (0..containers)
                .map(|_| input.u32())
                .collect::<Result<Vec<_>, _>>()?;
            blocks.push(BlockLayout { path, sizes });
        }
        let structural = &blocks[0];
        if structural.path != 0 || structural.sizes.len() != STRUCTURAL_CONTAINERS {
            return Err(ReadError::Corrupt("malformed structural block".into()));
        }
        Ok(Self { blocks })
    }

    /// Sum of all container sizes
    pub fn data_size(&self) -> u64 {
        self.sizes().map(|size| size as u64).sum()
    }

    /// Sum of the sizes of the batched small containers
    pub fn small_size(&self) -> u64 {
        self.sizes()
            .filter(|&size| (size as usize) < SMALL_THRESHOLD)
            .map(|size| size as u64)
            .sum()
    }

    fn sizes(&self) -> impl Iterator<Item = u32> + '_ {
        self.blocks.iter().flat_map(|block| block.sizes.iter().copied())
    }

    /// Reserve every container buffer, largest containers first
    pub fn allocate(&self) -> Vec<Vec<Vec<u8>>> {
        let mut buffers: Vec<Vec<Vec<u8>>> = self
            .blocks
            .iter()
            .map(|block| vec![Vec::new(); block.sizes.len()])
            .collect();
        let mut upper = usize::MAX;
        for threshold in ALLOCATION_PASSES {
            for (block, layout) in buffers.iter_mut().zip(&self.blocks) {
                for (buffer, &size) in block.iter_mut().zip(&layout.sizes) {
                    let size = size as usize;
                    if size >= threshold && size < upper {
                        buffer.reserve_exact(size);
                    }
                }
            }
            upper = threshold;
        }
        buffers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_writes() {
        let mut container = Container::new();
        container.put_u32(300);
        container.push(7);
        container.put_bytes(b"ab");
        assert_eq!(container.as_slice(), &[0x81, 0x2C, 7, 2, b'a', b'b']);

        let mut input = InputContainer::new(container.as_slice().to_vec());
        assert_eq!(input.u32().unwrap(), 300);
        assert_eq!(input.byte().unwrap(), 7);
        assert_eq!(input.bytes().unwrap(), b"ab");
        assert!(input.is_exhausted());
        assert!(input.byte().is_err());
    }

    #[test]
    fn test_manager_structural_block() {
        let mut manager = ContainerManager::new();
        assert_eq!(manager.block_count(), 1);
        manager.structural_mut()[TREE].put_u32(5);
        let id = manager.create_block(1, 2, CodecState::Stateless);
        manager.block_mut(id).containers[1].extend(b"hello");
        assert_eq!(manager.data_size(), 6);

        manager.begin_run();
        assert_eq!(manager.block_count(), 1);
        assert_eq!(manager.data_size(), 0);
    }

    #[test]
    fn test_layout_store_load() {
        let mut manager = ContainerManager::new();
        manager.structural_mut()[SPECIAL].extend(b"xyz");
        let id = manager.create_block(2, 1, CodecState::Stateless);
        manager.block_mut(id).containers[0].extend(&[0u8; 2000]);

        let mut out = Vec::new();
        manager.store_layout(&mut out);
        let layout = RunLayout::load(&mut ByteReader::new(&out)).unwrap();
        assert_eq!(layout.blocks.len(), 2);
        assert_eq!(layout.blocks[0].sizes, vec![0, 0, 3]);
        assert_eq!(layout.blocks[1], BlockLayout { path: 2, sizes: vec![2000] });
        assert_eq!(layout.data_size(), 2003);
        assert_eq!(layout.small_size(), 3);
        assert_eq!(manager.small_data(), b"xyz");
        assert_eq!(manager.large_containers().count(), 1);
    }

    #[test]
    fn test_layout_rejects_bad_structural_block() {
        let mut out = Vec::new();
        varint::put_u32(&mut out, 1);
        varint::put_u32(&mut out, 3);
        varint::put_u32(&mut out, 0);
        assert!(RunLayout::load(&mut ByteReader::new(&out)).is_err());
    }

    #[test]
    fn test_allocate_reserves_capacity() {
        let layout = RunLayout {
            blocks: vec![
                BlockLayout { path: 0, sizes: vec![10, 0, 300_000] },
                BlockLayout { path: 1, sizes: vec![9_000] },
            ],
        };
        let buffers = layout.allocate();
        assert!(buffers[0][0].capacity() >= 10);
        assert!(buffers[0][2].capacity() >= 300_000);
        assert!(buffers[1][0].capacity() >= 9_000);
    }
}
