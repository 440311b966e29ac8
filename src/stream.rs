// SPDX-License-Identifier: MIT
//! zlib streams written back to back
//!
//! A compressed file is a sequence of independent zlib streams. Their
//! compressed lengths are not stored; the decoder learns where one stream ends
//! from the inflater itself and starts the next one right after it. Only the
//! run header stream is preceded by its uncompressed length.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use serde::Serialize;

use crate::reader::ReadError;
use crate::varint;
use crate::writer::WriteError;

/// Raw and compressed byte counts of one or more streams
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamSizes {
    pub raw: u64,
    pub compressed: u64,
}

impl StreamSizes {
    pub fn add(&mut self, other: StreamSizes) {
        self.raw += other.raw;
        self.compressed += other.compressed;
    }
}

/// One zlib stream being filled
pub struct ZlibStream {
    encoder: ZlibEncoder<Vec<u8>>,
    raw: u64,
}

impl ZlibStream {
    pub fn new(level: u32, capacity_hint: usize) -> Self {
        // zlib usually gets text-like data well below half its size
        let capacity = (capacity_hint / 2).max(64);
        Self {
            encoder: ZlibEncoder::new(Vec::with_capacity(capacity), Compression::new(level)),
            raw: 0,
        }
    }

    #[inline]
    pub fn write(&mut self, data: &[u8]) -> Result<(), WriteError> {
        self.encoder
            .write_all(data)
            .map_err(|e| WriteError::Compression(format!("Write failed: {}", e)))?;
        self.raw += data.len() as u64;
        Ok(())
    }

    /// Close the stream; returns the compressed bytes and the sizes
    pub fn finish(self) -> Result<(Vec<u8>, StreamSizes), WriteError> {
        let compressed = self
            .encoder
            .finish()
            .map_err(|e| WriteError::Compression(format!("Finish failed: {}", e)))?;
        let sizes = StreamSizes {
            raw: self.raw,
            compressed: compressed.len() as u64,
        };
        Ok((compressed, sizes))
    }
}

/// Compress `data` as one stream
pub fn compress_stream(data: &[u8], level: u32) -> Result<(Vec<u8>, StreamSizes), WriteError> {
    let mut stream = ZlibStream::new(level, data.len());
    stream.write(data)?;
    stream.finish()
}

fn size_mismatch(expected: usize) -> ReadError {
    ReadError::Corrupt(format!(
        "decompressed stream does not have the declared size of {} bytes",
        expected
    ))
}

/// Inflate the stream at the start of `input`, appending exactly `expected`
/// bytes to `out`. Returns the number of compressed bytes consumed.
pub fn inflate_into(input: &[u8], out: &mut Vec<u8>, expected: usize) -> Result<usize, ReadError> {
    let target = out.len() + expected;
    out.reserve_exact(expected);
    let mut inflater = Decompress::new(true);
    loop {
        let before = (inflater.total_in(), inflater.total_out());
        let rest = input.get(inflater.total_in() as usize..).unwrap_or_default();
        let status = if out.len() < out.capacity() {
            inflater.decompress_vec(rest, out, FlushDecompress::Finish)
        } else {
            // Output is full: the stream must end without producing more.
            let mut probe = Vec::with_capacity(1);
            let status = inflater.decompress_vec(rest, &mut probe, FlushDecompress::Finish);
            if !probe.is_empty() {
                return Err(size_mismatch(expected));
            }
            status
        }
        .map_err(|e| ReadError::Decompression(e.to_string()))?;

        if out.len() > target {
            return Err(size_mismatch(expected));
        }
        if matches!(status, Status::StreamEnd) {
            break;
        }
        if (inflater.total_in(), inflater.total_out()) == before {
            return Err(ReadError::Truncated("compressed stream"));
        }
    }
    if out.len() != target {
        return Err(size_mismatch(expected));
    }
    Ok(inflater.total_in() as usize)
}

/// Sequential reader over back-to-back streams
#[derive(Debug)]
pub struct StreamReader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> StreamReader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Uncompressed varint stored between two streams
    pub fn u32(&mut self) -> Result<u32, ReadError> {
        varint::decode_u32(self.input, &mut self.pos)
    }

    /// Inflate the next stream, which must hold exactly `expected` bytes
    pub fn next_stream(&mut self, expected: usize) -> Result<Vec<u8>, ReadError> {
        let mut out = Vec::new();
        self.next_into(&mut out, expected)?;
        Ok(out)
    }

    /// Like [`StreamReader::next_stream`], appending to a preallocated buffer
    pub fn next_into(&mut self, out: &mut Vec<u8>, expected: usize) -> Result<(), ReadError> {
        if self.is_empty() {
            return Err(ReadError::Truncated("compressed stream"));
        }
        self.pos += inflate_into(&self.input[self.pos..], out, expected)?;
        Ok(())
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.input.len()
    }
}
