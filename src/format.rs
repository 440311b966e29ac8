// SPDX-License-Identifier: MIT
//! Persisted file format: header and structure tokens
//!
//! ```text
//! file      := run+
//! run       := u32(len) zlib([header] run-head) zlib(dictionary)* zlib(container)*
//! header    := signed(ws_ignored, MAGIC) u32(n) bytes(options)ⁿ
//! run-head  := u32(total) layout label-delta enum-global small-dictionaries
//!              small-containers
//! ```
//!
//! `header` only appears in the first run. `len` is the uncompressed size of
//! the run head stream; the large dictionaries and containers that follow it
//! are sized by the layout.

use crate::container::{Container, InputContainer};
use crate::reader::ReadError;
use crate::varint::{self, ByteReader, MAX_MAGNITUDE};

/// Stored with the sign bit set when leaf whitespace was dropped
pub const MAGIC: u32 = 0x5e3d29e;

const END: u32 = 0;
const EMPTY_END: u32 = 1;
const WHITESPACE: u32 = 2;
const ATTRIBUTE_WHITESPACE: u32 = 3;
const SPECIAL: u32 = 4;
const LABEL_BASE: u32 = 5;

/// Largest label index a start token can carry
pub const MAX_LABEL_INDEX: u32 = MAX_MAGNITUDE - LABEL_BASE;

/// One entry of the structure container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// Closes the innermost element or attribute
    End,
    /// Closes an element written as `<a/>`
    EmptyEnd,
    /// Next entry of the whitespace container
    Whitespace,
    /// Whitespace before an attribute, from the whitespace container
    AttributeWhitespace,
    /// Next entry of the special container
    Special,
    /// Opens the element or attribute with this label index
    Start(u32),
    /// Text value stored in this container block
    Text(u32),
}

impl Token {
    pub fn store(self, out: &mut Container) {
        match self {
            Token::End => out.put_signed(false, END),
            Token::EmptyEnd => out.put_signed(false, EMPTY_END),
            Token::Whitespace => out.put_signed(false, WHITESPACE),
            Token::AttributeWhitespace => out.put_signed(false, ATTRIBUTE_WHITESPACE),
            Token::Special => out.put_signed(false, SPECIAL),
            Token::Start(label) => out.put_signed(false, label + LABEL_BASE),
            Token::Text(block) => out.put_signed(true, block),
        }
    }

    pub fn load(input: &mut InputContainer) -> Result<Self, ReadError> {
        let token = match input.signed()? {
            (true, 0) => return Err(ReadError::Corrupt("text token without block".into())),
            (true, block) => Token::Text(block),
            (false, END) => Token::End,
            (false, EMPTY_END) => Token::EmptyEnd,
            (false, WHITESPACE) => Token::Whitespace,
            (false, ATTRIBUTE_WHITESPACE) => Token::AttributeWhitespace,
            (false, SPECIAL) => Token::Special,
            (false, value) => Token::Start(value - LABEL_BASE),
        };
        Ok(token)
    }
}

/// File header, written once at the start of the first run stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Whitespace-only text was dropped during compression
    pub whitespace_ignored: bool,
    /// `=>` options of every path expression, in registration order
    pub options: Vec<String>,
}

impl FileHeader {
    pub fn store(&self, out: &mut Vec<u8>) {
        varint::put_signed(out, self.whitespace_ignored, MAGIC);
        varint::put_u32(out, self.options.len() as u32);
        for options in &self.options {
            varint::put_bytes(out, options.as_bytes());
        }
    }

    pub fn load(input: &mut ByteReader<'_>) -> Result<Self, ReadError> {
        let (whitespace_ignored, magic) = input.signed().map_err(|_| ReadError::InvalidFormat)?;
        if magic != MAGIC {
            return Err(ReadError::InvalidFormat);
        }
        let count = input.u32()? as usize;
        if count > input.remaining() {
            return Err(ReadError::Truncated("file header"));
        }
        let options = (0..count)
            .map(|_| {
                let bytes = input.bytes()?;
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| ReadError::Corrupt("path options are not UTF-8".into()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            whitespace_ignored,
            options,
        })
    }
}
