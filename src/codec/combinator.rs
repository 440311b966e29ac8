// SPDX-License-Identifier: MIT
//! `seq`, `seqcomb` and `rep`

use std::fmt;

use super::{write_quoted, Codec, CodecError, CodecProps, CodecState, EnumDictionaries, EnumTable};
use crate::container::{Container, InputContainer};
use crate::reader::ReadError;
use crate::varint::MAX_UNSIGNED;

/// One codec of a sequence and the separator that follows its piece
#[derive(Debug, Clone)]
pub struct SeqItem {
    pub codec: Codec,
    pub separator: Option<Vec<u8>>,
}

/// Text split on literal separators, one codec per piece
#[derive(Debug, Clone)]
pub struct Seq {
    pub leading: Vec<u8>,
    pub items: Vec<SeqItem>,
    /// `seqcomb`: all items write into the same containers
    pub combined: bool,
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from);
    }
    let last = haystack.len().checked_sub(needle.len())?;
    (from..=last).find(|&pos| &haystack[pos..pos + needle.len()] == needle)
}

impl Seq {
    pub fn props(&self) -> CodecProps {
        let mut props = CodecProps {
            containers: 0,
            state_size: 0,
            rejecting: !self.leading.is_empty(),
            can_overlap: true,
            fixed_len: true,
        };
        for item in &self.items {
            let p = item.codec.props();
            props.containers = if self.combined {
                props.containers.max(p.containers)
            } else {
                props.containers + p.containers
            };
            props.state_size += p.state_size;
            props.rejecting |= p.rejecting || item.separator.as_ref().is_some_and(|s| !s.is_empty());
            props.can_overlap &= p.can_overlap;
            props.fixed_len &= p.fixed_len;
        }
        props
    }

    /// Cut `text` into one piece per item
    ///
    /// Each separator matches at its first occurrence after the previous
    /// piece. A separator after the last item must end the text.
    pub fn split<'t>(&self, text: &'t [u8]) -> Option<Vec<&'t [u8]>> {
        let mut pos = self.leading.len();
        if !text.starts_with(&self.leading) {
            return None;
        }
        let mut pieces = Vec::with_capacity(self.items.len());
        let (last, init) = self.items.split_last()?;
        for item in init {
            let separator = item.separator.as_deref().unwrap_or_default();
            let at = find(text, separator, pos)?;
            pieces.push(&text[pos..at]);
            pos = at + separator.len();
        }
        let end = match &last.separator {
            Some(separator) => {
                if !text[pos..].ends_with(separator) {
                    return None;
                }
                text.len() - separator.len()
            }
            None => text.len(),
        };
        pieces.push(&text[pos..end]);
        Some(pieces)
    }

    pub fn parse(&self, text: &[u8]) -> bool {
        self.split(text).is_some_and(|pieces| {
            pieces
                .iter()
                .zip(&self.items)
                .all(|(piece, item)| item.codec.parse(piece))
        })
    }

    fn widths(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let combined = self.combined;
        self.items.iter().scan(0, move |offset, item| {
            let width = item.codec.props().containers;
            let start = if combined { 0 } else { *offset };
            *offset += width;
            Some((start, width))
        })
    }

    pub(super) fn compress(
        &self,
        text: &[u8],
        containers: &mut [Container],
        states: &mut [CodecState],
        enums: &mut EnumTable,
    ) -> Result<(), CodecError> {
        let pieces = self.split(text).ok_or_else(|| CodecError::Rejected {
            codec: self.to_string(),
            value: String::from_utf8_lossy(text).into_owned(),
        })?;
        for (((piece, item), state), (start, width)) in pieces
            .into_iter()
            .zip(&self.items)
            .zip(states.iter_mut())
            .zip(self.widths())
        {
            item.codec
                .compress(piece, &mut containers[start..start + width], state, enums)?;
        }
        Ok(())
    }

    pub(super) fn finish(&self, containers: &mut [Container], states: &mut [CodecState]) {
        for ((item, state), (start, width)) in
            self.items.iter().zip(states.iter_mut()).zip(self.widths())
        {
            item.codec.finish(&mut containers[start..start + width], state);
        }
    }

    pub(super) fn decode(
        &self,
        containers: &mut [InputContainer],
        states: &mut [CodecState],
        enums: &EnumDictionaries,
        out: &mut Vec<u8>,
    ) -> Result<(), ReadError> {
        out.extend_from_slice(&self.leading);
        for ((item, state), (start, width)) in
            self.items.iter().zip(states.iter_mut()).zip(self.widths())
        {
            item.codec
                .decode(&mut containers[start..start + width], state, enums, out)?;
            if let Some(separator) = &item.separator {
                out.extend_from_slice(separator);
            }
        }
        Ok(())
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.combined { "seqcomb(" } else { "seq(" })?;
        if !self.leading.is_empty() {
            write_quoted(f, &self.leading)?;
            f.write_str(" ")?;
        }
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            item.codec.fmt(f)?;
            if let Some(separator) = &item.separator {
                f.write_str(" ")?;
                write_quoted(f, separator)?;
            }
        }
        f.write_str(")")
    }
}

/// Delimiter-separated repetitions of one codec, with an optional tail
#[derive(Debug, Clone)]
pub struct Rep {
    pub delimiter: Vec<u8>,
    pub item: Box<Codec>,
    pub tail: Option<Box<Codec>>,
}

impl Rep {
    pub fn props(&self) -> CodecProps {
        let item = self.item.props();
        let mut props = CodecProps {
            containers: 1 + item.containers,
            state_size: item.state_size,
            rejecting: item.rejecting,
            can_overlap: item.can_overlap,
            fixed_len: false,
        };
        if let Some(tail) = &self.tail {
            let tail = tail.props();
            props.containers += tail.containers;
            props.state_size += tail.state_size;
            props.rejecting |= tail.rejecting;
            props.can_overlap &= tail.can_overlap;
        }
        props
    }

    /// Delimiter-separated pieces; there is always at least one
    pub fn pieces<'t>(&self, text: &'t [u8]) -> Vec<&'t [u8]> {
        let mut pieces = Vec::new();
        let mut pos = 0;
        if self.delimiter.is_empty() {
            return vec![text];
        }
        while let Some(at) = find(text, &self.delimiter, pos) {
            pieces.push(&text[pos..at]);
            pos = at + self.delimiter.len();
        }
        pieces.push(&text[pos..]);
        pieces
    }

    /// Pieces for the item codec and the piece for the tail codec
    fn assign<'p, 't>(&self, pieces: &'p [&'t [u8]]) -> (&'p [&'t [u8]], Option<&'t [u8]>) {
        match (&self.tail, pieces.split_last()) {
            (Some(_), Some((last, init))) => (init, Some(*last)),
            _ => (pieces, None),
        }
    }

    pub fn parse(&self, text: &[u8]) -> bool {
        let pieces = self.pieces(text);
        if pieces.len() - 1 > MAX_UNSIGNED as usize {
            return false;
        }
        let (items, tail) = self.assign(&pieces);
        items.iter().all(|piece| self.item.parse(piece))
            && match (&self.tail, tail) {
                (Some(codec), Some(piece)) => codec.parse(piece),
                _ => true,
            }
    }

    pub(super) fn compress(
        &self,
        text: &[u8],
        containers: &mut [Container],
        states: &mut [CodecState],
        enums: &mut EnumTable,
    ) -> Result<(), CodecError> {
        let pieces = self.pieces(text);
        containers[0].put_u32((pieces.len() - 1) as u32);
        let (items, tail) = self.assign(&pieces);
        let width = self.item.props().containers;
        let (item_containers, tail_containers) = containers[1..].split_at_mut(width);
        let (item_state, tail_state) = states.split_at_mut(1);
        for piece in items {
            self.item.compress(piece, item_containers, &mut item_state[0], enums)?;
        }
        if let (Some(codec), Some(piece)) = (&self.tail, tail) {
            codec.compress(piece, tail_containers, &mut tail_state[0], enums)?;
        }
        Ok(())
    }

    pub(super) fn finish(&self, containers: &mut [Container], states: &mut [CodecState]) {
        let width = self.item.props().containers;
        let (item_containers, tail_containers) = containers[1..].split_at_mut(width);
        let (item_state, tail_state) = states.split_at_mut(1);
        self.item.finish(item_containers, &mut item_state[0]);
        if let Some(codec) = &self.tail {
            codec.finish(tail_containers, &mut tail_state[0]);
        }
    }

    pub(super) fn decode(
        &self,
        containers: &mut [InputContainer],
        states: &mut [CodecState],
        enums: &EnumDictionaries,
        out: &mut Vec<u8>,
    ) -> Result<(), ReadError> {
        let (count, rest) = containers.split_at_mut(1);
        let count = count[0].u32()?;
        let width = self.item.props().containers;
        let (item_containers, tail_containers) = rest.split_at_mut(width);
        let (item_state, tail_state) = states.split_at_mut(1);
        match &self.tail {
            Some(codec) => {
                for _ in 0..count {
                    self.item.decode(item_containers, &mut item_state[0], enums, out)?;
                    out.extend_from_slice(&self.delimiter);
                }
                codec.decode(tail_containers, &mut tail_state[0], enums, out)?;
            }
            None => {
                for i in 0..=count {
                    if i > 0 {
                        out.extend_from_slice(&self.delimiter);
                    }
                    self.item.decode(item_containers, &mut item_state[0], enums, out)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Rep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("rep(")?;
        write_quoted(f, &self.delimiter)?;
        write!(f, ", {}", self.item)?;
        if let Some(tail) = &self.tail {
            write!(f, ", {}", tail)?;
        }
        f.write_str(")")
    }
}
