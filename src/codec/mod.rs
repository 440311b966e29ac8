// SPDX-License-Identifier: MIT
//! Per-leaf codecs and their combinators
//!
//! A [`Codec`] is built once from a description such as `seq(u "." u)` by the
//! [`CodecRegistry`]. Every container block that uses it gets its own
//! [`CodecState`] from [`Codec::init_state`]; the codec itself stays
//! immutable and is shared by all blocks of its path expression.

mod combinator;
mod enumerate;
mod number;
mod registry;
mod runlength;

use std::fmt;
use std::sync::Arc;

pub use combinator::{Rep, Seq, SeqItem};
pub use enumerate::{DictionaryShape, EnumDictionaries, EnumTable};
pub use registry::{CodecRegistry, FactoryInfo};
pub use runlength::{ChunkList, RunState};

use crate::container::{Container, InputContainer};
use crate::reader::ReadError;

/// Errors raised while building or running a codec
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Compressor '{0}' is not defined")]
    Unknown(String),

    #[error("Invalid compressor description '{text}': {reason}")]
    Syntax { text: String, reason: String },

    #[error("Invalid parameters for compressor '{codec}': {reason}")]
    Parameter { codec: String, reason: String },

    #[error("Compressor '{0}' is already defined")]
    Duplicate(String),

    #[error("Compressor '{codec}' rejected value '{value}'")]
    Rejected { codec: String, value: String },

    #[error("Codec state does not match compressor '{0}'")]
    StateMismatch(String),
}

impl CodecError {
    pub(crate) fn rejected(codec: &Codec, text: &[u8]) -> Self {
        CodecError::Rejected {
            codec: codec.to_string(),
            value: String::from_utf8_lossy(text).into_owned(),
        }
    }

    fn state(codec: &Codec) -> Self {
        CodecError::StateMismatch(codec.to_string())
    }
}

/// Static properties a codec declares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecProps {
    /// Containers the codec writes to
    pub containers: usize,
    /// Bytes of private per-block state
    pub state_size: usize,
    /// Whether `parse` can return false
    pub rejecting: bool,
    /// Whether the codec may share its containers with a sibling
    pub can_overlap: bool,
    /// Whether every value has the same encoded length
    pub fixed_len: bool,
}

impl CodecProps {
    const fn leaf(containers: usize, rejecting: bool) -> Self {
        Self {
            containers,
            state_size: 0,
            rejecting,
            can_overlap: true,
            fixed_len: false,
        }
    }
}

/// User-supplied stateless codec
pub trait CustomCodec: fmt::Debug + Send + Sync {
    /// Description shown when the codec is printed
    fn description(&self) -> String;

    fn containers(&self) -> usize {
        1
    }

    fn rejecting(&self) -> bool {
        false
    }

    fn parse(&self, _text: &[u8]) -> bool {
        true
    }

    fn compress(&self, text: &[u8], containers: &mut [Container]) -> Result<(), CodecError>;

    fn decode(&self, containers: &mut [InputContainer], out: &mut Vec<u8>) -> Result<(), ReadError>;
}

/// A compiled codec description
#[derive(Debug, Clone)]
pub enum Codec {
    /// `t`: the bytes as they are
    Text,
    /// `u`
    Unsigned { min_digits: u8 },
    /// `u8`
    Byte { min_digits: u8 },
    /// `i`
    Signed { min_digits: u8 },
    /// `di`
    Delta { min_digits: u8 },
    /// `"literal"`: accepts exactly this text and stores nothing
    Constant(Vec<u8>),
    /// `e`
    Enum,
    /// `rl`
    RunLength,
    /// `seq` and `seqcomb`
    Seq(Seq),
    /// `or`
    Or(Vec<Codec>),
    /// `rep`
    Rep(Rep),
    Custom(Arc<dyn CustomCodec>),
}

/// Mutable per-block state of a codec
#[derive(Debug, Clone)]
pub enum CodecState {
    Stateless,
    Delta { previous: i64 },
    Enum { instance: u32 },
    RunLength(RunState),
    Group(Vec<CodecState>),
}

impl CodecState {
    fn group(&mut self) -> Option<&mut [CodecState]> {
        match self {
            CodecState::Group(states) => Some(states),
            _ => None,
        }
    }
}

impl Codec {
    pub fn props(&self) -> CodecProps {
        match self {
            Codec::Text => CodecProps::leaf(1, false),
            Codec::Unsigned { .. } | Codec::Signed { .. } => CodecProps::leaf(1, true),
            Codec::Byte { .. } => CodecProps {
                fixed_len: true,
                ..CodecProps::leaf(1, true)
            },
            Codec::Delta { .. } => CodecProps {
                state_size: std::mem::size_of::<i64>(),
                ..CodecProps::leaf(1, true)
            },
            Codec::Constant(_) => CodecProps {
                fixed_len: true,
                ..CodecProps::leaf(0, true)
            },
            Codec::Enum => CodecProps {
                state_size: std::mem::size_of::<u32>(),
                ..CodecProps::leaf(1, false)
            },
            Codec::RunLength => CodecProps {
                state_size: std::mem::size_of::<RunState>(),
                can_overlap: false,
                ..CodecProps::leaf(1, false)
            },
            Codec::Seq(seq) => seq.props(),
            Codec::Or(children) => {
                let mut props = CodecProps::leaf(1, true);
                for child in children {
                    let p = child.props();
                    props.containers += p.containers;
                    props.state_size += p.state_size;
                    props.rejecting &= p.rejecting;
                    props.can_overlap &= p.can_overlap;
                }
                props
            }
            Codec::Rep(rep) => rep.props(),
            Codec::Custom(custom) => CodecProps::leaf(custom.containers(), custom.rejecting()),
        }
    }

    /// Whether the codec can represent `text`
    pub fn parse(&self, text: &[u8]) -> bool {
        match self {
            Codec::Text | Codec::Enum | Codec::RunLength => true,
            Codec::Unsigned { min_digits } => {
                number::parse_unsigned(text, *min_digits, number::UNSIGNED_MAX).is_some()
            }
            Codec::Byte { min_digits } => {
                number::parse_unsigned(text, *min_digits, number::BYTE_MAX).is_some()
            }
            Codec::Signed { min_digits } => {
                number::parse_signed(text, *min_digits, number::SIGNED_MAX).is_some()
            }
            Codec::Delta { min_digits } => parse_delta(text, *min_digits).is_some(),
            Codec::Constant(value) => value.as_slice() == text,
            Codec::Seq(seq) => seq.parse(text),
            Codec::Or(children) => children.iter().any(|c| c.parse(text)),
            Codec::Rep(rep) => rep.parse(text),
            Codec::Custom(custom) => custom.parse(text),
        }
    }

    /// Fresh state for a new container block; `next_enum` numbers `e` instances
    pub fn init_state(&self, next_enum: &mut u32) -> CodecState {
        match self {
            Codec::Delta { .. } => CodecState::Delta { previous: 0 },
            Codec::Enum => {
                let instance = *next_enum;
                *next_enum += 1;
                CodecState::Enum { instance }
            }
            Codec::RunLength => CodecState::RunLength(RunState::new()),
            Codec::Seq(seq) => CodecState::Group(
                seq.items
                    .iter()
                    .map(|item| item.codec.init_state(next_enum))
                    .collect(),
            ),
            Codec::Or(children) => {
                CodecState::Group(children.iter().map(|c| c.init_state(next_enum)).collect())
            }
            Codec::Rep(rep) => {
                let mut states = vec![rep.item.init_state(next_enum)];
                if let Some(tail) = &rep.tail {
                    states.push(tail.init_state(next_enum));
                }
                CodecState::Group(states)
            }
            _ => CodecState::Stateless,
        }
    }

    /// Store `text`, which must have been accepted by [`Codec::parse`]
    pub fn compress(
        &self,
        text: &[u8],
        containers: &mut [Container],
        state: &mut CodecState,
        enums: &mut EnumTable,
    ) -> Result<(), CodecError> {
        match self {
            Codec::Text => containers[0].put_bytes(text),
            Codec::Unsigned { min_digits } => {
                let value = number::parse_unsigned(text, *min_digits, number::UNSIGNED_MAX)
                    .ok_or_else(|| CodecError::rejected(self, text))?;
                containers[0].put_u32(value as u32);
            }
            Codec::Byte { min_digits } => {
                let value = number::parse_unsigned(text, *min_digits, number::BYTE_MAX)
                    .ok_or_else(|| CodecError::rejected(self, text))?;
                containers[0].push(value as u8);
            }
            Codec::Signed { min_digits } => {
                let (negative, magnitude) =
                    number::parse_signed(text, *min_digits, number::SIGNED_MAX)
                        .ok_or_else(|| CodecError::rejected(self, text))?;
                containers[0].put_signed(negative, magnitude as u32);
            }
            Codec::Delta { min_digits } => {
                let value =
                    parse_delta(text, *min_digits).ok_or_else(|| CodecError::rejected(self, text))?;
                let CodecState::Delta { previous } = state else {
                    return Err(CodecError::state(self));
                };
                let delta = value - *previous;
                containers[0].put_signed(delta < 0, delta.unsigned_abs() as u32);
                *previous = value;
            }
            Codec::Constant(value) => {
                if value.as_slice() != text {
                    return Err(CodecError::rejected(self, text));
                }
            }
            Codec::Enum => {
                let CodecState::Enum { instance } = state else {
                    return Err(CodecError::state(self));
                };
                let index = enums.lookup(*instance, text);
                containers[0].put_u32(index);
            }
            Codec::RunLength => {
                let CodecState::RunLength(run) = state else {
                    return Err(CodecError::state(self));
                };
                run.compress(text, &mut containers[0]);
            }
            Codec::Seq(seq) => {
                let states = state.group().ok_or_else(|| CodecError::state(self))?;
                seq.compress(text, containers, states, enums)?;
            }
            Codec::Or(children) => {
                let states = state.group().ok_or_else(|| CodecError::state(self))?;
                let chosen = children
                    .iter()
                    .position(|c| c.parse(text))
                    .ok_or_else(|| CodecError::rejected(self, text))?;
                let (index, rest) = containers.split_at_mut(1);
                index[0].put_u32(chosen as u32);
                let offset: usize = children[..chosen].iter().map(|c| c.props().containers).sum();
                let width = children[chosen].props().containers;
                children[chosen].compress(
                    text,
                    &mut rest[offset..offset + width],
                    &mut states[chosen],
                    enums,
                )?;
            }
            Codec::Rep(rep) => {
                let states = state.group().ok_or_else(|| CodecError::state(self))?;
                rep.compress(text, containers, states, enums)?;
            }
            Codec::Custom(custom) => custom.compress(text, containers)?,
        }
        Ok(())
    }

    /// Flush buffered output at the end of a run block
    pub fn finish(&self, containers: &mut [Container], state: &mut CodecState) {
        match (self, state) {
            (Codec::RunLength, CodecState::RunLength(run)) => run.flush(&mut containers[0]),
            (Codec::Seq(seq), CodecState::Group(states)) => seq.finish(containers, states),
            (Codec::Or(children), CodecState::Group(states)) => {
                let mut offset = 1;
                for (child, state) in children.iter().zip(states.iter_mut()) {
                    let width = child.props().containers;
                    child.finish(&mut containers[offset..offset + width], state);
                    offset += width;
                }
            }
            (Codec::Rep(rep), CodecState::Group(states)) => rep.finish(containers, states),
            _ => {}
        }
    }

    /// Append the next value stored in `containers` to `out`
    pub fn decode(
        &self,
        containers: &mut [InputContainer],
        state: &mut CodecState,
        enums: &EnumDictionaries,
        out: &mut Vec<u8>,
    ) -> Result<(), ReadError> {
        match self {
            Codec::Text => {
                let value = containers[0].bytes()?;
                out.extend_from_slice(value);
            }
            Codec::Unsigned { min_digits } => {
                let value = containers[0].u32()?;
                number::write_decimal(out, false, value as u64, *min_digits);
            }
            Codec::Byte { min_digits } => {
                let value = containers[0].byte()?;
                number::write_decimal(out, false, value as u64, *min_digits);
            }
            Codec::Signed { min_digits } => {
                let (negative, magnitude) = containers[0].signed()?;
                number::write_decimal(out, negative, magnitude as u64, *min_digits);
            }
            Codec::Delta { min_digits } => {
                let CodecState::Delta { previous } = state else {
                    return Err(CodecError::state(self).into());
                };
                let (negative, magnitude) = containers[0].signed()?;
                let delta = if negative { -(magnitude as i64) } else { magnitude as i64 };
                let value = *previous + delta;
                *previous = value;
                number::write_decimal(out, value < 0, value.unsigned_abs(), *min_digits);
            }
            Codec::Constant(value) => out.extend_from_slice(value),
            Codec::Enum => {
                let CodecState::Enum { instance } = state else {
                    return Err(CodecError::state(self).into());
                };
                let index = containers[0].u32()?;
                out.extend_from_slice(enums.get(*instance, index)?);
            }
            Codec::RunLength => {
                let CodecState::RunLength(run) = state else {
                    return Err(CodecError::state(self).into());
                };
                run.decode(&mut containers[0], out)?;
            }
            Codec::Seq(seq) => {
                let states = state.group().ok_or_else(|| CodecError::state(self))?;
                seq.decode(containers, states, enums, out)?;
            }
            Codec::Or(children) => {
                let states = state.group().ok_or_else(|| CodecError::state(self))?;
                let (index, rest) = containers.split_at_mut(1);
                let chosen = index[0].u32()? as usize;
                let child = children.get(chosen).ok_or_else(|| {
                    ReadError::Corrupt(format!("variant {} out of range for '{}'", chosen, self))
                })?;
                let offset: usize = children[..chosen].iter().map(|c| c.props().containers).sum();
                let width = child.props().containers;
                child.decode(&mut rest[offset..offset + width], &mut states[chosen], enums, out)?;
            }
            Codec::Rep(rep) => {
                let states = state.group().ok_or_else(|| CodecError::state(self))?;
                rep.decode(containers, states, enums, out)?;
            }
            Codec::Custom(custom) => custom.decode(containers, out)?,
        }
        Ok(())
    }
}

/// `di` values: like `i` but narrower, and without a negative zero
fn parse_delta(text: &[u8], min_digits: u8) -> Option<i64> {
    match number::parse_signed(text, min_digits, number::DELTA_MAX)? {
        (true, 0) => None,
        (true, magnitude) => Some(-(magnitude as i64)),
        (false, magnitude) => Some(magnitude as i64),
    }
}

/// Quote a literal the way the description syntax expects it
pub(crate) fn write_quoted(f: &mut fmt::Formatter<'_>, value: &[u8]) -> fmt::Result {
    f.write_str("\"")?;
    for ch in String::from_utf8_lossy(value).chars() {
        match ch {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            _ => write!(f, "{}", ch)?,
        }
    }
    f.write_str("\"")
}

fn write_digits(f: &mut fmt::Formatter<'_>, name: &str, min_digits: u8) -> fmt::Result {
    if min_digits == 0 {
        f.write_str(name)
    } else {
        write!(f, "{}({})", name, min_digits)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Text => f.write_str("t"),
            Codec::Unsigned { min_digits } => write_digits(f, "u", *min_digits),
            Codec::Byte { min_digits } => write_digits(f, "u8", *min_digits),
            Codec::Signed { min_digits } => write_digits(f, "i", *min_digits),
            Codec::Delta { min_digits } => write_digits(f, "di", *min_digits),
            Codec::Constant(value) => write_quoted(f, value),
            Codec::Enum => f.write_str("e"),
            Codec::RunLength => f.write_str("rl"),
            Codec::Seq(seq) => seq.fmt(f),
            Codec::Or(children) => {
                f.write_str("or(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    child.fmt(f)?;
                }
                f.write_str(")")
            }
            Codec::Rep(rep) => rep.fmt(f),
            Codec::Custom(custom) => f.write_str(&custom.description()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(codec: &Codec, values: &[&[u8]]) -> Vec<Vec<u8>> {
        let props = codec.props();
        let mut next = 0;
        let mut state = codec.init_state(&mut next);
        let mut containers = vec![Container::new(); props.containers];
        let mut enums = EnumTable::new();
        for value in values {
            assert!(codec.parse(value), "{} rejected {:?}", codec, value);
            codec.compress(value, &mut containers, &mut state, &mut enums).unwrap();
        }
        codec.finish(&mut containers, &mut state);

        let mut dictionaries = EnumDictionaries::new();
        let mut global = Vec::new();
        enums.store_global(next, &mut global);
        let mut input = crate::varint::ByteReader::new(&global);
        let shapes = EnumDictionaries::load_shapes(&mut input).unwrap();
        let large: Vec<&[u8]> = enums.large_dictionaries(next).collect();
        let mut large = large.into_iter();
        for shape in shapes {
            let data = if (shape.size as usize) < crate::container::SMALL_THRESHOLD {
                input.raw(shape.size as usize).unwrap()
            } else {
                large.next().unwrap()
            };
            dictionaries.push(shape, data).unwrap();
        }

        let mut inputs: Vec<InputContainer> = containers
            .iter()
            .map(|c| InputContainer::new(c.as_slice().to_vec()))
            .collect();
        let mut next = 0;
        let mut state = codec.init_state(&mut next);
        let decoded = values
            .iter()
            .map(|_| {
                let mut out = Vec::new();
                codec.decode(&mut inputs, &mut state, &dictionaries, &mut out).unwrap();
                out
            })
            .collect();
        assert!(inputs.iter().all(InputContainer::is_exhausted));
        decoded
    }

    fn assert_round_trip(codec: &Codec, values: &[&[u8]]) {
        let decoded = round_trip(codec, values);
        let expected: Vec<Vec<u8>> = values.iter().map(|v| v.to_vec()).collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_unsigned_container_bytes() {
        let codec = Codec::Unsigned { min_digits: 0 };
        let mut state = codec.init_state(&mut 0);
        let mut containers = vec![Container::new()];
        let mut enums = EnumTable::new();
        codec.compress(b"42", &mut containers, &mut state, &mut enums).unwrap();
        codec.compress(b"7", &mut containers, &mut state, &mut enums).unwrap();
        assert_eq!(containers[0].as_slice(), &[42, 7]);
        assert_round_trip(&codec, &[b"42", b"7", b"1000000"]);
    }

    #[test]
    fn test_integer_codecs() {
        assert_round_trip(&Codec::Byte { min_digits: 2 }, &[b"07", b"255", b"00"]);
        assert_round_trip(&Codec::Signed { min_digits: 0 }, &[b"-5", b"-0", b"12345678"]);
        assert_round_trip(&Codec::Delta { min_digits: 0 }, &[b"100", b"98", b"-3", b"250000"]);
        assert!(!Codec::Delta { min_digits: 0 }.parse(b"-0"));
        assert!(!Codec::Byte { min_digits: 0 }.parse(b"256"));
    }

    #[test]
    fn test_delta_stores_differences() {
        let codec = Codec::Delta { min_digits: 0 };
        let mut state = codec.init_state(&mut 0);
        let mut containers = vec![Container::new()];
        let mut enums = EnumTable::new();
        for value in [b"10", b"12", b"11"] {
            codec.compress(value, &mut containers, &mut state, &mut enums).unwrap();
        }
        assert_eq!(containers[0].as_slice(), &[10, 2, 0x41]);
    }

    #[test]
    fn test_constant_and_text() {
        let constant = Codec::Constant(b"yes".to_vec());
        assert_eq!(constant.props().containers, 0);
        assert!(!constant.parse(b"no"));
        assert_round_trip(&constant, &[b"yes", b"yes"]);
        assert_round_trip(&Codec::Text, &[b"hello", b"", b"world"]);
    }

    #[test]
    fn test_enum_same_string_same_index() {
        let codec = Codec::Enum;
        let mut next = 0;
        let mut state = codec.init_state(&mut next);
        let mut containers = vec![Container::new()];
        let mut enums = EnumTable::new();
        for value in [b"red".as_slice(), b"blue", b"red", b"blue", b"green"] {
            codec.compress(value, &mut containers, &mut state, &mut enums).unwrap();
        }
        assert_eq!(containers[0].as_slice(), &[0, 1, 0, 1, 2]);
        assert_round_trip(&codec, &[b"red", b"blue", b"red", b"green"]);
    }

    #[test]
    fn test_run_length_scenario() {
        let codec = Codec::RunLength;
        let mut state = codec.init_state(&mut 0);
        let mut containers = vec![Container::new()];
        let mut enums = EnumTable::new();
        for _ in 0..5 {
            codec.compress(b"x", &mut containers, &mut state, &mut enums).unwrap();
        }
        codec.finish(&mut containers, &mut state);
        assert_eq!(containers[0].as_slice(), &[1, b'x', 4]);
        assert_round_trip(&codec, &[b"x", b"x", b"x", b"x", b"x"]);
    }

    #[test]
    fn test_or_picks_first_accepting() {
        let codec = Codec::Or(vec![Codec::Unsigned { min_digits: 0 }, Codec::Text]);
        assert_eq!(codec.props().containers, 3);
        assert!(!codec.props().rejecting);
        let mut state = codec.init_state(&mut 0);
        let mut containers = vec![Container::new(); 3];
        let mut enums = EnumTable::new();
        codec.compress(b"12", &mut containers, &mut state, &mut enums).unwrap();
        codec.compress(b"n/a", &mut containers, &mut state, &mut enums).unwrap();
        assert_eq!(containers[0].as_slice(), &[0, 1]);
        assert_eq!(containers[1].as_slice(), &[12]);
        assert_round_trip(&codec, &[b"12", b"n/a", b"007", b"3"]);
    }

    #[test]
    fn test_state_mismatch_is_an_error() {
        let codec = Codec::Delta { min_digits: 0 };
        let mut containers = vec![Container::new()];
        let result = codec.compress(
            b"1",
            &mut containers,
            &mut CodecState::Stateless,
            &mut EnumTable::new(),
        );
        assert!(matches!(result, Err(CodecError::StateMismatch(_))));
    }

    #[test]
    fn test_display() {
        let codec = Codec::Or(vec![
            Codec::Unsigned { min_digits: 4 },
            Codec::Constant(b"a\"b".to_vec()),
            Codec::Enum,
        ]);
        assert_eq!(codec.to_string(), r#"or(u(4), "a\"b", e)"#);
    }
}
