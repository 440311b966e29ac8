// SPDX-License-Identifier: MIT
//! Named codec factories and the description parser
//!
//! ```text
//! description := '"' literal '"' | name [ '(' params ')' ]
//! params      := strings, numbers and nested descriptions,
//!                separated by whitespace or commas
//! ```

use std::fmt;
use std::sync::Arc;

use super::number::MAX_DIGITS;
use super::{Codec, CodecError, CustomCodec, Rep, Seq, SeqItem};

type CustomFactory =
    Arc<dyn Fn(Option<&str>) -> Result<Arc<dyn CustomCodec>, CodecError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Text,
    Unsigned,
    Byte,
    Signed,
    Delta,
    Enum,
    RunLength,
    Seq,
    SeqComb,
    Or,
    Rep,
}

const BUILTINS: [(&str, Builtin, &str); 11] = [
    ("t", Builtin::Text, "Plain text"),
    ("u", Builtin::Unsigned, "Unsigned integer below 2^30, u(n) pads to n digits"),
    ("u8", Builtin::Byte, "Unsigned integer below 256, stored in one byte"),
    ("i", Builtin::Signed, "Signed integer, i(n) pads to n digits"),
    ("di", Builtin::Delta, "Signed integer stored as difference to the previous value"),
    ("e", Builtin::Enum, "Enumeration: dictionary of distinct values"),
    ("rl", Builtin::RunLength, "Run-length encoder for repeated values"),
    ("seq", Builtin::Seq, "Sequence of compressors split by separator strings"),
    ("seqcomb", Builtin::SeqComb, "Sequence whose compressors share containers"),
    ("or", Builtin::Or, "First alternative that accepts the value"),
    ("rep", Builtin::Rep, "Repetitions split by a delimiter, with optional tail"),
];

#[derive(Clone)]
enum FactoryKind {
    Builtin(Builtin),
    Custom(CustomFactory),
}

/// Name and one-line description of a registered factory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryInfo {
    pub name: String,
    pub description: String,
}

/// Lookup table from codec names to factories
#[derive(Clone)]
pub struct CodecRegistry {
    factories: Vec<(FactoryInfo, FactoryKind)>,
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.factories.iter().map(|(info, _)| &info.name))
            .finish()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn syntax(text: &[u8], reason: impl Into<String>) -> CodecError {
    CodecError::Syntax {
        text: String::from_utf8_lossy(text).into_owned(),
        reason: reason.into(),
    }
}

fn is_name_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

fn is_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// Parse the quoted string starting at `text[start]`; returns the value and
/// the position after the closing quote
fn parse_quoted(text: &[u8], start: usize) -> Result<(Vec<u8>, usize), CodecError> {
    let mut value = Vec::new();
    let mut pos = start + 1;
    while let Some(&byte) = text.get(pos) {
        match byte {
            b'"' => return Ok((value, pos + 1)),
            b'\\' => {
                let escaped = *text
                    .get(pos + 1)
                    .ok_or_else(|| syntax(text, "unterminated string"))?;
                value.push(escaped);
                pos += 2;
            }
            _ => {
                value.push(byte);
                pos += 1;
            }
        }
    }
    Err(syntax(text, "unterminated string"))
}

/// Position of the parenthesis closing the one at `text[open]`
fn closing_paren(text: &[u8], open: usize) -> Result<usize, CodecError> {
    let mut depth = 0usize;
    let mut pos = open;
    while let Some(&byte) = text.get(pos) {
        match byte {
            b'"' => {
                pos = parse_quoted(text, pos)?.1;
                continue;
            }
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(pos);
                }
            }
            _ => {}
        }
        pos += 1;
    }
    Err(syntax(text, "missing closing parenthesis ')'"))
}

/// Cursor over the parameter list of one codec
struct Params<'a> {
    codec: &'a str,
    text: &'a [u8],
    pos: usize,
}

impl<'a> Params<'a> {
    fn new(codec: &'a str, text: &'a [u8]) -> Self {
        Self { codec, text, pos: 0 }
    }

    fn at_end(&mut self) -> bool {
        while matches!(self.text.get(self.pos), Some(b' ' | b'\t' | b'\r' | b'\n' | b',')) {
            self.pos += 1;
        }
        self.pos >= self.text.len()
    }

    fn string(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        if self.at_end() || self.text[self.pos] != b'"' {
            return Ok(None);
        }
        let (value, end) = parse_quoted(self.text, self.pos)?;
        self.pos = end;
        Ok(Some(value))
    }

    fn codec(&mut self, registry: &CodecRegistry) -> Result<Codec, CodecError> {
        if self.at_end() {
            return Err(self.error("compressor expected"));
        }
        let (codec, used) = registry.parse_prefix(&self.text[self.pos..])?;
        self.pos += used;
        Ok(codec)
    }

    fn error(&self, reason: impl Into<String>) -> CodecError {
        CodecError::Parameter {
            codec: self.codec.to_string(),
            reason: reason.into(),
        }
    }
}

impl CodecRegistry {
    /// Registry with the built-in codecs
    pub fn new() -> Self {
        let factories = BUILTINS
            .iter()
            .map(|&(name, builtin, description)| {
                (
                    FactoryInfo {
                        name: name.to_string(),
                        description: description.to_string(),
                    },
                    FactoryKind::Builtin(builtin),
                )
            })
            .collect();
        Self { factories }
    }

    /// Add a user codec; `factory` receives the raw text between the parentheses
    pub fn register_custom<F>(
        &mut self,
        name: &str,
        description: &str,
        factory: F,
    ) -> Result<(), CodecError>
    where
        F: Fn(Option<&str>) -> Result<Arc<dyn CustomCodec>, CodecError> + Send + Sync + 'static,
    {
        let valid = name.bytes().next().is_some_and(is_name_start) && name.bytes().all(is_name_char);
        if !valid {
            return Err(syntax(name.as_bytes(), "invalid compressor name"));
        }
        if self.factories.iter().any(|(info, _)| info.name == name) {
            return Err(CodecError::Duplicate(name.to_string()));
        }
        self.factories.push((
            FactoryInfo {
                name: name.to_string(),
                description: description.to_string(),
            },
            FactoryKind::Custom(Arc::new(factory)),
        ));
        Ok(())
    }

    /// Registered factories in registration order
    pub fn factories(&self) -> impl Iterator<Item = &FactoryInfo> {
        self.factories.iter().map(|(info, _)| info)
    }

    /// Parse a complete description
    pub fn parse(&self, text: &str) -> Result<Codec, CodecError> {
        let bytes = text.trim().as_bytes();
        let (codec, used) = self.parse_prefix(bytes)?;
        if used != bytes.len() {
            return Err(syntax(bytes, format!("unexpected characters after position {}", used)));
        }
        Ok(codec)
    }

    /// Parse the description at the start of `text`; returns the codec and
    /// the number of bytes it spans
    pub fn parse_prefix(&self, text: &[u8]) -> Result<(Codec, usize), CodecError> {
        match text.first() {
            Some(b'"') => {
                let (value, end) = parse_quoted(text, 0)?;
                Ok((Codec::Constant(value), end))
            }
            Some(&first) if is_name_start(first) => {
                let name_end = text
                    .iter()
                    .position(|&b| !is_name_char(b))
                    .unwrap_or(text.len());
                let name = String::from_utf8_lossy(&text[..name_end]);
                let (params, end) = if text.get(name_end) == Some(&b'(') {
                    let close = closing_paren(text, name_end)?;
                    (Some(&text[name_end + 1..close]), close + 1)
                } else {
                    (None, name_end)
                };
                Ok((self.instantiate(&name, params)?, end))
            }
            _ => Err(syntax(text, "compressor name or quoted string expected")),
        }
    }

    fn instantiate(&self, name: &str, params: Option<&[u8]>) -> Result<Codec, CodecError> {
        let (_, kind) = self
            .factories
            .iter()
            .find(|(info, _)| info.name == name)
            .ok_or_else(|| CodecError::Unknown(name.to_string()))?;
        match kind {
            FactoryKind::Builtin(builtin) => self.builtin(*builtin, name, params),
            FactoryKind::Custom(factory) => {
                let params = params
                    .map(std::str::from_utf8)
                    .transpose()
                    .map_err(|_| syntax(params.unwrap_or_default(), "parameters are not UTF-8"))?;
                Ok(Codec::Custom(factory(params)?))
            }
        }
    }

    fn builtin(&self, builtin: Builtin, name: &str, params: Option<&[u8]>) -> Result<Codec, CodecError> {
        let no_params = |codec: Codec| match params {
            Some(text) if !text.iter().all(u8::is_ascii_whitespace) => Err(CodecError::Parameter {
                codec: name.to_string(),
                reason: "no parameters expected".into(),
            }),
            _ => Ok(codec),
        };
        match builtin {
            Builtin::Text => no_params(Codec::Text),
            Builtin::Enum => no_params(Codec::Enum),
            Builtin::RunLength => no_params(Codec::RunLength),
            Builtin::Unsigned => Ok(Codec::Unsigned { min_digits: digits(name, params)? }),
            Builtin::Byte => Ok(Codec::Byte { min_digits: digits(name, params)? }),
            Builtin::Signed => Ok(Codec::Signed { min_digits: digits(name, params)? }),
            Builtin::Delta => Ok(Codec::Delta { min_digits: digits(name, params)? }),
            Builtin::Seq | Builtin::SeqComb => {
                let seq = self.seq(name, params, builtin == Builtin::SeqComb)?;
                Ok(Codec::Seq(seq))
            }
            Builtin::Or => {
                let mut p = Params::new(name, params.unwrap_or_default());
                let mut children = Vec::new();
                while !p.at_end() {
                    children.push(p.codec(self)?);
                }
                if children.is_empty() {
                    return Err(p.error("at least one alternative expected"));
                }
                Ok(Codec::Or(children))
            }
            Builtin::Rep => {
                let mut p = Params::new(name, params.unwrap_or_default());
                let delimiter = p
                    .string()?
                    .filter(|d| !d.is_empty())
                    .ok_or_else(|| p.error("first parameter must be a non-empty delimiter string"))?;
                let item = Box::new(p.codec(self)?);
                let tail = if p.at_end() {
                    None
                } else {
                    Some(Box::new(p.codec(self)?))
                };
                if !p.at_end() {
                    return Err(p.error("at most two compressors expected"));
                }
                Ok(Codec::Rep(Rep { delimiter, item, tail }))
            }
        }
    }

    fn seq(&self, name: &str, params: Option<&[u8]>, combined: bool) -> Result<Seq, CodecError> {
        let mut p = Params::new(name, params.unwrap_or_default());
        let leading = p.string()?.unwrap_or_default();
        let mut items = Vec::new();
        while !p.at_end() {
            let codec = p.codec(self)?;
            let separator = p.string()?;
            items.push(SeqItem { codec, separator });
        }
        let Some((_, init)) = items.split_last() else {
            return Err(p.error("at least one compressor expected"));
        };
        for item in init {
            if item.separator.as_ref().map_or(true, |s| s.is_empty()) {
                return Err(p.error(format!("separator string expected after '{}'", item.codec)));
            }
        }
        if combined {
            if let Some(item) = items.iter().find(|item| !item.codec.props().can_overlap) {
                return Err(p.error(format!("'{}' cannot share containers", item.codec)));
            }
        }
        Ok(Seq { leading, items, combined })
    }
}

fn digits(name: &str, params: Option<&[u8]>) -> Result<u8, CodecError> {
    let text = String::from_utf8_lossy(params.unwrap_or_default());
    let text = text.trim();
    if text.is_empty() {
        return Ok(0);
    }
    text.parse::<u8>()
        .ok()
        .filter(|&n| n <= MAX_DIGITS)
        .ok_or_else(|| CodecError::Parameter {
            codec: name.to_string(),
            reason: format!("expected a digit count up to {}, found '{}'", MAX_DIGITS, text),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{Container, InputContainer};
    use crate::reader::ReadError;

    #[test]
    fn test_parse_leaf_codecs() {
        let registry = CodecRegistry::new();
        assert!(matches!(registry.parse("t").unwrap(), Codec::Text));
        assert!(matches!(registry.parse("u(4)").unwrap(), Codec::Unsigned { min_digits: 4 }));
        assert!(matches!(registry.parse(" u8 ").unwrap(), Codec::Byte { min_digits: 0 }));
        assert!(matches!(registry.parse("di").unwrap(), Codec::Delta { min_digits: 0 }));
        assert!(matches!(registry.parse("\"n/a\"").unwrap(), Codec::Constant(v) if v == b"n/a"));
    }

    #[test]
    fn test_unknown_codec() {
        let registry = CodecRegistry::new();
        let err = registry.parse("zzz(1)").unwrap_err();
        assert!(matches!(err, CodecError::Unknown(ref name) if name == "zzz"));
        assert_eq!(err.to_string(), "Compressor 'zzz' is not defined");

        let nested = registry.parse("or(u, zzz)").unwrap_err();
        assert!(matches!(nested, CodecError::Unknown(_)));
    }

    #[test]
    fn test_bad_parameters() {
        let registry = CodecRegistry::new();
        assert!(matches!(registry.parse("u(x)"), Err(CodecError::Parameter { .. })));
        assert!(matches!(registry.parse("t(1)"), Err(CodecError::Parameter { .. })));
        assert!(matches!(registry.parse("rep(\"\", u)"), Err(CodecError::Parameter { .. })));
        assert!(matches!(registry.parse("seq(u u)"), Err(CodecError::Parameter { .. })));
        assert!(matches!(registry.parse("seqcomb(rl \",\" u)"), Err(CodecError::Parameter { .. })));
        assert!(matches!(registry.parse("or()"), Err(CodecError::Parameter { .. })));
    }

    #[test]
    fn test_syntax_errors() {
        let registry = CodecRegistry::new();
        assert!(matches!(registry.parse("seq(u \",\" u"), Err(CodecError::Syntax { .. })));
        assert!(matches!(registry.parse("\"open"), Err(CodecError::Syntax { .. })));
        assert!(matches!(registry.parse("u u"), Err(CodecError::Syntax { .. })));
        assert!(matches!(registry.parse("(u)"), Err(CodecError::Syntax { .. })));
    }

    #[test]
    fn test_nested_description() {
        let registry = CodecRegistry::new();
        let codec = registry
            .parse(r#"seq("[" rep(",", or(u, "-")) "]" e)"#)
            .unwrap();
        assert!(codec.parse(b"[1,-,3]red"));
        assert!(!codec.parse(b"[1,x]red"));
        assert_eq!(codec.to_string(), r#"seq("[" rep(",", or(u, "-")) "]" e)"#);
        assert_eq!(registry.parse(&codec.to_string()).unwrap().to_string(), codec.to_string());
    }

    #[test]
    fn test_escaped_separator() {
        let registry = CodecRegistry::new();
        let codec = registry.parse(r#"seq(t "\"" t)"#).unwrap();
        assert!(codec.parse(br#"a"b"#));
        assert!(!codec.parse(b"ab"));
    }

    #[test]
    fn test_parse_prefix_stops_after_description() {
        let registry = CodecRegistry::new();
        let (codec, used) = registry.parse_prefix(b"seq(u \":\" u):ri").unwrap();
        assert_eq!(used, 12);
        assert!(codec.parse(b"12:30"));
        let (_, used) = registry.parse_prefix(b"e lt").unwrap();
        assert_eq!(used, 1);
    }

    #[derive(Debug)]
    struct Upper;

    impl CustomCodec for Upper {
        fn description(&self) -> String {
            "upper".into()
        }

        fn rejecting(&self) -> bool {
            true
        }

        fn parse(&self, text: &[u8]) -> bool {
            text.iter().all(u8::is_ascii_uppercase)
        }

        fn compress(&self, text: &[u8], containers: &mut [Container]) -> Result<(), CodecError> {
            containers[0].put_bytes(&text.to_ascii_lowercase());
            Ok(())
        }

        fn decode(&self, containers: &mut [InputContainer], out: &mut Vec<u8>) -> Result<(), ReadError> {
            out.extend(containers[0].bytes()?.to_ascii_uppercase());
            Ok(())
        }
    }

    #[test]
    fn test_custom_codec() {
        let mut registry = CodecRegistry::new();
        registry
            .register_custom("upper", "Upper-case words", |_| Ok(Arc::new(Upper) as Arc<dyn CustomCodec>))
            .unwrap();
        assert!(matches!(
            registry.register_custom("upper", "again", |_| Ok(Arc::new(Upper) as Arc<dyn CustomCodec>)),
            Err(CodecError::Duplicate(_))
        ));
        assert!(registry.register_custom("9x", "bad", |_| Ok(Arc::new(Upper) as Arc<dyn CustomCodec>)).is_err());
        assert_eq!(registry.factories().count(), BUILTINS.len() + 1);

        let codec = registry.parse("or(upper, t)").unwrap();
        assert_eq!(codec.to_string(), "or(upper, t)");
        assert!(codec.props().containers == 3);
    }
}
