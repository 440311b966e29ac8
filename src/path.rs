// SPDX-License-Identifier: MIT
//! Path expressions: parser, compiler and `=>` options
//!
//! ```text
//! path  := ('/' | '//') [seq] ['=>' options]
//! seq   := step (('/' | '//') step)* ['/' | '//']
//! step  := atom ('|' atom)*
//! atom  := '(' seq ')' | name | '@' name | '@#' | '#' | '##' | '*'
//! ```
//!
//! The parser writes a non-deterministic automaton directly. Compilation
//! determinizes and minimizes it, and derives the reverse automaton the router
//! runs from a leaf back towards the root.

use tracing::debug;

use crate::codec::{Codec, CodecError, CodecRegistry};
use crate::config::{WhitespaceConfig, WhitespaceMode};
use crate::fsm::{Fsm, StateId};
use crate::labels::{LabelId, LabelKind, LabelTable};

/// Expressions installed after the configured ones
pub const DEFAULT_PATHS: [&str; 2] = ["//#", "/"];

fn caret(position: &usize) -> String {
    format!("{}^", " ".repeat(position + 3))
}

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("Error while parsing path expression:\n\n   {expr}\n{}\n{message}", caret(.position))]
    Syntax {
        expr: String,
        position: usize,
        message: String,
    },

    #[error("Error in path expression '{expr}': {source}")]
    Codec {
        expr: String,
        #[source]
        source: CodecError,
    },
}

/// What the `=>` part of an expression selects
#[derive(Debug, Clone)]
pub struct PathOptions {
    pub codec: Codec,
    pub left: WhitespaceMode,
    pub right: WhitespaceMode,
}

impl PathOptions {
    /// Parse `options`, which may be empty; `defaults` supplies the
    /// whitespace policy when none is given
    pub fn parse(
        options: &str,
        registry: &CodecRegistry,
        defaults: &WhitespaceConfig,
    ) -> Result<Self, PathError> {
        let mut parser = OptionParser {
            expr: options,
            text: options.as_bytes(),
            pos: 0,
            offset: 0,
        };
        parser.parse(registry, defaults)
    }
}

struct OptionParser<'a> {
    expr: &'a str,
    text: &'a [u8],
    pos: usize,
    /// Position of `text` inside `expr`, for error carets
    offset: usize,
}

impl OptionParser<'_> {
    fn error(&self, message: &str) -> PathError {
        PathError::Syntax {
            expr: self.expr.to_string(),
            position: self.offset + self.pos,
            message: message.to_string(),
        }
    }

    fn at_end(&self) -> bool {
        self.text.get(self.pos).map_or(true, u8::is_ascii_whitespace)
    }

    fn whitespace_option(&self) -> Option<(bool, WhitespaceMode)> {
        let side = *self.text.get(self.pos)?;
        let mode = WhitespaceMode::from_flag(*self.text.get(self.pos + 1)?)?;
        let ends = self
            .text
            .get(self.pos + 2)
            .map_or(true, |&b| b == b':' || b.is_ascii_whitespace());
        match side {
            b'l' if ends => Some((true, mode)),
            b'r' if ends => Some((false, mode)),
            _ => None,
        }
    }

    fn parse(
        &mut self,
        registry: &CodecRegistry,
        defaults: &WhitespaceConfig,
    ) -> Result<PathOptions, PathError> {
        let mut options = PathOptions {
            codec: Codec::Text,
            left: defaults.left,
            right: defaults.right,
        };
        let mut codec_seen = false;
        while !self.at_end() {
            if let Some((left, mode)) = self.whitespace_option() {
                if left {
                    options.left = mode;
                } else {
                    options.right = mode;
                }
                self.pos += 2;
            } else {
                if codec_seen {
                    return Err(self.error("Only one compressor can be specified"));
                }
                let (codec, used) =
                    registry
                        .parse_prefix(&self.text[self.pos..])
                        .map_err(|source| PathError::Codec {
                            expr: self.expr.to_string(),
                            source,
                        })?;
                options.codec = codec;
                codec_seen = true;
                self.pos += used;
            }
            match self.text.get(self.pos) {
                Some(b':') => self.pos += 1,
                _ if self.at_end() => break,
                _ => return Err(self.error("Character ':' expected")),
            }
        }
        if self.text[self.pos..].iter().any(|b| !b.is_ascii_whitespace()) {
            return Err(self.error("Unexpected character"));
        }
        Ok(options)
    }
}

/// Builds the forward automaton of one path
struct PathParser<'a> {
    text: &'a [u8],
    pos: usize,
    labels: &'a mut LabelTable,
    fsm: Fsm,
}

impl<'a> PathParser<'a> {
    fn new(text: &'a str, labels: &'a mut LabelTable) -> Self {
        Self {
            text: text.as_bytes(),
            pos: 0,
            labels,
            fsm: Fsm::new(),
        }
    }

    fn error(&self, message: &str) -> PathError {
        PathError::Syntax {
            expr: String::from_utf8_lossy(self.text).into_owned(),
            position: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.text.get(self.pos).copied()
    }

    fn starts_with(&self, token: &[u8]) -> bool {
        self.text[self.pos..].starts_with(token)
    }

    fn at_seq_end(&self) -> bool {
        match self.peek() {
            None | Some(b')' | b'|' | b'=') => true,
            Some(b) => b.is_ascii_whitespace(),
        }
    }

    /// Parse the path part, leaving the cursor on `=>` or the end
    fn path(&mut self) -> Result<(), PathError> {
        let start = self.fsm.start();
        let end = if self.starts_with(b"//") {
            self.pos += 2;
            let middle = self.any_depth(start);
            if self.at_seq_end() {
                middle
            } else {
                self.seq(middle)?
            }
        } else if self.starts_with(b"/") {
            self.pos += 1;
            if self.at_seq_end() {
                start
            } else {
                self.seq(start)?
            }
        } else {
            return Err(self.error("Symbol '/' expected"));
        };
        self.fsm.set_final(end, true);
        Ok(())
    }

    /// State reachable from `from` over any number of labels
    fn any_depth(&mut self, from: StateId) -> StateId {
        let middle = self.fsm.add_state(false);
        self.fsm.add_empty_edge(from, middle);
        self.fsm.add_neg_edge(middle, middle, Vec::new());
        middle
    }

    fn seq(&mut self, from: StateId) -> Result<StateId, PathError> {
        let mut current = from;
        loop {
            current = self.step(current)?;
            if self.starts_with(b"//") {
                self.pos += 2;
                let middle = self.any_depth(current);
                current = self.fsm.add_state(false);
                self.fsm.add_empty_edge(middle, current);
            } else if self.starts_with(b"/") {
                self.pos += 1;
            } else {
                break;
            }
            if self.at_seq_end() {
                break;
            }
        }
        Ok(current)
    }

    fn step(&mut self, from: StateId) -> Result<StateId, PathError> {
        let to = self.fsm.add_state(false);
        loop {
            self.atom(from, to)?;
            if self.peek() == Some(b'|') {
                self.pos += 1;
            } else {
                return Ok(to);
            }
        }
    }

    fn atom(&mut self, from: StateId, to: StateId) -> Result<(), PathError> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let end = self.seq(from)?;
                if self.peek() != Some(b')') {
                    return Err(self.error("Missing closed parenthesis ')'"));
                }
                self.pos += 1;
                self.fsm.add_empty_edge(end, to);
            }
            Some(b'#') => {
                self.pos += 1;
                if self.peek() == Some(b'#') {
                    self.pos += 1;
                    let middle = self.fsm.add_state(false);
                    self.fsm.add_empty_edge(from, middle);
                    self.fsm.add_label_edge(middle, middle, LabelId::ELEMENT_POUND);
                    self.fsm.add_label_edge(middle, middle, LabelId::ATTRIBUTE_POUND);
                    self.fsm.add_empty_edge(middle, to);
                    self.wildcard_end("##")?;
                } else {
                    self.fsm.add_label_edge(from, to, LabelId::ELEMENT_POUND);
                    self.fsm.add_label_edge(from, to, LabelId::ATTRIBUTE_POUND);
                    self.wildcard_end("#")?;
                }
            }
            Some(b'*') => {
                self.pos += 1;
                self.fsm.add_neg_edge(from, to, Vec::new());
                self.wildcard_end("*")?;
            }
            Some(b'@') => {
                self.pos += 1;
                if self.peek() == Some(b'#') {
                    self.pos += 1;
                    self.fsm.add_label_edge(from, to, LabelId::ATTRIBUTE_POUND);
                    self.wildcard_end("@#")?;
                } else {
                    let label = self.name(LabelKind::Attribute)?;
                    self.fsm.add_label_edge(from, to, label);
                }
            }
            _ => {
                let label = self.name(LabelKind::Element)?;
                self.fsm.add_label_edge(from, to, label);
            }
        }
        Ok(())
    }

    fn wildcard_end(&self, symbol: &str) -> Result<(), PathError> {
        match self.peek() {
            Some(b'/' | b'|' | b')' | b'=') | None => Ok(()),
            Some(b) if b.is_ascii_whitespace() => Ok(()),
            Some(_) => Err(self.error(&format!(
                "Symbol '/' or '|' expected after '{}'",
                symbol
            ))),
        }
    }

    fn name(&mut self, kind: LabelKind) -> Result<LabelId, PathError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            match b {
                b'/' | b'=' | b'|' | b')' | b'(' | b'#' | b'*' | b'@' => break,
                b'<' | b'>' | b'"' | b'\'' | b'&' => return Err(self.error("Invalid symbol")),
                _ if b.is_ascii_whitespace() => break,
                _ => self.pos += 1,
            }
        }
        if self.pos == start {
            return Err(self.error("Unexpected character"));
        }
        Ok(self.labels.intern(&self.text[start..self.pos], kind))
    }
}

/// Parse the path part of `text` into a non-deterministic automaton;
/// returns it with the byte offset where the path ends
pub fn parse_path(text: &str, labels: &mut LabelTable) -> Result<(Fsm, usize), PathError> {
    let mut parser = PathParser::new(text, labels);
    parser.path()?;
    let end = parser.pos;
    let mut fsm = parser.fsm;
    fsm.eliminate_redundant_pound_edges();
    Ok((fsm, end))
}

/// A compiled path expression
#[derive(Debug, Clone)]
pub struct PathExpr {
    /// 1-based registration index
    pub index: u32,
    pub source: String,
    /// Text after `=>`, stored in the file header
    pub options_text: String,
    pub options: PathOptions,
    /// Minimal deterministic automaton over root-to-leaf paths
    pub forward: Fsm,
    /// Minimal deterministic automaton over leaf-to-root paths
    pub reverse: Fsm,
}

impl PathExpr {
    pub fn compile(
        index: u32,
        source: &str,
        labels: &mut LabelTable,
        registry: &CodecRegistry,
        defaults: &WhitespaceConfig,
    ) -> Result<Self, PathError> {
        let (nfa, end) = parse_path(source, labels)?;
        let rest = &source[end..];
        let options_text = if let Some(options) = rest.strip_prefix("=>") {
            options.trim()
        } else if rest.trim().is_empty() {
            ""
        } else {
            return Err(PathError::Syntax {
                expr: source.to_string(),
                position: end,
                message: "Unexpected character".into(),
            });
        };
        let options = OptionParser {
            expr: source,
            text: options_text.as_bytes(),
            pos: 0,
            offset: source.len() - rest.len() + rest.find(options_text).unwrap_or(0),
        }
        .parse(registry, defaults)?;

        let forward = nfa.determinize().minimize();
        let reverse = nfa.reverse().determinize().minimize();
        debug!(
            path = source,
            forward_states = forward.state_count(),
            reverse_states = reverse.state_count(),
            codec = %options.codec,
            "compiled path expression"
        );
        Ok(Self {
            index,
            source: source.to_string(),
            options_text: options_text.to_string(),
            options,
            forward,
            reverse,
        })
    }

    /// Does the root-to-leaf label sequence match?
    pub fn matches(&self, path: &[LabelId]) -> bool {
        self.forward.accepts(path)
    }
}

/// Registered path expressions in priority order
#[derive(Debug, Clone, Default)]
pub struct PathSet {
    exprs: Vec<PathExpr>,
}

impl PathSet {
    /// Compile `paths` followed by the catch-all expressions. Labels interned
    /// here become predefined.
    pub fn compile(
        paths: &[String],
        labels: &mut LabelTable,
        registry: &CodecRegistry,
        whitespace: &WhitespaceConfig,
    ) -> Result<Self, PathError> {
        let sources = paths
            .iter()
            .map(String::as_str)
            .chain(DEFAULT_PATHS.iter().copied());
        let exprs = sources
            .enumerate()
            .map(|(i, source)| PathExpr::compile(i as u32 + 1, source, labels, registry, whitespace))
            .collect::<Result<Vec<_>, _>>()?;
        labels.seal_predefined();
        Ok(Self { exprs })
    }

    /// Expression with 1-based `index`
    pub fn get(&self, index: u32) -> Option<&PathExpr> {
        index
            .checked_sub(1)
            .and_then(|i| self.exprs.get(i as usize))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathExpr> {
        self.exprs.iter()
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    /// Options strings for the file header
    pub fn header_options(&self) -> Vec<String> {
        self.exprs.iter().map(|e| e.options_text.clone()).collect()
    }
}

/// Codecs of the expressions listed in a file header
pub fn header_codecs(options: &[String], registry: &CodecRegistry) -> Result<Vec<Codec>, PathError> {
    let defaults = WhitespaceConfig::default();
    options
        .iter()
        .map(|text| PathOptions::parse(text, registry, &defaults).map(|o| o.codec))
        .collect()
}
