// SPDX-License-Identifier: MIT
//! XML tree events in and out
//!
//! [`parse_document`] drives a [`TreeSink`] from raw document bytes using
//! quick-xml. Text is handed over still escaped and exactly as it appears in
//! the input, so the decoder only has to concatenate it again.
//! [`XmlWriter`] is the decoder side: it rebuilds the document from the same
//! events.
//!
//! Normalizations: whitespace inside end tags and around `=` is dropped, the
//! DOCTYPE keyword is followed by exactly one space, and single-quoted
//! attribute values are written with double quotes unless the value contains
//! a `"`.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::writer::WriteError;

/// Markup passed through verbatim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKind {
    Comment,
    /// Processing instruction, including the XML declaration
    ProcessingInstruction,
    Doctype,
    CData,
}

/// Receiver of document events
pub trait TreeSink {
    fn start_element(&mut self, name: &[u8]) -> Result<(), WriteError>;

    /// One attribute of the open start tag, with the whitespace before it
    fn attribute(&mut self, leading: &[u8], name: &[u8], value: &[u8]) -> Result<(), WriteError>;

    /// End of the start tag; `empty` for `<a/>`, which also closes the element
    fn close_start_tag(&mut self, trailing: &[u8], empty: bool) -> Result<(), WriteError>;

    fn end_element(&mut self, name: &[u8]) -> Result<(), WriteError>;

    /// Character data, still escaped
    fn text(&mut self, text: &[u8]) -> Result<(), WriteError>;

    /// Complete markup of a comment, PI, DOCTYPE or CDATA section
    fn special(&mut self, kind: SpecialKind, markup: &[u8]) -> Result<(), WriteError>;
}

#[inline]
pub fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\r' | b'\n')
}

/// Split `text` into leading whitespace, core and trailing whitespace
pub fn split_whitespace(text: &[u8]) -> (&[u8], &[u8], &[u8]) {
    let start = text
        .iter()
        .position(|&b| !is_whitespace(b))
        .unwrap_or(text.len());
    let end = text
        .iter()
        .rposition(|&b| !is_whitespace(b))
        .map_or(start, |i| i + 1);
    (&text[..start], &text[start..end], &text[end..])
}

fn malformed(position: u64, message: impl Into<String>) -> WriteError {
    WriteError::Xml {
        position,
        message: message.into(),
    }
}

/// Feed every event of `input` to `sink`
pub fn parse_document<S: TreeSink>(input: &[u8], sink: &mut S) -> Result<(), WriteError> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().check_end_names = false;

    let mut markup = Vec::new();
    loop {
        let position = reader.buffer_position();
        let event = reader
            .read_event()
            .map_err(|e| malformed(reader.error_position(), e.to_string()))?;

        match event {
            Event::Start(tag) => {
                sink.start_element(tag.name().as_ref())?;
                parse_attributes(tag.attributes_raw(), position, sink)?;
                sink.close_start_tag(trailing_whitespace(tag.attributes_raw()), false)?;
            }
            Event::Empty(tag) => {
                sink.start_element(tag.name().as_ref())?;
                parse_attributes(tag.attributes_raw(), position, sink)?;
                sink.close_start_tag(trailing_whitespace(tag.attributes_raw()), true)?;
            }
            Event::End(tag) => sink.end_element(tag.name().as_ref())?,
            Event::Text(text) => sink.text(&text)?,
            Event::CData(text) => {
                let markup = wrap(&mut markup, b"<![CDATA[", &text, b"]]>");
                sink.special(SpecialKind::CData, markup)?;
            }
            Event::Comment(text) => {
                let markup = wrap(&mut markup, b"<!--", &text, b"-->");
                sink.special(SpecialKind::Comment, markup)?;
            }
            Event::Decl(decl) => {
                let markup = wrap(&mut markup, b"<?", &decl, b"?>");
                sink.special(SpecialKind::ProcessingInstruction, markup)?;
            }
            Event::PI(pi) => {
                let markup = wrap(&mut markup, b"<?", &pi, b"?>");
                sink.special(SpecialKind::ProcessingInstruction, markup)?;
            }
            Event::DocType(text) => {
                let markup = wrap(&mut markup, b"<!DOCTYPE ", &text, b">");
                sink.special(SpecialKind::Doctype, markup)?;
            }
            Event::Eof => break,
        }
    }
    Ok(())
}

fn wrap<'a>(buf: &'a mut Vec<u8>, open: &[u8], content: &[u8], close: &[u8]) -> &'a [u8] {
    buf.clear();
    buf.extend_from_slice(open);
    buf.extend_from_slice(content);
    buf.extend_from_slice(close);
    buf
}

fn trailing_whitespace(attributes: &[u8]) -> &[u8] {
    let (_, core, trailing) = split_whitespace(attributes);
    if core.is_empty() {
        attributes
    } else {
        trailing
    }
}

/// Attribute list of a start tag; trailing whitespace is left to the caller
fn parse_attributes<S: TreeSink>(raw: &[u8], position: u64, sink: &mut S) -> Result<(), WriteError> {
    let mut pos = 0;
    loop {
        let ws_start = pos;
        while pos < raw.len() && is_whitespace(raw[pos]) {
            pos += 1;
        }
        if pos == raw.len() {
            return Ok(());
        }
        let leading = &raw[ws_start..pos];
        if leading.is_empty() && ws_start > 0 {
            return Err(malformed(position, "missing whitespace between attributes"));
        }

        let name_start = pos;
        while pos < raw.len() && raw[pos] != b'=' && !is_whitespace(raw[pos]) {
            pos += 1;
        }
        let name = &raw[name_start..pos];
        while pos < raw.len() && is_whitespace(raw[pos]) {
            pos += 1;
        }
        if raw.get(pos) != Some(&b'=') {
            return Err(malformed(
                position,
                format!("attribute '{}' has no value", String::from_utf8_lossy(name)),
            ));
        }
        pos += 1;
        while pos < raw.len() && is_whitespace(raw[pos]) {
            pos += 1;
        }
        let quote = match raw.get(pos) {
            Some(&q) if q == b'"' || q == b'\'' => q,
            _ => return Err(malformed(position, "attribute value must be quoted")),
        };
        pos += 1;
        let value_start = pos;
        let value_len = raw[pos..]
            .iter()
            .position(|&b| b == quote)
            .ok_or_else(|| malformed(position, "unterminated attribute value"))?;
        pos += value_len + 1;
        sink.attribute(leading, name, &raw[value_start..value_start + value_len])?;
    }
}

/// Rebuilds a document from tree events
#[derive(Debug, Default)]
pub struct XmlWriter {
    out: Vec<u8>,
    /// A start tag is open and its `>` not yet written
    tag_open: bool,
    /// Whitespace was written since the last attribute
    attribute_spacing: bool,
    /// Value of the attribute being decoded
    attribute: Option<Vec<u8>>,
}

impl XmlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            out: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    fn close_tag(&mut self) {
        if self.tag_open {
            self.out.push(b'>');
            self.tag_open = false;
        }
    }

    pub fn in_attribute(&self) -> bool {
        self.attribute.is_some()
    }

    pub fn start_element(&mut self, name: &[u8]) {
        self.close_tag();
        self.out.push(b'<');
        self.out.extend_from_slice(name);
        self.tag_open = true;
        self.attribute_spacing = false;
    }

    /// Returns false when no start tag is open
    pub fn start_attribute(&mut self, name: &[u8]) -> bool {
        if !self.tag_open || self.attribute.is_some() {
            return false;
        }
        if !self.attribute_spacing {
            self.out.push(b' ');
        }
        self.out.extend_from_slice(name);
        self.out.push(b'=');
        self.attribute = Some(Vec::new());
        self.attribute_spacing = false;
        true
    }

    pub fn end_attribute(&mut self) {
        if let Some(value) = self.attribute.take() {
            let quote = if value.contains(&b'"') { b'\'' } else { b'"' };
            self.out.push(quote);
            self.out.extend_from_slice(&value);
            self.out.push(quote);
        }
    }

    pub fn end_element(&mut self, name: &[u8]) {
        self.close_tag();
        self.out.extend_from_slice(b"</");
        self.out.extend_from_slice(name);
        self.out.push(b'>');
    }

    /// Close the open start tag as `<a/>`
    pub fn end_empty(&mut self) -> bool {
        if !self.tag_open {
            return false;
        }
        self.out.extend_from_slice(b"/>");
        self.tag_open = false;
        true
    }

    /// Text or whitespace content; goes into the attribute value if one is open
    pub fn text(&mut self, text: &[u8]) {
        match &mut self.attribute {
            Some(value) => value.extend_from_slice(text),
            None => {
                self.close_tag();
                self.out.extend_from_slice(text);
            }
        }
    }

    /// Whitespace inside a start tag
    pub fn attribute_whitespace(&mut self, whitespace: &[u8]) -> bool {
        if !self.tag_open || self.attribute.is_some() {
            return false;
        }
        self.out.extend_from_slice(whitespace);
        self.attribute_spacing = true;
        true
    }

    pub fn special(&mut self, markup: &[u8]) {
        self.close_tag();
        self.out.extend_from_slice(markup);
    }

    /// Finished document; fails if a start tag or attribute is still open
    pub fn finish(mut self) -> Option<Vec<u8>> {
        if self.attribute.is_some() {
            return None;
        }
        self.close_tag();
        Some(self.out)
    }
}
