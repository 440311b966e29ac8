// SPDX-License-Identifier: MIT
//! Compressor: routes XML leaves into containers and writes the compressed file

use tracing::{debug, info, warn};

use crate::codec::{CodecError, CodecRegistry, EnumTable};
use crate::config::{Config, WhitespaceMode};
use crate::container::{ContainerManager, SMALL_THRESHOLD, SPECIAL, TREE, WHITESPACE};
use crate::format::{FileHeader, Token, MAX_LABEL_INDEX};
use crate::labels::{LabelId, LabelKind, LabelTable};
use crate::path::{PathError, PathSet};
use crate::router::PathRouter;
use crate::stats::{CompressionStats, PathStats};
use crate::stream::{compress_stream, StreamSizes};
use crate::varint::{self, MAX_UNSIGNED};
use crate::xml::{self, SpecialKind, TreeSink};

/// Errors that can occur during compression
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("XML error at byte {position}: {message}")]
    Xml { position: u64, message: String },

    #[error("End tag </{found}> does not match <{expected}>")]
    UnmatchedEndTag { expected: String, found: String },

    #[error("End tag </{0}> without start tag")]
    UnexpectedEndTag(String),

    #[error("Unexpected end of document, {0} element(s) still open")]
    UnclosedElements(usize),

    #[error("No path expression accepts '{text}' at {path}")]
    NoMatchingPath { path: String, text: String },

    #[error("Too many distinct labels")]
    TooManyLabels,

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Upper bound of container bytes a leaf can add besides its text
const LEAF_OVERHEAD: usize = 8;

fn store_token(containers: &mut ContainerManager, token: Token) {
    token.store(&mut containers.structural_mut()[TREE]);
}

fn store_whitespace(containers: &mut ContainerManager, token: Token, whitespace: &[u8]) {
    let structural = containers.structural_mut();
    structural[WHITESPACE].put_bytes(whitespace);
    token.store(&mut structural[TREE]);
}

/// Structure-aware XML compressor
///
/// Path expressions are compiled once in [`Compressor::new`]; the compressor
/// can then be reused for any number of documents.
pub struct Compressor {
    config: Config,
    paths: PathSet,
    labels: LabelTable,
    router: PathRouter,
    containers: ContainerManager,
    enums: EnumTable,
    /// `e` instances created in the current run block
    next_enum: u32,
    /// Labels of the open elements and attribute, outermost first
    path: Vec<LabelId>,
    /// Estimated container bytes since the last size check
    pending: usize,
    header_pending: bool,
    output: Vec<u8>,
    stats: CompressionStats,
}

impl Compressor {
    /// Compile the configured path expressions
    pub fn new(config: &Config, registry: &CodecRegistry) -> Result<Self, WriteError> {
        config.validate().map_err(WriteError::Config)?;
        let mut labels = LabelTable::new();
        let paths = PathSet::compile(&config.paths, &mut labels, registry, &config.whitespace)?;
        debug!(paths = paths.len(), labels = labels.len(), "compressor ready");
        Ok(Self {
            config: config.clone(),
            paths,
            labels,
            router: PathRouter::new(),
            containers: ContainerManager::new(),
            enums: EnumTable::new(),
            next_enum: 0,
            path: Vec::new(),
            pending: 0,
            header_pending: true,
            output: Vec::new(),
            stats: CompressionStats::default(),
        })
    }

    pub fn paths(&self) -> &PathSet {
        &self.paths
    }

    /// Statistics of the last compressed document
    pub fn stats(&self) -> &CompressionStats {
        &self.stats
    }

    /// Compress one XML document
    pub fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>, WriteError> {
        self.begin_document(input.len());
        xml::parse_document(input, self)?;
        if !self.path.is_empty() {
            return Err(WriteError::UnclosedElements(self.path.len()));
        }
        self.flush_run()?;

        self.stats.input_bytes = input.len() as u64;
        self.stats.output_bytes = self.output.len() as u64;
        self.stats.labels = self.labels.len();
        info!(
            input = self.stats.input_bytes,
            output = self.stats.output_bytes,
            runs = self.stats.runs,
            "document compressed"
        );
        Ok(std::mem::take(&mut self.output))
    }

    fn begin_document(&mut self, input_len: usize) {
        self.labels.reset();
        self.router.reset();
        self.containers.begin_run();
        self.enums.reset();
        self.next_enum = 0;
        self.path.clear();
        self.pending = 0;
        self.header_pending = true;
        self.output = Vec::with_capacity(input_len / 4);
        self.stats = CompressionStats {
            paths: self
                .paths
                .iter()
                .map(|expr| PathStats {
                    path: expr.source.clone(),
                    ..PathStats::default()
                })
                .collect(),
            ..CompressionStats::default()
        };
    }

    fn intern(&mut self, name: &[u8], kind: LabelKind) -> Result<LabelId, WriteError> {
        let label = self.labels.intern(name, kind);
        if label.index() > MAX_LABEL_INDEX {
            return Err(WriteError::TooManyLabels);
        }
        Ok(label)
    }

    fn display_path(&self) -> String {
        if self.path.is_empty() {
            return "/".to_string();
        }
        self.path
            .iter()
            .map(|&label| format!("/{}", self.labels.display(label)))
            .collect()
    }

    /// Route a leaf to the first path expression whose codec accepts it.
    /// With `trim`, each expression's left/right whitespace policy applies.
    fn store_text(&mut self, text: &[u8], trim: bool) -> Result<(), WriteError> {
        let candidates = self.router.resolve(&self.paths, &self.path);
        let (lead, _, trail) = xml::split_whitespace(text);

        for candidate in candidates {
            let Some(expr) = self.paths.get(candidate.expr) else {
                continue;
            };
            let options = &expr.options;
            let (start, end) = if trim {
                let start = if options.left == WhitespaceMode::Text { 0 } else { lead.len() };
                let end = if options.right == WhitespaceMode::Text {
                    text.len()
                } else {
                    text.len() - trail.len()
                };
                (start, end.max(start))
            } else {
                (0, text.len())
            };
            let value = &text[start..end];
            if !options.codec.parse(value) {
                continue;
            }

            if trim && options.left == WhitespaceMode::Global && !lead.is_empty() {
                store_whitespace(&mut self.containers, Token::Whitespace, lead);
            }

            let block = match self.router.dictionary().block(candidate.dict) {
                Some(block) => block,
                None => {
                    let props = options.codec.props();
                    let state = options.codec.init_state(&mut self.next_enum);
                    let block = self.containers.create_block(expr.index, props.containers, state);
                    self.router.dictionary_mut().set_block(candidate.dict, block);
                    if let Some(stats) = self.stats.paths.get_mut(expr.index as usize - 1) {
                        stats.blocks += 1;
                    }
                    block
                }
            };
            let target = self.containers.block_mut(block);
            options
                .codec
                .compress(value, &mut target.containers, &mut target.state, &mut self.enums)?;
            store_token(&mut self.containers, Token::Text(block.index()));

            if trim && options.right == WhitespaceMode::Global && !trail.is_empty() {
                store_whitespace(&mut self.containers, Token::Whitespace, trail);
            }

            if let Some(stats) = self.stats.paths.get_mut(expr.index as usize - 1) {
                stats.values += 1;
                stats.text_bytes += value.len() as u64;
            }
            self.pending += text.len() + LEAF_OVERHEAD;
            return Ok(());
        }

        Err(WriteError::NoMatchingPath {
            path: self.display_path(),
            text: String::from_utf8_lossy(&text[..text.len().min(40)]).into_owned(),
        })
    }

    fn close_element(&mut self) -> Result<(), WriteError> {
        self.path.pop();
        store_token(&mut self.containers, Token::End);
        Ok(())
    }

    /// Close the run block once the containers reach the memory cutoff
    fn check_memory(&mut self) -> Result<(), WriteError> {
        if self.pending < self.config.memory_cutoff {
            return Ok(());
        }
        let used = self.containers.data_size() + self.enums.data_size();
        if used >= self.config.memory_cutoff {
            self.flush_run()
        } else {
            self.pending = used;
            Ok(())
        }
    }

    /// Write the current run block and start a new one
    fn flush_run(&mut self) -> Result<(), WriteError> {
        for block in self.containers.blocks_mut() {
            if let Some(expr) = self.paths.get(block.path) {
                expr.options
                    .codec
                    .finish(&mut block.containers, &mut block.state);
            }
        }

        let total = self.containers.data_size() + self.enums.data_size();
        if total > MAX_UNSIGNED as usize {
            return Err(WriteError::Compression(format!(
                "run block of {} bytes exceeds the format limit, lower the memory cutoff",
                total
            )));
        }

        let mut head = Vec::new();
        if self.header_pending {
            FileHeader {
                whitespace_ignored: self.config.whitespace.full == WhitespaceMode::Ignore,
                options: self.paths.header_options(),
            }
            .store(&mut head);
            self.header_pending = false;
        }
        varint::put_u32(&mut head, total as u32);
        self.containers.store_layout(&mut head);
        self.labels.store_delta(&mut head);
        self.enums.store_global(self.next_enum, &mut head);
        head.extend_from_slice(&self.containers.small_data());
        if head.len() > MAX_UNSIGNED as usize {
            return Err(WriteError::Compression(
                "run header exceeds the format limit, lower the memory cutoff".to_string(),
            ));
        }

        let level = self.config.level;
        varint::put_u32(&mut self.output, head.len() as u32);
        let (stream, sizes) = compress_stream(&head, level)?;
        self.output.extend_from_slice(&stream);
        self.stats.header.add(sizes);

        for dictionary in self.enums.large_dictionaries(self.next_enum) {
            let (stream, sizes) = compress_stream(dictionary, level)?;
            self.output.extend_from_slice(&stream);
            self.stats.dictionaries.add(sizes);
        }

        let mut large = StreamSizes::default();
        for (position, block) in self.containers.blocks().enumerate() {
            for (slot, container) in block.containers.iter().enumerate() {
                if container.len() < SMALL_THRESHOLD {
                    continue;
                }
                let (stream, sizes) = compress_stream(container.as_slice(), level)?;
                self.output.extend_from_slice(&stream);
                large.add(sizes);
                let category = match (position, slot) {
                    (0, TREE) => &mut self.stats.structure,
                    (0, WHITESPACE) => &mut self.stats.whitespace,
                    (0, SPECIAL) => &mut self.stats.special,
                    _ => &mut self.stats.data,
                };
                category.add(sizes);
            }
        }

        debug!(
            run = self.stats.runs,
            blocks = self.containers.block_count(),
            data = total,
            header = head.len(),
            large_raw = large.raw,
            "run block written"
        );
        self.stats.runs += 1;
        self.containers.begin_run();
        self.router.reset();
        self.enums.reset();
        self.next_enum = 0;
        self.pending = 0;
        Ok(())
    }
}

impl TreeSink for Compressor {
    fn start_element(&mut self, name: &[u8]) -> Result<(), WriteError> {
        let label = self.intern(name, LabelKind::Element)?;
        store_token(&mut self.containers, Token::Start(label.index()));
        self.path.push(label);
        Ok(())
    }

    fn attribute(&mut self, leading: &[u8], name: &[u8], value: &[u8]) -> Result<(), WriteError> {
        // A single space is what the decoder writes by default.
        if self.config.whitespace.attribute == WhitespaceMode::Global && leading != b" " {
            store_whitespace(&mut self.containers, Token::AttributeWhitespace, leading);
        }
        let label = self.intern(name, LabelKind::Attribute)?;
        store_token(&mut self.containers, Token::Start(label.index()));
        self.path.push(label);
        self.store_text(value, false)?;
        self.close_element()
    }

    fn close_start_tag(&mut self, trailing: &[u8], empty: bool) -> Result<(), WriteError> {
        if self.config.whitespace.attribute == WhitespaceMode::Global && !trailing.is_empty() {
            store_whitespace(&mut self.containers, Token::AttributeWhitespace, trailing);
        }
        if empty {
            self.path.pop();
            store_token(&mut self.containers, Token::EmptyEnd);
            self.check_memory()?;
        }
        Ok(())
    }

    fn end_element(&mut self, name: &[u8]) -> Result<(), WriteError> {
        let depth = self.path.len();
        let Some(&open) = self.path.last() else {
            return Err(WriteError::UnexpectedEndTag(
                String::from_utf8_lossy(name).into_owned(),
            ));
        };
        if self.labels.name(open) != name {
            let parent_matches = depth >= 2 && self.labels.name(self.path[depth - 2]) == name;
            if !parent_matches {
                return Err(WriteError::UnmatchedEndTag {
                    expected: self.labels.display(open),
                    found: String::from_utf8_lossy(name).into_owned(),
                });
            }
            warn!(
                open = %self.labels.display(open),
                found = %String::from_utf8_lossy(name),
                "end tag does not match, closing the inner element"
            );
            self.close_element()?;
        }
        self.close_element()?;
        self.check_memory()
    }

    fn text(&mut self, text: &[u8]) -> Result<(), WriteError> {
        if text.is_empty() {
            return Ok(());
        }
        if !text.iter().all(|&b| xml::is_whitespace(b)) {
            return self.store_text(text, true);
        }
        match self.config.whitespace.full {
            WhitespaceMode::Ignore => Ok(()),
            WhitespaceMode::Global => {
                store_whitespace(&mut self.containers, Token::Whitespace, text);
                self.pending += text.len() + LEAF_OVERHEAD;
                Ok(())
            }
            WhitespaceMode::Text => self.store_text(text, false),
        }
    }

    fn special(&mut self, kind: SpecialKind, markup: &[u8]) -> Result<(), WriteError> {
        let ignore = &self.config.ignore;
        let dropped = match kind {
            SpecialKind::Comment => ignore.comments,
            SpecialKind::ProcessingInstruction => ignore.processing_instructions,
            SpecialKind::Doctype => ignore.doctype,
            SpecialKind::CData => ignore.cdata,
        };
        if dropped {
            return Ok(());
        }
        let structural = self.containers.structural_mut();
        structural[SPECIAL].put_bytes(markup);
        Token::Special.store(&mut structural[TREE]);
        self.pending += markup.len() + LEAF_OVERHEAD;
        Ok(())
    }
}
