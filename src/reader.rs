// SPDX-License-Identifier: MIT
//! Decompressor: rebuilds the XML document from a compressed file

use tracing::{debug, info};

use crate::codec::{Codec, CodecError, CodecRegistry, CodecState, DictionaryShape, EnumDictionaries};
use crate::container::{InputContainer, RunLayout, SMALL_THRESHOLD};
use crate::format::{FileHeader, Token};
use crate::labels::{LabelId, LabelTable};
use crate::path::{header_codecs, PathError};
use crate::stream::StreamReader;
use crate::varint::ByteReader;
use crate::xml::XmlWriter;

/// Errors that can occur during decompression
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Invalid file format: not a pathpress file")]
    InvalidFormat,

    #[error("Corrupt file: {0}")]
    Corrupt(String),

    #[error("Unexpected end of data in {0}")]
    Truncated(&'static str),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Invalid path options in file header: {0}")]
    Options(#[from] PathError),
}

fn corrupt(message: impl Into<String>) -> ReadError {
    ReadError::Corrupt(message.into())
}

/// Decoded containers and codec state of one block
struct RunBlock<'c> {
    codec: &'c Codec,
    containers: Vec<InputContainer>,
    state: CodecState,
}

/// Everything one run block needs for decoding its tokens
struct Run<'c> {
    structural: Vec<InputContainer>,
    blocks: Vec<RunBlock<'c>>,
    dictionaries: EnumDictionaries,
}

/// Turns compressed files back into XML
pub struct Decompressor<'r> {
    registry: &'r CodecRegistry,
    whitespace_ignored: bool,
    runs: u32,
}

impl<'r> Decompressor<'r> {
    pub fn new(registry: &'r CodecRegistry) -> Self {
        Self {
            registry,
            whitespace_ignored: false,
            runs: 0,
        }
    }

    /// Whether the last file was compressed with whitespace-only text dropped
    pub fn whitespace_ignored(&self) -> bool {
        self.whitespace_ignored
    }

    /// Run blocks in the last file
    pub fn runs(&self) -> u32 {
        self.runs
    }

    pub fn decompress(&mut self, input: &[u8]) -> Result<Vec<u8>, ReadError> {
        let mut streams = StreamReader::new(input);
        let mut labels = LabelTable::empty();
        let mut codecs: Option<Vec<Codec>> = None;
        let mut writer = XmlWriter::with_capacity(input.len().saturating_mul(4));
        let mut open = Vec::new();
        self.runs = 0;

        if streams.is_empty() {
            return Err(ReadError::InvalidFormat);
        }
        while !streams.is_empty() {
            let head_len = streams.u32()? as usize;
            let head = streams.next_stream(head_len)?;
            let mut head = ByteReader::new(&head);

            if codecs.is_none() {
                let header = FileHeader::load(&mut head)?;
                self.whitespace_ignored = header.whitespace_ignored;
                codecs = Some(header_codecs(&header.options, self.registry)?);
            }
            let codecs = codecs.as_deref().unwrap_or_default();

            let mut run = load_run(&mut head, &mut streams, &mut labels, codecs)?;
            decode_tokens(&mut run, &labels, &mut writer, &mut open)?;
            self.runs += 1;
        }

        if let Some(&label) = open.last() {
            return Err(corrupt(format!(
                "element <{}> is never closed",
                labels.display(label)
            )));
        }
        let output = writer
            .finish()
            .ok_or_else(|| corrupt("document ends inside a start tag"))?;
        info!(
            input = input.len(),
            output = output.len(),
            runs = self.runs,
            "document decompressed"
        );
        Ok(output)
    }
}

/// Read one run head and the streams that follow it
fn load_run<'c>(
    head: &mut ByteReader<'_>,
    streams: &mut StreamReader<'_>,
    labels: &mut LabelTable,
    codecs: &'c [Codec],
) -> Result<Run<'c>, ReadError> {
    let total = head.u32()? as u64;
    let layout = RunLayout::load(head)?;
    labels.load_delta(head)?;
    let shapes = EnumDictionaries::load_shapes(head)?;

    let dictionary_size: u64 = shapes.iter().map(|s| s.size as u64).sum();
    if layout.data_size() + dictionary_size != total {
        return Err(corrupt(format!(
            "run declares {} data bytes but its layout holds {}",
            total,
            layout.data_size() + dictionary_size
        )));
    }

    // Codec states, numbered in layout order like on the way in
    let mut next_enum = 0;
    let mut states = Vec::with_capacity(layout.blocks.len());
    for block in &layout.blocks[1..] {
        let codec = block
            .path
            .checked_sub(1)
            .and_then(|i| codecs.get(i as usize))
            .ok_or_else(|| corrupt(format!("unknown path expression {}", block.path)))?;
        if codec.props().containers != block.sizes.len() {
            return Err(corrupt(format!(
                "block of '{}' has {} containers, expected {}",
                codec,
                block.sizes.len(),
                codec.props().containers
            )));
        }
        states.push((codec, codec.init_state(&mut next_enum)));
    }
    if next_enum as usize != shapes.len() {
        return Err(corrupt(format!(
            "run has {} enumeration dictionaries, its codecs need {}",
            shapes.len(),
            next_enum
        )));
    }

    let small_dictionaries: Vec<Option<&[u8]>> = shapes
        .iter()
        .map(|shape| {
            if (shape.size as usize) < SMALL_THRESHOLD {
                head.raw(shape.size as usize).map(Some)
            } else {
                Ok(None)
            }
        })
        .collect::<Result<_, _>>()?;

    let mut buffers = layout.allocate();
    for (buffer, size) in buffers.iter_mut().flatten().zip(container_sizes(&layout)) {
        if size < SMALL_THRESHOLD {
            buffer.extend_from_slice(head.raw(size)?);
        }
    }
    if !head.is_empty() {
        return Err(corrupt("trailing bytes in run header"));
    }

    let mut dictionaries = EnumDictionaries::new();
    for (shape, small) in shapes.iter().zip(small_dictionaries) {
        match small {
            Some(data) => dictionaries.push(*shape, data)?,
            None => load_large_dictionary(&mut dictionaries, *shape, streams)?,
        }
    }
    for (buffer, size) in buffers.iter_mut().flatten().zip(container_sizes(&layout)) {
        if size >= SMALL_THRESHOLD {
            streams.next_into(buffer, size)?;
        }
    }

    debug!(
        blocks = layout.blocks.len(),
        data = total,
        labels = labels.len(),
        "run block loaded"
    );

    let mut buffers = buffers
        .into_iter()
        .map(|block| block.into_iter().map(InputContainer::new).collect::<Vec<_>>());
    let structural = buffers.next().unwrap_or_default();
    let blocks = states
        .into_iter()
        .zip(buffers)
        .map(|((codec, state), containers)| RunBlock {
            codec,
            containers,
            state,
        })
        .collect();
    Ok(Run {
        structural,
        blocks,
        dictionaries,
    })
}

fn container_sizes(layout: &RunLayout) -> impl Iterator<Item = usize> + '_ {
    layout
        .blocks
        .iter()
        .flat_map(|block| block.sizes.iter().map(|&size| size as usize))
}

fn load_large_dictionary(
    dictionaries: &mut EnumDictionaries,
    shape: DictionaryShape,
    streams: &mut StreamReader<'_>,
) -> Result<(), ReadError> {
    let data = streams.next_stream(shape.size as usize)?;
    dictionaries.push(shape, &data)
}

/// Replay the structure tokens of one run into `writer`
fn decode_tokens(
    run: &mut Run<'_>,
    labels: &LabelTable,
    writer: &mut XmlWriter,
    open: &mut Vec<LabelId>,
) -> Result<(), ReadError> {
    let [tree, whitespace, special] = &mut run.structural[..] else {
        return Err(corrupt("malformed structural block"));
    };
    let data = &mut run.blocks;
    let dictionaries = &run.dictionaries;

    let mut value = Vec::new();
    while !tree.is_exhausted() {
        match Token::load(tree)? {
            Token::Start(index) => {
                let label = labels
                    .id_at(index)
                    .ok_or_else(|| corrupt(format!("unknown label {}", index)))?;
                let name = labels.name(label);
                if label.is_attribute() {
                    if !writer.start_attribute(name) {
                        return Err(corrupt("attribute outside of a start tag"));
                    }
                } else if writer.in_attribute() {
                    return Err(corrupt("element inside an attribute"));
                } else {
                    writer.start_element(name);
                }
                open.push(label);
            }
            Token::End => {
                let label = open.pop().ok_or_else(|| corrupt("end token without start"))?;
                if label.is_attribute() {
                    writer.end_attribute();
                } else {
                    writer.end_element(labels.name(label));
                }
            }
            Token::EmptyEnd => {
                let label = open.pop().ok_or_else(|| corrupt("end token without start"))?;
                if label.is_attribute() || !writer.end_empty() {
                    return Err(corrupt("misplaced empty element end"));
                }
            }
            Token::Whitespace => writer.text(whitespace.bytes()?),
            Token::AttributeWhitespace => {
                if !writer.attribute_whitespace(whitespace.bytes()?) {
                    return Err(corrupt("attribute whitespace outside of a start tag"));
                }
            }
            Token::Special => {
                if writer.in_attribute() {
                    return Err(corrupt("markup inside an attribute"));
                }
                writer.special(special.bytes()?);
            }
            Token::Text(id) => {
                let block = (id as usize)
                    .checked_sub(1)
                    .and_then(|i| data.get_mut(i))
                    .ok_or_else(|| corrupt(format!("text token for unknown block {}", id)))?;
                value.clear();
                block
                    .codec
                    .decode(&mut block.containers, &mut block.state, dictionaries, &mut value)?;
                writer.text(&value);
            }
        }
    }

    let leftover = !whitespace.is_exhausted()
        || !special.is_exhausted()
        || data
            .iter()
            .flat_map(|block| block.containers.iter())
            .any(|container| !container.is_exhausted());
    if leftover {
        return Err(corrupt("container holds more data than the structure uses"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, WhitespaceConfig};
    use crate::writer::Compressor;

    fn round_trip(paths: &[&str], doc: &str) -> String {
        let registry = CodecRegistry::new();
        let config = Config {
            paths: paths.iter().map(|p| p.to_string()).collect(),
            whitespace: WhitespaceConfig::preserve(),
            ..Config::default()
        };
        let mut compressor = Compressor::new(&config, &registry).unwrap();
        let compressed = compressor.compress(doc.as_bytes()).unwrap();
        let mut decompressor = Decompressor::new(&registry);
        String::from_utf8(decompressor.decompress(&compressed).unwrap()).unwrap()
    }

    #[test]
    fn test_round_trip_plain() {
        let doc = "<a><b>42</b><b>7</b></a>";
        assert_eq!(round_trip(&["/a/b=>u"], doc), doc);
    }

    #[test]
    fn test_round_trip_markup() {
        let doc = "<?xml version=\"1.0\"?>\n<!-- list -->\n<r  id=\"1\" kind='x' >\n  <e/>\n  <f a=\"&amp;\" />\n  <![CDATA[raw <data>]]>\n</r>\n";
        let expected = doc.replace("kind='x'", "kind=\"x\"");
        assert_eq!(round_trip(&[], doc), expected);
    }

    #[test]
    fn test_round_trip_codecs() {
        let doc = "<log><t>2024-01-02</t><v>1,2,3</v><s>ok</s><s>ok</s><s>fail</s><d>10</d><d>7</d><d>-3</d></log>";
        let paths = [
            "//t=>seq(u(4) \"-\" u(2) \"-\" u(2))",
            "//v=>rep(\",\", u)",
            "//s=>e",
            "//d=>di",
        ];
        assert_eq!(round_trip(&paths, doc), doc);
    }

    #[test]
    fn test_bad_magic() {
        let registry = CodecRegistry::new();
        let mut decompressor = Decompressor::new(&registry);
        let (stream, _) = crate::stream::compress_stream(&[0, 0, 0], 6).unwrap();
        let mut file = vec![3];
        file.extend_from_slice(&stream);
        assert!(matches!(
            decompressor.decompress(&file),
            Err(ReadError::InvalidFormat)
        ));
        assert!(matches!(decompressor.decompress(&[]), Err(ReadError::InvalidFormat)));
    }

    #[test]
    fn test_truncated_file_is_detected() {
        let registry = CodecRegistry::new();
        let mut compressor = Compressor::new(&Config::default(), &registry).unwrap();
        let compressed = compressor.compress(b"<a><b>hello</b></a>").unwrap();
        let cut = &compressed[..compressed.len() - 3];
        assert!(Decompressor::new(&registry).decompress(cut).is_err());
    }
}
