// SPDX-License-Identifier: MIT
//! # pathpress
//!
//! A structure-aware XML compressor. The document tree is split into its
//! structure and its leaf values; every leaf is routed by its root-to-leaf
//! label path into a container chosen by a list of path expressions, and each
//! container is stored with a codec suited to its values.
//!
//! ## Pipeline
//!
//! ```text
//! XML ─ quick-xml ─▶ Compressor ─┬─▶ structure tokens   ─┐
//!                                 ├─▶ PathRouter ─▶ codec ─┼─▶ zlib streams
//!                                 └─▶ whitespace/special ─┘
//! ```
//!
//! - [`labels`]: interned element and attribute names
//! - [`fsm`]: automata with determinization, minimization, reversal and negation
//! - [`path`]: the path expression language, compiled to automata
//! - [`router`]: reverse data guide and path dictionary
//! - [`codec`]: leaf codecs and combinators, parsed from descriptions like
//!   `seq(u "." u)`
//! - [`container`]: containers, container blocks and the run layout
//!
//! ## Path expressions
//!
//! ```text
//! //price=>u            every <price> as an unsigned integer
//! /catalog/#=>e         every child of <catalog>, one dictionary per child name
//! //@id=>seq("x" u)     every id attribute of the form x123
//! ```
//!
//! The catch-all expressions `//#` and `/` are always installed after the
//! configured ones, so every leaf finds a container.
//!
//! ## Usage
//!
//! ```rust
//! use pathpress::{CodecRegistry, Compressor, Config, Decompressor, WhitespaceConfig};
//!
//! let registry = CodecRegistry::new();
//! let config = Config {
//!     paths: vec!["//b=>u".to_string()],
//!     whitespace: WhitespaceConfig::preserve(),
//!     ..Config::default()
//! };
//! let mut compressor = Compressor::new(&config, &registry).unwrap();
//! let packed = compressor.compress(b"<a><b>42</b><b>7</b></a>").unwrap();
//!
//! let mut decompressor = Decompressor::new(&registry);
//! let xml = decompressor.decompress(&packed).unwrap();
//! assert_eq!(xml, b"<a><b>42</b><b>7</b></a>");
//! ```

pub mod arena;
pub mod codec;
pub mod config;
pub mod container;
pub mod format;
pub mod fsm;
pub mod labels;
pub mod path;
pub mod reader;
pub mod router;
pub mod stats;
pub mod stream;
pub mod varint;
pub mod writer;
pub mod xml;

// Re-export main types
pub use codec::{Codec, CodecError, CodecRegistry, CustomCodec};
pub use config::{Config, IgnoreConfig, WhitespaceConfig, WhitespaceMode};
pub use fsm::Fsm;
pub use labels::{LabelId, LabelKind, LabelTable};
pub use path::{PathError, PathExpr, PathSet};
pub use reader::{Decompressor, ReadError};
pub use router::{Candidate, PathRouter};
pub use stats::CompressionStats;
pub use writer::{Compressor, WriteError};
