// SPDX-License-Identifier: MIT
//! End-to-end scenarios: codecs, routing and the compressed file format

use std::sync::Arc;

use pathpress::codec::{EnumDictionaries, EnumTable};
use pathpress::container::{Container, InputContainer};
use pathpress::{
    CodecError, CodecRegistry, Compressor, Config, CustomCodec, Decompressor, ReadError,
    WhitespaceConfig, WriteError,
};

fn config(paths: &[&str]) -> Config {
    Config {
        paths: paths.iter().map(|p| p.to_string()).collect(),
        whitespace: WhitespaceConfig::preserve(),
        ..Config::default()
    }
}

fn round_trip_with(registry: &CodecRegistry, config: &Config, doc: &[u8]) -> Vec<u8> {
    let mut compressor = Compressor::new(config, registry).unwrap();
    let packed = compressor.compress(doc).unwrap();
    Decompressor::new(registry).decompress(&packed).unwrap()
}

/// Compress `values` one after another with a single block state, then decode them
fn codec_cycle(description: &str, values: &[&str]) -> (Vec<Container>, Vec<String>) {
    let registry = CodecRegistry::new();
    let codec = registry.parse(description).unwrap();
    let mut containers = vec![Container::new(); codec.props().containers];
    let mut enums = EnumTable::new();
    let mut next_enum = 0;
    let mut state = codec.init_state(&mut next_enum);
    for value in values {
        assert!(codec.parse(value.as_bytes()), "{} rejects {}", description, value);
        codec
            .compress(value.as_bytes(), &mut containers, &mut state, &mut enums)
            .unwrap();
    }
    codec.finish(&mut containers, &mut state);

    let mut inputs: Vec<InputContainer> = containers
        .iter()
        .map(|c| InputContainer::new(c.as_slice().to_vec()))
        .collect();
    let mut next_enum = 0;
    let mut state = codec.init_state(&mut next_enum);
    let dictionaries = EnumDictionaries::new();
    let decoded = values
        .iter()
        .map(|_| {
            let mut out = Vec::new();
            codec
                .decode(&mut inputs, &mut state, &dictionaries, &mut out)
                .unwrap();
            String::from_utf8(out).unwrap()
        })
        .collect();
    assert!(inputs.iter().all(InputContainer::is_exhausted));
    (containers, decoded)
}

#[test]
fn test_unsigned_leaves_share_a_container() {
    let registry = CodecRegistry::new();
    let config = config(&["/a/b=>u"]);
    let doc = b"<a><b>42</b><b>7</b></a>";
    let mut compressor = Compressor::new(&config, &registry).unwrap();
    let packed = compressor.compress(doc).unwrap();

    let stats = compressor.stats();
    assert_eq!(stats.paths[0].path, "/a/b=>u");
    assert_eq!(stats.paths[0].values, 2);
    assert_eq!(stats.paths[0].blocks, 1);

    let unpacked = Decompressor::new(&registry).decompress(&packed).unwrap();
    assert_eq!(unpacked, doc);
}

#[test]
fn test_rep_stores_count_then_items() {
    let (containers, decoded) = codec_cycle("rep(\",\", u)", &["1,2,3"]);
    assert_eq!(containers[0].as_slice(), &[2]);
    assert_eq!(containers[1].as_slice(), &[1, 2, 3]);
    assert_eq!(decoded, vec!["1,2,3"]);
}

#[test]
fn test_run_length_collapses_repeats() {
    let (containers, decoded) = codec_cycle("rl", &["x"; 5]);
    assert_eq!(containers[0].as_slice(), &[1, b'x', 4]);
    assert_eq!(decoded, vec!["x"; 5]);
}

#[test]
fn test_unknown_codec_is_fatal() {
    let registry = CodecRegistry::new();
    let result = Compressor::new(&config(&["/a=>zzz(1)"]), &registry);
    let err = result.err().expect("compilation must fail");
    assert!(matches!(err, WriteError::Path(_)));
    assert!(err.to_string().contains("Compressor 'zzz' is not defined"));
}

#[test]
fn test_path_syntax_error_shows_position() {
    let registry = CodecRegistry::new();
    let err = Compressor::new(&config(&["/a/<b"]), &registry)
        .err()
        .expect("compilation must fail");
    let message = err.to_string();
    assert!(message.contains("/a/<b"));
    assert!(message.contains('^'));
}

#[test]
fn test_same_input_same_bytes() {
    let registry = CodecRegistry::new();
    let config = config(&["//price=>u", "//name=>e", "/shop/#=>t"]);
    let doc = b"<shop>\n <item><name>pen</name><price>3</price></item>\n <item><name>pen</name><price>4</price></item>\n <note>open</note>\n</shop>";
    let mut first = Compressor::new(&config, &registry).unwrap();
    let mut second = Compressor::new(&config, &registry).unwrap();
    let a = first.compress(doc).unwrap();
    let b = second.compress(doc).unwrap();
    assert_eq!(a, b);
    assert_eq!(first.compress(doc).unwrap(), a);
}

#[test]
fn test_wildcard_groups_by_label() {
    let registry = CodecRegistry::new();
    let config = config(&["/r/#=>e"]);
    let doc = b"<r><x>1</x><y>1</y><x>2</x><z>3</z></r>";
    let mut compressor = Compressor::new(&config, &registry).unwrap();
    let packed = compressor.compress(doc).unwrap();
    // One block per child name
    assert_eq!(compressor.stats().paths[0].blocks, 3);
    let unpacked = Decompressor::new(&registry).decompress(&packed).unwrap();
    assert_eq!(unpacked, doc);
}

#[test]
fn test_many_run_blocks_round_trip() {
    let registry = CodecRegistry::new();
    let mut config = config(&["//n=>di", "//s=>e", "//t=>rl"]);
    config.memory_cutoff = 1024;
    let mut doc = String::from("<list>\n");
    for i in 0..2000 {
        doc.push_str(&format!(
            "  <e k=\"{}\"><n>{}</n><s>kind{}</s><t>same</t></e>\n",
            i % 7,
            i * 3,
            i % 5
        ));
    }
    doc.push_str("</list>\n");

    let mut compressor = Compressor::new(&config, &registry).unwrap();
    let packed = compressor.compress(doc.as_bytes()).unwrap();
    assert!(compressor.stats().runs > 1);
    assert!(packed.len() < doc.len() / 2);

    let mut decompressor = Decompressor::new(&registry);
    let unpacked = decompressor.decompress(&packed).unwrap();
    assert_eq!(decompressor.runs(), compressor.stats().runs);
    assert_eq!(String::from_utf8(unpacked).unwrap(), doc);
}

#[test]
fn test_large_containers_round_trip() {
    let registry = CodecRegistry::new();
    let config = config(&["//v=>e"]);
    let mut doc = String::from("<d>");
    for i in 0..3000 {
        doc.push_str(&format!("<v>value-{}</v><w>{}</w>", i % 400, i));
    }
    doc.push_str("</d>");
    let mut compressor = Compressor::new(&config, &registry).unwrap();
    let packed = compressor.compress(doc.as_bytes()).unwrap();
    let stats = compressor.stats();
    assert!(stats.dictionaries.raw >= 1024);
    assert!(stats.data.raw > 0);
    assert!(stats.structure.raw > 0);
    let unpacked = Decompressor::new(&registry).decompress(&packed).unwrap();
    assert_eq!(String::from_utf8(unpacked).unwrap(), doc);
}

#[test]
fn test_lossy_whitespace_modes() {
    let registry = CodecRegistry::new();
    let config = Config::default();
    let doc = b"<a>\n  <b>  x  </b>\n</a>";
    assert_eq!(round_trip_with(&registry, &config, doc), b"<a><b>x</b></a>");
}

#[test]
fn test_ignored_markup_is_dropped() {
    let registry = CodecRegistry::new();
    let mut config = config(&[]);
    config.ignore.comments = true;
    config.ignore.processing_instructions = true;
    let doc = b"<?xml version=\"1.0\"?><a><!-- note --><b>1</b><![CDATA[keep]]></a>";
    assert_eq!(
        round_trip_with(&registry, &config, doc),
        b"<a><b>1</b><![CDATA[keep]]></a>"
    );
}

#[derive(Debug)]
struct Upper;

impl CustomCodec for Upper {
    fn description(&self) -> String {
        "upper".to_string()
    }

    fn rejecting(&self) -> bool {
        true
    }

    fn parse(&self, text: &[u8]) -> bool {
        !text.is_empty() && text.iter().all(u8::is_ascii_uppercase)
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
fn test_custom_codec_round_trip() {
    let mut registry = CodecRegistry::new();
    registry
        .register_custom("upper", "upper-case words", |_| {
            Ok(Arc::new(Upper) as Arc<dyn CustomCodec>)
        })
        .unwrap();
    let config = config(&["//w=>upper"]);
    let doc = b"<t><w>ABC</w><w>Mixed</w></t>";
    assert_eq!(round_trip_with(&registry, &config, doc), doc);
}

#[test]
fn test_corrupted_file_is_rejected() {
    let registry = CodecRegistry::new();
    let config = config(&["//b=>u"]);
    let mut compressor = Compressor::new(&config, &registry).unwrap();
    let packed = compressor.compress(b"<a><b>1</b><b>2</b></a>").unwrap();

    let mut trailing = packed.clone();
    trailing.push(0);
    assert!(Decompressor::new(&registry).decompress(&trailing).is_err());

    let mut flipped = packed.clone();
    let last = flipped.len() - 5;
    flipped[last] ^= 0x55;
    assert!(Decompressor::new(&registry).decompress(&flipped).is_err());

    assert!(Decompressor::new(&registry)
        .decompress(b"not compressed")
        .is_err());
}
