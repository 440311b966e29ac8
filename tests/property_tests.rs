// SPDX-License-Identifier: MIT
//! Property-based tests using proptest
//!
//! Random path expressions are checked against random label paths, and random
//! documents are pushed through a full compress/decompress cycle.

use proptest::prelude::*;

use pathpress::codec::EnumTable;
use pathpress::fsm::EdgeKind;
use pathpress::path::parse_path;
use pathpress::{
    CodecRegistry, Compressor, Config, Decompressor, Fsm, LabelId, LabelKind, LabelTable,
    WhitespaceConfig,
};

const NAMES: [&str; 6] = ["a", "b", "c", "d", "@x", "@y"];

/// Strategy for generating one step of a path expression
fn step_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("a".to_string()),
        Just("b".to_string()),
        Just("c".to_string()),
        Just("#".to_string()),
        Just("*".to_string()),
        Just("##".to_string()),
        Just("@x".to_string()),
        Just("@#".to_string()),
        Just("(a|b)".to_string()),
        Just("(c|#)".to_string()),
    ]
}

/// Strategy for generating path expressions such as `//a/#//@x`
fn path_strategy() -> impl Strategy<Value = String> {
    (
        prop::bool::ANY,
        prop::collection::vec((prop::bool::ANY, step_strategy()), 0..5),
    )
        .prop_map(|(deep, steps)| {
            let mut path = String::from(if deep { "//" } else { "/" });
            for (i, (any_depth, step)) in steps.iter().enumerate() {
                if i > 0 {
                    path.push_str(if *any_depth { "//" } else { "/" });
                }
                path.push_str(step);
            }
            path
        })
}

/// Strategy for generating label paths over a small alphabet
fn labels_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..NAMES.len(), 0..7)
}

fn intern_all(labels: &mut LabelTable) -> Vec<LabelId> {
    NAMES
        .iter()
        .map(|name| match name.strip_prefix('@') {
            Some(attr) => labels.intern(attr.as_bytes(), LabelKind::Attribute),
            None => labels.intern(name.as_bytes(), LabelKind::Element),
        })
        .collect()
}

fn compile(path: &str) -> (Fsm, Vec<LabelId>) {
    let mut labels = LabelTable::new();
    let (nfa, _) = parse_path(path, &mut labels).unwrap();
    let alphabet = intern_all(&mut labels);
    (nfa, alphabet)
}

fn to_ids(alphabet: &[LabelId], indices: &[usize]) -> Vec<LabelId> {
    indices.iter().map(|&i| alphabet[i]).collect()
}

/// Strategy for generating small XML documents with mixed content
fn element_strategy() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        "[0-9]{1,6}",
        "[a-z ]{0,12}",
        Just("  padded  ".to_string()),
        Just("&amp;&lt;".to_string()),
    ];
    let name = prop_oneof![Just("a"), Just("b"), Just("price"), Just("item")];
    leaf.prop_recursive(3, 24, 4, move |inner| {
        (
            name.clone(),
            prop::option::of("[0-9a-z]{0,5}"),
            prop::collection::vec(inner, 0..4),
            prop::bool::ANY,
        )
            .prop_map(|(name, attr, children, newline)| {
                let attr = attr.map(|v| format!(" id=\"{}\"", v)).unwrap_or_default();
                if children.is_empty() {
                    return format!("<{}{}/>", name, attr);
                }
                let sep = if newline { "\n  " } else { "" };
                format!("<{n}{a}>{s}{c}</{n}>", n = name, a = attr, s = sep, c = children.join(sep))
            })
    })
}

fn document_strategy() -> impl Strategy<Value = String> {
    element_strategy().prop_map(|body| format!("<root>{}</root>\n", body))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_minimal_dfa_matches_nfa(path in path_strategy(), samples in prop::collection::vec(labels_strategy(), 1..16)) {
        let (nfa, alphabet) = compile(&path);
        let dfa = nfa.determinize().minimize();
        for sample in &samples {
            let ids = to_ids(&alphabet, sample);
            prop_assert_eq!(nfa.accepts(&ids), dfa.accepts(&ids), "path {} on {:?}", path, sample);
        }
    }

    #[test]
    fn prop_minimize_is_idempotent(path in path_strategy(), samples in prop::collection::vec(labels_strategy(), 1..16)) {
        let (nfa, alphabet) = compile(&path);
        let once = nfa.determinize().minimize();
        let twice = once.minimize();
        prop_assert!(twice.state_count() <= once.state_count());
        for sample in &samples {
            let ids = to_ids(&alphabet, sample);
            prop_assert_eq!(once.accepts(&ids), twice.accepts(&ids));
        }
    }

    #[test]
    fn prop_reverse_is_an_involution(path in path_strategy(), samples in prop::collection::vec(labels_strategy(), 1..16)) {
        let (nfa, alphabet) = compile(&path);
        let reverse = nfa.reverse();
        let back = reverse.reverse().determinize().minimize();
        for sample in &samples {
            let ids = to_ids(&alphabet, sample);
            let mut reversed = ids.clone();
            reversed.reverse();
            prop_assert_eq!(nfa.accepts(&ids), back.accepts(&ids));
            prop_assert_eq!(nfa.accepts(&ids), reverse.accepts(&reversed));
        }
    }

    #[test]
    fn prop_determinized_edges_are_unambiguous(path in path_strategy()) {
        let (nfa, alphabet) = compile(&path);
        let dfa = nfa.determinize();
        for state in dfa.states() {
            for &label in &alphabet {
                let mut exact = 0;
                let mut negated = 0;
                let mut pound = 0;
                for edge in dfa.edges_from(state) {
                    match &edge.kind {
                        EdgeKind::Empty => prop_assert!(false, "empty edge in DFA"),
                        EdgeKind::Label(x) if *x == label => exact += 1,
                        EdgeKind::Label(x) if *x == label.pound_of() => pound += 1,
                        EdgeKind::Neg(_) if edge.kind.matches(label) => negated += 1,
                        _ => {}
                    }
                }
                prop_assert!(exact <= 1 && negated <= 1 && pound <= 1);
            }
        }
    }

    #[cfg(feature = "negate")]
    #[test]
    fn prop_negation_complements(path in path_strategy(), samples in prop::collection::vec(labels_strategy(), 1..16)) {
        let (nfa, alphabet) = compile(&path);
        let dfa = nfa.determinize().minimize();
        let negated = dfa.negate();
        for sample in &samples {
            let ids = to_ids(&alphabet, sample);
            prop_assert_eq!(dfa.accepts(&ids), !negated.accepts(&ids));
        }
    }

    #[test]
    fn prop_enumeration_assigns_stable_indices(values in prop::collection::vec("[a-c]{0,3}", 1..40)) {
        let mut table = EnumTable::new();
        let indices: Vec<u32> = values.iter().map(|v| table.lookup(0, v.as_bytes())).collect();
        for (i, a) in values.iter().enumerate() {
            for (j, b) in values.iter().enumerate() {
                prop_assert_eq!(a == b, indices[i] == indices[j]);
            }
        }
    }

    #[test]
    fn prop_round_trip_preserves_document(doc in document_strategy()) {
        let registry = CodecRegistry::new();
        let config = Config {
            paths: vec![
                "//price=>u".to_string(),
                "//item/#=>e".to_string(),
                "//@id=>or(u, t)".to_string(),
                "/root/a//b=>rl".to_string(),
            ],
            whitespace: WhitespaceConfig::preserve(),
            ..Config::default()
        };
        let mut compressor = Compressor::new(&config, &registry).unwrap();
        let packed = compressor.compress(doc.as_bytes()).unwrap();
        let unpacked = Decompressor::new(&registry).decompress(&packed).unwrap();
        prop_assert_eq!(String::from_utf8(unpacked).unwrap(), doc);
    }
}
