// SPDX-License-Identifier: MIT
//! Subset construction and the per-class edge emitter shared by every
//! transformation that produces a deterministic automaton

use super::{EdgeKind, Fsm, SemEdge, StateId};
use crate::labels::{LabelId, LabelKind};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

const KINDS: [LabelKind; 2] = [LabelKind::Element, LabelKind::Attribute];

#[inline]
pub(crate) fn ns(kind: LabelKind) -> usize {
    match kind {
        LabelKind::Element => 0,
        LabelKind::Attribute => 1,
    }
}

/// Transition summary of a state (or state set) per symbol class
///
/// Every label explicitly named by some edge is its own class. All other
/// labels fall into one of two classes, "other element" and "other
/// attribute". Each class records its target and whether a pound edge leads
/// there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Profile<T> {
    /// Sorted by label
    pub explicit: Vec<(LabelId, Option<T>, bool)>,
    pub other: [(Option<T>, bool); 2],
}

impl<T: Clone + PartialEq> Profile<T> {
    /// Target and pound flag for `label`
    pub fn class(&self, label: LabelId) -> (Option<&T>, bool) {
        match self.explicit.binary_search_by_key(&label, |(x, _, _)| *x) {
            Ok(i) => {
                let (_, target, pound) = &self.explicit[i];
                (target.as_ref(), *pound)
            }
            Err(_) => {
                let (target, pound) = &self.other[ns(label.kind())];
                (target.as_ref(), *pound)
            }
        }
    }

    /// Replace targets; `f` returning `None` turns the class into a dead end
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> Option<U>) -> Profile<U> {
        let mut convert = |target: &Option<T>, pound: bool| match target.as_ref().and_then(&mut f) {
            Some(u) => (Some(u), pound),
            None => (None, false),
        };
        let explicit = self
            .explicit
            .iter()
            .map(|(x, t, p)| {
                let (t, p) = convert(t, *p);
                (*x, t, p)
            })
            .collect();
        let other = [
            convert(&self.other[0].0, self.other[0].1),
            convert(&self.other[1].0, self.other[1].1),
        ];
        Profile { explicit, other }
    }

    /// Every class has a target
    pub fn is_complete(&self) -> bool {
        self.other.iter().all(|(t, _)| t.is_some()) && self.explicit.iter().all(|(_, t, _)| t.is_some())
    }

    /// Smallest edge set reproducing this profile under priority semantics
    ///
    /// A single negated edge serves as default when both namespaces share a
    /// non-pound target. Otherwise each namespace gets a pound edge (when a
    /// pound edge led there and no named label is excluded) or a negated edge
    /// scoped by listing the other namespace's wildcard. Named labels that
    /// differ from their default get exact edges.
    pub fn emit(&self) -> Vec<(EdgeKind, T)> {
        let mut out = Vec::new();
        let mut pound_default = [false; 2];
        let [(d_elem, p_elem), (d_attr, p_attr)] = &self.other;

        match d_elem {
            Some(d) if d_elem == d_attr && !*p_elem && !*p_attr => {
                let list = self
                    .explicit
                    .iter()
                    .filter(|(_, t, _)| t.as_ref() != Some(d))
                    .map(|(x, _, _)| *x)
                    .collect();
                out.push((EdgeKind::Neg(list), d.clone()));
            }
            _ => {
                for kind in KINDS {
                    let (Some(d), pound) = &self.other[ns(kind)] else {
                        continue;
                    };
                    let holes = self
                        .explicit
                        .iter()
                        .any(|(x, t, _)| x.kind() == kind && t.is_none());
                    if *pound && !holes {
                        pound_default[ns(kind)] = true;
                        out.push((EdgeKind::Label(LabelId::pound(kind)), d.clone()));
                    } else {
                        let mut list: Vec<LabelId> = self
                            .explicit
                            .iter()
                            .filter(|(x, t, _)| x.kind() == kind && t.as_ref() != Some(d))
                            .map(|(x, _, _)| *x)
                            .collect();
                        list.push(LabelId::pound(kind).pound_of_other());
                        list.sort_unstable();
                        out.push((EdgeKind::Neg(list), d.clone()));
                    }
                }
            }
        }

        for (x, target, pound) in &self.explicit {
            let Some(t) = target else { continue };
            let slot = ns(x.kind());
            let covered = match &self.other[slot].0 {
                Some(d) => t == d && (!pound_default[slot] || *pound),
                None => false,
            };
            if !covered {
                out.push((EdgeKind::Label(*x), t.clone()));
            }
        }
        out
    }
}

/// Profile of a union of edges, targets sorted and deduplicated
pub(crate) fn collect_profile(edges: &[SemEdge]) -> Profile<Vec<StateId>> {
    let mut named: Vec<LabelId> = Vec::new();
    for edge in edges {
        match &edge.kind {
            EdgeKind::Label(x) if !x.is_pound() => named.push(*x),
            EdgeKind::Neg(list) => named.extend(list.iter().filter(|x| !x.is_pound())),
            _ => {}
        }
    }
    named.sort_unstable();
    named.dedup();

    let gather = |hit: &dyn Fn(&EdgeKind) -> bool| {
        let mut targets: Vec<StateId> = Vec::new();
        let mut pound = false;
        for edge in edges.iter().filter(|e| hit(&e.kind)) {
            targets.push(edge.to);
            pound |= edge.pound;
        }
        targets.sort_unstable();
        targets.dedup();
        if targets.is_empty() {
            (None, false)
        } else {
            (Some(targets), pound)
        }
    };

    let explicit = named
        .iter()
        .map(|&x| {
            let (t, p) = gather(&|k: &EdgeKind| k.matches(x));
            (x, t, p)
        })
        .collect();
    let other = [
        gather(&|k: &EdgeKind| k.matches_other(LabelKind::Element)),
        gather(&|k: &EdgeKind| k.matches_other(LabelKind::Attribute)),
    ];
    Profile { explicit, other }
}

impl Fsm {
    /// Profile of a deterministic state
    pub(crate) fn dfa_profile(&self, state: StateId) -> Profile<StateId> {
        collect_profile(&self.semantic_edges(state)).map(|targets| targets.first().copied())
    }

    /// Empty deterministic automaton without states
    pub(crate) fn empty_dfa() -> Fsm {
        Fsm {
            states: Vec::new(),
            edges: Vec::new(),
            start: StateId(0),
            deterministic: true,
        }
    }

    /// Subset construction
    ///
    /// Deterministic states are interned by the sorted set of original states
    /// they stand for, so equal sets collapse into one state.
    pub fn determinize(&self) -> Fsm {
        if self.deterministic {
            return self.clone();
        }

        let sem: Vec<Vec<SemEdge>> = self
            .states()
            .map(|s| {
                self.semantic_edges(s)
                    .into_iter()
                    .filter(|e| e.kind != EdgeKind::Empty)
                    .collect()
            })
            .collect();

        let mut dfa = Fsm::empty_dfa();
        let mut index: FxHashMap<Vec<StateId>, StateId> = FxHashMap::default();
        let mut queue: VecDeque<StateId> = VecDeque::new();

        let mut intern = |set: Vec<StateId>, dfa: &mut Fsm, queue: &mut VecDeque<StateId>| {
            if let Some(&id) = index.get(&set) {
                return id;
            }
            let is_final = set.iter().any(|&s| self.is_final(s));
            let id = dfa.add_state(is_final);
            dfa.states[id.index()].origin = set.clone();
            index.insert(set, id);
            queue.push_back(id);
            id
        };

        let start = intern(self.closure(&[self.start]), &mut dfa, &mut queue);
        dfa.start = start;

        while let Some(id) = queue.pop_front() {
            let members = dfa.states[id.index()].origin.clone();
            let edges: Vec<SemEdge> = members
                .iter()
                .flat_map(|s| sem[s.index()].iter().cloned())
                .collect();
            let profile = collect_profile(&edges);
            let mapped = profile.map(|targets| Some(intern(self.closure(targets), &mut dfa, &mut queue)));
            for (kind, to) in mapped.emit() {
                dfa.add_edge(id, to, kind);
            }
        }

        dfa.deterministic = true;
        dfa.analyze();
        dfa
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelTable;

    fn labels() -> (LabelId, LabelId, LabelId) {
        let mut table = LabelTable::new();
        (
            table.intern(b"a", LabelKind::Element),
            table.intern(b"b", LabelKind::Element),
            table.intern(b"x", LabelKind::Attribute),
        )
    }

    /// At most one edge of each state fires for any label
    fn assert_deterministic(fsm: &Fsm, probes: &[LabelId]) {
        for s in fsm.states() {
            for &l in probes {
                let firing: Vec<_> = fsm
                    .semantic_edges(s)
                    .into_iter()
                    .filter(|e| e.kind.matches(l))
                    .collect();
                assert!(firing.len() <= 1, "state {:?} label {:?}", s, l);
            }
        }
    }

    #[test]
    fn test_emit_folds_default_target() {
        let (a, b, _) = labels();
        let profile = Profile {
            explicit: vec![(a, Some(1u32), false), (b, Some(2u32), false)],
            other: [(Some(1), false), (Some(1), false)],
        };
        let edges = profile.emit();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0], (EdgeKind::Neg(vec![b]), 1));
        assert_eq!(edges[1], (EdgeKind::Label(b), 2));
    }

    #[test]
    fn test_emit_keeps_pound_edges() {
        let (a, _, _) = labels();
        let profile = Profile {
            explicit: vec![(a, Some(2u32), false)],
            other: [(Some(1), true), (None, false)],
        };
        let edges = profile.emit();
        assert_eq!(edges[0], (EdgeKind::Label(LabelId::ELEMENT_POUND), 1));
        assert_eq!(edges[1], (EdgeKind::Label(a), 2));
    }

    #[test]
    fn test_emit_hole_needs_negation() {
        let (a, _, _) = labels();
        let profile = Profile {
            explicit: vec![(a, None, false)],
            other: [(Some(1u32), true), (None, false)],
        };
        let edges = profile.emit();
        assert_eq!(
            edges,
            vec![(EdgeKind::Neg(vec![a, LabelId::ATTRIBUTE_POUND]), 1)]
        );
    }

    #[test]
    fn test_determinize_overlapping_edges() {
        let (a, b, x) = labels();
        let mut nfa = Fsm::new();
        let s = nfa.start();
        let t1 = nfa.add_state(true);
        let t2 = nfa.add_state(false);
        let t3 = nfa.add_state(true);
        nfa.add_label_edge(s, t1, a);
        nfa.add_neg_edge(s, t2, vec![]);
        nfa.add_label_edge(t2, t3, b);

        let dfa = nfa.determinize();
        assert!(dfa.is_deterministic());
        assert_deterministic(&dfa, &[a, b, x]);
        for word in [vec![a], vec![a, b], vec![b, b], vec![x, b], vec![b], vec![]] {
            assert_eq!(dfa.accepts(&word), nfa.accepts(&word), "{:?}", word);
        }
    }

    #[test]
    fn test_determinize_tracks_pound_transitions() {
        let (a, b, _) = labels();
        let mut nfa = Fsm::new();
        let s = nfa.start();
        let t = nfa.add_state(true);
        nfa.add_label_edge(s, t, LabelId::ELEMENT_POUND);
        let u = nfa.add_state(true);
        nfa.add_label_edge(s, u, a);

        let dfa = nfa.determinize();
        let (_, over_pound) = dfa.step(dfa.start(), b).unwrap();
        assert!(over_pound);
        let (_, over_pound) = dfa.step(dfa.start(), a).unwrap();
        assert!(!over_pound);
    }

    #[test]
    fn test_origin_sets() {
        let (a, _, _) = labels();
        let mut nfa = Fsm::new();
        let s = nfa.start();
        let t = nfa.add_state(true);
        nfa.add_empty_edge(s, t);
        nfa.add_label_edge(t, t, a);
        let dfa = nfa.determinize();
        assert_eq!(dfa.state(dfa.start()).origin, vec![s, t]);
    }
}
