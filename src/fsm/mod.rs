// SPDX-License-Identifier: MIT
//! Finite-state automata over interned labels
//!
//! An automaton owns two arenas: states and edges, addressed by [`StateId`]
//! and [`EdgeId`]. Edges come in three kinds:
//!
//! - `Label(x)` matches exactly `x`. When `x` is one of the wildcard labels
//!   (`#` or `@#`) the edge is a *pound* edge and matches every label of its
//!   namespace.
//! - `Neg(list)` matches every label not in `list`. A wildcard inside the list
//!   excludes its whole namespace, which is how a negated edge is scoped to
//!   elements or attributes.
//! - `Empty` is an ε-transition and only appears in non-deterministic
//!   automata.
//!
//! Non-deterministic automata follow every matching edge. Deterministic
//! automata resolve overlapping edges by priority: an exact label edge first,
//! then a negated edge, then the pound edge of the label's namespace. Whether
//! a transition was taken over a pound edge matters to the router, which
//! instantiates a path-dictionary node for each concrete label crossing one.

mod analysis;
mod determinize;
mod minimize;

use crate::labels::{LabelId, LabelKind, LabelTable};
use std::fmt;

/// Index of a state inside its automaton
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub u32);

/// Index of an edge inside its automaton
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub u32);

impl StateId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What an edge matches
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Label(LabelId),
    /// Sorted, deduplicated exclusion list
    Neg(Vec<LabelId>),
    Empty,
}

impl EdgeKind {
    /// Does this edge admit `label`?
    #[inline]
    pub fn matches(&self, label: LabelId) -> bool {
        match self {
            EdgeKind::Label(x) => {
                *x == label || (x.is_pound() && x.kind() == label.kind())
            }
            EdgeKind::Neg(list) => {
                !list.contains(&label) && !list.contains(&label.pound_of())
            }
            EdgeKind::Empty => false,
        }
    }

    /// Does this edge admit labels of `kind` that it never names?
    #[inline]
    pub(crate) fn matches_other(&self, kind: LabelKind) -> bool {
        match self {
            EdgeKind::Label(x) => *x == LabelId::pound(kind),
            EdgeKind::Neg(list) => !list.contains(&LabelId::pound(kind)),
            EdgeKind::Empty => false,
        }
    }

    #[inline]
    pub fn is_pound(&self) -> bool {
        matches!(self, EdgeKind::Label(x) if x.is_pound())
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub from: StateId,
    pub to: StateId,
    pub kind: EdgeKind,
}

/// Results of the analysis passes, valid on deterministic automata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateFlags {
    /// Every label has an outgoing transition
    pub out_complete: bool,
    /// Final, out-complete, and only accepting states are reachable
    pub accepting: bool,
    /// A pound edge is reachable from here
    pub wildcard_ahead: bool,
}

#[derive(Debug, Clone, Default)]
pub struct State {
    pub is_final: bool,
    pub out: Vec<EdgeId>,
    pub flags: StateFlags,
    /// States of the automaton this one was built from (determinization)
    pub origin: Vec<StateId>,
}

/// Edge in union form: matching edges may overlap and all of them apply
#[derive(Debug, Clone)]
pub(crate) struct SemEdge {
    pub kind: EdgeKind,
    pub to: StateId,
    pub pound: bool,
}

/// Label automaton
#[derive(Debug, Clone)]
pub struct Fsm {
    states: Vec<State>,
    edges: Vec<Edge>,
    start: StateId,
    deterministic: bool,
}

impl Fsm {
    /// Automaton with a single non-final start state
    pub fn new() -> Self {
        let mut fsm = Self {
            states: Vec::new(),
            edges: Vec::new(),
            start: StateId(0),
            deterministic: false,
        };
        fsm.add_state(false);
        fsm
    }

    pub fn add_state(&mut self, is_final: bool) -> StateId {
        let id = StateId(self.states.len() as u32);
        self.states.push(State {
            is_final,
            ..State::default()
        });
        id
    }

    pub fn add_label_edge(&mut self, from: StateId, to: StateId, label: LabelId) -> EdgeId {
        self.add_edge(from, to, EdgeKind::Label(label))
    }

    pub fn add_neg_edge(&mut self, from: StateId, to: StateId, mut labels: Vec<LabelId>) -> EdgeId {
        labels.sort_unstable();
        labels.dedup();
        self.add_edge(from, to, EdgeKind::Neg(labels))
    }

    pub fn add_empty_edge(&mut self, from: StateId, to: StateId) -> EdgeId {
        self.deterministic = false;
        self.add_edge(from, to, EdgeKind::Empty)
    }

    fn add_edge(&mut self, from: StateId, to: StateId, kind: EdgeKind) -> EdgeId {
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge { from, to, kind });
        self.states[from.index()].out.push(id);
        id
    }

    /// Detach an edge from its source state
    pub fn remove_edge(&mut self, id: EdgeId) {
        let from = self.edges[id.0 as usize].from;
        self.states[from.index()].out.retain(|&e| e != id);
    }

    pub fn start(&self) -> StateId {
        self.start
    }

    pub fn set_start(&mut self, state: StateId) {
        self.start = state;
    }

    pub fn set_final(&mut self, state: StateId, is_final: bool) {
        self.states[state.index()].is_final = is_final;
    }

    #[inline]
    pub fn is_final(&self, state: StateId) -> bool {
        self.states[state.index()].is_final
    }

    #[inline]
    pub fn flags(&self, state: StateId) -> StateFlags {
        self.states[state.index()].flags
    }

    pub fn state(&self, state: StateId) -> &State {
        &self.states[state.index()]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0 as usize]
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Number of live edges
    pub fn edge_count(&self) -> usize {
        self.states.iter().map(|s| s.out.len()).sum()
    }

    pub fn states(&self) -> impl Iterator<Item = StateId> {
        (0..self.states.len() as u32).map(StateId)
    }

    /// Outgoing edges of `state`
    pub fn edges_from(&self, state: StateId) -> impl Iterator<Item = &Edge> + '_ {
        self.states[state.index()]
            .out
            .iter()
            .map(move |&e| &self.edges[e.0 as usize])
    }

    pub fn is_deterministic(&self) -> bool {
        self.deterministic
    }

    /// Transition of a deterministic automaton
    ///
    /// Returns the successor and whether it was reached over a pound edge.
    pub fn step(&self, state: StateId, label: LabelId) -> Option<(StateId, bool)> {
        debug_assert!(self.deterministic);
        let mut neg = None;
        let mut pound = None;
        for edge in self.edges_from(state) {
            match &edge.kind {
                EdgeKind::Label(x) if *x == label => return Some((edge.to, false)),
                EdgeKind::Label(x) if *x == label.pound_of() => pound = Some(edge.to),
                EdgeKind::Neg(_) if neg.is_none() && edge.kind.matches(label) => {
                    neg = Some(edge.to)
                }
                _ => {}
            }
        }
        neg.map(|to| (to, false))
            .or_else(|| pound.map(|to| (to, true)))
    }

    /// Membership test for either kind of automaton
    pub fn accepts(&self, labels: &[LabelId]) -> bool {
        if self.deterministic {
            let mut state = self.start;
            for &label in labels {
                match self.step(state, label) {
                    Some((next, _)) => state = next,
                    None => return false,
                }
            }
            return self.is_final(state);
        }

        let mut current = self.closure(&[self.start]);
        for &label in labels {
            let mut next: Vec<StateId> = current
                .iter()
                .flat_map(|&s| self.semantic_edges(s))
                .filter(|e| e.kind.matches(label))
                .map(|e| e.to)
                .collect();
            next.sort_unstable();
            next.dedup();
            if next.is_empty() {
                return false;
            }
            current = self.closure(&next);
        }
        current.iter().any(|&s| self.is_final(s))
    }

    /// ε-closure, sorted
    pub(crate) fn closure(&self, seeds: &[StateId]) -> Vec<StateId> {
        let mut seen = vec![false; self.states.len()];
        let mut stack: Vec<StateId> = seeds.to_vec();
        let mut out = Vec::new();
        while let Some(s) = stack.pop() {
            if std::mem::replace(&mut seen[s.index()], true) {
                continue;
            }
            out.push(s);
            for edge in self.edges_from(s) {
                if edge.kind == EdgeKind::Empty && !seen[edge.to.index()] {
                    stack.push(edge.to);
                }
            }
        }
        out.sort_unstable();
        out
    }

    /// Outgoing edges rewritten so that every matching edge applies
    ///
    /// Edges of non-deterministic automata already have that meaning. For a
    /// deterministic state, negated edges exclude the exact labels of the
    /// state, and pound edges are narrowed to what the higher-priority edges
    /// leave over.
    pub(crate) fn semantic_edges(&self, state: StateId) -> Vec<SemEdge> {
        if !self.deterministic {
            return self
                .edges_from(state)
                .map(|e| SemEdge {
                    kind: e.kind.clone(),
                    to: e.to,
                    pound: e.kind.is_pound(),
                })
                .collect();
        }

        let exact: Vec<LabelId> = self
            .edges_from(state)
            .filter_map(|e| match e.kind {
                EdgeKind::Label(x) if !x.is_pound() => Some(x),
                _ => None,
            })
            .collect();
        let negs: Vec<&Vec<LabelId>> = self
            .edges_from(state)
            .filter_map(|e| match &e.kind {
                EdgeKind::Neg(list) => Some(list),
                _ => None,
            })
            .collect();

        let mut out = Vec::new();
        for edge in self.edges_from(state) {
            match &edge.kind {
                EdgeKind::Label(x) if !x.is_pound() => out.push(SemEdge {
                    kind: edge.kind.clone(),
                    to: edge.to,
                    pound: false,
                }),
                EdgeKind::Neg(list) => {
                    let mut list = list.clone();
                    list.extend(exact.iter().copied());
                    list.sort_unstable();
                    list.dedup();
                    out.push(SemEdge {
                        kind: EdgeKind::Neg(list),
                        to: edge.to,
                        pound: false,
                    });
                }
                EdgeKind::Label(p) => {
                    let kind = p.kind();
                    let admitting: Vec<&&Vec<LabelId>> = negs
                        .iter()
                        .filter(|list| !list.contains(p))
                        .collect();
                    if admitting.is_empty() {
                        let mut list: Vec<LabelId> = exact
                            .iter()
                            .copied()
                            .filter(|x| x.kind() == kind)
                            .collect();
                        list.push(p.pound_of_other());
                        list.sort_unstable();
                        list.dedup();
                        let kind = if list.len() == 1 {
                            EdgeKind::Label(*p)
                        } else {
                            EdgeKind::Neg(list)
                        };
                        out.push(SemEdge {
                            kind,
                            to: edge.to,
                            pound: true,
                        });
                    } else {
                        // Only labels every admitting negation lists reach the pound edge
                        for &x in admitting[0].iter() {
                            if x.kind() == kind
                                && !x.is_pound()
                                && !exact.contains(&x)
                                && admitting.iter().all(|list| list.contains(&x))
                            {
                                out.push(SemEdge {
                                    kind: EdgeKind::Label(x),
                                    to: edge.to,
                                    pound: true,
                                });
                            }
                        }
                    }
                }
                EdgeKind::Empty => out.push(SemEdge {
                    kind: EdgeKind::Empty,
                    to: edge.to,
                    pound: false,
                }),
            }
        }
        out
    }

    /// Splice `sub` between `from` and `to` with ε-transitions
    ///
    /// The copied final states stop being final; they get an ε-edge to `to`.
    pub fn add_fsm(&mut self, from: StateId, to: StateId, sub: &Fsm) {
        let offset = self.states.len() as u32;
        for _ in 0..sub.state_count() {
            self.add_state(false);
        }
        for s in sub.states() {
            let src = StateId(s.0 + offset);
            for edge in sub.semantic_edges(s) {
                self.add_edge(src, StateId(edge.to.0 + offset), edge.kind);
            }
            if sub.is_final(s) {
                self.add_empty_edge(src, to);
            }
        }
        self.add_empty_edge(from, StateId(sub.start.0 + offset));
        self.deterministic = false;
    }

    /// Automaton for the reversed language
    ///
    /// A fresh start state has ε-edges to the old final states, the old start
    /// state becomes the only final state and every edge is flipped.
    pub fn reverse(&self) -> Fsm {
        let mut rev = Fsm {
            states: Vec::with_capacity(self.states.len() + 1),
            edges: Vec::new(),
            start: StateId(0),
            deterministic: false,
        };
        for _ in self.states() {
            rev.add_state(false);
        }
        let start = rev.add_state(false);
        rev.start = start;
        rev.set_final(self.start, true);

        for s in self.states() {
            for edge in self.semantic_edges(s) {
                rev.add_edge(edge.to, s, edge.kind);
            }
            if self.is_final(s) {
                rev.add_empty_edge(start, s);
            }
        }
        rev
    }

    /// Drop pound edges that can never fire
    ///
    /// In a deterministic state a pound edge is dead when a negated edge
    /// admits its namespace without listing any label of it. In a
    /// non-deterministic state it is redundant when a negated edge to the same
    /// target already admits every label of the namespace.
    pub fn eliminate_redundant_pound_edges(&mut self) {
        for s in self.states() {
            let mut doomed = Vec::new();
            for &id in &self.states[s.index()].out {
                let edge = &self.edges[id.0 as usize];
                let EdgeKind::Label(p) = edge.kind else { continue };
                if !p.is_pound() {
                    continue;
                }
                let kind = p.kind();
                let covered = self.edges_from(s).any(|other| match &other.kind {
                    EdgeKind::Neg(list) => {
                        !list.contains(&p)
                            && !list.iter().any(|x| x.kind() == kind)
                            && (self.deterministic || other.to == edge.to)
                    }
                    _ => false,
                });
                if covered {
                    doomed.push(id);
                }
            }
            for id in doomed {
                self.remove_edge(id);
            }
        }
    }

    /// Render with label names, one state per line
    pub fn display<'a>(&'a self, labels: &'a LabelTable) -> FsmDisplay<'a> {
        FsmDisplay { fsm: self, labels }
    }
}

impl Default for Fsm {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelId {
    /// Wildcard of the opposite namespace
    #[inline]
    pub(crate) fn pound_of_other(self) -> LabelId {
        match self.kind() {
            LabelKind::Element => LabelId::ATTRIBUTE_POUND,
            LabelKind::Attribute => LabelId::ELEMENT_POUND,
        }
    }
}

pub struct FsmDisplay<'a> {
    fsm: &'a Fsm,
    labels: &'a LabelTable,
}

impl fmt::Display for FsmDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fsm = self.fsm;
        writeln!(
            f,
            "{} states, start {}{}",
            fsm.state_count(),
            fsm.start.0,
            if fsm.deterministic { ", deterministic" } else { "" }
        )?;
        for s in fsm.states() {
            let state = fsm.state(s);
            write!(f, "  {}", s.0)?;
            let mut marks = Vec::new();
            if state.is_final {
                marks.push("final");
            }
            if state.flags.accepting {
                marks.push("accepting");
            }
            if state.flags.wildcard_ahead {
                marks.push("wildcard-ahead");
            }
            if !marks.is_empty() {
                write!(f, " [{}]", marks.join(", "))?;
            }
            write!(f, ":")?;
            for (i, edge) in fsm.edges_from(s).enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                match &edge.kind {
                    EdgeKind::Label(x) => {
                        write!(f, "{}{} -> {}", sep, self.labels.display(*x), edge.to.0)?
                    }
                    EdgeKind::Neg(list) => {
                        let names: Vec<String> =
                            list.iter().map(|x| self.labels.display(*x)).collect();
                        write!(f, "{}~{{{}}} -> {}", sep, names.join(" "), edge.to.0)?
                    }
                    EdgeKind::Empty => write!(f, "{}ε -> {}", sep, edge.to.0)?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelTable;

    pub(crate) fn labels() -> (LabelTable, LabelId, LabelId, LabelId) {
        let mut table = LabelTable::new();
        let a = table.intern(b"a", LabelKind::Element);
        let b = table.intern(b"b", LabelKind::Element);
        let x = table.intern(b"x", LabelKind::Attribute);
        (table, a, b, x)
    }

    #[test]
    fn test_edge_matching() {
        let (_, a, b, x) = labels();
        assert!(EdgeKind::Label(a).matches(a));
        assert!(!EdgeKind::Label(a).matches(b));
        assert!(EdgeKind::Label(LabelId::ELEMENT_POUND).matches(b));
        assert!(!EdgeKind::Label(LabelId::ELEMENT_POUND).matches(x));
        assert!(EdgeKind::Neg(vec![]).matches(x));
        assert!(!EdgeKind::Neg(vec![a]).matches(a));
        assert!(EdgeKind::Neg(vec![a]).matches(b));
        assert!(!EdgeKind::Neg(vec![LabelId::ATTRIBUTE_POUND]).matches(x));
        assert!(EdgeKind::Neg(vec![LabelId::ATTRIBUTE_POUND]).matches(a));
        assert!(!EdgeKind::Empty.matches(a));
    }

    #[test]
    fn test_nfa_accepts_with_epsilon() {
        let (_, a, b, _) = labels();
        let mut fsm = Fsm::new();
        let mid = fsm.add_state(false);
        let end = fsm.add_state(true);
        fsm.add_label_edge(fsm.start(), mid, a);
        fsm.add_empty_edge(mid, end);
        fsm.add_label_edge(end, end, b);

        assert!(fsm.accepts(&[a]));
        assert!(fsm.accepts(&[a, b, b]));
        assert!(!fsm.accepts(&[b]));
        assert!(!fsm.accepts(&[]));
    }

    #[test]
    fn test_step_priority() {
        let (_, a, b, x) = labels();
        let mut fsm = Fsm::new();
        let exact = fsm.add_state(true);
        let neg = fsm.add_state(true);
        let pound = fsm.add_state(true);
        let s = fsm.start();
        fsm.add_label_edge(s, exact, a);
        fsm.add_neg_edge(s, neg, vec![b, LabelId::ATTRIBUTE_POUND]);
        fsm.add_label_edge(s, pound, LabelId::ELEMENT_POUND);
        fsm.add_label_edge(s, pound, LabelId::ATTRIBUTE_POUND);
        fsm.deterministic = true;

        assert_eq!(fsm.step(s, a), Some((exact, false)));
        assert_eq!(fsm.step(s, b), Some((pound, true)));
        assert_eq!(fsm.step(s, x), Some((pound, true)));
    }

    #[test]
    fn test_semantic_edges_of_dfa_state() {
        let (_, a, b, x) = labels();
        let mut fsm = Fsm::new();
        let t = fsm.add_state(true);
        let s = fsm.start();
        fsm.add_label_edge(s, t, a);
        fsm.add_label_edge(s, t, LabelId::ELEMENT_POUND);
        fsm.deterministic = true;

        let sem = fsm.semantic_edges(s);
        let pound: Vec<_> = sem.iter().filter(|e| e.pound).collect();
        assert_eq!(pound.len(), 1);
        assert!(!pound[0].kind.matches(a));
        assert!(pound[0].kind.matches(b));
        assert!(!pound[0].kind.matches(x));
    }

    #[test]
    fn test_reverse_language() {
        let (_, a, b, _) = labels();
        let mut fsm = Fsm::new();
        let mid = fsm.add_state(false);
        let end = fsm.add_state(true);
        fsm.add_label_edge(fsm.start(), mid, a);
        fsm.add_label_edge(mid, end, b);

        let rev = fsm.reverse();
        assert!(rev.accepts(&[b, a]));
        assert!(!rev.accepts(&[a, b]));
    }

    #[test]
    fn test_add_fsm_splices() {
        let (_, a, b, _) = labels();
        let mut sub = Fsm::new();
        let f = sub.add_state(true);
        sub.add_label_edge(sub.start(), f, b);

        let mut fsm = Fsm::new();
        let mid = fsm.add_state(false);
        let end = fsm.add_state(true);
        fsm.add_label_edge(fsm.start(), mid, a);
        fsm.add_fsm(mid, end, &sub);

        assert!(fsm.accepts(&[a, b]));
        assert!(!fsm.accepts(&[a]));
        assert!(!fsm.accepts(&[b]));
    }

    #[test]
    fn test_eliminate_redundant_pound_edges() {
        let (_, _, _, _) = labels();
        let mut fsm = Fsm::new();
        let t = fsm.add_state(true);
        let s = fsm.start();
        fsm.add_neg_edge(s, t, vec![]);
        fsm.add_label_edge(s, t, LabelId::ELEMENT_POUND);
        fsm.eliminate_redundant_pound_edges();
        assert_eq!(fsm.edge_count(), 1);
        assert!(matches!(fsm.edges_from(s).next().map(|e| &e.kind), Some(EdgeKind::Neg(_))));
    }
}
