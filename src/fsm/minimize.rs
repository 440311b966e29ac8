// SPDX-License-Identifier: MIT
//! Pruning, minimization and complement

use super::determinize::{ns, Profile};
use super::{EdgeKind, Fsm, StateId};
use crate::labels::LabelKind;
use std::collections::VecDeque;

impl Fsm {
    /// Live states: reachable from the start and able to reach a final state
    fn live_states(&self) -> Vec<bool> {
        let n = self.states.len();
        let mut reachable = vec![false; n];
        let mut stack = vec![self.start];
        while let Some(s) = stack.pop() {
            if std::mem::replace(&mut reachable[s.index()], true) {
                continue;
            }
            stack.extend(self.edges_from(s).map(|e| e.to));
        }

        let mut incoming: Vec<Vec<StateId>> = vec![Vec::new(); n];
        for s in self.states() {
            for edge in self.edges_from(s) {
                incoming[edge.to.index()].push(s);
            }
        }
        let mut productive = vec![false; n];
        let mut stack: Vec<StateId> = self.states().filter(|&s| self.is_final(s)).collect();
        while let Some(s) = stack.pop() {
            if std::mem::replace(&mut productive[s.index()], true) {
                continue;
            }
            stack.extend(incoming[s.index()].iter().copied());
        }

        reachable
            .iter()
            .zip(&productive)
            .map(|(r, p)| *r && *p)
            .collect()
    }

    /// Live states in breadth-first order from the start
    fn live_order(&self, live: &[bool]) -> Vec<StateId> {
        let mut order = Vec::new();
        let mut seen = vec![false; self.states.len()];
        let mut queue = VecDeque::from([self.start]);
        seen[self.start.index()] = true;
        while let Some(s) = queue.pop_front() {
            order.push(s);
            for edge in self.edges_from(s) {
                let t = edge.to.index();
                if live[t] && !std::mem::replace(&mut seen[t], true) {
                    queue.push_back(edge.to);
                }
            }
        }
        order
    }

    /// Automaton accepting nothing, with the determinism flag of `self`
    fn empty_language(&self) -> Fsm {
        let mut fsm = Fsm::empty_dfa();
        fsm.deterministic = self.deterministic;
        fsm.add_state(false);
        fsm.analyze();
        fsm
    }

    /// Copy without unreachable states and states that cannot reach a final
    /// state; the start state gets id 0
    pub fn pruned(&self) -> Fsm {
        let live = self.live_states();
        if !live[self.start.index()] {
            return self.empty_language();
        }
        let order = self.live_order(&live);
        let mut renumber = vec![None; self.states.len()];
        for (i, s) in order.iter().enumerate() {
            renumber[s.index()] = Some(StateId(i as u32));
        }

        let mut out = Fsm::empty_dfa();
        out.deterministic = self.deterministic;
        for &s in &order {
            out.add_state(self.is_final(s));
        }
        for &s in &order {
            let Some(src) = renumber[s.index()] else { continue };
            if self.deterministic {
                // Dropping an edge changes which lower-priority edge fires, so
                // dead classes are re-emitted as exclusions.
                let profile = self.dfa_profile(s).map(|t| renumber[t.index()]);
                for (kind, to) in profile.emit() {
                    out.add_edge(src, to, kind);
                }
            } else {
                for edge in self.edges_from(s) {
                    if let Some(to) = renumber[edge.to.index()] {
                        out.add_edge(src, to, edge.kind.clone());
                    }
                }
            }
        }
        out.analyze();
        out
    }

    /// In-place variant of [`pruned`](Self::pruned)
    pub fn prune_redundant_states(&mut self) {
        *self = self.pruned();
    }

    /// Minimal deterministic automaton for the same language
    ///
    /// Pairwise distinguishability over symbol classes: a pair is marked when
    /// finality differs, when a class is defined for one state only, when the
    /// class crosses a pound edge in one state only, or when the class leads
    /// to a marked pair. Unresolved pairs record themselves as dependents of
    /// their successor pairs and get marked when those are.
    pub fn minimize(&self) -> Fsm {
        let dfa = if self.deterministic {
            self.pruned()
        } else {
            self.determinize().pruned()
        };
        let n = dfa.state_count();
        if n <= 1 {
            return dfa;
        }

        let profiles: Vec<Profile<StateId>> = dfa.states().map(|s| dfa.dfa_profile(s)).collect();
        let pair = |p: usize, q: usize| -> usize {
            let (lo, hi) = if p < q { (p, q) } else { (q, p) };
            hi * (hi - 1) / 2 + lo
        };
        let mut marked = vec![false; n * (n - 1) / 2];
        let mut dependents: Vec<Vec<u32>> = vec![Vec::new(); marked.len()];

        fn mark(first: usize, marked: &mut [bool], dependents: &mut [Vec<u32>]) {
            if std::mem::replace(&mut marked[first], true) {
                return;
            }
            let mut stack = vec![first];
            while let Some(top) = stack.pop() {
                for dep in std::mem::take(&mut dependents[top]) {
                    let dep = dep as usize;
                    if !std::mem::replace(&mut marked[dep], true) {
                        stack.push(dep);
                    }
                }
            }
        }

        for q in 1..n {
            for p in 0..q {
                let pq = pair(p, q);
                if marked[pq] {
                    continue;
                }
                if dfa.states[p].is_final != dfa.states[q].is_final {
                    mark(pq, &mut marked, &mut dependents);
                    continue;
                }

                let (pp, pr) = (&profiles[p], &profiles[q]);
                let mut distinct = false;
                let mut successors = Vec::new();
                let named = pp.explicit.iter().chain(&pr.explicit).map(|(x, _, _)| *x);
                let mut classes: Vec<(Option<&StateId>, bool, Option<&StateId>, bool)> = named
                    .map(|x| {
                        let (a, fa) = pp.class(x);
                        let (b, fb) = pr.class(x);
                        (a, fa, b, fb)
                    })
                    .collect();
                for kind in [LabelKind::Element, LabelKind::Attribute] {
                    let (a, fa) = &pp.other[ns(kind)];
                    let (b, fb) = &pr.other[ns(kind)];
                    classes.push((a.as_ref(), *fa, b.as_ref(), *fb));
                }

                for (a, fa, b, fb) in classes {
                    match (a, b) {
                        (None, None) => {}
                        (Some(a), Some(b)) => {
                            if fa != fb {
                                distinct = true;
                            } else if a != b {
                                let ab = pair(a.index(), b.index());
                                if marked[ab] {
                                    distinct = true;
                                } else {
                                    successors.push(ab);
                                }
                            }
                        }
                        _ => distinct = true,
                    }
                    if distinct {
                        break;
                    }
                }

                if distinct {
                    mark(pq, &mut marked, &mut dependents);
                } else {
                    for ab in successors {
                        dependents[ab].push(pq as u32);
                    }
                }
            }
        }

        // Representative: lowest-numbered equivalent state
        let mut class_of = vec![StateId(0); n];
        let mut reps: Vec<usize> = Vec::new();
        for s in 0..n {
            match reps.iter().position(|&r| !marked[pair(r, s)] && r != s) {
                Some(i) => class_of[s] = StateId(i as u32),
                None => {
                    class_of[s] = StateId(reps.len() as u32);
                    reps.push(s);
                }
            }
        }

        let mut out = Fsm::empty_dfa();
        for &r in &reps {
            out.add_state(dfa.states[r].is_final);
        }
        out.start = class_of[dfa.start.index()];
        for (i, &r) in reps.iter().enumerate() {
            let profile = profiles[r].map(|t| Some(class_of[t.index()]));
            for (kind, to) in profile.emit() {
                out.add_edge(StateId(i as u32), to, kind);
            }
        }
        out.analyze();
        out
    }

    /// Automaton for the complement language
    ///
    /// The deterministic automaton is completed with a non-final sink that
    /// absorbs every otherwise unmatched label, finality is flipped and the
    /// result minimized.
    #[cfg(feature = "negate")]
    pub fn negate(&self) -> Fsm {
        let dfa = self.determinize();
        let mut out = Fsm::empty_dfa();
        for s in dfa.states() {
            out.add_state(!dfa.is_final(s));
        }
        let sink = out.add_state(true);
        out.start = dfa.start;

        for s in dfa.states() {
            let mut profile = dfa.dfa_profile(s);
            for (_, target, _) in profile.explicit.iter_mut() {
                target.get_or_insert(sink);
            }
            for (target, _) in profile.other.iter_mut() {
                target.get_or_insert(sink);
            }
            for (kind, to) in profile.emit() {
                out.add_edge(s, to, kind);
            }
        }
        out.add_edge(sink, sink, EdgeKind::Neg(Vec::new()));
        out.minimize()
    }
}
