// SPDX-License-Identifier: MIT
//! Per-state predicates consulted by the router

use super::{Fsm, StateFlags};

impl Fsm {
    /// Recompute out-complete, accepting and wildcard-ahead flags
    ///
    /// Only meaningful on deterministic automata; other automata get cleared
    /// flags.
    pub fn analyze(&mut self) {
        let n = self.states.len();
        if !self.deterministic {
            for state in &mut self.states {
                state.flags = StateFlags::default();
            }
            return;
        }

        let successors: Vec<Vec<usize>> = self
            .states()
            .map(|s| self.edges_from(s).map(|e| e.to.index()).collect())
            .collect();
        let out_complete: Vec<bool> = self
            .states()
            .map(|s| self.dfa_profile(s).is_complete())
            .collect();

        // Greatest fixpoint: start optimistic, knock out states that can
        // leave the accepting set.
        let mut accepting: Vec<bool> = (0..n)
            .map(|i| self.states[i].is_final && out_complete[i])
            .collect();
        let mut changed = true;
        while changed {
            changed = false;
            for i in 0..n {
                if accepting[i] && successors[i].iter().any(|&t| !accepting[t]) {
                    accepting[i] = false;
                    changed = true;
                }
            }
        }

        // Least fixpoint: a pound edge here or somewhere downstream.
        let mut wildcard_ahead: Vec<bool> = self
            .states()
            .map(|s| self.edges_from(s).any(|e| e.kind.is_pound()))
            .collect();
        let mut changed = true;
        while changed {
            changed = false;
            for i in 0..n {
                if !wildcard_ahead[i] && successors[i].iter().any(|&t| wildcard_ahead[t]) {
                    wildcard_ahead[i] = true;
                    changed = true;
                }
            }
        }

        for (i, state) in self.states.iter_mut().enumerate() {
            state.flags = StateFlags {
                out_complete: out_complete[i],
                accepting: accepting[i],
                wildcard_ahead: wildcard_ahead[i],
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::fsm::Fsm;
    use crate::labels::{LabelId, LabelKind, LabelTable};

    #[test]
    fn test_accepting_requires_closed_final_region() {
        let mut table = LabelTable::new();
        let a = table.intern(b"a", LabelKind::Element);

        // start -a-> t, t loops on everything
        let mut nfa = Fsm::new();
        let t = nfa.add_state(true);
        nfa.add_label_edge(nfa.start(), t, a);
        nfa.add_neg_edge(t, t, vec![]);
        let dfa = nfa.minimize();

        let start = dfa.start();
        assert!(!dfa.flags(start).accepting);
        let (t, _) = dfa.step(start, a).unwrap();
        assert!(dfa.flags(t).out_complete);
        assert!(dfa.flags(t).accepting);
        assert!(!dfa.flags(t).wildcard_ahead);
    }

    #[test]
    fn test_wildcard_ahead_propagates_backwards() {
        let mut table = LabelTable::new();
        let a = table.intern(b"a", LabelKind::Element);

        let mut nfa = Fsm::new();
        let mid = nfa.add_state(false);
        let end = nfa.add_state(true);
        nfa.add_label_edge(nfa.start(), mid, a);
        nfa.add_label_edge(mid, end, LabelId::ELEMENT_POUND);
        let dfa = nfa.minimize();

        assert!(dfa.flags(dfa.start()).wildcard_ahead);
        let (end, _) = dfa.step(dfa.start(), a).and_then(|(m, _)| dfa.step(m, a)).unwrap();
        assert!(!dfa.flags(end).wildcard_ahead);
        assert!(!dfa.flags(end).accepting);
    }
}
