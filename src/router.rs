// SPDX-License-Identifier: MIT
//! Leaf routing: reverse data guide and path dictionary
//!
//! A leaf is routed by running every path expression's reverse automaton
//! over the open labels, innermost first. The states reached after each
//! suffix are cached in the data guide, a tree keyed by (parent, label), so
//! a suffix is only computed once per run block.
//!
//! Every label consumed over a pound edge selects a child in the path
//! dictionary. The dictionary node reached at the end identifies the
//! container block: `/a/#` routes `<a><x>` and `<a><y>` into different
//! blocks.

use rustc_hash::FxHashMap;

use crate::arena::{Arena, Handle};
use crate::container::BlockId;
use crate::fsm::StateId;
use crate::labels::LabelId;
use crate::path::PathSet;

/// Node of the path dictionary
#[derive(Debug)]
pub struct DictNode {
    /// 1-based path expression index
    pub expr: u32,
    pub parent: Option<DictId>,
    /// Label crossed over a pound edge to reach this node
    pub label: Option<LabelId>,
    /// Container block, created when the first value is stored
    pub block: Option<BlockId>,
}

pub type DictId = Handle<DictNode>;

/// Distinct wildcard instantiations of every path expression
#[derive(Debug, Default)]
pub struct PathDictionary {
    nodes: Arena<DictNode>,
    roots: FxHashMap<u32, DictId>,
    children: FxHashMap<(DictId, LabelId), DictId>,
}

impl PathDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node of `expr` without any wildcard instantiation
    pub fn root(&mut self, expr: u32) -> DictId {
        let nodes = &mut self.nodes;
        *self.roots.entry(expr).or_insert_with(|| {
            nodes.alloc(DictNode {
                expr,
                parent: None,
                label: None,
                block: None,
            })
        })
    }

    pub fn child(&mut self, parent: DictId, label: LabelId) -> DictId {
        let nodes = &mut self.nodes;
        *self.children.entry((parent, label)).or_insert_with(|| {
            let expr = nodes[parent].expr;
            nodes.alloc(DictNode {
                expr,
                parent: Some(parent),
                label: Some(label),
                block: None,
            })
        })
    }

    pub fn node(&self, id: DictId) -> &DictNode {
        &self.nodes[id]
    }

    pub fn block(&self, id: DictId) -> Option<BlockId> {
        self.nodes[id].block
    }

    pub fn set_block(&mut self, id: DictId, block: BlockId) {
        self.nodes[id].block = Some(block);
    }

    /// Labels instantiated along the way to `id`, outermost first
    pub fn instantiation(&self, id: DictId) -> Vec<LabelId> {
        let mut labels = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current.map(|id| &self.nodes[id]) {
            labels.extend(node.label);
            current = node.parent;
        }
        labels.reverse();
        labels
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn reset(&mut self) {
        self.nodes.reset();
        self.roots.clear();
        self.children.clear();
    }
}

/// One path expression still alive after a suffix
#[derive(Debug, Clone, Copy)]
struct GuideItem {
    expr: u32,
    state: StateId,
    dict: DictId,
}

#[derive(Debug)]
struct GuideNode {
    items: Vec<GuideItem>,
    /// No item can be rejected by any further label
    accepting: bool,
}

type GuideId = Handle<GuideNode>;

/// Path expression that matches a leaf, with the dictionary node to store into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub expr: u32,
    pub dict: DictId,
}

/// Resolves leaves to path expressions and dictionary nodes
#[derive(Debug, Default)]
pub struct PathRouter {
    guide: Arena<GuideNode>,
    guide_children: FxHashMap<(GuideId, LabelId), GuideId>,
    guide_root: Option<GuideId>,
    dictionary: PathDictionary,
}

impl PathRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the guide and the dictionary at the end of a run block
    pub fn reset(&mut self) {
        self.guide.reset();
        self.guide_children.clear();
        self.guide_root = None;
        self.dictionary.reset();
    }

    pub fn dictionary(&self) -> &PathDictionary {
        &self.dictionary
    }

    pub fn dictionary_mut(&mut self) -> &mut PathDictionary {
        &mut self.dictionary
    }

    pub fn guide_len(&self) -> usize {
        self.guide.len()
    }

    fn root(&mut self, paths: &PathSet) -> GuideId {
        if let Some(root) = self.guide_root {
            return root;
        }
        let items: Vec<GuideItem> = paths
            .iter()
            .map(|expr| GuideItem {
                expr: expr.index,
                state: expr.reverse.start(),
                dict: self.dictionary.root(expr.index),
            })
            .collect();
        let root = self.alloc(paths, items);
        self.guide_root = Some(root);
        root
    }

    fn alloc(&mut self, paths: &PathSet, items: Vec<GuideItem>) -> GuideId {
        let accepting = items.iter().all(|item| {
            paths
                .get(item.expr)
                .is_some_and(|expr| expr.reverse.flags(item.state).accepting)
        });
        self.guide.alloc(GuideNode { items, accepting })
    }

    fn child(&mut self, paths: &PathSet, parent: GuideId, label: LabelId) -> GuideId {
        if let Some(&child) = self.guide_children.get(&(parent, label)) {
            return child;
        }
        let mut items = Vec::with_capacity(self.guide[parent].items.len());
        for i in 0..self.guide[parent].items.len() {
            let item = self.guide[parent].items[i];
            let Some(expr) = paths.get(item.expr) else { continue };
            if let Some((state, over_pound)) = expr.reverse.step(item.state, label) {
                let dict = if over_pound {
                    self.dictionary.child(item.dict, label)
                } else {
                    item.dict
                };
                items.push(GuideItem {
                    expr: item.expr,
                    state,
                    dict,
                });
            }
        }
        let child = self.alloc(paths, items);
        self.guide_children.insert((parent, label), child);
        child
    }

    /// Expressions matching the root-to-leaf `path`, in registration order
    pub fn resolve(&mut self, paths: &PathSet, path: &[LabelId]) -> Vec<Candidate> {
        let mut node = self.root(paths);
        let mut remaining = path.len();
        while !self.guide[node].accepting && remaining > 0 {
            remaining -= 1;
            node = self.child(paths, node, path[remaining]);
        }

        let items = self.guide[node].items.clone();
        if !self.guide[node].accepting {
            // Path exhausted: the final states match.
            return items
                .into_iter()
                .filter(|item| {
                    paths
                        .get(item.expr)
                        .is_some_and(|expr| expr.reverse.is_final(item.state))
                })
                .map(|item| Candidate {
                    expr: item.expr,
                    dict: item.dict,
                })
                .collect();
        }

        // Every item matches whatever lies above. Walk on only to
        // instantiate wildcards that are still ahead.
        let mut candidates = Vec::with_capacity(items.len());
        for item in items {
            let Some(expr) = paths.get(item.expr) else { continue };
            let mut state = item.state;
            let mut dict = item.dict;
            let mut above = remaining;
            while above > 0 && expr.reverse.flags(state).wildcard_ahead {
                above -= 1;
                let label = path[above];
                let Some((next, over_pound)) = expr.reverse.step(state, label) else {
                    break;
                };
                if over_pound {
                    dict = self.dictionary.child(dict, label);
                }
                state = next;
            }
            candidates.push(Candidate {
                expr: item.expr,
                dict,
            });
        }
        candidates
    }
}
