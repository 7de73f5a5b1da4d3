//! The internal build-graph arena (§4, §8's DAG requirements).
//!
//! Generalizes the teacher's `SuperDockerfile` accumulate-then-finalize
//! pattern (push Dockerfile instruction lines and tarball entries, then
//! finalize into one build request) into an explicit op-log: every
//! filesystem-affecting action becomes a [`GraphOp`] appended to a
//! [`GraphArena`], and every intermediate state is a [`NodeRef`] pointing at
//! the op that produced it. Multiple stages can share a common ancestor
//! `NodeRef` and diverge from there, which is what lets the Stage Assembler
//! and Plan Driver build a real DAG instead of a linear chain.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::model::Platform;

/// A reference to a point in the graph: either the empty root, or the
/// output of a specific [`GraphOp`]. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeRef(u32);

impl NodeRef {
    /// The empty filesystem, with no env, no workdir, no platform set.
    pub const ROOT: NodeRef = NodeRef(u32::MAX);
}

/// One content-addressed operation in the arena. Each variant corresponds to
/// a primitive the solver must be able to marshal (§4.3, §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GraphOp {
    /// Adopts an external filesystem wholesale as the new base (image pull,
    /// local context, url fetch, scratch).
    Source { description: String },
    /// Runs a command against `parent`'s filesystem, with `parent`'s env and
    /// workdir as ambient context, producing a new filesystem layer. `workdir`
    /// mirrors the stage's `dir` at the time the op was issued (§4.3).
    Exec {
        parent: NodeRef,
        command: String,
        mounts: Vec<(NodeRef, String)>,
        workdir: Option<String>,
    },
    /// Copies `src` paths out of `from` into `dest` under `parent`.
    Copy {
        parent: NodeRef,
        from: NodeRef,
        src: Vec<String>,
        dest: String,
        create_dest_path: bool,
    },
    /// Writes one literal file under `parent`.
    Mkfile {
        parent: NodeRef,
        dest: String,
        data: Vec<u8>,
        mode: u32,
    },
    /// A pure metadata layer that reuses `parent`'s filesystem unchanged.
    /// Used by the Stage Assembler's "copy config to final node" step, and
    /// by diff-mode finalization when no filesystem-affecting op occurred.
    Alias { parent: NodeRef },
    /// The minimal filesystem difference between `base` and `since` (every op
    /// a stage's operations applied), squashed and applied on top of `base`
    /// as a single additional layer. Produced by diff-mode stage
    /// finalization (§4.4 step 4); a solver without a diff primitive can
    /// still execute this by replaying `since`'s chain directly, since the
    /// two modes are required to produce identical configuration either way.
    Layer { base: NodeRef, since: NodeRef },
}

impl GraphOp {
    fn parent(&self) -> Option<NodeRef> {
        match self {
            GraphOp::Source { .. } => None,
            GraphOp::Exec { parent, .. }
            | GraphOp::Copy { parent, .. }
            | GraphOp::Mkfile { parent, .. }
            | GraphOp::Alias { parent } => Some(*parent),
            GraphOp::Layer { base, .. } => Some(*base),
        }
    }

    /// Stable content digest, used to identify this op for caching/logging
    /// purposes independent of arena insertion order.
    pub fn digest(&self) -> [u8; 32] {
        let bytes = postcard::to_allocvec(self).expect("GraphOp always serializes");
        let mut hasher = Sha3_256::new();
        hasher.update(&bytes);
        hasher.finalize().into()
    }
}

/// The env/workdir/platform metadata threaded alongside a filesystem
/// reference as stages are assembled (§4.2-§4.4). Not itself part of the
/// graph arena: this is the Resolver/Translator/Assembler's working state,
/// pointing at a [`NodeRef`] for the filesystem it carries.
#[derive(Debug, Clone)]
pub struct Node {
    pub fs: NodeRef,
    pub env: IndexMap<String, String>,
    pub workdir: Option<String>,
    pub platform: Option<Platform>,
    /// Base image user, recorded but not (per the Open Question decision in
    /// `DESIGN.md`) propagated into the final image config.
    pub user: Option<String>,
}

impl Node {
    pub fn root() -> Self {
        Self {
            fs: NodeRef::ROOT,
            env: IndexMap::new(),
            workdir: None,
            platform: None,
            user: None,
        }
    }

    /// Applies `vars` on top of the current env, last-writer-wins,
    /// preserving first-insertion order for keys already present and
    /// appending new keys in the order given (§3 `SetEnv` invariant).
    pub fn apply_env(&mut self, vars: &IndexMap<String, String>) {
        for (k, v) in vars {
            self.env.insert(k.clone(), v.clone());
        }
    }
}

/// The op-log arena. Appending is the only mutation; ops are never removed,
/// so every previously issued [`NodeRef`] stays valid for the arena's
/// lifetime.
#[derive(Debug, Default)]
pub struct GraphArena {
    ops: Vec<GraphOp>,
}

impl GraphArena {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Appends `op` and returns a [`NodeRef`] for its output.
    pub fn push(&mut self, op: GraphOp) -> NodeRef {
        let idx = self.ops.len();
        self.ops.push(op);
        NodeRef(idx as u32)
    }

    pub fn get(&self, node: NodeRef) -> Option<&GraphOp> {
        if node == NodeRef::ROOT {
            None
        } else {
            self.ops.get(node.0 as usize)
        }
    }

    /// Walks from `node` back to its root, in dependency order (root-first).
    /// Used by the solver to marshal a reachable subgraph.
    pub fn ancestry(&self, node: NodeRef) -> Vec<NodeRef> {
        let mut chain = Vec::new();
        let mut cur = Some(node);
        while let Some(n) = cur {
            if n == NodeRef::ROOT {
                break;
            }
            chain.push(n);
            cur = self.get(n).and_then(GraphOp::parent);
        }
        chain.reverse();
        chain
    }

    /// All distinct ops reachable from any of `roots`, deduplicated, in
    /// dependency order. This is the "reachable subgraph" the solver
    /// marshals (§6.1).
    pub fn reachable(&self, roots: &[NodeRef]) -> Vec<NodeRef> {
        let mut seen = BTreeMap::new();
        let mut order = Vec::new();
        for &root in roots {
            for n in self.ancestry(root) {
                if seen.insert(n, ()).is_none() {
                    order.push(n);
                }
            }
        }
        order.sort_by_key(|n| n.0);
        order.dedup();
        order
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ancestry_walks_root_first() {
        let mut arena = GraphArena::new();
        let a = arena.push(GraphOp::Source {
            description: "scratch".to_string(),
        });
        let b = arena.push(GraphOp::Mkfile {
            parent: a,
            dest: "/f".to_string(),
            data: vec![1],
            mode: 0o644,
        });
        let c = arena.push(GraphOp::Alias { parent: b });
        assert_eq!(arena.ancestry(c), vec![a, b, c]);
    }

    #[test]
    fn reachable_dedups_shared_ancestors() {
        let mut arena = GraphArena::new();
        let base = arena.push(GraphOp::Source {
            description: "alpine".to_string(),
        });
        let left = arena.push(GraphOp::Alias { parent: base });
        let right = arena.push(GraphOp::Alias { parent: base });
        let reachable = arena.reachable(&[left, right]);
        assert_eq!(reachable.len(), 3);
        assert_eq!(reachable[0], base);
    }

    #[test]
    fn digest_is_stable_for_equal_ops() {
        let op1 = GraphOp::Mkfile {
            parent: NodeRef::ROOT,
            dest: "/a".to_string(),
            data: vec![1, 2, 3],
            mode: 0o600,
        };
        let op2 = GraphOp::Mkfile {
            parent: NodeRef::ROOT,
            dest: "/a".to_string(),
            data: vec![1, 2, 3],
            mode: 0o600,
        };
        assert_eq!(op1.digest(), op2.digest());
    }
}
