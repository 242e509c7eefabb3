//! Load paths: which references a load follows.
//!
//! Paths are dotted field names (`"passengers.spouse"`) matched
//! case-insensitively against either the declared or the stored name of a
//! reference field. [`ALL_ENTITIES`] follows every reference, transitively,
//! until no new entity turns up. Paths are kept as a small trie; the resolver
//! walks it one edge per reference it meets.

use std::collections::BTreeMap;

use crate::error::{MapperError, MapperResult};

/// Follow every reference, at every depth.
pub const ALL_ENTITIES: &str = "*";

pub(crate) type NodeId = usize;

/// Where every load starts.
pub(crate) const ROOT: NodeId = 0;

/// Reached through a wildcard; follows anything, forever.
pub(crate) const WILDCARD: NodeId = usize::MAX;

#[derive(Clone, Debug, Default)]
struct Node {
    children: BTreeMap<String, NodeId>,
    wildcard: bool,
}

/// A parsed set of load paths.
#[derive(Clone, Debug)]
pub struct LoadPaths {
    nodes: Vec<Node>,
}

impl Default for LoadPaths {
    fn default() -> Self {
        Self {
            nodes: vec![Node::default()],
        }
    }
}

impl LoadPaths {
    /// Parse dotted paths. Empty segments are rejected; anything after a
    /// `*` segment is redundant and ignored.
    pub fn parse<I, P>(paths: I) -> MapperResult<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let mut parsed = Self::default();
        for path in paths {
            parsed.insert(path.as_ref())?;
        }
        Ok(parsed)
    }

    fn insert(&mut self, path: &str) -> MapperResult<()> {
        let mut node = ROOT;
        for segment in path.split('.') {
            let segment = segment.trim();
            if segment.is_empty() {
                return Err(MapperError::InvalidLoadPath(path.to_string()));
            }
            if segment == ALL_ENTITIES {
                self.nodes[node].wildcard = true;
                return Ok(());
            }
            let name = segment.to_lowercase();
            node = match self.nodes[node].children.get(&name) {
                Some(&child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(Node::default());
                    self.nodes[node].children.insert(name, child);
                    child
                }
            };
        }
        Ok(())
    }

    /// `true` when no reference is followed at all.
    pub fn is_empty(&self) -> bool {
        let root = &self.nodes[ROOT];
        root.children.is_empty() && !root.wildcard
    }

    /// `true` when every reference is followed from the roots.
    pub fn follows_all(&self) -> bool {
        self.nodes[ROOT].wildcard
    }

    /// Nodes reached from `node` by crossing a reference field known by any
    /// of `names`.
    pub(crate) fn step(&self, node: NodeId, names: &[&str]) -> Vec<NodeId> {
        if node == WILDCARD {
            return vec![WILDCARD];
        }
        let Some(current) = self.nodes.get(node) else {
            return Vec::new();
        };
        let mut next = Vec::new();
        for name in names {
            if let Some(&child) = current.children.get(&name.to_lowercase()) {
                if !next.contains(&child) {
                    next.push(child);
                }
            }
        }
        if current.wildcard {
            next.push(WILDCARD);
        }
        next
    }
}
