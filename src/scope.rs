use crate::ast::NodeId;

/// Index of a scope in the isolate's arena.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct ScopeId(pub u32);

/// Represents a lexical environment: a named, insertion-ordered list of
/// child nodes with an unowned parent link.
///
/// The nodes list holds declarations and statements alike, in program
/// order; name lookup filters for declarations. Parent links form a tree
/// rooted at the file scope, never a cycle.
#[derive(Debug, PartialEq, Clone)]
pub struct Scope {
    pub name: String,
    pub parent: Option<ScopeId>,
    pub nodes: Vec<NodeId>,
    /// Set by the analyzer before walking children, guarding the two-pass
    /// scan against re-entry on cyclic references.
    pub is_parsed: bool,
}

impl Scope {
    /// Creates a new scope under the given parent.
    pub fn new(name: impl Into<String>, parent: Option<ScopeId>) -> Scope {
        Scope {
            name: name.into(),
            parent,
            nodes: Vec::new(),
            is_parsed: false,
        }
    }

    /// Appends a child node, preserving insertion order.
    pub fn insert(&mut self, node: NodeId) {
        self.nodes.push(node);
    }
}
