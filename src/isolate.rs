use std::collections::HashMap;

use crate::ast::{Node, NodeId};
use crate::context::Context;
use crate::exec::Value;
use crate::scope::{Scope, ScopeId};

/// Owns every AST node, scope and runtime global for one interpreter
/// instance. Nodes and scopes are arena-allocated and addressed by stable
/// ids, so back-references from identifiers to declarations stay valid for
/// the isolate's whole lifetime. Scopes are never shared across isolates.
#[derive(Debug)]
pub struct Isolate {
    nodes: Vec<Node>,
    scopes: Vec<Scope>,
    pub context: Context,
    /// Values of top-level declarations, keyed by declaration id. Shared
    /// across the scripts of this isolate so imported modules keep their
    /// state between runs.
    pub globals: HashMap<NodeId, Value>,
}

impl Isolate {
    /// Creates an empty isolate with a fresh context.
    pub fn new() -> Isolate {
        Isolate {
            nodes: Vec::new(),
            scopes: Vec::new(),
            context: Context::new(),
            globals: HashMap::new(),
        }
    }

    /// Moves a node into the arena and returns its id.
    pub fn alloc_node(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() as u32 - 1)
    }

    /// Moves a scope into the arena and returns its id.
    pub fn alloc_scope(&mut self, scope: Scope) -> ScopeId {
        self.scopes.push(scope);
        ScopeId(self.scopes.len() as u32 - 1)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    /// Looks a name up among the scope's own declarations.
    pub fn lookup_local(&self, scope: ScopeId, name: &str) -> Option<NodeId> {
        self.scope(scope)
            .nodes
            .iter()
            .copied()
            .find(|&id| {
                let node = self.node(id);
                node.kind.is_declaration() && node.name == name
            })
    }

    /// Looks a name up through the scope chain, innermost first, then
    /// through the file scopes this file includes.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<NodeId> {
        let mut current = Some(scope);
        let mut root = scope;

        while let Some(id) = current {
            if let Some(found) = self.lookup_local(id, name) {
                return Some(found);
            }
            root = id;
            current = self.scope(id).parent;
        }

        self.lookup_included(root, name, &mut vec![root])
    }

    /// Searches included file scopes, transitively, cycle-safe.
    fn lookup_included(&self, scope: ScopeId, name: &str, visited: &mut Vec<ScopeId>) -> Option<NodeId> {
        for &included in self.context.includes_of(scope) {
            if visited.contains(&included) {
                continue;
            }
            visited.push(included);

            if let Some(found) = self.lookup_local(included, name) {
                return Some(found);
            }
            if let Some(found) = self.lookup_included(included, name, visited) {
                return Some(found);
            }
        }

        None
    }

    /// Returns the published file scope of an imported module.
    pub fn module_scope(&self, name: &str) -> Option<ScopeId> {
        self.context.exported_scope(name)
    }

    /// Searches every published module for an exported declaration with
    /// the given name.
    pub fn exported_node(&self, name: &str) -> Option<NodeId> {
        for scope in self.context.exported_scopes() {
            if let Some(id) = self.lookup_local(scope, name) {
                if self.node(id).is_export {
                    return Some(id);
                }
            }
        }

        None
    }
}

impl Default for Isolate {
    fn default() -> Self {
        Self::new()
    }
}
