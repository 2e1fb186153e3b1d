use std::collections::HashMap;

use crate::scope::ScopeId;
use crate::script::Script;

/// The shared registry of loaded modules for one isolate. Gatekeeper for
/// at-most-once import: a module name moves from `in_progress` to
/// `imported` exactly once, and a name is never in both outside the
/// transition at the end of loading.
///
/// Not safe for concurrent mutation; compilation is single-threaded and
/// re-enters through the orchestrator only.
#[derive(Debug)]
pub struct Context {
    scripts: HashMap<String, Script>,
    in_progress: Vec<String>,
    imported: Vec<String>,
    exports: HashMap<String, ScopeId>,
    /// Include edges: a file scope to the file scopes it textually pulls
    /// in. Name lookup falls through these, which is the "scopes merged
    /// by name" contract of `include`.
    includes: HashMap<ScopeId, Vec<ScopeId>>,
    /// Sticky flag: the `app` standard library is loaded at most once per
    /// context.
    pub app_included: bool,
}

impl Context {
    pub fn new() -> Context {
        Context {
            scripts: HashMap::new(),
            in_progress: Vec::new(),
            imported: Vec::new(),
            exports: HashMap::new(),
            includes: HashMap::new(),
            app_included: false,
        }
    }

    /// Retains a finished script for host retrieval.
    pub fn add_script(&mut self, script: Script) {
        self.scripts.insert(script.name.clone(), script);
    }

    pub fn script(&self, name: &str) -> Option<&Script> {
        self.scripts.get(name)
    }

    /// Finds a retained script by its exact source text.
    pub fn script_by_source(&self, source: &str) -> Option<&Script> {
        self.scripts.values().find(|script| script.source == source)
    }

    /// Returns if the module is either loading right now or fully loaded.
    /// This is what breaks import diamonds and cycles.
    pub fn is_included(&self, name: &str) -> bool {
        self.is_in_progress(name) || self.is_imported(name)
    }

    pub fn is_in_progress(&self, name: &str) -> bool {
        self.in_progress.iter().any(|entry| entry == name)
    }

    pub fn is_imported(&self, name: &str) -> bool {
        self.imported.iter().any(|entry| entry == name)
    }

    pub fn add_to_in_progress(&mut self, name: &str) {
        if !self.is_in_progress(name) {
            self.in_progress.push(name.to_string());
        }
    }

    pub fn remove_from_in_progress(&mut self, name: &str) {
        self.in_progress.retain(|entry| entry != name);
    }

    /// Marks a module fully loaded.
    pub fn set_import(&mut self, name: &str) {
        if !self.is_imported(name) {
            self.imported.push(name.to_string());
        }
    }

    /// Publishes a module's file scope. Published scopes are visible to
    /// other modules as soon as parsing finishes, which is what lets a
    /// cyclic import see the partial module's declaration headers.
    pub fn add_scope(&mut self, name: &str, scope: ScopeId) {
        self.exports.insert(name.to_string(), scope);
    }

    pub fn exported_scope(&self, name: &str) -> Option<ScopeId> {
        self.exports.get(name).copied()
    }

    pub fn exported_scopes(&self) -> impl Iterator<Item = ScopeId> + '_ {
        self.exports.values().copied()
    }

    /// Records that `from` includes `to`.
    pub fn add_include(&mut self, from: ScopeId, to: ScopeId) {
        self.includes.entry(from).or_default().push(to);
    }

    pub fn includes_of(&self, scope: ScopeId) -> &[ScopeId] {
        self.includes.get(&scope).map_or(&[], Vec::as_slice)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn in_progress_and_imported_stay_disjoint() {
        let mut context = Context::new();

        context.add_to_in_progress("math");
        assert!(context.is_included("math"));
        assert!(!context.is_imported("math"));

        context.remove_from_in_progress("math");
        context.set_import("math");

        assert!(context.is_included("math"));
        assert!(context.is_imported("math"));
        assert!(!context.is_in_progress("math"));
    }

    #[test]
    fn set_import_is_idempotent() {
        let mut context = Context::new();

        context.set_import("math");
        context.set_import("math");

        assert!(context.is_imported("math"));
    }
}
