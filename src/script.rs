use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::debug;

use crate::ast::{NodeId, NodeKind};
use crate::error::{CompileError, ErrorKind, Phase};
use crate::exec::Execute;
use crate::host;
use crate::isolate::Isolate;
use crate::parser::Parser;
use crate::scope::ScopeId;
use crate::semantics::Semantics;

/// Compile state of one source unit. The error list is non-empty exactly
/// when the state is `Failed`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum State {
    Created,
    Parsing,
    Parsed,
    Analyzed,
    Executed,
    Failed,
}

/// One source unit: a file or an inline buffer together with its compile
/// state and diagnostics.
///
/// Compilation runs parse, import/include loading, and analysis in
/// sequence, stopping at the first failure. The context's
/// `in_progress`/`imported` sets make loading at-most-once and keep
/// cyclic imports from diverging.
#[derive(Debug)]
pub struct Script {
    pub name: String,
    /// Absolute path of the source file, or `"inline"`.
    pub path: String,
    pub source: String,
    pub state: State,
    pub msgs: Vec<String>,
    pub has_err: bool,
    pub failed_phase: Option<Phase>,
    /// Import selector: filters which top-level declarations are marked
    /// exported after a successful compile.
    pub sub_module: String,
    /// Internal scripts (the standard library) skip timing logs.
    pub internal: bool,
    pub root: Option<NodeId>,
    pub scope: Option<ScopeId>,
    imports: Vec<NodeId>,
    includes: Vec<NodeId>,
}

impl Script {
    fn empty(name: String, path: String, source: String) -> Script {
        Script {
            name,
            path,
            source,
            state: State::Created,
            msgs: Vec::new(),
            has_err: false,
            failed_phase: None,
            sub_module: String::new(),
            internal: false,
            root: None,
            scope: None,
            imports: Vec::new(),
            includes: Vec::new(),
        }
    }

    /// Creates a script from a source file on disk.
    pub fn from_file(path: &Path) -> io::Result<Script> {
        let source = host::read_file(path)?;
        let absolute = path
            .canonicalize()
            .unwrap_or_else(|_| PathBuf::from(path))
            .to_string_lossy()
            .into_owned();

        Ok(Script::empty(absolute.clone(), absolute, source))
    }

    /// Creates a script from an inline buffer. Inline scripts cannot use
    /// includes and are not published as modules.
    pub fn inline(source: &str) -> Script {
        Script::empty("inline".to_string(), "inline".to_string(), source.to_string())
    }

    /// Creates a library module script loaded from the library directory.
    pub fn module(name: &str, path: &Path, source: String) -> Script {
        Script::empty(name.to_string(), path.to_string_lossy().into_owned(), source)
    }

    /// Creates an internal script: a standard-library module compiled
    /// from an embedded buffer.
    pub fn internal(name: &str, source: String) -> Script {
        let mut script = Script::empty(name.to_string(), "inline".to_string(), source);
        script.internal = true;
        script
    }

    fn is_inline(&self) -> bool {
        self.path == "inline"
    }

    /// Anonymous buffers (the REPL) are never published as modules.
    /// Internal scripts are inline but named, and do publish.
    fn is_anonymous(&self) -> bool {
        self.name == "inline"
    }

    /// Compiles the script: parse, mark in-progress, load imports and
    /// includes, analyze, publish. A name already known to the context is
    /// a silent no-op; that is what makes diamond imports cheap and
    /// cyclic imports terminate.
    pub fn compile(&mut self, iso: &mut Isolate) {
        if iso.context.is_included(&self.name) {
            return;
        }

        self.state = State::Parsing;
        let started = Instant::now();

        let parsed = {
            let mut parser = Parser::new(&self.source, iso);
            match parser.parse(&self.name) {
                Ok(root) => Ok((
                    root,
                    std::mem::take(&mut parser.imports),
                    std::mem::take(&mut parser.includes),
                )),
                Err(error) => Err(error),
            }
        };

        let (root, imports, includes) = match parsed {
            Ok(parsed) => parsed,
            Err(error) => {
                self.report(Phase::Parser, &error);
                return;
            }
        };

        if !self.internal {
            debug!(target: "cobble::timing", path = %self.path, elapsed = ?started.elapsed(), "parsed");
        }

        self.root = Some(root);
        self.imports = imports;
        self.includes = includes;
        let scope = match &iso.node(root).kind {
            NodeKind::File(data) => data.scope,
            _ => return,
        };
        self.scope = Some(scope);
        self.state = State::Parsed;

        iso.context.add_to_in_progress(&self.name);
        if !self.is_anonymous() {
            // Published now, so a cyclic importer sees this module's
            // declaration headers before its analysis finishes.
            iso.scope_mut(scope).name = self.name.clone();
            iso.context.add_scope(&self.name, scope);
        }

        if let Err(error) = self.load_imports(iso) {
            iso.context.remove_from_in_progress(&self.name);
            self.report(Phase::Parser, &error);
            return;
        }

        if let Err(error) = self.load_includes(iso) {
            iso.context.remove_from_in_progress(&self.name);
            self.report(Phase::Parser, &error);
            return;
        }

        let analyzed = Instant::now();
        if let Err(error) = Semantics::new(iso).evaluate(scope) {
            iso.context.remove_from_in_progress(&self.name);
            self.report(Phase::Semantic, &error);
            return;
        }

        if !self.internal {
            debug!(target: "cobble::timing", path = %self.path, elapsed = ?analyzed.elapsed(), "analyzed");
        }

        self.state = State::Analyzed;
        iso.context.remove_from_in_progress(&self.name);
        if !self.is_anonymous() {
            iso.context.set_import(&self.name);
        }
    }

    /// Loads the `app` standard library (once per context) and then the
    /// script's import directives. Failures are reported against the
    /// import's position in this script.
    fn load_imports(&mut self, iso: &mut Isolate) -> Result<(), CompileError> {
        if !iso.context.app_included {
            iso.context.app_included = true;

            let path = host::lib_path("app");
            let source = if host::file_exists(&path) {
                host::read_file(&path).unwrap_or_else(|_| host::APP_SOURCE.to_string())
            } else {
                host::APP_SOURCE.to_string()
            };

            let mut app = Script::internal("app", source);
            app.compile(iso);
            app.run(iso);
            let failed = app.has_err;
            iso.context.add_script(app);

            if failed {
                return Err(CompileError::new(ErrorKind::InvalidImport, 1, 1).with_expected("app"));
            }
        }

        for import in self.imports.clone() {
            let node = iso.node(import).clone();
            let NodeKind::Import(data) = &node.kind else { continue };

            let mut parts = data.module.splitn(2, '.');
            let name = parts.next().unwrap_or_default().to_string();
            let sub = parts.next().unwrap_or_default().to_string();

            // Sub-selectors are reserved.
            if !sub.is_empty() {
                return Err(CompileError::new(ErrorKind::NotImplemented, node.row, node.col));
            }

            if iso.context.is_included(&name) {
                continue;
            }

            let path = host::lib_path(&name);
            if !host::file_exists(&path) {
                return Err(CompileError::new(ErrorKind::InvalidImport, node.row, node.col));
            }

            let source = host::read_file(&path)
                .map_err(|_| CompileError::new(ErrorKind::InvalidImport, node.row, node.col))?;

            let mut script = Script::module(&name, &path, source);
            script.sub_module = sub;
            script.compile(iso);
            script.run(iso);
            let failed = script.has_err;
            iso.context.add_script(script);

            if failed {
                return Err(CompileError::new(ErrorKind::InvalidImport, node.row, node.col)
                    .with_expected(name));
            }
        }

        Ok(())
    }

    /// Loads include directives relative to this script's directory.
    /// Inline scripts have no base path and skip includes.
    fn load_includes(&mut self, iso: &mut Isolate) -> Result<(), CompileError> {
        if self.is_inline() {
            return Ok(());
        }

        for include in self.includes.clone() {
            let node = iso.node(include).clone();
            let NodeKind::Include(data) = &node.kind else { continue };

            let full = host::from_base(Path::new(&self.path), &data.path);
            if !host::file_exists(&full) {
                return Err(CompileError::new(ErrorKind::InvalidImport, node.row, node.col)
                    .with_expected(data.path.clone()));
            }

            let source = host::read_file(&full)
                .map_err(|_| CompileError::new(ErrorKind::InvalidImport, node.row, node.col))?;
            let name = full
                .canonicalize()
                .unwrap_or(full.clone())
                .to_string_lossy()
                .into_owned();

            if iso.context.is_included(&name) {
                if let (Some(from), Some(to)) = (self.scope, iso.context.exported_scope(&name)) {
                    iso.context.add_include(from, to);
                }
                continue;
            }

            let mut script = Script::module(&name, &full, source);
            script.compile(iso);
            script.run(iso);
            let failed = script.has_err;
            let included_scope = script.scope;
            iso.context.add_script(script);

            if failed {
                return Err(CompileError::new(ErrorKind::InvalidImport, node.row, node.col)
                    .with_expected(data.path.clone()));
            }

            // Merge by name: lookups in this file fall through to the
            // included file's declarations.
            if let (Some(from), Some(to)) = (self.scope, iso.context.exported_scope(&name).or(included_scope)) {
                iso.context.add_include(from, to);
            }
        }

        Ok(())
    }

    /// Runs a successfully compiled script. A failed script's run is a
    /// no-op. The sub-module selector re-marks exports first; a literal
    /// `"*"` leaves the parsed markers untouched.
    pub fn run(&mut self, iso: &mut Isolate) {
        if self.has_err {
            return;
        }
        let Some(scope) = self.scope else { return };

        if !self.sub_module.is_empty() && self.sub_module != "*" {
            for id in iso.scope(scope).nodes.clone() {
                let matches = iso.node(id).name == self.sub_module;
                iso.node_mut(id).is_export = matches;
            }
        }

        let started = Instant::now();
        let mut executor = Execute::new(iso, scope);

        match executor.evaluate() {
            Ok(()) => {
                self.state = State::Executed;
                if !self.internal {
                    debug!(target: "cobble::timing", path = %self.path, elapsed = ?started.elapsed(), "executed");
                }
            }
            Err(error) => {
                self.report(Phase::Runtime, &error);
            }
        }
    }

    /// Formats, prints and retains one diagnostic, and fails the script.
    fn report(&mut self, phase: Phase, error: &CompileError) {
        let msg = format!(
            "{}:{} - {} - \n\t{}\n\n{}",
            error.row,
            error.col,
            error,
            self.path,
            self.source_excerpt(error.row, error.col),
        );

        println!("\n{phase}: \n{msg}");

        self.msgs.push(msg);
        self.has_err = true;
        self.failed_phase = Some(phase);
        self.state = State::Failed;
    }

    /// Reproduces the offending source line and the one before it, tabs
    /// rendered as spaces, with a caret under the offending column.
    fn source_excerpt(&self, row: u32, col: u32) -> String {
        let mut result = String::new();

        for (index, line) in self.source.lines().enumerate() {
            let current = index as u32 + 1;
            if current + 1 == row || current == row {
                result.push_str(&line.replace('\t', " "));
                result.push('\n');
            } else if current > row {
                break;
            }
        }

        for _ in 1..col.max(1) {
            result.push(' ');
        }
        result.push_str("\x1b[1;32m^\x1b[0m\n");

        result
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn inline_compile_and_run() {
        let mut iso = Isolate::new();
        let mut script = Script::inline("var x = 1 + 2;");

        script.compile(&mut iso);
        assert_eq!(script.state, State::Analyzed);
        assert!(!script.has_err);

        script.run(&mut iso);
        assert_eq!(script.state, State::Executed);
        assert!(script.msgs.is_empty());
    }

    #[test]
    fn parse_failure_stops_pipeline() {
        let mut iso = Isolate::new();
        let mut script = Script::inline("var x = ;");

        script.compile(&mut iso);
        assert_eq!(script.state, State::Failed);
        assert!(script.has_err);
        assert_eq!(script.failed_phase, Some(Phase::Parser));
        assert_eq!(script.msgs.len(), 1);

        // A failed script's run is a no-op.
        script.run(&mut iso);
        assert_eq!(script.state, State::Failed);
    }

    #[test]
    fn semantic_failure_reports_position() {
        let mut iso = Isolate::new();
        let mut script = Script::inline("var x = y;");

        script.compile(&mut iso);
        assert_eq!(script.state, State::Failed);
        assert_eq!(script.failed_phase, Some(Phase::Semantic));
        assert!(script.msgs[0].starts_with("1:9"));
    }

    #[test]
    fn excerpt_aligns_caret() {
        let script = Script::inline("var x int = \"hi\";");
        let excerpt = script.source_excerpt(1, 11);

        let caret_line = excerpt.lines().nth(1).unwrap();
        let plain = caret_line.replace("\x1b[1;32m", "").replace("\x1b[0m", "");
        // The caret lands in the offending column (1-based 11).
        assert_eq!(plain.find('^'), Some(10));
    }

    #[test]
    fn stdlib_loads_once() {
        let mut iso = Isolate::new();

        let mut first = Script::inline("var x = max(1, 2);");
        first.compile(&mut iso);
        first.run(&mut iso);
        assert!(!first.has_err);
        assert!(iso.context.is_imported("app"));

        let mut second = Script::inline("var y = min(1, 2);");
        second.compile(&mut iso);
        second.run(&mut iso);
        assert!(!second.has_err);
    }
}
