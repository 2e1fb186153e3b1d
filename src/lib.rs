//! Cobble is a small imperative, C-like scripting language with a
//! tree-walk interpreter. Sources are compiled by a hand-written
//! recursive descent front end, statically checked, and then evaluated
//! directly off the AST. Cobble is a hobby project and is not intended
//! for production use.
//!
//! ## Scanning
//! The first step is scanning: turning a string of characters into
//! tokens. The scanner is implemented in the [`scanner`](scanner) module
//! as a lazy producer over the character stream. It hands out one token
//! at a time, supports lookahead without consuming, and can save and
//! restore its cursor so the parser can speculate, which the grammar
//! needs to tell a cast `(int) x` apart from a parenthesized expression.
//!
//! ## Parsing
//! The parser in the [`parser`](parser) module is a recursive descent
//! parser producing an abstract syntax tree of [`Node`](ast::Node)s.
//! Nodes live in the [`Isolate`](isolate::Isolate)'s arena and refer to
//! each other by stable ids, so a resolved identifier can point at its
//! declaration without any reference counting. Declarations are grouped
//! into [`Scope`](scope::Scope)s forming the lexical environment.
//! `import` and `include` directives are not resolved here; they are
//! recorded in side lists for the script driver. Unlike the runtime
//! phases, the parser stops at the first error: the diagnostic unwinds
//! to the driver and no further tokens are consumed.
//!
//! ## Analysis
//! The [`semantics`](semantics) module walks the tree in program order,
//! resolves every identifier through the scope chain, type-checks
//! expressions and annotates declarations with their resolved types.
//! Scopes are scanned in two passes, declaration headers before bodies,
//! which is what lets functions call each other in any order and lets
//! cyclic imports see each other's declarations.
//!
//! ## Scripts and modules
//! A [`Script`](script::Script) bundles one source unit with its compile
//! state and diagnostics. The shared [`Context`](context::Context) tracks
//! which modules are loading and which are loaded, so every module is
//! compiled at most once no matter how many import paths lead to it.
//! Imports resolve against the library directory; includes resolve
//! against the including file's own directory.
//!
//! ## Execution
//! The [`exec`](exec) module evaluates a compiled file scope. Values
//! live in environment frames chained per call and block, and top-level
//! state persists in the isolate so imported modules keep their values
//! between scripts.

use std::process;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

pub mod ast;
pub mod context;
pub mod error;
pub mod exec;
pub mod host;
pub mod isolate;
pub mod parser;
pub mod printer;
pub mod scanner;
pub mod scope;
pub mod script;
pub mod semantics;
pub mod token;

use error::Phase;
use isolate::Isolate;
use script::Script;

/// One interpreter instance: an isolate plus the entry points the CLI
/// uses.
pub struct Cobble {
    isolate: Isolate,
}

impl Cobble {
    pub fn new() -> Cobble {
        Cobble { isolate: Isolate::new() }
    }

    /// Compiles and runs one source file. Returns the process exit code:
    /// 0 on success, 65 for compile errors, 70 for runtime errors.
    pub fn run_file(&mut self, path: &str) -> i32 {
        let mut script = match Script::from_file(std::path::Path::new(path)) {
            Ok(script) => script,
            Err(error) => {
                eprintln!("cobble: cannot read {path}: {error}");
                return 66;
            }
        };

        script.compile(&mut self.isolate);
        script.run(&mut self.isolate);

        let code = match script.failed_phase {
            None => 0,
            Some(Phase::Runtime) => 70,
            Some(_) => 65,
        };

        self.isolate.context.add_script(script);
        code
    }

    /// Compiles and runs an inline buffer, as the prompt does.
    pub fn run_source(&mut self, source: &str) -> Option<Phase> {
        let mut script = Script::inline(source);

        script.compile(&mut self.isolate);
        script.run(&mut self.isolate);

        let failed = script.failed_phase;
        self.isolate.context.add_script(script);
        failed
    }

    /// Reads and runs lines until end of input.
    pub fn run_prompt(&mut self) {
        let Ok(mut editor) = DefaultEditor::new() else {
            eprintln!("cobble: cannot open the prompt");
            process::exit(74);
        };

        loop {
            match editor.readline("> ") {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    editor.add_history_entry(&line).ok();
                    self.run_source(&line);
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(error) => {
                    eprintln!("cobble: {error}");
                    break;
                }
            }
        }
    }
}

impl Default for Cobble {
    fn default() -> Self {
        Self::new()
    }
}
