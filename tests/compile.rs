//! Pipeline-level tests driven through the library API: compile-state
//! transitions, resolution invariants and the print/re-parse round trip.

use pretty_assertions::assert_eq;

use cobble_lang::ast::NodeKind;
use cobble_lang::error::{ErrorKind, Phase};
use cobble_lang::isolate::Isolate;
use cobble_lang::parser::Parser;
use cobble_lang::printer::Printer;
use cobble_lang::scope::ScopeId;
use cobble_lang::script::{Script, State};
use cobble_lang::semantics::Semantics;
use cobble_lang::token::Kind;

fn analyze(source: &str) -> Result<(Isolate, ScopeId), cobble_lang::error::CompileError> {
    let mut iso = Isolate::new();
    let root = Parser::new(source, &mut iso).parse("test").unwrap();
    let NodeKind::File(data) = iso.node(root).kind.clone() else { unreachable!() };

    Semantics::new(&mut iso).evaluate(data.scope)?;
    Ok((iso, data.scope))
}

#[test]
fn accepted_var_binds_int() {
    let (iso, scope) = analyze("var x = 1 + 2;").unwrap();

    let decl = iso.lookup_local(scope, "x").unwrap();
    let NodeKind::Var(data) = &iso.node(decl).kind else { panic!("expected var") };
    assert_eq!(data.ty, Some(Kind::Int));
}

#[test]
fn undefined_reports_identifier_position() {
    let error = analyze("var x = y;").unwrap_err();

    assert_eq!(error.kind, ErrorKind::Undefined);
    assert_eq!((error.row, error.col), (1, 9));
}

#[test]
fn two_pass_resolution_infers_forward_return() {
    let (iso, scope) = analyze("func f() { return g(); } func g() { return 1; }").unwrap();

    let f = iso.lookup_local(scope, "f").unwrap();
    let NodeKind::Func(data) = &iso.node(f).kind else { panic!("expected func") };
    assert_eq!(data.ty, Some(Kind::Int));
}

#[test]
fn mismatch_diagnostic_points_at_equals() {
    let error = analyze("var x int = \"hi\";").unwrap_err();

    assert_eq!(error.kind, ErrorKind::TypeMismatch);
    assert_eq!((error.row, error.col), (1, 11));
}

#[test]
fn script_state_machine() {
    let mut iso = Isolate::new();

    let mut ok = Script::inline("var x = 1;");
    assert_eq!(ok.state, State::Created);
    ok.compile(&mut iso);
    assert_eq!(ok.state, State::Analyzed);
    ok.run(&mut iso);
    assert_eq!(ok.state, State::Executed);
    assert!(ok.msgs.is_empty());

    let mut bad = Script::inline("var x = ;");
    bad.compile(&mut iso);
    assert_eq!(bad.state, State::Failed);
    assert_eq!(bad.failed_phase, Some(Phase::Parser));
    assert!(!bad.msgs.is_empty());
}

#[test]
fn resolved_positions_stay_positive() {
    let (iso, scope) = analyze(
        "var x = 1;\nfunc f(a int) int { return a + x; }\nobject O { var v int; }",
    )
    .unwrap();

    for &id in &iso.scope(scope).nodes.clone() {
        let node = iso.node(id);
        assert!(node.row >= 1, "row for {}", node.name);
        assert!(node.col >= 1, "col for {}", node.name);
    }
}

#[test]
fn quiescent_sets_stay_disjoint() {
    let mut iso = Isolate::new();

    let mut script = Script::inline("var x = max(1, 2);");
    script.compile(&mut iso);
    script.run(&mut iso);

    // After loading, `app` is imported and nothing is left in progress.
    assert!(iso.context.is_imported("app"));
    assert!(!iso.context.is_in_progress("app"));
}

fn canonical(source: &str) -> String {
    let mut iso = Isolate::new();
    let root = Parser::new(source, &mut iso).parse("test").unwrap();
    let NodeKind::File(data) = iso.node(root).kind.clone() else { unreachable!() };

    Printer::new(&iso).print_scope(data.scope)
}

#[test]
fn print_reparse_preserves_structure() {
    let source = "\
object Shape { var sides int; func Shape(n int) { this.sides = n; } func count() int { return sides; } }
public func describe(s Shape) string { return \"sides: \" + s.count(); }
var sq Shape = Shape(4);
for (var i = 0; i < 3; i++) { println(describe(sq)); }
switch (1 + 1) { case 2: var ok = true; default: break; }
var xs = [int]{1, 2, 3};
xs[0] += 41;
var d = (double) xs[0];
import \"math\";
";

    let first = canonical(source);
    let second = canonical(&first);

    assert_eq!(first, second);
}
