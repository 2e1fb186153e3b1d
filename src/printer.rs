use crate::ast::{NodeId, NodeKind};
use crate::isolate::Isolate;
use crate::scope::ScopeId;
use crate::token::Kind;

/// Prints an AST back to canonical source. Re-parsing the output yields a
/// structurally equal tree, which is what the round-trip tests check.
/// Binary expressions come out fully parenthesized; the parser treats
/// parentheses as transparent grouping, so no extra nodes appear.
pub struct Printer<'i> {
    iso: &'i Isolate,
}

impl<'i> Printer<'i> {
    pub fn new(iso: &'i Isolate) -> Printer<'i> {
        Printer { iso }
    }

    /// Prints every statement of a scope, one per line.
    pub fn print_scope(&self, scope: ScopeId) -> String {
        self.iso
            .scope(scope)
            .nodes
            .iter()
            .map(|&id| self.stmt(id))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn stmt(&self, id: NodeId) -> String {
        let node = self.iso.node(id);
        let export = if node.is_export { "public " } else { "" };

        match &node.kind {
            NodeKind::Var(data) => {
                let mut out = format!("{export}var {}", node.name);
                if let Some(declared) = &data.declared {
                    out += &format!(" {}", declared.lexeme);
                }
                if let Some(initializer) = data.initializer {
                    out += &format!(" = {}", self.expr(initializer));
                }
                out + ";"
            }

            NodeKind::Func(data) => {
                let is_static = if data.is_static { "static " } else { "" };
                let params = data
                    .params
                    .iter()
                    .map(|&param| {
                        let node = self.iso.node(param);
                        let NodeKind::Var(var) = &node.kind else { return node.name.clone() };
                        let mut out = node.name.clone();
                        if let Some(declared) = &var.declared {
                            out += &format!(" {}", declared.lexeme);
                        }
                        if var.variadic {
                            out += "...";
                        }
                        out
                    })
                    .collect::<Vec<_>>()
                    .join(", ");

                let ret = match &data.ret {
                    Some(ret) => format!("{} ", ret.lexeme),
                    None => String::new(),
                };
                let body = match data.body {
                    Some(body) => self.stmt(body),
                    None => "{ }".to_string(),
                };

                format!("{export}{is_static}func {}({params}) {ret}{body}", node.name)
            }

            NodeKind::Object(data) => {
                let extends = match &data.extends {
                    Some(extends) => format!(" extends {}", extends.lexeme),
                    None => String::new(),
                };

                format!("{export}object {}{extends} {{ {} }}", node.name, self.inline_scope(data.scope))
            }

            NodeKind::Block(data) => format!("{{ {} }}", self.inline_scope(data.scope)),

            NodeKind::If(data) => {
                let mut out = format!(
                    "if ({}) {}",
                    self.expr(data.condition),
                    self.stmt(data.then_branch),
                );
                if let Some(else_branch) = data.else_branch {
                    out += &format!(" else {}", self.stmt(else_branch));
                }
                out
            }

            NodeKind::For(data) => {
                let initializer = match data.initializer {
                    Some(initializer) => self.stmt_or_expr(initializer),
                    None => ";".to_string(),
                };
                let condition = data.condition.map(|c| self.expr(c)).unwrap_or_default();
                let step = data.step.map(|s| self.expr(s)).unwrap_or_default();

                format!(
                    "for ({initializer} {condition}; {step}) {}",
                    self.stmt(data.body),
                )
            }

            NodeKind::While(data) => {
                format!("while ({}) {}", self.expr(data.condition), self.stmt(data.body))
            }

            NodeKind::Switch(data) => {
                let cases = data
                    .cases
                    .iter()
                    .map(|&case| self.stmt(case))
                    .collect::<Vec<_>>()
                    .join(" ");

                format!("switch ({}) {{ {cases} }}", self.expr(data.subject))
            }

            NodeKind::Case(data) => {
                let body = match &self.iso.node(data.body).kind {
                    NodeKind::Block(block) => self.inline_scope(block.scope),
                    _ => self.stmt(data.body),
                };

                match data.value {
                    Some(value) => format!("case {}: {body}", self.expr(value)),
                    None => format!("default: {body}"),
                }
            }

            NodeKind::Return(data) => match data.value {
                Some(value) => format!("return {};", self.expr(value)),
                None => "return;".to_string(),
            },

            NodeKind::Break => "break;".to_string(),
            NodeKind::Continue => "continue;".to_string(),

            NodeKind::Import(data) => format!("import \"{}\";", data.module),
            NodeKind::Include(data) => format!("include \"{}\";", data.path),

            _ => format!("{};", self.expr(id)),
        }
    }

    /// A statement that may also be a bare expression, as in a for
    /// initializer.
    fn stmt_or_expr(&self, id: NodeId) -> String {
        match &self.iso.node(id).kind {
            NodeKind::Var(_) => self.stmt(id),
            _ => format!("{};", self.expr(id)),
        }
    }

    fn inline_scope(&self, scope: ScopeId) -> String {
        self.iso
            .scope(scope)
            .nodes
            .iter()
            .map(|&id| self.stmt(id))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn expr(&self, id: NodeId) -> String {
        let node = self.iso.node(id);

        match &node.kind {
            NodeKind::Literal(data) => match data.kind {
                Kind::String => format!("\"{}\"", escape(&data.value)),
                Kind::Char => format!("'{}'", escape(&data.value)),
                Kind::Double => format!("{}d", data.value),
                _ => data.value.clone(),
            },

            NodeKind::Ident(_) => node.name.clone(),

            NodeKind::Unary(data) => {
                if data.prefix {
                    format!("({}{})", data.op.lexeme, self.expr(data.operand))
                } else {
                    format!("({}{})", self.expr(data.operand), data.op.lexeme)
                }
            }

            NodeKind::Binary(data) => match data.op.kind {
                Kind::Dot => format!("{}.{}", self.expr(data.left), self.expr(data.right)),
                Kind::LeftBracket => {
                    format!("{}[{}]", self.expr(data.left), self.expr(data.right))
                }
                _ => format!(
                    "({} {} {})",
                    self.expr(data.left),
                    data.op.lexeme,
                    self.expr(data.right),
                ),
            },

            NodeKind::Call(data) => {
                let args = data
                    .args
                    .iter()
                    .map(|&arg| self.expr(arg))
                    .collect::<Vec<_>>()
                    .join(", ");

                format!("{}({args})", self.expr(data.callee))
            }

            NodeKind::Array(data) => {
                let elements = data
                    .elements
                    .iter()
                    .map(|&element| self.expr(element))
                    .collect::<Vec<_>>()
                    .join(", ");

                format!("[{}]{{{elements}}}", data.element.lexeme)
            }

            NodeKind::Cast(data) => {
                format!("(({}) {})", data.target.lexeme, self.expr(data.expr))
            }

            _ => String::new(),
        }
    }
}

/// Re-escapes a literal's decoded text for printing.
fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\t', "\\t")
        .replace('"', "\\\"")
        .replace('\'', "\\'")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::Parser;

    fn canonical(source: &str) -> String {
        let mut iso = Isolate::new();
        let root = Parser::new(source, &mut iso).parse("test").unwrap();
        let NodeKind::File(data) = iso.node(root).kind.clone() else { unreachable!() };

        Printer::new(&iso).print_scope(data.scope)
    }

    #[test]
    fn print_var() {
        assert_eq!(canonical("var x int = 1 + 2;"), "var x int = (1 + 2);");
    }

    #[test]
    fn print_reparse_fixpoint() {
        let sources = [
            "var x = 1 + 2 * 3;",
            "var s = \"a\\nb\" + 'c';",
            "func add(a int, b int) int { return a + b; }",
            "func log(parts...) { }",
            "object Point { var x int; func Point(x int) { this.x = x; } }",
            "public var answer int = 42;",
            "for (var i = 0; i < 10; i++) { continue; }",
            "while (true) { break; }",
            "if (1 < 2) { var a = 1; } else { var b = 2; }",
            "switch (1) { case 1: var a = 1; default: var b = 2; }",
            "var xs = [int]{1, 2, 3}; var x = xs[0];",
            "var y = (double) \"1.5\";",
            "import \"math\"; include \"util.cb\";",
        ];

        for source in sources {
            let first = canonical(source);
            let second = canonical(&first);
            assert_eq!(first, second, "round-trip diverged for {source:?}");
        }
    }
}
