use crate::ast::*;
use crate::error::{CompileError, ErrorKind};
use crate::isolate::Isolate;
use crate::scanner::Scanner;
use crate::scope::{Scope, ScopeId};
use crate::token::{Kind, Token};

type ParseResult<T> = Result<T, CompileError>;

/// Consumes the next token if it is any of the given kinds and returns it.
macro_rules! accept {
    ( $self:ident, $( $kind:expr ),+ ) => {
        {
            let token = $self.peek()?;
            if $( token.kind == $kind )||* {
                $self.advance()?;
                Some(token)
            } else {
                None
            }
        }
    }
}

/// Parses a token stream into an AST rooted at a file scope.
///
/// - File        -> ( Import | Include | Modifier* ( VarDecl | FuncDecl | ObjectDecl ) | Statement )* EOF ;
/// - Modifier    -> "public" | "static" ;
/// - Import      -> "import" STRING ";" ;
/// - Include     -> "include" STRING ";" ;
/// - VarDecl     -> "var" IDENTIFIER Type? ( "=" Expression )? ";" ;
/// - FuncDecl    -> "func" IDENTIFIER "(" Parameters? ")" Type? Block ;
/// - Parameters  -> IDENTIFIER Type? ( "," IDENTIFIER Type? )* "..."? ;
/// - ObjectDecl  -> "object" IDENTIFIER ( "extends" IDENTIFIER )? "{" Member* "}" ;
/// - Statement   -> IfStmt | ForStmt | WhileStmt | SwitchStmt | ReturnStmt
///                | "break" ";" | "continue" ";" | Block | VarDecl | ExprStmt ;
/// - IfStmt      -> "if" "(" Expression ")" Statement ( "else" Statement )? ;
/// - ForStmt     -> "for" "(" ( VarDecl | ExprStmt | ";" ) Expression? ";" Expression? ")" Statement ;
/// - WhileStmt   -> "while" "(" Expression ")" Statement ;
/// - SwitchStmt  -> "switch" "(" Expression ")" "{" ( "case" Expression ":" Statement* | "default" ":" Statement* )* "}" ;
/// - Expression  -> Assignment ;
/// - Assignment  -> Postfix ( "=" | "+=" | "-=" | "*=" | "/=" ) Assignment | LogicOr ;
/// - LogicOr     -> LogicAnd ( "||" LogicAnd )* ;
/// - LogicAnd    -> Equality ( "&&" Equality )* ;
/// - Equality    -> Comparison ( ( "!=" | "==" ) Comparison )* ;
/// - Comparison  -> Term ( ( ">" | ">=" | "<" | "<=" ) Term )* ;
/// - Term        -> Factor ( ( "+" | "-" ) Factor )* ;
/// - Factor      -> Unary ( ( "*" | "/" | "%" ) Unary )* ;
/// - Unary       -> ( "!" | "-" | "+" | "++" | "--" ) Unary | Postfix ;
/// - Postfix     -> Primary ( "(" Arguments? ")" | "[" Expression "]" | "." IDENTIFIER | "++" | "--" )* ;
/// - Primary     -> LITERAL | IDENTIFIER | "(" Type ")" Unary | "(" Expression ")" | "[" Type "]" "{" Arguments? "}" ;
///
/// Imports and includes are recorded verbatim in side lists; the script
/// driver resolves them after parsing completes. The first error unwinds
/// to the driver; no further tokens are consumed.
pub struct Parser<'s, 'i> {
    scanner: Scanner<'s>,
    iso: &'i mut Isolate,
    scopes: Vec<ScopeId>,
    pub imports: Vec<NodeId>,
    pub includes: Vec<NodeId>,
}

impl<'s, 'i> Parser<'s, 'i> {
    pub fn new(source: &'s str, iso: &'i mut Isolate) -> Parser<'s, 'i> {
        Parser {
            scanner: Scanner::new(source),
            iso,
            scopes: Vec::new(),
            imports: Vec::new(),
            includes: Vec::new(),
        }
    }

    /// Parses the whole buffer and returns the `File` node.
    pub fn parse(&mut self, name: &str) -> ParseResult<NodeId> {
        let scope = self.iso.alloc_scope(Scope::new(name, None));
        self.scopes.push(scope);

        while self.peek()?.kind != Kind::Eof {
            let node = self.declaration()?;
            self.iso.scope_mut(scope).insert(node);
        }

        self.scopes.pop();

        let file = Node {
            name: name.to_string(),
            row: 1,
            col: 1,
            is_export: false,
            kind: NodeKind::File(FileData { scope }),
        };

        Ok(self.iso.alloc_node(file))
    }

    /// Returns the next token without consuming it.
    fn peek(&mut self) -> ParseResult<Token> {
        self.scanner.peek_token()
    }

    /// Consumes the next token and returns it.
    fn advance(&mut self) -> ParseResult<Token> {
        self.scanner.next_token()
    }

    /// Returns if the next token is of the given kind.
    fn check(&mut self, kind: Kind) -> ParseResult<bool> {
        Ok(self.peek()?.kind == kind)
    }

    /// Consumes the next token if it is of the given kind, or fails with
    /// the given error kind and expected-token name.
    fn consume(&mut self, kind: Kind, error: ErrorKind, expected: &str) -> ParseResult<Token> {
        let token = self.peek()?;
        if token.kind == kind {
            return self.advance();
        }

        Err(CompileError::at(error, &token).with_expected(expected))
    }

    fn current_scope(&self) -> ScopeId {
        *self.scopes.last().expect("parser scope stack to be non-empty")
    }

    fn open_scope(&mut self, name: &str) -> ScopeId {
        let scope = self.iso.alloc_scope(Scope::new(name, Some(self.current_scope())));
        self.scopes.push(scope);
        scope
    }

    fn close_scope(&mut self) {
        self.scopes.pop();
    }

    /// Parses one top-level or block-level item. Imports and includes
    /// appear only at file scope.
    fn declaration(&mut self) -> ParseResult<NodeId> {
        if let Some(keyword) = accept!(self, Kind::Import) {
            if self.scopes.len() > 1 {
                return Err(CompileError::at(ErrorKind::InvalidImport, &keyword));
            }
            return self.import_declaration();
        }

        if let Some(keyword) = accept!(self, Kind::Include) {
            if self.scopes.len() > 1 {
                return Err(CompileError::at(ErrorKind::InvalidImport, &keyword));
            }
            return self.include_declaration();
        }

        let mut is_export = false;
        let mut is_static = false;
        loop {
            if accept!(self, Kind::Public).is_some() {
                is_export = true;
            } else if accept!(self, Kind::Static).is_some() {
                is_static = true;
            } else {
                break;
            }
        }

        if is_export || is_static {
            let id = if let Some(token) = accept!(self, Kind::Var) {
                self.var_declaration(&token)?
            } else if let Some(token) = accept!(self, Kind::Func) {
                self.func_declaration(&token, is_static)?
            } else if let Some(token) = accept!(self, Kind::Object) {
                self.object_declaration(&token)?
            } else {
                let token = self.peek()?;
                return Err(CompileError::at(ErrorKind::ExpectedIdentifier, &token)
                    .with_expected("declaration"));
            };

            self.iso.node_mut(id).is_export = is_export;
            return Ok(id);
        }

        if let Some(token) = accept!(self, Kind::Var) {
            return self.var_declaration(&token);
        }

        if let Some(token) = accept!(self, Kind::Func) {
            return self.func_declaration(&token, false);
        }

        if let Some(token) = accept!(self, Kind::Object) {
            return self.object_declaration(&token);
        }

        self.statement()
    }

    /// Parses an import directive into the side list.
    fn import_declaration(&mut self) -> ParseResult<NodeId> {
        let name = self.consume(Kind::String, ErrorKind::ExpectedString, "module name")?;
        self.consume(Kind::Semicolon, ErrorKind::ExpectedSemicolon, ";")?;

        let node = Node::new(
            name.lexeme.clone(),
            &name,
            NodeKind::Import(ImportData { module: name.lexeme.clone() }),
        );
        let id = self.iso.alloc_node(node);
        self.imports.push(id);

        Ok(id)
    }

    /// Parses an include directive into the side list.
    fn include_declaration(&mut self) -> ParseResult<NodeId> {
        let path = self.consume(Kind::String, ErrorKind::ExpectedString, "path")?;
        self.consume(Kind::Semicolon, ErrorKind::ExpectedSemicolon, ";")?;

        let node = Node::new(
            path.lexeme.clone(),
            &path,
            NodeKind::Include(IncludeData { path: path.lexeme.clone() }),
        );
        let id = self.iso.alloc_node(node);
        self.includes.push(id);

        Ok(id)
    }

    /// Consumes a type name if one is next. Object types are identifiers.
    fn type_annotation(&mut self) -> ParseResult<Option<Token>> {
        let token = self.peek()?;
        if token.kind.is_type() || token.kind == Kind::Ident {
            self.advance()?;
            return Ok(Some(token));
        }

        Ok(None)
    }

    /// Parses a variable declaration. The `var` keyword is consumed.
    fn var_declaration(&mut self, keyword: &Token) -> ParseResult<NodeId> {
        let name = self.consume(Kind::Ident, ErrorKind::ExpectedIdentifier, "variable name")?;
        let declared = self.type_annotation()?;

        let mut initializer = None;
        let mut assign = (0, 0);
        if let Some(equals) = accept!(self, Kind::Equal) {
            assign = (equals.row, equals.col);
            initializer = Some(self.expression()?);
        }

        self.consume(Kind::Semicolon, ErrorKind::ExpectedSemicolon, ";")?;

        let node = Node::new(
            name.lexeme,
            keyword,
            NodeKind::Var(VarData {
                declared,
                initializer,
                scope: Some(self.current_scope()),
                ty: None,
                assign_row: assign.0,
                assign_col: assign.1,
                variadic: false,
            }),
        );

        Ok(self.iso.alloc_node(node))
    }

    /// Parses a function declaration. The `func` keyword is consumed.
    /// Parameters live in their own scope; the body block nests under it.
    fn func_declaration(&mut self, keyword: &Token, is_static: bool) -> ParseResult<NodeId> {
        let name = self.consume(Kind::Ident, ErrorKind::ExpectedIdentifier, "function name")?;
        self.consume(Kind::LeftParen, ErrorKind::ExpectedParen, "(")?;

        let scope = self.open_scope(&name.lexeme);

        let mut params = Vec::new();
        if !self.check(Kind::RightParen)? {
            loop {
                if params.len() >= 255 {
                    let token = self.peek()?;
                    return Err(CompileError::at(ErrorKind::Internal, &token)
                        .with_expected("fewer than 255 parameters"));
                }

                let param = self.consume(Kind::Ident, ErrorKind::ExpectedIdentifier, "parameter name")?;
                let declared = self.type_annotation()?;
                let variadic = accept!(self, Kind::Ellipsis).is_some();

                let node = Node::new(
                    param.lexeme.clone(),
                    &param,
                    NodeKind::Var(VarData {
                        declared,
                        initializer: None,
                        scope: Some(scope),
                        ty: None,
                        assign_row: 0,
                        assign_col: 0,
                        variadic,
                    }),
                );
                let id = self.iso.alloc_node(node);
                self.iso.scope_mut(scope).insert(id);
                params.push(id);

                if variadic || accept!(self, Kind::Comma).is_none() {
                    break;
                }
            }
        }

        self.consume(Kind::RightParen, ErrorKind::ExpectedParen, ")")?;

        let ret = if self.check(Kind::LeftBrace)? {
            None
        } else {
            self.type_annotation()?
        };

        let body = self.block(&name.lexeme)?;
        self.close_scope();

        let node = Node::new(
            name.lexeme,
            keyword,
            NodeKind::Func(FuncData {
                params,
                body: Some(body),
                ret,
                ty: None,
                is_constructor: false,
                is_static,
            }),
        );

        Ok(self.iso.alloc_node(node))
    }

    /// Parses an object declaration. The `object` keyword is consumed.
    /// A member func named after the object is its constructor.
    fn object_declaration(&mut self, keyword: &Token) -> ParseResult<NodeId> {
        let name = self.consume(Kind::Ident, ErrorKind::ExpectedIdentifier, "object name")?;

        let extends = if accept!(self, Kind::Extends).is_some() {
            Some(self.consume(Kind::Ident, ErrorKind::ExpectedIdentifier, "base object name")?)
        } else {
            None
        };

        self.consume(Kind::LeftBrace, ErrorKind::ExpectedBrace, "{")?;
        let scope = self.open_scope(&name.lexeme);

        while !self.check(Kind::RightBrace)? && !self.check(Kind::Eof)? {
            let mut is_export = false;
            let mut is_static = false;
            loop {
                if accept!(self, Kind::Public).is_some() {
                    is_export = true;
                } else if accept!(self, Kind::Static).is_some() {
                    is_static = true;
                } else {
                    break;
                }
            }

            let member = if let Some(token) = accept!(self, Kind::Var) {
                self.var_declaration(&token)?
            } else if let Some(token) = accept!(self, Kind::Func) {
                let id = self.func_declaration(&token, is_static)?;
                if self.iso.node(id).name == name.lexeme {
                    if let NodeKind::Func(data) = &mut self.iso.node_mut(id).kind {
                        data.is_constructor = true;
                    }
                }
                id
            } else {
                let token = self.peek()?;
                return Err(CompileError::at(ErrorKind::ExpectedIdentifier, &token)
                    .with_expected("member declaration"));
            };

            self.iso.node_mut(member).is_export = is_export;
            self.iso.scope_mut(scope).insert(member);
        }

        self.close_scope();
        self.consume(Kind::RightBrace, ErrorKind::ExpectedBrace, "}")?;

        let node = Node::new(
            name.lexeme,
            keyword,
            NodeKind::Object(ObjectData { scope, extends }),
        );

        Ok(self.iso.alloc_node(node))
    }

    /// Parses a statement.
    fn statement(&mut self) -> ParseResult<NodeId> {
        if let Some(token) = accept!(self, Kind::If) {
            return self.if_statement(&token);
        }

        if let Some(token) = accept!(self, Kind::For) {
            return self.for_statement(&token);
        }

        if let Some(token) = accept!(self, Kind::While) {
            return self.while_statement(&token);
        }

        if let Some(token) = accept!(self, Kind::Switch) {
            return self.switch_statement(&token);
        }

        if let Some(token) = accept!(self, Kind::Return) {
            let value = match self.check(Kind::Semicolon)? {
                true => None,
                false => Some(self.expression()?),
            };
            self.consume(Kind::Semicolon, ErrorKind::ExpectedSemicolon, ";")?;

            let node = Node::new("return", &token, NodeKind::Return(ReturnData { value }));
            return Ok(self.iso.alloc_node(node));
        }

        if let Some(token) = accept!(self, Kind::Break) {
            self.consume(Kind::Semicolon, ErrorKind::ExpectedSemicolon, ";")?;
            return Ok(self.iso.alloc_node(Node::new("break", &token, NodeKind::Break)));
        }

        if let Some(token) = accept!(self, Kind::Continue) {
            self.consume(Kind::Semicolon, ErrorKind::ExpectedSemicolon, ";")?;
            return Ok(self.iso.alloc_node(Node::new("continue", &token, NodeKind::Continue)));
        }

        if self.check(Kind::LeftBrace)? {
            return self.block("block");
        }

        self.expression_statement()
    }

    /// Parses a braced block with its own scope.
    fn block(&mut self, name: &str) -> ParseResult<NodeId> {
        let brace = self.consume(Kind::LeftBrace, ErrorKind::ExpectedBrace, "{")?;
        let scope = self.open_scope(name);

        while !self.check(Kind::RightBrace)? && !self.check(Kind::Eof)? {
            let node = self.declaration()?;
            self.iso.scope_mut(scope).insert(node);
        }

        self.close_scope();
        self.consume(Kind::RightBrace, ErrorKind::ExpectedBrace, "}")?;

        let node = Node::new(name, &brace, NodeKind::Block(BlockData { scope }));
        Ok(self.iso.alloc_node(node))
    }

    /// Parses an if statement.
    fn if_statement(&mut self, keyword: &Token) -> ParseResult<NodeId> {
        self.consume(Kind::LeftParen, ErrorKind::ExpectedParen, "(")?;
        let condition = self.expression()?;
        self.consume(Kind::RightParen, ErrorKind::ExpectedParen, ")")?;

        let then_branch = self.statement()?;
        let else_branch = match accept!(self, Kind::Else) {
            Some(_) => Some(self.statement()?),
            None => None,
        };

        let node = Node::new(
            "if",
            keyword,
            NodeKind::If(IfData { condition, then_branch, else_branch }),
        );

        Ok(self.iso.alloc_node(node))
    }

    /// Parses a for statement. The loop variable lives in a scope that
    /// wraps the body.
    fn for_statement(&mut self, keyword: &Token) -> ParseResult<NodeId> {
        self.consume(Kind::LeftParen, ErrorKind::ExpectedParen, "(")?;
        let scope = self.open_scope("for");

        let initializer = if accept!(self, Kind::Semicolon).is_some() {
            None
        } else if let Some(token) = accept!(self, Kind::Var) {
            let id = self.var_declaration(&token)?;
            self.iso.scope_mut(scope).insert(id);
            Some(id)
        } else {
            Some(self.expression_statement()?)
        };

        let condition = match self.check(Kind::Semicolon)? {
            true => None,
            false => Some(self.expression()?),
        };
        self.consume(Kind::Semicolon, ErrorKind::ExpectedSemicolon, ";")?;

        let step = match self.check(Kind::RightParen)? {
            true => None,
            false => Some(self.expression()?),
        };
        self.consume(Kind::RightParen, ErrorKind::ExpectedParen, ")")?;

        let body = self.statement()?;
        self.close_scope();

        let node = Node::new(
            "for",
            keyword,
            NodeKind::For(ForData { scope, initializer, condition, step, body }),
        );

        Ok(self.iso.alloc_node(node))
    }

    /// Parses a while statement.
    fn while_statement(&mut self, keyword: &Token) -> ParseResult<NodeId> {
        self.consume(Kind::LeftParen, ErrorKind::ExpectedParen, "(")?;
        let condition = self.expression()?;
        self.consume(Kind::RightParen, ErrorKind::ExpectedParen, ")")?;
        let body = self.statement()?;

        let node = Node::new("while", keyword, NodeKind::While(WhileData { condition, body }));
        Ok(self.iso.alloc_node(node))
    }

    /// Parses a switch statement. Each clause's statements run in their
    /// own block; there is no fallthrough.
    fn switch_statement(&mut self, keyword: &Token) -> ParseResult<NodeId> {
        self.consume(Kind::LeftParen, ErrorKind::ExpectedParen, "(")?;
        let subject = self.expression()?;
        self.consume(Kind::RightParen, ErrorKind::ExpectedParen, ")")?;
        self.consume(Kind::LeftBrace, ErrorKind::ExpectedBrace, "{")?;

        let mut cases = Vec::new();
        loop {
            if let Some(token) = accept!(self, Kind::Case) {
                let value = self.expression()?;
                self.consume(Kind::Colon, ErrorKind::ExpectedOperator, ":")?;
                let body = self.case_body(&token)?;

                let node = Node::new(
                    "case",
                    &token,
                    NodeKind::Case(CaseData { value: Some(value), body }),
                );
                cases.push(self.iso.alloc_node(node));
            } else if let Some(token) = accept!(self, Kind::Default) {
                self.consume(Kind::Colon, ErrorKind::ExpectedOperator, ":")?;
                let body = self.case_body(&token)?;

                let node = Node::new("default", &token, NodeKind::Case(CaseData { value: None, body }));
                cases.push(self.iso.alloc_node(node));
            } else {
                break;
            }
        }

        self.consume(Kind::RightBrace, ErrorKind::ExpectedBrace, "}")?;

        let node = Node::new(
            "switch",
            keyword,
            NodeKind::Switch(SwitchData { subject, cases }),
        );

        Ok(self.iso.alloc_node(node))
    }

    /// Parses the statements of one case clause into an implicit block.
    fn case_body(&mut self, keyword: &Token) -> ParseResult<NodeId> {
        let scope = self.open_scope("case");

        while !self.check(Kind::Case)?
            && !self.check(Kind::Default)?
            && !self.check(Kind::RightBrace)?
            && !self.check(Kind::Eof)?
        {
            let node = self.declaration()?;
            self.iso.scope_mut(scope).insert(node);
        }

        self.close_scope();

        let node = Node::new("case", keyword, NodeKind::Block(BlockData { scope }));
        Ok(self.iso.alloc_node(node))
    }

    /// Parses an expression statement.
    fn expression_statement(&mut self) -> ParseResult<NodeId> {
        let expr = self.expression()?;
        self.consume(Kind::Semicolon, ErrorKind::ExpectedSemicolon, ";")?;

        Ok(expr)
    }

    /// Parses an expression.
    fn expression(&mut self) -> ParseResult<NodeId> {
        self.assignment()
    }

    /// Builds a binary node positioned at its left operand.
    fn binary(&mut self, left: NodeId, op: Token, right: NodeId) -> NodeId {
        let anchor = self.iso.node(left);
        let node = Node {
            name: op.lexeme.clone(),
            row: anchor.row,
            col: anchor.col,
            is_export: false,
            kind: NodeKind::Binary(BinaryData { left, op, right }),
        };

        self.iso.alloc_node(node)
    }

    /// Parses an assignment expression. Targets must be identifiers,
    /// members or index expressions.
    fn assignment(&mut self) -> ParseResult<NodeId> {
        let expr = self.or()?;

        let token = self.peek()?;
        if token.kind.is_assign() {
            let op = self.advance()?;

            let target = self.iso.node(expr);
            let valid = match &target.kind {
                NodeKind::Ident(_) => true,
                NodeKind::Binary(data) => {
                    data.op.kind == Kind::Dot || data.op.kind == Kind::LeftBracket
                }
                _ => false,
            };
            if !valid {
                return Err(CompileError::at(ErrorKind::InvalidAssignment, &op));
            }

            let value = self.assignment()?;
            return Ok(self.binary(expr, op, value));
        }

        Ok(expr)
    }

    /// Parses a logical or expression.
    fn or(&mut self) -> ParseResult<NodeId> {
        let mut expr = self.and()?;

        while let Some(op) = accept!(self, Kind::OrOr) {
            let right = self.and()?;
            expr = self.binary(expr, op, right);
        }

        Ok(expr)
    }

    /// Parses a logical and expression.
    fn and(&mut self) -> ParseResult<NodeId> {
        let mut expr = self.equality()?;

        while let Some(op) = accept!(self, Kind::AndAnd) {
            let right = self.equality()?;
            expr = self.binary(expr, op, right);
        }

        Ok(expr)
    }

    /// Parses an equality expression.
    fn equality(&mut self) -> ParseResult<NodeId> {
        let mut expr = self.comparison()?;

        while let Some(op) = accept!(self, Kind::BangEqual, Kind::EqualEqual) {
            let right = self.comparison()?;
            expr = self.binary(expr, op, right);
        }

        Ok(expr)
    }

    /// Parses a comparison expression.
    fn comparison(&mut self) -> ParseResult<NodeId> {
        let mut expr = self.term()?;

        while let Some(op) = accept!(self, Kind::Greater, Kind::GreaterEqual, Kind::Less, Kind::LessEqual) {
            let right = self.term()?;
            expr = self.binary(expr, op, right);
        }

        Ok(expr)
    }

    /// Parses a term expression.
    fn term(&mut self) -> ParseResult<NodeId> {
        let mut expr = self.factor()?;

        while let Some(op) = accept!(self, Kind::Minus, Kind::Plus) {
            let right = self.factor()?;
            expr = self.binary(expr, op, right);
        }

        Ok(expr)
    }

    /// Parses a factor expression.
    fn factor(&mut self) -> ParseResult<NodeId> {
        let mut expr = self.unary()?;

        while let Some(op) = accept!(self, Kind::Slash, Kind::Star, Kind::Percent) {
            let right = self.unary()?;
            expr = self.binary(expr, op, right);
        }

        Ok(expr)
    }

    /// Parses a unary prefix expression.
    fn unary(&mut self) -> ParseResult<NodeId> {
        if let Some(op) = accept!(self, Kind::Bang, Kind::Minus, Kind::Plus, Kind::Increment, Kind::Decrement) {
            let operand = self.unary()?;
            let node = Node::new(
                op.lexeme.clone(),
                &op.clone(),
                NodeKind::Unary(UnaryData { op, operand, prefix: true }),
            );
            return Ok(self.iso.alloc_node(node));
        }

        self.postfix()
    }

    /// Parses postfix operators: calls, indexing, member access and
    /// increments.
    fn postfix(&mut self) -> ParseResult<NodeId> {
        let mut expr = self.primary()?;

        loop {
            if accept!(self, Kind::LeftParen).is_some() {
                expr = self.finish_call(expr)?;
            } else if let Some(op) = accept!(self, Kind::LeftBracket) {
                let index = self.expression()?;
                self.consume(Kind::RightBracket, ErrorKind::ExpectedBrace, "]")?;
                expr = self.binary(expr, op, index);
            } else if let Some(op) = accept!(self, Kind::Dot) {
                let name = self.consume(Kind::Ident, ErrorKind::ExpectedIdentifier, "member name")?;
                let member = Node::new(
                    name.lexeme.clone(),
                    &name,
                    NodeKind::Ident(IdentData { decl: None }),
                );
                let member = self.iso.alloc_node(member);
                expr = self.binary(expr, op, member);
            } else if let Some(op) = accept!(self, Kind::Increment, Kind::Decrement) {
                let node = Node::new(
                    op.lexeme.clone(),
                    &op.clone(),
                    NodeKind::Unary(UnaryData { op, operand: expr, prefix: false }),
                );
                expr = self.iso.alloc_node(node);
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// Parses call arguments. The opening parenthesis is consumed.
    fn finish_call(&mut self, callee: NodeId) -> ParseResult<NodeId> {
        let mut args = Vec::new();

        if !self.check(Kind::RightParen)? {
            loop {
                if args.len() >= 255 {
                    let token = self.peek()?;
                    return Err(CompileError::at(ErrorKind::Internal, &token)
                        .with_expected("fewer than 255 arguments"));
                }

                args.push(self.expression()?);

                if accept!(self, Kind::Comma).is_none() {
                    break;
                }
            }
        }

        self.consume(Kind::RightParen, ErrorKind::ExpectedParen, ")")?;

        let anchor = self.iso.node(callee);
        let node = Node {
            name: anchor.name.clone(),
            row: anchor.row,
            col: anchor.col,
            is_export: false,
            kind: NodeKind::Call(CallData { callee, args, resolved: None }),
        };

        Ok(self.iso.alloc_node(node))
    }

    /// Parses a primary expression. A parenthesized type name is a cast,
    /// decided by speculating on the scanner and rewinding when the
    /// parenthesis turns out to be grouping.
    fn primary(&mut self) -> ParseResult<NodeId> {
        let token = self.peek()?;

        if token.kind.is_literal() {
            self.advance()?;
            let node = Node::new(
                token.lexeme.clone(),
                &token,
                NodeKind::Literal(LiteralData { kind: token.kind, value: token.lexeme.clone() }),
            );
            return Ok(self.iso.alloc_node(node));
        }

        if token.kind == Kind::Ident {
            self.advance()?;
            let node = Node::new(
                token.lexeme.clone(),
                &token,
                NodeKind::Ident(IdentData { decl: None }),
            );
            return Ok(self.iso.alloc_node(node));
        }

        if token.kind == Kind::LeftParen {
            let checkpoint = self.scanner.checkpoint();
            self.advance()?;

            // A cast target is a type NAME: its lexeme maps back to its
            // kind through the keyword table. A numeric literal shares
            // the kind but not the lexeme, `true` shares both and stays
            // grouping.
            let target = self.peek()?;
            let is_type_name = target.kind.is_type()
                && target.kind != Kind::Boolean
                && Kind::from_keyword(&target.lexeme) == Some(target.kind);
            if is_type_name {
                self.advance()?;
                if accept!(self, Kind::RightParen).is_some() {
                    let expr = self.unary()?;
                    let node = Node::new(
                        target.lexeme.clone(),
                        &token,
                        NodeKind::Cast(CastData { target, expr }),
                    );
                    return Ok(self.iso.alloc_node(node));
                }
                self.scanner.restore(checkpoint);
                self.advance()?;
            }

            let expr = self.expression()?;
            self.consume(Kind::RightParen, ErrorKind::ExpectedParen, ")")?;
            return Ok(expr);
        }

        if token.kind == Kind::LeftBracket {
            self.advance()?;
            let element = self.peek()?;
            if !element.kind.is_type() {
                return Err(CompileError::at(ErrorKind::ExpectedType, &element));
            }
            self.advance()?;
            self.consume(Kind::RightBracket, ErrorKind::ExpectedBrace, "]")?;
            self.consume(Kind::LeftBrace, ErrorKind::ExpectedBrace, "{")?;

            let mut elements = Vec::new();
            if !self.check(Kind::RightBrace)? {
                loop {
                    elements.push(self.expression()?);
                    if accept!(self, Kind::Comma).is_none() {
                        break;
                    }
                }
            }
            self.consume(Kind::RightBrace, ErrorKind::ExpectedBrace, "}")?;

            let node = Node::new(
                element.lexeme.clone(),
                &token,
                NodeKind::Array(ArrayData { element, elements }),
            );
            return Ok(self.iso.alloc_node(node));
        }

        Err(CompileError::at(ErrorKind::ExpectedExpression, &token))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(source: &str) -> (Isolate, NodeId) {
        let mut iso = Isolate::new();
        let root = Parser::new(source, &mut iso).parse("test").unwrap();
        (iso, root)
    }

    fn parse_err(source: &str) -> CompileError {
        let mut iso = Isolate::new();
        Parser::new(source, &mut iso).parse("test").unwrap_err()
    }

    fn file_nodes(iso: &Isolate, root: NodeId) -> Vec<NodeId> {
        let NodeKind::File(data) = &iso.node(root).kind else { unreachable!() };
        iso.scope(data.scope).nodes.clone()
    }

    #[test]
    fn parse_var_with_initializer() {
        let (iso, root) = parse("var x = 1 + 2;");
        let nodes = file_nodes(&iso, root);

        assert_eq!(nodes.len(), 1);
        let var = iso.node(nodes[0]);
        assert_eq!(var.name, "x");
        let NodeKind::Var(data) = &var.kind else { panic!("expected var") };
        assert!(data.declared.is_none());
        assert!(data.initializer.is_some());
    }

    #[test]
    fn parse_typed_var() {
        let (iso, root) = parse("var x int = 1;");
        let nodes = file_nodes(&iso, root);

        let NodeKind::Var(data) = &iso.node(nodes[0]).kind else { panic!("expected var") };
        assert_eq!(data.declared.as_ref().unwrap().kind, Kind::Int);
        assert_eq!((data.assign_row, data.assign_col), (1, 11));
    }

    #[test]
    fn parse_func_with_params() {
        let (iso, root) = parse("func add(a int, b int) int { return a + b; }");
        let nodes = file_nodes(&iso, root);

        let func = iso.node(nodes[0]);
        assert_eq!(func.name, "add");
        let NodeKind::Func(data) = &func.kind else { panic!("expected func") };
        assert_eq!(data.params.len(), 2);
        assert_eq!(data.ret.as_ref().unwrap().kind, Kind::Int);
    }

    #[test]
    fn parse_variadic_param() {
        let (iso, root) = parse("func log(level int, parts...) { }");
        let nodes = file_nodes(&iso, root);

        let NodeKind::Func(data) = &iso.node(nodes[0]).kind else { panic!("expected func") };
        let NodeKind::Var(last) = &iso.node(data.params[1]).kind else { panic!("expected var") };
        assert!(last.variadic);
    }

    #[test]
    fn parse_object_with_constructor() {
        let (iso, root) = parse("object Point { var x int; func Point(x int) { } }");
        let nodes = file_nodes(&iso, root);

        let NodeKind::Object(data) = &iso.node(nodes[0]).kind else { panic!("expected object") };
        let members = iso.scope(data.scope).nodes.clone();
        let NodeKind::Func(ctor) = &iso.node(members[1]).kind else { panic!("expected func") };
        assert!(ctor.is_constructor);
    }

    #[test]
    fn parse_import_side_list() {
        let mut iso = Isolate::new();
        let mut parser = Parser::new("import \"math\";\nvar x = 1;", &mut iso);
        parser.parse("test").unwrap();

        assert_eq!(parser.imports.len(), 1);
        let import = parser.imports[0];
        assert_eq!(parser.iso.node(import).name, "math");
        assert_eq!(parser.iso.node(import).row, 1);
    }

    #[test]
    fn parse_cast_versus_grouping() {
        let (iso, root) = parse("var x = (int) 1.5; var y = (1 + 2);");
        let nodes = file_nodes(&iso, root);

        let NodeKind::Var(x) = &iso.node(nodes[0]).kind else { panic!("expected var") };
        let cast = iso.node(x.initializer.unwrap());
        assert!(matches!(cast.kind, NodeKind::Cast(_)));

        let NodeKind::Var(y) = &iso.node(nodes[1]).kind else { panic!("expected var") };
        let group = iso.node(y.initializer.unwrap());
        assert!(matches!(group.kind, NodeKind::Binary(_)));
    }

    #[test]
    fn parse_array_literal() {
        let (iso, root) = parse("var xs = [int]{1, 2, 3};");
        let nodes = file_nodes(&iso, root);

        let NodeKind::Var(data) = &iso.node(nodes[0]).kind else { panic!("expected var") };
        let NodeKind::Array(array) = &iso.node(data.initializer.unwrap()).kind else {
            panic!("expected array")
        };
        assert_eq!(array.element.kind, Kind::Int);
        assert_eq!(array.elements.len(), 3);
    }

    #[test]
    fn parse_missing_semicolon() {
        let error = parse_err("var x = 1");

        assert_eq!(error.kind, ErrorKind::ExpectedSemicolon);
    }

    #[test]
    fn parse_invalid_assignment_target() {
        let error = parse_err("1 = 2;");

        assert_eq!(error.kind, ErrorKind::InvalidAssignment);
        assert_eq!((error.row, error.col), (1, 3));
    }

    #[test]
    fn parse_stops_at_first_error() {
        let error = parse_err("var = 1;\nvar y = 2;");

        assert_eq!(error.kind, ErrorKind::ExpectedIdentifier);
        assert_eq!(error.row, 1);
    }
}
