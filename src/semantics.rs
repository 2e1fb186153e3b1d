use tracing::debug;

use crate::ast::*;
use crate::error::{CompileError, ErrorKind};
use crate::isolate::Isolate;
use crate::scope::ScopeId;
use crate::token::{Kind, Token};

type ValidateResult<T> = Result<T, CompileError>;

/// Returns if a value of kind `from` can fill a slot of kind `to`.
///
/// Rules: exact match; numeric widening `char -> int -> float -> double`;
/// any primitive stringifies into a string slot; `null` fills anything.
pub fn assignable(from: Kind, to: Kind) -> bool {
    if from == to || from == Kind::Null {
        return true;
    }

    if from.is_numeric() && to.is_numeric() {
        return numeric_rank(from) <= numeric_rank(to);
    }

    if to == Kind::String && is_primitive(from) {
        return true;
    }

    false
}

fn numeric_rank(kind: Kind) -> i32 {
    match kind {
        Kind::Char => 0,
        Kind::Int => 1,
        Kind::Float => 2,
        Kind::Double => 3,
        _ => -1,
    }
}

fn is_primitive(kind: Kind) -> bool {
    kind.is_numeric() || matches!(kind, Kind::Boolean | Kind::String)
}

/// The widest of two numeric kinds.
fn widest(a: Kind, b: Kind) -> Kind {
    if numeric_rank(a) >= numeric_rank(b) { a } else { b }
}

/// Return kind of a host-implemented intrinsic, if the name is one.
fn intrinsic(name: &str) -> Option<Kind> {
    match name {
        "print" | "println" => Some(Kind::Null),
        "clock" => Some(Kind::Double),
        "len" => Some(Kind::Int),
        "str" => Some(Kind::String),
        "readln" => Some(Kind::String),
        _ => None,
    }
}

/// Walks the AST in program order, resolving identifiers through the
/// scope chain, type-checking expressions and annotating nodes with their
/// resolved types.
///
/// Each scope is scanned in two passes: pass one fixes declaration
/// headers (declared types of vars, parameters and return types of
/// funcs), pass two validates bodies. The `is_parsed` flag set before
/// entering a scope guards against re-entry on cyclic references, which
/// is what makes forward references and cyclic imports resolve.
pub struct Semantics<'i> {
    iso: &'i mut Isolate,
    scopes: Vec<ScopeId>,
    this_stack: Vec<NodeId>,
    /// Declarations currently being validated, guarding on-demand
    /// validation against cycles.
    validating: Vec<NodeId>,
    /// Enclosing funcs with their declared or inferred return kinds.
    func_stack: Vec<(NodeId, Option<Kind>)>,
}

impl<'i> Semantics<'i> {
    pub fn new(iso: &'i mut Isolate) -> Semantics<'i> {
        Semantics {
            iso,
            scopes: Vec::new(),
            this_stack: Vec::new(),
            validating: Vec::new(),
            func_stack: Vec::new(),
        }
    }

    /// Validates a file scope. The single catch point for analysis
    /// failures is the caller.
    pub fn evaluate(&mut self, scope: ScopeId) -> ValidateResult<()> {
        debug!(scope = %self.iso.scope(scope).name, "analyzing");
        self.scan_scope(scope)
    }

    fn current_scope(&self) -> ScopeId {
        *self.scopes.last().expect("analyzer scope stack to be non-empty")
    }

    /// Two-pass scan of one scope: headers first, then bodies.
    fn scan_scope(&mut self, scope: ScopeId) -> ValidateResult<()> {
        if self.iso.scope(scope).is_parsed {
            return Ok(());
        }
        self.iso.scope_mut(scope).is_parsed = true;

        self.scopes.push(scope);
        let nodes = self.iso.scope(scope).nodes.clone();

        for &id in &nodes {
            self.declare_header(id);
        }

        let result = (|| {
            for &id in &nodes {
                self.validate_node(id)?;
            }
            Ok(())
        })();

        self.scopes.pop();
        result
    }

    /// Pass one: fix the declared types of variable headers without
    /// walking any initializer. Function headers need no work here; their
    /// declared return tokens are readable before the body is validated,
    /// which is what forward references rely on.
    fn declare_header(&mut self, id: NodeId) {
        let declared = match &self.iso.node(id).kind {
            NodeKind::Var(data) => data.declared.as_ref().map(type_kind),
            _ => return,
        };

        if declared.is_none() {
            return;
        }

        if let NodeKind::Var(data) = &mut self.iso.node_mut(id).kind {
            data.ty = declared;
        }
    }

    /// Pass two: validate one node fully.
    fn validate_node(&mut self, id: NodeId) -> ValidateResult<()> {
        match &self.iso.node(id).kind {
            NodeKind::Var(_) => self.validate_var(id),
            NodeKind::Func(_) => self.validate_func(id),
            NodeKind::Object(_) => self.validate_object(id),
            NodeKind::Block(_) => self.validate_block(id),
            NodeKind::If(_) => self.validate_if(id),
            NodeKind::For(_) => self.validate_for(id),
            NodeKind::While(_) => self.validate_while(id),
            NodeKind::Switch(_) => self.validate_switch(id),
            NodeKind::Return(_) => self.validate_return(id),
            NodeKind::Break | NodeKind::Continue => Ok(()),
            // Imports and includes were already handled by the driver.
            NodeKind::Import(_) | NodeKind::Include(_) | NodeKind::File(_) => Ok(()),
            _ => self.validate_expr(id).map(|_| ()),
        }
    }

    /// Validates a variable declaration: determines its declared or
    /// inferred type and checks the initializer against it. Anchors the
    /// lookup at the variable's owning scope so on-demand validation of a
    /// forward reference resolves in the right module.
    fn validate_var(&mut self, id: NodeId) -> ValidateResult<()> {
        let NodeKind::Var(data) = self.iso.node(id).kind.clone() else {
            return Err(self.internal(id));
        };

        if self.validating.contains(&id) {
            return Ok(());
        }
        self.validating.push(id);

        let anchored = data.scope.is_some();
        if let Some(scope) = data.scope {
            self.scopes.push(scope);
        }

        let result = (|| {
            let declared = data.declared.as_ref().map(type_kind);
            let initializer = match data.initializer {
                Some(expr) => Some(self.validate_expr(expr)?),
                None => None,
            };

            let ty = match (declared, initializer) {
                (Some(declared), Some(initializer)) => {
                    if !assignable(initializer, declared) {
                        return Err(CompileError::new(
                            ErrorKind::TypeMismatch,
                            data.assign_row,
                            data.assign_col,
                        ));
                    }
                    declared
                }
                (Some(declared), None) => declared,
                (None, Some(initializer)) => initializer,
                (None, None) => Kind::Null,
            };

            if let NodeKind::Var(data) = &mut self.iso.node_mut(id).kind {
                data.ty = Some(ty);
            }

            Ok(())
        })();

        if anchored {
            self.scopes.pop();
        }
        self.validating.retain(|&entry| entry != id);
        result
    }

    /// Validates a function: parameters, body, and the agreement between
    /// return statements and the declared return type. A set `ty` marks
    /// the function fully validated, so on-demand validation from a call
    /// site never walks a body twice.
    fn validate_func(&mut self, id: NodeId) -> ValidateResult<()> {
        let NodeKind::Func(data) = self.iso.node(id).kind.clone() else {
            return Err(self.internal(id));
        };

        if data.ty.is_some() || self.validating.contains(&id) {
            return Ok(());
        }
        self.validating.push(id);

        // A method validated on demand, before its object's own scan,
        // still needs `this` bound to the enclosing object.
        let owner = self.func_owner(&data);
        let rebound = match owner {
            Some(owner) if self.this_stack.last() != Some(&owner) => {
                self.this_stack.push(owner);
                true
            }
            _ => false,
        };

        let declared = data.ret.as_ref().map(type_kind);
        self.func_stack.push((id, declared));

        let result = (|| {
            for &param in &data.params {
                self.validate_var(param)?;
            }

            if let Some(body) = data.body {
                self.validate_node(body)?;
            }

            Ok(())
        })();

        let (_, inferred) = self.func_stack.pop().expect("func stack to be non-empty");
        if rebound {
            self.this_stack.pop();
        }
        self.validating.retain(|&entry| entry != id);
        result?;

        let ty = declared.or(inferred).unwrap_or(Kind::Null);
        if let NodeKind::Func(data) = &mut self.iso.node_mut(id).kind {
            data.ty = Some(ty);
        }

        Ok(())
    }

    /// Finds the object a function is a member of, through its body's
    /// scope chain: body block scope, parameter scope, enclosing scope.
    fn func_owner(&self, data: &FuncData) -> Option<NodeId> {
        let body = data.body?;
        let NodeKind::Block(block) = &self.iso.node(body).kind else { return None };
        let params = self.iso.scope(block.scope).parent?;
        let enclosing = self.iso.scope(params).parent?;

        self.scope_owner(enclosing)
    }

    /// Returns a function's return kind without walking its body when a
    /// declared return type or an earlier validation already fixed it.
    /// This is the declaration-header half of the two-pass contract.
    fn func_return(&mut self, decl: NodeId) -> ValidateResult<Kind> {
        let NodeKind::Func(data) = self.iso.node(decl).kind.clone() else {
            return Err(self.internal(decl));
        };

        if let Some(ty) = data.ty {
            return Ok(ty);
        }
        if let Some(ret) = &data.ret {
            return Ok(type_kind(ret));
        }
        if self.validating.contains(&decl) {
            return Ok(Kind::Null);
        }

        self.validate_func(decl)?;
        match &self.iso.node(decl).kind {
            NodeKind::Func(data) => Ok(data.ty.unwrap_or(Kind::Null)),
            _ => Ok(Kind::Null),
        }
    }

    /// Validates an object: duplicate members, the `extends` target and
    /// override rules, then every member with `this` in scope.
    fn validate_object(&mut self, id: NodeId) -> ValidateResult<()> {
        let NodeKind::Object(data) = self.iso.node(id).kind.clone() else {
            return Err(self.internal(id));
        };

        let members = self.iso.scope(data.scope).nodes.clone();
        for (index, &member) in members.iter().enumerate() {
            let name = self.iso.node(member).name.clone();
            for &other in &members[index + 1..] {
                if self.iso.node(other).name == name {
                    let node = self.iso.node(other);
                    return Err(CompileError::new(ErrorKind::DuplicateMember, node.row, node.col));
                }
            }
        }

        if let Some(extends) = &data.extends {
            let base = self
                .iso
                .lookup(self.current_scope(), &extends.lexeme)
                .ok_or_else(|| CompileError::at(ErrorKind::Undefined, extends))?;

            let NodeKind::Object(base_data) = self.iso.node(base).kind.clone() else {
                return Err(CompileError::at(ErrorKind::TypeMismatch, extends));
            };

            self.validate_extend(&members, base_data.scope, extends)?;
        }

        self.this_stack.push(id);
        let result = self.scan_scope(data.scope);
        self.this_stack.pop();

        result
    }

    /// Checks override rules against a base object's members: a same-name
    /// method overrides iff the signatures match, anything else with a
    /// shared name is a duplicate.
    fn validate_extend(
        &mut self,
        members: &[NodeId],
        base_scope: ScopeId,
        extends: &Token,
    ) -> ValidateResult<()> {
        let base_members = self.iso.scope(base_scope).nodes.clone();

        for &base_member in &base_members {
            let base_node = self.iso.node(base_member).clone();
            let Some(&member) = members
                .iter()
                .find(|&&member| self.iso.node(member).name == base_node.name)
            else {
                continue;
            };

            let node = self.iso.node(member).clone();
            match (&node.kind, &base_node.kind) {
                (NodeKind::Func(derived), NodeKind::Func(base))
                    if derived.params.len() == base.params.len() && !derived.is_constructor => {}
                _ => {
                    return Err(CompileError::new(ErrorKind::DuplicateMember, node.row, node.col)
                        .with_expected(extends.lexeme.clone()));
                }
            }
        }

        Ok(())
    }

    fn validate_block(&mut self, id: NodeId) -> ValidateResult<()> {
        let NodeKind::Block(data) = self.iso.node(id).kind.clone() else {
            return Err(self.internal(id));
        };

        self.scan_scope(data.scope)
    }

    fn validate_if(&mut self, id: NodeId) -> ValidateResult<()> {
        let NodeKind::If(data) = self.iso.node(id).kind.clone() else {
            return Err(self.internal(id));
        };

        self.expect_boolean(data.condition)?;
        self.validate_node(data.then_branch)?;
        if let Some(else_branch) = data.else_branch {
            self.validate_node(else_branch)?;
        }

        Ok(())
    }

    fn validate_for(&mut self, id: NodeId) -> ValidateResult<()> {
        let NodeKind::For(data) = self.iso.node(id).kind.clone() else {
            return Err(self.internal(id));
        };

        self.iso.scope_mut(data.scope).is_parsed = true;
        self.scopes.push(data.scope);

        let result = (|| {
            if let Some(initializer) = data.initializer {
                self.validate_node(initializer)?;
            }
            if let Some(condition) = data.condition {
                self.expect_boolean(condition)?;
            }
            if let Some(step) = data.step {
                self.validate_expr(step)?;
            }
            self.validate_node(data.body)
        })();

        self.scopes.pop();
        result
    }

    fn validate_while(&mut self, id: NodeId) -> ValidateResult<()> {
        let NodeKind::While(data) = self.iso.node(id).kind.clone() else {
            return Err(self.internal(id));
        };

        self.expect_boolean(data.condition)?;
        self.validate_node(data.body)
    }

    /// Validates a switch: the subject types against every case value.
    fn validate_switch(&mut self, id: NodeId) -> ValidateResult<()> {
        let NodeKind::Switch(data) = self.iso.node(id).kind.clone() else {
            return Err(self.internal(id));
        };

        let subject = self.validate_expr(data.subject)?;

        for &case in &data.cases {
            let NodeKind::Case(case_data) = self.iso.node(case).kind.clone() else {
                return Err(self.internal(case));
            };

            if let Some(value) = case_data.value {
                let value_ty = self.validate_expr(value)?;
                if !comparable(value_ty, subject) {
                    let node = self.iso.node(value);
                    return Err(CompileError::new(ErrorKind::TypeMismatch, node.row, node.col));
                }
            }

            self.validate_node(case_data.body)?;
        }

        Ok(())
    }

    /// Validates a return statement and unifies its type with the
    /// enclosing function's declared or inferred return type.
    fn validate_return(&mut self, id: NodeId) -> ValidateResult<()> {
        let NodeKind::Return(data) = self.iso.node(id).kind.clone() else {
            return Err(self.internal(id));
        };

        let ty = match data.value {
            Some(value) => self.validate_expr(value)?,
            None => Kind::Null,
        };

        let Some(&(func, declared)) = self.func_stack.last() else {
            return Ok(());
        };

        match declared {
            Some(declared) => {
                if !assignable(ty, declared) {
                    let node = self.iso.node(id);
                    return Err(CompileError::new(ErrorKind::TypeMismatch, node.row, node.col));
                }
            }
            None if ty != Kind::Null => {
                let top = self.func_stack.last_mut().expect("func stack to be non-empty");
                *top = (func, Some(ty));
            }
            None => {}
        }

        Ok(())
    }

    /// Validates an expression and returns the token kind describing its
    /// type.
    fn validate_expr(&mut self, id: NodeId) -> ValidateResult<Kind> {
        match &self.iso.node(id).kind {
            NodeKind::Literal(data) => Ok(data.kind),
            NodeKind::Ident(_) => self.validate_ident(id),
            NodeKind::Unary(_) => self.validate_unary(id),
            NodeKind::Binary(_) => self.validate_binary(id),
            NodeKind::Call(_) => self.validate_call(id),
            NodeKind::Array(_) => self.validate_array(id),
            NodeKind::Cast(_) => self.validate_cast(id),
            _ => Err(self.internal(id)),
        }
    }

    /// Resolves an identifier through the scope chain, then the exported
    /// declarations of imported modules. Stores the back-reference.
    fn validate_ident(&mut self, id: NodeId) -> ValidateResult<Kind> {
        let node = self.iso.node(id).clone();

        if node.name == "this" {
            let Some(&object) = self.this_stack.last() else {
                return Err(CompileError::new(ErrorKind::Undefined, node.row, node.col));
            };

            if let NodeKind::Ident(data) = &mut self.iso.node_mut(id).kind {
                data.decl = Some(object);
            }
            return Ok(Kind::Object);
        }

        let decl = self
            .iso
            .lookup(self.current_scope(), &node.name)
            .or_else(|| self.iso.exported_node(&node.name));

        let Some(decl) = decl else {
            // An unshadowed imported module name types as a module.
            if self.iso.module_scope(&node.name).is_some() {
                return Ok(Kind::Import);
            }
            return Err(CompileError::new(ErrorKind::Undefined, node.row, node.col));
        };

        if let NodeKind::Ident(data) = &mut self.iso.node_mut(id).kind {
            data.decl = Some(decl);
        }

        self.declaration_type(decl)
    }

    /// Returns a declaration's resolved type, validating it on demand for
    /// forward references. Cycles fall back to the declared type.
    fn declaration_type(&mut self, decl: NodeId) -> ValidateResult<Kind> {
        match self.iso.node(decl).kind.clone() {
            NodeKind::Var(data) => {
                if let Some(ty) = data.ty {
                    return Ok(ty);
                }
                if self.validating.contains(&decl) {
                    return Ok(Kind::Null);
                }
                self.validate_var(decl)?;
                match &self.iso.node(decl).kind {
                    NodeKind::Var(data) => Ok(data.ty.unwrap_or(Kind::Null)),
                    _ => Ok(Kind::Null),
                }
            }
            NodeKind::Func(_) => Ok(Kind::Func),
            NodeKind::Object(_) => Ok(Kind::Object),
            _ => Ok(Kind::Null),
        }
    }

    fn validate_unary(&mut self, id: NodeId) -> ValidateResult<Kind> {
        let NodeKind::Unary(data) = self.iso.node(id).kind.clone() else {
            return Err(self.internal(id));
        };

        let ty = self.validate_expr(data.operand)?;

        match data.op.kind {
            Kind::Bang => {
                if ty != Kind::Boolean {
                    return Err(CompileError::at(ErrorKind::TypeMismatch, &data.op));
                }
                Ok(Kind::Boolean)
            }
            Kind::Minus | Kind::Plus => {
                if !ty.is_numeric() {
                    return Err(CompileError::at(ErrorKind::TypeMismatch, &data.op));
                }
                Ok(ty)
            }
            Kind::Increment | Kind::Decrement => {
                let operand = self.iso.node(data.operand);
                if !matches!(operand.kind, NodeKind::Ident(_)) {
                    return Err(CompileError::at(ErrorKind::InvalidAssignment, &data.op));
                }
                if !ty.is_numeric() {
                    return Err(CompileError::at(ErrorKind::TypeMismatch, &data.op));
                }
                Ok(ty)
            }
            _ => Err(self.internal(id)),
        }
    }

    fn validate_binary(&mut self, id: NodeId) -> ValidateResult<Kind> {
        let NodeKind::Binary(data) = self.iso.node(id).kind.clone() else {
            return Err(self.internal(id));
        };

        match data.op.kind {
            Kind::Dot => self.validate_member(&data),
            Kind::LeftBracket => self.validate_index(&data),
            kind if kind.is_assign() => self.validate_assignment(&data),

            Kind::AndAnd | Kind::OrOr => {
                let left = self.validate_expr(data.left)?;
                let right = self.validate_expr(data.right)?;
                if left != Kind::Boolean || right != Kind::Boolean {
                    return Err(CompileError::at(ErrorKind::TypeMismatch, &data.op));
                }
                Ok(Kind::Boolean)
            }

            Kind::EqualEqual | Kind::BangEqual => {
                let left = self.validate_expr(data.left)?;
                let right = self.validate_expr(data.right)?;
                if !comparable(left, right) {
                    return Err(CompileError::at(ErrorKind::TypeMismatch, &data.op));
                }
                Ok(Kind::Boolean)
            }

            Kind::Less | Kind::LessEqual | Kind::Greater | Kind::GreaterEqual => {
                let left = self.validate_expr(data.left)?;
                let right = self.validate_expr(data.right)?;
                if !left.is_numeric() || !right.is_numeric() {
                    return Err(CompileError::at(ErrorKind::TypeMismatch, &data.op));
                }
                Ok(Kind::Boolean)
            }

            Kind::Plus => {
                let left = self.validate_expr(data.left)?;
                let right = self.validate_expr(data.right)?;
                if left == Kind::String || right == Kind::String {
                    let other = if left == Kind::String { right } else { left };
                    if !is_primitive(other) && other != Kind::Null {
                        return Err(CompileError::at(ErrorKind::TypeMismatch, &data.op));
                    }
                    return Ok(Kind::String);
                }
                if !left.is_numeric() || !right.is_numeric() {
                    return Err(CompileError::at(ErrorKind::TypeMismatch, &data.op));
                }
                Ok(widest(left, right))
            }

            Kind::Minus | Kind::Star | Kind::Slash | Kind::Percent => {
                let left = self.validate_expr(data.left)?;
                let right = self.validate_expr(data.right)?;
                if !left.is_numeric() || !right.is_numeric() {
                    return Err(CompileError::at(ErrorKind::TypeMismatch, &data.op));
                }
                Ok(widest(left, right))
            }

            _ => Err(CompileError::at(ErrorKind::ExpectedOperator, &data.op)),
        }
    }

    /// Validates an assignment or compound assignment.
    fn validate_assignment(&mut self, data: &BinaryData) -> ValidateResult<Kind> {
        let target = self.validate_expr(data.left)?;
        let value = self.validate_expr(data.right)?;

        if data.op.kind == Kind::Equal {
            if !assignable(value, target) && target != Kind::Null {
                return Err(CompileError::at(ErrorKind::TypeMismatch, &data.op));
            }
            return Ok(target);
        }

        // Compound assignment follows the arithmetic table.
        if data.op.kind == Kind::PlusEqual && target == Kind::String {
            if !is_primitive(value) {
                return Err(CompileError::at(ErrorKind::TypeMismatch, &data.op));
            }
            return Ok(Kind::String);
        }

        if !target.is_numeric() || !value.is_numeric() {
            return Err(CompileError::at(ErrorKind::TypeMismatch, &data.op));
        }
        if !assignable(value, target) {
            return Err(CompileError::at(ErrorKind::TypeMismatch, &data.op));
        }

        Ok(target)
    }

    /// Finds the scope a member access resolves against: the body scope
    /// of an object, or the published file scope of an imported module.
    ///
    /// Lookup against that scope is local, so the analyzer's own scope
    /// stack is never swapped and cannot be left dirty on an error path.
    fn member_target(&mut self, expr: NodeId) -> ValidateResult<(ScopeId, bool)> {
        let node = self.iso.node(expr).clone();

        if let NodeKind::Ident(_) = &node.kind {
            if node.name == "this" {
                let Some(&object) = self.this_stack.last() else {
                    return Err(CompileError::new(ErrorKind::Undefined, node.row, node.col));
                };
                let NodeKind::Object(data) = &self.iso.node(object).kind else {
                    return Err(self.internal(expr));
                };
                return Ok((data.scope, false));
            }

            if let Some(decl) = self.iso.lookup(self.current_scope(), &node.name) {
                if let Some(scope) = self.object_scope(decl) {
                    if let NodeKind::Ident(data) = &mut self.iso.node_mut(expr).kind {
                        data.decl = Some(decl);
                    }
                    return Ok((scope, false));
                }
            } else if let Some(scope) = self.iso.module_scope(&node.name) {
                return Ok((scope, true));
            }
        }

        Err(CompileError::new(ErrorKind::Undefined, node.row, node.col))
    }

    /// Follows a declaration to the scope of the object it denotes:
    /// an object itself, or a variable of object type. Lookups anchor at
    /// the variable's owning scope, not the walk's current position.
    fn object_scope(&mut self, decl: NodeId) -> Option<ScopeId> {
        match self.iso.node(decl).kind.clone() {
            NodeKind::Object(data) => Some(data.scope),
            NodeKind::Var(data) => {
                let anchor = data.scope.unwrap_or_else(|| self.current_scope());

                // Declared object type wins, else the initializer's
                // constructor call names the object.
                if let Some(declared) = &data.declared {
                    if declared.kind == Kind::Ident {
                        let found = self.iso.lookup(anchor, &declared.lexeme)?;
                        return self.object_scope(found);
                    }
                }

                let initializer = data.initializer?;
                if let NodeKind::Call(call) = self.iso.node(initializer).kind.clone() {
                    let callee = self.iso.node(call.callee).clone();
                    if let NodeKind::Ident(_) = callee.kind {
                        let found = self.iso.lookup(anchor, &callee.name)?;
                        if matches!(self.iso.node(found).kind, NodeKind::Object(_)) {
                            return self.object_scope(found);
                        }
                    }
                }

                None
            }
            _ => None,
        }
    }

    /// Looks a member name up in an object scope, following the
    /// `extends` chain.
    fn lookup_member(&self, scope: ScopeId, name: &str) -> Option<NodeId> {
        if let Some(found) = self.iso.lookup_local(scope, name) {
            return Some(found);
        }

        // The object owning this scope may extend another.
        let owner = self.scope_owner(scope)?;
        let NodeKind::Object(data) = &self.iso.node(owner).kind else { return None };
        let extends = data.extends.as_ref()?;
        let parent = self.iso.scope(scope).parent?;
        let base = self.iso.lookup(parent, &extends.lexeme)?;

        match &self.iso.node(base).kind {
            NodeKind::Object(base_data) => self.lookup_member(base_data.scope, name),
            _ => None,
        }
    }

    /// Finds the object declaration owning a scope, if any.
    fn scope_owner(&self, scope: ScopeId) -> Option<NodeId> {
        let parent = self.iso.scope(scope).parent?;
        self.iso
            .scope(parent)
            .nodes
            .iter()
            .copied()
            .find(|&id| match &self.iso.node(id).kind {
                NodeKind::Object(data) => data.scope == scope,
                _ => false,
            })
    }

    /// Validates `left.right` field access. The right side resolves
    /// inside the target's scope only.
    fn validate_member(&mut self, data: &BinaryData) -> ValidateResult<Kind> {
        let (scope, cross_module) = self.member_target(data.left)?;
        let right = self.iso.node(data.right).clone();

        let Some(decl) = self.lookup_member(scope, &right.name) else {
            return Err(CompileError::new(ErrorKind::Undefined, right.row, right.col));
        };

        if cross_module && !self.iso.node(decl).is_export {
            return Err(CompileError::new(ErrorKind::Undefined, right.row, right.col));
        }

        if let NodeKind::Ident(ident) = &mut self.iso.node_mut(data.right).kind {
            ident.decl = Some(decl);
        }

        self.declaration_type(decl)
    }

    /// Validates `left[right]` indexing.
    fn validate_index(&mut self, data: &BinaryData) -> ValidateResult<Kind> {
        let target = self.validate_expr(data.left)?;
        if target != Kind::Array && target != Kind::String {
            return Err(CompileError::at(ErrorKind::TypeMismatch, &data.op));
        }

        let index = self.validate_expr(data.right)?;
        if !assignable(index, Kind::Int) {
            return Err(CompileError::at(ErrorKind::TypeMismatch, &data.op));
        }

        if target == Kind::String {
            return Ok(Kind::Char);
        }

        Ok(self.element_kind(data.left).unwrap_or(Kind::Null))
    }

    /// Traces an expression back to an array literal to recover its
    /// element kind.
    fn element_kind(&self, expr: NodeId) -> Option<Kind> {
        match &self.iso.node(expr).kind {
            NodeKind::Array(data) => Some(type_kind(&data.element)),
            NodeKind::Ident(data) => {
                let decl = data.decl?;
                match &self.iso.node(decl).kind {
                    NodeKind::Var(var) => self.element_kind(var.initializer?),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Validates a call: resolves the callee, checks arity and argument
    /// assignability, and stores the resolved declaration. Names bound to
    /// host intrinsics take a dedicated path.
    fn validate_call(&mut self, id: NodeId) -> ValidateResult<Kind> {
        let NodeKind::Call(data) = self.iso.node(id).kind.clone() else {
            return Err(self.internal(id));
        };
        let call = self.iso.node(id).clone();
        let callee = self.iso.node(data.callee).clone();

        let decl = match &callee.kind {
            NodeKind::Ident(_) => {
                let found = self
                    .iso
                    .lookup(self.current_scope(), &callee.name)
                    .or_else(|| self.iso.exported_node(&callee.name));

                match found {
                    Some(found) => found,
                    None => return self.validate_internal(id, &data, &call),
                }
            }
            NodeKind::Binary(member) if member.op.kind == Kind::Dot => {
                let (scope, cross_module) = self.member_target(member.left)?;
                let right = self.iso.node(member.right).clone();

                let Some(found) = self.lookup_member(scope, &right.name) else {
                    return Err(CompileError::new(ErrorKind::Undefined, right.row, right.col));
                };
                if cross_module && !self.iso.node(found).is_export {
                    return Err(CompileError::new(ErrorKind::Undefined, right.row, right.col));
                }

                if let NodeKind::Ident(ident) = &mut self.iso.node_mut(member.right).kind {
                    ident.decl = Some(found);
                }

                found
            }
            _ => return Err(CompileError::new(ErrorKind::Undefined, call.row, call.col)),
        };

        match self.iso.node(decl).kind.clone() {
            NodeKind::Func(func) => {
                self.check_arguments(&data, &func, &call)?;
                if let NodeKind::Call(call_data) = &mut self.iso.node_mut(id).kind {
                    call_data.resolved = Some(decl);
                }

                self.func_return(decl)
            }
            NodeKind::Object(object) => {
                // Calling an object name constructs an instance.
                let constructor = self.iso.scope(object.scope).nodes.iter().copied().find(|&member| {
                    matches!(&self.iso.node(member).kind, NodeKind::Func(func) if func.is_constructor)
                });

                if let Some(constructor) = constructor {
                    let NodeKind::Func(func) = self.iso.node(constructor).kind.clone() else {
                        return Err(self.internal(constructor));
                    };
                    self.check_arguments(&data, &func, &call)?;
                } else if !data.args.is_empty() {
                    return Err(CompileError::new(ErrorKind::TypeMismatch, call.row, call.col));
                }

                if let NodeKind::Call(call_data) = &mut self.iso.node_mut(id).kind {
                    call_data.resolved = Some(decl);
                }

                Ok(Kind::Object)
            }
            _ => Err(CompileError::new(ErrorKind::Undefined, call.row, call.col)),
        }
    }

    /// Validates a call to a host-implemented intrinsic.
    fn validate_internal(
        &mut self,
        _id: NodeId,
        data: &CallData,
        call: &Node,
    ) -> ValidateResult<Kind> {
        let Some(ret) = intrinsic(&call.name) else {
            return Err(CompileError::new(ErrorKind::Undefined, call.row, call.col));
        };

        for &arg in &data.args {
            self.validate_expr(arg)?;
        }

        Ok(ret)
    }

    /// Checks argument count and per-argument assignability against a
    /// function's parameters. A trailing variadic parameter absorbs the
    /// rest.
    fn check_arguments(
        &mut self,
        data: &CallData,
        func: &FuncData,
        call: &Node,
    ) -> ValidateResult<()> {
        let variadic = func.params.last().is_some_and(|&param| {
            matches!(&self.iso.node(param).kind, NodeKind::Var(var) if var.variadic)
        });

        let fixed = if variadic { func.params.len() - 1 } else { func.params.len() };
        let arity_ok = if variadic {
            data.args.len() >= fixed
        } else {
            data.args.len() == fixed
        };
        if !arity_ok {
            return Err(CompileError::new(ErrorKind::TypeMismatch, call.row, call.col)
                .with_expected(format!("{fixed} arguments")));
        }

        for (index, &arg) in data.args.iter().enumerate() {
            let arg_ty = self.validate_expr(arg)?;

            if index >= fixed {
                continue;
            }

            let param_ty = match &self.iso.node(func.params[index]).kind {
                NodeKind::Var(var) => var.declared.as_ref().map(|token| type_kind(token)),
                _ => None,
            };

            if let Some(param_ty) = param_ty {
                if !assignable(arg_ty, param_ty) {
                    let node = self.iso.node(arg);
                    return Err(CompileError::new(ErrorKind::TypeMismatch, node.row, node.col));
                }
            }
        }

        Ok(())
    }

    /// Validates the elements of an array literal against its element
    /// type.
    fn validate_array(&mut self, id: NodeId) -> ValidateResult<Kind> {
        let NodeKind::Array(data) = self.iso.node(id).kind.clone() else {
            return Err(self.internal(id));
        };

        let element = type_kind(&data.element);
        for &expr in &data.elements {
            let ty = self.validate_expr(expr)?;
            if !assignable(ty, element) {
                let node = self.iso.node(expr);
                return Err(CompileError::new(ErrorKind::TypeMismatch, node.row, node.col));
            }
        }

        Ok(Kind::Array)
    }

    /// Validates a cast against the fixed permission matrix: numeric to
    /// numeric both ways, any primitive to string, and string to numeric
    /// with the conversion deferred to runtime.
    fn validate_cast(&mut self, id: NodeId) -> ValidateResult<Kind> {
        let NodeKind::Cast(data) = self.iso.node(id).kind.clone() else {
            return Err(self.internal(id));
        };

        let inner = self.validate_expr(data.expr)?;
        let target = type_kind(&data.target);

        let permitted = (target.is_numeric() && inner.is_numeric())
            || (target == Kind::String && is_primitive(inner))
            || (target.is_numeric() && inner == Kind::String);

        if !permitted {
            let node = self.iso.node(id);
            return Err(CompileError::new(ErrorKind::InvalidCast, node.row, node.col));
        }

        Ok(target)
    }

    fn expect_boolean(&mut self, expr: NodeId) -> ValidateResult<()> {
        let ty = self.validate_expr(expr)?;
        if ty != Kind::Boolean {
            let node = self.iso.node(expr);
            return Err(CompileError::new(ErrorKind::TypeMismatch, node.row, node.col));
        }

        Ok(())
    }

    fn internal(&self, id: NodeId) -> CompileError {
        let node = self.iso.node(id);
        CompileError::new(ErrorKind::Internal, node.row, node.col)
    }
}

/// Maps a declared-type token to the kind space. Identifier tokens name
/// object types.
fn type_kind(token: &Token) -> Kind {
    if token.kind == Kind::Ident {
        return Kind::Object;
    }

    token.kind
}

/// Returns if two kinds can be compared for equality.
fn comparable(a: Kind, b: Kind) -> bool {
    a == b || (a.is_numeric() && b.is_numeric()) || a == Kind::Null || b == Kind::Null
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::Parser;

    fn analyze(source: &str) -> Result<(Isolate, ScopeId), CompileError> {
        let mut iso = Isolate::new();
        let root = Parser::new(source, &mut iso).parse("test").unwrap();
        let NodeKind::File(data) = iso.node(root).kind.clone() else { unreachable!() };

        Semantics::new(&mut iso).evaluate(data.scope)?;
        Ok((iso, data.scope))
    }

    fn analyze_err(source: &str) -> CompileError {
        analyze(source).unwrap_err()
    }

    fn var_type(iso: &Isolate, scope: ScopeId, name: &str) -> Kind {
        let decl = iso.lookup_local(scope, name).unwrap();
        match &iso.node(decl).kind {
            NodeKind::Var(data) => data.ty.unwrap(),
            NodeKind::Func(data) => data.ty.unwrap(),
            _ => panic!("expected var or func"),
        }
    }

    #[test]
    fn infer_var_from_initializer() {
        let (iso, scope) = analyze("var x = 1 + 2;").unwrap();
        assert_eq!(var_type(&iso, scope, "x"), Kind::Int);
    }

    #[test]
    fn widen_numeric_binary() {
        let (iso, scope) = analyze("var x = 1 + 2.5;").unwrap();
        assert_eq!(var_type(&iso, scope, "x"), Kind::Float);
    }

    #[test]
    fn concat_types_as_string() {
        let (iso, scope) = analyze("var s = \"n = \" + 42;").unwrap();
        assert_eq!(var_type(&iso, scope, "s"), Kind::String);
    }

    #[test]
    fn undefined_identifier_reports_position() {
        let error = analyze_err("var x = y;");

        assert_eq!(error.kind, ErrorKind::Undefined);
        assert_eq!((error.row, error.col), (1, 9));
    }

    #[test]
    fn declared_type_mismatch_points_at_equals() {
        let error = analyze_err("var x int = \"hi\";");

        assert_eq!(error.kind, ErrorKind::TypeMismatch);
        assert_eq!((error.row, error.col), (1, 11));
    }

    #[test]
    fn forward_reference_between_funcs() {
        let (iso, scope) = analyze("func f() { return g(); } func g() { return 1; }").unwrap();

        assert_eq!(var_type(&iso, scope, "f"), Kind::Int);
        assert_eq!(var_type(&iso, scope, "g"), Kind::Int);
    }

    #[test]
    fn identifier_binds_to_lexical_declaration() {
        let (iso, scope) = analyze("var x = 1; func f() int { return x; }").unwrap();

        let func = iso.lookup_local(scope, "f").unwrap();
        let NodeKind::Func(data) = iso.node(func).kind.clone() else { unreachable!() };
        let NodeKind::Block(block) = iso.node(data.body.unwrap()).kind.clone() else { unreachable!() };
        let ret = iso.scope(block.scope).nodes[0];
        let NodeKind::Return(ret_data) = iso.node(ret).kind.clone() else { unreachable!() };
        let NodeKind::Ident(ident) = &iso.node(ret_data.value.unwrap()).kind else { unreachable!() };

        assert_eq!(ident.decl, iso.lookup_local(scope, "x"));
    }

    #[test]
    fn call_arity_checked() {
        let error = analyze_err("func f(a int) { } var x = f(1, 2);");
        assert_eq!(error.kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn variadic_relaxes_arity() {
        analyze("func f(a int, rest...) { } var x = f(1, 2, 3);").unwrap();
    }

    #[test]
    fn call_argument_type_checked() {
        let error = analyze_err("func f(a int) { } var x = f(\"hi\");");
        assert_eq!(error.kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn bang_requires_boolean() {
        let error = analyze_err("var x = !1;");
        assert_eq!(error.kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn condition_requires_boolean() {
        let error = analyze_err("if (1) { }");
        assert_eq!(error.kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn array_elements_checked() {
        let error = analyze_err("var xs = [int]{1, \"two\"};");
        assert_eq!(error.kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn cast_matrix_rejects_bool_to_int() {
        let error = analyze_err("var x = (int) true;");
        assert_eq!(error.kind, ErrorKind::InvalidCast);
    }

    #[test]
    fn cast_string_to_numeric_deferred() {
        let (iso, scope) = analyze("var x = (int) \"42\";").unwrap();
        assert_eq!(var_type(&iso, scope, "x"), Kind::Int);
    }

    #[test]
    fn object_member_access() {
        let (iso, scope) = analyze(
            "object Point { var x int; func Point(x int) { this.x = x; } }\n\
             var p Point = Point(1);\n\
             var x = p.x;",
        )
        .unwrap();

        assert_eq!(var_type(&iso, scope, "x"), Kind::Int);
    }

    #[test]
    fn duplicate_member_rejected() {
        let error = analyze_err("object O { var x int; var x int; }");
        assert_eq!(error.kind, ErrorKind::DuplicateMember);
    }

    #[test]
    fn extend_override_requires_matching_signature() {
        let error = analyze_err(
            "object A { func f(a int) { } }\nobject B extends A { func f() int { return 1; } }",
        );
        assert_eq!(error.kind, ErrorKind::DuplicateMember);
    }

    #[test]
    fn extend_inherits_members() {
        let (iso, scope) = analyze(
            "object A { var x int; }\nobject B extends A { }\n\
             var b B = B();\nvar x = b.x;",
        )
        .unwrap();

        assert_eq!(var_type(&iso, scope, "x"), Kind::Int);
    }

    #[test]
    fn intrinsic_call_validates() {
        let (iso, scope) = analyze("var t = clock();").unwrap();
        assert_eq!(var_type(&iso, scope, "t"), Kind::Double);
    }

    #[test]
    fn positions_stay_one_based() {
        let (iso, scope) = analyze("var x = 1;\nfunc f() { }").unwrap();

        for &id in &iso.scope(scope).nodes.clone() {
            let node = iso.node(id);
            assert!(node.row >= 1 && node.col >= 1);
        }
    }
}
