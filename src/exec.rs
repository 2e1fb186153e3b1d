use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::io::{self, BufRead, Write};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ast::*;
use crate::error::{CompileError, ErrorKind};
use crate::isolate::Isolate;
use crate::scope::ScopeId;
use crate::token::Kind;

type ExecResult<T> = Result<T, CompileError>;

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Array(Rc<RefCell<Vec<Value>>>),
    Instance(Rc<RefCell<Instance>>),
    Func(NodeId),
    Null,
}

/// A constructed object: its declaration plus field values by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub object: NodeId,
    pub fields: HashMap<String, Value>,
}

impl Value {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(f64::from(*n)),
            Value::Double(n) => Some(*n),
            Value::Char(c) => Some(f64::from(u32::from(*c))),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Char(c) => Some(i64::from(u32::from(*c))),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Double(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Char(c) => write!(f, "{c}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Array(elements) => {
                write!(f, "[")?;
                for (index, element) in elements.borrow().iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, "]")
            }
            Value::Instance(_) => write!(f, "<object>"),
            Value::Func(_) => write!(f, "<func>"),
            Value::Null => write!(f, "null"),
        }
    }
}

/// A chain of value frames for function calls and blocks, keyed by
/// declaration id. Top-level values live in the isolate's global store
/// instead, so imported modules keep their state between runs.
#[derive(Debug, Default)]
struct Environment {
    enclosing: Option<Rc<RefCell<Environment>>>,
    values: HashMap<NodeId, Value>,
}

impl Environment {
    fn new(enclosing: Option<Rc<RefCell<Environment>>>) -> Environment {
        Environment { enclosing, values: HashMap::new() }
    }

    fn define(&mut self, decl: NodeId, value: Value) {
        self.values.insert(decl, value);
    }

    fn get(&self, decl: NodeId) -> Option<Value> {
        if let Some(value) = self.values.get(&decl) {
            return Some(value.clone());
        }

        self.enclosing.as_ref().and_then(|enclosing| enclosing.borrow().get(decl))
    }

    fn assign(&mut self, decl: NodeId, value: Value) -> bool {
        if self.values.contains_key(&decl) {
            self.values.insert(decl, value);
            return true;
        }

        match &self.enclosing {
            Some(enclosing) => enclosing.borrow_mut().assign(decl, value),
            None => false,
        }
    }
}

/// How control leaves a statement.
enum Signal {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Tree-walking evaluator for one compiled script. Constructed with the
/// script's file scope; reports the failing node's row and column when
/// evaluation stops.
pub struct Execute<'i> {
    iso: &'i mut Isolate,
    scope: ScopeId,
    env: Rc<RefCell<Environment>>,
    this_stack: Vec<Rc<RefCell<Instance>>>,
    pub row: u32,
    pub col: u32,
}

impl<'i> Execute<'i> {
    pub fn new(iso: &'i mut Isolate, scope: ScopeId) -> Execute<'i> {
        Execute {
            iso,
            scope,
            env: Rc::new(RefCell::new(Environment::new(None))),
            this_stack: Vec::new(),
            row: 1,
            col: 1,
        }
    }

    /// Runs the file scope top to bottom. A top-level `return` ends the
    /// script early.
    pub fn evaluate(&mut self) -> ExecResult<()> {
        self.exec_scope(self.scope)?;
        Ok(())
    }

    fn error(&self, kind: ErrorKind, id: NodeId) -> CompileError {
        let node = self.iso.node(id);
        CompileError::new(kind, node.row, node.col)
    }

    fn mark(&mut self, id: NodeId) {
        let node = self.iso.node(id);
        self.row = node.row;
        self.col = node.col;
    }

    fn exec_scope(&mut self, scope: ScopeId) -> ExecResult<Signal> {
        let nodes = self.iso.scope(scope).nodes.clone();

        for id in nodes {
            match self.exec_node(id)? {
                Signal::Normal => {}
                signal => return Ok(signal),
            }
        }

        Ok(Signal::Normal)
    }

    fn exec_node(&mut self, id: NodeId) -> ExecResult<Signal> {
        self.mark(id);

        match self.iso.node(id).kind.clone() {
            NodeKind::Var(data) => {
                let value = match data.initializer {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                self.define(id, value);
                Ok(Signal::Normal)
            }

            // Declarations carry no runtime effect of their own.
            NodeKind::Func(_) | NodeKind::Object(_) => Ok(Signal::Normal),
            NodeKind::Import(_) | NodeKind::Include(_) | NodeKind::File(_) => Ok(Signal::Normal),

            NodeKind::Block(data) => self.exec_block(data.scope),

            NodeKind::If(data) => {
                if self.eval_condition(data.condition)? {
                    self.exec_node(data.then_branch)
                } else if let Some(else_branch) = data.else_branch {
                    self.exec_node(else_branch)
                } else {
                    Ok(Signal::Normal)
                }
            }

            NodeKind::While(data) => {
                while self.eval_condition(data.condition)? {
                    match self.exec_node(data.body)? {
                        Signal::Break => break,
                        Signal::Normal | Signal::Continue => {}
                        signal => return Ok(signal),
                    }
                }
                Ok(Signal::Normal)
            }

            NodeKind::For(data) => {
                if let Some(initializer) = data.initializer {
                    self.exec_node(initializer)?;
                }

                loop {
                    if let Some(condition) = data.condition {
                        if !self.eval_condition(condition)? {
                            break;
                        }
                    }

                    match self.exec_node(data.body)? {
                        Signal::Break => break,
                        Signal::Normal | Signal::Continue => {}
                        signal => return Ok(signal),
                    }

                    if let Some(step) = data.step {
                        self.eval(step)?;
                    }
                }
                Ok(Signal::Normal)
            }

            NodeKind::Switch(data) => self.exec_switch(&data),

            NodeKind::Return(data) => {
                let value = match data.value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                Ok(Signal::Return(value))
            }

            NodeKind::Break => Ok(Signal::Break),
            NodeKind::Continue => Ok(Signal::Continue),

            _ => {
                self.eval(id)?;
                Ok(Signal::Normal)
            }
        }
    }

    /// Runs a block in a fresh environment frame.
    fn exec_block(&mut self, scope: ScopeId) -> ExecResult<Signal> {
        let enclosing = Rc::clone(&self.env);
        self.env = Rc::new(RefCell::new(Environment::new(Some(enclosing))));

        let result = self.exec_scope(scope);

        let enclosing = self.env.borrow().enclosing.clone();
        self.env = enclosing.expect("block environment to have an enclosing frame");

        result
    }

    /// Runs the first case whose value equals the subject, or the default
    /// clause. Cases do not fall through.
    fn exec_switch(&mut self, data: &SwitchData) -> ExecResult<Signal> {
        let subject = self.eval(data.subject)?;
        let mut default = None;

        for &case in &data.cases {
            let NodeKind::Case(case_data) = self.iso.node(case).kind.clone() else {
                return Err(self.error(ErrorKind::Internal, case));
            };

            let Some(value) = case_data.value else {
                default = Some(case_data.body);
                continue;
            };

            if values_equal(&subject, &self.eval(value)?) {
                return match self.exec_node(case_data.body)? {
                    Signal::Break => Ok(Signal::Normal),
                    signal => Ok(signal),
                };
            }
        }

        if let Some(body) = default {
            return match self.exec_node(body)? {
                Signal::Break => Ok(Signal::Normal),
                signal => Ok(signal),
            };
        }

        Ok(Signal::Normal)
    }

    /// Stores a declaration's value: top-level declarations go to the
    /// isolate's global store, everything else to the current frame.
    fn define(&mut self, decl: NodeId, value: Value) {
        if self.env.borrow().enclosing.is_none() {
            self.iso.globals.insert(decl, value);
            return;
        }

        self.env.borrow_mut().define(decl, value);
    }

    /// Reads a declaration's value: frames, then this-instance fields,
    /// then globals.
    fn read(&mut self, decl: NodeId, id: NodeId) -> ExecResult<Value> {
        if let Some(value) = self.env.borrow().get(decl) {
            return Ok(value);
        }

        if let Some(value) = self.read_field(decl) {
            return Ok(value);
        }

        if let Some(value) = self.iso.globals.get(&decl) {
            return Ok(value.clone());
        }

        match &self.iso.node(decl).kind {
            NodeKind::Func(_) | NodeKind::Object(_) => Ok(Value::Func(decl)),
            // A declaration whose module is still mid-load reads as null.
            NodeKind::Var(_) => Ok(Value::Null),
            _ => Err(self.error(ErrorKind::Undefined, id)),
        }
    }

    /// Returns if a var declared in `scope` is a field of `object`,
    /// following the `extends` chain.
    fn owns_field(&self, object: NodeId, scope: ScopeId) -> bool {
        let NodeKind::Object(data) = &self.iso.node(object).kind else { return false };

        if data.scope == scope {
            return true;
        }

        let Some(extends) = &data.extends else { return false };
        let Some(parent) = self.iso.scope(data.scope).parent else { return false };
        match self.iso.lookup(parent, &extends.lexeme) {
            Some(base) => self.owns_field(base, scope),
            None => false,
        }
    }

    /// Reads a declaration as a field of the current `this` instance, if
    /// the declaration lives in that instance's object (or a base).
    fn read_field(&self, decl: NodeId) -> Option<Value> {
        let instance = self.this_stack.last()?;
        let NodeKind::Var(data) = &self.iso.node(decl).kind else { return None };
        let owner = instance.borrow().object;

        if !self.owns_field(owner, data.scope?) {
            return None;
        }

        let name = &self.iso.node(decl).name;
        instance.borrow().fields.get(name).cloned()
    }

    /// Writes a declaration's value back through the same resolution
    /// order as [`Execute::read`].
    fn write(&mut self, decl: NodeId, value: Value) {
        if self.env.borrow_mut().assign(decl, value.clone()) {
            return;
        }

        if let Some(instance) = self.this_stack.last() {
            let name = self.iso.node(decl).name.clone();
            let owned = {
                let NodeKind::Var(data) = &self.iso.node(decl).kind else { return };
                let owner = instance.borrow().object;
                data.scope.is_some_and(|scope| self.owns_field(owner, scope))
            };

            if owned {
                instance.borrow_mut().fields.insert(name, value);
                return;
            }
        }

        self.iso.globals.insert(decl, value);
    }

    fn eval_condition(&mut self, expr: NodeId) -> ExecResult<bool> {
        match self.eval(expr)? {
            Value::Bool(b) => Ok(b),
            _ => Err(self.error(ErrorKind::TypeMismatch, expr)),
        }
    }

    /// Evaluates an expression node.
    fn eval(&mut self, id: NodeId) -> ExecResult<Value> {
        self.mark(id);

        match self.iso.node(id).kind.clone() {
            NodeKind::Literal(data) => self.eval_literal(&data, id),
            NodeKind::Ident(data) => self.eval_ident(&data, id),
            NodeKind::Unary(data) => self.eval_unary(&data, id),
            NodeKind::Binary(data) => self.eval_binary(&data, id),
            NodeKind::Call(data) => self.eval_call(&data, id),
            NodeKind::Array(data) => {
                let mut elements = Vec::new();
                for &element in &data.elements {
                    elements.push(self.eval(element)?);
                }
                Ok(Value::Array(Rc::new(RefCell::new(elements))))
            }
            NodeKind::Cast(data) => self.eval_cast(&data, id),
            _ => Err(self.error(ErrorKind::Internal, id)),
        }
    }

    fn eval_literal(&self, data: &LiteralData, id: NodeId) -> ExecResult<Value> {
        let value = &data.value;

        match data.kind {
            Kind::Int => value
                .parse()
                .map(Value::Int)
                .map_err(|_| self.error(ErrorKind::Internal, id)),
            Kind::Float => value
                .parse()
                .map(Value::Float)
                .map_err(|_| self.error(ErrorKind::Internal, id)),
            Kind::Double => value
                .parse()
                .map(Value::Double)
                .map_err(|_| self.error(ErrorKind::Internal, id)),
            Kind::Boolean => Ok(Value::Bool(value == "true")),
            Kind::Char => value
                .chars()
                .next()
                .map(Value::Char)
                .ok_or_else(|| self.error(ErrorKind::Internal, id)),
            Kind::String => Ok(Value::Str(value.clone())),
            Kind::Null => Ok(Value::Null),
            _ => Err(self.error(ErrorKind::Internal, id)),
        }
    }

    fn eval_ident(&mut self, data: &IdentData, id: NodeId) -> ExecResult<Value> {
        if self.iso.node(id).name == "this" {
            let instance = self
                .this_stack
                .last()
                .ok_or_else(|| self.error(ErrorKind::Undefined, id))?;
            return Ok(Value::Instance(Rc::clone(instance)));
        }

        let Some(decl) = data.decl else {
            return Err(self.error(ErrorKind::Undefined, id));
        };

        self.read(decl, id)
    }

    fn eval_unary(&mut self, data: &UnaryData, id: NodeId) -> ExecResult<Value> {
        match data.op.kind {
            Kind::Bang => match self.eval(data.operand)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                _ => Err(self.error(ErrorKind::TypeMismatch, id)),
            },
            Kind::Minus => match self.eval(data.operand)? {
                Value::Int(n) => Ok(Value::Int(-n)),
                Value::Float(n) => Ok(Value::Float(-n)),
                Value::Double(n) => Ok(Value::Double(-n)),
                _ => Err(self.error(ErrorKind::TypeMismatch, id)),
            },
            Kind::Plus => self.eval(data.operand),
            Kind::Increment | Kind::Decrement => {
                let old = self.eval(data.operand)?;
                let delta = if data.op.kind == Kind::Increment { 1 } else { -1 };

                let new = match &old {
                    Value::Int(n) => Value::Int(n + delta),
                    Value::Float(n) => Value::Float(n + delta as f32),
                    Value::Double(n) => Value::Double(n + delta as f64),
                    _ => return Err(self.error(ErrorKind::TypeMismatch, id)),
                };

                let NodeKind::Ident(ident) = &self.iso.node(data.operand).kind else {
                    return Err(self.error(ErrorKind::TypeMismatch, id));
                };
                let decl = ident.decl.ok_or_else(|| self.error(ErrorKind::Undefined, id))?;
                self.write(decl, new.clone());

                Ok(if data.prefix { new } else { old })
            }
            _ => Err(self.error(ErrorKind::Internal, id)),
        }
    }

    fn eval_binary(&mut self, data: &BinaryData, id: NodeId) -> ExecResult<Value> {
        match data.op.kind {
            Kind::Dot => self.eval_member(data, id),
            Kind::LeftBracket => self.eval_index(data, id),
            kind if kind.is_assign() => self.eval_assignment(data, id),

            Kind::AndAnd => {
                if !self.eval_condition(data.left)? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval_condition(data.right)?))
            }
            Kind::OrOr => {
                if self.eval_condition(data.left)? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval_condition(data.right)?))
            }

            _ => {
                let left = self.eval(data.left)?;
                let right = self.eval(data.right)?;
                self.arithmetic(&left, data.op.kind, &right, id)
            }
        }
    }

    /// Applies an arithmetic or comparison operator with numeric
    /// promotion: the widest operand type wins.
    fn arithmetic(&self, left: &Value, op: Kind, right: &Value, id: NodeId) -> ExecResult<Value> {
        match op {
            Kind::EqualEqual => return Ok(Value::Bool(values_equal(left, right))),
            Kind::BangEqual => return Ok(Value::Bool(!values_equal(left, right))),
            _ => {}
        }

        if op == Kind::Plus {
            if let Value::Str(s) = left {
                return Ok(Value::Str(format!("{s}{right}")));
            }
            if let Value::Str(s) = right {
                return Ok(Value::Str(format!("{left}{s}")));
            }
        }

        let error = || self.error(ErrorKind::TypeMismatch, id);

        match op {
            Kind::Less | Kind::LessEqual | Kind::Greater | Kind::GreaterEqual => {
                let l = left.as_f64().ok_or_else(error)?;
                let r = right.as_f64().ok_or_else(error)?;
                Ok(Value::Bool(match op {
                    Kind::Less => l < r,
                    Kind::LessEqual => l <= r,
                    Kind::Greater => l > r,
                    _ => l >= r,
                }))
            }

            Kind::Plus | Kind::Minus | Kind::Star | Kind::Slash | Kind::Percent => {
                // Integer math only when both sides are integral.
                if let (Some(l), Some(r)) = (left.as_i64(), right.as_i64()) {
                    if (op == Kind::Slash || op == Kind::Percent) && r == 0 {
                        return Err(self
                            .error(ErrorKind::Internal, id)
                            .with_expected("non-zero divisor"));
                    }
                    return Ok(Value::Int(match op {
                        Kind::Plus => l + r,
                        Kind::Minus => l - r,
                        Kind::Star => l * r,
                        Kind::Slash => l / r,
                        _ => l % r,
                    }));
                }

                let l = left.as_f64().ok_or_else(error)?;
                let r = right.as_f64().ok_or_else(error)?;
                let result = match op {
                    Kind::Plus => l + r,
                    Kind::Minus => l - r,
                    Kind::Star => l * r,
                    Kind::Slash => l / r,
                    _ => l % r,
                };

                // Stay in float unless a double operand widened the math.
                if matches!(left, Value::Double(_)) || matches!(right, Value::Double(_)) {
                    Ok(Value::Double(result))
                } else {
                    Ok(Value::Float(result as f32))
                }
            }

            _ => Err(self.error(ErrorKind::Internal, id)),
        }
    }

    /// Returns if an expression is a bare module qualifier, which names a
    /// published scope rather than a value.
    fn is_module_qualifier(&self, expr: NodeId) -> bool {
        let node = self.iso.node(expr);
        match &node.kind {
            NodeKind::Ident(ident) => ident.decl.is_none() && node.name != "this",
            _ => false,
        }
    }

    /// Evaluates `left.right` field access.
    fn eval_member(&mut self, data: &BinaryData, id: NodeId) -> ExecResult<Value> {
        let NodeKind::Ident(right) = self.iso.node(data.right).kind.clone() else {
            return Err(self.error(ErrorKind::Internal, id));
        };
        let decl = right.decl.ok_or_else(|| self.error(ErrorKind::Undefined, data.right))?;

        if let NodeKind::Func(_) = &self.iso.node(decl).kind {
            return Ok(Value::Func(decl));
        }

        // A module qualifier names a scope, not a value; read its
        // top-level declaration straight from the global store.
        if self.is_module_qualifier(data.left) {
            return self.read(decl, data.right);
        }

        if let Value::Instance(instance) = self.eval(data.left)? {
            let name = self.iso.node(decl).name.clone();
            let value = instance.borrow().fields.get(&name).cloned();
            return value.ok_or_else(|| self.error(ErrorKind::Undefined, data.right));
        }

        self.read(decl, data.right)
    }

    fn eval_index(&mut self, data: &BinaryData, id: NodeId) -> ExecResult<Value> {
        let target = self.eval(data.left)?;
        let index = self
            .eval(data.right)?
            .as_i64()
            .ok_or_else(|| self.error(ErrorKind::TypeMismatch, data.right))?;

        match target {
            Value::Array(elements) => {
                let elements = elements.borrow();
                usize::try_from(index)
                    .ok()
                    .and_then(|index| elements.get(index).cloned())
                    .ok_or_else(|| {
                        self.error(ErrorKind::Internal, id).with_expected("index in bounds")
                    })
            }
            Value::Str(s) => s
                .chars()
                .nth(usize::try_from(index).unwrap_or(usize::MAX))
                .map(Value::Char)
                .ok_or_else(|| self.error(ErrorKind::Internal, id).with_expected("index in bounds")),
            _ => Err(self.error(ErrorKind::TypeMismatch, id)),
        }
    }

    /// Evaluates assignments, compound assignments included, against
    /// identifier, member and index targets.
    fn eval_assignment(&mut self, data: &BinaryData, id: NodeId) -> ExecResult<Value> {
        let mut value = self.eval(data.right)?;

        if data.op.kind != Kind::Equal {
            let current = self.eval(data.left)?;
            let op = match data.op.kind {
                Kind::PlusEqual => Kind::Plus,
                Kind::MinusEqual => Kind::Minus,
                Kind::StarEqual => Kind::Star,
                _ => Kind::Slash,
            };
            value = self.arithmetic(&current, op, &value, id)?;
        }

        match self.iso.node(data.left).kind.clone() {
            NodeKind::Ident(ident) => {
                let decl = ident.decl.ok_or_else(|| self.error(ErrorKind::Undefined, data.left))?;
                self.write(decl, value.clone());
            }
            NodeKind::Binary(member) if member.op.kind == Kind::Dot => {
                let Value::Instance(instance) = self.eval(member.left)? else {
                    return Err(self.error(ErrorKind::TypeMismatch, member.left));
                };
                let name = self.iso.node(member.right).name.clone();
                instance.borrow_mut().fields.insert(name, value.clone());
            }
            NodeKind::Binary(index) if index.op.kind == Kind::LeftBracket => {
                let Value::Array(elements) = self.eval(index.left)? else {
                    return Err(self.error(ErrorKind::TypeMismatch, index.left));
                };
                let at = self
                    .eval(index.right)?
                    .as_i64()
                    .and_then(|at| usize::try_from(at).ok())
                    .ok_or_else(|| self.error(ErrorKind::TypeMismatch, index.right))?;

                let mut elements = elements.borrow_mut();
                if at >= elements.len() {
                    return Err(self
                        .error(ErrorKind::Internal, id)
                        .with_expected("index in bounds"));
                }
                elements[at] = value.clone();
            }
            _ => return Err(self.error(ErrorKind::TypeMismatch, id)),
        }

        Ok(value)
    }

    fn eval_call(&mut self, data: &CallData, id: NodeId) -> ExecResult<Value> {
        let Some(resolved) = data.resolved else {
            return self.eval_intrinsic(data, id);
        };

        let mut args = Vec::new();
        for &arg in &data.args {
            args.push(self.eval(arg)?);
        }

        match self.iso.node(resolved).kind.clone() {
            NodeKind::Func(func) => {
                // A method call through `a.b()` binds `a` as this; a
                // module-qualified call binds nothing.
                let bound = match self.iso.node(data.callee).kind.clone() {
                    NodeKind::Binary(member)
                        if member.op.kind == Kind::Dot && !self.is_module_qualifier(member.left) =>
                    {
                        match self.eval(member.left)? {
                            Value::Instance(instance) => Some(instance),
                            _ => None,
                        }
                    }
                    _ => None,
                };

                self.call_func(resolved, &func, args, bound, id)
            }
            NodeKind::Object(object) => self.construct(resolved, &object, args, id),
            _ => Err(self.error(ErrorKind::Undefined, id)),
        }
    }

    /// Calls a user function: parameters bound in a fresh root frame,
    /// variadic tail collected into an array, body run to its signal.
    fn call_func(
        &mut self,
        _decl: NodeId,
        func: &FuncData,
        args: Vec<Value>,
        bound: Option<Rc<RefCell<Instance>>>,
        id: NodeId,
    ) -> ExecResult<Value> {
        let frame = Rc::new(RefCell::new(Environment::new(None)));

        let variadic = func.params.last().is_some_and(|&param| {
            matches!(&self.iso.node(param).kind, NodeKind::Var(var) if var.variadic)
        });
        let fixed = if variadic { func.params.len() - 1 } else { func.params.len() };

        let mut args = args;
        let rest: Vec<Value> = if variadic { args.split_off(fixed.min(args.len())) } else { Vec::new() };

        for (&param, value) in func.params.iter().zip(args) {
            frame.borrow_mut().define(param, value);
        }
        if variadic {
            let tail = Value::Array(Rc::new(RefCell::new(rest)));
            frame.borrow_mut().define(func.params[fixed], tail);
        }

        let caller = std::mem::replace(&mut self.env, frame);
        let rebound = bound.is_some();
        if let Some(instance) = bound {
            self.this_stack.push(instance);
        }

        let result = match func.body {
            Some(body) => self.exec_node(body),
            None => Ok(Signal::Normal),
        };

        if rebound {
            self.this_stack.pop();
        }
        self.env = caller;
        self.mark(id);

        match result? {
            Signal::Return(value) => Ok(value),
            _ => Ok(Value::Null),
        }
    }

    /// Constructs an instance: fields from the object's (and its bases')
    /// var declarations, then the constructor.
    fn construct(
        &mut self,
        decl: NodeId,
        object: &ObjectData,
        args: Vec<Value>,
        id: NodeId,
    ) -> ExecResult<Value> {
        let mut fields = HashMap::new();
        self.collect_fields(object, &mut fields)?;

        let instance = Rc::new(RefCell::new(Instance { object: decl, fields }));

        let constructor = self.iso.scope(object.scope).nodes.iter().copied().find(|&member| {
            matches!(&self.iso.node(member).kind, NodeKind::Func(func) if func.is_constructor)
        });

        if let Some(constructor) = constructor {
            let NodeKind::Func(func) = self.iso.node(constructor).kind.clone() else {
                return Err(self.error(ErrorKind::Internal, constructor));
            };
            self.call_func(constructor, &func, args, Some(Rc::clone(&instance)), id)?;
        }

        Ok(Value::Instance(instance))
    }

    /// Gathers field defaults, base objects first so derived initializers
    /// win.
    fn collect_fields(
        &mut self,
        object: &ObjectData,
        fields: &mut HashMap<String, Value>,
    ) -> ExecResult<()> {
        if let Some(extends) = &object.extends {
            let parent = self.iso.scope(object.scope).parent;
            let base = parent.and_then(|scope| self.iso.lookup(scope, &extends.lexeme));
            if let Some(base) = base {
                if let NodeKind::Object(base_data) = self.iso.node(base).kind.clone() {
                    self.collect_fields(&base_data, fields)?;
                }
            }
        }

        let members = self.iso.scope(object.scope).nodes.clone();
        for member in members {
            let node = self.iso.node(member).clone();
            if let NodeKind::Var(var) = node.kind {
                let value = match var.initializer {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                fields.insert(node.name, value);
            }
        }

        Ok(())
    }

    /// Dispatches a call with no resolved declaration to the host
    /// intrinsics.
    fn eval_intrinsic(&mut self, data: &CallData, id: NodeId) -> ExecResult<Value> {
        let name = self.iso.node(id).name.clone();

        let mut args = Vec::new();
        for &arg in &data.args {
            args.push(self.eval(arg)?);
        }

        match name.as_str() {
            "print" | "println" => {
                let line = args
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");

                let mut stdout = io::stdout().lock();
                let result = if name == "println" {
                    writeln!(stdout, "{line}")
                } else {
                    write!(stdout, "{line}")
                };
                result.map_err(|_| self.error(ErrorKind::Internal, id))?;
                stdout.flush().ok();

                Ok(Value::Null)
            }
            "clock" => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_err(|_| self.error(ErrorKind::Internal, id))?;
                Ok(Value::Double(now.as_secs_f64()))
            }
            "len" => match args.first() {
                Some(Value::Array(elements)) => Ok(Value::Int(elements.borrow().len() as i64)),
                Some(Value::Str(s)) => Ok(Value::Int(s.chars().count() as i64)),
                _ => Err(self.error(ErrorKind::TypeMismatch, id)),
            },
            "str" => match args.first() {
                Some(value) => Ok(Value::Str(value.to_string())),
                None => Err(self.error(ErrorKind::TypeMismatch, id)),
            },
            "readln" => {
                let mut line = String::new();
                io::stdin()
                    .lock()
                    .read_line(&mut line)
                    .map_err(|_| self.error(ErrorKind::Internal, id))?;
                Ok(Value::Str(line.trim_end_matches(['\n', '\r']).to_string()))
            }
            _ => Err(self.error(ErrorKind::Undefined, id)),
        }
    }

    /// Converts a value per the cast matrix. String sources parse here,
    /// at runtime, and fail the cast when unparseable.
    fn eval_cast(&mut self, data: &CastData, id: NodeId) -> ExecResult<Value> {
        let value = self.eval(data.expr)?;
        let target = data.target.kind;

        let error = || self.error(ErrorKind::InvalidCast, id);

        match target {
            Kind::Int => match &value {
                Value::Int(_) => Ok(value.clone()),
                Value::Float(n) => Ok(Value::Int(*n as i64)),
                Value::Double(n) => Ok(Value::Int(*n as i64)),
                Value::Char(c) => Ok(Value::Int(i64::from(u32::from(*c)))),
                Value::Str(s) => s.trim().parse().map(Value::Int).map_err(|_| error()),
                _ => Err(error()),
            },
            Kind::Float => match &value {
                Value::Float(_) => Ok(value.clone()),
                Value::Int(n) => Ok(Value::Float(*n as f32)),
                Value::Double(n) => Ok(Value::Float(*n as f32)),
                Value::Char(c) => Ok(Value::Float(u32::from(*c) as f32)),
                Value::Str(s) => s.trim().parse().map(Value::Float).map_err(|_| error()),
                _ => Err(error()),
            },
            Kind::Double => match &value {
                Value::Double(_) => Ok(value.clone()),
                Value::Int(n) => Ok(Value::Double(*n as f64)),
                Value::Float(n) => Ok(Value::Double(f64::from(*n))),
                Value::Char(c) => Ok(Value::Double(f64::from(u32::from(*c)))),
                Value::Str(s) => s.trim().parse().map(Value::Double).map_err(|_| error()),
                _ => Err(error()),
            },
            Kind::Char => match &value {
                Value::Char(_) => Ok(value.clone()),
                Value::Int(n) => u32::try_from(*n)
                    .ok()
                    .and_then(char::from_u32)
                    .map(Value::Char)
                    .ok_or_else(error),
                _ => Err(error()),
            },
            Kind::String => Ok(Value::Str(value.to_string())),
            _ => Err(error()),
        }
    }
}

/// Equality with numeric promotion: `1 == 1.0` holds.
fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return l == r;
    }

    left == right
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::Parser;
    use crate::semantics::Semantics;

    fn run(source: &str) -> (Isolate, ScopeId) {
        let mut iso = Isolate::new();
        let root = Parser::new(source, &mut iso).parse("test").unwrap();
        let NodeKind::File(data) = iso.node(root).kind.clone() else { unreachable!() };

        Semantics::new(&mut iso).evaluate(data.scope).unwrap();
        Execute::new(&mut iso, data.scope).evaluate().unwrap();

        (iso, data.scope)
    }

    fn global(iso: &Isolate, scope: ScopeId, name: &str) -> Value {
        let decl = iso.lookup_local(scope, name).unwrap();
        iso.globals.get(&decl).cloned().unwrap()
    }

    #[test]
    fn evaluate_arithmetic() {
        let (iso, scope) = run("var x = 1 + 2 * 3;");
        assert_eq!(global(&iso, scope, "x"), Value::Int(7));
    }

    #[test]
    fn evaluate_numeric_promotion() {
        let (iso, scope) = run("var x = 1 + 0.5;");
        assert_eq!(global(&iso, scope, "x"), Value::Float(1.5));
    }

    #[test]
    fn evaluate_string_concat() {
        let (iso, scope) = run("var s = \"n = \" + 42;");
        assert_eq!(global(&iso, scope, "s"), Value::Str("n = 42".to_string()));
    }

    #[test]
    fn evaluate_call_and_return() {
        let (iso, scope) = run("func add(a int, b int) int { return a + b; } var x = add(40, 2);");
        assert_eq!(global(&iso, scope, "x"), Value::Int(42));
    }

    #[test]
    fn evaluate_recursion() {
        let (iso, scope) = run(
            "func fib(n int) int { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); }\n\
             var x = fib(10);",
        );
        assert_eq!(global(&iso, scope, "x"), Value::Int(55));
    }

    #[test]
    fn evaluate_while_loop() {
        let (iso, scope) = run("var n = 0; while (n < 5) { n += 2; }");
        assert_eq!(global(&iso, scope, "n"), Value::Int(6));
    }

    #[test]
    fn evaluate_for_loop_with_break() {
        let (iso, scope) = run(
            "var total = 0;\n\
             for (var i = 0; i < 10; i++) { if (i == 4) { break; } total += i; }",
        );
        assert_eq!(global(&iso, scope, "total"), Value::Int(6));
    }

    #[test]
    fn evaluate_switch_without_fallthrough() {
        let (iso, scope) = run(
            "var x = 2; var label = \"\";\n\
             switch (x) { case 1: label = \"one\"; case 2: label = \"two\"; default: label = \"many\"; }",
        );
        assert_eq!(global(&iso, scope, "label"), Value::Str("two".to_string()));
    }

    #[test]
    fn evaluate_object_lifecycle() {
        let (iso, scope) = run(
            "object Point {\n\
                 var x int;\n\
                 var y int;\n\
                 func Point(x int, y int) { this.x = x; this.y = y; }\n\
                 func sum() int { return x + y; }\n\
             }\n\
             var p Point = Point(3, 4);\n\
             var s = p.sum();\n\
             var px = p.x;",
        );

        assert_eq!(global(&iso, scope, "s"), Value::Int(7));
        assert_eq!(global(&iso, scope, "px"), Value::Int(3));
    }

    #[test]
    fn evaluate_array_literal_and_index() {
        let (iso, scope) = run("var xs = [int]{10, 20, 30}; var x = xs[1]; xs[2] = 5; var y = xs[2];");
        assert_eq!(global(&iso, scope, "x"), Value::Int(20));
        assert_eq!(global(&iso, scope, "y"), Value::Int(5));
    }

    #[test]
    fn evaluate_casts() {
        let (iso, scope) = run("var a = (int) 1.9; var b = (string) 42; var c = (int) \"17\";");
        assert_eq!(global(&iso, scope, "a"), Value::Int(1));
        assert_eq!(global(&iso, scope, "b"), Value::Str("42".to_string()));
        assert_eq!(global(&iso, scope, "c"), Value::Int(17));
    }

    #[test]
    fn unparseable_string_cast_fails_at_runtime() {
        let mut iso = Isolate::new();
        let root = Parser::new("var x = (int) \"nope\";", &mut iso).parse("test").unwrap();
        let NodeKind::File(data) = iso.node(root).kind.clone() else { unreachable!() };

        Semantics::new(&mut iso).evaluate(data.scope).unwrap();
        let error = Execute::new(&mut iso, data.scope).evaluate().unwrap_err();

        assert_eq!(error.kind, ErrorKind::InvalidCast);
    }

    #[test]
    fn variadic_tail_collects_into_array() {
        let (iso, scope) = run(
            "func count(first int, rest...) int { return len(rest); }\n\
             var n = count(1, 2, 3, 4);",
        );
        assert_eq!(global(&iso, scope, "n"), Value::Int(3));
    }

    #[test]
    fn division_by_zero_reports_position() {
        let mut iso = Isolate::new();
        let root = Parser::new("var x = 1 / 0;", &mut iso).parse("test").unwrap();
        let NodeKind::File(data) = iso.node(root).kind.clone() else { unreachable!() };

        Semantics::new(&mut iso).evaluate(data.scope).unwrap();
        let error = Execute::new(&mut iso, data.scope).evaluate().unwrap_err();

        assert_eq!(error.kind, ErrorKind::Internal);
        assert_eq!(error.row, 1);
    }
}
