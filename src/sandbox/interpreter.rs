// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Tree-walking evaluator.
//!
//! ## Memory Model
//!
//! Scopes live in an arena indexed by [`ScopeId`]; closures refer to their
//! defining scope by index, so closures never form reference cycles. Scopes
//! that no closure captured are released as soon as they are left, and
//! their charge is credited back. Every string, array and object is also
//! registered in a per-execution heap list. A sweep credits entries that
//! only the heap still holds; it runs when the memory ceiling is reached and
//! whenever the list has doubled since the last sweep. Containers kept alive
//! by a cycle stay charged until teardown, which empties them all and breaks
//! the cycle.
//!
//! ## Termination
//!
//! [`Control::Throw`] is an ordinary script exception and can be caught by
//! `try/catch`. [`Control::Abort`] (timeout, cancellation, resource limits,
//! failed `require`, host failures) cannot.

use std::rc::Rc;
use std::sync::Arc;

use zeroize::Zeroizing;

use super::ast::*;
use super::builtins::{self, Builtin};
use super::limits::{Abort, Budget, MAX_CALL_DEPTH, MAX_LOG_ENTRIES, MAX_LOG_ENTRY_BYTES};
use super::value::{to_int32, Closure, ObjectMap, ScopeId, Value};
use super::ScriptHost;

/// Approximate cost of one value slot, for memory accounting.
pub const VALUE_SIZE: usize = 32;

const SCOPE_SIZE: usize = 64;
/// Heap entries tracked before the first sweep.
const MIN_SWEEP_INTERVAL: usize = 4096;
/// Host-provided bindings. Scripts may shadow them.
const BUILTIN_SCOPE: ScopeId = 0;
/// Top-level script declarations.
const GLOBAL_SCOPE: ScopeId = 1;

/// Non-local control flow.
#[derive(Debug)]
pub enum Control {
    Break,
    Continue,
    Return(Value),
    Throw(Value),
    Abort(Abort),
}

impl From<Abort> for Control {
    fn from(abort: Abort) -> Self {
        Control::Abort(abort)
    }
}

pub type Flow<T> = Result<T, Control>;

#[derive(Debug)]
struct Binding {
    name: String,
    value: Value,
    mutable: bool,
}

#[derive(Debug)]
struct Scope {
    vars: Vec<Binding>,
    parent: Option<ScopeId>,
    function_scope: bool,
    captured: bool,
    /// Bytes charged for the scope and its bindings.
    charged: usize,
}

/// Assignable location, resolved once so operands are evaluated once.
enum Reference<'a> {
    Var(&'a str),
    Prop(Value, Value),
}

pub struct Interpreter<'h> {
    scopes: Vec<Scope>,
    heap: Vec<Value>,
    next_sweep: usize,
    depth: usize,
    pub(crate) budget: Budget,
    pub(crate) host: &'h dyn ScriptHost,
    pub(crate) logs: Vec<String>,
    revealed: Vec<Zeroizing<String>>,
}

impl<'h> Interpreter<'h> {
    pub fn new(budget: Budget, host: &'h dyn ScriptHost) -> Self {
        Self {
            scopes: vec![
                Scope {
                    vars: Vec::new(),
                    parent: None,
                    function_scope: true,
                    captured: true,
                    charged: 0,
                },
                Scope {
                    vars: Vec::new(),
                    parent: Some(BUILTIN_SCOPE),
                    function_scope: true,
                    captured: true,
                    charged: 0,
                },
            ],
            heap: Vec::new(),
            next_sweep: MIN_SWEEP_INTERVAL,
            depth: 0,
            budget,
            host,
            logs: Vec::new(),
            revealed: Vec::new(),
        }
    }

    /// Define a read-only host binding.
    pub fn define_builtin(&mut self, name: &str, value: Value) -> Flow<()> {
        self.declare(DeclKind::Const, name, value, BUILTIN_SCOPE)
    }

    /// Run the top-level statements of a program.
    pub fn run_program(&mut self, program: &Program) -> Flow<()> {
        self.exec_body(&program.body, GLOBAL_SCOPE)
    }

    /// Look up a top-level script binding.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.scopes
            .get(GLOBAL_SCOPE)?
            .vars
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.value.clone())
    }

    /// Secret strings revealed to the script so far.
    pub fn sensitive(&self) -> Vec<&str> {
        self.revealed.iter().map(|s| s.as_str()).collect()
    }

    pub fn take_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.logs)
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Charge live memory, sweeping unreachable values first if the ceiling
    /// is in the way.
    pub(crate) fn charge(&mut self, bytes: usize) -> Flow<()> {
        if self.budget.charge(bytes).is_err() {
            self.sweep();
            self.budget.charge(bytes)?;
        }
        Ok(())
    }

    /// Check room for a short-lived working buffer.
    pub(crate) fn reserve(&mut self, bytes: usize) -> Flow<()> {
        if self.budget.reserve(bytes).is_err() {
            self.sweep();
            self.budget.reserve(bytes)?;
        }
        Ok(())
    }

    fn track(&mut self, value: Value) -> Value {
        self.heap.push(value.clone());
        if self.heap.len() >= self.next_sweep {
            self.sweep();
        }
        value
    }

    /// Drop heap entries nothing else refers to and credit their size.
    /// Newest entries go first so a dead container frees its members in the
    /// same pass.
    fn sweep(&mut self) {
        let mut freed = 0;
        let mut index = self.heap.len();
        while index > 0 {
            index -= 1;
            if let Some(bytes) = unreachable_footprint(&self.heap[index]) {
                freed += bytes;
                self.heap.swap_remove(index);
            }
        }
        self.budget.release(freed);
        self.next_sweep = (self.heap.len() * 2).max(MIN_SWEEP_INTERVAL);
    }

    pub(crate) fn new_array(&mut self, items: Vec<Value>) -> Flow<Value> {
        self.charge(array_footprint(items.len()))?;
        Ok(self.track(Value::array(items)))
    }

    pub(crate) fn new_object(&mut self, map: ObjectMap) -> Flow<Value> {
        self.charge(object_footprint(&map))?;
        Ok(self.track(Value::object(map)))
    }

    pub(crate) fn new_string(&mut self, s: &str) -> Flow<Value> {
        self.charge(string_footprint(s))?;
        Ok(self.track(Value::str(s)))
    }

    /// Convert host JSON into script values, registering every container.
    pub(crate) fn value_from_json(&mut self, json: &serde_json::Value) -> Flow<Value> {
        match json {
            serde_json::Value::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.value_from_json(item)?);
                }
                self.new_array(values)
            }
            serde_json::Value::Object(entries) => {
                let mut map = ObjectMap::default();
                for (k, v) in entries {
                    let v = self.value_from_json(v)?;
                    map.set(k, v);
                }
                self.new_object(map)
            }
            serde_json::Value::String(s) => self.new_string(s),
            scalar => Ok(Value::from_json(scalar)),
        }
    }

    /// Build a thrown `{name, message}` error object.
    pub(crate) fn error(&mut self, name: &str, message: impl Into<String>) -> Control {
        let mut map = ObjectMap::default();
        map.set("name", Value::str(name));
        map.set("message", Value::str(&message.into()));
        match self.new_object(map) {
            Ok(value) => Control::Throw(value),
            Err(control) => control,
        }
    }

    pub(crate) fn type_error(&mut self, message: impl Into<String>) -> Control {
        self.error("TypeError", message)
    }

    pub(crate) fn push_log(&mut self, mut line: String) -> Flow<()> {
        if self.logs.len() >= MAX_LOG_ENTRIES {
            return Ok(());
        }
        if line.len() > MAX_LOG_ENTRY_BYTES {
            let mut cut = MAX_LOG_ENTRY_BYTES;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line.truncate(cut);
        }
        self.charge(line.len())?;
        self.logs.push(line);
        Ok(())
    }

    /// Hand secret bytes to the script, remembering them for scrubbing.
    pub(crate) fn reveal_secret(&mut self, bytes: Zeroizing<Vec<u8>>) -> Flow<Value> {
        let text = Zeroizing::new(String::from_utf8_lossy(&bytes).into_owned());
        let value = self.new_string(&text)?;
        self.revealed.push(text);
        Ok(value)
    }

    // =========================================================================
    // Scopes
    // =========================================================================

    fn push_scope(&mut self, parent: ScopeId, function_scope: bool) -> Flow<ScopeId> {
        self.charge(SCOPE_SIZE)?;
        self.scopes.push(Scope {
            vars: Vec::new(),
            parent: Some(parent),
            function_scope,
            captured: false,
            charged: SCOPE_SIZE,
        });
        Ok(self.scopes.len() - 1)
    }

    fn pop_scope(&mut self, id: ScopeId) {
        let releasable = id + 1 == self.scopes.len()
            && self.scopes.get(id).is_some_and(|s| !s.captured);
        if releasable {
            if let Some(scope) = self.scopes.pop() {
                self.budget.release(scope.charged);
            }
        }
    }

    fn mark_captured(&mut self, mut id: ScopeId) {
        while let Some(scope) = self.scopes.get_mut(id) {
            if scope.captured {
                break;
            }
            scope.captured = true;
            match scope.parent {
                Some(parent) => id = parent,
                None => break,
            }
        }
    }

    fn lookup(&self, name: &str, mut id: ScopeId) -> Option<(ScopeId, usize)> {
        loop {
            let scope = self.scopes.get(id)?;
            if let Some(index) = scope.vars.iter().position(|b| b.name == name) {
                return Some((id, index));
            }
            id = scope.parent?;
        }
    }

    fn declare(&mut self, kind: DeclKind, name: &str, value: Value, scope: ScopeId) -> Flow<()> {
        let target = match kind {
            DeclKind::Var => self.function_scope_of(scope),
            DeclKind::Let | DeclKind::Const => scope,
        };
        let existing = self
            .scopes
            .get(target)
            .and_then(|s| s.vars.iter().position(|b| b.name == name));

        match (existing, kind) {
            (Some(index), DeclKind::Var) => {
                if let Some(binding) = self.scopes.get_mut(target).and_then(|s| s.vars.get_mut(index)) {
                    binding.value = value;
                }
                Ok(())
            }
            (Some(_), _) => Err(self.error(
                "SyntaxError",
                format!("Identifier '{name}' has already been declared"),
            )),
            (None, _) => {
                let bytes = name.len() + VALUE_SIZE;
                self.charge(bytes)?;
                if let Some(scope) = self.scopes.get_mut(target) {
                    scope.charged += bytes;
                    scope.vars.push(Binding {
                        name: name.to_string(),
                        value,
                        mutable: kind != DeclKind::Const,
                    });
                }
                Ok(())
            }
        }
    }

    fn function_scope_of(&self, mut id: ScopeId) -> ScopeId {
        while let Some(scope) = self.scopes.get(id) {
            if scope.function_scope {
                return id;
            }
            match scope.parent {
                Some(parent) => id = parent,
                None => break,
            }
        }
        GLOBAL_SCOPE
    }

    fn get_var(&mut self, name: &str, scope: ScopeId) -> Flow<Value> {
        match self.lookup(name, scope) {
            Some((id, index)) => Ok(self.scopes[id].vars[index].value.clone()),
            None => Err(self.error("ReferenceError", format!("{name} is not defined"))),
        }
    }

    fn assign_var(&mut self, name: &str, value: Value, scope: ScopeId) -> Flow<()> {
        let Some((id, index)) = self.lookup(name, scope) else {
            return Err(self.error("ReferenceError", format!("{name} is not defined")));
        };
        let binding = &mut self.scopes[id].vars[index];
        if !binding.mutable {
            return Err(self.type_error(format!("Assignment to constant variable '{name}'")));
        }
        binding.value = value;
        Ok(())
    }

    fn make_closure(&mut self, decl: &Arc<FunctionDecl>, scope: ScopeId) -> Flow<Value> {
        self.charge(SCOPE_SIZE)?;
        self.mark_captured(scope);
        Ok(Value::Function(Rc::new(Closure {
            decl: decl.clone(),
            scope,
        })))
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn exec_body(&mut self, stmts: &[Stmt], scope: ScopeId) -> Flow<()> {
        for stmt in stmts {
            if let Stmt::Function(decl) = stmt {
                let closure = self.make_closure(decl, scope)?;
                if let Some(name) = &decl.name {
                    self.declare(DeclKind::Let, name, closure, scope)?;
                }
            }
        }
        for stmt in stmts {
            if !matches!(stmt, Stmt::Function(_)) {
                self.exec_stmt(stmt, scope)?;
            }
        }
        Ok(())
    }

    fn exec_block(&mut self, stmts: &[Stmt], scope: ScopeId) -> Flow<()> {
        let needs_scope = stmts.iter().any(|s| {
            matches!(
                s,
                Stmt::Function(_)
                    | Stmt::VarDecl {
                        kind: DeclKind::Let | DeclKind::Const,
                        ..
                    }
            )
        });
        if !needs_scope {
            return self.exec_body(stmts, scope);
        }
        let inner = self.push_scope(scope, false)?;
        let result = self.exec_body(stmts, inner);
        self.pop_scope(inner);
        result
    }

    /// Run a loop body. `Ok(false)` means the loop should stop.
    fn loop_body(&mut self, body: &Stmt, scope: ScopeId) -> Flow<bool> {
        self.budget.checkpoint()?;
        match self.exec_stmt(body, scope) {
            Ok(()) | Err(Control::Continue) => Ok(true),
            Err(Control::Break) => Ok(false),
            Err(other) => Err(other),
        }
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: ScopeId) -> Flow<()> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(())
            }
            Stmt::VarDecl { kind, decls } => {
                for (name, init) in decls {
                    let value = match init {
                        Some(expr) => self.eval(expr, scope)?,
                        None => Value::Undefined,
                    };
                    self.declare(*kind, name, value, scope)?;
                }
                Ok(())
            }
            // Hoisted by `exec_body`.
            Stmt::Function(_) => Ok(()),
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Err(Control::Return(value))
            }
            Stmt::If {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.exec_stmt(then, scope)
                } else if let Some(otherwise) = otherwise {
                    self.exec_stmt(otherwise, scope)
                } else {
                    Ok(())
                }
            }
            Stmt::While { test, body } => {
                loop {
                    self.budget.checkpoint()?;
                    if !self.eval(test, scope)?.truthy() || !self.loop_body(body, scope)? {
                        break;
                    }
                }
                Ok(())
            }
            Stmt::DoWhile { body, test } => {
                while self.loop_body(body, scope)? && self.eval(test, scope)?.truthy() {}
                Ok(())
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                let lexical = matches!(
                    init.as_deref(),
                    Some(Stmt::VarDecl {
                        kind: DeclKind::Let | DeclKind::Const,
                        ..
                    })
                );
                let loop_scope = if lexical {
                    self.push_scope(scope, false)?
                } else {
                    scope
                };
                let result = self.exec_for(init.as_deref(), test.as_ref(), update.as_ref(), body, loop_scope);
                if lexical {
                    self.pop_scope(loop_scope);
                }
                result
            }
            Stmt::ForOf {
                kind,
                name,
                iterable,
                body,
            } => {
                let iterable = self.eval(iterable, scope)?;
                let items = self.iteration_values(&iterable)?;
                self.exec_for_each(*kind, name, items, body, scope)
            }
            Stmt::ForIn {
                kind,
                name,
                object,
                body,
            } => {
                let object = self.eval(object, scope)?;
                let keys = builtins::own_keys(&object);
                let mut items = Vec::with_capacity(keys.len());
                for key in keys {
                    items.push(self.new_string(&key)?);
                }
                self.exec_for_each(*kind, name, items, body, scope)
            }
            Stmt::Break => Err(Control::Break),
            Stmt::Continue => Err(Control::Continue),
            Stmt::Throw(expr) => {
                let value = self.eval(expr, scope)?;
                Err(Control::Throw(value))
            }
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                let result = match (self.exec_block(block, scope), handler) {
                    (Err(Control::Throw(thrown)), Some(handler)) => {
                        let catch_scope = self.push_scope(scope, false)?;
                        let caught = match param {
                            Some(param) => self
                                .declare(DeclKind::Let, param, thrown, catch_scope)
                                .and_then(|()| self.exec_body(handler, catch_scope)),
                            None => self.exec_body(handler, catch_scope),
                        };
                        self.pop_scope(catch_scope);
                        caught
                    }
                    (other, _) => other,
                };
                // Aborts end the execution without running `finally`.
                if let Some(finalizer) = finalizer {
                    if !matches!(result, Err(Control::Abort(_))) {
                        self.exec_block(finalizer, scope)?;
                    }
                }
                result
            }
            Stmt::Switch {
                discriminant,
                cases,
            } => {
                let value = self.eval(discriminant, scope)?;
                let mut start = None;
                for (index, case) in cases.iter().enumerate() {
                    if let Some(test) = &case.test {
                        if self.eval(test, scope)?.strict_equals(&value) {
                            start = Some(index);
                            break;
                        }
                    }
                }
                let start = start.or_else(|| cases.iter().position(|c| c.test.is_none()));
                let Some(start) = start else {
                    return Ok(());
                };

                let inner = self.push_scope(scope, false)?;
                let mut result = Ok(());
                for case in &cases[start..] {
                    match self.exec_body(&case.body, inner) {
                        Ok(()) => {}
                        Err(Control::Break) => break,
                        Err(other) => {
                            result = Err(other);
                            break;
                        }
                    }
                }
                self.pop_scope(inner);
                result
            }
            Stmt::Block(stmts) => self.exec_block(stmts, scope),
            Stmt::Empty => Ok(()),
        }
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        scope: ScopeId,
    ) -> Flow<()> {
        if let Some(init) = init {
            self.exec_stmt(init, scope)?;
        }
        loop {
            self.budget.checkpoint()?;
            if let Some(test) = test {
                if !self.eval(test, scope)?.truthy() {
                    break;
                }
            }
            if !self.loop_body(body, scope)? {
                break;
            }
            if let Some(update) = update {
                self.eval(update, scope)?;
            }
        }
        Ok(())
    }

    fn exec_for_each(
        &mut self,
        kind: DeclKind,
        name: &str,
        items: Vec<Value>,
        body: &Stmt,
        scope: ScopeId,
    ) -> Flow<()> {
        for item in items {
            let inner = self.push_scope(scope, false)?;
            let result = self
                .declare(kind, name, item, inner)
                .and_then(|()| self.loop_body(body, inner));
            self.pop_scope(inner);
            if !result? {
                break;
            }
        }
        Ok(())
    }

    fn iteration_values(&mut self, iterable: &Value) -> Flow<Vec<Value>> {
        match iterable {
            Value::Array(items) => {
                let items = items.borrow().clone();
                self.reserve(items.len() * VALUE_SIZE)?;
                Ok(items)
            }
            Value::Str(s) => {
                let mut chars = Vec::new();
                for c in s.chars() {
                    chars.push(self.new_string(c.encode_utf8(&mut [0u8; 4]))?);
                }
                Ok(chars)
            }
            other => Err(self.type_error(format!("{} is not iterable", other.type_of()))),
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    pub fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> Flow<Value> {
        self.budget.checkpoint()?;
        match callee {
            Value::Function(closure) => self.call_closure(closure.clone(), args),
            Value::Native(native) => {
                let native = native.clone();
                builtins::call(self, &native, args)
            }
            other => Err(self.type_error(format!("{} is not a function", other.type_of()))),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, args: Vec<Value>) -> Flow<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Abort::ResourceLimit(format!(
                "call depth exceeds {MAX_CALL_DEPTH}"
            ))
            .into());
        }
        self.depth += 1;
        let result = self.invoke(&closure, args);
        self.depth -= 1;
        result
    }

    fn invoke(&mut self, closure: &Closure, args: Vec<Value>) -> Flow<Value> {
        let scope = self.push_scope(closure.scope, true)?;
        let mut args = args.into_iter();
        let mut result = Ok(Value::Undefined);
        for param in &closure.decl.params {
            let value = args.next().unwrap_or(Value::Undefined);
            if let Err(e) = self.declare(DeclKind::Let, param, value, scope) {
                result = Err(e);
                break;
            }
        }

        if result.is_ok() {
            result = match &closure.decl.body {
                FunctionBody::Expr(expr) => self.eval(expr, scope),
                FunctionBody::Block(stmts) => match self.exec_body(stmts, scope) {
                    Ok(()) => Ok(Value::Undefined),
                    Err(Control::Return(value)) => Ok(value),
                    Err(Control::Break | Control::Continue) => {
                        Err(self.error("SyntaxError", "break or continue outside a loop"))
                    }
                    Err(other) => Err(other),
                },
            };
        }
        self.pop_scope(scope);
        result
    }

    /// Parameter names of a script function, if `value` is one.
    pub fn params_of(value: &Value) -> Option<Vec<String>> {
        match value {
            Value::Function(closure) => Some(closure.decl.params.clone()),
            _ => None,
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn eval(&mut self, expr: &Expr, scope: ScopeId) -> Flow<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => self.new_string(s),
            Expr::Template { quasis, exprs } => {
                let mut out = String::new();
                for (index, quasi) in quasis.iter().enumerate() {
                    out.push_str(quasi);
                    if let Some(expr) = exprs.get(index) {
                        out.push_str(&self.eval(expr, scope)?.to_js_string());
                    }
                }
                self.new_string(&out)
            }
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Ident(name, _) => self.get_var(name, scope),
            Expr::Array(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval(element, scope)?);
                }
                self.new_array(items)
            }
            Expr::Object(props) => {
                let mut map = ObjectMap::default();
                for (key, value) in props {
                    let value = self.eval(value, scope)?;
                    map.set(key, value);
                }
                self.new_object(map)
            }
            Expr::Function(decl) => self.make_closure(decl, scope),
            Expr::Unary { op, arg } => {
                if *op == UnaryOp::TypeOf {
                    if let Expr::Ident(name, _) = &**arg {
                        if self.lookup(name, scope).is_none() {
                            return Ok(Value::str("undefined"));
                        }
                    }
                    let value = self.eval(arg, scope)?;
                    return Ok(Value::str(value.type_of()));
                }
                let value = self.eval(arg, scope)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::BitNot => Value::Number(f64::from(!to_int32(value.to_number()))),
                    UnaryOp::TypeOf => Value::str(value.type_of()),
                })
            }
            Expr::Update {
                increment,
                prefix,
                target,
            } => {
                let reference = self.resolve(target, scope)?;
                let old = self.get_ref(&reference, scope)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.set_ref(&reference, Value::Number(new), scope)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                self.binary(*op, &left, &right)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Assign { op, target, value } => {
                let reference = self.resolve(target, scope)?;
                let value = match op {
                    None => self.eval(value, scope)?,
                    Some(op) => {
                        let current = self.get_ref(&reference, scope)?;
                        let rhs = self.eval(value, scope)?;
                        self.binary(*op, &current, &rhs)?
                    }
                };
                self.set_ref(&reference, value.clone(), scope)?;
                Ok(value)
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(consequent, scope)
                } else {
                    self.eval(alternate, scope)
                }
            }
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval(object, scope)?;
                self.get_property(&object, &Value::str(property))
            }
            Expr::Index { object, index, .. } => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                self.get_property(&object, &index)
            }
            Expr::Call { callee, args, .. } => {
                let function = self.eval(callee, scope)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, scope)?);
                }
                if !function.is_callable() {
                    let name = callee_name(callee);
                    return Err(self.type_error(format!("{name} is not a function")));
                }
                self.call_value(&function, values)
            }
        }
    }

    fn resolve<'e>(&mut self, target: &'e Expr, scope: ScopeId) -> Flow<Reference<'e>> {
        match target {
            Expr::Ident(name, _) => Ok(Reference::Var(name)),
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval(object, scope)?;
                Ok(Reference::Prop(object, Value::str(property)))
            }
            Expr::Index { object, index, .. } => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                Ok(Reference::Prop(object, index))
            }
            _ => Err(self.error("SyntaxError", "invalid assignment target")),
        }
    }

    fn get_ref(&mut self, reference: &Reference<'_>, scope: ScopeId) -> Flow<Value> {
        match reference {
            Reference::Var(name) => self.get_var(name, scope),
            Reference::Prop(object, key) => self.get_property(object, key),
        }
    }

    fn set_ref(&mut self, reference: &Reference<'_>, value: Value, scope: ScopeId) -> Flow<()> {
        match reference {
            Reference::Var(name) => self.assign_var(name, value, scope),
            Reference::Prop(object, key) => self.set_property(object, key, value),
        }
    }

    pub(crate) fn get_property(&mut self, object: &Value, key: &Value) -> Flow<Value> {
        match object {
            Value::Undefined | Value::Null => {
                let key = key.to_js_string();
                Err(self.type_error(format!(
                    "Cannot read properties of {} (reading '{key}')",
                    object.to_js_string()
                )))
            }
            Value::Array(items) => {
                if let Some(index) = array_index(key) {
                    return Ok(items.borrow().get(index).cloned().unwrap_or(Value::Undefined));
                }
                let key = key.to_js_string();
                if key == "length" {
                    return Ok(Value::Number(items.borrow().len() as f64));
                }
                Ok(Builtin::array_method(&key)
                    .map(|b| Value::bound(b, object.clone()))
                    .unwrap_or(Value::Undefined))
            }
            Value::Str(s) => {
                if let Some(index) = array_index(key) {
                    return match s.chars().nth(index) {
                        Some(c) => self.new_string(c.encode_utf8(&mut [0u8; 4])),
                        None => Ok(Value::Undefined),
                    };
                }
                let key = key.to_js_string();
                if key == "length" {
                    return Ok(Value::Number(s.chars().count() as f64));
                }
                Ok(Builtin::string_method(&key)
                    .map(|b| Value::bound(b, object.clone()))
                    .unwrap_or(Value::Undefined))
            }
            Value::Number(_) => Ok(Builtin::number_method(&key.to_js_string())
                .map(|b| Value::bound(b, object.clone()))
                .unwrap_or(Value::Undefined)),
            Value::Object(map) => Ok(map
                .borrow()
                .get(&key.to_js_string())
                .cloned()
                .unwrap_or(Value::Undefined)),
            Value::Bool(_) | Value::Function(_) | Value::Native(_) => Ok(Value::Undefined),
        }
    }

    fn set_property(&mut self, object: &Value, key: &Value, value: Value) -> Flow<()> {
        match object {
            Value::Array(items) => {
                if let Some(index) = array_index(key) {
                    let len = items.borrow().len();
                    if index >= len {
                        self.charge((index + 1 - len) * VALUE_SIZE)?;
                        items.borrow_mut().resize(index + 1, Value::Undefined);
                    }
                    if let Some(slot) = items.borrow_mut().get_mut(index) {
                        *slot = value;
                    }
                    return Ok(());
                }
                if key.to_js_string() == "length" {
                    let new_len = value.to_number();
                    if new_len < 0.0 || new_len.fract() != 0.0 || new_len > u32::MAX as f64 {
                        return Err(self.error("RangeError", "Invalid array length"));
                    }
                    let new_len = new_len as usize;
                    let len = items.borrow().len();
                    if new_len > len {
                        self.charge((new_len - len) * VALUE_SIZE)?;
                    }
                    items.borrow_mut().resize(new_len, Value::Undefined);
                    return Ok(());
                }
                Err(self.type_error("Cannot add named properties to an array"))
            }
            Value::Object(map) => {
                let key = key.to_js_string();
                if map.borrow().get(&key).is_none() {
                    self.charge(key.len() + VALUE_SIZE)?;
                }
                if map.borrow_mut().set(&key, value) {
                    Ok(())
                } else {
                    Err(self.type_error(format!("Cannot assign to read only property '{key}'")))
                }
            }
            other => {
                let key = key.to_js_string();
                Err(self.type_error(format!(
                    "Cannot set properties of {} (setting '{key}')",
                    other.type_of()
                )))
            }
        }
    }

    pub(crate) fn binary(&mut self, op: BinaryOp, left: &Value, right: &Value) -> Flow<Value> {
        let number = |f: fn(f64, f64) -> f64| Value::Number(f(left.to_number(), right.to_number()));
        let int = |f: fn(i32, i32) -> f64| {
            Value::Number(f(to_int32(left.to_number()), to_int32(right.to_number())))
        };
        Ok(match op {
            BinaryOp::Add => {
                let stringy = |v: &Value| {
                    matches!(v, Value::Str(_) | Value::Array(_) | Value::Object(_))
                };
                if stringy(left) || stringy(right) {
                    let joined = left.to_js_string() + &right.to_js_string();
                    return self.new_string(&joined);
                }
                number(|a, b| a + b)
            }
            BinaryOp::Sub => number(|a, b| a - b),
            BinaryOp::Mul => number(|a, b| a * b),
            BinaryOp::Div => number(|a, b| a / b),
            BinaryOp::Mod => number(|a, b| a % b),
            BinaryOp::Exp => number(f64::powf),
            BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
            BinaryOp::NotEq => Value::Bool(!left.loose_equals(right)),
            BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
            BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::LtEq | BinaryOp::GtEq => {
                let ordering = match (left, right) {
                    (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                    _ => left.to_number().partial_cmp(&right.to_number()),
                };
                Value::Bool(match ordering {
                    None => false,
                    Some(ord) => match op {
                        BinaryOp::Lt => ord.is_lt(),
                        BinaryOp::Gt => ord.is_gt(),
                        BinaryOp::LtEq => ord.is_le(),
                        _ => ord.is_ge(),
                    },
                })
            }
            BinaryOp::BitAnd => int(|a, b| f64::from(a & b)),
            BinaryOp::BitOr => int(|a, b| f64::from(a | b)),
            BinaryOp::BitXor => int(|a, b| f64::from(a ^ b)),
            BinaryOp::Shl => int(|a, b| f64::from(a.wrapping_shl(b as u32 & 31))),
            BinaryOp::Shr => int(|a, b| f64::from(a.wrapping_shr(b as u32 & 31))),
            BinaryOp::UShr => int(|a, b| f64::from((a as u32).wrapping_shr(b as u32 & 31))),
        })
    }
}

impl Drop for Interpreter<'_> {
    fn drop(&mut self) {
        for value in self.heap.drain(..) {
            match value {
                Value::Array(items) => items.borrow_mut().clear(),
                Value::Object(map) => *map.borrow_mut() = ObjectMap::default(),
                _ => {}
            }
        }
        self.scopes.clear();
    }
}

fn string_footprint(s: &str) -> usize {
    16 + s.len()
}

fn array_footprint(len: usize) -> usize {
    32 + len * VALUE_SIZE
}

fn object_footprint(map: &ObjectMap) -> usize {
    let keys: usize = map.keys().map(|k| k.len()).sum();
    64 + keys + map.len() * VALUE_SIZE
}

/// Size of a heap entry that only the heap list still refers to.
fn unreachable_footprint(value: &Value) -> Option<usize> {
    match value {
        Value::Str(s) if Rc::strong_count(s) == 1 => Some(string_footprint(s)),
        Value::Array(items) if Rc::strong_count(items) == 1 => {
            Some(array_footprint(items.borrow().len()))
        }
        Value::Object(map) if Rc::strong_count(map) == 1 => Some(object_footprint(&map.borrow())),
        _ => None,
    }
}

/// Integer index for array and string element access.
pub(crate) fn array_index(key: &Value) -> Option<usize> {
    match key {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n < u32::MAX as f64 => {
            Some(*n as usize)
        }
        Value::Str(s) => {
            let index: usize = s.parse().ok()?;
            (index.to_string() == **s).then_some(index)
        }
        _ => None,
    }
}

fn callee_name(callee: &Expr) -> String {
    match callee {
        Expr::Ident(name, _) => name.clone(),
        Expr::Member { property, .. } => property.clone(),
        _ => "expression".to_string(),
    }
}
