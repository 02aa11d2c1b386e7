use std::collections::{HashMap, HashSet};

use tessel_syntax::{
    AssignOp, Block, Expr, ExprKind, Field, FunctionDecl, GlobalItem, Handler, LValue, Param,
    Script, Span, Stmt, StmtKind, UnaryOp,
};
use tracing::debug;

use crate::api::ApiCatalog;
use crate::constants::{self, ConstValue};
use crate::emit::{BodyLine, HostWriter};
use crate::error::{CompileError, CompileWarning};
use crate::events::validate_handlers;
use crate::host;
use crate::literal::{format_float, normalize_float, parse_integer, quote};
use crate::order;
use crate::position_map::PositionMap;
use crate::scope::LocalScopes;
use crate::types::{binary_result, castable, implicit_conversion, unary_result, ValueType};

/// Output of a successful generation
#[derive(Debug, Clone)]
pub struct Generated {
    pub host_source: String,
    pub positions: PositionMap,
    pub warnings: Vec<CompileWarning>,
    /// Number of suspension points emitted after delay-bearing calls
    pub continuation_points: u32,
}

/// Generate a host module for a parsed script
pub fn generate(script: &Script, catalog: &dyn ApiCatalog) -> Result<Generated, CompileError> {
    let mut module = Module::new(catalog);
    module.declare(script)?;
    module.resumable = resumable_functions(script, catalog);

    let mut out = HostWriter::new();
    for item in &script.globals {
        if let GlobalItem::Variable(var) = item {
            out.directive(
                format!(".global {} {}", var.name.name, ValueType::from(var.ty)),
                Some(var.span),
            );
        }
    }
    for state in &script.states {
        out.directive(format!(".state {}", state.name.name), Some(state.span));
    }

    module.emit_init(script, &mut out)?;

    let mut procedures = 1usize;
    for item in &script.globals {
        if let GlobalItem::Function(func) = item {
            module.emit_function(func, &mut out)?;
            procedures += 1;
        }
    }

    let mut handler_lines = Vec::new();
    for state in &script.states {
        let mut seen = HashSet::new();
        for handler in &state.handlers {
            if !seen.insert(handler.name.name.as_str()) {
                return Err(CompileError::at(
                    handler.span,
                    format!(
                        "event '{}' is already handled in state '{}'",
                        handler.name.name, state.name.name
                    ),
                ));
            }
            let proc_name = host::handler_procedure(&state.name.name, &handler.name.name);
            module.emit_handler(handler, &proc_name, &mut out)?;
            procedures += 1;
            handler_lines.push((
                format!(
                    ".handler {} {} {}",
                    state.name.name, handler.name.name, proc_name
                ),
                handler.span,
            ));
        }
    }
    for (line, span) in handler_lines {
        out.directive(line, Some(span));
    }

    let (host_source, positions) = out.finish();
    validate_handlers(&host_source, &positions)?;

    debug!(
        target: "codegen",
        "Generated {} procedure(s) with {} continuation point(s)",
        procedures,
        module.next_cp
    );

    Ok(Generated {
        host_source,
        positions,
        warnings: module.warnings,
        continuation_points: module.next_cp,
    })
}

struct FunctionInfo {
    params: Vec<ValueType>,
    ret: ValueType,
}

struct Module<'a> {
    catalog: &'a dyn ApiCatalog,
    globals: HashMap<String, ValueType>,
    functions: HashMap<String, FunctionInfo>,
    states: HashSet<String>,
    resumable: HashSet<String>,
    next_cp: u32,
    warnings: Vec<CompileWarning>,
}

impl<'a> Module<'a> {
    fn new(catalog: &'a dyn ApiCatalog) -> Self {
        Self {
            catalog,
            globals: HashMap::new(),
            functions: HashMap::new(),
            states: HashSet::new(),
            resumable: HashSet::new(),
            next_cp: 0,
            warnings: Vec::new(),
        }
    }

    fn declare(&mut self, script: &Script) -> Result<(), CompileError> {
        for item in &script.globals {
            let name = match item {
                GlobalItem::Variable(var) => &var.name,
                GlobalItem::Function(func) => &func.name,
            };
            if self.globals.contains_key(&name.name) || self.functions.contains_key(&name.name) {
                return Err(CompileError::at(
                    name.span,
                    format!("Name previously declared within scope: {}", name.name),
                ));
            }
            if constants::lookup(&name.name).is_some() {
                return Err(CompileError::at(
                    name.span,
                    format!("'{}' is a built-in constant", name.name),
                ));
            }
            if self.catalog.lookup(&name.name).is_some() {
                return Err(CompileError::at(
                    name.span,
                    format!("'{}' is a built-in function", name.name),
                ));
            }
            match item {
                GlobalItem::Variable(var) => {
                    self.globals.insert(var.name.name.clone(), var.ty.into());
                }
                GlobalItem::Function(func) => {
                    self.functions.insert(
                        func.name.name.clone(),
                        FunctionInfo {
                            params: func.params.iter().map(|p| p.ty.into()).collect(),
                            ret: func.ret.map(ValueType::from).unwrap_or(ValueType::Void),
                        },
                    );
                }
            }
        }

        for state in &script.states {
            if !self.states.insert(state.name.name.clone()) {
                return Err(CompileError::at(
                    state.name.span,
                    format!("state '{}' is declared twice", state.name.name),
                ));
            }
        }
        Ok(())
    }

    fn emit_init(&mut self, script: &Script, out: &mut HostWriter) -> Result<(), CompileError> {
        let mut gen = FunctionGen::new(self, ValueType::Void);
        gen.init_scope = Some(HashSet::new());

        for item in &script.globals {
            let GlobalItem::Variable(var) = item else {
                continue;
            };
            let ty = ValueType::from(var.ty);
            match &var.init {
                Some(init) => {
                    gen.check_order(init);
                    let found = gen.expr(init)?;
                    gen.coerce(found, ty, init.span)?;
                }
                None => gen.push_default(ty, var.span),
            }
            gen.emit(format!("gstore {}", var.name.name), var.span);
            if let Some(visible) = gen.init_scope.as_mut() {
                visible.insert(var.name.name.clone());
            }
        }
        gen.emit("ret", Span::default());

        let body = gen.body;
        out.directive(format!(".func {} void", host::INIT_PROCEDURE), None);
        out.body(body);
        out.directive(".end".to_string(), None);
        Ok(())
    }

    fn emit_function(&mut self, func: &FunctionDecl, out: &mut HostWriter) -> Result<(), CompileError> {
        let ret = func.ret.map(ValueType::from).unwrap_or(ValueType::Void);
        let resumable = self.resumable.contains(&func.name.name);
        self.emit_procedure(
            &host::function_procedure(&func.name.name),
            ret,
            &func.params,
            &func.body,
            resumable,
            func.span,
            out,
        )
    }

    fn emit_handler(
        &mut self,
        handler: &Handler,
        proc_name: &str,
        out: &mut HostWriter,
    ) -> Result<(), CompileError> {
        let (callees, direct) = calls_in_block(&handler.body, self.catalog);
        let resumable = direct || callees.iter().any(|c| self.resumable.contains(c));
        self.emit_procedure(
            proc_name,
            ValueType::Void,
            &handler.params,
            &handler.body,
            resumable,
            handler.span,
            out,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_procedure(
        &mut self,
        proc_name: &str,
        ret: ValueType,
        params: &[Param],
        body: &Block,
        resumable: bool,
        span: Span,
        out: &mut HostWriter,
    ) -> Result<(), CompileError> {
        let mut gen = FunctionGen::new(self, ret);

        let mut param_lines = Vec::with_capacity(params.len());
        for param in params {
            let ty = ValueType::from(param.ty);
            let host_name = gen
                .scopes
                .declare(&param.name.name, ty, &gen.module.globals, true)
                .ok_or_else(|| {
                    CompileError::at(
                        param.name.span,
                        format!("Duplicate parameter name: {}", param.name.name),
                    )
                })?;
            param_lines.push((format!(".param {} {}", host_name, ty), param.name.span));
        }

        gen.collect_labels(&body.stmts)?;
        for stmt in &body.stmts {
            gen.stmt(stmt)?;
        }
        if ret == ValueType::Void {
            gen.emit("ret", body.span);
        } else {
            gen.push_default(ret, body.span);
            gen.emit("retv", body.span);
        }

        let FunctionGen { scopes, body, .. } = gen;
        let marker = if resumable { " resumable" } else { "" };
        out.directive(format!(".func {} {}{}", proc_name, ret, marker), Some(span));
        for (line, at) in param_lines {
            out.directive(line, Some(at));
        }
        for (name, ty) in scopes.declared {
            out.directive(format!(".local {} {}", name, ty), None);
        }
        out.body(body);
        out.directive(".end".to_string(), None);
        Ok(())
    }
}

enum Place {
    Local(String),
    Global(String),
}

/// Generates the body of one procedure
struct FunctionGen<'m, 'a> {
    module: &'m mut Module<'a>,
    scopes: LocalScopes,
    body: Vec<BodyLine>,
    ret: ValueType,
    labels: HashMap<String, String>,
    next_label: u32,
    /// Set while generating global initializers: globals initialized so far
    init_scope: Option<HashSet<String>>,
}

impl<'m, 'a> FunctionGen<'m, 'a> {
    fn new(module: &'m mut Module<'a>, ret: ValueType) -> Self {
        Self {
            module,
            scopes: LocalScopes::new(),
            body: Vec::new(),
            ret,
            labels: HashMap::new(),
            next_label: 0,
            init_scope: None,
        }
    }

    fn emit(&mut self, text: impl Into<String>, span: Span) {
        self.body.push(BodyLine::Instr(text.into(), span));
    }

    fn label(&mut self, name: String) {
        self.body.push(BodyLine::Label(name));
    }

    fn new_label(&mut self) -> String {
        self.next_label += 1;
        format!("L{}", self.next_label)
    }

    fn check_order(&mut self, expr: &Expr) {
        order::check(expr, &mut self.module.warnings);
    }

    fn collect_labels(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Label(ident) => {
                    if self.labels.contains_key(&ident.name) {
                        return Err(CompileError::at(
                            ident.span,
                            format!("Duplicate label: {}", ident.name),
                        ));
                    }
                    let host_name = format!("U{}_{}", self.labels.len() + 1, ident.name);
                    self.labels.insert(ident.name.clone(), host_name);
                }
                StmtKind::Block(block) => self.collect_labels(&block.stmts)?,
                StmtKind::If {
                    then, otherwise, ..
                } => {
                    self.collect_labels(std::slice::from_ref(then.as_ref()))?;
                    if let Some(other) = otherwise {
                        self.collect_labels(std::slice::from_ref(other.as_ref()))?;
                    }
                }
                StmtKind::While { body, .. }
                | StmtKind::DoWhile { body, .. }
                | StmtKind::For { body, .. } => {
                    self.collect_labels(std::slice::from_ref(body.as_ref()))?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn push_default(&mut self, ty: ValueType, span: Span) {
        match ty {
            ValueType::Integer => self.emit("push.i 0", span),
            ValueType::Float => self.emit("push.f 0.0", span),
            ValueType::String => self.emit("push.s \"\"", span),
            ValueType::Key => self.emit("push.k \"\"", span),
            ValueType::Vector => {
                for _ in 0..3 {
                    self.emit("push.f 0.0", span);
                }
                self.emit("mkvec", span);
            }
            ValueType::Rotation => {
                for _ in 0..3 {
                    self.emit("push.f 0.0", span);
                }
                self.emit("push.f 1.0", span);
                self.emit("mkrot", span);
            }
            ValueType::List => self.emit("mklist 0", span),
            ValueType::Void => {}
        }
    }

    fn push_const(&mut self, value: ConstValue, span: Span) {
        match value {
            ConstValue::Integer(v) => self.emit(format!("push.i {}", v), span),
            ConstValue::Float(v) => self.emit(format!("push.f {}", format_float(v)), span),
            ConstValue::Str(s) => self.emit(format!("push.s {}", quote(s)), span),
            ConstValue::Key(s) => self.emit(format!("push.k {}", quote(s)), span),
            ConstValue::Vector(parts) => {
                for v in parts {
                    self.emit(format!("push.f {}", format_float(v)), span);
                }
                self.emit("mkvec", span);
            }
            ConstValue::Rotation(parts) => {
                for v in parts {
                    self.emit(format!("push.f {}", format_float(v)), span);
                }
                self.emit("mkrot", span);
            }
        }
    }

    fn coerce(&mut self, from: ValueType, to: ValueType, span: Span) -> Result<(), CompileError> {
        match implicit_conversion(from, to) {
            Some(None) => Ok(()),
            Some(Some(cast)) => {
                self.emit(format!("cast {}", cast), span);
                Ok(())
            }
            None => Err(CompileError::at(
                span,
                format!("Type mismatch: expected {}, found {}", to, from),
            )),
        }
    }

    fn block(&mut self, block: &Block) -> Result<(), CompileError> {
        self.scopes.push();
        for stmt in &block.stmts {
            self.stmt(stmt)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::Empty => {}
            StmtKind::Decl(decl) => {
                let ty = ValueType::from(decl.ty);
                match &decl.init {
                    Some(init) => {
                        self.check_order(init);
                        let found = self.expr(init)?;
                        self.coerce(found, ty, init.span)?;
                    }
                    None => self.push_default(ty, span),
                }
                let host_name = self
                    .scopes
                    .declare(&decl.name.name, ty, &self.module.globals, false)
                    .ok_or_else(|| {
                        CompileError::at(
                            decl.name.span,
                            format!("Name previously declared within scope: {}", decl.name.name),
                        )
                    })?;
                self.emit(format!("store {}", host_name), span);
            }
            StmtKind::Expr(expr) => self.expr_stmt(expr)?,
            StmtKind::Block(block) => self.block(block)?,
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                self.condition(cond)?;
                let else_label = self.new_label();
                self.emit(format!("jz {}", else_label), cond.span);
                self.stmt(then)?;
                match otherwise {
                    Some(other) => {
                        let end = self.new_label();
                        self.emit(format!("jmp {}", end), span);
                        self.label(else_label);
                        self.stmt(other)?;
                        self.label(end);
                    }
                    None => self.label(else_label),
                }
            }
            StmtKind::While { cond, body } => {
                let top = self.new_label();
                let end = self.new_label();
                self.label(top.clone());
                self.condition(cond)?;
                self.emit(format!("jz {}", end), cond.span);
                self.stmt(body)?;
                self.emit(format!("jmp {}", top), span);
                self.label(end);
            }
            StmtKind::DoWhile { body, cond } => {
                let top = self.new_label();
                let end = self.new_label();
                self.label(top.clone());
                self.stmt(body)?;
                self.condition(cond)?;
                self.emit(format!("jz {}", end), cond.span);
                self.emit(format!("jmp {}", top), cond.span);
                self.label(end);
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                for expr in init {
                    self.expr_stmt(expr)?;
                }
                let top = self.new_label();
                let end = self.new_label();
                self.label(top.clone());
                if let Some(cond) = cond {
                    self.condition(cond)?;
                    self.emit(format!("jz {}", end), cond.span);
                }
                self.stmt(body)?;
                for expr in step {
                    self.expr_stmt(expr)?;
                }
                self.emit(format!("jmp {}", top), span);
                self.label(end);
            }
            StmtKind::Return(value) => match value {
                Some(expr) => {
                    if self.ret == ValueType::Void {
                        return Err(CompileError::at(
                            expr.span,
                            "Return statement type doesn't match function return type",
                        ));
                    }
                    self.check_order(expr);
                    let found = self.expr(expr)?;
                    self.coerce(found, self.ret, expr.span)?;
                    self.emit("retv", span);
                }
                None => {
                    if self.ret != ValueType::Void {
                        return Err(CompileError::at(
                            span,
                            format!("Function must return a value of type {}", self.ret),
                        ));
                    }
                    self.emit("ret", span);
                }
            },
            StmtKind::StateChange(target) => {
                if !self.module.states.contains(&target.name) {
                    return Err(CompileError::at(
                        target.span,
                        format!("state '{}' is not defined", target.name),
                    ));
                }
                self.emit(format!("state {}", target.name), span);
            }
            StmtKind::Jump(target) => {
                let Some(host_label) = self.labels.get(&target.name).cloned() else {
                    return Err(CompileError::at(
                        target.span,
                        format!("Label not defined within scope: {}", target.name),
                    ));
                };
                self.emit(format!("jmp {}", host_label), span);
            }
            StmtKind::Label(ident) => {
                if let Some(host_label) = self.labels.get(&ident.name).cloned() {
                    self.label(host_label);
                }
            }
        }
        Ok(())
    }

    fn expr_stmt(&mut self, expr: &Expr) -> Result<(), CompileError> {
        self.check_order(expr);
        let ty = self.expr(expr)?;
        if ty != ValueType::Void {
            self.emit("pop", expr.span);
        }
        Ok(())
    }

    fn condition(&mut self, cond: &Expr) -> Result<(), CompileError> {
        self.check_order(cond);
        let ty = self.expr(cond)?;
        if ty == ValueType::Void {
            return Err(CompileError::at(cond.span, "condition has no value"));
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> Result<ValueType, CompileError> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Integer(text) => {
                self.emit(format!("push.i {}", parse_integer(text)), span);
                Ok(ValueType::Integer)
            }
            ExprKind::Float(text) => {
                let value = normalize_float(text).map_err(|msg| CompileError::at(span, msg))?;
                self.emit(format!("push.f {}", value), span);
                Ok(ValueType::Float)
            }
            ExprKind::Str(text) => {
                self.emit(format!("push.s {}", quote(text)), span);
                Ok(ValueType::String)
            }
            ExprKind::Ident(name) => self.load_name(name, span),
            ExprKind::Vector(parts) => {
                for part in parts {
                    let ty = self.expr(part)?;
                    self.coerce(ty, ValueType::Float, part.span)?;
                }
                self.emit("mkvec", span);
                Ok(ValueType::Vector)
            }
            ExprKind::Rotation(parts) => {
                for part in parts {
                    let ty = self.expr(part)?;
                    self.coerce(ty, ValueType::Float, part.span)?;
                }
                self.emit("mkrot", span);
                Ok(ValueType::Rotation)
            }
            ExprKind::List(items) => {
                for item in items {
                    match self.expr(item)? {
                        ValueType::List => {
                            return Err(CompileError::at(item.span, "Lists cannot contain lists"))
                        }
                        ValueType::Void => {
                            return Err(CompileError::at(item.span, "list element has no value"))
                        }
                        _ => {}
                    }
                }
                self.emit(format!("mklist {}", items.len()), span);
                Ok(ValueType::List)
            }
            ExprKind::Call { name, args } => self.call(&name.name, args, span),
            ExprKind::Member { target, field } => {
                let ty = self.expr(target)?;
                check_field(ty, *field, span)?;
                self.emit(format!("getf {}", field), span);
                Ok(ValueType::Float)
            }
            ExprKind::Unary { op, operand } => {
                if *op == UnaryOp::Neg {
                    match &operand.kind {
                        ExprKind::Integer(text) => {
                            self.emit(format!("push.i {}", parse_integer(text).wrapping_neg()), span);
                            return Ok(ValueType::Integer);
                        }
                        ExprKind::Float(text) => {
                            let value =
                                normalize_float(text).map_err(|msg| CompileError::at(span, msg))?;
                            self.emit(format!("push.f -{}", value), span);
                            return Ok(ValueType::Float);
                        }
                        _ => {}
                    }
                }
                let ty = self.expr(operand)?;
                let result = unary_result(*op, ty).ok_or_else(|| {
                    CompileError::at(span, format!("Type mismatch: {}{}", op, ty))
                })?;
                self.emit(host::unary_mnemonic(*op), span);
                Ok(result)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let left = self.expr(lhs)?;
                let right = self.expr(rhs)?;
                let result = binary_result(*op, left, right).ok_or_else(|| {
                    CompileError::at(span, format!("Type mismatch: {} {} {}", left, op, right))
                })?;
                self.emit(host::binary_mnemonic(*op), span);
                Ok(result)
            }
            ExprKind::Assign { op, target, value } => self.assign(*op, target, value, span),
            ExprKind::IncDec {
                target,
                increment,
                prefix,
            } => self.inc_dec(target, *increment, *prefix, span),
            ExprKind::Cast { ty, operand } => {
                let to = ValueType::from(*ty);
                let from = self.expr(operand)?;
                if !castable(from, to) {
                    return Err(CompileError::at(
                        span,
                        format!("cannot cast {} to {}", from, to),
                    ));
                }
                if from != to {
                    self.emit(format!("cast {}", to), span);
                }
                Ok(to)
            }
        }
    }

    fn load_name(&mut self, name: &str, span: Span) -> Result<ValueType, CompileError> {
        if let Some(local) = self.scopes.resolve(name) {
            let (host_name, ty) = (local.host_name.clone(), local.ty);
            self.emit(format!("load {}", host_name), span);
            return Ok(ty);
        }
        if let Some(&ty) = self.module.globals.get(name) {
            if let Some(visible) = &self.init_scope {
                if !visible.contains(name) {
                    return Err(CompileError::at(
                        span,
                        format!("global '{}' is used before it is initialized", name),
                    ));
                }
            }
            self.emit(format!("gload {}", name), span);
            return Ok(ty);
        }
        if let Some(value) = constants::lookup(name) {
            self.push_const(value, span);
            return Ok(value.value_type());
        }
        Err(CompileError::at(
            span,
            format!("Name not defined within scope: {}", name),
        ))
    }

    fn resolve_place(&self, target: &LValue) -> Result<(Place, ValueType), CompileError> {
        let span = target.name.span;
        let name = &target.name.name;
        if self.init_scope.is_some() {
            return Err(CompileError::at(
                span,
                "assignments are not allowed in global initializers",
            ));
        }
        let (place, ty) = if let Some(local) = self.scopes.resolve(name) {
            (Place::Local(local.host_name.clone()), local.ty)
        } else if let Some(&ty) = self.module.globals.get(name) {
            (Place::Global(name.clone()), ty)
        } else if constants::lookup(name).is_some() {
            return Err(CompileError::at(
                span,
                format!("cannot assign to constant {}", name),
            ));
        } else {
            return Err(CompileError::at(
                span,
                format!("Name not defined within scope: {}", name),
            ));
        };
        if let Some(field) = target.field {
            check_field(ty, field, span)?;
        }
        Ok((place, ty))
    }

    fn load_place(&mut self, place: &Place, span: Span) {
        match place {
            Place::Local(name) => self.emit(format!("load {}", name), span),
            Place::Global(name) => self.emit(format!("gload {}", name), span),
        }
    }

    fn store_place(&mut self, place: &Place, span: Span) {
        match place {
            Place::Local(name) => self.emit(format!("store {}", name), span),
            Place::Global(name) => self.emit(format!("gstore {}", name), span),
        }
    }

    fn assign(
        &mut self,
        op: AssignOp,
        target: &LValue,
        value: &Expr,
        span: Span,
    ) -> Result<ValueType, CompileError> {
        let (place, ty) = self.resolve_place(target)?;

        match (target.field, op.binary()) {
            (None, None) => {
                let found = self.expr(value)?;
                self.coerce(found, ty, value.span)?;
                self.emit("dup", span);
                self.store_place(&place, span);
                Ok(ty)
            }
            (None, Some(bop)) => {
                self.load_place(&place, span);
                let found = self.expr(value)?;
                let result = binary_result(bop, ty, found).ok_or_else(|| {
                    CompileError::at(span, format!("Type mismatch: {} {} {}", ty, op, found))
                })?;
                self.emit(host::binary_mnemonic(bop), span);
                if result != ty {
                    if result == ValueType::Float && ty == ValueType::Integer {
                        self.emit("cast integer", span);
                    } else {
                        self.coerce(result, ty, span)?;
                    }
                }
                self.emit("dup", span);
                self.store_place(&place, span);
                Ok(ty)
            }
            (Some(field), bop) => {
                self.load_place(&place, span);
                if let Some(bop) = bop {
                    self.load_place(&place, span);
                    self.emit(format!("getf {}", field), span);
                    let found = self.expr(value)?;
                    let result = binary_result(bop, ValueType::Float, found);
                    if result != Some(ValueType::Float) {
                        return Err(CompileError::at(
                            span,
                            format!("Type mismatch: float {} {}", op, found),
                        ));
                    }
                    self.emit(host::binary_mnemonic(bop), span);
                } else {
                    let found = self.expr(value)?;
                    self.coerce(found, ValueType::Float, value.span)?;
                }
                self.emit(format!("setf {}", field), span);
                self.store_place(&place, span);
                self.load_place(&place, span);
                self.emit(format!("getf {}", field), span);
                Ok(ValueType::Float)
            }
        }
    }

    fn inc_dec(
        &mut self,
        target: &LValue,
        increment: bool,
        prefix: bool,
        span: Span,
    ) -> Result<ValueType, CompileError> {
        let (place, ty) = self.resolve_place(target)?;
        let op = if increment { "add" } else { "sub" };

        match target.field {
            None => {
                let one = match ty {
                    ValueType::Integer => "push.i 1",
                    ValueType::Float => "push.f 1.0",
                    other => {
                        return Err(CompileError::at(
                            span,
                            format!("cannot increment or decrement a {}", other),
                        ))
                    }
                };
                self.load_place(&place, span);
                if prefix {
                    self.emit(one, span);
                    self.emit(op, span);
                    self.emit("dup", span);
                } else {
                    self.emit("dup", span);
                    self.emit(one, span);
                    self.emit(op, span);
                }
                self.store_place(&place, span);
                Ok(ty)
            }
            Some(field) => {
                if !prefix {
                    self.load_place(&place, span);
                    self.emit(format!("getf {}", field), span);
                }
                self.load_place(&place, span);
                self.load_place(&place, span);
                self.emit(format!("getf {}", field), span);
                self.emit("push.f 1.0", span);
                self.emit(op, span);
                self.emit(format!("setf {}", field), span);
                self.store_place(&place, span);
                if prefix {
                    self.load_place(&place, span);
                    self.emit(format!("getf {}", field), span);
                }
                Ok(ValueType::Float)
            }
        }
    }

    fn call(&mut self, name: &str, args: &[Expr], span: Span) -> Result<ValueType, CompileError> {
        if self.init_scope.is_some() {
            return Err(CompileError::at(
                span,
                "function calls are not allowed in global initializers",
            ));
        }

        let (params, ret, target, delay_bearing) =
            if let Some(info) = self.module.functions.get(name) {
                (
                    info.params.clone(),
                    info.ret,
                    format!("call {}", host::function_procedure(name)),
                    false,
                )
            } else if let Some(sig) = self.module.catalog.lookup(name) {
                (
                    sig.params.clone(),
                    sig.ret,
                    format!("api {}", name),
                    sig.delay_bearing,
                )
            } else {
                return Err(CompileError::at(
                    span,
                    format!("Name not defined within scope: {}", name),
                ));
            };

        if args.len() != params.len() {
            let which = if args.len() > params.len() {
                "Too many"
            } else {
                "Too few"
            };
            return Err(CompileError::at(
                span,
                format!(
                    "{} function arguments: {} takes {}, found {}",
                    which,
                    name,
                    params.len(),
                    args.len()
                ),
            ));
        }

        for (arg, want) in args.iter().zip(params.iter()) {
            let found = self.expr(arg)?;
            self.coerce(found, *want, arg.span)?;
        }
        self.emit(format!("{} {}", target, args.len()), span);

        if delay_bearing {
            let cp = self.module.next_cp;
            self.module.next_cp += 1;
            self.emit(format!("yield {}", cp), span);
        }
        Ok(ret)
    }
}

fn check_field(ty: ValueType, field: Field, span: Span) -> Result<(), CompileError> {
    let ok = match ty {
        ValueType::Vector => field != Field::S,
        ValueType::Rotation => true,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(CompileError::at(
            span,
            format!("{} has no component '{}'", ty, field),
        ))
    }
}

/// Names called from a block and whether any of them is a delay-bearing API
fn calls_in_block(block: &Block, catalog: &dyn ApiCatalog) -> (HashSet<String>, bool) {
    let mut names = HashSet::new();
    for stmt in &block.stmts {
        stmt_calls(stmt, &mut names);
    }
    let direct = names
        .iter()
        .any(|name| catalog.lookup(name).is_some_and(|sig| sig.delay_bearing));
    (names, direct)
}

fn stmt_calls(stmt: &Stmt, names: &mut HashSet<String>) {
    match &stmt.kind {
        StmtKind::Empty
        | StmtKind::StateChange(_)
        | StmtKind::Jump(_)
        | StmtKind::Label(_)
        | StmtKind::Return(None) => {}
        StmtKind::Decl(decl) => {
            if let Some(init) = &decl.init {
                expr_calls(init, names);
            }
        }
        StmtKind::Expr(expr) | StmtKind::Return(Some(expr)) => expr_calls(expr, names),
        StmtKind::Block(block) => block.stmts.iter().for_each(|s| stmt_calls(s, names)),
        StmtKind::If {
            cond,
            then,
            otherwise,
        } => {
            expr_calls(cond, names);
            stmt_calls(then, names);
            if let Some(other) = otherwise {
                stmt_calls(other, names);
            }
        }
        StmtKind::While { cond, body } | StmtKind::DoWhile { body, cond } => {
            expr_calls(cond, names);
            stmt_calls(body, names);
        }
        StmtKind::For {
            init,
            cond,
            step,
            body,
        } => {
            init.iter().chain(step.iter()).for_each(|e| expr_calls(e, names));
            if let Some(cond) = cond {
                expr_calls(cond, names);
            }
            stmt_calls(body, names);
        }
    }
}

fn expr_calls(expr: &Expr, names: &mut HashSet<String>) {
    match &expr.kind {
        ExprKind::Integer(_) | ExprKind::Float(_) | ExprKind::Str(_) | ExprKind::Ident(_) => {}
        ExprKind::IncDec { .. } => {}
        ExprKind::Vector(items) | ExprKind::Rotation(items) | ExprKind::List(items) => {
            items.iter().for_each(|e| expr_calls(e, names));
        }
        ExprKind::Call { name, args } => {
            names.insert(name.name.clone());
            args.iter().for_each(|e| expr_calls(e, names));
        }
        ExprKind::Member { target, .. } => expr_calls(target, names),
        ExprKind::Unary { operand, .. } | ExprKind::Cast { operand, .. } => {
            expr_calls(operand, names)
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            expr_calls(lhs, names);
            expr_calls(rhs, names);
        }
        ExprKind::Assign { value, .. } => expr_calls(value, names),
    }
}

/// User functions that can suspend: those calling a delay-bearing API
/// directly or calling another such function, to a fixed point.
fn resumable_functions(script: &Script, catalog: &dyn ApiCatalog) -> HashSet<String> {
    let direct: Vec<(&str, HashSet<String>, bool)> = script
        .globals
        .iter()
        .filter_map(|item| match item {
            GlobalItem::Function(func) => {
                let (callees, direct) = calls_in_block(&func.body, catalog);
                Some((func.name.name.as_str(), callees, direct))
            }
            GlobalItem::Variable(_) => None,
        })
        .collect();

    let mut resumable: HashSet<String> = direct
        .iter()
        .filter(|(_, _, direct)| *direct)
        .map(|(name, _, _)| name.to_string())
        .collect();

    loop {
        let mut changed = false;
        for (name, callees, _) in &direct {
            if !resumable.contains(*name) && callees.iter().any(|c| resumable.contains(c)) {
                resumable.insert(name.to_string());
                changed = true;
            }
        }
        if !changed {
            return resumable;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiSignature;

    fn catalog() -> Vec<ApiSignature> {
        vec![
            ApiSignature::new("llSay", &[ValueType::Integer, ValueType::String], ValueType::Void),
            ApiSignature::new("llSleep", &[ValueType::Float], ValueType::Void).delayed(),
            ApiSignature::new("llGetTime", &[], ValueType::Float),
        ]
    }

    fn gen(src: &str) -> Result<Generated, CompileError> {
        let script = tessel_syntax::parse(src).expect("parses");
        generate(&script, &catalog())
    }

    #[test]
    fn test_handler_table_and_procedures() {
        let out = gen("default { touch_start(integer n) { llSay(0, \"hi\"); } }").unwrap();
        assert!(out
            .host_source
            .contains(".handler default touch_start ev.default.touch_start"));
        assert!(out.host_source.contains(".param n integer"));
        assert!(out.host_source.contains("  api llSay 2"));
        assert_eq!(out.continuation_points, 0);
    }

    #[test]
    fn test_delay_marks_callers_resumable() {
        let src = r#"
            nap() { llSleep(1.0); }
            outer() { nap(); }
            quick() { llSay(0, "x"); }
            default { state_entry() { outer(); } }
        "#;
        let out = gen(src).unwrap();
        assert!(out.host_source.contains(".func fn.nap void resumable"));
        assert!(out.host_source.contains(".func fn.outer void resumable"));
        assert!(out.host_source.contains(".func fn.quick void\n"));
        assert!(out
            .host_source
            .contains(".func ev.default.state_entry void resumable"));
        assert!(out.host_source.contains("  yield 0"));
        assert_eq!(out.continuation_points, 1);
    }

    #[test]
    fn test_local_shadowing_global_is_renamed() {
        let src = "integer n; default { state_entry() { integer n = 2; n++; } }";
        let out = gen(src).unwrap();
        assert!(out.host_source.contains(".local n$1 integer"));
        assert!(out.host_source.contains("  store n$1"));
    }

    #[test]
    fn test_float_literals_are_normalized() {
        let out = gen("float f = 1.; default { state_entry() { f = .5; } }").unwrap();
        assert!(out.host_source.contains("push.f 1.0"));
        assert!(out.host_source.contains("push.f 0.5"));
    }

    #[test]
    fn test_integer_to_float_is_cast() {
        let out = gen("float f = 3; default { state_entry() { } }").unwrap();
        assert!(out.host_source.contains("  push.i 3\n  cast float\n  gstore f"));
    }

    #[test]
    fn test_type_mismatch_reports_position() {
        let err = gen("default {\n  state_entry() {\n    integer i = \"x\";\n  }\n}").unwrap_err();
        assert_eq!((err.line, err.column), (3, 17));
        assert!(err.message.contains("Type mismatch"));
    }

    #[test]
    fn test_undefined_state() {
        let err = gen("default { touch_start(integer n) { state nowhere; } }").unwrap_err();
        assert!(err.message.contains("nowhere"));
    }

    #[test]
    fn test_call_arity() {
        let err = gen("default { state_entry() { llSay(0); } }").unwrap_err();
        assert!(err.message.starts_with("Too few function arguments"));
    }

    #[test]
    fn test_init_rejects_forward_reference() {
        let err = gen("integer a = b; integer b = 1; default { state_entry() { } }").unwrap_err();
        assert!(err.message.contains("before it is initialized"));
    }

    #[test]
    fn test_non_void_function_ends_with_default_return() {
        let out = gen("integer f() { } default { state_entry() { f(); } }").unwrap();
        assert!(out.host_source.contains("  push.i 0\n  retv\n.end"));
    }

    #[test]
    fn test_jump_to_label() {
        let src = "default { state_entry() { jump done; llSay(0, \"skipped\"); @done; } }";
        let out = gen(src).unwrap();
        assert!(out.host_source.contains("  jmp U1_done"));
        assert!(out.host_source.contains("U1_done:"));
    }

    #[test]
    fn test_order_warning_is_collected() {
        let out = gen("default { state_entry() { integer i; integer j = i++ + i; } }").unwrap();
        assert_eq!(out.warnings.len(), 1);
    }
}
