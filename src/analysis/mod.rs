use std::collections::{HashMap, HashSet};

use crate::source::{
    BinaryOp, CilkForInit, Expr, ExprKind, ForInit, Indirection, Item, Scalar, Stmt, StmtKind,
    TranslationUnit, Type, UnaryOp,
};

pub mod bounds;
pub mod control_var;
pub mod spawn;
pub mod sync;

/// Signature of a function or member function known to the unit.
#[derive(Debug, Clone)]
pub struct FnSig {
    pub ret: Type,
    pub params: Vec<Type>,
    pub is_const: bool,
}

/// Everything declared at file scope: functions, member functions and globals.
#[derive(Debug, Default)]
pub struct Symbols {
    functions: HashMap<String, FnSig>,
    /// Member functions keyed by their unqualified name.
    methods: HashMap<String, FnSig>,
    globals: HashMap<String, Type>,
}

impl Symbols {
    pub fn collect(unit: &TranslationUnit) -> Self {
        let mut symbols = Self::default();
        for item in &unit.items {
            let (name, sig) = match item {
                Item::Function(function) => (
                    &function.name,
                    FnSig {
                        ret: function.ret.clone(),
                        params: function.params.iter().map(|p| p.ty.clone()).collect(),
                        is_const: function.is_const,
                    },
                ),
                Item::Prototype(prototype) => (
                    &prototype.name,
                    FnSig {
                        ret: prototype.ret.clone(),
                        params: prototype.params.iter().map(|p| p.ty.clone()).collect(),
                        is_const: prototype.is_const,
                    },
                ),
                Item::Global(global) => {
                    symbols.globals.insert(global.name.clone(), global.ty.clone());
                    continue;
                }
            };
            if let Some((_, method)) = name.rsplit_once("::") {
                symbols.methods.insert(method.to_string(), sig.clone());
            }
            symbols.functions.insert(name.clone(), sig);
        }
        symbols
    }

    pub fn function(&self, name: &str) -> Option<&FnSig> {
        self.functions.get(name)
    }

    pub fn method(&self, name: &str) -> Option<&FnSig> {
        self.methods.get(name)
    }

    pub fn global(&self, name: &str) -> Option<&Type> {
        self.globals.get(name)
    }

    /// Signature of the function a call expression invokes, when it can be
    /// resolved statically.
    pub fn callee(&self, callee: &Expr, scopes: &Scopes) -> Option<&FnSig> {
        match &callee.kind {
            ExprKind::Ident(name) if scopes.lookup(name).is_none() => self.function(name),
            ExprKind::Member { field, .. } => self.method(field),
            _ => None,
        }
    }
}

/// Local variables visible at a point of a function body, innermost scope last.
#[derive(Debug, Default, Clone)]
pub struct Scopes {
    frames: Vec<Vec<(String, Type)>>,
}

impl Scopes {
    pub fn new() -> Self {
        Self { frames: vec![vec![]] }
    }

    pub fn push(&mut self) {
        self.frames.push(vec![]);
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    pub fn declare(&mut self, name: &str, ty: Type) {
        if self.frames.is_empty() {
            self.frames.push(vec![]);
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.push((name.to_string(), ty));
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Type> {
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .find(|(local, _)| local == name)
            .map(|(_, ty)| ty)
    }

    /// Locals of the enclosing function referenced by `exprs`, in order of first use.
    pub fn free_locals<'e>(&self, exprs: impl IntoIterator<Item = &'e Expr>) -> Vec<(String, Type)> {
        let mut seen = HashSet::new();
        let mut locals = vec![];
        for expr in exprs {
            expr.walk(&mut |e| {
                if let ExprKind::Ident(name) = &e.kind
                    && let Some(ty) = self.lookup(name)
                    && seen.insert(name.clone())
                {
                    locals.push((name.clone(), ty.clone()));
                }
            });
        }
        locals
    }

    /// Locals of the enclosing function referenced inside `stmt` that are not
    /// declared by `stmt` itself. Names in `bound` are treated as declared.
    pub fn free_locals_in(&self, stmt: &Stmt, bound: &[&str]) -> Vec<(String, Type)> {
        let mut walker = FreeLocals {
            scopes: self,
            inner: vec![bound.iter().map(|name| name.to_string()).collect()],
            seen: HashSet::new(),
            locals: vec![],
        };
        walker.stmt(stmt);
        walker.locals
    }

    /// Best-effort static type of an expression. `None` when it cannot be told
    /// without a full front end.
    pub fn type_of(&self, expr: &Expr, symbols: &Symbols) -> Option<Type> {
        match &expr.kind {
            ExprKind::Int { unsigned, long, .. } => Some(Type::int(
                if *long { Scalar::Long } else { Scalar::Int },
                !unsigned,
            )),
            ExprKind::Bool(_) => Some(Type::int(Scalar::Bool, false)),
            ExprKind::Ident(name) => self
                .lookup(name)
                .or_else(|| symbols.global(name))
                .cloned()
                .map(strip_reference),
            ExprKind::Unary(UnaryOp::Not, _) => Some(Type::int(Scalar::Bool, false)),
            ExprKind::Unary(UnaryOp::AddrOf, operand) => {
                let ty = self.type_of(operand, symbols)?;
                Some(if ty.array.is_some() {
                    Type { array: None, ..ty }.pointer_to()
                } else {
                    ty.pointer_to()
                })
            }
            ExprKind::Unary(UnaryOp::Deref, operand) | ExprKind::Index(operand, _) => {
                pointee(self.type_of(operand, symbols)?)
            }
            ExprKind::Unary(_, operand) => self.type_of(operand, symbols),
            ExprKind::Binary(op, lhs, rhs) => match op {
                BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::And
                | BinaryOp::Or => Some(Type::int(Scalar::Bool, false)),
                _ => {
                    let lhs = self.type_of(lhs, symbols);
                    let rhs = self.type_of(rhs, symbols);
                    match (lhs, rhs) {
                        (Some(l), Some(r)) if l.is_pointer() && r.is_pointer() => {
                            Some(Type::int(Scalar::Long, true))
                        }
                        (Some(l), _) if l.is_pointer() => Some(l),
                        (_, Some(r)) if r.is_pointer() => Some(r),
                        (Some(l), Some(r)) => Some(arithmetic(l, r)),
                        (l, r) => l.or(r),
                    }
                }
            },
            ExprKind::Assign { target, .. } | ExprKind::Step { target, .. } => {
                self.type_of(target, symbols)
            }
            ExprKind::Call { callee, .. } => symbols.callee(callee, self).map(|sig| strip_reference(sig.ret.clone())),
            ExprKind::Member { .. } => None,
            ExprKind::Conditional(_, then, otherwise) => self
                .type_of(then, symbols)
                .or_else(|| self.type_of(otherwise, symbols)),
            ExprKind::Spawn(call) => self.type_of(call, symbols),
            ExprKind::Sizeof(_) => Some(Type::int(Scalar::Long, false)),
            ExprKind::Cast(ty, _) => Some(ty.clone()),
        }
    }
}

pub(crate) fn strip_reference(mut ty: Type) -> Type {
    if ty.is_reference() {
        ty.indirection.pop();
    }
    ty
}

fn pointee(mut ty: Type) -> Option<Type> {
    if ty.array.is_some() {
        ty.array = None;
        return Some(ty);
    }
    match ty.indirection.pop() {
        Some(Indirection::Pointer { .. }) => Some(ty),
        _ => None,
    }
}

/// The usual arithmetic conversions, restricted to the integer types we model.
fn arithmetic(lhs: Type, rhs: Type) -> Type {
    match (lhs.int_bits(), rhs.int_bits()) {
        (Some(l), Some(r)) => {
            let wider = if r > l { rhs.clone() } else { lhs.clone() };
            let bits = l.max(r).max(32);
            let signed = if l == r { lhs.is_signed() && rhs.is_signed() } else { wider.is_signed() };
            let scalar = if bits > 32 { Scalar::Long } else { Scalar::Int };
            Type::int(scalar, signed)
        }
        _ => lhs,
    }
}

struct FreeLocals<'a> {
    scopes: &'a Scopes,
    inner: Vec<HashSet<String>>,
    seen: HashSet<String>,
    locals: Vec<(String, Type)>,
}

impl FreeLocals<'_> {
    fn declare(&mut self, name: &str) {
        if let Some(scope) = self.inner.last_mut() {
            scope.insert(name.to_string());
        }
    }

    fn expr(&mut self, expr: &Expr) {
        expr.walk(&mut |e| {
            if let ExprKind::Ident(name) = &e.kind
                && !self.inner.iter().any(|scope| scope.contains(name))
                && let Some(ty) = self.scopes.lookup(name)
                && self.seen.insert(name.clone())
            {
                self.locals.push((name.clone(), ty.clone()));
            }
        });
    }

    fn scoped(&mut self, f: impl FnOnce(&mut Self)) {
        self.inner.push(HashSet::new());
        f(self);
        self.inner.pop();
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Decl(decl) => {
                if let Some(init) = &decl.init {
                    self.expr(init);
                }
                self.declare(&decl.name);
            }
            StmtKind::Block(stmts) => self.scoped(|w| stmts.iter().for_each(|s| w.stmt(s))),
            StmtKind::For(for_loop) => self.scoped(|w| {
                match &for_loop.init {
                    Some(ForInit::Decl(decl)) => {
                        if let Some(init) = &decl.init {
                            w.expr(init);
                        }
                        w.declare(&decl.name);
                    }
                    Some(ForInit::Expr(e)) => w.expr(e),
                    None => {}
                }
                for e in for_loop.cond.iter().chain(for_loop.step.iter()) {
                    w.expr(e);
                }
                w.stmt(&for_loop.body);
            }),
            StmtKind::CilkFor(cilk_for) => self.scoped(|w| {
                match &cilk_for.init {
                    CilkForInit::Decl(decls) => {
                        for decl in decls {
                            if let Some(init) = &decl.init {
                                w.expr(init);
                            }
                            w.declare(&decl.name);
                        }
                    }
                    CilkForInit::Expr(e) => w.expr(e),
                }
                w.expr(&cilk_for.cond);
                w.expr(&cilk_for.step);
                if let Some(grain) = &cilk_for.grainsize {
                    w.expr(grain);
                }
                w.stmt(&cilk_for.body);
            }),
            StmtKind::Try { body, handlers } => {
                self.scoped(|w| body.iter().for_each(|s| w.stmt(s)));
                for handler in handlers {
                    self.scoped(|w| {
                        if let Some(name) = handler.param.as_ref().and_then(|p| p.name.as_ref()) {
                            w.declare(name);
                        }
                        handler.body.iter().for_each(|s| w.stmt(s));
                    });
                }
            }
            _ => {
                for e in stmt.own_exprs() {
                    self.expr(e);
                }
                for child in stmt.children() {
                    self.scoped(|w| w.stmt(child));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::parse;

    #[test]
    fn free_locals_respect_inner_declarations() {
        let unit = parse("void f() { { int y = x + z; y = y + 1; w = x; } }").unwrap();
        let body = &unit.functions().next().unwrap().body[0];

        let mut scopes = Scopes::new();
        scopes.declare("x", Type::int(Scalar::Int, true));
        scopes.declare("y", Type::int(Scalar::Int, true));
        scopes.declare("w", Type::int(Scalar::Long, true));

        let free: Vec<_> = scopes
            .free_locals_in(body, &[])
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        // `z` is not a local, the inner `y` shadows the outer one
        assert_eq!(free, vec!["x".to_string(), "w".to_string()]);
    }

    #[test]
    fn shadowed_lookup_finds_innermost() {
        let mut scopes = Scopes::new();
        scopes.declare("i", Type::int(Scalar::Int, true));
        scopes.push();
        scopes.declare("i", Type::int(Scalar::Long, false));
        assert_eq!(scopes.lookup("i").unwrap().int_bits(), Some(64));
        scopes.pop();
        assert_eq!(scopes.lookup("i").unwrap().int_bits(), Some(32));
    }

    #[test]
    fn member_prototypes_resolve_by_method_name() {
        let unit = parse("int Counter::get() const; void Counter::bump();").unwrap();
        let symbols = Symbols::collect(&unit);
        assert!(symbols.method("get").unwrap().is_const);
        assert!(!symbols.method("bump").unwrap().is_const);
        assert!(symbols.function("Counter::get").is_some());
    }

    #[test]
    fn pointer_arithmetic_types() {
        let mut scopes = Scopes::new();
        scopes.declare("p", Type::int(Scalar::Int, true).pointer_to());
        scopes.declare("q", Type::int(Scalar::Int, true).pointer_to());
        let symbols = Symbols::default();

        let offset = crate::source::parse::parse_expr("p + 3").unwrap();
        assert!(scopes.type_of(&offset, &symbols).unwrap().is_pointer());

        let diff = crate::source::parse::parse_expr("q - p").unwrap();
        assert_eq!(scopes.type_of(&diff, &symbols).unwrap().int_bits(), Some(64));
    }
}
