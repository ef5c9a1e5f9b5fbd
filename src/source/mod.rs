//! Surface syntax consumed by the lowering.
//!
//! This is a compact C-like language: enough declarations, statements and
//! expressions to carry `_Cilk_spawn`, `_Cilk_sync` and `_Cilk_for` together
//! with the ordinary control flow they interact with (loops, `try`/`catch`,
//! `throw`, `return`, `goto`).
//!
//! ```text
//! int fib(int n) {
//!     if (n < 2) return n;
//!     int x = _Cilk_spawn fib(n - 1);
//!     int y = fib(n - 2);
//!     _Cilk_sync;
//!     return x + y;
//! }
//! ```

mod display;
pub mod parse;
pub mod pragma;

pub use parse::parse;
pub use pragma::{ParseSession, PragmaDirective, PragmaHandler, PragmaRegistry, SimdHint};

/// Stable identity of a statement, assigned by the [`ParseSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone)]
pub struct TranslationUnit {
    pub items: Vec<Item>,
}

impl TranslationUnit {
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.items.iter().filter_map(|item| match item {
            Item::Function(function) => Some(function),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub enum Item {
    Function(Function),
    Prototype(Prototype),
    Global(VarDecl),
}

#[derive(Debug, Clone)]
pub struct Prototype {
    pub name: String,
    pub ret: Type,
    pub params: Vec<Param>,
    pub elemental: bool,
    /// `const` member function.
    pub is_const: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub ret: Type,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    /// Declared with `__attribute__((vector))` or `__declspec(vector)`.
    pub elemental: bool,
    pub is_const: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: Option<String>,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub name: String,
    pub ty: Type,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub id: StmtId,
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    Decl(VarDecl),
    Block(Vec<Stmt>),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    For(Box<ForLoop>),
    CilkFor(Box<CilkFor>),
    Sync,
    Return(Option<Expr>),
    Break,
    Continue,
    Goto(String),
    Label(String, Box<Stmt>),
    Try {
        body: Vec<Stmt>,
        handlers: Vec<Handler>,
    },
    Throw(Option<Expr>),
    Empty,
}

#[derive(Debug, Clone)]
pub struct Handler {
    /// `None` for `catch (...)`.
    pub param: Option<Param>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct ForLoop {
    pub init: Option<ForInit>,
    pub cond: Option<Expr>,
    pub step: Option<Expr>,
    pub body: Stmt,
    pub simd: Option<SimdHint>,
}

#[derive(Debug, Clone)]
pub enum ForInit {
    Decl(VarDecl),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub struct CilkFor {
    pub init: CilkForInit,
    pub cond: Expr,
    pub step: Expr,
    pub body: Stmt,
    pub grainsize: Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum CilkForInit {
    /// Every declarator of the init clause; only a single one is legal.
    Decl(Vec<VarDecl>),
    Expr(Expr),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    Bool,
    Char,
    Short,
    Int,
    Long,
    LongLong,
}

impl Scalar {
    pub fn bits(self) -> u32 {
        match self {
            Scalar::Bool | Scalar::Char => 8,
            Scalar::Short => 16,
            Scalar::Int => 32,
            Scalar::Long | Scalar::LongLong => 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseType {
    Void,
    Int { scalar: Scalar, signed: bool },
    Named(String),
    /// Produced by the lowering for temporaries whose type is that of their initializer.
    Deduced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indirection {
    Pointer { is_const: bool },
    Reference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
    pub base: BaseType,
    /// Qualifies the base type (the pointee, for pointers).
    pub is_const: bool,
    pub is_volatile: bool,
    pub is_static: bool,
    pub indirection: Vec<Indirection>,
    pub array: Option<Option<u64>>,
}

impl Type {
    pub fn new(base: BaseType) -> Self {
        Self {
            base,
            is_const: false,
            is_volatile: false,
            is_static: false,
            indirection: Vec::new(),
            array: None,
        }
    }

    pub fn int(scalar: Scalar, signed: bool) -> Self {
        Self::new(BaseType::Int { scalar, signed })
    }

    pub fn void() -> Self {
        Self::new(BaseType::Void)
    }

    pub fn deduced() -> Self {
        Self::new(BaseType::Deduced)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new(BaseType::Named(name.into()))
    }

    #[must_use]
    pub fn pointer_to(mut self) -> Self {
        self.indirection.push(Indirection::Pointer { is_const: false });
        self
    }

    #[must_use]
    pub fn unqualified(mut self) -> Self {
        match self.indirection.last_mut() {
            None => self.is_const = false,
            Some(Indirection::Pointer { is_const }) => *is_const = false,
            Some(Indirection::Reference) => {}
        }
        self.is_volatile = false;
        self.is_static = false;
        self
    }

    pub fn is_void(&self) -> bool {
        self.base == BaseType::Void && self.indirection.is_empty()
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.indirection.last(), Some(Indirection::Pointer { .. })) || self.array.is_some()
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.indirection.last(), Some(Indirection::Reference))
    }

    pub fn is_integral(&self) -> bool {
        self.indirection.is_empty() && self.array.is_none() && matches!(self.base, BaseType::Int { .. })
    }

    pub fn is_class(&self) -> bool {
        self.indirection.is_empty() && self.array.is_none() && matches!(self.base, BaseType::Named(_))
    }

    /// The declared object itself is `const` (not merely what it points to).
    pub fn is_top_const(&self) -> bool {
        match self.indirection.last() {
            Some(Indirection::Pointer { is_const }) => *is_const,
            Some(Indirection::Reference) | None => self.is_const,
        }
    }

    /// For pointers and references: whether the referred-to object is `const`.
    pub fn target_is_const(&self) -> bool {
        match self.indirection.len() {
            0 => self.is_const,
            1 => self.is_const,
            n => matches!(self.indirection[n - 2], Indirection::Pointer { is_const: true }),
        }
    }

    pub fn int_bits(&self) -> Option<u32> {
        match (&self.base, self.is_integral()) {
            (BaseType::Int { scalar, .. }, true) => Some(scalar.bits()),
            _ => None,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self.base, BaseType::Int { signed: true, .. }) && self.is_integral()
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Int {
        value: u64,
        unsigned: bool,
        long: bool,
    },
    Bool(bool),
    Ident(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `op` is `None` for plain `=`.
    Assign {
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Step {
        op: StepOp,
        prefix: bool,
        target: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Index(Box<Expr>, Box<Expr>),
    Member {
        base: Box<Expr>,
        field: String,
        arrow: bool,
    },
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Spawn(Box<Expr>),
    Sizeof(Box<Expr>),
    Cast(Type, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
    AddrOf,
    Deref,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOp {
    Inc,
    Dec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            kind,
            span: Span::default(),
        }
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Ident(name.into()))
    }

    pub fn int(value: u64) -> Self {
        Self::new(ExprKind::Int {
            value,
            unsigned: false,
            long: false,
        })
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::new(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Self::new(ExprKind::Unary(op, Box::new(operand)))
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        Self::new(ExprKind::Assign {
            op: None,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    pub fn cast(ty: Type, operand: Expr) -> Self {
        Self::new(ExprKind::Cast(ty, Box::new(operand)))
    }

    pub fn conditional(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Self::new(ExprKind::Conditional(
            Box::new(cond),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call {
            callee: Box::new(callee),
            args,
        })
    }

    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn as_ident(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Ident(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        match &self.kind {
            ExprKind::Int { .. } | ExprKind::Bool(_) => true,
            ExprKind::Unary(UnaryOp::Neg, inner) => inner.is_literal(),
            _ => false,
        }
    }

    /// Pre-order traversal of this expression and every sub-expression.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match &self.kind {
            ExprKind::Int { .. } | ExprKind::Bool(_) | ExprKind::Ident(_) => {}
            ExprKind::Unary(_, inner)
            | ExprKind::Spawn(inner)
            | ExprKind::Sizeof(inner)
            | ExprKind::Cast(_, inner)
            | ExprKind::Step { target: inner, .. }
            | ExprKind::Member { base: inner, .. } => inner.walk(f),
            ExprKind::Binary(_, lhs, rhs) | ExprKind::Index(lhs, rhs) => {
                lhs.walk(f);
                rhs.walk(f);
            }
            ExprKind::Assign { target, value, .. } => {
                target.walk(f);
                value.walk(f);
            }
            ExprKind::Call { callee, args } => {
                callee.walk(f);
                for arg in args {
                    arg.walk(f);
                }
            }
            ExprKind::Conditional(cond, then, otherwise) => {
                cond.walk(f);
                then.walk(f);
                otherwise.walk(f);
            }
        }
    }

    /// Direct sub-expressions, left to right.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Int { .. } | ExprKind::Bool(_) | ExprKind::Ident(_) => vec![],
            ExprKind::Unary(_, inner)
            | ExprKind::Spawn(inner)
            | ExprKind::Sizeof(inner)
            | ExprKind::Cast(_, inner)
            | ExprKind::Step { target: inner, .. }
            | ExprKind::Member { base: inner, .. } => vec![inner.as_ref()],
            ExprKind::Binary(_, lhs, rhs) | ExprKind::Index(lhs, rhs) => vec![lhs.as_ref(), rhs],
            ExprKind::Assign { target, value, .. } => vec![target.as_ref(), value],
            ExprKind::Call { callee, args } => std::iter::once(callee.as_ref()).chain(args).collect(),
            ExprKind::Conditional(cond, then, otherwise) => vec![cond.as_ref(), then, otherwise],
        }
    }

    pub fn any(&self, pred: impl Fn(&Expr) -> bool) -> bool {
        let mut found = false;
        self.walk(&mut |e| found |= pred(e));
        found
    }

    pub fn contains_spawn(&self) -> bool {
        self.any(|e| matches!(e.kind, ExprKind::Spawn(_)))
    }

    /// Anything that can raise an exception: calls (spawned or not).
    pub fn may_raise(&self) -> bool {
        self.any(|e| matches!(e.kind, ExprKind::Call { .. }))
    }
}

// ---------------------------------------------------------------------------
// Statement traversal
// ---------------------------------------------------------------------------

impl Stmt {
    pub fn new(id: StmtId, span: Span, kind: StmtKind) -> Self {
        Self { id, span, kind }
    }

    /// Expressions evaluated directly by this statement (not by nested statements).
    pub fn own_exprs(&self) -> Vec<&Expr> {
        match &self.kind {
            StmtKind::Expr(e) => vec![e],
            StmtKind::Decl(decl) => decl.init.iter().collect(),
            StmtKind::If { cond, .. } | StmtKind::While { cond, .. } | StmtKind::DoWhile { cond, .. } => {
                vec![cond]
            }
            StmtKind::For(f) => {
                let mut exprs = Vec::new();
                match &f.init {
                    Some(ForInit::Decl(decl)) => exprs.extend(decl.init.iter()),
                    Some(ForInit::Expr(e)) => exprs.push(e),
                    None => {}
                }
                exprs.extend(f.cond.iter());
                exprs.extend(f.step.iter());
                exprs
            }
            StmtKind::CilkFor(cf) => {
                let mut exprs = Vec::new();
                match &cf.init {
                    CilkForInit::Decl(decls) => exprs.extend(decls.iter().filter_map(|d| d.init.as_ref())),
                    CilkForInit::Expr(e) => exprs.push(e),
                }
                exprs.push(&cf.cond);
                exprs.push(&cf.step);
                exprs.extend(cf.grainsize.iter());
                exprs
            }
            StmtKind::Return(e) | StmtKind::Throw(e) => e.iter().collect(),
            StmtKind::Block(_)
            | StmtKind::Sync
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Goto(_)
            | StmtKind::Label(..)
            | StmtKind::Try { .. }
            | StmtKind::Empty => vec![],
        }
    }

    /// Directly nested statements. `_Cilk_for` bodies are included.
    pub fn children(&self) -> Vec<&Stmt> {
        match &self.kind {
            StmtKind::Block(stmts) => stmts.iter().collect(),
            StmtKind::If { then, otherwise, .. } => {
                let mut children = vec![then.as_ref()];
                children.extend(otherwise.as_deref());
                children
            }
            StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } => vec![body],
            StmtKind::For(f) => vec![&f.body],
            StmtKind::CilkFor(cf) => vec![&cf.body],
            StmtKind::Label(_, stmt) => vec![stmt],
            StmtKind::Try { body, handlers } => body
                .iter()
                .chain(handlers.iter().flat_map(|h| h.body.iter()))
                .collect(),
            _ => vec![],
        }
    }

    /// Whether a spawn occurs lexically inside this statement. `_Cilk_for` bodies
    /// are outlined into their own helpers, so spawns there do not count.
    pub fn contains_spawn(&self) -> bool {
        if let StmtKind::CilkFor(_) = self.kind {
            return false;
        }
        self.own_exprs().iter().any(|e| e.contains_spawn())
            || self.children().iter().any(|s| s.contains_spawn())
    }

    /// Pre-order traversal over nested statements, stopping at `_Cilk_for` bodies
    /// when `enter_cilk_for` is false.
    pub fn visit<'a>(&'a self, enter_cilk_for: bool, f: &mut impl FnMut(&'a Stmt)) {
        f(self);
        if !enter_cilk_for && matches!(self.kind, StmtKind::CilkFor(_)) {
            return;
        }
        for child in self.children() {
            child.visit(enter_cilk_for, f);
        }
    }
}

pub fn block_contains_spawn(stmts: &[Stmt]) -> bool {
    stmts.iter().any(Stmt::contains_spawn)
}
