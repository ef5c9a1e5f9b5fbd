//! The lowered program: ordinary C-like code plus explicit Cilk runtime protocol.
//!
//! Every `_Cilk_spawn`, `_Cilk_sync` and `_Cilk_for` of the source has been
//! replaced by stack-frame operations, outlined helper functions and runtime
//! calls. A [`Module`] starts out [`Unverified`]; only a module that passed
//! [`Module::verify`](crate::validate) can be rendered.

use std::marker::PhantomData;

use crate::analysis::bounds::Width;
use crate::error::Diagnostic;
use crate::source::{Expr, Param, Prototype, SimdHint, Type, VarDecl};

pub mod cfg;
mod print;

pub struct Verified;
pub struct Unverified;

pub struct Module<S = Unverified> {
    pub prototypes: Vec<Prototype>,
    pub globals: Vec<VarDecl>,
    pub layouts: Vec<CaptureLayout>,
    /// Helpers come before the function they were outlined from.
    pub functions: Vec<Function>,
    pub warnings: Vec<Diagnostic>,
    state: PhantomData<S>,
}

impl<S> Module<S> {
    pub fn new(
        prototypes: Vec<Prototype>,
        globals: Vec<VarDecl>,
        layouts: Vec<CaptureLayout>,
        functions: Vec<Function>,
        warnings: Vec<Diagnostic>,
    ) -> Self {
        Self {
            prototypes,
            globals,
            layouts,
            functions,
            warnings,
            state: PhantomData,
        }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn layout(&self, name: &str) -> Option<&CaptureLayout> {
        self.layouts.iter().find(|l| l.name == name)
    }

    /// Helpers outlined from `parent`, in creation order.
    pub fn helpers_of<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = &'a Function> {
        self.functions
            .iter()
            .filter(move |f| f.role.parent() == Some(parent))
    }

    pub(crate) fn retag<T>(self) -> Module<T> {
        Module {
            prototypes: self.prototypes,
            globals: self.globals,
            layouts: self.layouts,
            functions: self.functions,
            warnings: self.warnings,
            state: PhantomData,
        }
    }
}

impl<S> std::fmt::Debug for Module<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("layouts", &self.layouts)
            .field("functions", &self.functions)
            .field("warnings", &self.warnings)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionRole {
    Source,
    SpawnHelper { parent: String },
    ForBody { parent: String },
}

impl FunctionRole {
    pub fn parent(&self) -> Option<&str> {
        match self {
            FunctionRole::Source => None,
            FunctionRole::SpawnHelper { parent } | FunctionRole::ForBody { parent } => Some(parent),
        }
    }
}

/// Which side of the frame protocol a function plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRole {
    /// A function that spawns: it owns a frame children can steal from.
    Parent,
    /// A spawn helper: it detaches from its parent's frame.
    Helper,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub ret: Type,
    pub params: Vec<Param>,
    pub role: FunctionRole,
    pub frame: Option<FrameRole>,
    pub body: Vec<Op>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    ByValue,
    ByReference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureRole {
    /// Where the spawned call's result is stored.
    Receiver,
    /// An argument evaluated by the parent, used and destroyed by the child.
    ArgTemp,
    /// A copy of a parent local.
    Value,
    /// Parent storage the child reads and writes in place.
    Shared,
}

#[derive(Debug, Clone)]
pub struct CaptureField {
    pub name: String,
    pub ty: Type,
    pub mode: CaptureMode,
    pub role: CaptureRole,
}

/// The struct a parent fills in and passes to a helper by pointer.
#[derive(Debug, Clone)]
pub struct CaptureLayout {
    pub name: String,
    pub fields: Vec<CaptureField>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopMetadata {
    /// Access group of the enclosing `_Cilk_for` body: iterations are independent.
    pub parallel_access: Option<String>,
    pub simd: Option<SimdHint>,
}

/// A point where the parent saves its execution state so that it can be
/// resumed after a steal or a blocking sync.
#[derive(Debug, Clone, PartialEq)]
pub enum Resumable {
    Spawn { helper: String, context: String },
    Sync,
}

#[derive(Debug, Clone)]
pub struct Handler {
    pub param: Option<Param>,
    pub body: Vec<Op>,
}

#[derive(Debug, Clone)]
pub enum Op {
    Expr(Expr),
    Let {
        name: String,
        ty: Type,
        init: Option<Expr>,
    },
    /// Storage for an object the spawned call constructs; it holds no value
    /// until the helper runs.
    Storage {
        name: String,
        ty: Type,
    },
    /// Constructs `target` in place from `init`.
    Construct {
        target: Expr,
        ty: Type,
        init: Expr,
    },
    Block(Vec<Op>),
    If {
        cond: Expr,
        then: Vec<Op>,
        otherwise: Vec<Op>,
    },
    While {
        cond: Expr,
        body: Vec<Op>,
    },
    DoWhile {
        body: Vec<Op>,
        cond: Expr,
    },
    For {
        init: Option<Box<Op>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Vec<Op>,
        metadata: LoopMetadata,
    },
    Try {
        body: Vec<Op>,
        handlers: Vec<Handler>,
    },
    /// `landing` runs when anything in `body` raises; it ends by re-raising.
    Unwind {
        body: Vec<Op>,
        landing: Vec<Op>,
    },
    Label(String),
    Goto(String),
    Break,
    Continue,
    Return(Option<Expr>),
    Throw(Option<Expr>),
    /// Re-raise the exception being handled.
    Resume,

    EnterFrame(FrameRole),
    Detach,
    Resumable(Resumable),
    Epilogue(FrameRole),
    InitCapture {
        context: String,
        fields: Vec<CaptureField>,
    },
    BindCapture {
        context: String,
        fields: Vec<CaptureField>,
    },
    ParallelFor {
        width: Width,
        helper: String,
        context: String,
        count: String,
        grain: String,
    },
    Destroy(String),
}

impl Op {
    pub fn sync() -> Self {
        Op::Resumable(Resumable::Sync)
    }

    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Op::EnterFrame(_) | Op::Detach | Op::Resumable(_) | Op::Epilogue(_)
        )
    }

    /// Nested op sequences, in execution order.
    pub fn children(&self) -> Vec<&[Op]> {
        match self {
            Op::Block(body) | Op::While { body, .. } | Op::DoWhile { body, .. } => vec![body.as_slice()],
            Op::If { then, otherwise, .. } => vec![then.as_slice(), otherwise.as_slice()],
            Op::For { body, .. } => vec![body.as_slice()],
            Op::Try { body, handlers } => std::iter::once(body.as_slice())
                .chain(handlers.iter().map(|h| h.body.as_slice()))
                .collect(),
            Op::Unwind { body, landing } => vec![body.as_slice(), landing.as_slice()],
            _ => vec![],
        }
    }

    /// Pre-order traversal.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Op)) {
        f(self);
        if let Op::For { init: Some(init), .. } = self {
            init.visit(f);
        }
        for ops in self.children() {
            for op in ops {
                op.visit(f);
            }
        }
    }
}

impl Function {
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Op)) {
        for op in &self.body {
            op.visit(f);
        }
    }

    pub fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
        let mut count = 0;
        self.visit(&mut |op| count += usize::from(pred(op)));
        count
    }
}
