use std::collections::HashSet;

use log::{debug, info};

use crate::analysis::sync::{self, BodyKind, SyncPlan};
use crate::analysis::{Scopes, Symbols, spawn};
use crate::error::{Diagnostic, DiagnosticKind, Error};
use crate::lowered::{self, CaptureLayout, FrameRole, FunctionRole, LoopMetadata, Module, Op, Unverified};
use crate::source::{ForInit, Function, Item, Stmt, StmtKind, TranslationUnit};

mod cilk_for;
mod frame;
mod outline;

/// Knobs of the lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowerOptions {
    /// Drop explicit `_Cilk_sync` statements that never wait for a child.
    pub elide_redundant_sync: bool,
    /// Mark the loops of `_Cilk_for` helpers as free of cross-iteration dependencies.
    pub parallel_metadata: bool,
}

impl Default for LowerOptions {
    fn default() -> Self {
        Self {
            elide_redundant_sync: false,
            parallel_metadata: true,
        }
    }
}

pub fn lower_unit(unit: &TranslationUnit, options: &LowerOptions) -> Result<Module<Unverified>, Error> {
    let symbols = Symbols::collect(unit);
    let mut prototypes = vec![];
    let mut globals = vec![];
    let mut layouts = vec![];
    let mut functions = vec![];
    let mut diagnostics = vec![];

    for item in &unit.items {
        match item {
            Item::Prototype(prototype) => prototypes.push(prototype.clone()),
            Item::Global(global) => {
                if let Err(diagnostic) = spawn::check_global(global) {
                    diagnostics.push(diagnostic);
                }
                globals.push(global.clone());
            }
            Item::Function(function) => match lower_function(function, &symbols, options) {
                Ok(lowered) => {
                    diagnostics.extend(lowered.warnings);
                    layouts.extend(lowered.layouts);
                    functions.extend(lowered.functions);
                }
                Err(found) => diagnostics.extend(found),
            },
        }
    }

    if diagnostics.iter().any(Diagnostic::is_error) {
        let errors = diagnostics.iter().filter(|d| d.is_error()).count();
        info!("rejected: {errors} error(s), {} diagnostic(s) total", diagnostics.len());
        return Err(Error::Rejected(diagnostics));
    }
    info!(
        "lowered {} function(s), {} capture layout(s), {} warning(s)",
        functions.len(),
        layouts.len(),
        diagnostics.len()
    );
    Ok(Module::new(prototypes, globals, layouts, functions, diagnostics))
}

struct LoweredFunction {
    /// Helpers first, then the function itself.
    functions: Vec<lowered::Function>,
    layouts: Vec<CaptureLayout>,
    warnings: Vec<Diagnostic>,
}

fn lower_function(
    function: &Function,
    symbols: &Symbols,
    options: &LowerOptions,
) -> Result<LoweredFunction, Vec<Diagnostic>> {
    if let Err(diagnostic) = spawn::check_elemental(function) {
        return Err(vec![diagnostic]);
    }

    let mut scopes = Scopes::new();
    for param in &function.params {
        if let Some(name) = &param.name {
            scopes.declare(name, param.ty.clone());
        }
    }
    let mut lowerer = FunctionLowerer {
        function,
        symbols,
        options,
        scopes,
        namer: Namer::new(&function.name),
        contexts: vec![],
        control_vars: vec![],
        helpers: vec![],
        layouts: vec![],
        diagnostics: vec![],
    };

    let plan = sync::plan(&function.body, BodyKind::Function, options.elide_redundant_sync);
    lowerer.contexts.push(BodyContext::new(
        plan,
        BodyKind::Function,
        function.name.clone(),
        None,
        &function.body,
    ));
    let body = lowerer.stmts(&function.body);
    let context = lowerer.contexts.pop();

    if lowerer.diagnostics.iter().any(Diagnostic::is_error) {
        return Err(lowerer.diagnostics);
    }

    let (body, frame) = match context {
        Some(context) if context.framed() => (
            frame::wrap_parent(body, &context.plan, true),
            Some(FrameRole::Parent),
        ),
        _ => (body, None),
    };
    info!(
        "lowered '{}': {} helper(s){}",
        function.name,
        lowerer.helpers.len(),
        if frame.is_some() { ", owns a frame" } else { "" }
    );

    let mut functions = lowerer.helpers;
    functions.push(lowered::Function {
        name: function.name.clone(),
        ret: function.ret.clone(),
        params: function.params.clone(),
        role: FunctionRole::Source,
        frame,
        body,
    });
    Ok(LoweredFunction {
        functions,
        layouts: lowerer.layouts,
        warnings: lowerer.diagnostics,
    })
}

/// State of the body being lowered: the function itself or a `_Cilk_for`
/// iteration body.
struct BodyContext {
    plan: SyncPlan,
    kind: BodyKind,
    /// The lowered function this body ends up in.
    owner: String,
    /// Ordinary loops enclosing the current statement inside this body.
    loop_depth: usize,
    /// Labels defined in this body; `goto` may not leave an iteration body.
    labels: HashSet<String>,
    access_group: Option<String>,
}

impl BodyContext {
    fn new(plan: SyncPlan, kind: BodyKind, owner: String, access_group: Option<String>, body: &[Stmt]) -> Self {
        let mut labels = HashSet::new();
        for stmt in body {
            stmt.visit(false, &mut |s| {
                if let StmtKind::Label(name, _) = &s.kind {
                    labels.insert(name.clone());
                }
            });
        }
        Self {
            plan,
            kind,
            owner,
            loop_depth: 0,
            labels,
            access_group,
        }
    }

    /// Bodies that spawn own a frame.
    fn framed(&self) -> bool {
        self.plan.has_spawn
    }
}

/// Names of everything the lowering introduces for one source function.
struct Namer {
    prefix: String,
    spawns: usize,
    loops: usize,
    temps: usize,
}

impl Namer {
    fn new(function: &str) -> Self {
        Self {
            prefix: function.replace("::", "_"),
            spawns: 0,
            loops: 0,
            temps: 0,
        }
    }

    fn spawn(&mut self) -> (usize, String) {
        let n = self.spawns;
        self.spawns += 1;
        (n, format!("__cilk_spawn_{}_{n}", self.prefix))
    }

    fn cilk_for(&mut self) -> (usize, String) {
        let n = self.loops;
        self.loops += 1;
        (n, format!("__cilk_for_{}_{n}", self.prefix))
    }

    fn temp(&mut self, stem: &str) -> String {
        let n = self.temps;
        self.temps += 1;
        format!("__cilk_{stem}{n}")
    }
}

struct FunctionLowerer<'a> {
    function: &'a Function,
    symbols: &'a Symbols,
    options: &'a LowerOptions,
    scopes: Scopes,
    namer: Namer,
    contexts: Vec<BodyContext>,
    /// Control variables of the enclosing `_Cilk_for` loops.
    control_vars: Vec<String>,
    helpers: Vec<lowered::Function>,
    layouts: Vec<CaptureLayout>,
    diagnostics: Vec<Diagnostic>,
}

impl FunctionLowerer<'_> {
    fn report(&mut self, diagnostic: Diagnostic, stmt: &Stmt) {
        let diagnostic = diagnostic.at(&self.function.name, stmt.span);
        debug!("{diagnostic}");
        self.diagnostics.push(diagnostic);
    }

    fn context(&self) -> Option<&BodyContext> {
        self.contexts.last()
    }

    fn owner(&self) -> String {
        match self.context() {
            Some(context) => context.owner.clone(),
            None => self.function.name.clone(),
        }
    }

    fn plan_has(&self, pred: impl Fn(&SyncPlan) -> bool) -> bool {
        self.context().is_some_and(|c| pred(&c.plan))
    }

    fn framed(&self) -> bool {
        self.context().is_some_and(BodyContext::framed)
    }

    fn in_iteration_body(&self) -> bool {
        self.context().is_some_and(|c| c.kind == BodyKind::IterationBody)
    }

    fn sync_before(&self, stmt: &Stmt) -> Vec<Op> {
        if self.plan_has(|plan| plan.before(stmt.id)) {
            vec![Op::sync()]
        } else {
            vec![]
        }
    }

    fn stmts(&mut self, stmts: &[Stmt]) -> Vec<Op> {
        let mut ops = vec![];
        for stmt in stmts {
            ops.extend(self.stmt(stmt));
        }
        ops
    }

    /// Lowers a nested statement in its own scope, flattening a block.
    fn nested(&mut self, stmt: &Stmt) -> Vec<Op> {
        self.scopes.push();
        let ops = match &stmt.kind {
            StmtKind::Block(stmts) => self.stmts(stmts),
            _ => self.stmt(stmt),
        };
        self.scopes.pop();
        ops
    }

    fn loop_body(&mut self, body: &Stmt) -> Vec<Op> {
        if let Some(context) = self.contexts.last_mut() {
            context.loop_depth += 1;
        }
        let ops = self.nested(body);
        if let Some(context) = self.contexts.last_mut() {
            context.loop_depth -= 1;
        }
        ops
    }

    fn jump_out(&mut self, stmt: &Stmt, what: &str) {
        self.report(
            Diagnostic::error(
                DiagnosticKind::JumpOutOfParallelLoop,
                format!("{what} may not leave the body of a _Cilk_for"),
            ),
            stmt,
        );
    }

    fn stmt(&mut self, stmt: &Stmt) -> Vec<Op> {
        match spawn::classify(stmt, &self.scopes, self.symbols) {
            Err(diagnostic) => {
                self.report(diagnostic, stmt);
                return vec![];
            }
            Ok(Some(site)) => return self.spawn(stmt, site),
            Ok(None) => {}
        }

        match &stmt.kind {
            StmtKind::Expr(expr) => vec![Op::Expr(expr.clone())],
            StmtKind::Decl(decl) => {
                self.scopes.declare(&decl.name, decl.ty.clone());
                vec![Op::Let {
                    name: decl.name.clone(),
                    ty: decl.ty.clone(),
                    init: decl.init.clone(),
                }]
            }
            StmtKind::Block(stmts) => {
                self.scopes.push();
                let ops = self.stmts(stmts);
                self.scopes.pop();
                vec![Op::Block(ops)]
            }
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                let then = self.nested(then);
                let otherwise = match otherwise {
                    Some(otherwise) => self.nested(otherwise),
                    None => vec![],
                };
                vec![Op::If {
                    cond: cond.clone(),
                    then,
                    otherwise,
                }]
            }
            StmtKind::While { cond, body } => vec![Op::While {
                cond: cond.clone(),
                body: self.loop_body(body),
            }],
            StmtKind::DoWhile { body, cond } => vec![Op::DoWhile {
                body: self.loop_body(body),
                cond: cond.clone(),
            }],
            StmtKind::For(for_loop) => {
                self.scopes.push();
                let init = match &for_loop.init {
                    Some(ForInit::Decl(decl)) => {
                        self.scopes.declare(&decl.name, decl.ty.clone());
                        Some(Box::new(Op::Let {
                            name: decl.name.clone(),
                            ty: decl.ty.clone(),
                            init: decl.init.clone(),
                        }))
                    }
                    Some(ForInit::Expr(expr)) => Some(Box::new(Op::Expr(expr.clone()))),
                    None => None,
                };
                let body = self.loop_body(&for_loop.body);
                self.scopes.pop();
                let parallel_access = match &for_loop.simd {
                    Some(_) => self.context().and_then(|c| c.access_group.clone()),
                    None => None,
                };
                vec![Op::For {
                    init,
                    cond: for_loop.cond.clone(),
                    step: for_loop.step.clone(),
                    body,
                    metadata: LoopMetadata {
                        parallel_access,
                        simd: for_loop.simd.clone(),
                    },
                }]
            }
            StmtKind::CilkFor(cilk_for) => self.cilk_for(stmt, cilk_for),
            StmtKind::Sync => {
                if self.plan_has(|plan| plan.is_elided(stmt.id)) || !self.framed() {
                    debug!("'{}': dropping redundant _Cilk_sync at {}:{}", self.function.name, stmt.span.line, stmt.span.col);
                    vec![]
                } else {
                    vec![Op::sync()]
                }
            }
            StmtKind::Return(value) => {
                if self.in_iteration_body() {
                    self.jump_out(stmt, "return");
                    return vec![];
                }
                self.ret(stmt, value.as_ref())
            }
            StmtKind::Break => {
                if self.in_iteration_body() && self.context().is_some_and(|c| c.loop_depth == 0) {
                    self.jump_out(stmt, "break");
                    return vec![];
                }
                let mut ops = self.sync_before(stmt);
                ops.push(Op::Break);
                ops
            }
            StmtKind::Continue => {
                let mut ops = self.sync_before(stmt);
                ops.push(Op::Continue);
                ops
            }
            StmtKind::Goto(label) => {
                if self.in_iteration_body() && self.context().is_some_and(|c| !c.labels.contains(label)) {
                    self.jump_out(stmt, &format!("goto {label}"));
                    return vec![];
                }
                let mut ops = self.sync_before(stmt);
                ops.push(Op::Goto(label.clone()));
                ops
            }
            StmtKind::Label(label, inner) => {
                let mut ops = vec![Op::Label(label.clone())];
                ops.extend(self.stmt(inner));
                ops
            }
            StmtKind::Try { body, handlers } => {
                self.scopes.push();
                let body_ops = self.stmts(body);
                self.scopes.pop();
                let mut lowered_handlers = vec![];
                for handler in handlers {
                    self.scopes.push();
                    if let Some(param) = &handler.param
                        && let Some(name) = &param.name
                    {
                        self.scopes.declare(name, param.ty.clone());
                    }
                    let body = self.stmts(&handler.body);
                    self.scopes.pop();
                    lowered_handlers.push(lowered::Handler {
                        param: handler.param.clone(),
                        body,
                    });
                }
                let plan = self.context().map(|c| &c.plan);
                let body_ops = match plan {
                    Some(plan) => frame::absorb_try(body_ops, plan, stmt.id),
                    None => body_ops,
                };
                vec![Op::Try {
                    body: body_ops,
                    handlers: lowered_handlers,
                }]
            }
            StmtKind::Throw(value) => {
                let mut ops = self.sync_before(stmt);
                ops.push(Op::Throw(value.clone()));
                ops
            }
            StmtKind::Empty => vec![],
        }
    }

    /// In a function with a frame the value is computed first, then the
    /// pending children are synced and the frame is popped.
    fn ret(&mut self, stmt: &Stmt, value: Option<&crate::source::Expr>) -> Vec<Op> {
        if !self.framed() {
            return vec![Op::Return(value.cloned())];
        }
        let mut ops = vec![];
        let value = match value {
            Some(value) if !value.is_literal() => {
                let temp = self.namer.temp("ret");
                ops.push(Op::Let {
                    name: temp.clone(),
                    ty: self.function.ret.clone(),
                    init: Some(value.clone()),
                });
                Some(crate::source::Expr::ident(temp))
            }
            other => other.cloned(),
        };
        ops.extend(self.sync_before(stmt));
        ops.push(Op::Epilogue(FrameRole::Parent));
        ops.push(Op::Return(value));
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Severity;
    use crate::lowered::Resumable;
    use crate::source::parse;

    pub(super) fn lower(source: &str) -> Result<Module<Unverified>, Error> {
        lower_unit(&parse(source).unwrap(), &LowerOptions::default())
    }

    pub(super) fn rejected(source: &str) -> Vec<DiagnosticKind> {
        match lower(source) {
            Err(Error::Rejected(diagnostics)) => diagnostics
                .into_iter()
                .filter(|d| d.severity == Severity::Error)
                .map(|d| d.kind)
                .collect(),
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[test]
    fn single_spawn_scenario() {
        let module = lower(
            "int fib(int n) { if (n < 2) return n; int x = _Cilk_spawn fib(n - 1); int y = fib(n - 2); _Cilk_sync; return x + y; }",
        )
        .unwrap();
        let fib = module.function("fib").unwrap();
        assert_eq!(fib.frame, Some(FrameRole::Parent));
        assert_eq!(fib.count(|op| matches!(op, Op::EnterFrame(_))), 1);
        assert_eq!(
            fib.count(|op| matches!(op, Op::Resumable(Resumable::Spawn { .. }))),
            1
        );

        let helpers: Vec<_> = module.helpers_of("fib").collect();
        assert_eq!(helpers.len(), 1);
        assert_eq!(helpers[0].name, "__cilk_spawn_fib_0");
        assert_eq!(helpers[0].frame, Some(FrameRole::Helper));
        assert_eq!(helpers[0].count(|op| matches!(op, Op::Detach)), 1);

        assert!(module.verify().is_ok());
    }

    #[test]
    fn single_spawn_without_sync() {
        let module = lower("void g(); void f() { _Cilk_spawn g(); }").unwrap();
        let f = module.function("f").unwrap();

        fn normal_path(ops: &[Op], out: &mut Vec<&'static str>) {
            for op in ops {
                match op {
                    Op::Block(inner) | Op::Unwind { body: inner, .. } => normal_path(inner, out),
                    Op::EnterFrame(_) => out.push("enter"),
                    Op::InitCapture { .. } => out.push("capture"),
                    Op::Resumable(Resumable::Spawn { .. }) => out.push("spawn"),
                    Op::Resumable(Resumable::Sync) => out.push("sync"),
                    Op::Epilogue(_) => out.push("epilogue"),
                    _ => {}
                }
            }
        }
        let mut order = vec![];
        normal_path(&f.body, &mut order);
        assert_eq!(order, ["enter", "capture", "spawn", "sync", "epilogue"]);

        let Some(Op::Unwind { landing, .. }) = f.body.get(1) else {
            panic!("unexpected shape: {:?}", f.body);
        };
        assert!(matches!(
            landing.as_slice(),
            [.., Op::Epilogue(FrameRole::Parent), Op::Resume]
        ));
        assert!(module.verify().is_ok());
    }

    #[test]
    fn functions_without_spawns_have_no_frame() {
        let module = lower("int twice(int n) { _Cilk_sync; return n + n; }").unwrap();
        let twice = module.function("twice").unwrap();
        assert_eq!(twice.frame, None);
        assert_eq!(twice.count(Op::is_protocol), 0);
        assert!(module.verify().is_ok());
    }

    #[test]
    fn every_exit_has_one_epilogue() {
        let module = lower(
            "int g(int); \
             int f(int n) { \
               while (n > 0) { \
                 if (n == 7) return g(n); \
                 _Cilk_spawn g(n); \
                 if (n == 3) break; \
                 n = n - 1; \
               } \
               try { _Cilk_spawn g(1); if (n) throw n; } catch (int e) { return e; } \
               again: if (n) { n = g(n); goto again; } \
               return 0; \
             }",
        )
        .unwrap();
        assert!(module.verify().is_ok());
    }

    #[test]
    fn spawn_in_try_is_synced_before_handlers() {
        let module = lower("void g(); void h(); void f() { try { _Cilk_spawn g(); h(); } catch (...) { h(); } h(); }").unwrap();
        let f = module.function("f").unwrap();
        let mut landing_syncs = 0;
        f.visit(&mut |op| {
            if let Op::Unwind { landing, .. } = op
                && matches!(landing.first(), Some(Op::Resumable(Resumable::Sync)))
            {
                landing_syncs += 1;
            }
        });
        // the try block's own pad; the function pad needs none
        assert_eq!(landing_syncs, 1);
        assert!(module.verify().is_ok());
    }

    #[test]
    fn errors_reject_the_unit() {
        let kinds = rejected("int g(int); void f() { int x = 1 + _Cilk_spawn g(1); } void h() { _Cilk_spawn _Cilk_spawn g(2); }");
        assert_eq!(
            kinds,
            vec![DiagnosticKind::SpawnPlacement, DiagnosticKind::ConsecutiveSpawn]
        );
    }

    #[test]
    fn spawn_in_global_initializer() {
        let kinds = rejected("int g(); int x = _Cilk_spawn g();");
        assert_eq!(kinds, vec![DiagnosticKind::SpawnOutsideFunction]);
    }

    #[test]
    fn diagnostics_carry_the_function_name() {
        let Err(Error::Rejected(diagnostics)) = lower("void f() { _Cilk_spawn x; }") else {
            panic!("expected a rejection");
        };
        assert_eq!(diagnostics[0].function, "f");
        assert!(diagnostics[0].to_string().contains("error in 'f'"));
    }

    #[test]
    fn redundant_sync_elision_is_opt_in() {
        let source = "void g(); void f() { _Cilk_spawn g(); _Cilk_sync; _Cilk_sync; }";
        let unit = parse(source).unwrap();
        let syncs = |options: LowerOptions| {
            let module = lower_unit(&unit, &options).unwrap();
            module
                .function("f")
                .unwrap()
                .count(|op| matches!(op, Op::Resumable(Resumable::Sync)))
        };
        let kept = syncs(LowerOptions::default());
        let elided = syncs(LowerOptions {
            elide_redundant_sync: true,
            ..LowerOptions::default()
        });
        assert_eq!(kept, elided + 1);
    }
}
