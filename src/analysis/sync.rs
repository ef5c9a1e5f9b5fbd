use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::source::{Expr, ForInit, Stmt, StmtId, StmtKind, block_contains_spawn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScopeRef {
    Function,
    Try(StmtId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncPoint {
    /// Control falls off the end of the scope.
    ScopeExit(ScopeRef),
    /// Immediately before a statement that leaves the scope early.
    BeforeStmt(StmtId),
    /// On the exceptional exit of a try block that spawns.
    TryUnwind(StmtId),
    /// On the exceptional exit of the function.
    FunctionUnwind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Function,
    /// The body of a `_Cilk_for`, run once per iteration.
    IterationBody,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub points: BTreeSet<SyncPoint>,
    /// Explicit `_Cilk_sync` statements that can be dropped.
    pub elided: BTreeSet<StmtId>,
    pub has_spawn: bool,
}

impl SyncPlan {
    pub fn has(&self, point: SyncPoint) -> bool {
        self.points.contains(&point)
    }

    pub fn before(&self, id: StmtId) -> bool {
        self.has(SyncPoint::BeforeStmt(id))
    }

    pub fn is_elided(&self, id: StmtId) -> bool {
        self.elided.contains(&id)
    }
}

/// Plans the syncs of one body. When `elide` is set, explicit syncs that are
/// never reached with a pending child are marked for removal; in a body
/// without any spawn they always are.
pub fn plan(body: &[Stmt], kind: BodyKind, elide: bool) -> SyncPlan {
    let mut planner = Planner {
        kind,
        points: BTreeSet::new(),
        syncs: BTreeSet::new(),
        reached_pending: BTreeSet::new(),
        labels: HashMap::new(),
        loops: vec![],
        absorbing: 0,
        changed: false,
    };
    let exit = loop {
        planner.changed = false;
        let exit = planner.stmts(body, false);
        if !planner.changed {
            break exit;
        }
    };
    if exit {
        planner.points.insert(SyncPoint::ScopeExit(ScopeRef::Function));
    }

    let has_spawn = block_contains_spawn(body);
    let elided = if elide || !has_spawn {
        planner
            .syncs
            .difference(&planner.reached_pending)
            .copied()
            .collect()
    } else {
        BTreeSet::new()
    };
    debug!(
        "sync plan ({kind:?}): {} point(s), {} elided sync(s)",
        planner.points.len(),
        elided.len()
    );
    SyncPlan {
        points: planner.points,
        elided,
        has_spawn,
    }
}

struct LoopFrame {
    /// Absorbing try blocks open when the loop was entered.
    absorbing: usize,
    brk: bool,
    cont: bool,
}

struct Planner {
    kind: BodyKind,
    points: BTreeSet<SyncPoint>,
    syncs: BTreeSet<StmtId>,
    reached_pending: BTreeSet<StmtId>,
    /// Whether some `goto` reaches the label with a pending child.
    labels: HashMap<String, bool>,
    loops: Vec<LoopFrame>,
    absorbing: usize,
    changed: bool,
}

impl Planner {
    fn stmts(&mut self, stmts: &[Stmt], pending: bool) -> bool {
        stmts.iter().fold(pending, |state, stmt| self.stmt(stmt, state))
    }

    fn raise(&mut self, pending: bool, may_raise: bool) {
        if pending && may_raise && self.absorbing == 0 {
            self.points.insert(SyncPoint::FunctionUnwind);
        }
    }

    fn raises(exprs: &[&Expr]) -> bool {
        exprs.iter().any(|e| e.may_raise())
    }

    /// A jump that leaves the scope; returns the state carried to its target.
    fn leave(&mut self, stmt: &Stmt, pending: bool, crosses_try: bool) -> bool {
        if pending && crosses_try {
            self.points.insert(SyncPoint::BeforeStmt(stmt.id));
            false
        } else {
            pending
        }
    }

    fn stmt(&mut self, stmt: &Stmt, pending: bool) -> bool {
        match &stmt.kind {
            StmtKind::Expr(_) | StmtKind::Decl(_) => {
                let spawns = stmt.contains_spawn();
                self.raise(pending, spawns || Self::raises(&stmt.own_exprs()));
                pending || spawns
            }
            StmtKind::Block(stmts) => self.stmts(stmts, pending),
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                self.raise(pending, cond.may_raise());
                let then = self.stmt(then, pending);
                let otherwise = match otherwise {
                    Some(otherwise) => self.stmt(otherwise, pending),
                    None => pending,
                };
                then || otherwise
            }
            StmtKind::While { cond, body } => self.looping(pending, Some(cond), None, body, false),
            StmtKind::DoWhile { body, cond } => self.looping(pending, Some(cond), None, body, true),
            StmtKind::For(for_loop) => {
                let init = match &for_loop.init {
                    Some(ForInit::Decl(decl)) => decl.init.as_ref(),
                    Some(ForInit::Expr(e)) => Some(e),
                    None => None,
                };
                self.raise(pending, init.is_some_and(Expr::may_raise));
                self.looping(
                    pending,
                    for_loop.cond.as_ref(),
                    for_loop.step.as_ref(),
                    &for_loop.body,
                    false,
                )
            }
            // the body runs in its own helper and is fully synced on return
            StmtKind::CilkFor(_) => {
                self.raise(pending, true);
                pending
            }
            StmtKind::Sync => {
                self.syncs.insert(stmt.id);
                if pending {
                    self.reached_pending.insert(stmt.id);
                }
                false
            }
            StmtKind::Return(value) => {
                self.raise(pending, value.as_ref().is_some_and(Expr::may_raise));
                if pending {
                    self.points.insert(SyncPoint::BeforeStmt(stmt.id));
                }
                false
            }
            StmtKind::Throw(_) => {
                if pending {
                    self.points.insert(SyncPoint::BeforeStmt(stmt.id));
                }
                false
            }
            StmtKind::Break | StmtKind::Continue => {
                let is_break = matches!(stmt.kind, StmtKind::Break);
                let absorbing = self.absorbing;
                let Some(frame_absorbing) = self.loops.last().map(|frame| frame.absorbing) else {
                    // leaves the iteration body
                    if pending && self.kind == BodyKind::IterationBody {
                        self.points.insert(SyncPoint::BeforeStmt(stmt.id));
                    }
                    return false;
                };
                let carried = self.leave(stmt, pending, absorbing > frame_absorbing);
                if let Some(frame) = self.loops.last_mut() {
                    if is_break {
                        frame.brk |= carried;
                    } else {
                        frame.cont |= carried;
                    }
                }
                false
            }
            StmtKind::Goto(label) => {
                let carried = self.leave(stmt, pending, self.absorbing > 0);
                let entry = self.labels.entry(label.clone()).or_insert(false);
                if carried && !*entry {
                    *entry = true;
                    self.changed = true;
                }
                false
            }
            StmtKind::Label(label, inner) => {
                let reached = self.labels.get(label).copied().unwrap_or(false);
                self.stmt(inner, pending || reached)
            }
            StmtKind::Try { body, handlers } => {
                let absorbs = block_contains_spawn(body);
                let body_exit = if absorbs {
                    self.points.insert(SyncPoint::TryUnwind(stmt.id));
                    self.absorbing += 1;
                    let exit = self.stmts(body, pending);
                    self.absorbing -= 1;
                    if exit {
                        self.points.insert(SyncPoint::ScopeExit(ScopeRef::Try(stmt.id)));
                    }
                    false
                } else {
                    self.stmts(body, pending)
                };
                let handler_entry = pending && !absorbs;
                handlers.iter().fold(body_exit, |exit, handler| {
                    self.stmts(&handler.body, handler_entry) || exit
                })
            }
            StmtKind::Empty => pending,
        }
    }

    fn looping(
        &mut self,
        entry: bool,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &Stmt,
        body_first: bool,
    ) -> bool {
        let cond_raises = cond.is_some_and(Expr::may_raise);
        let step_raises = step.is_some_and(Expr::may_raise);
        let mut head = entry;
        loop {
            if !body_first {
                self.raise(head, cond_raises);
            }
            self.loops.push(LoopFrame {
                absorbing: self.absorbing,
                brk: false,
                cont: false,
            });
            let out = self.stmt(body, head);
            let frame = self.loops.pop();
            let (brk, cont) = frame.map_or((false, false), |f| (f.brk, f.cont));

            let latch = out || cont;
            self.raise(latch, step_raises);
            if body_first {
                self.raise(latch, cond_raises);
            }
            let next = entry || latch;
            if next == head {
                let exit = if body_first { latch } else { head };
                return exit || brk;
            }
            head = next;
        }
    }
}
