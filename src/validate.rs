use std::collections::VecDeque;

use log::{debug, info};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;

use crate::error::{ValidationError, ValidationErrorKind};
use crate::lowered::cfg::{Cfg, Edge, Effect, ExitKind};
use crate::lowered::{Function, Module, Unverified, Verified};

pub type ValidationResult<T = ()> = Result<T, Vec<ValidationError>>;

impl Module<Unverified> {
    /// Checks the frame protocol of every function: exactly one epilogue on
    /// every exit of a function that owns a frame, no epilogue reached while a
    /// child may be outstanding, and no protocol ops outside a frame.
    pub fn verify(self) -> ValidationResult<Module<Verified>> {
        let mut errors = vec![];
        for function in &self.functions {
            if let Err(found) = verify_function(function) {
                errors.extend(found);
            }
        }

        if errors.is_empty() {
            info!("verified {} lowered function(s)", self.functions.len());
            Ok(self.retag())
        } else {
            Err(errors)
        }
    }
}

pub fn verify_function(function: &Function) -> ValidationResult {
    let mut errors = vec![];

    if function.frame.is_none()
        && let Err(missing) = check_frameless(function)
    {
        errors.extend(missing);
    }

    let cfg = Cfg::build(function)?;
    let states = flow(&cfg);

    if let Err(unsynced) = check_unsynced_epilogues(function, &cfg, &states) {
        errors.extend(unsynced);
    }
    if let Err(counts) = check_exit_counts(function, &cfg, &states) {
        errors.extend(counts);
    }

    debug!(
        "'{}': {} cfg node(s), {} error(s)",
        function.name,
        cfg.graph.node_count(),
        errors.len()
    );
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

const ZERO: u8 = 0b001;
const ONE: u8 = 0b010;
const MANY: u8 = 0b100;

/// Epilogues run so far (a set over {0, 1, 2+}) and whether a spawned child
/// may still be outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct State {
    epilogues: u8,
    pending: bool,
}

impl State {
    const ENTRY: State = State {
        epilogues: ZERO,
        pending: false,
    };

    fn join(self, other: State) -> State {
        State {
            epilogues: self.epilogues | other.epilogues,
            pending: self.pending || other.pending,
        }
    }

    fn after(self, effect: Effect) -> State {
        match effect {
            Effect::Spawn => State {
                pending: true,
                ..self
            },
            Effect::Sync => State {
                pending: false,
                ..self
            },
            Effect::Epilogue => {
                let mut epilogues = 0;
                if self.epilogues & ZERO != 0 {
                    epilogues |= ONE;
                }
                if self.epilogues & (ONE | MANY) != 0 {
                    epilogues |= MANY;
                }
                State { epilogues, ..self }
            }
            Effect::None | Effect::EnterFrame | Effect::Detach => self,
        }
    }
}

/// Forward dataflow to a fixpoint. `None` marks unreachable nodes.
fn flow(cfg: &Cfg) -> Vec<Option<State>> {
    let mut states = vec![None; cfg.graph.node_count()];
    states[cfg.entry.index()] = Some(State::ENTRY);
    let mut work = VecDeque::from([cfg.entry]);

    while let Some(node) = work.pop_front() {
        let Some(before) = states[node.index()] else {
            continue;
        };
        let after = before.after(cfg.graph[node].effect);
        for edge in cfg.graph.edges(node) {
            let carried = match edge.weight() {
                Edge::Raise => before,
                Edge::Normal | Edge::Jump => after,
            };
            let target: NodeIndex = edge.target();
            let merged = match states[target.index()] {
                Some(state) => state.join(carried),
                None => carried,
            };
            if states[target.index()] != Some(merged) {
                states[target.index()] = Some(merged);
                work.push_back(target);
            }
        }
    }
    states
}

fn check_frameless(function: &Function) -> ValidationResult {
    let protocol = function.count(|op| op.is_protocol());
    if protocol == 0 {
        return Ok(());
    }
    Err(vec![ValidationError::new(
        ValidationErrorKind::MissingFrame,
        format!(
            "'{}' has {protocol} frame protocol op(s) but owns no frame",
            function.name
        ),
    )])
}

fn check_unsynced_epilogues(function: &Function, cfg: &Cfg, states: &[Option<State>]) -> ValidationResult {
    let errors: Vec<_> = cfg
        .graph
        .node_indices()
        .filter(|&node| cfg.graph[node].effect == Effect::Epilogue)
        .filter(|node| states[node.index()].is_some_and(|s| s.pending))
        .map(|node| {
            ValidationError::new(
                ValidationErrorKind::UnsyncedExit,
                format!(
                    "'{}': {} may run with a spawned child outstanding",
                    function.name, cfg.graph[node].label
                ),
            )
        })
        .collect();
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn check_exit_counts(function: &Function, cfg: &Cfg, states: &[Option<State>]) -> ValidationResult {
    let mut errors = vec![];
    for &(kind, exit) in &cfg.exits {
        let Some(state) = states[exit.index()] else {
            continue;
        };
        let path = match kind {
            ExitKind::Return => "a return",
            ExitKind::FallThrough => "the end of the body",
            ExitKind::Raise => "an exceptional exit",
        };
        if function.frame.is_none() {
            if state.epilogues != ZERO {
                errors.push(ValidationError::new(
                    ValidationErrorKind::MissingFrame,
                    format!("'{}': epilogue on {path} of a function without a frame", function.name),
                ));
            }
            continue;
        }
        if state.epilogues & ZERO != 0 {
            errors.push(ValidationError::new(
                ValidationErrorKind::MissingEpilogue,
                format!("'{}': {path} can be reached without an epilogue", function.name),
            ));
        }
        if state.epilogues & MANY != 0 {
            errors.push(ValidationError::new(
                ValidationErrorKind::DuplicateEpilogue,
                format!("'{}': {path} can be reached after more than one epilogue", function.name),
            ));
        }
    }
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lowered::{FrameRole, FunctionRole, Op, Resumable};
    use crate::source::{Expr, Type};

    fn framed(body: Vec<Op>) -> Function {
        Function {
            name: "f".to_string(),
            ret: Type::void(),
            params: vec![],
            role: FunctionRole::Source,
            frame: Some(FrameRole::Parent),
            body,
        }
    }

    fn spawn() -> Op {
        Op::Resumable(Resumable::Spawn {
            helper: "h".to_string(),
            context: "ctx".to_string(),
        })
    }

    fn parent(body: Vec<Op>, landing_sync: bool) -> Vec<Op> {
        let mut landing = vec![];
        if landing_sync {
            landing.push(Op::sync());
        }
        landing.extend([Op::Epilogue(FrameRole::Parent), Op::Resume]);
        vec![
            Op::EnterFrame(FrameRole::Parent),
            Op::Unwind { body, landing },
            Op::Epilogue(FrameRole::Parent),
        ]
    }

    fn kinds(result: ValidationResult) -> Vec<ValidationErrorKind> {
        result.err().unwrap_or_default().into_iter().map(|e| e.kind).collect()
    }

    #[test]
    fn well_formed_parent() {
        let body = parent(vec![spawn(), Op::Expr(Expr::ident("x")), Op::sync()], true);
        assert!(verify_function(&framed(body)).is_ok());
    }

    #[test]
    fn return_without_epilogue() {
        let body = parent(vec![spawn(), Op::sync(), Op::Return(None)], true);
        assert_eq!(
            kinds(verify_function(&framed(body))),
            vec![ValidationErrorKind::MissingEpilogue]
        );
    }

    #[test]
    fn duplicate_epilogue() {
        let body = vec![
            Op::EnterFrame(FrameRole::Parent),
            Op::Epilogue(FrameRole::Parent),
            Op::Epilogue(FrameRole::Parent),
        ];
        assert_eq!(
            kinds(verify_function(&framed(body))),
            vec![ValidationErrorKind::DuplicateEpilogue]
        );
    }

    #[test]
    fn epilogue_with_outstanding_child() {
        let body = parent(vec![spawn()], false);
        let found = kinds(verify_function(&framed(body)));
        assert!(!found.is_empty());
        assert!(found.iter().all(|k| *k == ValidationErrorKind::UnsyncedExit));
    }

    #[test]
    fn raise_while_pending_needs_a_landing_sync() {
        let call = Op::Expr(Expr::call(Expr::ident("g"), vec![]));
        let body = parent(vec![spawn(), call.clone(), Op::sync()], false);
        assert_eq!(
            kinds(verify_function(&framed(body))),
            vec![ValidationErrorKind::UnsyncedExit]
        );
        let body = parent(vec![spawn(), call, Op::sync()], true);
        assert!(verify_function(&framed(body)).is_ok());
    }

    #[test]
    fn protocol_without_frame() {
        let mut function = framed(vec![Op::sync()]);
        function.frame = None;
        assert_eq!(
            kinds(verify_function(&function)),
            vec![ValidationErrorKind::MissingFrame]
        );
    }

    #[test]
    fn unresolved_label() {
        let mut function = framed(vec![Op::Goto("out".to_string())]);
        function.frame = None;
        assert_eq!(
            kinds(verify_function(&function)),
            vec![ValidationErrorKind::UnresolvedLabel]
        );
    }
}
