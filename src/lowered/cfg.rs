use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};

use super::{FrameRole, Function, Op, Resumable};
use crate::error::{ValidationError, ValidationErrorKind};
use crate::render::Flow;
use crate::validate::ValidationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    EnterFrame,
    Detach,
    Spawn,
    Sync,
    Epilogue,
}

#[derive(Debug, Clone)]
pub struct CfgNode {
    pub label: String,
    pub effect: Effect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Normal,
    /// Taken when the source node raises; carries the state before the node.
    Raise,
    Jump,
}

impl Edge {
    pub fn name(self) -> &'static str {
        match self {
            Edge::Normal => "",
            Edge::Raise => "raise",
            Edge::Jump => "jump",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Return,
    FallThrough,
    Raise,
}

#[derive(Debug)]
pub struct Cfg {
    pub graph: DiGraph<CfgNode, Edge>,
    pub entry: NodeIndex,
    pub exits: Vec<(ExitKind, NodeIndex)>,
}

impl Cfg {
    pub fn build(function: &Function) -> ValidationResult<Cfg> {
        let mut graph = DiGraph::new();
        let mut plain = |label: &str| {
            graph.add_node(CfgNode {
                label: label.to_string(),
                effect: Effect::None,
            })
        };
        let entry = plain("entry");
        let return_exit = plain("return");
        let fall_exit = plain("exit");
        let raise_exit = plain("unwind");

        let mut builder = Builder {
            function: &function.name,
            graph,
            labels: HashMap::new(),
            loops: vec![],
            raise_to: vec![raise_exit],
            return_exit,
            errors: vec![],
        };
        for op in &function.body {
            op.visit(&mut |op| {
                if let Op::Label(name) = op {
                    let node = builder.graph.add_node(CfgNode {
                        label: format!("{name}:"),
                        effect: Effect::None,
                    });
                    builder.labels.entry(name.as_str()).or_insert(node);
                }
            });
        }

        let end = builder.ops(&function.body, Some(entry));
        builder.link(end, fall_exit);

        if !builder.errors.is_empty() {
            return Err(builder.errors);
        }
        Ok(Cfg {
            graph: builder.graph,
            entry,
            exits: vec![
                (ExitKind::Return, return_exit),
                (ExitKind::FallThrough, fall_exit),
                (ExitKind::Raise, raise_exit),
            ],
        })
    }

    /// The graph with text labels, ready for DOT export.
    pub fn to_flow(&self) -> Flow {
        self.graph
            .map(|_, node| node.label.clone(), |_, edge| edge.name())
    }
}

struct Builder<'a> {
    function: &'a str,
    graph: DiGraph<CfgNode, Edge>,
    labels: HashMap<&'a str, NodeIndex>,
    /// `continue` and `break` targets of the enclosing loops.
    loops: Vec<(NodeIndex, NodeIndex)>,
    raise_to: Vec<NodeIndex>,
    return_exit: NodeIndex,
    errors: Vec<ValidationError>,
}

impl<'a> Builder<'a> {
    fn raise_target(&self) -> Option<NodeIndex> {
        self.raise_to.last().copied()
    }

    fn node(&mut self, label: String, effect: Effect, raises: bool) -> NodeIndex {
        let node = self.graph.add_node(CfgNode { label, effect });
        if raises && let Some(target) = self.raise_target() {
            self.graph.add_edge(node, target, Edge::Raise);
        }
        node
    }

    fn link(&mut self, from: Option<NodeIndex>, to: NodeIndex) {
        if let Some(from) = from {
            self.graph.add_edge(from, to, Edge::Normal);
        }
    }

    fn step(&mut self, cur: Option<NodeIndex>, label: String, effect: Effect, raises: bool) -> Option<NodeIndex> {
        let node = self.node(label, effect, raises);
        self.link(cur, node);
        Some(node)
    }

    /// A node control never falls out of.
    fn terminal(&mut self, cur: Option<NodeIndex>, label: String, raises: bool) -> NodeIndex {
        let node = self.node(label, Effect::None, raises);
        self.link(cur, node);
        node
    }

    fn join(&mut self, label: &str, ends: &[Option<NodeIndex>]) -> Option<NodeIndex> {
        if ends.iter().all(Option::is_none) {
            return None;
        }
        let join = self.node(label.to_string(), Effect::None, false);
        for end in ends {
            self.link(*end, join);
        }
        Some(join)
    }

    fn ops(&mut self, ops: &'a [Op], cur: Option<NodeIndex>) -> Option<NodeIndex> {
        ops.iter().fold(cur, |cur, op| self.op(op, cur))
    }

    fn looping(&mut self, head: NodeIndex, next: NodeIndex, exit: NodeIndex, body: &'a [Op]) {
        self.graph.add_edge(head, exit, Edge::Normal);
        self.loops.push((next, exit));
        let end = self.ops(body, Some(head));
        self.loops.pop();
        self.link(end, next);
    }

    fn op(&mut self, op: &'a Op, cur: Option<NodeIndex>) -> Option<NodeIndex> {
        match op {
            Op::Expr(expr) => self.step(cur, expr.to_string(), Effect::None, expr.may_raise()),
            Op::Let { name, ty, init } => {
                let raises = init.as_ref().is_some_and(|e| e.may_raise());
                self.step(cur, ty.declare(name), Effect::None, raises)
            }
            Op::Storage { name, ty } => {
                self.step(cur, format!("storage {}", ty.declare(name)), Effect::None, false)
            }
            Op::Construct { target, init, .. } => {
                self.step(cur, format!("construct {target}"), Effect::None, init.may_raise())
            }
            Op::Block(ops) => self.ops(ops, cur),
            Op::If {
                cond,
                then,
                otherwise,
            } => {
                let test = self.node(format!("if ({cond})"), Effect::None, cond.may_raise());
                self.link(cur, test);
                let then_end = self.ops(then, Some(test));
                let else_end = self.ops(otherwise, Some(test));
                self.join("end if", &[then_end, else_end])
            }
            Op::While { cond, body } => {
                let head = self.node(format!("while ({cond})"), Effect::None, cond.may_raise());
                self.link(cur, head);
                let exit = self.node("end while".to_string(), Effect::None, false);
                self.looping(head, head, exit, body);
                Some(exit)
            }
            Op::DoWhile { body, cond } => {
                let start = self.node("do".to_string(), Effect::None, false);
                self.link(cur, start);
                let test = self.node(format!("while ({cond})"), Effect::None, cond.may_raise());
                let exit = self.node("end do".to_string(), Effect::None, false);
                self.loops.push((test, exit));
                let end = self.ops(body, Some(start));
                self.loops.pop();
                self.link(end, test);
                self.graph.add_edge(test, start, Edge::Normal);
                self.graph.add_edge(test, exit, Edge::Normal);
                Some(exit)
            }
            Op::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                let cur = match init {
                    Some(init) => self.op(init, cur),
                    None => cur,
                };
                let cond_text = cond.as_ref().map(ToString::to_string).unwrap_or_default();
                let head = self.node(
                    format!("for ({cond_text})"),
                    Effect::None,
                    cond.as_ref().is_some_and(|c| c.may_raise()),
                );
                self.link(cur, head);
                let step_text = step.as_ref().map(ToString::to_string).unwrap_or_default();
                let next = self.node(step_text, Effect::None, step.as_ref().is_some_and(|s| s.may_raise()));
                self.graph.add_edge(next, head, Edge::Normal);
                let exit = self.node("end for".to_string(), Effect::None, false);
                self.looping(head, next, exit, body);
                Some(exit)
            }
            Op::Try { body, handlers } => {
                let dispatch = self.graph.add_node(CfgNode {
                    label: "catch".to_string(),
                    effect: Effect::None,
                });
                let catch_all = handlers.iter().any(|h| h.param.is_none());
                if !catch_all && let Some(outer) = self.raise_target() {
                    self.graph.add_edge(dispatch, outer, Edge::Raise);
                }
                self.raise_to.push(dispatch);
                let mut ends = vec![self.ops(body, cur)];
                self.raise_to.pop();
                for handler in handlers {
                    ends.push(self.ops(&handler.body, Some(dispatch)));
                }
                self.join("end try", &ends)
            }
            Op::Unwind { body, landing } => {
                let pad = self.graph.add_node(CfgNode {
                    label: "landing pad".to_string(),
                    effect: Effect::None,
                });
                self.raise_to.push(pad);
                let body_end = self.ops(body, cur);
                self.raise_to.pop();
                let landing_end = self.ops(landing, Some(pad));
                self.join("end unwind", &[body_end, landing_end])
            }
            Op::Label(name) => {
                let node = self.labels.get(name.as_str()).copied()?;
                self.link(cur, node);
                Some(node)
            }
            Op::Goto(name) => {
                let node = self.terminal(cur, format!("goto {name}"), false);
                match self.labels.get(name.as_str()) {
                    Some(&target) => {
                        self.graph.add_edge(node, target, Edge::Jump);
                    }
                    None => self.errors.push(ValidationError::new(
                        ValidationErrorKind::UnresolvedLabel,
                        format!("'{}': goto to undefined label '{name}'", self.function),
                    )),
                }
                None
            }
            Op::Break | Op::Continue => {
                let is_break = matches!(op, Op::Break);
                let node = self.terminal(cur, if is_break { "break" } else { "continue" }.to_string(), false);
                if let Some(&(next, exit)) = self.loops.last() {
                    let target = if is_break { exit } else { next };
                    self.graph.add_edge(node, target, Edge::Jump);
                }
                None
            }
            Op::Return(value) => {
                let label = match value {
                    Some(value) => format!("return {value}"),
                    None => "return".to_string(),
                };
                let raises = value.as_ref().is_some_and(|v| v.may_raise());
                let node = self.terminal(cur, label, raises);
                self.graph.add_edge(node, self.return_exit, Edge::Normal);
                None
            }
            Op::Throw(_) | Op::Resume => {
                let label = match op {
                    Op::Throw(Some(value)) => format!("throw {value}"),
                    _ => "throw".to_string(),
                };
                self.terminal(cur, label, true);
                None
            }
            Op::EnterFrame(role) => {
                self.step(cur, format!("enter frame ({})", role_name(*role)), Effect::EnterFrame, false)
            }
            Op::Detach => self.step(cur, "detach".to_string(), Effect::Detach, false),
            Op::Resumable(Resumable::Spawn { helper, .. }) => {
                self.step(cur, format!("spawn {helper}"), Effect::Spawn, true)
            }
            Op::Resumable(Resumable::Sync) => self.step(cur, "sync".to_string(), Effect::Sync, false),
            Op::Epilogue(role) => {
                self.step(cur, format!("epilogue ({})", role_name(*role)), Effect::Epilogue, false)
            }
            Op::InitCapture { context, .. } => {
                self.step(cur, format!("capture {context}"), Effect::None, false)
            }
            Op::BindCapture { context, .. } => {
                self.step(cur, format!("bind {context}"), Effect::None, false)
            }
            Op::ParallelFor { helper, count, .. } => {
                self.step(cur, format!("cilk_for {helper} x {count}"), Effect::None, true)
            }
            Op::Destroy(name) => self.step(cur, format!("destroy {name}"), Effect::None, false),
        }
    }
}

fn role_name(role: FrameRole) -> &'static str {
    match role {
        FrameRole::Parent => "parent",
        FrameRole::Helper => "helper",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lowered::FunctionRole;
    use crate::source::{Expr, Type};

    fn function(body: Vec<Op>) -> Function {
        Function {
            name: "f".to_string(),
            ret: Type::void(),
            params: vec![],
            role: FunctionRole::Source,
            frame: None,
            body,
        }
    }

    #[test]
    fn raising_ops_reach_the_landing_pad() {
        let call = Expr::call(Expr::ident("g"), vec![]);
        let cfg = Cfg::build(&function(vec![Op::Unwind {
            body: vec![Op::Expr(call)],
            landing: vec![Op::Resume],
        }]))
        .unwrap();
        let raises = cfg
            .graph
            .edge_indices()
            .filter(|&e| cfg.graph[e] == Edge::Raise)
            .count();
        // the call into the pad, the re-raise out of the function
        assert_eq!(raises, 2);
    }

    #[test]
    fn unresolved_goto_is_reported() {
        let errors = Cfg::build(&function(vec![Op::Goto("nowhere".to_string())])).unwrap_err();
        assert_eq!(errors[0].kind, ValidationErrorKind::UnresolvedLabel);
    }

    #[test]
    fn flow_keeps_labels() {
        let cfg = Cfg::build(&function(vec![
            Op::Label("top".to_string()),
            Op::Expr(Expr::ident("x")),
            Op::Goto("top".to_string()),
        ]))
        .unwrap();
        let flow = cfg.to_flow();
        assert!(flow.node_weights().any(|label| label == "top:"));
        assert!(flow.edge_weights().any(|edge| *edge == "jump"));
    }
}
