use std::slice;

use log::debug;

use super::{BodyContext, FunctionLowerer, frame, outline::Captures};
use crate::analysis::bounds::{self, Stride, const_eval};
use crate::analysis::sync::{self, BodyKind, ScopeRef, SyncPoint};
use crate::analysis::{Scopes, control_var};
use crate::error::{Diagnostic, DiagnosticKind};
use crate::lowered::{
    self, CaptureLayout, CaptureMode, CaptureRole, FrameRole, FunctionRole, LoopMetadata, Op,
};
use crate::source::{BinaryOp, CilkFor, Expr, ExprKind, Param, Scalar, StepOp, Stmt, Type};

const INDEX: &str = "__cilk_index";
const LOW: &str = "__cilk_low";
const HIGH: &str = "__cilk_high";

impl FunctionLowerer<'_> {
    pub(super) fn cilk_for(&mut self, stmt: &Stmt, cilk_for: &CilkFor) -> Vec<Op> {
        let analysis = match bounds::analyze(cilk_for, &self.scopes, self.symbols) {
            Ok(analysis) => analysis,
            Err(diagnostic) => {
                self.report(diagnostic, stmt);
                return vec![];
            }
        };
        for warning in analysis.warnings {
            self.report(warning, stmt);
        }
        let bounds = analysis.bounds;
        self.check_grainsize(stmt, cilk_for);

        let mut body_scopes = self.scopes.clone();
        body_scopes.push();
        body_scopes.declare(&bounds.var, bounds.var_ty.clone());
        for diagnostic in control_var::check(&cilk_for.body, &bounds.var, &body_scopes, self.symbols) {
            self.report(diagnostic, stmt);
        }

        let (n, helper) = self.namer.cilk_for();
        let layout = format!("{helper}_ctx");
        let context = format!("__cilk_loop{n}");
        let begin = format!("__cilk_begin{n}");
        let count = format!("__cilk_count{n}");
        let grain = format!("__cilk_grain{n}");
        let var_ty = bounds.var_ty.clone().unqualified();

        let mut parent = vec![Op::Let {
            name: begin.clone(),
            ty: var_ty.clone(),
            init: Some(bounds.first.clone()),
        }];
        let limit = if bounds.limit.is_literal() {
            bounds.limit.clone()
        } else {
            let end = format!("__cilk_end{n}");
            let ty = self
                .scopes
                .type_of(&bounds.limit, self.symbols)
                .map(Type::unqualified)
                .unwrap_or_else(Type::deduced);
            parent.push(Op::Let {
                name: end.clone(),
                ty,
                init: Some(bounds.limit.clone()),
            });
            Expr::ident(end)
        };
        let stride = match &bounds.stride {
            Stride::Dynamic(amount) => {
                let name = format!("__cilk_stride{n}");
                parent.push(Op::Let {
                    name: name.clone(),
                    ty: Type::int(Scalar::Long, true),
                    init: Some(amount.clone()),
                });
                Some(name)
            }
            Stride::Const(_) => None,
        };
        parent.push(Op::Let {
            name: count.clone(),
            ty: bounds.count_ty.clone(),
            init: Some(bounds.trip_count(
                Expr::ident(&begin),
                limit,
                stride.as_ref().map(Expr::ident),
            )),
        });
        parent.push(Op::Let {
            name: grain.clone(),
            ty: Type::int(Scalar::Int, true),
            init: Some(cilk_for.grainsize.clone().unwrap_or_else(|| Expr::int(0))),
        });

        let mut captures = Captures::default();
        captures.add(&begin, var_ty.clone(), CaptureMode::ByValue, CaptureRole::Value);
        if let Some(stride) = &stride {
            captures.add(stride, Type::int(Scalar::Long, true), CaptureMode::ByValue, CaptureRole::Value);
        }
        for (name, ty) in self.scopes.free_locals_in(&cilk_for.body, &[bounds.var.as_str()]) {
            let ty = crate::analysis::strip_reference(ty);
            if self.control_vars.contains(&name) {
                captures.add(&name, ty, CaptureMode::ByValue, CaptureRole::Value);
            } else {
                captures.add(&name, ty, CaptureMode::ByReference, CaptureRole::Shared);
            }
        }

        // the body sees the captures and its control variable, nothing else
        let mut scopes = Scopes::new();
        for field in &captures.fields {
            scopes.declare(&field.name, field.ty.clone());
        }
        scopes.push();
        scopes.declare(&bounds.var, bounds.var_ty.clone());
        let outer_scopes = std::mem::replace(&mut self.scopes, scopes);

        let owner = self.owner();
        let plan = sync::plan(
            slice::from_ref(&cilk_for.body),
            BodyKind::IterationBody,
            self.options.elide_redundant_sync,
        );
        let access_group = self.options.parallel_metadata.then(|| helper.clone());
        self.contexts.push(BodyContext::new(
            plan,
            BodyKind::IterationBody,
            helper.clone(),
            access_group.clone(),
            slice::from_ref(&cilk_for.body),
        ));
        self.control_vars.push(bounds.var.clone());
        let body = self.nested(&cilk_for.body);
        self.control_vars.pop();
        let body_context = self.contexts.pop();
        self.scopes = outer_scopes;

        let mut iteration = vec![Op::Let {
            name: bounds.var.clone(),
            ty: var_ty,
            init: Some(bounds.control_value(
                Expr::ident(&begin),
                Expr::ident(INDEX),
                stride.as_ref().map(Expr::ident),
            )),
        }];
        iteration.extend(body);
        let framed = body_context.as_ref().is_some_and(BodyContext::framed);
        if body_context
            .as_ref()
            .is_some_and(|c| c.plan.has(SyncPoint::ScopeExit(ScopeRef::Function)))
        {
            iteration.push(Op::sync());
        }

        let index_loop = Op::For {
            init: Some(Box::new(Op::Let {
                name: INDEX.to_string(),
                ty: bounds.count_ty.clone(),
                init: Some(Expr::ident(LOW)),
            })),
            cond: Some(Expr::binary(BinaryOp::Lt, Expr::ident(INDEX), Expr::ident(HIGH))),
            step: Some(Expr::new(ExprKind::Step {
                op: StepOp::Inc,
                prefix: true,
                target: Box::new(Expr::ident(INDEX)),
            })),
            body: iteration,
            metadata: LoopMetadata {
                parallel_access: access_group,
                simd: None,
            },
        };
        let helper_body = vec![
            Op::BindCapture {
                context: "__cilk_ctx".to_string(),
                fields: captures.fields.clone(),
            },
            index_loop,
        ];
        let (helper_body, frame) = match &body_context {
            Some(context) if framed => (
                frame::wrap_parent(helper_body, &context.plan, false),
                Some(FrameRole::Parent),
            ),
            _ => (helper_body, None),
        };

        debug!(
            "'{}': _Cilk_for over '{}' outlined into '{helper}' ({:?} count, {} capture(s))",
            self.function.name,
            bounds.var,
            bounds.width,
            captures.fields.len()
        );
        self.helpers.push(lowered::Function {
            name: helper.clone(),
            ret: Type::void(),
            params: vec![
                Param {
                    name: Some("__cilk_ctx".to_string()),
                    ty: Type::named(&layout).pointer_to(),
                },
                Param {
                    name: Some(LOW.to_string()),
                    ty: bounds.count_ty.clone(),
                },
                Param {
                    name: Some(HIGH.to_string()),
                    ty: bounds.count_ty.clone(),
                },
            ],
            role: FunctionRole::ForBody { parent: owner },
            frame,
            body: helper_body,
        });
        self.layouts.push(CaptureLayout {
            name: layout.clone(),
            fields: captures.fields.clone(),
        });

        parent.extend([
            Op::Let {
                name: context.clone(),
                ty: Type::named(layout),
                init: None,
            },
            Op::InitCapture {
                context: context.clone(),
                fields: captures.fields,
            },
            Op::ParallelFor {
                width: bounds.width,
                helper,
                context,
                count,
                grain,
            },
        ]);
        vec![Op::Block(parent)]
    }

    fn check_grainsize(&mut self, stmt: &Stmt, cilk_for: &CilkFor) {
        let Some(grain) = &cilk_for.grainsize else {
            return;
        };
        if self
            .scopes
            .type_of(grain, self.symbols)
            .is_some_and(|ty| ty.is_pointer())
        {
            let message = format!("grainsize '{grain}' must be an integer, not a pointer");
            self.report(Diagnostic::error(DiagnosticKind::InvalidGrainsize, message), stmt);
        } else if const_eval(grain).is_some_and(|value| value < 0) {
            let message = format!("negative grainsize '{grain}'; the runtime picks one instead");
            self.report(Diagnostic::warning(DiagnosticKind::NegativeGrainsize, message), stmt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{lower, rejected};
    use super::*;
    use crate::analysis::bounds::Width;
    use crate::error::Error;
    use crate::lowered::Resumable;

    #[test]
    fn loop_is_handed_to_the_runtime() {
        let module = lower("void body(int); void f(int n) { _Cilk_for (int i = 0; i < n; ++i) body(i); }").unwrap();
        let f = module.function("f").unwrap();
        assert_eq!(f.frame, None);
        assert_eq!(
            f.count(|op| matches!(op, Op::ParallelFor { width: Width::W32, helper, .. } if helper == "__cilk_for_f_0")),
            1
        );

        let helper = module.function("__cilk_for_f_0").unwrap();
        assert_eq!(helper.frame, None);
        assert_eq!(helper.params.len(), 3);
        let mut metadata = None;
        helper.visit(&mut |op| {
            if let Op::For { metadata: m, .. } = op {
                metadata = Some(m.clone());
            }
        });
        assert_eq!(metadata.unwrap().parallel_access.as_deref(), Some("__cilk_for_f_0"));

        let layout = module.layout("__cilk_for_f_0_ctx").unwrap();
        let names: Vec<_> = layout.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["__cilk_begin0"]);
        assert!(module.verify().is_ok());
    }

    #[test]
    fn nested_loops_with_a_spawn() {
        let module = lower(
            "int g(int); \
             void f(int n, int *out) { \
               _Cilk_for (int i = 0; i < n; ++i) { \
                 _Cilk_for (long j = 0; j < n; j++) { \
                   out[i * n + j] = _Cilk_spawn g(i); \
                 } \
               } \
             }",
        )
        .unwrap();
        let outer = module.function("__cilk_for_f_0").unwrap();
        let inner = module.function("__cilk_for_f_1").unwrap();
        let spawn = module.function("__cilk_spawn_f_0").unwrap();

        assert_eq!(outer.role, FunctionRole::ForBody { parent: "f".into() });
        assert_eq!(inner.role, FunctionRole::ForBody { parent: "__cilk_for_f_0".into() });
        assert_eq!(spawn.role, FunctionRole::SpawnHelper { parent: "__cilk_for_f_1".into() });
        assert_eq!(outer.frame, None);
        assert_eq!(inner.frame, Some(FrameRole::Parent));
        assert_eq!(
            inner.count(|op| matches!(op, Op::ParallelFor { .. })),
            0
        );
        assert_eq!(
            outer.count(|op| matches!(op, Op::ParallelFor { width: Width::W64, .. })),
            1
        );
        // each iteration waits for its own child
        assert_eq!(
            inner.count(|op| matches!(op, Op::Resumable(Resumable::Sync))),
            1
        );

        let layout = module.layout("__cilk_for_f_1_ctx").unwrap();
        let mode = |name: &str| layout.fields.iter().find(|f| f.name == name).map(|f| f.mode);
        assert_eq!(mode("i"), Some(CaptureMode::ByValue));
        assert_eq!(mode("n"), Some(CaptureMode::ByReference));
        assert_eq!(mode("out"), Some(CaptureMode::ByReference));

        let order: Vec<_> = module.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(order, vec!["__cilk_spawn_f_0", "__cilk_for_f_1", "__cilk_for_f_0", "f"]);
        assert!(module.verify().is_ok());
    }

    #[test]
    fn jumps_out_of_the_body_are_rejected() {
        let kinds = rejected(
            "int f(int n) { \
               _Cilk_for (int i = 0; i < n; i++) { if (i == 3) break; if (i == 4) return 1; } \
               _Cilk_for (int i = 0; i < n; i++) { while (i) { break; } if (i) goto out; } \
               out: return 0; \
             }",
        );
        assert_eq!(
            kinds,
            vec![
                DiagnosticKind::JumpOutOfParallelLoop,
                DiagnosticKind::JumpOutOfParallelLoop,
                DiagnosticKind::JumpOutOfParallelLoop,
            ]
        );
    }

    #[test]
    fn modified_control_variable_is_rejected() {
        let kinds = rejected("void f(int n) { _Cilk_for (int i = 0; i < n; i++) { i = i + 1; } }");
        assert_eq!(kinds, vec![DiagnosticKind::ControlVariableModified]);
    }

    #[test]
    fn grainsize_checks() {
        assert_eq!(
            rejected("void f(int n, int *p) { #pragma cilk grainsize = p\n _Cilk_for (int i = 0; i < n; i++) {} }"),
            vec![DiagnosticKind::InvalidGrainsize]
        );

        let module = lower("void f(int n) { #pragma cilk grainsize = -2\n _Cilk_for (int i = 0; i < n; i++) {} }").unwrap();
        assert_eq!(module.warnings.len(), 1);
        assert_eq!(module.warnings[0].kind, DiagnosticKind::NegativeGrainsize);
    }

    #[test]
    fn header_errors_are_reported() {
        match lower("void f(int n) { int i; _Cilk_for (i = 0; i < n; i++) {} }") {
            Err(Error::Rejected(diagnostics)) => {
                assert_eq!(diagnostics[0].kind, DiagnosticKind::InvalidControlVariable);
                assert_eq!(diagnostics[0].function, "f");
            }
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[test]
    fn metadata_can_be_turned_off() {
        use crate::lower::{LowerOptions, lower_unit};
        use crate::source::parse;

        let unit = parse("void f(int n) { _Cilk_for (int i = 0; i < n; i++) {} }").unwrap();
        let options = LowerOptions {
            parallel_metadata: false,
            ..LowerOptions::default()
        };
        let module = lower_unit(&unit, &options).unwrap();
        let helper = module.function("__cilk_for_f_0").unwrap();
        let mut tagged = false;
        helper.visit(&mut |op| {
            if let Op::For { metadata, .. } = op {
                tagged |= metadata.parallel_access.is_some();
            }
        });
        assert!(!tagged);
    }
}
