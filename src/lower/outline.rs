use log::debug;

use super::frame;
use super::FunctionLowerer;
use crate::analysis::spawn::{Receiver, SpawnSite};
use crate::analysis::strip_reference;
use crate::lowered::{
    self, CaptureField, CaptureLayout, CaptureMode, CaptureRole, FrameRole, FunctionRole, Op, Resumable,
};
use crate::source::{Expr, ExprKind, Param, Stmt, Type, UnaryOp};

/// Fields of a capture struct, one per name.
#[derive(Debug, Default)]
pub(super) struct Captures {
    pub(super) fields: Vec<CaptureField>,
}

impl Captures {
    pub(super) fn add(&mut self, name: &str, ty: Type, mode: CaptureMode, role: CaptureRole) {
        let ty = Type {
            is_static: false,
            ..ty
        };
        match self.fields.iter_mut().find(|f| f.name == name) {
            // a local both stored to and read by the call is shared
            Some(field) => {
                if mode == CaptureMode::ByReference {
                    field.mode = mode;
                    field.role = role;
                }
            }
            None => self.fields.push(CaptureField {
                name: name.to_string(),
                ty,
                mode,
                role,
            }),
        }
    }
}

impl FunctionLowerer<'_> {
    pub(super) fn spawn(&mut self, stmt: &Stmt, site: SpawnSite<'_>) -> Vec<Op> {
        let (n, helper) = self.namer.spawn();
        let layout = format!("{helper}_ctx");
        let context = format!("__cilk_ctx{n}");
        let mut captures = Captures::default();
        let mut parent = vec![];

        let target = match site.receiver {
            None => None,
            Some(Receiver::Declared(decl)) => {
                // the child constructs the object; the parent never default-builds it
                parent.push(Op::Storage {
                    name: decl.name.clone(),
                    ty: Type {
                        is_static: false,
                        ..decl.ty.clone()
                    },
                });
                captures.add(
                    &decl.name,
                    decl.ty.clone().unqualified(),
                    CaptureMode::ByReference,
                    CaptureRole::Receiver,
                );
                Some(Expr::ident(&decl.name))
            }
            Some(Receiver::Lvalue(lvalue)) => Some(self.receiver(n, lvalue, &mut captures, &mut parent)),
        };

        let Some(callee) = site.callee() else {
            return vec![];
        };
        let sig = self.symbols.callee(callee, &self.scopes).cloned();
        let callee = self.callee(n, callee, &mut captures, &mut parent);

        let mut args = vec![];
        let mut temps = vec![];
        for (k, arg) in site.args().iter().enumerate() {
            let param = sig.as_ref().and_then(|sig| sig.params.get(k));
            let (arg, temp) = self.argument(n, k, arg, param, &mut captures, &mut parent);
            args.push(arg);
            temps.extend(temp);
        }

        let call = Expr::call(callee, args).with_span(site.call.span);
        let action = match (target, site.receiver) {
            (Some(target), Some(Receiver::Declared(decl))) => Op::Construct {
                target,
                ty: decl.ty.clone().unqualified(),
                init: call,
            },
            (Some(target), _) => Op::Expr(Expr::assign(target, call)),
            (None, _) => Op::Expr(call),
        };
        let mut body = vec![
            Op::BindCapture {
                context: "__cilk_ctx".to_string(),
                fields: captures.fields.clone(),
            },
            Op::Detach,
            action,
        ];
        body.extend(temps.into_iter().map(Op::Destroy));

        debug!(
            "'{}': spawn at {}:{} outlined into '{helper}' with {} capture(s)",
            self.function.name,
            stmt.span.line,
            stmt.span.col,
            captures.fields.len()
        );
        self.helpers.push(lowered::Function {
            name: helper.clone(),
            ret: Type::void(),
            params: vec![Param {
                name: Some("__cilk_ctx".to_string()),
                ty: Type::named(&layout).pointer_to(),
            }],
            role: FunctionRole::SpawnHelper {
                parent: self.owner(),
            },
            frame: Some(FrameRole::Helper),
            body: frame::wrap_helper(body),
        });
        self.layouts.push(CaptureLayout {
            name: layout.clone(),
            fields: captures.fields.clone(),
        });

        if let Some(Receiver::Declared(decl)) = site.receiver {
            self.scopes.declare(&decl.name, decl.ty.clone());
        }

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
            Op::Resumable(Resumable::Spawn { helper, context }),
        ]);
        parent
    }

    fn is_local(&self, expr: &Expr) -> Option<(String, Type)> {
        let name = expr.as_ident()?;
        self.scopes.lookup(name).map(|ty| (name.to_string(), ty.clone()))
    }

    /// The expression the helper assigns the result to.
    fn receiver(&mut self, n: usize, lvalue: &Expr, captures: &mut Captures, parent: &mut Vec<Op>) -> Expr {
        if let Some((name, ty)) = self.is_local(lvalue) {
            captures.add(&name, strip_reference(ty), CaptureMode::ByReference, CaptureRole::Receiver);
            return lvalue.clone();
        }
        if lvalue.as_ident().is_some() {
            return lvalue.clone();
        }
        let name = format!("__cilk_recv{n}");
        let ty = self.pointer_type(lvalue);
        parent.push(Op::Let {
            name: name.clone(),
            ty: ty.clone(),
            init: Some(Expr::unary(UnaryOp::AddrOf, lvalue.clone())),
        });
        captures.add(&name, ty, CaptureMode::ByValue, CaptureRole::Receiver);
        Expr::unary(UnaryOp::Deref, Expr::ident(name))
    }

    fn callee(&mut self, n: usize, callee: &Expr, captures: &mut Captures, parent: &mut Vec<Op>) -> Expr {
        match &callee.kind {
            ExprKind::Ident(ident) => {
                if let Some((name, ty)) = self.is_local(callee) {
                    captures.add(&name, strip_reference(ty), CaptureMode::ByValue, CaptureRole::Value);
                    return callee.clone();
                }
                match self.symbols.global(ident).cloned() {
                    // a global function pointer may be reassigned once the parent resumes
                    Some(ty) => callee_temp(n, callee, Type { is_static: false, ..ty }, captures, parent),
                    None => callee.clone(),
                }
            }
            ExprKind::Member { base, arrow, .. } => {
                if let Some((name, ty)) = self.is_local(base) {
                    let mode = if *arrow {
                        CaptureMode::ByValue
                    } else {
                        CaptureMode::ByReference
                    };
                    let role = if *arrow { CaptureRole::Value } else { CaptureRole::Shared };
                    captures.add(&name, strip_reference(ty), mode, role);
                    return callee.clone();
                }
                if base.as_ident().is_some() {
                    return callee.clone();
                }
                let ExprKind::Member { field, .. } = &callee.kind else {
                    return callee.clone();
                };
                let name = format!("__cilk_obj{n}");
                let (ty, init) = if *arrow {
                    (
                        self.scopes
                            .type_of(base, self.symbols)
                            .unwrap_or_else(|| Type::deduced().pointer_to()),
                        base.as_ref().clone(),
                    )
                } else {
                    (
                        self.pointer_type(base),
                        Expr::unary(UnaryOp::AddrOf, base.as_ref().clone()),
                    )
                };
                parent.push(Op::Let {
                    name: name.clone(),
                    ty: ty.clone(),
                    init: Some(init),
                });
                captures.add(&name, ty, CaptureMode::ByValue, CaptureRole::Value);
                Expr::new(ExprKind::Member {
                    base: Box::new(Expr::ident(name)),
                    field: field.clone(),
                    arrow: true,
                })
            }
            _ => {
                let ty = self
                    .scopes
                    .type_of(callee, self.symbols)
                    .map(Type::unqualified)
                    .unwrap_or_else(Type::deduced);
                callee_temp(n, callee, ty, captures, parent)
            }
        }
    }

    /// Rewrites one argument of the spawned call. Returns the argument the
    /// helper passes and, for temporaries, the name the helper destroys.
    fn argument(
        &mut self,
        n: usize,
        k: usize,
        arg: &Expr,
        param: Option<&Type>,
        captures: &mut Captures,
        parent: &mut Vec<Op>,
    ) -> (Expr, Option<String>) {
        let by_reference = param.is_some_and(|p| p.is_reference() && !p.target_is_const());
        if arg.is_literal() {
            return (arg.clone(), None);
        }
        if let Some((name, ty)) = self.is_local(arg) {
            let ty = strip_reference(ty);
            let (mode, role) = if by_reference || ty.array.is_some() {
                (CaptureMode::ByReference, CaptureRole::Shared)
            } else {
                (CaptureMode::ByValue, CaptureRole::Value)
            };
            captures.add(&name, ty, mode, role);
            return (arg.clone(), None);
        }
        // a global scalar passed by value is read before the parent can overwrite it
        if let Some(ident) = arg.as_ident() {
            let mutable_value =
                !by_reference && self.symbols.global(ident).is_some_and(|ty| ty.array.is_none());
            if !mutable_value {
                return (arg.clone(), None);
            }
        }

        let name = format!("__cilk_arg{n}_{k}");
        if by_reference {
            // the callee binds to the parent's object, not to a copy
            let ty = self.pointer_type(arg);
            parent.push(Op::Let {
                name: name.clone(),
                ty: ty.clone(),
                init: Some(Expr::unary(UnaryOp::AddrOf, arg.clone())),
            });
            captures.add(&name, ty, CaptureMode::ByValue, CaptureRole::Value);
            return (Expr::unary(UnaryOp::Deref, Expr::ident(name)), None);
        }

        let ty = match param {
            Some(param) => strip_reference(param.clone()).unqualified(),
            None => self
                .scopes
                .type_of(arg, self.symbols)
                .map(Type::unqualified)
                .unwrap_or_else(|| Type::named(format!("decltype({arg})"))),
        };
        parent.push(Op::Let {
            name: name.clone(),
            ty: ty.clone(),
            init: Some(arg.clone()),
        });
        captures.add(&name, ty, CaptureMode::ByReference, CaptureRole::ArgTemp);
        (Expr::ident(&name), Some(name))
    }

    fn pointer_type(&self, lvalue: &Expr) -> Type {
        match self.scopes.type_of(lvalue, self.symbols) {
            Some(ty) => Type { is_static: false, ..ty }.pointer_to(),
            None => Type::deduced().pointer_to(),
        }
    }
}

/// Evaluates the called function in the parent, before the spawn point.
fn callee_temp(
    n: usize,
    callee: &Expr,
    ty: Type,
    captures: &mut Captures,
    parent: &mut Vec<Op>,
) -> Expr {
    let name = format!("__cilk_fn{n}");
    parent.push(Op::Let {
        name: name.clone(),
        ty: ty.clone(),
        init: Some(callee.clone()),
    });
    captures.add(&name, ty, CaptureMode::ByValue, CaptureRole::Value);
    Expr::ident(name)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::super::tests::lower;
    use crate::lowered::{CaptureMode, CaptureRole, Op};
    use crate::source::ExprKind;

    fn field_names(fields: &[crate::lowered::CaptureField]) -> BTreeSet<String> {
        fields.iter().map(|f| f.name.clone()).collect()
    }

    #[test]
    fn helper_uses_only_captured_locals() {
        let module = lower(
            "int f(int, int, int); int limit; \
             void p(int k, int n) { int a[10]; a[n] = _Cilk_spawn f(k, n + limit, 3); _Cilk_sync; }",
        )
        .unwrap();
        let helper = module.function("__cilk_spawn_p_0").unwrap();
        let layout = module.layout("__cilk_spawn_p_0_ctx").unwrap();

        let mut used = BTreeSet::new();
        helper.visit(&mut |op| {
            if let Op::Expr(expr) = op {
                expr.walk(&mut |e| {
                    if let ExprKind::Ident(name) = &e.kind {
                        used.insert(name.clone());
                    }
                });
            }
        });
        used.remove("f");
        used.remove("limit");
        assert_eq!(used, field_names(&layout.fields));
        assert_eq!(
            field_names(&layout.fields),
            ["__cilk_arg0_1", "__cilk_recv0", "k"].map(String::from).into()
        );
    }

    #[test]
    fn capture_modes_follow_use() {
        let module = lower(
            "int f(int, int &); \
             void p() { int x; int v = 1; int w = 2; x = _Cilk_spawn f(v, w); _Cilk_sync; }",
        )
        .unwrap();
        let layout = module.layout("__cilk_spawn_p_0_ctx").unwrap();
        let mode = |name: &str| {
            let field = layout.fields.iter().find(|f| f.name == name).unwrap();
            (field.mode, field.role)
        };
        assert_eq!(mode("x"), (CaptureMode::ByReference, CaptureRole::Receiver));
        assert_eq!(mode("v"), (CaptureMode::ByValue, CaptureRole::Value));
        assert_eq!(mode("w"), (CaptureMode::ByReference, CaptureRole::Shared));
    }

    #[test]
    fn argument_temporaries_are_destroyed_by_the_child() {
        let module = lower("int g(int); void f(int); void p(int n) { _Cilk_spawn f(g(n)); }").unwrap();
        let parent = module.function("p").unwrap();
        let helper = module.function("__cilk_spawn_p_0").unwrap();

        let mut evaluated_in_parent = false;
        parent.visit(&mut |op| {
            if let Op::Let { name, init: Some(_), .. } = op {
                evaluated_in_parent |= name == "__cilk_arg0_0";
            }
        });
        assert!(evaluated_in_parent);
        assert_eq!(
            helper.count(|op| matches!(op, Op::Destroy(name) if name == "__cilk_arg0_0")),
            1
        );
        assert!(module.verify().is_ok());
    }

    #[test]
    fn declared_receiver_is_visible_after_the_spawn() {
        let module = lower("int g(int); int p(int n) { int x = _Cilk_spawn g(n); _Cilk_sync; return x; }").unwrap();
        let text = module.verify().unwrap().to_string();
        assert!(text.contains("__cilk_ctx0.x = &x;"));
        assert!(text.contains("int &x = *__cilk_ctx->x;"));
        assert!(text.contains("x = g(n);"));
    }

    #[test]
    fn const_class_receiver_is_constructed_by_the_child() {
        let module = lower(
            "Big make(int); int use(const Big &); \
             void p(int n) { const Big b = _Cilk_spawn make(n); _Cilk_sync; use(b); }",
        )
        .unwrap();
        let parent = module.function("p").unwrap();
        let helper = module.function("__cilk_spawn_p_0").unwrap();

        let mut storage = None;
        parent.visit(&mut |op| match op {
            Op::Storage { name, ty } if name == "b" => storage = Some(ty.is_const),
            Op::Let { name, .. } => assert_ne!(name, "b"),
            _ => {}
        });
        assert_eq!(storage, Some(true));
        assert_eq!(
            helper.count(|op| matches!(op, Op::Construct { target, .. } if target.as_ident() == Some("b"))),
            1
        );

        let text = module.verify().unwrap().to_string();
        assert!(text.contains("const Big b; /* storage only"));
        assert!(text.contains("new (&b) Big(make(n));"));
        assert!(!text.contains("b = make(n);"));
    }

    #[test]
    fn global_arguments_are_read_before_the_spawn() {
        let module = lower("int g; void f(int); void p() { _Cilk_spawn f(g); g = 5; _Cilk_sync; }").unwrap();
        let parent = module.function("p").unwrap();
        let helper = module.function("__cilk_spawn_p_0").unwrap();
        let layout = module.layout("__cilk_spawn_p_0_ctx").unwrap();

        let mut snapshot = None;
        parent.visit(&mut |op| {
            if let Op::Let { name, init: Some(init), .. } = op
                && name == "__cilk_arg0_0"
            {
                snapshot = init.as_ident().map(String::from);
            }
        });
        assert_eq!(snapshot.as_deref(), Some("g"));
        assert_eq!(field_names(&layout.fields), ["__cilk_arg0_0"].map(String::from).into());

        let mut reads_global = false;
        helper.visit(&mut |op| {
            if let Op::Expr(expr) = op {
                expr.walk(&mut |e| reads_global |= e.as_ident() == Some("g"));
            }
        });
        assert!(!reads_global);
    }

    #[test]
    fn complex_callee_is_evaluated_by_the_parent() {
        let module = lower("Handler table[4]; void p(int i) { _Cilk_spawn table[i](1); i = 2; _Cilk_sync; }").unwrap();
        let layout = module.layout("__cilk_spawn_p_0_ctx").unwrap();
        assert_eq!(field_names(&layout.fields), ["__cilk_fn0"].map(String::from).into());

        let text = module.verify().unwrap().to_string();
        assert!(text.contains("= table[i];"));
        assert!(text.contains("__cilk_fn0(1);"));
    }
}
