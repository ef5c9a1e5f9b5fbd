use std::fmt;

use super::{CaptureField, CaptureMode, FrameRole, Function, Module, Op, Resumable};
use crate::abi;
use crate::analysis::bounds::Width;
use crate::source::Param;

const INDENT: &str = "    ";

impl<S> fmt::Display for Module<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for prototype in &self.prototypes {
            let qualifier = if prototype.is_const { " const" } else { "" };
            writeln!(
                f,
                "{}({}){qualifier};",
                prototype.ret.declare(&prototype.name),
                params(&prototype.params)
            )?;
        }
        for global in &self.globals {
            match &global.init {
                Some(init) => writeln!(f, "{} = {init};", global.ty.declare(&global.name))?,
                None => writeln!(f, "{};", global.ty.declare(&global.name))?,
            }
        }
        for layout in &self.layouts {
            writeln!(f, "struct {} {{", layout.name)?;
            for field in &layout.fields {
                let decl = match field.mode {
                    CaptureMode::ByValue => field.ty.declare(&field.name),
                    CaptureMode::ByReference => field.ty.declare_indirect('*', &field.name),
                };
                writeln!(f, "{INDENT}{decl};")?;
            }
            writeln!(f, "}};")?;
        }
        for (i, function) in self.functions.iter().enumerate() {
            if i > 0 || !self.layouts.is_empty() || !self.prototypes.is_empty() {
                writeln!(f)?;
            }
            write!(f, "{function}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let linkage = if self.role.parent().is_some() { "static " } else { "" };
        writeln!(
            f,
            "{linkage}{}({}) {{",
            self.ret.declare(&self.name),
            params(&self.params)
        )?;
        let mut printer = Printer { out: f, depth: 1 };
        printer.ops(&self.body)?;
        writeln!(f, "}}")
    }
}

fn params(params: &[Param]) -> String {
    params
        .iter()
        .map(|p| match &p.name {
            Some(name) => p.ty.declare(name),
            None => p.ty.to_string().trim_end().to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

struct Printer<'a, 'b> {
    out: &'a mut fmt::Formatter<'b>,
    depth: usize,
}

impl Printer<'_, '_> {
    fn line(&mut self, text: impl fmt::Display) -> fmt::Result {
        for _ in 0..self.depth {
            self.out.write_str(INDENT)?;
        }
        writeln!(self.out, "{text}")
    }

    fn nested(&mut self, ops: &[Op]) -> fmt::Result {
        self.depth += 1;
        let result = self.ops(ops);
        self.depth -= 1;
        result
    }

    fn ops(&mut self, ops: &[Op]) -> fmt::Result {
        ops.iter().try_for_each(|op| self.op(op))
    }

    /// `if (!setjmp(__cilk_sf.ctx)) { call }`, after saving the floating point state.
    fn resumable(&mut self, call: String) -> fmt::Result {
        self.line(format!("{}(&{});", abi::SAVE_FP_CTRL_STATE, abi::FRAME_VAR))?;
        self.line(format!("if (!setjmp({}.ctx)) {{", abi::FRAME_VAR))?;
        self.depth += 1;
        self.line(call)?;
        self.depth -= 1;
        self.line("}")
    }

    fn epilogue(&mut self, role: FrameRole) -> fmt::Result {
        let frame = abi::FRAME_VAR;
        self.line(format!("{}(&{frame});", abi::POP_FRAME))?;
        match role {
            FrameRole::Parent => {
                self.line(format!("if ({frame}.flags != {}) {{", abi::FRAME_VERSION))?;
                self.depth += 1;
                self.line(format!("{}(&{frame});", abi::LEAVE_FRAME))?;
                self.depth -= 1;
                self.line("}")
            }
            FrameRole::Helper => self.line(format!("{}(&{frame});", abi::LEAVE_FRAME)),
        }
    }

    fn captures(&mut self, context: &str, fields: &[CaptureField], init: bool) -> fmt::Result {
        for field in fields {
            let name = &field.name;
            let text = match (init, field.mode) {
                (true, CaptureMode::ByValue) => format!("{context}.{name} = {name};"),
                (true, CaptureMode::ByReference) => format!("{context}.{name} = &{name};"),
                (false, CaptureMode::ByValue) => {
                    format!("{} = {context}->{name};", field.ty.declare(name))
                }
                (false, CaptureMode::ByReference) => format!(
                    "{} = *{context}->{name};",
                    field.ty.declare_indirect('&', name)
                ),
            };
            self.line(text)?;
        }
        Ok(())
    }

    fn op(&mut self, op: &Op) -> fmt::Result {
        match op {
            Op::Expr(expr) => self.line(format_args!("{expr};")),
            Op::Let { name, ty, init } => match init {
                Some(init) => self.line(format_args!("{} = {init};", ty.declare(name))),
                None => self.line(format_args!("{};", ty.declare(name))),
            },
            Op::Storage { name, ty } => self.line(format_args!(
                "{}; /* storage only: constructed by the spawned call */",
                ty.declare(name)
            )),
            Op::Construct { target, ty, init } if ty.is_class() => {
                self.line(format_args!("new (&{target}) {}({init});", ty.to_string().trim_end()))
            }
            Op::Construct { target, init, .. } => self.line(format_args!("{target} = {init};")),
            Op::Block(ops) => {
                self.line("{")?;
                self.nested(ops)?;
                self.line("}")
            }
            Op::If {
                cond,
                then,
                otherwise,
            } => {
                self.line(format_args!("if ({cond}) {{"))?;
                self.nested(then)?;
                if !otherwise.is_empty() {
                    self.line("} else {")?;
                    self.nested(otherwise)?;
                }
                self.line("}")
            }
            Op::While { cond, body } => {
                self.line(format_args!("while ({cond}) {{"))?;
                self.nested(body)?;
                self.line("}")
            }
            Op::DoWhile { body, cond } => {
                self.line("do {")?;
                self.nested(body)?;
                self.line(format_args!("}} while ({cond});"))
            }
            Op::For {
                init,
                cond,
                step,
                body,
                metadata,
            } => {
                if let Some(simd) = &metadata.simd {
                    self.line(format_args!("#pragma {simd}"))?;
                }
                if let Some(group) = &metadata.parallel_access {
                    self.line(format_args!("/* parallel access: {group} */"))?;
                }
                let init = match init.as_deref() {
                    Some(Op::Let { name, ty, init: Some(value) }) => {
                        format!("{} = {value}", ty.declare(name))
                    }
                    Some(Op::Expr(expr)) => expr.to_string(),
                    _ => String::new(),
                };
                let cond = cond.as_ref().map(ToString::to_string).unwrap_or_default();
                let step = step.as_ref().map(ToString::to_string).unwrap_or_default();
                self.line(format_args!("for ({init}; {cond}; {step}) {{"))?;
                self.nested(body)?;
                self.line("}")
            }
            Op::Try { body, handlers } => {
                self.line("try {")?;
                self.nested(body)?;
                for handler in handlers {
                    let param = match &handler.param {
                        Some(param) => params(std::slice::from_ref(param)),
                        None => "...".to_string(),
                    };
                    self.line(format_args!("}} catch ({param}) {{"))?;
                    self.nested(&handler.body)?;
                }
                self.line("}")
            }
            Op::Unwind { body, landing } => {
                self.line("try {")?;
                self.nested(body)?;
                self.line("} catch (...) {")?;
                self.nested(landing)?;
                self.line("}")
            }
            Op::Label(label) => {
                let depth = self.depth;
                self.depth = depth.saturating_sub(1);
                let result = self.line(format_args!("{label}:"));
                self.depth = depth;
                result
            }
            Op::Goto(label) => self.line(format_args!("goto {label};")),
            Op::Break => self.line("break;"),
            Op::Continue => self.line("continue;"),
            Op::Return(Some(value)) => self.line(format_args!("return {value};")),
            Op::Return(None) => self.line("return;"),
            Op::Throw(Some(value)) => self.line(format_args!("throw {value};")),
            Op::Throw(None) | Op::Resume => self.line("throw;"),

            Op::EnterFrame(role) => {
                let enter = match role {
                    FrameRole::Parent => abi::ENTER_FRAME,
                    FrameRole::Helper => abi::ENTER_FRAME_FAST,
                };
                self.line(format_args!("{} {};", abi::STACK_FRAME_TYPE, abi::FRAME_VAR))?;
                self.line(format_args!("{enter}(&{});", abi::FRAME_VAR))
            }
            Op::Detach => self.line(format_args!("{}(&{});", abi::DETACH, abi::FRAME_VAR)),
            Op::Resumable(Resumable::Spawn { helper, context }) => {
                self.resumable(format!("{helper}(&{context});"))
            }
            Op::Resumable(Resumable::Sync) => {
                self.line(format_args!(
                    "if ({}.flags & {}) {{",
                    abi::FRAME_VAR,
                    abi::FRAME_UNSYNCHED
                ))?;
                self.depth += 1;
                self.resumable(format!("{}(&{});", abi::SYNC, abi::FRAME_VAR))?;
                self.depth -= 1;
                self.line("}")
            }
            Op::Epilogue(role) => self.epilogue(*role),
            Op::InitCapture { context, fields } => self.captures(context, fields, true),
            Op::BindCapture { context, fields } => self.captures(context, fields, false),
            Op::ParallelFor {
                width,
                helper,
                context,
                count,
                grain,
            } => {
                let entry = match width {
                    Width::W32 => abi::CILK_FOR_32,
                    Width::W64 => abi::CILK_FOR_64,
                };
                self.line(format_args!("{entry}({helper}, &{context}, {count}, {grain});"))
            }
            Op::Destroy(name) => self.line(format_args!("/* end of lifetime: {name} */")),
        }
    }
}

/// The printed form of a single op sequence, used in logs and tests.
pub(crate) fn render_ops(ops: &[Op]) -> String {
    struct Ops<'a>(&'a [Op]);

    impl fmt::Display for Ops<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            Printer { out: f, depth: 0 }.ops(self.0)
        }
    }

    Ops(ops).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Expr, Type};

    #[test]
    fn sync_expands_to_a_conditional_runtime_call() {
        let text = render_ops(&[Op::sync()]);
        assert_eq!(
            text,
            "if (__cilk_sf.flags & CILK_FRAME_UNSYNCHED) {\n\
             \x20   __cilkrts_save_fp_ctrl_state(&__cilk_sf);\n\
             \x20   if (!setjmp(__cilk_sf.ctx)) {\n\
             \x20       __cilkrts_sync(&__cilk_sf);\n\
             \x20   }\n\
             }\n"
        );
    }

    #[test]
    fn epilogues_differ_by_role() {
        let parent = render_ops(&[Op::Epilogue(FrameRole::Parent)]);
        assert!(parent.contains("if (__cilk_sf.flags != CILK_FRAME_VERSION)"));
        let helper = render_ops(&[Op::Epilogue(FrameRole::Helper)]);
        assert_eq!(
            helper,
            "__cilkrts_pop_frame(&__cilk_sf);\n__cilkrts_leave_frame(&__cilk_sf);\n"
        );
    }

    #[test]
    fn captures_by_mode() {
        use crate::lowered::CaptureRole;
        use crate::source::Scalar;

        let fields = vec![
            CaptureField {
                name: "x".to_string(),
                ty: Type::int(Scalar::Int, true),
                mode: CaptureMode::ByReference,
                role: CaptureRole::Receiver,
            },
            CaptureField {
                name: "n".to_string(),
                ty: Type::int(Scalar::Long, true),
                mode: CaptureMode::ByValue,
                role: CaptureRole::Value,
            },
        ];
        let init = render_ops(&[Op::InitCapture {
            context: "ctx".to_string(),
            fields: fields.clone(),
        }]);
        assert_eq!(init, "ctx.x = &x;\nctx.n = n;\n");
        let bind = render_ops(&[Op::BindCapture {
            context: "__cilk_ctx".to_string(),
            fields,
        }]);
        assert_eq!(bind, "int &x = *__cilk_ctx->x;\nlong n = __cilk_ctx->n;\n");

        let call = render_ops(&[Op::Expr(Expr::ident("x"))]);
        assert_eq!(call, "x;\n");
    }
}
