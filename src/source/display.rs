use std::fmt;

use super::{BaseType, Expr, ExprKind, Indirection, Scalar, StepOp, Type, UnaryOp};

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_static {
            f.write_str("static ")?;
        }
        if self.is_const {
            f.write_str("const ")?;
        }
        if self.is_volatile {
            f.write_str("volatile ")?;
        }
        match &self.base {
            BaseType::Void => f.write_str("void")?,
            BaseType::Int { scalar, signed } => {
                if !signed && *scalar != Scalar::Bool {
                    f.write_str("unsigned ")?;
                }
                f.write_str(match scalar {
                    Scalar::Bool => "bool",
                    Scalar::Char => "char",
                    Scalar::Short => "short",
                    Scalar::Int => "int",
                    Scalar::Long => "long",
                    Scalar::LongLong => "long long",
                })?;
            }
            BaseType::Named(name) => f.write_str(name)?,
            BaseType::Deduced => f.write_str("auto")?,
        }
        for (i, level) in self.indirection.iter().enumerate() {
            if i == 0 {
                f.write_str(" ")?;
            }
            match level {
                Indirection::Pointer { is_const: true } => f.write_str("*const ")?,
                Indirection::Pointer { is_const: false } => f.write_str("*")?,
                Indirection::Reference => f.write_str("&")?,
            }
        }
        Ok(())
    }
}

impl Type {
    /// Declarator text for a variable of this type: `int *p`, `long a[4]`.
    pub fn declare(&self, name: &str) -> String {
        let text = self.to_string();
        let text = text.trim_end();
        let array = match self.array {
            Some(Some(len)) => format!("[{len}]"),
            Some(None) => "[]".to_string(),
            None => String::new(),
        };
        if text.ends_with('*') || text.ends_with('&') {
            format!("{text}{name}{array}")
        } else {
            format!("{text} {name}{array}")
        }
    }

    /// Declarator for a pointer (`'*'`) or reference (`'&'`) to an object of this type.
    pub fn declare_indirect(&self, sigil: char, name: &str) -> String {
        if self.array.is_some() {
            let element = Type {
                array: None,
                ..self.clone()
            };
            element.declare(&format!("({sigil}{name})[{}]", self.array_len()))
        } else {
            self.declare(&format!("{sigil}{name}"))
        }
    }

    fn array_len(&self) -> String {
        match self.array {
            Some(Some(len)) => len.to_string(),
            _ => String::new(),
        }
    }
}

fn precedence(expr: &Expr) -> u8 {
    use super::BinaryOp::*;
    match &expr.kind {
        ExprKind::Assign { .. } => 1,
        ExprKind::Conditional(..) => 2,
        ExprKind::Binary(op, ..) => match op {
            Or => 3,
            And => 4,
            BitOr => 5,
            BitXor => 6,
            BitAnd => 7,
            Eq | Ne => 8,
            Lt | Le | Gt | Ge => 9,
            Shl | Shr => 10,
            Add | Sub => 11,
            Mul | Div | Rem => 12,
        },
        ExprKind::Unary(..)
        | ExprKind::Spawn(_)
        | ExprKind::Sizeof(_)
        | ExprKind::Cast(..)
        | ExprKind::Step { prefix: true, .. } => 13,
        ExprKind::Call { .. }
        | ExprKind::Index(..)
        | ExprKind::Member { .. }
        | ExprKind::Step { prefix: false, .. } => 14,
        ExprKind::Int { .. } | ExprKind::Bool(_) | ExprKind::Ident(_) => 15,
    }
}

fn write_expr(f: &mut fmt::Formatter<'_>, expr: &Expr, min: u8) -> fmt::Result {
    let prec = precedence(expr);
    if prec < min {
        f.write_str("(")?;
    }
    match &expr.kind {
        ExprKind::Int {
            value,
            unsigned,
            long,
        } => {
            write!(f, "{value}")?;
            if *unsigned {
                f.write_str("u")?;
            }
            if *long {
                f.write_str("l")?;
            }
        }
        ExprKind::Bool(value) => write!(f, "{value}")?,
        ExprKind::Ident(name) => f.write_str(name)?,
        ExprKind::Unary(op, operand) => {
            f.write_str(match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "!",
                UnaryOp::BitNot => "~",
                UnaryOp::AddrOf => "&",
                UnaryOp::Deref => "*",
            })?;
            // keep `- -x` from printing as a decrement
            if matches!(op, UnaryOp::Neg)
                && matches!(&operand.kind, ExprKind::Unary(UnaryOp::Neg, _) | ExprKind::Step { prefix: true, .. })
            {
                f.write_str(" ")?;
            }
            write_expr(f, operand, 13)?;
        }
        ExprKind::Binary(op, lhs, rhs) => {
            write_expr(f, lhs, prec)?;
            write!(f, " {} ", op.symbol())?;
            write_expr(f, rhs, prec + 1)?;
        }
        ExprKind::Assign { op, target, value } => {
            write_expr(f, target, 2)?;
            match op {
                Some(op) => write!(f, " {}= ", op.symbol())?,
                None => f.write_str(" = ")?,
            }
            write_expr(f, value, 1)?;
        }
        ExprKind::Step { op, prefix, target } => {
            let sigil = match op {
                StepOp::Inc => "++",
                StepOp::Dec => "--",
            };
            if *prefix {
                f.write_str(sigil)?;
                write_expr(f, target, 13)?;
            } else {
                write_expr(f, target, 14)?;
                f.write_str(sigil)?;
            }
        }
        ExprKind::Call { callee, args } => {
            write_expr(f, callee, 14)?;
            f.write_str("(")?;
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_expr(f, arg, 1)?;
            }
            f.write_str(")")?;
        }
        ExprKind::Index(base, index) => {
            write_expr(f, base, 14)?;
            f.write_str("[")?;
            write_expr(f, index, 1)?;
            f.write_str("]")?;
        }
        ExprKind::Member { base, field, arrow } => {
            write_expr(f, base, 14)?;
            f.write_str(if *arrow { "->" } else { "." })?;
            f.write_str(field)?;
        }
        ExprKind::Conditional(cond, then, otherwise) => {
            write_expr(f, cond, 3)?;
            f.write_str(" ? ")?;
            write_expr(f, then, 1)?;
            f.write_str(" : ")?;
            write_expr(f, otherwise, 2)?;
        }
        ExprKind::Spawn(call) => {
            f.write_str("_Cilk_spawn ")?;
            write_expr(f, call, 13)?;
        }
        ExprKind::Sizeof(operand) => {
            f.write_str("sizeof ")?;
            write_expr(f, operand, 13)?;
        }
        ExprKind::Cast(ty, operand) => {
            write!(f, "({})", ty.to_string().trim_end())?;
            write_expr(f, operand, 13)?;
        }
    }
    if prec < min {
        f.write_str(")")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_expr(f, self, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::BinaryOp;

    #[test]
    fn parenthesizes_by_precedence() {
        let sum = Expr::binary(BinaryOp::Add, Expr::ident("a"), Expr::ident("b"));
        let product = Expr::binary(BinaryOp::Mul, sum, Expr::ident("c"));
        assert_eq!(product.to_string(), "(a + b) * c");

        let nested = Expr::binary(
            BinaryOp::Sub,
            Expr::ident("a"),
            Expr::binary(BinaryOp::Sub, Expr::ident("b"), Expr::ident("c")),
        );
        assert_eq!(nested.to_string(), "a - (b - c)");
    }

    #[test]
    fn declares_pointers_and_arrays() {
        let ptr = Type::int(Scalar::Int, true).pointer_to();
        assert_eq!(ptr.declare("p"), "int *p");

        let mut array = Type::int(Scalar::Long, false);
        array.array = Some(Some(4));
        assert_eq!(array.declare("a"), "unsigned long a[4]");
        assert_eq!(array.declare_indirect('&', "a"), "unsigned long (&a)[4]");
    }

    #[test]
    fn prints_casts() {
        let cast = Expr::cast(
            Type::int(Scalar::Int, false),
            Expr::binary(BinaryOp::Sub, Expr::ident("x"), Expr::int(1)),
        );
        assert_eq!(cast.to_string(), "(unsigned int)(x - 1)");
    }
}
