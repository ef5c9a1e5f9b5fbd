use log::trace;

use super::{Scopes, Symbols};
use crate::error::{Diagnostic, DiagnosticKind};
use crate::source::{
    BinaryOp, CilkFor, CilkForInit, Expr, ExprKind, Scalar, StepOp, Type, UnaryOp,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
}

impl Comparison {
    fn from_op(op: BinaryOp) -> Option<Self> {
        Some(match op {
            BinaryOp::Lt => Comparison::Lt,
            BinaryOp::Le => Comparison::Le,
            BinaryOp::Gt => Comparison::Gt,
            BinaryOp::Ge => Comparison::Ge,
            BinaryOp::Ne => Comparison::Ne,
            _ => return None,
        })
    }

    /// `limit OP var` rewritten as `var OP' limit`.
    fn mirrored(self) -> Self {
        match self {
            Comparison::Lt => Comparison::Gt,
            Comparison::Le => Comparison::Ge,
            Comparison::Gt => Comparison::Lt,
            Comparison::Ge => Comparison::Le,
            Comparison::Ne => Comparison::Ne,
        }
    }

    fn op(self) -> BinaryOp {
        match self {
            Comparison::Lt => BinaryOp::Lt,
            Comparison::Le => BinaryOp::Le,
            Comparison::Gt => BinaryOp::Gt,
            Comparison::Ge => BinaryOp::Ge,
            Comparison::Ne => BinaryOp::Ne,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    /// `!=` with a stride whose sign is only known at run time.
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    W32,
    W64,
}

/// Signed amount added to the control variable per iteration.
#[derive(Debug, Clone)]
pub enum Stride {
    Const(i128),
    /// Evaluated once in the parent, before the runtime call.
    Dynamic(Expr),
}

#[derive(Debug, Clone)]
pub struct LoopBounds {
    pub var: String,
    pub var_ty: Type,
    pub first: Expr,
    pub limit: Expr,
    pub cmp: Comparison,
    pub stride: Stride,
    pub direction: Direction,
    pub width: Width,
    /// Unsigned type the trip count is computed in.
    pub count_ty: Type,
}

#[derive(Debug)]
pub struct Analysis {
    pub bounds: LoopBounds,
    pub warnings: Vec<Diagnostic>,
}

/// Validates the header of a `_Cilk_for` and normalizes its bounds.
pub fn analyze(cilk_for: &CilkFor, scopes: &Scopes, symbols: &Symbols) -> Result<Analysis, Diagnostic> {
    let decl = match &cilk_for.init {
        CilkForInit::Decl(decls) if decls.len() == 1 => &decls[0],
        CilkForInit::Decl(_) => {
            return Err(Diagnostic::error(
                DiagnosticKind::InvalidControlVariable,
                "_Cilk_for must declare exactly one control variable",
            ));
        }
        CilkForInit::Expr(_) => {
            return Err(Diagnostic::error(
                DiagnosticKind::InvalidControlVariable,
                "_Cilk_for initializer must declare the control variable",
            ));
        }
    };
    let var = decl.name.as_str();
    let ty = &decl.ty;

    if ty.is_top_const() || ty.is_volatile || ty.is_static {
        return Err(Diagnostic::error(
            DiagnosticKind::InvalidControlVariable,
            format!("control variable '{var}' may not be const, volatile or static"),
        )
        .at("", decl.span));
    }
    if ty.is_reference() || ty.array.is_some() || !(ty.is_integral() || ty.is_pointer() || ty.is_class()) {
        return Err(Diagnostic::error(
            DiagnosticKind::InvalidControlVariable,
            format!("control variable '{var}' must have integral, pointer or class type, not '{ty}'"),
        )
        .at("", decl.span));
    }
    let first = decl.init.clone().ok_or_else(|| {
        Diagnostic::error(
            DiagnosticKind::InvalidControlVariable,
            format!("control variable '{var}' must be initialized"),
        )
        .at("", decl.span)
    })?;

    let (cmp, limit) = condition(&cilk_for.cond, var)?;
    let stride = increment(&cilk_for.step, var)?;

    let direction = match (&stride, cmp) {
        (Stride::Const(s), Comparison::Lt | Comparison::Le) if *s < 0 => {
            return Err(inconsistent(var, &cilk_for.cond, &cilk_for.step));
        }
        (Stride::Const(s), Comparison::Gt | Comparison::Ge) if *s > 0 => {
            return Err(inconsistent(var, &cilk_for.cond, &cilk_for.step));
        }
        (_, Comparison::Lt | Comparison::Le) => Direction::Up,
        (_, Comparison::Gt | Comparison::Ge) => Direction::Down,
        (Stride::Const(s), Comparison::Ne) if *s > 0 => Direction::Up,
        (Stride::Const(_), Comparison::Ne) => Direction::Down,
        (Stride::Dynamic(_), Comparison::Ne) => Direction::Dynamic,
    };

    let mut warnings = vec![];
    let limit_ty = scopes.type_of(&limit, symbols);
    if let Some(limit_ty) = &limit_ty {
        let mismatched = (ty.is_pointer() && limit_ty.is_integral())
            || (ty.is_integral() && limit_ty.is_pointer())
            || (ty.is_class() && !limit_ty.is_class() && !limit_ty.is_integral());
        if mismatched {
            return Err(Diagnostic::error(
                DiagnosticKind::InvalidBounds,
                format!("cannot compute '{limit} - {var}': '{ty}' and '{limit_ty}' are incompatible"),
            )
            .at("", cilk_for.cond.span));
        }
        if ty.is_integral() && limit_ty.is_integral() && !limit.is_literal() && ty.is_signed() != limit_ty.is_signed() {
            warnings.push(
                Diagnostic::warning(
                    DiagnosticKind::SignednessMismatch,
                    format!("comparison of '{var}' ('{ty}') with '{limit}' ('{limit_ty}') mixes signed and unsigned"),
                )
                .at("", cilk_for.cond.span),
            );
        }
    }

    let (width, count_ty) = count_type(ty);
    let bounds = LoopBounds {
        var: var.to_string(),
        var_ty: ty.clone(),
        first,
        limit,
        cmp,
        stride,
        direction,
        width,
        count_ty,
    };

    if let Some(warning) = bounds.wraparound() {
        warnings.push(warning.at("", cilk_for.cond.span));
    }

    trace!(
        "_Cilk_for '{}': {:?} {:?}, {:?} count",
        bounds.var, bounds.cmp, bounds.direction, bounds.width
    );
    Ok(Analysis { bounds, warnings })
}

fn inconsistent(var: &str, cond: &Expr, step: &Expr) -> Diagnostic {
    Diagnostic::error(
        DiagnosticKind::InconsistentDirection,
        format!("increment '{step}' moves '{var}' away from the limit in '{cond}'"),
    )
    .at("", step.span)
}

fn condition(cond: &Expr, var: &str) -> Result<(Comparison, Expr), Diagnostic> {
    let invalid = || {
        Diagnostic::error(
            DiagnosticKind::InvalidCondition,
            format!("_Cilk_for condition '{cond}' must compare '{var}' with <, <=, >, >= or !="),
        )
        .at("", cond.span)
    };
    let ExprKind::Binary(op, lhs, rhs) = &cond.kind else {
        return Err(invalid());
    };
    let cmp = Comparison::from_op(*op).ok_or_else(invalid)?;
    match (lhs.as_ident() == Some(var), rhs.as_ident() == Some(var)) {
        (true, false) => Ok((cmp, (**rhs).clone())),
        (false, true) => Ok((cmp.mirrored(), (**lhs).clone())),
        _ => Err(invalid()),
    }
}

fn increment(step: &Expr, var: &str) -> Result<Stride, Diagnostic> {
    let invalid = || {
        Diagnostic::error(
            DiagnosticKind::InvalidIncrement,
            format!("_Cilk_for increment '{step}' must be ++, --, += or -= of '{var}'"),
        )
        .at("", step.span)
    };
    let (amount, negate) = match &step.kind {
        ExprKind::Step { op, target, .. } if target.as_ident() == Some(var) => {
            return Ok(Stride::Const(if *op == StepOp::Inc { 1 } else { -1 }));
        }
        ExprKind::Assign {
            op: Some(op @ (BinaryOp::Add | BinaryOp::Sub)),
            target,
            value,
        } if target.as_ident() == Some(var) => (value, *op == BinaryOp::Sub),
        _ => return Err(invalid()),
    };

    match const_eval(amount) {
        Some(0) => Err(Diagnostic::error(
            DiagnosticKind::ZeroStride,
            format!("_Cilk_for increment '{step}' has a zero stride"),
        )
        .at("", step.span)),
        Some(value) => {
            let value = if negate { value.checked_neg() } else { Some(value) };
            match value.filter(|v| u64::try_from(v.unsigned_abs()).is_ok()) {
                Some(value) => Ok(Stride::Const(value)),
                None => Err(Diagnostic::error(
                    DiagnosticKind::InvalidIncrement,
                    format!("_Cilk_for increment '{step}' does not fit in 64 bits"),
                )
                .at("", step.span)),
            }
        }
        None if negate => Ok(Stride::Dynamic(Expr::unary(UnaryOp::Neg, (**amount).clone()))),
        None => Ok(Stride::Dynamic((**amount).clone())),
    }
}

/// Size of a constant stride; `increment` only accepts strides that fit in 64 bits.
fn magnitude(stride: i128) -> u64 {
    u64::try_from(stride.unsigned_abs()).unwrap_or(u64::MAX)
}

fn count_type(var_ty: &Type) -> (Width, Type) {
    match var_ty.int_bits() {
        Some(bits) if bits <= 32 => (Width::W32, Type::int(Scalar::Int, false)),
        _ => (Width::W64, Type::int(Scalar::Long, false)),
    }
}

impl LoopBounds {
    fn unsigned(&self, expr: Expr) -> Expr {
        Expr::cast(self.count_ty.clone(), expr)
    }

    fn elementwise(&self) -> bool {
        self.var_ty.is_integral()
    }

    /// `limit - first`, or `first - limit` when `up` is false, in the count type.
    fn distance(&self, first: &Expr, limit: &Expr, up: bool) -> Expr {
        let (hi, lo) = if up { (limit, first) } else { (first, limit) };
        if self.elementwise() {
            Expr::binary(
                BinaryOp::Sub,
                self.unsigned(hi.clone()),
                self.unsigned(lo.clone()),
            )
        } else {
            self.unsigned(Expr::binary(BinaryOp::Sub, hi.clone(), lo.clone()))
        }
    }

    /// Positive per-iteration step for a loop running in a known direction.
    fn magnitude(&self, stride: &Expr) -> Expr {
        match (&self.stride, self.direction) {
            (Stride::Const(s), _) => Expr::int(magnitude(*s)),
            (Stride::Dynamic(_), Direction::Down) => {
                self.unsigned(Expr::unary(UnaryOp::Neg, stride.clone()))
            }
            (Stride::Dynamic(_), _) => self.unsigned(stride.clone()),
        }
    }

    /// Number of iterations, as an expression over the (already evaluated)
    /// `first`, `limit` and stride. `stride` is only read for dynamic strides.
    pub fn trip_count(&self, first: Expr, limit: Expr, stride: Option<Expr>) -> Expr {
        let stride = match (&self.stride, stride) {
            (Stride::Dynamic(_), Some(stride)) => stride,
            (Stride::Dynamic(expr), None) => expr.clone(),
            (Stride::Const(s), _) => Expr::int(magnitude(*s)),
        };
        let zero = || Expr::int(0);
        let one = || Expr::int(1);

        let count = match (self.cmp, self.direction) {
            (Comparison::Ne, Direction::Dynamic) => {
                let positive = Expr::binary(BinaryOp::Gt, stride.clone(), zero());
                let up = Expr::binary(
                    BinaryOp::Div,
                    self.distance(&first, &limit, true),
                    self.unsigned(stride.clone()),
                );
                let down = Expr::binary(
                    BinaryOp::Div,
                    self.distance(&first, &limit, false),
                    self.unsigned(Expr::unary(UnaryOp::Neg, stride)),
                );
                Expr::conditional(positive, up, down)
            }
            (Comparison::Ne, direction) => Expr::binary(
                BinaryOp::Div,
                self.distance(&first, &limit, direction == Direction::Up),
                self.magnitude(&stride),
            ),
            (cmp, _) => {
                let up = matches!(cmp, Comparison::Lt | Comparison::Le);
                let strict = matches!(cmp, Comparison::Lt | Comparison::Gt);
                let distance = self.distance(&first, &limit, up);
                let distance = if strict {
                    Expr::binary(BinaryOp::Sub, distance, one())
                } else {
                    distance
                };
                let steps = Expr::binary(
                    BinaryOp::Add,
                    Expr::binary(BinaryOp::Div, distance, self.magnitude(&stride)),
                    one(),
                );
                let enters = Expr::binary(cmp.op(), first, limit);
                Expr::conditional(enters, steps, zero())
            }
        };
        self.unsigned(count)
    }

    /// Value of the control variable in iteration `index`.
    pub fn control_value(&self, first: Expr, index: Expr, stride: Option<Expr>) -> Expr {
        let (op, step) = match (&self.stride, stride) {
            (Stride::Const(s), _) if *s < 0 => (BinaryOp::Sub, Expr::int(magnitude(*s))),
            (Stride::Const(s), _) => (BinaryOp::Add, Expr::int(magnitude(*s))),
            (Stride::Dynamic(_), Some(stride)) => (BinaryOp::Add, stride),
            (Stride::Dynamic(expr), None) => (BinaryOp::Add, expr.clone()),
        };

        if self.elementwise() {
            // unsigned arithmetic wraps, so a negative dynamic stride still adds up
            let step = self.unsigned(step);
            let offset = Expr::binary(BinaryOp::Mul, index, step);
            let value = Expr::binary(op, self.unsigned(first), offset);
            Expr::cast(self.var_ty.clone().unqualified(), value)
        } else {
            let index = match self.stride {
                Stride::Dynamic(_) => Expr::cast(Type::int(Scalar::Long, true), index),
                Stride::Const(_) => index,
            };
            Expr::binary(op, first, Expr::binary(BinaryOp::Mul, index, step))
        }
    }

    /// Warns when the header's constants make the count wrap around.
    fn wraparound(&self) -> Option<Diagnostic> {
        let Stride::Const(stride) = self.stride else {
            return None;
        };
        let first = const_eval(&self.first)?;
        let limit = const_eval(&self.limit)?;

        if let Some(bits) = self.var_ty.int_bits() {
            let (min, max) = if self.var_ty.is_signed() {
                (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
            } else {
                (0, (1i128 << bits) - 1)
            };
            if limit < min || limit > max {
                return Some(Diagnostic::warning(
                    DiagnosticKind::TripCountWraps,
                    format!("limit {limit} is outside the range of '{}'; the loop count wraps", self.var_ty),
                ));
            }
        }

        let step = stride.checked_abs()?;
        let exact = match self.cmp {
            Comparison::Lt if limit > first => (limit.checked_sub(first)? - 1) / step + 1,
            Comparison::Le if limit >= first => limit.checked_sub(first)? / step + 1,
            Comparison::Gt if first > limit => (first.checked_sub(limit)? - 1) / step + 1,
            Comparison::Ge if first >= limit => first.checked_sub(limit)? / step + 1,
            Comparison::Ne => {
                let distance = if stride > 0 {
                    limit.checked_sub(first)?
                } else {
                    first.checked_sub(limit)?
                };
                if distance < 0 || distance % step != 0 {
                    return Some(Diagnostic::warning(
                        DiagnosticKind::TripCountWraps,
                        format!(
                            "'{}' never equals {limit} when stepping by {stride} from {first}; the loop count wraps",
                            self.var
                        ),
                    ));
                }
                distance / step
            }
            _ => 0,
        };
        let max = match self.width {
            Width::W32 => u32::MAX as i128,
            Width::W64 => u64::MAX as i128,
        };
        (exact > max).then(|| {
            Diagnostic::warning(
                DiagnosticKind::TripCountWraps,
                format!("loop runs {exact} times, more than '{}' can count", self.count_ty),
            )
        })
    }
}

/// Folds an integer constant expression. Casts truncate to the target width.
pub fn const_eval(expr: &Expr) -> Option<i128> {
    let value = match &expr.kind {
        ExprKind::Int { value, .. } => *value as i128,
        ExprKind::Bool(value) => *value as i128,
        ExprKind::Unary(op, operand) => {
            let operand = const_eval(operand)?;
            match op {
                UnaryOp::Neg => operand.checked_neg()?,
                UnaryOp::Not => (operand == 0) as i128,
                UnaryOp::BitNot => !operand,
                UnaryOp::AddrOf | UnaryOp::Deref => return None,
            }
        }
        ExprKind::Binary(op, lhs, rhs) => {
            let lhs = const_eval(lhs)?;
            let rhs = const_eval(rhs)?;
            match op {
                BinaryOp::Add => lhs.checked_add(rhs)?,
                BinaryOp::Sub => lhs.checked_sub(rhs)?,
                BinaryOp::Mul => lhs.checked_mul(rhs)?,
                BinaryOp::Div => lhs.checked_div(rhs)?,
                BinaryOp::Rem => lhs.checked_rem(rhs)?,
                BinaryOp::Shl => lhs.checked_shl(u32::try_from(rhs).ok()?)?,
                BinaryOp::Shr => lhs.checked_shr(u32::try_from(rhs).ok()?)?,
                BinaryOp::Lt => (lhs < rhs) as i128,
                BinaryOp::Le => (lhs <= rhs) as i128,
                BinaryOp::Gt => (lhs > rhs) as i128,
                BinaryOp::Ge => (lhs >= rhs) as i128,
                BinaryOp::Eq => (lhs == rhs) as i128,
                BinaryOp::Ne => (lhs != rhs) as i128,
                BinaryOp::BitAnd => lhs & rhs,
                BinaryOp::BitOr => lhs | rhs,
                BinaryOp::BitXor => lhs ^ rhs,
                BinaryOp::And => (lhs != 0 && rhs != 0) as i128,
                BinaryOp::Or => (lhs != 0 || rhs != 0) as i128,
            }
        }
        ExprKind::Conditional(cond, then, otherwise) => {
            if const_eval(cond)? != 0 {
                const_eval(then)?
            } else {
                const_eval(otherwise)?
            }
        }
        ExprKind::Cast(ty, operand) => {
            let value = const_eval(operand)?;
            let bits = ty.int_bits()?;
            let mask = (1i128 << bits) - 1;
            let truncated = value & mask;
            if ty.is_signed() && truncated >> (bits - 1) != 0 {
                truncated - (1i128 << bits)
            } else {
                truncated
            }
        }
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{StmtKind, parse};

    fn header(source: &str) -> CilkFor {
        let unit = parse(&format!("void f(long n) {{ {source} ; }}")).unwrap();
        let body = &unit.functions().next().unwrap().body;
        match &body[0].kind {
            StmtKind::CilkFor(cilk_for) => (**cilk_for).clone(),
            other => panic!("expected a _Cilk_for, got {other:?}"),
        }
    }

    fn analyze_header(source: &str) -> Result<Analysis, Diagnostic> {
        let mut scopes = Scopes::new();
        scopes.declare("n", Type::int(Scalar::Long, true));
        scopes.declare("u", Type::int(Scalar::Int, false));
        scopes.declare("p", Type::int(Scalar::Int, true).pointer_to());
        analyze(&header(source), &scopes, &Symbols::default())
    }

    fn folded_count(source: &str) -> i128 {
        let bounds = analyze_header(source).unwrap().bounds;
        let count = bounds.trip_count(bounds.first.clone(), bounds.limit.clone(), None);
        const_eval(&count).unwrap()
    }

    #[test]
    fn counts_upward_strict() {
        assert_eq!(folded_count("_Cilk_for (int i = 3; i < 10; i++)"), 7);
    }

    #[test]
    fn counts_not_equal_downward() {
        assert_eq!(folded_count("_Cilk_for (int i = 55; i != 27; i -= 4)"), 7);
    }

    #[test]
    fn counts_unsigned_inclusive() {
        assert_eq!(folded_count("_Cilk_for (unsigned i = 0; i <= 17; i += 3)"), 6);
    }

    #[test]
    fn mirrored_comparison_and_empty_range() {
        // `10 > i` is `i < 10`
        assert_eq!(folded_count("_Cilk_for (int i = 0; 10 > i; ++i)"), 10);
        assert_eq!(folded_count("_Cilk_for (int i = 10; i < 3; ++i)"), 0);
        assert_eq!(folded_count("_Cilk_for (int i = 10; i >= 0; i -= 5)"), 3);
    }

    #[test]
    fn narrow_types_count_in_unsigned_int() {
        let bounds = analyze_header("_Cilk_for (short s = -4; s < 4; s++)").unwrap().bounds;
        assert_eq!(bounds.width, Width::W32);
        assert_eq!(bounds.count_ty, Type::int(Scalar::Int, false));
        let count = bounds.trip_count(bounds.first.clone(), bounds.limit.clone(), None);
        assert_eq!(const_eval(&count), Some(8));
    }

    #[test]
    fn wide_and_pointer_types_count_in_64_bits() {
        let bounds = analyze_header("_Cilk_for (long i = 0; i < n; i++)").unwrap().bounds;
        assert_eq!(bounds.width, Width::W64);
        let bounds = analyze_header("_Cilk_for (int *q = p; q != p + 8; ++q)").unwrap().bounds;
        assert_eq!(bounds.width, Width::W64);
        assert_eq!(bounds.direction, Direction::Up);
    }

    #[test]
    fn dynamic_stride_with_not_equal() {
        let bounds = analyze_header("_Cilk_for (long i = 0; i != n; i += n)").unwrap().bounds;
        assert_eq!(bounds.direction, Direction::Dynamic);
        let count = bounds.trip_count(
            Expr::ident("b"),
            Expr::ident("e"),
            Some(Expr::ident("s")),
        );
        assert_eq!(
            count.to_string(),
            "(unsigned long)(s > 0 ? ((unsigned long)e - (unsigned long)b) / (unsigned long)s \
             : ((unsigned long)b - (unsigned long)e) / (unsigned long)-s)"
        );
    }

    #[test]
    fn control_value_rebuilds_from_index() {
        let bounds = analyze_header("_Cilk_for (int i = 55; i != 27; i -= 4)").unwrap().bounds;
        let value = bounds.control_value(Expr::int(55), Expr::int(3), None);
        assert_eq!(const_eval(&value), Some(43));
        assert_eq!(value.to_string(), "(int)((unsigned int)55 - 3 * (unsigned int)4)");
    }

    #[test]
    fn rejects_malformed_headers() {
        let kind = |source: &str| analyze_header(source).unwrap_err().kind;
        assert_eq!(kind("_Cilk_for (int i = 0; i < 10; i--)"), DiagnosticKind::InconsistentDirection);
        assert_eq!(kind("_Cilk_for (int i = 0; i > 10; i++)"), DiagnosticKind::InconsistentDirection);
        assert_eq!(kind("_Cilk_for (int i = 0; i != 10; i += 0)"), DiagnosticKind::ZeroStride);
        assert_eq!(kind("_Cilk_for (int i = 0; i == 10; i++)"), DiagnosticKind::InvalidCondition);
        assert_eq!(kind("_Cilk_for (int i = 0; i < 10; i *= 2)"), DiagnosticKind::InvalidIncrement);
        assert_eq!(kind("_Cilk_for (const int i = 0; i < 10; i++)"), DiagnosticKind::InvalidControlVariable);
        assert_eq!(kind("_Cilk_for (int i = 0, j = 0; i < 10; i++)"), DiagnosticKind::InvalidControlVariable);
        assert_eq!(kind("_Cilk_for (int i = 0; i < p; i++)"), DiagnosticKind::InvalidBounds);
    }

    #[test]
    fn rejects_strides_wider_than_64_bits() {
        let kind = |source: &str| analyze_header(source).unwrap_err().kind;
        assert_eq!(kind("_Cilk_for (long i = 0; i != n; i -= (1 << 127))"), DiagnosticKind::InvalidIncrement);
        assert_eq!(kind("_Cilk_for (long i = 0; i != n; i += (1 << 64))"), DiagnosticKind::InvalidIncrement);
        assert!(analyze_header("_Cilk_for (long i = 0; i != n; i += (1 << 63))").is_ok());
    }

    #[test]
    fn warns_on_wraparound_and_signedness() {
        let warnings = analyze_header("_Cilk_for (int i = 0; i != 10; i += 3)").unwrap().warnings;
        assert_eq!(warnings[0].kind, DiagnosticKind::TripCountWraps);

        let warnings = analyze_header("_Cilk_for (char c = 0; c < 300; c++)").unwrap().warnings;
        assert_eq!(warnings[0].kind, DiagnosticKind::TripCountWraps);

        let warnings = analyze_header("_Cilk_for (int i = 0; i < u; i++)").unwrap().warnings;
        assert_eq!(warnings[0].kind, DiagnosticKind::SignednessMismatch);

        assert!(analyze_header("_Cilk_for (int i = 0; i < 10; i++)").unwrap().warnings.is_empty());
    }
}
