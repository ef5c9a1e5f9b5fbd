use std::sync::LazyLock;

use log::{debug, trace};
use pest::Parser;
use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest_derive::Parser;

use super::pragma::{ParseSession, PragmaDirective};
use super::{
    BaseType, BinaryOp, CilkFor, CilkForInit, Expr, ExprKind, ForInit, ForLoop, Function, Handler,
    Indirection, Item, Param, Prototype, Scalar, Span, StepOp, Stmt, StmtKind, TranslationUnit,
    Type, UnaryOp, VarDecl,
};
use crate::Error;

#[derive(Parser)]
#[grammar = "../grammar/cilk.pest"]
pub struct CilkParser;

static PRATT: LazyLock<PrattParser<Rule>> = LazyLock::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::AssignOp, Assoc::Right))
        .op(Op::infix(Rule::Ternary, Assoc::Right))
        .op(Op::infix(Rule::Or, Assoc::Left))
        .op(Op::infix(Rule::And, Assoc::Left))
        .op(Op::infix(Rule::BitOr, Assoc::Left))
        .op(Op::infix(Rule::BitXor, Assoc::Left))
        .op(Op::infix(Rule::BitAnd, Assoc::Left))
        .op(Op::infix(Rule::Eq, Assoc::Left) | Op::infix(Rule::Ne, Assoc::Left))
        .op(Op::infix(Rule::Lt, Assoc::Left)
            | Op::infix(Rule::Le, Assoc::Left)
            | Op::infix(Rule::Gt, Assoc::Left)
            | Op::infix(Rule::Ge, Assoc::Left))
        .op(Op::infix(Rule::Shl, Assoc::Left) | Op::infix(Rule::Shr, Assoc::Left))
        .op(Op::infix(Rule::Add, Assoc::Left) | Op::infix(Rule::Sub, Assoc::Left))
        .op(Op::infix(Rule::Mul, Assoc::Left)
            | Op::infix(Rule::Div, Assoc::Left)
            | Op::infix(Rule::Rem, Assoc::Left))
        .op(Op::prefix(Rule::SpawnOp)
            | Op::prefix(Rule::SizeofOp)
            | Op::prefix(Rule::PreInc)
            | Op::prefix(Rule::PreDec)
            | Op::prefix(Rule::Neg)
            | Op::prefix(Rule::Not)
            | Op::prefix(Rule::BitNot)
            | Op::prefix(Rule::AddrOf)
            | Op::prefix(Rule::Deref))
        .op(Op::postfix(Rule::CallArgs)
            | Op::postfix(Rule::IndexOp)
            | Op::postfix(Rule::ArrowOp)
            | Op::postfix(Rule::MemberOp)
            | Op::postfix(Rule::PostInc)
            | Op::postfix(Rule::PostDec))
});

/// Parses a translation unit with a fresh [`ParseSession`].
pub fn parse(input: &str) -> Result<TranslationUnit, Error> {
    ParseSession::new().parse(input)
}

/// Parses a single expression.
pub fn parse_expr(input: &str) -> Result<Expr, Error> {
    let mut pairs = CilkParser::parse(Rule::ExprOnly, input).map_err(syntax_error)?;
    let entry = next(&mut pairs, "expression")?;
    build_expr(next(&mut entry.into_inner(), "expression")?)
}

impl ParseSession {
    pub fn parse(&mut self, input: &str) -> Result<TranslationUnit, Error> {
        let mut pairs = CilkParser::parse(Rule::Program, input).map_err(syntax_error)?;
        let program = next(&mut pairs, "program")?;

        let mut items = vec![];
        for item in program.into_inner() {
            match item.as_rule() {
                Rule::Function => items.push(Item::Function(self.function(item)?)),
                Rule::Prototype => items.push(Item::Prototype(prototype(item)?)),
                Rule::GlobalDecl => {
                    let decl = next(&mut item.into_inner(), "declaration")?;
                    items.push(Item::Global(build_decl(decl)?));
                }
                Rule::PragmaLine => {
                    let span = span_of(&item);
                    if let Some(directive) = self.pragma(item)? {
                        return Err(misplaced_pragma(&directive, span));
                    }
                }
                Rule::EOI => break,
                rule => return Err(unexpected(rule)),
            }
        }

        debug!("parsed {} top-level items", items.len());
        Ok(TranslationUnit { items })
    }

    fn function(&mut self, pair: Pair<'_, Rule>) -> Result<Function, Error> {
        let span = span_of(&pair);
        let mut signature = Signature::default();
        let mut body = None;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::Block => body = Some(self.block(part)?),
                _ => signature.absorb(part)?,
            }
        }
        trace!("function '{}' at {}:{}", signature.name, span.line, span.col);
        Ok(Function {
            name: signature.name,
            ret: signature.ret.unwrap_or_else(Type::void),
            params: signature.params,
            body: body.unwrap_or_default(),
            elemental: signature.elemental,
            is_const: signature.is_const,
            span,
        })
    }

    fn pragma(&mut self, pair: Pair<'_, Rule>) -> Result<Option<PragmaDirective>, Error> {
        let text = pair
            .into_inner()
            .next()
            .map(|text| text.as_str().trim().to_string())
            .unwrap_or_default();
        self.registry().dispatch(&text)
    }

    fn block(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Stmt>, Error> {
        let mut stmts = vec![];
        let mut pending: Option<(PragmaDirective, Span)> = None;

        for stmt in pair.into_inner() {
            let inner = next(&mut stmt.into_inner(), "statement")?;
            if inner.as_rule() == Rule::PragmaLine {
                let span = span_of(&inner);
                if let Some((directive, span)) = pending.take() {
                    return Err(misplaced_pragma(&directive, span));
                }
                pending = self.pragma(inner)?.map(|directive| (directive, span));
                continue;
            }

            let mut stmt = self.stmt_inner(inner)?;
            if let Some((directive, span)) = pending.take() {
                attach(&mut stmt, directive, span)?;
            }
            stmts.push(stmt);
        }

        match pending {
            Some((directive, span)) => Err(misplaced_pragma(&directive, span)),
            None => Ok(stmts),
        }
    }

    fn stmt(&mut self, pair: Pair<'_, Rule>) -> Result<Stmt, Error> {
        let inner = next(&mut pair.into_inner(), "statement")?;
        if inner.as_rule() == Rule::PragmaLine {
            let span = span_of(&inner);
            return Err(Error::ParseError(format!(
                "{}:{}: a pragma must appear inside a block",
                span.line, span.col
            )));
        }
        self.stmt_inner(inner)
    }

    fn stmt_inner(&mut self, pair: Pair<'_, Rule>) -> Result<Stmt, Error> {
        let span = span_of(&pair);
        let id = self.next_id();
        if pair.as_rule() == Rule::Block {
            return Ok(Stmt::new(id, span, StmtKind::Block(self.block(pair)?)));
        }
        let rule = pair.as_rule();
        let mut inner = parts(pair);

        let kind = match rule {
            Rule::IfStmt => {
                let cond = build_expr(next(&mut inner, "condition")?)?;
                let then = self.stmt(next(&mut inner, "statement")?)?;
                let otherwise = match inner.next() {
                    Some(clause) => {
                        let stmt = next(&mut parts(clause), "else branch")?;
                        Some(Box::new(self.stmt(stmt)?))
                    }
                    None => None,
                };
                StmtKind::If {
                    cond,
                    then: Box::new(then),
                    otherwise,
                }
            }
            Rule::WhileStmt => {
                let cond = build_expr(next(&mut inner, "condition")?)?;
                let body = self.stmt(next(&mut inner, "loop body")?)?;
                StmtKind::While {
                    cond,
                    body: Box::new(body),
                }
            }
            Rule::DoStmt => {
                let body = self.stmt(next(&mut inner, "loop body")?)?;
                let cond = build_expr(next(&mut inner, "condition")?)?;
                StmtKind::DoWhile {
                    body: Box::new(body),
                    cond,
                }
            }
            Rule::ForStmt => {
                let (mut init, mut cond, mut step, mut body) = (None, None, None, None);
                for part in inner {
                    match part.as_rule() {
                        Rule::ForInit => {
                            let clause = next(&mut part.into_inner(), "for initializer")?;
                            init = Some(match clause.as_rule() {
                                Rule::Decl => ForInit::Decl(build_decl(clause)?),
                                _ => ForInit::Expr(build_expr(clause)?),
                            });
                        }
                        Rule::ForCond => cond = Some(build_expr(next(&mut part.into_inner(), "condition")?)?),
                        Rule::ForStep => step = Some(build_expr(next(&mut part.into_inner(), "increment")?)?),
                        Rule::Stmt => body = Some(self.stmt(part)?),
                        rule => return Err(unexpected(rule)),
                    }
                }
                StmtKind::For(Box::new(ForLoop {
                    init,
                    cond,
                    step,
                    body: body.ok_or_else(|| missing("loop body"))?,
                    simd: None,
                }))
            }
            Rule::CilkForStmt => {
                let init = cilk_for_init(next(&mut inner, "_Cilk_for initializer")?)?;
                let cond = build_expr(next(&mut inner, "condition")?)?;
                let step = build_expr(next(&mut inner, "increment")?)?;
                let body = self.stmt(next(&mut inner, "loop body")?)?;
                StmtKind::CilkFor(Box::new(CilkFor {
                    init,
                    cond,
                    step,
                    body,
                    grainsize: None,
                }))
            }
            Rule::SyncStmt => StmtKind::Sync,
            Rule::ReturnStmt => StmtKind::Return(inner.next().map(build_expr).transpose()?),
            Rule::ThrowStmt => StmtKind::Throw(inner.next().map(build_expr).transpose()?),
            Rule::BreakStmt => StmtKind::Break,
            Rule::ContinueStmt => StmtKind::Continue,
            Rule::GotoStmt => StmtKind::Goto(next(&mut inner, "label")?.as_str().to_string()),
            Rule::TryStmt => {
                let body = self.block(next(&mut inner, "try block")?)?;
                let mut handlers = vec![];
                for handler in inner {
                    let mut pieces = handler.into_inner();
                    let head = next(&mut pieces, "catch parameter")?;
                    let param = match head.as_rule() {
                        Rule::CatchAll => None,
                        _ => Some(build_param(head)?),
                    };
                    let body = self.block(next(&mut pieces, "handler block")?)?;
                    handlers.push(Handler { param, body });
                }
                StmtKind::Try { body, handlers }
            }
            Rule::LabeledStmt => {
                let label = next(&mut inner, "label")?.as_str().to_string();
                let stmt = self.stmt(next(&mut inner, "labeled statement")?)?;
                StmtKind::Label(label, Box::new(stmt))
            }
            Rule::DeclStmt => StmtKind::Decl(build_decl(next(&mut inner, "declaration")?)?),
            Rule::ExprStmt => StmtKind::Expr(build_expr(next(&mut inner, "expression")?)?),
            Rule::EmptyStmt => StmtKind::Empty,
            rule => return Err(unexpected(rule)),
        };

        Ok(Stmt::new(id, span, kind))
    }
}

fn attach(stmt: &mut Stmt, directive: PragmaDirective, span: Span) -> Result<(), Error> {
    match (directive, &mut stmt.kind) {
        (PragmaDirective::Grainsize(grain), StmtKind::CilkFor(cilk_for)) => {
            cilk_for.grainsize = Some(grain);
            Ok(())
        }
        (PragmaDirective::Simd(hint), StmtKind::For(for_loop)) => {
            for_loop.simd = Some(hint);
            Ok(())
        }
        (directive, _) => Err(misplaced_pragma(&directive, span)),
    }
}

fn misplaced_pragma(directive: &PragmaDirective, span: Span) -> Error {
    Error::ParseError(format!(
        "{}:{}: `#pragma {}` must immediately precede {}",
        span.line,
        span.col,
        directive.name(),
        directive.target()
    ))
}

#[derive(Default)]
struct Signature {
    name: String,
    ret: Option<Type>,
    params: Vec<Param>,
    elemental: bool,
    is_const: bool,
}

impl Signature {
    fn absorb(&mut self, part: Pair<'_, Rule>) -> Result<(), Error> {
        match part.as_rule() {
            Rule::FnAttr => self.elemental = true,
            Rule::Type => self.ret = Some(build_type(part)?),
            Rule::QualName => self.name = part.as_str().to_string(),
            Rule::Params => {
                self.params = part.into_inner().map(build_param).collect::<Result<_, _>>()?;
            }
            Rule::FnConst => self.is_const = true,
            rule => return Err(unexpected(rule)),
        }
        Ok(())
    }
}

fn prototype(pair: Pair<'_, Rule>) -> Result<Prototype, Error> {
    let span = span_of(&pair);
    let mut signature = Signature::default();
    for part in pair.into_inner() {
        signature.absorb(part)?;
    }
    Ok(Prototype {
        name: signature.name,
        ret: signature.ret.unwrap_or_else(Type::void),
        params: signature.params,
        elemental: signature.elemental,
        is_const: signature.is_const,
        span,
    })
}

fn cilk_for_init(pair: Pair<'_, Rule>) -> Result<CilkForInit, Error> {
    let mut inner = pair.into_inner();
    let first = next(&mut inner, "_Cilk_for initializer")?;
    if first.as_rule() != Rule::Decl {
        return Ok(CilkForInit::Expr(build_expr(first)?));
    }

    let first = build_decl(first)?;
    let mut decls = vec![];
    for extra in inner {
        let span = span_of(&extra);
        let mut parts = extra.into_inner();
        let name = next(&mut parts, "declarator")?.as_str().to_string();
        let init = parts.next().map(build_expr).transpose()?;
        decls.push(VarDecl {
            name,
            ty: Type {
                array: None,
                ..first.ty.clone()
            },
            init,
            span,
        });
    }
    decls.insert(0, first);
    Ok(CilkForInit::Decl(decls))
}

fn build_param(pair: Pair<'_, Rule>) -> Result<Param, Error> {
    let mut ty = None;
    let mut name = None;
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::Type => ty = Some(build_type(part)?),
            Rule::Ident => name = Some(part.as_str().to_string()),
            Rule::ArraySuffix => {
                // array parameters decay to pointers
                if let Some(ty) = ty.as_mut() {
                    ty.indirection.push(Indirection::Pointer { is_const: false });
                }
            }
            rule => return Err(unexpected(rule)),
        }
    }
    Ok(Param {
        name,
        ty: ty.ok_or_else(|| missing("parameter type"))?,
    })
}

fn build_decl(pair: Pair<'_, Rule>) -> Result<VarDecl, Error> {
    let span = span_of(&pair);
    let mut inner = pair.into_inner();
    let mut ty = build_type(next(&mut inner, "type")?)?;
    let name = next(&mut inner, "declarator")?.as_str().to_string();
    let mut init = None;
    for part in inner {
        match part.as_rule() {
            Rule::ArraySuffix => {
                ty.array = Some(
                    part.into_inner()
                        .next()
                        .map(|len| int_value(len.as_str()).map(|(value, _, _)| value))
                        .transpose()?,
                );
            }
            Rule::Expr => init = Some(build_expr(part)?),
            rule => return Err(unexpected(rule)),
        }
    }
    Ok(VarDecl {
        name,
        ty,
        init,
        span,
    })
}

fn build_type(pair: Pair<'_, Rule>) -> Result<Type, Error> {
    let mut ty = Type::void();
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::TypeQual => match part.as_str() {
                "const" => ty.is_const = true,
                "volatile" => ty.is_volatile = true,
                _ => ty.is_static = true,
            },
            Rule::BaseType => ty.base = base_type(next(&mut part.into_inner(), "base type")?)?,
            Rule::Declarator => {
                let declarator = next(&mut part.into_inner(), "declarator")?;
                ty.indirection.push(match declarator.as_rule() {
                    Rule::PtrDecl => Indirection::Pointer {
                        is_const: declarator.into_inner().next().is_some(),
                    },
                    _ => Indirection::Reference,
                });
            }
            rule => return Err(unexpected(rule)),
        }
    }
    Ok(ty)
}

fn base_type(pair: Pair<'_, Rule>) -> Result<BaseType, Error> {
    if pair.as_rule() == Rule::ClassName {
        let name = pair.as_str();
        let name = name
            .strip_prefix("struct")
            .or_else(|| name.strip_prefix("class"))
            .filter(|rest| rest.starts_with(char::is_whitespace))
            .unwrap_or(name)
            .trim();
        return Ok(BaseType::Named(name.to_string()));
    }

    let mut signed = None;
    let mut words = vec![];
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::Sign => signed = Some(part.as_str() == "signed"),
            _ => words.push(part.as_str()),
        }
    }

    let scalar = match words.as_slice() {
        ["void"] if signed.is_none() => return Ok(BaseType::Void),
        ["bool"] if signed.is_none() => Scalar::Bool,
        [] | ["int"] => Scalar::Int,
        ["char"] => Scalar::Char,
        ["short"] | ["short", "int"] => Scalar::Short,
        ["long"] | ["long", "int"] => Scalar::Long,
        ["long", "long"] | ["long", "long", "int"] => Scalar::LongLong,
        other => {
            return Err(Error::ParseError(format!(
                "unsupported type specifier `{}`",
                other.join(" ")
            )));
        }
    };

    Ok(BaseType::Int {
        scalar,
        signed: signed.unwrap_or(scalar != Scalar::Bool),
    })
}

pub(crate) fn build_expr(pair: Pair<'_, Rule>) -> Result<Expr, Error> {
    PRATT
        .map_primary(primary)
        .map_prefix(|op, rhs| prefix(op, rhs?))
        .map_postfix(|lhs, op| postfix(lhs?, op))
        .map_infix(|lhs, op, rhs| infix(lhs?, op, rhs?))
        .parse(pair.into_inner())
}

fn primary(pair: Pair<'_, Rule>) -> Result<Expr, Error> {
    let span = span_of(&pair);
    let kind = match pair.as_rule() {
        Rule::IntLit => {
            let (value, unsigned, long) = int_value(pair.as_str())?;
            ExprKind::Int {
                value,
                unsigned,
                long,
            }
        }
        Rule::BoolLit => ExprKind::Bool(pair.as_str() == "true"),
        Rule::Ident => ExprKind::Ident(pair.as_str().to_string()),
        Rule::Expr => return build_expr(pair),
        rule => return Err(unexpected(rule)),
    };
    Ok(Expr { kind, span })
}

fn prefix(op: Pair<'_, Rule>, operand: Expr) -> Result<Expr, Error> {
    let span = span_of(&op);
    let operand = Box::new(operand);
    let kind = match op.as_rule() {
        Rule::SpawnOp => ExprKind::Spawn(operand),
        Rule::SizeofOp => ExprKind::Sizeof(operand),
        Rule::PreInc => ExprKind::Step {
            op: StepOp::Inc,
            prefix: true,
            target: operand,
        },
        Rule::PreDec => ExprKind::Step {
            op: StepOp::Dec,
            prefix: true,
            target: operand,
        },
        Rule::Neg => ExprKind::Unary(UnaryOp::Neg, operand),
        Rule::Not => ExprKind::Unary(UnaryOp::Not, operand),
        Rule::BitNot => ExprKind::Unary(UnaryOp::BitNot, operand),
        Rule::AddrOf => ExprKind::Unary(UnaryOp::AddrOf, operand),
        Rule::Deref => ExprKind::Unary(UnaryOp::Deref, operand),
        rule => return Err(unexpected(rule)),
    };
    Ok(Expr { kind, span })
}

fn postfix(operand: Expr, op: Pair<'_, Rule>) -> Result<Expr, Error> {
    let span = operand.span;
    let operand = Box::new(operand);
    let kind = match op.as_rule() {
        Rule::CallArgs => ExprKind::Call {
            callee: operand,
            args: op.into_inner().map(build_expr).collect::<Result<_, _>>()?,
        },
        Rule::IndexOp => ExprKind::Index(operand, Box::new(build_expr(next(&mut op.into_inner(), "index")?)?)),
        Rule::ArrowOp | Rule::MemberOp => {
            let arrow = op.as_rule() == Rule::ArrowOp;
            ExprKind::Member {
                base: operand,
                field: next(&mut op.into_inner(), "member name")?.as_str().to_string(),
                arrow,
            }
        }
        Rule::PostInc => ExprKind::Step {
            op: StepOp::Inc,
            prefix: false,
            target: operand,
        },
        Rule::PostDec => ExprKind::Step {
            op: StepOp::Dec,
            prefix: false,
            target: operand,
        },
        rule => return Err(unexpected(rule)),
    };
    Ok(Expr { kind, span })
}

fn infix(lhs: Expr, op: Pair<'_, Rule>, rhs: Expr) -> Result<Expr, Error> {
    let span = lhs.span;
    let kind = match op.as_rule() {
        Rule::AssignOp => {
            let compound = match op.as_str() {
                "=" => None,
                "+=" => Some(BinaryOp::Add),
                "-=" => Some(BinaryOp::Sub),
                "*=" => Some(BinaryOp::Mul),
                "/=" => Some(BinaryOp::Div),
                "%=" => Some(BinaryOp::Rem),
                "<<=" => Some(BinaryOp::Shl),
                ">>=" => Some(BinaryOp::Shr),
                "&=" => Some(BinaryOp::BitAnd),
                "|=" => Some(BinaryOp::BitOr),
                _ => Some(BinaryOp::BitXor),
            };
            ExprKind::Assign {
                op: compound,
                target: Box::new(lhs),
                value: Box::new(rhs),
            }
        }
        Rule::Ternary => {
            let then = build_expr(next(&mut op.into_inner(), "conditional branch")?)?;
            ExprKind::Conditional(Box::new(lhs), Box::new(then), Box::new(rhs))
        }
        rule => ExprKind::Binary(binary_op(rule)?, Box::new(lhs), Box::new(rhs)),
    };
    Ok(Expr { kind, span })
}

fn binary_op(rule: Rule) -> Result<BinaryOp, Error> {
    Ok(match rule {
        Rule::Or => BinaryOp::Or,
        Rule::And => BinaryOp::And,
        Rule::BitOr => BinaryOp::BitOr,
        Rule::BitXor => BinaryOp::BitXor,
        Rule::BitAnd => BinaryOp::BitAnd,
        Rule::Eq => BinaryOp::Eq,
        Rule::Ne => BinaryOp::Ne,
        Rule::Lt => BinaryOp::Lt,
        Rule::Le => BinaryOp::Le,
        Rule::Gt => BinaryOp::Gt,
        Rule::Ge => BinaryOp::Ge,
        Rule::Shl => BinaryOp::Shl,
        Rule::Shr => BinaryOp::Shr,
        Rule::Add => BinaryOp::Add,
        Rule::Sub => BinaryOp::Sub,
        Rule::Mul => BinaryOp::Mul,
        Rule::Div => BinaryOp::Div,
        Rule::Rem => BinaryOp::Rem,
        rule => return Err(unexpected(rule)),
    })
}

/// Value and `(unsigned, long)` suffix flags of an integer literal.
pub(crate) fn int_value(text: &str) -> Result<(u64, bool, bool), Error> {
    let digits = text.trim_end_matches(['u', 'U', 'l', 'L']);
    let suffix = text[digits.len()..].to_ascii_lowercase();
    let value = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => digits.parse(),
    }
    .map_err(|e| Error::ParseError(format!("integer literal `{text}`: {e}")))?;
    Ok((value, suffix.contains('u'), suffix.contains('l')))
}

/// Inner pairs without the keyword tokens the grammar keeps for word boundaries.
fn parts(pair: Pair<'_, Rule>) -> impl Iterator<Item = Pair<'_, Rule>> {
    pair.into_inner().filter(|part| {
        !matches!(
            part.as_rule(),
            Rule::KwElse | Rule::KwDo | Rule::KwReturn | Rule::KwGoto | Rule::KwThrow
        )
    })
}

fn next<'i>(
    pairs: &mut impl Iterator<Item = Pair<'i, Rule>>,
    what: &str,
) -> Result<Pair<'i, Rule>, Error> {
    pairs.next().ok_or_else(|| missing(what))
}

fn span_of(pair: &Pair<'_, Rule>) -> Span {
    let (line, col) = pair.as_span().start_pos().line_col();
    Span { line, col }
}

fn missing(what: &str) -> Error {
    Error::ParseError(format!("malformed syntax tree: missing {what}"))
}

fn unexpected(rule: Rule) -> Error {
    Error::ParseError(format!("malformed syntax tree: unexpected {rule:?}"))
}

pub(crate) fn syntax_error(error: pest::error::Error<Rule>) -> Error {
    Error::ParseError(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(source: &str) -> Vec<Stmt> {
        let unit = parse(source).unwrap();
        unit.functions().next().unwrap().body.clone()
    }

    #[test]
    fn parses_spawn_initializer() {
        let stmts = body("int fib(int n) { int x = _Cilk_spawn fib(n - 1); return x; }");
        let StmtKind::Decl(decl) = &stmts[0].kind else {
            panic!("expected a declaration, got {:?}", stmts[0].kind);
        };
        assert_eq!(decl.name, "x");
        let init = decl.init.as_ref().unwrap();
        assert!(matches!(&init.kind, ExprKind::Spawn(call) if matches!(call.kind, ExprKind::Call { .. })));
        assert!(matches!(stmts[1].kind, StmtKind::Return(Some(_))));
    }

    #[test]
    fn keywords_need_a_word_boundary() {
        let stmts = body("void f() { int returned = 1; returned = 2; dox(); }");
        assert!(matches!(stmts[0].kind, StmtKind::Decl(_)));
        assert!(matches!(stmts[1].kind, StmtKind::Expr(_)));
        assert!(matches!(stmts[2].kind, StmtKind::Expr(_)));
    }

    #[test]
    fn operator_precedence() {
        let expr = parse_expr("a = b + c * d < e ? f : g").unwrap();
        assert_eq!(expr.to_string(), "a = b + c * d < e ? f : g");
        let ExprKind::Assign { value, .. } = &expr.kind else {
            panic!("expected an assignment");
        };
        assert!(matches!(value.kind, ExprKind::Conditional(..)));

        let expr = parse_expr("-x[3]++").unwrap();
        assert!(matches!(expr.kind, ExprKind::Unary(UnaryOp::Neg, _)));
    }

    #[test]
    fn integer_suffixes_and_hex() {
        assert_eq!(int_value("10").unwrap(), (10, false, false));
        assert_eq!(int_value("0x1Ful").unwrap(), (31, true, true));
        assert_eq!(int_value("7LL").unwrap(), (7, false, true));
    }

    #[test]
    fn types_and_qualifiers() {
        let unit = parse(
            "unsigned long long total; const int *const table; void Widget::poke(int &x) const;",
        )
        .unwrap();
        let Item::Global(total) = &unit.items[0] else {
            panic!("expected a global");
        };
        assert_eq!(total.ty.int_bits(), Some(64));
        assert!(!total.ty.is_signed());

        let Item::Global(table) = &unit.items[1] else {
            panic!("expected a global");
        };
        assert!(table.ty.is_pointer());
        assert!(table.ty.is_top_const());
        assert!(table.ty.target_is_const());

        let Item::Prototype(poke) = &unit.items[2] else {
            panic!("expected a prototype");
        };
        assert_eq!(poke.name, "Widget::poke");
        assert!(poke.is_const);
        assert!(poke.params[0].ty.is_reference());
    }

    #[test]
    fn cilk_for_with_grainsize_pragma() {
        let stmts = body(
            "void f(int n) {
                #pragma cilk grainsize = 4
                _Cilk_for (int i = 0; i < n; ++i) { g(i); }
            }",
        );
        let StmtKind::CilkFor(cilk_for) = &stmts[0].kind else {
            panic!("expected a _Cilk_for");
        };
        assert_eq!(cilk_for.grainsize.as_ref().unwrap().to_string(), "4");
        assert!(matches!(&cilk_for.init, CilkForInit::Decl(decls) if decls.len() == 1));
    }

    #[test]
    fn grainsize_pragma_must_precede_cilk_for() {
        let result = parse(
            "void f(int n) {
                #pragma cilk grainsize = 4
                n = n + 1;
            }",
        );
        assert!(matches!(result, Err(Error::ParseError(msg)) if msg.contains("_Cilk_for")));
    }

    #[test]
    fn try_catch_and_labels() {
        let stmts = body(
            "void f() {
                try { g(); } catch (int e) { h(e); } catch (...) { throw; }
                done: return;
            }",
        );
        let StmtKind::Try { handlers, .. } = &stmts[0].kind else {
            panic!("expected a try block");
        };
        assert_eq!(handlers.len(), 2);
        assert!(handlers[1].param.is_none());
        assert!(matches!(&stmts[1].kind, StmtKind::Label(name, _) if name == "done"));
    }

    #[test]
    fn statement_ids_are_unique() {
        let stmts = body("void f() { { a(); b(); } while (x) { c(); } }");
        let mut ids = vec![];
        for stmt in &stmts {
            stmt.visit(true, &mut |s| ids.push(s.id));
        }
        let count = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), count);
    }
}
