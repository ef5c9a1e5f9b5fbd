//! Legality of `_Cilk_spawn` and the parent/child split of a spawn statement.
//!
//! A spawn may only appear as
//!
//! * a whole expression statement: `_Cilk_spawn f(x);`
//! * the whole right side of a simple assignment: `z[i] = _Cilk_spawn f(x);`
//! * the whole initializer of a declaration: `int y = _Cilk_spawn f(x);`

use super::{Scopes, Symbols};
use crate::error::{Diagnostic, DiagnosticKind};
use crate::source::{Expr, ExprKind, Function, Stmt, StmtKind, VarDecl};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnPosition {
    ExprStmt,
    Assignment,
    Initializer,
}

/// Where the child stores the call's result.
#[derive(Debug, Clone, Copy)]
pub enum Receiver<'a> {
    Lvalue(&'a Expr),
    Declared(&'a VarDecl),
}

#[derive(Debug, Clone, Copy)]
pub struct SpawnSite<'a> {
    pub position: SpawnPosition,
    /// The spawned call, without the `_Cilk_spawn` marker.
    pub call: &'a Expr,
    pub receiver: Option<Receiver<'a>>,
}

impl SpawnSite<'_> {
    pub fn callee(&self) -> Option<&Expr> {
        match &self.call.kind {
            ExprKind::Call { callee, .. } => Some(callee),
            _ => None,
        }
    }

    pub fn args(&self) -> &[Expr] {
        match &self.call.kind {
            ExprKind::Call { args, .. } => args,
            _ => &[],
        }
    }
}

/// Finds the spawn in a statement, if any, and checks that it is legal.
/// Statements other than expression statements and declarations may not
/// contain a spawn in their own expressions.
pub fn classify<'a>(
    stmt: &'a Stmt,
    scopes: &Scopes,
    symbols: &Symbols,
) -> Result<Option<SpawnSite<'a>>, Diagnostic> {
    let site = match &stmt.kind {
        StmtKind::Expr(expr) => expression_statement(expr, scopes, symbols),
        StmtKind::Decl(decl) => initializer(decl, scopes, symbols),
        kind => {
            let context = context(kind);
            for expr in stmt.own_exprs() {
                check_no_spawn(expr, context)?;
            }
            Ok(None)
        }
    };
    site.map_err(|d| d.at("", stmt.span))
}

/// Rejects any spawn inside `expr`, naming `context` in the diagnostic.
pub fn check_no_spawn(expr: &Expr, context: &str) -> Result<(), Diagnostic> {
    if structure(expr)? > 0 {
        return Err(Diagnostic::error(
            DiagnosticKind::SpawnPlacement,
            format!("_Cilk_spawn is not allowed in {context}"),
        )
        .at("", expr.span));
    }
    Ok(())
}

pub fn check_global(decl: &VarDecl) -> Result<(), Diagnostic> {
    match &decl.init {
        Some(init) if init.contains_spawn() => Err(Diagnostic::error(
            DiagnosticKind::SpawnOutsideFunction,
            format!("_Cilk_spawn in the initializer of global '{}' is outside any function", decl.name),
        )
        .at("", decl.span)),
        _ => Ok(()),
    }
}

pub fn check_elemental(function: &Function) -> Result<(), Diagnostic> {
    if !function.elemental {
        return Ok(());
    }
    let mut spawn = None;
    for stmt in &function.body {
        stmt.visit(true, &mut |s| {
            if spawn.is_none() && s.own_exprs().iter().any(|e| e.contains_spawn()) {
                spawn = Some(s.span);
            }
        });
    }
    match spawn {
        Some(span) => Err(Diagnostic::error(
            DiagnosticKind::SpawnInElemental,
            format!("_Cilk_spawn is not allowed in elemental function '{}'", function.name),
        )
        .at(&function.name, span)),
        None => Ok(()),
    }
}

fn context(kind: &StmtKind) -> &'static str {
    match kind {
        StmtKind::If { .. } => "an if condition",
        StmtKind::While { .. } | StmtKind::DoWhile { .. } => "a loop condition",
        StmtKind::For(_) => "a for loop header",
        StmtKind::CilkFor(_) => "a _Cilk_for header",
        StmtKind::Return(_) => "a return statement",
        StmtKind::Throw(_) => "a throw expression",
        _ => "this statement",
    }
}

/// Counts the spawns of a full expression and rejects malformed ones.
fn structure(expr: &Expr) -> Result<usize, Diagnostic> {
    let mut count = 0;
    let mut error = None;
    expr.walk(&mut |e| {
        if error.is_some() {
            return;
        }
        match &e.kind {
            ExprKind::Sizeof(operand) if operand.contains_spawn() => {
                error = Some(Diagnostic::error(
                    DiagnosticKind::SpawnUnevaluated,
                    "_Cilk_spawn is not allowed in an unevaluated operand",
                ));
            }
            ExprKind::Spawn(inner) => {
                count += 1;
                error = match &inner.kind {
                    ExprKind::Spawn(_) => Some(Diagnostic::error(
                        DiagnosticKind::ConsecutiveSpawn,
                        "consecutive _Cilk_spawn tokens",
                    )),
                    ExprKind::Call { callee, args }
                        if callee.contains_spawn() || args.iter().any(Expr::contains_spawn) =>
                    {
                        Some(Diagnostic::error(
                            DiagnosticKind::NestedSpawn,
                            "_Cilk_spawn is not allowed in the arguments of a spawned call",
                        ))
                    }
                    ExprKind::Call { .. } => None,
                    _ => Some(Diagnostic::error(
                        DiagnosticKind::SpawnNotCall,
                        format!("'{inner}' is not a function call and cannot be spawned"),
                    )),
                };
                if let Some(diagnostic) = error.take() {
                    error = Some(diagnostic.at("", e.span));
                }
            }
            _ => {}
        }
    });
    if let Some(error) = error {
        return Err(error);
    }
    if count > 1 {
        return Err(Diagnostic::error(
            DiagnosticKind::MultipleSpawns,
            "multiple spawn calls within a full expression",
        )
        .at("", expr.span));
    }
    Ok(count)
}

fn misplaced(expr: &Expr) -> Diagnostic {
    Diagnostic::error(
        DiagnosticKind::SpawnPlacement,
        "_Cilk_spawn must be the whole statement, the right side of a simple assignment or a whole initializer",
    )
    .at("", expr.span)
}

fn expression_statement<'a>(
    expr: &'a Expr,
    scopes: &Scopes,
    symbols: &Symbols,
) -> Result<Option<SpawnSite<'a>>, Diagnostic> {
    let count = structure(expr)?;
    match &expr.kind {
        ExprKind::Spawn(call) => Ok(Some(SpawnSite {
            position: SpawnPosition::ExprStmt,
            call,
            receiver: None,
        })),
        ExprKind::Assign {
            op: None,
            target,
            value,
        } if matches!(value.kind, ExprKind::Spawn(_)) => {
            let ExprKind::Spawn(call) = &value.kind else {
                return Err(misplaced(expr));
            };
            check_stores_value(call, scopes, symbols)?;
            Ok(Some(SpawnSite {
                position: SpawnPosition::Assignment,
                call,
                receiver: Some(Receiver::Lvalue(target)),
            }))
        }
        ExprKind::Assign { op: Some(op), value, .. } if value.contains_spawn() => {
            Err(Diagnostic::error(
                DiagnosticKind::SpawnPlacement,
                format!("_Cilk_spawn is not allowed in a compound assignment ('{}=')", op.symbol()),
            )
            .at("", expr.span))
        }
        _ if count > 0 => Err(misplaced(expr)),
        _ => Ok(None),
    }
}

fn initializer<'a>(
    decl: &'a VarDecl,
    scopes: &Scopes,
    symbols: &Symbols,
) -> Result<Option<SpawnSite<'a>>, Diagnostic> {
    let Some(init) = &decl.init else {
        return Ok(None);
    };
    let count = structure(init)?;
    match &init.kind {
        ExprKind::Spawn(call) => {
            if decl.ty.is_reference() {
                return Err(Diagnostic::error(
                    DiagnosticKind::SpawnResultMismatch,
                    format!("reference '{}' cannot be initialized from a spawned call", decl.name),
                )
                .at("", decl.span));
            }
            check_stores_value(call, scopes, symbols)?;
            Ok(Some(SpawnSite {
                position: SpawnPosition::Initializer,
                call,
                receiver: Some(Receiver::Declared(decl)),
            }))
        }
        _ if count > 0 => Err(misplaced(init)),
        _ => Ok(None),
    }
}

fn check_stores_value(call: &Expr, scopes: &Scopes, symbols: &Symbols) -> Result<(), Diagnostic> {
    let ExprKind::Call { callee, .. } = &call.kind else {
        return Ok(());
    };
    match symbols.callee(callee, scopes) {
        Some(sig) if sig.ret.is_void() => Err(Diagnostic::error(
            DiagnosticKind::SpawnResultMismatch,
            format!("'{callee}' returns void; its result cannot be stored"),
        )
        .at("", call.span)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::parse;

    fn classify_body(source: &str) -> Vec<Result<Option<SpawnPosition>, DiagnosticKind>> {
        let unit = parse(source).unwrap();
        let symbols = Symbols::collect(&unit);
        let scopes = Scopes::new();
        let function = unit.functions().last().unwrap();
        function
            .body
            .iter()
            .map(|stmt| {
                classify(stmt, &scopes, &symbols)
                    .map(|site| site.map(|s| s.position))
                    .map_err(|d| d.kind)
            })
            .collect()
    }

    #[test]
    fn legal_positions() {
        let results = classify_body(
            "int f(int); void g() { _Cilk_spawn f(1); x = _Cilk_spawn f(2); int y = _Cilk_spawn f(3); f(4); }",
        );
        assert_eq!(
            results,
            vec![
                Ok(Some(SpawnPosition::ExprStmt)),
                Ok(Some(SpawnPosition::Assignment)),
                Ok(Some(SpawnPosition::Initializer)),
                Ok(None),
            ]
        );
    }

    #[test]
    fn illegal_positions() {
        let results = classify_body(
            "int f(int); void g() {
                x = 1 + _Cilk_spawn f(1);
                x += _Cilk_spawn f(2);
                if (_Cilk_spawn f(3)) {}
                return _Cilk_spawn f(4);
            }",
        );
        assert_eq!(
            results,
            vec![
                Err(DiagnosticKind::SpawnPlacement),
                Err(DiagnosticKind::SpawnPlacement),
                Err(DiagnosticKind::SpawnPlacement),
                Err(DiagnosticKind::SpawnPlacement),
            ]
        );
    }

    #[test]
    fn malformed_spawns() {
        let results = classify_body(
            "int f(int); void g() {
                x = _Cilk_spawn f(1) + _Cilk_spawn f(2);
                _Cilk_spawn _Cilk_spawn f(3);
                _Cilk_spawn f(_Cilk_spawn f(4));
                _Cilk_spawn x;
                n = sizeof(_Cilk_spawn f(5));
            }",
        );
        assert_eq!(
            results,
            vec![
                Err(DiagnosticKind::MultipleSpawns),
                Err(DiagnosticKind::ConsecutiveSpawn),
                Err(DiagnosticKind::NestedSpawn),
                Err(DiagnosticKind::SpawnNotCall),
                Err(DiagnosticKind::SpawnUnevaluated),
            ]
        );
    }

    #[test]
    fn result_type_mismatches() {
        let results = classify_body(
            "void v(); int f(); void g() { x = _Cilk_spawn v(); int &r = _Cilk_spawn f(); _Cilk_spawn v(); }",
        );
        assert_eq!(
            results,
            vec![
                Err(DiagnosticKind::SpawnResultMismatch),
                Err(DiagnosticKind::SpawnResultMismatch),
                Ok(Some(SpawnPosition::ExprStmt)),
            ]
        );
    }

    #[test]
    fn spawn_outside_functions_and_in_elementals() {
        let unit = parse("int f(); int g = _Cilk_spawn f(); __declspec(vector) int h(int a) { _Cilk_spawn f(); return a; }").unwrap();
        let crate::source::Item::Global(global) = &unit.items[1] else {
            panic!("expected a global");
        };
        assert_eq!(check_global(global).unwrap_err().kind, DiagnosticKind::SpawnOutsideFunction);
        let elemental = unit.functions().next().unwrap();
        assert_eq!(check_elemental(elemental).unwrap_err().kind, DiagnosticKind::SpawnInElemental);
    }
}
