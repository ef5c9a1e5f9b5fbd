use super::{FnSig, Scopes, Symbols};
use crate::error::{Diagnostic, DiagnosticKind};
use crate::source::{CilkForInit, Expr, ExprKind, ForInit, Span, Stmt, StmtKind, UnaryOp, VarDecl};

/// Every misuse of `var` inside `body`, in source order.
pub fn check(body: &Stmt, var: &str, scopes: &Scopes, symbols: &Symbols) -> Vec<Diagnostic> {
    let mut checker = Checker {
        var,
        scopes,
        symbols,
        span: body.span,
        diagnostics: vec![],
    };
    checker.stmt(body);
    checker.diagnostics
}

struct Checker<'a> {
    var: &'a str,
    scopes: &'a Scopes,
    symbols: &'a Symbols,
    span: Span,
    diagnostics: Vec<Diagnostic>,
}

impl Checker<'_> {
    fn is_var(&self, expr: &Expr) -> bool {
        expr.as_ident() == Some(self.var)
    }

    /// `target` names the variable's own storage: `i`, `i.pos` or `*&i`.
    fn writes_var(&self, target: &Expr) -> bool {
        match &target.kind {
            ExprKind::Member { base, arrow: false, .. } => self.writes_var(base),
            ExprKind::Unary(UnaryOp::Deref, inner) => {
                matches!(&inner.kind, ExprKind::Unary(UnaryOp::AddrOf, operand) if self.writes_var(operand))
            }
            _ => self.is_var(target),
        }
    }

    fn declares_var(&self, decl: &VarDecl) -> bool {
        decl.name == self.var
    }

    fn report(&mut self, diagnostic: Diagnostic, expr: &Expr) {
        self.diagnostics
            .push(diagnostic.at("", expr.span).at("", self.span));
    }

    fn modified(&mut self, expr: &Expr) {
        let message = format!("control variable '{}' is modified in the loop body", self.var);
        self.report(
            Diagnostic::error(DiagnosticKind::ControlVariableModified, message),
            expr,
        );
    }

    fn aliased(&mut self, expr: &Expr, message: String) {
        self.report(
            Diagnostic::warning(DiagnosticKind::ControlVariableAliased, message),
            expr,
        );
    }

    /// Checks statements of a block until one of them redeclares the variable.
    fn stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
            if let StmtKind::Decl(decl) = &stmt.kind
                && self.declares_var(decl)
            {
                return;
            }
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        self.span = stmt.span;
        match &stmt.kind {
            StmtKind::Decl(decl) => self.decl(decl),
            StmtKind::Block(stmts) => self.stmts(stmts),
            StmtKind::For(for_loop) => {
                match &for_loop.init {
                    Some(ForInit::Decl(decl)) => {
                        self.decl(decl);
                        if self.declares_var(decl) {
                            return;
                        }
                    }
                    Some(ForInit::Expr(init)) => self.expr(init),
                    None => {}
                }
                for e in for_loop.cond.iter().chain(for_loop.step.iter()) {
                    self.expr(e);
                }
                self.stmt(&for_loop.body);
            }
            StmtKind::CilkFor(cilk_for) => {
                match &cilk_for.init {
                    CilkForInit::Decl(decls) => {
                        for decl in decls {
                            self.decl(decl);
                        }
                        if decls.iter().any(|d| self.declares_var(d)) {
                            return;
                        }
                    }
                    CilkForInit::Expr(init) => self.expr(init),
                }
                self.expr(&cilk_for.cond);
                self.expr(&cilk_for.step);
                if let Some(grain) = &cilk_for.grainsize {
                    self.expr(grain);
                }
                self.stmt(&cilk_for.body);
            }
            StmtKind::Try { body, handlers } => {
                self.stmts(body);
                for handler in handlers {
                    let shadows = handler
                        .param
                        .as_ref()
                        .and_then(|p| p.name.as_deref())
                        .is_some_and(|name| name == self.var);
                    if !shadows {
                        self.stmts(&handler.body);
                    }
                }
            }
            _ => {
                for e in stmt.own_exprs() {
                    self.expr(e);
                }
                for child in stmt.children() {
                    self.stmt(child);
                }
            }
        }
    }

    fn decl(&mut self, decl: &VarDecl) {
        let Some(init) = &decl.init else {
            return;
        };
        if self.is_var(init) && decl.ty.is_reference() && !decl.ty.target_is_const() {
            let message = format!(
                "control variable '{}' is bound to non-const reference '{}'",
                self.var, decl.name
            );
            self.aliased(init, message);
            return;
        }
        if let ExprKind::Unary(UnaryOp::AddrOf, operand) = &init.kind
            && self.is_var(operand)
            && decl.ty.is_pointer()
            && decl.ty.target_is_const()
        {
            return;
        }
        self.expr(init);
    }

    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Assign { target, value, .. } => {
                if self.writes_var(target) {
                    self.modified(expr);
                } else {
                    self.expr(target);
                }
                self.expr(value);
            }
            ExprKind::Step { target, .. } => {
                if self.writes_var(target) {
                    self.modified(expr);
                } else {
                    self.expr(target);
                }
            }
            ExprKind::Unary(UnaryOp::AddrOf, operand) if self.is_var(operand) => {
                let message = format!("address of control variable '{}' is taken as a non-const pointer", self.var);
                self.aliased(expr, message);
            }
            ExprKind::Call { callee, args } => self.call(expr, callee, args),
            _ => {
                for child in expr.children() {
                    self.expr(child);
                }
            }
        }
    }

    fn call(&mut self, call: &Expr, callee: &Expr, args: &[Expr]) {
        let symbols = self.symbols;
        let sig: Option<&FnSig> = symbols.callee(callee, self.scopes);
        match &callee.kind {
            ExprKind::Member { base, field, .. } if self.is_var(base) => {
                if !symbols.method(field).is_some_and(|m| m.is_const) {
                    let message = format!(
                        "non-const member function '{field}' is called on control variable '{}'",
                        self.var
                    );
                    self.aliased(call, message);
                }
            }
            _ => self.expr(callee),
        }

        for (k, arg) in args.iter().enumerate() {
            let param = sig.and_then(|s| s.params.get(k));
            if self.is_var(arg) {
                match (sig, param) {
                    (None, _) => {
                        let message = format!(
                            "control variable '{}' is passed to '{callee}', which cannot be resolved",
                            self.var
                        );
                        self.aliased(arg, message);
                    }
                    (Some(_), Some(param)) if param.is_reference() && !param.target_is_const() => {
                        let message = format!(
                            "control variable '{}' is passed by non-const reference to '{callee}'",
                            self.var
                        );
                        self.aliased(arg, message);
                    }
                    _ => {}
                }
                continue;
            }
            if let ExprKind::Unary(UnaryOp::AddrOf, operand) = &arg.kind
                && self.is_var(operand)
            {
                if !param.is_some_and(|p| p.is_pointer() && p.target_is_const()) {
                    let message = format!(
                        "address of control variable '{}' is passed to '{callee}' as a non-const pointer",
                        self.var
                    );
                    self.aliased(arg, message);
                }
                continue;
            }
            self.expr(arg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Severity;
    use crate::source::parse;

    /// Checks the body of the first `_Cilk_for` in the last function.
    fn check_loop(source: &str) -> Vec<(DiagnosticKind, Severity)> {
        let unit = parse(source).unwrap();
        let symbols = Symbols::collect(&unit);
        let function = unit.functions().last().unwrap();
        let mut cilk_for = None;
        for stmt in &function.body {
            stmt.visit(false, &mut |s| {
                if cilk_for.is_none()
                    && let StmtKind::CilkFor(cf) = &s.kind
                {
                    cilk_for = Some(cf);
                }
            });
        }
        let cilk_for = cilk_for.unwrap();
        check(&cilk_for.body, "i", &Scopes::new(), &symbols)
            .into_iter()
            .map(|d| (d.kind, d.severity))
            .collect()
    }

    #[test]
    fn assignment_is_rejected() {
        let found = check_loop("void f(int n) { _Cilk_for (int i = 0; i < n; i++) { i = 5; } }");
        assert_eq!(found, vec![(DiagnosticKind::ControlVariableModified, Severity::Error)]);
    }

    #[test]
    fn reads_are_accepted() {
        let found = check_loop("void f(int n) { _Cilk_for (int i = 0; i < n; i++) { int j = i; } }");
        assert!(found.is_empty());
    }

    #[test]
    fn writes_in_nested_loops_are_rejected() {
        let found = check_loop(
            "void f(int n) { _Cilk_for (int i = 0; i < n; i++) { for (int k = 0; k < n; k++) i += k; while (n) --i; } }",
        );
        assert_eq!(
            found,
            vec![
                (DiagnosticKind::ControlVariableModified, Severity::Error),
                (DiagnosticKind::ControlVariableModified, Severity::Error),
            ]
        );
    }

    #[test]
    fn shadowing_declarations_stop_the_check() {
        let found = check_loop(
            "void f(int n) { _Cilk_for (int i = 0; i < n; i++) { \
               { int i = 0; i = 5; } \
               for (int i = 0; i < 3; i++) {} \
               _Cilk_for (int i = 0; i < 3; i++) { i = 1; } \
             } }",
        );
        assert!(found.is_empty());
    }

    #[test]
    fn escaping_references_warn() {
        let found = check_loop(
            "void bump(int &x); void peek(const int &x); void fill(int *p); void show(const int *p); \
             void f(int n) { _Cilk_for (int i = 0; i < n; i++) { \
               int *p = &i; const int *q = &i; int &r = i; const int &c = i; \
               bump(i); peek(i); fill(&i); show(&i); unknown(i); \
             } }",
        );
        let warnings = found
            .iter()
            .filter(|(kind, severity)| {
                *kind == DiagnosticKind::ControlVariableAliased && *severity == Severity::Warning
            })
            .count();
        // p, r, bump, fill, unknown
        assert_eq!(warnings, 5);
        assert_eq!(found.len(), 5);
    }

    #[test]
    fn member_calls_on_class_control_variables() {
        let found = check_loop(
            "int Iter::get() const; void Iter::reset(); \
             void f(Iter a, Iter b) { _Cilk_for (Iter i = a; i != b; ++i) { int v = i.get(); i.reset(); } }",
        );
        assert_eq!(found, vec![(DiagnosticKind::ControlVariableAliased, Severity::Warning)]);
    }

    #[test]
    fn writes_to_members_and_through_its_own_address_are_rejected() {
        let found = check_loop(
            "void f(Iter a, Iter b, int n) { _Cilk_for (Iter i = a; i != b; ++i) { i.pos = 0; *&i = a; i.pos++; } }",
        );
        assert_eq!(found, vec![(DiagnosticKind::ControlVariableModified, Severity::Error); 3]);

        let found = check_loop("void f(Node **a, Node **b) { _Cilk_for (Node **i = a; i != b; ++i) { (*i)->seen = 1; } }");
        assert!(found.is_empty());
    }
}
