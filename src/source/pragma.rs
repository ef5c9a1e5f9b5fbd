use std::collections::HashMap;
use std::fmt;

use log::{debug, warn};
use pest::Parser;
use pest::iterators::Pair;

use super::parse::{CilkParser, Rule, build_expr, int_value, syntax_error};
use super::{Expr, StmtId};
use crate::Error;

/// A pragma that changes how the following loop is lowered.
#[derive(Debug, Clone)]
pub enum PragmaDirective {
    /// `#pragma cilk grainsize = expr`
    Grainsize(Expr),
    /// `#pragma simd ...`
    Simd(SimdHint),
}

impl PragmaDirective {
    pub fn name(&self) -> &'static str {
        match self {
            PragmaDirective::Grainsize(_) => "cilk grainsize",
            PragmaDirective::Simd(_) => "simd",
        }
    }

    /// The statement the directive has to be attached to.
    pub fn target(&self) -> &'static str {
        match self {
            PragmaDirective::Grainsize(_) => "a _Cilk_for loop",
            PragmaDirective::Simd(_) => "a for loop",
        }
    }
}

/// Vectorization clauses of a `#pragma simd` loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimdHint {
    pub vector_length: Vec<u64>,
    /// Variable and its per-iteration step.
    pub linear: Vec<(String, u64)>,
    pub private: Vec<String>,
    pub firstprivate: Vec<String>,
    pub lastprivate: Vec<String>,
    /// Operator and the variables reduced with it.
    pub reductions: Vec<(String, Vec<String>)>,
}

impl fmt::Display for SimdHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("simd")?;
        if !self.vector_length.is_empty() {
            let lengths: Vec<_> = self.vector_length.iter().map(u64::to_string).collect();
            write!(f, " vectorlength({})", lengths.join(", "))?;
        }
        if !self.linear.is_empty() {
            let items: Vec<_> = self
                .linear
                .iter()
                .map(|(name, step)| format!("{name}:{step}"))
                .collect();
            write!(f, " linear({})", items.join(", "))?;
        }
        for (clause, names) in [
            ("private", &self.private),
            ("firstprivate", &self.firstprivate),
            ("lastprivate", &self.lastprivate),
        ] {
            if !names.is_empty() {
                write!(f, " {clause}({})", names.join(", "))?;
            }
        }
        for (op, names) in &self.reductions {
            write!(f, " reduction({op}:{})", names.join(", "))?;
        }
        Ok(())
    }
}

pub trait PragmaHandler {
    /// First word after `#pragma` this handler is responsible for.
    fn namespace(&self) -> &'static str;

    /// Parses the text following the namespace word.
    fn handle(&self, body: &str) -> Result<PragmaDirective, Error>;
}

struct CilkPragma;

impl PragmaHandler for CilkPragma {
    fn namespace(&self) -> &'static str {
        "cilk"
    }

    fn handle(&self, body: &str) -> Result<PragmaDirective, Error> {
        let mut pairs = CilkParser::parse(Rule::CilkPragma, body).map_err(syntax_error)?;
        let grain = pairs
            .next()
            .and_then(|pragma| pragma.into_inner().find(|p| p.as_rule() == Rule::Expr))
            .ok_or_else(|| Error::ParseError(format!("malformed `#pragma cilk {body}`")))?;
        Ok(PragmaDirective::Grainsize(build_expr(grain)?))
    }
}

struct SimdPragma;

impl PragmaHandler for SimdPragma {
    fn namespace(&self) -> &'static str {
        "simd"
    }

    fn handle(&self, body: &str) -> Result<PragmaDirective, Error> {
        let mut hint = SimdHint::default();
        let pairs = CilkParser::parse(Rule::SimdPragma, body).map_err(syntax_error)?;
        for clause in pairs.flat_map(|pragma| pragma.into_inner()) {
            match clause.as_rule() {
                Rule::VectorLength => {
                    for length in clause.into_inner() {
                        hint.vector_length.push(int_value(length.as_str())?.0);
                    }
                }
                Rule::Linear => {
                    for item in clause.into_inner() {
                        let mut parts = item.into_inner();
                        let name = parts.next().map(|p| p.as_str().to_string()).unwrap_or_default();
                        let step = match parts.next() {
                            Some(step) => int_value(step.as_str())?.0,
                            None => 1,
                        };
                        hint.linear.push((name, step));
                    }
                }
                Rule::Private => hint.private.extend(ident_list(clause)),
                Rule::FirstPrivate => hint.firstprivate.extend(ident_list(clause)),
                Rule::LastPrivate => hint.lastprivate.extend(ident_list(clause)),
                Rule::Reduction => {
                    let mut parts = clause.into_inner();
                    let op = parts.next().map(|p| p.as_str().to_string()).unwrap_or_default();
                    let names = parts.flat_map(|list| list.into_inner()).map(|p| p.as_str().to_string());
                    hint.reductions.push((op, names.collect()));
                }
                _ => {}
            }
        }
        Ok(PragmaDirective::Simd(hint))
    }
}

fn ident_list(clause: Pair<'_, Rule>) -> Vec<String> {
    clause
        .into_inner()
        .flat_map(|list| list.into_inner())
        .map(|ident| ident.as_str().to_string())
        .collect()
}

#[derive(Default)]
pub struct PragmaRegistry {
    handlers: HashMap<&'static str, Box<dyn PragmaHandler>>,
}

impl PragmaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `cilk` and `simd` handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(CilkPragma));
        registry.register(Box::new(SimdPragma));
        registry
    }

    /// Registers a handler, returning the one it replaces.
    pub fn register(&mut self, handler: Box<dyn PragmaHandler>) -> Option<Box<dyn PragmaHandler>> {
        self.handlers.insert(handler.namespace(), handler)
    }

    /// Runs the handler for the pragma's namespace. Pragmas nobody handles are
    /// ignored with a warning.
    pub fn dispatch(&self, text: &str) -> Result<Option<PragmaDirective>, Error> {
        let text = text.trim();
        let (namespace, body) = text
            .split_once(char::is_whitespace)
            .unwrap_or((text, ""));
        match self.handlers.get(namespace) {
            Some(handler) => {
                let directive = handler.handle(body.trim())?;
                debug!("pragma `{text}` -> {}", directive.name());
                Ok(Some(directive))
            }
            None => {
                warn!("ignoring unknown pragma `{text}`");
                Ok(None)
            }
        }
    }
}

/// State shared by everything parsed from one input: the pragma handlers and
/// the statement id counter.
pub struct ParseSession {
    registry: PragmaRegistry,
    next_id: u32,
}

impl Default for ParseSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ParseSession {
    pub fn new() -> Self {
        Self::with_registry(PragmaRegistry::with_defaults())
    }

    pub fn with_registry(registry: PragmaRegistry) -> Self {
        Self {
            registry,
            next_id: 0,
        }
    }

    pub fn registry(&self) -> &PragmaRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PragmaRegistry {
        &mut self.registry
    }

    pub(crate) fn next_id(&mut self) -> StmtId {
        let id = StmtId(self.next_id);
        self.next_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StmtKind;

    #[test]
    fn simd_clauses() {
        let registry = PragmaRegistry::with_defaults();
        let directive = registry
            .dispatch("simd vectorlength(4, 8) linear(p:2, q) private(t) reduction(+:sum, total)")
            .unwrap()
            .unwrap();
        let PragmaDirective::Simd(hint) = directive else {
            panic!("expected a simd hint");
        };
        assert_eq!(hint.vector_length, vec![4, 8]);
        assert_eq!(hint.linear, vec![("p".to_string(), 2), ("q".to_string(), 1)]);
        assert_eq!(hint.private, vec!["t".to_string()]);
        assert_eq!(
            hint.reductions,
            vec![("+".to_string(), vec!["sum".to_string(), "total".to_string()])]
        );
        assert_eq!(
            hint.to_string(),
            "simd vectorlength(4, 8) linear(p:2, q:1) private(t) reduction(+:sum, total)"
        );
    }

    #[test]
    fn unknown_pragmas_are_ignored() {
        let registry = PragmaRegistry::with_defaults();
        assert!(registry.dispatch("omp parallel for").unwrap().is_none());
    }

    #[test]
    fn handlers_belong_to_the_session() {
        struct Unroll;
        impl PragmaHandler for Unroll {
            fn namespace(&self) -> &'static str {
                "unroll"
            }
            fn handle(&self, _body: &str) -> Result<PragmaDirective, Error> {
                Err(Error::ParseError("unroll is not supported".to_string()))
            }
        }

        let source = "void f() {\n#pragma unroll\nfor (;;) {} }";

        let mut session = ParseSession::new();
        assert!(session.parse(source).is_ok());

        let mut session = ParseSession::new();
        assert!(session.registry_mut().register(Box::new(Unroll)).is_none());
        assert!(session.parse(source).is_err());

        // a fresh session does not see the handler
        assert!(ParseSession::new().parse(source).is_ok());
    }

    #[test]
    fn simd_pragma_attaches_to_for() {
        let unit = ParseSession::new()
            .parse("void f(int *a, int n) {\n#pragma simd vectorlength(4)\nfor (int i = 0; i < n; i++) a[i] = 0;\n}")
            .unwrap();
        let body = &unit.functions().next().unwrap().body;
        let StmtKind::For(for_loop) = &body[0].kind else {
            panic!("expected a for loop");
        };
        assert_eq!(for_loop.simd.as_ref().unwrap().vector_length, vec![4]);
    }
}
