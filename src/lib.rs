pub mod abi;
pub mod analysis;
mod error;
pub mod lower;
pub mod lowered;
mod render;
pub mod source;
mod validate;

use std::path::Path;

use log::warn;

pub use error::{Diagnostic, DiagnosticKind, Error, Severity, ValidationError, ValidationErrorKind};
pub use lower::LowerOptions;
pub use lowered::{Module, Unverified, Verified};
pub use render::Flow;
pub use source::TranslationUnit;
pub use validate::{ValidationResult, verify_function};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Lowered pseudo-C.
    Ir,
    Dot,
    Pdf,
}

/// A translation unit whose lowering passed the frame-protocol verifier.
#[derive(Debug)]
pub struct Lowered {
    module: Module<Verified>,
}

impl Lowered {
    #[must_use]
    pub fn module(&self) -> &Module<Verified> {
        &self.module
    }

    #[must_use]
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.module.warnings
    }

    #[must_use]
    pub fn render_ir(&self) -> String {
        self.module.to_string()
    }

    /// Control-flow graph of one lowered function, source or helper.
    pub fn cfg(&self, name: &str) -> Result<Flow, Error> {
        let function = self
            .module
            .function(name)
            .ok_or_else(|| Error::UnknownFunction(name.to_string()))?;
        let cfg = lowered::cfg::Cfg::build(function)?;
        Ok(cfg.to_flow())
    }
}

pub fn parse(input: &str) -> Result<TranslationUnit, Error> {
    source::parse(input)
}

pub fn lower(input: &str, options: &LowerOptions) -> Result<Lowered, Error> {
    let unit = parse(input)?;
    let module = lower::lower_unit(&unit, options)?;
    let module = module.verify()?;
    for warning in &module.warnings {
        warn!("{warning}");
    }
    Ok(Lowered { module })
}

/// Every diagnostic the lowering would produce, without keeping its output.
pub fn check(input: &str) -> Result<Vec<Diagnostic>, Error> {
    let unit = parse(input)?;
    match lower::lower_unit(&unit, &LowerOptions::default()) {
        Ok(module) => Ok(module.warnings),
        Err(Error::Rejected(diagnostics)) => Ok(diagnostics),
        Err(e) => Err(e),
    }
}

pub fn render_to_pdf(svg: &str, path: &Path) -> Result<(), Error> {
    render::render_svg_to_pdf(svg, path)
}

pub fn process_to_ir(input: &str, output_path: &Path, options: &LowerOptions) -> Result<(), Error> {
    let lowered = lower(input, options)?;
    std::fs::write(output_path, lowered.render_ir())
        .map_err(|e| Error::RenderError(format!("Failed to write IR: {e}")))
}

pub fn process_to_dot(input: &str, function: &str, output_path: &Path, options: &LowerOptions) -> Result<(), Error> {
    let flow = lower(input, options)?.cfg(function)?;
    std::fs::write(output_path, render::render_graph(&flow))
        .map_err(|e| Error::RenderError(format!("Failed to write DOT: {e}")))
}

pub fn process_to_pdf(input: &str, function: &str, output_path: &Path, options: &LowerOptions) -> Result<(), Error> {
    let flow = lower(input, options)?.cfg(function)?;
    let svg = render::render_to_svg(&flow)?;
    render_to_pdf(&svg, output_path)
}

/// Writes the output format implied by `output_path`'s extension; a path
/// without one gets the lowered code. Graphs need the function to draw.
pub fn process(
    input: &str,
    output_path: &Path,
    function: Option<&str>,
    options: &LowerOptions,
) -> Result<Format, Error> {
    let format = match output_path.extension() {
        Some(ext) => format_from_ext(&ext.to_string_lossy())?,
        None => Format::Ir,
    };
    let graph_of = || function.ok_or_else(|| Error::UnknownFunction(String::new()));
    match format {
        Format::Ir => process_to_ir(input, output_path, options)?,
        Format::Dot => process_to_dot(input, graph_of()?, output_path, options)?,
        Format::Pdf => process_to_pdf(input, graph_of()?, output_path, options)?,
    }
    Ok(format)
}

/// Output format implied by a file extension.
pub fn format_from_ext(ext: &str) -> Result<Format, Error> {
    match ext {
        "c" | "ir" | "cilk" => Ok(Format::Ir),
        "dot" | "gv" => Ok(Format::Dot),
        "pdf" => Ok(Format::Pdf),
        _ => Err(Error::InvalidType(ext.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIB: &str = "int fib(int n) { if (n < 2) return n; int x = _Cilk_spawn fib(n - 1); int y = fib(n - 2); _Cilk_sync; return x + y; }";

    #[test]
    fn lowered_ir_spells_out_the_runtime() {
        let lowered = lower(FIB, &LowerOptions::default()).unwrap();
        let ir = lowered.render_ir();
        assert!(ir.contains("struct __cilk_spawn_fib_0_ctx {"));
        assert!(ir.contains("static void __cilk_spawn_fib_0(__cilk_spawn_fib_0_ctx *__cilk_ctx) {"));
        assert!(ir.contains(abi::ENTER_FRAME));
        assert!(ir.contains(abi::DETACH));
        assert!(ir.contains(abi::SYNC));
        assert!(ir.contains("if (!setjmp(__cilk_sf.ctx)) {"));
        assert!(lowered.warnings().is_empty());
    }

    #[test]
    fn check_collects_every_diagnostic() {
        let diagnostics = check(
            "int g(int); void f(int n) { _Cilk_for (int i = 0; i < n; i++) { i++; } if (_Cilk_spawn g(1)) {} }",
        )
        .unwrap();
        let kinds: Vec<_> = diagnostics.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![DiagnosticKind::ControlVariableModified, DiagnosticKind::SpawnPlacement]
        );
    }

    #[test]
    fn rejected_input_is_an_error() {
        assert!(matches!(
            lower("void f() { _Cilk_spawn 3; }", &LowerOptions::default()),
            Err(Error::Rejected(_))
        ));
        assert!(matches!(parse("int f( {"), Err(Error::ParseError(_))));
    }

    #[test]
    fn cfg_of_unknown_function() {
        let lowered = lower(FIB, &LowerOptions::default()).unwrap();
        assert!(lowered.cfg("fib").unwrap().node_count() > 0);
        assert!(lowered.cfg("__cilk_spawn_fib_0").is_ok());
        assert!(matches!(lowered.cfg("main"), Err(Error::UnknownFunction(_))));
    }

    #[test]
    fn writes_ir_and_dot() {
        let dir = tempfile::tempdir().unwrap();
        let ir = dir.path().join("fib.c");
        let dot = dir.path().join("fib.dot");

        process_to_ir(FIB, &ir, &LowerOptions::default()).unwrap();
        process_to_dot(FIB, "fib", &dot, &LowerOptions::default()).unwrap();

        assert!(std::fs::read_to_string(ir).unwrap().contains("__cilkrts_pop_frame"));
        assert!(std::fs::read_to_string(dot).unwrap().starts_with("digraph"));
    }

    #[test]
    fn output_extension_picks_the_format() {
        let dir = tempfile::tempdir().unwrap();
        let options = LowerOptions::default();

        let dot = dir.path().join("fib.dot");
        assert_eq!(process(FIB, &dot, Some("fib"), &options).unwrap(), Format::Dot);
        assert!(std::fs::read_to_string(&dot).unwrap().starts_with("digraph"));

        let ir = dir.path().join("fib.ir");
        assert_eq!(process(FIB, &ir, None, &options).unwrap(), Format::Ir);
        assert!(std::fs::read_to_string(&ir).unwrap().contains("__cilkrts_enter_frame"));

        let missing = dir.path().join("fib.pdf");
        assert!(matches!(process(FIB, &missing, None, &options), Err(Error::UnknownFunction(_))));
        assert!(!missing.exists());
        assert!(matches!(
            process(FIB, &dir.path().join("fib.txt"), None, &options),
            Err(Error::InvalidType(_))
        ));
    }

    #[test]
    fn formats_by_extension() {
        assert_eq!(format_from_ext("dot").unwrap(), Format::Dot);
        assert_eq!(format_from_ext("pdf").unwrap(), Format::Pdf);
        assert!(matches!(format_from_ext("txt"), Err(Error::InvalidType(_))));
    }
}
