use std::path::Path;

use layout::backends::svg::SVGWriter;
use layout::gv::{DotParser, GraphBuilder};
use layout::topo::layout::VisualGraph;
use petgraph::Directed;
use petgraph::dot::Dot;
use petgraph::graph::Graph as PetGraph;

use crate::error::Error;

/// Node labels are the lowered ops; edge labels name exceptional and jump edges.
pub type Flow = PetGraph<String, &'static str, Directed>;

pub fn render_graph(graph: &Flow) -> String {
    Dot::with_config(graph, &[]).to_string()
}

pub fn render_to_svg(graph: &Flow) -> Result<String, Error> {
    let dot_string = render_graph(graph);
    let mut parser = DotParser::new(&dot_string);

    let tree = parser
        .process()
        .map_err(|e| Error::RenderError(format!("Unable to lay out the graph: {e}")))?;
    let mut gb = GraphBuilder::new();
    gb.visit_graph(&tree);
    let mut visual_graph = gb.get();
    Ok(generate_svg(&mut visual_graph))
}

fn generate_svg(graph: &mut VisualGraph) -> String {
    let mut svg = SVGWriter::new();
    graph.do_it(false, false, false, &mut svg);
    svg.finalize()
}

pub fn render_svg_to_pdf(svg: impl AsRef<str>, output: &Path) -> Result<(), Error> {
    use svg2pdf::{ConversionOptions, PageOptions};

    let output = output.with_extension("pdf");

    let mut options = svg2pdf::usvg::Options::default();
    options.fontdb_mut().load_system_fonts();
    let tree = svg2pdf::usvg::Tree::from_str(svg.as_ref(), &options)
        .map_err(|e| Error::RenderError(format!("Invalid SVG: {e}")))?;

    let pdf = svg2pdf::to_pdf(&tree, ConversionOptions::default(), PageOptions::default())
        .map_err(|e| Error::RenderError(format!("Failed to convert to PDF: {e}")))?;
    std::fs::write(&output, pdf)
        .map_err(|e| Error::RenderError(format!("Failed to write {}: {e}", output.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_keeps_edge_names() {
        let mut graph = Flow::new();
        let a = graph.add_node("entry".to_string());
        let b = graph.add_node("landing".to_string());
        graph.add_edge(a, b, "raise");
        let dot = render_graph(&graph);
        assert!(dot.contains("digraph"));
        assert!(dot.contains("raise"));
        assert!(dot.contains("landing"));
    }

    #[test]
    fn svg_is_laid_out() {
        let mut graph = Flow::new();
        let a = graph.add_node("enter frame".to_string());
        let b = graph.add_node("exit".to_string());
        graph.add_edge(a, b, "");
        let svg = render_to_svg(&graph).unwrap();
        assert!(svg.contains("<svg"));
    }
}
