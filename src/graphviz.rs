//! Graphviz rendering of a computation graph
//!
//! Every value becomes a record node showing its data and gradient. Derived values also
//! get an oval node for the operation which produced them, with edges from the operands
//! into the operation. Render a `.dot` file with e.g. `dot -Tsvg graph.dot -o graph.svg`.

use std::{fmt::Write as _, fs, io, path::Path};

use crate::values::Value;

/// Renders the graph rooted at `root` in the DOT language
pub fn render_dot(root: &Value) -> String {
    let mut dot = String::from("digraph {\n  rankdir=LR;\n");
    for value in root.topological_order() {
        let id = value.id();
        // writing to a String is infallible
        let _ = writeln!(
            dot,
            "  \"{id}\" [shape=record, label=\"{{ data {:.4} | grad {:.4} }}\"];",
            value.data(),
            value.grad()
        );
        if let Some(op) = value.backprop_fn() {
            let _ = writeln!(dot, "  \"{id}_op\" [label=\"{op}\"];");
            let _ = writeln!(dot, "  \"{id}_op\" -> \"{id}\";");
            for child in value.children() {
                let _ = writeln!(dot, "  \"{}\" -> \"{id}_op\";", child.id());
            }
        }
    }
    dot.push_str("}\n");
    dot
}

/// Writes the graph rooted at `root` to `path` in the DOT language
pub fn draw_dot(root: &Value, path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref();
    fs::write(path, render_dot(root))?;
    log::info!("Computation graph saved to '{}'.", path.display());
    Ok(())
}
