//! Exports a computation graph for visualization
//!
//! Two formats are supported: a Graphviz DOT file (`dot -Tsvg graph.dot > graph.svg`) and a JSON
//! snapshot that a browser front end can load to render or animate the backward pass. Both only
//! read the graph.

use std::{
    fmt::{self, Display},
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use serde::Serialize;
use thiserror::Error;

use crate::{
    backprop_fns::BackpropFunc,
    graph::NodeId,
    values::Value,
};

/// Errors while writing visualization output
#[derive(Debug, Error)]
pub enum VizError {
    #[error("failed to write graph: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize graph: {0}")]
    Json(#[from] serde_json::Error),
}

/// One node of a [`GraphSnapshot`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub label: String,
    pub data: f64,
    pub grad: f64,
    pub op: Option<BackpropFunc>,
}

/// Serializable copy of every node and edge reachable from a root
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphSnapshot {
    pub root: NodeId,
    /// Nodes in topological order, operands first
    pub nodes: Vec<NodeSnapshot>,
    /// `(operand, consumer)` pairs
    pub edges: Vec<(NodeId, NodeId)>,
}

impl GraphSnapshot {
    pub fn from_root(root: &Value) -> Self {
        let trace = root.trace();
        let nodes = trace
            .nodes
            .iter()
            .filter_map(|id| root.graph().get(*id))
            .map(|value| NodeSnapshot {
                id: value.id(),
                label: value.label(),
                data: value.data(),
                grad: value.grad(),
                op: value.op(),
            })
            .collect();
        Self {
            root: root.id(),
            nodes,
            edges: trace.edges,
        }
    }

    /// Serializes the snapshot to a pretty-printed JSON file.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), VizError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

/// Renders the graph reachable from `root` in the Graphviz DOT language.
///
/// Every value becomes a record `label | data | grad`; derived values get an extra operation node
/// feeding into them.
pub fn render_dot(root: &Value) -> String {
    Dot(&GraphSnapshot::from_root(root)).to_string()
}

struct Dot<'a>(&'a GraphSnapshot);

impl Display for Dot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "digraph {{")?;
        writeln!(f, "  rankdir=LR;")?;
        for node in self.0.nodes.iter() {
            let name = node.id.index();
            writeln!(
                f,
                "  n{} [shape=record, label=\"{{ {} | data {:.4} | grad {:.4} }}\"];",
                name,
                escape(&node.label),
                node.data,
                node.grad
            )?;
            if let Some(op) = node.op {
                writeln!(f, "  n{}_op [label=\"{}\"];", name, escape(&op.to_string()))?;
                writeln!(f, "  n{}_op -> n{};", name, name)?;
            }
        }
        for (operand, consumer) in self.0.edges.iter() {
            writeln!(f, "  n{} -> n{}_op;", operand.index(), consumer.index())?;
        }
        writeln!(f, "}}")
    }
}

/// Writes [`render_dot`] output to `path`
pub fn draw_dot(root: &Value, path: impl AsRef<Path>) -> Result<(), VizError> {
    let mut file = BufWriter::new(File::create(path.as_ref())?);
    file.write_all(render_dot(root).as_bytes())?;
    file.flush()?;
    log::info!("Graph saved to '{}'.", path.as_ref().display());
    Ok(())
}

fn escape(text: &str) -> String {
    text.chars()
        .flat_map(|c| match c {
            '"' | '{' | '}' | '|' | '<' | '>' | '\\' => vec!['\\', c],
            _ => vec![c],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::graph::Graph;

    use super::*;

    #[test]
    fn test_snapshot() {
        let g = Graph::new();
        let a = g.leaf_with_label(2.0, "a");
        let b = g.leaf_with_label(-3.0, "b");
        let c = (&a * &b).with_label("c");
        c.backward();

        let snapshot = GraphSnapshot::from_root(&c);
        assert_eq!(snapshot.root, c.id());
        assert_eq!(snapshot.nodes.len(), 3);
        assert_eq!(snapshot.edges, vec![(a.id(), c.id()), (b.id(), c.id())]);
        let last = snapshot.nodes.last().unwrap();
        assert_eq!(last.label, "c");
        assert_eq!(last.op, Some(BackpropFunc::Mul));
        assert_eq!(snapshot.nodes[0].grad, -3.0);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["nodes"][2]["op"], "Mul");
        assert_eq!(json["nodes"][0]["op"], serde_json::Value::Null);
    }

    #[test]
    fn test_pow_snapshot_keeps_exponent() {
        let g = Graph::new();
        let a = g.leaf(2.0);
        let b = a.pow(3.0).unwrap();
        let json = serde_json::to_value(GraphSnapshot::from_root(&b)).unwrap();
        assert_eq!(json["nodes"][1]["op"]["Pow"], 3.0);
    }

    #[test]
    fn test_render_dot() {
        let g = Graph::new();
        let x = g.leaf_with_label(0.5, "x");
        let y = x.tanh().with_label("y");
        let dot = render_dot(&y);
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains("label=\"{ x | data 0.5000 | grad 0.0000 }\""));
        assert!(dot.contains("n1_op [label=\"tanh\"]"));
        assert!(dot.contains("n0 -> n1_op;"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn test_render_dot_lists_every_edge() {
        let g = Graph::new();
        let a = g.leaf_with_label(1.0, "a");
        let b = g.leaf_with_label(2.0, "b");
        let c = &(&a * &b) + &a;
        let dot = render_dot(&c);
        for edge in ["n0 -> n2_op;", "n1 -> n2_op;", "n2 -> n3_op;", "n0 -> n3_op;"] {
            assert!(dot.contains(edge), "missing {edge}");
        }
        assert_eq!(dot.lines().filter(|l| l.contains("shape=record")).count(), 4);
        assert_eq!(dot.lines().last(), Some("}"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a|b"), "a\\|b");
    }
}
