//! Call-graph condensation.
//!
//! Collapses the call graph into its strongly connected components and
//! returns them in topological order of the component DAG (callers before
//! callees). Interprocedural passes walk the list in reverse so every
//! callee outside the current component is fully summarized first, and
//! iterate to fixpoint only within a component.
//!
//! Kosaraju's algorithm, both passes with explicit stacks. The second
//! pass runs over the reversed edges in decreasing finish order, which
//! emits components already topologically sorted — no separate sort pass.

use rustc_hash::FxHashSet;

use crate::callgraph::CallGraph;
use crate::symbols::FunctionSymbolId;

/// One strongly connected component of the call graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultiNode {
    /// Member functions, in discovery order.
    pub functions: Vec<FunctionSymbolId>,
}

/// The condensed call graph: components in topological order.
#[derive(Clone, Debug, Default)]
pub struct Condensation {
    pub multi_nodes: Vec<MultiNode>,
}

/// Condense the call graph restricted to `vertices`.
///
/// Edges leading outside `vertices` are ignored, so the caller controls
/// the universe (typically: every function the module defines or
/// references). Output order is deterministic given the vertex order and
/// the graph's adjacency order.
pub fn condense(graph: &CallGraph, vertices: &[FunctionSymbolId]) -> Condensation {
    let universe: FxHashSet<FunctionSymbolId> = vertices.iter().copied().collect();

    // Pass 1: postorder finish times over the direct edges.
    let mut finish_order = Vec::with_capacity(vertices.len());
    let mut visited = FxHashSet::default();
    for &root in vertices {
        if !visited.insert(root) {
            continue;
        }
        // Each frame is (vertex, next child index to explore).
        let mut stack = vec![(root, 0usize)];
        while let Some(frame) = stack.last_mut() {
            let v = frame.0;
            let callees = graph.callees(v);
            if frame.1 < callees.len() {
                let next = callees[frame.1];
                frame.1 += 1;
                if universe.contains(&next) && visited.insert(next) {
                    stack.push((next, 0));
                }
            } else {
                stack.pop();
                finish_order.push(v);
            }
        }
    }

    // Pass 2: in decreasing finish order, flood over the reversed edges.
    let mut assigned = FxHashSet::default();
    let mut multi_nodes = Vec::new();
    for &root in finish_order.iter().rev() {
        if assigned.contains(&root) {
            continue;
        }
        let mut functions = Vec::new();
        let mut stack = vec![root];
        assigned.insert(root);
        while let Some(v) = stack.pop() {
            functions.push(v);
            for &caller in graph.callers(v) {
                if universe.contains(&caller) && assigned.insert(caller) {
                    stack.push(caller);
                }
            }
        }
        multi_nodes.push(MultiNode { functions });
    }

    tracing::debug!(
        functions = vertices.len(),
        components = multi_nodes.len(),
        "condensed call graph"
    );

    Condensation { multi_nodes }
}
