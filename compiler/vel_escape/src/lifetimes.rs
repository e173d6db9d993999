//! Depth propagation and lifetime assignment.
//!
//! Depths flow along directed edges: an edge lowers its target to at most
//! the source's depth, and lower means more escaping. The lattice is
//! finite and the update monotone, so the worklist converges.
//!
//! Each allocation is then classified by its final depth:
//!
//! | depth | lifetime |
//! |---|---|
//! | `ESCAPES` | `Global` |
//! | `PARAMETER` | `Argument` |
//! | `RETURN_VALUE`, actually returned | `ReturnValue` |
//! | `RETURN_VALUE`, via a field of the return | `IndirectReturnValue` |
//! | unchanged lexical depth | `Stack` |
//! | lowered, but not a sentinel | `Local` |
//!
//! Only `Stack` and `Global` exist downstream, so everything else
//! collapses to `Global` — and a collapse is a *forcing*: the allocation
//! now definitely lives on the heap, so its node is marked escaped and
//! depths re-propagate, which can strip stack eligibility from values
//! reachable out of it. Sized arrays additionally pass through a greedy
//! per-frame byte budget; rejects are forced the same way. The loop runs
//! until no new allocation is forced — each round forces at least one,
//! so it takes at most one round per allocation.

use rustc_hash::{FxHashMap, FxHashSet};

use vel_dfir::{FunctionBody, IrId, Node};

use crate::depths;
use crate::ptg::{PointsToGraph, PtgNodeId};
use crate::{AnalysisContext, Lifetime, STACK_ARRAY_BUDGET};

/// Lower depths along edges until nothing changes.
pub(crate) fn propagate_depths(g: &mut PointsToGraph) {
    let mut queue: Vec<PtgNodeId> = g.node_ids().collect();
    let mut queued = vec![true; g.nodes.len()];
    while let Some(v) = queue.pop() {
        queued[v.index()] = false;
        let depth = g.nodes[v.index()].depth;
        for i in 0..g.nodes[v.index()].edges.len() {
            let edge = g.nodes[v.index()].edges[i];
            if g.nodes[edge.to.index()].depth > depth {
                g.nodes[edge.to.index()].depth = depth;
                if !queued[edge.to.index()] {
                    queued[edge.to.index()] = true;
                    queue.push(edge.to);
                }
            }
        }
    }
}

/// Classify one node by its final depth.
pub(crate) fn node_lifetime(g: &PointsToGraph, v: PtgNodeId) -> Lifetime {
    let node = &g.nodes[v.index()];
    if let Some(forced) = node.forced_lifetime {
        return forced;
    }
    match node.depth {
        depths::ESCAPES => Lifetime::Global,
        depths::PARAMETER => Lifetime::Argument,
        depths::RETURN_VALUE => {
            if node.directly_returned {
                Lifetime::ReturnValue
            } else {
                Lifetime::IndirectReturnValue
            }
        }
        depth if depth == node.lexical_depth => Lifetime::Stack,
        _ => Lifetime::Local,
    }
}

/// An allocation site of the function under analysis.
struct Allocation {
    node: PtgNodeId,
    ir: IrId,
    /// `None`: not an array. `Some(None)`: an array whose length is not a
    /// compile-time constant (never stack-allocatable). `Some(Some(b))`:
    /// an array needing `b` bytes on the frame.
    array_bytes: Option<Option<u64>>,
}

/// Assign a lifetime to every allocation of the function, running budget
/// admission and forced-heap propagation to a fixed point. Depths must
/// already be propagated once.
pub(crate) fn assign_lifetimes(
    g: &mut PointsToGraph,
    body: &FunctionBody,
    ctx: &AnalysisContext<'_>,
) -> FxHashMap<IrId, Lifetime> {
    let allocations = collect_allocations(g, body, ctx);

    loop {
        // Greedy budget admission over the arrays currently eligible for
        // the stack, smallest first.
        let mut stack_arrays: Vec<(u64, usize)> = allocations
            .iter()
            .enumerate()
            .filter_map(|(i, alloc)| match alloc.array_bytes {
                Some(Some(bytes)) if node_lifetime(g, alloc.node) == Lifetime::Stack => {
                    Some((bytes, i))
                }
                _ => None,
            })
            .collect();
        stack_arrays.sort_by_key(|&(bytes, i)| (bytes, allocations[i].ir));

        let mut admitted: FxHashSet<usize> = FxHashSet::default();
        let mut used = 0u64;
        for (bytes, i) in stack_arrays {
            if used + bytes <= STACK_ARRAY_BUDGET {
                admitted.insert(i);
                used += bytes;
            }
        }

        let mut changed = false;
        for (i, alloc) in allocations.iter().enumerate() {
            if g.nodes[alloc.node.index()].forced_lifetime.is_some() {
                continue;
            }
            let lifetime = node_lifetime(g, alloc.node);
            let force = match alloc.array_bytes {
                // An unsized array can never live on the frame.
                Some(None) => true,
                Some(Some(_)) => lifetime != Lifetime::Stack || !admitted.contains(&i),
                None => lifetime != Lifetime::Stack,
            };
            if !force {
                continue;
            }
            g.nodes[alloc.node.index()].forced_lifetime = Some(Lifetime::Global);
            if ctx.config.propagate_forced_to_heap
                && g.nodes[alloc.node.index()].depth != depths::ESCAPES
            {
                g.nodes[alloc.node.index()].depth = depths::ESCAPES;
                changed = true;
            }
        }

        if !changed {
            break;
        }
        propagate_depths(g);
    }

    allocations
        .iter()
        .map(|alloc| (alloc.ir, node_lifetime(g, alloc.node).supported()))
        .collect()
}

fn collect_allocations(
    g: &PointsToGraph,
    body: &FunctionBody,
    ctx: &AnalysisContext<'_>,
) -> Vec<Allocation> {
    let pointer_size = u64::from(ctx.target.pointer_size);
    let mut allocations = Vec::new();
    for id in body.node_ids() {
        let Node::NewObject {
            constructed_type,
            arguments,
            ir,
            ..
        } = body.node(id)
        else {
            continue;
        };
        let type_id = ctx.module.resolve_type(ctx.externals, *constructed_type);
        let array_bytes = ctx
            .target
            .well_known
            .array_item_size(type_id, ctx.target.pointer_size)
            .map(|item_size| {
                arguments
                    .first()
                    .and_then(|&len| body.const_int(len))
                    .and_then(|len| u64::try_from(len).ok())
                    .map(|len| {
                        (pointer_size + 4).saturating_add(u64::from(item_size).saturating_mul(len))
                    })
            });
        allocations.push(Allocation {
            node: g.ptg(id),
            ir: *ir,
            array_bytes,
        });
    }
    allocations
}
