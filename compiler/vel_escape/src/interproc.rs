//! Interprocedural driver.
//!
//! Walks the condensation of the call graph in reverse topological order,
//! so every callee outside the current strongly connected component is
//! already summarized. Inside a component, a worklist iterates: every
//! member starts from the optimistic summary, and whenever a member's
//! recomputed summary differs from the installed one, its in-component
//! callers are re-enqueued.
//!
//! The fixpoint is bounded: a member about to be analysed beyond
//! [`MAX_ANALYSES_PER_SCC`] is demoted to the pessimistic summary instead
//! and drops out of the iteration — its callers get one more look so they
//! observe the demotion, and all of its allocations go to the heap.
//!
//! Once a component settles, the allocation lifetimes recorded by its last
//! per-function analyses are flushed into the output map.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use vel_dfir::{condense, CallSite, FunctionSymbolId, IrId, Node};

use crate::externals;
use crate::lifetimes;
use crate::ptg::PointsToGraph;
use crate::roles::assign_roles;
use crate::summary::FunctionSummary;
use crate::{closure, AnalysisContext, EscapeAnalysisStats, Lifetime, MAX_ANALYSES_PER_SCC};

/// Run the whole pass, filling `lifetime_map`.
pub(crate) fn run(
    ctx: &AnalysisContext<'_>,
    lifetime_map: &mut FxHashMap<IrId, Lifetime>,
) -> EscapeAnalysisStats {
    let vertices: Vec<FunctionSymbolId> = (0..ctx.module.symbols.len() as u32)
        .map(FunctionSymbolId::new)
        .collect();
    let condensation = condense(ctx.call_graph, &vertices);

    let mut summaries: FxHashMap<FunctionSymbolId, FunctionSummary> = FxHashMap::default();
    let mut stats = EscapeAnalysisStats::default();

    for multi_node in condensation.multi_nodes.iter().rev() {
        analyze_multi_node(
            ctx,
            &multi_node.functions,
            &mut summaries,
            lifetime_map,
            &mut stats,
        );
    }

    tracing::debug!(
        functions = summaries.len(),
        allocations = lifetime_map.len(),
        dropped_call_edges = stats.dropped_call_edges,
        demoted = stats.demoted_functions,
        "escape analysis finished"
    );
    stats
}

fn analyze_multi_node(
    ctx: &AnalysisContext<'_>,
    functions: &[FunctionSymbolId],
    summaries: &mut FxHashMap<FunctionSymbolId, FunctionSummary>,
    lifetime_map: &mut FxHashMap<IrId, Lifetime>,
    stats: &mut EscapeAnalysisStats,
) {
    let members: Vec<FunctionSymbolId> = functions
        .iter()
        .copied()
        .filter(|f| ctx.module.bodies.contains_key(f))
        .collect();
    if members.is_empty() {
        return;
    }
    let member_set: FxHashSet<FunctionSymbolId> = members.iter().copied().collect();

    // Every member starts optimistic.
    let mut live = member_set.clone();
    for &f in &members {
        summaries.insert(f, FunctionSummary::optimistic());
    }

    let mut queue: VecDeque<FunctionSymbolId> = members.iter().copied().collect();
    let mut queued = member_set.clone();
    let mut analysis_counts: FxHashMap<FunctionSymbolId, u32> = FxHashMap::default();
    let mut function_lifetimes: FxHashMap<FunctionSymbolId, FxHashMap<IrId, Lifetime>> =
        FxHashMap::default();

    while let Some(f) = queue.pop_front() {
        queued.remove(&f);
        if !live.contains(&f) {
            continue;
        }

        let count = analysis_counts.entry(f).or_insert(0);
        if *count >= MAX_ANALYSES_PER_SCC {
            let symbol = ctx.module.symbol(f);
            tracing::warn!(
                function = %symbol.name,
                "escape analysis did not converge; installing the pessimistic summary"
            );
            summaries.insert(f, FunctionSummary::pessimistic(symbol.param_count));
            live.remove(&f);
            stats.demoted_functions += 1;
            function_lifetimes.insert(f, heap_lifetimes(ctx, f));
            // Callers must observe the demotion.
            for &caller in ctx.call_graph.callers(f) {
                if member_set.contains(&caller) && live.contains(&caller) && queued.insert(caller) {
                    queue.push_back(caller);
                }
            }
            continue;
        }
        *count += 1;

        let (summary, allocations) = analyze_function(ctx, f, summaries, stats);
        function_lifetimes.insert(f, allocations);

        if summaries.get(&f) != Some(&summary) {
            summaries.insert(f, summary);
            for &caller in ctx.call_graph.callers(f) {
                if member_set.contains(&caller) && live.contains(&caller) && queued.insert(caller) {
                    queue.push_back(caller);
                }
            }
        }
    }

    for (_, allocations) in function_lifetimes {
        lifetime_map.extend(allocations);
    }
}

/// One full analysis of one function against the current summaries.
fn analyze_function(
    ctx: &AnalysisContext<'_>,
    f: FunctionSymbolId,
    summaries: &FxHashMap<FunctionSymbolId, FunctionSummary>,
    stats: &mut EscapeAnalysisStats,
) -> (FunctionSummary, FxHashMap<IrId, Lifetime>) {
    let body = &ctx.module.bodies[&f];
    let symbol = ctx.module.symbol(f);
    tracing::debug!(function = %symbol.name, nodes = body.len(), "analysing function");

    let roles = assign_roles(body, ctx.module, ctx.externals, ctx.target);
    let mut graph = PointsToGraph::build(body, &roles, symbol.param_count as usize);
    graph.apply_annotations(symbol);

    for site in ctx.call_graph.sites(f) {
        let (callee_summary, callee_param_count) = callee_summary(ctx, site, summaries);
        graph.inline_call(body, site, callee_param_count as usize, &callee_summary);
    }

    closure::close(&mut graph);
    lifetimes::propagate_depths(&mut graph);
    let allocations = lifetimes::assign_lifetimes(&mut graph, body, ctx);
    let summary = graph.extract_summary();

    stats.dropped_call_edges += graph.dropped_call_edges;
    (summary, allocations)
}

/// The summary to assume for one call site.
///
/// Virtual sites are always pessimistic. Otherwise the installed summary
/// wins (covering everything already analysed, including the current
/// component's in-flight assumptions); callees with no installed summary
/// fall back to the external oracle.
fn callee_summary(
    ctx: &AnalysisContext<'_>,
    site: &CallSite,
    summaries: &FxHashMap<FunctionSymbolId, FunctionSummary>,
) -> (FunctionSummary, u32) {
    let resolved = ctx.module.resolve_function(ctx.externals, site.actual_callee);
    let symbol = ctx.module.symbol(resolved);
    if site.is_virtual {
        return (
            FunctionSummary::pessimistic(symbol.param_count),
            symbol.param_count,
        );
    }
    let summary = match summaries.get(&resolved) {
        Some(summary) => summary.clone(),
        None => externals::external_summary(symbol),
    };
    (summary, symbol.param_count)
}

/// Every allocation of a demoted function lives on the heap.
fn heap_lifetimes(ctx: &AnalysisContext<'_>, f: FunctionSymbolId) -> FxHashMap<IrId, Lifetime> {
    let body = &ctx.module.bodies[&f];
    body.node_ids()
        .filter_map(|id| match body.node(id) {
            Node::NewObject { ir, .. } => Some((*ir, Lifetime::Global)),
            _ => None,
        })
        .collect()
}
