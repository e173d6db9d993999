//! Escape analysis for the Vel compiler.
//!
//! Classifies every allocation site in the module with a [`Lifetime`],
//! principally deciding which allocations may live on the caller's stack
//! frame instead of the reference-counted heap. The analysis consumes the
//! DFIR and call graph from `vel_dfir` and fills a map from allocation-site
//! IR elements to lifetimes, which the code generator consults.
//!
//! Two stages:
//!
//! - **Intraprocedural role assignment** ([`roles`]) — one walk over a
//!   function's DFIR body tags each node with the roles its value plays
//!   (returned, thrown, written to a field, read from a field, written to
//!   a global, assigned to a variable).
//!
//! - **Interprocedural points-to analysis** — propagates per-function
//!   summaries ([`FunctionSummary`]) over the condensation of the call
//!   graph in reverse topological order, building a per-function points-to
//!   graph with explicit drain nodes, closing it under field propagation,
//!   and assigning lifetimes with a per-frame stack budget.
//!
//! Only [`Lifetime::Stack`] and [`Lifetime::Global`] are understood by the
//! code generator; every other outcome collapses to `Global` at emission.
//! Finer-grained arenas are a future extension.
//!
//! The pass is strictly single-threaded and blocking. All error classes
//! are programming or integration bugs and panic with a diagnostic; the
//! two recoverable conditions (a function failing to converge, a call-site
//! edge that fails to map) are logged and surfaced in
//! [`EscapeAnalysisStats`].

mod closure;
pub mod externals;
mod interproc;
mod lifetimes;
mod ptg;
pub mod roles;
pub mod summary;

#[cfg(test)]
pub(crate) mod test_helpers;

use rustc_hash::FxHashMap;

use vel_dfir::{CallGraph, ExternalModulesDfg, IrId, ModuleDfg, TargetInfo};

pub use roles::{assign_roles, FunctionRoles, NodeInfo, Role, RoleEntry, RoleSet};
pub use summary::{CgEdge, CgNode, CgNodeKind, FunctionSummary};

/// The lifetime classification of a value.
///
/// Only `Stack` and `Global` survive to the code generator; the others are
/// intermediate outcomes that collapse to `Global` at emission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// The allocation may be placed on the enclosing stack frame.
    Stack,
    /// Confined to the function but outliving its lexical scope.
    Local,
    /// Reachable from a caller-supplied argument.
    Argument,
    /// The value is returned directly.
    ReturnValue,
    /// Reachable only through a field of the returned value.
    IndirectReturnValue,
    /// Reachable from a program-visible root; must live on the heap.
    Global,
}

impl Lifetime {
    /// Collapse to what the code generator supports.
    #[inline]
    pub fn supported(self) -> Lifetime {
        match self {
            Lifetime::Stack => Lifetime::Stack,
            _ => Lifetime::Global,
        }
    }
}

/// Depth sentinels. Lexical depths are non-negative; propagation only ever
/// lowers a depth, and lower means "more escaping".
pub(crate) mod depths {
    pub const ESCAPES: i32 = -3;
    pub const PARAMETER: i32 = -2;
    pub const RETURN_VALUE: i32 = -1;
    /// Deeper than any lexical depth; initial depth of synthetic nodes.
    pub const INFINITY: i32 = 1_000_000;
}

/// Per-frame byte budget for stack-allocated arrays.
pub const STACK_ARRAY_BUDGET: u64 = 65_536;

/// How many times a function may be analysed per SCC before it is demoted
/// to the pessimistic summary.
pub const MAX_ANALYSES_PER_SCC: u32 = 2;

/// Analysis tunables.
#[derive(Clone, Copy, Debug)]
pub struct AnalysisConfig {
    /// When an allocation is forced onto the heap, also mark its points-to
    /// graph node as escaped and re-propagate, so stack decisions
    /// downstream of it are revisited. Disabling this is experimental and
    /// unreachable from [`compute_lifetimes`].
    pub propagate_forced_to_heap: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            propagate_forced_to_heap: true,
        }
    }
}

/// Counters surfaced by the pass. Diagnostic only — the lifetime map is
/// the semantic output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EscapeAnalysisStats {
    /// Call-site summary edges dropped because an endpoint failed to map
    /// to a points-to graph node (absent argument).
    pub dropped_call_edges: u32,
    /// Functions demoted to the pessimistic summary because their SCC
    /// iteration did not converge.
    pub demoted_functions: u32,
}

/// Everything an analysis stage needs to look at, borrowed for the
/// duration of the pass.
pub(crate) struct AnalysisContext<'a> {
    pub target: &'a TargetInfo,
    pub module: &'a ModuleDfg,
    pub externals: &'a ExternalModulesDfg,
    pub call_graph: &'a CallGraph,
    pub config: AnalysisConfig,
}

/// Compute lifetimes for every allocation site in the module.
///
/// `lifetimes` must be empty on entry and is filled with exactly one entry
/// per `NewObject` IR element, each [`Lifetime::Stack`] or
/// [`Lifetime::Global`].
pub fn compute_lifetimes(
    target: &TargetInfo,
    module: &ModuleDfg,
    externals: &ExternalModulesDfg,
    call_graph: &CallGraph,
    lifetimes: &mut FxHashMap<IrId, Lifetime>,
) -> EscapeAnalysisStats {
    compute_lifetimes_with_config(
        target,
        module,
        externals,
        call_graph,
        lifetimes,
        AnalysisConfig::default(),
    )
}

/// [`compute_lifetimes`] with explicit tunables. The non-default
/// configuration is experimental.
pub fn compute_lifetimes_with_config(
    target: &TargetInfo,
    module: &ModuleDfg,
    externals: &ExternalModulesDfg,
    call_graph: &CallGraph,
    lifetimes: &mut FxHashMap<IrId, Lifetime>,
    config: AnalysisConfig,
) -> EscapeAnalysisStats {
    assert!(
        lifetimes.is_empty(),
        "lifetime map must be empty at entry to escape analysis"
    );
    let ctx = AnalysisContext {
        target,
        module,
        externals,
        call_graph,
        config,
    };
    interproc::run(&ctx, lifetimes)
}
