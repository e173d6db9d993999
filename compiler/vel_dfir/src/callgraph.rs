//! Whole-program call graph.
//!
//! Built after devirtualization. Edges connect function symbols; call-site
//! records point back into each caller's DFIR body so interprocedural
//! passes can line up callee summaries with the actual argument nodes.
//! Both `Call` and `NewObject` nodes are call sites (a constructor call is
//! a call whose receiver is the freshly allocated object).

use rustc_hash::FxHashMap;

use crate::dfir::NodeId;
use crate::symbols::FunctionSymbolId;

/// One call site inside a caller's DFIR body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallSite {
    /// The `Call` or `NewObject` node in the caller's body.
    pub call: NodeId,
    /// The callee after devirtualization.
    pub actual_callee: FunctionSymbolId,
    /// Whether the site could not be devirtualized. Virtual sites are
    /// treated maximally pessimistically by interprocedural analyses.
    pub is_virtual: bool,
}

/// Call graph over function symbols.
#[derive(Clone, Debug, Default)]
pub struct CallGraph {
    /// Caller → callees (deduplicated).
    pub direct: FxHashMap<FunctionSymbolId, Vec<FunctionSymbolId>>,
    /// Callee → callers (deduplicated).
    pub reversed: FxHashMap<FunctionSymbolId, Vec<FunctionSymbolId>>,
    /// Caller → its call sites, in body order.
    pub call_sites: FxHashMap<FunctionSymbolId, Vec<CallSite>>,
}

impl CallGraph {
    /// Callees of `function`, or empty.
    pub fn callees(&self, function: FunctionSymbolId) -> &[FunctionSymbolId] {
        self.direct.get(&function).map_or(&[], Vec::as_slice)
    }

    /// Callers of `function`, or empty.
    pub fn callers(&self, function: FunctionSymbolId) -> &[FunctionSymbolId] {
        self.reversed.get(&function).map_or(&[], Vec::as_slice)
    }

    /// Call sites of `function`, or empty.
    pub fn sites(&self, function: FunctionSymbolId) -> &[CallSite] {
        self.call_sites.get(&function).map_or(&[], Vec::as_slice)
    }

    /// Record an edge and its call site. Adjacency lists are deduplicated;
    /// call sites are kept one per record.
    pub fn add_call(&mut self, caller: FunctionSymbolId, site: CallSite) {
        let callees = self.direct.entry(caller).or_default();
        if !callees.contains(&site.actual_callee) {
            callees.push(site.actual_callee);
        }
        let callers = self.reversed.entry(site.actual_callee).or_default();
        if !callers.contains(&caller) {
            callers.push(caller);
        }
        self.call_sites.entry(caller).or_default().push(site);
    }
}
