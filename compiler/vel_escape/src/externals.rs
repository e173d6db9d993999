//! Summaries for callees the analysis cannot look inside.
//!
//! The Vel runtime annotates its own functions with bit-packed escape
//! facts, and those annotations are trusted for everything in the `vel`
//! runtime package except the concurrency primitives (a value handed to
//! another thread of control escapes in ways the annotations do not
//! model). Every other external callee — and every virtual call site —
//! is assumed maximally pessimistic: all arguments and the return escape.

use vel_dfir::FunctionSymbol;

use crate::summary::FunctionSummary;

/// Mangled-name prefix of the trusted runtime package.
pub const RUNTIME_PREFIX: &str = "vfun:vel.";

/// Runtime subpackage whose annotations are not trusted.
pub const RUNTIME_CONCURRENT_PREFIX: &str = "vfun:vel.concurrent";

/// Whether a mangled name belongs to the trusted runtime set.
pub fn trusted_runtime_function(name: &str) -> bool {
    name.starts_with(RUNTIME_PREFIX) && !name.starts_with(RUNTIME_CONCURRENT_PREFIX)
}

/// Summary for a callee with no analysable body.
///
/// Trusted runtime functions decode their annotations (absent annotations
/// decode to the optimistic summary — the runtime annotates everything
/// that escapes). Everything else is pessimistic.
pub fn external_summary(symbol: &FunctionSymbol) -> FunctionSummary {
    if trusted_runtime_function(&symbol.name) {
        let escapes = symbol.escapes.unwrap_or(0);
        let points_to = symbol.points_to.as_deref().unwrap_or(&[]);
        FunctionSummary::from_bits(symbol.param_count, escapes, points_to)
    } else {
        FunctionSummary::pessimistic(symbol.param_count)
    }
}
