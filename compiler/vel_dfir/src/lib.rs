//! Data-flow IR for the Vel compiler.
//!
//! This crate provides the side data structures that whole-program analyses
//! consume:
//!
//! - **DFIR** ([`Node`], [`FunctionBody`]) — a per-function data-flow
//!   representation built by the front end after devirtualization. Nodes
//!   are held in a per-function arena and identified by [`NodeId`].
//!
//! - **Fields** ([`Field`]) — interned field identities, including the two
//!   process-wide sentinels [`Field::INTESTINES`] (all array elements
//!   collapse to one slot) and [`Field::RETURN_VALUE`] (`return x` is
//!   modelled as a field write on a synthetic return object).
//!
//! - **Symbols** ([`FunctionSymbol`], [`ModuleDfg`],
//!   [`ExternalModulesDfg`]) — the module symbol table, external-module
//!   lookup by hash, and the bit-packed escape annotations the runtime
//!   ships on its own functions.
//!
//! - **Call graph** ([`CallGraph`]) — forward/reversed adjacency over
//!   function symbols plus per-function call-site records.
//!
//! - **Condensation** ([`condense`], [`Condensation`]) — strongly connected
//!   components of the call graph in topological order, so interprocedural
//!   passes can run callee-before-caller with fixpoints confined to SCCs.
//!
//! No analysis lives here; `vel_escape` and other whole-program passes
//! consume these structures read-only.

pub mod callgraph;
pub mod condense;
pub mod dfir;
pub mod field;
pub mod symbols;

pub use callgraph::{CallGraph, CallSite};
pub use condense::{condense, Condensation, MultiNode};
pub use dfir::{ConstValue, FunctionBody, IrId, Node, NodeId};
pub use field::Field;
pub use symbols::{
    DeclaredType, ExternalModulesDfg, FunctionSymbol, FunctionSymbolId, ModuleDfg, TargetInfo,
    TypeId, TypeRef, WellKnownTypes,
};
