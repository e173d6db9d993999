//! Symbol tables, type references, and runtime geometry.
//!
//! A module's DFG carries one symbol table covering both local functions
//! and references to external ones. External entities are identified by
//! hash and resolved against [`ExternalModulesDfg`]: type resolution
//! failure is fatal (the program cannot be compiled without the type's
//! layout), while an unresolvable external function simply stays external
//! and analyses fall back to its annotations or to pessimism.

use rustc_hash::FxHashMap;

use crate::dfir::FunctionBody;

// ── ID newtypes ─────────────────────────────────────────────────────

/// Index into a module's function symbol table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct FunctionSymbolId(u32);

impl FunctionSymbolId {
    /// Create a symbol ID from a raw index.
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw `u32` value.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Get the index as `usize` (for indexing into `Vec`s).
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index into a module's declared-type table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeId(u32);

impl TypeId {
    /// Create a type ID from a raw index.
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw `u32` value.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Get the index as `usize` (for indexing into `Vec`s).
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ── Types ───────────────────────────────────────────────────────────

/// Reference to a type: either declared in this module's table or an
/// external type known only by hash until resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Declared(TypeId),
    External { hash: i64 },
}

/// A type declared in (or imported into) the module's type table.
#[derive(Clone, Debug)]
pub struct DeclaredType {
    pub name: String,
    pub hash: i64,
}

// ── Function symbols ────────────────────────────────────────────────

/// A function symbol: local or external, with the optional bit-packed
/// escape annotations the runtime ships on its own functions.
///
/// `escapes` is a bitset over parameter indices (bit `param_count` is the
/// return slot). `points_to[i]` packs one nibble per target parameter
/// describing reference flow from parameter `i`; see the escape analysis
/// for the nibble codes.
#[derive(Clone, Debug)]
pub struct FunctionSymbol {
    /// Mangled name, e.g. `vfun:vel.collections.ArrayList.add`.
    pub name: String,
    pub hash: i64,
    /// Declared parameter count, not counting the synthetic return slot.
    pub param_count: u32,
    /// Whether the symbol refers outside the module under compilation.
    pub external: bool,
    pub escapes: Option<u32>,
    pub points_to: Option<Vec<u32>>,
}

// ── Module DFGs ─────────────────────────────────────────────────────

/// The DFG of the module under compilation: symbol table, declared types,
/// and one DFIR body per function that has one.
#[derive(Clone, Debug, Default)]
pub struct ModuleDfg {
    /// Function symbol table, indexed by [`FunctionSymbolId`].
    pub symbols: Vec<FunctionSymbol>,
    /// DFIR bodies for functions defined in this module.
    pub bodies: FxHashMap<FunctionSymbolId, FunctionBody>,
    /// Declared-type table, indexed by [`TypeId`]. Types imported from
    /// external modules are materialized here as well.
    pub types: Vec<DeclaredType>,
}

impl ModuleDfg {
    /// Look up a function symbol.
    #[inline]
    pub fn symbol(&self, id: FunctionSymbolId) -> &FunctionSymbol {
        &self.symbols[id.index()]
    }

    /// Look up a declared type.
    #[inline]
    pub fn declared_type(&self, id: TypeId) -> &DeclaredType {
        &self.types[id.index()]
    }

    /// Resolve a function symbol against the external modules. An external
    /// symbol whose hash is published resolves to the published symbol;
    /// otherwise the external symbol is kept as-is.
    pub fn resolve_function(
        &self,
        externals: &ExternalModulesDfg,
        id: FunctionSymbolId,
    ) -> FunctionSymbolId {
        let symbol = self.symbol(id);
        if !symbol.external {
            return id;
        }
        externals
            .public_functions
            .get(&symbol.hash)
            .copied()
            .unwrap_or(id)
    }

    /// Resolve a type reference to a declared type. An unresolved external
    /// type hash means the inputs are inconsistent and compilation cannot
    /// continue.
    pub fn resolve_type(&self, externals: &ExternalModulesDfg, ty: TypeRef) -> TypeId {
        match ty {
            TypeRef::Declared(id) => id,
            TypeRef::External { hash } => *externals
                .public_types
                .get(&hash)
                .unwrap_or_else(|| panic!("unresolved external type hash {hash}")),
        }
    }
}

/// Public surface of every external module: type and function symbols
/// published by hash.
#[derive(Clone, Debug, Default)]
pub struct ExternalModulesDfg {
    pub public_types: FxHashMap<i64, TypeId>,
    pub public_functions: FxHashMap<i64, FunctionSymbolId>,
}

// ── Runtime geometry ────────────────────────────────────────────────

/// Well-known class symbols the analyses special-case.
#[derive(Clone, Copy, Debug)]
pub struct WellKnownTypes {
    /// Reference array class.
    pub array: TypeId,
    pub boolean_array: TypeId,
    pub byte_array: TypeId,
    pub char_array: TypeId,
    pub short_array: TypeId,
    pub int_array: TypeId,
    pub float_array: TypeId,
    pub long_array: TypeId,
    pub double_array: TypeId,
    /// The bottom type. Its singleton never materializes at runtime.
    pub nothing: TypeId,
}

impl WellKnownTypes {
    /// Per-element size in bytes if `ty` is one of the array classes.
    pub fn array_item_size(&self, ty: TypeId, pointer_size: u32) -> Option<u32> {
        if ty == self.boolean_array || ty == self.byte_array {
            Some(1)
        } else if ty == self.char_array || ty == self.short_array {
            Some(2)
        } else if ty == self.int_array || ty == self.float_array {
            Some(4)
        } else if ty == self.long_array || ty == self.double_array {
            Some(8)
        } else if ty == self.array {
            Some(pointer_size)
        } else {
            None
        }
    }
}

/// Target runtime geometry and well-known symbols, provided by the
/// compilation context.
#[derive(Clone, Copy, Debug)]
pub struct TargetInfo {
    /// Pointer size in bytes.
    pub pointer_size: u32,
    pub well_known: WellKnownTypes,
}
