//! Shared test utilities for the escape analysis.
//!
//! Consolidates the module/DFIR factories used across the role, graph,
//! lifetime, and driver tests. Only compiled in test builds.

use rustc_hash::FxHashMap;

use vel_dfir::{
    CallGraph, CallSite, ConstValue, DeclaredType, ExternalModulesDfg, Field, FunctionBody,
    FunctionSymbol, FunctionSymbolId, IrId, ModuleDfg, Node, NodeId, TargetInfo, TypeId, TypeRef,
    WellKnownTypes,
};

use crate::{compute_lifetimes, EscapeAnalysisStats, Lifetime};

/// A module under construction, with the well-known types registered and
/// an 8-byte pointer target.
pub(crate) struct ModuleBuilder {
    pub module: ModuleDfg,
    pub externals: ExternalModulesDfg,
    pub call_graph: CallGraph,
    pub target: TargetInfo,
}

impl ModuleBuilder {
    pub(crate) fn new() -> Self {
        let mut module = ModuleDfg::default();
        let mut declare = |name: &str| {
            let id = TypeId::new(module.types.len() as u32);
            module.types.push(DeclaredType {
                name: name.into(),
                hash: module.types.len() as i64,
            });
            id
        };
        let well_known = WellKnownTypes {
            array: declare("Array"),
            boolean_array: declare("BooleanArray"),
            byte_array: declare("ByteArray"),
            char_array: declare("CharArray"),
            short_array: declare("ShortArray"),
            int_array: declare("IntArray"),
            float_array: declare("FloatArray"),
            long_array: declare("LongArray"),
            double_array: declare("DoubleArray"),
            nothing: declare("Nothing"),
        };
        // A plain object class and an int, for general allocations and
        // constants.
        declare("Object");
        declare("Int");
        ModuleBuilder {
            module,
            externals: ExternalModulesDfg::default(),
            call_graph: CallGraph::default(),
            target: TargetInfo {
                pointer_size: 8,
                well_known,
            },
        }
    }

    /// The plain object class.
    pub(crate) fn object_ty(&self) -> TypeRef {
        TypeRef::Declared(TypeId::new(10))
    }

    /// The int class.
    pub(crate) fn int_ty(&self) -> TypeRef {
        TypeRef::Declared(TypeId::new(11))
    }

    pub(crate) fn int_array_ty(&self) -> TypeRef {
        TypeRef::Declared(self.target.well_known.int_array)
    }

    pub(crate) fn nothing_ty(&self) -> TypeRef {
        TypeRef::Declared(self.target.well_known.nothing)
    }

    /// Declare a function defined in this module.
    pub(crate) fn function(&mut self, name: &str, param_count: u32) -> FunctionSymbolId {
        self.symbol(name, param_count, false, None, None)
    }

    /// Declare an external function, optionally annotated.
    pub(crate) fn external(
        &mut self,
        name: &str,
        param_count: u32,
        escapes: Option<u32>,
        points_to: Option<Vec<u32>>,
    ) -> FunctionSymbolId {
        self.symbol(name, param_count, true, escapes, points_to)
    }

    fn symbol(
        &mut self,
        name: &str,
        param_count: u32,
        external: bool,
        escapes: Option<u32>,
        points_to: Option<Vec<u32>>,
    ) -> FunctionSymbolId {
        let id = FunctionSymbolId::new(self.module.symbols.len() as u32);
        self.module.symbols.push(FunctionSymbol {
            name: name.into(),
            hash: self.module.symbols.len() as i64,
            param_count,
            external,
            escapes,
            points_to,
        });
        id
    }

    /// Install a finished body, registering its call sites.
    pub(crate) fn install(&mut self, f: FunctionSymbolId, builder: BodyBuilder) {
        let BodyBuilder {
            body,
            virtual_calls,
            ..
        } = builder;
        for id in body.node_ids() {
            match body.node(id) {
                Node::Call { callee, .. } => {
                    self.call_graph.add_call(
                        f,
                        CallSite {
                            call: id,
                            actual_callee: *callee,
                            is_virtual: virtual_calls.contains(&id),
                        },
                    );
                }
                Node::NewObject { callee, .. } => {
                    self.call_graph.add_call(
                        f,
                        CallSite {
                            call: id,
                            actual_callee: *callee,
                            is_virtual: false,
                        },
                    );
                }
                _ => {}
            }
        }
        self.module.bodies.insert(f, body);
    }

    /// Run the full pass over the module.
    pub(crate) fn run(&self) -> (FxHashMap<IrId, Lifetime>, EscapeAnalysisStats) {
        let mut lifetimes = FxHashMap::default();
        let stats = compute_lifetimes(
            &self.target,
            &self.module,
            &self.externals,
            &self.call_graph,
            &mut lifetimes,
        );
        (lifetimes, stats)
    }
}

/// Builds one function body: a root scope, parameters inside it, and
/// whatever the test pushes.
pub(crate) struct BodyBuilder {
    pub body: FunctionBody,
    params: Vec<NodeId>,
    scopes: Vec<NodeId>,
    virtual_calls: rustc_hash::FxHashSet<NodeId>,
}

impl BodyBuilder {
    pub(crate) fn new(param_count: u32) -> Self {
        let mut body = FunctionBody::default();
        let root = body.push(Node::Scope { nodes: Vec::new() });
        body.root_scope = root;
        let mut builder = BodyBuilder {
            body,
            params: Vec::new(),
            scopes: vec![root],
            virtual_calls: rustc_hash::FxHashSet::default(),
        };
        for index in 0..param_count {
            let p = builder.push(Node::Parameter { index });
            builder.params.push(p);
        }
        builder
    }

    pub(crate) fn param(&self, index: u32) -> NodeId {
        self.params[index as usize]
    }

    /// Push a node into the current scope.
    pub(crate) fn push(&mut self, node: Node) -> NodeId {
        let id = self.body.push(node);
        let scope = *self.scopes.last().expect("scope stack never empty");
        let Node::Scope { nodes } = &mut self.body.nodes[scope.index()] else {
            unreachable!("scope stack holds scopes");
        };
        nodes.push(id);
        id
    }

    /// Open a nested scope; everything pushed until `end_scope` lands in
    /// it.
    pub(crate) fn begin_scope(&mut self) -> NodeId {
        let scope = self.push(Node::Scope { nodes: Vec::new() });
        self.scopes.push(scope);
        scope
    }

    pub(crate) fn end_scope(&mut self) {
        assert!(self.scopes.len() > 1, "cannot close the root scope");
        self.scopes.pop();
    }

    pub(crate) fn const_int(&mut self, ty: TypeRef, value: i64) -> NodeId {
        self.push(Node::Const {
            ty,
            value: ConstValue::Int(value),
        })
    }

    pub(crate) fn variable(&mut self, values: Vec<NodeId>) -> NodeId {
        self.push(Node::Variable { values })
    }

    pub(crate) fn new_object(
        &mut self,
        ty: TypeRef,
        callee: FunctionSymbolId,
        arguments: Vec<NodeId>,
        ir: u32,
    ) -> NodeId {
        self.push(Node::NewObject {
            constructed_type: ty,
            callee,
            arguments,
            ir: IrId::new(ir),
        })
    }

    pub(crate) fn call(&mut self, callee: FunctionSymbolId, arguments: Vec<NodeId>) -> NodeId {
        self.push(Node::Call {
            callee,
            arguments,
            ir: None,
        })
    }

    pub(crate) fn call_virtual(
        &mut self,
        callee: FunctionSymbolId,
        arguments: Vec<NodeId>,
    ) -> NodeId {
        let id = self.call(callee, arguments);
        self.virtual_calls.insert(id);
        id
    }

    pub(crate) fn field_write(&mut self, receiver: Option<NodeId>, field: i64, value: NodeId) {
        self.push(Node::FieldWrite {
            receiver,
            field: Field::declared(field),
            value,
        });
    }

    pub(crate) fn field_read(&mut self, receiver: Option<NodeId>, field: i64) -> NodeId {
        self.push(Node::FieldRead {
            receiver,
            field: Field::declared(field),
            ir: None,
        })
    }

    pub(crate) fn array_write(&mut self, array: NodeId, value: NodeId) {
        self.push(Node::ArrayWrite { array, value });
    }

    pub(crate) fn array_read(&mut self, array: NodeId) -> NodeId {
        self.push(Node::ArrayRead { array, ir: None })
    }

    pub(crate) fn singleton(&mut self, ty: TypeRef) -> NodeId {
        self.push(Node::Singleton { ty })
    }

    /// Mark `value` as returned from the current scope.
    pub(crate) fn ret(&mut self, value: NodeId) {
        let scope = *self.scopes.last().expect("scope stack never empty");
        self.body.returns.insert(scope, value);
    }

    /// Mark `value` as thrown from the current scope.
    pub(crate) fn throws(&mut self, value: NodeId) {
        let scope = *self.scopes.last().expect("scope stack never empty");
        self.body.throws.insert(scope, value);
    }
}
