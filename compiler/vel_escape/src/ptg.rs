//! Per-function points-to graph.
//!
//! One mutable graph per function under analysis, owned for the duration
//! of the enclosing SCC's fixpoint. Nodes live in an arena and are
//! referenced by [`PtgNodeId`] — the graph is inherently cyclic, so
//! arena-scoped handles stand in for pointers throughout.
//!
//! Node population:
//!
//! - one node per DFIR node, seeded from the role pass;
//! - one dedicated *returns node* standing for the caller-visible return
//!   slot;
//! - lazily created *field slot* nodes (`base.[f]`, see
//!   [`PointsToGraph::goto_field`]);
//! - synthetic *drain* nodes: one per callee drain materialized at each
//!   call site, plus the drains elected or synthesised during closure.
//!
//! Edges are `(target, field?)`: a `None` field is an **assignment edge**
//! ("the source may designate the target's value"), a `Some` field is a
//! **field edge** from an object to one of its slots. Each node's drain
//! pointer forms a union-find forest resolved by
//! [`PointsToGraph::actual_drain`].
//!
//! After closure (see `closure`), summary extraction paints the nodes a
//! caller can name — parameters, the return slot, and interesting drains —
//! and compresses the painted subgraph into a [`FunctionSummary`].

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use vel_dfir::{CallSite, Field, FunctionBody, FunctionSymbol, Node, NodeId};

use crate::closure;
use crate::depths;
use crate::roles::{FunctionRoles, Role};
use crate::summary::{CgEdge, CgNode, CgNodeKind, FunctionSummary};
use crate::Lifetime;

/// Handle into a [`PointsToGraph`]'s node arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub(crate) struct PtgNodeId(u32);

impl PtgNodeId {
    #[inline]
    pub(crate) fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// An outgoing (or, in the reversed lists, incoming) edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PtgEdge {
    /// The other endpoint.
    pub to: PtgNodeId,
    /// `None` for an assignment edge, the field for a field edge.
    pub field: Option<Field>,
}

/// One points-to graph node.
#[derive(Clone, Debug)]
pub(crate) struct PtgNode {
    /// Current depth. Seeded from the role pass, only ever lowered.
    pub depth: i32,
    /// The original lexical depth ([`depths::INFINITY`] for synthetic
    /// nodes). A node still sitting at its lexical depth after
    /// propagation is stack-eligible.
    pub lexical_depth: i32,
    /// Whether this node was synthesised as a drain (as opposed to an
    /// elected DFIR or field-slot node).
    pub synthetic_drain: bool,
    /// Whether the node is an actual returned value (as opposed to being
    /// reachable through a field of the return).
    pub directly_returned: bool,
    /// Outgoing edges.
    pub edges: Vec<PtgEdge>,
    /// Incoming edges; rebuilt on demand, see
    /// [`PointsToGraph::rebuild_reversed`].
    pub reversed: Vec<PtgEdge>,
    /// Cache of outgoing field edges by field hash, kept by `goto_field`.
    pub field_targets: FxHashMap<i64, PtgNodeId>,
    /// Lifetime override installed by budget or collapse forcing.
    pub forced_lifetime: Option<Lifetime>,
    /// Drain pointer; chased by `actual_drain`, canonicalized by closure.
    pub drain: Option<PtgNodeId>,
}

impl PtgNode {
    fn new(depth: i32, lexical_depth: i32) -> Self {
        PtgNode {
            depth,
            lexical_depth,
            synthetic_drain: false,
            directly_returned: false,
            edges: Vec::new(),
            reversed: Vec::new(),
            field_targets: FxHashMap::default(),
            forced_lifetime: None,
            drain: None,
        }
    }
}

/// The per-function points-to graph.
pub(crate) struct PointsToGraph {
    /// Node arena.
    pub nodes: Vec<PtgNode>,
    /// DFIR node index → PTG node.
    dfir_to_ptg: Vec<PtgNodeId>,
    /// Parameter nodes by index.
    pub params: Vec<PtgNodeId>,
    /// The dedicated return-slot root.
    pub returns_node: PtgNodeId,
    /// Call-site summary entries dropped because an endpoint had no
    /// corresponding node (absent argument).
    pub dropped_call_edges: u32,
}

impl PointsToGraph {
    /// Seed a graph from a function body and its role assignment.
    pub(crate) fn build(body: &FunctionBody, roles: &FunctionRoles, param_count: usize) -> Self {
        let mut g = PointsToGraph {
            nodes: Vec::with_capacity(body.len() + 1),
            dfir_to_ptg: Vec::with_capacity(body.len()),
            params: Vec::with_capacity(param_count + 1),
            returns_node: PtgNodeId::new(0),
            dropped_call_edges: 0,
        };

        for id in body.node_ids() {
            let info = roles.info(id);
            let is_param = matches!(body.node(id), Node::Parameter { .. });
            let depth = if info.escapes() {
                depths::ESCAPES
            } else if is_param {
                depths::PARAMETER
            } else if info.has(Role::ReturnValue) {
                depths::RETURN_VALUE
            } else {
                info.depth
            };
            let mut node = PtgNode::new(depth, info.depth);
            node.directly_returned = info.has(Role::ReturnValue);
            let ptg_id = g.push(node);
            g.dfir_to_ptg.push(ptg_id);
        }

        let mut returns = PtgNode::new(depths::RETURN_VALUE, depths::INFINITY);
        returns.directly_returned = true;
        g.returns_node = g.push(returns);

        // Parameter nodes by index. A parameter the body never mentions
        // still needs a slot for call-site mapping.
        let mut by_index: Vec<Option<PtgNodeId>> = vec![None; param_count];
        for id in body.node_ids() {
            if let Node::Parameter { index } = body.node(id) {
                if let Some(slot) = by_index.get_mut(*index as usize) {
                    *slot = Some(g.dfir_to_ptg[id.index()]);
                }
            }
        }
        for slot in by_index {
            let p = match slot {
                Some(p) => p,
                None => g.push(PtgNode::new(depths::PARAMETER, depths::INFINITY)),
            };
            g.params.push(p);
        }

        // Edges from role entries.
        for id in body.node_ids() {
            let pn = g.ptg(id);
            let info = roles.info(id);
            for entry in info.entries(Role::Assigned) {
                let value = entry.node.expect("assigned role entry has a node");
                let target = g.ptg(value);
                g.add_assignment(pn, target);
            }
            for entry in info.entries(Role::WriteField) {
                let value = entry.node.expect("write-field role entry has a node");
                let field = entry.field.expect("write-field role entry has a field");
                let slot = g.goto_field(pn, field);
                let target = g.ptg(value);
                g.add_assignment(slot, target);
            }
            for entry in info.entries(Role::ReadField) {
                let read = entry.node.expect("read-field role entry has a node");
                let field = entry.field.expect("read-field role entry has a field");
                let read = g.ptg(read);
                let slot = g.goto_field(pn, field);
                g.add_assignment(read, slot);
            }
            if info.has(Role::ReturnValue) {
                let slot = g.goto_field(g.returns_node, Field::RETURN_VALUE);
                g.add_assignment(slot, pn);
            }
        }

        g
    }

    /// The PTG node for a DFIR node.
    #[inline]
    pub(crate) fn ptg(&self, id: NodeId) -> PtgNodeId {
        self.dfir_to_ptg[id.index()]
    }

    fn push(&mut self, node: PtgNode) -> PtgNodeId {
        let id = PtgNodeId::new(u32::try_from(self.nodes.len()).expect("PTG arena overflow"));
        self.nodes.push(node);
        id
    }

    /// Create a synthetic drain node.
    pub(crate) fn push_synthetic_drain(&mut self) -> PtgNodeId {
        let mut node = PtgNode::new(depths::INFINITY, depths::INFINITY);
        node.synthetic_drain = true;
        let id = self.push(node);
        self.nodes[id.index()].drain = Some(id);
        id
    }

    /// Add an assignment edge. Plain self-loops carry no information and
    /// are dropped.
    pub(crate) fn add_assignment(&mut self, from: PtgNodeId, to: PtgNodeId) {
        if from == to {
            return;
        }
        self.nodes[from.index()].edges.push(PtgEdge { to, field: None });
    }

    /// The node standing for `base.[field]`, created (with its field edge)
    /// on first access.
    pub(crate) fn goto_field(&mut self, base: PtgNodeId, field: Field) -> PtgNodeId {
        if let Some(&slot) = self.nodes[base.index()].field_targets.get(&field.hash()) {
            return slot;
        }
        let slot = self.push(PtgNode::new(depths::INFINITY, depths::INFINITY));
        self.nodes[base.index()].edges.push(PtgEdge {
            to: slot,
            field: Some(field),
        });
        self.nodes[base.index()]
            .field_targets
            .insert(field.hash(), slot);
        slot
    }

    /// OR the function's own packed escape annotation into the graph.
    pub(crate) fn apply_annotations(&mut self, symbol: &FunctionSymbol) {
        let Some(mask) = symbol.escapes else { return };
        for (i, &p) in self.params.iter().enumerate() {
            if i < 32 && mask & (1 << i) != 0 {
                self.nodes[p.index()].depth = depths::ESCAPES;
            }
        }
        let return_bit = self.params.len();
        if return_bit < 32 && mask & (1 << return_bit) != 0 {
            self.nodes[self.returns_node.index()].depth = depths::ESCAPES;
        }
    }

    /// Inline a callee summary at a call site.
    ///
    /// The argument array lines up with the callee's parameters: for a
    /// plain call, `args[0..n-1]` are the arguments and `args[n]` is the
    /// call node itself (the return slot); for a `NewObject`, `args[0]` is
    /// the new object acting as the receiver followed by the constructor
    /// arguments — a constructor has no return slot, so summary entries
    /// naming it fall into the defensive skip path below.
    pub(crate) fn inline_call(
        &mut self,
        body: &FunctionBody,
        site: &CallSite,
        callee_param_count: usize,
        summary: &FunctionSummary,
    ) {
        let args: Vec<PtgNodeId> = match body.node(site.call) {
            Node::Call { arguments, .. } => arguments
                .iter()
                .map(|&a| self.ptg(a))
                .chain(std::iter::once(self.ptg(site.call)))
                .collect(),
            Node::NewObject { arguments, .. } => std::iter::once(self.ptg(site.call))
                .chain(arguments.iter().map(|&a| self.ptg(a)))
                .collect(),
            other => panic!("call site does not reference a call node: {other:?}"),
        };

        let drains: Vec<PtgNodeId> = (0..summary.num_drains)
            .map(|_| self.push_synthetic_drain())
            .collect();

        for escape in &summary.escapes {
            match self.resolve_summary_node(&args, &drains, callee_param_count, escape) {
                Some(node) => self.nodes[node.index()].depth = depths::ESCAPES,
                None => self.drop_summary_entry(site),
            }
        }

        for edge in &summary.points_to {
            let from = self.resolve_summary_node(&args, &drains, callee_param_count, &edge.from);
            let to = self.resolve_summary_node(&args, &drains, callee_param_count, &edge.to);
            match (from, to) {
                (Some(from), Some(to)) => self.add_assignment(from, to),
                _ => self.drop_summary_entry(site),
            }
        }
    }

    /// Resolve a compressed summary node against a call site: kind to a
    /// root node, then the path by repeated `goto_field`. The sentinel
    /// return-value field is a no-op — the return slot is already the
    /// root.
    fn resolve_summary_node(
        &mut self,
        args: &[PtgNodeId],
        drains: &[PtgNodeId],
        callee_param_count: usize,
        node: &CgNode,
    ) -> Option<PtgNodeId> {
        let mut current = match node.kind {
            CgNodeKind::Return => *args.get(callee_param_count)?,
            CgNodeKind::Param(i) => *args.get(i as usize)?,
            CgNodeKind::Drain(k) => drains[k as usize],
        };
        for &field in &node.path {
            if field == Field::RETURN_VALUE {
                continue;
            }
            current = self.goto_field(current, field);
        }
        Some(current)
    }

    fn drop_summary_entry(&mut self, site: &CallSite) {
        tracing::warn!(
            call = site.call.raw(),
            "call-site summary entry maps to no node; dropping"
        );
        self.dropped_call_edges += 1;
    }

    /// Rebuild every node's incoming-edge list from the forward edges.
    pub(crate) fn rebuild_reversed(&mut self) {
        for node in &mut self.nodes {
            node.reversed.clear();
        }
        for v in 0..self.nodes.len() {
            for i in 0..self.nodes[v].edges.len() {
                let edge = self.nodes[v].edges[i];
                self.nodes[edge.to.index()].reversed.push(PtgEdge {
                    to: PtgNodeId::new(v as u32),
                    field: edge.field,
                });
            }
        }
    }

    /// Resolve a node's drain by chasing drain pointers to the fixed
    /// point.
    pub(crate) fn actual_drain(&self, v: PtgNodeId) -> PtgNodeId {
        let mut current = v;
        loop {
            match self.nodes[current.index()].drain {
                Some(next) if next != current => current = next,
                _ => return current,
            }
        }
    }

    /// The canonical drain of `v` (valid after closure canonicalization).
    #[inline]
    pub(crate) fn drain_of(&self, v: PtgNodeId) -> PtgNodeId {
        self.nodes[v.index()].drain.unwrap_or(v)
    }

    /// All node ids, arena order.
    pub(crate) fn node_ids(&self) -> impl Iterator<Item = PtgNodeId> {
        (0..self.nodes.len() as u32).map(PtgNodeId::new)
    }

    // ── Summary extraction ──────────────────────────────────────────

    /// Compress the closed graph into a function summary.
    pub(crate) fn extract_summary(&mut self) -> FunctionSummary {
        self.rebuild_reversed();
        let interesting = self.interesting_drains();

        // Paint the roots, then walk outward from painted drains along
        // field edges. Each interesting drain is walked exactly once, by
        // the first labelled node that reaches it.
        let mut labels: FxHashMap<PtgNodeId, CgNode> = FxHashMap::default();
        let mut painters: FxHashMap<PtgNodeId, CgNode> = FxHashMap::default();
        let mut discovered: Vec<PtgNodeId> = Vec::new();
        let mut queue: VecDeque<PtgNodeId> = VecDeque::new();

        for (i, &p) in self.params.iter().enumerate() {
            labels
                .entry(p)
                .or_insert_with(|| CgNode::param(i as u32));
            queue.push_back(p);
        }
        labels.entry(self.returns_node).or_insert_with(CgNode::ret);
        queue.push_back(self.returns_node);

        while let Some(v) = queue.pop_front() {
            let drain = self.drain_of(v);
            if !interesting.contains(&drain) || painters.contains_key(&drain) {
                continue;
            }
            let painter = labels
                .get(&v)
                .expect("queued node carries a label")
                .clone();
            painters.insert(drain, painter.clone());
            if !labels.contains_key(&drain) {
                discovered.push(drain);
            }
            for i in 0..self.nodes[drain.index()].edges.len() {
                let edge = self.nodes[drain.index()].edges[i];
                let Some(field) = edge.field else { continue };
                if edge.to == drain {
                    continue;
                }
                if !interesting.contains(&self.drain_of(edge.to)) {
                    continue;
                }
                if !labels.contains_key(&edge.to) {
                    labels.insert(edge.to, painter.extend(field));
                    queue.push_back(edge.to);
                }
            }
        }

        // Drains reached without a label get fresh identifiers, in
        // discovery order.
        let mut num_drains = 0u32;
        for &drain in &discovered {
            if !labels.contains_key(&drain) {
                labels.insert(drain, CgNode::drain(num_drains));
                num_drains += 1;
            }
        }

        // Close over the painted subgraph: direct edges for relations the
        // compression would otherwise hide, then auxiliary drains for
        // may-alias pairs. The auxiliary drains are numbered last.
        let kept: FxHashSet<PtgNodeId> = labels.keys().copied().collect();
        closure::intra_component_closure(self, &kept);
        for aux in closure::insert_aux_drains(self, &kept) {
            labels.insert(aux, CgNode::drain(num_drains));
            num_drains += 1;
        }

        self.validate_painted_field_edges(&labels);

        let mut labelled: Vec<(PtgNodeId, &CgNode)> =
            labels.iter().map(|(&v, label)| (v, label)).collect();
        labelled.sort_by_key(|&(v, _)| v);

        let mut summary = FunctionSummary {
            num_drains,
            points_to: Vec::new(),
            escapes: Vec::new(),
        };

        for &(v, label) in &labelled {
            for edge in &self.nodes[v.index()].edges {
                if edge.field.is_some() {
                    continue;
                }
                if let Some(target) = labels.get(&edge.to) {
                    if label != target {
                        summary.points_to.push(CgEdge {
                            from: label.clone(),
                            to: target.clone(),
                        });
                    }
                }
            }
        }

        let mut walked: Vec<(PtgNodeId, &CgNode)> =
            painters.iter().map(|(&d, painter)| (d, painter)).collect();
        walked.sort_by_key(|&(d, _)| d);
        for &(drain, painter) in &walked {
            for edge in &self.nodes[drain.index()].edges {
                let Some(field) = edge.field else { continue };
                let Some(target) = labels.get(&edge.to) else {
                    continue;
                };
                let from = painter.extend(field);
                // A self-loop through a field stays; it still says the
                // slot can designate its own holder.
                if &from != target {
                    summary.points_to.push(CgEdge {
                        from,
                        to: target.clone(),
                    });
                }
            }
        }

        // A node escapes if it does, or if anything it may alias does —
        // the component's drain carries the latter.
        for &(v, label) in &labelled {
            let drain = self.drain_of(v);
            if self.nodes[v.index()].depth == depths::ESCAPES
                || self.nodes[drain.index()].depth == depths::ESCAPES
            {
                summary.escapes.push(label.clone());
            }
        }

        summary.normalize();
        summary
    }

    /// Drains worth keeping in the summary: every drain reachable from a
    /// parameter or the return slot, minus iteratively pruned "cactus"
    /// drains — leaves whose single incoming interesting edge comes from
    /// a non-escaping node. Parameters' own drains and escaping drains
    /// are never pruned.
    fn interesting_drains(&self) -> FxHashSet<PtgNodeId> {
        let mut reachable = FxHashSet::default();
        let mut stack: Vec<PtgNodeId> = Vec::new();
        for &root in self.params.iter().chain(std::iter::once(&self.returns_node)) {
            if reachable.insert(root) {
                stack.push(root);
            }
        }
        while let Some(v) = stack.pop() {
            for edge in &self.nodes[v.index()].edges {
                if reachable.insert(edge.to) {
                    stack.push(edge.to);
                }
            }
        }

        let mut interesting: FxHashSet<PtgNodeId> =
            reachable.iter().map(|&v| self.drain_of(v)).collect();

        let param_drains: FxHashSet<PtgNodeId> = self
            .params
            .iter()
            .chain(std::iter::once(&self.returns_node))
            .map(|&p| self.drain_of(p))
            .collect();

        loop {
            let mut pruned = None;
            let mut candidates: Vec<PtgNodeId> = interesting.iter().copied().collect();
            candidates.sort();
            'candidates: for drain in candidates {
                if param_drains.contains(&drain)
                    || self.nodes[drain.index()].depth == depths::ESCAPES
                {
                    continue;
                }
                // Leaf: no outgoing edge into another interesting drain's
                // component.
                for edge in &self.nodes[drain.index()].edges {
                    let target_drain = self.drain_of(edge.to);
                    if target_drain != drain && interesting.contains(&target_drain) {
                        continue 'candidates;
                    }
                }
                // Exactly one incoming interesting edge, from a
                // non-escaping node.
                let mut incoming = 0u32;
                let mut source_escapes = false;
                for v in self.node_ids() {
                    if self.drain_of(v) == drain {
                        continue;
                    }
                    if !interesting.contains(&self.drain_of(v)) {
                        continue;
                    }
                    for edge in &self.nodes[v.index()].edges {
                        if self.drain_of(edge.to) == drain {
                            incoming += 1;
                            if self.nodes[v.index()].depth == depths::ESCAPES {
                                source_escapes = true;
                            }
                        }
                    }
                }
                if incoming == 1 && !source_escapes {
                    pruned = Some(drain);
                    break;
                }
            }
            match pruned {
                Some(drain) => {
                    interesting.remove(&drain);
                }
                None => break,
            }
        }

        interesting
    }

    /// A painted node with more than one incoming field edge has an
    /// ambiguous name — that is a graph-construction bug.
    fn validate_painted_field_edges(&self, labels: &FxHashMap<PtgNodeId, CgNode>) {
        let mut incoming: FxHashMap<PtgNodeId, u32> = FxHashMap::default();
        for v in self.node_ids() {
            for edge in &self.nodes[v.index()].edges {
                if edge.field.is_some() && labels.contains_key(&edge.to) {
                    let count = incoming.entry(edge.to).or_insert(0);
                    *count += 1;
                    assert!(
                        *count <= 1,
                        "painted node {:?} has more than one incoming field edge",
                        edge.to
                    );
                }
            }
        }
    }
}
