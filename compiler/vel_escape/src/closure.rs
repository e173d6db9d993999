//! Points-to graph closure and drain construction.
//!
//! After seeding and call-site inlining, the graph is closed so that every
//! connected assignment component funnels its field edges through exactly
//! one *drain*:
//!
//! - **Drain election** ([`build_drains`]) — assignment edges, treated as
//!   undirected, partition the nodes into components. A member with no
//!   outgoing assignment edges that the whole component can reach becomes
//!   the drain; otherwise a fresh drain is synthesised and every member
//!   attached to it. All member field edges move onto the drain.
//!
//! - **Coalescing** ([`coalesce`]) — a drain may now carry several field
//!   edges with the same label into different components. Those components
//!   are merged (a slot holds one value at a time, so the targets may
//!   alias) until every drain's field labels are unique.
//!
//! - **Canonicalization** ([`canonicalize`]) — drain pointers are
//!   path-compressed, every member gains an assignment edge to its drain,
//!   and the drain invariants are checked: unique field labels, no
//!   outgoing assignment edges on a drain.
//!
//! Two more steps run during summary extraction, once the painted node set
//! is known: [`intra_component_closure`] materializes transitive
//! relations between painted nodes that pass through unpainted ones, and
//! [`insert_aux_drains`] records that two painted nodes draining into the
//! same component may alias — one slot cannot hold two values at once, but
//! two references may hold one, so only the two-references-one-value
//! pattern gets a helper drain.
//!
//! Everything here is iterative; bodies can be large enough that
//! recursion over components would overflow the stack.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ptg::{PointsToGraph, PtgEdge, PtgNodeId};

/// Close the graph: drains, coalescing, canonicalization.
pub(crate) fn close(g: &mut PointsToGraph) {
    g.rebuild_reversed();
    build_drains(g);
    coalesce(g);
    canonicalize(g);
    g.rebuild_reversed();
}

/// Partition nodes into assignment components and give each a drain.
fn build_drains(g: &mut PointsToGraph) {
    let node_count = g.nodes.len();
    let mut visited = vec![false; node_count];

    for start in 0..node_count {
        if visited[start] {
            continue;
        }

        // The component of `start`, assignment edges both ways.
        let mut component: Vec<usize> = vec![start];
        visited[start] = true;
        let mut i = 0;
        while i < component.len() {
            let v = component[i];
            i += 1;
            for k in 0..g.nodes[v].edges.len() {
                let edge = g.nodes[v].edges[k];
                if edge.field.is_none() && !visited[edge.to.index()] {
                    visited[edge.to.index()] = true;
                    component.push(edge.to.index());
                }
            }
            for k in 0..g.nodes[v].reversed.len() {
                let edge = g.nodes[v].reversed[k];
                if edge.field.is_none() && !visited[edge.to.index()] {
                    visited[edge.to.index()] = true;
                    component.push(edge.to.index());
                }
            }
        }

        // Elect an existing drain: no outgoing assignment edges, and the
        // whole component reaches it.
        let mut drain: Option<usize> = None;
        'members: for &m in &component {
            if g.nodes[m].edges.iter().any(|e| e.field.is_none()) {
                continue;
            }
            let mut seen: FxHashSet<usize> = FxHashSet::default();
            seen.insert(m);
            let mut stack = vec![m];
            while let Some(v) = stack.pop() {
                for edge in &g.nodes[v].reversed {
                    if edge.field.is_none() && seen.insert(edge.to.index()) {
                        stack.push(edge.to.index());
                    }
                }
            }
            if seen.len() == component.len() {
                drain = Some(m);
                break 'members;
            }
        }

        let drain = match drain {
            Some(m) => m,
            None => {
                let d = g.push_synthetic_drain();
                for &m in &component {
                    g.add_assignment(PtgNodeId::new(m as u32), d);
                }
                d.index()
            }
        };

        let drain_id = PtgNodeId::new(drain as u32);
        for &m in &component {
            g.nodes[m].drain = Some(drain_id);
        }
        g.nodes[drain].drain = Some(drain_id);

        // All field edges of the component originate at its drain.
        for &m in &component {
            if m != drain {
                move_field_edges(g, m, drain);
            }
        }
    }
}

/// Move every field edge of `from` onto `to`, leaving assignment edges in
/// place.
fn move_field_edges(g: &mut PointsToGraph, from: usize, to: usize) {
    let taken = std::mem::take(&mut g.nodes[from].edges);
    let (fields, assignments): (Vec<PtgEdge>, Vec<PtgEdge>) =
        taken.into_iter().partition(|e| e.field.is_some());
    g.nodes[from].edges = assignments;
    g.nodes[to].edges.extend(fields);
}

/// Merge components until no drain has two field edges with one label
/// into different components.
fn coalesce(g: &mut PointsToGraph) {
    let mut work: Vec<PtgNodeId> = g
        .node_ids()
        .filter(|&v| g.nodes[v.index()].drain == Some(v))
        .collect();

    while let Some(d) = work.pop() {
        let d = g.actual_drain(d);
        let mut first_target: FxHashMap<i64, PtgNodeId> = FxHashMap::default();
        let mut saw_duplicate = false;

        // Snapshot: a merge may move this very edge list onto a parent.
        let edges: Vec<PtgEdge> = g.nodes[d.index()].edges.clone();
        for edge in edges {
            let Some(field) = edge.field else { continue };
            match first_target.get(&field.hash()) {
                None => {
                    first_target.insert(field.hash(), edge.to);
                }
                Some(&seen) => {
                    saw_duplicate = true;
                    let a = g.actual_drain(seen);
                    let b = g.actual_drain(edge.to);
                    if a != b {
                        let parent = merge_drains(g, a, b);
                        work.push(parent);
                    }
                }
            }
        }

        if saw_duplicate {
            let root = g.actual_drain(d);
            dedupe_field_edges(g, root);
            work.push(root);
        }
    }
}

/// Merge two drain roots, per the synthesised/real cases: a synthesised
/// drain absorbs a real one; any other pairing gets a fresh synthesised
/// parent absorbing both edge lists.
fn merge_drains(g: &mut PointsToGraph, a: PtgNodeId, b: PtgNodeId) -> PtgNodeId {
    debug_assert_ne!(a, b, "merging a drain with itself");
    let a_synthetic = g.nodes[a.index()].synthetic_drain;
    let b_synthetic = g.nodes[b.index()].synthetic_drain;
    if a_synthetic && !b_synthetic {
        g.nodes[b.index()].drain = Some(a);
        absorb_field_edges(g, b, a);
        a
    } else if b_synthetic && !a_synthetic {
        g.nodes[a.index()].drain = Some(b);
        absorb_field_edges(g, a, b);
        b
    } else {
        let parent = g.push_synthetic_drain();
        g.nodes[a.index()].drain = Some(parent);
        g.nodes[b.index()].drain = Some(parent);
        absorb_field_edges(g, a, parent);
        absorb_field_edges(g, b, parent);
        parent
    }
}

/// Move a former drain's edge list onto its new root. Drains only carry
/// field edges.
fn absorb_field_edges(g: &mut PointsToGraph, from: PtgNodeId, to: PtgNodeId) {
    let taken = std::mem::take(&mut g.nodes[from.index()].edges);
    debug_assert!(
        taken.iter().all(|e| e.field.is_some()),
        "drain carried assignment edges into a merge"
    );
    g.nodes[to.index()].edges.extend(taken);
}

/// Drop duplicate field edges whose targets landed in one component,
/// keeping the first.
fn dedupe_field_edges(g: &mut PointsToGraph, d: PtgNodeId) {
    let taken = std::mem::take(&mut g.nodes[d.index()].edges);
    let mut first_target: FxHashMap<i64, PtgNodeId> = FxHashMap::default();
    let mut kept = Vec::with_capacity(taken.len());
    for edge in taken {
        match edge.field {
            None => kept.push(edge),
            Some(field) => match first_target.get(&field.hash()) {
                None => {
                    first_target.insert(field.hash(), edge.to);
                    kept.push(edge);
                }
                Some(&seen) => {
                    // Still-distinct components stay; another coalescing
                    // round merges them.
                    if g.actual_drain(seen) != g.actual_drain(edge.to) {
                        kept.push(edge);
                    }
                }
            },
        }
    }
    g.nodes[d.index()].edges = kept;
}

/// Path-compress drain pointers, attach every member to its drain, and
/// check the drain invariants.
fn canonicalize(g: &mut PointsToGraph) {
    for v in g.node_ids() {
        let root = g.actual_drain(v);
        g.nodes[v.index()].drain = Some(root);
    }

    for v in g.node_ids() {
        let drain = g.drain_of(v);
        if drain == v {
            continue;
        }
        let already = g.nodes[v.index()]
            .edges
            .iter()
            .any(|e| e.field.is_none() && e.to == drain);
        if !already {
            g.add_assignment(v, drain);
        }
    }

    for v in g.node_ids() {
        if g.drain_of(v) != v {
            continue;
        }
        let mut labels: FxHashSet<i64> = FxHashSet::default();
        for edge in &g.nodes[v.index()].edges {
            match edge.field {
                None => panic!("drain {v:?} has outgoing assignment edges after closure"),
                Some(field) => assert!(
                    labels.insert(field.hash()),
                    "drain {v:?} has duplicate field label after closure"
                ),
            }
        }
    }
}

/// Add a direct assignment edge wherever a painted node reaches another
/// painted node only through unpainted ones — compression would lose the
/// relation otherwise.
pub(crate) fn intra_component_closure(g: &mut PointsToGraph, kept: &FxHashSet<PtgNodeId>) {
    let mut kept_sorted: Vec<PtgNodeId> = kept.iter().copied().collect();
    kept_sorted.sort();

    for &v in &kept_sorted {
        // Reachable painted nodes, through anything.
        let mut seen: FxHashSet<PtgNodeId> = FxHashSet::default();
        seen.insert(v);
        let mut stack = vec![v];
        let mut reach_all: Vec<PtgNodeId> = Vec::new();
        while let Some(u) = stack.pop() {
            for i in 0..g.nodes[u.index()].edges.len() {
                let edge = g.nodes[u.index()].edges[i];
                if edge.field.is_none() && seen.insert(edge.to) {
                    if kept.contains(&edge.to) {
                        reach_all.push(edge.to);
                    }
                    stack.push(edge.to);
                }
            }
        }

        // Reachable painted nodes, through painted nodes only.
        let mut seen_kept: FxHashSet<PtgNodeId> = FxHashSet::default();
        seen_kept.insert(v);
        let mut stack = vec![v];
        let mut reach_kept: FxHashSet<PtgNodeId> = FxHashSet::default();
        while let Some(u) = stack.pop() {
            for i in 0..g.nodes[u.index()].edges.len() {
                let edge = g.nodes[u.index()].edges[i];
                if edge.field.is_none() && kept.contains(&edge.to) && seen_kept.insert(edge.to) {
                    reach_kept.insert(edge.to);
                    stack.push(edge.to);
                }
            }
        }

        reach_all.sort();
        for w in reach_all {
            if !reach_kept.contains(&w) {
                g.add_assignment(v, w);
            }
        }
    }
}

/// For each pair of painted nodes draining into one component with no
/// direct edge either way, synthesise a helper drain both point at. The
/// summary then records that the two may alias.
pub(crate) fn insert_aux_drains(
    g: &mut PointsToGraph,
    kept: &FxHashSet<PtgNodeId>,
) -> Vec<PtgNodeId> {
    let mut by_drain: FxHashMap<PtgNodeId, Vec<PtgNodeId>> = FxHashMap::default();
    let mut kept_sorted: Vec<PtgNodeId> = kept.iter().copied().collect();
    kept_sorted.sort();
    for &v in &kept_sorted {
        by_drain.entry(g.drain_of(v)).or_default().push(v);
    }

    let mut drains: Vec<PtgNodeId> = by_drain.keys().copied().collect();
    drains.sort();

    let mut created = Vec::new();
    for drain in drains {
        let members = &by_drain[&drain];
        if members.len() < 2 {
            continue;
        }
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                let (v, w) = (members[i], members[j]);
                if has_assignment_edge(g, v, w) || has_assignment_edge(g, w, v) {
                    continue;
                }
                let aux = g.push_synthetic_drain();
                g.add_assignment(v, aux);
                g.add_assignment(w, aux);
                created.push(aux);
            }
        }
    }
    created
}

fn has_assignment_edge(g: &PointsToGraph, from: PtgNodeId, to: PtgNodeId) -> bool {
    g.nodes[from.index()]
        .edges
        .iter()
        .any(|e| e.field.is_none() && e.to == to)
}

#[cfg(test)]
mod tests;
