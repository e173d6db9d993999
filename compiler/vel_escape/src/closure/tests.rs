use vel_dfir::Field;

use crate::ptg::PointsToGraph;
use crate::roles::assign_roles;
use crate::test_helpers::{BodyBuilder, ModuleBuilder};

use super::*;

fn closed_graph(m: &ModuleBuilder, b: &BodyBuilder, param_count: usize) -> PointsToGraph {
    let roles = assign_roles(&b.body, &m.module, &m.externals, &m.target);
    let mut g = PointsToGraph::build(&b.body, &roles, param_count);
    close(&mut g);
    g
}

#[test]
fn chain_elects_the_sink_as_drain() {
    let m = ModuleBuilder::new();
    let mut b = BodyBuilder::new(0);
    let c = b.variable(vec![]);
    let mid = b.variable(vec![c]);
    let a = b.variable(vec![mid]);

    let g = closed_graph(&m, &b, 0);
    let drain = g.drain_of(g.ptg(c));
    assert_eq!(drain, g.ptg(c));
    assert_eq!(g.drain_of(g.ptg(a)), drain);
    assert_eq!(g.drain_of(g.ptg(mid)), drain);
    assert!(!g.nodes[drain.index()].synthetic_drain);
}

#[test]
fn cycle_gets_a_synthetic_drain() {
    let m = ModuleBuilder::new();
    let mut b = BodyBuilder::new(0);
    // Two variables assigned to each other: no member can serve as the
    // drain.
    let a = b.push(vel_dfir::Node::Variable { values: vec![] });
    let second = b.variable(vec![a]);
    let vel_dfir::Node::Variable { values } = &mut b.body.nodes[a.index()] else {
        unreachable!()
    };
    values.push(second);

    let g = closed_graph(&m, &b, 0);
    let drain = g.drain_of(g.ptg(a));
    assert_eq!(g.drain_of(g.ptg(second)), drain);
    assert_ne!(drain, g.ptg(a));
    assert_ne!(drain, g.ptg(second));
    assert!(g.nodes[drain.index()].synthetic_drain);
}

#[test]
fn members_point_at_their_drain() {
    let m = ModuleBuilder::new();
    let mut b = BodyBuilder::new(0);
    let c = b.variable(vec![]);
    let mid = b.variable(vec![c]);
    let a = b.variable(vec![mid]);

    let g = closed_graph(&m, &b, 0);
    let drain = g.drain_of(g.ptg(c));
    for &member in &[a, mid] {
        let v = g.ptg(member);
        assert!(
            g.nodes[v.index()]
                .edges
                .iter()
                .any(|e| e.field.is_none() && e.to == drain),
            "member should gain an assignment edge to its drain"
        );
    }
}

#[test]
fn field_edges_move_onto_the_drain() {
    let m = ModuleBuilder::new();
    let mut b = BodyBuilder::new(0);
    let y = b.variable(vec![]);
    let x = b.variable(vec![y]);
    let w = b.variable(vec![]);
    b.field_write(Some(x), 7, w);

    let g = closed_graph(&m, &b, 0);
    let drain = g.drain_of(g.ptg(x));
    assert_eq!(drain, g.ptg(y));
    assert!(g.nodes[g.ptg(x).index()]
        .edges
        .iter()
        .all(|e| e.field.is_none()));
    assert!(g.nodes[drain.index()]
        .edges
        .iter()
        .any(|e| e.field == Some(Field::declared(7))));
}

#[test]
fn duplicate_field_labels_merge_their_targets() {
    let m = ModuleBuilder::new();
    let mut b = BodyBuilder::new(0);
    let y = b.variable(vec![]);
    let x = b.variable(vec![y]);
    let u = b.variable(vec![]);
    let v = b.variable(vec![]);
    b.field_write(Some(x), 7, u);
    b.field_write(Some(y), 7, v);

    let g = closed_graph(&m, &b, 0);
    // Both slots answer to the same label on one drain, so their
    // components merged.
    assert_eq!(g.drain_of(g.ptg(u)), g.drain_of(g.ptg(v)));
    let drain = g.drain_of(g.ptg(x));
    let sevens = g.nodes[drain.index()]
        .edges
        .iter()
        .filter(|e| e.field == Some(Field::declared(7)))
        .count();
    assert_eq!(sevens, 1);
}

#[test]
fn drains_satisfy_their_invariants() {
    let m = ModuleBuilder::new();
    let mut b = BodyBuilder::new(2);
    let obj = b.variable(vec![]);
    b.field_write(Some(b.param(0)), 1, obj);
    b.field_write(Some(b.param(0)), 2, b.param(1));
    let read = b.field_read(Some(b.param(1)), 1);
    let _var = b.variable(vec![read, obj]);

    let g = closed_graph(&m, &b, 2);
    for v in g.node_ids() {
        let drain = g.drain_of(v);
        // Canonical pointers: one hop at most.
        assert_eq!(g.drain_of(drain), drain);
        if drain == v {
            assert!(
                g.nodes[v.index()].edges.iter().all(|e| e.field.is_some()),
                "drains carry field edges only"
            );
        }
    }
}

#[test]
fn intra_component_closure_bridges_unpainted_hops() {
    let m = ModuleBuilder::new();
    let mut b = BodyBuilder::new(0);
    let c = b.variable(vec![]);
    let far = b.variable(vec![c]);
    let mid = b.variable(vec![far]);
    let a = b.variable(vec![mid]);

    let mut g = closed_graph(&m, &b, 0);
    // Pretend only `a` and `far` were painted: `a` reaches `far` solely
    // through the unpainted `mid`.
    assert!(!has_assignment_edge(&g, g.ptg(a), g.ptg(far)));
    let kept: FxHashSet<_> = [g.ptg(a), g.ptg(far)].into_iter().collect();
    intra_component_closure(&mut g, &kept);
    assert!(has_assignment_edge(&g, g.ptg(a), g.ptg(far)));
}

#[test]
fn aux_drains_record_may_aliasing() {
    let m = ModuleBuilder::new();
    let mut b = BodyBuilder::new(0);
    let t = b.variable(vec![]);
    let left = b.variable(vec![t]);
    let right = b.variable(vec![t]);

    let mut g = closed_graph(&m, &b, 0);
    let kept: FxHashSet<_> = [g.ptg(left), g.ptg(right)].into_iter().collect();
    let created = insert_aux_drains(&mut g, &kept);
    assert_eq!(created.len(), 1);
    let aux = created[0];
    assert!(g.nodes[aux.index()].synthetic_drain);
    assert!(has_assignment_edge(&g, g.ptg(left), aux));
    assert!(has_assignment_edge(&g, g.ptg(right), aux));
}

#[test]
fn aux_drains_skip_directly_connected_pairs() {
    let m = ModuleBuilder::new();
    let mut b = BodyBuilder::new(0);
    let t = b.variable(vec![]);
    let left = b.variable(vec![t]);
    let right = b.variable(vec![left]);

    let mut g = closed_graph(&m, &b, 0);
    let kept: FxHashSet<_> = [g.ptg(left), g.ptg(right)].into_iter().collect();
    let created = insert_aux_drains(&mut g, &kept);
    assert!(created.is_empty());
}
