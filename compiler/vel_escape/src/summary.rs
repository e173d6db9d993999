//! Function escape summaries.
//!
//! The externally visible fact computed per function: a compressed
//! points-to graph (edges between nodes named relative to the parameters,
//! the return slot, or numbered drains) plus the set of nodes that escape.
//! Summaries are immutable value objects — the interprocedural fixpoint
//! installs one per function and compares structurally to detect change,
//! the way borrow inference keeps a map of annotated signatures.
//!
//! Three canonical constructors:
//!
//! - [`FunctionSummary::optimistic`] — nothing escapes, nothing points
//!   anywhere. The starting assumption for every function in an SCC.
//! - [`FunctionSummary::pessimistic`] — every parameter and the return
//!   escape. Used for unknown and virtual callees and for functions whose
//!   SCC iteration fails to converge.
//! - [`FunctionSummary::from_bits`] — decodes the bit-packed annotations
//!   the runtime ships on its own functions.

use std::cmp::Ordering;

use smallvec::SmallVec;

use vel_dfir::Field;

/// Offset that keeps parameter indices below every other kind in the
/// total order of compressed nodes.
const PARAM_BIAS: i64 = 1_000_000;

/// The root of a compressed node name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CgNodeKind {
    /// The function's return slot.
    Return,
    /// Parameter by index.
    Param(u32),
    /// Numbered drain.
    Drain(u32),
}

impl CgNodeKind {
    /// Total-order key: parameters first (biased negative), then the
    /// return, then drains.
    #[inline]
    pub fn absolute_index(self) -> i64 {
        match self {
            CgNodeKind::Return => 0,
            CgNodeKind::Param(i) => i64::from(i) - PARAM_BIAS,
            CgNodeKind::Drain(i) => i64::from(i) + 1,
        }
    }
}

/// A compressed points-to graph node: a root kind plus a field path
/// walked from that root.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CgNode {
    pub kind: CgNodeKind,
    pub path: SmallVec<[Field; 4]>,
}

impl CgNode {
    /// A pathless node of the given kind.
    pub fn new(kind: CgNodeKind) -> Self {
        CgNode {
            kind,
            path: SmallVec::new(),
        }
    }

    /// The `i`-th parameter.
    pub fn param(i: u32) -> Self {
        CgNode::new(CgNodeKind::Param(i))
    }

    /// The return slot.
    pub fn ret() -> Self {
        CgNode::new(CgNodeKind::Return)
    }

    /// The `k`-th drain.
    pub fn drain(k: u32) -> Self {
        CgNode::new(CgNodeKind::Drain(k))
    }

    /// This node's name extended by one more field.
    pub fn extend(&self, field: Field) -> Self {
        let mut path = self.path.clone();
        path.push(field);
        CgNode {
            kind: self.kind,
            path,
        }
    }
}

impl PartialOrd for CgNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CgNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // By kind, then lexicographically by path hash — slice ordering
        // already puts a shorter path first on a tie.
        self.kind
            .absolute_index()
            .cmp(&other.kind.absolute_index())
            .then_with(|| self.path.cmp(&other.path))
    }
}

/// A directed points-to edge between two compressed nodes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CgEdge {
    pub from: CgNode,
    pub to: CgNode,
}

/// The escape summary of one function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionSummary {
    /// Number of drains named by `Drain(k)` nodes; every referenced `k`
    /// is below this.
    pub num_drains: u32,
    /// Points-to edges, sorted and deduplicated.
    pub points_to: Vec<CgEdge>,
    /// Escaping nodes, sorted and deduplicated.
    pub escapes: Vec<CgNode>,
}

impl FunctionSummary {
    /// No drains, no edges, no escapes.
    pub fn optimistic() -> Self {
        FunctionSummary {
            num_drains: 0,
            points_to: Vec::new(),
            escapes: Vec::new(),
        }
    }

    /// Every parameter and the synthetic return escape; no edges.
    pub fn pessimistic(param_count: u32) -> Self {
        let mut escapes: Vec<CgNode> = (0..param_count).map(CgNode::param).collect();
        escapes.push(CgNode::ret());
        let mut summary = FunctionSummary {
            num_drains: 0,
            points_to: Vec::new(),
            escapes,
        };
        summary.normalize();
        summary
    }

    /// Decode the runtime's bit-packed annotations.
    ///
    /// `escapes_mask` is a bitset over parameter indices; the bit at
    /// `param_count` is the return slot. `points_to_masks[i]` carries one
    /// nibble per target index `j` (at bit `4·j`):
    ///
    /// | code | edge |
    /// |---|---|
    /// | 0 | none |
    /// | 1 | `Pi → Pj` |
    /// | 2 | `Pi → Pj.INTESTINES` |
    /// | 3 | `Pi.INTESTINES → Pj` |
    /// | 4 | `Pi.INTESTINES → Pj.INTESTINES` |
    ///
    /// Any other code is a corrupt annotation and fatal.
    pub fn from_bits(param_count: u32, escapes_mask: u32, points_to_masks: &[u32]) -> Self {
        let root = |index: u32| -> CgNode {
            if index < param_count {
                CgNode::param(index)
            } else {
                debug_assert_eq!(index, param_count);
                CgNode::ret()
            }
        };

        let mut summary = FunctionSummary::optimistic();

        for index in 0..=param_count.min(31) {
            if escapes_mask & (1 << index) != 0 {
                summary.escapes.push(root(index));
            }
        }

        for (i, &mask) in points_to_masks.iter().enumerate() {
            let from_index = u32::try_from(i).expect("points-to row overflow");
            for j in 0..=param_count {
                let shift = 4 * j;
                if shift >= 32 {
                    break;
                }
                let code = (mask >> shift) & 0xF;
                if code == 0 {
                    continue;
                }
                assert!(
                    code <= 4,
                    "invalid points-to nibble code {code} (parameter {i} -> {j})"
                );
                let mut from = root(from_index);
                if code == 3 || code == 4 {
                    from = from.extend(Field::INTESTINES);
                }
                let mut to = root(j);
                if code == 2 || code == 4 {
                    to = to.extend(Field::INTESTINES);
                }
                summary.points_to.push(CgEdge { from, to });
            }
        }

        summary.normalize();
        summary
    }

    /// Sort and deduplicate, establishing the canonical form structural
    /// equality relies on.
    pub(crate) fn normalize(&mut self) {
        self.points_to.sort();
        self.points_to.dedup();
        self.escapes.sort();
        self.escapes.dedup();
    }
}
