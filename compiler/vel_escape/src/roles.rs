//! Intraprocedural role assignment.
//!
//! One walk over a function's DFIR body produces a [`NodeInfo`] per node:
//! the node's lexical depth plus the set of roles its value plays. Roles
//! are the whole story the interprocedural stage needs about a body — the
//! points-to graph is seeded purely from them.
//!
//! Two of the roles mean the value is reachable from a program-visible
//! root no matter what the rest of the analysis finds: a value written to
//! a global or thrown escapes immediately ([`NodeInfo::escapes`]). A read
//! from a global is modelled the same way — the read value came from an
//! escaped region, so the read node itself is tagged `WRITTEN_TO_GLOBAL`.
//!
//! The role set is closed at six members, so it is a `u8` bitset and the
//! per-role entry lists are a flat array indexed by discriminant.

use bitflags::bitflags;
use smallvec::SmallVec;

use vel_dfir::{ExternalModulesDfg, Field, FunctionBody, ModuleDfg, Node, NodeId, TargetInfo};

bitflags! {
    /// The set of roles a node's value plays.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RoleSet: u8 {
        const RETURN_VALUE = 1 << 0;
        const THROW_VALUE = 1 << 1;
        const WRITE_FIELD = 1 << 2;
        const READ_FIELD = 1 << 3;
        const WRITTEN_TO_GLOBAL = 1 << 4;
        const ASSIGNED = 1 << 5;
    }
}

/// A single role, usable as an index into the entry table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Role {
    ReturnValue = 0,
    ThrowValue = 1,
    WriteField = 2,
    ReadField = 3,
    WrittenToGlobal = 4,
    Assigned = 5,
}

impl Role {
    #[inline]
    fn flag(self) -> RoleSet {
        RoleSet::from_bits_truncate(1 << self as u8)
    }

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// The other end of a role relation: the field written/read and the node
/// on the far side, where the role has one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoleEntry {
    pub node: Option<NodeId>,
    pub field: Option<Field>,
}

/// Lexical depth plus roles for one DFIR node.
#[derive(Clone, Debug, Default)]
pub struct NodeInfo {
    /// Lexical depth: the root scope is −1 and everything directly inside
    /// a scope of depth *d* (nested scopes and plain nodes alike) is at
    /// *d*+1, so non-scope nodes sit at non-negative depths.
    pub depth: i32,
    roles: RoleSet,
    entries: [SmallVec<[RoleEntry; 2]>; 6],
}

impl NodeInfo {
    /// Add an entry-less role.
    pub fn add_role(&mut self, role: Role) {
        self.roles |= role.flag();
    }

    /// Add a role with an entry.
    pub fn add_entry(&mut self, role: Role, entry: RoleEntry) {
        self.roles |= role.flag();
        self.entries[role.index()].push(entry);
    }

    /// Whether the node plays `role`.
    #[inline]
    pub fn has(&self, role: Role) -> bool {
        self.roles.contains(role.flag())
    }

    /// The entries recorded for `role`.
    #[inline]
    pub fn entries(&self, role: Role) -> &[RoleEntry] {
        &self.entries[role.index()]
    }

    /// Whether the node escapes already at this stage: its value was
    /// written to a global or thrown.
    #[inline]
    pub fn escapes(&self) -> bool {
        self.roles
            .intersects(RoleSet::WRITTEN_TO_GLOBAL | RoleSet::THROW_VALUE)
    }
}

/// Role assignment for every node of one function, indexed by [`NodeId`].
#[derive(Clone, Debug)]
pub struct FunctionRoles {
    infos: Vec<NodeInfo>,
}

impl FunctionRoles {
    /// The info for a node.
    #[inline]
    pub fn info(&self, id: NodeId) -> &NodeInfo {
        &self.infos[id.index()]
    }

    #[inline]
    fn info_mut(&mut self, id: NodeId) -> &mut NodeInfo {
        &mut self.infos[id.index()]
    }
}

/// Assign depths and roles to every node of `body`.
pub fn assign_roles(
    body: &FunctionBody,
    module: &ModuleDfg,
    externals: &ExternalModulesDfg,
    target: &TargetInfo,
) -> FunctionRoles {
    let mut roles = FunctionRoles {
        infos: vec![NodeInfo::default(); body.len()],
    };

    assign_depths(body, &mut roles);

    // Everything reachable through the returns/throws maps is a returned
    // or thrown value.
    for &node in body.returns.values() {
        roles.info_mut(node).add_role(Role::ReturnValue);
    }
    for &node in body.throws.values() {
        roles.info_mut(node).add_role(Role::ThrowValue);
    }

    for id in body.node_ids() {
        match body.node(id) {
            Node::FieldWrite {
                receiver: Some(receiver),
                field,
                value,
            } => {
                roles.info_mut(*receiver).add_entry(
                    Role::WriteField,
                    RoleEntry {
                        node: Some(*value),
                        field: Some(*field),
                    },
                );
            }
            // A static write: the value escapes to a global.
            Node::FieldWrite {
                receiver: None,
                value,
                ..
            } => {
                roles.info_mut(*value).add_role(Role::WrittenToGlobal);
            }
            Node::FieldRead {
                receiver: Some(receiver),
                field,
                ..
            } => {
                roles.info_mut(*receiver).add_entry(
                    Role::ReadField,
                    RoleEntry {
                        node: Some(id),
                        field: Some(*field),
                    },
                );
            }
            // A static read: the value came from an escaped region.
            Node::FieldRead { receiver: None, .. } => {
                roles.info_mut(id).add_role(Role::WrittenToGlobal);
            }
            Node::ArrayWrite { array, value } => {
                roles.info_mut(*array).add_entry(
                    Role::WriteField,
                    RoleEntry {
                        node: Some(*value),
                        field: Some(Field::INTESTINES),
                    },
                );
            }
            Node::ArrayRead { array, .. } => {
                roles.info_mut(*array).add_entry(
                    Role::ReadField,
                    RoleEntry {
                        node: Some(id),
                        field: Some(Field::INTESTINES),
                    },
                );
            }
            Node::Singleton { ty } => {
                // The bottom type has no instances; every other singleton
                // is a global.
                let resolved = module.resolve_type(externals, *ty);
                if resolved != target.well_known.nothing {
                    roles.info_mut(id).add_role(Role::WrittenToGlobal);
                }
            }
            Node::Variable { values } => {
                for &value in values {
                    roles.info_mut(id).add_entry(
                        Role::Assigned,
                        RoleEntry {
                            node: Some(value),
                            field: None,
                        },
                    );
                }
            }
            Node::Parameter { .. }
            | Node::NewObject { .. }
            | Node::Call { .. }
            | Node::Scope { .. }
            | Node::Const { .. } => {}
        }
    }

    roles
}

/// Walk the scope tree once, assigning depths. Iterative — bodies can
/// nest deeply.
fn assign_depths(body: &FunctionBody, roles: &mut FunctionRoles) {
    if body.is_empty() {
        return;
    }
    roles.info_mut(body.root_scope).depth = -1;
    let mut stack = vec![(body.root_scope, -1i32)];
    while let Some((scope, depth)) = stack.pop() {
        let Node::Scope { nodes } = body.node(scope) else {
            panic!("depth walk reached a non-scope node");
        };
        for &child in nodes {
            roles.info_mut(child).depth = depth + 1;
            if matches!(body.node(child), Node::Scope { .. }) {
                stack.push((child, depth + 1));
            }
        }
    }
}

#[cfg(test)]
mod tests;
