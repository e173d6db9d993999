use vel_dfir::Field;

use crate::test_helpers::{BodyBuilder, ModuleBuilder};

use super::*;

fn roles_of(m: &ModuleBuilder, b: &BodyBuilder) -> FunctionRoles {
    assign_roles(&b.body, &m.module, &m.externals, &m.target)
}

#[test]
fn depths_follow_scope_nesting() {
    let m = ModuleBuilder::new();
    let mut b = BodyBuilder::new(0);
    let outer = b.const_int(m.int_ty(), 1);
    let nested = b.begin_scope();
    let inner = b.const_int(m.int_ty(), 2);
    b.end_scope();

    let roles = roles_of(&m, &b);
    assert_eq!(roles.info(b.body.root_scope).depth, -1);
    assert_eq!(roles.info(outer).depth, 0);
    assert_eq!(roles.info(nested).depth, 0);
    assert_eq!(roles.info(inner).depth, 1);
}

#[test]
fn returned_and_thrown_values_get_their_roles() {
    let m = ModuleBuilder::new();
    let mut b = BodyBuilder::new(2);
    let returned = b.param(0);
    let thrown = b.param(1);
    b.ret(returned);
    b.throws(thrown);

    let roles = roles_of(&m, &b);
    assert!(roles.info(returned).has(Role::ReturnValue));
    assert!(!roles.info(returned).escapes());
    assert!(roles.info(thrown).has(Role::ThrowValue));
    assert!(roles.info(thrown).escapes());
}

#[test]
fn field_write_tags_the_receiver() {
    let m = ModuleBuilder::new();
    let mut b = BodyBuilder::new(2);
    let receiver = b.param(0);
    let value = b.param(1);
    b.field_write(Some(receiver), 7, value);

    let roles = roles_of(&m, &b);
    let entries = roles.info(receiver).entries(Role::WriteField);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].node, Some(value));
    assert_eq!(entries[0].field, Some(Field::declared(7)));
    assert!(!roles.info(receiver).escapes());
}

#[test]
fn global_write_escapes_the_value() {
    let m = ModuleBuilder::new();
    let mut b = BodyBuilder::new(1);
    let value = b.param(0);
    b.field_write(None, 7, value);

    let roles = roles_of(&m, &b);
    assert!(roles.info(value).has(Role::WrittenToGlobal));
    assert!(roles.info(value).escapes());
}

#[test]
fn field_read_tags_the_receiver_with_the_read_node() {
    let m = ModuleBuilder::new();
    let mut b = BodyBuilder::new(1);
    let receiver = b.param(0);
    let read = b.field_read(Some(receiver), 9);

    let roles = roles_of(&m, &b);
    let entries = roles.info(receiver).entries(Role::ReadField);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].node, Some(read));
    assert_eq!(entries[0].field, Some(Field::declared(9)));
    assert!(!roles.info(read).escapes());
}

#[test]
fn global_read_escapes_the_read_itself() {
    let m = ModuleBuilder::new();
    let mut b = BodyBuilder::new(0);
    let read = b.field_read(None, 9);

    let roles = roles_of(&m, &b);
    assert!(roles.info(read).has(Role::WrittenToGlobal));
    assert!(roles.info(read).escapes());
}

#[test]
fn array_accesses_use_the_intestines_field() {
    let m = ModuleBuilder::new();
    let mut b = BodyBuilder::new(2);
    let array = b.param(0);
    let value = b.param(1);
    b.array_write(array, value);
    let read = b.array_read(array);

    let roles = roles_of(&m, &b);
    let writes = roles.info(array).entries(Role::WriteField);
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].field, Some(Field::INTESTINES));
    assert_eq!(writes[0].node, Some(value));
    let reads = roles.info(array).entries(Role::ReadField);
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].field, Some(Field::INTESTINES));
    assert_eq!(reads[0].node, Some(read));
}

#[test]
fn singletons_escape_unless_bottom() {
    let m = ModuleBuilder::new();
    let mut b = BodyBuilder::new(0);
    let object = b.singleton(m.object_ty());
    let bottom = b.singleton(m.nothing_ty());

    let roles = roles_of(&m, &b);
    assert!(roles.info(object).escapes());
    assert!(!roles.info(bottom).escapes());
}

#[test]
fn variables_record_their_assignments() {
    let m = ModuleBuilder::new();
    let mut b = BodyBuilder::new(2);
    let first = b.param(0);
    let second = b.param(1);
    let var = b.variable(vec![first, second]);

    let roles = roles_of(&m, &b);
    let entries = roles.info(var).entries(Role::Assigned);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].node, Some(first));
    assert_eq!(entries[1].node, Some(second));
    assert!(entries.iter().all(|e| e.field.is_none()));
}

#[test]
fn role_set_is_a_closed_bitset() {
    let all = RoleSet::RETURN_VALUE
        | RoleSet::THROW_VALUE
        | RoleSet::WRITE_FIELD
        | RoleSet::READ_FIELD
        | RoleSet::WRITTEN_TO_GLOBAL
        | RoleSet::ASSIGNED;
    assert_eq!(all, RoleSet::all());
    assert_eq!(all.bits(), 0b11_1111);
}
