//! Group manager tests: trees, membership and store failures

mod common;

use common::{setup, FlakyStore, OWNER};
use policybit::*;

fn staff(groups: &GroupManager, key: &str) -> std::sync::Arc<Group> {
    groups.create(NewGroup::new(GroupKind::Group, 1, key, key.to_uppercase())).unwrap()
}

// ============================================================================
// Create / lookup
// ============================================================================

#[test]
fn create_and_lookup() {
    let (_store, _, groups) = setup();
    let g = groups
        .create(NewGroup::new(GroupKind::Group, 1, "staff", "Staff").description("everyone on payroll"))
        .unwrap();

    assert_eq!(g.status(), GroupStatus::Registered);
    assert_eq!(g.description(), "everyone on payroll");
    assert_eq!(groups.get_by_id(g.id()).unwrap().id(), g.id());
    assert_eq!(groups.get_by_key(GroupKind::Group, 1, "staff").unwrap().id(), g.id());
    assert!(matches!(
        groups.get_by_key(GroupKind::Role, 1, "staff"),
        Err(Error::GroupKeyNotFound { kind: GroupKind::Role, domain_id: 1, .. })
    ));
    assert!(groups.get_by_key(GroupKind::Group, 2, "staff").is_err());
    assert!(matches!(groups.get_by_id(999), Err(Error::GroupNotFound(999))));
}

#[test]
fn key_is_unique_per_kind_and_domain() {
    let (_store, _, groups) = setup();
    staff(&groups, "staff");
    assert!(matches!(
        groups.create(NewGroup::new(GroupKind::Group, 1, "staff", "Again")),
        Err(Error::GroupKeyTaken(_))
    ));
    groups.create(NewGroup::new(GroupKind::Role, 1, "staff", "Role")).unwrap();
    groups.create(NewGroup::new(GroupKind::Group, 2, "staff", "Other domain")).unwrap();
}

#[test]
fn key_uniqueness_is_checked_against_the_store() {
    let (store, _, groups) = setup();
    let g = staff(&groups, "staff");

    let cold = GroupManager::new(store.clone());
    assert!(matches!(
        cold.create(NewGroup::new(GroupKind::Group, 1, "staff", "Again")),
        Err(Error::GroupKeyTaken(_))
    ));
    assert_eq!(store.groups_by_domain(1).unwrap().len(), 1);

    // lookups by key fall back to the store too
    assert_eq!(cold.get_by_key(GroupKind::Group, 1, "staff").unwrap().id(), g.id());
    assert!(matches!(
        cold.get_by_key(GroupKind::Group, 1, "nobody"),
        Err(Error::GroupKeyNotFound { .. })
    ));
}

#[test]
fn create_validates() {
    let (_store, _, groups) = setup();
    assert!(matches!(
        groups.create(NewGroup::new(GroupKind::Group, 1, "", "Nameless key")),
        Err(Error::InvalidGroup(_))
    ));
    assert!(matches!(
        groups.create(NewGroup::new(GroupKind::Group, 1, "k", "  ")),
        Err(Error::InvalidGroup(_))
    ));
    let role = groups.create(NewGroup::new(GroupKind::Role, 1, "admin", "Admin")).unwrap();
    assert!(matches!(
        groups.create(NewGroup::new(GroupKind::Group, 1, "sub", "Sub").parent(role)),
        Err(Error::GroupKindMismatch { child: GroupKind::Group, parent: GroupKind::Role })
    ));
    assert!(groups.list(GroupKind::Group).is_empty());
}

#[test]
fn listing() {
    let (_store, _, groups) = setup();
    let a = staff(&groups, "a");
    let b = staff(&groups, "b");
    let other = groups.create(NewGroup::new(GroupKind::Group, 9, "c", "C")).unwrap();
    let role = groups.create(NewGroup::new(GroupKind::Role, 1, "r", "R")).unwrap();

    let ids: Vec<_> = groups.list(GroupKind::Group).iter().map(|g| g.id()).collect();
    assert_eq!(ids, vec![a.id(), b.id(), other.id()]);
    let ids: Vec<_> = groups.list_by_domain(1, GroupKind::Group).iter().map(|g| g.id()).collect();
    assert_eq!(ids, vec![a.id(), b.id()]);
    assert_eq!(groups.list(GroupKind::Role).len(), 1);

    groups.add_member(&b, 5).unwrap();
    groups.add_member(&role, 5).unwrap();
    let user = groups.user(5);
    let ids: Vec<_> = groups.get_by_user(GroupKind::Group, &user).iter().map(|g| g.id()).collect();
    assert_eq!(ids, vec![b.id()]);
    assert_eq!(groups.get_by_user(GroupKind::Role, &user)[0].id(), role.id());
}

#[test]
fn update_reverts_invalid_names() {
    let (store, _, groups) = setup();
    let g = staff(&groups, "staff");
    groups.update(&g, Some("Crew".into()), Some("deck hands".into())).unwrap();
    assert_eq!(g.name(), "Crew");
    assert_eq!(store.group_by_id(g.id()).unwrap().unwrap().description, "deck hands");

    assert!(groups.update(&g, Some(String::new()), None).is_err());
    assert_eq!(g.name(), "Crew");
}

// ============================================================================
// Parents
// ============================================================================

#[test]
fn parent_must_share_kind() {
    let (_store, _, groups) = setup();
    let g = staff(&groups, "staff");
    let role = groups.create(NewGroup::new(GroupKind::Role, 1, "r", "R")).unwrap();
    assert!(matches!(groups.set_parent(&g, Some(role)), Err(Error::GroupKindMismatch { .. })));
    assert!(g.parent().is_none());
}

#[test]
fn duplicate_and_self_parents_are_refused() {
    let (_store, _, groups) = setup();
    let a = staff(&groups, "a");
    let b = groups.create(NewGroup::new(GroupKind::Group, 1, "b", "B").parent(a.clone())).unwrap();
    let c = groups.create(NewGroup::new(GroupKind::Group, 1, "c", "C").parent(b.clone())).unwrap();

    assert!(matches!(groups.set_parent(&c, Some(a.clone())), Err(Error::DuplicateParent(id)) if id == a.id()));
    assert!(matches!(groups.set_parent(&c, Some(c.clone())), Err(Error::CircuitedParent(_))));
    assert_eq!(c.parent().unwrap().id(), b.id());
    assert_eq!(c.lineage_ids(), vec![c.id(), b.id(), a.id()]);
}

#[test]
fn cycle_is_reverted() {
    let (store, _, groups) = setup();
    let a = staff(&groups, "a");
    let b = groups.create(NewGroup::new(GroupKind::Group, 1, "b", "B").parent(a.clone())).unwrap();

    assert!(matches!(groups.set_parent(&a, Some(b.clone())), Err(Error::CircuitedParent(_))));
    assert!(a.parent().is_none());
    assert!(!b.is_circuited());
    assert_eq!(store.group_by_id(a.id()).unwrap().unwrap().parent_id, None);
}

#[test]
fn failed_reparent_restores_previous_parent() {
    let (store, _, groups) = setup();
    let a = staff(&groups, "a");
    let b = staff(&groups, "b");
    let c = groups.create(NewGroup::new(GroupKind::Group, 1, "c", "C").parent(a.clone())).unwrap();

    store.fail_writes(true);
    assert!(matches!(groups.set_parent(&c, Some(b.clone())), Err(Error::Storage(_))));
    assert_eq!(c.parent().unwrap().id(), a.id());

    store.fail_writes(false);
    groups.set_parent(&c, Some(b.clone())).unwrap();
    assert_eq!(store.group_by_id(c.id()).unwrap().unwrap().parent_id, Some(b.id()));
    groups.set_parent(&c, None).unwrap();
    assert!(c.parent().is_none());
}

// ============================================================================
// Membership
// ============================================================================

#[test]
fn membership_links_both_sides() {
    let (store, _, groups) = setup();
    let g = staff(&groups, "staff");
    groups.add_member(&g, 5).unwrap();
    let user = groups.user(5);

    assert!(g.has_member(5));
    assert!(user.is_member(GroupKind::Group, g.id()));
    assert_eq!(store.members(g.id()).unwrap(), vec![5]);
    assert!(matches!(groups.add_member(&g, 5), Err(Error::AlreadyMember { user_id: 5, .. })));

    groups.remove_member(&g, 5).unwrap();
    assert!(!user.is_member(GroupKind::Group, g.id()));
    assert!(store.memberships(5).unwrap().is_empty());
    assert!(matches!(groups.remove_member(&g, 5), Err(Error::NotMember { .. })));
}

#[test]
fn membership_rolls_back_on_store_failure() {
    let (store, _, groups) = setup();
    let g = staff(&groups, "staff");
    let user = groups.user(5);

    store.fail_writes(true);
    assert!(groups.add_member(&g, 5).is_err());
    assert!(!g.has_member(5));
    assert!(user.groups(GroupKind::Group).is_empty());

    store.fail_writes(false);
    groups.add_member(&g, 5).unwrap();
    store.fail_writes(true);
    assert!(groups.remove_member(&g, 5).is_err());
    assert!(g.has_member(5));
    assert!(user.is_member(GroupKind::Group, g.id()));
}

#[test]
fn membership_grants_follow_the_user() {
    let (_store, c, groups) = setup();
    let owner = User::new(OWNER);
    let g = staff(&groups, "staff");
    let p = c.create(NewPolicy::owned_by(OWNER)).unwrap();
    c.set_rights(&p, Some(&owner), Subject::Group(&g), AccessRight::VIEW | AccessRight::COPY).unwrap();

    let user = groups.user(8);
    assert!(!p.has_rights(Some(&*user), AccessRight::VIEW));
    groups.add_member(&g, 8).unwrap();
    assert!(p.has_rights(Some(&*user), AccessRight::VIEW | AccessRight::COPY));
    groups.remove_member(&g, 8).unwrap();
    assert_eq!(p.user_access(Some(&*user)), AccessRight::NO_ACCESS);
}

// ============================================================================
// Delete / load
// ============================================================================

#[test]
fn delete_refuses_groups_with_children() {
    let (_store, _, groups) = setup();
    let a = staff(&groups, "a");
    let b = groups.create(NewGroup::new(GroupKind::Group, 1, "b", "B").parent(a.clone())).unwrap();
    assert!(matches!(groups.delete(a.id()), Err(Error::GroupHasChildren(_))));
    groups.delete(b.id()).unwrap();
    groups.delete(a.id()).unwrap();
}

#[test]
fn delete_sees_children_that_were_never_loaded() {
    let (store, _, groups) = setup();
    let a = staff(&groups, "a");
    let b = groups.create(NewGroup::new(GroupKind::Group, 1, "b", "B").parent(a.clone())).unwrap();

    let cold = GroupManager::new(store.clone());
    assert!(matches!(cold.delete(a.id()), Err(Error::GroupHasChildren(id)) if id == a.id()));
    assert!(store.group_by_id(a.id()).unwrap().is_some());

    let fresh = GroupManager::new(store.clone());
    assert_eq!(fresh.load().unwrap(), 2);
    assert_eq!(fresh.get_by_id(b.id()).unwrap().parent().unwrap().id(), a.id());
}

#[test]
fn delete_unlinks_members_and_purges_rights() {
    let (store, c, groups) = setup();
    let owner = User::new(OWNER);
    let g = staff(&groups, "staff");
    let p = c.create(NewPolicy::owned_by(OWNER).key("docs")).unwrap();
    c.set_rights(&p, Some(&owner), Subject::Group(&g), AccessRight::VIEW).unwrap();
    groups.add_member(&g, 5).unwrap();
    let user = groups.user(5);

    groups.delete(g.id()).unwrap();
    assert_eq!(g.status(), GroupStatus::Deleted);
    assert!(user.groups(GroupKind::Group).is_empty());
    assert!(matches!(groups.get_by_id(g.id()), Err(Error::GroupNotFound(_))));
    assert!(matches!(groups.add_member(&g, 6), Err(Error::GroupNotFound(_))));
    assert!(store.members(g.id()).unwrap().is_empty());
    assert!(store.policy_by_id(p.id()).unwrap().unwrap().roster.group.is_empty());
}

#[test]
fn load_rebuilds_trees_and_memberships() {
    let store = FlakyStore::new();
    let first = GroupManager::new(store.clone());
    let root = first.create(NewGroup::new(GroupKind::Role, 1, "root", "Root")).unwrap();
    let leaf = first.create(NewGroup::new(GroupKind::Role, 1, "leaf", "Leaf").parent(root.clone())).unwrap();
    first.add_member(&leaf, 5).unwrap();
    first.add_member(&root, 6).unwrap();

    let second = GroupManager::new(store.clone());
    assert_eq!(second.load().unwrap(), 2);
    let loaded = second.get_by_key(GroupKind::Role, 1, "leaf").unwrap();
    assert_eq!(loaded.id(), leaf.id());
    assert_eq!(loaded.parent().unwrap().id(), root.id());
    assert!(second.user(5).is_member(GroupKind::Role, leaf.id()));
    assert_eq!(second.get_by_user(GroupKind::Role, &second.user(6))[0].id(), root.id());
}
