//! Users as seen by the rights engine: an id plus membership back-references

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use crate::group::GroupKind;

/// A principal that can hold rights and belong to groups and roles.
///
/// Memberships are maintained by [`Group::add_member`](crate::Group::add_member)
/// and [`Group::remove_member`](crate::Group::remove_member) so the user can
/// enumerate its own groups without scanning every group.
#[derive(Debug)]
pub struct User {
    id: u64,
    groups: RwLock<HashMap<GroupKind, BTreeSet<u64>>>,
}

impl User {
    pub fn new(id: u64) -> Self {
        User { id, groups: RwLock::new(HashMap::new()) }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Ids of the groups of `kind` this user belongs to
    pub fn groups(&self, kind: GroupKind) -> Vec<u64> {
        self.groups
            .read()
            .get(&kind)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, kind: GroupKind, group_id: u64) -> bool {
        self.groups.read().get(&kind).is_some_and(|ids| ids.contains(&group_id))
    }

    pub(crate) fn link(&self, kind: GroupKind, group_id: u64) -> bool {
        self.groups.write().entry(kind).or_default().insert(group_id)
    }

    pub(crate) fn unlink(&self, kind: GroupKind, group_id: u64) -> bool {
        let mut groups = self.groups.write();
        let Some(ids) = groups.get_mut(&kind) else { return false };
        let removed = ids.remove(&group_id);
        if ids.is_empty() {
            groups.remove(&kind);
        }
        removed
    }
}
