//! Registry of groups, roles and the users linked to them

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::constants::MAX_PARENT_DEPTH;
use crate::error::{Error, Result};
use crate::group::{Group, GroupKind, GroupRecord, GroupStatus};
use crate::store::GroupStore;
use crate::user::User;

/// Creation request for a group or role
#[derive(Debug, Clone)]
pub struct NewGroup {
    pub domain_id: u64,
    pub kind: GroupKind,
    pub key: String,
    pub name: String,
    pub description: String,
    pub parent: Option<Arc<Group>>,
}

impl NewGroup {
    pub fn new(kind: GroupKind, domain_id: u64, key: impl Into<String>, name: impl Into<String>) -> Self {
        NewGroup {
            domain_id,
            kind,
            key: key.into(),
            name: name.into(),
            description: String::new(),
            parent: None,
        }
    }

    pub fn parent(mut self, parent: Arc<Group>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

pub struct GroupManager {
    store: Arc<dyn GroupStore>,
    groups: RwLock<HashMap<u64, Arc<Group>>>,
    users: RwLock<HashMap<u64, Arc<User>>>,
}

impl GroupManager {
    pub fn new(store: Arc<dyn GroupStore>) -> Self {
        GroupManager {
            store,
            groups: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
        }
    }

    /// The registered user for `id`, created on first use
    pub fn user(&self, id: u64) -> Arc<User> {
        if let Some(u) = self.users.read().get(&id) {
            return u.clone();
        }
        self.users.write().entry(id).or_insert_with(|| Arc::new(User::new(id))).clone()
    }

    /// Load every group, its parent and its members from the store
    pub fn load(&self) -> Result<usize> {
        let records = self.store.groups()?;
        let mut count = 0;
        for rec in &records {
            let g = self.get_by_id(rec.id)?;
            for user_id in self.store.members(g.id())? {
                let user = self.user(user_id);
                if !g.has_member(user_id) {
                    g.add_member(&user)?;
                }
            }
            count += 1;
        }
        info!(groups = count, "groups loaded");
        Ok(count)
    }

    pub fn create(&self, new: NewGroup) -> Result<Arc<Group>> {
        let taken = match self.find_by_key(new.kind, new.domain_id, &new.key) {
            Some(_) => true,
            None => self.store.group_by_key(new.kind, new.domain_id, &new.key)?.is_some(),
        };
        if taken {
            return Err(Error::GroupKeyTaken(new.key));
        }
        let group = Group::new(0, new.kind, new.domain_id, new.key, new.name, new.parent)
            .with_description(new.description);
        group.validate()?;
        let id = self.store.create_group(&group.to_record())?;
        let group = group.into_registered(id);
        self.groups.write().insert(id, group.clone());
        info!(group_id = id, kind = %group.kind(), key = %group.key(), "group created");
        Ok(group)
    }

    /// Cache-first lookup, loading the parent chain from the store on a miss
    pub fn get_by_id(&self, id: u64) -> Result<Arc<Group>> {
        self.get_at(id, 0)
    }

    fn get_at(&self, id: u64, depth: usize) -> Result<Arc<Group>> {
        if let Some(g) = self.groups.read().get(&id) {
            return Ok(g.clone());
        }
        if depth > MAX_PARENT_DEPTH {
            warn!(group_id = id, "group chain too deep while loading");
            return Err(Error::CircuitedParent(id));
        }
        let rec = self.store.group_by_id(id)?.ok_or(Error::GroupNotFound(id))?;
        let parent = rec.parent_id.map(|p| self.get_at(p, depth + 1)).transpose()?;
        let group = build(&rec, parent);
        debug!(group_id = id, "group loaded from store");
        Ok(self.groups.write().entry(id).or_insert(group).clone())
    }

    /// Cache-first lookup by key within a domain, falling back to the store
    pub fn get_by_key(&self, kind: GroupKind, domain_id: u64, key: &str) -> Result<Arc<Group>> {
        if let Some(g) = self.find_by_key(kind, domain_id, key) {
            return Ok(g);
        }
        match self.store.group_by_key(kind, domain_id, key)? {
            Some(rec) => self.get_by_id(rec.id),
            None => Err(Error::GroupKeyNotFound { kind, domain_id, key: key.to_string() }),
        }
    }

    fn find_by_key(&self, kind: GroupKind, domain_id: u64, key: &str) -> Option<Arc<Group>> {
        self.groups
            .read()
            .values()
            .find(|g| g.kind() == kind && g.domain_id() == domain_id && g.key() == key)
            .cloned()
    }

    /// Every cached group of `kind`, ordered by id
    pub fn list(&self, kind: GroupKind) -> Vec<Arc<Group>> {
        let mut out: Vec<_> = self.groups.read().values().filter(|g| g.kind() == kind).cloned().collect();
        out.sort_by_key(|g| g.id());
        out
    }

    pub fn list_by_domain(&self, domain_id: u64, kind: GroupKind) -> Vec<Arc<Group>> {
        let mut out = self.list(kind);
        out.retain(|g| g.domain_id() == domain_id);
        out
    }

    /// Groups of `kind` that have `user` as a member
    pub fn get_by_user(&self, kind: GroupKind, user: &User) -> Vec<Arc<Group>> {
        let mut out: Vec<_> = self
            .groups
            .read()
            .values()
            .filter(|g| g.kind() == kind && g.has_member(user.id()))
            .cloned()
            .collect();
        out.sort_by_key(|g| g.id());
        out
    }

    /// Reparent a group; reverts when the result is circuited or cannot be saved
    pub fn set_parent(&self, group: &Arc<Group>, parent: Option<Arc<Group>>) -> Result<()> {
        let previous = group.parent();
        group.set_parent(parent)?;
        let outcome = group
            .ensure_acyclic()
            .and_then(|_| self.store.update_group(&group.to_record()));
        if let Err(e) = outcome {
            warn!(group_id = group.id(), error = %e, "reparent reverted");
            group.set_parent(None)?;
            if let Some(p) = previous {
                group.set_parent(Some(p))?;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Change name and/or description
    pub fn update(&self, group: &Group, name: Option<String>, description: Option<String>) -> Result<()> {
        let before = group.to_record();
        group.rename(name, description);
        if let Err(e) = group.validate().and_then(|_| self.store.update_group(&group.to_record())) {
            group.rename(Some(before.name), Some(before.description));
            return Err(e);
        }
        Ok(())
    }

    /// Link a user; the in-memory link is rolled back if the store refuses it
    pub fn add_member(&self, group: &Group, user_id: u64) -> Result<()> {
        ensure_registered(group)?;
        let user = self.user(user_id);
        group.add_member(&user)?;
        if let Err(e) = self.store.add_relation(group.id(), user_id) {
            warn!(group_id = group.id(), user_id, error = %e, "membership rolled back");
            group.remove_member(&user)?;
            return Err(e);
        }
        debug!(group_id = group.id(), user_id, "member added");
        Ok(())
    }

    /// Unlink a user; the in-memory link is restored if the store refuses it
    pub fn remove_member(&self, group: &Group, user_id: u64) -> Result<()> {
        ensure_registered(group)?;
        let user = self.user(user_id);
        group.remove_member(&user)?;
        if let Err(e) = self.store.delete_relation(group.id(), user_id) {
            warn!(group_id = group.id(), user_id, error = %e, "membership removal rolled back");
            group.add_member(&user)?;
            return Err(e);
        }
        debug!(group_id = group.id(), user_id, "member removed");
        Ok(())
    }

    /// Delete a childless group along with its memberships and rights rows
    pub fn delete(&self, id: u64) -> Result<()> {
        let group = self.get_by_id(id)?;
        let cached_child = self
            .groups
            .read()
            .values()
            .any(|g| g.parent().is_some_and(|p| p.id() == id));
        // children that were never loaded still point at the stored row
        if cached_child || !self.store.children(id)?.is_empty() {
            return Err(Error::GroupHasChildren(id));
        }
        self.store.delete_group(id, group.kind().into())?;
        for user_id in group.members() {
            let user = self.user(user_id);
            // already unlinked is fine
            let _ = group.remove_member(&user);
        }
        self.groups.write().remove(&id);
        group.set_status(GroupStatus::Deleted);
        info!(group_id = id, "group deleted");
        Ok(())
    }
}

fn ensure_registered(group: &Group) -> Result<()> {
    match group.status() {
        GroupStatus::Registered => Ok(()),
        GroupStatus::Deleted => Err(Error::GroupNotFound(group.id())),
        _ => Err(Error::InvalidGroup(format!("group {} is not registered", group.id()))),
    }
}

fn build(rec: &GroupRecord, parent: Option<Arc<Group>>) -> Arc<Group> {
    Group::new(rec.id, rec.kind, rec.domain_id, rec.key.clone(), rec.name.clone(), parent)
        .with_description(rec.description.clone())
        .into_registered(rec.id)
}
