//! Groups and roles: same-kind trees with membership sets

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::MAX_PARENT_DEPTH;
use crate::error::{Error, Result};
use crate::user::User;

/// Classification fixed at construction; a parent must share it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    Group,
    Role,
}

impl GroupKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupKind::Group => "group",
            GroupKind::Role => "role",
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    Unvalidated,
    Validated,
    Registered,
    Deleted,
}

#[derive(Debug)]
struct GroupState {
    domain_id: u64,
    key: String,
    name: String,
    description: String,
    parent: Option<Arc<Group>>,
    status: GroupStatus,
}

/// Persisted form of a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: u64,
    pub domain_id: u64,
    pub kind: GroupKind,
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parent_id: Option<u64>,
}

#[derive(Debug)]
pub struct Group {
    id: u64,
    kind: GroupKind,
    state: RwLock<GroupState>,
    members: RwLock<BTreeSet<u64>>,
}

impl Group {
    /// Build an unvalidated group; nothing is checked until [`Group::validate`]
    pub fn new(
        id: u64,
        kind: GroupKind,
        domain_id: u64,
        key: impl Into<String>,
        name: impl Into<String>,
        parent: Option<Arc<Group>>,
    ) -> Self {
        Group {
            id,
            kind,
            state: RwLock::new(GroupState {
                domain_id,
                key: key.into(),
                name: name.into(),
                description: String::new(),
                parent,
                status: GroupStatus::Unvalidated,
            }),
            members: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn with_description(self, description: impl Into<String>) -> Self {
        self.state.write().description = description.into();
        self
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> GroupKind {
        self.kind
    }

    pub fn domain_id(&self) -> u64 {
        self.state.read().domain_id
    }

    pub fn key(&self) -> String {
        self.state.read().key.clone()
    }

    pub fn name(&self) -> String {
        self.state.read().name.clone()
    }

    pub fn description(&self) -> String {
        self.state.read().description.clone()
    }

    pub fn status(&self) -> GroupStatus {
        self.state.read().status
    }

    pub fn parent(&self) -> Option<Arc<Group>> {
        self.state.read().parent.clone()
    }

    pub(crate) fn rename(&self, name: Option<String>, description: Option<String>) {
        let mut st = self.state.write();
        if let Some(n) = name {
            st.name = n;
        }
        if let Some(d) = description {
            st.description = d;
        }
    }

    pub(crate) fn set_status(&self, status: GroupStatus) {
        self.state.write().status = status;
    }

    /// Assign the store id to a group that has not been shared yet
    pub(crate) fn into_registered(mut self, id: u64) -> Arc<Group> {
        self.id = id;
        self.state.get_mut().status = GroupStatus::Registered;
        Arc::new(self)
    }

    /// Ancestors from the direct parent upward.
    ///
    /// Stops at the first revisited id or after `MAX_PARENT_DEPTH` steps.
    pub fn ancestors(&self) -> Vec<Arc<Group>> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([self.id]);
        let mut cur = self.parent();
        while let Some(g) = cur {
            if !seen.insert(g.id) || out.len() >= MAX_PARENT_DEPTH {
                break;
            }
            cur = g.parent();
            out.push(g);
        }
        out
    }

    /// Self followed by every ancestor id, nearest first
    pub fn lineage_ids(&self) -> Vec<u64> {
        std::iter::once(self.id).chain(self.ancestors().iter().map(|g| g.id)).collect()
    }

    /// Deterministic cycle check over the parent chain
    pub fn is_circuited(&self) -> bool {
        let mut seen = HashSet::from([self.id]);
        let mut cur = self.parent();
        let mut depth = 0;
        while let Some(g) = cur {
            depth += 1;
            if !seen.insert(g.id) || depth > MAX_PARENT_DEPTH {
                return true;
            }
            cur = g.parent();
        }
        false
    }

    pub fn ensure_acyclic(&self) -> Result<()> {
        if self.is_circuited() {
            warn!(group_id = self.id, "circuited parent chain");
            return Err(Error::CircuitedParent(self.id));
        }
        Ok(())
    }

    /// Replace the parent.
    ///
    /// Rejects a parent of the other kind, and a parent already present in the
    /// chain being replaced. Cycles through the new parent's own chain are left
    /// to [`Group::ensure_acyclic`].
    pub fn set_parent(&self, parent: Option<Arc<Group>>) -> Result<()> {
        let Some(p) = parent else {
            self.state.write().parent = None;
            return Ok(());
        };
        if p.kind != self.kind {
            return Err(Error::GroupKindMismatch { child: self.kind, parent: p.kind });
        }
        if p.id == self.id {
            return Err(Error::CircuitedParent(self.id));
        }
        if self.ancestors().iter().any(|a| a.id == p.id) {
            return Err(Error::DuplicateParent(p.id));
        }
        self.state.write().parent = Some(p);
        Ok(())
    }

    /// Check required fields, kind consistency and acyclicity
    pub fn validate(&self) -> Result<()> {
        {
            let st = self.state.read();
            if st.status == GroupStatus::Deleted {
                return Err(Error::InvalidGroup(format!("group {} is deleted", self.id)));
            }
            if st.key.trim().is_empty() {
                return Err(Error::InvalidGroup("key is required".into()));
            }
            if st.name.trim().is_empty() {
                return Err(Error::InvalidGroup("name is required".into()));
            }
            if let Some(p) = &st.parent {
                if p.kind != self.kind {
                    return Err(Error::GroupKindMismatch { child: self.kind, parent: p.kind });
                }
            }
        }
        self.ensure_acyclic()?;
        let mut st = self.state.write();
        if st.status == GroupStatus::Unvalidated {
            st.status = GroupStatus::Validated;
        }
        Ok(())
    }

    pub fn has_member(&self, user_id: u64) -> bool {
        self.members.read().contains(&user_id)
    }

    pub fn members(&self) -> Vec<u64> {
        self.members.read().iter().copied().collect()
    }

    /// Link `user` to this group on both sides
    pub fn add_member(&self, user: &User) -> Result<()> {
        if !self.members.write().insert(user.id()) {
            return Err(Error::AlreadyMember { group_id: self.id, user_id: user.id() });
        }
        user.link(self.kind, self.id);
        Ok(())
    }

    /// Unlink `user` from this group on both sides
    pub fn remove_member(&self, user: &User) -> Result<()> {
        if !self.members.write().remove(&user.id()) {
            return Err(Error::NotMember { group_id: self.id, user_id: user.id() });
        }
        user.unlink(self.kind, self.id);
        Ok(())
    }

    pub fn to_record(&self) -> GroupRecord {
        let st = self.state.read();
        GroupRecord {
            id: self.id,
            domain_id: st.domain_id,
            kind: self.kind,
            key: st.key.clone(),
            name: st.name.clone(),
            description: st.description.clone(),
            parent_id: st.parent.as_ref().map(|p| p.id),
        }
    }
}
