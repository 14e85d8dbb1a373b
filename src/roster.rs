//! Rights roster: permission bits keyed by subject
//!
//! Effective rights for a user are the OR of:
//! - the `everyone` baseline
//! - the entry of every role the user belongs to
//! - the entry of every group the user belongs to
//! - the user's own entry
//!
//! A missing key contributes nothing; it is never read as "no access".

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::group::GroupKind;
use crate::rights::AccessRight;
use crate::user::User;

/// The four kinds of roster subject, persisted as literal tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Everyone,
    Role,
    Group,
    User,
}

impl SubjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SubjectKind::Everyone => "everyone",
            SubjectKind::Role => "role",
            SubjectKind::Group => "group",
            SubjectKind::User => "user",
        }
    }

    /// Single-byte tag used in storage keys
    pub(crate) fn tag(self) -> u8 {
        match self {
            SubjectKind::Everyone => 0,
            SubjectKind::Role => 1,
            SubjectKind::Group => 2,
            SubjectKind::User => 3,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(SubjectKind::Everyone),
            1 => Some(SubjectKind::Role),
            2 => Some(SubjectKind::Group),
            3 => Some(SubjectKind::User),
            _ => None,
        }
    }
}

impl From<GroupKind> for SubjectKind {
    fn from(kind: GroupKind) -> Self {
        match kind {
            GroupKind::Group => SubjectKind::Group,
            GroupKind::Role => SubjectKind::Role,
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "everyone" => Ok(SubjectKind::Everyone),
            "role" => Ok(SubjectKind::Role),
            "group" => Ok(SubjectKind::Group),
            "user" => Ok(SubjectKind::User),
            other => Err(Error::InvalidSubjectKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RosterAction {
    Set,
    Unset,
}

/// One pending roster mutation, kept so only deltas are persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterOp {
    pub action: RosterAction,
    pub kind: SubjectKind,
    pub subject_id: u64,
    pub rights: AccessRight,
}

impl RosterOp {
    pub fn set(kind: SubjectKind, subject_id: u64, rights: AccessRight) -> Self {
        RosterOp { action: RosterAction::Set, kind, subject_id, rights }
    }

    pub fn unset(kind: SubjectKind, subject_id: u64) -> Self {
        RosterOp { action: RosterAction::Unset, kind, subject_id, rights: AccessRight::NO_ACCESS }
    }
}

/// A flattened roster row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterEntry {
    pub kind: SubjectKind,
    pub subject_id: u64,
    pub rights: AccessRight,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RightsRoster {
    pub everyone: AccessRight,
    pub role: HashMap<u64, AccessRight>,
    pub group: HashMap<u64, AccessRight>,
    pub user: HashMap<u64, AccessRight>,
}

impl RightsRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective rights of `user` according to this roster alone
    pub fn summarize(&self, user: &User) -> AccessRight {
        let mut rights = self.everyone;
        for id in user.groups(GroupKind::Role) {
            if let Some(r) = self.role.get(&id) {
                rights |= *r;
            }
        }
        for id in user.groups(GroupKind::Group) {
            if let Some(r) = self.group.get(&id) {
                rights |= *r;
            }
        }
        if let Some(r) = self.user.get(&user.id()) {
            rights |= *r;
        }
        rights
    }

    /// Explicit entry for a subject. The everyone baseline is always present.
    pub fn get(&self, kind: SubjectKind, id: u64) -> Option<AccessRight> {
        match kind {
            SubjectKind::Everyone => Some(self.everyone),
            SubjectKind::Role => self.role.get(&id).copied(),
            SubjectKind::Group => self.group.get(&id).copied(),
            SubjectKind::User => self.user.get(&id).copied(),
        }
    }

    pub(crate) fn set(&mut self, kind: SubjectKind, id: u64, rights: AccessRight) {
        match kind {
            SubjectKind::Everyone => self.everyone = rights,
            SubjectKind::Role => {
                self.role.insert(id, rights);
            }
            SubjectKind::Group => {
                self.group.insert(id, rights);
            }
            SubjectKind::User => {
                self.user.insert(id, rights);
            }
        }
    }

    /// Remove an entry entirely. Returns the rights it held, if any.
    pub(crate) fn unset(&mut self, kind: SubjectKind, id: u64) -> Option<AccessRight> {
        match kind {
            SubjectKind::Everyone => {
                let prev = std::mem::take(&mut self.everyone);
                (!prev.is_empty()).then_some(prev)
            }
            SubjectKind::Role => self.role.remove(&id),
            SubjectKind::Group => self.group.remove(&id),
            SubjectKind::User => self.user.remove(&id),
        }
    }

    /// Replay a changelist entry
    pub fn apply(&mut self, op: &RosterOp) {
        match op.action {
            RosterAction::Set => self.set(op.kind, op.subject_id, op.rights),
            RosterAction::Unset => {
                self.unset(op.kind, op.subject_id);
            }
        }
    }

    /// Every explicit entry, the everyone baseline included when non-empty
    pub fn entries(&self) -> Vec<RosterEntry> {
        let mut out = Vec::with_capacity(1 + self.role.len() + self.group.len() + self.user.len());
        if !self.everyone.is_empty() {
            out.push(RosterEntry { kind: SubjectKind::Everyone, subject_id: 0, rights: self.everyone });
        }
        for (kind, map) in [
            (SubjectKind::Role, &self.role),
            (SubjectKind::Group, &self.group),
            (SubjectKind::User, &self.user),
        ] {
            out.extend(map.iter().map(|(id, r)| RosterEntry { kind, subject_id: *id, rights: *r }));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.everyone.is_empty() && self.role.is_empty() && self.group.is_empty() && self.user.is_empty()
    }
}
