//! Access policies: owner, linkage to a parent policy, and a rights roster
//!
//! Query precedence for a user:
//! 1. no user: nothing is granted
//! 2. the owner holds `FULL_ACCESS`
//! 3. an inherited policy answers exactly as its parent does
//! 4. otherwise the own roster, ORed with the parent roster when extended
//!
//! Group queries use nearest-ancestor resolution instead of a union: the
//! first group in `group, parent, grandparent, ...` with an explicit entry wins.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::{MAX_OBJECT_KIND_LEN, MAX_PARENT_DEPTH};
use crate::error::{Error, Result};
use crate::group::{Group, GroupKind};
use crate::rights::AccessRight;
use crate::roster::{RightsRoster, RosterAction, RosterOp, SubjectKind};
use crate::user::User;

/// External object guarded by a policy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: String,
    pub id: u64,
}

impl ObjectRef {
    pub fn new(kind: impl Into<String>, id: u64) -> Self {
        ObjectRef { kind: kind.into(), id }
    }

    /// Kinds must be non-empty and fit the one-byte length of the object index
    pub fn validate(&self) -> Result<()> {
        if self.kind.is_empty() || self.kind.len() > MAX_OBJECT_KIND_LEN {
            return Err(Error::InvalidObjectKind(self.kind.clone()));
        }
        Ok(())
    }
}

/// How a policy relates to its parent
#[derive(Debug, Clone)]
pub enum Linkage {
    Standalone,
    /// No roster of its own; every read and write goes to the parent
    Inherited(Arc<AccessPolicy>),
    /// Own roster ORed with the parent's roster
    Extended(Arc<AccessPolicy>),
}

impl Linkage {
    /// Map the stored two-flag form; inheritance wins when both are set
    pub fn from_flags(parent: Option<Arc<AccessPolicy>>, is_inherited: bool, is_extended: bool) -> Self {
        match parent {
            Some(p) if is_inherited => Linkage::Inherited(p),
            Some(p) if is_extended => Linkage::Extended(p),
            _ => Linkage::Standalone,
        }
    }

    pub fn parent(&self) -> Option<&Arc<AccessPolicy>> {
        match self {
            Linkage::Standalone => None,
            Linkage::Inherited(p) | Linkage::Extended(p) => Some(p),
        }
    }
}

/// A rights subject, matched exhaustively by the setters
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    Everyone,
    Role(&'a Group),
    Group(&'a Group),
    User(&'a User),
}

impl Subject<'_> {
    fn resolve(&self) -> Result<(SubjectKind, u64)> {
        match self {
            Subject::Everyone => Ok((SubjectKind::Everyone, 0)),
            Subject::Role(g) => expect_kind(g, GroupKind::Role).map(|_| (SubjectKind::Role, g.id())),
            Subject::Group(g) => expect_kind(g, GroupKind::Group).map(|_| (SubjectKind::Group, g.id())),
            Subject::User(u) => Ok((SubjectKind::User, u.id())),
        }
    }
}

fn expect_kind(group: &Group, expected: GroupKind) -> Result<()> {
    if group.kind() != expected {
        return Err(Error::InvalidGroupKind { expected, actual: group.kind() });
    }
    Ok(())
}

#[derive(Debug, Clone)]
enum RosterOwnership {
    Owned { roster: RightsRoster, extends: Option<Arc<AccessPolicy>> },
    Delegated(Arc<AccessPolicy>),
}

#[derive(Debug, Clone)]
struct PolicyBody {
    owner_id: Option<u64>,
    key: Option<String>,
    object: Option<ObjectRef>,
    rights: RosterOwnership,
}

/// An uncommitted edit: the state before the first change plus every roster op since
#[derive(Debug)]
pub(crate) struct PendingEdit {
    baseline: PolicyBody,
    ops: Vec<RosterOp>,
}

impl PendingEdit {
    fn new(baseline: PolicyBody) -> Self {
        PendingEdit { baseline, ops: Vec::new() }
    }

    fn ops(&self) -> &[RosterOp] {
        &self.ops
    }

    /// Accept the edit, yielding the roster ops to persist
    fn commit(self) -> Vec<RosterOp> {
        self.ops
    }

    fn discard(self) -> PolicyBody {
        self.baseline
    }
}

#[derive(Debug)]
struct PolicyState {
    body: PolicyBody,
    pending: Option<PendingEdit>,
}

impl PolicyState {
    fn edit(&mut self) -> &mut PendingEdit {
        let PolicyState { body, pending } = self;
        pending.get_or_insert_with(|| PendingEdit::new(body.clone()))
    }
}

/// Persisted form of a policy (roster rows are stored separately)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub id: u64,
    pub key: Option<String>,
    pub object: Option<ObjectRef>,
    pub owner_id: Option<u64>,
    pub parent_id: Option<u64>,
    pub is_inherited: bool,
    pub is_extended: bool,
}

#[derive(Debug)]
pub struct AccessPolicy {
    id: u64,
    state: RwLock<PolicyState>,
}

impl AccessPolicy {
    pub fn new(id: u64, owner_id: Option<u64>, linkage: Linkage) -> Self {
        Self::with_roster(id, owner_id, linkage, RightsRoster::new())
    }

    /// Build a policy around an existing roster; the roster is ignored when inherited
    pub fn with_roster(id: u64, owner_id: Option<u64>, linkage: Linkage, roster: RightsRoster) -> Self {
        AccessPolicy {
            id,
            state: RwLock::new(PolicyState {
                body: PolicyBody { owner_id, key: None, object: None, rights: ownership(linkage, roster) },
                pending: None,
            }),
        }
    }

    pub(crate) fn with_identity(self, key: Option<String>, object: Option<ObjectRef>) -> Self {
        {
            let mut st = self.state.write();
            st.body.key = key;
            st.body.object = object;
        }
        self
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn owner_id(&self) -> Option<u64> {
        self.state.read().body.owner_id
    }

    pub fn key(&self) -> Option<String> {
        self.state.read().body.key.clone()
    }

    pub fn object(&self) -> Option<ObjectRef> {
        self.state.read().body.object.clone()
    }

    pub fn linkage(&self) -> Linkage {
        match &self.state.read().body.rights {
            RosterOwnership::Delegated(p) => Linkage::Inherited(p.clone()),
            RosterOwnership::Owned { extends: Some(p), .. } => Linkage::Extended(p.clone()),
            RosterOwnership::Owned { extends: None, .. } => Linkage::Standalone,
        }
    }

    pub fn parent(&self) -> Option<Arc<AccessPolicy>> {
        self.linkage().parent().cloned()
    }

    pub fn is_inherited(&self) -> bool {
        matches!(self.state.read().body.rights, RosterOwnership::Delegated(_))
    }

    pub fn is_extended(&self) -> bool {
        matches!(self.state.read().body.rights, RosterOwnership::Owned { extends: Some(_), .. })
    }

    pub fn is_owner(&self, user: &User) -> bool {
        self.owner_id() == Some(user.id())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn has_rights(&self, user: Option<&User>, requested: AccessRight) -> bool {
        user.is_some() && self.user_access(user).grants(requested)
    }

    /// Raw effective mask for `user`
    pub fn user_access(&self, user: Option<&User>) -> AccessRight {
        match user {
            Some(u) => self.access_at(u, 0),
            None => AccessRight::NO_ACCESS,
        }
    }

    fn access_at(&self, user: &User, depth: usize) -> AccessRight {
        if depth > MAX_PARENT_DEPTH {
            warn!(policy_id = self.id, "policy chain too deep, denying");
            return AccessRight::NO_ACCESS;
        }
        let (own, parent, extended) = {
            let st = self.state.read();
            if st.body.owner_id == Some(user.id()) {
                return AccessRight::FULL_ACCESS;
            }
            match &st.body.rights {
                RosterOwnership::Delegated(p) => (AccessRight::NO_ACCESS, Some(p.clone()), false),
                RosterOwnership::Owned { roster, extends } => (roster.summarize(user), extends.clone(), true),
            }
        };
        match parent {
            None => own,
            Some(p) if extended => own | p.read_roster(|r| r.summarize(user)).unwrap_or_default(),
            Some(p) => p.access_at(user, depth + 1),
        }
    }

    pub fn has_group_rights(&self, group: Option<&Group>, requested: AccessRight) -> bool {
        group.is_some_and(|g| self.group_access(g).grants(requested))
    }

    /// Bits of the nearest group in `group`'s lineage with an explicit entry
    pub fn group_access(&self, group: &Group) -> AccessRight {
        let lineage = group.lineage_ids();
        self.group_access_at(&lineage, 0)
    }

    fn group_access_at(&self, lineage: &[u64], depth: usize) -> AccessRight {
        if depth > MAX_PARENT_DEPTH {
            warn!(policy_id = self.id, "policy chain too deep, denying");
            return AccessRight::NO_ACCESS;
        }
        let (own, parent, extended) = {
            let st = self.state.read();
            match &st.body.rights {
                RosterOwnership::Delegated(p) => (AccessRight::NO_ACCESS, Some(p.clone()), false),
                RosterOwnership::Owned { roster, extends } => (nearest(roster, lineage), extends.clone(), true),
            }
        };
        match parent {
            None => own,
            Some(p) if extended => own | p.read_roster(|r| nearest(r, lineage)).unwrap_or_default(),
            Some(p) => p.group_access_at(lineage, depth + 1),
        }
    }

    /// Clone of the roster this policy reads from
    pub fn roster(&self) -> RightsRoster {
        self.read_roster(RightsRoster::clone).unwrap_or_default()
    }

    fn read_roster<T, F: FnOnce(&RightsRoster) -> T>(&self, f: F) -> Option<T> {
        self.read_roster_at(0, f)
    }

    fn read_roster_at<T, F: FnOnce(&RightsRoster) -> T>(&self, depth: usize, f: F) -> Option<T> {
        if depth > MAX_PARENT_DEPTH {
            return None;
        }
        let parent = {
            let st = self.state.read();
            match &st.body.rights {
                RosterOwnership::Owned { roster, .. } => return Some(f(roster)),
                RosterOwnership::Delegated(p) => p.clone(),
            }
        };
        parent.read_roster_at(depth + 1, f)
    }

    /// The nearest policy in the inheritance chain that owns a roster
    pub fn rights_holder(self: &Arc<Self>) -> Arc<AccessPolicy> {
        let mut cur = Arc::clone(self);
        for _ in 0..MAX_PARENT_DEPTH {
            let next = match &cur.state.read().body.rights {
                RosterOwnership::Delegated(p) => p.clone(),
                RosterOwnership::Owned { .. } => break,
            };
            cur = next;
        }
        cur
    }

    // ------------------------------------------------------------------
    // Rights mutation
    // ------------------------------------------------------------------

    pub fn set_public_rights(&self, assignor: Option<&User>, rights: AccessRight) -> Result<()> {
        self.set_rights(assignor, Subject::Everyone, rights)
    }

    pub fn set_role_rights(&self, assignor: Option<&User>, role: &Group, rights: AccessRight) -> Result<()> {
        self.set_rights(assignor, Subject::Role(role), rights)
    }

    pub fn set_group_rights(&self, assignor: Option<&User>, group: &Group, rights: AccessRight) -> Result<()> {
        self.set_rights(assignor, Subject::Group(group), rights)
    }

    pub fn set_user_rights(&self, assignor: Option<&User>, user: &User, rights: AccessRight) -> Result<()> {
        self.set_rights(assignor, Subject::User(user), rights)
    }

    /// Replace the subject's entry with `rights`.
    ///
    /// The assignor must already hold `rights`, and `MANAGE_RIGHTS` too when the
    /// subject is a user.
    pub fn set_rights(&self, assignor: Option<&User>, subject: Subject<'_>, rights: AccessRight) -> Result<()> {
        let assignor = assignor.ok_or(Error::NilAssignor)?;
        let (kind, id) = subject.resolve()?;
        self.apply_at(assignor, RosterOp::set(kind, id, rights), 0)
    }

    /// Remove the subject's entry entirely; an absent entry is left alone
    pub fn unset_rights(&self, assignor: Option<&User>, subject: Subject<'_>) -> Result<()> {
        let assignor = assignor.ok_or(Error::NilAssignor)?;
        let (kind, id) = subject.resolve()?;
        self.apply_at(assignor, RosterOp::unset(kind, id), 0)
    }

    fn apply_at(&self, assignor: &User, op: RosterOp, depth: usize) -> Result<()> {
        if depth > MAX_PARENT_DEPTH {
            warn!(policy_id = self.id, "policy chain too deep, refusing write");
            return Err(Error::CircuitedParent(self.id));
        }
        if let Some(parent) = self.delegate() {
            return parent.apply_at(assignor, op, depth + 1);
        }

        let mut required = match op.action {
            RosterAction::Set => op.rights,
            RosterAction::Unset => match self.read_roster(|r| r.get(op.kind, op.subject_id)).flatten() {
                Some(current) => current,
                None => return Ok(()),
            },
        };
        if op.kind == SubjectKind::User {
            required |= AccessRight::MANAGE_RIGHTS;
        }
        let held = self.user_access(Some(assignor));
        if !held.grants(required) {
            debug!(policy_id = self.id, assignor = assignor.id(), %required, %held, "rights change refused");
            return Err(Error::ExcessOfRights { requested: required, held });
        }

        let mut st = self.state.write();
        if matches!(st.body.rights, RosterOwnership::Delegated(_)) {
            // linkage changed since the check
            drop(st);
            return self.apply_at(assignor, op, depth + 1);
        }
        st.edit();
        let PolicyState { body, pending } = &mut *st;
        if let RosterOwnership::Owned { roster, .. } = &mut body.rights {
            match op.action {
                RosterAction::Set => roster.set(op.kind, op.subject_id, op.rights),
                RosterAction::Unset => {
                    roster.unset(op.kind, op.subject_id);
                }
            }
        }
        debug!(policy_id = self.id, subject = %op.kind, subject_id = op.subject_id, rights = %op.rights, action = ?op.action, "roster changed");
        if let Some(edit) = pending.as_mut() {
            edit.ops.push(op);
        }
        Ok(())
    }

    fn delegate(&self) -> Option<Arc<AccessPolicy>> {
        match &self.state.read().body.rights {
            RosterOwnership::Delegated(p) => Some(p.clone()),
            RosterOwnership::Owned { .. } => None,
        }
    }

    // ------------------------------------------------------------------
    // Field edits and the pending-edit lifecycle
    // ------------------------------------------------------------------

    pub fn set_key(&self, key: Option<String>) {
        let mut st = self.state.write();
        st.edit();
        st.body.key = key;
    }

    pub fn set_object(&self, object: Option<ObjectRef>) {
        let mut st = self.state.write();
        st.edit();
        st.body.object = object;
    }

    pub fn set_owner(&self, owner_id: Option<u64>) {
        let mut st = self.state.write();
        st.edit();
        st.body.owner_id = owner_id;
    }

    /// Relink to a parent. Leaving inheritance starts from an empty roster;
    /// switching between standalone and extended keeps the roster.
    ///
    /// Entering inheritance drops the own roster and queues an unset for each
    /// of its entries, so a save removes the rows from the store as well.
    pub fn set_linkage(&self, linkage: Linkage) -> Result<()> {
        if let Some(p) = linkage.parent() {
            if p.id == self.id || p.ancestor_ids().contains(&self.id) {
                return Err(Error::CircuitedParent(self.id));
            }
        }
        let mut st = self.state.write();
        st.edit();
        let PolicyState { body, pending } = &mut *st;
        let empty = RosterOwnership::Owned { roster: RightsRoster::new(), extends: None };
        let roster = match std::mem::replace(&mut body.rights, empty) {
            RosterOwnership::Owned { roster, .. } => roster,
            RosterOwnership::Delegated(_) => RightsRoster::new(),
        };
        if let (Linkage::Inherited(_), Some(edit)) = (&linkage, pending.as_mut()) {
            edit.ops.extend(roster.entries().into_iter().map(|e| RosterOp::unset(e.kind, e.subject_id)));
        }
        body.rights = ownership(linkage, roster);
        Ok(())
    }

    fn ancestor_ids(&self) -> Vec<u64> {
        let mut out = Vec::new();
        let mut cur = self.parent();
        while let Some(p) = cur {
            if out.contains(&p.id) || out.len() >= MAX_PARENT_DEPTH {
                break;
            }
            out.push(p.id);
            cur = p.parent();
        }
        out
    }

    /// Open an edit now so later changes share one baseline
    pub fn begin_edit(&self) {
        self.state.write().edit();
    }

    pub fn has_pending_edit(&self) -> bool {
        self.state.read().pending.is_some()
    }

    pub fn pending_changes(&self) -> Vec<RosterOp> {
        self.state.read().pending.as_ref().map(|e| e.ops().to_vec()).unwrap_or_default()
    }

    /// Accept the pending edit; returns its roster ops
    pub fn commit_edit(&self) -> Vec<RosterOp> {
        self.state.write().pending.take().map(PendingEdit::commit).unwrap_or_default()
    }

    /// Restore the state captured before the first change. Returns false when
    /// no edit was pending.
    pub fn discard_edit(&self) -> bool {
        let mut st = self.state.write();
        match st.pending.take() {
            Some(edit) => {
                st.body = edit.discard();
                true
            }
            None => false,
        }
    }

    pub fn to_record(&self) -> PolicyRecord {
        let st = self.state.read();
        let (parent_id, is_inherited, is_extended) = match &st.body.rights {
            RosterOwnership::Delegated(p) => (Some(p.id), true, false),
            RosterOwnership::Owned { extends: Some(p), .. } => (Some(p.id), false, true),
            RosterOwnership::Owned { extends: None, .. } => (None, false, false),
        };
        PolicyRecord {
            id: self.id,
            key: st.body.key.clone(),
            object: st.body.object.clone(),
            owner_id: st.body.owner_id,
            parent_id,
            is_inherited,
            is_extended,
        }
    }
}

fn ownership(linkage: Linkage, roster: RightsRoster) -> RosterOwnership {
    match linkage {
        Linkage::Standalone => RosterOwnership::Owned { roster, extends: None },
        Linkage::Extended(p) => RosterOwnership::Owned { roster, extends: Some(p) },
        Linkage::Inherited(p) => RosterOwnership::Delegated(p),
    }
}

fn nearest(roster: &RightsRoster, lineage: &[u64]) -> AccessRight {
    lineage
        .iter()
        .find_map(|id| roster.group.get(id).copied())
        .unwrap_or(AccessRight::NO_ACCESS)
}
