//! In-memory registry of access policies in front of a [`PolicyStore`]
//!
//! Policies are indexed by id, by optional unique key, and by optional
//! `(object kind, object id)`. Writes follow a backup/restore pattern: the
//! policy keeps the state from before its first unsaved change, and a failed
//! save restores it so memory matches what is durable.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::constants::MAX_PARENT_DEPTH;
use crate::error::{Error, Result};
use crate::group::Group;
use crate::policy::{AccessPolicy, Linkage, ObjectRef, PolicyRecord, Subject};
use crate::rights::AccessRight;
use crate::roster::RightsRoster;
use crate::store::{PolicyStore, StoredPolicy};
use crate::user::User;

/// Creation request for a policy
#[derive(Debug, Clone)]
pub struct NewPolicy {
    pub key: Option<String>,
    pub object: Option<ObjectRef>,
    pub owner_id: Option<u64>,
    pub linkage: Linkage,
}

impl NewPolicy {
    pub fn owned_by(owner_id: u64) -> Self {
        NewPolicy { key: None, object: None, owner_id: Some(owner_id), linkage: Linkage::Standalone }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn object(mut self, kind: impl Into<String>, id: u64) -> Self {
        self.object = Some(ObjectRef::new(kind, id));
        self
    }

    pub fn linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }
}

#[derive(Default)]
struct PolicyIndex {
    by_id: HashMap<u64, Arc<AccessPolicy>>,
    by_key: HashMap<String, u64>,
    by_object: HashMap<ObjectRef, u64>,
}

impl PolicyIndex {
    fn insert(&mut self, record: &PolicyRecord, policy: Arc<AccessPolicy>) -> Arc<AccessPolicy> {
        let policy = self.by_id.entry(record.id).or_insert(policy).clone();
        if let Some(k) = &record.key {
            self.by_key.insert(k.clone(), record.id);
        }
        if let Some(o) = &record.object {
            self.by_object.insert(o.clone(), record.id);
        }
        policy
    }

    fn remove(&mut self, id: u64) -> Option<Arc<AccessPolicy>> {
        self.by_key.retain(|_, v| *v != id);
        self.by_object.retain(|_, v| *v != id);
        self.by_id.remove(&id)
    }
}

pub struct AccessPolicyContainer {
    store: Arc<dyn PolicyStore>,
    index: RwLock<PolicyIndex>,
}

impl AccessPolicyContainer {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        AccessPolicyContainer { store, index: RwLock::new(PolicyIndex::default()) }
    }

    pub fn cached_len(&self) -> usize {
        self.index.read().by_id.len()
    }

    /// Drop a policy from the cache only
    pub fn evict(&self, id: u64) -> bool {
        self.index.write().remove(id).is_some()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn create(&self, new: NewPolicy) -> Result<Arc<AccessPolicy>> {
        self.check_exclusive(0, new.key.as_deref(), new.object.as_ref())?;
        let policy = AccessPolicy::new(0, new.owner_id, new.linkage.clone())
            .with_identity(new.key.clone(), new.object.clone());
        let id = self.store.create_policy(&policy.to_record(), &RightsRoster::new())?;

        let policy = AccessPolicy::new(id, new.owner_id, new.linkage).with_identity(new.key, new.object);
        let record = policy.to_record();
        let policy = self.index.write().insert(&record, Arc::new(policy));
        info!(policy_id = id, key = ?record.key, "access policy created");
        Ok(policy)
    }

    /// Persist pending changes; on any failure the pre-edit state is restored
    pub fn save(&self, policy: &Arc<AccessPolicy>) -> Result<()> {
        let record = policy.to_record();
        let changes = policy.pending_changes();
        let outcome = self
            .check_exclusive(record.id, record.key.as_deref(), record.object.as_ref())
            .and_then(|_| self.store.update_policy(&record, &changes));
        if let Err(e) = outcome {
            if policy.discard_edit() {
                warn!(policy_id = record.id, error = %e, "save failed, policy restored");
            }
            return Err(e);
        }
        policy.commit_edit();
        let mut index = self.index.write();
        index.remove(record.id);
        index.insert(&record, policy.clone());
        debug!(policy_id = record.id, changes = changes.len(), "access policy saved");
        Ok(())
    }

    pub fn delete(&self, id: u64) -> Result<()> {
        let cached = self.index.read().by_id.contains_key(&id);
        if !cached && self.store.policy_by_id(id)?.is_none() {
            return Err(Error::AccessPolicyNotFound(id.to_string()));
        }
        self.store.delete_policy(id)?;
        // absent from the cache is fine
        self.index.write().remove(id);
        info!(policy_id = id, "access policy deleted");
        Ok(())
    }

    /// A key or object claimed by a policy other than `id` is an error, as is
    /// an object kind the index cannot key
    fn check_exclusive(&self, id: u64, key: Option<&str>, object: Option<&ObjectRef>) -> Result<()> {
        if let Some(k) = key {
            let cached = self.index.read().by_key.get(k).copied();
            let owner = match cached {
                Some(other) => Some(other),
                None => self.store.policy_by_key(k)?.map(|p| p.record.id),
            };
            if owner.is_some_and(|other| other != id) {
                return Err(Error::AccessPolicyKeyTaken(k.to_string()));
            }
        }
        if let Some(o) = object {
            o.validate()?;
            let cached = self.index.read().by_object.get(o).copied();
            let owner = match cached {
                Some(other) => Some(other),
                None => self.store.policy_by_object(&o.kind, o.id)?.map(|p| p.record.id),
            };
            if owner.is_some_and(|other| other != id) {
                return Err(Error::AccessPolicyKindAndIdTaken { kind: o.kind.clone(), id: o.id });
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn get_by_id(&self, id: u64) -> Result<Arc<AccessPolicy>> {
        self.get_at(id, 0)
    }

    fn get_at(&self, id: u64, depth: usize) -> Result<Arc<AccessPolicy>> {
        if let Some(p) = self.index.read().by_id.get(&id) {
            return Ok(p.clone());
        }
        let stored = self
            .store
            .policy_by_id(id)?
            .ok_or_else(|| Error::AccessPolicyNotFound(id.to_string()))?;
        self.register(stored, depth)
    }

    pub fn get_by_key(&self, key: &str) -> Result<Arc<AccessPolicy>> {
        let id = self.index.read().by_key.get(key).copied();
        if let Some(p) = id.and_then(|id| self.cached(id)) {
            return Ok(p);
        }
        let stored = self
            .store
            .policy_by_key(key)?
            .ok_or_else(|| Error::AccessPolicyNotFound(format!("key '{key}'")))?;
        self.register(stored, 0)
    }

    pub fn get_by_kind_and_id(&self, kind: &str, object_id: u64) -> Result<Arc<AccessPolicy>> {
        let id = self.index.read().by_object.get(&ObjectRef::new(kind, object_id)).copied();
        if let Some(p) = id.and_then(|id| self.cached(id)) {
            return Ok(p);
        }
        let stored = self
            .store
            .policy_by_object(kind, object_id)?
            .ok_or_else(|| Error::AccessPolicyNotFound(format!("object {kind}:{object_id}")))?;
        self.register(stored, 0)
    }

    fn cached(&self, id: u64) -> Option<Arc<AccessPolicy>> {
        self.index.read().by_id.get(&id).cloned()
    }

    /// Build a stored policy, loading its parent chain first
    fn register(&self, stored: StoredPolicy, depth: usize) -> Result<Arc<AccessPolicy>> {
        if depth > MAX_PARENT_DEPTH {
            warn!(policy_id = stored.record.id, "policy chain too deep while loading");
            return Err(Error::AccessPolicyNotFound(format!("parent chain of {}", stored.record.id)));
        }
        let StoredPolicy { record, roster } = stored;
        let parent = record.parent_id.map(|p| self.get_at(p, depth + 1)).transpose()?;
        let linkage = Linkage::from_flags(parent, record.is_inherited, record.is_extended);
        if matches!(linkage, Linkage::Inherited(_)) && !roster.is_empty() {
            warn!(policy_id = record.id, "ignoring roster rows of an inherited policy");
        }
        let policy = AccessPolicy::with_roster(record.id, record.owner_id, linkage, roster)
            .with_identity(record.key.clone(), record.object.clone());
        debug!(policy_id = record.id, "access policy loaded from store");
        Ok(self.index.write().insert(&record, Arc::new(policy)))
    }

    // ------------------------------------------------------------------
    // Rights API
    // ------------------------------------------------------------------

    pub fn has_rights(&self, policy_id: u64, user: Option<&User>, rights: AccessRight) -> Result<bool> {
        Ok(self.get_by_id(policy_id)?.has_rights(user, rights))
    }

    pub fn user_access(&self, policy_id: u64, user: Option<&User>) -> Result<AccessRight> {
        Ok(self.get_by_id(policy_id)?.user_access(user))
    }

    pub fn has_group_rights(&self, policy_id: u64, group: Option<&Group>, rights: AccessRight) -> Result<bool> {
        Ok(self.get_by_id(policy_id)?.has_group_rights(group, rights))
    }

    /// Set a subject's rights and persist the change.
    ///
    /// Writes land on the policy owning the roster, which is the parent chain's
    /// first non-inherited policy. A refused change leaves memory untouched.
    pub fn set_rights(
        &self,
        policy: &Arc<AccessPolicy>,
        assignor: Option<&User>,
        subject: Subject<'_>,
        rights: AccessRight,
    ) -> Result<()> {
        let holder = policy.rights_holder();
        holder.set_rights(assignor, subject, rights)?;
        self.save(&holder)
    }

    /// Remove a subject's entry and persist the change
    pub fn unset_rights(&self, policy: &Arc<AccessPolicy>, assignor: Option<&User>, subject: Subject<'_>) -> Result<()> {
        let holder = policy.rights_holder();
        holder.unset_rights(assignor, subject)?;
        self.save(&holder)
    }
}
