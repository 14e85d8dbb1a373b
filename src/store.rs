//! Persistence contracts consumed by the engine
//!
//! The engine never talks to a database directly. Containers hold an
//! `Arc<dyn PolicyStore>` / `Arc<dyn GroupStore>`; [`MemoryStore`](crate::MemoryStore)
//! and [`LmdbStore`](crate::LmdbStore) implement both.

use crate::error::Result;
use crate::group::{GroupKind, GroupRecord};
use crate::policy::PolicyRecord;
use crate::roster::{RightsRoster, RosterOp, SubjectKind};

/// A policy row together with its roster rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPolicy {
    pub record: PolicyRecord,
    pub roster: RightsRoster,
}

pub trait PolicyStore: Send + Sync {
    /// Insert a new policy; `record.id` is ignored and the assigned id returned
    fn create_policy(&self, record: &PolicyRecord, roster: &RightsRoster) -> Result<u64>;

    /// Rewrite the policy row and upsert/delete only the roster rows named in `changes`
    fn update_policy(&self, record: &PolicyRecord, changes: &[RosterOp]) -> Result<()>;

    fn policy_by_id(&self, id: u64) -> Result<Option<StoredPolicy>>;

    fn policy_by_key(&self, key: &str) -> Result<Option<StoredPolicy>>;

    fn policy_by_object(&self, kind: &str, object_id: u64) -> Result<Option<StoredPolicy>>;

    /// Delete the policy and its roster rows. Returns false when it was absent.
    fn delete_policy(&self, id: u64) -> Result<bool>;
}

pub trait GroupStore: Send + Sync {
    /// Insert a new group; `record.id` is ignored and the assigned id returned
    fn create_group(&self, record: &GroupRecord) -> Result<u64>;

    fn update_group(&self, record: &GroupRecord) -> Result<()>;

    fn group_by_id(&self, id: u64) -> Result<Option<GroupRecord>>;

    fn groups(&self) -> Result<Vec<GroupRecord>>;

    fn groups_by_domain(&self, domain_id: u64) -> Result<Vec<GroupRecord>>;

    /// The group of `kind` holding `key` within `domain_id`
    fn group_by_key(&self, kind: GroupKind, domain_id: u64, key: &str) -> Result<Option<GroupRecord>>;

    /// Groups whose parent is `parent_id`
    fn children(&self, parent_id: u64) -> Result<Vec<GroupRecord>>;

    /// Delete the group, its membership relations, and every policy rights row
    /// naming it as `subject`. Returns false when it was absent.
    fn delete_group(&self, id: u64, subject: SubjectKind) -> Result<bool>;

    fn add_relation(&self, group_id: u64, user_id: u64) -> Result<()>;

    /// Returns false when the relation was already absent
    fn delete_relation(&self, group_id: u64, user_id: u64) -> Result<bool>;

    fn members(&self, group_id: u64) -> Result<Vec<u64>>;

    fn memberships(&self, user_id: u64) -> Result<Vec<u64>>;
}
