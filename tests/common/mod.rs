//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use policybit::*;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A MemoryStore whose writes can be switched to fail
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        init_tracing();
        Arc::new(Self::default())
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("injected write failure".into()));
        }
        Ok(())
    }
}

impl PolicyStore for FlakyStore {
    fn create_policy(&self, record: &PolicyRecord, roster: &RightsRoster) -> Result<u64> {
        self.check()?;
        self.inner.create_policy(record, roster)
    }

    fn update_policy(&self, record: &PolicyRecord, changes: &[RosterOp]) -> Result<()> {
        self.check()?;
        self.inner.update_policy(record, changes)
    }

    fn policy_by_id(&self, id: u64) -> Result<Option<StoredPolicy>> {
        self.inner.policy_by_id(id)
    }

    fn policy_by_key(&self, key: &str) -> Result<Option<StoredPolicy>> {
        self.inner.policy_by_key(key)
    }

    fn policy_by_object(&self, kind: &str, object_id: u64) -> Result<Option<StoredPolicy>> {
        self.inner.policy_by_object(kind, object_id)
    }

    fn delete_policy(&self, id: u64) -> Result<bool> {
        self.check()?;
        self.inner.delete_policy(id)
    }
}

impl GroupStore for FlakyStore {
    fn create_group(&self, record: &GroupRecord) -> Result<u64> {
        self.check()?;
        self.inner.create_group(record)
    }

    fn update_group(&self, record: &GroupRecord) -> Result<()> {
        self.check()?;
        self.inner.update_group(record)
    }

    fn group_by_id(&self, id: u64) -> Result<Option<GroupRecord>> {
        self.inner.group_by_id(id)
    }

    fn groups(&self) -> Result<Vec<GroupRecord>> {
        self.inner.groups()
    }

    fn groups_by_domain(&self, domain_id: u64) -> Result<Vec<GroupRecord>> {
        self.inner.groups_by_domain(domain_id)
    }

    fn group_by_key(&self, kind: GroupKind, domain_id: u64, key: &str) -> Result<Option<GroupRecord>> {
        self.inner.group_by_key(kind, domain_id, key)
    }

    fn children(&self, parent_id: u64) -> Result<Vec<GroupRecord>> {
        self.inner.children(parent_id)
    }

    fn delete_group(&self, id: u64, subject: SubjectKind) -> Result<bool> {
        self.check()?;
        self.inner.delete_group(id, subject)
    }

    fn add_relation(&self, group_id: u64, user_id: u64) -> Result<()> {
        self.check()?;
        self.inner.add_relation(group_id, user_id)
    }

    fn delete_relation(&self, group_id: u64, user_id: u64) -> Result<bool> {
        self.check()?;
        self.inner.delete_relation(group_id, user_id)
    }

    fn members(&self, group_id: u64) -> Result<Vec<u64>> {
        self.inner.members(group_id)
    }

    fn memberships(&self, user_id: u64) -> Result<Vec<u64>> {
        self.inner.memberships(user_id)
    }
}

pub const OWNER: u64 = 1;

/// Container and group manager sharing one flaky store
pub fn setup() -> (Arc<FlakyStore>, AccessPolicyContainer, GroupManager) {
    let store = FlakyStore::new();
    let container = AccessPolicyContainer::new(store.clone());
    let groups = GroupManager::new(store.clone());
    (store, container, groups)
}
