//! In-process store for embedding and tests

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::group::{GroupKind, GroupRecord};
use crate::policy::PolicyRecord;
use crate::roster::{RightsRoster, RosterOp, SubjectKind};
use crate::store::{GroupStore, PolicyStore, StoredPolicy};

#[derive(Debug, Default)]
struct Tables {
    next_id: u64,
    policies: BTreeMap<u64, StoredPolicy>,
    keys: HashMap<String, u64>,
    objects: HashMap<(String, u64), u64>,
    groups: BTreeMap<u64, GroupRecord>,
    relations: BTreeSet<(u64, u64)>,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn unindex(&mut self, record: &PolicyRecord) {
        if let Some(k) = &record.key {
            if self.keys.get(k) == Some(&record.id) {
                self.keys.remove(k);
            }
        }
        if let Some(o) = &record.object {
            let ok = (o.kind.clone(), o.id);
            if self.objects.get(&ok) == Some(&record.id) {
                self.objects.remove(&ok);
            }
        }
    }

    fn index(&mut self, record: &PolicyRecord) {
        if let Some(k) = &record.key {
            self.keys.insert(k.clone(), record.id);
        }
        if let Some(o) = &record.object {
            self.objects.insert((o.kind.clone(), o.id), record.id);
        }
    }
}

/// Both store contracts over mutex-guarded maps
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PolicyStore for MemoryStore {
    fn create_policy(&self, record: &PolicyRecord, roster: &RightsRoster) -> Result<u64> {
        let mut t = self.tables.lock();
        let id = t.next_id();
        let record = PolicyRecord { id, ..record.clone() };
        t.index(&record);
        t.policies.insert(id, StoredPolicy { record, roster: roster.clone() });
        Ok(id)
    }

    fn update_policy(&self, record: &PolicyRecord, changes: &[RosterOp]) -> Result<()> {
        let mut t = self.tables.lock();
        let old = t
            .policies
            .get(&record.id)
            .map(|p| p.record.clone())
            .ok_or_else(|| Error::AccessPolicyNotFound(record.id.to_string()))?;
        t.unindex(&old);
        t.index(record);
        if let Some(p) = t.policies.get_mut(&record.id) {
            p.record = record.clone();
            for op in changes {
                p.roster.apply(op);
            }
            if record.is_inherited {
                p.roster = RightsRoster::new();
            }
        }
        Ok(())
    }

    fn policy_by_id(&self, id: u64) -> Result<Option<StoredPolicy>> {
        Ok(self.tables.lock().policies.get(&id).cloned())
    }

    fn policy_by_key(&self, key: &str) -> Result<Option<StoredPolicy>> {
        let t = self.tables.lock();
        Ok(t.keys.get(key).and_then(|id| t.policies.get(id)).cloned())
    }

    fn policy_by_object(&self, kind: &str, object_id: u64) -> Result<Option<StoredPolicy>> {
        let t = self.tables.lock();
        Ok(t.objects
            .get(&(kind.to_string(), object_id))
            .and_then(|id| t.policies.get(id))
            .cloned())
    }

    fn delete_policy(&self, id: u64) -> Result<bool> {
        let mut t = self.tables.lock();
        match t.policies.remove(&id) {
            Some(p) => {
                t.unindex(&p.record);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl GroupStore for MemoryStore {
    fn create_group(&self, record: &GroupRecord) -> Result<u64> {
        let mut t = self.tables.lock();
        let id = t.next_id();
        t.groups.insert(id, GroupRecord { id, ..record.clone() });
        Ok(id)
    }

    fn update_group(&self, record: &GroupRecord) -> Result<()> {
        let mut t = self.tables.lock();
        match t.groups.get_mut(&record.id) {
            Some(g) => {
                *g = record.clone();
                Ok(())
            }
            None => Err(Error::GroupNotFound(record.id)),
        }
    }

    fn group_by_id(&self, id: u64) -> Result<Option<GroupRecord>> {
        Ok(self.tables.lock().groups.get(&id).cloned())
    }

    fn groups(&self) -> Result<Vec<GroupRecord>> {
        Ok(self.tables.lock().groups.values().cloned().collect())
    }

    fn groups_by_domain(&self, domain_id: u64) -> Result<Vec<GroupRecord>> {
        Ok(self
            .tables
            .lock()
            .groups
            .values()
            .filter(|g| g.domain_id == domain_id)
            .cloned()
            .collect())
    }

    fn group_by_key(&self, kind: GroupKind, domain_id: u64, key: &str) -> Result<Option<GroupRecord>> {
        Ok(self
            .tables
            .lock()
            .groups
            .values()
            .find(|g| g.kind == kind && g.domain_id == domain_id && g.key == key)
            .cloned())
    }

    fn children(&self, parent_id: u64) -> Result<Vec<GroupRecord>> {
        Ok(self
            .tables
            .lock()
            .groups
            .values()
            .filter(|g| g.parent_id == Some(parent_id))
            .cloned()
            .collect())
    }

    fn delete_group(&self, id: u64, subject: SubjectKind) -> Result<bool> {
        let mut t = self.tables.lock();
        if t.groups.remove(&id).is_none() {
            return Ok(false);
        }
        t.relations.retain(|(g, _)| *g != id);
        for p in t.policies.values_mut() {
            p.roster.apply(&RosterOp::unset(subject, id));
        }
        Ok(true)
    }

    fn add_relation(&self, group_id: u64, user_id: u64) -> Result<()> {
        let mut t = self.tables.lock();
        if !t.groups.contains_key(&group_id) {
            return Err(Error::GroupNotFound(group_id));
        }
        t.relations.insert((group_id, user_id));
        Ok(())
    }

    fn delete_relation(&self, group_id: u64, user_id: u64) -> Result<bool> {
        Ok(self.tables.lock().relations.remove(&(group_id, user_id)))
    }

    fn members(&self, group_id: u64) -> Result<Vec<u64>> {
        Ok(self
            .tables
            .lock()
            .relations
            .range((group_id, 0)..=(group_id, u64::MAX))
            .map(|(_, u)| *u)
            .collect())
    }

    fn memberships(&self, user_id: u64) -> Result<Vec<u64>> {
        Ok(self
            .tables
            .lock()
            .relations
            .iter()
            .filter(|(_, u)| *u == user_id)
            .map(|(g, _)| *g)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ObjectRef;
    use crate::rights::AccessRight;

    fn record(key: &str) -> PolicyRecord {
        PolicyRecord {
            id: 0,
            key: Some(key.into()),
            object: Some(ObjectRef::new("doc", 7)),
            owner_id: Some(1),
            parent_id: None,
            is_inherited: false,
            is_extended: false,
        }
    }

    #[test]
    fn policy_rows_follow_changelist() {
        let s = MemoryStore::new();
        let id = s.create_policy(&record("docs"), &RightsRoster::new()).unwrap();
        let mut rec = record("docs-2");
        rec.id = id;
        s.update_policy(&rec, &[RosterOp::set(SubjectKind::User, 3, AccessRight::VIEW)]).unwrap();

        assert!(s.policy_by_key("docs").unwrap().is_none());
        let p = s.policy_by_key("docs-2").unwrap().unwrap();
        assert_eq!(p.roster.user.get(&3), Some(&AccessRight::VIEW));
        assert_eq!(s.policy_by_object("doc", 7).unwrap().unwrap().record.id, id);

        assert!(s.delete_policy(id).unwrap());
        assert!(!s.delete_policy(id).unwrap());
        assert!(s.policy_by_object("doc", 7).unwrap().is_none());
    }

    #[test]
    fn deleting_group_drops_relations_and_rights() {
        let s = MemoryStore::new();
        let gid = s
            .create_group(&GroupRecord {
                id: 0,
                domain_id: 1,
                kind: GroupKind::Group,
                key: "staff".into(),
                name: "Staff".into(),
                description: String::new(),
                parent_id: None,
            })
            .unwrap();
        let mut roster = RightsRoster::new();
        roster.group.insert(gid, AccessRight::VIEW);
        let pid = s.create_policy(&record("docs"), &roster).unwrap();
        s.add_relation(gid, 42).unwrap();
        assert_eq!(s.members(gid).unwrap(), vec![42]);
        assert_eq!(s.memberships(42).unwrap(), vec![gid]);

        assert!(s.delete_group(gid, SubjectKind::Group).unwrap());
        assert!(s.members(gid).unwrap().is_empty());
        assert!(s.policy_by_id(pid).unwrap().unwrap().roster.group.is_empty());
        assert!(!s.delete_relation(gid, 42).unwrap());
    }
}
