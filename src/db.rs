//! LMDB-backed store
//!
//! Tables:
//! - `policies`: `policy id` → JSON [`PolicyRecord`]
//! - `policy_keys`: `key` → policy id
//! - `policy_objects`: `[kind][object id]` → policy id
//! - `rights`: `[policy][subject kind][subject]` → rights bits
//! - `groups`: `group id` → JSON [`GroupRecord`]
//! - `members` / `members_rev`: `[group][user]` and `[user][group]` kept in sync
//! - `meta`: id counters

use std::path::Path;

use byteorder::BigEndian;
use heed::types::{Bytes, Str, U64};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use tracing::debug;

use crate::config::StoreConfig;
use crate::constants::{NEXT_GROUP_ID, NEXT_POLICY_ID};
use crate::error::{Error, Result};
use crate::group::{GroupKind, GroupRecord};
use crate::keys::{object_key, pair_key, pair_tail, parse_rights_key, rights_key};
use crate::policy::PolicyRecord;
use crate::rights::AccessRight;
use crate::roster::{RightsRoster, RosterAction, RosterOp, SubjectKind};
use crate::store::{GroupStore, PolicyStore, StoredPolicy};

// Database type aliases
pub type Db = Database<Bytes, U64<BigEndian>>;
pub type DbJson = Database<Bytes, Str>;
pub type DbNames = Database<Str, U64<BigEndian>>;

/// Bidirectional index: fwd[a,b] and rev[b,a] stay in sync
pub struct BiPair {
    pub fwd: Db,
    pub rev: Db,
}

impl BiPair {
    #[inline]
    pub fn put(&self, tx: &mut RwTxn, a: u64, b: u64) -> Result<()> {
        self.fwd.put(tx, &pair_key(a, b), &1)?;
        self.rev.put(tx, &pair_key(b, a), &1)?;
        Ok(())
    }

    #[inline]
    pub fn del(&self, tx: &mut RwTxn, a: u64, b: u64) -> Result<bool> {
        let r = self.fwd.delete(tx, &pair_key(a, b))?;
        self.rev.delete(tx, &pair_key(b, a))?;
        Ok(r)
    }

    #[inline]
    pub fn contains(&self, tx: &RoTxn, a: u64, b: u64) -> Result<bool> {
        Ok(self.fwd.get(tx, &pair_key(a, b))?.is_some())
    }

    pub fn list_fwd(&self, tx: &RoTxn, a: u64) -> Result<Vec<u64>> {
        Self::list_pfx(tx, &self.fwd, a)
    }

    pub fn list_rev(&self, tx: &RoTxn, b: u64) -> Result<Vec<u64>> {
        Self::list_pfx(tx, &self.rev, b)
    }

    fn list_pfx(tx: &RoTxn, db: &Db, pfx: u64) -> Result<Vec<u64>> {
        let mut r = Vec::new();
        for item in db.prefix_iter(tx, &pfx.to_be_bytes())? {
            let (k, _) = item?;
            if let Some(id) = pair_tail(k) {
                r.push(id);
            }
        }
        Ok(r)
    }
}

/// All database handles
pub struct Dbs {
    pub policies: DbJson,
    pub policy_keys: DbNames,
    pub policy_objects: Db,
    pub rights: Db,
    pub groups: DbJson,
    pub members: BiPair,
    pub meta: DbNames,
}

/// Durable [`PolicyStore`] and [`GroupStore`] on LMDB
pub struct LmdbStore {
    env: Env,
    dbs: Dbs,
}

impl LmdbStore {
    /// Open (or create) the environment described by `config`
    pub fn open(config: &StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.path)?;
        // SAFETY: LMDB requires no other processes access this path concurrently during open.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(config.map_size)
                .max_dbs(config.max_dbs)
                .open(Path::new(&config.path))?
        };
        let mut tx = env.write_txn()?;
        let dbs = Dbs {
            policies: env.create_database(&mut tx, Some("policies"))?,
            policy_keys: env.create_database(&mut tx, Some("policy_keys"))?,
            policy_objects: env.create_database(&mut tx, Some("policy_objects"))?,
            rights: env.create_database(&mut tx, Some("rights"))?,
            groups: env.create_database(&mut tx, Some("groups"))?,
            members: BiPair {
                fwd: env.create_database(&mut tx, Some("members"))?,
                rev: env.create_database(&mut tx, Some("members_rev"))?,
            },
            meta: env.create_database(&mut tx, Some("meta"))?,
        };
        tx.commit()?;
        debug!(path = %config.path.display(), "lmdb store opened");
        Ok(LmdbStore { env, dbs })
    }

    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(&StoreConfig::at(path.as_ref()))
    }

    /// Execute a read-only operation
    #[inline]
    fn read<T, F: FnOnce(&Dbs, &RoTxn) -> Result<T>>(&self, f: F) -> Result<T> {
        let tx = self.env.read_txn()?;
        f(&self.dbs, &tx)
    }

    /// Execute a write in its own transaction
    #[inline]
    fn write<T, F: FnOnce(&Dbs, &mut RwTxn) -> Result<T>>(&self, f: F) -> Result<T> {
        let mut tx = self.env.write_txn()?;
        let r = f(&self.dbs, &mut tx)?;
        tx.commit()?;
        Ok(r)
    }
}

fn next_id(d: &Dbs, tx: &mut RwTxn, counter: &str) -> Result<u64> {
    let id = d.meta.get(tx, counter)?.unwrap_or(0) + 1;
    d.meta.put(tx, counter, &id)?;
    Ok(id)
}

fn policy_record(d: &Dbs, tx: &RoTxn, id: u64) -> Result<Option<PolicyRecord>> {
    match d.policies.get(tx, &id.to_be_bytes())? {
        Some(json) => Ok(Some(serde_json::from_str(json)?)),
        None => Ok(None),
    }
}

fn load_policy(d: &Dbs, tx: &RoTxn, id: u64) -> Result<Option<StoredPolicy>> {
    let Some(record) = policy_record(d, tx, id)? else { return Ok(None) };
    let mut roster = RightsRoster::new();
    for item in d.rights.prefix_iter(tx, &id.to_be_bytes())? {
        let (k, v) = item?;
        if let Some((_, kind, subject)) = parse_rights_key(k) {
            roster.set(kind, subject, AccessRight::from_stored(v));
        }
    }
    Ok(Some(StoredPolicy { record, roster }))
}

fn index_policy(d: &Dbs, tx: &mut RwTxn, record: &PolicyRecord) -> Result<()> {
    if let Some(k) = &record.key {
        d.policy_keys.put(tx, k, &record.id)?;
    }
    if let Some(o) = &record.object {
        d.policy_objects.put(tx, &object_key(&o.kind, o.id)?, &record.id)?;
    }
    Ok(())
}

fn unindex_policy(d: &Dbs, tx: &mut RwTxn, record: &PolicyRecord) -> Result<()> {
    if let Some(k) = &record.key {
        if d.policy_keys.get(tx, k)? == Some(record.id) {
            d.policy_keys.delete(tx, k)?;
        }
    }
    if let Some(o) = &record.object {
        let ok = object_key(&o.kind, o.id)?;
        if d.policy_objects.get(tx, &ok)? == Some(record.id) {
            d.policy_objects.delete(tx, &ok)?;
        }
    }
    Ok(())
}

fn policy_rows(d: &Dbs, tx: &RoTxn, policy_id: u64) -> Result<Vec<Vec<u8>>> {
    let mut rows = Vec::new();
    for item in d.rights.prefix_iter(tx, &policy_id.to_be_bytes())? {
        rows.push(item?.0.to_vec());
    }
    Ok(rows)
}

fn delete_rows(db: &Db, tx: &mut RwTxn, keys: Vec<Vec<u8>>) -> Result<()> {
    for k in keys {
        db.delete(tx, &k)?;
    }
    Ok(())
}

impl PolicyStore for LmdbStore {
    fn create_policy(&self, record: &PolicyRecord, roster: &RightsRoster) -> Result<u64> {
        self.write(|d, tx| {
            let id = next_id(d, tx, NEXT_POLICY_ID)?;
            let record = PolicyRecord { id, ..record.clone() };
            d.policies.put(tx, &id.to_be_bytes(), &serde_json::to_string(&record)?)?;
            index_policy(d, tx, &record)?;
            for e in roster.entries() {
                d.rights.put(tx, &rights_key(id, e.kind, e.subject_id), &e.rights.to_stored())?;
            }
            Ok(id)
        })
    }

    fn update_policy(&self, record: &PolicyRecord, changes: &[RosterOp]) -> Result<()> {
        self.write(|d, tx| {
            let old = policy_record(d, tx, record.id)?
                .ok_or_else(|| Error::AccessPolicyNotFound(record.id.to_string()))?;
            unindex_policy(d, tx, &old)?;
            d.policies.put(tx, &record.id.to_be_bytes(), &serde_json::to_string(record)?)?;
            index_policy(d, tx, record)?;
            for op in changes {
                let k = rights_key(record.id, op.kind, op.subject_id);
                match op.action {
                    RosterAction::Set => d.rights.put(tx, &k, &op.rights.to_stored())?,
                    RosterAction::Unset => {
                        d.rights.delete(tx, &k)?;
                    }
                }
            }
            // an inherited policy keeps no rows of its own
            if record.is_inherited {
                let rows = policy_rows(d, tx, record.id)?;
                delete_rows(&d.rights, tx, rows)?;
            }
            Ok(())
        })
    }

    fn policy_by_id(&self, id: u64) -> Result<Option<StoredPolicy>> {
        self.read(|d, tx| load_policy(d, tx, id))
    }

    fn policy_by_key(&self, key: &str) -> Result<Option<StoredPolicy>> {
        self.read(|d, tx| match d.policy_keys.get(tx, key)? {
            Some(id) => load_policy(d, tx, id),
            None => Ok(None),
        })
    }

    fn policy_by_object(&self, kind: &str, object_id: u64) -> Result<Option<StoredPolicy>> {
        self.read(|d, tx| match d.policy_objects.get(tx, &object_key(kind, object_id)?)? {
            Some(id) => load_policy(d, tx, id),
            None => Ok(None),
        })
    }

    fn delete_policy(&self, id: u64) -> Result<bool> {
        self.write(|d, tx| {
            let Some(record) = policy_record(d, tx, id)? else { return Ok(false) };
            unindex_policy(d, tx, &record)?;
            d.policies.delete(tx, &id.to_be_bytes())?;
            let rows = policy_rows(d, tx, id)?;
            delete_rows(&d.rights, tx, rows)?;
            Ok(true)
        })
    }
}

fn group_record(d: &Dbs, tx: &RoTxn, id: u64) -> Result<Option<GroupRecord>> {
    match d.groups.get(tx, &id.to_be_bytes())? {
        Some(json) => Ok(Some(serde_json::from_str(json)?)),
        None => Ok(None),
    }
}

fn all_groups(d: &Dbs, tx: &RoTxn) -> Result<Vec<GroupRecord>> {
    let mut out = Vec::new();
    for item in d.groups.iter(tx)? {
        let (_, json) = item?;
        out.push(serde_json::from_str(json)?);
    }
    Ok(out)
}

impl GroupStore for LmdbStore {
    fn create_group(&self, record: &GroupRecord) -> Result<u64> {
        self.write(|d, tx| {
            let id = next_id(d, tx, NEXT_GROUP_ID)?;
            let record = GroupRecord { id, ..record.clone() };
            d.groups.put(tx, &id.to_be_bytes(), &serde_json::to_string(&record)?)?;
            Ok(id)
        })
    }

    fn update_group(&self, record: &GroupRecord) -> Result<()> {
        self.write(|d, tx| {
            if group_record(d, tx, record.id)?.is_none() {
                return Err(Error::GroupNotFound(record.id));
            }
            d.groups.put(tx, &record.id.to_be_bytes(), &serde_json::to_string(record)?)?;
            Ok(())
        })
    }

    fn group_by_id(&self, id: u64) -> Result<Option<GroupRecord>> {
        self.read(|d, tx| group_record(d, tx, id))
    }

    fn groups(&self) -> Result<Vec<GroupRecord>> {
        self.read(all_groups)
    }

    fn groups_by_domain(&self, domain_id: u64) -> Result<Vec<GroupRecord>> {
        let mut groups = self.read(all_groups)?;
        groups.retain(|g| g.domain_id == domain_id);
        Ok(groups)
    }

    fn group_by_key(&self, kind: GroupKind, domain_id: u64, key: &str) -> Result<Option<GroupRecord>> {
        let groups = self.read(all_groups)?;
        Ok(groups
            .into_iter()
            .find(|g| g.kind == kind && g.domain_id == domain_id && g.key == key))
    }

    fn children(&self, parent_id: u64) -> Result<Vec<GroupRecord>> {
        let mut groups = self.read(all_groups)?;
        groups.retain(|g| g.parent_id == Some(parent_id));
        Ok(groups)
    }

    fn delete_group(&self, id: u64, subject: SubjectKind) -> Result<bool> {
        self.write(|d, tx| {
            if !d.groups.delete(tx, &id.to_be_bytes())? {
                return Ok(false);
            }
            for user in d.members.list_fwd(tx, id)? {
                d.members.del(tx, id, user)?;
            }
            let mut rows = Vec::new();
            for item in d.rights.iter(tx)? {
                let (k, _) = item?;
                if let Some((_, kind, subject_id)) = parse_rights_key(k) {
                    if kind == subject && subject_id == id {
                        rows.push(k.to_vec());
                    }
                }
            }
            delete_rows(&d.rights, tx, rows)?;
            Ok(true)
        })
    }

    fn add_relation(&self, group_id: u64, user_id: u64) -> Result<()> {
        self.write(|d, tx| {
            if d.groups.get(tx, &group_id.to_be_bytes())?.is_none() {
                return Err(Error::GroupNotFound(group_id));
            }
            d.members.put(tx, group_id, user_id)
        })
    }

    fn delete_relation(&self, group_id: u64, user_id: u64) -> Result<bool> {
        self.write(|d, tx| {
            if !d.members.contains(tx, group_id, user_id)? {
                return Ok(false);
            }
            d.members.del(tx, group_id, user_id)
        })
    }

    fn members(&self, group_id: u64) -> Result<Vec<u64>> {
        self.read(|d, tx| d.members.list_fwd(tx, group_id))
    }

    fn memberships(&self, user_id: u64) -> Result<Vec<u64>> {
        self.read(|d, tx| d.members.list_rev(tx, user_id))
    }
}
