//! Policybit - embeddable access-policy engine
//!
//! - Rights: bitmask flags combined with OR, tested with AND-equals-requested
//! - Policies: owner + roster (everyone / role / group / user), optionally
//!   inheriting or extending a parent policy
//! - Groups and roles: same-kind trees with membership back-references
//! - Persistence: narrow store traits, with in-memory and LMDB implementations

pub mod config;
pub mod constants;
pub mod container;
pub mod db;
pub mod error;
pub mod group;
pub mod group_manager;
pub mod keys;
pub mod memory;
pub mod policy;
pub mod rights;
pub mod roster;
pub mod store;
pub mod user;

pub use config::StoreConfig;
pub use container::{AccessPolicyContainer, NewPolicy};
pub use db::LmdbStore;
pub use error::{Error, Result};
pub use group::{Group, GroupKind, GroupRecord, GroupStatus};
pub use group_manager::{GroupManager, NewGroup};
pub use memory::MemoryStore;
pub use policy::{AccessPolicy, Linkage, ObjectRef, PolicyRecord, Subject};
pub use rights::AccessRight;
pub use roster::{RightsRoster, RosterAction, RosterEntry, RosterOp, SubjectKind};
pub use store::{GroupStore, PolicyStore, StoredPolicy};
pub use user::User;
