//! Error types for policybit

use thiserror::Error;

use crate::group::GroupKind;
use crate::rights::AccessRight;

/// Result type alias for policybit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the engine reports to its callers
#[derive(Debug, Error)]
pub enum Error {
    // Preconditions
    #[error("assignor is required")]
    NilAssignor,

    // Authorization
    #[error("excess of rights: requested {requested}, assignor holds {held}")]
    ExcessOfRights { requested: AccessRight, held: AccessRight },

    // Structure
    #[error("invalid group kind: expected {expected}, got {actual}")]
    InvalidGroupKind { expected: GroupKind, actual: GroupKind },
    #[error("group kind mismatch: {child} cannot have a {parent} parent")]
    GroupKindMismatch { child: GroupKind, parent: GroupKind },
    #[error("group {0} is already in the parent chain")]
    DuplicateParent(u64),
    #[error("parent chain of {0} is circuited")]
    CircuitedParent(u64),
    #[error("group {0} still has child groups")]
    GroupHasChildren(u64),
    #[error("invalid group: {0}")]
    InvalidGroup(String),
    #[error("invalid subject kind: {0}")]
    InvalidSubjectKind(String),
    #[error("invalid object kind '{0}': must be 1 to 255 bytes")]
    InvalidObjectKind(String),

    // State
    #[error("user {user_id} is already a member of group {group_id}")]
    AlreadyMember { group_id: u64, user_id: u64 },
    #[error("user {user_id} is not a member of group {group_id}")]
    NotMember { group_id: u64, user_id: u64 },
    #[error("access policy key '{0}' is already taken")]
    AccessPolicyKeyTaken(String),
    #[error("access policy for object {kind}:{id} already exists")]
    AccessPolicyKindAndIdTaken { kind: String, id: u64 },
    #[error("group key '{0}' is already taken")]
    GroupKeyTaken(String),

    // Lookup
    #[error("access policy not found: {0}")]
    AccessPolicyNotFound(String),
    #[error("group not found: {0}")]
    GroupNotFound(u64),
    #[error("no {kind} with key '{key}' in domain {domain_id}")]
    GroupKeyNotFound { kind: GroupKind, domain_id: u64, key: String },

    // Persistence
    #[error("storage: {0}")]
    Storage(String),
    #[error(transparent)]
    Lmdb(#[from] heed::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for validation failures that never touched any state
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            Error::Storage(_) | Error::Lmdb(_) | Error::Json(_) | Error::Io(_)
        )
    }
}
