//! Engine-wide limits and storage constants

// Maximum parent chain depth for groups and policies (prevents infinite loops)
pub const MAX_PARENT_DEPTH: usize = 32;

// Longest object kind the object index can key
pub const MAX_OBJECT_KIND_LEN: usize = u8::MAX as usize;

// LMDB defaults
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;
pub const DEFAULT_MAX_DBS: u32 = 8;
pub const DEFAULT_DB_PATH: &str = "data/policybit";

// Meta counters
pub const NEXT_POLICY_ID: &str = "next_policy_id";
pub const NEXT_GROUP_ID: &str = "next_group_id";
