//! Binary key encoding for LMDB storage.
//!
//! - pair keys: `[a: u64 BE][b: u64 BE]` (group↔user relations)
//! - rights rows: `[policy: u64 BE][subject kind tag: u8][subject: u64 BE]`
//! - object keys: `[kind_len: u8][kind bytes][object id: u64 BE]`, kinds of 1 to 255 bytes
//!
//! Big-endian ids keep prefix scans ordered by id.

use crate::constants::MAX_OBJECT_KIND_LEN;
use crate::error::{Error, Result};
use crate::roster::SubjectKind;

pub const RIGHTS_KEY_LEN: usize = 17;

/// Create a 16-byte key from two u64 values
#[inline]
pub fn pair_key(a: u64, b: u64) -> [u8; 16] {
    let mut k = [0u8; 16];
    k[..8].copy_from_slice(&a.to_be_bytes());
    k[8..].copy_from_slice(&b.to_be_bytes());
    k
}

/// Second id of a pair key
#[inline]
pub fn pair_tail(bytes: &[u8]) -> Option<u64> {
    (bytes.len() == 16).then(|| read_u64(&bytes[8..16]))
}

#[inline]
pub fn rights_key(policy_id: u64, kind: SubjectKind, subject_id: u64) -> [u8; RIGHTS_KEY_LEN] {
    let mut k = [0u8; RIGHTS_KEY_LEN];
    k[..8].copy_from_slice(&policy_id.to_be_bytes());
    k[8] = kind.tag();
    k[9..].copy_from_slice(&subject_id.to_be_bytes());
    k
}

/// Parse a rights row key into (policy, kind, subject)
pub fn parse_rights_key(bytes: &[u8]) -> Option<(u64, SubjectKind, u64)> {
    if bytes.len() != RIGHTS_KEY_LEN {
        return None;
    }
    let kind = SubjectKind::from_tag(bytes[8])?;
    Some((read_u64(&bytes[..8]), kind, read_u64(&bytes[9..])))
}

/// Build an object key. Kinds that do not fit the length byte are refused,
/// so two distinct objects never share a key.
pub fn object_key(kind: &str, object_id: u64) -> Result<Vec<u8>> {
    if kind.is_empty() || kind.len() > MAX_OBJECT_KIND_LEN {
        return Err(Error::InvalidObjectKind(kind.to_string()));
    }
    let mut key = Vec::with_capacity(1 + kind.len() + 8);
    key.push(kind.len() as u8);
    key.extend_from_slice(kind.as_bytes());
    key.extend_from_slice(&object_id.to_be_bytes());
    Ok(key)
}

#[inline]
fn read_u64(bytes: &[u8]) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(bytes);
    u64::from_be_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_key() {
        let k = pair_key(1, 2);
        assert_eq!(&k[..8], &1u64.to_be_bytes());
        assert_eq!(pair_tail(&k), Some(2));
        assert_eq!(pair_tail(&k[..8]), None);
    }

    #[test]
    fn test_rights_key() {
        let k = rights_key(9, SubjectKind::Group, 300);
        assert_eq!(parse_rights_key(&k), Some((9, SubjectKind::Group, 300)));
        assert!(k.starts_with(&9u64.to_be_bytes()));

        let mut bad = k;
        bad[8] = 42;
        assert_eq!(parse_rights_key(&bad), None);
    }

    #[test]
    fn test_object_key() {
        let key = object_key("doc", 5).unwrap();
        assert_eq!(key[0], 3);
        assert_eq!(&key[1..4], b"doc");
        assert_eq!(&key[4..], &5u64.to_be_bytes());

        // "doc" + id must not collide with "do" + another id
        assert_ne!(object_key("do", 5).unwrap(), key);
    }

    #[test]
    fn test_long_kind_is_refused() {
        let longest = "k".repeat(MAX_OBJECT_KIND_LEN);
        assert_eq!(object_key(&longest, 1).unwrap()[0], u8::MAX);

        let too_long = format!("{longest}x");
        assert!(matches!(object_key(&too_long, 1), Err(Error::InvalidObjectKind(_))));
        assert!(matches!(object_key("", 1), Err(Error::InvalidObjectKind(_))));
    }
}
