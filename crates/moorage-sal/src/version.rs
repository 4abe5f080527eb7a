//! Version instances and the bucket-index key scheme
//!
//! Every object record in a bucket index is keyed `<name> SEP <instance>`
//! where `SEP` is the reserved byte `0x07`. The null version uses the
//! empty instance, so it always sorts first among a name's records.
//! Versioned instances start with an 8-character base62 encoding of the
//! *inverted* millisecond timestamp, so lexicographic order is
//! newest-first, followed by 23 random alphanumerics for uniqueness.

use moorage_common::{Error, Result};
use rand::distributions::Alphanumeric;
use rand::{Rng, thread_rng};

/// Reserved separator between object name and version instance
pub const KEY_SEP: u8 = 0x07;

/// Sorted base62 alphabet (digit value == lexicographic rank)
const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Width of the encoded timestamp prefix
const TS_WIDTH: usize = 8;

/// Width of the random uniqueness suffix
const RAND_WIDTH: usize = 23;

/// Total length of a version instance
pub const INSTANCE_LEN: usize = TS_WIDTH + RAND_WIDTH;

/// Largest encodable timestamp: 62^8 - 1
const MAX_TS: u64 = 218_340_105_584_895;

/// Encode a millisecond timestamp, inverted so newer sorts smaller
fn encode_ts(ms: u64) -> [u8; TS_WIDTH] {
    let mut v = MAX_TS - ms.min(MAX_TS);
    let mut out = [ALPHABET[0]; TS_WIDTH];
    for slot in out.iter_mut().rev() {
        *slot = ALPHABET[(v % 62) as usize];
        v /= 62;
    }
    out
}

fn digit_value(c: u8) -> Result<u64> {
    match c {
        b'0'..=b'9' => Ok(u64::from(c - b'0')),
        b'A'..=b'Z' => Ok(u64::from(c - b'A') + 10),
        b'a'..=b'z' => Ok(u64::from(c - b'a') + 36),
        _ => Err(Error::invalid_argument(format!(
            "invalid version-id character {:?}",
            c as char
        ))),
    }
}

/// Generate a fresh version instance for the given mtime
pub fn new_instance(ms: u64) -> String {
    let mut out = String::with_capacity(INSTANCE_LEN);
    out.push_str(std::str::from_utf8(&encode_ts(ms)).expect("base62 is ascii"));
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RAND_WIDTH)
        .map(char::from)
        .collect();
    out.push_str(&suffix);
    out
}

/// Recover the millisecond timestamp from an instance
pub fn instance_mtime(instance: &str) -> Result<u64> {
    let bytes = instance.as_bytes();
    if bytes.len() < TS_WIDTH {
        return Err(Error::invalid_argument(format!(
            "version id too short: {instance:?}"
        )));
    }
    let mut v = 0u64;
    for &c in &bytes[..TS_WIDTH] {
        v = v * 62 + digit_value(c)?;
    }
    Ok(MAX_TS - v)
}

/// Bucket-index key of a (name, instance) pair
#[must_use]
pub fn entry_key(name: &str, instance: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.len() + 1 + instance.len());
    key.extend_from_slice(name.as_bytes());
    key.push(KEY_SEP);
    key.extend_from_slice(instance.as_bytes());
    key
}

/// Prefix covering every version of a name (the null version included)
#[must_use]
pub fn name_prefix(name: &str) -> Vec<u8> {
    entry_key(name, "")
}

/// Smallest key strictly beyond every version of a name
#[must_use]
pub fn after_name(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.len() + 1);
    key.extend_from_slice(name.as_bytes());
    key.push(KEY_SEP + 1);
    key
}

/// Split a bucket-index key into (name, instance)
pub fn parse_key(key: &[u8]) -> Result<(String, String)> {
    let sep = key
        .iter()
        .rposition(|&b| b == KEY_SEP)
        .ok_or_else(|| Error::decode("object key without version separator"))?;
    let name = std::str::from_utf8(&key[..sep])
        .map_err(|_| Error::decode("object key name is not utf-8"))?;
    let instance = std::str::from_utf8(&key[sep + 1..])
        .map_err(|_| Error::decode("object key instance is not utf-8"))?;
    Ok((name.to_string(), instance.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use moorage_common::now_ms;

    #[test]
    fn test_ts_roundtrip() {
        for ms in [0u64, 1, 1_690_000_000_000, MAX_TS] {
            let inst = new_instance(ms);
            assert_eq!(inst.len(), INSTANCE_LEN);
            assert_eq!(instance_mtime(&inst).unwrap(), ms);
        }
    }

    #[test]
    fn test_newer_sorts_first() {
        let t1 = 1_690_000_000_000u64;
        let t2 = t1 + 1;
        let e1 = new_instance(t1);
        let e2 = new_instance(t2);
        // newer timestamp encodes strictly smaller
        assert!(e2.as_bytes()[..TS_WIDTH] < e1.as_bytes()[..TS_WIDTH]);
    }

    #[test]
    fn test_null_version_sorts_before_instances() {
        let null_key = entry_key("obj", "");
        let ver_key = entry_key("obj", &new_instance(now_ms()));
        assert!(null_key < ver_key);
        // and both sort before the next name
        assert!(ver_key < after_name("obj"));
    }

    #[test]
    fn test_key_roundtrip() {
        let inst = new_instance(42);
        let key = entry_key("dir/photo.jpg", &inst);
        let (name, instance) = parse_key(&key).unwrap();
        assert_eq!(name, "dir/photo.jpg");
        assert_eq!(instance, inst);

        let (name, instance) = parse_key(&entry_key("a", "")).unwrap();
        assert_eq!(name, "a");
        assert_eq!(instance, "");
    }

    #[test]
    fn test_bad_instance_rejected() {
        assert!(instance_mtime("short").is_err());
        assert!(instance_mtime("!!!!!!!!").is_err());
        assert!(parse_key(b"no-separator").is_err());
    }
}
