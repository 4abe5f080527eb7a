//! Index gateway
//!
//! Uniform PUT/GET/DEL/NEXT against indices addressed by textual name.
//! Names hash deterministically into the store's index FID namespace;
//! enumeration batches against the service and applies prefix and
//! delimiter semantics before results reach the caller.

use moorage_common::{FID_TYPE_INDEX, Fid, Result};
use moorage_client::IndexService;
use std::sync::Arc;
use tracing::debug;

/// One enumeration result
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// A directory pseudo-entry produced by delimiter collapsing;
    /// its key is the common prefix up to and including the delimiter
    /// and its value is empty.
    pub is_dir: bool,
}

/// Gateway over the raw index service
pub struct IndexGateway {
    svc: Arc<dyn IndexService>,
    batch: usize,
}

impl IndexGateway {
    pub fn new(svc: Arc<dyn IndexService>, batch: usize) -> Self {
        Self {
            svc,
            batch: batch.max(1),
        }
    }

    /// The FID an index name resolves to
    #[must_use]
    pub fn fid(name: &str) -> Fid {
        Fid::from_name(name, FID_TYPE_INDEX)
    }

    /// Create an index, failing if it exists
    pub fn create(&self, name: &str) -> Result<()> {
        self.svc.create_index(Self::fid(name))
    }

    /// Create an index if it does not exist yet
    pub fn ensure(&self, name: &str) -> Result<()> {
        match self.svc.create_index(Self::fid(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Drop an index; absence is not an error
    pub fn drop_index(&self, name: &str) -> Result<()> {
        match self.svc.delete_index(Self::fid(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn put(&self, name: &str, key: &[u8], value: &[u8], overwrite: bool) -> Result<()> {
        self.svc.put(Self::fid(name), key, value, overwrite)
    }

    pub fn get(&self, name: &str, key: &[u8]) -> Result<Vec<u8>> {
        self.svc.get(Self::fid(name), key)
    }

    pub fn del(&self, name: &str, key: &[u8]) -> Result<()> {
        self.svc.del(Self::fid(name), key)
    }

    /// Delete tolerating a concurrent removal
    pub fn del_if_present(&self, name: &str, key: &[u8]) -> Result<()> {
        match self.svc.del(Self::fid(name), key) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Enumerate up to `max` entries with key ≥ `cursor`
    ///
    /// Stops at the first key not sharing `prefix`. When `delim` is
    /// given, keys containing the delimiter beyond the prefix collapse
    /// into directory pseudo-entries; iteration then reseeks past the
    /// whole directory. Consecutive duplicate directories are
    /// suppressed.
    pub fn next(
        &self,
        name: &str,
        cursor: &[u8],
        max: usize,
        prefix: Option<&[u8]>,
        delim: Option<&[u8]>,
    ) -> Result<Vec<IndexEntry>> {
        let fid = Self::fid(name);
        let mut out = Vec::new();
        let mut pos = cursor.to_vec();
        let mut last_dir: Option<Vec<u8>> = None;

        if max == 0 {
            return Ok(out);
        }

        'fetch: loop {
            let batch = self.svc.next(fid, &pos, self.batch)?;
            let got = batch.len();

            for (key, value) in batch {
                if let Some(p) = prefix {
                    if !key.starts_with(p) {
                        break 'fetch;
                    }
                }
                // default resume point: just past this key
                pos = key.clone();
                pos.push(0x00);

                if let Some(d) = delim {
                    let skip = prefix.map_or(0, <[u8]>::len);
                    if let Some(at) = find_sub(&key[skip..], d) {
                        let dir: Vec<u8> = key[..skip + at + d.len()].to_vec();
                        if last_dir.as_ref() == Some(&dir) {
                            // already collapsed; step past this key
                            continue;
                        }
                        out.push(IndexEntry {
                            key: dir.clone(),
                            value: Vec::new(),
                            is_dir: true,
                        });
                        last_dir = Some(dir.clone());
                        if out.len() >= max {
                            break 'fetch;
                        }
                        // jump past every key under this directory
                        pos = dir;
                        pos.push(0xFF);
                        continue 'fetch;
                    }
                }

                out.push(IndexEntry {
                    key,
                    value,
                    is_dir: false,
                });
                if out.len() >= max {
                    break 'fetch;
                }
            }

            if got < self.batch {
                break;
            }
        }

        debug!(index = name, results = out.len(), "index next");
        Ok(out)
    }
}

/// Position of `needle` in `haystack`, byte-wise
fn find_sub(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use moorage_client::MemoryCluster;

    fn gateway_with(entries: &[&str]) -> IndexGateway {
        let cluster = Arc::new(MemoryCluster::new());
        let gw = IndexGateway::new(cluster, 3);
        gw.create("t.idx").unwrap();
        for k in entries {
            gw.put("t.idx", k.as_bytes(), b"v", false).unwrap();
        }
        gw
    }

    fn keys(entries: &[IndexEntry]) -> Vec<String> {
        entries
            .iter()
            .map(|e| String::from_utf8(e.key.clone()).unwrap())
            .collect()
    }

    #[test]
    fn test_name_fid_deterministic() {
        assert_eq!(IndexGateway::fid("a"), IndexGateway::fid("a"));
        assert_ne!(IndexGateway::fid("a"), IndexGateway::fid("b"));
        assert_eq!(IndexGateway::fid("a").type_tag(), FID_TYPE_INDEX);
    }

    #[test]
    fn test_next_plain_pagination() {
        let gw = gateway_with(&["a", "b", "c", "d", "e"]);
        // internal batch is 3; ask for more than one batch's worth
        let all = gw.next("t.idx", b"", 10, None, None).unwrap();
        assert_eq!(keys(&all), vec!["a", "b", "c", "d", "e"]);

        let page = gw.next("t.idx", b"b", 2, None, None).unwrap();
        assert_eq!(keys(&page), vec!["b", "c"]);
    }

    #[test]
    fn test_next_prefix_termination() {
        let gw = gateway_with(&["a/1", "a/2", "b/1"]);
        let out = gw.next("t.idx", b"a/", 10, Some(b"a/"), None).unwrap();
        assert_eq!(keys(&out), vec!["a/1", "a/2"]);
    }

    #[test]
    fn test_next_delim_collapses_directories() {
        let gw = gateway_with(&["a/x", "a/y", "a/sub/z", "a/sub2/q", "a/zz"]);
        let out = gw.next("t.idx", b"a/", 10, Some(b"a/"), Some(b"/")).unwrap();
        let dirs: Vec<_> = out.iter().filter(|e| e.is_dir).collect();
        assert_eq!(keys(&out), vec!["a/sub/", "a/sub2/", "a/x", "a/y", "a/zz"]);
        assert_eq!(dirs.len(), 2);
    }

    #[test]
    fn test_next_delim_suppresses_duplicates() {
        let gw = gateway_with(&["p/d/1", "p/d/2", "p/d/3"]);
        let out = gw.next("t.idx", b"p/", 10, Some(b"p/"), Some(b"/")).unwrap();
        assert_eq!(keys(&out), vec!["p/d/"]);
    }

    #[test]
    fn test_ensure_and_drop() {
        let cluster = Arc::new(MemoryCluster::new());
        let gw = IndexGateway::new(cluster, 8);
        gw.ensure("idx").unwrap();
        gw.ensure("idx").unwrap();
        gw.drop_index("idx").unwrap();
        gw.drop_index("idx").unwrap();
    }

    #[test]
    fn test_errors_distinguishable() {
        let gw = gateway_with(&["k"]);
        assert!(gw.get("t.idx", b"missing").unwrap_err().is_not_found());
        assert!(gw.put("t.idx", b"k", b"v2", false).unwrap_err().is_already_exists());
        gw.del_if_present("t.idx", b"missing").unwrap();
    }
}
