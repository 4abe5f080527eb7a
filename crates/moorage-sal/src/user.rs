//! User operations
//!
//! Users live in the global user index, with access-key and email
//! mappings maintained alongside. Updates carry an optimistic version
//! check; per-user bucket-list and stats indices are dropped with the
//! user.

use crate::catalog::{
    ACCESS_KEYS_INDEX, EMAILS_INDEX, user_info_index, user_stats_index,
};
use crate::records::{AccessKeyRecord, BucketHeader, UserRecord};
use crate::store::Store;
use moorage_common::{Error, Result};
use tracing::debug;

impl Store {
    /// Create a user, failing if the id is taken
    pub fn create_user(&self, user: UserRecord) -> Result<UserRecord> {
        self.store_user_record(user, true, false)
    }

    /// Update a user; `check_version` enforces the optimistic stamp
    pub fn store_user(&self, user: UserRecord, check_version: bool) -> Result<UserRecord> {
        self.store_user_record(user, false, check_version)
    }

    fn store_user_record(
        &self,
        mut user: UserRecord,
        exclusive: bool,
        check_version: bool,
    ) -> Result<UserRecord> {
        if user.user_id.is_empty() {
            return Err(Error::invalid_argument("empty user id"));
        }
        if check_version {
            match self.catalog().get_user(&user.user_id) {
                Ok(existing) if existing.version != user.version => {
                    return Err(Error::VersionConflict(format!(
                        "user {} changed concurrently",
                        user.user_id
                    )));
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        if !exclusive {
            user.version.bump();
        }
        self.catalog().put_user(&user, !exclusive)?;

        let gw = self.catalog().gateway();
        for key in &user.access_keys {
            let record = AccessKeyRecord {
                user_id: user.user_id.clone(),
                secret: key.secret.clone(),
            };
            gw.put(ACCESS_KEYS_INDEX, key.id.as_bytes(), &record.to_bytes(), true)?;
        }
        if !user.email.is_empty() {
            gw.put(
                EMAILS_INDEX,
                user.email.as_bytes(),
                user.user_id.as_bytes(),
                true,
            )?;
        }
        debug!(user = user.user_id, "user stored");
        Ok(user)
    }

    /// Load a user by id
    pub fn load_user(&self, user_id: &str) -> Result<UserRecord> {
        self.catalog().get_user(user_id)
    }

    /// Remove a user, its key/email mappings, and its per-user indices
    pub fn remove_user(&self, user: &UserRecord) -> Result<()> {
        let gw = self.catalog().gateway();
        for key in &user.access_keys {
            gw.del_if_present(ACCESS_KEYS_INDEX, key.id.as_bytes())?;
        }
        if !user.email.is_empty() {
            gw.del_if_present(EMAILS_INDEX, user.email.as_bytes())?;
        }
        gw.drop_index(&user_info_index(&user.user_id))?;
        gw.drop_index(&user_stats_index(&user.user_id))?;
        self.catalog().del_user(&user.user_id)?;
        debug!(user = user.user_id, "user removed");
        Ok(())
    }

    /// Look a user up by access key
    pub fn get_user_by_access_key(&self, access_key: &str) -> Result<UserRecord> {
        let raw = self
            .catalog()
            .gateway()
            .get(ACCESS_KEYS_INDEX, access_key.as_bytes())?;
        let record = AccessKeyRecord::from_bytes(&raw)?;
        self.load_user(&record.user_id)
    }

    /// Look a user up by email
    pub fn get_user_by_email(&self, email: &str) -> Result<UserRecord> {
        let raw = self.catalog().gateway().get(EMAILS_INDEX, email.as_bytes())?;
        let user_id = String::from_utf8(raw)
            .map_err(|_| Error::decode("email mapping is not utf-8"))?;
        self.load_user(&user_id)
    }

    /// Read a bucket's usage header from its owner's stats index
    pub fn read_bucket_stats(&self, owner: &str, bucket_name: &str) -> Result<BucketHeader> {
        self.catalog().read_stats(owner, bucket_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::AccessKey;
    use moorage_client::MemoryCluster;
    use moorage_common::SalConfig;
    use std::sync::Arc;

    fn store() -> Store {
        let cluster = Arc::new(MemoryCluster::new());
        Store::open(cluster.clone(), cluster, SalConfig::default()).unwrap()
    }

    fn alice() -> UserRecord {
        let mut user = UserRecord::new("alice", "Alice");
        user.email = "alice@example.com".to_string();
        user.access_keys.push(AccessKey {
            id: "AKIAALICE".to_string(),
            secret: "sekrit".to_string(),
        });
        user
    }

    #[test]
    fn test_create_and_lookup() {
        let store = store();
        store.create_user(alice()).unwrap();

        assert_eq!(store.load_user("alice").unwrap().display_name, "Alice");
        assert_eq!(
            store.get_user_by_access_key("AKIAALICE").unwrap().user_id,
            "alice"
        );
        assert_eq!(
            store.get_user_by_email("alice@example.com").unwrap().user_id,
            "alice"
        );
    }

    #[test]
    fn test_create_twice_conflicts() {
        let store = store();
        store.create_user(alice()).unwrap();
        assert!(store.create_user(alice()).unwrap_err().is_already_exists());
    }

    #[test]
    fn test_version_check_conflict() {
        let store = store();
        let stored = store.create_user(alice()).unwrap();

        // a concurrent update bumps the stored version
        let mut first = stored.clone();
        first.display_name = "Alice A.".to_string();
        store.store_user(first, true).unwrap();

        // the loser still holds the old stamp
        let mut second = stored;
        second.display_name = "Alice B.".to_string();
        let err = store.store_user(second, true).unwrap_err();
        assert!(matches!(err, Error::VersionConflict(_)));
    }

    #[test]
    fn test_remove_user_drops_mappings() {
        let store = store();
        let user = store.create_user(alice()).unwrap();
        store.remove_user(&user).unwrap();

        assert!(store.load_user("alice").unwrap_err().is_not_found());
        assert!(
            store
                .get_user_by_access_key("AKIAALICE")
                .unwrap_err()
                .is_not_found()
        );
        assert!(
            store
                .get_user_by_email("alice@example.com")
                .unwrap_err()
                .is_not_found()
        );
    }
}
