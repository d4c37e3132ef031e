use serde::{Deserialize, Serialize};
use sigil_core::error::Result;
use sigil_core::jwk::EcJwk;
use sigil_core::store::KeyValueStore;

use crate::sig::KAS_VERSION;

const KEY_PREFIX: &str = "kas1:passkey:";

/// What is remembered about an identity's registered credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasskeyRecord {
    pub v: String,
    pub identity_key: String,
    /// base64url credential id
    pub cred_id: String,
    pub pub_key_jwk: EcJwk,
    pub rp_id: String,
    /// base64url user handle
    pub user_handle: String,
}

impl PasskeyRecord {
    pub fn new(
        identity_key: &str,
        cred_id: String,
        pub_key_jwk: EcJwk,
        rp_id: &str,
        user_handle: String,
    ) -> Self {
        Self {
            v: KAS_VERSION.to_string(),
            identity_key: identity_key.to_string(),
            cred_id,
            pub_key_jwk,
            rp_id: rp_id.to_string(),
            user_handle,
        }
    }
}

pub struct PasskeyStore<S> {
    store: S,
}

impl<S: KeyValueStore> PasskeyStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn storage_key(identity_key: &str) -> String {
        format!("{KEY_PREFIX}{identity_key}")
    }

    /// Unreadable or foreign-version entries count as absent.
    pub fn get(&self, identity_key: &str) -> Option<PasskeyRecord> {
        let raw = self.store.get(&Self::storage_key(identity_key))?;
        match serde_json::from_str::<PasskeyRecord>(&raw) {
            Ok(record) if record.v == KAS_VERSION && record.identity_key == identity_key => {
                Some(record)
            }
            Ok(_) => {
                tracing::debug!(identity = identity_key, "ignoring foreign passkey record");
                None
            }
            Err(e) => {
                tracing::debug!(identity = identity_key, "corrupt passkey record: {e}");
                None
            }
        }
    }

    pub fn put(&self, record: &PasskeyRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.store
            .put(&Self::storage_key(&record.identity_key), &json)
    }

    pub fn remove(&self, identity_key: &str) -> Result<()> {
        self.store.remove(&Self::storage_key(identity_key))
    }

    pub fn identities(&self) -> Vec<String> {
        self.store
            .keys()
            .into_iter()
            .filter_map(|k| k.strip_prefix(KEY_PREFIX).map(str::to_string))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigil_core::store::MemoryStore;

    fn record() -> PasskeyRecord {
        PasskeyRecord::new(
            "phi123",
            "Y3JlZA".into(),
            EcJwk::p256(&[1; 32], &[2; 32]),
            "sigil.example",
            "aGFuZGxl".into(),
        )
    }

    #[test]
    fn put_get_remove() {
        let store = PasskeyStore::new(MemoryStore::new());
        assert!(store.get("phi123").is_none());
        store.put(&record()).unwrap();
        assert_eq!(store.get("phi123"), Some(record()));
        assert_eq!(store.identities(), vec!["phi123".to_string()]);
        store.remove("phi123").unwrap();
        assert!(store.get("phi123").is_none());
    }

    #[test]
    fn corrupt_entry_is_absent() {
        let mem = MemoryStore::new();
        mem.put("kas1:passkey:phi123", "{not json").unwrap();
        let store = PasskeyStore::new(mem);
        assert!(store.get("phi123").is_none());
    }

    #[test]
    fn record_for_other_identity_is_absent() {
        let mem = MemoryStore::new();
        let mut r = record();
        r.identity_key = "phi999".into();
        mem.put("kas1:passkey:phi123", &serde_json::to_string(&r).unwrap())
            .unwrap();
        assert!(PasskeyStore::new(mem).get("phi123").is_none());
    }
}
