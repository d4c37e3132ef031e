//! KVC-1: "this bundle, with this ZK hash, already passed under this protocol version".

use serde::{Deserialize, Serialize};
use sigil_core::digest::sha256_hex;
use sigil_core::error::Result;
use sigil_core::store::KeyValueStore;

pub const CACHE_RECORD_VERSION: &str = "KVC-1";
pub const DEFAULT_PROTOCOL_VERSION: &str = "KVC-1/1";

const KEY_PREFIX: &str = "kvc1:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachedResult {
    Ok,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationCacheRecord {
    pub v: String,
    pub cache_key: String,
    pub bundle_hash: String,
    /// Empty for bundles without a ZK seal.
    pub zk_poseidon_hash: String,
    pub verification_version: String,
    pub verified_at_pulse: u64,
    #[serde(default)]
    pub expires_at_pulse: Option<u64>,
    pub result: CachedResult,
}

impl VerificationCacheRecord {
    pub fn new(
        bundle_hash: &str,
        zk_poseidon_hash: &str,
        verification_version: &str,
        verified_at_pulse: u64,
        expires_at_pulse: Option<u64>,
        result: CachedResult,
    ) -> Self {
        Self {
            v: CACHE_RECORD_VERSION.to_string(),
            cache_key: cache_key(bundle_hash, zk_poseidon_hash, verification_version),
            bundle_hash: bundle_hash.to_string(),
            zk_poseidon_hash: zk_poseidon_hash.to_string(),
            verification_version: verification_version.to_string(),
            verified_at_pulse,
            expires_at_pulse,
            result,
        }
    }

    pub fn is_expired(&self, now_pulse: u64) -> bool {
        self.expires_at_pulse.is_some_and(|exp| now_pulse >= exp)
    }

    fn matches(&self, bundle_hash: &str, zk_poseidon_hash: &str, version: &str) -> bool {
        self.v == CACHE_RECORD_VERSION
            && self.bundle_hash == bundle_hash
            && self.zk_poseidon_hash == zk_poseidon_hash
            && self.verification_version == version
            && self.cache_key == cache_key(bundle_hash, zk_poseidon_hash, version)
    }
}

/// `hex(SHA256(bundleHash | zkPoseidonHash | version))`
pub fn cache_key(bundle_hash: &str, zk_poseidon_hash: &str, version: &str) -> String {
    sha256_hex(format!("{bundle_hash}|{zk_poseidon_hash}|{version}").as_bytes())
}

/// Writes are idempotent and last-write-wins, so concurrent verifications of the
/// same bundle need no coordination here.
pub struct VerificationCache<S> {
    store: S,
}

impl<S: KeyValueStore> VerificationCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// A hit is returned only if the record describes exactly this lookup and has
    /// not expired at `now_pulse`.
    pub fn get(
        &self,
        bundle_hash: &str,
        zk_poseidon_hash: &str,
        version: &str,
        now_pulse: u64,
    ) -> Option<VerificationCacheRecord> {
        let key = cache_key(bundle_hash, zk_poseidon_hash, version);
        let Some(raw) = self.store.get(&storage_key(&key)) else {
            tracing::debug!(%key, "cache miss");
            return None;
        };
        let record: VerificationCacheRecord = match serde_json::from_str(&raw) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(%key, "unreadable cache record treated as miss: {e}");
                return None;
            }
        };
        if !record.matches(bundle_hash, zk_poseidon_hash, version) {
            tracing::warn!(%key, "cache record does not describe its own key, ignoring");
            return None;
        }
        if record.is_expired(now_pulse) {
            tracing::debug!(%key, now_pulse, "cache record expired");
            return None;
        }
        Some(record)
    }

    pub fn put(&self, record: &VerificationCacheRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.store.put(&storage_key(&record.cache_key), &json)
    }

    pub fn remove(&self, bundle_hash: &str, zk_poseidon_hash: &str, version: &str) -> Result<()> {
        self.store
            .remove(&storage_key(&cache_key(bundle_hash, zk_poseidon_hash, version)))
    }

    /// Every readable record, for inspection.
    pub fn records(&self) -> Vec<VerificationCacheRecord> {
        self.store
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(KEY_PREFIX))
            .filter_map(|k| self.store.get(&k))
            .filter_map(|raw| serde_json::from_str(&raw).ok())
            .collect()
    }
}

fn storage_key(cache_key: &str) -> String {
    format!("{KEY_PREFIX}{cache_key}")
}
