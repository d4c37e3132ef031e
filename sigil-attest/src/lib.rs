pub mod cache;
pub mod config;
pub mod flow;
pub mod verify;

use serde::{Deserialize, Serialize};
use sigil_author::challenge::kas_challenge_b64;
use sigil_author::sig::{verify_author_sig, AuthorSig, VerifyOptions};
use sigil_author::ChallengeForm;
use sigil_core::error::{Result, SigilError};
use sigil_proof::bundle::{build_bundle_unsigned, hash_bundle, verify_capsule_hash, ProofBundle};
use sigil_proof::capsule::DayLabel;

pub use cache::{VerificationCache, VerificationCacheRecord};
pub use config::VerifierConfig;
pub use flow::SealingFlow;
pub use verify::{BundleVerifier, SealStatus, VerificationReport};

/// A portable record binding one author signature to one bundle.
///
/// Only obtainable through [`AttestationRecord::new`] (or deserialization followed
/// by [`AttestationRecord::verify_self`]), so a constructed record is always
/// internally consistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationRecord {
    #[serde(rename = "ref")]
    pub reference: BundleReference,
    pub author_sig: AuthorSig,
    pub meta: AttestationMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleReference {
    /// The hash the bundle claims.
    pub bundle_hash: String,
    /// The hash recomputed from the bundle's unsigned projection.
    pub bundle_object_hash: String,
    pub capsule_hash: String,
    pub svg_hash: String,
    pub verifier_slug: String,
    pub pulse: u64,
    pub day_label: DayLabel,
    pub identity_key: String,
    pub identity_signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationMeta {
    pub origin: String,
    pub rp_id: String,
    pub created_at_pulse: u64,
}

impl AttestationRecord {
    pub fn new(bundle: &ProofBundle, author_sig: AuthorSig, meta: AttestationMeta) -> Result<Self> {
        let capsule = verify_capsule_hash(bundle)?;
        let bundle_hash = bundle
            .bundle_hash()
            .ok_or(SigilError::MissingField("bundleHash"))?
            .to_string();
        let bundle_object_hash = hash_bundle(&build_bundle_unsigned(bundle))?;

        let record = Self {
            reference: BundleReference {
                bundle_hash,
                bundle_object_hash,
                capsule_hash: bundle.capsule_hash()?.to_string(),
                svg_hash: bundle.svg_hash()?.to_string(),
                verifier_slug: capsule.verifier_slug.clone(),
                pulse: capsule.pulse,
                day_label: capsule.day_label,
                identity_key: capsule.identity_key,
                identity_signature: capsule.identity_signature,
            },
            author_sig,
            meta,
        };
        record.check_bindings()?;
        Ok(record)
    }

    // challenge is the raw bundle hash, and the claimed hash is the real one
    fn check_bindings(&self) -> Result<()> {
        let r = &self.reference;
        if r.bundle_object_hash != r.bundle_hash {
            return Err(SigilError::BundleHashMismatch {
                expected: r.bundle_hash.clone(),
                computed: r.bundle_object_hash.clone(),
            });
        }
        if self.author_sig.challenge != kas_challenge_b64(&r.bundle_hash)? {
            return Err(SigilError::ClientDataMismatch(
                "author signature challenge is not the bundle hash".into(),
            ));
        }
        Ok(())
    }

    /// Re-check both bindings and the signature itself.
    pub fn verify_self(&self) -> Result<()> {
        self.check_bindings()?;
        verify_author_sig(
            &self.author_sig,
            &self.reference.bundle_hash,
            &VerifyOptions {
                rp_id: Some(self.meta.rp_id.clone()),
                challenge_form: ChallengeForm::BundleHash,
                ..Default::default()
            },
        )
    }

    /// Whether this record was made for `bundle`.
    pub fn matches_bundle(&self, bundle: &ProofBundle) -> Result<()> {
        let computed = hash_bundle(&build_bundle_unsigned(bundle))?;
        if computed != self.reference.bundle_hash {
            return Err(SigilError::BundleHashMismatch {
                expected: self.reference.bundle_hash.clone(),
                computed,
            });
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and fully re-verify a record from elsewhere.
    pub fn from_json(json: &str) -> Result<Self> {
        let record: Self = serde_json::from_str(json)
            .map_err(|e| SigilError::MalformedPayload(format!("attestation record: {e}")))?;
        record.verify_self()?;
        Ok(record)
    }
}
