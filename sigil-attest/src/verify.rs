//! End-to-end verification of a bundle or a sigil SVG.
//!
//! Order: capsule hash, bundle hash, cache lookup, ZK input binding and curve,
//! Groth16 proof, author signature. A cache hit skips only the Poseidon binding
//! and the pairing check. Any mismatch is an `Err`; a seal that is simply
//! absent shows up as [`SealStatus::NotPresent`] in the report.

use std::sync::Arc;

use serde::Serialize;
use sigil_author::sig::{verify_author_sig, AuthorSig, VerifyOptions};
use sigil_core::error::{Result, SigilError};
use sigil_core::store::KeyValueStore;
use sigil_proof::bundle::{verify_bundle_hash, verify_capsule_hash, ProofBundle};
use sigil_proof::capsule::ProofCapsule;
use sigil_proof::svg::{artifact_hash, parse_embedded, EmbeddedPayload, StripMetadata};
use sigil_proof::zk::reconcile::CURVE_BN128;
use sigil_proof::zk::{
    assert_zk_public_inputs_contract, reconcile_curve, zk_poseidon_hash, Groth16Verifier,
};

use crate::cache::{CachedResult, VerificationCache, VerificationCacheRecord};
use crate::config::VerifierConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SealStatus {
    Verified,
    NotPresent,
    /// A proof is present but no verification key was configured.
    Unchecked,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub capsule: ProofCapsule,
    pub capsule_hash: String,
    pub svg_hash: String,
    /// Absent for a bare capsule embed.
    pub bundle_hash: Option<String>,
    pub author: SealStatus,
    pub zk: SealStatus,
    pub zk_curve: Option<String>,
    pub cached: bool,
}

pub struct BundleVerifier {
    author_opts: VerifyOptions,
    protocol_version: String,
    require_author_sig: bool,
    groth16: Option<Groth16Verifier>,
    cache: Option<VerificationCache<Arc<dyn KeyValueStore>>>,
}

impl BundleVerifier {
    pub fn new(config: &VerifierConfig) -> Self {
        Self {
            author_opts: VerifyOptions {
                rp_id: config.rp_id.clone(),
                challenge_form: config.challenge_form(),
                ..Default::default()
            },
            protocol_version: config.protocol_version.clone(),
            require_author_sig: false,
            groth16: None,
            cache: None,
        }
    }

    pub fn with_groth16(mut self, verifier: Groth16Verifier) -> Self {
        self.groth16 = Some(verifier);
        self
    }

    pub fn with_cache(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.cache = Some(VerificationCache::new(store));
        self
    }

    pub fn require_author_sig(mut self, required: bool) -> Self {
        self.require_author_sig = required;
        self
    }

    pub fn verify_bundle(
        &self,
        bundle: &ProofBundle,
        now_pulse: u64,
    ) -> Result<VerificationReport> {
        let capsule = verify_capsule_hash(bundle)?;
        let capsule_hash = bundle.capsule_hash()?.to_string();
        let svg_hash = bundle.svg_hash()?.to_string();
        let bundle_hash = verify_bundle_hash(bundle)?;
        let zk_hash = bundle.zk_poseidon_hash().map(str::to_string);

        let author_sig = bundle
            .author_sig()
            .map(AuthorSig::from_value)
            .transpose()?;
        if author_sig.is_none() && self.require_author_sig {
            return Err(SigilError::MissingAuthorSignature);
        }
        let zk_present = zk_hash.is_some() || bundle.zk_proof().is_some();

        let cache_zk = zk_hash.as_deref().unwrap_or("");
        let cached = self.cached_ok(&bundle_hash, cache_zk, zk_present, now_pulse);

        assert_zk_public_inputs_contract(zk_hash.as_deref(), bundle.zk_public_inputs())?;
        if let (Some(h), false) = (&zk_hash, cached) {
            let expected = zk_poseidon_hash(&capsule_hash, &svg_hash)?;
            if *h != expected {
                return Err(SigilError::ZkProofInvalid(
                    "zkPoseidonHash does not bind this capsule and artifact".into(),
                ));
            }
        }

        let reconciled = reconcile_curve(
            bundle.zk_proof(),
            bundle.zk_meta()?.as_ref(),
            bundle.nested_root_zk_meta()?.as_ref(),
        )?;

        let zk = match (bundle.zk_proof(), &zk_hash) {
            (None, None) => SealStatus::NotPresent,
            (None, Some(_)) => SealStatus::Unchecked,
            (Some(_), None) => {
                return Err(SigilError::PublicInputsContractViolated(
                    "zkProof present without zkPoseidonHash".into(),
                ))
            }
            (Some(proof), Some(h)) => match &self.groth16 {
                None => SealStatus::Unchecked,
                Some(verifier) => {
                    if let Some(curve) = &reconciled.curve {
                        if curve != CURVE_BN128 {
                            return Err(SigilError::CurveMismatch {
                                first: curve.clone(),
                                second: CURVE_BN128.to_string(),
                            });
                        }
                    }
                    if !cached {
                        verifier.verify(proof, &[h.clone(), h.clone()])?;
                    }
                    SealStatus::Verified
                }
            },
        };

        // the cache covers the hash and proof checks only; the signature is
        // outside bundleHash and is checked on every pass
        let author = match &author_sig {
            Some(sig) => {
                verify_author_sig(sig, &bundle_hash, &self.author_opts)?;
                SealStatus::Verified
            }
            None => SealStatus::NotPresent,
        };

        if let (Some(cache), false) = (&self.cache, cached) {
            if zk != SealStatus::Unchecked {
                let record = VerificationCacheRecord::new(
                    &bundle_hash,
                    cache_zk,
                    &self.protocol_version,
                    now_pulse,
                    None,
                    CachedResult::Ok,
                );
                if let Err(e) = cache.put(&record) {
                    tracing::warn!(
                        bundle = %bundle_hash,
                        "failed to write verification cache: {e}"
                    );
                }
            }
        }

        Ok(VerificationReport {
            capsule,
            capsule_hash,
            svg_hash,
            bundle_hash: Some(bundle_hash),
            author,
            zk,
            zk_curve: reconciled.curve,
            cached,
        })
    }

    /// An unexpired `ok` record for this bundle. A verifier without a
    /// verification key never trusts a record for a bundle carrying a proof.
    fn cached_ok(
        &self,
        bundle_hash: &str,
        zk_hash: &str,
        zk_present: bool,
        now_pulse: u64,
    ) -> bool {
        if zk_present && self.groth16.is_none() {
            return false;
        }
        let Some(cache) = &self.cache else {
            return false;
        };
        match cache.get(bundle_hash, zk_hash, &self.protocol_version, now_pulse) {
            Some(hit) if hit.result == CachedResult::Ok => {
                tracing::debug!(bundle = %bundle_hash, "verification cache hit");
                true
            }
            _ => false,
        }
    }

    /// Verify an SVG carrying its own bundle, including that the bundle's
    /// `svgHash` matches the artifact it is embedded in.
    pub fn verify_svg(&self, svg: &str, now_pulse: u64) -> Result<VerificationReport> {
        let computed = artifact_hash(svg, &StripMetadata);
        match parse_embedded(svg)? {
            EmbeddedPayload::Bundle(bundle) => {
                let claimed = bundle.svg_hash()?;
                if claimed != computed {
                    return Err(SigilError::ArtifactHashMismatch {
                        expected: claimed.to_string(),
                        computed,
                    });
                }
                self.verify_bundle(&bundle, now_pulse)
            }
            EmbeddedPayload::Capsule(capsule) => {
                if self.require_author_sig {
                    return Err(SigilError::MissingAuthorSignature);
                }
                Ok(VerificationReport {
                    capsule_hash: capsule.hash()?,
                    capsule,
                    svg_hash: computed,
                    bundle_hash: None,
                    author: SealStatus::NotPresent,
                    zk: SealStatus::NotPresent,
                    zk_curve: None,
                    cached: false,
                })
            }
        }
    }
}
