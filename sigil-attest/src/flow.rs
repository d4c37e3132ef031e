//! Sealing pipeline: artifact hash, bundle, author signature, attestation record.
//!
//! Each `seal` call is a new revision. Starting one cancels the prompt of any
//! revision still in flight, and a stage that finishes for a stale revision
//! yields `Superseded` instead of a result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use sigil_author::Signer;
use sigil_core::error::{Result, SigilError};
use sigil_proof::bundle::{attach_author_sig, build_bundle_root, seal_bundle, ProofBundle};
use sigil_proof::capsule::ProofCapsule;
use sigil_proof::svg::{artifact_hash, embed_metadata, StripMetadata};
use sigil_proof::zk::ZkInputs;
use tokio_util::sync::CancellationToken;

use crate::{AttestationMeta, AttestationRecord};

pub struct SealRequest {
    pub capsule: ProofCapsule,
    pub svg: String,
    pub zk: Option<ZkInputs>,
    pub now_pulse: u64,
}

#[derive(Debug, Clone)]
pub struct Sealed {
    pub generation: u64,
    pub bundle: ProofBundle,
    pub record: AttestationRecord,
    /// The input SVG with the signed bundle embedded in its metadata.
    pub svg: String,
}

pub struct SealingFlow<G> {
    signer: G,
    origin: String,
    rp_id: String,
    generation: AtomicU64,
    cancel: Mutex<CancellationToken>,
}

impl<G: Signer> SealingFlow<G> {
    pub fn new(signer: G, origin: &str, rp_id: &str) -> Self {
        Self {
            signer,
            origin: origin.to_string(),
            rp_id: rp_id.to_string(),
            generation: AtomicU64::new(0),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Invalidate whatever is in flight without starting anything new.
    pub fn cancel_in_flight(&self) -> u64 {
        self.begin().0
    }

    fn begin(&self) -> (u64, CancellationToken) {
        let mut slot = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        slot.cancel();
        *slot = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        (generation, slot.clone())
    }

    fn ensure_current(&self, generation: u64) -> Result<()> {
        let current = self.current_generation();
        if current != generation {
            tracing::debug!(stale = generation, current, "discarding superseded seal");
            return Err(SigilError::Superseded {
                stale: generation,
                current,
            });
        }
        Ok(())
    }

    pub async fn seal(&self, request: SealRequest) -> Result<Sealed> {
        let (generation, token) = self.begin();

        let svg_hash = artifact_hash(&request.svg, &StripMetadata);
        let root = build_bundle_root(&request.capsule, &svg_hash, request.zk)?;
        let mut bundle = seal_bundle(&root)?;
        let bundle_hash = bundle
            .bundle_hash()
            .ok_or(SigilError::MissingField("bundleHash"))?
            .to_string();
        self.ensure_current(generation)?;

        let identity_key = &request.capsule.identity_key;
        let sig = tokio::select! {
            _ = token.cancelled() => {
                return Err(SigilError::Superseded {
                    stale: generation,
                    current: self.current_generation(),
                });
            }
            signed = self.signer.sign_bundle(identity_key, &bundle_hash) => signed?,
        };
        self.ensure_current(generation)?;

        attach_author_sig(&mut bundle, sig.to_value()?);
        let record = AttestationRecord::new(
            &bundle,
            sig,
            AttestationMeta {
                origin: self.origin.clone(),
                rp_id: self.rp_id.clone(),
                created_at_pulse: request.now_pulse,
            },
        )?;
        let svg = embed_metadata(&request.svg, &bundle.to_json()?)?;
        tracing::info!(bundle = %bundle_hash, generation, "sealed");

        Ok(Sealed {
            generation,
            bundle,
            record,
            svg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sigil_author::signer::MemorySigner;
    use sigil_author::sig::AuthorSig;
    use sigil_proof::capsule::DayLabel;
    use std::time::Duration;

    use crate::config::VerifierConfig;
    use crate::verify::{BundleVerifier, SealStatus};

    const RP: &str = "sigil.example";
    const SVG: &str = "<svg xmlns=\"http://www.w3.org/2000/svg\"><rect width=\"2\"/></svg>";

    struct SlowSigner {
        inner: MemorySigner,
        delay: Duration,
    }

    #[async_trait]
    impl Signer for SlowSigner {
        async fn sign_bundle(&self, identity_key: &str, bundle_hash: &str) -> Result<AuthorSig> {
            tokio::time::sleep(self.delay).await;
            self.inner.sign_bundle(identity_key, bundle_hash).await
        }
    }

    fn request(pulse: u64) -> SealRequest {
        SealRequest {
            capsule: ProofCapsule::new(pulse, DayLabel::Heart, "sig123", "phi123"),
            svg: SVG.to_string(),
            zk: None,
            now_pulse: pulse,
        }
    }

    #[tokio::test]
    async fn sealed_svg_verifies() {
        let flow = SealingFlow::new(
            MemorySigner::generate(RP).unwrap(),
            "https://sigil.example",
            RP,
        );
        let sealed = flow.seal(request(1000)).await.unwrap();
        assert_eq!(sealed.generation, 1);
        sealed.record.verify_self().unwrap();

        let verifier = BundleVerifier::new(&VerifierConfig {
            rp_id: Some(RP.into()),
            ..Default::default()
        });
        let report = verifier.verify_svg(&sealed.svg, 1000).unwrap();
        assert_eq!(report.author, SealStatus::Verified);
        assert_eq!(report.bundle_hash.as_deref(), sealed.bundle.bundle_hash());
    }

    #[tokio::test]
    async fn newer_revision_supersedes_in_flight_prompt() {
        let flow = SealingFlow::new(
            SlowSigner {
                inner: MemorySigner::generate(RP).unwrap(),
                delay: Duration::from_millis(30),
            },
            "https://sigil.example",
            RP,
        );
        let (first, second) = tokio::join!(flow.seal(request(1000)), flow.seal(request(1001)));
        assert!(matches!(
            first,
            Err(SigilError::Superseded { stale: 1, current: 2 })
        ));
        let second = second.unwrap();
        assert_eq!(second.generation, 2);
        assert_eq!(second.record.reference.pulse, 1001);
    }

    #[tokio::test]
    async fn explicit_cancel() {
        let flow = SealingFlow::new(
            SlowSigner {
                inner: MemorySigner::generate(RP).unwrap(),
                delay: Duration::from_millis(30),
            },
            "https://sigil.example",
            RP,
        );
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            flow.cancel_in_flight();
        };
        let (sealed, _) = tokio::join!(flow.seal(request(1000)), cancel);
        assert!(matches!(sealed, Err(SigilError::Superseded { .. })));
        assert_eq!(flow.current_generation(), 2);
    }
}
