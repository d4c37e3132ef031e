use thiserror::Error;

#[derive(Error, Debug)]
pub enum SigilError {
    #[error("capsule hash mismatch: expected {expected}, computed {computed}")]
    CapsuleHashMismatch { expected: String, computed: String },

    #[error("bundle hash mismatch: expected {expected}, computed {computed}")]
    BundleHashMismatch { expected: String, computed: String },

    #[error("artifact hash mismatch: expected {expected}, computed {computed}")]
    ArtifactHashMismatch { expected: String, computed: String },

    #[error("author signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("credential mismatch: expected {expected}, got {got}")]
    CredentialMismatch { expected: String, got: String },

    #[error("client data mismatch: {0}")]
    ClientDataMismatch(String),

    #[error("rp id hash does not match '{rp_id}'")]
    RpIdMismatch { rp_id: String },

    /// The user cancelled the prompt or no usable credential exists. Retryable.
    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),

    /// The platform has no WebAuthn support. Not retryable this session.
    #[error("webauthn unavailable: {0}")]
    WebAuthnUnavailable(String),

    #[error("curve mismatch: {first} vs {second}")]
    CurveMismatch { first: String, second: String },

    #[error("zk public inputs contract violated: {0}")]
    PublicInputsContractViolated(String),

    #[error("zk proof invalid: {0}")]
    ZkProofInvalid(String),

    #[error("owner identity mismatch: expected {expected}, derived {derived}")]
    OwnerIdentityMismatch { expected: String, derived: String },

    #[error("bundle carries no author signature")]
    MissingAuthorSignature,

    #[error("a credential prompt is already in flight for '{0}'")]
    PromptInFlight(String),

    #[error("stage result superseded by newer input (generation {stale} < {current})")]
    Superseded { stale: u64, current: u64 },

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("cannot canonicalize non-finite number")]
    NonFiniteNumber,

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("cbor error: {0}")]
    Cbor(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SigilError {
    /// Whether retrying the same operation may succeed without any input change.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SigilError::CredentialUnavailable(_)
                | SigilError::PromptInFlight(_)
                | SigilError::Superseded { .. }
        )
    }

    /// Integrity violations: never downgraded to a soft outcome.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            SigilError::CapsuleHashMismatch { .. }
                | SigilError::BundleHashMismatch { .. }
                | SigilError::ArtifactHashMismatch { .. }
                | SigilError::SignatureInvalid(_)
                | SigilError::CredentialMismatch { .. }
                | SigilError::ClientDataMismatch(_)
                | SigilError::RpIdMismatch { .. }
                | SigilError::CurveMismatch { .. }
                | SigilError::PublicInputsContractViolated(_)
                | SigilError::ZkProofInvalid(_)
                | SigilError::OwnerIdentityMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SigilError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_recoverable_but_not_integrity() {
        let e = SigilError::CredentialUnavailable("NotAllowedError".into());
        assert!(e.is_recoverable());
        assert!(!e.is_integrity_failure());
    }

    #[test]
    fn mismatches_are_hard_failures() {
        let e = SigilError::BundleHashMismatch {
            expected: "aa".into(),
            computed: "bb".into(),
        };
        assert!(e.is_integrity_failure());
        assert!(!e.is_recoverable());
        assert!(!SigilError::MissingAuthorSignature.is_integrity_failure());
    }
}
