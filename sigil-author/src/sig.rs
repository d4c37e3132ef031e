use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::{EncodedPoint, FieldBytes};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sigil_core::cbor::parse_auth_data_header;
use sigil_core::digest::{base64url_decode, sha256};
use sigil_core::error::{Result, SigilError};
use sigil_core::jwk::EcJwk;

use crate::challenge::{expected_challenges, ChallengeForm};

pub const KAS_VERSION: &str = "KAS-1";
pub const KAS_ALG: &str = "webauthn-es256";

/// A WebAuthn assertion over a bundle hash, with everything needed to verify it offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorSig {
    pub v: String,
    pub alg: String,
    pub cred_id: String,
    pub pub_key_jwk: EcJwk,
    pub challenge: String,
    pub signature: String,
    pub authenticator_data: String,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
}

impl AuthorSig {
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| SigilError::MalformedPayload(format!("authorSig: {e}")))
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Enforce `authenticatorData[..32] == SHA256(rp_id)`.
    pub rp_id: Option<String>,
    pub challenge_form: ChallengeForm,
    /// Reject signatures made with any other credential.
    pub expected_credential_id: Option<String>,
    pub require_user_verification: bool,
}

#[derive(Deserialize)]
struct ClientData {
    #[serde(rename = "type")]
    kind: String,
    challenge: String,
}

/// Full KAS-1 verification against a bundle hash recomputed by the caller.
pub fn verify_author_sig(sig: &AuthorSig, bundle_hash: &str, opts: &VerifyOptions) -> Result<()> {
    if sig.v != KAS_VERSION {
        return Err(SigilError::MalformedPayload(format!(
            "unsupported author signature version '{}'",
            sig.v
        )));
    }

    if let Some(expected) = &opts.expected_credential_id {
        if *expected != sig.cred_id {
            return Err(SigilError::CredentialMismatch {
                expected: expected.clone(),
                got: sig.cred_id.clone(),
            });
        }
    }

    let accepted = expected_challenges(bundle_hash, opts.challenge_form)?;
    if !accepted.contains(&sig.challenge) {
        return Err(SigilError::ClientDataMismatch(
            "challenge is not derived from the bundle hash".into(),
        ));
    }

    let client_data_bytes = base64url_decode(&sig.client_data_json)?;
    let client_data: ClientData = serde_json::from_slice(&client_data_bytes)
        .map_err(|e| SigilError::ClientDataMismatch(format!("unparsable clientDataJSON: {e}")))?;
    if client_data.kind != "webauthn.get" {
        return Err(SigilError::ClientDataMismatch(format!(
            "type is '{}', expected webauthn.get",
            client_data.kind
        )));
    }
    if client_data.challenge.trim_end_matches('=') != sig.challenge {
        return Err(SigilError::ClientDataMismatch(
            "clientData challenge differs from signed challenge".into(),
        ));
    }

    let auth_data = base64url_decode(&sig.authenticator_data)?;
    let header = parse_auth_data_header(&auth_data)?;
    if let Some(rp_id) = &opts.rp_id {
        if header.rp_id_hash != sha256(rp_id.as_bytes()) {
            return Err(SigilError::RpIdMismatch {
                rp_id: rp_id.clone(),
            });
        }
    }
    if opts.require_user_verification && !header.user_verified() {
        return Err(SigilError::SignatureInvalid(
            "user verification flag not set".into(),
        ));
    }

    let key = verifying_key(&sig.pub_key_jwk)?;
    let signature = base64url_decode(&sig.signature)?;
    let mut message = auth_data;
    message.extend_from_slice(&sha256(&client_data_bytes));

    if verify_der_or_raw(&key, &message, &signature) {
        Ok(())
    } else {
        Err(SigilError::SignatureInvalid(
            "ecdsa verification failed".into(),
        ))
    }
}

/// Boolean form for callers that only need valid/invalid.
pub fn is_valid_author_sig(sig: &AuthorSig, bundle_hash: &str, opts: &VerifyOptions) -> bool {
    verify_author_sig(sig, bundle_hash, opts).is_ok()
}

pub fn verifying_key(jwk: &EcJwk) -> Result<VerifyingKey> {
    let (x, y) = jwk.coordinates()?;
    let point =
        EncodedPoint::from_affine_coordinates(&FieldBytes::from(x), &FieldBytes::from(y), false);
    VerifyingKey::from_encoded_point(&point)
        .map_err(|_| SigilError::MalformedPayload("public key is not a P-256 point".into()))
}

pub fn jwk_from_verifying_key(key: &VerifyingKey) -> Result<EcJwk> {
    let point = key.to_encoded_point(false);
    let (Some(x), Some(y)) = (point.x(), point.y()) else {
        return Err(SigilError::MalformedPayload("identity point has no coordinates".into()));
    };
    let mut xb = [0u8; 32];
    let mut yb = [0u8; 32];
    xb.copy_from_slice(x);
    yb.copy_from_slice(y);
    Ok(EcJwk::p256(&xb, &yb))
}

// authenticators emit DER; some bridges hand over raw r||s
fn verify_der_or_raw(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> bool {
    let candidates = [
        Signature::from_der(signature).ok(),
        (signature.len() == 64)
            .then(|| Signature::from_slice(signature).ok())
            .flatten(),
    ];
    candidates.into_iter().flatten().any(|sig| {
        let sig = sig.normalize_s().unwrap_or(sig);
        key.verify(message, &sig).is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{MemorySigner, Signer};
    use sigil_core::digest::{base64url_encode, sha256_hex};

    const RP: &str = "sigil.example";

    async fn signed(bundle_hash: &str) -> (MemorySigner, AuthorSig) {
        let signer = MemorySigner::generate(RP).unwrap();
        let sig = signer.sign_bundle("phi123", bundle_hash).await.unwrap();
        (signer, sig)
    }

    fn opts() -> VerifyOptions {
        VerifyOptions {
            rp_id: Some(RP.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn valid_signature_verifies() {
        let h = sha256_hex(b"bundle");
        let (_, sig) = signed(&h).await;
        verify_author_sig(&sig, &h, &opts()).unwrap();
        assert!(is_valid_author_sig(&sig, &h, &VerifyOptions::default()));
    }

    #[tokio::test]
    async fn flipped_authenticator_data_byte_fails() {
        let h = sha256_hex(b"bundle");
        let (_, mut sig) = signed(&h).await;
        let mut ad = base64url_decode(&sig.authenticator_data).unwrap();
        ad[33] ^= 0x01;
        sig.authenticator_data = base64url_encode(&ad);
        assert!(matches!(
            verify_author_sig(&sig, &h, &opts()),
            Err(SigilError::SignatureInvalid(_))
        ));
        assert!(!is_valid_author_sig(&sig, &h, &opts()));
    }

    #[tokio::test]
    async fn wrong_bundle_hash_fails_on_challenge() {
        let h = sha256_hex(b"bundle");
        let (_, sig) = signed(&h).await;
        let other = sha256_hex(b"other");
        assert!(matches!(
            verify_author_sig(&sig, &other, &opts()),
            Err(SigilError::ClientDataMismatch(_))
        ));
    }

    #[tokio::test]
    async fn rp_id_enforced() {
        let h = sha256_hex(b"bundle");
        let (_, sig) = signed(&h).await;
        let mut o = opts();
        o.rp_id = Some("evil.example".into());
        assert!(matches!(
            verify_author_sig(&sig, &h, &o),
            Err(SigilError::RpIdMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn wrong_type_and_wrong_credential() {
        let h = sha256_hex(b"bundle");
        let (_, sig) = signed(&h).await;

        let mut o = opts();
        o.expected_credential_id = Some("someone-else".into());
        assert!(matches!(
            verify_author_sig(&sig, &h, &o),
            Err(SigilError::CredentialMismatch { .. })
        ));

        let mut create = sig.clone();
        let cd = serde_json::json!({ "type": "webauthn.create", "challenge": sig.challenge });
        create.client_data_json = base64url_encode(&serde_json::to_vec(&cd).unwrap());
        assert!(matches!(
            verify_author_sig(&create, &h, &opts()),
            Err(SigilError::ClientDataMismatch(_))
        ));
    }

    #[tokio::test]
    async fn raw_signature_encoding_accepted() {
        let h = sha256_hex(b"bundle");
        let (_, mut sig) = signed(&h).await;
        let der = base64url_decode(&sig.signature).unwrap();
        let raw = Signature::from_der(&der).unwrap().to_bytes();
        sig.signature = base64url_encode(&raw);
        verify_author_sig(&sig, &h, &opts()).unwrap();
    }

    #[tokio::test]
    async fn other_key_fails() {
        let h = sha256_hex(b"bundle");
        let (_, mut sig) = signed(&h).await;
        let (other, _) = signed(&h).await;
        sig.pub_key_jwk = jwk_from_verifying_key(&other.verifying_key()).unwrap();
        assert!(matches!(
            verify_author_sig(&sig, &h, &opts()),
            Err(SigilError::SignatureInvalid(_))
        ));
    }

    #[tokio::test]
    async fn domain_form_needs_opt_in() {
        let h = sha256_hex(b"bundle");
        let signer = MemorySigner::generate(RP).unwrap();
        let challenge = crate::challenge::kas_domain_challenge(&h);
        let sig = signer.sign_challenge(&challenge).unwrap();
        assert!(verify_author_sig(&sig, &h, &opts()).is_err());
        let mut o = opts();
        o.challenge_form = ChallengeForm::Either;
        verify_author_sig(&sig, &h, &o).unwrap();
    }
}
