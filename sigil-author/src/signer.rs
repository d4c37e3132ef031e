use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use p256::ecdsa::{SigningKey, VerifyingKey};
use serde::Deserialize;
use sigil_core::cbor::{parse_attestation_object, parse_attested_credential, COSE_ALG_ES256};
use sigil_core::digest::{base64url_decode, base64url_encode, sha256};
use sigil_core::error::{Result, SigilError};
use sigil_core::jwk::EcJwk;
use sigil_core::store::KeyValueStore;

use crate::authenticator::{
    AssertionOptions, Authenticator, AuthenticatorError, CreationOptions, UserVerification,
};
use crate::challenge::{kas_challenge, user_handle};
use crate::gate::PromptGate;
use crate::passkey::{PasskeyRecord, PasskeyStore};
use crate::sig::{verify_author_sig, AuthorSig, VerifyOptions, KAS_ALG, KAS_VERSION};
use crate::software::{
    assertion_auth_data, client_data_json, coordinates, random_signing_key, sign_assertion,
};

pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Produces an author signature over a bundle hash for an identity.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign_bundle(&self, identity_key: &str, bundle_hash: &str) -> Result<AuthorSig>;
}

#[derive(Debug, Clone)]
pub struct SignerConfig {
    pub rp_id: String,
    pub rp_name: String,
    pub prompt_timeout: Duration,
}

impl SignerConfig {
    pub fn new(rp_id: &str) -> Self {
        Self {
            rp_id: rp_id.to_string(),
            rp_name: "Sigil".to_string(),
            prompt_timeout: DEFAULT_PROMPT_TIMEOUT,
        }
    }
}

#[derive(Deserialize)]
struct CreateClientData {
    #[serde(rename = "type")]
    kind: String,
    challenge: String,
}

/// Signs with a platform passkey, registering one per identity on demand.
pub struct PasskeySigner<A, S> {
    authenticator: A,
    passkeys: PasskeyStore<S>,
    gate: PromptGate,
    config: SignerConfig,
}

impl<A: Authenticator, S: KeyValueStore> PasskeySigner<A, S> {
    pub fn new(authenticator: A, store: S, config: SignerConfig) -> Self {
        Self {
            authenticator,
            passkeys: PasskeyStore::new(store),
            gate: PromptGate::new(),
            config,
        }
    }

    pub fn passkeys(&self) -> &PasskeyStore<S> {
        &self.passkeys
    }

    pub fn gate(&self) -> &PromptGate {
        &self.gate
    }

    async fn prompt<T, F>(&self, ceremony: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, AuthenticatorError>> + Send,
    {
        match tokio::time::timeout(self.config.prompt_timeout, ceremony).await {
            Ok(outcome) => outcome.map_err(SigilError::from),
            Err(_) => Err(SigilError::CredentialUnavailable(format!(
                "no response within {}s",
                self.config.prompt_timeout.as_secs()
            ))),
        }
    }

    /// Create a new ES256 credential for `identity_key` and persist it.
    pub async fn register(&self, identity_key: &str) -> Result<PasskeyRecord> {
        let _guard = self.gate.try_acquire(identity_key)?;

        let mut challenge = vec![0u8; 32];
        getrandom::fill(&mut challenge).map_err(|e| SigilError::Encoding(format!("rng: {e}")))?;
        let handle = user_handle(identity_key);
        let options = CreationOptions {
            rp_id: self.config.rp_id.clone(),
            rp_name: self.config.rp_name.clone(),
            user_handle: handle,
            user_name: identity_key.to_string(),
            challenge: challenge.clone(),
            algorithms: vec![COSE_ALG_ES256],
            user_verification: UserVerification::Required,
            resident_key: true,
            timeout: self.config.prompt_timeout,
        };

        let created = self
            .prompt(self.authenticator.create_credential(&options))
            .await?;

        let client_data: CreateClientData = serde_json::from_slice(&created.client_data_json)
            .map_err(|e| SigilError::ClientDataMismatch(format!("registration clientData: {e}")))?;
        if client_data.kind != "webauthn.create"
            || client_data.challenge.trim_end_matches('=') != base64url_encode(&challenge)
        {
            return Err(SigilError::ClientDataMismatch(
                "registration clientData does not match the request".into(),
            ));
        }

        let attestation = parse_attestation_object(&created.attestation_object)?;
        let credential = parse_attested_credential(&attestation.auth_data)?;
        let header = sigil_core::cbor::parse_auth_data_header(&attestation.auth_data)?;
        if header.rp_id_hash != sha256(self.config.rp_id.as_bytes()) {
            return Err(SigilError::RpIdMismatch {
                rp_id: self.config.rp_id.clone(),
            });
        }
        if !header.user_verified() {
            return Err(SigilError::CredentialUnavailable(
                "authenticator did not verify the user".into(),
            ));
        }
        if credential.credential_id != created.credential_id {
            return Err(SigilError::CredentialMismatch {
                expected: base64url_encode(&created.credential_id),
                got: base64url_encode(&credential.credential_id),
            });
        }

        let record = PasskeyRecord::new(
            identity_key,
            base64url_encode(&credential.credential_id),
            credential.public_key,
            &self.config.rp_id,
            base64url_encode(&handle),
        );
        self.passkeys.put(&record)?;
        tracing::info!(identity = identity_key, cred_id = %record.cred_id, "registered passkey");
        Ok(record)
    }

    pub async fn ensure_registered(&self, identity_key: &str) -> Result<PasskeyRecord> {
        match self.passkeys.get(identity_key) {
            Some(record) if record.rp_id == self.config.rp_id => Ok(record),
            _ => self.register(identity_key).await,
        }
    }
}

#[async_trait]
impl<A: Authenticator, S: KeyValueStore> Signer for PasskeySigner<A, S> {
    async fn sign_bundle(&self, identity_key: &str, bundle_hash: &str) -> Result<AuthorSig> {
        let challenge = kas_challenge(bundle_hash)?;
        let record = self.passkeys.get(identity_key).ok_or_else(|| {
            SigilError::CredentialUnavailable(format!("no passkey registered for {identity_key}"))
        })?;
        let stored_id = base64url_decode(&record.cred_id)?;

        let _guard = self.gate.try_acquire(identity_key)?;
        let options = AssertionOptions {
            rp_id: self.config.rp_id.clone(),
            challenge: challenge.to_vec(),
            allow_credentials: vec![stored_id.clone()],
            user_verification: UserVerification::Required,
            timeout: self.config.prompt_timeout,
        };
        let assertion = self
            .prompt(self.authenticator.get_assertion(&options))
            .await?;

        if assertion.credential_id != stored_id {
            return Err(SigilError::CredentialMismatch {
                expected: record.cred_id.clone(),
                got: base64url_encode(&assertion.credential_id),
            });
        }

        let sig = AuthorSig {
            v: KAS_VERSION.to_string(),
            alg: KAS_ALG.to_string(),
            cred_id: record.cred_id.clone(),
            pub_key_jwk: record.pub_key_jwk.clone(),
            challenge: base64url_encode(&challenge),
            signature: base64url_encode(&assertion.signature),
            authenticator_data: base64url_encode(&assertion.authenticator_data),
            client_data_json: base64url_encode(&assertion.client_data_json),
        };

        // never hand out a signature that would not verify
        verify_author_sig(
            &sig,
            bundle_hash,
            &VerifyOptions {
                rp_id: Some(self.config.rp_id.clone()),
                expected_credential_id: Some(record.cred_id),
                require_user_verification: true,
                ..Default::default()
            },
        )?;
        tracing::debug!(identity = identity_key, "bundle signed");
        Ok(sig)
    }
}

/// Key-in-memory signer producing well-formed KAS-1 signatures without any prompt.
pub struct MemorySigner {
    key: SigningKey,
    cred_id: Vec<u8>,
    rp_id: String,
    origin: String,
    counter: AtomicU32,
}

impl MemorySigner {
    pub fn generate(rp_id: &str) -> Result<Self> {
        let mut cred_id = vec![0u8; 16];
        getrandom::fill(&mut cred_id).map_err(|e| SigilError::Encoding(format!("rng: {e}")))?;
        Ok(Self {
            key: random_signing_key()?,
            cred_id,
            rp_id: rp_id.to_string(),
            origin: format!("https://{rp_id}"),
            counter: AtomicU32::new(0),
        })
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey::from(&self.key)
    }

    pub fn public_jwk(&self) -> Result<EcJwk> {
        let (x, y) = coordinates(&self.key)?;
        Ok(EcJwk::p256(&x, &y))
    }

    pub fn cred_id(&self) -> String {
        base64url_encode(&self.cred_id)
    }

    /// Sign an arbitrary 32-byte challenge.
    pub fn sign_challenge(&self, challenge: &[u8; 32]) -> Result<AuthorSig> {
        let count = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let auth_data = assertion_auth_data(&self.rp_id, true, count);
        let client_data = client_data_json("webauthn.get", challenge, &self.origin)?;
        let signature = sign_assertion(&self.key, &auth_data, &client_data);
        Ok(AuthorSig {
            v: KAS_VERSION.to_string(),
            alg: KAS_ALG.to_string(),
            cred_id: self.cred_id(),
            pub_key_jwk: self.public_jwk()?,
            challenge: base64url_encode(challenge),
            signature: base64url_encode(&signature),
            authenticator_data: base64url_encode(&auth_data),
            client_data_json: base64url_encode(&client_data),
        })
    }
}

#[async_trait]
impl Signer for MemorySigner {
    async fn sign_bundle(&self, _identity_key: &str, bundle_hash: &str) -> Result<AuthorSig> {
        self.sign_challenge(&kas_challenge(bundle_hash)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::SoftwareAuthenticator;
    use sigil_core::digest::sha256_hex;
    use sigil_core::store::MemoryStore;
    use std::sync::Arc;

    const RP: &str = "sigil.example";

    fn signer(
        auth: SoftwareAuthenticator,
    ) -> PasskeySigner<SoftwareAuthenticator, Arc<MemoryStore>> {
        PasskeySigner::new(auth, Arc::new(MemoryStore::new()), SignerConfig::new(RP))
    }

    #[tokio::test]
    async fn register_then_sign() {
        let s = signer(SoftwareAuthenticator::new("https://sigil.example"));
        let record = s.register("phi123").await.unwrap();
        assert_eq!(s.passkeys().get("phi123"), Some(record.clone()));
        assert_eq!(s.ensure_registered("phi123").await.unwrap(), record);

        let h = sha256_hex(b"bundle");
        let sig = s.sign_bundle("phi123", &h).await.unwrap();
        assert_eq!(sig.cred_id, record.cred_id);
        assert!(sig.pub_key_jwk.same_key(&record.pub_key_jwk));
        verify_author_sig(
            &sig,
            &h,
            &VerifyOptions {
                rp_id: Some(RP.into()),
                require_user_verification: true,
                ..Default::default()
            },
        )
        .unwrap();
    }

    #[tokio::test]
    async fn sign_without_registration() {
        let s = signer(SoftwareAuthenticator::new("https://sigil.example"));
        let h = sha256_hex(b"bundle");
        assert!(matches!(
            s.sign_bundle("phi123", &h).await,
            Err(SigilError::CredentialUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_prompts_are_rejected() {
        let s = signer(
            SoftwareAuthenticator::new("https://sigil.example")
                .with_delay(Duration::from_millis(20)),
        );
        s.register("phi123").await.unwrap();
        let h = sha256_hex(b"bundle");
        let (a, b) = tokio::join!(s.sign_bundle("phi123", &h), s.sign_bundle("phi123", &h));
        assert!(a.is_ok());
        assert!(matches!(b, Err(SigilError::PromptInFlight(_))));
        assert!(!s.gate().is_in_flight("phi123"));
    }

    #[tokio::test]
    async fn dismissed_prompt_is_recoverable() {
        let s = signer(SoftwareAuthenticator::new("https://sigil.example"));
        s.register("phi123").await.unwrap();
        s.authenticator.fail_next(AuthenticatorError::NotAllowed);
        let h = sha256_hex(b"bundle");
        let err = s.sign_bundle("phi123", &h).await.unwrap_err();
        assert!(matches!(err, SigilError::CredentialUnavailable(_)));
        assert!(err.is_recoverable());
        s.sign_bundle("phi123", &h).await.unwrap();
    }

    #[tokio::test]
    async fn prompt_timeout() {
        let auth = SoftwareAuthenticator::new("https://sigil.example")
            .with_delay(Duration::from_millis(200));
        let mut config = SignerConfig::new(RP);
        config.prompt_timeout = Duration::from_millis(20);
        let s = PasskeySigner::new(auth, MemoryStore::new(), config);
        assert!(matches!(
            s.register("phi123").await,
            Err(SigilError::CredentialUnavailable(_))
        ));
        assert!(!s.gate().is_in_flight("phi123"));
    }

    #[tokio::test]
    async fn registration_requires_user_verification() {
        let s = signer(
            SoftwareAuthenticator::new("https://sigil.example").without_user_verification(),
        );
        assert!(matches!(
            s.register("phi123").await,
            Err(SigilError::CredentialUnavailable(_))
        ));
        assert!(s.passkeys().get("phi123").is_none());
    }

    #[tokio::test]
    async fn memory_signer_counts_up() {
        let m = MemorySigner::generate(RP).unwrap();
        let h = sha256_hex(b"bundle");
        let a = m.sign_bundle("phi123", &h).await.unwrap();
        let b = m.sign_bundle("phi123", &h).await.unwrap();
        assert_ne!(a.authenticator_data, b.authenticator_data);
        assert_eq!(a.cred_id, m.cred_id());
    }
}
