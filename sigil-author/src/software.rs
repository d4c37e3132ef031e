//! In-process authenticator backed by P-256 keys in memory.
//!
//! Emits the same CBOR attestation objects and assertion byte layouts as a platform
//! authenticator, so everything downstream runs unmodified in headless environments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature, SigningKey};
use sigil_core::cbor::{
    encode_attestation_object, encode_cose_ec2, COSE_ALG_ES256, FLAG_ATTESTED_CREDENTIAL,
    FLAG_USER_PRESENT, FLAG_USER_VERIFIED,
};
use sigil_core::digest::{base64url_encode, sha256};
use sigil_core::error::{Result, SigilError};

use crate::authenticator::{
    Assertion, AssertionOptions, Authenticator, AuthenticatorError, CreatedCredential,
    CreationOptions,
};

pub(crate) fn random_signing_key() -> Result<SigningKey> {
    // rejection-sample until the scalar is in range
    loop {
        let mut secret = [0u8; 32];
        getrandom::fill(&mut secret).map_err(|e| SigilError::Encoding(format!("rng: {e}")))?;
        if let Ok(key) = SigningKey::from_slice(&secret) {
            return Ok(key);
        }
    }
}

pub(crate) fn coordinates(key: &SigningKey) -> Result<([u8; 32], [u8; 32])> {
    let point = key.verifying_key().to_encoded_point(false);
    let (Some(x), Some(y)) = (point.x(), point.y()) else {
        return Err(SigilError::Encoding("uncompressed point expected".into()));
    };
    let mut xb = [0u8; 32];
    let mut yb = [0u8; 32];
    xb.copy_from_slice(x);
    yb.copy_from_slice(y);
    Ok((xb, yb))
}

pub(crate) fn client_data_json(kind: &str, challenge: &[u8], origin: &str) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&serde_json::json!({
        "type": kind,
        "challenge": base64url_encode(challenge),
        "origin": origin,
        "crossOrigin": false,
    }))?)
}

pub(crate) fn assertion_auth_data(rp_id: &str, user_verified: bool, sign_count: u32) -> Vec<u8> {
    let mut ad = sha256(rp_id.as_bytes()).to_vec();
    let mut flags = FLAG_USER_PRESENT;
    if user_verified {
        flags |= FLAG_USER_VERIFIED;
    }
    ad.push(flags);
    ad.extend_from_slice(&sign_count.to_be_bytes());
    ad
}

/// DER ECDSA over `authData || SHA256(clientDataJSON)`.
pub(crate) fn sign_assertion(key: &SigningKey, auth_data: &[u8], client_data: &[u8]) -> Vec<u8> {
    let mut message = auth_data.to_vec();
    message.extend_from_slice(&sha256(client_data));
    let sig: Signature = key.sign(&message);
    sig.to_der().as_bytes().to_vec()
}

struct SoftwareCredential {
    key: SigningKey,
    rp_id: String,
}

pub struct SoftwareAuthenticator {
    origin: String,
    credentials: Mutex<HashMap<Vec<u8>, SoftwareCredential>>,
    counter: AtomicU32,
    user_verifying: bool,
    delay: Option<Duration>,
    fail_next: Mutex<Option<AuthenticatorError>>,
}

impl SoftwareAuthenticator {
    pub fn new(origin: &str) -> Self {
        Self {
            origin: origin.to_string(),
            credentials: Mutex::new(HashMap::new()),
            counter: AtomicU32::new(0),
            user_verifying: true,
            delay: None,
            fail_next: Mutex::new(None),
        }
    }

    /// Simulate a user taking this long to respond to each prompt.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Report user presence without user verification.
    pub fn without_user_verification(mut self) -> Self {
        self.user_verifying = false;
        self
    }

    /// The next ceremony fails with `err`, as if the platform raised it.
    pub fn fail_next(&self, err: AuthenticatorError) {
        *self.fail_next.lock().unwrap_or_else(|e| e.into_inner()) = Some(err);
    }

    pub fn credential_count(&self) -> usize {
        self.credentials
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    async fn ceremony_start(&self) -> std::result::Result<(), AuthenticatorError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self
            .fail_next
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_count(&self) -> u32 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

fn other(e: SigilError) -> AuthenticatorError {
    AuthenticatorError::Other(e.to_string())
}

#[async_trait]
impl Authenticator for SoftwareAuthenticator {
    async fn create_credential(
        &self,
        options: &CreationOptions,
    ) -> std::result::Result<CreatedCredential, AuthenticatorError> {
        self.ceremony_start().await?;
        if !options.algorithms.contains(&COSE_ALG_ES256) {
            return Err(AuthenticatorError::NotSupported);
        }

        let key = random_signing_key().map_err(other)?;
        let mut credential_id = vec![0u8; 16];
        getrandom::fill(&mut credential_id)
            .map_err(|e| AuthenticatorError::Other(format!("rng: {e}")))?;
        let (x, y) = coordinates(&key).map_err(other)?;

        let mut auth_data = sha256(options.rp_id.as_bytes()).to_vec();
        let mut flags = FLAG_USER_PRESENT | FLAG_ATTESTED_CREDENTIAL;
        if self.user_verifying {
            flags |= FLAG_USER_VERIFIED;
        }
        auth_data.push(flags);
        auth_data.extend_from_slice(&self.next_count().to_be_bytes());
        auth_data.extend_from_slice(&[0u8; 16]);
        auth_data.extend_from_slice(&(credential_id.len() as u16).to_be_bytes());
        auth_data.extend_from_slice(&credential_id);
        auth_data.extend(encode_cose_ec2(&x, &y).map_err(other)?);

        let attestation_object = encode_attestation_object("none", &auth_data).map_err(other)?;
        let client_data_json =
            client_data_json("webauthn.create", &options.challenge, &self.origin).map_err(other)?;

        self.credentials
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                credential_id.clone(),
                SoftwareCredential {
                    key,
                    rp_id: options.rp_id.clone(),
                },
            );

        Ok(CreatedCredential {
            credential_id,
            attestation_object,
            client_data_json,
        })
    }

    async fn get_assertion(
        &self,
        options: &AssertionOptions,
    ) -> std::result::Result<Assertion, AuthenticatorError> {
        self.ceremony_start().await?;

        let credentials = self.credentials.lock().unwrap_or_else(|e| e.into_inner());
        let usable = |id: &Vec<u8>| {
            credentials
                .get(id)
                .is_some_and(|c| c.rp_id == options.rp_id)
        };
        let chosen = if options.allow_credentials.is_empty() {
            credentials
                .iter()
                .find(|(_, c)| c.rp_id == options.rp_id)
                .map(|(id, _)| id.clone())
        } else {
            options.allow_credentials.iter().find(|id| usable(id)).cloned()
        };
        let Some(credential_id) = chosen else {
            return Err(AuthenticatorError::NotAllowed);
        };
        let Some(cred) = credentials.get(&credential_id) else {
            return Err(AuthenticatorError::NotAllowed);
        };

        let authenticator_data =
            assertion_auth_data(&options.rp_id, self.user_verifying, self.next_count());
        let client_data_json =
            client_data_json("webauthn.get", &options.challenge, &self.origin).map_err(other)?;
        let signature = sign_assertion(&cred.key, &authenticator_data, &client_data_json);

        Ok(Assertion {
            credential_id,
            authenticator_data,
            client_data_json,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticator::UserVerification;
    use sigil_core::cbor::{parse_attestation_object, parse_attested_credential};

    fn creation(rp_id: &str) -> CreationOptions {
        CreationOptions {
            rp_id: rp_id.into(),
            rp_name: "Sigil".into(),
            user_handle: [7; 16],
            user_name: "phi123".into(),
            challenge: vec![1, 2, 3],
            algorithms: vec![COSE_ALG_ES256],
            user_verification: UserVerification::Required,
            resident_key: true,
            timeout: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn attestation_object_parses() {
        let auth = SoftwareAuthenticator::new("https://sigil.example");
        let created = auth.create_credential(&creation("sigil.example")).await.unwrap();
        let att = parse_attestation_object(&created.attestation_object).unwrap();
        assert_eq!(att.fmt, "none");
        let cred = parse_attested_credential(&att.auth_data).unwrap();
        assert_eq!(cred.credential_id, created.credential_id);
        assert_eq!(cred.public_key.crv, "P-256");
    }

    #[tokio::test]
    async fn unknown_credential_not_allowed() {
        let auth = SoftwareAuthenticator::new("https://sigil.example");
        auth.create_credential(&creation("sigil.example")).await.unwrap();
        let opts = AssertionOptions {
            rp_id: "sigil.example".into(),
            challenge: vec![9],
            allow_credentials: vec![b"nope".to_vec()],
            user_verification: UserVerification::Required,
            timeout: Duration::from_secs(60),
        };
        assert_eq!(
            auth.get_assertion(&opts).await.unwrap_err(),
            AuthenticatorError::NotAllowed
        );

        let mut other_rp = opts.clone();
        other_rp.rp_id = "other.example".into();
        other_rp.allow_credentials.clear();
        assert!(auth.get_assertion(&other_rp).await.is_err());
    }

    #[tokio::test]
    async fn unsupported_algorithm_and_injected_failure() {
        let auth = SoftwareAuthenticator::new("https://sigil.example");
        let mut opts = creation("sigil.example");
        opts.algorithms = vec![-8];
        assert_eq!(
            auth.create_credential(&opts).await.unwrap_err(),
            AuthenticatorError::NotSupported
        );

        auth.fail_next(AuthenticatorError::InvalidState);
        assert_eq!(
            auth.create_credential(&creation("sigil.example"))
                .await
                .unwrap_err(),
            AuthenticatorError::InvalidState
        );
        auth.create_credential(&creation("sigil.example")).await.unwrap();
        assert_eq!(auth.credential_count(), 1);
    }
}
