//! The platform WebAuthn surface, reduced to the two ceremonies KAS-1 uses.

use std::time::Duration;

use async_trait::async_trait;
use sigil_core::error::SigilError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserVerification {
    Required,
    Preferred,
    Discouraged,
}

/// `navigator.credentials.create` parameters.
#[derive(Debug, Clone)]
pub struct CreationOptions {
    pub rp_id: String,
    pub rp_name: String,
    pub user_handle: [u8; 16],
    pub user_name: String,
    pub challenge: Vec<u8>,
    /// COSE algorithm identifiers in preference order.
    pub algorithms: Vec<i64>,
    pub user_verification: UserVerification,
    pub resident_key: bool,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CreatedCredential {
    pub credential_id: Vec<u8>,
    pub attestation_object: Vec<u8>,
    pub client_data_json: Vec<u8>,
}

/// `navigator.credentials.get` parameters.
#[derive(Debug, Clone)]
pub struct AssertionOptions {
    pub rp_id: String,
    pub challenge: Vec<u8>,
    pub allow_credentials: Vec<Vec<u8>>,
    pub user_verification: UserVerification,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Assertion {
    pub credential_id: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub signature: Vec<u8>,
}

/// DOMException names surfaced by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticatorError {
    /// user cancelled, or the prompt timed out on the platform side
    NotAllowed,
    InvalidState,
    Security,
    NotSupported,
    Other(String),
}

impl From<AuthenticatorError> for SigilError {
    fn from(e: AuthenticatorError) -> Self {
        match e {
            AuthenticatorError::NotAllowed => {
                SigilError::CredentialUnavailable("prompt dismissed or not allowed".into())
            }
            AuthenticatorError::InvalidState => {
                SigilError::CredentialUnavailable("authenticator in invalid state".into())
            }
            AuthenticatorError::Security => {
                SigilError::CredentialUnavailable("security error for this origin".into())
            }
            AuthenticatorError::NotSupported => {
                SigilError::WebAuthnUnavailable("authenticator does not support ES256".into())
            }
            AuthenticatorError::Other(msg) => SigilError::WebAuthnUnavailable(msg),
        }
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn create_credential(
        &self,
        options: &CreationOptions,
    ) -> Result<CreatedCredential, AuthenticatorError>;

    async fn get_assertion(&self, options: &AssertionOptions)
        -> Result<Assertion, AuthenticatorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dom_errors_map_to_recoverable_variants() {
        for e in [
            AuthenticatorError::NotAllowed,
            AuthenticatorError::InvalidState,
            AuthenticatorError::Security,
        ] {
            assert!(matches!(
                SigilError::from(e),
                SigilError::CredentialUnavailable(_)
            ));
        }
        assert!(matches!(
            SigilError::from(AuthenticatorError::NotSupported),
            SigilError::WebAuthnUnavailable(_)
        ));
    }

    #[test]
    fn unknown_platform_failure_is_not_retryable() {
        let err = SigilError::from(AuthenticatorError::Other("rng: entropy source failed".into()));
        assert!(matches!(err, SigilError::WebAuthnUnavailable(_)));
        assert!(!err.is_recoverable());
    }
}
