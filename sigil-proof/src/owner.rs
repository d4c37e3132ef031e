use serde::{Deserialize, Serialize};
use sigil_core::digest::sha256;
use sigil_core::error::{Result, SigilError};
use sigil_core::jwk::EcJwk;

pub const OWNER_KEY_VERSION: &str = "OPK-1";
pub const OWNER_KEY_DOMAIN: &str = "phi.owner.receive.v1";

/// Custody binding for a sigil that changed hands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerKeyDerivation {
    pub v: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_identity_key: Option<String>,
    pub receive_pulse: u64,
    /// Receive-bundle hash this derivation is bound to.
    pub binds_to: String,
}

impl OwnerKeyDerivation {
    pub fn new(
        origin_identity_key: Option<String>,
        receive_pulse: u64,
        receive_bundle_hash: &str,
    ) -> Self {
        Self {
            v: OWNER_KEY_VERSION.into(),
            origin_identity_key,
            receive_pulse,
            binds_to: receive_bundle_hash.to_string(),
        }
    }

    pub fn derive(&self, receiver_public_key_id: &str) -> String {
        derive_owner_key(receiver_public_key_id, self.receive_pulse, &self.binds_to)
    }

    /// Re-derive and compare against a claimed owner key.
    pub fn verify(&self, receiver_public_key_id: &str, claimed: &str) -> Result<()> {
        if self.v != OWNER_KEY_VERSION {
            return Err(SigilError::MalformedPayload(format!(
                "unsupported owner key derivation '{}'",
                self.v
            )));
        }
        bs58::decode(claimed)
            .with_check(None)
            .into_vec()
            .map_err(|e| SigilError::Encoding(format!("owner key is not base58check: {e}")))?;

        let derived = self.derive(receiver_public_key_id);
        if derived != claimed {
            return Err(SigilError::OwnerIdentityMismatch {
                expected: claimed.to_string(),
                derived,
            });
        }
        Ok(())
    }
}

/// `Base58Check(SHA256("phi.owner.receive.v1|<keyId>|<pulse>|<bundleHash>"))`
///
/// One-way: the owner key reveals nothing about the receiver's key material and
/// cannot be replayed against a different receive pulse or bundle.
pub fn derive_owner_key(
    receiver_public_key_id: &str,
    receive_pulse: u64,
    receive_bundle_hash: &str,
) -> String {
    let preimage = format!(
        "{OWNER_KEY_DOMAIN}|{receiver_public_key_id}|{receive_pulse}|{receive_bundle_hash}"
    );
    bs58::encode(sha256(preimage.as_bytes()))
        .with_check()
        .into_string()
}

/// Check a claimed owner key for `receiver` against one receive event.
pub fn verify_owner_key(
    receiver: &EcJwk,
    receive_pulse: u64,
    receive_bundle_hash: &str,
    claimed: &str,
) -> Result<()> {
    OwnerKeyDerivation::new(None, receive_pulse, receive_bundle_hash)
        .verify(&public_key_id(receiver)?, claimed)
}

/// Receiver key identifier used as the derivation input.
pub fn public_key_id(jwk: &EcJwk) -> Result<String> {
    jwk.key_id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigil_core::digest::sha256_hex;

    #[test]
    fn deterministic() {
        let h = sha256_hex(b"receive bundle");
        assert_eq!(derive_owner_key("kid", 5, &h), derive_owner_key("kid", 5, &h));
    }

    #[test]
    fn every_input_matters() {
        let h = sha256_hex(b"receive bundle");
        let base = derive_owner_key("kid", 5, &h);
        assert_ne!(base, derive_owner_key("kid2", 5, &h));
        assert_ne!(base, derive_owner_key("kid", 6, &h));
        assert_ne!(base, derive_owner_key("kid", 5, &sha256_hex(b"other")));
    }

    #[test]
    fn verify_against_claim() {
        let jwk = EcJwk::p256(&[3u8; 32], &[4u8; 32]);
        let kid = public_key_id(&jwk).unwrap();
        let d = OwnerKeyDerivation::new(Some("phi123".into()), 2000, &sha256_hex(b"b"));
        let key = d.derive(&kid);
        d.verify(&kid, &key).unwrap();

        let other = derive_owner_key(&kid, 2001, &d.binds_to);
        assert!(matches!(
            d.verify(&kid, &other),
            Err(SigilError::OwnerIdentityMismatch { .. })
        ));
        assert!(matches!(
            d.verify(&kid, "0OIl"),
            Err(SigilError::Encoding(_))
        ));
    }

    #[test]
    fn verify_from_jwk() {
        let jwk = EcJwk::p256(&[3u8; 32], &[4u8; 32]);
        let h = sha256_hex(b"b");
        let key = derive_owner_key(&public_key_id(&jwk).unwrap(), 9, &h);
        verify_owner_key(&jwk, 9, &h, &key).unwrap();
        let stranger = EcJwk::p256(&[5u8; 32], &[4u8; 32]);
        assert!(verify_owner_key(&stranger, 9, &h, &key).is_err());
    }

    #[test]
    fn serializes_without_absent_origin() {
        let d = OwnerKeyDerivation::new(None, 1, "h");
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v, serde_json::json!({ "v": "OPK-1", "receivePulse": 1, "bindsTo": "h" }));
    }
}
