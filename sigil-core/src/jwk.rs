use serde::{Deserialize, Serialize};

use crate::canonical::canonical_hash;
use crate::digest::{base64url_decode, base64url_encode};
use crate::error::{Result, SigilError};

/// EC P-256 public key in JWK form, as embedded in author signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcJwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<bool>,
}

impl EcJwk {
    pub fn p256(x: &[u8; 32], y: &[u8; 32]) -> Self {
        Self {
            kty: "EC".into(),
            crv: "P-256".into(),
            x: base64url_encode(x),
            y: base64url_encode(y),
            alg: Some("ES256".into()),
            ext: Some(true),
        }
    }

    /// Decoded affine coordinates, validating key type and lengths.
    pub fn coordinates(&self) -> Result<([u8; 32], [u8; 32])> {
        if self.kty != "EC" || self.crv != "P-256" {
            return Err(SigilError::MalformedPayload(format!(
                "unsupported jwk {}/{}",
                self.kty, self.crv
            )));
        }
        Ok((coord(&self.x, "x")?, coord(&self.y, "y")?))
    }

    /// Stable identifier: hex SHA-256 of the canonical `{crv,kty,x,y}` members.
    pub fn key_id(&self) -> Result<String> {
        canonical_hash(&serde_json::json!({
            "crv": self.crv,
            "kty": self.kty,
            "x": self.x,
            "y": self.y,
        }))
    }

    /// Same key material, ignoring optional members like `alg` or `ext`.
    pub fn same_key(&self, other: &EcJwk) -> bool {
        self.kty == other.kty && self.crv == other.crv && self.x == other.x && self.y == other.y
    }
}

fn coord(s: &str, name: &str) -> Result<[u8; 32]> {
    let bytes = base64url_decode(s)?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        SigilError::MalformedPayload(format!("jwk {name} is {} bytes, expected 32", b.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_roundtrip_and_key_id_ignores_alg() {
        let jwk = EcJwk::p256(&[7u8; 32], &[9u8; 32]);
        let (x, y) = jwk.coordinates().unwrap();
        assert_eq!(x, [7u8; 32]);
        assert_eq!(y, [9u8; 32]);

        let mut bare = jwk.clone();
        bare.alg = None;
        bare.ext = None;
        assert!(jwk.same_key(&bare));
        assert_eq!(jwk.key_id().unwrap(), bare.key_id().unwrap());
    }

    #[test]
    fn rejects_wrong_curve() {
        let mut jwk = EcJwk::p256(&[1u8; 32], &[2u8; 32]);
        jwk.crv = "P-384".into();
        assert!(jwk.coordinates().is_err());
    }
}
