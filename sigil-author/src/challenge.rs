use sigil_core::digest::{base64url_encode, hex_to_bytes32, sha256};
use sigil_core::error::Result;

/// Which challenge derivations a verifier accepts.
///
/// Signers only ever emit [`ChallengeForm::BundleHash`]. The domain-separated form
/// exists for signatures produced by older clients and must be opted into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChallengeForm {
    /// `base64url(bytes(bundleHash))`
    #[default]
    BundleHash,
    /// `base64url(SHA256("KAS-1|bundleHash|" + bundleHash))`
    DomainSeparated,
    /// Either of the above.
    Either,
}

/// Raw bundle-hash bytes: the canonical KAS-1 challenge.
pub fn kas_challenge(bundle_hash: &str) -> Result<[u8; 32]> {
    hex_to_bytes32(bundle_hash)
}

pub fn kas_challenge_b64(bundle_hash: &str) -> Result<String> {
    Ok(base64url_encode(&kas_challenge(bundle_hash)?))
}

pub fn kas_domain_challenge(bundle_hash: &str) -> [u8; 32] {
    sha256(format!("KAS-1|bundleHash|{bundle_hash}").as_bytes())
}

/// base64url challenges acceptable under `form`.
pub fn expected_challenges(bundle_hash: &str, form: ChallengeForm) -> Result<Vec<String>> {
    let raw = || kas_challenge_b64(bundle_hash);
    let domain = || base64url_encode(&kas_domain_challenge(bundle_hash));
    Ok(match form {
        ChallengeForm::BundleHash => vec![raw()?],
        ChallengeForm::DomainSeparated => vec![domain()],
        ChallengeForm::Either => vec![raw()?, domain()],
    })
}

/// 16-byte WebAuthn user handle bound to an identity key.
pub fn user_handle(identity_key: &str) -> [u8; 16] {
    let digest = sha256(format!("KAS-1|identityKey|{identity_key}").as_bytes());
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}
