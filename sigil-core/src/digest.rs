use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use crate::error::{Result, SigilError};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 as lowercase hex, the storage and display form of every protocol hash.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// SHA-256 over several segments without an intermediate allocation.
pub fn sha256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Decode a 64-char hex hash into raw bytes. Upper-case input is accepted.
pub fn hex_to_bytes32(hash: &str) -> Result<[u8; 32]> {
    let mut out = [0u8; 32];
    hex::decode_to_slice(hash, &mut out)
        .map_err(|e| SigilError::Encoding(format!("invalid 32-byte hex hash '{hash}': {e}")))?;
    Ok(out)
}

/// True for a 64-char lowercase hex string.
pub fn is_hash_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// URL-safe base64 without padding.
pub fn base64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Inverse of [`base64url_encode`]. Trailing `=` padding is tolerated; the
/// standard alphabet (`+`, `/`) is not.
pub fn base64url_decode(s: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(s.trim_end_matches('='))
        .map_err(|e| SigilError::Encoding(format!("invalid base64url: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(sha256_concat(&[b"a", b"bc"]), sha256(b"abc"));
    }

    #[test]
    fn base64url_alphabet_and_padding() {
        let data = [0xfbu8, 0xff, 0xfe];
        let enc = base64url_encode(&data);
        assert_eq!(enc, "-__-");
        assert_eq!(base64url_decode(&enc).unwrap(), data);
        assert_eq!(base64url_decode("YQ==").unwrap(), b"a");
        assert!(base64url_decode("+//+").is_err());
    }

    #[test]
    fn hex_hash_parsing() {
        let h = sha256_hex(b"x");
        assert!(is_hash_hex(&h));
        assert_eq!(hex_to_bytes32(&h).unwrap(), sha256(b"x"));
        assert!(hex_to_bytes32("abcd").is_err());
        assert!(!is_hash_hex(&h.to_uppercase()));
    }
}
