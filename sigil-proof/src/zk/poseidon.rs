use std::str::FromStr;

use ark_bn254::Fr;
use ark_ff::PrimeField;
use light_poseidon::{Poseidon, PoseidonHasher};
use sigil_core::digest::{hex_to_bytes32, sha256};
use sigil_core::error::{Result, SigilError};

/// Domain string whose SHA-256 becomes the third Poseidon input.
pub const ZK_DOMAIN_TAG: &str = "KPV-1|zk|sigil";

/// Map a hex SHA-256 digest onto the BN254 scalar field (big-endian, mod r).
pub fn hash_to_field(hash_hex: &str) -> Result<Fr> {
    Ok(Fr::from_be_bytes_mod_order(&hex_to_bytes32(hash_hex)?))
}

pub fn domain_tag_field() -> Fr {
    Fr::from_be_bytes_mod_order(&sha256(ZK_DOMAIN_TAG.as_bytes()))
}

/// `Poseidon(F(capsuleHash), F(svgHash), F(domainTag))` as a decimal string, the
/// form snarkjs uses for public signals.
pub fn zk_poseidon_hash(capsule_hash: &str, svg_hash: &str) -> Result<String> {
    let inputs = [
        hash_to_field(capsule_hash)?,
        hash_to_field(svg_hash)?,
        domain_tag_field(),
    ];
    let mut hasher = Poseidon::<Fr>::new_circom(inputs.len())
        .map_err(|e| SigilError::Encoding(format!("poseidon init: {e}")))?;
    let out = hasher
        .hash(&inputs)
        .map_err(|e| SigilError::Encoding(format!("poseidon: {e}")))?;
    Ok(field_to_decimal(&out))
}

pub fn field_to_decimal<F: PrimeField>(f: &F) -> String {
    f.into_bigint().to_string()
}

/// Parse a canonical decimal field element. Leading zeros and values >= the
/// modulus are rejected rather than silently reduced.
pub fn parse_field_decimal<F: PrimeField + FromStr>(s: &str) -> Result<F> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SigilError::MalformedPayload(format!(
            "field element '{s}' is not a decimal integer"
        )));
    }
    let f = F::from_str(s)
        .map_err(|_| SigilError::MalformedPayload(format!("field element '{s}' does not parse")))?;
    if field_to_decimal(&f) != s {
        return Err(SigilError::MalformedPayload(format!(
            "field element '{s}' is not in canonical form"
        )));
    }
    Ok(f)
}
