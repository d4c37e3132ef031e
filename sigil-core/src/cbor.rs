//! CBOR handling for WebAuthn attestation objects and COSE EC2 keys.
//!
//! authData layout: rpIdHash (32) | flags (1) | signCount (4, BE) |
//! [aaguid (16) | credIdLen (2, BE) | credId | COSE key] when AT is set.

use ciborium::value::{Integer, Value};

use crate::error::{Result, SigilError};
use crate::jwk::EcJwk;

pub const FLAG_USER_PRESENT: u8 = 0x01;
pub const FLAG_USER_VERIFIED: u8 = 0x04;
pub const FLAG_ATTESTED_CREDENTIAL: u8 = 0x40;

const COSE_KTY: i128 = 1;
const COSE_ALG: i128 = 3;
const COSE_EC2_CRV: i128 = -1;
const COSE_EC2_X: i128 = -2;
const COSE_EC2_Y: i128 = -3;
const COSE_KTY_EC2: i128 = 2;
const COSE_CRV_P256: i128 = 1;
pub const COSE_ALG_ES256: i64 = -7;

const HEADER_LEN: usize = 37;

#[derive(Debug, Clone)]
pub struct AttestationObject {
    pub fmt: String,
    pub auth_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthDataHeader {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
}

impl AuthDataHeader {
    pub fn user_present(&self) -> bool {
        self.flags & FLAG_USER_PRESENT != 0
    }

    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_USER_VERIFIED != 0
    }
}

#[derive(Debug, Clone)]
pub struct AttestedCredential {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    pub public_key: EcJwk,
}

pub fn parse_attestation_object(bytes: &[u8]) -> Result<AttestationObject> {
    let value: Value = ciborium::from_reader(bytes)
        .map_err(|e| SigilError::Cbor(format!("attestation object: {e}")))?;
    let map = match value {
        Value::Map(m) => m,
        _ => return Err(SigilError::Cbor("attestation object is not a map".into())),
    };

    let mut fmt = None;
    let mut auth_data = None;
    for (k, v) in map {
        match (k, v) {
            (Value::Text(k), Value::Text(v)) if k == "fmt" => fmt = Some(v),
            (Value::Text(k), Value::Bytes(v)) if k == "authData" => auth_data = Some(v),
            _ => {}
        }
    }

    Ok(AttestationObject {
        fmt: fmt.ok_or(SigilError::MissingField("fmt"))?,
        auth_data: auth_data.ok_or(SigilError::MissingField("authData"))?,
    })
}

pub fn parse_auth_data_header(auth_data: &[u8]) -> Result<AuthDataHeader> {
    if auth_data.len() < HEADER_LEN {
        return Err(SigilError::Cbor(format!(
            "authenticator data is {} bytes, need at least {HEADER_LEN}",
            auth_data.len()
        )));
    }
    let mut rp_id_hash = [0u8; 32];
    rp_id_hash.copy_from_slice(&auth_data[..32]);
    let sign_count =
        u32::from_be_bytes([auth_data[33], auth_data[34], auth_data[35], auth_data[36]]);
    Ok(AuthDataHeader {
        rp_id_hash,
        flags: auth_data[32],
        sign_count,
    })
}

/// Credential id and public key from authData with the AT flag set.
pub fn parse_attested_credential(auth_data: &[u8]) -> Result<AttestedCredential> {
    let header = parse_auth_data_header(auth_data)?;
    if header.flags & FLAG_ATTESTED_CREDENTIAL == 0 {
        return Err(SigilError::Cbor("no attested credential data".into()));
    }

    let mut offset = HEADER_LEN;
    let need = |end: usize, what: &str| -> Result<()> {
        if auth_data.len() < end {
            Err(SigilError::Cbor(format!("authenticator data truncated in {what}")))
        } else {
            Ok(())
        }
    };

    need(offset + 18, "aaguid")?;
    let mut aaguid = [0u8; 16];
    aaguid.copy_from_slice(&auth_data[offset..offset + 16]);
    offset += 16;

    let id_len = u16::from_be_bytes([auth_data[offset], auth_data[offset + 1]]) as usize;
    offset += 2;
    need(offset + id_len, "credential id")?;
    let credential_id = auth_data[offset..offset + id_len].to_vec();
    offset += id_len;

    // the reader stops after one item, so trailing extensions are ignored
    let key: Value = ciborium::from_reader(&auth_data[offset..])
        .map_err(|e| SigilError::Cbor(format!("credential public key: {e}")))?;

    Ok(AttestedCredential {
        aaguid,
        credential_id,
        public_key: cose_ec2_to_jwk(&key)?,
    })
}

pub fn cose_ec2_to_jwk(key: &Value) -> Result<EcJwk> {
    let map = match key {
        Value::Map(m) => m,
        _ => return Err(SigilError::Cbor("COSE key is not a map".into())),
    };
    let lookup = |label: i128| {
        map.iter()
            .find(|(k, _)| matches!(k, Value::Integer(i) if i128::from(*i) == label))
            .map(|(_, v)| v)
    };
    let int = |label: i128| match lookup(label) {
        Some(Value::Integer(i)) => Some(i128::from(*i)),
        _ => None,
    };
    let coord = |label: i128, name: &str| -> Result<[u8; 32]> {
        match lookup(label) {
            Some(Value::Bytes(b)) => b.as_slice().try_into().map_err(|_| {
                SigilError::Cbor(format!("COSE {name} is {} bytes, expected 32", b.len()))
            }),
            _ => Err(SigilError::Cbor(format!("COSE {name} coordinate missing"))),
        }
    };

    if int(COSE_KTY) != Some(COSE_KTY_EC2) {
        return Err(SigilError::Cbor("COSE key is not EC2".into()));
    }
    if let Some(alg) = int(COSE_ALG) {
        if alg != i128::from(COSE_ALG_ES256) {
            return Err(SigilError::Cbor(format!("unsupported COSE alg {alg}")));
        }
    }
    if int(COSE_EC2_CRV) != Some(COSE_CRV_P256) {
        return Err(SigilError::Cbor("COSE key curve is not P-256".into()));
    }

    let x = coord(COSE_EC2_X, "x")?;
    let y = coord(COSE_EC2_Y, "y")?;
    Ok(EcJwk::p256(&x, &y))
}

pub fn encode_cose_ec2(x: &[u8; 32], y: &[u8; 32]) -> Result<Vec<u8>> {
    let key = Value::Map(vec![
        (int_value(COSE_KTY as i64), int_value(COSE_KTY_EC2 as i64)),
        (int_value(COSE_ALG as i64), int_value(COSE_ALG_ES256)),
        (int_value(COSE_EC2_CRV as i64), int_value(COSE_CRV_P256 as i64)),
        (int_value(COSE_EC2_X as i64), Value::Bytes(x.to_vec())),
        (int_value(COSE_EC2_Y as i64), Value::Bytes(y.to_vec())),
    ]);
    to_vec(&key)
}

pub fn encode_attestation_object(fmt: &str, auth_data: &[u8]) -> Result<Vec<u8>> {
    let obj = Value::Map(vec![
        (Value::Text("fmt".into()), Value::Text(fmt.into())),
        (Value::Text("attStmt".into()), Value::Map(vec![])),
        (Value::Text("authData".into()), Value::Bytes(auth_data.to_vec())),
    ]);
    to_vec(&obj)
}

fn int_value(i: i64) -> Value {
    Value::Integer(Integer::from(i))
}

fn to_vec(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| SigilError::Cbor(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_data_with_credential(cred_id: &[u8]) -> Vec<u8> {
        let mut ad = vec![0xAAu8; 32];
        ad.push(FLAG_USER_PRESENT | FLAG_USER_VERIFIED | FLAG_ATTESTED_CREDENTIAL);
        ad.extend_from_slice(&5u32.to_be_bytes());
        ad.extend_from_slice(&[0u8; 16]);
        ad.extend_from_slice(&(cred_id.len() as u16).to_be_bytes());
        ad.extend_from_slice(cred_id);
        ad.extend(encode_cose_ec2(&[1u8; 32], &[2u8; 32]).unwrap());
        ad
    }

    #[test]
    fn parse_full_attestation_object() {
        let ad = auth_data_with_credential(b"cred-1");
        let att = encode_attestation_object("none", &ad).unwrap();

        let parsed = parse_attestation_object(&att).unwrap();
        assert_eq!(parsed.fmt, "none");
        assert_eq!(parsed.auth_data, ad);

        let header = parse_auth_data_header(&parsed.auth_data).unwrap();
        assert_eq!(header.sign_count, 5);
        assert!(header.user_verified());

        let cred = parse_attested_credential(&parsed.auth_data).unwrap();
        assert_eq!(cred.credential_id, b"cred-1");
        assert_eq!(cred.public_key, EcJwk::p256(&[1u8; 32], &[2u8; 32]));
    }

    #[test]
    fn truncated_auth_data_is_rejected() {
        let ad = auth_data_with_credential(b"cred-1");
        assert!(parse_auth_data_header(&ad[..20]).is_err());
        assert!(parse_attested_credential(&ad[..60]).is_err());
    }

    #[test]
    fn missing_attested_flag() {
        let mut ad = auth_data_with_credential(b"c");
        ad[32] = FLAG_USER_PRESENT;
        assert!(parse_attested_credential(&ad).is_err());
    }

    #[test]
    fn not_a_map() {
        let mut buf = Vec::new();
        ciborium::into_writer(&Value::Text("x".into()), &mut buf).unwrap();
        assert!(parse_attestation_object(&buf).is_err());
    }
}
