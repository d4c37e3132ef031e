//! Link-shareable receipts: `?r=<base64url(JCS(receipt))>`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sigil_core::canonical::canonicalize_serde;
use sigil_core::digest::{base64url_decode, base64url_encode};
use sigil_core::error::{Result, SigilError};

use crate::bundle::ProofBundle;
use crate::capsule::ProofCapsule;

pub const RECEIPT_PARAM: &str = "r";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedReceipt {
    pub proof_capsule: ProofCapsule,
    pub capsule_hash: String,
    pub svg_hash: String,
    pub bundle_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_sig: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zk_poseidon_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zk_proof: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zk_public_inputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zk_meta: Option<Value>,
}

impl SharedReceipt {
    /// Project a sealed bundle onto its receipt.
    pub fn from_bundle(bundle: &ProofBundle) -> Result<Self> {
        Ok(Self {
            proof_capsule: bundle.capsule()?,
            capsule_hash: bundle.capsule_hash()?.to_string(),
            svg_hash: bundle.svg_hash()?.to_string(),
            bundle_hash: bundle
                .bundle_hash()
                .ok_or(SigilError::MissingField("bundleHash"))?
                .to_string(),
            author_sig: bundle.author_sig().cloned(),
            zk_poseidon_hash: bundle.zk_poseidon_hash().map(str::to_string),
            zk_proof: bundle.zk_proof().cloned(),
            zk_public_inputs: bundle.zk_public_inputs().cloned(),
            zk_meta: bundle.get("zkMeta").filter(|v| !v.is_null()).cloned(),
        })
    }

    pub fn encode(&self) -> Result<String> {
        self.proof_capsule.verify_hash(&self.capsule_hash)?;
        Ok(base64url_encode(&canonicalize_serde(self)?))
    }

    pub fn decode(param: &str) -> Result<Self> {
        let bytes = base64url_decode(param)?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| SigilError::MalformedPayload(format!("receipt is not json: {e}")))?;
        let capsule = ProofCapsule::from_value(
            value
                .get("proofCapsule")
                .ok_or(SigilError::MissingField("proofCapsule"))?,
        )?;
        let receipt: SharedReceipt = serde_json::from_value(value)
            .map_err(|e| SigilError::MalformedPayload(format!("receipt: {e}")))?;
        capsule.verify_hash(&receipt.capsule_hash)?;
        Ok(receipt)
    }

    /// Find and decode the `r` parameter of a URL or bare query string.
    pub fn from_url(url: &str) -> Result<Self> {
        let query = url.split_once('?').map(|(_, q)| q).unwrap_or(url);
        let query = query.split('#').next().unwrap_or(query);
        let param = query
            .split('&')
            .find_map(|kv| kv.strip_prefix(RECEIPT_PARAM).and_then(|rest| rest.strip_prefix('=')))
            .ok_or(SigilError::MissingField("r"))?;
        Self::decode(param)
    }
}
