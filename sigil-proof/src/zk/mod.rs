pub mod groth16;
pub mod poseidon;
pub mod reconcile;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sigil_core::error::{Result, SigilError};

pub use groth16::Groth16Verifier;
pub use poseidon::zk_poseidon_hash;
pub use reconcile::{reconcile_curve, ReconciledZk};

/// Number of redundant public inputs every sigil proof exposes.
pub const PUBLIC_INPUTS_ARITY: usize = 2;

/// Descriptor of what the ZK proof attests to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZkStatement {
    pub domain_tag: String,
    pub public_input_of: String,
    pub public_inputs_contract: PublicInputsContract,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicInputsContract {
    pub arity: u32,
    pub invariant: String,
}

impl Default for ZkStatement {
    fn default() -> Self {
        Self {
            domain_tag: poseidon::ZK_DOMAIN_TAG.into(),
            public_input_of: "poseidon(capsuleHash, svgHash, domainTag)".into(),
            public_inputs_contract: PublicInputsContract {
                arity: PUBLIC_INPUTS_ARITY as u32,
                invariant: "publicInputs[0] == publicInputs[1] == zkPoseidonHash".into(),
            },
        }
    }
}

/// Proof-system metadata. Unknown members are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZkMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve_aliases: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ZkMeta {
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| SigilError::MalformedPayload(format!("zkMeta: {e}")))
    }
}

/// ZK material handed to the bundle builder. Proof generation happens elsewhere.
#[derive(Debug, Clone, Default)]
pub struct ZkInputs {
    pub poseidon_hash: String,
    pub proof: Option<Value>,
    pub public_inputs: Option<Vec<String>>,
    pub meta: Option<ZkMeta>,
    pub statement: Option<ZkStatement>,
}

/// `zkPublicInputs` must be exactly `[h, h]` with `h == zkPoseidonHash`, compared as strings.
///
/// Absence of both is fine (no ZK seal). Any partial or inconsistent combination fails.
pub fn assert_zk_public_inputs_contract(
    zk_poseidon_hash: Option<&str>,
    zk_public_inputs: Option<&Value>,
) -> Result<()> {
    let violated = |msg: String| Err(SigilError::PublicInputsContractViolated(msg));

    let (hash, inputs) = match (zk_poseidon_hash, zk_public_inputs) {
        (None, None) => return Ok(()),
        (None, Some(_)) => return violated("zkPublicInputs present without zkPoseidonHash".into()),
        (Some(_), None) => return violated("zkPoseidonHash present without zkPublicInputs".into()),
        (Some(h), Some(i)) => (h, i),
    };

    let items = match inputs {
        Value::Array(items) => items,
        other => return violated(format!("zkPublicInputs is not an array: {other}")),
    };
    if items.len() != PUBLIC_INPUTS_ARITY {
        return violated(format!(
            "expected {PUBLIC_INPUTS_ARITY} public inputs, got {}",
            items.len()
        ));
    }

    let mut strs = Vec::with_capacity(PUBLIC_INPUTS_ARITY);
    for (i, item) in items.iter().enumerate() {
        match item.as_str() {
            Some(s) => strs.push(s),
            None => return violated(format!("public input {i} is not a string")),
        }
    }
    if strs[0] != strs[1] {
        return violated("public inputs differ from each other".into());
    }
    if strs[0] != hash {
        return violated("public inputs do not equal zkPoseidonHash".into());
    }
    Ok(())
}
