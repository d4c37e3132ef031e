//! Proof bundle construction and hashing.
//!
//! A bundle is kept as its raw JSON object so that absent and `null` members stay
//! distinct and unknown members survive a parse/serialize round trip. The bundle
//! hash covers the unsigned projection, never the signature that is made over it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sigil_core::canonical::canonical_hash;
use sigil_core::error::{Result, SigilError};

use crate::capsule::ProofCapsule;
use crate::zk::{ZkInputs, ZkMeta, ZkStatement};

pub const HASH_ALG: &str = "sha256";
pub const CANON: &str = "JCS";

/// Members derived from (or made over) the bundle hash. None of them may feed it.
const DERIVED_FIELDS: &[&str] = &["bundleHash", "authorSig", "receiveSig", "receiveBundleHash"];
const OWNER_KEY_PREFIX: &str = "ownerKey";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleBindings {
    pub bundle_hash_of: String,
    pub author_challenge_of: String,
    pub capsule_hash_of: String,
    pub svg_hash_of: String,
}

impl Default for BundleBindings {
    fn default() -> Self {
        Self {
            bundle_hash_of: "JCS(bundleWithoutSig)".into(),
            author_challenge_of: "bundleHash".into(),
            capsule_hash_of: "JCS(proofCapsule)".into(),
            svg_hash_of: "sha256(canonicalSvg)".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleRoot {
    pub hash_alg: String,
    pub canon: String,
    pub bindings: BundleBindings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zk_statement: Option<ZkStatement>,
    pub proof_capsule: ProofCapsule,
    pub capsule_hash: String,
    pub svg_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zk_poseidon_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zk_proof: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zk_public_inputs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zk_meta: Option<ZkMeta>,
}

/// Assemble the root for a capsule and artifact hash. Pure: same inputs, same root.
pub fn build_bundle_root(
    capsule: &ProofCapsule,
    svg_hash: &str,
    zk: Option<ZkInputs>,
) -> Result<BundleRoot> {
    let capsule_hash = capsule.hash()?;
    let mut root = BundleRoot {
        hash_alg: HASH_ALG.into(),
        canon: CANON.into(),
        bindings: BundleBindings::default(),
        zk_statement: None,
        proof_capsule: capsule.clone(),
        capsule_hash,
        svg_hash: svg_hash.to_string(),
        zk_poseidon_hash: None,
        zk_proof: None,
        zk_public_inputs: None,
        zk_meta: None,
    };

    if let Some(zk) = zk {
        let hash = zk.poseidon_hash;
        root.zk_statement = Some(zk.statement.unwrap_or_default());
        root.zk_public_inputs = Some(
            zk.public_inputs
                .unwrap_or_else(|| vec![hash.clone(), hash.clone()]),
        );
        root.zk_poseidon_hash = Some(hash);
        root.zk_proof = zk.proof;
        root.zk_meta = zk.meta;
    }
    Ok(root)
}

/// A bundle as a JSON object: the root members plus whatever derived members
/// (bundle hash, signatures, owner keys) have been attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ProofBundle {
    fields: Map<String, Value>,
}

impl ProofBundle {
    pub fn from_root(root: &BundleRoot) -> Result<Self> {
        Self::from_value(serde_json::to_value(root)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(SigilError::MalformedPayload(format!(
                "bundle is not an object: {}",
                type_name(&other)
            ))),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.fields)?)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.fields.insert(key.to_string(), value);
    }

    pub fn capsule(&self) -> Result<ProofCapsule> {
        let v = self
            .fields
            .get("proofCapsule")
            .ok_or(SigilError::MissingField("proofCapsule"))?;
        ProofCapsule::from_value(v)
    }

    pub fn capsule_hash(&self) -> Result<&str> {
        self.required_str("capsuleHash")
    }

    pub fn svg_hash(&self) -> Result<&str> {
        self.required_str("svgHash")
    }

    pub fn bundle_hash(&self) -> Option<&str> {
        self.optional_str("bundleHash")
    }

    pub fn zk_poseidon_hash(&self) -> Option<&str> {
        self.optional_str("zkPoseidonHash")
    }

    pub fn zk_proof(&self) -> Option<&Value> {
        self.non_null("zkProof")
    }

    pub fn zk_public_inputs(&self) -> Option<&Value> {
        self.non_null("zkPublicInputs")
    }

    pub fn zk_meta(&self) -> Result<Option<ZkMeta>> {
        self.non_null("zkMeta").map(ZkMeta::from_value).transpose()
    }

    /// `zkMeta` of an embedded `bundleRoot` copy, if the bundle carries one.
    pub fn nested_root_zk_meta(&self) -> Result<Option<ZkMeta>> {
        self.fields
            .get("bundleRoot")
            .and_then(|r| r.get("zkMeta"))
            .filter(|m| !m.is_null())
            .map(ZkMeta::from_value)
            .transpose()
    }

    /// The embedded author signature; `null` counts as absent.
    pub fn author_sig(&self) -> Option<&Value> {
        self.non_null("authorSig")
    }

    fn non_null(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    fn optional_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    fn required_str(&self, key: &'static str) -> Result<&str> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Err(SigilError::MissingField(key)),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(SigilError::MalformedPayload(format!("{key} must be a string"))),
        }
    }
}

/// The hash preimage: every derived member stripped, `authorSig` forced to null.
pub fn build_bundle_unsigned(bundle: &ProofBundle) -> Value {
    let mut fields: Map<String, Value> = bundle
        .fields
        .iter()
        .filter(|(k, _)| !DERIVED_FIELDS.contains(&k.as_str()) && !k.starts_with(OWNER_KEY_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    fields.insert("authorSig".into(), Value::Null);
    Value::Object(fields)
}

/// `hex(SHA256(JCS(unsigned)))`
pub fn hash_bundle(unsigned: &Value) -> Result<String> {
    canonical_hash(unsigned)
}

/// Hash the root and attach the result as `bundleHash`.
pub fn seal_bundle(root: &BundleRoot) -> Result<ProofBundle> {
    let mut bundle = ProofBundle::from_root(root)?;
    let hash = hash_bundle(&build_bundle_unsigned(&bundle))?;
    bundle.set("bundleHash", Value::String(hash));
    Ok(bundle)
}

/// Recompute the bundle hash from scratch and compare with the embedded claim.
/// Returns the recomputed hash.
pub fn verify_bundle_hash(bundle: &ProofBundle) -> Result<String> {
    let computed = hash_bundle(&build_bundle_unsigned(bundle))?;
    match bundle.bundle_hash() {
        Some(claimed) if claimed == computed => Ok(computed),
        Some(claimed) => Err(SigilError::BundleHashMismatch {
            expected: claimed.to_string(),
            computed,
        }),
        None => Err(SigilError::MissingField("bundleHash")),
    }
}

/// Recompute the capsule hash and compare with the embedded `capsuleHash`.
pub fn verify_capsule_hash(bundle: &ProofBundle) -> Result<ProofCapsule> {
    let capsule = bundle.capsule()?;
    capsule.verify_hash(bundle.capsule_hash()?)?;
    Ok(capsule)
}

/// Attach a signature made over this bundle's hash. The hash is unaffected.
pub fn attach_author_sig(bundle: &mut ProofBundle, author_sig: Value) {
    bundle.set("authorSig", author_sig);
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
