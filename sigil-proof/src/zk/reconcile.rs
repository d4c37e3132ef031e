//! Curve metadata reconciliation across the proof object, `zkMeta` and a nested
//! bundle-root copy of `zkMeta`.
//!
//! Explicit values always win and are never rewritten. Two explicit values that
//! name different curves are a hard failure. A curve is inferred only when
//! nothing is explicit, the proof carries Groth16 points and the
//! (protocol, scheme, circuitId) triple is a known recipe.

use serde_json::Value;
use sigil_core::error::{Result, SigilError};

use super::ZkMeta;

pub const CURVE_BN128: &str = "bn128";
pub const CURVE_BLS12_381: &str = "bls12-381";

const BN128_ALIASES: &[&str] = &["bn128", "bn254", "altbn128", "alt_bn128"];
const BLS12_381_ALIASES: &[&str] = &["bls12-381", "bls12381", "bls12_381"];

/// (protocol, scheme, circuitId) → curve
const KNOWN_RECIPES: &[(&str, &str, &str, &str)] = &[
    ("groth16", "groth16-poseidon", "sigil-proof-v1", CURVE_BN128),
    ("groth16", "poseidon", "sigil-proof-v1", CURVE_BN128),
    ("groth16", "groth16-poseidon", "sigil_proof", CURVE_BN128),
];

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledZk {
    /// Normalized curve name, if one is known.
    pub curve: Option<String>,
    pub meta: ZkMeta,
    pub inferred: bool,
}

/// Canonical name for a curve and its known aliases; unknown names are lowercased.
pub fn normalize_curve(raw: &str) -> String {
    let lower = raw.trim().to_ascii_lowercase();
    if BN128_ALIASES.contains(&lower.as_str()) {
        CURVE_BN128.into()
    } else if BLS12_381_ALIASES.contains(&lower.as_str()) {
        CURVE_BLS12_381.into()
    } else {
        lower
    }
}

pub fn curve_aliases(normalized: &str) -> Vec<String> {
    let table = match normalized {
        CURVE_BN128 => BN128_ALIASES,
        CURVE_BLS12_381 => BLS12_381_ALIASES,
        _ => return vec![normalized.to_string()],
    };
    table.iter().map(|s| s.to_string()).collect()
}

pub fn has_groth16_points(proof: &Value) -> bool {
    ["pi_a", "pi_b", "pi_c"]
        .iter()
        .all(|k| proof.get(k).is_some_and(Value::is_array))
}

pub fn reconcile_curve(
    proof: Option<&Value>,
    meta: Option<&ZkMeta>,
    nested: Option<&ZkMeta>,
) -> Result<ReconciledZk> {
    let mut out = meta.cloned().unwrap_or_default();

    let proof_curve = proof
        .and_then(|p| p.get("curve"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let explicit: Vec<(&str, String)> = [
        ("proof", proof_curve),
        ("zkMeta", meta.and_then(|m| m.curve.clone())),
        ("bundleRoot.zkMeta", nested.and_then(|m| m.curve.clone())),
    ]
    .into_iter()
    .filter_map(|(src, c)| c.filter(|c| !c.trim().is_empty()).map(|c| (src, c)))
    .collect();

    if let Some((first_src, first)) = explicit.first() {
        let normalized = normalize_curve(first);
        for (src, other) in &explicit[1..] {
            if normalize_curve(other) != normalized {
                return Err(SigilError::CurveMismatch {
                    first: format!("{first_src}={first}"),
                    second: format!("{src}={other}"),
                });
            }
        }
        // fill gaps only; a present curve keeps its original spelling
        if out.curve.is_none() {
            out.curve = Some(first.clone());
        }
        if out.curve_aliases.is_none() {
            out.curve_aliases = Some(curve_aliases(&normalized));
        }
        return Ok(ReconciledZk {
            curve: Some(normalized),
            meta: out,
            inferred: false,
        });
    }

    let Some(proof) = proof.filter(|p| has_groth16_points(p)) else {
        return Ok(ReconciledZk {
            curve: None,
            meta: out,
            inferred: false,
        });
    };

    let protocol = out
        .protocol
        .clone()
        .or_else(|| proof.get("protocol").and_then(Value::as_str).map(str::to_string));
    let recipe = match (&protocol, &out.scheme, &out.circuit_id) {
        (Some(p), Some(s), Some(c)) => KNOWN_RECIPES
            .iter()
            .find(|(rp, rs, rc, _)| *rp == p.as_str() && *rs == s.as_str() && *rc == c.as_str()),
        _ => None,
    };
    let Some((p, s, c, curve)) = recipe else {
        return Ok(ReconciledZk {
            curve: None,
            meta: out,
            inferred: false,
        });
    };

    tracing::warn!(protocol = p, scheme = s, circuit = c, curve, "inferred missing zk curve");
    out.curve = Some(curve.to_string());
    out.curve_aliases = Some(curve_aliases(curve));
    out.notes
        .get_or_insert_with(Vec::new)
        .push(format!("curve inferred as {curve} from recipe {p}/{s}/{c}"));

    Ok(ReconciledZk {
        curve: Some(curve.to_string()),
        meta: out,
        inferred: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn groth_proof() -> Value {
        json!({
            "pi_a": ["1", "2", "1"],
            "pi_b": [["1", "2"], ["3", "4"], ["1", "0"]],
            "pi_c": ["5", "6", "1"],
            "protocol": "groth16"
        })
    }

    fn recipe_meta() -> ZkMeta {
        ZkMeta {
            scheme: Some("groth16-poseidon".into()),
            circuit_id: Some("sigil-proof-v1".into()),
            ..Default::default()
        }
    }

    #[test]
    fn aliases_are_not_conflicts() {
        let mut proof = groth_proof();
        proof["curve"] = json!("bn254");
        let meta = ZkMeta {
            curve: Some("BN128".into()),
            ..Default::default()
        };
        let r = reconcile_curve(Some(&proof), Some(&meta), None).unwrap();
        assert_eq!(r.curve.as_deref(), Some("bn128"));
        // explicit spelling is preserved
        assert_eq!(r.meta.curve.as_deref(), Some("BN128"));
        assert!(!r.inferred);
    }

    #[test]
    fn real_conflict_is_hard_failure() {
        let mut proof = groth_proof();
        proof["curve"] = json!("bn128");
        let nested = ZkMeta {
            curve: Some("bls12_381".into()),
            ..Default::default()
        };
        let r = reconcile_curve(Some(&proof), None, Some(&nested));
        assert!(matches!(r, Err(SigilError::CurveMismatch { .. })));
    }

    #[test]
    fn infers_from_known_recipe_only() {
        let proof = groth_proof();
        let r = reconcile_curve(Some(&proof), Some(&recipe_meta()), None).unwrap();
        assert!(r.inferred);
        assert_eq!(r.meta.curve.as_deref(), Some("bn128"));
        assert!(r.meta.curve_aliases.as_ref().unwrap().contains(&"bn254".to_string()));
        assert_eq!(r.meta.notes.as_ref().unwrap().len(), 1);

        let mut unknown = recipe_meta();
        unknown.circuit_id = Some("other".into());
        let r = reconcile_curve(Some(&proof), Some(&unknown), None).unwrap();
        assert!(r.curve.is_none());
        assert!(r.meta.curve.is_none());

        let no_points = json!({ "protocol": "groth16" });
        let r = reconcile_curve(Some(&no_points), Some(&recipe_meta()), None).unwrap();
        assert!(r.curve.is_none());
    }

    #[test]
    fn reconcile_is_idempotent() {
        let proof = groth_proof();
        let first = reconcile_curve(Some(&proof), Some(&recipe_meta()), None).unwrap();
        let second = reconcile_curve(Some(&proof), Some(&first.meta), None).unwrap();
        assert_eq!(first.meta, second.meta);
        assert_eq!(first.curve, second.curve);
        let third = reconcile_curve(Some(&proof), Some(&second.meta), None).unwrap();
        assert_eq!(second, third);
    }

    #[test]
    fn explicit_proof_curve_fills_missing_meta() {
        let mut proof = groth_proof();
        proof["curve"] = json!("altbn128");
        let r = reconcile_curve(Some(&proof), None, None).unwrap();
        assert_eq!(r.meta.curve.as_deref(), Some("altbn128"));
        let again = reconcile_curve(Some(&proof), Some(&r.meta), None).unwrap();
        assert_eq!(r.meta, again.meta);
    }
}
