//! Groth16 verification over BN254 for snarkjs-format JSON keys and proofs.
//!
//! The verification key is untrusted-but-pinned input: it is parsed strictly and
//! every point is checked to be on the curve and in the prime-order subgroup.

use std::path::Path;

use ark_bn254::{Bn254, Fq, Fq2, Fr, G1Affine, G2Affine};
use ark_groth16::{Groth16, PreparedVerifyingKey, Proof, VerifyingKey};
use serde_json::Value;
use sigil_core::error::{Result, SigilError};

use super::poseidon::parse_field_decimal;
use super::reconcile::{normalize_curve, CURVE_BN128};

/// Well-known location of the verification key next to the verifier.
pub const VERIFICATION_KEY_PATH: &str = "/zk/verification_key.json";

pub struct Groth16Verifier {
    pvk: PreparedVerifyingKey<Bn254>,
    n_public: usize,
}

impl Groth16Verifier {
    pub fn from_json(vkey: &Value) -> Result<Self> {
        if let Some(protocol) = vkey.get("protocol").and_then(Value::as_str) {
            if protocol != "groth16" {
                return Err(bad_key(format!("protocol '{protocol}' is not groth16")));
            }
        }
        if let Some(curve) = vkey.get("curve").and_then(Value::as_str) {
            if normalize_curve(curve) != CURVE_BN128 {
                return Err(bad_key(format!("curve '{curve}' is not supported")));
            }
        }

        let ic = vkey
            .get("IC")
            .and_then(Value::as_array)
            .ok_or_else(|| bad_key("missing IC".into()))?;
        if ic.is_empty() {
            return Err(bad_key("empty IC".into()));
        }
        let gamma_abc_g1 = ic.iter().map(g1_from_json).collect::<Result<Vec<_>>>()?;
        let n_public = gamma_abc_g1.len() - 1;

        if let Some(declared) = vkey.get("nPublic").and_then(Value::as_u64) {
            if declared as usize != n_public {
                return Err(bad_key(format!(
                    "nPublic {declared} does not match IC length {}",
                    gamma_abc_g1.len()
                )));
            }
        }

        let vk = VerifyingKey::<Bn254> {
            alpha_g1: g1_from_json(member(vkey, "vk_alpha_1")?)?,
            beta_g2: g2_from_json(member(vkey, "vk_beta_2")?)?,
            gamma_g2: g2_from_json(member(vkey, "vk_gamma_2")?)?,
            delta_g2: g2_from_json(member(vkey, "vk_delta_2")?)?,
            gamma_abc_g1,
        };

        Ok(Self {
            pvk: PreparedVerifyingKey::from(vk),
            n_public,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(SigilError::Io)?;
        let value: Value = serde_json::from_slice(&data)?;
        Self::from_json(&value)
    }

    pub fn n_public(&self) -> usize {
        self.n_public
    }

    /// Verify a snarkjs proof against decimal public signals.
    pub fn verify(&self, proof: &Value, public_signals: &[String]) -> Result<()> {
        if public_signals.len() != self.n_public {
            return Err(SigilError::ZkProofInvalid(format!(
                "key expects {} public inputs, got {}",
                self.n_public,
                public_signals.len()
            )));
        }
        if let Some(protocol) = proof.get("protocol").and_then(Value::as_str) {
            if protocol != "groth16" {
                return Err(SigilError::ZkProofInvalid(format!(
                    "proof protocol '{protocol}' is not groth16"
                )));
            }
        }

        let proof = Proof::<Bn254> {
            a: g1_from_json(member(proof, "pi_a")?)?,
            b: g2_from_json(member(proof, "pi_b")?)?,
            c: g1_from_json(member(proof, "pi_c")?)?,
        };
        let inputs = public_signals
            .iter()
            .map(|s| parse_field_decimal::<Fr>(s))
            .collect::<Result<Vec<_>>>()?;

        match Groth16::<Bn254>::verify_proof(&self.pvk, &proof, &inputs) {
            Ok(true) => Ok(()),
            Ok(false) => Err(SigilError::ZkProofInvalid("pairing check failed".into())),
            Err(e) => Err(SigilError::ZkProofInvalid(format!("verifier error: {e}"))),
        }
    }
}

fn bad_key(msg: String) -> SigilError {
    SigilError::MalformedPayload(format!("verification key: {msg}"))
}

fn member<'a>(obj: &'a Value, name: &'static str) -> Result<&'a Value> {
    obj.get(name).ok_or(SigilError::MissingField(name))
}

fn str_at(v: &Value, i: usize) -> Result<&str> {
    v.get(i)
        .and_then(Value::as_str)
        .ok_or_else(|| SigilError::MalformedPayload(format!("expected string at index {i}")))
}

fn fq(s: &str) -> Result<Fq> {
    parse_field_decimal::<Fq>(s)
}

// snarkjs writes affine points with a projective z of "1", or "0" for infinity
fn g1_from_json(v: &Value) -> Result<G1Affine> {
    let z = str_at(v, 2)?;
    if z == "0" {
        return Ok(G1Affine::identity());
    }
    if z != "1" {
        return Err(SigilError::MalformedPayload("G1 point is not normalized".into()));
    }
    let p = G1Affine::new_unchecked(fq(str_at(v, 0)?)?, fq(str_at(v, 1)?)?);
    if !p.is_on_curve() || !p.is_in_correct_subgroup_assuming_on_curve() {
        return Err(SigilError::MalformedPayload("G1 point not on curve".into()));
    }
    Ok(p)
}

fn g2_from_json(v: &Value) -> Result<G2Affine> {
    let coord = |i: usize| -> Result<Fq2> {
        let pair = v
            .get(i)
            .ok_or_else(|| SigilError::MalformedPayload(format!("G2 coordinate {i} missing")))?;
        Ok(Fq2::new(fq(str_at(pair, 0)?)?, fq(str_at(pair, 1)?)?))
    };
    let z = v
        .get(2)
        .ok_or_else(|| SigilError::MalformedPayload("G2 z coordinate missing".into()))?;
    match (str_at(z, 0)?, str_at(z, 1)?) {
        ("0", "0") => return Ok(G2Affine::identity()),
        ("1", "0") => {}
        _ => return Err(SigilError::MalformedPayload("G2 point is not normalized".into())),
    }
    let p = G2Affine::new_unchecked(coord(0)?, coord(1)?);
    if !p.is_on_curve() || !p.is_in_correct_subgroup_assuming_on_curve() {
        return Err(SigilError::MalformedPayload("G2 point not on curve".into()));
    }
    Ok(p)
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    //! Real proofs for a two-input equality circuit (`a * 1 = b`), standing in
    //! for the external prover.

    use ark_bn254::{Bn254, Fr, G1Affine, G2Affine};
    use ark_ff::PrimeField;
    use ark_groth16::Groth16;
    use ark_relations::lc;
    use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError, Variable};
    use ark_snark::{CircuitSpecificSetupSNARK, SNARK};
    use ark_std::rand::rngs::StdRng;
    use ark_std::rand::SeedableRng;
    use serde_json::{json, Value};

    struct EqualityCircuit {
        value: Option<Fr>,
    }

    impl ConstraintSynthesizer<Fr> for EqualityCircuit {
        fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
            let a = cs.new_input_variable(|| self.value.ok_or(SynthesisError::AssignmentMissing))?;
            let b = cs.new_input_variable(|| self.value.ok_or(SynthesisError::AssignmentMissing))?;
            cs.enforce_constraint(lc!() + a, lc!() + Variable::One, lc!() + b)?;
            Ok(())
        }
    }

    fn g1(p: &G1Affine) -> Value {
        json!([p.x.into_bigint().to_string(), p.y.into_bigint().to_string(), "1"])
    }

    fn g2(p: &G2Affine) -> Value {
        json!([
            [p.x.c0.into_bigint().to_string(), p.x.c1.into_bigint().to_string()],
            [p.y.c0.into_bigint().to_string(), p.y.c1.into_bigint().to_string()],
            ["1", "0"]
        ])
    }

    /// (verification key JSON, proof JSON) proving both public inputs equal `value`.
    pub fn prove_equality(value: &str) -> (Value, Value) {
        let mut rng = StdRng::seed_from_u64(0x5161_1000);
        let v: Fr = value.parse().unwrap();
        let (pk, vk) =
            Groth16::<Bn254>::setup(EqualityCircuit { value: None }, &mut rng).unwrap();
        let proof =
            Groth16::<Bn254>::prove(&pk, EqualityCircuit { value: Some(v) }, &mut rng).unwrap();

        let vkey = json!({
            "protocol": "groth16",
            "curve": "bn128",
            "nPublic": vk.gamma_abc_g1.len() - 1,
            "vk_alpha_1": g1(&vk.alpha_g1),
            "vk_beta_2": g2(&vk.beta_g2),
            "vk_gamma_2": g2(&vk.gamma_g2),
            "vk_delta_2": g2(&vk.delta_g2),
            "IC": vk.gamma_abc_g1.iter().map(g1).collect::<Vec<_>>(),
        });
        let proof = json!({
            "pi_a": g1(&proof.a),
            "pi_b": g2(&proof.b),
            "pi_c": g1(&proof.c),
            "protocol": "groth16",
            "curve": "bn128",
        });
        (vkey, proof)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::prove_equality;
    use super::*;

    #[test]
    fn verifies_real_proof() {
        let (vkey, proof) = prove_equality("12345");
        let verifier = Groth16Verifier::from_json(&vkey).unwrap();
        assert_eq!(verifier.n_public(), 2);
        verifier
            .verify(&proof, &["12345".to_string(), "12345".to_string()])
            .unwrap();
    }

    #[test]
    fn wrong_public_inputs_fail() {
        let (vkey, proof) = prove_equality("12345");
        let verifier = Groth16Verifier::from_json(&vkey).unwrap();
        let r = verifier.verify(&proof, &["12346".to_string(), "12346".to_string()]);
        assert!(matches!(r, Err(SigilError::ZkProofInvalid(_))));
        let r = verifier.verify(&proof, &["12345".to_string()]);
        assert!(matches!(r, Err(SigilError::ZkProofInvalid(_))));
    }

    #[test]
    fn tampered_point_is_rejected() {
        let (vkey, mut proof) = prove_equality("7");
        proof["pi_a"][0] = serde_json::json!("1");
        let verifier = Groth16Verifier::from_json(&vkey).unwrap();
        assert!(verifier
            .verify(&proof, &["7".to_string(), "7".to_string()])
            .is_err());
    }

    #[test]
    fn key_with_foreign_curve_is_rejected() {
        let (mut vkey, _) = prove_equality("7");
        vkey["curve"] = serde_json::json!("bls12-381");
        assert!(Groth16Verifier::from_json(&vkey).is_err());
    }
}
