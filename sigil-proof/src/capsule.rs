use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sigil_core::canonical::canonical_hash_serde;
use sigil_core::error::{Result, SigilError};

pub const CAPSULE_VERSION: &str = "KPV-1";

/// The seven day labels of the Kai-Klok week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DayLabel {
    Root,
    Sacral,
    #[serde(rename = "Solar Plexus")]
    SolarPlexus,
    Heart,
    Throat,
    #[serde(rename = "Third Eye")]
    ThirdEye,
    Crown,
}

impl DayLabel {
    pub const ALL: [DayLabel; 7] = [
        DayLabel::Root,
        DayLabel::Sacral,
        DayLabel::SolarPlexus,
        DayLabel::Heart,
        DayLabel::Throat,
        DayLabel::ThirdEye,
        DayLabel::Crown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DayLabel::Root => "Root",
            DayLabel::Sacral => "Sacral",
            DayLabel::SolarPlexus => "Solar Plexus",
            DayLabel::Heart => "Heart",
            DayLabel::Throat => "Throat",
            DayLabel::ThirdEye => "Third Eye",
            DayLabel::Crown => "Crown",
        }
    }
}

impl fmt::Display for DayLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DayLabel {
    type Err = SigilError;

    fn from_str(s: &str) -> Result<Self> {
        DayLabel::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| SigilError::MalformedPayload(format!("unknown day label '{s}'")))
    }
}

/// Minimal identity + time binding. Immutable once hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofCapsule {
    pub pulse: u64,
    pub day_label: DayLabel,
    pub identity_signature: String,
    pub identity_key: String,
    pub verifier_slug: String,
}

impl ProofCapsule {
    pub fn new(
        pulse: u64,
        day_label: DayLabel,
        identity_signature: &str,
        identity_key: &str,
    ) -> Self {
        Self {
            pulse,
            day_label,
            identity_signature: identity_signature.to_string(),
            identity_key: identity_key.to_string(),
            verifier_slug: verifier_slug(pulse, identity_signature),
        }
    }

    /// Field-by-field parse that names the first missing or mistyped field.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| SigilError::MalformedPayload("capsule is not an object".into()))?;

        let pulse = match field(obj, "pulse")? {
            Value::Number(n) => n.as_u64().ok_or_else(|| {
                SigilError::MalformedPayload(format!(
                    "pulse must be a non-negative integer, got {n}"
                ))
            })?,
            other => {
                return Err(SigilError::MalformedPayload(format!(
                    "pulse must be a number, got {other}"
                )));
            }
        };

        Ok(Self {
            pulse,
            day_label: str_field(obj, "dayLabel")?.parse()?,
            identity_signature: str_field(obj, "identitySignature")?.to_string(),
            identity_key: str_field(obj, "identityKey")?.to_string(),
            verifier_slug: str_field(obj, "verifierSlug")?.to_string(),
        })
    }

    /// `hex(SHA256(JCS(capsule)))`
    pub fn hash(&self) -> Result<String> {
        canonical_hash_serde(self)
    }

    /// Recompute the hash and compare it to a claimed value.
    pub fn verify_hash(&self, claimed: &str) -> Result<()> {
        let computed = self.hash()?;
        if computed != claimed {
            return Err(SigilError::CapsuleHashMismatch {
                expected: claimed.to_string(),
                computed,
            });
        }
        Ok(())
    }
}

pub fn verifier_slug(pulse: u64, identity_signature: &str) -> String {
    format!("{pulse}-{identity_signature}")
}

fn field<'a>(obj: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value> {
    match obj.get(name) {
        None | Some(Value::Null) => Err(SigilError::MissingField(name)),
        Some(v) => Ok(v),
    }
}

fn str_field<'a>(obj: &'a Map<String, Value>, name: &'static str) -> Result<&'a str> {
    field(obj, name)?
        .as_str()
        .ok_or_else(|| SigilError::MalformedPayload(format!("{name} must be a string")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ProofCapsule {
        ProofCapsule::new(1000, DayLabel::Heart, "sig123", "phi123")
    }

    #[test]
    fn slug_and_canonical_form() {
        let c = sample();
        assert_eq!(c.verifier_slug, "1000-sig123");
        let canon = sigil_core::canonical::canonicalize_serde(&c).unwrap();
        assert_eq!(
            String::from_utf8(canon).unwrap(),
            r#"{"dayLabel":"Heart","identityKey":"phi123","identitySignature":"sig123","pulse":1000,"verifierSlug":"1000-sig123"}"#
        );
    }

    #[test]
    fn hash_is_stable_and_pulse_sensitive() {
        let c = sample();
        let h = c.hash().unwrap();
        assert_eq!(h, sample().hash().unwrap());
        assert_eq!(h.len(), 64);

        let mut moved = c.clone();
        moved.pulse = 1001;
        assert!(matches!(
            moved.verify_hash(&h),
            Err(SigilError::CapsuleHashMismatch { .. })
        ));
        c.verify_hash(&h).unwrap();
    }

    #[test]
    fn tagged_parse_errors() {
        let ok = json!({
            "pulse": 1000, "dayLabel": "Solar Plexus", "identitySignature": "s",
            "identityKey": "k", "verifierSlug": "1000-s"
        });
        assert_eq!(
            ProofCapsule::from_value(&ok).unwrap().day_label,
            DayLabel::SolarPlexus
        );

        let missing =
            json!({ "pulse": 1, "dayLabel": "Root", "identityKey": "k", "verifierSlug": "x" });
        assert!(matches!(
            ProofCapsule::from_value(&missing),
            Err(SigilError::MissingField("identitySignature"))
        ));

        let bad_pulse = json!({
            "pulse": -3, "dayLabel": "Root", "identitySignature": "s",
            "identityKey": "k", "verifierSlug": "x"
        });
        assert!(matches!(
            ProofCapsule::from_value(&bad_pulse),
            Err(SigilError::MalformedPayload(_))
        ));

        let bad_day = json!({
            "pulse": 1, "dayLabel": "Monday", "identitySignature": "s",
            "identityKey": "k", "verifierSlug": "x"
        });
        assert!(ProofCapsule::from_value(&bad_day).is_err());
        assert!(ProofCapsule::from_value(&json!([1, 2])).is_err());
    }
}
