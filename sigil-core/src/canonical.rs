//! JCS (RFC 8785) canonical JSON.
//!
//! Every hash in the protocol is taken over the output of [`canonicalize`], so two
//! structurally-equal values must produce byte-identical output regardless of key
//! order or how their numbers were originally written.

use std::cmp::Ordering;
use std::fmt::Write as _;

use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::digest::sha256_hex;
use crate::error::{Result, SigilError};

/// Canonical bytes of a JSON value.
pub fn canonicalize(value: &Value) -> Result<Vec<u8>> {
    Ok(canonicalize_str(value)?.into_bytes())
}

/// Canonical text of a JSON value.
pub fn canonicalize_str(value: &Value) -> Result<String> {
    let mut out = String::with_capacity(128);
    write_value(&mut out, value)?;
    Ok(out)
}

/// Serialize any value through serde, then canonicalize it.
pub fn canonicalize_serde<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let v = serde_json::to_value(value)?;
    canonicalize(&v)
}

/// Lowercase hex SHA-256 of the canonical form.
pub fn canonical_hash(value: &Value) -> Result<String> {
    Ok(sha256_hex(&canonicalize(value)?))
}

/// Lowercase hex SHA-256 of the canonical form of a serializable value.
pub fn canonical_hash_serde<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(sha256_hex(&canonicalize_serde(value)?))
}

fn write_value(out: &mut String, value: &Value) -> Result<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => write_number(out, n)?,
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item)?;
            }
            out.push(']');
        }
        Value::Object(map) => write_object(out, map)?,
    }
    Ok(())
}

fn write_object(out: &mut String, map: &Map<String, Value>) -> Result<()> {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| utf16_cmp(a.0, b.0));

    out.push('{');
    for (i, (key, val)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(out, key);
        out.push(':');
        write_value(out, val)?;
    }
    out.push('}');
    Ok(())
}

// JCS orders keys by UTF-16 code units, not by UTF-8 bytes
fn utf16_cmp(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_number(out: &mut String, n: &Number) -> Result<()> {
    if let Some(u) = n.as_u64() {
        let _ = write!(out, "{u}");
    } else if let Some(i) = n.as_i64() {
        let _ = write!(out, "{i}");
    } else {
        let f = n.as_f64().ok_or(SigilError::NonFiniteNumber)?;
        out.push_str(&format_number(f)?);
    }
    Ok(())
}

/// ECMAScript `Number.prototype.toString` for a finite double.
///
/// Rust's `{:e}` already yields the shortest round-trip digit string; only the
/// placement of the decimal point and exponent differs.
pub fn format_number(value: f64) -> Result<String> {
    if !value.is_finite() {
        return Err(SigilError::NonFiniteNumber);
    }
    // covers -0 as well
    if value == 0.0 {
        return Ok("0".into());
    }

    let sci = format!("{:e}", value.abs());
    let (mantissa, exp) = sci
        .split_once('e')
        .ok_or_else(|| SigilError::Encoding(format!("unexpected float form '{sci}'")))?;
    let exp: i32 = exp
        .parse()
        .map_err(|_| SigilError::Encoding(format!("unexpected float exponent '{sci}'")))?;
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let k = digits.len() as i32;
    let n = exp + 1;

    let mut out = String::new();
    if value < 0.0 {
        out.push('-');
    }

    if k <= n && n <= 21 {
        out.push_str(&digits);
        out.extend(std::iter::repeat('0').take((n - k) as usize));
    } else if 0 < n && n <= 21 {
        let (int, frac) = digits.split_at(n as usize);
        out.push_str(int);
        out.push('.');
        out.push_str(frac);
    } else if -6 < n && n <= 0 {
        out.push_str("0.");
        out.extend(std::iter::repeat('0').take((-n) as usize));
        out.push_str(&digits);
    } else {
        let e = n - 1;
        let sign = if e >= 0 { '+' } else { '-' };
        let (first, rest) = digits.split_at(1);
        out.push_str(first);
        if !rest.is_empty() {
            out.push('.');
            out.push_str(rest);
        }
        let _ = write!(out, "e{sign}{}", e.abs());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"y":[1,2],"x":"s"}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"x":"s","y":[1,2]},"b":1}"#).unwrap();
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
        assert_eq!(
            canonicalize_str(&a).unwrap(),
            r#"{"a":{"x":"s","y":[1,2]},"b":1}"#
        );
    }

    #[test]
    fn negative_zero_and_integral_floats() {
        assert_eq!(canonicalize_str(&json!(-0.0)).unwrap(), "0");
        assert_eq!(canonicalize_str(&json!(1.0)).unwrap(), "1");
        assert_eq!(canonicalize_str(&json!(100.50)).unwrap(), "100.5");
        assert_eq!(canonicalize_str(&json!(-7)).unwrap(), "-7");
    }

    #[test]
    fn ecmascript_number_forms() {
        assert_eq!(format_number(1e21).unwrap(), "1e+21");
        assert_eq!(format_number(1e20).unwrap(), "100000000000000000000");
        assert_eq!(format_number(0.000001).unwrap(), "0.000001");
        assert_eq!(format_number(1.5e-7).unwrap(), "1.5e-7");
        assert_eq!(format_number(123.456).unwrap(), "123.456");
        assert_eq!(format_number(-2.5e30).unwrap(), "-2.5e+30");
        assert!(matches!(
            format_number(f64::NAN),
            Err(SigilError::NonFiniteNumber)
        ));
    }

    #[test]
    fn large_integers_print_exactly() {
        assert_eq!(
            canonicalize_str(&json!(u64::MAX)).unwrap(),
            "18446744073709551615"
        );
    }

    #[test]
    fn string_escapes() {
        let v = json!("a\"b\\c\n\u{1f}é\u{2028}");
        assert_eq!(
            canonicalize_str(&v).unwrap(),
            "\"a\\\"b\\\\c\\n\\u001fé\u{2028}\""
        );
    }

    #[test]
    fn keys_sort_by_utf16_units() {
        // U+FB01 sorts before U+1F600 in UTF-8 but after it in UTF-16
        let v = json!({ "\u{1F600}": 1, "\u{FB01}": 2, "a": 0 });
        assert_eq!(
            canonicalize_str(&v).unwrap(),
            "{\"a\":0,\"\u{1F600}\":1,\"\u{FB01}\":2}"
        );
    }

    #[test]
    fn null_is_kept_distinct_from_absent() {
        let with_null = json!({ "a": 1, "b": null });
        let without = json!({ "a": 1 });
        assert_ne!(
            canonical_hash(&with_null).unwrap(),
            canonical_hash(&without).unwrap()
        );
    }
}
