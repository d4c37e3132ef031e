//! SVG artifacts: the `<metadata>` element carries the bundle (or a bare capsule),
//! and the artifact hash is taken over the SVG with that element removed.

use serde_json::Value;
use sigil_core::digest::sha256_hex;
use sigil_core::error::{Result, SigilError};

use crate::bundle::ProofBundle;
use crate::capsule::ProofCapsule;

const META_OPEN: &str = "<metadata";
const META_CLOSE: &str = "</metadata>";

/// Strips volatile, non-semantic content before the artifact is hashed.
pub trait ArtifactCanonicalizer {
    fn canonicalize(&self, svg: &str) -> String;
}

/// Removes every `<metadata>` element, normalizes line endings and trims.
/// The embedded bundle cannot be part of the hash it carries.
#[derive(Debug, Default, Clone, Copy)]
pub struct StripMetadata;

impl ArtifactCanonicalizer for StripMetadata {
    fn canonicalize(&self, svg: &str) -> String {
        let mut out = String::with_capacity(svg.len());
        let mut rest = svg;
        while let Some((start, end)) = find_metadata(rest) {
            out.push_str(&rest[..start]);
            rest = &rest[end..];
        }
        out.push_str(rest);
        out.replace("\r\n", "\n").trim().to_string()
    }
}

pub fn artifact_hash(svg: &str, canon: &dyn ArtifactCanonicalizer) -> String {
    sha256_hex(canon.canonicalize(svg).as_bytes())
}

/// What an SVG's metadata turned out to carry.
#[derive(Debug, Clone)]
pub enum EmbeddedPayload {
    Bundle(Box<ProofBundle>),
    Capsule(ProofCapsule),
}

/// Parse the first `<metadata>` element whose body is a JSON object.
pub fn parse_embedded(svg: &str) -> Result<EmbeddedPayload> {
    let mut rest = svg;
    let mut saw_metadata = false;
    while let Some((start, end)) = find_metadata(rest) {
        saw_metadata = true;
        let body = element_body(&rest[start..end]);
        let text = decode_entities(unwrap_cdata(body.trim()));
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&text) {
            return classify(value);
        }
        rest = &rest[end..];
    }
    if saw_metadata {
        Err(SigilError::MalformedPayload(
            "no <metadata> element holds a JSON object".into(),
        ))
    } else {
        Err(SigilError::MissingField("metadata"))
    }
}

fn classify(value: Value) -> Result<EmbeddedPayload> {
    if value.get("proofCapsule").is_some() {
        return Ok(EmbeddedPayload::Bundle(Box::new(ProofBundle::from_value(value)?)));
    }
    if value.get("pulse").is_some() && value.get("identityKey").is_some() {
        return Ok(EmbeddedPayload::Capsule(ProofCapsule::from_value(&value)?));
    }
    Err(SigilError::MalformedPayload(
        "metadata is neither a bundle nor a capsule".into(),
    ))
}

/// Replace any existing `<metadata>` with one carrying `json`, placed right after
/// the opening `<svg ...>` tag.
pub fn embed_metadata(svg: &str, json: &str) -> Result<String> {
    let stripped = StripMetadata.canonicalize(svg);
    let open = stripped
        .find("<svg")
        .ok_or_else(|| SigilError::MalformedPayload("no <svg> element".into()))?;
    let tag_end = stripped[open..]
        .find('>')
        .map(|i| open + i + 1)
        .ok_or_else(|| SigilError::MalformedPayload("unterminated <svg> tag".into()))?;
    let body = json.replace("]]>", "]]]]><![CDATA[>");
    Ok(format!(
        "{}<metadata><![CDATA[{body}]]></metadata>{}",
        &stripped[..tag_end],
        &stripped[tag_end..]
    ))
}

// byte range of the next complete <metadata ...>...</metadata> (or self-closed) element
fn find_metadata(s: &str) -> Option<(usize, usize)> {
    let mut search = 0;
    loop {
        let start = search + s[search..].find(META_OPEN)?;
        let after = start + META_OPEN.len();
        // reject prefixes like <metadataFoo
        match s[after..].chars().next() {
            Some('>') | Some('/') => {}
            Some(c) if c.is_whitespace() => {}
            _ => {
                search = after;
                continue;
            }
        }
        let tag_end = after + s[after..].find('>')?;
        if s[..tag_end].ends_with('/') {
            return Some((start, tag_end + 1));
        }
        let close = tag_end + s[tag_end..].find(META_CLOSE)?;
        return Some((start, close + META_CLOSE.len()));
    }
}

fn element_body(element: &str) -> &str {
    let Some(open_end) = element.find('>') else {
        return "";
    };
    if element[..open_end].ends_with('/') {
        return "";
    }
    element[open_end + 1..]
        .strip_suffix(META_CLOSE)
        .unwrap_or("")
}

fn unwrap_cdata(s: &str) -> String {
    // a body may be split into several CDATA sections
    if !s.contains("<![CDATA[") {
        return s.to_string();
    }
    let mut out = String::new();
    let mut rest = s;
    while let Some(i) = rest.find("<![CDATA[") {
        out.push_str(&rest[..i]);
        rest = &rest[i + 9..];
        match rest.find("]]>") {
            Some(j) => {
                out.push_str(&rest[..j]);
                rest = &rest[j + 3..];
            }
            None => {
                out.push_str(rest);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entities(s: String) -> String {
    if !s.contains('&') {
        return s;
    }
    s.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::DayLabel;

    const SVG: &str = "<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 10 10\">\r\n<circle r=\"4\"/>\r\n</svg>\n";

    #[test]
    fn hash_ignores_metadata_and_line_endings() {
        let capsule = ProofCapsule::new(1000, DayLabel::Heart, "sig123", "phi123");
        let json = serde_json::to_string(&capsule).unwrap();
        let embedded = embed_metadata(SVG, &json).unwrap();
        assert_eq!(
            artifact_hash(SVG, &StripMetadata),
            artifact_hash(&embedded, &StripMetadata)
        );
        assert_ne!(
            artifact_hash(SVG, &StripMetadata),
            artifact_hash(&SVG.replace("r=\"4\"", "r=\"5\""), &StripMetadata)
        );

        match parse_embedded(&embedded).unwrap() {
            EmbeddedPayload::Capsule(c) => assert_eq!(c, capsule),
            other => panic!("expected capsule, got {other:?}"),
        }
    }

    #[test]
    fn entity_encoded_bundle_metadata() {
        let svg = "<svg><metadata id=\"m\">{&quot;proofCapsule&quot;:{&quot;pulse&quot;:1}}</metadata></svg>";
        assert!(matches!(
            parse_embedded(svg).unwrap(),
            EmbeddedPayload::Bundle(_)
        ));
    }

    #[test]
    fn skips_non_json_metadata() {
        let svg = "<svg><metadata>rdf stuff</metadata><metadata><![CDATA[{\"pulse\":5,\"dayLabel\":\"Root\",\"identitySignature\":\"s\",\"identityKey\":\"k\",\"verifierSlug\":\"5-s\"}]]></metadata></svg>";
        assert!(matches!(
            parse_embedded(svg).unwrap(),
            EmbeddedPayload::Capsule(_)
        ));
    }

    #[test]
    fn missing_or_unusable_metadata() {
        assert!(matches!(
            parse_embedded("<svg/>"),
            Err(SigilError::MissingField("metadata"))
        ));
        assert!(matches!(
            parse_embedded("<svg><metadata/></svg>"),
            Err(SigilError::MalformedPayload(_))
        ));
        assert!(matches!(
            parse_embedded("<svg><metadata>{\"a\":1}</metadata></svg>"),
            Err(SigilError::MalformedPayload(_))
        ));
    }

    #[test]
    fn similar_tag_names_are_not_metadata() {
        let svg = "<svg><metadataExtra>x</metadataExtra></svg>";
        assert_eq!(StripMetadata.canonicalize(svg), svg);
    }
}
