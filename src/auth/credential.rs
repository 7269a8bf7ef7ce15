//! Raw credentials as they come off the reader, and the parsing that turns
//! them into something the backend can be asked about.

use reqwest::Url;
use serde_json::Value;

use super::result::{InvalidReason, LegacyQrRef};
use crate::api::envelope::scalar_string;
use crate::api::validation::{normalize_card_uid, validate_qr_token};

/// What a reader hands over for one tap or scan
#[derive(Debug, Clone, PartialEq)]
pub enum RawCredential {
    /// NFC tag. Either the UID string itself, a byte array, or a
    /// technology-specific object that has the id somewhere inside.
    Tag(Value),
    /// Decoded QR payload
    Code(String),
}

impl RawCredential {
    pub fn card(uid: impl Into<String>) -> Self {
        RawCredential::Tag(Value::String(uid.into()))
    }

    pub fn code(payload: impl Into<String>) -> Self {
        RawCredential::Code(payload.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RawCredential::Tag(_) => "nfc",
            RawCredential::Code(_) => "qr",
        }
    }
}

/// What a scanned QR code turned out to be
#[derive(Debug, Clone, PartialEq)]
pub enum QrContent {
    Legacy(LegacyQrRef),
    Token(String),
}

/// Keys that carry the UID in tag objects, in lookup order
const TAG_ID_KEYS: &[&str] = &["id", "uid", "card_uid", "serialNumber", "serial_number"];
/// Per-technology sub-objects searched when the top level has no id
const TAG_NESTED_KEYS: &[&str] = &["nfcA", "nfcB", "nfcF", "nfcV", "isoDep", "mifareClassic", "tag"];

/// Pull a normalized card UID out of whatever the reader produced.
pub fn card_uid_from_tag(tag: &Value) -> Result<String, InvalidReason> {
    let raw = raw_uid(tag, 0).ok_or(InvalidReason::Empty)?;
    normalize_card_uid(&raw).map_err(|detail| InvalidReason::MalformedCardUid { detail })
}

fn raw_uid(tag: &Value, depth: usize) -> Option<String> {
    if depth > 3 {
        return None;
    }
    match tag {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(bytes) => bytes_to_hex(bytes),
        Value::Object(map) => TAG_ID_KEYS
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(|v| raw_uid(v, depth + 1))
            .or_else(|| {
                TAG_NESTED_KEYS
                    .iter()
                    .filter_map(|key| map.get(*key))
                    .find_map(|v| raw_uid(v, depth + 1))
            }),
        _ => None,
    }
}

fn bytes_to_hex(bytes: &[Value]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    let raw = bytes
        .iter()
        .map(|b| {
            // Android-style readers report signed bytes
            b.as_i64()
                .filter(|n| (-128..=255).contains(n))
                .map(|n| n as u8)
        })
        .collect::<Option<Vec<u8>>>()?;
    Some(hex::encode_upper(raw))
}

/// Classify a scanned QR payload.
///
/// Legacy JSON is recognized first. Anything else is treated as a token,
/// which must survive [`extract_token`] and the token character check.
pub fn parse_qr(scanned: &str) -> Result<QrContent, InvalidReason> {
    let trimmed = scanned.trim();
    if trimmed.is_empty() {
        return Err(InvalidReason::Empty);
    }

    if let Ok(json) = serde_json::from_str::<Value>(trimmed) {
        match qr_from_json(&json) {
            Some(QrContent::Token(token)) => {
                validate_qr_token(&token)
                    .map_err(|detail| InvalidReason::UnrecognizedCode { detail })?;
                return Ok(QrContent::Token(token));
            }
            Some(legacy) => return Ok(legacy),
            None => {}
        }
        if json.is_object() || json.is_array() {
            return Err(InvalidReason::UnrecognizedCode {
                detail: "JSON code without id/field/itemId or token".to_string(),
            });
        }
    }

    let token = extract_token(trimmed);
    validate_qr_token(&token).map_err(|detail| InvalidReason::UnrecognizedCode { detail })?;
    Ok(QrContent::Token(token))
}

fn qr_from_json(json: &Value) -> Option<QrContent> {
    let object = json.as_object()?;

    let id = object.get("id").and_then(scalar_string);
    let field = object.get("field").and_then(scalar_string);
    let item_id = object.get("itemId").and_then(scalar_string);
    if let (Some(id), Some(field), Some(item_id)) = (id, field, item_id) {
        return Some(QrContent::Legacy(LegacyQrRef { id, field, item_id }));
    }

    object
        .get("token")
        .and_then(Value::as_str)
        .map(|t| QrContent::Token(extract_token(t)))
}

/// Find the token in a scanned string: the `token` query parameter, then the
/// path segment after `qr-tokens`, then the whole (trimmed) string.
pub fn extract_token(scanned: &str) -> String {
    let trimmed = scanned.trim();

    if let Ok(url) = Url::parse(trimmed) {
        if matches!(url.scheme(), "http" | "https") {
            if let Some((_, value)) = url
                .query_pairs()
                .find(|(key, value)| key == "token" && !value.is_empty())
            {
                return value.into_owned();
            }

            if let Some(segments) = url.path_segments() {
                let segments: Vec<&str> = segments.collect();
                if let Some(token) = segments
                    .iter()
                    .position(|s| *s == "qr-tokens")
                    .and_then(|i| segments.get(i + 1))
                    .filter(|s| !s.is_empty())
                {
                    return token.to_string();
                }
            }
        }
    }

    trimmed.to_string()
}

/// Keep enough of a credential to correlate log lines, never the whole value.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}…{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_token() {
        assert_eq!(extract_token("https://host/x/qr-tokens/ABC123/foo?other=1"), "ABC123");
        assert_eq!(extract_token("https://host?token=XYZ"), "XYZ");
        assert_eq!(extract_token("XYZ"), "XYZ");
        assert_eq!(extract_token("  XYZ\n"), "XYZ");
        assert_eq!(extract_token("https://host/qr-tokens/ABC?token=Q1"), "Q1");
        assert_eq!(extract_token("https://host/qr-tokens/"), "https://host/qr-tokens/");
    }

    #[test]
    fn test_parse_qr_legacy() {
        let content = parse_qr(r#"{"id":"H0001","field":"tetkik","itemId":"5"}"#).unwrap();
        assert_eq!(
            content,
            QrContent::Legacy(LegacyQrRef {
                id: "H0001".to_string(),
                field: "tetkik".to_string(),
                item_id: "5".to_string(),
            })
        );

        let numeric = parse_qr(r#"{"id":12,"field":"Prescriptions","itemId":3}"#).unwrap();
        assert!(matches!(numeric, QrContent::Legacy(r) if r.id == "12" && r.item_id == "3"));
    }

    #[test]
    fn test_parse_qr_tokens() {
        assert_eq!(
            parse_qr("not-json-and-not-a-url").unwrap(),
            QrContent::Token("not-json-and-not-a-url".to_string())
        );
        assert_eq!(
            parse_qr("https://his.example.org/api/v1/qr-tokens/ABC123/validate").unwrap(),
            QrContent::Token("ABC123".to_string())
        );
        assert_eq!(
            parse_qr(r#"{"token":"T-9"}"#).unwrap(),
            QrContent::Token("T-9".to_string())
        );
        // A bare JSON number is still a usable token
        assert_eq!(parse_qr("12345").unwrap(), QrContent::Token("12345".to_string()));
    }

    #[test]
    fn test_parse_qr_invalid() {
        assert_eq!(parse_qr("   "), Err(InvalidReason::Empty));
        assert!(matches!(
            parse_qr(r#"{"id":"H0001"}"#),
            Err(InvalidReason::UnrecognizedCode { .. })
        ));
        assert!(matches!(
            parse_qr("{broken json"),
            Err(InvalidReason::UnrecognizedCode { .. })
        ));
        assert!(matches!(
            parse_qr("two words"),
            Err(InvalidReason::UnrecognizedCode { .. })
        ));
    }

    #[test]
    fn test_card_uid_from_tag_shapes() {
        assert_eq!(card_uid_from_tag(&json!("04a1b2c3")).unwrap(), "04A1B2C3");
        assert_eq!(card_uid_from_tag(&json!({"id": "04:A1:B2:C3"})).unwrap(), "04A1B2C3");
        assert_eq!(
            card_uid_from_tag(&json!({"nfcA": {"id": [4, 161, 178, 195]}})).unwrap(),
            "04A1B2C3"
        );
        assert_eq!(card_uid_from_tag(&json!([4, -95, -78, -61])).unwrap(), "04A1B2C3");
    }

    #[test]
    fn test_card_uid_from_tag_failures() {
        assert_eq!(card_uid_from_tag(&json!({})), Err(InvalidReason::Empty));
        assert_eq!(card_uid_from_tag(&json!("")), Err(InvalidReason::Empty));
        assert_eq!(card_uid_from_tag(&json!(null)), Err(InvalidReason::Empty));
        assert!(matches!(
            card_uid_from_tag(&json!("xyz")),
            Err(InvalidReason::MalformedCardUid { .. })
        ));
        assert_eq!(card_uid_from_tag(&json!([4, 999])), Err(InvalidReason::Empty));
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask("04A1B2C3"), "04…C3");
        assert_eq!(mask("abc"), "****");
    }
}
