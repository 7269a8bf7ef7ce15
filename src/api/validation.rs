//! Input validation for values that end up in backend URLs.
//!
//! Card UIDs and device MACs come from hardware or operators, and QR tokens
//! come from printed codes; all three are interpolated into request paths,
//! so they are checked here before any request is built.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// ISO 14443 card UID (4, 7 or 10 bytes in practice), hex with optional
    /// separators (e.g. 04:A1:B2:C3)
    static ref CARD_UID_REGEX: Regex = Regex::new(
        r"^[0-9A-Fa-f]{2}([:\s-]?[0-9A-Fa-f]{2}){3,9}$"
    ).unwrap();

    /// Colon- or dash-separated MAC address
    static ref DEVICE_MAC_REGEX: Regex = Regex::new(
        r"^[0-9A-Fa-f]{2}([:-][0-9A-Fa-f]{2}){5}$"
    ).unwrap();

    /// Characters a QR token may contain (UUIDs, base64url, opaque ids)
    static ref QR_TOKEN_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9._~+=-]+$"
    ).unwrap();
}

/// Longest token accepted from a scanned code
pub const MAX_TOKEN_LENGTH: usize = 512;

/// Whether a scanned line looks like a card UID rather than a QR payload
pub fn looks_like_card_uid(value: &str) -> bool {
    CARD_UID_REGEX.is_match(value.trim())
}

/// Normalize a card UID to the compact upper-case hex form (04A1B2C3)
pub fn normalize_card_uid(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("Card UID is empty".to_string());
    }
    if !CARD_UID_REGEX.is_match(trimmed) {
        return Err("Card UID must be 4-10 hex bytes".to_string());
    }
    Ok(trimmed
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_ascii_uppercase())
}

/// Validate a device MAC address
pub fn validate_device_mac(mac: &str) -> Result<(), String> {
    if mac.is_empty() {
        return Err("Device MAC is required".to_string());
    }
    if !DEVICE_MAC_REGEX.is_match(mac) {
        return Err("Device MAC must look like AA:BB:CC:DD:EE:FF".to_string());
    }
    Ok(())
}

/// Validate a QR token before it is put into a request path
pub fn validate_qr_token(token: &str) -> Result<(), String> {
    if token.is_empty() {
        return Err("Token is empty".to_string());
    }
    if token.len() > MAX_TOKEN_LENGTH {
        return Err(format!("Token is too long (max {} characters)", MAX_TOKEN_LENGTH));
    }
    if !QR_TOKEN_REGEX.is_match(token) {
        return Err("Token contains unsupported characters".to_string());
    }
    Ok(())
}

/// Validate the configured backend base URL
pub fn validate_base_url(url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("Invalid URL: {}", e))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(format!("Unsupported scheme '{}'", other)),
    }
    if parsed.host_str().is_none() {
        return Err("URL has no host".to_string());
    }
    Ok(())
}
