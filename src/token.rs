//! Structural classification of raw bearer tokens
//!
//! Decides whether a token goes down the signed (JWS) path or the opaque
//! (introspection) path and extracts the JOSE header of signed tokens.
//! Nothing in this module is trusted: the header is read before any
//! signature has been checked.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::decode_header;
use jsonwebtoken::Algorithm;
use serde_json::Value;

use crate::error::Error;
use crate::error::Result;

/// Header fields of a signed token, read before verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeader {
    pub algorithm: Algorithm,
    pub key_id: Option<String>,
    pub token_type: Option<String>,
}

/// Verification path chosen for a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Signed(ParsedHeader),
    Opaque,
}

/// Classify a raw token.
///
/// With `opaque_tokens_enabled` every token is opaque. Otherwise a token
/// whose first segment decodes to a JSON object claims to be a JWS and must
/// be a well-formed three-segment token; anything else is opaque.
///
/// # Errors
/// Returns `Error::MalformedToken` for empty tokens and for tokens that look
/// signed but cannot be decoded.
pub fn classify(raw: &str, opaque_tokens_enabled: bool) -> Result<TokenKind> {
    if raw.is_empty() {
        return Err(Error::MalformedToken("empty token".to_string()));
    }

    if opaque_tokens_enabled {
        return Ok(TokenKind::Opaque);
    }

    let segments: Vec<&str> = raw.split('.').collect();
    if !looks_like_jose_header(segments[0]) {
        return Ok(TokenKind::Opaque);
    }

    if segments.len() != 3 {
        return Err(Error::MalformedToken(format!(
            "expected 3 segments in a signed token, got {}",
            segments.len()
        )));
    }

    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(Error::MalformedToken(
            "signed token has an empty segment".to_string(),
        ));
    }

    let header = decode_header(raw)
        .map_err(|error| Error::MalformedToken(format!("undecodable header: {error}")))?;

    Ok(TokenKind::Signed(ParsedHeader {
        algorithm: header.alg,
        key_id: header.kid,
        token_type: header.typ,
    }))
}

fn looks_like_jose_header(segment: &str) -> bool {
    URL_SAFE_NO_PAD
        .decode(segment)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
        .is_some_and(|value| value.is_object())
}
