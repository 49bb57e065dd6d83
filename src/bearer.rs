use crate::error::Error;
use crate::error::Result;

const BEARER_SCHEME: &str = "Bearer";

/// Extract the token from an `Authorization: Bearer <token>` header value.
///
/// The scheme is matched case-insensitively. Surrounding whitespace around
/// the token is ignored.
///
/// # Errors
/// Returns `Error::MissingCredentials` if the header is absent, uses another
/// scheme, or carries an empty token.
///
/// ```rust
/// use gatekeep::{extract_bearer_token, Error};
///
/// assert_eq!(extract_bearer_token(Some("Bearer abc.def.ghi")), Ok("abc.def.ghi"));
/// assert_eq!(extract_bearer_token(Some("Basic dXNlcjpwYXNz")), Err(Error::MissingCredentials));
/// assert_eq!(extract_bearer_token(None), Err(Error::MissingCredentials));
/// ```
pub fn extract_bearer_token(header: Option<&str>) -> Result<&str> {
    let header = header.ok_or(Error::MissingCredentials)?.trim();

    let (scheme, token) = header
        .split_once(' ')
        .ok_or(Error::MissingCredentials)?;

    if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
        return Err(Error::MissingCredentials);
    }

    match token.trim() {
        "" => Err(Error::MissingCredentials),
        token => Ok(token),
    }
}
