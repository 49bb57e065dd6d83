use std::fmt::Debug;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a token is rejected.
///
/// Every variant is terminal for the request that produced it and maps to
/// HTTP 401 at the adapter boundary. Use [`Error::public_message`] for the
/// text sent back to the client; the `Display` output carries internal
/// detail meant for logs only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("No bearer token present in the Authorization header")]
    MissingCredentials,
    #[error("Malformed token: {0}")]
    MalformedToken(String),
    #[error("Could not resolve signing keys: {0}")]
    KeyResolution(String),
    #[error("Key '{0}' is not present in the issuer's key set")]
    UnknownKey(String),
    #[error("Missing 'kid' in the token header and the key set holds more than one key")]
    KeyIdMissing,
    #[error("Token signature is invalid: {0}")]
    SignatureInvalid(String),
    #[error("The provided token has expired. Expiration timestamp: {0}")]
    TokenExpired(i64),
    #[error("The provided token is not valid yet. Not-before timestamp: {0}")]
    TokenNotYetValid(i64),
    #[error("The provided token does not match the expected issuer. Provided issuer: {0:?}")]
    IssuerMismatch(Option<String>),
    #[error("The provided token is not issued for audience '{expected}'. Provided audiences: {provided:?}")]
    AudienceMismatch {
        expected: String,
        provided: Vec<String>,
    },
    #[error("The provided token has type {provided:?}, expected '{expected}'")]
    TokenTypeMismatch {
        expected: String,
        provided: Option<String>,
    },
    #[error("Claims requirement not met: {0}")]
    RequirementNotMet(String),
    #[error("Token is not active according to the introspection endpoint")]
    TokenInactive,
    #[error("Introspection endpoint unavailable: {0}")]
    IntrospectionUnavailable(String),
    #[error("Invalid verifier configuration: {0}")]
    InvalidConfiguration(String),
}

impl Error {
    /// Whether a later request carrying the same token might succeed.
    ///
    /// Only upstream outages qualify. A transient error is still a rejection
    /// for the current request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::KeyResolution(_) | Error::IntrospectionUnavailable(_)
        )
    }

    /// Generic message safe to return to the client with a 401.
    pub fn public_message(&self) -> &'static str {
        match self {
            Error::MissingCredentials => "missing bearer token",
            _ => "invalid token",
        }
    }
}

/// Failure of an outbound HTTP call made by the key store or the
/// introspection client. Callers map it onto the public error kind that
/// fits their stage.
#[derive(Error, Debug)]
pub(crate) enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("{url} returned an undecodable body: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("request to {url} timed out")]
    Timeout { url: String },
}

pub(crate) fn key_resolution_error(error: FetchError) -> Error {
    Error::KeyResolution(error.to_string())
}

pub(crate) fn introspection_error(error: FetchError) -> Error {
    match error {
        FetchError::Decode { .. } => Error::TokenInactive,
        other => Error::IntrospectionUnavailable(other.to_string()),
    }
}

pub(crate) fn jwt_error(error: jsonwebtoken::errors::Error) -> Error {
    use jsonwebtoken::errors::ErrorKind;

    match error.kind() {
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => Error::MalformedToken(error.to_string()),
        _ => Error::SignatureInvalid(error.to_string()),
    }
}
