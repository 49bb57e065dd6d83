//! # Gatekeep
//!
//! Bearer token verification for resource servers.
//!
//! A [`TokenVerifier`] trusts exactly one issuer. Signed tokens (JWS) are
//! verified against the issuer's published key set, which is discovered
//! through its OpenID configuration, cached per issuer and refreshed in the
//! background. Opaque tokens are checked with OAuth 2.0 Token Introspection
//! and the verdicts are cached under a hash of the token.
//!
//! ## Features
//!
//! - Key set caching with single-flight fetches and bounded stale serving
//! - Key rotation handling: an unknown `kid` triggers a rate-limited refetch
//! - Ordered checks of `exp`, `nbf`, `iss`, `aud` and token type with clock drift
//! - RFC 7662 introspection for opaque tokens
//! - Typed claims and custom requirements through [`ClaimsRequirement`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use gatekeep::{requirement_fn, Claims, TokenVerifier, VerifierConfig, VerifyToken};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = VerifierConfig::new("https://auth.example.com")
//!         .with_required_audience("orders-api")
//!         .with_cache_ttl(Duration::from_secs(1800));
//!
//!     let requirement = requirement_fn(|claims: &Claims| {
//!         if claims.scopes().contains(&"orders:read") {
//!             Ok(())
//!         } else {
//!             Err("missing scope orders:read".into())
//!         }
//!     });
//!
//!     let verifier = TokenVerifier::new(config, requirement).await?;
//!
//!     let claims = verifier
//!         .verify_authorization(Some("Bearer eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCJ9..."))
//!         .await?;
//!
//!     println!("Subject: {}", claims["sub"]);
//!
//!     Ok(())
//! }
//! ```

mod bearer;
mod claims;
mod config;
mod discovery;
mod error;
mod introspection;
mod key_store;
mod requirement;
mod token;
mod validator;
mod verifier;

// Re-exports for public API
pub use bearer::extract_bearer_token;
pub use claims::Claims;
pub use claims::RegisteredClaims;
pub use claims::StandardClaims;
pub use config::ClientCredentials;
pub use config::VerifierConfig;
pub use config::DEFAULT_ALLOWED_ALGORITHMS;
pub use error::Error;
pub use error::Result;
pub use introspection::Introspected;
pub use introspection::IntrospectionClient;
pub use key_store::Key;
pub use key_store::KeySet;
pub use key_store::KeyStore;
pub use requirement::requirement_fn;
pub use requirement::AnyClaims;
pub use requirement::BoxError;
pub use requirement::ClaimsRequirement;
pub use requirement::RequirementFn;
pub use token::classify;
pub use token::ParsedHeader;
pub use token::TokenKind;
pub use validator::check_requirement;
pub use validator::ClaimsValidator;
pub use validator::Requirements;
pub use verifier::TokenVerifier;
pub use verifier::VerifyToken;

pub use jsonwebtoken::Algorithm;
