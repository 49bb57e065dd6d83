use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::decode;
use jsonwebtoken::Algorithm;
use jsonwebtoken::Validation;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::bearer::extract_bearer_token;
use crate::claims::RegisteredClaims;
use crate::config::VerifierConfig;
use crate::error::jwt_error;
use crate::error::Error;
use crate::error::Result;
use crate::introspection::IntrospectionClient;
use crate::key_store::KeyStore;
use crate::requirement::AnyClaims;
use crate::requirement::ClaimsRequirement;
use crate::token::classify;
use crate::token::ParsedHeader;
use crate::token::TokenKind;
use crate::validator::check_requirement;
use crate::validator::ClaimsValidator;
use crate::validator::Requirements;

/// Trait for bearer token verification
#[async_trait]
pub trait VerifyToken: Send + Sync {
    /// The claims handed to the protected handler
    type Claims: Send;

    /// Verify a raw token and return its claims
    async fn verify(&self, token: &str) -> Result<Self::Claims>;

    /// Verify the token carried by an `Authorization` header value
    ///
    /// # Errors
    /// Returns `Error::MissingCredentials` if the header holds no bearer
    /// token, otherwise whatever [`VerifyToken::verify`] returns.
    async fn verify_authorization(&self, header: Option<&str>) -> Result<Self::Claims> {
        let token = extract_bearer_token(header)?;
        self.verify(token).await
    }
}

/// Bearer token verifier for one trusted issuer
///
/// Signed tokens are checked against the issuer's cached key set, opaque
/// tokens are introspected. Both paths then run the same standard claim
/// checks followed by the requirement `R`, whose claims type is what
/// [`VerifyToken::verify`] returns.
pub struct TokenVerifier<R: ClaimsRequirement = AnyClaims> {
    key_store: KeyStore,
    introspection: Option<IntrospectionClient>,
    validator: ClaimsValidator,
    opaque_tokens_enabled: bool,
    allowed_algorithms: Vec<Algorithm>,
    requirement: R,
}

impl TokenVerifier<AnyClaims> {
    /// Verifier with default settings that accepts any token `issuer` signed
    pub async fn with_issuer(issuer: impl Into<String>) -> Result<Self> {
        Self::new(VerifierConfig::new(issuer), AnyClaims).await
    }
}

impl<R: ClaimsRequirement> TokenVerifier<R> {
    /// Create a new verifier with the given configuration and claims requirement
    ///
    /// Must be called inside a Tokio runtime; the key store's refresh task
    /// is spawned here.
    ///
    /// # Errors
    /// - `Error::InvalidConfiguration` if the configuration is invalid
    /// - `Error::KeyResolution` if eager key loading is enabled and the
    ///   issuer's keys cannot be fetched
    pub async fn new(config: VerifierConfig, requirement: R) -> Result<Self> {
        config.validate()?;
        let client = config.build_http_client()?;

        let key_store = KeyStore::with_client(&config, client.clone());
        if config.eager_key_loading {
            key_store.preload(&config.issuer).await?;
        }

        let introspection = config
            .introspection_configured()
            .then(|| IntrospectionClient::with_client(&config, client));

        let validator = ClaimsValidator::new(Requirements {
            issuer: config.issuer,
            audience: config.required_audience,
            token_type: config.required_token_type,
            allowed_drift: config.allowed_token_drift,
        });

        Ok(Self {
            key_store,
            introspection,
            validator,
            opaque_tokens_enabled: config.opaque_tokens_enabled,
            allowed_algorithms: config.allowed_algorithms,
            requirement,
        })
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.key_store
    }

    pub fn introspection(&self) -> Option<&IntrospectionClient> {
        self.introspection.as_ref()
    }

    pub fn requirements(&self) -> &Requirements {
        self.validator.requirements()
    }

    /// Stop the key store's background work. Verification keeps working
    /// from cached keys but no new fetches are made.
    pub fn shutdown(&self) {
        self.key_store.shutdown();
    }

    async fn verify_token(&self, token: &str) -> Result<R::Claims> {
        match classify(token, self.opaque_tokens_enabled)? {
            TokenKind::Signed(header) => self.verify_signed(token, header).await,
            TokenKind::Opaque => self.verify_opaque(token).await,
        }
    }

    async fn verify_signed(&self, token: &str, header: ParsedHeader) -> Result<R::Claims> {
        if !self.allowed_algorithms.contains(&header.algorithm) {
            return Err(Error::SignatureInvalid(format!(
                "algorithm {:?} is not allowed",
                header.algorithm
            )));
        }

        let issuer = &self.validator.requirements().issuer;
        let key = self
            .key_store
            .resolve_key(issuer, header.key_id.as_deref())
            .await?;

        if let Some(key_algorithm) = key.algorithm() {
            if key_algorithm != header.algorithm {
                return Err(Error::SignatureInvalid(format!(
                    "token algorithm {:?} does not match key algorithm {key_algorithm:?}",
                    header.algorithm
                )));
            }
        }

        // Only the signature is checked here; the ordered claim checks run in `accept`.
        let mut validation = Validation::new(header.algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let token_data = decode::<Value>(token, key.decoding_key(), &validation).map_err(jwt_error)?;
        debug!(kid = ?header.key_id, "token signature verified");

        let mut registered = RegisteredClaims::from_value(&token_data.claims)
            .map_err(|error| Error::MalformedToken(format!("invalid registered claims: {error}")))?;
        if registered.exp.is_none() {
            return Err(Error::MalformedToken(
                "signed token has no 'exp' claim".to_string(),
            ));
        }
        registered.token_type = header.token_type;

        self.accept(&token_data.claims, &registered)
    }

    async fn verify_opaque(&self, token: &str) -> Result<R::Claims> {
        let Some(introspection) = &self.introspection else {
            return Err(Error::MalformedToken(
                "token is not a signed JWT and introspection is not configured".to_string(),
            ));
        };

        let introspected = introspection.introspect(token).await?;
        self.accept(introspected.claims(), introspected.registered())
    }

    fn accept(&self, claims: &Value, registered: &RegisteredClaims) -> Result<R::Claims> {
        self.validator.validate(registered, Utc::now().timestamp())?;

        let claims = <R::Claims as Deserialize>::deserialize(claims).map_err(|error| {
            Error::MalformedToken(format!("claims do not match the expected shape: {error}"))
        })?;

        check_requirement(&self.requirement, &claims)?;
        Ok(claims)
    }
}

#[async_trait]
impl<R: ClaimsRequirement> VerifyToken for TokenVerifier<R> {
    type Claims = R::Claims;

    async fn verify(&self, token: &str) -> Result<Self::Claims> {
        let result = self.verify_token(token).await;

        match &result {
            Ok(_) => debug!("token accepted"),
            Err(error) => debug!(error = %error, transient = error.is_transient(), "token rejected"),
        }

        result
    }
}

impl<R: ClaimsRequirement> fmt::Debug for TokenVerifier<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("key_store", &self.key_store)
            .field("introspection", &self.introspection)
            .field("validator", &self.validator)
            .field("opaque_tokens_enabled", &self.opaque_tokens_enabled)
            .field("allowed_algorithms", &self.allowed_algorithms)
            .finish_non_exhaustive()
    }
}
