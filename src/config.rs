use std::time::Duration;

use jsonwebtoken::Algorithm;
use reqwest::Client;
use url::Url;

use crate::error::Error;
use crate::error::Result;

/// Configuration for the token verifier
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Base URL of the trusted authorization server
    pub(crate) issuer: String,
    /// Audience the token must carry, if any
    pub(crate) required_audience: Option<String>,
    /// Token type (`typ` header or introspected `token_type`) the token must carry, if any
    pub(crate) required_token_type: Option<String>,
    /// Route every token through introspection
    pub(crate) opaque_tokens_enabled: bool,
    /// Time-to-live for cached key sets (default: 1 hour)
    pub(crate) jwks_cache_ttl: Duration,
    /// How long an expired key set may still be served while it is being refreshed
    pub(crate) stale_key_grace: Duration,
    /// Minimum age of a key set before an unknown `kid` forces a refetch
    pub(crate) min_key_refresh_interval: Duration,
    /// Upper bound for every outbound call
    pub(crate) fetch_timeout: Duration,
    /// Clock skew tolerated on `exp` and `nbf`
    pub(crate) allowed_token_drift: Duration,
    /// Signature algorithms accepted in token headers
    pub(crate) allowed_algorithms: Vec<Algorithm>,
    /// Optional custom HTTP client for outbound calls
    /// If not provided, a default client will be created
    pub(crate) http_client: Option<Client>,
    /// Discovery document location, when it is not under the issuer's well-known path
    pub(crate) discovery_uri: Option<String>,
    /// Skip discovery and fetch keys from this URI
    pub(crate) jwks_uri: Option<String>,
    /// Skip discovery and introspect against this URI
    pub(crate) introspection_endpoint: Option<String>,
    /// Client credentials sent to the introspection endpoint
    pub(crate) introspection_credentials: Option<ClientCredentials>,
    /// Upper bound on how long an introspection verdict is reused
    pub(crate) introspection_cache_ttl: Duration,
    /// Maximum number of cached introspection verdicts
    pub(crate) introspection_cache_capacity: usize,
    pub(crate) background_refresh: bool,
    pub(crate) eager_key_loading: bool,
}

/// Client id and secret used to authenticate introspection requests
#[derive(Clone)]
pub struct ClientCredentials {
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

const DEFAULT_JWKS_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_STALE_KEY_GRACE_SECS: u64 = 900;
const DEFAULT_MIN_KEY_REFRESH_INTERVAL_SECS: u64 = 5;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_ALLOWED_TOKEN_DRIFT_SECS: u64 = 10;
const DEFAULT_INTROSPECTION_CACHE_TTL_SECS: u64 = 60;
const DEFAULT_INTROSPECTION_CACHE_CAPACITY: usize = 10_000;

/// Asymmetric algorithms accepted unless configured otherwise
pub const DEFAULT_ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

impl VerifierConfig {
    /// Create a new configuration trusting the given issuer
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            required_audience: None,
            required_token_type: None,
            opaque_tokens_enabled: false,
            jwks_cache_ttl: Duration::from_secs(DEFAULT_JWKS_CACHE_TTL_SECS),
            stale_key_grace: Duration::from_secs(DEFAULT_STALE_KEY_GRACE_SECS),
            min_key_refresh_interval: Duration::from_secs(DEFAULT_MIN_KEY_REFRESH_INTERVAL_SECS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            allowed_token_drift: Duration::from_secs(DEFAULT_ALLOWED_TOKEN_DRIFT_SECS),
            allowed_algorithms: DEFAULT_ALLOWED_ALGORITHMS.to_vec(),
            http_client: None,
            discovery_uri: None,
            jwks_uri: None,
            introspection_endpoint: None,
            introspection_credentials: None,
            introspection_cache_ttl: Duration::from_secs(DEFAULT_INTROSPECTION_CACHE_TTL_SECS),
            introspection_cache_capacity: DEFAULT_INTROSPECTION_CACHE_CAPACITY,
            background_refresh: true,
            eager_key_loading: false,
        }
    }

    /// Require the token's audience claim to contain this value
    pub fn with_required_audience(mut self, audience: impl Into<String>) -> Self {
        self.required_audience = Some(audience.into());
        self
    }

    /// Require the token type to equal this value exactly (e.g. `JWT+AT`)
    pub fn with_required_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.required_token_type = Some(token_type.into());
        self
    }

    /// Route all tokens through introspection, regardless of their structure
    pub fn with_opaque_tokens_enabled(mut self, enabled: bool) -> Self {
        self.opaque_tokens_enabled = enabled;
        self
    }

    /// Set the key set cache TTL
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_cache_ttl = ttl;
        self
    }

    /// Set how long an expired key set may still be served while a refresh runs.
    ///
    /// `Duration::ZERO` makes the key store fail closed: once the TTL has
    /// passed, tokens are only accepted after a successful refetch.
    pub fn with_stale_key_grace(mut self, grace: Duration) -> Self {
        self.stale_key_grace = grace;
        self
    }

    /// Set the minimum key set age before an unknown `kid` triggers a refetch
    pub fn with_min_key_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_key_refresh_interval = interval;
        self
    }

    /// Set the timeout applied to discovery, key set and introspection calls
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the clock skew tolerated when checking `exp` and `nbf`
    pub fn with_allowed_token_drift(mut self, drift: Duration) -> Self {
        self.allowed_token_drift = drift;
        self
    }

    /// Set the signature algorithms accepted in token headers
    pub fn with_allowed_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms;
        self
    }

    /// Set a custom HTTP client
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Fetch the discovery document from this URI instead of the issuer's well-known path
    pub fn with_discovery_uri(mut self, uri: impl Into<String>) -> Self {
        self.discovery_uri = Some(uri.into());
        self
    }

    /// Fetch signing keys from this URI without discovery
    pub fn with_jwks_uri(mut self, uri: impl Into<String>) -> Self {
        self.jwks_uri = Some(uri.into());
        self
    }

    /// Introspect opaque tokens against this URI without discovery
    pub fn with_introspection_endpoint(mut self, uri: impl Into<String>) -> Self {
        self.introspection_endpoint = Some(uri.into());
        self
    }

    /// Authenticate introspection requests with HTTP Basic client credentials
    pub fn with_introspection_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.introspection_credentials = Some(ClientCredentials {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        });
        self
    }

    /// Set the longest time an introspection verdict is reused
    pub fn with_introspection_cache_ttl(mut self, ttl: Duration) -> Self {
        self.introspection_cache_ttl = ttl;
        self
    }

    /// Set the maximum number of cached introspection verdicts
    pub fn with_introspection_cache_capacity(mut self, capacity: usize) -> Self {
        self.introspection_cache_capacity = capacity;
        self
    }

    /// Enable or disable the timer-driven key set refresh task
    pub fn with_background_refresh(mut self, enabled: bool) -> Self {
        self.background_refresh = enabled;
        self
    }

    /// Fetch the issuer's key set while constructing the verifier
    pub fn with_eager_key_loading(mut self, enabled: bool) -> Self {
        self.eager_key_loading = enabled;
        self
    }

    /// Whether opaque tokens may be sent to an introspection endpoint
    pub(crate) fn introspection_configured(&self) -> bool {
        self.opaque_tokens_enabled
            || self.introspection_endpoint.is_some()
            || self.introspection_credentials.is_some()
    }

    /// Check the configuration for values the verifier cannot work with
    ///
    /// # Errors
    /// Returns `Error::InvalidConfiguration` naming the offending option
    pub(crate) fn validate(&self) -> Result<()> {
        let issuer = Url::parse(&self.issuer).map_err(|error| {
            Error::InvalidConfiguration(format!("issuer '{}' is not a URL: {error}", self.issuer))
        })?;

        if !matches!(issuer.scheme(), "https" | "http") {
            return Err(Error::InvalidConfiguration(format!(
                "issuer '{}' must use http or https",
                self.issuer
            )));
        }

        if self.allowed_algorithms.is_empty() {
            return Err(Error::InvalidConfiguration(
                "at least one signature algorithm must be allowed".to_string(),
            ));
        }

        if self.introspection_cache_capacity == 0 {
            return Err(Error::InvalidConfiguration(
                "introspection cache capacity must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Build the HTTP client used for every outbound call
    pub(crate) fn build_http_client(&self) -> Result<Client> {
        if let Some(client) = &self.http_client {
            return Ok(client.clone());
        }

        Client::builder()
            .timeout(self.fetch_timeout)
            .build()
            .map_err(|error| {
                Error::InvalidConfiguration(format!("failed to build HTTP client: {error}"))
            })
    }
}
