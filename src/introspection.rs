//! OAuth 2.0 Token Introspection (RFC 7662)
//!
//! Opaque tokens carry nothing that can be checked locally, so the issuer
//! is asked whether they are active. Verdicts are cached under the SHA-256
//! of the token, never under the token itself, and never outlive the
//! token's own `exp`.
//!
//! Failure mapping:
//! - `"active": false` is `Error::TokenInactive` and is cached
//! - a body that is not JSON or lacks `active` is `Error::TokenInactive`
//!   and is not cached
//! - transport errors, timeouts and non-2xx answers are
//!   `Error::IntrospectionUnavailable` and are not cached

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use moka::future::Cache;
use moka::Expiry;
use reqwest::Client;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;
use tokio::sync::OnceCell;
use tracing::debug;
use tracing::warn;

use crate::claims::RegisteredClaims;
use crate::config::ClientCredentials;
use crate::config::VerifierConfig;
use crate::discovery::discovery_url;
use crate::discovery::fetch_discovery_document;
use crate::discovery::read_json;
use crate::error::introspection_error;
use crate::error::Error;
use crate::error::FetchError;
use crate::error::Result;

/// Claims of a token the issuer reported as active
#[derive(Debug, Clone)]
pub struct Introspected {
    claims: Arc<Value>,
    registered: RegisteredClaims,
}

impl Introspected {
    /// The introspection response object, with `iss` filled in when absent
    pub fn claims(&self) -> &Value {
        &self.claims
    }

    /// Registered claims of the response; the token type is the response's `token_type`
    pub fn registered(&self) -> &RegisteredClaims {
        &self.registered
    }
}

#[derive(Debug, Clone)]
enum Verdict {
    Active(Introspected),
    Inactive,
}

impl Verdict {
    fn into_result(self) -> Result<Introspected> {
        match self {
            Verdict::Active(introspected) => Ok(introspected),
            Verdict::Inactive => Err(Error::TokenInactive),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedVerdict {
    verdict: Verdict,
    lifetime: Duration,
}

/// Each verdict expires after its own lifetime, fixed when it is stored
struct VerdictExpiry;

impl Expiry<String, CachedVerdict> for VerdictExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedVerdict,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.lifetime)
    }
}

/// Introspection client with a bounded verdict cache
pub struct IntrospectionClient {
    issuer: String,
    endpoint: OnceCell<String>,
    discovery_url: String,
    credentials: Option<ClientCredentials>,
    client: Client,
    timeout: Duration,
    cache_ttl: Duration,
    capacity: usize,
    cache: Cache<String, CachedVerdict>,
}

// Manual Debug impl so neither tokens nor secrets reach the logs
impl fmt::Debug for IntrospectionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntrospectionClient")
            .field("issuer", &self.issuer)
            .field("endpoint", &self.endpoint.get())
            .field("credentials", &self.credentials)
            .field("cache_ttl", &self.cache_ttl)
            .field("capacity", &self.capacity)
            .field("http_client", &"<reqwest::Client>")
            .finish_non_exhaustive()
    }
}

impl IntrospectionClient {
    /// Create an introspection client for the configured issuer
    ///
    /// # Errors
    /// Returns `Error::InvalidConfiguration` if the configuration is invalid
    /// or the HTTP client cannot be built.
    pub fn from_config(config: &VerifierConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_client(config, config.build_http_client()?))
    }

    pub(crate) fn with_client(config: &VerifierConfig, client: Client) -> Self {
        Self {
            issuer: config.issuer.clone(),
            endpoint: OnceCell::new_with(config.introspection_endpoint.clone()),
            discovery_url: config
                .discovery_uri
                .clone()
                .unwrap_or_else(|| discovery_url(&config.issuer)),
            credentials: config.introspection_credentials.clone(),
            client,
            timeout: config.fetch_timeout,
            cache_ttl: config.introspection_cache_ttl,
            capacity: config.introspection_cache_capacity,
            cache: Cache::builder()
                .max_capacity(config.introspection_cache_capacity as u64)
                .expire_after(VerdictExpiry)
                .build(),
        }
    }

    /// Ask the issuer whether `token` is active, using the cache when possible
    ///
    /// # Errors
    /// - `Error::TokenInactive` if the issuer reports the token inactive or
    ///   answers with something that is not an introspection response
    /// - `Error::IntrospectionUnavailable` if the endpoint cannot be reached
    pub async fn introspect(&self, token: &str) -> Result<Introspected> {
        let key = hash_token(token);

        if let Some(verdict) = self.cached(&key).await {
            debug!("introspection cache hit");
            return verdict.into_result();
        }

        let endpoint = self.endpoint().await?;
        let response = self
            .request(endpoint, token)
            .await
            .map_err(introspection_error)?;

        let verdict = verdict_from_response(response, &self.issuer)?;
        let now = chrono::Utc::now().timestamp();

        match &verdict {
            Verdict::Inactive => {
                debug!("issuer reported token inactive");
                self.store(key, verdict.clone(), self.cache_ttl).await;
            }
            Verdict::Active(introspected) => {
                match cache_lifetime(now, introspected.registered.exp, self.cache_ttl) {
                    Some(lifetime) => self.store(key, verdict.clone(), lifetime).await,
                    None => debug!("introspected token already expired, not caching"),
                }
            }
        }

        verdict.into_result()
    }

    /// Number of live verdicts in the cache
    pub async fn cached_verdicts(&self) -> usize {
        self.cache.run_pending_tasks().await;
        usize::try_from(self.cache.entry_count()).unwrap_or(usize::MAX)
    }

    async fn cached(&self, key: &str) -> Option<Verdict> {
        self.cache.get(key).await.map(|cached| cached.verdict)
    }

    async fn store(&self, key: String, verdict: Verdict, lifetime: Duration) {
        self.cache.insert(key, CachedVerdict { verdict, lifetime }).await;
    }

    /// The configured endpoint, or the one advertised by the issuer's
    /// discovery document. Discovery succeeds at most once.
    async fn endpoint(&self) -> Result<&str> {
        self.endpoint
            .get_or_try_init(|| async {
                let document =
                    fetch_discovery_document(&self.client, &self.discovery_url, self.timeout)
                        .await
                        .map_err(|error| Error::IntrospectionUnavailable(error.to_string()))?;

                document.introspection_endpoint.ok_or_else(|| {
                    warn!(issuer = %self.issuer, "issuer does not advertise an introspection endpoint");
                    Error::IntrospectionUnavailable(
                        "issuer does not advertise an introspection endpoint".to_string(),
                    )
                })
            })
            .await
            .map(String::as_str)
    }

    async fn request(&self, endpoint: &str, token: &str) -> std::result::Result<Value, FetchError> {
        let mut request = self
            .client
            .post(endpoint)
            .form(&[("token", token), ("token_type_hint", "access_token")]);

        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.client_id, Some(&credentials.client_secret));
        }

        let call = async {
            let response = request.send().await.map_err(|source| FetchError::Request {
                url: endpoint.to_string(),
                source,
            })?;

            if !response.status().is_success() {
                return Err(FetchError::Status {
                    url: endpoint.to_string(),
                    status: response.status(),
                });
            }

            read_json::<Value>(response, endpoint).await
        };

        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| FetchError::Timeout {
                url: endpoint.to_string(),
            })?
    }
}

/// Cache key for a token: lowercase hex SHA-256
pub(crate) fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// How long an active verdict may be reused: the ceiling, cut short by the
/// token's `exp`. `None` when the token has already expired.
fn cache_lifetime(now: i64, exp: Option<i64>, ceiling: Duration) -> Option<Duration> {
    let Some(exp) = exp else {
        return Some(ceiling);
    };

    if exp <= now {
        return None;
    }

    Some(ceiling.min(Duration::from_secs((exp - now) as u64)))
}

fn verdict_from_response(mut response: Value, issuer: &str) -> Result<Verdict> {
    let Some(object) = response.as_object_mut() else {
        debug!("introspection response is not a JSON object");
        return Err(Error::TokenInactive);
    };

    match object.get("active").and_then(Value::as_bool) {
        Some(true) => {}
        Some(false) => return Ok(Verdict::Inactive),
        None => {
            debug!("introspection response has no boolean 'active' member");
            return Err(Error::TokenInactive);
        }
    }

    object
        .entry("iss")
        .or_insert_with(|| Value::String(issuer.to_string()));
    let token_type = object
        .get("token_type")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut registered = RegisteredClaims::from_value(&response).map_err(|error| {
        debug!(error = %error, "introspection response has unusable registered claims");
        Error::TokenInactive
    })?;
    registered.token_type = token_type;

    Ok(Verdict::Active(Introspected {
        claims: Arc::new(response),
        registered,
    }))
}
