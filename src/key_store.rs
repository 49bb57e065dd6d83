//! Issuer-scoped signing key cache
//!
//! Key sets are fetched through the issuer's discovery document (or a
//! configured JWKS URI), cached per issuer and replaced as a whole on
//! refresh. Concurrent misses for one issuer share a single spawned fetch.
//!
//! ## Staleness
//!
//! A key set younger than the TTL is fresh. Between `ttl` and
//! `ttl + stale_grace` it is stale: keys found in it are still served and a
//! refresh is started in the background. Older sets are never used; callers
//! wait for a refetch and get `Error::KeyResolution` if it fails.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::future::Shared;
use futures::FutureExt;
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::jwk::PublicKeyUse;
use jsonwebtoken::Algorithm;
use jsonwebtoken::DecodingKey;
use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::VerifierConfig;
use crate::discovery::discovery_url;
use crate::discovery::fetch_discovery_document;
use crate::discovery::get_json;
use crate::error::key_resolution_error;
use crate::error::Error;
use crate::error::Result;

const MIN_REFRESH_TICK: Duration = Duration::from_millis(100);
const MAX_REFRESH_TICK: Duration = Duration::from_secs(60);

/// Public verification material of one signing key
pub struct Key {
    key_id: Option<String>,
    algorithm: Option<Algorithm>,
    decoding_key: DecodingKey,
}

impl Key {
    /// Build a key from a JWK. Returns `Ok(None)` for keys that are not
    /// meant for signatures.
    fn from_jwk(jwk: &Jwk) -> std::result::Result<Option<Self>, jsonwebtoken::errors::Error> {
        if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
            return Ok(None);
        }

        let algorithm = match &jwk.common.key_algorithm {
            None => None,
            Some(key_algorithm) => match signature_algorithm(key_algorithm) {
                Some(algorithm) => Some(algorithm),
                None => return Ok(None),
            },
        };

        Ok(Some(Self {
            key_id: jwk.common.key_id.clone(),
            algorithm,
            decoding_key: DecodingKey::from_jwk(jwk)?,
        }))
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// Algorithm the key is declared for, if the JWK carries `alg`
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// JWK `alg` values share their names with JWS algorithms; encryption
/// algorithms have no `Algorithm` counterpart and map to `None`.
fn signature_algorithm(key_algorithm: &jsonwebtoken::jwk::KeyAlgorithm) -> Option<Algorithm> {
    serde_json::to_value(key_algorithm)
        .ok()
        .and_then(|name| serde_json::from_value(name).ok())
}

/// The signing keys of one issuer, indexed by key id
#[derive(Debug, Default)]
pub struct KeySet {
    keys: Vec<Arc<Key>>,
    by_kid: HashMap<String, Arc<Key>>,
}

impl KeySet {
    pub(crate) fn from_jwks(jwks: &JwkSet) -> Self {
        let mut key_set = KeySet::default();

        for jwk in &jwks.keys {
            match Key::from_jwk(jwk) {
                Ok(Some(key)) => key_set.push(key),
                Ok(None) => debug!(kid = ?jwk.common.key_id, "skipping non-signing key"),
                Err(error) => warn!(
                    kid = ?jwk.common.key_id,
                    error = %error,
                    "skipping unusable key"
                ),
            }
        }

        key_set
    }

    fn push(&mut self, key: Key) {
        let key = Arc::new(key);
        if let Some(kid) = key.key_id() {
            self.by_kid
                .entry(kid.to_string())
                .or_insert_with(|| Arc::clone(&key));
        }
        self.keys.push(key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn get(&self, kid: &str) -> Option<&Arc<Key>> {
        self.by_kid.get(kid)
    }

    /// Find the key a token header points at.
    ///
    /// A header without `kid` is only accepted when the set holds exactly
    /// one key.
    pub(crate) fn lookup(&self, kid: Option<&str>) -> Result<Arc<Key>> {
        match kid {
            Some(kid) => self
                .get(kid)
                .cloned()
                .ok_or_else(|| Error::UnknownKey(kid.to_string())),
            None => match self.keys.as_slice() {
                [only] => Ok(Arc::clone(only)),
                _ => Err(Error::KeyIdMissing),
            },
        }
    }
}

/// Where an issuer's keys are fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum KeySource {
    /// Discovery document URL; its `jwks_uri` is followed on every fetch
    Discovery(String),
    /// JWKS URL used directly
    Jwks(String),
}

#[derive(Debug, Clone)]
pub(crate) struct KeyStoreSettings {
    pub(crate) ttl: Duration,
    pub(crate) stale_grace: Duration,
    pub(crate) min_refresh_interval: Duration,
    pub(crate) fetch_timeout: Duration,
    pub(crate) background_refresh: bool,
}

struct CachedKeySet {
    keys: Arc<KeySet>,
    fetched_at: Instant,
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<KeySet>>>>;

struct Inner {
    cache: RwLock<HashMap<String, CachedKeySet>>,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
    sources: HashMap<String, KeySource>,
    settings: KeyStoreSettings,
    client: Client,
    shutdown: CancellationToken,
}

/// Cache of signing key sets, keyed by issuer
///
/// Owned by one verifier. Dropping the store, or calling
/// [`KeyStore::shutdown`], stops the background refresh and aborts
/// outstanding fetches.
pub struct KeyStore {
    inner: Arc<Inner>,
}

impl KeyStore {
    /// Build the key store for a verifier configuration.
    ///
    /// Must be called inside a Tokio runtime when background refresh is
    /// enabled.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfiguration` if the configuration is invalid
    /// or the HTTP client cannot be built.
    pub fn from_config(config: &VerifierConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_client(config, config.build_http_client()?))
    }

    pub(crate) fn with_client(config: &VerifierConfig, client: Client) -> Self {
        let source = match (&config.jwks_uri, &config.discovery_uri) {
            (Some(jwks_uri), _) => KeySource::Jwks(jwks_uri.clone()),
            (None, Some(discovery_uri)) => KeySource::Discovery(discovery_uri.clone()),
            (None, None) => KeySource::Discovery(discovery_url(&config.issuer)),
        };

        let settings = KeyStoreSettings {
            ttl: config.jwks_cache_ttl,
            stale_grace: config.stale_key_grace,
            min_refresh_interval: config.min_key_refresh_interval,
            fetch_timeout: config.fetch_timeout,
            background_refresh: config.background_refresh,
        };

        Self::new(
            settings,
            client,
            HashMap::from([(config.issuer.clone(), source)]),
        )
    }

    pub(crate) fn new(
        settings: KeyStoreSettings,
        client: Client,
        sources: HashMap<String, KeySource>,
    ) -> Self {
        let inner = Arc::new(Inner {
            cache: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            sources,
            settings,
            client,
            shutdown: CancellationToken::new(),
        });

        if inner.settings.background_refresh {
            spawn_refresh_loop(&inner);
        }

        Self { inner }
    }

    /// Resolve the key `kid` of `issuer`, fetching the issuer's key set when needed
    ///
    /// # Errors
    /// - `Error::UnknownKey` if a successfully fetched key set lacks `kid`
    /// - `Error::KeyIdMissing` if `kid` is `None` and the set has several keys
    /// - `Error::KeyResolution` if the key set cannot be fetched in time
    pub async fn resolve_key(&self, issuer: &str, kid: Option<&str>) -> Result<Arc<Key>> {
        let settings = &self.inner.settings;

        let cached = self.inner.cached(issuer).await;
        let seen = cached.as_ref().map(|(_, fetched_at)| *fetched_at);

        if let Some((keys, fetched_at)) = cached {
            let age = fetched_at.elapsed();
            if age < settings.ttl {
                match keys.lookup(kid) {
                    Err(Error::UnknownKey(kid)) if age < settings.min_refresh_interval => {
                        return Err(Error::UnknownKey(kid));
                    }
                    Err(Error::UnknownKey(_)) => {
                        debug!(issuer, kid = ?kid, "unknown key id, refetching key set");
                    }
                    found => return found,
                }
            } else if age < settings.ttl + settings.stale_grace {
                if let Ok(key) = keys.lookup(kid) {
                    debug!(issuer, "serving stale key set while refreshing");
                    drop(self.inner.fetch(issuer, seen));
                    return Ok(key);
                }
            }
        }

        let keys = self.inner.fetch(issuer, seen).await?;
        keys.lookup(kid)
    }

    /// Make sure a key set for `issuer` is cached, fetching it if there is none
    ///
    /// # Errors
    /// Returns `Error::KeyResolution` if the fetch fails.
    pub async fn preload(&self, issuer: &str) -> Result<()> {
        self.inner.fetch(issuer, None).await.map(|_| ())
    }

    /// Number of keys currently cached for `issuer`
    pub async fn cached_key_count(&self, issuer: &str) -> Option<usize> {
        self.inner
            .cached(issuer)
            .await
            .map(|(keys, _)| keys.len())
    }

    /// Stop background refresh and abort outstanding fetches
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("shutting down key store");
            self.inner.shutdown.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl Drop for KeyStore {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("sources", &self.inner.sources)
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn cached(&self, issuer: &str) -> Option<(Arc<KeySet>, Instant)> {
        let cache = self.cache.read().await;
        let cached = cache.get(issuer)?;
        Some((Arc::clone(&cached.keys), cached.fetched_at))
    }

    async fn expired_issuers(&self) -> Vec<(String, Instant)> {
        let cache = self.cache.read().await;
        cache
            .iter()
            .filter(|(_, cached)| cached.fetched_at.elapsed() >= self.settings.ttl)
            .map(|(issuer, cached)| (issuer.clone(), cached.fetched_at))
            .collect()
    }

    /// The cached key set, if it was stored after the caller's snapshot `seen`.
    /// Never waits: a contended cache reads as not refreshed.
    fn refreshed_since(&self, issuer: &str, seen: Option<Instant>) -> Option<Arc<KeySet>> {
        let cache = self.cache.try_read().ok()?;
        let cached = cache.get(issuer)?;
        (Some(cached.fetched_at) != seen).then(|| Arc::clone(&cached.keys))
    }

    fn source(&self, issuer: &str) -> KeySource {
        self.sources
            .get(issuer)
            .cloned()
            .unwrap_or_else(|| KeySource::Discovery(discovery_url(issuer)))
    }

    /// Join the in-flight fetch for `issuer`, or start one.
    ///
    /// `seen` is when the key set the caller looked at was fetched. If a
    /// fetch completed after that, its result is returned instead of
    /// fetching again. The fetch runs in its own task, so it completes and
    /// updates the cache even if every waiter goes away.
    fn fetch(self: &Arc<Self>, issuer: &str, seen: Option<Instant>) -> SharedFetch {
        if self.shutdown.is_cancelled() {
            return futures::future::ready(Err(shut_down_error()))
                .boxed()
                .shared();
        }

        let mut in_flight = self.in_flight.lock();
        if let Some(fetch) = in_flight.get(issuer) {
            return fetch.clone();
        }

        // A finished fetch stores its keys before leaving `in_flight`.
        if let Some(keys) = self.refreshed_since(issuer, seen) {
            return futures::future::ready(Ok(keys)).boxed().shared();
        }

        let inner = Arc::clone(self);
        let task_issuer = issuer.to_string();
        let task = tokio::spawn(async move {
            let result = tokio::select! {
                _ = inner.shutdown.cancelled() => Err(shut_down_error()),
                result = tokio::time::timeout(
                    inner.settings.fetch_timeout,
                    inner.fetch_and_store(&task_issuer),
                ) => result.unwrap_or_else(|_| {
                    Err(Error::KeyResolution(format!(
                        "fetching keys for {task_issuer} timed out"
                    )))
                }),
            };

            inner.in_flight.lock().remove(&task_issuer);

            if let Err(error) = &result {
                warn!(issuer = %task_issuer, error = %error, "key set fetch failed");
            }
            result
        });

        let fetch = async move {
            task.await.unwrap_or_else(|error| {
                Err(Error::KeyResolution(format!("key fetch task failed: {error}")))
            })
        }
        .boxed()
        .shared();

        in_flight.insert(issuer.to_string(), fetch.clone());
        fetch
    }

    async fn fetch_and_store(&self, issuer: &str) -> Result<Arc<KeySet>> {
        let timeout = self.settings.fetch_timeout;

        let jwks_uri = match self.source(issuer) {
            KeySource::Jwks(jwks_uri) => jwks_uri,
            KeySource::Discovery(url) => {
                fetch_discovery_document(&self.client, &url, timeout)
                    .await
                    .map_err(key_resolution_error)?
                    .jwks_uri
            }
        };

        debug!(issuer, jwks_uri = %jwks_uri, "fetching key set");
        let jwks: JwkSet = get_json(&self.client, &jwks_uri, timeout)
            .await
            .map_err(key_resolution_error)?;

        let keys = Arc::new(KeySet::from_jwks(&jwks));
        if keys.is_empty() {
            warn!(issuer, "issuer published no usable signing keys");
        }

        let mut cache = self.cache.write().await;
        cache.insert(
            issuer.to_string(),
            CachedKeySet {
                keys: Arc::clone(&keys),
                fetched_at: Instant::now(),
            },
        );

        info!(issuer, key_count = keys.len(), "key set cached");
        Ok(keys)
    }
}

fn shut_down_error() -> Error {
    Error::KeyResolution("key store is shut down".to_string())
}

fn refresh_tick(ttl: Duration) -> Duration {
    (ttl / 4).clamp(MIN_REFRESH_TICK, MAX_REFRESH_TICK)
}

/// Refresh key sets as their TTL runs out.
///
/// The loop only holds a weak reference, so it never keeps a dropped store
/// alive, and it exits as soon as the store is shut down.
fn spawn_refresh_loop(inner: &Arc<Inner>) {
    let store = Arc::downgrade(inner);
    let shutdown = inner.shutdown.clone();
    let period = refresh_tick(inner.settings.ttl);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(inner) = store.upgrade() else {
                break;
            };

            for (issuer, fetched_at) in inner.expired_issuers().await {
                debug!(issuer = %issuer, "key set reached its TTL, refreshing");
                // Failures are logged by the fetch task; stale keys stay usable within grace.
                let _ = inner.fetch(&issuer, Some(fetched_at)).await;
            }
        }

        debug!("key set refresh loop stopped");
    });
}
