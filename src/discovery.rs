use std::time::Duration;

use reqwest::Client;
use reqwest::Response;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::error::FetchError;

const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// The parts of an OpenID Provider / RFC 8414 metadata document we use
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DiscoveryDocument {
    pub(crate) jwks_uri: String,
    #[serde(default)]
    pub(crate) introspection_endpoint: Option<String>,
}

/// Well-known discovery URL for an issuer
pub(crate) fn discovery_url(issuer: &str) -> String {
    format!("{}{WELL_KNOWN_PATH}", issuer.trim_end_matches('/'))
}

pub(crate) async fn fetch_discovery_document(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> Result<DiscoveryDocument, FetchError> {
    debug!(url, "fetching discovery document");
    get_json(client, url, timeout).await
}

/// GET a JSON document, bounded by `timeout`
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> Result<T, FetchError> {
    let request = async {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }

        read_json(response, url).await
    };

    tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| FetchError::Timeout {
            url: url.to_string(),
        })?
}

/// Read the whole body, then parse it. A body cut off mid-stream is a
/// `Request` failure; only a complete body that is not valid JSON is `Decode`.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: Response,
    url: &str,
) -> Result<T, FetchError> {
    let body = response.bytes().await.map_err(|source| FetchError::Request {
        url: url.to_string(),
        source,
    })?;

    serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
        url: url.to_string(),
        source,
    })
}
