//! Outbound access to the Bitbucket Cloud REST API.

pub mod models;
pub mod pagination;

pub use models::PaginatedResponse;
pub use pagination::{PagePolicy, PageWalker};

use crate::config::{AuthConfig, AuthKind};
use crate::error::{Error, Result};
use base64::{Engine, engine::general_purpose};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, trace};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.bitbucket.org/2.0";

/// Cloneable handle; clones share the connection pool.
#[derive(Clone, Debug)]
pub struct BitbucketClient {
    http: reqwest::Client,
    base_url: Arc<str>,
    headers: HeaderMap,
}

impl BitbucketClient {
    /// Create a client for `base_url` authenticating with `auth`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the HTTP client cannot be created or the
    /// credentials cannot be encoded into a header.
    pub fn new(base_url: &str, auth: &AuthConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::transport(base_url, e))?;

        Ok(Self {
            http,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            headers: default_headers(auth).map_err(|e| Error::transport(base_url, e))?,
        })
    }

    /// Resolve `endpoint` (e.g. `repositories/acme`) against the base address.
    fn endpoint_url(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Url> {
        let raw = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        let mut url = Url::parse(&raw).map_err(|e| Error::transport(raw.as_str(), e))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }

    /// GET `endpoint` with `params` and decode the JSON body into `T`.
    ///
    /// # Errors
    ///
    /// `Error::Transport` when the request cannot be sent or the status is not
    /// a success, `Error::Decode` when the body does not match `T`.
    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<T> {
        let url = self.endpoint_url(endpoint, params)?;
        debug!(url = %url, "GET");

        let response = self
            .http
            .get(url.clone())
            .headers(self.headers.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::transport(url.as_str(), e))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::transport(url.as_str(), e))?;

        trace!(url = %url, bytes = body.len(), "response received");

        serde_json::from_slice(&body).map_err(|source| Error::Decode {
            url: url.to_string(),
            source,
        })
    }

    /// Count-only read: the `size` the API reports for the whole collection,
    /// without walking its pages.
    pub async fn count(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<u64> {
        let envelope: PaginatedResponse<serde_json::Value> = self.get(endpoint, params).await?;
        Ok(envelope.size)
    }
}

fn default_headers(auth: &AuthConfig) -> std::result::Result<HeaderMap, reqwest::header::InvalidHeaderValue> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    match auth.kind {
        AuthKind::Basic => {
            if let Some(basic) = &auth.basic {
                let credentials = format!("{}:{}", basic.username, basic.password.expose_secret());
                let encoded = general_purpose::STANDARD.encode(credentials);
                let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
        }
        AuthKind::OAuth2 => {
            debug!("oauth2 authentication is not implemented, sending requests without credentials");
        }
    }

    Ok(headers)
}
