//! Service principal credential for the Microsoft identity platform.
//!
//! A [`ClientSecretCredential`] is constructed without touching the network.
//! The first call to [`TokenCredential::get_token`] performs the OAuth2
//! client-credentials grant and the resulting token is cached until it is
//! close to expiry, after which the next caller refreshes it.

use std::fmt;

use async_trait::async_trait;
use tokio::{
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::{debug, info};

use crate::models::{TokenErrorResponse, TokenResponse};

/// Public cloud authority host.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// A cached token is refreshed once it is within this margin of expiring.
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

/// Upper bound on the lifetime honored from `expires_in`.
const MAX_LIFETIME: Duration = Duration::from_secs(24 * 3600);

/// Errors produced by [`TokenCredential`] implementations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The token request could not be sent or its response not read.
    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The token endpoint refused the grant.
    #[error("token endpoint returned {status}: {error}: {description}")]
    Rejected {
        /// HTTP status of the response
        status: u16,
        /// AAD error code, e.g. `invalid_client`
        error: String,
        /// AAD error description
        description: String,
    },
    /// The token endpoint response was not valid JSON.
    #[error("token response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A bearer token and the instant it stops being valid.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// The raw bearer token
    pub token: String,
    /// When the token expires
    pub expires_on: Instant,
}

impl AccessToken {
    /// Whether the token expires within `margin` from now.
    #[must_use]
    pub fn is_expiring(&self, margin: Duration) -> bool {
        Instant::now() + margin >= self.expires_on
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

#[async_trait]
/// Source of bearer tokens for Azure APIs.
pub trait TokenCredential: Send + Sync {
    /// Get a token valid for `scope`, e.g.
    /// `https://management.azure.com/.default`.
    async fn get_token(&self, scope: &str) -> Result<AccessToken, Error>;
}

/// Client-credentials (service principal) credential.
pub struct ClientSecretCredential {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    authority_host: String,
    http: reqwest::Client,
    cache: Mutex<Option<(String, AccessToken)>>,
}

impl fmt::Debug for ClientSecretCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecretCredential")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("authority_host", &self.authority_host)
            .finish_non_exhaustive()
    }
}

impl ClientSecretCredential {
    /// Create a new [`ClientSecretCredential`]. No network call is made.
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            http: reqwest::Client::new(),
            cache: Mutex::new(None),
        }
    }

    /// Use a different authority host, for sovereign clouds.
    #[must_use]
    pub fn with_authority_host(mut self, authority_host: impl Into<String>) -> Self {
        self.authority_host = authority_host.into().trim_end_matches('/').to_string();
        self
    }

    /// Share an existing HTTP client and its connection pool.
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    fn token_url(&self) -> String {
        format!(
            "{host}/{tenant}/oauth2/v2.0/token",
            host = self.authority_host,
            tenant = self.tenant_id
        )
    }

    async fn request_token(&self, scope: &str) -> Result<AccessToken, Error> {
        let url = self.token_url();
        debug!("requesting token from {url}");
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope),
        ];
        let resp = self.http.post(&url).form(&form).send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;

        if !status.is_success() {
            let err: TokenErrorResponse = serde_json::from_slice(&body).unwrap_or_default();
            return Err(Error::Rejected {
                status: status.as_u16(),
                error: err.error,
                description: err.error_description.unwrap_or_default(),
            });
        }

        let token: TokenResponse = serde_json::from_slice(&body)?;
        let lifetime = token
            .expires_in
            .map_or(DEFAULT_LIFETIME, Duration::from_secs)
            .min(MAX_LIFETIME);
        info!(
            "acquired token for client {client}, valid for {secs}s",
            client = self.client_id,
            secs = lifetime.as_secs()
        );
        Ok(AccessToken {
            token: token.access_token,
            expires_on: Instant::now()
                .checked_add(lifetime)
                .unwrap_or_else(Instant::now),
        })
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, Error> {
        // Held across the request: one grant in flight at a time.
        let mut cache = self.cache.lock().await;
        if let Some((cached_scope, token)) = cache.as_ref() {
            if cached_scope == scope && !token.is_expiring(REFRESH_MARGIN) {
                return Ok(token.clone());
            }
        }
        let token = self.request_token(scope).await?;
        *cache = Some((scope.to_string(), token.clone()));
        Ok(token)
    }
}
