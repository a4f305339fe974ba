//! Access tokens for the Google APIs.
//!
//! The interactive OAuth2 consent flow lives outside this crate. What lives
//! here is the step every export batch starts with: turn whatever credential
//! we hold into a bearer token that is valid right now.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicErrorResponseType};
use oauth2::{
    AuthType, ClientId, ClientSecret, HttpRequest, HttpResponse, RefreshToken, RequestTokenError,
    TokenResponse, TokenUrl,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::RwLock;
use tracing::info;
use zeroize::Zeroizing;

use healthsync_common::error::AUTH_REVOKED_CODE;
use healthsync_common::{Error, Result};

/// OAuth2 token endpoint.
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Bearer token bound to one batch of remote operations.
#[derive(Clone)]
pub struct AccessToken(Zeroizing<String>);

impl AccessToken {
    /// Wrap a raw bearer token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(Zeroizing::new(token.into()))
    }

    /// The raw token value.
    pub fn secret(&self) -> &str {
        self.0.as_str()
    }

    /// Value for the `Authorization` header.
    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.secret())
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken([REDACTED])")
    }
}

/// OAuth2 tokens with expiration tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    /// Access token for API requests.
    pub access_token: String,
    /// Refresh token for obtaining new access tokens.
    pub refresh_token: String,
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
}

impl Tokens {
    /// Check if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        // Consider expired if less than 5 minutes remaining
        self.expires_at < Utc::now() + Duration::minutes(5)
    }
}

/// Client registration used for the refresh-token grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
}

fn default_token_url() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

/// Source of valid access tokens.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Return a token that is valid now, refreshing it first if needed.
    async fn refresh_if_needed(&self) -> Result<AccessToken>;
}

/// Token source that always returns the same token.
pub struct StaticTokenSource {
    token: AccessToken,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(token),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn refresh_if_needed(&self) -> Result<AccessToken> {
        Ok(self.token.clone())
    }
}

/// Token source that refreshes expired access tokens with the refresh-token grant.
pub struct RefreshingTokenSource {
    http: Client,
    client: OAuthClientConfig,
    tokens: RwLock<Tokens>,
}

impl RefreshingTokenSource {
    /// Create a token source with initial tokens.
    pub fn new(http: Client, client: OAuthClientConfig, tokens: Tokens) -> Self {
        Self {
            http,
            client,
            tokens: RwLock::new(tokens),
        }
    }

    /// Get the current tokens (useful for persistence).
    pub async fn tokens(&self) -> Tokens {
        self.tokens.read().await.clone()
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Tokens> {
        let token_url = TokenUrl::new(self.client.token_url.clone())
            .map_err(|e| Error::InvalidInput(format!("Invalid token URL: {}", e)))?;
        let oauth = BasicClient::new(ClientId::new(self.client.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client.client_secret.clone()))
            .set_token_uri(token_url)
            .set_auth_type(AuthType::RequestBody);

        let http_client = |request: HttpRequest| {
            let http = self.http.clone();
            async move { send_token_request(&http, request).await }
        };
        let token_result = oauth
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&http_client)
            .await
            .map_err(refresh_error)?;

        let expires_in = token_result
            .expires_in()
            .and_then(|d| Duration::from_std(d).ok())
            .unwrap_or_else(|| Duration::hours(1));

        Ok(Tokens {
            access_token: token_result.access_token().secret().clone(),
            // Refresh tokens may or may not be returned in refresh response
            refresh_token: token_result
                .refresh_token()
                .map(|t| t.secret().clone())
                .unwrap_or_else(|| refresh_token.to_string()),
            expires_at: Utc::now() + expires_in,
        })
    }
}

/// Run a token endpoint request on the shared HTTP client.
async fn send_token_request(
    http: &Client,
    request: HttpRequest,
) -> std::result::Result<HttpResponse, reqwest::Error> {
    let (parts, body) = request.into_parts();
    let response = http
        .request(parts.method, parts.uri.to_string())
        .headers(parts.headers)
        .body(body)
        .send()
        .await?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();

    let mut out = HttpResponse::new(body);
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    Ok(out)
}

fn refresh_error(err: RequestTokenError<reqwest::Error, BasicErrorResponse>) -> Error {
    match err {
        RequestTokenError::ServerResponse(response)
            if *response.error() == BasicErrorResponseType::InvalidGrant =>
        {
            Error::storage(
                AUTH_REVOKED_CODE,
                response
                    .error_description()
                    .cloned()
                    .unwrap_or_else(|| "Refresh token revoked".to_string()),
            )
        }
        RequestTokenError::ServerResponse(response) => Error::storage(
            "TOKEN_REFRESH_FAILED",
            format!("Token refresh failed: {}", response),
        ),
        RequestTokenError::Request(e) => Error::Network(format!("Token refresh failed: {}", e)),
        RequestTokenError::Parse(e, _) => Error::storage(
            "MALFORMED_RESPONSE",
            format!("Failed to parse token response: {}", e),
        ),
        RequestTokenError::Other(message) => Error::storage(
            "TOKEN_REFRESH_FAILED",
            format!("Token refresh failed: {}", message),
        ),
    }
}

#[async_trait]
impl TokenSource for RefreshingTokenSource {
    async fn refresh_if_needed(&self) -> Result<AccessToken> {
        {
            let tokens = self.tokens.read().await;
            if !tokens.is_expired() {
                return Ok(AccessToken::new(tokens.access_token.clone()));
            }
        }

        let mut tokens = self.tokens.write().await;

        // Double-check after acquiring write lock
        if !tokens.is_expired() {
            return Ok(AccessToken::new(tokens.access_token.clone()));
        }

        info!("Refreshing expired access token");
        *tokens = self.refresh(&tokens.refresh_token).await?;

        Ok(AccessToken::new(tokens.access_token.clone()))
    }
}
