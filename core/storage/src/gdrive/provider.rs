//! Google-backed adapter factory.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use healthsync_common::{Error, Result};

use super::auth::TokenSource;
use super::client::{DriveClient, GoogleEndpoints};
use super::sheets::SheetsClient;
use crate::provider::{RemoteAdapters, RemoteSession};

/// Per-request timeout; expiry surfaces as a network error.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Hands out Drive and Sheets clients bound to a freshly validated token.
pub struct GoogleAdapters {
    http: Client,
    tokens: Arc<dyn TokenSource>,
    endpoints: GoogleEndpoints,
}

impl GoogleAdapters {
    /// Create a new factory.
    ///
    /// # Errors
    /// - HTTP client could not be constructed
    pub fn new(tokens: Arc<dyn TokenSource>, endpoints: GoogleEndpoints) -> Result<Self> {
        let http = Client::builder()
            .user_agent("HealthSync/0.1")
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            tokens,
            endpoints,
        })
    }

    /// Shared HTTP client, e.g. for a token source.
    pub fn http(&self) -> &Client {
        &self.http
    }
}

#[async_trait]
impl RemoteAdapters for GoogleAdapters {
    fn name(&self) -> &str {
        "google"
    }

    async fn connect(&self) -> Result<RemoteSession> {
        let token = self.tokens.refresh_if_needed().await?;
        debug!("Bound Google adapters to current access token");

        Ok(RemoteSession {
            files: Arc::new(DriveClient::new(
                self.http.clone(),
                token.clone(),
                self.endpoints.clone(),
            )),
            sheets: Arc::new(SheetsClient::new(
                self.http.clone(),
                token,
                self.endpoints.clone(),
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdrive::StaticTokenSource;
    use crate::provider::CSV_MIME_TYPE;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_connect_binds_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(header("authorization", "Bearer static-token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "files": [] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let adapters = GoogleAdapters::new(
            Arc::new(StaticTokenSource::new("static-token")),
            GoogleEndpoints {
                drive_api: server.uri(),
                drive_upload: server.uri(),
                sheets_api: server.uri(),
            },
        )
        .unwrap();

        let session = adapters.connect().await.unwrap();
        let found = session
            .files
            .find_file("health_data_2025.csv", CSV_MIME_TYPE, None)
            .await
            .unwrap();
        assert!(found.is_none());
        assert_eq!(adapters.name(), "google");
    }
}
