//! OBS event forwarding to the HTTP API
//!
//! Each event is posted as a form with a single `data` field holding the
//! JSON-encoded event. Failures are logged and dropped; they never touch
//! connection state.

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::ToolEvent;
use crate::config::ApiConfig;
use crate::credential::ValidatedCredential;

#[derive(Clone)]
pub struct EventForwarder {
    client: Client,
    endpoint: String,
    credential: ValidatedCredential,
    timeout: Duration,
}

impl EventForwarder {
    pub fn new(config: &ApiConfig, credential: ValidatedCredential) -> Self {
        Self {
            client: Client::new(),
            endpoint: config.event_url.clone(),
            credential,
            timeout: config.timeout(),
        }
    }

    /// Post one event
    pub async fn forward(&self, event: &ToolEvent) -> Result<()> {
        let data = serde_json::to_string(&event.to_json())
            .context("Failed to serialize OBS event")?;

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("api_key", self.credential.expose())])
            .form(&[("data", data)])
            .timeout(self.timeout)
            .send()
            .await
            .context("Failed to send OBS event")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Event API returned {}: {}", status, body);
        }

        debug!("Forwarded OBS event {} ({})", event.name, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn forwarder_for(server: &MockServer) -> EventForwarder {
        let config = ApiConfig {
            event_url: format!("{}/SEND_OBS_EVENT", server.uri()),
            timeout_ms: 500,
            ..Default::default()
        };
        EventForwarder::new(&config, ValidatedCredential::new_unchecked("key123"))
    }

    #[tokio::test]
    async fn test_posts_form_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/SEND_OBS_EVENT"))
            .and(query_param("api_key", "key123"))
            .and(body_string_contains("data="))
            .and(body_string_contains("SceneChanged"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let forwarder = forwarder_for(&server);
        forwarder
            .forward(&ToolEvent::new("SceneChanged", json!({"scene": "Main"})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = forwarder_for(&server)
            .forward(&ToolEvent::new("ExitStarted", json!(null)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
