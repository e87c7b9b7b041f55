//! API key gate
//!
//! Decides whether a usable key exists and whether the verification service
//! accepts it. Only a key that came back `Valid` becomes a
//! [`ValidatedCredential`], which is what the relay connector requires.

use anyhow::Result;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::SecretStore;
use crate::config::Config;
use crate::error::ConnectorError;

/// Exact `status` value the verification service returns for a good key
pub const VALID_KEY_STATUS: &str = "Valid API Key";

/// Outcome of one verification attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    /// The service answered and did not accept the key
    Invalid,
    /// The service could not be reached or failed; the key may be fine
    NetworkError,
}

/// An API key the verification service accepted during this session
#[derive(Clone, PartialEq, Eq)]
pub struct ValidatedCredential(String);

impl ValidatedCredential {
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn new_unchecked(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl fmt::Debug for ValidatedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValidatedCredential(***)")
    }
}

#[derive(Debug, Deserialize)]
struct CheckKeyResponse {
    #[serde(default)]
    status: String,
}

pub struct CredentialGate {
    store: Arc<dyn SecretStore>,
    client: Client,
    verify_url: String,
    service: String,
    account: String,
    timeout: Duration,
}

impl CredentialGate {
    pub fn new(config: &Config, store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            client: Client::new(),
            verify_url: config.api.verify_url.clone(),
            service: config.credential.service.clone(),
            account: config.credential.account.clone(),
            timeout: config.api.timeout(),
        }
    }

    /// Read the stored key. Vault errors are logged and count as "no key".
    pub fn stored_credential(&self) -> Option<String> {
        match self.store.get(&self.service, &self.account) {
            Ok(Some(token)) if !token.trim().is_empty() => Some(token),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to read API key from credential store: {:#}", e);
                None
            }
        }
    }

    pub fn has_stored_credential(&self) -> bool {
        self.stored_credential().is_some()
    }

    /// Ask the verification service about `token`. Never returns `Valid`
    /// unless the service explicitly said so.
    pub async fn validate(&self, token: &str) -> ValidationResult {
        let token = token.trim();
        if token.is_empty() {
            return ValidationResult::Invalid;
        }

        let response = match self
            .client
            .get(&self.verify_url)
            .query(&[("api_key", token)])
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("API key verification request failed: {}", e);
                return ValidationResult::NetworkError;
            }
        };

        let status = response.status();
        if status.is_server_error() {
            warn!("API key verification service returned {}", status);
            return ValidationResult::NetworkError;
        }
        if !status.is_success() {
            info!("API key verification returned {}", status);
            return ValidationResult::Invalid;
        }

        match response.json::<CheckKeyResponse>().await {
            Ok(body) if body.status == VALID_KEY_STATUS => ValidationResult::Valid,
            Ok(body) => {
                debug!("API key rejected with status {:?}", body.status);
                ValidationResult::Invalid
            }
            Err(e) if e.is_timeout() => {
                warn!("Timed out reading verification response: {}", e);
                ValidationResult::NetworkError
            }
            Err(e) => {
                warn!("Unreadable verification response: {}", e);
                ValidationResult::Invalid
            }
        }
    }

    /// Validate `token` and, if accepted, hand out the capability to connect
    pub async fn admit(&self, token: &str) -> Result<ValidatedCredential, ConnectorError> {
        match self.validate(token).await {
            ValidationResult::Valid => Ok(ValidatedCredential(token.trim().to_string())),
            ValidationResult::Invalid => Err(ConnectorError::CredentialInvalid),
            ValidationResult::NetworkError => Err(ConnectorError::VerificationNetworkError(
                format!("could not reach {}", self.verify_url),
            )),
        }
    }

    /// Admit the stored key, if there is one
    pub async fn admit_stored(&self) -> Result<ValidatedCredential, ConnectorError> {
        let token = self
            .stored_credential()
            .ok_or(ConnectorError::CredentialMissing)?;
        self.admit(&token).await
    }

    /// Store an accepted key, replacing any previous one
    pub fn persist(&self, credential: &ValidatedCredential) -> Result<()> {
        self.store
            .set(&self.service, &self.account, credential.expose())?;
        info!("API key saved to credential store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::MemorySecretStore;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gate_for(server_uri: &str, store: Arc<dyn SecretStore>) -> CredentialGate {
        let mut config = Config::default();
        config.api.verify_url = format!("{}/checkkey", server_uri);
        config.api.timeout_ms = 300;
        CredentialGate::new(&config, store)
    }

    async fn mount_status(server: &MockServer, key: &str, status: u16, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/checkkey"))
            .and(query_param("api_key", key))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_valid_key() {
        let server = MockServer::start().await;
        mount_status(&server, "good", 200, serde_json::json!({"status": "Valid API Key"})).await;

        let gate = gate_for(&server.uri(), Arc::new(MemorySecretStore::default()));
        assert_eq!(gate.validate("good").await, ValidationResult::Valid);
        assert_eq!(gate.admit(" good ").await.unwrap().expose(), "good");
    }

    #[tokio::test]
    async fn test_wrong_status_is_invalid() {
        let server = MockServer::start().await;
        mount_status(&server, "bad", 200, serde_json::json!({"status": "Invalid API Key"})).await;

        let gate = gate_for(&server.uri(), Arc::new(MemorySecretStore::default()));
        assert_eq!(gate.validate("bad").await, ValidationResult::Invalid);
        assert_eq!(
            gate.admit("bad").await.unwrap_err(),
            ConnectorError::CredentialInvalid
        );
    }

    #[tokio::test]
    async fn test_client_error_is_invalid_and_server_error_is_network() {
        let server = MockServer::start().await;
        mount_status(&server, "denied", 403, serde_json::json!({})).await;
        mount_status(&server, "flaky", 503, serde_json::json!({})).await;

        let gate = gate_for(&server.uri(), Arc::new(MemorySecretStore::default()));
        assert_eq!(gate.validate("denied").await, ValidationResult::Invalid);
        assert_eq!(gate.validate("flaky").await, ValidationResult::NetworkError);
    }

    #[tokio::test]
    async fn test_non_json_body_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/checkkey"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Valid API Key"))
            .mount(&server)
            .await;

        let gate = gate_for(&server.uri(), Arc::new(MemorySecretStore::default()));
        assert_eq!(gate.validate("anything").await, ValidationResult::Invalid);
    }

    #[tokio::test]
    async fn test_timeout_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/checkkey"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "Valid API Key"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let gate = gate_for(&server.uri(), Arc::new(MemorySecretStore::default()));
        assert_eq!(gate.validate("slow").await, ValidationResult::NetworkError);
        assert!(matches!(
            gate.admit("slow").await,
            Err(ConnectorError::VerificationNetworkError(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_network_error() {
        let gate = gate_for("http://127.0.0.1:9", Arc::new(MemorySecretStore::default()));
        assert_eq!(gate.validate("key").await, ValidationResult::NetworkError);
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let gate = gate_for(&server.uri(), Arc::new(MemorySecretStore::default()));
        assert_eq!(gate.validate("   ").await, ValidationResult::Invalid);
    }

    #[tokio::test]
    async fn test_stored_credential_lookup() {
        let empty = gate_for("http://127.0.0.1:9", Arc::new(MemorySecretStore::default()));
        assert!(!empty.has_stored_credential());
        assert_eq!(
            empty.admit_stored().await.unwrap_err(),
            ConnectorError::CredentialMissing
        );

        let store = MemorySecretStore::with_secret("BotOfTheSpecter", "apiAuthKey", "abc");
        let gate = gate_for("http://127.0.0.1:9", Arc::new(store));
        assert!(gate.has_stored_credential());
        assert_eq!(gate.stored_credential().as_deref(), Some("abc"));
    }

    #[test]
    fn test_persist_replaces_key() {
        let store = Arc::new(MemorySecretStore::with_secret(
            "BotOfTheSpecter",
            "apiAuthKey",
            "old",
        ));
        let gate = gate_for("http://127.0.0.1:9", store.clone());

        gate.persist(&ValidatedCredential::new_unchecked("new")).unwrap();
        assert_eq!(
            store.get("BotOfTheSpecter", "apiAuthKey").unwrap().as_deref(),
            Some("new")
        );
    }

    #[test]
    fn test_persist_surfaces_vault_failure() {
        let gate = gate_for(
            "http://127.0.0.1:9",
            Arc::new(MemorySecretStore::read_only()),
        );
        assert!(gate
            .persist(&ValidatedCredential::new_unchecked("key"))
            .is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let credential = ValidatedCredential::new_unchecked("secret-key");
        assert!(!format!("{:?}", credential).contains("secret-key"));
    }
}
