//! Secret store backed by the platform credential vault

use anyhow::{Context, Result};
#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::Mutex;

/// Durable, non-plaintext storage for secrets
pub trait SecretStore: Send + Sync {
    /// Read a secret, `None` if no entry exists
    fn get(&self, service: &str, account: &str) -> Result<Option<String>>;

    /// Create or replace a secret
    fn set(&self, service: &str, account: &str, secret: &str) -> Result<()>;
}

/// macOS Keychain, Windows Credential Manager or the Linux kernel keyring
pub struct KeyringStore;

impl SecretStore for KeyringStore {
    fn get(&self, service: &str, account: &str) -> Result<Option<String>> {
        let entry = keyring::Entry::new(service, account)
            .with_context(|| format!("Failed to open keyring entry {}/{}", service, account))?;

        match entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read secret from keyring"),
        }
    }

    fn set(&self, service: &str, account: &str, secret: &str) -> Result<()> {
        let entry = keyring::Entry::new(service, account)
            .with_context(|| format!("Failed to open keyring entry {}/{}", service, account))?;

        entry
            .set_password(secret)
            .context("Failed to write secret to keyring")
    }
}

/// In-memory store for tests
#[cfg(test)]
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<(String, String), String>>,
    fail_writes: bool,
}

#[cfg(test)]
impl MemorySecretStore {
    pub fn with_secret(service: &str, account: &str, secret: &str) -> Self {
        let store = Self::default();
        store
            .entries
            .lock()
            .unwrap()
            .insert((service.to_string(), account.to_string()), secret.to_string());
        store
    }

    /// A store whose writes always fail
    pub fn read_only() -> Self {
        Self {
            fail_writes: true,
            ..Default::default()
        }
    }
}

#[cfg(test)]
impl SecretStore for MemorySecretStore {
    fn get(&self, service: &str, account: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(&(service.to_string(), account.to_string()))
            .cloned())
    }

    fn set(&self, service: &str, account: &str, secret: &str) -> Result<()> {
        if self.fail_writes {
            anyhow::bail!("vault is locked");
        }
        self.entries
            .lock()
            .unwrap()
            .insert((service.to_string(), account.to_string()), secret.to_string());
        Ok(())
    }
}
