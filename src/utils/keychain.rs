//! Secure API key storage using the OS keychain
//!
//! Backed by the platform secret service (Secret Service / KWallet on Linux,
//! Credential Manager on Windows, Keychain on macOS). Keys are stored per
//! (namespace, provider) pair so several configurations can coexist.

use crate::error::{ConfigError, Result};
use crate::ports::credentials::CredentialStore;
use keyring::Entry;

/// Keychain service name for livecap
const SERVICE_NAME: &str = "livecap";

/// Keychain-backed credential store.
pub struct KeychainStore;

impl KeychainStore {
    pub fn new() -> Self {
        Self
    }

    fn account(namespace: &str, provider: &str) -> String {
        format!("{}:{}", namespace, provider)
    }

    /// Saves an API key to the OS keychain.
    pub fn set(&self, namespace: &str, provider: &str, api_key: &str) -> Result<()> {
        let account = Self::account(namespace, provider);
        let entry = Entry::new(SERVICE_NAME, &account)?;
        entry.set_password(api_key)?;

        log::info!("API key saved for {}", account);
        Ok(())
    }

    /// Deletes an API key from the OS keychain.
    pub fn delete(&self, namespace: &str, provider: &str) -> Result<()> {
        let account = Self::account(namespace, provider);
        let entry = Entry::new(SERVICE_NAME, &account)?;
        entry.delete_password()?;

        log::info!("API key deleted for {}", account);
        Ok(())
    }
}

impl Default for KeychainStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeychainStore {
    fn get(&self, namespace: &str, provider: &str) -> Result<String, ConfigError> {
        let account = Self::account(namespace, provider);

        Entry::new(SERVICE_NAME, &account)
            .and_then(|entry| entry.get_password())
            .map_err(|err| {
                log::debug!("Keychain lookup for {} failed: {}", account, err);
                ConfigError::MissingCredential {
                    namespace: namespace.to_string(),
                    provider: provider.to_string(),
                }
            })
    }
}
