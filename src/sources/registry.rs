use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::traits::{AdapterError, SourceAdapter};
use super::types::{CredentialMap, SourceInfo};
use crate::credentials::{CredentialCipher, CredentialError};
use crate::ledger::{FjallStore, LedgerError, Source};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("source not found: {0}")]
    NotFound(String),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("credential error: {0}")]
    Credentials(#[from] CredentialError),
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

/// Registry mapping source ids to adapter instances
#[derive(Clone)]
pub struct SourceRegistry {
    adapters: BTreeMap<String, Arc<dyn SourceAdapter>>,
    store: Arc<FjallStore>,
}

impl SourceRegistry {
    pub fn new(store: Arc<FjallStore>) -> Self {
        Self {
            adapters: BTreeMap::new(),
            store,
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        let id = adapter.id().to_string();
        info!(source_id = %id, name = adapter.name(), "Registered source adapter");
        self.adapters.insert(id, adapter);
    }

    pub fn get(&self, source_id: &str) -> Result<Arc<dyn SourceAdapter>, RegistryError> {
        self.adapters
            .get(source_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(source_id.to_string()))
    }

    pub fn has_adapter(&self, source_id: &str) -> bool {
        self.adapters.contains_key(source_id)
    }

    pub fn list(&self) -> Vec<Arc<dyn SourceAdapter>> {
        self.adapters.values().cloned().collect()
    }

    /// All registered adapters merged with their ledger state, sorted by name
    pub fn list_sources(&self) -> Result<Vec<SourceInfo>, RegistryError> {
        let mut sources = self
            .adapters
            .keys()
            .map(|id| self.source_info(id))
            .collect::<Result<Vec<_>, _>>()?;
        sources.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sources)
    }

    pub fn source_info(&self, source_id: &str) -> Result<SourceInfo, RegistryError> {
        let adapter = self.get(source_id)?;
        let persisted = self.store.get_source(source_id)?;

        Ok(SourceInfo {
            id: adapter.id().to_string(),
            name: adapter.name().to_string(),
            enabled: persisted.as_ref().is_some_and(|s| s.enabled),
            has_credentials: persisted.as_ref().is_some_and(Source::has_credentials),
            last_sync_at: persisted.and_then(|s| s.last_sync_at),
            credential_fields: adapter.credential_fields(),
        })
    }

    /// Persist the enabled flag and, when given, new credentials.
    ///
    /// New credentials are encrypted into the source blob and pushed to the
    /// adapter. Without new credentials, the existing blob (if any) is
    /// decrypted and re-applied to the adapter.
    pub fn update_source(
        &self,
        source_id: &str,
        enabled: bool,
        credentials: Option<CredentialMap>,
        cipher: Option<&dyn CredentialCipher>,
    ) -> Result<Source, RegistryError> {
        let adapter = self.get(source_id)?;
        let existing = self.store.get_source(source_id)?;
        let now = Utc::now();

        let mut credentials_enc = existing
            .as_ref()
            .map(|s| s.credentials_enc.clone())
            .unwrap_or_default();

        match credentials.filter(|c| !c.is_empty()) {
            Some(credentials) => {
                let cipher = cipher.ok_or(CredentialError::CipherUnavailable)?;
                let plaintext =
                    serde_json::to_vec(&credentials).map_err(CredentialError::InvalidPayload)?;
                credentials_enc = cipher.encrypt(&plaintext)?;
                adapter.set_credentials(credentials);
            }
            None if !credentials_enc.is_empty() => {
                if let Some(cipher) = cipher {
                    match decrypt_credentials(cipher, &credentials_enc) {
                        Ok(existing) => adapter.set_credentials(existing),
                        Err(e) => warn!(source_id, error = %e, "Stored credentials unreadable"),
                    }
                }
            }
            None => {}
        }

        let source = Source {
            id: source_id.to_string(),
            name: adapter.name().to_string(),
            enabled,
            credentials_enc,
            last_sync_at: existing.as_ref().and_then(|s| s.last_sync_at),
            created_at: existing.as_ref().map(|s| s.created_at).unwrap_or(now),
            updated_at: now,
        };
        self.store.upsert_source(&source)?;

        info!(source_id, enabled, "Source updated");
        Ok(source)
    }

    /// Apply credentials to the adapter and ask it to validate them
    pub async fn test_credentials(
        &self,
        source_id: &str,
        credentials: CredentialMap,
    ) -> Result<(), RegistryError> {
        let adapter = self.get(source_id)?;
        adapter.set_credentials(credentials);
        adapter.validate_credentials().await?;
        Ok(())
    }

    /// Decrypt persisted credentials and push them into their adapters.
    /// Returns how many adapters received credentials.
    pub fn load_credentials(&self, cipher: &dyn CredentialCipher) -> Result<usize, RegistryError> {
        let mut loaded = 0;
        for source in self.store.list_sources()? {
            if !source.has_credentials() {
                continue;
            }
            let Some(adapter) = self.adapters.get(&source.id) else {
                debug!(source_id = %source.id, "No adapter for persisted source");
                continue;
            };
            match decrypt_credentials(cipher, &source.credentials_enc) {
                Ok(credentials) => {
                    adapter.set_credentials(credentials);
                    loaded += 1;
                }
                Err(e) => warn!(source_id = %source.id, error = %e, "Failed to load credentials"),
            }
        }
        Ok(loaded)
    }
}

fn decrypt_credentials(
    cipher: &dyn CredentialCipher,
    blob: &[u8],
) -> Result<CredentialMap, CredentialError> {
    let plaintext = cipher.decrypt(blob)?;
    Ok(serde_json::from_slice(&plaintext)?)
}
