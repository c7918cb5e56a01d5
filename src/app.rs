//! Wiring of the engine components into one shared state

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::credentials::{CredentialCipher, CredentialError, PassphraseCipher};
use crate::downloader::{DownloadQueue, DownloadSettings, Downloader};
use crate::hooks::{
    HookDispatcher, HttpTransport, HttpTransportConfig, TransportError, WebhookTransport,
};
use crate::ledger::{FjallStore, LedgerError};
use crate::observability::Metrics;
use crate::scheduler::{ScheduleError, Scheduler, SyncRunner};
use crate::sources::{RegistryError, SourceAdapter, SourceRegistry};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("webhook transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("credential error: {0}")]
    Credentials(#[from] CredentialError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("scheduler error: {0}")]
    Schedule(#[from] ScheduleError),
}

/// Shared application state
pub struct App {
    pub config: Config,
    pub store: Arc<FjallStore>,
    pub metrics: Arc<Metrics>,
    pub sources: Arc<SourceRegistry>,
    pub hooks: Arc<HookDispatcher>,
    pub downloader: Arc<Downloader>,
    pub queue: DownloadQueue,
    pub scheduler: Arc<Scheduler>,
    pub catalog: Arc<Catalog>,
}

impl App {
    /// Open the ledger under the configured data dir and deliver webhooks
    /// over HTTP. Must run inside a Tokio runtime.
    pub fn build(config: Config, adapters: Vec<Arc<dyn SourceAdapter>>) -> Result<Self, AppError> {
        let store = Arc::new(FjallStore::open(config.storage.ledger_path())?);
        let transport = Arc::new(HttpTransport::new(HttpTransportConfig {
            timeout: config.webhooks.timeout(),
            user_agent: config.webhooks.user_agent.clone(),
        })?);
        Self::assemble(config, store, adapters, transport)
    }

    /// Wire components over an existing store and transport
    pub fn assemble(
        config: Config,
        store: Arc<FjallStore>,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        transport: Arc<dyn WebhookTransport>,
    ) -> Result<Self, AppError> {
        let metrics = Arc::new(Metrics::new());

        let cipher: Option<Arc<dyn CredentialCipher>> = match &config.storage.passphrase {
            Some(passphrase) => Some(Arc::new(PassphraseCipher::new(passphrase)?)),
            None => None,
        };

        let mut registry = SourceRegistry::new(store.clone());
        for adapter in adapters {
            registry.register(adapter);
        }
        if let Some(cipher) = &cipher {
            let loaded = registry.load_credentials(cipher.as_ref())?;
            info!(loaded, "Source credentials loaded");
        }
        let sources = Arc::new(registry);

        let hooks = Arc::new(HookDispatcher::start(
            store.clone(),
            transport,
            config.webhooks.queue_capacity,
            metrics.clone(),
        ));

        let downloader = Arc::new(Downloader::new(
            store.clone(),
            sources.clone(),
            hooks.clone(),
            metrics.clone(),
            DownloadSettings {
                root: config.storage.downloads_root(),
                max_concurrent: config.downloads.max_concurrent,
                timeout: config.downloads.timeout(),
                progress_persist_interval: config.downloads.progress_persist_interval(),
            },
        ));
        let queue = DownloadQueue::start(downloader.clone(), config.downloads.queue_capacity);

        let runner = Arc::new(SyncRunner::new(
            store.clone(),
            sources.clone(),
            hooks.clone(),
            queue.clone(),
            metrics.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(runner));

        let catalog = Arc::new(Catalog::new(
            store.clone(),
            sources.clone(),
            scheduler.clone(),
            downloader.clone(),
            queue.clone(),
            cipher,
        ));

        Ok(Self {
            config,
            store,
            metrics,
            sources,
            hooks,
            downloader,
            queue,
            scheduler,
            catalog,
        })
    }

    /// Install product schedules; returns how many triggers are active
    pub fn start(&self) -> Result<usize, AppError> {
        Ok(self.scheduler.start()?)
    }

    /// Stop triggers and flush the ledger
    pub fn shutdown(&self) -> Result<(), AppError> {
        self.scheduler.shutdown();
        self.store.persist()?;
        Ok(())
    }
}
