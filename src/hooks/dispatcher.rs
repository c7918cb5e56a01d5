use bytes::Bytes;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::events::{Event, is_valid_event};
use super::transport::WebhookTransport;
use crate::ledger::{FjallStore, LedgerError, NewWebhook, Webhook};
use crate::observability::Metrics;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("invalid event name: {0}")]
    InvalidEvent(String),

    #[error("invalid webhook url: {0}")]
    InvalidUrl(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("webhook not found: {0}")]
    NotFound(u64),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, HookError>;

/// Partial update for an existing webhook
#[derive(Debug, Clone, Default)]
pub struct WebhookUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub headers: Option<BTreeMap<String, String>>,
    pub enabled: Option<bool>,
}

/// One pending delivery of a serialized event to one listener
#[derive(Debug, Clone)]
struct DeliveryJob {
    webhook_id: u64,
    event: &'static str,
    url: String,
    headers: BTreeMap<String, String>,
    body: Bytes,
}

/// Fans events out to subscribed webhook listeners.
///
/// `emit` never blocks and never fails: matching deliveries are pushed onto
/// a bounded channel and a background task performs one attempt per job.
/// A full channel drops the delivery.
pub struct HookDispatcher {
    store: Arc<FjallStore>,
    jobs: mpsc::Sender<DeliveryJob>,
}

impl HookDispatcher {
    /// Create the dispatcher and spawn its delivery loop on the current runtime
    pub fn start(
        store: Arc<FjallStore>,
        transport: Arc<dyn WebhookTransport>,
        capacity: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(delivery_loop(rx, transport, metrics));
        info!(capacity, "Webhook dispatcher started");

        Self { store, jobs: tx }
    }

    /// Queue the event for every enabled listener subscribed to its kind
    pub fn emit(&self, event: Event) {
        let name = event.kind.as_str();

        let webhooks = match self.store.list_webhooks() {
            Ok(webhooks) => webhooks,
            Err(e) => {
                warn!(event = name, error = %e, "Failed to load webhooks");
                return;
            }
        };

        let mut targets = webhooks
            .into_iter()
            .filter(|w| w.enabled && w.subscribes_to(name))
            .peekable();
        if targets.peek().is_none() {
            debug!(event = name, "No listeners for event");
            return;
        }

        let body = match serde_json::to_vec(&event) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                warn!(event = name, error = %e, "Failed to serialize event");
                return;
            }
        };

        for webhook in targets {
            let job = DeliveryJob {
                webhook_id: webhook.id,
                event: name,
                url: webhook.url,
                headers: webhook.headers,
                body: body.clone(),
            };
            if let Err(e) = self.jobs.try_send(job) {
                warn!(webhook_id = webhook.id, event = name, error = %e, "Webhook delivery dropped");
            }
        }
    }

    pub fn create_webhook(&self, new: NewWebhook) -> Result<Webhook> {
        if new.name.trim().is_empty() {
            return Err(HookError::MissingField("name"));
        }
        validate_url(&new.url)?;
        let events = normalize_events(&new.events)?;

        let webhook = self.store.create_webhook(NewWebhook { events, ..new })?;
        info!(webhook_id = webhook.id, name = %webhook.name, "Webhook registered");
        Ok(webhook)
    }

    pub fn update_webhook(&self, id: u64, update: WebhookUpdate) -> Result<Webhook> {
        let mut webhook = self.get_webhook(id)?;

        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(HookError::MissingField("name"));
            }
            webhook.name = name;
        }
        if let Some(url) = update.url {
            validate_url(&url)?;
            webhook.url = url;
        }
        if let Some(events) = update.events {
            webhook.events = normalize_events(&events)?;
        }
        if let Some(headers) = update.headers {
            webhook.headers = headers;
        }
        if let Some(enabled) = update.enabled {
            webhook.enabled = enabled;
        }
        webhook.updated_at = Utc::now();

        self.store.update_webhook(&webhook)?;
        Ok(webhook)
    }

    pub fn delete_webhook(&self, id: u64) -> Result<()> {
        if !self.store.delete_webhook(id)? {
            return Err(HookError::NotFound(id));
        }
        info!(webhook_id = id, "Webhook deleted");
        Ok(())
    }

    pub fn get_webhook(&self, id: u64) -> Result<Webhook> {
        self.store.get_webhook(id)?.ok_or(HookError::NotFound(id))
    }

    pub fn list_webhooks(&self) -> Result<Vec<Webhook>> {
        Ok(self.store.list_webhooks()?)
    }
}

async fn delivery_loop(
    mut rx: mpsc::Receiver<DeliveryJob>,
    transport: Arc<dyn WebhookTransport>,
    metrics: Arc<Metrics>,
) {
    while let Some(job) = rx.recv().await {
        let transport = transport.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            match transport.deliver(&job.url, &job.headers, job.body).await {
                Ok(()) => {
                    metrics.webhook_delivered();
                    debug!(webhook_id = job.webhook_id, event = job.event, "Webhook delivered");
                }
                Err(e) => {
                    metrics.webhook_failed();
                    warn!(
                        webhook_id = job.webhook_id,
                        event = job.event,
                        url = %job.url,
                        error = %e,
                        "Webhook delivery failed"
                    );
                }
            }
        });
    }
    debug!("Webhook delivery loop stopped");
}

fn validate_url(url: &str) -> Result<()> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(HookError::MissingField("url"));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(HookError::InvalidUrl(url.to_string()));
    }
    Ok(())
}

fn normalize_events(events: &[String]) -> Result<Vec<String>> {
    if events.is_empty() {
        return Err(HookError::MissingField("events"));
    }
    let mut normalized = Vec::with_capacity(events.len());
    for event in events {
        if !is_valid_event(event) {
            return Err(HookError::InvalidEvent(event.clone()));
        }
        let event = event.trim().to_ascii_lowercase();
        if !normalized.contains(&event) {
            normalized.push(event);
        }
    }
    Ok(normalized)
}
