#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use bulksync::app::App;
use bulksync::config::Config;
use bulksync::hooks::{TransportError, WebhookTransport};
use bulksync::ledger::{Delivery, File, FjallStore, NewWebhook, Product, Webhook, ids};
use bulksync::sources::{
    AdapterError, CredentialField, CredentialMap, DeliveryInfo, FileInfo, ProductInfo,
    SourceAdapter,
};

pub const SOURCE_ID: &str = "mock";

/// How `download_file` behaves for a given file external id
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Stream the configured content immediately
    Normal,
    /// Wait for a permit on the adapter gate, then stream
    Gated,
    /// Never finish on its own; only cancellation ends it
    Block,
    /// Fail with a network error
    Fail(String),
    /// Stream this many bytes, then fail with a network error
    FailAfter(u64, String),
    /// Stream this many bytes, then wait for cancellation
    StallAfter(u64),
}

/// In-process source adapter with scripted catalog and download behavior
pub struct MockAdapter {
    id: String,
    products: Mutex<Vec<ProductInfo>>,
    deliveries: Mutex<HashMap<String, Result<Vec<DeliveryInfo>, String>>>,
    files: Mutex<HashMap<(String, String), Result<Vec<FileInfo>, String>>>,
    contents: Mutex<HashMap<String, Vec<u8>>>,
    behaviors: Mutex<HashMap<String, Behavior>>,
    credentials: Mutex<CredentialMap>,
    gate: Semaphore,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            id: SOURCE_ID.to_string(),
            products: Mutex::new(Vec::new()),
            deliveries: Mutex::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
            contents: Mutex::new(HashMap::new()),
            behaviors: Mutex::new(HashMap::new()),
            credentials: Mutex::new(CredentialMap::new()),
            gate: Semaphore::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn add_product(&self, external_id: &str, name: &str, schedule: &str) {
        self.products.lock().unwrap().push(ProductInfo {
            external_id: external_id.to_string(),
            name: name.to_string(),
            description: format!("{} description", name),
            check_schedule: schedule.to_string(),
        });
    }

    pub fn set_deliveries(&self, product_ext: &str, deliveries: Vec<DeliveryInfo>) {
        self.deliveries
            .lock()
            .unwrap()
            .insert(product_ext.to_string(), Ok(deliveries));
    }

    pub fn fail_deliveries(&self, product_ext: &str, message: &str) {
        self.deliveries
            .lock()
            .unwrap()
            .insert(product_ext.to_string(), Err(message.to_string()));
    }

    pub fn set_files(&self, product_ext: &str, delivery_ext: &str, files: Vec<FileInfo>) {
        self.files.lock().unwrap().insert(
            (product_ext.to_string(), delivery_ext.to_string()),
            Ok(files),
        );
    }

    pub fn fail_files(&self, product_ext: &str, delivery_ext: &str, message: &str) {
        self.files.lock().unwrap().insert(
            (product_ext.to_string(), delivery_ext.to_string()),
            Err(message.to_string()),
        );
    }

    pub fn set_content(&self, file_ext: &str, content: &[u8]) {
        self.contents
            .lock()
            .unwrap()
            .insert(file_ext.to_string(), content.to_vec());
    }

    pub fn set_behavior(&self, file_ext: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(file_ext.to_string(), behavior);
    }

    /// Let `n` gated downloads proceed
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn credentials(&self) -> CredentialMap {
        self.credentials.lock().unwrap().clone()
    }

    fn behavior(&self, file_ext: &str) -> Behavior {
        self.behaviors
            .lock()
            .unwrap()
            .get(file_ext)
            .cloned()
            .unwrap_or(Behavior::Normal)
    }

    fn content(&self, file_ext: &str) -> Vec<u8> {
        self.contents
            .lock()
            .unwrap()
            .get(file_ext)
            .cloned()
            .unwrap_or_else(|| format!("content of {}", file_ext).into_bytes())
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceAdapter for MockAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Mock Catalog"
    }

    fn credential_fields(&self) -> Vec<CredentialField> {
        vec![CredentialField {
            key: "api_key".to_string(),
            label: "API key".to_string(),
            kind: "password".to_string(),
            required: true,
            help_text: None,
        }]
    }

    fn set_credentials(&self, credentials: CredentialMap) {
        *self.credentials.lock().unwrap() = credentials;
    }

    async fn validate_credentials(&self) -> Result<(), AdapterError> {
        match self.credentials.lock().unwrap().get("api_key") {
            Some(key) if key == "good" => Ok(()),
            _ => Err(AdapterError::Auth("api key rejected".to_string())),
        }
    }

    async fn fetch_products(&self) -> Result<Vec<ProductInfo>, AdapterError> {
        Ok(self.products.lock().unwrap().clone())
    }

    async fn fetch_deliveries(
        &self,
        product_external_id: &str,
    ) -> Result<Vec<DeliveryInfo>, AdapterError> {
        match self.deliveries.lock().unwrap().get(product_external_id) {
            Some(Ok(deliveries)) => Ok(deliveries.clone()),
            Some(Err(message)) => Err(AdapterError::Network(message.clone())),
            None => Ok(vec![DeliveryInfo::implicit(product_external_id)]),
        }
    }

    async fn fetch_files(
        &self,
        product_external_id: &str,
        delivery_external_id: &str,
    ) -> Result<Vec<FileInfo>, AdapterError> {
        let key = (
            product_external_id.to_string(),
            delivery_external_id.to_string(),
        );
        match self.files.lock().unwrap().get(&key) {
            Some(Ok(files)) => Ok(files.clone()),
            Some(Err(message)) => Err(AdapterError::Network(message.clone())),
            None => Ok(Vec::new()),
        }
    }

    async fn download_file(
        &self,
        file: &FileInfo,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        progress: &mut (dyn FnMut(u64, u64) + Send),
        cancel: &CancellationToken,
    ) -> Result<(), AdapterError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        let behavior = self.behavior(&file.external_id);
        match &behavior {
            Behavior::Normal | Behavior::FailAfter(..) | Behavior::StallAfter(_) => {}
            Behavior::Gated => {
                tokio::select! {
                    permit = self.gate.acquire() => {
                        permit
                            .map_err(|_| AdapterError::Network("gate closed".to_string()))?
                            .forget();
                    }
                    _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
                }
            }
            Behavior::Block => {
                cancel.cancelled().await;
                return Err(AdapterError::Cancelled);
            }
            Behavior::Fail(message) => return Err(AdapterError::Network(message.clone())),
        }

        let content = self.content(&file.external_id);
        let total = content.len() as u64;
        let mut written = 0u64;
        for chunk in content.chunks(4) {
            if cancel.is_cancelled() {
                return Err(AdapterError::Cancelled);
            }
            sink.write_all(chunk).await?;
            written += chunk.len() as u64;
            progress(written, total);

            match &behavior {
                Behavior::FailAfter(limit, message) if written >= *limit => {
                    return Err(AdapterError::Network(message.clone()));
                }
                Behavior::StallAfter(limit) if written >= *limit => {
                    cancel.cancelled().await;
                    return Err(AdapterError::Cancelled);
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Webhook transport that records every delivery instead of sending it
#[derive(Default)]
pub struct RecordingTransport {
    deliveries: Mutex<Vec<Recorded>>,
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: serde_json::Value,
}

impl RecordingTransport {
    pub fn all(&self) -> Vec<Recorded> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Event names delivered to `url`, in arrival order
    pub fn events_for(&self, url: &str) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|r| r.url == url)
            .filter_map(|r| r.body["event"].as_str().map(str::to_string))
            .collect()
    }

    pub fn bodies_for(&self, url: &str, event: &str) -> Vec<serde_json::Value> {
        self.all()
            .into_iter()
            .filter(|r| r.url == url && r.body["event"] == event)
            .map(|r| r.body)
            .collect()
    }

    pub fn count(&self, url: &str, event: &str) -> usize {
        self.bodies_for(url, event).len()
    }
}

#[async_trait]
impl WebhookTransport for RecordingTransport {
    async fn deliver(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Bytes,
    ) -> Result<(), TransportError> {
        let body = serde_json::from_slice(&body)
            .map_err(|e| TransportError::RequestFailed(e.to_string()))?;
        self.deliveries.lock().unwrap().push(Recorded {
            url: url.to_string(),
            headers: headers.clone(),
            body,
        });
        Ok(())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub app: App,
    pub adapter: Arc<MockAdapter>,
    pub transport: Arc<RecordingTransport>,
}

/// Minimal config rooted in the temp dir
pub fn test_config(dir: &TempDir) -> Config {
    let config_toml = format!(
        r#"
[storage]
data_dir = "{}"

[downloads]
max_concurrent = 3
timeout_secs = 60
progress_persist_ms = 10
        "#,
        dir.path().display()
    );
    toml::from_str(&config_toml).expect("Failed to parse test config")
}

pub fn harness() -> Harness {
    harness_with(|_| {})
}

pub fn harness_with(configure: impl FnOnce(&mut Config)) -> Harness {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = test_config(&dir);
    configure(&mut config);

    let store = Arc::new(
        FjallStore::open(config.storage.ledger_path()).expect("Failed to open test store"),
    );
    let adapter = Arc::new(MockAdapter::new());
    let transport = Arc::new(RecordingTransport::default());
    let app = App::assemble(config, store, vec![adapter.clone()], transport.clone())
        .expect("Failed to assemble app");

    Harness {
        dir,
        app,
        adapter,
        transport,
    }
}

pub const ALL_HOOK: &str = "http://hooks.test/all";

impl Harness {
    /// Register a wildcard listener at [`ALL_HOOK`]
    pub fn listen_all(&self) -> Webhook {
        self.app
            .hooks
            .create_webhook(NewWebhook {
                name: "all".to_string(),
                url: ALL_HOOK.to_string(),
                events: vec!["*".to_string()],
                headers: BTreeMap::new(),
            })
            .unwrap()
    }

    pub fn seed_product(&self, external_id: &str, auto_download: bool, schedule: &str) -> Product {
        let now = Utc::now();
        let product = Product {
            id: ids::product_id(SOURCE_ID, external_id),
            source_id: SOURCE_ID.to_string(),
            external_id: external_id.to_string(),
            name: format!("Product {}", external_id),
            description: String::new(),
            auto_download,
            schedule: schedule.to_string(),
            last_checked_at: None,
            created_at: now,
            updated_at: now,
        };
        self.app.store.upsert_product(&product).unwrap();
        product
    }

    /// Persist a delivery + file under the product, as discovery would
    pub fn seed_file(&self, product: &Product, delivery_ext: &str, file_ext: &str) -> File {
        self.seed_file_with(product, delivery_ext, file_ext, |_| {})
    }

    pub fn seed_file_with(
        &self,
        product: &Product,
        delivery_ext: &str,
        file_ext: &str,
        configure: impl FnOnce(&mut File),
    ) -> File {
        let now = Utc::now();
        let delivery = Delivery {
            id: ids::delivery_id(&product.id, delivery_ext),
            product_id: product.id.clone(),
            external_id: delivery_ext.to_string(),
            name: format!("Delivery {}", delivery_ext),
            published_at: None,
            expires_at: None,
            created_at: now,
        };
        self.app.store.insert_delivery_if_absent(&delivery).unwrap();

        let mut file = File {
            id: ids::file_id(&product.id, delivery_ext, file_ext),
            delivery_id: delivery.id.clone(),
            product_id: product.id.clone(),
            source_id: product.source_id.clone(),
            external_id: file_ext.to_string(),
            file_name: format!("{}.zip", file_ext),
            file_size: 0,
            expected_checksum: String::new(),
            checksum_algorithm: String::new(),
            download_uri: format!("mock://{}", file_ext),
            released_at: None,
            skipped: false,
            created_at: now,
            updated_at: now,
        };
        configure(&mut file);
        self.app.store.insert_file_if_absent(&file).unwrap();
        file
    }
}

pub fn delivery(external_id: &str) -> DeliveryInfo {
    DeliveryInfo {
        external_id: external_id.to_string(),
        name: format!("Delivery {}", external_id),
        published_at: Some(Utc::now()),
        expires_at: None,
    }
}

pub fn file_info(external_id: &str) -> FileInfo {
    FileInfo {
        external_id: external_id.to_string(),
        file_name: format!("{}.zip", external_id),
        file_size: 0,
        checksum: String::new(),
        checksum_algorithm: String::new(),
        download_uri: format!("mock://{}", external_id),
        released_at: None,
    }
}

/// Poll `condition` every 10ms for up to 5s
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
