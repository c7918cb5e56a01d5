//! Source adapter system
//!
//! Remote catalogs plug into the engine through the [`SourceAdapter`] trait.
//! The engine never talks to a remote API directly.
//!
//! ## Key Components
//!
//! - [`SourceAdapter`] - Trait each catalog integration implements
//! - [`SourceRegistry`] - Adapters by source id, plus credential plumbing
//! - [`FileInfo`] - Descriptor handed to `download_file`
//!
//! ## Example
//!
//! ```rust,ignore
//! use bulksync::sources::SourceRegistry;
//!
//! let mut registry = SourceRegistry::new(store.clone());
//! registry.register(Arc::new(MyCatalogAdapter::new()));
//! let adapter = registry.get("my-catalog")?;
//! let deliveries = adapter.fetch_deliveries("product-14").await?;
//! ```

mod registry;
mod traits;
mod types;

pub use registry::{RegistryError, SourceRegistry};
pub use traits::{AdapterError, SourceAdapter};
pub use types::{
    CredentialField, CredentialMap, DeliveryInfo, FileInfo, ProductInfo, SourceInfo,
};
