//! offline-worker - An offline cache manager for static sites.
//!
//! The worker pre-caches an asset manifest at install time, purges caches of
//! older versions on activation, and answers intercepted requests with a
//! network-first strategy for page navigations and cache-first for
//! everything else. Navigations that fail entirely get an offline document.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use offline_worker::{
//!     HttpNetwork, MemoryCacheStorage, OfflineWorker, Registration, Request, WorkerConfig,
//! };
//!
//! # async fn example() -> offline_worker::Result<()> {
//! let config = WorkerConfig::new().with_origin("http://127.0.0.1:8000");
//! let storage = Arc::new(MemoryCacheStorage::new());
//! let worker = OfflineWorker::new(&config, HttpNetwork::new()?, storage)?;
//!
//! let registration = Registration::new();
//! registration.install(worker).await?;
//!
//! let outcome = registration
//!     .fetch(&Request::navigate("http://127.0.0.1:8000/index.html")?)
//!     .await?;
//! println!("{:?}", outcome.source());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod events;
pub mod format;
pub mod manifest;
pub mod network;
pub mod registration;
pub mod request;
pub mod stats;
pub mod storage;
pub mod worker;

// Re-export main types for convenience
pub use config::{AppConfig, ServerConfig, StorageBackend, StorageConfig, WorkerConfig};
pub use error::{Error, Result};
pub use events::{EventOutcome, MessageData, MessageOutcome, Notification, WorkerEvent, WorkerMessage};
pub use manifest::{AssetManifest, CacheNames};
pub use network::{HttpNetwork, Network};
pub use registration::{InstallReport, Registration, RegistrationStatus};
pub use request::{CacheKey, Method, Request, RequestKind, RequestMode, Response};
pub use stats::{ResponseSource, WorkerStats};
pub use storage::{CacheStorage, DiskCacheStorage, MemoryCacheStorage};
pub use worker::{ActivateOutcome, FetchOutcome, InstallOutcome, OfflineWorker, WorkerState};
