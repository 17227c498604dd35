//! Persistence for devices, alerts, metric samples and the configuration
//!
//! ## Design
//!
//! - **Trait-based**: the engines only see [`StorageBackend`], so backends can be swapped
//! - **Async**: all operations are async for use from Tokio actors
//! - **Row-atomic**: every operation is atomic on its own; batch inserts use a transaction
//!
//! ## Backends
//!
//! - **SQLite** (default, feature `storage-sqlite`): embedded database file
//! - **In-Memory**: no persistence, for tests and throwaway runs
//!
//! ## Usage
//!
//! ```no_run
//! use lanwatch::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./lanwatch.db").await?;
//!     let devices = backend.find_all_devices(None).await?;
//!     println!("{} devices known", devices.len());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{QueryRange, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use schema::{
    AlertQuery, DeviceUpdate, HealthUpdate, InvalidDevice, MetricsSummary, NewAlert, NewDevice,
    NewMetricSample,
};
