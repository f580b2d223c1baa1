//! Control plane request core
//!
//! This module turns logical API calls into correctly sequenced HTTP
//! exchanges: retrying while an object is locked, waiting for the
//! asynchronous tasks a call spawned, and walking paged listings.
//!
//! # Module Structure
//!
//! - [`arguments`] - Query argument bag with override merging
//! - [`transport`] - TLS-capable HTTP client construction
//! - [`error`] - Structured API errors and the crate error type
//! - [`scope`] - Cancellation token and deadline for a call
//! - [`manager`] - Execution context and the request verbs
//! - [`executor`] - Lock-retry loop and response decoding
//! - [`tasks`] - Waiting for server-side jobs
//! - [`pagination`] - Multi-page listing aggregation
//! - [`kubeconfig`] - Kubernetes credential file export
//! - [`lock`] - Polling a resource's `locked` flag
//!
//! # Example
//!
//! ```ignore
//! use bcc_client::client::{Arguments, Manager, TransportConfig};
//!
//! async fn example() -> bcc_client::client::Result<()> {
//!     let manager = Manager::new("token", &TransportConfig::default())?;
//!     let disks: Vec<serde_json::Value> = manager
//!         .get_items("v1/disk", &Arguments::from([("vdc", "vdc-id")]))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod arguments;
pub mod error;
pub mod executor;
pub mod kubeconfig;
pub mod lock;
pub mod manager;
pub mod pagination;
pub mod scope;
pub mod tasks;
pub mod transport;

pub use arguments::Arguments;
pub use error::{ApiError, Error, Result};
pub use executor::TASKS_HEADER;
pub use manager::{
    Exchange, Manager, DEFAULT_BASE_URL, LOCK_POLL_INTERVAL, LOCK_TIMEOUT, RETRY_INTERVAL,
    TASK_TIMEOUT,
};
pub use pagination::PageCursor;
pub use scope::Scope;
pub use tasks::{Job, JobStatus, TaskId};
pub use transport::{TransportConfig, DEFAULT_USER_AGENT};
