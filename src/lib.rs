//! Client core for the BCC cloud control plane.
//!
//! Resources (virtual machines, disks, networks, projects) are exposed by the
//! control plane as REST objects. This crate executes calls against it:
//! lock-aware retries, waiting for asynchronous tasks and paged listings, all
//! under one cancellable context.

pub mod client;
pub mod config;
pub mod logging;

pub use client::{Arguments, Error, Manager, Result, TransportConfig};
pub use config::Config;
pub use reqwest::Method;
pub use tokio_util::sync::CancellationToken;
