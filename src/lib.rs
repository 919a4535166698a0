//! # Acquisition Buffer
//!
//! A durable buffer for time-stamped multi-channel sample vectors, such as
//! those produced by an EEG amplifier, served back by positional range
//! queries.
//!
//! ## Core Concepts
//!
//! - **Records**: one sample per channel plus a caller-supplied timestamp
//! - **Sessions**: independent recordings, each with its own store file
//! - **Workers**: one thread per session executes its requests in order
//! - **Registry**: maps session handles to workers
//!
//! ## Example
//!
//! ```ignore
//! use buffer_server::{BufferClient, BufferConfig, Record};
//!
//! let client = BufferClient::new(BufferConfig::with_data_dir("./buffers"))?;
//! let channels: Vec<String> = (0..25).map(|c| format!("ch{c}")).collect();
//! let session = client.start(&channels, "buffer_1.db")?;
//!
//! client.append(session, Record::new(vec![0.0; 25], 0.0))?;
//! let window = client.get_data(session, Some(0), Some(10))?;
//!
//! client.stop(session)?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod records;
pub mod registry;
pub mod store;
pub mod types;
pub mod worker;

// Re-exports
pub use client::BufferClient;
pub use config::BufferConfig;
pub use error::{BufferError, Result};
pub use records::{RecoveryReport, SampleLog, StoreHeader};
pub use registry::SessionRegistry;
pub use store::SessionStore;
pub use types::*;
pub use worker::{Request, Response, SessionAddress, SessionWorker, WorkerMonitor, WorkerState};
