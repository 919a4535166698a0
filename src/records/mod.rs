//! Record log implementation.
//!
//! Records are stored as fixed-size frames in an append-only log, so any
//! position can be located with O(1) arithmetic.

mod frame;
mod log;

pub use log::{RecoveryReport, SampleLog, StoreHeader};
