//! Background scan machinery shared by the aerial and statistics scans.
//!
//! - [`shared`] — the lock-protected coordination block (command, state,
//!   finished flag, parameters, published output).
//! - [`engine`] — the trait a scan algorithm implements.
//! - [`worker`] — the worker thread loop and its synchronous controller.
pub mod engine;
pub mod shared;
pub mod worker;

pub use engine::ScanEngine;
pub use shared::{ScanCommand, ScanParams, ScanProgress, ScanShared, ScanState};
pub use worker::{Worker, WorkerHints};
