//! HexScan Core — background scans of open documents.
//!
//! This crate contains all scan logic with zero UI dependencies. A
//! [`document::Document`] owns up to two background workers that read the
//! file through their own private handles while the foreground keeps
//! working:
//!
//! - the **aerial** scan downsamples the file into an RGB bitmap;
//! - the **statistics** scan counts how often each byte value occurs.
//!
//! # Modules
//!
//! - [`scan`] — Coordination block, engine trait and the generic worker
//!   state machine with its synchronous controller.
//! - [`aerial`] — Aerial bitmap geometry, engine and subsystem.
//! - [`stats`] — Byte histogram counters, engine and subsystem.
//! - [`document`] — The foreground owner that edits, gates and drives scans.
//! - [`layout`] / [`source`] — Extent list and the private-handle reader.
//! - [`colour`] — Byte-to-RGB lookup used by the aerial scan.
//! - [`policy`] / [`platform`] — Background statistics gate, drive
//!   classification and worker thread priority.
//! - [`config`] — Serializable scan options.
//! - [`report`] — JSON/CSV export of finished statistics.
pub mod aerial;
pub mod colour;
pub mod config;
pub mod document;
pub mod error;
pub mod layout;
pub mod platform;
pub mod policy;
pub mod report;
pub mod scan;
pub mod source;
pub mod stats;

pub use config::ScanOptions;
pub use document::{DocNotice, Document};
pub use error::ScanError;
