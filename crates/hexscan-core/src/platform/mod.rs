//! Platform-specific functionality — drive classification for the
//! statistics gate, and worker thread priority.

pub mod drives;
pub mod priority;

pub use drives::{classify, drive_type_of, is_device, DriveType, FileClass};
