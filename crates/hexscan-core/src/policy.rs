/// Background statistics gate.
///
/// Decides whether a document may run a statistics worker. The global
/// switch is checked first. A raw device is governed only by
/// `exclude_device`; an ordinary file only by the exclusion for its drive
/// type.
use crate::config::ScanOptions;
use crate::platform::{DriveType, FileClass};

pub fn can_do_stats(options: &ScanOptions, class: FileClass) -> bool {
    if !options.bg_stats {
        return false;
    }
    if class.is_device {
        return !options.exclude_device;
    }
    match class.drive {
        DriveType::Removable => !options.exclude_removable,
        DriveType::Network => !options.exclude_network,
        DriveType::CdRom => !options.exclude_optical,
        DriveType::Fixed | DriveType::Unknown => true,
    }
}
