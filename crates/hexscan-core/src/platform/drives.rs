/// Drive classification for a document's file.
///
/// The statistics gate only needs to know what kind of storage a file sits
/// on and whether it is a raw device, so this module answers exactly that:
/// `GetDriveTypeW` on Windows, the mount table on Linux.
use std::path::Path;

/// Drive type classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveType {
    Fixed,
    Removable,
    Network,
    CdRom,
    Unknown,
}

impl DriveType {
    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Fixed => "Fixed",
            Self::Removable => "Removable",
            Self::Network => "Network",
            Self::CdRom => "CD-ROM",
            Self::Unknown => "Unknown",
        }
    }
}

/// Everything the statistics policy needs to know about a document's file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileClass {
    pub drive: DriveType,
    pub is_device: bool,
}

impl FileClass {
    /// Class used for documents with no backing file.
    pub const IN_MEMORY: FileClass = FileClass {
        drive: DriveType::Fixed,
        is_device: false,
    };
}

/// Classify the storage behind `path`.
pub fn classify(path: &Path) -> FileClass {
    FileClass {
        drive: drive_type_of(path),
        is_device: is_device(path),
    }
}

// ─── Windows ────────────────────────────────────────────────────────────────

#[cfg(windows)]
pub fn drive_type_of(path: &Path) -> DriveType {
    use std::path::Component;
    use windows::Win32::Storage::FileSystem::GetDriveTypeW;

    // Drive type constants from the Windows API.
    const DRIVE_REMOVABLE_VAL: u32 = 2;
    const DRIVE_FIXED_VAL: u32 = 3;
    const DRIVE_REMOTE_VAL: u32 = 4;
    const DRIVE_CDROM_VAL: u32 = 5;

    let root = match path.components().next() {
        Some(Component::Prefix(prefix)) => {
            format!("{}\\", prefix.as_os_str().to_string_lossy())
        }
        _ => return DriveType::Unknown,
    };
    let root_wide: Vec<u16> = root.encode_utf16().chain(std::iter::once(0)).collect();
    let raw_type = unsafe { GetDriveTypeW(windows::core::PCWSTR(root_wide.as_ptr())) };
    match raw_type {
        DRIVE_FIXED_VAL => DriveType::Fixed,
        DRIVE_REMOVABLE_VAL => DriveType::Removable,
        DRIVE_REMOTE_VAL => DriveType::Network,
        DRIVE_CDROM_VAL => DriveType::CdRom,
        _ => DriveType::Unknown,
    }
}

#[cfg(windows)]
pub fn is_device(path: &Path) -> bool {
    path.to_string_lossy().starts_with(r"\\.\")
}

// ─── Linux ──────────────────────────────────────────────────────────────────

#[cfg(target_os = "linux")]
pub fn drive_type_of(path: &Path) -> DriveType {
    let Ok(mounts) = std::fs::read_to_string("/proc/self/mounts") else {
        return DriveType::Unknown;
    };
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    // Longest mount point that contains the file wins.
    let best = mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next()?;
            let mount_point = unescape_mount(fields.next()?);
            let fs_type = fields.next()?;
            Some((mount_point, fs_type))
        })
        .filter(|(mount_point, _)| path.starts_with(mount_point))
        .max_by_key(|(mount_point, _)| mount_point.len());

    match best {
        Some((mount_point, fs_type)) => classify_mount(&mount_point, fs_type),
        None => DriveType::Unknown,
    }
}

#[cfg(not(any(windows, target_os = "linux")))]
pub fn drive_type_of(_path: &Path) -> DriveType {
    DriveType::Unknown
}

#[cfg(unix)]
pub fn is_device(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata(path)
        .map(|meta| {
            let file_type = meta.file_type();
            file_type.is_block_device() || file_type.is_char_device()
        })
        .unwrap_or(false)
}

#[cfg(not(any(windows, unix)))]
pub fn is_device(_path: &Path) -> bool {
    false
}

/// Map a mount table entry to a drive type.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn classify_mount(mount_point: &str, fs_type: &str) -> DriveType {
    const NETWORK: &[&str] = &[
        "nfs", "nfs4", "cifs", "smb3", "smbfs", "sshfs", "fuse.sshfs", "9p", "afs", "ceph",
        "glusterfs",
    ];
    const OPTICAL: &[&str] = &["iso9660", "udf"];

    if NETWORK.contains(&fs_type) {
        DriveType::Network
    } else if OPTICAL.contains(&fs_type) {
        DriveType::CdRom
    } else if mount_point.starts_with("/media/") || mount_point.starts_with("/run/media/") {
        DriveType::Removable
    } else {
        DriveType::Fixed
    }
}

/// Mount points in `/proc/self/mounts` escape whitespace as octal (`\040`).
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn unescape_mount(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            let code: String = chars.by_ref().take(3).collect();
            match u8::from_str_radix(&code, 8) {
                Ok(byte) => out.push(byte as char),
                Err(_) => {
                    out.push('\\');
                    out.push_str(&code);
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}
