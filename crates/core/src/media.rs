//! File catalog vocabulary: what kind of file an entry is and where the
//! device keeps it.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Still images and video recordings are listed by separate device queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Picture,
    Video,
}

impl FileKind {
    pub const ALL: [FileKind; 2] = [FileKind::Picture, FileKind::Video];

    /// Name stored in the `file_records.kind` column.
    pub fn as_str(self) -> &'static str {
        match self {
            FileKind::Picture => "picture",
            FileKind::Video => "video",
        }
    }

    /// File type token the device's listing API filters on.
    pub fn device_type(self) -> &'static str {
        match self {
            FileKind::Picture => "jpg",
            FileKind::Video => "dav",
        }
    }

    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "picture" | "jpg" => Ok(FileKind::Picture),
            "video" | "dav" => Ok(FileKind::Video),
            other => Err(CoreError::Validation(format!("unknown file kind '{other}'"))),
        }
    }
}

/// Where the device stores a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageClass {
    Local,
    Ftp,
    Sftp,
}

impl StorageClass {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageClass::Local => "local",
            StorageClass::Ftp => "ftp",
            StorageClass::Sftp => "sftp",
        }
    }

    /// Derive the storage class from the scheme of a device file path.
    ///
    /// Files on the device's own disks are reported as absolute paths;
    /// files pushed to remote storage carry an `ftp://` or `sftp://` prefix.
    pub fn from_file_path(path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        if lower.starts_with("sftp://") {
            StorageClass::Sftp
        } else if lower.starts_with("ftp://") {
            StorageClass::Ftp
        } else {
            StorageClass::Local
        }
    }

    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "local" => Ok(StorageClass::Local),
            "ftp" => Ok(StorageClass::Ftp),
            "sftp" => Ok(StorageClass::Sftp),
            other => Err(CoreError::Validation(format!(
                "unknown storage class '{other}'"
            ))),
        }
    }
}
