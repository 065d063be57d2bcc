//! File record models.

use camview_core::media::{FileKind, StorageClass};
use camview_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One indexed device file.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FileRecord {
    pub id: DbId,
    pub device_id: DbId,
    pub file_path: String,
    pub channel: i32,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub length: i64,
    pub kind: String,
    pub duration: i64,
    pub disk: i32,
    pub cluster: i32,
    pub partition: i32,
    pub flags: Vec<String>,
    pub events: Vec<String>,
    pub storage: String,
    pub updated_at: Timestamp,
}

/// Values written for a file on every scan that observes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertFileRecord {
    pub device_id: DbId,
    pub file_path: String,
    pub channel: i32,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub length: i64,
    pub kind: FileKind,
    pub duration: i64,
    pub disk: i32,
    pub cluster: i32,
    pub partition: i32,
    pub flags: Vec<String>,
    pub events: Vec<String>,
    pub storage: StorageClass,
    pub updated_at: Timestamp,
}
