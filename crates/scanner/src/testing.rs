//! In-memory store for scanner tests.
//!
//! Enabled for this crate's own tests and, through the `test-util` feature,
//! for downstream crates.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use camview_core::scan::{CursorPosition, ScanWindow};
use camview_core::types::{DbId, Timestamp};
use camview_db::models::file_record::UpsertFileRecord;

use crate::error::StoreError;
use crate::store::{CursorStore, FileStore, UpsertOutcome};

#[derive(Default)]
struct Inner {
    cursors: HashMap<DbId, CursorPosition>,
    saves: Vec<CursorPosition>,
    files: Vec<UpsertFileRecord>,
}

/// Cursor and file store mirroring the Postgres constraints: one row per
/// `(device_id, file_path)` and globally unique start times. An update onto
/// a start time held by another row keeps the stored times, as
/// `FileRecordRepo::update` does.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cursor(&self, device_id: DbId) -> Option<CursorPosition> {
        self.lock().cursors.get(&device_id).copied()
    }

    /// Overwrite a cursor without recording a save.
    pub fn set_cursor(&self, device_id: DbId, position: CursorPosition) {
        self.lock().cursors.insert(device_id, position);
    }

    /// Every position passed to `save_cursor`, in order.
    pub fn saved(&self) -> Vec<CursorPosition> {
        self.lock().saves.clone()
    }

    pub fn insert_record(&self, record: UpsertFileRecord) {
        self.lock().files.push(record);
    }

    pub fn records(&self, device_id: DbId) -> Vec<UpsertFileRecord> {
        self.lock()
            .files
            .iter()
            .filter(|r| r.device_id == device_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn load_cursor(&self, device_id: DbId) -> Result<Option<CursorPosition>, StoreError> {
        Ok(self.cursor(device_id))
    }

    async fn ensure_cursor(
        &self,
        device_id: DbId,
        initial: &CursorPosition,
    ) -> Result<CursorPosition, StoreError> {
        Ok(*self.lock().cursors.entry(device_id).or_insert(*initial))
    }

    async fn save_cursor(
        &self,
        device_id: DbId,
        position: &CursorPosition,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        match inner.cursors.get_mut(&device_id) {
            Some(cursor) => *cursor = *position,
            None => return Err(StoreError::CursorMissing(device_id)),
        }
        inner.saves.push(*position);
        Ok(())
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn upsert_file(&self, record: &UpsertFileRecord) -> Result<UpsertOutcome, StoreError> {
        let mut inner = self.lock();
        let existing = inner
            .files
            .iter()
            .position(|r| r.device_id == record.device_id && r.file_path == record.file_path);

        if let Some(index) = existing {
            let taken = inner
                .files
                .iter()
                .enumerate()
                .any(|(i, r)| i != index && r.start_time == record.start_time);
            let mut updated = record.clone();
            if taken {
                updated.start_time = inner.files[index].start_time;
                updated.end_time = inner.files[index].end_time;
            }
            inner.files[index] = updated;
            return Ok(UpsertOutcome::Updated);
        }
        if inner.files.iter().any(|r| r.start_time == record.start_time) {
            return Ok(UpsertOutcome::Skipped);
        }
        inner.files.push(record.clone());
        Ok(UpsertOutcome::Created)
    }

    async fn delete_stale(
        &self,
        device_id: DbId,
        window: ScanWindow,
        seen_since: Timestamp,
    ) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let before = inner.files.len();
        inner.files.retain(|r| {
            r.device_id != device_id
                || !window.contains(r.start_time)
                || r.updated_at >= seen_since
        });
        Ok((before - inner.files.len()) as u64)
    }
}
