//! Persistence seams of the scanner and their Postgres implementation.

use async_trait::async_trait;
use camview_core::scan::{CursorPosition, ScanWindow};
use camview_core::types::{DbId, Timestamp};
use camview_db::models::file_record::UpsertFileRecord;
use camview_db::repositories::{FileRecordRepo, InsertOutcome, ScanCursorRepo};
use camview_db::DbPool;

use crate::error::StoreError;

/// What an upsert did to the file catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// Another writer holds the path or the start time; nothing changed.
    Skipped,
}

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load_cursor(&self, device_id: DbId) -> Result<Option<CursorPosition>, StoreError>;

    /// Insert `initial` unless a cursor exists; return the stored cursor.
    async fn ensure_cursor(
        &self,
        device_id: DbId,
        initial: &CursorPosition,
    ) -> Result<CursorPosition, StoreError>;

    async fn save_cursor(
        &self,
        device_id: DbId,
        position: &CursorPosition,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Update by `(device_id, file_path)`, inserting when no row matched.
    async fn upsert_file(&self, record: &UpsertFileRecord) -> Result<UpsertOutcome, StoreError>;

    /// Remove the device's files starting inside `window` that were not
    /// written since `seen_since`.
    async fn delete_stale(
        &self,
        device_id: DbId,
        window: ScanWindow,
        seen_since: Timestamp,
    ) -> Result<u64, StoreError>;
}

/// Postgres-backed store over the `camview-db` repositories.
#[derive(Clone)]
pub struct PgScanStore {
    pool: DbPool,
}

impl PgScanStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorStore for PgScanStore {
    async fn load_cursor(&self, device_id: DbId) -> Result<Option<CursorPosition>, StoreError> {
        let cursor = ScanCursorRepo::find(&self.pool, device_id).await?;
        Ok(cursor.map(|c| c.position()))
    }

    async fn ensure_cursor(
        &self,
        device_id: DbId,
        initial: &CursorPosition,
    ) -> Result<CursorPosition, StoreError> {
        let cursor = ScanCursorRepo::ensure(&self.pool, device_id, initial).await?;
        Ok(cursor.position())
    }

    async fn save_cursor(
        &self,
        device_id: DbId,
        position: &CursorPosition,
    ) -> Result<(), StoreError> {
        if ScanCursorRepo::save(&self.pool, device_id, position).await? {
            Ok(())
        } else {
            Err(StoreError::CursorMissing(device_id))
        }
    }
}

#[async_trait]
impl FileStore for PgScanStore {
    async fn upsert_file(&self, record: &UpsertFileRecord) -> Result<UpsertOutcome, StoreError> {
        if FileRecordRepo::update(&self.pool, record).await? {
            return Ok(UpsertOutcome::Updated);
        }

        match FileRecordRepo::insert(&self.pool, record).await? {
            InsertOutcome::Inserted => Ok(UpsertOutcome::Created),
            InsertOutcome::Conflict => {
                tracing::debug!(
                    device_id = record.device_id,
                    file_path = %record.file_path,
                    "File record insert conflicted, skipping"
                );
                Ok(UpsertOutcome::Skipped)
            }
        }
    }

    async fn delete_stale(
        &self,
        device_id: DbId,
        window: ScanWindow,
        seen_since: Timestamp,
    ) -> Result<u64, StoreError> {
        let deleted = FileRecordRepo::delete_stale(
            &self.pool,
            device_id,
            window.start,
            window.end,
            seen_since,
        )
        .await?;
        Ok(deleted)
    }
}
