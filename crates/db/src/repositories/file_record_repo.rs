//! Repository for the `file_records` table.

use sqlx::PgPool;
use camview_core::types::{DbId, Timestamp};

use crate::models::file_record::{FileRecord, UpsertFileRecord};

/// Column list for `file_records` queries.
const COLUMNS: &str = "\
    id, device_id, file_path, channel, start_time, end_time, length, kind, \
    duration, disk, cluster, partition, flags, events, storage, updated_at";

/// Result of [`FileRecordRepo::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A concurrent writer already holds the path or the start time.
    Conflict,
}

/// Provides query operations for indexed device files.
pub struct FileRecordRepo;

impl FileRecordRepo {
    /// Update the row matching `(device_id, file_path)`.
    ///
    /// When the new start time is already held by another row (a timezone
    /// change shifts every derived time), the stored start and end times are
    /// kept and the remaining columns, `updated_at` included, are still
    /// written. Returns `true` if a row matched.
    pub async fn update(pool: &PgPool, input: &UpsertFileRecord) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE file_records SET \
                channel = $3, start_time = $4, end_time = $5, length = $6, kind = $7, \
                duration = $8, disk = $9, cluster = $10, partition = $11, \
                flags = $12, events = $13, storage = $14, updated_at = $15 \
             WHERE device_id = $1 AND file_path = $2",
        )
        .bind(input.device_id)
        .bind(&input.file_path)
        .bind(input.channel)
        .bind(input.start_time)
        .bind(input.end_time)
        .bind(input.length)
        .bind(input.kind.as_str())
        .bind(input.duration)
        .bind(input.disk)
        .bind(input.cluster)
        .bind(input.partition)
        .bind(&input.flags)
        .bind(&input.events)
        .bind(input.storage.as_str())
        .bind(input.updated_at)
        .execute(pool)
        .await;

        match result {
            Ok(result) => Ok(result.rows_affected() > 0),
            Err(e) if is_unique_violation(&e) => {
                tracing::debug!(
                    device_id = input.device_id,
                    file_path = %input.file_path,
                    start_time = %input.start_time,
                    "Start time held by another file, keeping stored times"
                );
                Self::update_keeping_times(pool, input).await
            }
            Err(e) => Err(e),
        }
    }

    async fn update_keeping_times(
        pool: &PgPool,
        input: &UpsertFileRecord,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE file_records SET \
                channel = $3, length = $4, kind = $5, duration = $6, disk = $7, \
                cluster = $8, partition = $9, flags = $10, events = $11, \
                storage = $12, updated_at = $13 \
             WHERE device_id = $1 AND file_path = $2",
        )
        .bind(input.device_id)
        .bind(&input.file_path)
        .bind(input.channel)
        .bind(input.length)
        .bind(input.kind.as_str())
        .bind(input.duration)
        .bind(input.disk)
        .bind(input.cluster)
        .bind(input.partition)
        .bind(&input.flags)
        .bind(&input.events)
        .bind(input.storage.as_str())
        .bind(input.updated_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Insert a new row. A unique-key collision is reported, not raised.
    pub async fn insert(
        pool: &PgPool,
        input: &UpsertFileRecord,
    ) -> Result<InsertOutcome, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO file_records \
                (device_id, file_path, channel, start_time, end_time, length, kind, \
                 duration, disk, cluster, partition, flags, events, storage, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT DO NOTHING",
        )
        .bind(input.device_id)
        .bind(&input.file_path)
        .bind(input.channel)
        .bind(input.start_time)
        .bind(input.end_time)
        .bind(input.length)
        .bind(input.kind.as_str())
        .bind(input.duration)
        .bind(input.disk)
        .bind(input.cluster)
        .bind(input.partition)
        .bind(&input.flags)
        .bind(&input.events)
        .bind(input.storage.as_str())
        .bind(input.updated_at)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::Conflict)
        }
    }

    /// Delete rows of a device starting inside `[start, end)` that were not
    /// touched since `seen_since`. Returns the number of rows removed.
    pub async fn delete_stale(
        pool: &PgPool,
        device_id: DbId,
        start: Timestamp,
        end: Timestamp,
        seen_since: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM file_records \
             WHERE device_id = $1 AND start_time >= $2 AND start_time < $3 \
               AND updated_at < $4",
        )
        .bind(device_id)
        .bind(start)
        .bind(end)
        .bind(seen_since)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// List a device's files starting inside `[start, end)`, oldest first.
    pub async fn list_in_range(
        pool: &PgPool,
        device_id: DbId,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<FileRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM file_records \
             WHERE device_id = $1 AND start_time >= $2 AND start_time < $3 \
             ORDER BY start_time ASC"
        );
        sqlx::query_as::<_, FileRecord>(&query)
            .bind(device_id)
            .bind(start)
            .bind(end)
            .fetch_all(pool)
            .await
    }

    /// Count all files indexed for a device.
    pub async fn count_for_device(pool: &PgPool, device_id: DbId) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM file_records WHERE device_id = $1")
                .bind(device_id)
                .fetch_one(pool)
                .await?;
        Ok(count)
    }
}

/// PostgreSQL unique constraint violation: error code 23505.
fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}
