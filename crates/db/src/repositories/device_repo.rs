//! Repository for the `devices` and `device_seeds` tables.

use sqlx::PgPool;
use camview_core::types::DbId;

use crate::models::device::{CreateDevice, Device, UpdateDevice};

/// Column list for `devices` queries.
const COLUMNS: &str = "\
    id, name, address, username, password, timezone, \
    is_enabled, created_at, updated_at";

/// Provides query operations for registered devices.
pub struct DeviceRepo;

impl DeviceRepo {
    /// Register a device and claim the lowest free disambiguation seed.
    pub async fn create(pool: &PgPool, input: &CreateDevice) -> Result<Device, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO devices (name, address, username, password, timezone) \
             VALUES ($1, $2, $3, $4, COALESCE($5, 'UTC')) \
             RETURNING {COLUMNS}"
        );
        let device = sqlx::query_as::<_, Device>(&query)
            .bind(&input.name)
            .bind(&input.address)
            .bind(&input.username)
            .bind(&input.password)
            .bind(&input.timezone)
            .fetch_one(&mut *tx)
            .await?;

        let claimed = sqlx::query(
            "UPDATE device_seeds SET device_id = $1 \
             WHERE seed = ( \
                 SELECT seed FROM device_seeds WHERE device_id IS NULL \
                 ORDER BY seed LIMIT 1 FOR UPDATE SKIP LOCKED \
             )",
        )
        .bind(device.id)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tracing::warn!(device_id = device.id, "No free device seed left");
        }

        tx.commit().await?;
        Ok(device)
    }

    /// Find a device by its internal ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Device>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM devices WHERE id = $1");
        sqlx::query_as::<_, Device>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List all enabled devices ordered by ID.
    pub async fn list_enabled(pool: &PgPool) -> Result<Vec<Device>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM devices WHERE is_enabled = true ORDER BY id ASC");
        sqlx::query_as::<_, Device>(&query).fetch_all(pool).await
    }

    /// Update a device. Only non-`None` fields are applied.
    pub async fn update(
        pool: &PgPool,
        id: DbId,
        input: &UpdateDevice,
    ) -> Result<Option<Device>, sqlx::Error> {
        let query = format!(
            "UPDATE devices SET \
                name = COALESCE($2, name), \
                address = COALESCE($3, address), \
                username = COALESCE($4, username), \
                password = COALESCE($5, password), \
                timezone = COALESCE($6, timezone), \
                is_enabled = COALESCE($7, is_enabled), \
                updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Device>(&query)
            .bind(id)
            .bind(&input.name)
            .bind(&input.address)
            .bind(&input.username)
            .bind(&input.password)
            .bind(&input.timezone)
            .bind(input.is_enabled)
            .fetch_optional(pool)
            .await
    }

    /// Delete a device. Returns `true` if a row was removed.
    ///
    /// Its seed slot is released and its cursor and file records cascade.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM devices WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Seed claimed by a device, if any.
    pub async fn find_seed(pool: &PgPool, device_id: DbId) -> Result<Option<i32>, sqlx::Error> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT seed FROM device_seeds WHERE device_id = $1")
                .bind(device_id)
                .fetch_optional(pool)
                .await?;
        Ok(row.map(|(seed,)| seed))
    }
}
