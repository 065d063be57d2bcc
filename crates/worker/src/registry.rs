use async_trait::async_trait;
use camview_core::device::DeviceIdentity;
use camview_core::types::{DbId, Timestamp};
use camview_db::repositories::DeviceRepo;
use camview_db::DbPool;
use camview_rpc::{CacheError, DeviceRegistry};

/// An enabled device and the time its row last changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnabledDevice {
    pub id: DbId,
    pub updated_at: Timestamp,
}

/// The device list the scan jobs are scheduled from.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn enabled_devices(&self) -> Result<Vec<EnabledDevice>, sqlx::Error>;

    /// Whether the device exists and is enabled.
    async fn is_enabled(&self, device_id: DbId) -> Result<bool, sqlx::Error>;

    /// The device's disambiguation seed, if one was claimed.
    async fn seed(&self, device_id: DbId) -> Result<Option<i32>, sqlx::Error>;
}

/// Resolves devices from the `devices` table.
///
/// Disabled devices resolve to `None`, the same as missing ones.
pub struct PgDeviceRegistry {
    pool: DbPool,
}

impl PgDeviceRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceRegistry for PgDeviceRegistry {
    async fn identity(&self, device_id: DbId) -> Result<Option<DeviceIdentity>, CacheError> {
        let device = DeviceRepo::find_by_id(&self.pool, device_id)
            .await
            .map_err(|e| CacheError::Registry(e.to_string()))?;

        match device {
            Some(device) if device.is_enabled => device
                .identity()
                .map(Some)
                .map_err(|e| CacheError::Registry(e.to_string())),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl DeviceDirectory for PgDeviceRegistry {
    async fn enabled_devices(&self) -> Result<Vec<EnabledDevice>, sqlx::Error> {
        let devices = DeviceRepo::list_enabled(&self.pool).await?;
        Ok(devices
            .into_iter()
            .map(|d| EnabledDevice {
                id: d.id,
                updated_at: d.updated_at,
            })
            .collect())
    }

    async fn is_enabled(&self, device_id: DbId) -> Result<bool, sqlx::Error> {
        let device = DeviceRepo::find_by_id(&self.pool, device_id).await?;
        Ok(device.is_some_and(|d| d.is_enabled))
    }

    async fn seed(&self, device_id: DbId) -> Result<Option<i32>, sqlx::Error> {
        DeviceRepo::find_seed(&self.pool, device_id).await
    }
}
