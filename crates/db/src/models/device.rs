//! Device entity models.

use camview_core::device::DeviceIdentity;
use camview_core::error::CoreError;
use camview_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered device row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Device {
    pub id: DbId,
    pub name: String,
    pub address: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub timezone: String,
    pub is_enabled: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Device {
    /// Connection identity used by the protocol client.
    pub fn identity(&self) -> Result<DeviceIdentity, CoreError> {
        DeviceIdentity::new(
            self.id,
            self.address.clone(),
            self.username.clone(),
            self.password.clone(),
            &self.timezone,
        )
    }
}

/// DTO for registering a device.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDevice {
    pub name: String,
    pub address: String,
    pub username: String,
    pub password: String,
    pub timezone: Option<String>,
}

/// DTO for updating a device. All fields optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDevice {
    pub name: Option<String>,
    pub address: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timezone: Option<String>,
    pub is_enabled: Option<bool>,
}
