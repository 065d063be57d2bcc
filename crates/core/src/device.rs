//! Device connection identity.
//!
//! A [`DeviceIdentity`] carries everything needed to talk to one physical
//! device. Only the [`ConnectionKey`] part (address + credentials) decides
//! whether a cached protocol client is still valid; the timezone is used
//! purely to interpret the device's local timestamps.

use std::fmt;

use chrono_tz::Tz;

use crate::error::CoreError;
use crate::types::DbId;

/// Connection parameters for a single device.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub id: DbId,
    /// Host, `host:port`, or a full base URL such as `https://host:443`.
    pub address: String,
    pub username: String,
    pub password: String,
    /// Timezone the device renders its local timestamps in.
    pub timezone: Tz,
}

/// The subset of [`DeviceIdentity`] that a live session depends on.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub address: String,
    pub username: String,
    pub password: String,
}

impl DeviceIdentity {
    /// Build an identity, parsing the IANA timezone name (e.g. `Asia/Tokyo`).
    pub fn new(
        id: DbId,
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timezone: &str,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            id,
            address: address.into(),
            username: username.into(),
            password: password.into(),
            timezone: parse_timezone(timezone)?,
        })
    }

    pub fn connection_key(&self) -> ConnectionKey {
        ConnectionKey {
            address: self.address.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    /// Base HTTP URL for the device. Addresses without a scheme use plain HTTP.
    pub fn base_url(&self) -> String {
        let address = self.address.trim_end_matches('/');
        if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        }
    }
}

// Credentials must never reach the logs.
impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timezone", &self.timezone)
            .finish()
    }
}

impl fmt::Debug for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionKey")
            .field("address", &self.address)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Parse an IANA timezone name. An empty name means UTC.
pub fn parse_timezone(name: &str) -> Result<Tz, CoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(Tz::UTC);
    }
    name.parse::<Tz>()
        .map_err(|_| CoreError::UnknownTimezone(name.to_string()))
}
