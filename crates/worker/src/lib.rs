//! Background service that keeps every enabled device's file catalog in sync.
//!
//! The binary wires the pieces together: [`supervisor::Supervisor`] owns the
//! long-running services, [`arena::TaskArena`] owns each device's scan
//! loops, and [`jobs`] decides what runs when.

pub mod arena;
pub mod config;
pub mod jobs;
pub mod registry;
pub mod supervisor;

pub use arena::TaskArena;
pub use config::{ConfigError, WorkerConfig};
pub use jobs::{JobError, ScanContext};
pub use registry::{DeviceDirectory, EnabledDevice, PgDeviceRegistry};
pub use supervisor::{BackoffConfig, Supervisor};
