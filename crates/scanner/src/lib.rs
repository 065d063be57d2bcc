//! Incremental synchronization of device file listings into the catalog.
//!
//! - [`Scanner`] runs quick, full and manual scans over bounded windows.
//! - [`store`] defines the cursor and file persistence seams and the
//!   Postgres-backed [`PgScanStore`].
//! - [`ScanLocks`] keeps scans of one device from overlapping.

pub mod config;
pub mod error;
pub mod locks;
pub mod record;
pub mod scanner;
pub mod store;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::ScanConfig;
pub use error::{ScanError, StoreError};
pub use locks::{ScanGuard, ScanLocks};
pub use scanner::{ScanMode, ScanSummary, Scanner};
pub use store::{CursorStore, FileStore, PgScanStore, UpsertOutcome};
