//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument.

pub mod device_repo;
pub mod file_record_repo;
pub mod scan_cursor_repo;

pub use device_repo::DeviceRepo;
pub use file_record_repo::{FileRecordRepo, InsertOutcome};
pub use scan_cursor_repo::ScanCursorRepo;
