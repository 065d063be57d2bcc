use camview_core::error::CoreError;
use camview_core::types::DbId;
use camview_rpc::RpcError;

/// Failure of a store operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Scan cursor for device {0} disappeared")]
    CursorMissing(DbId),
}

/// Why a scan stopped before reaching the end of its range.
///
/// Any variant aborts the current window: its stale sweep is skipped and
/// the cursor stays at the last completed window.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Device RPC failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid scan range: {0}")]
    Range(#[from] CoreError),

    #[error("Scan cancelled")]
    Cancelled,

    #[error("A scan is already running for device {0}")]
    Busy(DbId),

    #[error("No scan cursor for device {0}")]
    NoCursor(DbId),
}

impl ScanError {
    /// Whether retrying later without operator action may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ScanError::Rpc(e) => !e.is_login_failure(),
            ScanError::Store(_) | ScanError::Cancelled | ScanError::Busy(_) => true,
            ScanError::Range(_) | ScanError::NoCursor(_) => false,
        }
    }
}
