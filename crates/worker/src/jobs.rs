//! Periodic scan jobs and the device set that drives them.
//!
//! Every enabled device gets two supervised loops in the [`TaskArena`]:
//! a quick scan and a full scan, each on its own interval. They share the
//! device's [`ScanLocks`] entry, so a tick that finds the other mode still
//! running is skipped. [`run_device_sync`] keeps the arena in step with the
//! enabled devices, re-reading the list periodically and following
//! registry events in between.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use camview_core::types::{DbId, Timestamp};
use camview_events::{DeviceEvent, EventBus, Subscription};
use camview_rpc::{CacheError, ConnectionCache};
use camview_scanner::{ScanError, ScanLocks, ScanMode, ScanSummary, Scanner};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::arena::TaskArena;
use crate::registry::DeviceDirectory;
use crate::supervisor::{run_with_backoff, task_factory, BackoffConfig, BoxError};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Device {0} has no disambiguation seed")]
    NoSeed(DbId),
}

impl JobError {
    /// Whether the scan loop should give up and let its supervisor restart it.
    ///
    /// Device-side failures are retried on the next tick instead.
    pub fn is_fatal(&self) -> bool {
        match self {
            JobError::Scan(ScanError::Store(_) | ScanError::NoCursor(_)) => true,
            JobError::Scan(_) => false,
            JobError::Cache(CacheError::Registry(_)) => true,
            JobError::Cache(CacheError::DeviceNotFound(_)) => false,
            JobError::Database(_) | JobError::NoSeed(_) => true,
        }
    }
}

/// Shared handles for the scan jobs.
pub struct ScanContext {
    pub directory: Arc<dyn DeviceDirectory>,
    pub cache: Arc<ConnectionCache>,
    pub scanner: Arc<Scanner>,
    pub locks: Arc<ScanLocks>,
    pub quick_interval: Duration,
    pub full_interval: Duration,
    /// Period between re-reads of the enabled device list.
    pub sync_interval: Duration,
    pub backoff: BackoffConfig,
}

/// Run one scan of `device_id` unless another is already in progress.
pub async fn scan_once(
    ctx: &ScanContext,
    device_id: DbId,
    mode: ScanMode,
    cancel: &CancellationToken,
) -> Result<ScanSummary, JobError> {
    let _guard = ctx.locks.try_acquire(device_id)?;
    let client = ctx.cache.get(device_id).await?;
    let seed = ctx
        .directory
        .seed(device_id)
        .await?
        .ok_or(JobError::NoSeed(device_id))?;

    Ok(ctx
        .scanner
        .scan(&client, i64::from(seed), mode, cancel)
        .await?)
}

/// Scan `device_id` in `mode` every `period` until cancelled.
///
/// Returns `Ok` when cancelled or when the device is no longer known.
pub async fn run_periodic_scans(
    ctx: Arc<ScanContext>,
    device_id: DbId,
    mode: ScanMode,
    period: Duration,
    cancel: CancellationToken,
) -> Result<(), JobError> {
    ctx.scanner.ensure_cursor(device_id).await?;

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mode_name = mode.as_str();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        match scan_once(&ctx, device_id, mode, &cancel).await {
            Ok(_) => {}
            Err(JobError::Scan(ScanError::Cancelled)) => return Ok(()),
            Err(JobError::Scan(ScanError::Busy(_))) => {
                tracing::debug!(
                    device_id,
                    mode = mode_name,
                    "Scan already running, skipping tick"
                );
            }
            Err(JobError::Cache(CacheError::DeviceNotFound(_))) => {
                tracing::info!(
                    device_id,
                    mode = mode_name,
                    "Device no longer available, stopping scans"
                );
                return Ok(());
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::debug!(
                    device_id,
                    mode = mode_name,
                    error = %e,
                    "Scan will be retried next period"
                );
            }
        }
    }
}

/// Spawner for a device's quick and full scan loops, for [`TaskArena::replace`].
pub fn device_tasks(
    ctx: &Arc<ScanContext>,
    device_id: DbId,
) -> impl FnOnce(CancellationToken) -> Vec<JoinHandle<()>> {
    let ctx = Arc::clone(ctx);
    move |cancel| {
        [
            (ScanMode::Quick, ctx.quick_interval),
            (ScanMode::Full, ctx.full_interval),
        ]
        .into_iter()
        .map(|(mode, period)| {
            let name = format!("device-{device_id}-{}", mode.as_str());
            let factory = {
                let ctx = Arc::clone(&ctx);
                task_factory(move |cancel| {
                    let ctx = Arc::clone(&ctx);
                    async move {
                        run_periodic_scans(ctx, device_id, mode, period, cancel)
                            .await
                            .map_err(BoxError::from)
                    }
                })
            };
            let backoff = ctx.backoff.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_with_backoff(&name, &factory, &backoff, &cancel).await;
            })
        })
        .collect()
    }
}

/// Keep the arena's device set equal to the enabled devices until cancelled.
///
/// Every `sync_interval` the enabled list is read again. Devices that
/// appeared, changed or left the enabled set since the previous read are
/// announced on `bus` as `Created` or `Updated`, which is what keeps the
/// connection cache's invalidation current.
pub async fn run_device_sync(
    ctx: Arc<ScanContext>,
    arena: Arc<TaskArena>,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
) -> Result<(), JobError> {
    // Subscribe before listing so no change falls between the two.
    let mut subscription = bus.subscribe();
    let result = sync_devices(&ctx, &arena, &bus, &mut subscription, &cancel).await;
    bus.unsubscribe(subscription);
    result
}

async fn sync_devices(
    ctx: &Arc<ScanContext>,
    arena: &TaskArena,
    bus: &EventBus,
    subscription: &mut Subscription,
    cancel: &CancellationToken,
) -> Result<(), JobError> {
    let mut known = HashMap::new();
    let mut ticker = tokio::time::interval(ctx.sync_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => reconcile(ctx, arena, bus, &mut known).await?,
            event = subscription.recv() => match event {
                Some(DeviceEvent::Created { device_id } | DeviceEvent::Updated { device_id }) => {
                    if ctx.directory.is_enabled(device_id).await? {
                        start_device(ctx, arena, device_id).await;
                    } else {
                        stop_device(ctx, arena, device_id).await;
                    }
                }
                Some(DeviceEvent::Deleted { device_id }) => {
                    stop_device(ctx, arena, device_id).await
                }
                Some(_) => {}
                None => return Ok(()),
            },
        }
    }
}

/// Start and stop device loops to match the enabled list, then announce
/// what changed since `known` was taken.
async fn reconcile(
    ctx: &Arc<ScanContext>,
    arena: &TaskArena,
    bus: &EventBus,
    known: &mut HashMap<DbId, Timestamp>,
) -> Result<(), JobError> {
    let enabled: HashMap<DbId, Timestamp> = ctx
        .directory
        .enabled_devices()
        .await?
        .into_iter()
        .map(|d| (d.id, d.updated_at))
        .collect();

    for device_id in arena.device_ids().await {
        if !enabled.contains_key(&device_id) {
            stop_device(ctx, arena, device_id).await;
        }
    }
    for &device_id in enabled.keys() {
        start_device(ctx, arena, device_id).await;
    }

    for (&device_id, updated_at) in &enabled {
        match known.get(&device_id) {
            None => bus.publish(DeviceEvent::Created { device_id }),
            Some(seen) if seen != updated_at => bus.publish(DeviceEvent::Updated { device_id }),
            Some(_) => {}
        }
    }
    // Disabled and deleted devices both resolve to nothing, so an update
    // is enough for listeners to drop what they hold.
    for &device_id in known.keys() {
        if !enabled.contains_key(&device_id) {
            bus.publish(DeviceEvent::Updated { device_id });
        }
    }

    tracing::debug!(devices = enabled.len(), "Device list reconciled");
    *known = enabled;
    Ok(())
}

async fn start_device(ctx: &Arc<ScanContext>, arena: &TaskArena, device_id: DbId) {
    if !arena.contains(device_id).await {
        tracing::info!(device_id, "Starting device scan jobs");
        arena.replace(device_id, device_tasks(ctx, device_id)).await;
    }
}

async fn stop_device(ctx: &ScanContext, arena: &TaskArena, device_id: DbId) {
    if arena.remove(device_id).await {
        tracing::info!(device_id, "Stopped device scan jobs");
    }
    ctx.locks.remove(device_id);
}
