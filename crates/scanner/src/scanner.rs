//! Incremental reconciliation of a device's file listing with the catalog.
//!
//! A run splits its time range into bounded windows. For each window the
//! picture and video listings are streamed from the device and upserted;
//! once both streams are drained, rows in the window that the run did not
//! touch are deleted and the cursor is persisted. A failure or cancellation
//! aborts the current window without sweeping it, so the persisted cursor
//! always points at the last fully reconciled window.

use std::ops::AddAssign;
use std::sync::Arc;

use camview_core::media::FileKind;
use camview_core::scan::{progress_percent, split_windows, CursorPosition, Direction, ScanWindow};
use camview_core::types::{DbId, Timestamp};
use camview_events::{DeviceEvent, EventBus};
use camview_rpc::media_file_find::{FindCondition, MediaFileStream};
use camview_rpc::RpcClient;
use chrono::{Duration, SubsecRound, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::record::file_record;
use crate::store::{CursorStore, FileStore, UpsertOutcome};

/// Which part of the timeline a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// From the quick cursor up to now, oldest first.
    Quick,
    /// From the full cursor back to the epoch, newest first.
    Full,
    /// An explicit range, oldest first. Cursors are left alone.
    Manual { start: Timestamp, end: Timestamp },
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Quick => "quick",
            ScanMode::Full => "full",
            ScanMode::Manual { .. } => "manual",
        }
    }
}

/// Row counts of a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl AddAssign for ScanSummary {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
    }
}

/// Per-run parameters shared by every window.
struct Run<'a> {
    client: &'a RpcClient,
    device_id: DbId,
    seed: i64,
    timezone: Tz,
    direction: Direction,
    started_at: Timestamp,
    cancel: &'a CancellationToken,
}

pub struct Scanner {
    cursors: Arc<dyn CursorStore>,
    files: Arc<dyn FileStore>,
    config: ScanConfig,
    events: Option<Arc<EventBus>>,
}

impl Scanner {
    pub fn new(
        cursors: Arc<dyn CursorStore>,
        files: Arc<dyn FileStore>,
        config: ScanConfig,
    ) -> Self {
        Self {
            cursors,
            files,
            config,
            events: None,
        }
    }

    /// Publish progress, completion and failure events to `bus`.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub async fn cursor(&self, device_id: DbId) -> Result<Option<CursorPosition>, ScanError> {
        Ok(self.cursors.load_cursor(device_id).await?)
    }

    /// Create the device's cursor with initial values unless it exists.
    pub async fn ensure_cursor(&self, device_id: DbId) -> Result<CursorPosition, ScanError> {
        let initial = CursorPosition::reset(now_seconds(), self.config.volatile_window);
        Ok(self.cursors.ensure_cursor(device_id, &initial).await?)
    }

    /// Put the cursor back to its initial values. File records are untouched.
    pub async fn reset(&self, device_id: DbId) -> Result<CursorPosition, ScanError> {
        let position = CursorPosition::reset(now_seconds(), self.config.volatile_window);
        self.cursors.ensure_cursor(device_id, &position).await?;
        self.cursors.save_cursor(device_id, &position).await?;
        tracing::info!(device_id, "Scan cursor reset");
        Ok(position)
    }

    /// Run one scan of `client`'s device.
    ///
    /// `seed` is the device's disambiguation seed. Callers must not run two
    /// scans of the same device at once (see [`ScanLocks`](crate::ScanLocks)).
    pub async fn scan(
        &self,
        client: &RpcClient,
        seed: i64,
        mode: ScanMode,
        cancel: &CancellationToken,
    ) -> Result<ScanSummary, ScanError> {
        let device_id = client.device_id();
        tracing::info!(device_id, mode = mode.as_str(), "Scan started");

        match self.run(client, seed, mode, cancel).await {
            Ok(summary) => {
                tracing::info!(
                    device_id,
                    mode = mode.as_str(),
                    created = summary.created,
                    updated = summary.updated,
                    deleted = summary.deleted,
                    "Scan completed"
                );
                self.publish(DeviceEvent::ScanCompleted {
                    device_id,
                    mode: mode.as_str().to_string(),
                    created: summary.created,
                    updated: summary.updated,
                    deleted: summary.deleted,
                    finished_at: Utc::now(),
                });
                Ok(summary)
            }
            Err(e) => {
                match &e {
                    ScanError::Cancelled => {
                        tracing::info!(device_id, mode = mode.as_str(), "Scan cancelled")
                    }
                    _ => tracing::warn!(device_id, mode = mode.as_str(), error = %e, "Scan failed"),
                }
                self.publish(DeviceEvent::ScanFailed {
                    device_id,
                    mode: mode.as_str().to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        client: &RpcClient,
        seed: i64,
        mode: ScanMode,
        cancel: &CancellationToken,
    ) -> Result<ScanSummary, ScanError> {
        let device_id = client.device_id();
        // Microsecond precision matches what the store keeps for `updated_at`.
        let started_at = Utc::now().trunc_subsecs(6);
        let now = started_at.trunc_subsecs(0);

        let mut position = self
            .cursors
            .load_cursor(device_id)
            .await?
            .ok_or(ScanError::NoCursor(device_id))?;

        let (start, end, direction) = match mode {
            ScanMode::Quick => {
                let (start, end) = position.quick_range(now);
                (start, end, Direction::Ascending)
            }
            ScanMode::Full => {
                let (start, end) = position.full_range();
                (start, end, Direction::Descending)
            }
            ScanMode::Manual { start, end } => (start, end, Direction::Ascending),
        };
        let windows = split_windows(start, end, self.config.max_window, direction)?;
        let total = if end > start { end - start } else { Duration::zero() };

        let run = Run {
            client,
            device_id,
            seed,
            timezone: client.timezone(),
            direction,
            started_at,
            cancel,
        };

        let mut summary = ScanSummary::default();
        let mut covered = Duration::zero();
        for window in windows {
            summary += self.scan_window(&run, window).await?;
            covered = covered + window.duration();

            match mode {
                ScanMode::Quick => {
                    position.advance_quick(window.end, now, self.config.volatile_window)
                }
                ScanMode::Full => position.advance_full(window.start),
                ScanMode::Manual { .. } => {}
            }
            position.percent = progress_percent(covered, total);
            self.cursors.save_cursor(device_id, &position).await?;

            tracing::debug!(
                device_id,
                start = %window.start,
                end = %window.end,
                percent = position.percent,
                "Scan window reconciled"
            );
            self.publish(DeviceEvent::ScanProgress {
                device_id,
                mode: mode.as_str().to_string(),
                percent: position.percent,
            });
        }

        position.percent = 100.0;
        self.cursors.save_cursor(device_id, &position).await?;
        Ok(summary)
    }

    async fn scan_window(
        &self,
        run: &Run<'_>,
        window: ScanWindow,
    ) -> Result<ScanSummary, ScanError> {
        let mut counts = ScanSummary::default();
        for kind in FileKind::ALL {
            counts += self.scan_stream(run, kind, window).await?;
        }

        counts.deleted = self
            .files
            .delete_stale(run.device_id, window, run.started_at)
            .await?;
        Ok(counts)
    }

    async fn scan_stream(
        &self,
        run: &Run<'_>,
        kind: FileKind,
        window: ScanWindow,
    ) -> Result<ScanSummary, ScanError> {
        if run.cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let condition = FindCondition::new(
            kind,
            window.start,
            window.end,
            run.direction.into(),
            run.timezone,
        );
        let mut stream =
            MediaFileStream::open(run.client, &condition, self.config.page_size).await?;
        let result = self.drain(run, kind, &mut stream).await;
        stream.close().await;
        result
    }

    async fn drain(
        &self,
        run: &Run<'_>,
        kind: FileKind,
        stream: &mut MediaFileStream<'_>,
    ) -> Result<ScanSummary, ScanError> {
        let mut counts = ScanSummary::default();
        loop {
            let page = tokio::select! {
                biased;
                _ = run.cancel.cancelled() => return Err(ScanError::Cancelled),
                page = stream.next_page() => page?,
            };
            if page.is_empty() {
                return Ok(counts);
            }

            for info in &page {
                let Some(record) =
                    file_record(run.device_id, run.seed, kind, info, run.timezone, run.started_at)
                else {
                    tracing::warn!(
                        device_id = run.device_id,
                        file_path = %info.file_path,
                        start_time = %info.start_time,
                        "Skipping unusable file entry"
                    );
                    continue;
                };

                match self.files.upsert_file(&record).await? {
                    UpsertOutcome::Created => counts.created += 1,
                    UpsertOutcome::Updated => counts.updated += 1,
                    UpsertOutcome::Skipped => {}
                }
            }
        }
    }

    fn publish(&self, event: DeviceEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

fn now_seconds() -> Timestamp {
    Utc::now().trunc_subsecs(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use assert_matches::assert_matches;
    use camview_core::device::DeviceIdentity;
    use camview_core::media::StorageClass;
    use camview_core::scan::scan_epoch;
    use camview_db::models::file_record::UpsertFileRecord;
    use camview_rpc::media_file_find::format_device_time;
    use camview_rpc::testing::FakeDevice;
    use camview_rpc::{ClientConfig, RpcError, Transport};
    use chrono::TimeZone;

    const DEVICE: DbId = 1;

    struct Fixture {
        device: Arc<FakeDevice>,
        client: RpcClient,
        store: Arc<MemoryStore>,
        scanner: Scanner,
    }

    fn fixture(page_size: u32) -> Fixture {
        let device = Arc::new(FakeDevice::new("admin", "secret"));
        let identity = DeviceIdentity::new(DEVICE, "cam.test", "admin", "secret", "UTC").unwrap();
        let client = RpcClient::new(
            &identity,
            Arc::clone(&device) as Arc<dyn Transport>,
            ClientConfig::default(),
        );
        let store = Arc::new(MemoryStore::default());
        let config = ScanConfig {
            page_size,
            ..ScanConfig::default()
        };
        let scanner = Scanner::new(
            Arc::clone(&store) as Arc<dyn CursorStore>,
            Arc::clone(&store) as Arc<dyn FileStore>,
            config,
        );
        Fixture {
            device,
            client,
            store,
            scanner,
        }
    }

    fn utc(y: i32, m: u32, d: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn local(at: Timestamp) -> String {
        format_device_time(at, Tz::UTC)
    }

    fn picture(path: &str, at: Timestamp) -> camview_rpc::FileInfo {
        FakeDevice::picture(path, &local(at))
    }

    fn video(path: &str, at: Timestamp) -> camview_rpc::FileInfo {
        FakeDevice::video(path, &local(at), &local(at + Duration::minutes(5)))
    }

    fn manual(start: Timestamp, end: Timestamp) -> ScanMode {
        ScanMode::Manual { start, end }
    }

    #[tokio::test]
    async fn manual_scan_persists_progress_per_window() {
        let f = fixture(64);
        f.scanner.ensure_cursor(DEVICE).await.unwrap();
        let initial = f.store.cursor(DEVICE).unwrap();
        f.device.add_file(picture("/mnt/sd/a[0].jpg", utc(2024, 1, 10)));
        f.device.add_file(video("/mnt/sd/b.dav", utc(2024, 2, 10)));

        let summary = f
            .scanner
            .scan(&f.client, 5, manual(utc(2024, 1, 1), utc(2024, 3, 1)), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary, ScanSummary { created: 2, updated: 0, deleted: 0 });
        let saves = f.store.saved();
        assert_eq!(saves.len(), 3);
        assert_eq!(saves[0].percent, 50.0);
        assert_eq!(saves[1].percent, 100.0);
        assert_eq!(saves[2].percent, 100.0);
        // Manual runs move no cursor.
        assert_eq!(saves[2].quick_cursor, initial.quick_cursor);
        assert_eq!(saves[2].full_cursor, initial.full_cursor);
        assert_eq!(f.device.calls("mediaFileFind.findFile"), 4);
    }

    #[tokio::test]
    async fn rescan_of_unchanged_range_only_updates() {
        let f = fixture(64);
        f.scanner.ensure_cursor(DEVICE).await.unwrap();
        f.device.add_file(picture("/mnt/sd/a[0].jpg", utc(2024, 1, 10)));
        f.device.add_file(picture("/mnt/sd/a[1].jpg", utc(2024, 1, 10)));
        f.device.add_file(video("/mnt/sd/b.dav", utc(2024, 1, 12)));
        let mode = manual(utc(2024, 1, 1), utc(2024, 1, 31));
        let cancel = CancellationToken::new();

        let first = f.scanner.scan(&f.client, 5, mode, &cancel).await.unwrap();
        let second = f.scanner.scan(&f.client, 5, mode, &cancel).await.unwrap();

        assert_eq!(first, ScanSummary { created: 3, updated: 0, deleted: 0 });
        assert_eq!(second, ScanSummary { created: 0, updated: 3, deleted: 0 });
    }

    #[tokio::test]
    async fn burst_captures_get_distinct_start_times() {
        let f = fixture(64);
        f.scanner.ensure_cursor(DEVICE).await.unwrap();
        let at = utc(2024, 1, 10);
        f.device.add_file(picture("/mnt/sd/08/00/00[M][0@0][0].jpg", at));
        f.device.add_file(picture("/mnt/sd/08/00/00[M][0@0][1].jpg", at));

        let mode = manual(utc(2024, 1, 1), utc(2024, 1, 31));
        f.scanner
            .scan(&f.client, 7, mode, &CancellationToken::new())
            .await
            .unwrap();

        let mut starts: Vec<_> = f.store.records(DEVICE).iter().map(|r| r.start_time).collect();
        starts.sort();
        assert_eq!(starts, vec![
            at + Duration::microseconds(7),
            at + Duration::milliseconds(1) + Duration::microseconds(7),
        ]);
    }

    #[tokio::test]
    async fn timezone_change_does_not_break_rescans() {
        let f = fixture(64);
        f.scanner.ensure_cursor(DEVICE).await.unwrap();
        let ten = utc(2024, 1, 1) + Duration::hours(10);
        let eleven = ten + Duration::hours(1);
        f.device.add_file(picture("/mnt/sd/a.jpg", ten));
        f.device.add_file(picture("/mnt/sd/b.jpg", eleven));
        let mode = manual(utc(2024, 1, 1), utc(2024, 1, 2));
        let cancel = CancellationToken::new();
        f.scanner.scan(&f.client, 0, mode, &cancel).await.unwrap();

        // Device clock one hour behind UTC: "10:00" now means 11:00 UTC,
        // which `b` still holds when `a` is written.
        f.client.set_timezone(chrono_tz::Etc::GMTPlus1);
        let summary = f.scanner.scan(&f.client, 0, mode, &cancel).await.unwrap();

        assert_eq!(summary, ScanSummary { created: 0, updated: 2, deleted: 0 });
        let start_of = |path: &str| {
            f.store
                .records(DEVICE)
                .into_iter()
                .find(|r| r.file_path == path)
                .map(|r| r.start_time)
        };
        assert_eq!(start_of("/mnt/sd/a.jpg"), Some(ten));
        assert_eq!(start_of("/mnt/sd/b.jpg"), Some(eleven + Duration::hours(1)));

        // Once `b` has moved, the next run shifts `a` as well.
        f.scanner.scan(&f.client, 0, mode, &cancel).await.unwrap();
        assert_eq!(start_of("/mnt/sd/a.jpg"), Some(eleven));
    }

    #[tokio::test]
    async fn files_removed_from_device_are_swept() {
        let f = fixture(64);
        f.scanner.ensure_cursor(DEVICE).await.unwrap();
        f.device.add_file(picture("/mnt/sd/keep.jpg", utc(2024, 1, 10)));
        f.device.add_file(picture("/mnt/sd/gone.jpg", utc(2024, 1, 11)));
        let mode = manual(utc(2024, 1, 1), utc(2024, 1, 31));
        let cancel = CancellationToken::new();

        f.scanner.scan(&f.client, 0, mode, &cancel).await.unwrap();
        f.device.remove_file("/mnt/sd/gone.jpg");
        let summary = f.scanner.scan(&f.client, 0, mode, &cancel).await.unwrap();

        assert_eq!(summary, ScanSummary { created: 0, updated: 1, deleted: 1 });
        let records = f.store.records(DEVICE);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].file_path, "/mnt/sd/keep.jpg");
    }

    #[tokio::test]
    async fn failure_mid_window_keeps_cursor_and_records() {
        let f = fixture(2);
        f.scanner.ensure_cursor(DEVICE).await.unwrap();
        let initial = f.store.cursor(DEVICE).unwrap();

        let recent = Utc::now().trunc_subsecs(0) - Duration::days(1);
        f.device.add_file(picture("/mnt/sd/p.jpg", recent));
        for i in 0..3 {
            f.device.add_file(video(&format!("/mnt/sd/v{i}.dav"), recent + Duration::minutes(i)));
        }
        f.device.fail_page(FileKind::Video, 2);
        f.store.insert_record(UpsertFileRecord {
            device_id: DEVICE,
            file_path: "/mnt/sd/stale.jpg".into(),
            channel: 0,
            start_time: recent - Duration::hours(1),
            end_time: recent - Duration::hours(1),
            length: 0,
            kind: FileKind::Picture,
            duration: 0,
            disk: 0,
            cluster: 0,
            partition: 0,
            flags: Vec::new(),
            events: Vec::new(),
            storage: StorageClass::Local,
            updated_at: utc(2020, 1, 1),
        });

        let err = f
            .scanner
            .scan(&f.client, 0, ScanMode::Full, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_matches!(err, ScanError::Rpc(RpcError::Transport(_)));
        assert!(err.is_transient());
        assert_eq!(f.store.cursor(DEVICE).unwrap(), initial);
        assert!(f.store.saved().is_empty());
        assert!(f
            .store
            .records(DEVICE)
            .iter()
            .any(|r| r.file_path == "/mnt/sd/stale.jpg"));
        assert_eq!(f.device.open_finders(), 0);
    }

    #[tokio::test]
    async fn failed_window_is_redone_by_next_run() {
        let f = fixture(2);
        f.scanner.ensure_cursor(DEVICE).await.unwrap();
        let at = utc(2024, 1, 10);
        f.device.set_files(
            (0..3)
                .map(|i| video(&format!("/mnt/sd/v{i}.dav"), at + Duration::minutes(i)))
                .collect(),
        );
        let mode = manual(utc(2024, 1, 1), utc(2024, 1, 31));
        let cancel = CancellationToken::new();

        f.device.fail_page(FileKind::Video, 2);
        assert_matches!(
            f.scanner.scan(&f.client, 0, mode, &cancel).await,
            Err(ScanError::Rpc(RpcError::Transport(_)))
        );
        assert_eq!(f.store.records(DEVICE).len(), 2);

        f.device.clear_page_failure();
        let summary = f.scanner.scan(&f.client, 0, mode, &cancel).await.unwrap();

        assert_eq!(summary, ScanSummary { created: 1, updated: 2, deleted: 0 });
        assert_eq!(f.store.records(DEVICE).len(), 3);
    }

    #[tokio::test]
    async fn full_scan_walks_back_to_epoch_and_stops() {
        let f = fixture(64);
        f.scanner.ensure_cursor(DEVICE).await.unwrap();
        let cancel = CancellationToken::new();

        f.scanner.scan(&f.client, 0, ScanMode::Full, &cancel).await.unwrap();

        let saves = f.store.saved();
        let epoch = scan_epoch();
        for pair in saves.windows(2) {
            assert!(pair[1].full_cursor <= pair[0].full_cursor);
        }
        assert!(saves.iter().all(|p| p.full_cursor >= epoch));
        assert!(saves.iter().all(|p| p.full_complete == (p.full_cursor == epoch)));

        let last = f.store.cursor(DEVICE).unwrap();
        assert_eq!(last.full_cursor, epoch);
        assert!(last.full_complete);
        assert_eq!(last.percent, 100.0);

        // A completed full scan has nothing left to do.
        let listings = f.device.calls("mediaFileFind.findFile");
        let summary = f.scanner.scan(&f.client, 0, ScanMode::Full, &cancel).await.unwrap();
        assert_eq!(summary, ScanSummary::default());
        assert_eq!(f.device.calls("mediaFileFind.findFile"), listings);
    }

    #[tokio::test]
    async fn quick_scan_stays_out_of_volatile_window() {
        let f = fixture(64);
        f.scanner.ensure_cursor(DEVICE).await.unwrap();
        let mut position = f.store.cursor(DEVICE).unwrap();
        let volatile = f.scanner.config().volatile_window;
        position.quick_cursor = position.quick_cursor - Duration::days(3);
        f.store.set_cursor(DEVICE, position);

        let fresh = Utc::now().trunc_subsecs(0) - Duration::hours(1);
        f.device.add_file(picture("/mnt/sd/fresh.jpg", fresh));

        let before = Utc::now();
        let summary = f
            .scanner
            .scan(&f.client, 0, ScanMode::Quick, &CancellationToken::new())
            .await
            .unwrap();
        let after = Utc::now();

        assert_eq!(summary.created, 1);
        let saves = f.store.saved();
        for pair in saves.windows(2) {
            assert!(pair[1].quick_cursor >= pair[0].quick_cursor);
        }
        let last = f.store.cursor(DEVICE).unwrap();
        assert!(last.quick_cursor <= after - volatile);
        assert!(last.quick_cursor >= before - volatile - Duration::seconds(1));
    }

    #[tokio::test]
    async fn cancelled_scan_opens_no_listing() {
        let f = fixture(64);
        f.scanner.ensure_cursor(DEVICE).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = f
            .scanner
            .scan(&f.client, 0, manual(utc(2024, 1, 1), utc(2024, 3, 1)), &cancel)
            .await;

        assert_matches!(result, Err(ScanError::Cancelled));
        assert!(f.store.saved().is_empty());
        assert_eq!(f.device.calls("mediaFileFind.factory.create"), 0);
    }

    #[tokio::test]
    async fn scan_without_cursor_fails() {
        let f = fixture(64);
        let result = f
            .scanner
            .scan(&f.client, 0, ScanMode::Quick, &CancellationToken::new())
            .await;
        assert_matches!(result, Err(ScanError::NoCursor(DEVICE)));
    }

    #[tokio::test]
    async fn reset_restores_initial_position_and_keeps_files() {
        let f = fixture(64);
        f.scanner.ensure_cursor(DEVICE).await.unwrap();
        f.device.add_file(picture("/mnt/sd/a.jpg", utc(2024, 1, 10)));
        f.scanner
            .scan(&f.client, 0, ScanMode::Full, &CancellationToken::new())
            .await
            .unwrap();
        assert!(f.store.cursor(DEVICE).unwrap().full_complete);

        let volatile = f.scanner.config().volatile_window;
        for _ in 0..2 {
            let position = f.scanner.reset(DEVICE).await.unwrap();
            assert_eq!(position.full_epoch, scan_epoch());
            assert_eq!(position.quick_cursor, position.full_cursor - volatile);
            assert!(!position.full_complete);
            assert_eq!(position.percent, 0.0);
            assert_eq!(f.store.cursor(DEVICE).unwrap(), position);
        }
        assert_eq!(f.store.records(DEVICE).len(), 1);
    }

    #[tokio::test]
    async fn refused_login_is_not_transient() {
        let f = fixture(64);
        f.scanner.ensure_cursor(DEVICE).await.unwrap();
        f.device.set_password("changed");

        let err = f
            .scanner
            .scan(&f.client, 0, ScanMode::Quick, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_matches!(err, ScanError::Rpc(RpcError::Login(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn progress_and_completion_are_published() {
        let bus = Arc::new(EventBus::default());
        let mut sub = bus.subscribe();
        let mut f = fixture(64);
        f.scanner = Scanner::new(
            Arc::clone(&f.store) as Arc<dyn CursorStore>,
            Arc::clone(&f.store) as Arc<dyn FileStore>,
            ScanConfig::default(),
        )
        .with_events(Arc::clone(&bus));
        f.scanner.ensure_cursor(DEVICE).await.unwrap();

        f.scanner
            .scan(&f.client, 0, manual(utc(2024, 1, 1), utc(2024, 1, 2)), &CancellationToken::new())
            .await
            .unwrap();

        assert_matches!(
            sub.recv().await,
            Some(DeviceEvent::ScanProgress { device_id: DEVICE, percent, .. }) if percent == 100.0
        );
        assert_matches!(
            sub.recv().await,
            Some(DeviceEvent::ScanCompleted { device_id: DEVICE, created: 0, .. })
        );
    }
}
