//! Integration tests for the device, cursor and file record repositories.
//!
//! These need a Postgres instance reachable through `DATABASE_URL`; run
//! them with `cargo test -p camview-db -- --ignored`.

use camview_core::media::{FileKind, StorageClass};
use camview_core::scan::CursorPosition;
use camview_db::models::device::{CreateDevice, UpdateDevice};
use camview_db::models::file_record::UpsertFileRecord;
use camview_db::repositories::{DeviceRepo, FileRecordRepo, InsertOutcome, ScanCursorRepo};
use chrono::{Duration, TimeZone, Utc};
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn new_device(name: &str) -> CreateDevice {
    CreateDevice {
        name: name.to_string(),
        address: "192.168.1.108".to_string(),
        username: "admin".to_string(),
        password: "secret".to_string(),
        timezone: None,
    }
}

fn record(device_id: i64, path: &str, start_secs: i64) -> UpsertFileRecord {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(start_secs);
    UpsertFileRecord {
        device_id,
        file_path: path.to_string(),
        channel: 0,
        start_time: start,
        end_time: start,
        length: 1024,
        kind: FileKind::Picture,
        duration: 0,
        disk: 0,
        cluster: 0,
        partition: 0,
        flags: vec!["Event".to_string()],
        events: Vec::new(),
        storage: StorageClass::Local,
        updated_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_device_claims_lowest_free_seed(pool: PgPool) {
    let first = DeviceRepo::create(&pool, &new_device("front")).await.unwrap();
    let second = DeviceRepo::create(&pool, &new_device("back")).await.unwrap();

    assert_eq!(first.timezone, "UTC");
    assert_eq!(DeviceRepo::find_seed(&pool, first.id).await.unwrap(), Some(0));
    assert_eq!(DeviceRepo::find_seed(&pool, second.id).await.unwrap(), Some(1));

    assert!(DeviceRepo::delete(&pool, first.id).await.unwrap());
    let third = DeviceRepo::create(&pool, &new_device("side")).await.unwrap();
    assert_eq!(DeviceRepo::find_seed(&pool, third.id).await.unwrap(), Some(0));
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_disabled_devices_are_not_listed(pool: PgPool) {
    let device = DeviceRepo::create(&pool, &new_device("garage")).await.unwrap();
    assert_eq!(DeviceRepo::list_enabled(&pool).await.unwrap().len(), 1);

    let update = UpdateDevice {
        is_enabled: Some(false),
        ..UpdateDevice::default()
    };
    let updated = DeviceRepo::update(&pool, device.id, &update).await.unwrap().unwrap();

    assert!(!updated.is_enabled);
    assert_eq!(updated.address, device.address);
    assert!(DeviceRepo::list_enabled(&pool).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Scan cursors
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_cursor_ensure_keeps_existing_row(pool: PgPool) {
    let device = DeviceRepo::create(&pool, &new_device("lobby")).await.unwrap();
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let initial = CursorPosition::reset(now, Duration::hours(8));

    let created = ScanCursorRepo::ensure(&pool, device.id, &initial).await.unwrap();
    assert_eq!(created.position(), initial);

    let mut moved = initial;
    moved.advance_full(now - Duration::days(30));
    moved.percent = 12.5;
    assert!(ScanCursorRepo::save(&pool, device.id, &moved).await.unwrap());

    let again = ScanCursorRepo::ensure(&pool, device.id, &initial).await.unwrap();
    assert_eq!(again.position(), moved);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_cursor_save_without_row_reports_missing(pool: PgPool) {
    let position = CursorPosition::reset(Utc::now(), Duration::hours(8));
    assert!(!ScanCursorRepo::save(&pool, 9999, &position).await.unwrap());
    assert!(ScanCursorRepo::find(&pool, 9999).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// File records
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_insert_conflict_is_reported(pool: PgPool) {
    let device = DeviceRepo::create(&pool, &new_device("yard")).await.unwrap();
    let a = record(device.id, "/mnt/sd/a.jpg", 0);

    assert_eq!(FileRecordRepo::insert(&pool, &a).await.unwrap(), InsertOutcome::Inserted);
    assert_eq!(FileRecordRepo::insert(&pool, &a).await.unwrap(), InsertOutcome::Conflict);

    // Same start time under another path collides as well.
    let b = record(device.id, "/mnt/sd/b.jpg", 0);
    assert_eq!(FileRecordRepo::insert(&pool, &b).await.unwrap(), InsertOutcome::Conflict);
    assert_eq!(FileRecordRepo::count_for_device(&pool, device.id).await.unwrap(), 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_update_matches_by_path(pool: PgPool) {
    let device = DeviceRepo::create(&pool, &new_device("dock")).await.unwrap();
    let mut a = record(device.id, "/mnt/sd/a.jpg", 0);
    assert!(!FileRecordRepo::update(&pool, &a).await.unwrap());

    FileRecordRepo::insert(&pool, &a).await.unwrap();
    a.length = 4096;
    assert!(FileRecordRepo::update(&pool, &a).await.unwrap());

    let start = a.start_time;
    let rows = FileRecordRepo::list_in_range(&pool, device.id, start, start + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].length, 4096);
    assert_eq!(rows[0].kind, "picture");
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_update_onto_taken_start_time_keeps_times(pool: PgPool) {
    let device = DeviceRepo::create(&pool, &new_device("porch")).await.unwrap();
    let a = record(device.id, "/mnt/sd/a.jpg", 0);
    let b = record(device.id, "/mnt/sd/b.jpg", 3600);
    FileRecordRepo::insert(&pool, &a).await.unwrap();
    FileRecordRepo::insert(&pool, &b).await.unwrap();

    // A timezone change moves `a` onto the start time `b` still holds.
    let seen = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
    let mut shifted = record(device.id, "/mnt/sd/a.jpg", 3600);
    shifted.length = 4096;
    shifted.updated_at = seen;
    assert!(FileRecordRepo::update(&pool, &shifted).await.unwrap());

    let start = a.start_time;
    let rows = FileRecordRepo::list_in_range(&pool, device.id, start, start + Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].file_path, "/mnt/sd/a.jpg");
    assert_eq!(rows[0].start_time, a.start_time);
    assert_eq!(rows[0].length, 4096);
    assert_eq!(rows[0].updated_at, seen);
    assert_eq!(rows[1].file_path, "/mnt/sd/b.jpg");
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_delete_stale_respects_window_and_seen_time(pool: PgPool) {
    let device = DeviceRepo::create(&pool, &new_device("gate")).await.unwrap();
    let seen = Utc::now();

    let mut old = record(device.id, "/mnt/sd/old.jpg", 10);
    old.updated_at = seen - Duration::minutes(5);
    let fresh = record(device.id, "/mnt/sd/fresh.jpg", 20);
    let mut outside = record(device.id, "/mnt/sd/outside.jpg", 7200);
    outside.updated_at = seen - Duration::minutes(5);
    for r in [&old, &fresh, &outside] {
        FileRecordRepo::insert(&pool, r).await.unwrap();
    }

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let end = start + Duration::hours(1);
    let deleted = FileRecordRepo::delete_stale(&pool, device.id, start, end, seen)
        .await
        .unwrap();

    assert_eq!(deleted, 1);
    assert_eq!(FileRecordRepo::count_for_device(&pool, device.id).await.unwrap(), 2);
}
