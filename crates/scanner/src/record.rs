use camview_core::media::{FileKind, StorageClass};
use camview_core::types::{DbId, Timestamp};
use camview_core::unique_time::unique_times;
use camview_db::models::file_record::UpsertFileRecord;
use camview_rpc::media_file_find::FileInfo;
use chrono_tz::Tz;

/// Build the catalog row for a listed file.
///
/// Returns `None` for entries without a path or with an unparseable start
/// time. A missing end time falls back to the start time.
pub fn file_record(
    device_id: DbId,
    seed: i64,
    kind: FileKind,
    info: &FileInfo,
    timezone: Tz,
    seen_at: Timestamp,
) -> Option<UpsertFileRecord> {
    if info.file_path.is_empty() {
        return None;
    }
    let start = info.start(timezone)?;
    let end = info.end(timezone).unwrap_or(start);
    let (start_time, end_time) = unique_times(&info.file_path, seed, start, end);

    Some(UpsertFileRecord {
        device_id,
        file_path: info.file_path.clone(),
        channel: info.channel,
        start_time,
        end_time,
        length: info.length,
        kind,
        duration: info.duration,
        disk: info.disk,
        cluster: info.cluster,
        partition: info.partition,
        flags: info.flags.clone().unwrap_or_default(),
        events: info.events.clone().unwrap_or_default(),
        storage: StorageClass::from_file_path(&info.file_path),
        updated_at: seen_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn info(path: &str, start: &str, end: &str) -> FileInfo {
        FileInfo {
            start_time: start.into(),
            end_time: end.into(),
            kind: "jpg".into(),
            file_path: path.into(),
            ..FileInfo::default()
        }
    }

    #[test]
    fn times_are_converted_and_disambiguated() {
        let seen = Utc::now();
        let record = file_record(
            7,
            42,
            FileKind::Picture,
            &info("/mnt/sd/2024-01-01/001/jpg/10/00/00[M][0@0][3].jpg", "2024-01-01 19:00:00", ""),
            chrono_tz::Asia::Tokyo,
            seen,
        )
        .unwrap();

        let base = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let offset = Duration::milliseconds(3) + Duration::microseconds(42);
        assert_eq!(record.start_time, base + offset);
        assert_eq!(record.end_time, base + offset);
        assert_eq!(record.storage, StorageClass::Local);
        assert_eq!(record.updated_at, seen);
        assert!(record.flags.is_empty());
    }

    #[test]
    fn storage_class_follows_path_scheme() {
        let record = file_record(
            1,
            0,
            FileKind::Video,
            &info("ftp://nas/cam/a.dav", "2024-01-01 00:00:00", "2024-01-01 00:05:00"),
            Tz::UTC,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(record.storage, StorageClass::Ftp);
        assert_eq!(record.end_time - record.start_time, Duration::minutes(5));
    }

    #[test]
    fn unusable_entries_are_skipped() {
        let now = Utc::now();
        let no_path = info("", "2024-01-01 00:00:00", "");
        let bad_time = info("/a.jpg", "garbage", "");
        assert!(file_record(1, 0, FileKind::Picture, &no_path, Tz::UTC, now).is_none());
        assert!(file_record(1, 0, FileKind::Picture, &bad_time, Tz::UTC, now).is_none());
    }
}
