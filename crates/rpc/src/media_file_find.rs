//! Paged media file listing (`mediaFileFind.*`).
//!
//! A listing is a device-side finder object:
//!
//! 1. `factory.create` allocates the object,
//! 2. `findFile` applies the search condition,
//! 3. `findNextFile` returns pages until one comes back short,
//! 4. `close` + `destroy` release it.
//!
//! Devices hold only a handful of finders, so every opened
//! [`MediaFileStream`] must be released with [`MediaFileStream::close`]
//! on every exit path.

use camview_core::media::FileKind;
use camview_core::scan::Direction;
use camview_core::types::Timestamp;
use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client::RpcClient;
use crate::error::RpcError;

pub const DEFAULT_PAGE_SIZE: u32 = 64;

/// Format of every device-local timestamp on the wire.
pub const DEVICE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const METHOD_CREATE: &str = "mediaFileFind.factory.create";
const METHOD_FIND_FILE: &str = "mediaFileFind.findFile";
const METHOD_FIND_NEXT: &str = "mediaFileFind.findNextFile";
const METHOD_CLOSE: &str = "mediaFileFind.close";
const METHOD_DESTROY: &str = "mediaFileFind.destroy";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindOrder {
    Ascent,
    Descent,
}

impl From<Direction> for FindOrder {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Ascending => FindOrder::Ascent,
            Direction::Descending => FindOrder::Descent,
        }
    }
}

/// Search condition passed to `findFile`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FindCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<i32>,
    pub start_time: String,
    pub end_time: String,
    pub types: Vec<String>,
    pub order: FindOrder,
    #[serde(default)]
    pub redundant: String,
}

impl FindCondition {
    /// Condition for one file kind over `[start, end)`, rendered in `timezone`.
    pub fn new(
        kind: FileKind,
        start: Timestamp,
        end: Timestamp,
        order: FindOrder,
        timezone: Tz,
    ) -> Self {
        Self {
            channel: None,
            start_time: format_device_time(start, timezone),
            end_time: format_device_time(end, timezone),
            types: vec![kind.device_type().to_string()],
            order,
            redundant: "Exclusion".to_string(),
        }
    }

    pub fn with_channel(mut self, channel: i32) -> Self {
        self.channel = Some(channel);
        self
    }
}

/// One entry of a `findNextFile` page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FileInfo {
    pub channel: i32,
    pub start_time: String,
    pub end_time: String,
    pub length: i64,
    #[serde(rename = "Type")]
    pub kind: String,
    pub file_path: String,
    pub duration: i64,
    pub disk: i32,
    pub partition: i32,
    pub cluster: i32,
    pub flags: Option<Vec<String>>,
    pub events: Option<Vec<String>>,
}

impl FileInfo {
    pub fn start(&self, timezone: Tz) -> Option<Timestamp> {
        parse_device_time(&self.start_time, timezone)
    }

    pub fn end(&self, timezone: Tz) -> Option<Timestamp> {
        parse_device_time(&self.end_time, timezone)
    }

    pub fn file_kind(&self) -> Option<FileKind> {
        FileKind::ALL
            .into_iter()
            .find(|k| k.device_type() == self.kind)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FindNextPage {
    #[serde(default)]
    found: i64,
    #[serde(default)]
    infos: Option<Vec<FileInfo>>,
}

// ---------------------------------------------------------------------------
// Device time
// ---------------------------------------------------------------------------

pub fn format_device_time(at: Timestamp, timezone: Tz) -> String {
    at.with_timezone(&timezone)
        .format(DEVICE_TIME_FORMAT)
        .to_string()
}

/// Parse a device-local timestamp.
///
/// Ambiguous local times resolve to the earliest instant; times skipped by a
/// DST gap are read as UTC.
pub fn parse_device_time(value: &str, timezone: Tz) -> Option<Timestamp> {
    let naive = NaiveDateTime::parse_from_str(value.trim(), DEVICE_TIME_FORMAT).ok()?;
    let at = match timezone.from_local_datetime(&naive).earliest() {
        Some(local) => local.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&naive),
    };
    Some(at)
}

// ---------------------------------------------------------------------------
// MediaFileStream
// ---------------------------------------------------------------------------

/// An open device-side finder.
pub struct MediaFileStream<'a> {
    client: &'a RpcClient,
    object: i64,
    page_size: u32,
    exhausted: bool,
}

impl<'a> MediaFileStream<'a> {
    /// Allocate a finder and apply `condition`.
    ///
    /// A condition matching nothing yields an already exhausted stream, which
    /// still has to be closed. If `findFile` fails the finder is released
    /// before the error is returned.
    pub async fn open(
        client: &'a RpcClient,
        condition: &FindCondition,
        page_size: u32,
    ) -> Result<MediaFileStream<'a>, RpcError> {
        let object = client.call_result(METHOD_CREATE, None, None).await?;
        let mut stream = Self {
            client,
            object,
            page_size: page_size.max(1),
            exhausted: false,
        };

        let found = client
            .call(
                METHOD_FIND_FILE,
                Some(json!({ "condition": condition })),
                Some(object),
            )
            .await;
        match found {
            Ok(response) => stream.exhausted = !response.is_ok(),
            Err(e) if e.is_no_data() => stream.exhausted = true,
            Err(e) => {
                stream.release().await;
                return Err(e);
            }
        }

        tracing::debug!(
            device_id = client.device_id(),
            object,
            start = %condition.start_time,
            end = %condition.end_time,
            "Opened media file finder"
        );
        Ok(stream)
    }

    pub fn object(&self) -> i64 {
        self.object
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetch the next page. An empty page means the listing is done.
    pub async fn next_page(&mut self) -> Result<Vec<FileInfo>, RpcError> {
        if self.exhausted {
            return Ok(Vec::new());
        }

        let page = self
            .client
            .call_params::<Option<FindNextPage>>(
                METHOD_FIND_NEXT,
                Some(json!({ "count": self.page_size })),
                Some(self.object),
            )
            .await;
        let page = match page {
            Ok(page) => page.unwrap_or_default(),
            Err(e) if e.is_no_data() => {
                self.exhausted = true;
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let infos = page.infos.unwrap_or_default();
        if page.found <= 0 || infos.len() < self.page_size as usize {
            self.exhausted = true;
        }
        Ok(infos)
    }

    /// Release the finder. Failures are logged, never returned.
    pub async fn close(self) {
        self.release().await;
    }

    async fn release(&self) {
        for method in [METHOD_CLOSE, METHOD_DESTROY] {
            if let Err(e) = self.client.call(method, None, Some(self.object)).await {
                tracing::warn!(
                    device_id = self.client.device_id(),
                    object = self.object,
                    method,
                    error = %e,
                    "Failed to release media file finder"
                );
            }
        }
    }
}
