//! In-memory doubles for tests: a scripted device, a static registry and a
//! connector handing out the scripted device.
//!
//! Enabled for this crate's own tests and, through the `test-util` feature,
//! for downstream crates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use camview_core::device::DeviceIdentity;
use camview_core::media::FileKind;
use camview_core::types::DbId;
use serde_json::{json, Value};

use crate::auth::LoginChallenge;
use crate::codec::{Endpoint, ErrorBody, Request, Response, LOGIN_CHALLENGE_CODE};
use crate::error::{
    TransportError, CODE_INVALID_SESSION, CODE_METHOD_NOT_FOUND, CODE_NO_DATA,
    CODE_USER_OR_PASSWORD_NOT_VALID,
};
use crate::manager::{CacheError, DeviceRegistry};
use crate::media_file_find::{FileInfo, FindCondition, FindOrder};
use crate::transport::{Connector, Transport};

// ---------------------------------------------------------------------------
// FakeDevice
// ---------------------------------------------------------------------------

struct Finder {
    kind: Option<String>,
    results: Vec<FileInfo>,
    position: usize,
    pages: usize,
}

struct PageFailure {
    kind: FileKind,
    page: usize,
}

struct DeviceState {
    username: String,
    password: String,
    realm: String,
    random: String,
    encryption: String,
    next_session: u64,
    pending_session: Option<String>,
    active_sessions: Vec<String>,
    unreachable: bool,
    skip_challenge: bool,
    login_error: Option<i64>,
    keepalive_error: Option<i64>,
    files: Vec<FileInfo>,
    finders: HashMap<i64, Finder>,
    next_object: i64,
    page_failure: Option<PageFailure>,
    calls: HashMap<String, usize>,
}

/// Scripted device speaking the RPC protocol in memory.
///
/// Supports the two-phase login, keep-alive, logout and the
/// `mediaFileFind.*` family over a mutable file list. Unknown methods
/// answer "method not found".
pub struct FakeDevice {
    state: Mutex<DeviceState>,
}

impl FakeDevice {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            state: Mutex::new(DeviceState {
                username: username.to_string(),
                password: password.to_string(),
                realm: "Login to FAKE0000000000".to_string(),
                random: "1234567890".to_string(),
                encryption: "Default".to_string(),
                next_session: 1,
                pending_session: None,
                active_sessions: Vec::new(),
                unreachable: false,
                skip_challenge: false,
                login_error: None,
                keepalive_error: None,
                files: Vec::new(),
                finders: HashMap::new(),
                next_object: 9_000_000_000,
                page_failure: None,
                calls: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Picture entry starting and ending at `start` (device-local).
    pub fn picture(path: &str, start: &str) -> FileInfo {
        FileInfo {
            start_time: start.to_string(),
            end_time: start.to_string(),
            kind: FileKind::Picture.device_type().to_string(),
            file_path: path.to_string(),
            length: 1024,
            ..FileInfo::default()
        }
    }

    /// Video entry covering `start..end` (device-local).
    pub fn video(path: &str, start: &str, end: &str) -> FileInfo {
        FileInfo {
            start_time: start.to_string(),
            end_time: end.to_string(),
            kind: FileKind::Video.device_type().to_string(),
            file_path: path.to_string(),
            length: 1_048_576,
            ..FileInfo::default()
        }
    }

    pub fn set_encryption(&self, encryption: &str) {
        self.lock().encryption = encryption.to_string();
    }

    pub fn set_password(&self, password: &str) {
        self.lock().password = password.to_string();
    }

    pub fn add_file(&self, file: FileInfo) {
        self.lock().files.push(file);
    }

    pub fn remove_file(&self, path: &str) {
        self.lock().files.retain(|f| f.file_path != path);
    }

    pub fn set_files(&self, files: Vec<FileInfo>) {
        self.lock().files = files;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Answer login phase 1 with a plain success instead of a challenge.
    pub fn set_skip_challenge(&self, skip: bool) {
        self.lock().skip_challenge = skip;
    }

    /// Refuse login phase 2 with `code`.
    pub fn set_login_error(&self, code: Option<i64>) {
        self.lock().login_error = code;
    }

    pub fn set_keepalive_error(&self, code: Option<i64>) {
        self.lock().keepalive_error = code;
    }

    /// Fail the `page`-th `findNextFile` (1-based) of every finder listing
    /// `kind` with a transport error.
    pub fn fail_page(&self, kind: FileKind, page: usize) {
        self.lock().page_failure = Some(PageFailure { kind, page });
    }

    pub fn clear_page_failure(&self) {
        self.lock().page_failure = None;
    }

    /// Forget every session, as a device reboot would.
    pub fn expire_sessions(&self) {
        let mut state = self.lock();
        state.active_sessions.clear();
        state.pending_session = None;
    }

    /// Requests received for `method`, including rejected ones.
    pub fn calls(&self, method: &str) -> usize {
        self.lock().calls.get(method).copied().unwrap_or(0)
    }

    /// Finder objects created and not yet destroyed.
    pub fn open_finders(&self) -> usize {
        self.lock().finders.len()
    }
}

fn ok(id: i64, result: Value) -> Response {
    Response {
        id,
        result: match result {
            Value::Bool(b) => Some(i64::from(b)),
            Value::Number(n) => n.as_i64(),
            _ => Some(1),
        },
        ..Response::default()
    }
}

fn fail(id: i64, code: i64, message: &str) -> Response {
    Response {
        id,
        result: Some(0),
        error: Some(ErrorBody {
            code,
            message: message.to_string(),
        }),
        ..Response::default()
    }
}

impl DeviceState {
    fn issue_session(&mut self) -> String {
        let session = format!("fake-session-{}", self.next_session);
        self.next_session += 1;
        session
    }

    fn login(&mut self, request: &Request) -> Response {
        let password = request.param_str("password").unwrap_or_default();

        if password.is_empty() || request.session.is_none() {
            if self.skip_challenge {
                let mut response = ok(request.id, json!(true));
                response.session = Some(self.issue_session());
                return response;
            }
            let session = self.issue_session();
            self.pending_session = Some(session.clone());
            let mut response =
                fail(request.id, LOGIN_CHALLENGE_CODE, "Component error: login challenge!");
            response.session = Some(session);
            response.params = Some(json!({
                "realm": self.realm,
                "random": self.random,
                "encryption": self.encryption,
            }));
            return response;
        }

        if request.session != self.pending_session {
            return fail(request.id, CODE_INVALID_SESSION, "Invalid session in request data!");
        }
        if let Some(code) = self.login_error {
            return fail(request.id, code, "login refused");
        }

        let challenge = LoginChallenge {
            realm: self.realm.clone(),
            random: self.random.clone(),
            encryption: self.encryption.clone(),
        };
        let expected = challenge.hash_password(&self.username, &self.password);
        let username = request.param_str("userName").unwrap_or_default();
        let login_type = request.param_str("loginType").unwrap_or_default();
        if username != self.username
            || password != expected
            || login_type != challenge.login_type()
        {
            return fail(request.id, CODE_USER_OR_PASSWORD_NOT_VALID, "User or password not valid");
        }

        let session = self.pending_session.take().unwrap_or_default();
        self.active_sessions.push(session.clone());
        let mut response = ok(request.id, json!(true));
        response.session = Some(session);
        response
    }

    fn rpc(&mut self, request: &Request) -> Result<Response, TransportError> {
        let authorized = request
            .session
            .as_ref()
            .map(|s| self.active_sessions.contains(s))
            .unwrap_or(false);
        if !authorized {
            return Ok(fail(request.id, CODE_INVALID_SESSION, "Invalid session in request data!"));
        }

        let id = request.id;
        let response = match request.method.as_str() {
            "global.keepAlive" => match self.keepalive_error {
                Some(code) => fail(id, code, "keep alive refused"),
                None => ok(id, json!(300)),
            },
            "global.logout" => {
                if let Some(session) = &request.session {
                    self.active_sessions.retain(|s| s != session);
                }
                ok(id, json!(true))
            }
            "global.getCurrentTime" => {
                let mut response = ok(id, json!(true));
                response.params = Some(json!({ "time": "2024-01-01 00:00:00" }));
                response
            }
            "mediaFileFind.factory.create" => {
                let object = self.next_object;
                self.next_object += 1;
                self.finders.insert(
                    object,
                    Finder {
                        kind: None,
                        results: Vec::new(),
                        position: 0,
                        pages: 0,
                    },
                );
                ok(id, json!(object))
            }
            "mediaFileFind.findFile" => self.find_file(request),
            "mediaFileFind.findNextFile" => return self.find_next(request),
            "mediaFileFind.close" => ok(id, json!(true)),
            "mediaFileFind.destroy" => match request.object {
                Some(object) if self.finders.remove(&object).is_some() => ok(id, json!(true)),
                _ => ok(id, json!(false)),
            },
            _ => fail(id, CODE_METHOD_NOT_FOUND, "Method not found!"),
        };
        Ok(response)
    }

    fn find_file(&mut self, request: &Request) -> Response {
        let condition: Option<FindCondition> = request
            .params
            .as_ref()
            .and_then(|p| p.get("condition"))
            .and_then(|c| serde_json::from_value(c.clone()).ok());
        let Some(condition) = condition else {
            return fail(request.id, crate::error::CODE_INVALID_REQUEST, "Request invalid!");
        };
        // Device-local times in a fixed format compare correctly as strings.
        let mut results: Vec<FileInfo> = self
            .files
            .iter()
            .filter(|f| condition.types.iter().any(|t| *t == f.kind))
            .filter(|f| f.start_time >= condition.start_time && f.start_time < condition.end_time)
            .cloned()
            .collect();
        results.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        if condition.order == FindOrder::Descent {
            results.reverse();
        }

        let Some(finder) = request.object.and_then(|o| self.finders.get_mut(&o)) else {
            return fail(request.id, CODE_INVALID_SESSION, "Invalid object");
        };
        finder.kind = condition.types.first().cloned();
        finder.position = 0;
        finder.pages = 0;
        if results.is_empty() {
            return fail(request.id, CODE_NO_DATA, "No data!");
        }
        finder.results = results;
        ok(request.id, json!(true))
    }

    fn find_next(&mut self, request: &Request) -> Result<Response, TransportError> {
        let count = request
            .params
            .as_ref()
            .and_then(|p| p.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(64) as usize;
        let failure = self
            .page_failure
            .as_ref()
            .map(|f| (f.kind.device_type().to_string(), f.page));
        let Some(finder) = request.object.and_then(|o| self.finders.get_mut(&o)) else {
            return Ok(fail(request.id, CODE_INVALID_SESSION, "Invalid object"));
        };

        finder.pages += 1;
        if let Some((kind, page)) = failure {
            if finder.kind.as_deref() == Some(kind.as_str()) && finder.pages == page {
                return Err(TransportError::Connect("connection reset by fake device".into()));
            }
        }

        let end = (finder.position + count).min(finder.results.len());
        let infos = finder.results[finder.position..end].to_vec();
        finder.position = end;

        let mut response = ok(request.id, json!(true));
        response.params = Some(if infos.is_empty() {
            json!({ "found": 0 })
        } else {
            json!({ "found": infos.len(), "infos": infos })
        });
        Ok(response)
    }
}

#[async_trait]
impl Transport for FakeDevice {
    async fn send(
        &self,
        endpoint: Endpoint,
        request: &Request,
    ) -> Result<Response, TransportError> {
        let mut state = self.lock();
        *state.calls.entry(request.method.clone()).or_default() += 1;

        if state.unreachable {
            return Err(TransportError::Connect("fake device unreachable".into()));
        }

        match endpoint {
            Endpoint::Login if request.method == "global.login" => Ok(state.login(request)),
            Endpoint::Login => Ok(fail(request.id, CODE_METHOD_NOT_FOUND, "Method not found!")),
            Endpoint::Rpc => state.rpc(request),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry and connector doubles
// ---------------------------------------------------------------------------

/// [`DeviceRegistry`] over an in-memory map.
#[derive(Default)]
pub struct StaticRegistry {
    devices: Mutex<HashMap<DbId, DeviceIdentity>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identity: DeviceIdentity) {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identity.id, identity);
    }

    pub fn remove(&self, device_id: DbId) {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&device_id);
    }
}

#[async_trait]
impl DeviceRegistry for StaticRegistry {
    async fn identity(&self, device_id: DbId) -> Result<Option<DeviceIdentity>, CacheError> {
        Ok(self
            .devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&device_id)
            .cloned())
    }
}

/// [`Connector`] that routes every device to one shared [`FakeDevice`].
pub struct FakeConnector {
    device: Arc<FakeDevice>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(device: Arc<FakeDevice>) -> Self {
        Self {
            device,
            connects: AtomicUsize::new(0),
        }
    }

    /// Number of transports handed out.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    fn connect(&self, _identity: &DeviceIdentity) -> Arc<dyn Transport> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Arc::clone(&self.device) as Arc<dyn Transport>
    }
}
