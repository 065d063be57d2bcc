//! Session client for one device.
//!
//! [`RpcClient`] owns the device's authentication state machine:
//!
//! ```text
//! LoggedOut ──call──▶ LoggingIn ──phase 2 ok──▶ LoggedIn ──close──▶ Closed
//!     ▲                  │  │                      │
//!     └──transport err───┘  └─login refused─▶ Error (terminal)
//!     ▲                                            │
//!     └──────── keep-alive refused / invalid session
//! ```
//!
//! Login and keep-alive are single-flight: they run behind a per-client
//! mutex and re-check the state after acquiring it, so concurrent callers
//! never race two logins. Once logged in, ordinary calls share the token
//! and run concurrently. The client never retries; every error goes back
//! to the caller.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camview_core::device::{ConnectionKey, DeviceIdentity};
use camview_core::types::DbId;
use camview_events::{DeviceEvent, EventBus};
use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::auth::{LoginChallenge, CLIENT_TYPE};
use crate::codec::{Endpoint, ErrorBody, Request, Response, LOGIN_CHALLENGE_CODE};
use crate::error::{ignore_unsupported, ErrorKind, LoginError, RpcError, TransportError};
use crate::transport::Transport;

const METHOD_LOGIN: &str = "global.login";
const METHOD_KEEPALIVE: &str = "global.keepAlive";
const METHOD_LOGOUT: &str = "global.logout";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Timing parameters for a session client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound on every request, login phases included.
    pub request_timeout: Duration,
    /// A keep-alive is sent before the next call once the session is older than this.
    pub keepalive_interval: Duration,
    /// Session lifetime requested from the device by each keep-alive, in seconds.
    pub session_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(60),
            session_timeout_secs: 300,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var              | Default |
    /// |----------------------|---------|
    /// | `RPC_TIMEOUT_SECS`   | `5`     |
    /// | `RPC_KEEPALIVE_SECS` | `60`    |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |name: &str, fallback: Duration| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };
        Self {
            request_timeout: secs("RPC_TIMEOUT_SECS", defaults.request_timeout),
            keepalive_interval: secs("RPC_KEEPALIVE_SECS", defaults.keepalive_interval),
            session_timeout_secs: defaults.session_timeout_secs,
        }
    }
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Lifecycle of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    LoggingIn,
    LoggedIn,
    /// Login was refused; requires a credential change.
    Error,
    Closed,
}

struct Session {
    state: SessionState,
    token: Option<String>,
    last_login: Option<Instant>,
    last_error: Option<String>,
    login_error: Option<LoginError>,
}

/// Point-in-time view of a client's session, for diagnostics.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub has_token: bool,
    pub last_error: Option<String>,
}

/// What a caller must do before it can use the session.
enum Next {
    Ready(String),
    KeepAlive(String),
    Login,
    Fail(RpcError),
}

// ---------------------------------------------------------------------------
// RpcClient
// ---------------------------------------------------------------------------

/// Authenticated RPC client for a single device.
pub struct RpcClient {
    device_id: DbId,
    key: ConnectionKey,
    timezone: std::sync::RwLock<Tz>,
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    next_id: AtomicI64,
    session: RwLock<Session>,
    login_lock: Mutex<()>,
    events: Option<Arc<EventBus>>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Create a logged-out client. No network traffic happens until the first call.
    pub fn new(
        identity: &DeviceIdentity,
        transport: Arc<dyn Transport>,
        config: ClientConfig,
    ) -> Self {
        Self {
            device_id: identity.id,
            key: identity.connection_key(),
            timezone: std::sync::RwLock::new(identity.timezone),
            transport,
            config,
            next_id: AtomicI64::new(1),
            session: RwLock::new(Session {
                state: SessionState::LoggedOut,
                token: None,
                last_login: None,
                last_error: None,
                login_error: None,
            }),
            login_lock: Mutex::new(()),
            events: None,
        }
    }

    /// Publish classified protocol errors to `bus`.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn device_id(&self) -> DbId {
        self.device_id
    }

    pub fn connection_key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Timezone the device's local timestamps are rendered in.
    pub fn timezone(&self) -> Tz {
        self.timezone.read().map(|tz| *tz).unwrap_or(Tz::UTC)
    }

    /// Update the timezone in place; it does not affect the session.
    pub fn set_timezone(&self, timezone: Tz) {
        if let Ok(mut tz) = self.timezone.write() {
            *tz = timezone;
        }
    }

    pub async fn state(&self) -> SessionState {
        self.session.read().await.state
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let session = self.session.read().await;
        SessionSnapshot {
            state: session.state,
            has_token: session.token.is_some(),
            last_error: session.last_error.clone(),
        }
    }

    /// Log in (or renew the session) without issuing any other call.
    pub async fn connect(&self) -> Result<(), RpcError> {
        self.ensure_session().await.map(|_| ())
    }

    /// Issue an authenticated call and return the raw response.
    ///
    /// An error object in the response becomes [`RpcError::Protocol`]. An
    /// invalid-session error also drops the session so the next call logs
    /// in again.
    pub async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        object: Option<i64>,
    ) -> Result<Response, RpcError> {
        let token = self.ensure_session().await?;

        let mut request = self
            .request(method)
            .with_session(token.clone())
            .with_object(object);
        if let Some(params) = params {
            request = request.with_params(params);
        }

        let response = self.send(Endpoint::Rpc, request).await?;

        if let Some(error) = &response.error {
            let kind = ErrorKind::classify(error.code, &error.message);
            if kind == ErrorKind::InvalidSession {
                self.invalidate(&token).await;
            }
            self.report(method, kind, error);
            return Err(protocol_error(method, kind, error));
        }

        Ok(response)
    }

    /// Issue a call and decode its `params`.
    pub async fn call_params<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        object: Option<i64>,
    ) -> Result<T, RpcError> {
        let response = self.call(method, params, object).await?;
        response.params_as().map_err(|source| RpcError::Decode {
            method: method.to_string(),
            source,
        })
    }

    /// Issue a call and return its normalized integer `result`.
    pub async fn call_result(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        object: Option<i64>,
    ) -> Result<i64, RpcError> {
        Ok(self.call(method, params, object).await?.result())
    }

    /// Device serial number, or `None` when the device does not expose it.
    pub async fn serial_number(&self) -> Result<Option<String>, RpcError> {
        #[derive(serde::Deserialize)]
        struct SerialNo {
            sn: String,
        }

        let result = self
            .call_params::<SerialNo>("magicBox.getSerialNo", None, None)
            .await;
        Ok(ignore_unsupported(result)?.map(|s| s.sn))
    }

    /// Best-effort logout; the client is `Closed` afterwards whatever the outcome.
    ///
    /// Closing an already closed client is a no-op.
    pub async fn close(&self) -> Result<(), RpcError> {
        let _guard = self.login_lock.lock().await;

        let (previous, token) = {
            let mut session = self.session.write().await;
            let previous = session.state;
            session.state = SessionState::Closed;
            (previous, session.token.take())
        };

        let token = match (previous, token) {
            (SessionState::LoggedIn, Some(token)) => token,
            _ => return Ok(()),
        };

        let request = self.request(METHOD_LOGOUT).with_session(token);
        match self.send(Endpoint::Rpc, request).await {
            Ok(response) => match &response.error {
                None => {
                    tracing::info!(device_id = self.device_id, "Logged out of device");
                    Ok(())
                }
                Some(error) => {
                    let kind = ErrorKind::classify(error.code, &error.message);
                    tracing::debug!(
                        device_id = self.device_id,
                        code = error.code,
                        "Logout refused by device"
                    );
                    Err(protocol_error(METHOD_LOGOUT, kind, error))
                }
            },
            Err(e) => {
                tracing::debug!(device_id = self.device_id, error = %e, "Logout failed");
                Err(e.into())
            }
        }
    }

    // ---- private helpers ----

    fn request(&self, method: &str) -> Request {
        Request::new(self.next_id.fetch_add(1, Ordering::Relaxed), method)
    }

    /// Send through the transport, bounded by the request timeout.
    async fn send(&self, endpoint: Endpoint, request: Request) -> Result<Response, TransportError> {
        match tokio::time::timeout(
            self.config.request_timeout,
            self.transport.send(endpoint, &request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    fn next_step(&self, session: &Session) -> Next {
        match session.state {
            SessionState::Closed => Next::Fail(RpcError::Closed),
            SessionState::Error => Next::Fail(RpcError::Login(
                session
                    .login_error
                    .clone()
                    .unwrap_or_else(|| LoginError::new(0, "login refused")),
            )),
            SessionState::LoggedIn => match &session.token {
                Some(token) if !self.keepalive_due(session) => Next::Ready(token.clone()),
                Some(token) => Next::KeepAlive(token.clone()),
                None => Next::Login,
            },
            SessionState::LoggedOut | SessionState::LoggingIn => Next::Login,
        }
    }

    fn keepalive_due(&self, session: &Session) -> bool {
        session
            .last_login
            .map(|at| at.elapsed() > self.config.keepalive_interval)
            .unwrap_or(true)
    }

    /// Return a usable session token, logging in or renewing as needed.
    async fn ensure_session(&self) -> Result<String, RpcError> {
        match self.next_step(&*self.session.read().await) {
            Next::Ready(token) => return Ok(token),
            Next::Fail(e) => return Err(e),
            Next::KeepAlive(_) | Next::Login => {}
        }

        let _guard = self.login_lock.lock().await;

        // Another caller may have finished the work while we waited.
        let next = self.next_step(&*self.session.read().await);
        match next {
            Next::Ready(token) => Ok(token),
            Next::Fail(e) => Err(e),
            Next::KeepAlive(token) => self.keep_alive(token).await,
            Next::Login => self.login().await,
        }
    }

    /// Run the two-phase login. Caller holds `login_lock`.
    async fn login(&self) -> Result<String, RpcError> {
        self.session.write().await.state = SessionState::LoggingIn;
        tracing::debug!(device_id = self.device_id, "Logging in to device");

        let outcome = self.login_handshake().await;

        let mut session = self.session.write().await;
        match outcome {
            Ok(token) => {
                session.state = SessionState::LoggedIn;
                session.token = Some(token.clone());
                session.last_login = Some(Instant::now());
                session.last_error = None;
                session.login_error = None;
                tracing::info!(device_id = self.device_id, "Logged in to device");
                Ok(token)
            }
            Err(RpcError::Login(e)) => {
                session.state = SessionState::Error;
                session.token = None;
                session.last_error = Some(e.to_string());
                session.login_error = Some(e.clone());
                tracing::warn!(
                    device_id = self.device_id,
                    reason = ?e.reason,
                    code = e.code,
                    "Device refused login"
                );
                Err(RpcError::Login(e))
            }
            Err(e) => {
                session.state = SessionState::LoggedOut;
                session.token = None;
                session.last_error = Some(e.to_string());
                tracing::warn!(device_id = self.device_id, error = %e, "Login failed");
                Err(e)
            }
        }
    }

    async fn login_handshake(&self) -> Result<String, RpcError> {
        // Phase 1: no password, the device must answer with a challenge.
        let request = self.request(METHOD_LOGIN).with_params(json!({
            "userName": self.key.username,
            "password": "",
            "clientType": CLIENT_TYPE,
            "loginType": "Direct",
        }));
        let first = self.send(Endpoint::Login, request).await?;

        let challenge_session = match (&first.error, &first.session) {
            (Some(error), Some(session)) if error.code == LOGIN_CHALLENGE_CODE => session.clone(),
            _ => {
                return Err(RpcError::Violation {
                    method: METHOD_LOGIN.to_string(),
                    detail: "device did not answer with a login challenge".to_string(),
                })
            }
        };
        let challenge: LoginChallenge =
            first.params_as().map_err(|e| RpcError::Violation {
                method: METHOD_LOGIN.to_string(),
                detail: format!("malformed login challenge: {e}"),
            })?;

        // Phase 2: hashed password bound to the challenge session.
        let password = challenge.hash_password(&self.key.username, &self.key.password);
        let request = self
            .request(METHOD_LOGIN)
            .with_session(challenge_session.clone())
            .with_params(json!({
                "userName": self.key.username,
                "password": password,
                "clientType": CLIENT_TYPE,
                "loginType": challenge.login_type(),
                "authorityType": challenge.encryption,
            }));
        let second = self.send(Endpoint::Login, request).await?;

        if let Some(error) = &second.error {
            let kind = ErrorKind::classify(error.code, &error.message);
            self.report(METHOD_LOGIN, kind, error);
            return Err(LoginError::new(error.code, error.message.clone()).into());
        }
        if !second.is_ok() {
            return Err(LoginError::new(0, "device rejected login without an error code").into());
        }

        Ok(second.session.unwrap_or(challenge_session))
    }

    /// Renew the session. Caller holds `login_lock`.
    async fn keep_alive(&self, token: String) -> Result<String, RpcError> {
        let request = self
            .request(METHOD_KEEPALIVE)
            .with_session(token.clone())
            .with_params(json!({
                "timeout": self.config.session_timeout_secs,
                "active": true,
            }));

        // Transport failures leave the session untouched.
        let response = self.send(Endpoint::Rpc, request).await?;

        let mut session = self.session.write().await;
        if let Some(error) = &response.error {
            let kind = ErrorKind::classify(error.code, &error.message);
            session.state = SessionState::LoggedOut;
            session.token = None;
            session.last_error = Some(error.message.clone());
            drop(session);
            self.report(METHOD_KEEPALIVE, kind, error);
            return Err(protocol_error(METHOD_KEEPALIVE, kind, error));
        }

        session.state = SessionState::LoggedIn;
        session.last_login = Some(Instant::now());
        tracing::debug!(device_id = self.device_id, "Session kept alive");
        Ok(token)
    }

    /// Drop the session if `token` is still the current one.
    async fn invalidate(&self, token: &str) {
        let mut session = self.session.write().await;
        if session.state == SessionState::LoggedIn && session.token.as_deref() == Some(token) {
            session.state = SessionState::LoggedOut;
            session.token = None;
            session.last_error = Some("invalid session".to_string());
            tracing::info!(device_id = self.device_id, "Session invalidated by device");
        }
    }

    fn report(&self, method: &str, kind: ErrorKind, error: &ErrorBody) {
        if kind == ErrorKind::NoData {
            tracing::debug!(device_id = self.device_id, method, "No data");
            return;
        }

        tracing::warn!(
            device_id = self.device_id,
            method,
            kind = %kind,
            code = error.code,
            message = %error.message,
            "Device returned an error"
        );

        if let Some(bus) = &self.events {
            bus.publish(DeviceEvent::RpcError {
                device_id: self.device_id,
                method: method.to_string(),
                kind: kind.as_str().to_string(),
                code: error.code,
                message: error.message.clone(),
            });
        }
    }
}

fn protocol_error(method: &str, kind: ErrorKind, error: &ErrorBody) -> RpcError {
    RpcError::Protocol {
        method: method.to_string(),
        kind,
        code: error.code,
        message: error.message.clone(),
    }
}
