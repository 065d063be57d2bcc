//! Request/response envelopes of the device RPC protocol.
//!
//! Requests are JSON objects `{"id", "method", "object"?, "params"?,
//! "session"?}` posted to one of two endpoints. Responses carry a few
//! polymorphic fields: `result` is a number or a boolean and `session` is a
//! string or a number. Both are decoded through small untagged enums whose
//! variants serde tries in declaration order, then normalized.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Error code the device answers the credential-less first login call with.
pub const LOGIN_CHALLENGE_CODE: i64 = 268632079;

/// Endpoint a request is posted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `/RPC2_Login`, used by both login phases.
    Login,
    /// `/RPC2`, used by every authenticated call.
    Rpc,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Login => "/RPC2_Login",
            Endpoint::Rpc => "/RPC2",
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// An outgoing call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: i64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl Request {
    pub fn new(id: i64, method: impl Into<String>) -> Self {
        Self {
            id,
            method: method.into(),
            object: None,
            params: None,
            session: None,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_object(mut self, object: Option<i64>) -> Self {
        self.object = object;
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Look up a string parameter, e.g. `userName`.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.as_ref()?.get(key)?.as_str()
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Error object embedded in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// A decoded response with its polymorphic fields normalized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: i64,
    #[serde(default, deserialize_with = "de_session")]
    pub session: Option<String>,
    #[serde(default, deserialize_with = "de_result")]
    pub result: Option<i64>,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<ErrorBody>,
}

impl Response {
    /// Normalized `result`; an absent result counts as 0.
    pub fn result(&self) -> i64 {
        self.result.unwrap_or(0)
    }

    /// Whether the device reported success through `result`.
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.result.map(|r| r != 0).unwrap_or(true)
    }

    /// Decode `params` into a typed value. Absent params decode from `null`.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.params {
            Some(value) => T::deserialize(value),
            None => T::deserialize(serde_json::Value::Null),
        }
    }
}

/// Shapes `result` is observed in, tried in order.
#[derive(Deserialize)]
#[serde(untagged)]
enum ResultField {
    Integer(i64),
    Boolean(bool),
    Float(f64),
}

impl From<ResultField> for i64 {
    fn from(value: ResultField) -> Self {
        match value {
            ResultField::Integer(n) => n,
            ResultField::Boolean(b) => i64::from(b),
            ResultField::Float(f) => f as i64,
        }
    }
}

/// Shapes `session` is observed in, tried in order.
#[derive(Deserialize)]
#[serde(untagged)]
enum SessionField {
    Text(String),
    Integer(i64),
}

impl From<SessionField> for String {
    fn from(value: SessionField) -> Self {
        match value {
            SessionField::Text(s) => s,
            SessionField::Integer(n) => n.to_string(),
        }
    }
}

fn de_result<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Ok(Option::<ResultField>::deserialize(deserializer)?.map(i64::from))
}

fn de_session<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<SessionField>::deserialize(deserializer)?
        .map(String::from)
        .filter(|s| !s.is_empty() && s != "0"))
}

/// Parse a raw response body.
pub fn decode_response(body: &[u8]) -> Result<Response, serde_json::Error> {
    serde_json::from_slice(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_skips_absent_fields() {
        let request = Request::new(7, "global.keepAlive");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({"id": 7, "method": "global.keepAlive"}));
    }

    #[test]
    fn request_carries_object_and_session() {
        let request = Request::new(3, "mediaFileFind.findNextFile")
            .with_object(Some(9_000_000_001))
            .with_session("abc")
            .with_params(json!({"count": 64}));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["object"], 9_000_000_001_i64);
        assert_eq!(value["session"], "abc");
        assert_eq!(value["params"]["count"], 64);
    }

    #[test]
    fn boolean_result_normalizes_to_integer() {
        let ok = decode_response(br#"{"id":1,"result":true,"session":"s"}"#).unwrap();
        assert_eq!(ok.result(), 1);
        assert!(ok.is_ok());

        let failed = decode_response(br#"{"id":1,"result":false}"#).unwrap();
        assert_eq!(failed.result(), 0);
        assert!(!failed.is_ok());
    }

    #[test]
    fn numeric_result_is_kept() {
        let response = decode_response(br#"{"id":2,"result":1234567890123}"#).unwrap();
        assert_eq!(response.result(), 1_234_567_890_123);
    }

    #[test]
    fn numeric_session_normalizes_to_string() {
        let response = decode_response(br#"{"id":1,"session":1503297415}"#).unwrap();
        assert_eq!(response.session.as_deref(), Some("1503297415"));
    }

    #[test]
    fn zero_or_null_session_means_none() {
        let zero = decode_response(br#"{"id":1,"session":0}"#).unwrap();
        assert!(zero.session.is_none());
        let null = decode_response(br#"{"id":1,"session":null}"#).unwrap();
        assert!(null.session.is_none());
    }

    #[test]
    fn error_body_is_decoded() {
        let response = decode_response(
            br#"{"id":1,"result":false,"error":{"code":268632079,"message":"Component error: login challenge!"},"params":{"realm":"Login to 123","random":"999","encryption":"Default"},"session":"abc"}"#,
        )
        .unwrap();
        let error = response.error.as_ref().unwrap();
        assert_eq!(error.code, LOGIN_CHALLENGE_CODE);
        assert_eq!(response.params.as_ref().unwrap()["random"], "999");
        assert!(!response.is_ok());
    }

    #[test]
    fn params_decode_into_typed_values() {
        #[derive(Deserialize)]
        struct Found {
            found: i64,
        }
        let response = decode_response(br#"{"id":1,"result":true,"params":{"found":3}}"#).unwrap();
        let found: Found = response.params_as().unwrap();
        assert_eq!(found.found, 3);

        let missing = decode_response(br#"{"id":1,"result":true}"#).unwrap();
        let none: Option<Found> = missing.params_as().unwrap();
        assert!(none.is_none());
    }
}
