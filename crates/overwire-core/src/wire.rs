//! Wire and envelope types.
//!
//! Outbound messages are the request description plus one reserved field
//! carrying the request identifier. Inbound messages echo that field back,
//! optionally carry a reserved status field, and everything else is opaque
//! payload. The reserved names are fixed constants shared by both ends of
//! the connection.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{CallError, ResponseCache};

/// Reserved wire field carrying the request identifier.
pub const ID_FIELD: &str = "_requestId";

/// Reserved wire field carrying the response status.
pub const STATUS_FIELD: &str = "_status";

/// Sentinel status for requests that expired before any response arrived.
/// Outside the success range, so it always classifies as a failure.
pub const STATUS_TIMED_OUT: u16 = 0;

/// Payload carried by a timeout resolution.
pub const TIMED_OUT_PAYLOAD: &str = "Timed out.";

/// Opaque, high-entropy request identifier.
///
/// Unique with overwhelming probability among concurrently pending requests;
/// never reused while its originating entry is pending.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Mint a fresh identifier (random 128-bit value rendered as a string).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request method verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "HEAD")]
    Head,
    #[serde(rename = "POST")]
    Post,
    #[serde(rename = "PUT")]
    Put,
    #[serde(rename = "PATCH")]
    Patch,
    #[serde(rename = "DELETE")]
    Delete,
}

impl Method {
    /// Pure reads are the only methods eligible for response caching.
    pub fn is_pure_read(self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// Caching behavior for a single request.
#[derive(Clone, Default)]
pub enum CacheMode {
    /// No caching (the default).
    #[default]
    Off,
    /// Cache in the correlator's private default cache.
    Default,
    /// Cache in an externally supplied cache, shareable across correlators.
    Scoped(Arc<ResponseCache>),
}

impl CacheMode {
    pub fn is_off(&self) -> bool {
        matches!(self, CacheMode::Off)
    }
}

impl fmt::Debug for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheMode::Off => f.write_str("Off"),
            CacheMode::Default => f.write_str("Default"),
            CacheMode::Scoped(_) => f.write_str("Scoped(..)"),
        }
    }
}

/// A logical request description, as supplied by the caller.
///
/// The `cache` and `timeout` fields are transport-layer-local: they steer
/// the correlator and never appear on the wire.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub target: String,
    pub body: Option<Value>,
    pub cache: CacheMode,
    /// Per-request timeout, overriding the correlator-wide default.
    /// `Some(Duration::ZERO)` disables the timeout for this request.
    pub timeout: Option<Duration>,
}

impl RequestSpec {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            body: None,
            cache: CacheMode::Off,
            timeout: None,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::Get, target)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_cache(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outbound wire message: the request description tagged with the reserved
/// identifier field. The cache directive and per-request timeout are
/// stripped by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    #[serde(rename = "_requestId")]
    pub request_id: RequestId,
    pub method: Method,
    #[serde(rename = "url")]
    pub target: String,
    #[serde(rename = "data", skip_serializing_if = "Option::is_none", default)]
    pub body: Option<Value>,
}

impl WireRequest {
    pub fn new(id: RequestId, spec: &RequestSpec) -> Self {
        Self {
            request_id: id,
            method: spec.method,
            target: spec.target.clone(),
            body: spec.body.clone(),
        }
    }
}

/// Inbound wire message: the reserved identifier field echoed back, an
/// optional reserved status field, and arbitrary payload fields.
///
/// Known limitation: payload fields literally named `_requestId` or
/// `_status` are consumed as correlation metadata and never reach the
/// caller. The reserved names are chosen to make collisions unlikely; they
/// are not escaped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    #[serde(rename = "_requestId")]
    pub request_id: RequestId,
    #[serde(rename = "_status", skip_serializing_if = "Option::is_none", default)]
    pub status: Option<u16>,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, Value>,
}

impl WireResponse {
    /// Effective status: absent means success (respondents that only ever
    /// signal success omit the field).
    pub fn status_or_default(&self) -> u16 {
        self.status.unwrap_or(200)
    }
}

/// The normalized resolution shape delivered for every request, whether it
/// succeeded, failed upstream, or timed out.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub id: RequestId,
    pub payload: Value,
    pub status: u16,
    /// Header map; may be empty.
    pub headers: HashMap<String, String>,
    /// Echo of the request this resolves.
    pub request: RequestSpec,
}

impl ResponseEnvelope {
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    pub fn is_timeout(&self) -> bool {
        self.status == STATUS_TIMED_OUT
    }

    /// Classify by status: the success range fulfills, everything else
    /// fails carrying the same envelope shape.
    pub fn into_result(self) -> Result<ResponseEnvelope, CallError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(CallError::Status(self))
        }
    }
}
