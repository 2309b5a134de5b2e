//! External collaborator contracts.
//!
//! The container and dispatcher consume schema validation, metrics, tracing,
//! and WebSocket upgrade handling through these narrow traits. All of them
//! are optional; a missing sink simply disables its concern.

use crate::{Error, HttpRequest, HttpResponse};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

// ========== Schema validation ==========

/// Schema validation contract.
///
/// `validate` returns the *normalized* value; the dispatcher replaces the
/// bound argument with it. Failure must be a descriptive error.
pub trait Schema: Send + Sync {
    fn validate(&self, value: &Value) -> Result<Value, Error>;

    /// Probe used to decide default required-ness for BODY parameters: a
    /// schema that accepts the absence-of-value case makes the body optional.
    fn allows_missing(&self) -> bool {
        self.validate(&Value::Null).is_ok()
    }
}

// ========== Metrics ==========

/// One completed request, as reported to the metrics sink.
#[derive(Debug, Clone)]
pub struct HttpSample {
    pub method: String,
    /// Normalized route label (the registered path, not the raw request path).
    pub route: String,
    pub status_code: u16,
    pub duration_ms: u128,
    pub controller: String,
    pub handler: String,
}

/// Metrics collaborator. Implementations must not block.
pub trait MetricsSink: Send + Sync {
    fn record_http_request(&self, sample: &HttpSample);
}

// ========== Tracing ==========

/// Propagated trace identity for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
}

/// An open HTTP span, returned to the sink at request end.
#[derive(Debug)]
pub struct HttpSpan {
    pub context: TraceContext,
    pub method: String,
    pub route: String,
    pub started_at: Instant,
}

/// Tracing collaborator.
///
/// The dispatcher extracts (or generates) a context at request start, opens a
/// span, and ends it on every exit path. The context is threaded explicitly
/// through the request, never stored in shared mutable state.
pub trait TraceSink: Send + Sync {
    /// Recover an upstream context from request headers, if present.
    fn extract_from_headers(&self, headers: &HashMap<String, String>) -> Option<TraceContext>;

    /// Mint a fresh context for a request with no upstream trace.
    fn generate_context(&self) -> TraceContext {
        TraceContext {
            trace_id: uuid::Uuid::new_v4().simple().to_string(),
            span_id: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// Open a span for the matched route.
    fn start_http_trace(&self, context: &TraceContext, method: &str, route: &str) -> HttpSpan {
        HttpSpan {
            context: context.clone(),
            method: method.to_string(),
            route: route.to_string(),
            started_at: Instant::now(),
        }
    }

    /// Close a span with the final response status.
    fn end_http_trace(&self, span: HttpSpan, status: u16);

    /// Attach an event to an in-flight trace.
    fn add_event(&self, context: &TraceContext, name: &str, attributes: &[(&str, &str)]);
}

// ========== WebSocket upgrade ==========

/// Delegate for WebSocket upgrade requests.
///
/// When configured, the dispatcher short-circuits upgrade requests to this
/// collaborator before any route lookup.
#[async_trait]
pub trait UpgradeDelegate: Send + Sync {
    async fn handle_upgrade(&self, request: HttpRequest) -> Result<HttpResponse, Error>;
}

/// Whether a request asks for a WebSocket upgrade.
pub fn wants_upgrade(request: &HttpRequest) -> bool {
    request
        .header("upgrade")
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSchema;

    impl Schema for NullSchema {
        fn validate(&self, value: &Value) -> Result<Value, Error> {
            Ok(value.clone())
        }
    }

    struct StrictSchema;

    impl Schema for StrictSchema {
        fn validate(&self, value: &Value) -> Result<Value, Error> {
            if value.is_null() {
                Err(Error::Validation("value required".into()))
            } else {
                Ok(value.clone())
            }
        }
    }

    #[test]
    fn test_allows_missing_probe() {
        assert!(NullSchema.allows_missing());
        assert!(!StrictSchema.allows_missing());
    }

    #[test]
    fn test_wants_upgrade() {
        let plain = HttpRequest::new("GET", "/");
        assert!(!wants_upgrade(&plain));

        let ws = HttpRequest::new("GET", "/").with_header("Upgrade", "websocket");
        assert!(wants_upgrade(&ws));

        let other = HttpRequest::new("GET", "/").with_header("Upgrade", "h2c");
        assert!(!wants_upgrade(&other));
    }
}
