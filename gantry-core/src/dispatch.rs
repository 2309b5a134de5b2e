//! Request dispatch: normalization, lookup, middleware, binding, invocation,
//! and response shaping.
//!
//! The dispatcher never panics a connection: handler errors become the JSON
//! error envelope, unmatched paths a plain-text 404, and collaborator
//! callbacks (metrics, tracing) are unwind-guarded so a misbehaving sink
//! cannot take a request down with it.

use crate::collaborators::{
    wants_upgrade, HttpSample, HttpSpan, MetricsSink, TraceSink, UpgradeDelegate,
};
use crate::error::Error;
use crate::http::{error_envelope, is_enveloped, success_envelope, HttpRequest, HttpResponse};
use crate::middleware::MiddlewareChain;
use crate::registry::{HandlerArg, HandlerArgs, HandlerOutput, ParamKind};
use crate::routing::{normalize_path, RouteDescriptor, RouteTable};
use gantry_log::Logger;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Dispatches requests against a built route table.
pub struct Dispatcher {
    table: Arc<RouteTable>,
    logger: Logger,
    metrics: Option<Arc<dyn MetricsSink>>,
    trace: Option<Arc<dyn TraceSink>>,
    upgrade: Option<Arc<dyn UpgradeDelegate>>,
}

impl Dispatcher {
    pub fn new(table: Arc<RouteTable>, logger: Logger) -> Self {
        Self {
            table,
            logger,
            metrics: None,
            trace: None,
            upgrade: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_trace(mut self, trace: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_upgrade(mut self, upgrade: Arc<dyn UpgradeDelegate>) -> Self {
        self.upgrade = Some(upgrade);
        self
    }

    pub fn route_count(&self) -> usize {
        self.table.len()
    }

    /// Handle one request end to end. Always returns a response.
    pub async fn dispatch(&self, req: HttpRequest) -> HttpResponse {
        let started = Instant::now();

        // Split the query string off and canonicalize the path before lookup.
        let mut req = req;
        let (path, query) = match req.path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (req.path.clone(), None),
        };
        req.path = normalize_path(&path);
        if let Some(query) = &query {
            req.query_params = crate::http::parse_query_string(query);
        }

        if wants_upgrade(&req) {
            if let Some(delegate) = &self.upgrade {
                return match delegate.handle_upgrade(req).await {
                    Ok(resp) => resp,
                    Err(err) => self.error_response(err),
                };
            }
        }

        let (route, path_params) = match self.table.find(&req.method, &req.path) {
            Some(found) => found,
            None => {
                self.logger
                    .debug(&format!("no route for {} {}", req.method, req.path));
                let span = self.start_span(&req, &req.path);
                let resp = HttpResponse::not_found()
                    .with_text(format!("Cannot {} {}", req.method, req.path));
                self.record_sample(&req.method, &req.path, 404, started, "unknown", "");
                self.end_span(span, 404);
                return resp;
            }
        };
        req.path_params = path_params;

        let span = self.start_span(&req, &route.path);

        let chain = MiddlewareChain::from_arcs(route.middleware.clone());
        let handler_route = route.clone();
        let handler: crate::middleware::HandlerFn = Arc::new(move |req| {
            let route = handler_route.clone();
            Box::pin(async move { invoke_route(route, req).await })
        });

        let method = req.method.clone();
        let response = match chain.apply(req, handler).await {
            Ok(resp) => resp,
            Err(err) => self.error_response(err),
        };

        self.record_sample(
            &method,
            &route.path,
            response.status,
            started,
            route.controller,
            route.handler_name,
        );
        self.end_span(span, response.status);

        response
    }

    /// Convert a dispatch error into a client response.
    ///
    /// Standardized application errors keep HTTP 200 and carry their code in
    /// the envelope; everything else is a 500 with a 500 envelope code.
    fn error_response(&self, err: Error) -> HttpResponse {
        match &err {
            Error::App { code, message } => {
                json_response(200, error_envelope(*code, message))
            }
            Error::RouteNotFound(path) => {
                HttpResponse::not_found().with_text(format!("Cannot find {}", path))
            }
            other => {
                self.logger.error(&format!("request failed: {}", other));
                json_response(
                    other.status_code(),
                    error_envelope(other.envelope_code(), &other.to_string()),
                )
            }
        }
    }

    fn record_sample(
        &self,
        method: &str,
        route: &str,
        status: u16,
        started: Instant,
        controller: &str,
        handler: &str,
    ) {
        let Some(metrics) = &self.metrics else { return };
        let sample = HttpSample {
            method: method.to_string(),
            route: route.to_string(),
            status_code: status,
            duration_ms: started.elapsed().as_millis(),
            controller: controller.to_string(),
            handler: handler.to_string(),
        };
        let metrics = metrics.clone();
        if catch_unwind(AssertUnwindSafe(|| metrics.record_http_request(&sample))).is_err() {
            self.logger.warn("metrics sink panicked recording a sample");
        }
    }

    fn start_span(&self, req: &HttpRequest, route_label: &str) -> Option<HttpSpan> {
        let trace = self.trace.as_ref()?;
        let trace = trace.clone();
        let result = catch_unwind(AssertUnwindSafe(|| {
            let context = trace
                .extract_from_headers(&req.headers)
                .unwrap_or_else(|| trace.generate_context());
            trace.start_http_trace(&context, &req.method, route_label)
        }));
        match result {
            Ok(span) => Some(span),
            Err(_) => {
                self.logger.warn("trace sink panicked starting a span");
                None
            }
        }
    }

    fn end_span(&self, span: Option<HttpSpan>, status: u16) {
        let (Some(trace), Some(span)) = (self.trace.as_ref(), span) else {
            return;
        };
        let trace = trace.clone();
        if catch_unwind(AssertUnwindSafe(|| trace.end_http_trace(span, status))).is_err() {
            self.logger.warn("trace sink panicked ending a span");
        }
    }
}

/// Bind parameters, invoke the handler, and shape its output.
async fn invoke_route(
    route: Arc<RouteDescriptor>,
    req: HttpRequest,
) -> Result<HttpResponse, Error> {
    let arg_count = route
        .params
        .iter()
        .map(|p| p.arg_index + 1)
        .max()
        .unwrap_or(0);
    let mut args = vec![HandlerArg::Missing; arg_count];

    for binding in &route.params {
        let raw: Option<Value> = match binding.kind {
            ParamKind::Request => {
                args[binding.arg_index] = HandlerArg::Request(req.clone());
                continue;
            }
            ParamKind::Response => {
                args[binding.arg_index] = HandlerArg::Response(HttpResponse::ok());
                continue;
            }
            ParamKind::Path => req
                .path_params
                .get(&binding.name)
                .map(|s| Value::String(s.clone())),
            ParamKind::Query => req.query_params.get(&binding.name).map(|q| q.to_json()),
            ParamKind::Header => req
                .header(&binding.name)
                .map(|v| Value::String(v.to_string())),
            // An unparseable body binds as absent, never as an error.
            ParamKind::Body => {
                if req.body.is_empty() {
                    None
                } else {
                    serde_json::from_slice(&req.body).ok()
                }
            }
        };

        let value = match raw {
            Some(value) => value,
            None => {
                if binding.is_required() {
                    return Err(Error::Validation(format!(
                        "missing required {:?} parameter '{}'",
                        binding.kind, binding.name
                    )));
                }
                continue;
            }
        };

        let value = match &binding.schema {
            Some(schema) => schema
                .validate(&value)
                .map_err(|e| Error::Validation(format!("parameter '{}': {}", binding.name, e)))?,
            None => value,
        };
        args[binding.arg_index] = HandlerArg::Value(value);
    }

    let output = (route.handler)(route.instance.clone(), HandlerArgs::new(args)).await?;
    shape_output(&route, output)
}

/// Turn handler output into the final response, applying response schemas
/// and the success envelope.
fn shape_output(route: &RouteDescriptor, output: HandlerOutput) -> Result<HttpResponse, Error> {
    match output {
        HandlerOutput::Response(resp) => Ok(revalidate_response(route, resp)),
        HandlerOutput::Value(value) => {
            // Prefer the 200 schema; a lone schema under another status sets
            // both the status and the validator.
            let picked = if let Some(schema) = route.response_schemas.get(&200) {
                Some((200, schema))
            } else if route.response_schemas.len() == 1 {
                route
                    .response_schemas
                    .iter()
                    .next()
                    .map(|(status, schema)| (*status, schema))
            } else {
                None
            };
            let (status, schema) = match picked {
                Some((status, schema)) => (status, Some(schema)),
                None => (200, None),
            };

            let value = match schema {
                Some(schema) => schema.validate(&value).map_err(|e| {
                    Error::Validation(format!("response failed validation: {}", e))
                })?,
                None => value,
            };

            let body = if is_enveloped(&value) {
                value
            } else {
                success_envelope(value)
            };
            Ok(json_response(status, body))
        }
    }
}

/// Re-validate a handler-built JSON response against the matching response
/// schema. Validation here is advisory: a non-conforming body passes through
/// unchanged, while a conforming one is replaced with its normalized form.
fn revalidate_response(route: &RouteDescriptor, resp: HttpResponse) -> HttpResponse {
    if !resp.is_json() || route.response_schemas.is_empty() {
        return resp;
    }
    let schema = match route
        .response_schemas
        .get(&resp.status)
        .or_else(|| route.response_schemas.get(&200))
    {
        Some(schema) => schema,
        None => return resp,
    };
    let value: Value = match serde_json::from_slice(&resp.body) {
        Ok(value) => value,
        Err(_) => return resp,
    };
    match schema.validate(&value) {
        Ok(normalized) => match serde_json::to_vec(&normalized) {
            Ok(body) => {
                let mut resp = resp;
                resp.body = body;
                resp
            }
            Err(_) => resp,
        },
        Err(_) => resp,
    }
}

fn json_response(status: u16, body: Value) -> HttpResponse {
    match HttpResponse::new(status).with_json(&body) {
        Ok(resp) => resp,
        // serde_json::Value serialization does not fail in practice
        Err(_) => HttpResponse::internal_server_error(),
    }
}
