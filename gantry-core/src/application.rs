//! Application assembly and the HTTP server loop.

use crate::collaborators::{MetricsSink, TraceSink, UpgradeDelegate};
use crate::container::{AppConfig, InitContext};
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::lifecycle::LifecycleManager;
use crate::module::ModuleTree;
use crate::registry::ModuleDefinition;
use crate::routing::{normalize_path, RouteTable};
use crate::{HttpRequest, HttpResponse};
use gantry_log::Logger;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming as IncomingBody, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Builder for [`Application`].
pub struct ApplicationBuilder {
    root: Arc<ModuleDefinition>,
    prefix: String,
    config: AppConfig,
    metrics: Option<Arc<dyn MetricsSink>>,
    trace: Option<Arc<dyn TraceSink>>,
    upgrade: Option<Arc<dyn UpgradeDelegate>>,
}

impl ApplicationBuilder {
    /// Prefix every registered route, e.g. `/api`.
    pub fn global_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = normalize_path(&prefix.into());
        self
    }

    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn tracing(mut self, trace: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn websocket(mut self, upgrade: Arc<dyn UpgradeDelegate>) -> Self {
        self.upgrade = Some(upgrade);
        self
    }

    /// Build the module tree and route table. Fails on missing module
    /// metadata and on dependency cycles.
    pub fn build(self) -> Result<Application, Error> {
        let logger = Logger::root();
        let ctx = InitContext::new(logger.clone(), Arc::new(self.config));

        let tree = ModuleTree::build(&self.root, &ctx)?;
        logger.info(&format!(
            "module tree built: {} controller(s)",
            tree.controller_count()
        ));

        let prefix = if self.prefix == "/" { String::new() } else { self.prefix };
        let table = Arc::new(RouteTable::build(&tree, &prefix, &logger)?);
        for route in table.routes() {
            logger.debug(&format!(
                "mapped {} {} -> {}::{}",
                route.method, route.path, route.controller, route.handler_name
            ));
        }
        logger.info(&format!("{} route(s) mapped", table.len()));

        let mut dispatcher = Dispatcher::new(table, logger.child("dispatch"));
        if let Some(metrics) = self.metrics {
            dispatcher = dispatcher.with_metrics(metrics);
        }
        if let Some(trace) = self.trace {
            dispatcher = dispatcher.with_trace(trace);
        }
        if let Some(upgrade) = self.upgrade {
            dispatcher = dispatcher.with_upgrade(upgrade);
        }

        let lifecycle = LifecycleManager::new(tree.hooks, logger.child("lifecycle"));

        Ok(Application {
            dispatcher: Arc::new(dispatcher),
            lifecycle,
            logger,
        })
    }
}

/// A built application: module tree constructed, routes mapped, lifecycle
/// hooks pending.
pub struct Application {
    dispatcher: Arc<Dispatcher>,
    lifecycle: LifecycleManager,
    logger: Logger,
}

impl Application {
    pub fn builder(root: Arc<ModuleDefinition>) -> ApplicationBuilder {
        ApplicationBuilder {
            root,
            prefix: String::new(),
            config: AppConfig::new(),
            metrics: None,
            trace: None,
            upgrade: None,
        }
    }

    /// Run init then bootstrap hooks. Must complete before serving traffic;
    /// a failure aborts startup.
    pub async fn init(&self) -> Result<(), Error> {
        self.lifecycle.run_init().await?;
        self.lifecycle.run_bootstrap().await?;
        Ok(())
    }

    /// Run shutdown hooks in reverse creation order. Never fails.
    pub async fn shutdown(&self, signal: Option<&str>) {
        self.logger.info("shutting down");
        self.lifecycle.run_shutdown(signal).await;
    }

    /// Dispatch a request directly, without a socket. The primary entry
    /// point for tests and embedding.
    pub async fn handle(&self, req: HttpRequest) -> HttpResponse {
        self.dispatcher.dispatch(req).await
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn route_count(&self) -> usize {
        self.dispatcher.route_count()
    }

    /// Run lifecycle startup and serve HTTP/1.1 on `port` until the process
    /// is killed.
    pub async fn listen(self, port: u16) -> Result<(), Error> {
        self.init().await?;

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;
        self.logger.info(&format!("listening on http://{}", addr));

        let dispatcher = self.dispatcher.clone();
        let logger = self.logger.clone();

        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let dispatcher = dispatcher.clone();
            let logger = logger.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<IncomingBody>| {
                    let dispatcher = dispatcher.clone();
                    async move { handle_request(req, dispatcher).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    logger.debug(&format!("connection error: {:?}", err));
                }
            });
        }
    }
}

/// Convert a hyper request, dispatch it, and convert the response back.
async fn handle_request(
    req: Request<IncomingBody>,
    dispatcher: Arc<Dispatcher>,
) -> Result<Response<Full<bytes::Bytes>>, hyper::Error> {
    let method = req.method().to_string();
    // Keep the query string; the dispatcher splits and parses it.
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let mut request = HttpRequest::new(method, path);
    for (key, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            request
                .headers
                .insert(key.as_str().to_ascii_lowercase(), value.to_string());
        }
    }

    let body_bytes = req.collect().await?.to_bytes();
    request.body = body_bytes.to_vec();

    let response = dispatcher.dispatch(request).await;

    let mut builder = Response::builder().status(response.status);
    for (key, value) in response.headers {
        builder = builder.header(key, value);
    }
    let body = Full::new(bytes::Bytes::from(response.body));
    Ok(builder
        .body(body)
        .unwrap_or_else(|_| Response::new(Full::new(bytes::Bytes::new()))))
}
