//! Onion-model middleware.
//!
//! Middleware wrap route handlers: each one receives the request and a `next`
//! continuation, and may run code before and after awaiting it, rewrite the
//! request, or short-circuit with its own response.

use crate::{Error, HttpRequest, HttpResponse};
use async_trait::async_trait;
use gantry_log::{debug, trace};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Continuation to the next middleware, or to the route handler at the end
/// of the chain.
pub type Next = Box<
    dyn FnOnce(HttpRequest) -> Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send>>
        + Send,
>;

/// Terminal handler invoked once the chain is exhausted.
pub type HandlerFn = Arc<
    dyn Fn(HttpRequest) -> Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send>>
        + Send
        + Sync,
>;

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error>;
}

/// Executes an ordered middleware list around a terminal handler.
///
/// Registration order is execution order on the way in, and the reverse on
/// the way out.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Arc<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a chain from already-constructed middleware.
    pub fn from_arcs(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            middlewares: Arc::new(middlewares),
        }
    }

    /// Append a middleware to the chain.
    pub fn use_middleware<M: Middleware + 'static>(&mut self, middleware: M) {
        let mut mws = (*self.middlewares).clone();
        mws.push(Arc::new(middleware));
        self.middlewares = Arc::new(mws);
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run the chain, ending at `handler`.
    pub async fn apply(&self, req: HttpRequest, handler: HandlerFn) -> Result<HttpResponse, Error> {
        debug!(
            "executing middleware chain ({} middleware) for {} {}",
            self.middlewares.len(),
            req.method,
            req.path
        );
        self.execute_from(0, req, handler).await
    }

    fn execute_from(
        &self,
        index: usize,
        req: HttpRequest,
        handler: HandlerFn,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send>> {
        if index >= self.middlewares.len() {
            trace!("middleware chain complete, calling handler");
            handler(req)
        } else {
            let middleware = self.middlewares[index].clone();
            let chain = self.clone();
            let handler_clone = handler.clone();

            Box::pin(async move {
                middleware
                    .handle(
                        req,
                        Box::new(move |req| chain.execute_from(index + 1, req, handler_clone)),
                    )
                    .await
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Tagger {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Tagger {
        async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
            self.log.lock().unwrap().push(format!("{}:in", self.name));
            let resp = next(req).await?;
            self.log.lock().unwrap().push(format!("{}:out", self.name));
            Ok(resp)
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Middleware for ShortCircuit {
        async fn handle(&self, _req: HttpRequest, _next: Next) -> Result<HttpResponse, Error> {
            Ok(HttpResponse::ok().with_text("blocked"))
        }
    }

    fn terminal(log: Arc<Mutex<Vec<String>>>) -> HandlerFn {
        Arc::new(move |_req| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().unwrap().push("handler".into());
                Ok(HttpResponse::ok())
            })
        })
    }

    #[tokio::test]
    async fn test_onion_ordering() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::from_arcs(vec![
            Arc::new(Tagger {
                name: "a",
                log: log.clone(),
            }),
            Arc::new(Tagger {
                name: "b",
                log: log.clone(),
            }),
        ]);

        let req = HttpRequest::new("GET", "/x");
        chain.apply(req, terminal(log.clone())).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:in", "b:in", "handler", "b:out", "a:out"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::from_arcs(vec![
            Arc::new(Tagger {
                name: "a",
                log: log.clone(),
            }),
            Arc::new(ShortCircuit),
        ]);

        let req = HttpRequest::new("GET", "/x");
        let resp = chain.apply(req, terminal(log.clone())).await.unwrap();

        assert_eq!(resp.body_text(), "blocked");
        assert_eq!(*log.lock().unwrap(), vec!["a:in", "a:out"]);
    }

    #[tokio::test]
    async fn test_empty_chain_calls_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new();
        let req = HttpRequest::new("GET", "/x");
        chain.apply(req, terminal(log.clone())).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["handler"]);
    }
}
