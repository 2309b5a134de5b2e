//! Lifecycle hooks for services and controllers.
//!
//! Hooks are opt-in: a provider that wants them attaches the hook objects to
//! its [`Provided`](crate::container::Provided) record. The tree build
//! collects them in creation order, which by construction is dependency
//! order; shutdown runs the same list in reverse.

use crate::error::Error;
use async_trait::async_trait;
use gantry_log::Logger;
use std::sync::Arc;

/// Called once for every service after the whole module tree is built.
#[async_trait]
pub trait OnModuleInit: Send + Sync {
    async fn on_module_init(&self) -> Result<(), Error>;
}

/// Called after every init hook has completed, before the server accepts
/// traffic.
#[async_trait]
pub trait OnApplicationBootstrap: Send + Sync {
    async fn on_application_bootstrap(&self) -> Result<(), Error>;
}

/// Called on shutdown with the signal that triggered it, if any.
#[async_trait]
pub trait OnApplicationShutdown: Send + Sync {
    async fn on_application_shutdown(&self, signal: Option<&str>) -> Result<(), Error>;
}

/// Hook registrations collected during a module tree build, in creation
/// order. Each entry carries the owning service's display name for logs.
#[derive(Default)]
pub struct ServiceHooks {
    pub init: Vec<(String, Arc<dyn OnModuleInit>)>,
    pub bootstrap: Vec<(String, Arc<dyn OnApplicationBootstrap>)>,
    pub shutdown: Vec<(String, Arc<dyn OnApplicationShutdown>)>,
}

impl std::fmt::Debug for ServiceHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHooks")
            .field("init", &self.init.len())
            .field("bootstrap", &self.bootstrap.len())
            .field("shutdown", &self.shutdown.len())
            .finish()
    }
}

impl ServiceHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append another collection, preserving its internal order.
    pub fn extend(&mut self, other: ServiceHooks) {
        self.init.extend(other.init);
        self.bootstrap.extend(other.bootstrap);
        self.shutdown.extend(other.shutdown);
    }
}

/// Runs the collected hooks in the documented phase order.
pub struct LifecycleManager {
    hooks: ServiceHooks,
    logger: Logger,
}

impl LifecycleManager {
    pub fn new(hooks: ServiceHooks, logger: Logger) -> Self {
        Self { hooks, logger }
    }

    /// Run every `on_module_init` hook sequentially, in creation order.
    ///
    /// All hooks run even when earlier ones fail; failures are collected and
    /// returned together so startup can abort with the full picture.
    pub async fn run_init(&self) -> Result<(), Error> {
        let mut failures = Vec::new();
        for (name, hook) in &self.hooks.init {
            self.logger.debug(&format!("init: {}", name));
            if let Err(err) = hook.on_module_init().await {
                self.logger.error(&format!("init hook failed for {}: {}", name, err));
                failures.push(format!("{}: {}", name, err));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Internal(format!(
                "{} init hook(s) failed: {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    /// Run every `on_application_bootstrap` hook sequentially.
    pub async fn run_bootstrap(&self) -> Result<(), Error> {
        let mut failures = Vec::new();
        for (name, hook) in &self.hooks.bootstrap {
            self.logger.debug(&format!("bootstrap: {}", name));
            if let Err(err) = hook.on_application_bootstrap().await {
                self.logger
                    .error(&format!("bootstrap hook failed for {}: {}", name, err));
                failures.push(format!("{}: {}", name, err));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Internal(format!(
                "{} bootstrap hook(s) failed: {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    /// Run every `on_application_shutdown` hook in reverse creation order.
    ///
    /// Shutdown is best-effort: failures are logged, never propagated, so one
    /// bad hook cannot block the rest from releasing their resources.
    pub async fn run_shutdown(&self, signal: Option<&str>) {
        for (name, hook) in self.hooks.shutdown.iter().rev() {
            self.logger.debug(&format!("shutdown: {}", name));
            if let Err(err) = hook.on_application_shutdown(signal).await {
                self.logger
                    .warn(&format!("shutdown hook failed for {}: {}", name, err));
            }
        }
    }

    pub fn init_count(&self) -> usize {
        self.hooks.init.len()
    }
}
