//! Controller and middleware construction.
//!
//! Runs after a module's service scope is fully built. Controllers and
//! middleware resolve their dependencies from that scope through the same
//! [`ResolveScope`] the providers used; a failed factory is logged and
//! skipped rather than aborting the whole application.

use crate::container::{collect_hooks, Container, InitContext, ResolveScope};
use crate::lifecycle::ServiceHooks;
use crate::middleware::Middleware;
use crate::registry::{ControllerSpec, ModuleDefinition};
use std::any::Any;
use std::sync::Arc;

/// A constructed controller paired with its registration record.
#[derive(Clone)]
pub struct BuiltController {
    pub spec: ControllerSpec,
    pub instance: Arc<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for BuiltController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltController")
            .field("name", &self.spec.name)
            .field("base_path", &self.spec.base_path)
            .finish()
    }
}

/// Construct every controller of `def` against the module's service scope.
pub fn build_controllers(
    def: &ModuleDefinition,
    services: &Container,
    ctx: &InitContext,
    hooks: &mut ServiceHooks,
) -> Vec<BuiltController> {
    let mut built = Vec::with_capacity(def.controllers.len());
    for spec in &def.controllers {
        for dep in spec.deps.tags() {
            if !services.contains(&dep) {
                ctx.logger.warn(&format!(
                    "controller {} depends on {} which is not in scope",
                    spec.name, dep
                ));
            }
        }
        match (spec.factory)(&ResolveScope::new(services), &ctx.scoped(spec.name)) {
            Ok(provided) => {
                collect_hooks(hooks, spec.name, &provided);
                built.push(BuiltController {
                    spec: spec.clone(),
                    instance: provided.instance,
                });
            }
            Err(err) => {
                ctx.logger
                    .warn(&format!("failed to construct controller {}: {}", spec.name, err));
            }
        }
    }
    built
}

/// Construct every middleware of `def` against the module's service scope,
/// preserving registration order.
pub fn build_middleware(
    def: &ModuleDefinition,
    services: &Container,
    ctx: &InitContext,
) -> Vec<Arc<dyn Middleware>> {
    let mut built = Vec::with_capacity(def.middleware.len());
    for spec in &def.middleware {
        for dep in spec.deps.tags() {
            if !services.contains(&dep) {
                ctx.logger.warn(&format!(
                    "middleware {} depends on {} which is not in scope",
                    spec.name, dep
                ));
            }
        }
        match (spec.factory)(&ResolveScope::new(services), &ctx.scoped(spec.name)) {
            Ok(middleware) => built.push(middleware),
            Err(err) => {
                ctx.logger
                    .warn(&format!("failed to construct middleware {}: {}", spec.name, err));
            }
        }
    }
    built
}
