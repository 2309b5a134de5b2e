//! Service container and the work-queue resolution algorithm.
//!
//! A [`Container`] is a flat map from [`ServiceTag`] to a type-erased
//! singleton. [`build_services`] constructs one module's providers against an
//! imported scope: providers whose intra-module dependencies are not yet
//! constructed are pushed to the back of the queue and retried, so
//! declaration order never matters. A full rotation that constructs nothing
//! is a genuine cycle, reported with a readable trace.

use crate::error::Error;
use crate::lifecycle::{
    OnApplicationBootstrap, OnApplicationShutdown, OnModuleInit, ServiceHooks,
};
use crate::registry::{ModuleDefinition, ProviderSpec, ServiceTag};
use gantry_log::Logger;
use serde_json::Value;
use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

// ========== Application configuration ==========

/// Free-form application configuration passed to every factory.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    values: HashMap<String, Value>,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.as_u64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }
}

/// Construction context handed to every provider, controller, and middleware
/// factory. Carries the scoped logger and the application configuration, so
/// factories never reach for ambient globals.
#[derive(Clone)]
pub struct InitContext {
    pub logger: Logger,
    pub config: Arc<AppConfig>,
}

impl InitContext {
    pub fn new(logger: Logger, config: Arc<AppConfig>) -> Self {
        Self { logger, config }
    }

    /// Derive a context whose logger is scoped to `component`.
    pub fn scoped(&self, component: &str) -> Self {
        Self {
            logger: self.logger.child(component),
            config: self.config.clone(),
        }
    }
}

// ========== Factory output ==========

/// What a factory hands back: the instance plus any lifecycle hooks it
/// participates in. Hooks are usually a second `Arc` clone of the instance.
pub struct Provided {
    pub instance: Arc<dyn Any + Send + Sync>,
    pub init: Option<Arc<dyn OnModuleInit>>,
    pub bootstrap: Option<Arc<dyn OnApplicationBootstrap>>,
    pub shutdown: Option<Arc<dyn OnApplicationShutdown>>,
}

impl Provided {
    pub fn new<T: Send + Sync + 'static>(instance: Arc<T>) -> Self {
        Self {
            instance,
            init: None,
            bootstrap: None,
            shutdown: None,
        }
    }

    pub fn on_init(mut self, hook: Arc<dyn OnModuleInit>) -> Self {
        self.init = Some(hook);
        self
    }

    pub fn on_bootstrap(mut self, hook: Arc<dyn OnApplicationBootstrap>) -> Self {
        self.bootstrap = Some(hook);
        self
    }

    pub fn on_shutdown(mut self, hook: Arc<dyn OnApplicationShutdown>) -> Self {
        self.shutdown = Some(hook);
        self
    }
}

// ========== Container ==========

/// Flat map of constructed singletons keyed by [`ServiceTag`].
///
/// Cloning a container clones the map but shares every instance, so a module
/// scope seeded from imports sees the same singletons as the exporter.
#[derive(Clone, Default)]
pub struct Container {
    services: HashMap<ServiceTag, Arc<dyn Any + Send + Sync>>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance under its type tag.
    pub fn register<T: Send + Sync + 'static>(&mut self, instance: Arc<T>) {
        self.services.insert(ServiceTag::of::<T>(), instance);
    }

    /// Register a type-erased instance under an explicit tag.
    pub fn register_raw(&mut self, tag: ServiceTag, instance: Arc<dyn Any + Send + Sync>) {
        self.services.insert(tag, instance);
    }

    /// Look up by type, downcasting to the concrete type.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services
            .get(&ServiceTag::of::<T>())
            .and_then(|any| any.clone().downcast::<T>().ok())
    }

    /// Look up a labeled registration, downcasting to the concrete type.
    pub fn get_tagged<T: Send + Sync + 'static>(&self, tag: ServiceTag) -> Option<Arc<T>> {
        self.services
            .get(&tag)
            .and_then(|any| any.clone().downcast::<T>().ok())
    }

    /// Type-erased lookup.
    pub fn raw(&self, tag: &ServiceTag) -> Option<Arc<dyn Any + Send + Sync>> {
        self.services.get(tag).cloned()
    }

    /// Like [`get`](Self::get) but an absent service is an error.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, Error> {
        self.get::<T>()
            .ok_or_else(|| Error::ProviderNotFound(ServiceTag::of::<T>().name().to_string()))
    }

    pub fn contains(&self, tag: &ServiceTag) -> bool {
        self.services.contains_key(tag)
    }

    /// Copy every registration from `other` into this container.
    pub fn merge_from(&mut self, other: &Container) {
        for (tag, instance) in &other.services {
            self.services.insert(*tag, instance.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("services", &self.services.len())
            .finish()
    }
}

/// Read-only view of a container handed to factories during resolution.
pub struct ResolveScope<'a> {
    container: &'a Container,
}

impl<'a> ResolveScope<'a> {
    pub fn new(container: &'a Container) -> Self {
        Self { container }
    }

    /// The dependency, if constructed. Factories decide how to handle `None`;
    /// the resolver has already logged a warning for any unresolvable tag.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.container.get::<T>()
    }

    pub fn get_tagged<T: Send + Sync + 'static>(&self, tag: ServiceTag) -> Option<Arc<T>> {
        self.container.get_tagged::<T>(tag)
    }

    pub fn raw(&self, tag: &ServiceTag) -> Option<Arc<dyn Any + Send + Sync>> {
        self.container.raw(tag)
    }

    /// Like [`get`](Self::get) but an absent dependency is an error, failing
    /// the owning factory.
    pub fn require<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, Error> {
        self.container.resolve::<T>()
    }
}

// ========== Work-queue resolution ==========

/// Construct all providers of `def` against `imported`, returning the
/// module's full service scope (imports plus own providers) and the
/// lifecycle hooks collected in creation order.
///
/// A provider is deferred when one of its dependencies is provided by this
/// same module but not constructed yet. A full rotation of the queue with no
/// successful construction means every remaining provider waits on another
/// remaining provider, which is a dependency cycle; deep acyclic chains
/// rotate as often as they need to.
pub fn build_services(
    def: &ModuleDefinition,
    imported: &Container,
    ctx: &InitContext,
) -> Result<(Container, ServiceHooks), Error> {
    let mut scope = imported.clone();
    let mut hooks = ServiceHooks::new();

    let own_tags: HashSet<ServiceTag> = def.providers.iter().map(|p| p.tag).collect();
    let mut queue: VecDeque<&ProviderSpec> = def.providers.iter().collect();

    // Deferrals since the last successful construction.
    let mut stalled = 0;

    while let Some(spec) = queue.pop_front() {
        // Defer if a sibling provider has not been constructed yet.
        let pending = spec
            .deps
            .tags()
            .find(|dep| own_tags.contains(dep) && !scope.contains(dep));
        if pending.is_some() {
            queue.push_back(spec);
            stalled += 1;
            if stalled >= queue.len() {
                return Err(Error::CircularDependency(cycle_trace(
                    &queue, &own_tags, &scope,
                )));
            }
            continue;
        }
        stalled = 0;

        // Not a cycle: the dependency simply is not registered anywhere in
        // this scope. The factory sees None and decides.
        for dep in spec.deps.tags() {
            if !scope.contains(&dep) {
                ctx.logger.warn(&format!(
                    "provider {} depends on {} which is not in scope",
                    spec.tag, dep
                ));
            }
        }

        let provided = (spec.factory)(&ResolveScope::new(&scope), &ctx.scoped(spec.tag.short_name()))?;
        collect_hooks(&mut hooks, spec.tag.short_name(), &provided);
        scope.register_raw(spec.tag, provided.instance);
        ctx.logger.trace(&format!("constructed {}", spec.tag));
    }

    Ok((scope, hooks))
}

pub(crate) fn collect_hooks(hooks: &mut ServiceHooks, name: &str, provided: &Provided) {
    if let Some(init) = &provided.init {
        hooks.init.push((name.to_string(), init.clone()));
    }
    if let Some(bootstrap) = &provided.bootstrap {
        hooks.bootstrap.push((name.to_string(), bootstrap.clone()));
    }
    if let Some(shutdown) = &provided.shutdown {
        hooks.shutdown.push((name.to_string(), shutdown.clone()));
    }
}

/// Walk the waits-on edges of the stuck providers from the head of the queue
/// until a tag repeats, e.g. `X -> Y -> X`.
///
/// Called only when a full rotation made no progress, so every queued
/// provider has a pending sibling dependency whose provider is also queued;
/// the walk is guaranteed to close a cycle.
fn cycle_trace(
    queue: &VecDeque<&ProviderSpec>,
    own_tags: &HashSet<ServiceTag>,
    scope: &Container,
) -> String {
    let waits: HashMap<ServiceTag, ServiceTag> = queue
        .iter()
        .filter_map(|spec| {
            spec.deps
                .tags()
                .find(|dep| own_tags.contains(dep) && !scope.contains(dep))
                .map(|dep| (spec.tag, dep))
        })
        .collect();

    let start = match queue.front() {
        Some(spec) => spec.tag,
        None => return "unknown cycle".to_string(),
    };

    let mut trace = vec![start];
    let mut seen: HashSet<ServiceTag> = HashSet::new();
    seen.insert(start);
    let mut current = start;

    while let Some(next) = waits.get(&current) {
        trace.push(*next);
        if !seen.insert(*next) {
            break;
        }
        current = *next;
    }

    trace
        .iter()
        .map(|t| t.short_name())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProviderSpec;

    struct Database {
        url: String,
    }

    struct Repo {
        db: Arc<Database>,
    }

    fn test_ctx() -> InitContext {
        InitContext::new(Logger::root(), Arc::new(AppConfig::new()))
    }

    #[test]
    fn test_register_and_resolve() {
        let mut container = Container::new();
        container.register(Arc::new(Database {
            url: "postgres://localhost".into(),
        }));

        let db = container.resolve::<Database>().unwrap();
        assert_eq!(db.url, "postgres://localhost");
        assert!(container.resolve::<Repo>().is_err());
    }

    #[test]
    fn test_clone_shares_instances() {
        let mut container = Container::new();
        container.register(Arc::new(Database { url: "x".into() }));
        let cloned = container.clone();

        let a = container.get::<Database>().unwrap();
        let b = cloned.get::<Database>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_tagged_registration() {
        let tag = ServiceTag::named("primary-db");
        let mut container = Container::new();
        container.register_raw(tag, Arc::new(Database { url: "p".into() }));

        let db = container.get_tagged::<Database>(tag).unwrap();
        assert_eq!(db.url, "p");
        // Labeled registration does not answer the type tag
        assert!(container.get::<Database>().is_none());
    }

    #[test]
    fn test_build_services_order_independent() {
        // Repo declared before its dependency; deferral sorts it out.
        let def = ModuleDefinition::builder("TestModule")
            .provider(
                ProviderSpec::new::<Repo>(|scope, _ctx| {
                    let db = scope.require::<Database>()?;
                    Ok(Provided::new(Arc::new(Repo { db })))
                })
                .depends_on(ServiceTag::of::<Database>()),
            )
            .provider(ProviderSpec::new::<Database>(|_scope, _ctx| {
                Ok(Provided::new(Arc::new(Database { url: "d".into() })))
            }))
            .build();

        let (scope, _hooks) = build_services(&def, &Container::new(), &test_ctx()).unwrap();
        let repo = scope.get::<Repo>().unwrap();
        let db = scope.get::<Database>().unwrap();
        assert!(Arc::ptr_eq(&repo.db, &db));
    }

    #[test]
    fn test_deep_chain_reverse_declaration_resolves() {
        struct A;
        struct B(#[allow(dead_code)] Arc<A>);
        struct C(#[allow(dead_code)] Arc<B>);
        struct D(#[allow(dead_code)] Arc<C>);

        // Worst-case declaration order: each rotation builds exactly one
        // provider, so resolution takes several full passes.
        let def = ModuleDefinition::builder("ChainModule")
            .provider(
                ProviderSpec::new::<D>(|scope, _| {
                    Ok(Provided::new(Arc::new(D(scope.require::<C>()?))))
                })
                .depends_on(ServiceTag::of::<C>()),
            )
            .provider(
                ProviderSpec::new::<C>(|scope, _| {
                    Ok(Provided::new(Arc::new(C(scope.require::<B>()?))))
                })
                .depends_on(ServiceTag::of::<B>()),
            )
            .provider(
                ProviderSpec::new::<B>(|scope, _| {
                    Ok(Provided::new(Arc::new(B(scope.require::<A>()?))))
                })
                .depends_on(ServiceTag::of::<A>()),
            )
            .provider(ProviderSpec::new::<A>(|_, _| Ok(Provided::new(Arc::new(A)))))
            .build();

        let (scope, _) = build_services(&def, &Container::new(), &test_ctx()).unwrap();
        assert!(scope.get::<D>().is_some());
        assert_eq!(scope.len(), 4);
    }

    #[test]
    fn test_cycle_detected_with_trace() {
        struct X;
        struct Y;

        let def = ModuleDefinition::builder("CycleModule")
            .provider(
                ProviderSpec::new::<X>(|_, _| Ok(Provided::new(Arc::new(X))))
                    .depends_on(ServiceTag::of::<Y>()),
            )
            .provider(
                ProviderSpec::new::<Y>(|_, _| Ok(Provided::new(Arc::new(Y))))
                    .depends_on(ServiceTag::of::<X>()),
            )
            .build();

        let err = build_services(&def, &Container::new(), &test_ctx()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("X"), "missing X in: {}", message);
        assert!(message.contains("Y"), "missing Y in: {}", message);
    }

    #[test]
    fn test_cycle_trace_closes_even_with_acyclic_tail() {
        struct Z;
        struct X;
        struct Y;

        // Z waits on the X<->Y cycle but is not part of it; the reported
        // trace must still end where it revisits a tag.
        let def = ModuleDefinition::builder("TailModule")
            .provider(
                ProviderSpec::new::<Z>(|_, _| Ok(Provided::new(Arc::new(Z))))
                    .depends_on(ServiceTag::of::<X>()),
            )
            .provider(
                ProviderSpec::new::<X>(|_, _| Ok(Provided::new(Arc::new(X))))
                    .depends_on(ServiceTag::of::<Y>()),
            )
            .provider(
                ProviderSpec::new::<Y>(|_, _| Ok(Provided::new(Arc::new(Y))))
                    .depends_on(ServiceTag::of::<X>()),
            )
            .build();

        let err = build_services(&def, &Container::new(), &test_ctx()).unwrap_err();
        let message = err.to_string();
        let names: Vec<&str> = message
            .rsplit(": ")
            .next()
            .unwrap()
            .split(" -> ")
            .collect();
        // The trace terminates on a repeated tag, never on a dead end
        let last = *names.last().unwrap();
        assert!(
            names[..names.len() - 1].contains(&last),
            "trace does not close: {}",
            message
        );
    }

    #[test]
    fn test_self_cycle() {
        struct Selfish;

        let def = ModuleDefinition::builder("SelfModule")
            .provider(
                ProviderSpec::new::<Selfish>(|_, _| Ok(Provided::new(Arc::new(Selfish))))
                    .depends_on(ServiceTag::of::<Selfish>()),
            )
            .build();

        let err = build_services(&def, &Container::new(), &test_ctx()).unwrap_err();
        assert!(matches!(err, Error::CircularDependency(_)));
    }

    #[test]
    fn test_missing_dependency_is_not_a_cycle() {
        struct Orphan {
            db: Option<Arc<Database>>,
        }

        // Database is not provided anywhere; the factory gets None.
        let def = ModuleDefinition::builder("OrphanModule")
            .provider(
                ProviderSpec::new::<Orphan>(|scope, _| {
                    Ok(Provided::new(Arc::new(Orphan {
                        db: scope.get::<Database>(),
                    })))
                })
                .depends_on(ServiceTag::of::<Database>()),
            )
            .build();

        let (scope, _) = build_services(&def, &Container::new(), &test_ctx()).unwrap();
        assert!(scope.get::<Orphan>().unwrap().db.is_none());
    }

    #[test]
    fn test_imported_scope_is_visible_and_shared() {
        let mut imported = Container::new();
        imported.register(Arc::new(Database { url: "i".into() }));

        let def = ModuleDefinition::builder("ImportingModule")
            .provider(
                ProviderSpec::new::<Repo>(|scope, _| {
                    let db = scope.require::<Database>()?;
                    Ok(Provided::new(Arc::new(Repo { db })))
                })
                .depends_on(ServiceTag::of::<Database>()),
            )
            .build();

        let (scope, _) = build_services(&def, &imported, &test_ctx()).unwrap();
        let repo = scope.get::<Repo>().unwrap();
        let original = imported.get::<Database>().unwrap();
        assert!(Arc::ptr_eq(&repo.db, &original));
    }
}
