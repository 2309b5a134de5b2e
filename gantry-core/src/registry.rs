//! Metadata registry: the declarative surface of the framework.
//!
//! Where a decorator-based framework records routes and dependencies as a
//! side effect of class definition, Gantry makes the registration explicit:
//! module authors build [`ModuleDefinition`], [`ProviderSpec`],
//! [`ControllerSpec`], and [`MiddlewareSpec`] values with the builder APIs in
//! this module. Definitions are immutable once built and shared via `Arc`.
//!
//! ```rust,ignore
//! let users_module = ModuleDefinition::builder("UsersModule")
//!     .provider(ProviderSpec::new::<UsersService>(|scope, ctx| {
//!         let repo = scope.get::<UsersRepo>();
//!         Ok(Provided::new(Arc::new(UsersService::new(repo, ctx.logger.clone()))))
//!     })
//!     .depends_on(ServiceTag::of::<UsersRepo>()))
//!     .controller(users_controller())
//!     .export(ServiceTag::of::<UsersService>())
//!     .build();
//! ```

use crate::collaborators::Schema;
use crate::container::{InitContext, Provided, ResolveScope};
use crate::middleware::Middleware;
use crate::{Error, HttpRequest, HttpResponse};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by route handlers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

// ========== Service identity ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TagKey {
    Type(TypeId),
    Label(&'static str),
}

/// Unique identity of a service: either a Rust type or an explicit label.
///
/// Tags are the container's map keys. Two `ServiceTag::of::<T>()` calls for
/// the same `T` are equal; labeled tags compare by label only.
#[derive(Debug, Clone, Copy)]
pub struct ServiceTag {
    key: TagKey,
    name: &'static str,
}

impl ServiceTag {
    /// Tag identified by a Rust type.
    pub fn of<T: 'static>() -> Self {
        Self {
            key: TagKey::Type(TypeId::of::<T>()),
            name: std::any::type_name::<T>(),
        }
    }

    /// Tag identified by an explicit label.
    pub fn named(label: &'static str) -> Self {
        Self {
            key: TagKey::Label(label),
            name: label,
        }
    }

    /// Display name for logs and error traces.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Short display name: the last path segment of a type name.
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl PartialEq for ServiceTag {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ServiceTag {}

impl Hash for ServiceTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl std::fmt::Display for ServiceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

// ========== Dependency lists ==========

/// Ordered, possibly sparse list of dependency tags per constructor slot.
///
/// Two sources feed it: a declared list (`push`, the bulk registration) and
/// per-slot overrides (`set`), with overrides taking precedence and allowed
/// to extend the list past its declared length.
#[derive(Debug, Clone, Default)]
pub struct DependencyList {
    slots: Vec<Option<ServiceTag>>,
}

impl DependencyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a declared dependency.
    pub fn push(&mut self, tag: ServiceTag) {
        self.slots.push(Some(tag));
    }

    /// Override the dependency at `index`, extending the list if needed.
    pub fn set(&mut self, index: usize, tag: ServiceTag) {
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        self.slots[index] = Some(tag);
    }

    /// Resolved tags, skipping empty slots.
    pub fn tags(&self) -> impl Iterator<Item = ServiceTag> + '_ {
        self.slots.iter().filter_map(|slot| *slot)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// ========== Provider registration ==========

/// Factory invoked to construct one service instance.
pub type ProviderFactory =
    Arc<dyn Fn(&ResolveScope<'_>, &InitContext) -> Result<Provided, Error> + Send + Sync>;

/// Registration record for one service provider.
#[derive(Clone)]
pub struct ProviderSpec {
    pub tag: ServiceTag,
    pub deps: DependencyList,
    pub factory: ProviderFactory,
}

impl ProviderSpec {
    /// Register a provider under its type tag.
    pub fn new<T: Send + Sync + 'static>(
        factory: impl Fn(&ResolveScope<'_>, &InitContext) -> Result<Provided, Error>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::tagged(ServiceTag::of::<T>(), factory)
    }

    /// Register a provider under an explicit tag.
    pub fn tagged(
        tag: ServiceTag,
        factory: impl Fn(&ResolveScope<'_>, &InitContext) -> Result<Provided, Error>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            tag,
            deps: DependencyList::new(),
            factory: Arc::new(factory),
        }
    }

    /// Declare a constructor dependency (in slot order).
    pub fn depends_on(mut self, tag: ServiceTag) -> Self {
        self.deps.push(tag);
        self
    }

    /// Explicitly override the dependency for one constructor slot.
    pub fn override_dependency(mut self, index: usize, tag: ServiceTag) -> Self {
        self.deps.set(index, tag);
        self
    }
}

impl std::fmt::Debug for ProviderSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSpec")
            .field("tag", &self.tag)
            .field("deps", &self.deps)
            .finish()
    }
}

// ========== HTTP methods ==========

/// HTTP methods
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    GET,
    POST,
    PUT,
    DELETE,
    PATCH,
    HEAD,
    OPTIONS,
}

impl HttpMethod {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Some(HttpMethod::GET),
            "POST" => Some(HttpMethod::POST),
            "PUT" => Some(HttpMethod::PUT),
            "DELETE" => Some(HttpMethod::DELETE),
            "PATCH" => Some(HttpMethod::PATCH),
            "HEAD" => Some(HttpMethod::HEAD),
            "OPTIONS" => Some(HttpMethod::OPTIONS),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::DELETE => "DELETE",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::HEAD => "HEAD",
            HttpMethod::OPTIONS => "OPTIONS",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ========== Parameter bindings ==========

/// Where a handler argument comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Path,
    Query,
    Body,
    Header,
    Request,
    Response,
}

/// Binding of one handler argument slot to a request source.
#[derive(Clone)]
pub struct ParamBinding {
    pub kind: ParamKind,
    pub name: String,
    pub arg_index: usize,
    /// Explicit required-ness override; `None` means "use the kind default".
    pub required: Option<bool>,
    pub schema: Option<Arc<dyn Schema>>,
}

impl ParamBinding {
    fn bind(kind: ParamKind, name: impl Into<String>, arg_index: usize) -> Self {
        Self {
            kind,
            name: name.into(),
            arg_index,
            required: None,
            schema: None,
        }
    }

    pub fn path(name: impl Into<String>, arg_index: usize) -> Self {
        Self::bind(ParamKind::Path, name, arg_index)
    }

    pub fn query(name: impl Into<String>, arg_index: usize) -> Self {
        Self::bind(ParamKind::Query, name, arg_index)
    }

    pub fn body(arg_index: usize) -> Self {
        Self::bind(ParamKind::Body, "body", arg_index)
    }

    pub fn header(name: impl Into<String>, arg_index: usize) -> Self {
        Self::bind(ParamKind::Header, name, arg_index)
    }

    pub fn request(arg_index: usize) -> Self {
        Self::bind(ParamKind::Request, "request", arg_index)
    }

    pub fn response(arg_index: usize) -> Self {
        Self::bind(ParamKind::Response, "response", arg_index)
    }

    /// Override the default required-ness.
    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    /// Attach a validation schema; the bound argument is replaced by the
    /// schema's normalized output.
    pub fn with_schema(mut self, schema: Arc<dyn Schema>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Effective required-ness.
    ///
    /// PATH is always required. BODY defaults to required unless its schema
    /// accepts the missing case. QUERY and HEADER default to optional.
    /// REQUEST and RESPONSE are synthesized, never missing.
    pub fn is_required(&self) -> bool {
        match self.kind {
            ParamKind::Path => true,
            ParamKind::Body => self.required.unwrap_or_else(|| {
                self.schema
                    .as_ref()
                    .map(|s| !s.allows_missing())
                    .unwrap_or(true)
            }),
            ParamKind::Query | ParamKind::Header => self.required.unwrap_or(false),
            ParamKind::Request | ParamKind::Response => false,
        }
    }
}

impl std::fmt::Debug for ParamBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamBinding")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("arg_index", &self.arg_index)
            .field("required", &self.required)
            .field("has_schema", &self.schema.is_some())
            .finish()
    }
}

// ========== Handler arguments and results ==========

/// One bound handler argument.
#[derive(Debug, Clone)]
pub enum HandlerArg {
    /// Unbound slot (optional parameter that was absent).
    Missing,
    /// Extracted and schema-normalized value.
    Value(Value),
    /// The full request (REQUEST binding).
    Request(HttpRequest),
    /// A response seed the handler may fill and return (RESPONSE binding).
    Response(HttpResponse),
}

static MISSING_ARG: HandlerArg = HandlerArg::Missing;

impl HandlerArg {
    pub fn value(&self) -> Option<&Value> {
        match self {
            HandlerArg::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value().and_then(|v| v.as_str())
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, HandlerArg::Missing)
    }
}

/// Positional handler arguments, indexed by `ParamBinding::arg_index`.
#[derive(Debug, Clone, Default)]
pub struct HandlerArgs(Vec<HandlerArg>);

impl HandlerArgs {
    pub fn new(args: Vec<HandlerArg>) -> Self {
        Self(args)
    }

    /// Argument at `index`; out-of-range reads are `Missing`.
    pub fn get(&self, index: usize) -> &HandlerArg {
        self.0.get(index).unwrap_or(&MISSING_ARG)
    }

    pub fn str_arg(&self, index: usize) -> Option<&str> {
        self.get(index).as_str()
    }

    pub fn json(&self, index: usize) -> Option<&Value> {
        self.get(index).value()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What a route handler returns.
#[derive(Debug)]
pub enum HandlerOutput {
    /// A plain value, validated and wrapped into the success envelope.
    Value(Value),
    /// A fully-formed response, passed through.
    Response(HttpResponse),
}

impl From<Value> for HandlerOutput {
    fn from(value: Value) -> Self {
        HandlerOutput::Value(value)
    }
}

impl From<HttpResponse> for HandlerOutput {
    fn from(response: HttpResponse) -> Self {
        HandlerOutput::Response(response)
    }
}

/// Bound route handler: receives the controller instance and the extracted
/// arguments. The instance is downcast inside the handler closure.
pub type RouteHandlerFn = Arc<
    dyn Fn(Arc<dyn Any + Send + Sync>, HandlerArgs) -> BoxFuture<Result<HandlerOutput, Error>>
        + Send
        + Sync,
>;

// ========== Route registration ==========

/// Registration record for one HTTP route on a controller.
#[derive(Clone)]
pub struct RouteSpec {
    pub method: HttpMethod,
    pub path: String,
    pub handler_name: &'static str,
    pub params: Vec<ParamBinding>,
    pub response_schemas: HashMap<u16, Arc<dyn Schema>>,
    pub handler: RouteHandlerFn,
}

impl RouteSpec {
    pub fn new(
        method: HttpMethod,
        path: impl Into<String>,
        handler_name: &'static str,
        handler: impl Fn(Arc<dyn Any + Send + Sync>, HandlerArgs) -> BoxFuture<Result<HandlerOutput, Error>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            handler_name,
            params: Vec::new(),
            response_schemas: HashMap::new(),
            handler: Arc::new(handler),
        }
    }

    pub fn param(mut self, binding: ParamBinding) -> Self {
        self.params.push(binding);
        self
    }

    /// Declare the response schema for one status code.
    pub fn response_schema(mut self, status: u16, schema: Arc<dyn Schema>) -> Self {
        self.response_schemas.insert(status, schema);
        self
    }
}

impl std::fmt::Debug for RouteSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteSpec")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("handler_name", &self.handler_name)
            .field("params", &self.params)
            .finish()
    }
}

// ========== Controller registration ==========

/// Factory invoked to construct one controller instance.
pub type ControllerFactory =
    Arc<dyn Fn(&ResolveScope<'_>, &InitContext) -> Result<Provided, Error> + Send + Sync>;

/// Registration record for one controller and its routes.
#[derive(Clone)]
pub struct ControllerSpec {
    pub name: &'static str,
    pub base_path: &'static str,
    pub deps: DependencyList,
    pub factory: ControllerFactory,
    pub routes: Vec<RouteSpec>,
}

impl ControllerSpec {
    pub fn new(
        name: &'static str,
        base_path: &'static str,
        factory: impl Fn(&ResolveScope<'_>, &InitContext) -> Result<Provided, Error>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name,
            base_path,
            deps: DependencyList::new(),
            factory: Arc::new(factory),
            routes: Vec::new(),
        }
    }

    pub fn depends_on(mut self, tag: ServiceTag) -> Self {
        self.deps.push(tag);
        self
    }

    pub fn route(mut self, route: RouteSpec) -> Self {
        self.routes.push(route);
        self
    }
}

impl std::fmt::Debug for ControllerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerSpec")
            .field("name", &self.name)
            .field("base_path", &self.base_path)
            .field("routes", &self.routes.len())
            .finish()
    }
}

// ========== Middleware registration ==========

/// Factory invoked to construct one middleware instance, resolved with the
/// same mechanism as controllers.
pub type MiddlewareFactory = Arc<
    dyn Fn(&ResolveScope<'_>, &InitContext) -> Result<Arc<dyn Middleware>, Error> + Send + Sync,
>;

/// Registration record for one middleware.
#[derive(Clone)]
pub struct MiddlewareSpec {
    pub name: &'static str,
    pub deps: DependencyList,
    pub factory: MiddlewareFactory,
}

impl MiddlewareSpec {
    pub fn new(
        name: &'static str,
        factory: impl Fn(&ResolveScope<'_>, &InitContext) -> Result<Arc<dyn Middleware>, Error>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name,
            deps: DependencyList::new(),
            factory: Arc::new(factory),
        }
    }

    pub fn depends_on(mut self, tag: ServiceTag) -> Self {
        self.deps.push(tag);
        self
    }
}

impl std::fmt::Debug for MiddlewareSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareSpec")
            .field("name", &self.name)
            .field("deps", &self.deps)
            .finish()
    }
}

// ========== Module definitions ==========

/// Immutable composition record of one module: imports, providers,
/// controllers, middleware, exports, and the global flag.
pub struct ModuleDefinition {
    pub name: &'static str,
    pub imports: Vec<Arc<ModuleDefinition>>,
    pub providers: Vec<ProviderSpec>,
    pub controllers: Vec<ControllerSpec>,
    pub middleware: Vec<MiddlewareSpec>,
    pub exports: Vec<ServiceTag>,
    pub global: bool,
}

impl ModuleDefinition {
    pub fn builder(name: &'static str) -> ModuleBuilder {
        ModuleBuilder {
            def: ModuleDefinition {
                name,
                imports: Vec::new(),
                providers: Vec::new(),
                controllers: Vec::new(),
                middleware: Vec::new(),
                exports: Vec::new(),
                global: false,
            },
        }
    }
}

impl std::fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("name", &self.name)
            .field("imports", &self.imports.len())
            .field("providers", &self.providers.len())
            .field("controllers", &self.controllers.len())
            .field("middleware", &self.middleware.len())
            .field("global", &self.global)
            .finish()
    }
}

/// Builder for [`ModuleDefinition`].
pub struct ModuleBuilder {
    def: ModuleDefinition,
}

impl ModuleBuilder {
    /// Import another module.
    pub fn import(mut self, module: Arc<ModuleDefinition>) -> Self {
        self.def.imports.push(module);
        self
    }

    /// Register a provider.
    pub fn provider(mut self, provider: ProviderSpec) -> Self {
        self.def.providers.push(provider);
        self
    }

    /// Register a controller.
    pub fn controller(mut self, controller: ControllerSpec) -> Self {
        self.def.controllers.push(controller);
        self
    }

    /// Register module-level middleware, applied to this module's routes and
    /// all descendant modules' routes.
    pub fn middleware(mut self, middleware: MiddlewareSpec) -> Self {
        self.def.middleware.push(middleware);
        self
    }

    /// Export a provider to importing modules.
    pub fn export(mut self, tag: ServiceTag) -> Self {
        self.def.exports.push(tag);
        self
    }

    /// Mark as global: built once, exports visible to every module.
    pub fn global(mut self) -> Self {
        self.def.global = true;
        self
    }

    pub fn build(self) -> Arc<ModuleDefinition> {
        Arc::new(self.def)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Alpha;
    struct Beta;

    #[test]
    fn test_tag_identity() {
        assert_eq!(ServiceTag::of::<Alpha>(), ServiceTag::of::<Alpha>());
        assert_ne!(ServiceTag::of::<Alpha>(), ServiceTag::of::<Beta>());
        assert_eq!(ServiceTag::named("db"), ServiceTag::named("db"));
        assert_ne!(ServiceTag::named("db"), ServiceTag::named("cache"));
        // A labeled tag never collides with a type tag
        assert_ne!(ServiceTag::named("Alpha"), ServiceTag::of::<Alpha>());
    }

    #[test]
    fn test_tag_short_name() {
        assert_eq!(ServiceTag::of::<Alpha>().short_name(), "Alpha");
        assert_eq!(ServiceTag::named("db").short_name(), "db");
    }

    #[test]
    fn test_dependency_list_override_extends() {
        let mut deps = DependencyList::new();
        deps.push(ServiceTag::of::<Alpha>());
        deps.set(2, ServiceTag::of::<Beta>());

        assert_eq!(deps.len(), 3);
        let tags: Vec<_> = deps.tags().collect();
        assert_eq!(tags, vec![ServiceTag::of::<Alpha>(), ServiceTag::of::<Beta>()]);
    }

    #[test]
    fn test_dependency_override_wins() {
        let mut deps = DependencyList::new();
        deps.push(ServiceTag::of::<Alpha>());
        deps.set(0, ServiceTag::of::<Beta>());

        let tags: Vec<_> = deps.tags().collect();
        assert_eq!(tags, vec![ServiceTag::of::<Beta>()]);
    }

    #[test]
    fn test_param_required_defaults() {
        assert!(ParamBinding::path("id", 0).is_required());
        // PATH stays required even with an explicit override
        assert!(ParamBinding::path("id", 0).required(false).is_required());

        assert!(!ParamBinding::query("page", 0).is_required());
        assert!(ParamBinding::query("page", 0).required(true).is_required());

        assert!(!ParamBinding::header("x-token", 0).is_required());

        // Body without a schema defaults to required
        assert!(ParamBinding::body(0).is_required());
        assert!(!ParamBinding::body(0).required(false).is_required());
    }

    #[test]
    fn test_handler_args_out_of_range() {
        let args = HandlerArgs::new(vec![HandlerArg::Value(serde_json::json!("x"))]);
        assert_eq!(args.str_arg(0), Some("x"));
        assert!(args.get(5).is_missing());
    }

    #[test]
    fn test_module_builder() {
        let inner = ModuleDefinition::builder("InnerModule")
            .export(ServiceTag::named("shared"))
            .global()
            .build();
        let outer = ModuleDefinition::builder("OuterModule")
            .import(inner.clone())
            .build();

        assert!(inner.global);
        assert_eq!(outer.imports.len(), 1);
        assert_eq!(outer.imports[0].name, "InnerModule");
    }
}
