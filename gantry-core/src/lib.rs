//! Gantry: a modular HTTP application framework.
//!
//! Applications are composed from explicit [`ModuleDefinition`]s: each module
//! declares its providers, controllers, middleware, imports, and exports.
//! Building an [`Application`] constructs the module tree (singleton services
//! wired by a work-queue resolver with cycle detection), collects routes into
//! a table, and serves them through a dispatcher that handles normalization,
//! middleware, parameter binding, validation, and response enveloping.

pub mod application;
pub mod collaborators;
pub mod container;
pub mod dispatch;
pub mod error;
pub mod factory;
pub mod http;
pub mod lifecycle;
pub mod middleware;
pub mod module;
pub mod registry;
pub mod routing;
pub mod status;

pub use application::{Application, ApplicationBuilder};
pub use collaborators::{
    wants_upgrade, HttpSample, HttpSpan, MetricsSink, Schema, TraceContext, TraceSink,
    UpgradeDelegate,
};
pub use container::{build_services, AppConfig, Container, InitContext, Provided, ResolveScope};
pub use dispatch::Dispatcher;
pub use error::Error;
pub use factory::BuiltController;
pub use http::{
    error_envelope, is_enveloped, parse_query_string, success_envelope, HttpRequest, HttpResponse,
    QueryValue,
};
pub use lifecycle::{
    LifecycleManager, OnApplicationBootstrap, OnApplicationShutdown, OnModuleInit, ServiceHooks,
};
pub use middleware::{HandlerFn, Middleware, MiddlewareChain, Next};
pub use module::{ModuleInstance, ModuleTree};
pub use registry::{
    ControllerSpec, DependencyList, HandlerArg, HandlerArgs, HandlerOutput, HttpMethod,
    MiddlewareSpec, ModuleBuilder, ModuleDefinition, ParamBinding, ParamKind, ProviderSpec,
    RouteHandlerFn, RouteSpec, ServiceTag,
};
pub use routing::{join_paths, normalize_path, RouteDescriptor, RouteTable};
pub use status::HttpStatus;

// Re-export the logging macros so applications depend on one crate.
pub use gantry_log::{self as log, Logger};
