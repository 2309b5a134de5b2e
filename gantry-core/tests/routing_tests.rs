//! Route table integration tests: registration from the module tree,
//! precedence, and normalization at lookup time.

use gantry_core::{
    AppConfig, ControllerSpec, HandlerOutput, HttpMethod, InitContext, Logger, ModuleDefinition,
    ModuleTree, ParamBinding, Provided, RouteSpec, RouteTable,
};
use serde_json::json;
use std::sync::Arc;

struct Controller;

fn route(method: HttpMethod, path: &str, name: &'static str) -> RouteSpec {
    let mut spec = RouteSpec::new(method, path, name, move |_instance, _args| {
        Box::pin(async move { Ok(HandlerOutput::Value(json!(name))) })
    });
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if let Some(param) = segment.strip_prefix(':') {
            let index = spec.params.len();
            spec = spec.param(ParamBinding::path(param.to_string(), index));
        }
    }
    spec
}

fn module_with_routes(base: &'static str, routes: Vec<RouteSpec>) -> Arc<ModuleDefinition> {
    let mut controller = ControllerSpec::new("TestController", base, |_, _| {
        Ok(Provided::new(Arc::new(Controller)))
    });
    for r in routes {
        controller = controller.route(r);
    }
    ModuleDefinition::builder("TestModule")
        .controller(controller)
        .build()
}

fn build_table(module: &Arc<ModuleDefinition>, prefix: &str) -> RouteTable {
    let ctx = InitContext::new(Logger::root(), Arc::new(AppConfig::new()));
    let tree = ModuleTree::build(module, &ctx).unwrap();
    RouteTable::build(&tree, prefix, &Logger::root()).unwrap()
}

#[test]
fn exact_match_beats_pattern() {
    let module = module_with_routes(
        "/users",
        vec![
            route(HttpMethod::GET, "/:id", "by_id"),
            route(HttpMethod::GET, "/all", "list_all"),
        ],
    );
    let table = build_table(&module, "");

    let (descriptor, params) = table.find("GET", "/users/all").unwrap();
    assert_eq!(descriptor.handler_name, "list_all");
    assert!(params.is_empty());

    let (descriptor, params) = table.find("GET", "/users/42").unwrap();
    assert_eq!(descriptor.handler_name, "by_id");
    assert_eq!(params["id"], "42");
}

#[test]
fn longest_static_prefix_wins_between_patterns() {
    let module = module_with_routes(
        "",
        vec![
            route(HttpMethod::GET, "/:resource/:id", "generic"),
            route(HttpMethod::GET, "/users/:id", "users"),
        ],
    );
    let table = build_table(&module, "");

    let (descriptor, params) = table.find("GET", "/users/7").unwrap();
    assert_eq!(descriptor.handler_name, "users");
    assert_eq!(params["id"], "7");

    let (descriptor, params) = table.find("GET", "/posts/7").unwrap();
    assert_eq!(descriptor.handler_name, "generic");
    assert_eq!(params["resource"], "posts");
}

#[test]
fn methods_are_distinct_keys() {
    let module = module_with_routes(
        "/items",
        vec![
            route(HttpMethod::GET, "", "list"),
            route(HttpMethod::POST, "", "create"),
        ],
    );
    let table = build_table(&module, "");

    assert_eq!(table.find("GET", "/items").unwrap().0.handler_name, "list");
    assert_eq!(
        table.find("POST", "/items").unwrap().0.handler_name,
        "create"
    );
    assert!(table.find("DELETE", "/items").is_none());
    assert!(table.find("BOGUS", "/items").is_none());
}

#[test]
fn duplicate_registration_last_wins() {
    let module = module_with_routes(
        "/dup",
        vec![
            route(HttpMethod::GET, "/x", "first"),
            route(HttpMethod::GET, "/x", "second"),
        ],
    );
    let table = build_table(&module, "");

    assert_eq!(table.len(), 1);
    assert_eq!(table.find("GET", "/dup/x").unwrap().0.handler_name, "second");
}

#[test]
fn global_prefix_applies_to_every_route() {
    let module = module_with_routes("/users", vec![route(HttpMethod::GET, "/:id", "by_id")]);
    let table = build_table(&module, "/api");

    assert!(table.find("GET", "/users/1").is_none());
    let (descriptor, _) = table.find("GET", "/api/users/1").unwrap();
    assert_eq!(descriptor.path, "/api/users/:id");
}

#[test]
fn multi_parameter_routes_extract_all_segments() {
    let module = module_with_routes(
        "/users",
        vec![route(HttpMethod::GET, "/:id/posts/:post_id", "user_post")],
    );
    let table = build_table(&module, "");

    let (_, params) = table.find("GET", "/users/9/posts/12").unwrap();
    assert_eq!(params["id"], "9");
    assert_eq!(params["post_id"], "12");

    assert!(table.find("GET", "/users/9/posts").is_none());
    assert!(table.find("GET", "/users/9/posts/12/comments").is_none());
}

#[test]
fn routes_from_nested_modules_are_collected() {
    let child = ModuleDefinition::builder("ChildModule")
        .controller(
            ControllerSpec::new("ChildController", "/child", |_, _| {
                Ok(Provided::new(Arc::new(Controller)))
            })
            .route(route(HttpMethod::GET, "/ping", "ping")),
        )
        .build();

    let root = ModuleDefinition::builder("RootModule")
        .import(child)
        .controller(
            ControllerSpec::new("RootController", "/root", |_, _| {
                Ok(Provided::new(Arc::new(Controller)))
            })
            .route(route(HttpMethod::GET, "/ping", "root_ping")),
        )
        .build();

    let table = build_table(&root, "");
    assert_eq!(table.len(), 2);
    assert!(table.find("GET", "/child/ping").is_some());
    assert!(table.find("GET", "/root/ping").is_some());
}

#[test]
fn controller_without_routes_contributes_nothing() {
    let module = module_with_routes("/empty", vec![]);
    let table = build_table(&module, "");
    assert!(table.is_empty());
}
