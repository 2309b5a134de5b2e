//! Route table: path normalization, registration, and lookup.
//!
//! Routes are collected from the module tree at startup into two structures:
//! an exact-match map keyed by `"METHOD:path"` and an ordered list of
//! compiled `:name` patterns. Lookup checks the exact map first; pattern
//! candidates are tried longest static prefix first, registration order
//! breaking ties, so overlapping patterns match deterministically.

use crate::collaborators::Schema;
use crate::error::Error;
use crate::middleware::Middleware;
use crate::module::ModuleTree;
use crate::registry::{HttpMethod, ParamBinding, RouteHandlerFn};
use gantry_log::Logger;
use regex::Regex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Canonical form of a request or registration path.
///
/// Collapses duplicate slashes, guarantees a single leading slash, strips
/// all trailing slashes, and maps the empty path to `/`. Idempotent.
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    out.push('/');
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(segment);
    }
    out
}

/// Join path fragments into one normalized path. Empty fragments vanish.
pub fn join_paths(parts: &[&str]) -> String {
    let mut joined = String::new();
    for part in parts {
        joined.push('/');
        joined.push_str(part);
    }
    normalize_path(&joined)
}

/// One registered route with everything dispatch needs.
#[derive(Clone)]
pub struct RouteDescriptor {
    pub method: HttpMethod,
    /// Full normalized path, prefix and controller base included.
    pub path: String,
    pub controller: &'static str,
    pub handler_name: &'static str,
    pub params: Vec<ParamBinding>,
    pub response_schemas: HashMap<u16, Arc<dyn Schema>>,
    pub handler: RouteHandlerFn,
    pub instance: Arc<dyn Any + Send + Sync>,
    /// Ancestor middleware first, then the owning module's own.
    pub middleware: Vec<Arc<dyn Middleware>>,
    pattern: Option<CompiledPattern>,
}

impl RouteDescriptor {
    fn key(&self) -> String {
        format!("{}:{}", self.method, self.path)
    }

    pub fn is_pattern(&self) -> bool {
        self.pattern.is_some()
    }
}

impl std::fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("controller", &self.controller)
            .field("handler_name", &self.handler_name)
            .finish()
    }
}

#[derive(Clone)]
struct CompiledPattern {
    regex: Regex,
    param_names: Vec<String>,
    /// Byte length of the path up to the first `:name` segment.
    static_prefix_len: usize,
}

fn compile_pattern(path: &str) -> Result<Option<CompiledPattern>, Error> {
    if !path.contains(':') {
        return Ok(None);
    }

    let mut regex = String::from("^");
    let mut param_names = Vec::new();
    let mut static_prefix_len = 0;
    let mut prefix_done = false;

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        regex.push('/');
        if let Some(name) = segment.strip_prefix(':') {
            regex.push_str("([^/]+)");
            param_names.push(name.to_string());
            prefix_done = true;
        } else {
            regex.push_str(&regex::escape(segment));
            if !prefix_done {
                static_prefix_len += segment.len() + 1;
            }
        }
    }
    regex.push('$');

    let regex = Regex::new(&regex)
        .map_err(|e| Error::Internal(format!("invalid route pattern {}: {}", path, e)))?;
    Ok(Some(CompiledPattern {
        regex,
        param_names,
        static_prefix_len,
    }))
}

/// Startup-built, immutable at dispatch time.
pub struct RouteTable {
    exact: HashMap<String, Arc<RouteDescriptor>>,
    patterns: Vec<Arc<RouteDescriptor>>,
}

impl RouteTable {
    /// Collect every route in the tree under `prefix`.
    pub fn build(tree: &ModuleTree, prefix: &str, logger: &Logger) -> Result<Self, Error> {
        let mut table = Self {
            exact: HashMap::new(),
            patterns: Vec::new(),
        };
        table.collect(&tree.root, prefix, &[], logger)?;

        // Longest static prefix wins; stable sort keeps registration order
        // among equals.
        table.patterns.sort_by(|a, b| {
            let a_len = a.pattern.as_ref().map(|p| p.static_prefix_len).unwrap_or(0);
            let b_len = b.pattern.as_ref().map(|p| p.static_prefix_len).unwrap_or(0);
            b_len.cmp(&a_len)
        });

        Ok(table)
    }

    fn collect(
        &mut self,
        module: &crate::module::ModuleInstance,
        prefix: &str,
        inherited: &[Arc<dyn Middleware>],
        logger: &Logger,
    ) -> Result<(), Error> {
        let mut chain: Vec<Arc<dyn Middleware>> = inherited.to_vec();
        chain.extend(module.middleware.iter().cloned());

        for controller in &module.controllers {
            for route in &controller.spec.routes {
                let path = join_paths(&[prefix, controller.spec.base_path, &route.path]);
                let descriptor = Arc::new(RouteDescriptor {
                    method: route.method,
                    path: path.clone(),
                    controller: controller.spec.name,
                    handler_name: route.handler_name,
                    params: route.params.clone(),
                    response_schemas: route.response_schemas.clone(),
                    handler: route.handler.clone(),
                    instance: controller.instance.clone(),
                    middleware: chain.clone(),
                    pattern: compile_pattern(&path)?,
                });
                self.insert(descriptor, logger);
            }
        }

        for child in &module.children {
            self.collect(child, prefix, &chain, logger)?;
        }
        Ok(())
    }

    fn insert(&mut self, descriptor: Arc<RouteDescriptor>, logger: &Logger) {
        let key = descriptor.key();
        if let Some(previous) = self.exact.insert(key.clone(), descriptor.clone()) {
            logger.warn(&format!(
                "duplicate route {} ({}::{} replaces {}::{})",
                key,
                descriptor.controller,
                descriptor.handler_name,
                previous.controller,
                previous.handler_name
            ));
            // Drop the shadowed pattern entry too
            self.patterns
                .retain(|p| !(p.method == previous.method && p.path == previous.path));
        }
        if descriptor.is_pattern() {
            self.patterns.push(descriptor);
        }
    }

    /// Find a route for an already-normalized path. Returns the descriptor
    /// and the extracted path parameters.
    pub fn find(
        &self,
        method: &str,
        path: &str,
    ) -> Option<(Arc<RouteDescriptor>, HashMap<String, String>)> {
        let method = HttpMethod::from_str(method)?;
        let key = format!("{}:{}", method, path);

        if let Some(route) = self.exact.get(&key) {
            if !route.is_pattern() {
                return Some((route.clone(), HashMap::new()));
            }
        }

        for route in &self.patterns {
            if route.method != method {
                continue;
            }
            let Some(pattern) = route.pattern.as_ref() else {
                continue;
            };
            if let Some(captures) = pattern.regex.captures(path) {
                let mut params = HashMap::new();
                for (i, name) in pattern.param_names.iter().enumerate() {
                    if let Some(capture) = captures.get(i + 1) {
                        params.insert(name.clone(), capture.as_str().to_string());
                    }
                }
                return Some((route.clone(), params));
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    /// All registered routes, for startup logging.
    pub fn routes(&self) -> impl Iterator<Item = &Arc<RouteDescriptor>> {
        self.exact.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_basic() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("users"), "/users");
        assert_eq!(normalize_path("/users/"), "/users");
        assert_eq!(normalize_path("//users///42//"), "/users/42");
    }

    #[test]
    fn test_normalize_idempotent() {
        for input in ["", "/", "a//b/", "//x", "/a/b/c"] {
            let once = normalize_path(input);
            assert_eq!(normalize_path(&once), once, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_join_paths() {
        assert_eq!(join_paths(&["api", "users", ":id"]), "/api/users/:id");
        assert_eq!(join_paths(&["", "/users/", ""]), "/users");
        assert_eq!(join_paths(&["", "", ""]), "/");
    }

    #[test]
    fn test_compile_pattern_static_prefix() {
        let p = compile_pattern("/users/:id/posts/:post_id").unwrap().unwrap();
        assert_eq!(p.param_names, vec!["id", "post_id"]);
        assert_eq!(p.static_prefix_len, "/users".len());
        assert!(p.regex.is_match("/users/42/posts/7"));
        assert!(!p.regex.is_match("/users/42/posts"));
        assert!(!p.regex.is_match("/users/42/posts/7/extra"));
    }

    #[test]
    fn test_static_route_has_no_pattern() {
        assert!(compile_pattern("/users/all").unwrap().is_none());
    }

    #[test]
    fn test_pattern_escapes_regex_metacharacters() {
        let p = compile_pattern("/v1.0/:id").unwrap().unwrap();
        assert!(p.regex.is_match("/v1.0/7"));
        assert!(!p.regex.is_match("/v1x0/7"));
    }
}
