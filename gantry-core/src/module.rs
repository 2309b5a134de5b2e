//! Hierarchical module tree construction.
//!
//! Modules are built depth-first: a module's imports are fully constructed
//! before its own providers, so exported services exist by the time an
//! importer's factories run. A module marked global is built exactly once per
//! tree; its exports land in a tree-wide registry that seeds every module's
//! scope, so no module needs to re-import it.

use crate::container::{build_services, Container, InitContext};
use crate::error::Error;
use crate::factory::{build_controllers, build_middleware, BuiltController};
use crate::lifecycle::ServiceHooks;
use crate::middleware::Middleware;
use crate::registry::ModuleDefinition;
use std::collections::HashSet;
use std::sync::Arc;

/// Tree-wide state for global modules: their exports, and which ones have
/// already been built.
#[derive(Default)]
struct GlobalRegistry {
    exports: Container,
    built: HashSet<&'static str>,
}

/// One constructed module: its service scope, controllers, own middleware,
/// and children in import order.
pub struct ModuleInstance {
    pub name: &'static str,
    pub services: Container,
    pub controllers: Vec<BuiltController>,
    /// Middleware declared by this module only. Effective chains are
    /// assembled by prefixing every ancestor's list during route collection.
    pub middleware: Vec<Arc<dyn Middleware>>,
    pub children: Vec<ModuleInstance>,
}

impl std::fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("name", &self.name)
            .field("services", &self.services.len())
            .field("controllers", &self.controllers.len())
            .field("children", &self.children.len())
            .finish()
    }
}

/// A fully constructed module tree plus the lifecycle hooks collected in
/// creation order across the whole tree.
pub struct ModuleTree {
    pub root: ModuleInstance,
    pub hooks: ServiceHooks,
}

impl std::fmt::Debug for ModuleTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleTree").finish_non_exhaustive()
    }
}

impl ModuleTree {
    /// Build the tree rooted at `root`.
    pub fn build(root: &Arc<ModuleDefinition>, ctx: &InitContext) -> Result<Self, Error> {
        if root.name.trim().is_empty() {
            return Err(Error::MissingModuleMetadata("root module".to_string()));
        }
        let mut globals = GlobalRegistry::default();
        let mut hooks = ServiceHooks::new();
        let root = build_module(root, &mut globals, ctx, &mut hooks)?;
        Ok(Self { root, hooks })
    }

    /// Depth-first walk over every module, parents before children.
    pub fn modules(&self) -> Vec<&ModuleInstance> {
        let mut out = Vec::new();
        collect_modules(&self.root, &mut out);
        out
    }

    pub fn controller_count(&self) -> usize {
        self.modules().iter().map(|m| m.controllers.len()).sum()
    }
}

fn collect_modules<'a>(module: &'a ModuleInstance, out: &mut Vec<&'a ModuleInstance>) {
    out.push(module);
    for child in &module.children {
        collect_modules(child, out);
    }
}

fn build_module(
    def: &Arc<ModuleDefinition>,
    globals: &mut GlobalRegistry,
    ctx: &InitContext,
    hooks: &mut ServiceHooks,
) -> Result<ModuleInstance, Error> {
    if def.name.trim().is_empty() {
        return Err(Error::MissingModuleMetadata(
            "imported module has no name".to_string(),
        ));
    }

    let module_ctx = ctx.scoped(def.name);
    module_ctx.logger.debug("building module");

    // Every module sees global exports without importing them.
    let mut imported = globals.exports.clone();
    let mut children = Vec::new();

    for child_def in &def.imports {
        if child_def.global && globals.built.contains(child_def.name) {
            // Already constructed elsewhere in the tree; its exports are in
            // the global registry seeded above.
            continue;
        }

        let child = build_module(child_def, globals, ctx, hooks)?;

        for tag in &child_def.exports {
            match child.services.raw(tag) {
                Some(instance) => {
                    if child_def.global {
                        globals.exports.register_raw(*tag, instance.clone());
                    }
                    imported.register_raw(*tag, instance);
                }
                None => {
                    module_ctx.logger.warn(&format!(
                        "module {} exports {} but provides no such service",
                        child_def.name, tag
                    ));
                }
            }
        }
        if child_def.global {
            globals.built.insert(child_def.name);
        }

        children.push(child);
    }

    // Globals registered anywhere in the subtree just built must be visible
    // here too, not only to their direct importers.
    imported.merge_from(&globals.exports);

    let (services, service_hooks) = build_services(def, &imported, &module_ctx)?;
    hooks.extend(service_hooks);

    let middleware = build_middleware(def, &services, &module_ctx);
    let controllers = build_controllers(def, &services, &module_ctx, hooks);

    Ok(ModuleInstance {
        name: def.name,
        services,
        controllers,
        middleware,
        children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{AppConfig, Provided};
    use crate::registry::{ProviderSpec, ServiceTag};
    use gantry_log::Logger;

    struct Config {
        env: String,
    }

    struct ServiceA {
        config: Arc<Config>,
    }

    struct ServiceB {
        config: Arc<Config>,
    }

    fn test_ctx() -> InitContext {
        InitContext::new(Logger::root(), Arc::new(AppConfig::new()))
    }

    fn config_module(global: bool) -> Arc<ModuleDefinition> {
        let builder = ModuleDefinition::builder("ConfigModule")
            .provider(ProviderSpec::new::<Config>(|_, _| {
                Ok(Provided::new(Arc::new(Config { env: "test".into() })))
            }))
            .export(ServiceTag::of::<Config>());
        if global {
            builder.global().build()
        } else {
            builder.build()
        }
    }

    #[test]
    fn test_imports_built_before_own_providers() {
        let root = ModuleDefinition::builder("AppModule")
            .import(config_module(false))
            .provider(
                ProviderSpec::new::<ServiceA>(|scope, _| {
                    let config = scope.require::<Config>()?;
                    Ok(Provided::new(Arc::new(ServiceA { config })))
                })
                .depends_on(ServiceTag::of::<Config>()),
            )
            .build();

        let tree = ModuleTree::build(&root, &test_ctx()).unwrap();
        let a = tree.root.services.get::<ServiceA>().unwrap();
        assert_eq!(a.config.env, "test");
        assert_eq!(tree.root.children.len(), 1);
        assert_eq!(tree.root.children[0].name, "ConfigModule");
    }

    #[test]
    fn test_global_module_single_instance_across_branches() {
        let config = config_module(true);

        let branch_a = ModuleDefinition::builder("BranchA")
            .import(config.clone())
            .provider(
                ProviderSpec::new::<ServiceA>(|scope, _| {
                    let config = scope.require::<Config>()?;
                    Ok(Provided::new(Arc::new(ServiceA { config })))
                })
                .depends_on(ServiceTag::of::<Config>()),
            )
            .build();

        let branch_b = ModuleDefinition::builder("BranchB")
            .import(config.clone())
            .provider(
                ProviderSpec::new::<ServiceB>(|scope, _| {
                    let config = scope.require::<Config>()?;
                    Ok(Provided::new(Arc::new(ServiceB { config })))
                })
                .depends_on(ServiceTag::of::<Config>()),
            )
            .build();

        let root = ModuleDefinition::builder("AppModule")
            .import(branch_a)
            .import(branch_b)
            .build();

        let tree = ModuleTree::build(&root, &test_ctx()).unwrap();
        let modules = tree.modules();
        // ConfigModule appears once even though both branches import it
        let config_instances = modules.iter().filter(|m| m.name == "ConfigModule").count();
        assert_eq!(config_instances, 1);

        let a = modules
            .iter()
            .find_map(|m| m.services.get::<ServiceA>())
            .unwrap();
        let b = modules
            .iter()
            .find_map(|m| m.services.get::<ServiceB>())
            .unwrap();
        assert!(Arc::ptr_eq(&a.config, &b.config));
    }

    #[test]
    fn test_global_visible_without_import() {
        // BranchB never imports ConfigModule but still sees its export,
        // because BranchA (built first) registered it globally.
        let branch_a = ModuleDefinition::builder("BranchA")
            .import(config_module(true))
            .build();

        let branch_b = ModuleDefinition::builder("BranchB")
            .provider(
                ProviderSpec::new::<ServiceB>(|scope, _| {
                    let config = scope.require::<Config>()?;
                    Ok(Provided::new(Arc::new(ServiceB { config })))
                })
                .depends_on(ServiceTag::of::<Config>()),
            )
            .build();

        let root = ModuleDefinition::builder("AppModule")
            .import(branch_a)
            .import(branch_b)
            .build();

        let tree = ModuleTree::build(&root, &test_ctx()).unwrap();
        let b = tree
            .modules()
            .iter()
            .find_map(|m| m.services.get::<ServiceB>())
            .unwrap();
        assert_eq!(b.config.env, "test");
    }

    #[test]
    fn test_global_export_visible_to_ancestor_modules() {
        // The global sits two levels down; the root's own provider must
        // still resolve it.
        let branch = ModuleDefinition::builder("BranchModule")
            .import(
                ModuleDefinition::builder("LeafModule")
                    .import(config_module(true))
                    .build(),
            )
            .build();

        let root = ModuleDefinition::builder("AppModule")
            .import(branch)
            .provider(
                ProviderSpec::new::<ServiceA>(|scope, _| {
                    let config = scope.require::<Config>()?;
                    Ok(Provided::new(Arc::new(ServiceA { config })))
                })
                .depends_on(ServiceTag::of::<Config>()),
            )
            .build();

        let tree = ModuleTree::build(&root, &test_ctx()).unwrap();
        let a = tree.root.services.get::<ServiceA>().unwrap();
        assert_eq!(a.config.env, "test");
    }

    #[test]
    fn test_non_global_built_per_import_edge() {
        let root = ModuleDefinition::builder("AppModule")
            .import(
                ModuleDefinition::builder("BranchA")
                    .import(config_module(false))
                    .build(),
            )
            .import(
                ModuleDefinition::builder("BranchB")
                    .import(config_module(false))
                    .build(),
            )
            .build();

        let tree = ModuleTree::build(&root, &test_ctx()).unwrap();
        let count = tree
            .modules()
            .iter()
            .filter(|m| m.name == "ConfigModule")
            .count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_unnamed_module_rejected() {
        let root = ModuleDefinition::builder("").build();
        let err = ModuleTree::build(&root, &test_ctx()).unwrap_err();
        assert!(matches!(err, Error::MissingModuleMetadata(_)));
    }
}
