// async-injector/src/registry.rs
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::InjectorError;
use crate::module::{Definition, Module, Provider, ProviderKind};

/// A registered provider, with array-annotated definitions already unwrapped.
#[derive(Debug, Clone)]
pub struct ProviderEntry {
    pub kind: ProviderKind,
    pub definition: Definition,
    /// Label of the module that registered this entry.
    pub module: String,
}

/// Service name → provider. Later loads override earlier ones.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every provider declared by `module`, overwriting existing
    /// entries with the same name.
    pub fn load(&mut self, module: &Module) -> Result<(), InjectorError> {
        if module.exported().is_some() {
            return Err(InjectorError::Configuration(
                "private modules are not supported".to_string(),
            ));
        }

        for (name, Provider { kind, definition }) in module.providers() {
            let definition = match (kind, definition) {
                (ProviderKind::Value, d) => d.clone(),
                (_, Definition::Invocable(inv)) => Definition::Invocable(inv.clone().normalized()),
                (_, d) => d.clone(),
            };

            if let Some(previous) = self.providers.get(name) {
                tracing::debug!(
                    service = %name,
                    overridden_by = module.label(),
                    previous = %previous.module,
                    "Provider overridden"
                );
            }

            self.providers.insert(
                name.clone(),
                ProviderEntry {
                    kind: *kind,
                    definition,
                    module: module.label().to_string(),
                },
            );
        }

        tracing::debug!(
            module = module.label(),
            providers = module.providers().len(),
            "Module loaded"
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ProviderEntry> {
        self.providers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Expands a module list through `depends_on`: depth-first, dependencies
/// before dependents, each module (by identity) at most once, at the position
/// it is first reached.
pub fn expand_modules(modules: &[Arc<Module>]) -> Vec<Arc<Module>> {
    fn visit(module: &Arc<Module>, seen: &mut Vec<*const Module>, order: &mut Vec<Arc<Module>>) {
        let id = Arc::as_ptr(module);
        if seen.contains(&id) {
            return;
        }
        // Marked before descending so mutually dependent modules terminate.
        seen.push(id);

        for dep in module.dependencies() {
            visit(dep, seen, order);
        }
        order.push(Arc::clone(module));
    }

    let mut seen = Vec::new();
    let mut order = Vec::with_capacity(modules.len());
    for module in modules {
        visit(module, &mut seen, &mut order);
    }

    tracing::info!(
        modules = ?order.iter().map(|m| m.label()).collect::<Vec<_>>(),
        "Module load order resolved"
    );
    order
}
