//! Module declarations: named providers, initializers and module dependencies.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::annotation::Invocable;
use crate::service::Service;

/// How a provider turns its definition into a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// The definition is the service.
    Value,
    /// The definition is invoked; its result is the service.
    Factory,
    /// The definition is instantiated with constructor semantics.
    Type,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProviderKind::Value => "value",
            ProviderKind::Factory => "factory",
            ProviderKind::Type => "type",
        })
    }
}

/// What a provider was declared with.
#[derive(Debug, Clone)]
pub enum Definition {
    Value(Service),
    Invocable(Invocable),
}

/// A `(kind, definition)` pair declared for one service name.
#[derive(Debug, Clone)]
pub struct Provider {
    pub kind: ProviderKind,
    pub definition: Definition,
}

impl Provider {
    pub fn value(value: impl Into<Service>) -> Self {
        Self {
            kind: ProviderKind::Value,
            definition: Definition::Value(value.into()),
        }
    }

    pub fn factory(definition: impl Into<Invocable>) -> Self {
        Self {
            kind: ProviderKind::Factory,
            definition: Definition::Invocable(definition.into()),
        }
    }

    pub fn type_(definition: impl Into<Invocable>) -> Self {
        Self {
            kind: ProviderKind::Type,
            definition: Definition::Invocable(definition.into()),
        }
    }
}

/// One entry of a module's initializer list.
#[derive(Debug, Clone)]
pub enum InitEntry {
    /// Resolve the named service eagerly.
    Service(String),
    /// Invoke a callable with injected dependencies.
    Invoke(Invocable),
}

/// A bundle of providers plus ordered initializers and module dependencies.
///
/// Modules are shared as `Arc<Module>`; identity (not content) decides whether
/// two entries of a module list are the same module.
#[derive(Debug, Clone, Default)]
pub struct Module {
    name: Option<String>,
    providers: Vec<(String, Provider)>,
    init: Vec<InitEntry>,
    depends: Vec<Arc<Module>>,
    exports: Option<Vec<String>>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// A module with a name used in logs and [`crate::Injector::load_order`].
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Declares a provider. Re-declaring a name inside the same module replaces
    /// the earlier declaration in place.
    pub fn provide(mut self, name: impl Into<String>, provider: Provider) -> Self {
        let name = name.into();
        match self.providers.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = provider,
            None => self.providers.push((name, provider)),
        }
        self
    }

    pub fn value(self, name: impl Into<String>, value: impl Into<Service>) -> Self {
        self.provide(name, Provider::value(value))
    }

    pub fn factory(self, name: impl Into<String>, definition: impl Into<Invocable>) -> Self {
        self.provide(name, Provider::factory(definition))
    }

    pub fn type_(self, name: impl Into<String>, definition: impl Into<Invocable>) -> Self {
        self.provide(name, Provider::type_(definition))
    }

    /// Appends a service to resolve eagerly during initialization.
    pub fn init(mut self, name: impl Into<String>) -> Self {
        self.init.push(InitEntry::Service(name.into()));
        self
    }

    /// Appends a callable to invoke during initialization.
    pub fn init_with(mut self, callable: impl Into<Invocable>) -> Self {
        self.init.push(InitEntry::Invoke(callable.into()));
        self
    }

    /// Declares a module that must be loaded before this one.
    pub fn depends_on(mut self, module: Arc<Module>) -> Self {
        self.depends.push(module);
        self
    }

    /// Marks the module as export-restricted. Such modules are rejected when
    /// an injector is built.
    pub fn exports<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exports = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn shared(self) -> Arc<Module> {
        Arc::new(self)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name for diagnostics.
    pub fn label(&self) -> &str {
        self.name().unwrap_or("<anonymous>")
    }

    pub fn providers(&self) -> &[(String, Provider)] {
        &self.providers
    }

    pub fn initializers(&self) -> &[InitEntry] {
        &self.init
    }

    pub fn dependencies(&self) -> &[Arc<Module>] {
        &self.depends
    }

    pub fn exported(&self) -> Option<&[String]> {
        self.exports.as_deref()
    }
}
