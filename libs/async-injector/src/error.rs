use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Shared, cloneable source error. In-flight resolutions hand the same outcome
/// to every waiter, so errors must be `Clone`.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// The chain of service names being resolved when an error was raised.
///
/// Renders as ` (Resolving: a -> b -> c)`, or as nothing when empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionPath(Vec<String>);

impl ResolutionPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Returns a copy of this path with `name` appended.
    pub fn with(&self, name: &str) -> Self {
        let mut names = self.0.clone();
        names.push(name.to_string());
        Self(names)
    }
}

impl From<Vec<String>> for ResolutionPath {
    fn from(names: Vec<String>) -> Self {
        Self(names)
    }
}

impl fmt::Display for ResolutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        write!(f, " (Resolving: {})", self.0.join(" -> "))
    }
}

/// Structured errors raised by the injector.
///
/// Every variant is terminal for the resolution that raised it; nothing is
/// retried automatically.
#[derive(Debug, Clone, Error)]
pub enum InjectorError {
    #[error("No provider for \"{name}\"!{path}")]
    Unresolved { name: String, path: ResolutionPath },

    #[error("Cannot resolve circular dependency!{path}")]
    CircularDependency { path: ResolutionPath },

    #[error("Cannot invoke \"{value}\". Expected a function!{path}")]
    Invocation { value: String, path: ResolutionPath },

    #[error("{0}")]
    Configuration(String),

    #[error("Failed to create \"{name}\": {source}{path}")]
    Provider {
        name: String,
        path: ResolutionPath,
        #[source]
        source: SharedError,
    },

    #[error("{source}{path}")]
    Call {
        path: ResolutionPath,
        #[source]
        source: SharedError,
    },

    #[error("Cannot read property \"{property}\" of null (resolving \"{name}\")")]
    Property { name: String, property: String },
}

impl InjectorError {
    /// Converts an error returned by a user callable. `provider` names the
    /// service being created, if any.
    ///
    /// Injector errors raised inside the callable (for example by an explicit
    /// `injector.get(..)`) pass through unchanged.
    pub(crate) fn from_callable(
        provider: Option<&str>,
        path: &ResolutionPath,
        err: anyhow::Error,
    ) -> Self {
        let err = match err.downcast::<InjectorError>() {
            Ok(inner) => return inner,
            Err(err) => err,
        };
        let boxed: Box<dyn std::error::Error + Send + Sync + 'static> = err.into();
        let source: SharedError = Arc::from(boxed);
        match provider {
            Some(name) => InjectorError::Provider {
                name: name.to_string(),
                path: path.clone(),
                source,
            },
            None => InjectorError::Call {
                path: path.clone(),
                source,
            },
        }
    }

    /// The resolution path attached to this error, if any.
    pub fn path(&self) -> Option<&ResolutionPath> {
        match self {
            InjectorError::Unresolved { path, .. }
            | InjectorError::CircularDependency { path }
            | InjectorError::Invocation { path, .. }
            | InjectorError::Provider { path, .. }
            | InjectorError::Call { path, .. } => Some(path),
            InjectorError::Configuration(_) | InjectorError::Property { .. } => None,
        }
    }
}
