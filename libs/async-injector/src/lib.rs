//! # async-injector - Asynchronous Dependency Injection
//!
//! Resolves named services declared by modules, lazily and asynchronously.
//!
//! ## Features
//!
//! - **Providers**: `value`, `factory` and `type` declarations grouped in modules
//! - **Singletons**: every name resolves at most once per injector, even under
//!   concurrent requests
//! - **Cycle detection**: circular dependencies fail with the full resolution path
//! - **Overrides**: the last module declaring a name wins, which makes mock
//!   modules trivial
//! - **Initializers**: per-module eager resolutions and callbacks, run once
//!
//! ## Example
//!
//! ```rust,ignore
//! use async_injector::{annotate, Callable, Injector, Module, Service};
//!
//! let module = Module::named("app")
//!     .value("greeting", "hello")
//!     .factory(
//!         "message",
//!         annotate(
//!             ["greeting"],
//!             Callable::function(|args| async move {
//!                 let greeting = args.get::<&'static str>(0)?;
//!                 Ok(Service::new(format!("{greeting}, world")))
//!             }),
//!         ),
//!     )
//!     .shared();
//!
//! let injector = Injector::new(vec![module])?;
//! injector.initialize().await?;
//! let message = injector.get_as::<String>("message").await?;
//! ```

pub mod annotation;
mod bootstrap;
pub mod config;
pub mod error;
pub mod injector;
pub mod module;
pub mod registry;
pub mod service;

pub use annotation::{
    annotate, parse_annotations, parse_signature, AnnotationExtractor, Args, Callable,
    Constructed, Invocable, SignatureExtractor,
};
pub use config::{FailurePolicy, InjectorConfig};
pub use error::{InjectorError, ResolutionPath};
pub use injector::{Injector, InjectorBuilder, INJECTOR};
pub use module::{Definition, InitEntry, Module, Provider, ProviderKind};
pub use registry::{expand_modules, ProviderEntry, ProviderRegistry};
pub use service::{Locals, Properties, Service};
