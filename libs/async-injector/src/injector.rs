//! The resolution engine and the invocation mechanism.
//!
//! Design notes:
//! - All bookkeeping (singletons, in-flight computations, failures, waits)
//!   lives behind one mutex that is never held across an `.await`.
//! - The resolution path travels with the call chain as a task-local, scoped
//!   around every provider computation. Concurrent chains never see each
//!   other's path.
//! - A provider runs inside a `Shared` future stored in the in-flight map, so
//!   every concurrent requester awaits the same single execution.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::annotation::{
    AnnotationExtractor, Args, CallMode, Callable, Invocable, SignatureExtractor,
};
use crate::config::{FailurePolicy, InjectorConfig};
use crate::error::{InjectorError, ResolutionPath};
use crate::module::{Definition, Module, ProviderKind};
use crate::registry::{expand_modules, ProviderEntry, ProviderRegistry};
use crate::service::{Locals, Service};

/// Name under which the injector resolves itself.
pub const INJECTOR: &str = "injector";

tokio::task_local! {
    static RESOLVING: ResolutionPath;
}

type Pending = Shared<BoxFuture<'static, Result<Service, InjectorError>>>;

#[derive(Default)]
struct State {
    instances: HashMap<String, Service>,
    loading: HashMap<String, Pending>,
    failed: HashMap<String, InjectorError>,
    /// Provider name → names it is currently awaiting.
    waits: HashMap<String, Vec<String>>,
    /// The handle `"injector"` resolves to, held weakly so the injector does
    /// not keep itself alive.
    this: Weak<Injector>,
}

impl State {
    /// Route from `from` to `to` along in-flight waits, both ends included.
    fn wait_route(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let mut stack = vec![vec![from.to_string()]];
        let mut seen = HashSet::new();
        while let Some(route) = stack.pop() {
            let node = route.last()?;
            if node == to {
                return Some(route);
            }
            if !seen.insert(node.clone()) {
                continue;
            }
            for next in self.waits.get(node).into_iter().flatten() {
                let mut extended = route.clone();
                extended.push(next.clone());
                stack.push(extended);
            }
        }
        None
    }
}

pub(crate) struct Inner {
    registry: ProviderRegistry,
    pub(crate) modules: Vec<Arc<Module>>,
    config: InjectorConfig,
    extractor: Arc<dyn AnnotationExtractor>,
    state: Mutex<State>,
    pub(crate) init: OnceCell<Result<(), InjectorError>>,
}

/// Removes a wait edge once the waiter stops awaiting, including on drop.
struct WaitGuard {
    inner: Arc<Inner>,
    waiter: String,
    target: String,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        let emptied = match state.waits.get_mut(&self.waiter) {
            Some(targets) => {
                if let Some(pos) = targets.iter().position(|t| *t == self.target) {
                    targets.swap_remove(pos);
                }
                targets.is_empty()
            }
            None => false,
        };
        if emptied {
            state.waits.remove(&self.waiter);
        }
    }
}

enum Lookup {
    Ready(Service),
    Pending(Pending, Option<WaitGuard>),
    Missing,
}

/// Builder for [`Injector`].
pub struct InjectorBuilder {
    modules: Vec<Arc<Module>>,
    config: InjectorConfig,
    extractor: Arc<dyn AnnotationExtractor>,
}

impl Default for InjectorBuilder {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            config: InjectorConfig::default(),
            extractor: Arc::new(SignatureExtractor),
        }
    }
}

impl InjectorBuilder {
    pub fn module(mut self, module: Arc<Module>) -> Self {
        self.modules.push(module);
        self
    }

    pub fn modules(mut self, modules: impl IntoIterator<Item = Arc<Module>>) -> Self {
        self.modules.extend(modules);
        self
    }

    pub fn config(mut self, config: InjectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the extractor used for callables without explicit annotations.
    pub fn extractor(mut self, extractor: impl AnnotationExtractor + 'static) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    /// Expands the module list and loads it into a fresh provider registry.
    pub fn build(self) -> Result<Injector, InjectorError> {
        let modules = expand_modules(&self.modules);
        let mut registry = ProviderRegistry::new();
        for module in &modules {
            registry.load(module)?;
        }

        tracing::debug!(
            providers = registry.len(),
            failure_policy = ?self.config.failure_policy,
            "Injector built"
        );

        Ok(Injector {
            inner: Arc::new(Inner {
                registry,
                modules,
                config: self.config,
                extractor: self.extractor,
                state: Mutex::new(State::default()),
                init: OnceCell::new(),
            }),
        })
    }
}

/// Resolves named services from a set of modules.
///
/// Cloning is cheap; clones share registry, singletons and initialization.
#[derive(Clone)]
pub struct Injector {
    pub(crate) inner: Arc<Inner>,
}

impl fmt::Debug for Injector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Injector")
            .field("modules", &self.load_order())
            .field("providers", &self.inner.registry.len())
            .field("instances", &state.instances.len())
            .field("loading", &state.loading.len())
            .finish()
    }
}

impl Injector {
    /// Builds an injector from an ordered module list.
    pub fn new(modules: impl IntoIterator<Item = Arc<Module>>) -> Result<Self, InjectorError> {
        Self::builder().modules(modules).build()
    }

    pub fn builder() -> InjectorBuilder {
        InjectorBuilder::default()
    }

    pub fn ptr_eq(a: &Injector, b: &Injector) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &InjectorConfig {
        &self.inner.config
    }

    /// Module labels in the order they were loaded.
    pub fn load_order(&self) -> Vec<&str> {
        self.inner.modules.iter().map(|m| m.label()).collect()
    }

    /// Child injectors are not supported.
    pub fn create_child(&self, _modules: Vec<Arc<Module>>) -> Result<Injector, InjectorError> {
        Err(InjectorError::Configuration(
            "child injectors are not supported".to_string(),
        ))
    }

    /// Resolves a service, failing when there is no provider for it.
    pub async fn get(&self, name: &str) -> Result<Service, InjectorError> {
        self.get_with(name, true).await
    }

    /// Resolves a service; with `strict == false` a missing provider yields
    /// [`Service::null`] instead of an error.
    pub async fn get_with(&self, name: &str, strict: bool) -> Result<Service, InjectorError> {
        self.resolve(name.to_string(), strict, current_path()).await
    }

    /// Resolves a service and downcasts it. `None` when the value is null or
    /// of another type.
    pub async fn get_as<T: std::any::Any + Send + Sync>(
        &self,
        name: &str,
    ) -> Result<Option<Arc<T>>, InjectorError> {
        Ok(self.get(name).await?.downcast::<T>())
    }

    /// Invokes a callable with its dependencies injected.
    pub async fn invoke(&self, callable: impl Into<Invocable>) -> Result<Service, InjectorError> {
        self.call(
            callable.into(),
            CallMode::Invoke,
            Service::null(),
            &Locals::new(),
            None,
        )
        .await
    }

    /// Invokes a callable on `context`, preferring `locals` over the registry
    /// for every dependency name they contain.
    pub async fn invoke_with(
        &self,
        callable: impl Into<Invocable>,
        context: Service,
        locals: Locals,
    ) -> Result<Service, InjectorError> {
        self.call(callable.into(), CallMode::Invoke, context, &locals, None)
            .await
    }

    /// Constructs an instance with its dependencies injected. The result is
    /// always an object: a function returning a primitive or null yields a
    /// fresh empty one.
    pub async fn instantiate(&self, ctor: impl Into<Invocable>) -> Result<Service, InjectorError> {
        self.call(
            ctor.into(),
            CallMode::Construct,
            Service::null(),
            &Locals::new(),
            None,
        )
        .await
    }

    fn resolve(
        &self,
        name: String,
        strict: bool,
        path: ResolutionPath,
    ) -> BoxFuture<'static, Result<Service, InjectorError>> {
        let this = self.clone();
        Box::pin(async move {
            if name == INJECTOR {
                return Ok(this.self_service());
            }

            if !this.inner.registry.contains(&name) && name.contains('.') {
                return this.resolve_property_path(&name, path).await;
            }

            match this.lookup(&name, &path)? {
                Lookup::Ready(service) => Ok(service),
                Lookup::Pending(pending, guard) => {
                    let out = pending.await;
                    drop(guard);
                    out
                }
                Lookup::Missing => {
                    let path = path.with(&name);
                    if strict {
                        Err(InjectorError::Unresolved { name, path })
                    } else {
                        tracing::debug!(service = %name, %path, "No provider, resolving to null");
                        Ok(Service::null())
                    }
                }
            }
        })
    }

    /// Every live handle to the injector's self-reference is the same value.
    fn self_service(&self) -> Service {
        let mut state = self.inner.state.lock();
        if let Some(handle) = state.this.upgrade() {
            return Service::from_arc(handle);
        }
        let handle = Arc::new(self.clone());
        state.this = Arc::downgrade(&handle);
        Service::from_arc(handle)
    }

    /// Singleton memo, failure memo, cycle check and in-flight sharing, all
    /// decided under one lock acquisition.
    fn lookup(&self, name: &str, path: &ResolutionPath) -> Result<Lookup, InjectorError> {
        let mut state = self.inner.state.lock();

        if let Some(service) = state.instances.get(name) {
            tracing::trace!(service = name, "Singleton hit");
            return Ok(Lookup::Ready(service.clone()));
        }
        if let Some(err) = state.failed.get(name) {
            return Err(err.clone());
        }
        let Some(entry) = self.inner.registry.get(name) else {
            return Ok(Lookup::Missing);
        };
        if path.contains(name) {
            return Err(InjectorError::CircularDependency {
                path: path.with(name),
            });
        }

        if let Some(waiter) = path.last() {
            if let Some(route) = state.wait_route(name, waiter) {
                let mut cycle = path.names().to_vec();
                cycle.extend(route);
                return Err(InjectorError::CircularDependency { path: cycle.into() });
            }
        }

        let pending = match state.loading.get(name).cloned() {
            Some(pending) => {
                tracing::trace!(service = name, "Joining in-flight resolution");
                pending
            }
            None => {
                let pending = self.start_provider(name, entry, path.with(name));
                state.loading.insert(name.to_string(), pending.clone());
                pending
            }
        };

        let guard = path.last().map(|waiter| {
            state
                .waits
                .entry(waiter.to_string())
                .or_default()
                .push(name.to_string());
            WaitGuard {
                inner: Arc::clone(&self.inner),
                waiter: waiter.to_string(),
                target: name.to_string(),
            }
        });

        Ok(Lookup::Pending(pending, guard))
    }

    /// Builds the shared computation for one provider. Nothing runs until the
    /// first requester polls it.
    fn start_provider(&self, name: &str, entry: &ProviderEntry, path: ResolutionPath) -> Pending {
        let this = self.clone();
        let name = name.to_string();
        let kind = entry.kind;
        let definition = entry.definition.clone();
        let module = entry.module.clone();

        let computation: BoxFuture<'static, Result<Service, InjectorError>> =
            Box::pin(async move {
                tracing::debug!(service = %name, %kind, %module, "Creating service");
                let result = RESOLVING
                    .scope(path, this.run_provider(&name, kind, definition))
                    .await;
                this.settle(&name, &result);
                result
            });
        computation.shared()
    }

    async fn run_provider(
        &self,
        name: &str,
        kind: ProviderKind,
        definition: Definition,
    ) -> Result<Service, InjectorError> {
        let invocable = match (kind, definition) {
            (ProviderKind::Value, Definition::Value(value)) => return Ok(value),
            (ProviderKind::Value, Definition::Invocable(inv)) => return Ok(Service::new(inv)),
            (_, Definition::Value(value)) => Invocable::Value(value),
            (_, Definition::Invocable(inv)) => inv,
        };
        let mode = match kind {
            ProviderKind::Type => CallMode::Construct,
            _ => CallMode::Invoke,
        };
        self.call(invocable, mode, Service::null(), &Locals::new(), Some(name))
            .await
    }

    /// Records the outcome of a provider run and retires its in-flight entry.
    fn settle(&self, name: &str, result: &Result<Service, InjectorError>) {
        let mut state = self.inner.state.lock();
        state.loading.remove(name);
        match result {
            Ok(service) => {
                let previous = state.instances.insert(name.to_string(), service.clone());
                debug_assert!(previous.is_none(), "singleton '{name}' created twice");
                tracing::debug!(service = name, "Service created");
            }
            Err(err) => {
                tracing::warn!(service = name, error = %err, "Service creation failed");
                if self.inner.config.failure_policy == FailurePolicy::Poison {
                    state.failed.insert(name.to_string(), err.clone());
                }
            }
        }
    }

    async fn resolve_property_path(
        &self,
        name: &str,
        path: ResolutionPath,
    ) -> Result<Service, InjectorError> {
        let mut segments = name.split('.');
        let head = segments.next().unwrap_or_default();
        let mut pivot = self.resolve(head.to_string(), true, path).await?;

        for segment in segments {
            pivot = match pivot.property(segment) {
                Ok(Some(value)) => value,
                Ok(None) => Service::null(),
                Err(()) => {
                    return Err(InjectorError::Property {
                        name: name.to_string(),
                        property: segment.to_string(),
                    })
                }
            };
        }
        Ok(pivot)
    }

    /// Resolves the callable and its arguments: locals first, then the
    /// registry. Sibling dependencies resolve concurrently.
    pub async fn determine_args(
        &self,
        invocable: Invocable,
        locals: &Locals,
    ) -> Result<(Callable, Args), InjectorError> {
        let path = current_path();
        let callable = invocable
            .unwrap_callable()
            .map_err(|raw| InjectorError::Invocation {
                value: raw.to_string(),
                path: path.clone(),
            })?;

        let names: Arc<[String]> = match callable.annotations() {
            Some(names) => Arc::from(names),
            None => self.inner.extractor.extract(&callable).into(),
        };

        let values = future::try_join_all(names.iter().map(|dep| match locals.get(dep) {
            Some(local) => future::ready(Ok(local.clone())).boxed(),
            None => self.resolve(dep.clone(), true, path.clone()),
        }))
        .await?;

        Ok((callable, Args::new(Service::null(), names, values)))
    }

    async fn call(
        &self,
        invocable: Invocable,
        mode: CallMode,
        context: Service,
        locals: &Locals,
        provider: Option<&str>,
    ) -> Result<Service, InjectorError> {
        let (callable, args) = self.determine_args(invocable, locals).await?;
        callable
            .call(args.with_context(context), mode)
            .await
            .map_err(|err| InjectorError::from_callable(provider, &current_path(), err))
    }
}

fn current_path() -> ResolutionPath {
    RESOLVING.try_with(|path| path.clone()).unwrap_or_default()
}
