//! A small service graph wired through the injector:
//! `config` → `store` → `greeter`, plus an initializer that warms the store.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_injector::{annotate, Args, Callable, Constructed, Module, Service};
use parking_lot::RwLock;

/// In-memory key/value store seeded from `config.store.seed`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.write().insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[derive(Debug)]
pub struct Greeter {
    store: Arc<MemoryStore>,
    greeting: String,
}

impl Greeter {
    pub fn greet(&self, key: &str) -> String {
        let name = self.store.get(key).unwrap_or_else(|| key.to_string());
        format!("{}, {name}!", self.greeting)
    }
}

fn store_factory() -> Callable {
    annotate(
        ["config"],
        Callable::function(|args: Args| async move {
            let config = args.service(0)?;
            let store = MemoryStore::default();

            let seed = config
                .as_json()
                .and_then(|c| c.pointer("/store/seed"))
                .and_then(|s| s.as_object());
            for (key, value) in seed.into_iter().flatten() {
                let value = value
                    .as_str()
                    .with_context(|| format!("store seed '{key}' must be a string"))?;
                store.insert(key.as_str(), value);
            }

            tracing::debug!(entries = store.len(), "Store seeded");
            Ok::<_, anyhow::Error>(Service::new(store))
        }),
    )
}

fn greeter_type() -> Callable {
    annotate(
        ["store", "config"],
        Callable::constructor(|args: Args| {
            let config = args.service(1)?;
            let greeting = match config.as_json().and_then(|c| c.pointer("/greeter/greeting")) {
                Some(serde_json::Value::String(s)) => s.clone(),
                None => "Hello".to_string(),
                Some(_) => return Err(anyhow!("greeter.greeting must be a string")),
            };
            Ok(Constructed::new(Greeter {
                store: args.get::<MemoryStore>(0)?,
                greeting,
            }))
        }),
    )
}

pub fn storage_module() -> Arc<Module> {
    Module::named("storage")
        .factory("store", store_factory())
        .shared()
}

pub fn app_module() -> Arc<Module> {
    Module::named("app")
        .depends_on(storage_module())
        .type_("greeter", greeter_type())
        .factory(
            "welcome",
            annotate(
                ["greeter"],
                Callable::sync(|args| {
                    let greeter = args.get::<Greeter>(0)?;
                    Ok(Service::new(greeter.greet("alice")))
                }),
            ),
        )
        .init("greeter")
        .init_with(annotate(
            ["store"],
            Callable::sync(|args| {
                let store = args.get::<MemoryStore>(0)?;
                tracing::info!(entries = store.len(), "Store ready");
                Ok(Service::null())
            }),
        ))
        .shared()
}

/// Human readable form of a resolved service.
pub fn describe(service: &Service) -> String {
    if let Some(json) = service.as_json() {
        return serde_json::to_string_pretty(json).unwrap_or_else(|_| json.to_string());
    }
    if let Some(greeter) = service.downcast_ref::<Greeter>() {
        return format!("Greeter {{ greeting: {:?} }}", greeter.greeting);
    }
    if let Some(store) = service.downcast_ref::<MemoryStore>() {
        return format!("MemoryStore {{ entries: {} }}", store.len());
    }
    service.render()
}
