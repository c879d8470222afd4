use std::sync::Arc;

use async_injector::{Module, Service};

use crate::config::AppConfig;

/// Name under which the `services` section is provided.
pub const CONFIG_SERVICE: &str = "config";

/// A module providing the `services` section as the `config` value, so
/// factories can depend on `config` and dotted lookups like `config.db.host`
/// walk into it.
pub fn config_module(app: &AppConfig) -> Arc<Module> {
    let services = serde_json::Value::Object(
        app.services
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
    );

    Module::named("config")
        .value(CONFIG_SERVICE, Service::json(services))
        .value("injector.config", Service::new(app.injector.clone()))
        .shared()
}
