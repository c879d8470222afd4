use std::time::Instant;

use crate::error::InjectorError;
use crate::injector::Injector;
use crate::module::InitEntry;
use crate::service::Locals;

impl Injector {
    /// Runs every module's initializers: modules in load order, entries in
    /// declared order, each awaited before the next.
    ///
    /// Runs once per injector. Later (or concurrent) calls wait for and return
    /// the outcome of the first run.
    pub async fn initialize(&self) -> Result<(), InjectorError> {
        self.inner
            .init
            .get_or_init(|| self.run_initializers())
            .await
            .clone()
    }

    /// `true` once [`Injector::initialize`] has completed, successfully or not.
    pub fn is_initialized(&self) -> bool {
        self.inner.init.initialized()
    }

    async fn run_initializers(&self) -> Result<(), InjectorError> {
        let started = Instant::now();
        tracing::info!(modules = self.inner.modules.len(), "Initialization started");

        for module in &self.inner.modules {
            for entry in module.initializers() {
                let outcome = match entry {
                    InitEntry::Service(name) => {
                        tracing::debug!(module = module.label(), service = %name, "Initializing service");
                        self.get(name).await.map(drop)
                    }
                    InitEntry::Invoke(callable) => {
                        tracing::debug!(module = module.label(), "Running initializer");
                        self.invoke_with(callable.clone(), Default::default(), Locals::new())
                            .await
                            .map(drop)
                    }
                };

                if let Err(err) = outcome {
                    tracing::error!(module = module.label(), error = %err, "Initialization failed");
                    return Err(err);
                }
            }
        }

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Initialization completed"
        );
        Ok(())
    }
}
