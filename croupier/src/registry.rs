//! One engine per registered application, built once at startup.

use crate::arbiter::{InputArbiter, InputLock};
use crate::config::EngineConfig;
use crate::engine::{Engine, EngineServices};
use crate::errors::EngineError;
use crate::export::{CapacitySignal, ResultExporter};
use crate::overlay::Overlay;
use crate::platforms::Platform;
use crate::question::Comando;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

pub struct EngineRegistry {
    engines: BTreeMap<String, Arc<Mutex<Engine>>>,
    arbiter: Arc<InputArbiter>,
    token: CancellationToken,
}

impl EngineRegistry {
    /// Builds an engine for every configured app. `platform_for` supplies the
    /// collaborators of each one; failing to build any of them fails startup.
    pub fn build<F>(
        config: Arc<EngineConfig>,
        exporter: Arc<dyn ResultExporter>,
        signal: Arc<dyn CapacitySignal>,
        overlay: Overlay,
        token: CancellationToken,
        mut platform_for: F,
    ) -> Result<Self, EngineError>
    where
        F: FnMut(&str) -> Result<Platform, EngineError>,
    {
        let arbiter = Arc::new(InputArbiter::new(InputLock::new(
            config.lock_acquire_timeout(),
            config.lock_retry_interval(),
            config.lock_lease(),
        )));
        let services = EngineServices {
            exporter,
            signal,
            overlay,
            arbiter: Arc::clone(&arbiter),
        };

        let mut engines = BTreeMap::new();
        for app in config.apps.keys() {
            let key = app.trim().to_lowercase();
            let platform = platform_for(&key)?;
            let engine = Engine::new(
                key.clone(),
                Arc::clone(&config),
                platform,
                services.clone(),
                token.child_token(),
            );
            info!("Registered engine for {}", key);
            engines.insert(key, Arc::new(Mutex::new(engine)));
        }

        Ok(Self {
            engines,
            arbiter,
            token,
        })
    }

    pub fn apps(&self) -> impl Iterator<Item = &str> {
        self.engines.keys().map(String::as_str)
    }

    pub fn engine(&self, app: &str) -> Option<Arc<Mutex<Engine>>> {
        self.engines.get(&app.trim().to_lowercase()).cloned()
    }

    pub fn arbiter(&self) -> &Arc<InputArbiter> {
        &self.arbiter
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn route(&self, comando: &Comando) -> Result<Arc<Mutex<Engine>>, EngineError> {
        let app = comando
            .app()
            .ok_or_else(|| EngineError::InvalidCommand("Comando has no App".to_string()))?;
        self.engine(&app)
            .ok_or_else(|| EngineError::InvalidCommand(format!("no engine registered for app '{app}'")))
    }

    /// Queues a Comando on its app's engine without running it.
    pub async fn submit(&self, comando: Comando) -> Result<(), EngineError> {
        let engine = self.route(&comando)?;
        let mut engine = engine.lock().await;
        engine.add_operation(comando).await
    }

    /// Queues a Comando and drives its engine until idle.
    #[instrument(skip(self, comando))]
    pub async fn dispatch(&self, comando: Comando) -> Result<(), EngineError> {
        let engine = self.route(&comando)?;
        let mut engine = engine.lock().await;
        engine.add_operation(comando).await?;
        engine.run().await
    }

    /// Signals every engine to stop at its next wait.
    pub fn shutdown(&self) {
        info!("Shutting down {} engines", self.engines.len());
        self.token.cancel();
    }
}
