//! Compiled, immutable runtime configuration.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono_tz::Tz;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::error::ConfigError;
use super::types::DispatchConfig;
use crate::content::{build_renderer, ContentRenderer, TransformError};
use crate::dispatch::HandleCode;
use crate::endpoint::{Endpoint, EndpointRegistry};
use crate::retry::{RetryScheduler, RetryStore};
use crate::router::{PatternMatcher, RouteDecision, RouteTable};

/// Everything the dispatcher needs, built once from a [`DispatchConfig`].
pub struct Configuration {
    matcher: PatternMatcher,
    routes: RouteTable,
    endpoints: Vec<Arc<Endpoint>>,
    renderer: Arc<dyn ContentRenderer>,
    timezone: Tz,
    handle_code: HandleCode,
    network: OnceCell<()>,
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("patterns", &self.matcher.len())
            .field("routes", &self.routes.len())
            .field("endpoints", &self.endpoints)
            .field("renderer", &self.renderer.name())
            .field("timezone", &self.timezone)
            .field("handle_code", &self.handle_code)
            .finish()
    }
}

impl Configuration {
    /// Compile patterns, resolve endpoints and create retry directories.
    pub fn build(
        config: &DispatchConfig,
        registry: &EndpointRegistry,
        scheduler: &RetryScheduler,
    ) -> Result<Self, ConfigError> {
        let handle_code = HandleCode::try_from(config.return_value)?;
        let timezone: Tz = config.content.timezone.parse().map_err(|_| {
            ConfigError::invalid(
                "content.timezone",
                format!("unknown zone '{}'", config.content.timezone),
            )
        })?;

        let matcher = PatternMatcher::compile(&config.patterns)?;
        let routes = RouteTable::build(&config.mappings, config.endpoints.len())?;
        let renderer = build_renderer(&config.content.renderer)?;

        let mut transports = Vec::with_capacity(config.endpoints.len());
        for (index, endpoint) in config.endpoints.iter().enumerate() {
            transports.push(registry.build_transport(index, &endpoint.transport)?);
        }

        let mut endpoints = Vec::with_capacity(transports.len());
        for ((index, endpoint), transport) in config.endpoints.iter().enumerate().zip(transports) {
            let dir = config.retry_root.join(format!("endpoint_{index}"));
            let store =
                RetryStore::open(dir).map_err(|source| ConfigError::RetryDir { index, source })?;

            debug!(
                endpoint = index,
                kind = %transport.kind(),
                retry_dir = %store.dir().display(),
                "endpoint configured"
            );
            endpoints.push(Arc::new(Endpoint::new(
                index,
                transport,
                store,
                endpoint.retry_interval,
                scheduler.clone(),
            )));
        }

        info!(
            patterns = matcher.len(),
            endpoints = endpoints.len(),
            routes = routes.len(),
            renderer = renderer.name(),
            handle_code = handle_code.value(),
            "configuration built"
        );

        Ok(Self {
            matcher,
            routes,
            endpoints,
            renderer,
            timezone,
            handle_code,
            network: OnceCell::new(),
        })
    }

    /// Match and route a message.
    pub fn decide(&self, body: &str, destination: &str) -> RouteDecision {
        RouteDecision::decide(&self.matcher, &self.routes, body, destination)
    }

    pub fn matcher(&self) -> &PatternMatcher {
        &self.matcher
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn endpoint(&self, index: usize) -> Option<&Arc<Endpoint>> {
        self.endpoints.get(index)
    }

    pub fn renderer(&self) -> &Arc<dyn ContentRenderer> {
        &self.renderer
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn handle_code(&self) -> HandleCode {
        self.handle_code
    }

    /// Initialize the renderer and every endpoint, once.
    ///
    /// A renderer failure is returned and may be retried by calling again.
    /// Endpoint failures are only logged: each endpoint retries its own
    /// initialization on the next delivery.
    pub async fn init_network_resources(&self) -> Result<(), TransformError> {
        self.network
            .get_or_try_init(|| async {
                self.renderer.init_network_resources().await?;

                for endpoint in &self.endpoints {
                    if let Err(e) = endpoint.init_network_resources().await {
                        warn!(
                            endpoint = endpoint.index(),
                            error = %e,
                            "endpoint network init failed; will retry on delivery"
                        );
                    }
                }

                info!("network resources initialized");
                Ok(())
            })
            .await
            .map(|_| ())
    }

    /// Start the periodic retry task of every endpoint.
    pub fn start_retry_tasks(&self) {
        for endpoint in &self.endpoints {
            endpoint.start_retry_task();
        }
    }

    /// Stop the periodic retry task of every endpoint.
    pub fn stop_retry_tasks(&self) {
        for endpoint in &self.endpoints {
            endpoint.stop_retry_task();
        }
    }
}

/// Whether a [`ConfigGate::load`] call installed a configuration.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    Loaded(Arc<Configuration>),
    /// A configuration was already installed; the loader did not run.
    AlreadyLoaded(Arc<Configuration>),
}

impl LoadOutcome {
    pub fn configuration(&self) -> &Arc<Configuration> {
        match self {
            LoadOutcome::Loaded(c) | LoadOutcome::AlreadyLoaded(c) => c,
        }
    }

    pub fn into_configuration(self) -> Arc<Configuration> {
        match self {
            LoadOutcome::Loaded(c) | LoadOutcome::AlreadyLoaded(c) => c,
        }
    }

    pub fn is_already_loaded(&self) -> bool {
        matches!(self, LoadOutcome::AlreadyLoaded(_))
    }
}

/// Load-once holder for the process configuration.
#[derive(Debug, Default)]
pub struct ConfigGate {
    slot: Mutex<Option<Arc<Configuration>>>,
}

impl ConfigGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `build` and install its result, unless a configuration is
    /// already installed. Concurrent callers are serialized; a failed
    /// build leaves the gate empty.
    pub fn load<F>(&self, build: F) -> Result<LoadOutcome, ConfigError>
    where
        F: FnOnce() -> Result<Configuration, ConfigError>,
    {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = slot.as_ref() {
            debug!("configuration already loaded");
            return Ok(LoadOutcome::AlreadyLoaded(existing.clone()));
        }

        let configuration = Arc::new(build()?);
        *slot = Some(configuration.clone());
        Ok(LoadOutcome::Loaded(configuration))
    }

    /// Installed configuration, if any.
    pub fn get(&self) -> Option<Arc<Configuration>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.get().is_some()
    }
}
