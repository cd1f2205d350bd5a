//! Process-level runtime: configuration, logging and the dispatcher lifecycle.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use courier_runtime::CourierRuntime;
//!
//! #[tokio::main]
//! async fn main() -> courier_runtime::RuntimeResult<()> {
//!     // Loads courier.toml from the current directory
//!     let runtime = CourierRuntime::new()?;
//!
//!     let _audit = runtime.dispatcher().register::<Audit>()?;
//!
//!     // Runs until Ctrl+C, then shuts the dispatcher down
//!     runtime.run_until_signal().await
//! }
//! ```

use std::future::Future;

use courier_core::{Dispatcher, DispatcherBuilder};
use tokio::signal;
use tracing::{debug, info};

use crate::config::{ConfigLoader, CourierConfig, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

type Customize = Box<dyn FnOnce(DispatcherBuilder) -> DispatcherBuilder>;

/// Owns the configured [`Dispatcher`] for the lifetime of the process.
pub struct CourierRuntime {
    config: CourierConfig,
    dispatcher: Dispatcher,
}

impl CourierRuntime {
    /// Creates a runtime from the configuration found in the current
    /// directory (or defaults), with environment overrides.
    ///
    /// Without `dispatch.workers`, this must be called inside a tokio runtime.
    pub fn new() -> RuntimeResult<Self> {
        Self::builder().build()
    }

    /// Creates a runtime builder for custom configuration.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from an already loaded configuration.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid, a configured marker has no
    /// binding, or the dispatcher cannot start its workers.
    pub fn from_config(config: &CourierConfig) -> RuntimeResult<Self> {
        Self::from_config_with(config, None)
    }

    fn from_config_with(config: &CourierConfig, customize: Option<Customize>) -> RuntimeResult<Self> {
        validate_config(config)?;
        logging::init_from_config(&config.logging);

        let dispatch = &config.dispatch;
        let mut builder = Dispatcher::builder()
            .thread_name(dispatch.thread_name.clone())
            .completion_capacity(dispatch.completion_capacity);
        if let Some(workers) = dispatch.workers {
            builder = builder.workers(workers);
        }
        if dispatch.builtins {
            builder = builder.with_builtins();
        }
        if let Some(customize) = customize {
            builder = customize(builder);
        }
        for marker in &dispatch.global_markers {
            builder = builder.global_marker(marker.clone());
        }
        let dispatcher = builder.build()?;

        for (prefix, markers) in &dispatch.module_markers {
            dispatcher.add_module_markers(prefix.clone(), markers.iter().cloned())?;
            debug!(prefix = %prefix, markers = markers.len(), "Module markers installed");
        }

        info!(
            log_level = %config.logging.level,
            workers = ?dispatch.workers,
            builtins = dispatch.builtins,
            "Runtime initialized from configuration"
        );

        Ok(Self {
            config: config.clone(),
            dispatcher,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    /// Returns the dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Runs until Ctrl+C (or SIGTERM on unix), then shuts the dispatcher down.
    ///
    /// # Errors
    ///
    /// Fails if the signal handlers cannot be installed; the dispatcher is
    /// shut down in that case too.
    pub async fn run_until_signal(&self) -> RuntimeResult<()> {
        info!("Courier runtime is now running. Press Ctrl+C to stop.");
        let waited = wait_for_signal().await;
        self.shutdown().await;
        waited
    }

    /// Runs until `shutdown` completes, then shuts the dispatcher down.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        shutdown.await;
        self.shutdown().await;
    }

    /// Shuts the dispatcher down and waits for in-flight chains.
    pub async fn shutdown(&self) {
        info!("Stopping Courier runtime");
        self.dispatcher.shutdown().await;
        info!("Runtime stopped");
    }
}

async fn wait_for_signal() -> RuntimeResult<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .map_err(RuntimeError::Signal)?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.map_err(RuntimeError::Signal)?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.map_err(RuntimeError::Signal)?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for creating a `CourierRuntime` with custom configuration.
///
/// ```rust,ignore
/// let runtime = CourierRuntime::builder()
///     .config_file("config/courier.toml")
///     .profile("production")
///     .bindings(|b| b.decorator(RateLimit::default()))
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    customize: Option<Customize>,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder searching the current directory.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            customize: None,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: CourierConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Adds application decorator and observer bindings to the dispatcher,
    /// next to the configured built-ins.
    pub fn bindings<F>(mut self, customize: F) -> Self
    where
        F: FnOnce(DispatcherBuilder) -> DispatcherBuilder + 'static,
    {
        self.customize = Some(Box::new(customize));
        self
    }

    /// Loads the configuration and builds the runtime.
    pub fn build(self) -> RuntimeResult<CourierRuntime> {
        let config = self.config_loader.load()?;
        CourierRuntime::from_config_with(&config, self.customize)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use courier_core::prelude::*;

    use super::*;
    use crate::config::ConfigError;

    struct Ping;
    impl_event!(Ping);

    #[derive(Default)]
    struct Counter {
        seen: AtomicUsize,
    }

    impl Receiver for Counter {
        fn declare(table: &mut ReceiverTable<Self>) {
            table.on("on_ping", |this: Arc<Self>, _: Received<Ping>| async move {
                this.seen.fetch_add(1, Ordering::SeqCst);
            });
        }
    }

    struct Veto;

    impl Decorator for Veto {
        fn marker_kind(&self) -> MarkerKind {
            MarkerKind::from_static("veto")
        }

        fn wrap(&self, _ctx: WrapContext) -> Option<Work> {
            None
        }
    }

    #[tokio::test]
    async fn test_runtime_from_default_config() {
        let runtime = CourierRuntime::from_config(&CourierConfig::default()).unwrap();
        let counter = Arc::new(Counter::default());
        let _registration = runtime.dispatcher().register_instance(counter.clone()).unwrap();

        let report = runtime.dispatcher().fire_and_wait(Ping).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(counter.seen.load(Ordering::SeqCst), 1);

        runtime.run_until(async {}).await;
        assert!(runtime.dispatcher().is_shut_down());
    }

    #[tokio::test]
    async fn test_runtime_rejects_invalid_config() {
        let mut config = CourierConfig::default();
        config.dispatch.workers = Some(0);
        let result = CourierRuntime::from_config(&config);
        assert!(matches!(
            result,
            Err(RuntimeError::Config(ConfigError::ValidationError { .. }))
        ));
    }

    #[tokio::test]
    async fn test_runtime_rejects_unbound_global_marker() {
        let mut config = CourierConfig::default();
        config.dispatch.global_markers.push(Marker::new("missing"));
        let result = CourierRuntime::from_config(&config);
        assert!(matches!(result, Err(RuntimeError::Dispatch(_))));
    }

    #[tokio::test]
    async fn test_builder_installs_custom_bindings_and_module_markers() {
        let dir = tempfile::tempdir().unwrap();
        let mut overrides = CourierConfig::default();
        overrides
            .dispatch
            .module_markers
            .insert("courier_runtime::runtime".to_string(), vec![Marker::new("veto")]);

        let runtime = CourierRuntime::builder()
            .search_path(dir.path())
            .without_env()
            .merge(overrides)
            .bindings(|b| b.decorator(Veto))
            .build()
            .unwrap();

        let counter = Arc::new(Counter::default());
        let _registration = runtime.dispatcher().register_instance(counter.clone()).unwrap();
        let described = runtime.dispatcher().describe();
        assert_eq!(described[0].decorators, vec!["@veto".to_string()]);

        let report = runtime.dispatcher().fire_and_wait(Ping).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(counter.seen.load(Ordering::SeqCst), 0);

        runtime.shutdown().await;
    }
}
