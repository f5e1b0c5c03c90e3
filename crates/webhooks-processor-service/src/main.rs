//! # Webhooks Processor Service
//!
//! Binary entry point of the security event webhooks processor.
//!
//! This executable:
//! - Loads configuration from files and environment
//! - Initializes structured logging
//! - Builds the providers, the event store client and the filesystem stores
//! - Runs the webhook controller until SIGINT/SIGTERM, then stops every
//!   worker before exiting

mod settings;

use anyhow::Context;
use settings::{LoggingConfig, ServiceConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use webhooks_processor_core::adapters::{
    DependencyPoller, FilesystemDependencyStore, FilesystemWebhookStore,
};
use webhooks_processor_core::controller::{self, ControllerConfig};
use webhooks_processor_core::fetcher::HttpEventFetcher;
use webhooks_processor_core::providers::ProviderRegistry;

/// Exit code for missing, malformed or invalid configuration
const EXIT_CONFIGURATION: i32 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded = load_configuration();

    let default_logging = LoggingConfig::default();
    init_logging(loaded.as_ref().map(|c| &c.logging).unwrap_or(&default_logging));

    let service_config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load service configuration; aborting");
            std::process::exit(EXIT_CONFIGURATION);
        }
    };

    if let Err(e) = service_config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(EXIT_CONFIGURATION);
    }

    info!(
        webhooks_dir = %service_config.store.webhooks_dir.display(),
        event_store = %service_config.event_store.url,
        fetching_interval_seconds = service_config.controller.fetching_interval_seconds,
        "Starting webhooks processor"
    );

    run(service_config).await
}

// ============================================================================
// Bootstrap
// ============================================================================

/// Load configuration
///
/// Sources, later ones overriding earlier ones:
///  1. /etc/webhooks-processor/service.yaml
///  2. ./config/service.yaml
///  3. The file named by WP_CONFIG_FILE, required when set
///  4. Environment variables prefixed WP__, e.g.
///     WP__CONTROLLER__FETCHING_INTERVAL_SECONDS=30
fn load_configuration() -> anyhow::Result<ServiceConfig> {
    let mut builder = config::Config::builder()
        .add_source(
            config::File::with_name("/etc/webhooks-processor/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        )
        .add_source(
            config::File::with_name("config/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        );

    if let Ok(explicit_path) = std::env::var("WP_CONFIG_FILE") {
        if !explicit_path.is_empty() {
            builder = builder.add_source(
                config::File::with_name(&explicit_path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }
    }

    builder
        .add_source(config::Environment::with_prefix("WP").separator("__"))
        .build()
        .context("failed to build configuration")?
        .try_deserialize()
        .context("failed to deserialize service configuration")
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

// ============================================================================
// Run
// ============================================================================

async fn run(config: ServiceConfig) -> anyhow::Result<()> {
    let providers =
        ProviderRegistry::with_defaults(&config.providers).context("failed to create providers")?;
    info!(providers = ?providers, "Registered providers");

    let fetcher = HttpEventFetcher::new(&config.event_store)
        .context("failed to create event store client")?;
    let store = FilesystemWebhookStore::new(&config.store)
        .await
        .context("failed to open webhook store")?;
    let dependencies = FilesystemDependencyStore::new(&config.store.dependencies_dir);

    let controller_config =
        ControllerConfig::new(Arc::new(fetcher), Arc::new(dependencies), providers)
            .with_settings(&config.controller);

    let cancel = CancellationToken::new();
    let handle = controller::start(Arc::new(store), controller_config, cancel.clone());

    let poller = DependencyPoller::new(&config.store.dependencies_dir, config.store.poll_interval());
    let poller_task = tokio::spawn(poller.run(handle.dependency_events(), cancel.clone()));

    shutdown_signal().await;
    cancel.cancel();

    handle.join().await;
    if let Err(e) = poller_task.await {
        error!(error = %e, "Dependency poller failed");
    }

    info!("Webhooks processor stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), stopping all workers"),
        _ = terminate => info!("Received SIGTERM, stopping all workers"),
    }
}
