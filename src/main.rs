use std::sync::Arc;

use albkeeper::{
    certificates::{sources_from_config, CertificateStore},
    cli::Cli,
    config::load_config,
    observability::{init_observability, log_config_info},
    provider::{CloudProvisioner, EndpointDefaults, MemoryCloud, MemoryOrchestrator, OrchestratorClient},
    services::ReconciliationDriver,
    APP_NAME, VERSION,
};
use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists; must happen before configuration is read
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("invalid configuration after command line overrides")?;

    init_observability(&config.observability).await.context("failed to initialize observability")?;
    info!(app_name = APP_NAME, version = VERSION, "Starting albkeeper");
    log_config_info(&config);

    let store = Arc::new(CertificateStore::new(sources_from_config(&config.certificates)));
    match store.refresh().await {
        Ok(count) => info!(certificates = count, "Loaded certificates"),
        Err(e) => warn!(error = %e, "Initial certificate refresh failed, starting with an empty snapshot"),
    }
    let refresh_task = store.clone().spawn_refresh(config.controller.cert_refresh_interval());

    let defaults = EndpointDefaults::from(&config.controller);
    let orchestrator: Arc<dyn OrchestratorClient> = match &config.controller.endpoints_file {
        Some(path) => Arc::new(MemoryOrchestrator::from_file(path, defaults)),
        None => {
            warn!("No endpoints file configured, the controller will see no endpoints");
            Arc::new(MemoryOrchestrator::new())
        }
    };
    let cloud: Arc<dyn CloudProvisioner> = Arc::new(MemoryCloud::new());

    let driver = ReconciliationDriver::new(orchestrator, cloud, store, config.controller.clone());

    if cli.once {
        let report = driver.run_pass().await;
        report.log_summary();
    } else {
        driver
            .run(async {
                match signal::ctrl_c().await {
                    Ok(()) => info!("Shutdown signal received"),
                    Err(e) => {
                        error!(error = %e, "Failed to listen for shutdown signal");
                        std::future::pending::<()>().await;
                    }
                }
            })
            .await;
    }

    refresh_task.abort();
    info!("albkeeper stopped");
    Ok(())
}
