//! gpuyield daemon
//!
//! Runs one low-priority workload on every idle GPU and moves it out of the
//! way whenever another user claims GPUs through the HTTP API.

use anyhow::{Context, Result};
use clap::Parser;
use gpuyield_api::create_router;
use gpuyield_core::{
    parse_device_list, DaemonConfig, DeviceSet, InventoryConfig, InventorySourceKind, LogFormat,
    LoggingConfig,
};
use gpuyield_runtime::{ProcessLauncher, ProcessLauncherConfig};
use gpuyield_scheduler::{
    AllocationController, ControllerConfig, InventoryCache, InventoryRefresher, InventorySource,
    NvidiaSmiInventory, StaticInventory, UtilizationThresholds,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// gpuyieldd - run a workload on idle GPUs and yield them on demand
#[derive(Parser, Debug)]
#[command(name = "gpuyieldd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Shell command line of the workload to run
    #[arg(long)]
    command: Option<String>,

    /// TOML configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind the API server
    #[arg(long)]
    address: Option<String>,

    /// Port for the API server
    #[arg(long)]
    port: Option<u16>,

    /// Seconds between periodic inventory refreshes
    #[arg(long)]
    refresh_interval_secs: Option<u64>,

    /// Milliseconds to wait after killing the workload before reusing its GPUs
    #[arg(long)]
    settle_delay_ms: Option<u64>,

    /// Seconds to wait for a killed workload to exit
    #[arg(long)]
    kill_timeout_secs: Option<u64>,

    /// Inventory source (nvidia-smi, nvml, static)
    #[arg(long)]
    inventory: Option<InventorySourceKind>,

    /// Devices reported by the static inventory source (e.g. 0,1,2)
    #[arg(long, value_parser = parse_device_list)]
    static_devices: Option<DeviceSet>,

    /// A GPU is free only below this utilization percentage
    #[arg(long)]
    max_gpu_utilization: Option<f64>,

    /// A GPU is free only below this memory utilization percentage
    #[arg(long)]
    max_memory_utilization: Option<f64>,

    /// Environment variable used to pin the workload to its GPUs
    #[arg(long)]
    visible_devices_env: Option<String>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (text or json)
    #[arg(long)]
    log_format: Option<LogFormat>,
}

/// Merge the optional config file with command-line overrides
fn build_config(args: Args) -> Result<DaemonConfig> {
    let mut config = match &args.config {
        Some(path) => DaemonConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DaemonConfig::default(),
    };

    if let Some(command) = args.command {
        config.workload.command = Some(command);
    }
    if let Some(address) = args.address {
        config.api.address = address;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(secs) = args.refresh_interval_secs {
        config.inventory.refresh_interval_secs = secs;
    }
    if let Some(ms) = args.settle_delay_ms {
        config.workload.settle_delay_ms = ms;
    }
    if let Some(secs) = args.kill_timeout_secs {
        config.workload.kill_timeout_secs = secs;
    }
    if let Some(source) = args.inventory {
        config.inventory.source = source;
    }
    if let Some(devices) = args.static_devices {
        config.inventory.static_devices = devices.iter().map(|d| d.0).collect();
    }
    if let Some(max) = args.max_gpu_utilization {
        config.inventory.max_gpu_utilization = max;
    }
    if let Some(max) = args.max_memory_utilization {
        config.inventory.max_memory_utilization = max;
    }
    if let Some(env) = args.visible_devices_env {
        config.workload.visible_devices_env = env;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to set subscriber: {}", e))
}

fn build_inventory(config: &InventoryConfig) -> Result<Arc<dyn InventorySource>> {
    let thresholds = UtilizationThresholds {
        max_gpu_utilization: config.max_gpu_utilization,
        max_memory_utilization: config.max_memory_utilization,
    };

    match config.source {
        InventorySourceKind::NvidiaSmi => Ok(Arc::new(NvidiaSmiInventory::new(thresholds))),
        InventorySourceKind::Static => {
            Ok(Arc::new(StaticInventory::new(config.static_device_set())))
        }
        InventorySourceKind::Nvml => build_nvml_inventory(thresholds),
    }
}

#[cfg(feature = "nvml")]
fn build_nvml_inventory(thresholds: UtilizationThresholds) -> Result<Arc<dyn InventorySource>> {
    Ok(Arc::new(gpuyield_scheduler::NvmlInventory::new(thresholds)?))
}

#[cfg(not(feature = "nvml"))]
fn build_nvml_inventory(_thresholds: UtilizationThresholds) -> Result<Arc<dyn InventorySource>> {
    anyhow::bail!("gpuyieldd was built without the `nvml` feature")
}

/// Resolves on Ctrl+C, or SIGTERM on unix
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
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Received shutdown signal");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = build_config(Args::parse())?;
    init_logging(&config.logging)?;

    info!("Starting gpuyield daemon v{}", env!("CARGO_PKG_VERSION"));

    let inventory = Arc::new(InventoryCache::new(build_inventory(&config.inventory)?));
    let launcher = Arc::new(ProcessLauncher::new(ProcessLauncherConfig {
        visible_devices_env: config.workload.visible_devices_env.clone(),
        kill_timeout: config.workload.kill_timeout(),
        ..ProcessLauncherConfig::default()
    }));
    let controller = Arc::new(AllocationController::new(
        ControllerConfig {
            // Presence is checked by `DaemonConfig::validate`
            command: config.workload.command.clone().unwrap_or_default(),
            settle_delay: config.workload.settle_delay(),
        },
        inventory.clone(),
        launcher,
    ));

    if let Err(e) = controller.bootstrap().await {
        // Stay up: a later claim retries the launch on the devices left
        error!(error = %e, "Initial workload launch failed");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refresher = InventoryRefresher::new(inventory, config.inventory.refresh_interval())
        .spawn(shutdown_rx);

    let router = create_router(controller.clone());
    let addr: SocketAddr = format!("{}:{}", config.api.address, config.api.port)
        .parse()
        .context("Invalid listen address")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(
        addr = %addr,
        refresh_interval_secs = config.inventory.refresh_interval_secs,
        inventory = %config.inventory.source,
        "API server listening"
    );

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = refresher.await {
        warn!(error = %e, "Inventory refresher task failed");
    }
    if let Err(e) = controller.shutdown().await {
        warn!(error = %e, "Failed to stop workload during shutdown");
    }

    served.context("Server error")?;
    info!("gpuyield daemon stopped");
    Ok(())
}
