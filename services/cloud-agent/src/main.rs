//! vmcloud cloud agent
//!
//! Tracks the instances of one image and keeps their records in step with
//! the virtualization platform.
//!
//! ## Architecture
//!
//! - **Provider**: Fetches remote VMs by instance name (mock for now)
//! - **Image Pool**: Owns the reconciled instance records
//! - **Scheduler**: Polls VMs, drives destroy tasks, reports status changes

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vmcloud_agent::{Config, MockProvider, Scheduler, SchedulerConfig};
use vmcloud_connector::mock::MockVm;
use vmcloud_reconcile::ImagePool;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting vmcloud cloud agent");
    info!(
        image_id = %config.image_id,
        instances = config.instances.len(),
        reconcile_interval_secs = config.reconcile_interval.as_secs(),
        "Configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Seed the mock provider with one powered-off VM per configured instance
    let provider = Arc::new(MockProvider::new());
    let pool = Arc::new(ImagePool::new(config.image_id.clone()));
    for (index, name) in config.instances.iter().enumerate() {
        provider
            .insert(MockVm::new(&format!("vm-{}", index + 1), name))
            .await;
        if let Err(e) = pool.provision(name, None).await {
            warn!(instance_id = %name, error = %e, "Skipping instance");
        }
    }

    let scheduler = Scheduler::new(pool, provider, SchedulerConfig::from(&config));
    let scheduler_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            scheduler.run(shutdown_rx).await;
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = scheduler_handle => {
            info!("Scheduler exited");
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;

    info!("Cloud agent shutdown complete");
    Ok(())
}
