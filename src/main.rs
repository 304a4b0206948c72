//! Slabpool soak driver - Entry Point
//!
//! Runs a concurrent allocate/verify/dispose workload against one pool while
//! a periodic task plays the external shrink policy.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{error, info};

use slabpool::soak::Soak;
use slabpool::{Config, SlabPool, VERSION};

/// Application entry point
#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    // Load configuration, or run with defaults
    let config = match &config_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::from_toml("")?,
    };

    // Initialize tracing/logging
    slabpool::util::init_tracing(&config.logging)?;

    info!(
        version = VERSION,
        config_path = ?config_path,
        "Starting slabpool soak"
    );

    let pool = SlabPool::new(&config.pool).context("Failed to create slab pool")?;

    // Initialize metrics if enabled
    if config.metrics.enabled {
        slabpool::metrics::init_metrics(&config.metrics, pool.clone())?;
        info!(
            bind_addr = %config.metrics.bind_addr,
            "Metrics endpoint started"
        );
    }

    let soak = Arc::new(Soak::new(pool.clone(), &config.soak));
    let workers = config.soak.effective_workers();
    let started = Instant::now();

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let soak = soak.clone();
            let seed = rand::random::<u64>();
            tokio::task::spawn_blocking(move || soak.run_worker(worker, seed))
        })
        .collect();

    let shrinker = tokio::spawn(shrink_policy(
        pool.clone(),
        Duration::from_millis(config.soak.shrink_interval_ms),
    ));

    info!(
        workers,
        slab_capacity = pool.slab_capacity(),
        duration_secs = config.soak.duration_secs,
        "Soak running"
    );

    tokio::select! {
        _ = run_for(config.soak.duration_secs) => {
            info!("Soak duration elapsed");
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping workers...");
        }
    }

    soak.stop();
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Soak worker panicked");
        }
    }
    shrinker.abort();

    soak.drain()?;
    while pool.shrink() {}

    let report = soak.report(started.elapsed());
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.mismatches > 0 {
        anyhow::bail!("{} buffers were overwritten while live", report.mismatches);
    }

    info!("Soak finished");
    Ok(())
}

/// Periodically give surplus slabs back
async fn shrink_policy(pool: SlabPool, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        pool.shrink();
    }
}

/// Sleep for the configured run time, or forever when it is zero
async fn run_for(duration_secs: u64) {
    if duration_secs == 0 {
        std::future::pending::<()>().await;
    } else {
        tokio::time::sleep(Duration::from_secs(duration_secs)).await;
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
