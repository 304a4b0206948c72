//! Prometheus metrics exporter
//!
//! HTTP endpoint for Prometheus scraping.

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use super::counters::{MetricsSnapshot, METRICS};
use crate::config::MetricsConfig;
use crate::pool::SlabPool;

/// Initialize the Prometheus metrics exporter
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(config: &MetricsConfig, pool: SlabPool) -> Result<()> {
    // Register metric descriptions
    describe_counter!("slabpool_allocations_total", "Buffers handed out");
    describe_counter!("slabpool_zero_length_allocations_total", "Zero-length buffers handed out");
    describe_counter!("slabpool_fast_path_hits_total", "Allocations served by the single-slab fast path");
    describe_counter!("slabpool_bytes_allocated_total", "Bytes handed out");
    describe_counter!("slabpool_allocation_failures_total", "Rejected allocation requests");
    describe_counter!("slabpool_releases_total", "Regions returned to their slab");
    describe_counter!("slabpool_release_failures_total", "Failed region releases");
    describe_counter!("slabpool_growth_events_total", "Times the pool grew");
    describe_counter!("slabpool_slabs_created_total", "Slabs created");
    describe_counter!("slabpool_slabs_removed_total", "Slabs removed by shrink");
    describe_gauge!("slabpool_slabs", "Slabs currently in the pool");
    describe_gauge!("slabpool_bytes_reserved", "Bytes currently reserved across slabs");

    // Build and install the Prometheus exporter
    PrometheusBuilder::new()
        .with_http_listener(config.bind_addr)
        .install()?;

    // Start background task to sync atomic counters to metrics crate
    tokio::spawn(sync_metrics_task(pool));

    Ok(())
}

/// Background task that periodically syncs our atomic counters to the metrics crate
async fn sync_metrics_task(pool: SlabPool) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));

    let mut last_snapshot = METRICS.snapshot();

    loop {
        interval.tick().await;

        let snapshot = METRICS.snapshot();
        publish_deltas(&last_snapshot, &snapshot);

        let stats = pool.stats();
        gauge!("slabpool_slabs").set(stats.slab_count as f64);
        gauge!("slabpool_bytes_reserved").set(stats.bytes_reserved as f64);

        last_snapshot = snapshot;
    }
}

fn publish_deltas(last: &MetricsSnapshot, now: &MetricsSnapshot) {
    let deltas = [
        ("slabpool_allocations_total", last.allocations, now.allocations),
        (
            "slabpool_zero_length_allocations_total",
            last.zero_length_allocations,
            now.zero_length_allocations,
        ),
        ("slabpool_fast_path_hits_total", last.fast_path_hits, now.fast_path_hits),
        ("slabpool_bytes_allocated_total", last.bytes_allocated, now.bytes_allocated),
        (
            "slabpool_allocation_failures_total",
            last.allocation_failures,
            now.allocation_failures,
        ),
        ("slabpool_releases_total", last.releases, now.releases),
        ("slabpool_release_failures_total", last.release_failures, now.release_failures),
        ("slabpool_growth_events_total", last.growth_events, now.growth_events),
        ("slabpool_slabs_created_total", last.slabs_created, now.slabs_created),
        ("slabpool_slabs_removed_total", last.slabs_removed, now.slabs_removed),
    ];

    for (name, before, after) in deltas {
        let delta = after.saturating_sub(before);
        if delta > 0 {
            counter!(name).increment(delta);
        }
    }
}
