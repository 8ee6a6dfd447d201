//! Inference scheduler binary.

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nexus_scheduler::{Scheduler, SchedulerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nexus=info,hyper=warn,reqwest=warn"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting nexus-scheduler");

    // Load configuration
    let config = match SchedulerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Scheduler config: workers={}, queue_capacity={}, executor={}",
        config.worker.pool_size,
        config.queue.capacity,
        config.executor.kind.as_str()
    );

    // Initialize metrics
    if let Some(addr) = config.metrics_addr {
        match PrometheusBuilder::new().with_http_listener(addr).install() {
            Ok(()) => info!("Prometheus metrics listening on http://{}/metrics", addr),
            Err(e) => {
                error!("Failed to install Prometheus exporter: {}", e);
                std::process::exit(1);
            }
        }
    }

    let cameras_file = config.cameras_file.clone();
    let stats_interval = config.stats_interval;

    let scheduler = match Scheduler::builder(config).build() {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to start scheduler: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(path) = cameras_file {
        if let Err(e) = scheduler.load_cameras(&path).await {
            error!("Failed to load cameras from {}: {}", path.display(), e);
            std::process::exit(1);
        }
        let started = scheduler.start_enabled_cameras();
        info!("Started {} cameras", started);
    }

    // Periodic stats line
    let mut ticker = (!stats_interval.is_zero()).then(|| tokio::time::interval(stats_interval));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            _ = tick(&mut ticker) => log_stats(&scheduler),
        }
    }

    if let Err(e) = scheduler.shutdown().await {
        warn!("Shutdown incomplete: {}", e);
    }

    info!("Scheduler shutdown complete");
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn log_stats(scheduler: &Scheduler) {
    let stats = scheduler.stats();
    let streaming = stats
        .cameras
        .iter()
        .filter(|c| c.state.is_healthy())
        .count();
    info!(
        queue_depth = stats.queue.depth,
        running = stats.queue.running,
        utilization = stats.workers.utilization,
        cameras = stats.cameras.len(),
        streaming,
        "Scheduler stats"
    );
    if let Ok(json) = serde_json::to_string(&stats) {
        debug!(stats = %json, "Scheduler stats detail");
    }
}
