//! Startup self-check: configuration, model server reachability, camera file.

use nexus_executor::{ExecutorKind, RemoteExecutor};
use nexus_scheduler::SchedulerConfig;
use nexus_stream::{load_cameras, SourceKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = SchedulerConfig::from_env()?;
    println!(
        "nexus-selfcheck: workers={} queue_capacity={} executor={}",
        config.worker.pool_size,
        config.queue.capacity,
        config.executor.kind.as_str()
    );

    if config.executor.kind == ExecutorKind::Remote {
        ensure_model_server(&config).await?;
    }
    if let Some(path) = &config.cameras_file {
        ensure_cameras(path, config.stream.max_cameras).await?;
    }

    println!("nexus-selfcheck: ok");
    Ok(())
}

async fn ensure_model_server(config: &SchedulerConfig) -> anyhow::Result<()> {
    let executor = RemoteExecutor::new(config.executor.remote.clone())?;
    if !executor.health_check().await {
        return Err(anyhow::anyhow!(
            "model server at {} is not healthy",
            executor.base_url()
        ));
    }
    println!("nexus-selfcheck: model server {} healthy", executor.base_url());
    Ok(())
}

async fn ensure_cameras(path: &std::path::Path, max_cameras: usize) -> anyhow::Result<()> {
    let cameras = load_cameras(path)
        .await
        .map_err(|e| anyhow::anyhow!("camera file {}: {}", path.display(), e))?;
    for camera in &cameras {
        SourceKind::for_url(&camera.url)
            .map_err(|e| anyhow::anyhow!("camera {}: {}", camera.id, e))?;
    }
    if cameras.len() > max_cameras {
        return Err(anyhow::anyhow!(
            "{} cameras configured, limit is {}",
            cameras.len(),
            max_cameras
        ));
    }
    println!("nexus-selfcheck: {} cameras ok", cameras.len());
    Ok(())
}
