//! Watch remote jobs and log their status transitions.
//!
//! Usage: `vup-watch <job-id>...`

use std::sync::Arc;

use tracing::{error, info, warn};

use vup_client::{
    init_tracing, HttpStatusSource, RefreshConfig, RefreshError, RefreshManager, StatusApiConfig,
    TransitionDelegate,
};
use vup_media::Dispatcher;
use vup_models::{RemoteJobId, RemoteStatus};

struct LogDelegate;

impl TransitionDelegate for LogDelegate {
    fn on_transition(&self, job: &RemoteJobId, old: RemoteStatus, new: RemoteStatus) {
        info!(job_id = %job, old = %old, new = %new, "Status transition");
    }

    fn on_failure(&self, job: &RemoteJobId, error: &RefreshError) {
        error!(job_id = %job, error = %error, "Job failed");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("vup=info");

    let jobs: Vec<RemoteJobId> = std::env::args()
        .skip(1)
        .map(RemoteJobId::from_string)
        .collect();
    if jobs.is_empty() {
        return Err(anyhow::anyhow!("usage: vup-watch <job-id>..."));
    }

    let api = StatusApiConfig::from_env()?;
    let config = RefreshConfig::from_env();
    info!("Refresh config: {:?}", config);

    let source = HttpStatusSource::new(&api)?;
    let manager = RefreshManager::new(
        Arc::new(source),
        Arc::new(LogDelegate),
        Dispatcher::spawn(),
        config,
    );

    let tracked = manager.track_all(jobs);
    info!(tracked, "Watching remote jobs");
    manager.start();

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    let remaining = manager.tracked();
    if !remaining.is_empty() {
        warn!(count = remaining.len(), "Jobs still pending at shutdown");
    }
    manager.shutdown();
    Ok(())
}
