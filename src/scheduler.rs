use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info};

/// Periodic unit of work. A tick runs to completion before the next one is
/// scheduled, so ticks of the same job never overlap.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    async fn tick(&self) -> anyhow::Result<()>;
}

pub type ShutdownSignal = watch::Receiver<bool>;

pub fn shutdown_channel() -> (watch::Sender<bool>, ShutdownSignal) {
    watch::channel(false)
}

/// Resolves once shutdown is requested or the sender is gone.
pub async fn wait_for_shutdown(shutdown: &mut ShutdownSignal) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Sleeps for `duration` unless shutdown comes first. Returns `true` when
/// shutdown was requested.
pub async fn sleep_or_shutdown(duration: Duration, shutdown: &mut ShutdownSignal) -> bool {
    let interrupted = tokio::select! {
        _ = sleep(duration) => false,
        _ = wait_for_shutdown(shutdown) => true,
    };
    interrupted || *shutdown.borrow()
}

/// Runs `job` every `interval` until shutdown. Shutdown is only observed
/// between ticks; an in-flight tick always finishes.
pub async fn run_job(job: Arc<dyn Job>, interval: Duration, mut shutdown: ShutdownSignal) {
    info!(job = job.name(), interval_secs = interval.as_secs(), "Starting job");

    loop {
        if *shutdown.borrow() {
            break;
        }

        if let Err(e) = job.tick().await {
            error!(job = job.name(), error = %e, "Job tick failed");
        }

        if sleep_or_shutdown(interval, &mut shutdown).await {
            break;
        }
    }

    info!(job = job.name(), "Job stopped");
}
