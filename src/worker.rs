use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::submission::Orchestrator;

/// Spawn the background drain loop. It runs one queue pass every `interval`
/// until `shutdown` flips to true.
pub fn spawn(
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run(orchestrator, interval, shutdown))
}

async fn run(
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("Queue drain worker started (every {}s)", interval.as_secs());

    loop {
        if *shutdown.borrow() {
            break;
        }

        if let Err(e) = orchestrator.drain().await {
            tracing::error!("Queue drain failed: {e}");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {}
        }
    }

    tracing::info!("Queue drain worker stopped");
}
