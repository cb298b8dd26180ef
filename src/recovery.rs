//! Crash-recovery sweeping
//!
//! A background loop that reconciles state left inconsistent by a crashed
//! orchestrator instance or a worker that stopped heartbeating: tasks stuck
//! `running` past their timeout get marked `timeout` (and retried/failed
//! through the normal path), and tasks stuck `queued` past a grace period
//! get re-published in case the original publish was lost. A `tokio::spawn`
//! loop plus a `watch::Receiver<bool>` shutdown signal, rather than a
//! `JoinHandle` the caller has to poll.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{instrument, warn};

use crate::error::OrchestratorError;
use crate::orchestrator::WorkflowOrchestrator;
use crate::repository::TaskRepository;
use crate::workqueue::{TaskReadyMessage, WorkQueue};

/// Tuning for the recovery sweep
#[derive(Debug, Clone, Copy)]
pub struct RecoveryConfig {
    /// How often the sweep runs
    pub interval: Duration,
    /// A `running` task is considered stale after this long past its `started_at`
    pub running_grace_period: Duration,
    /// A `queued` task is considered stale after this long without progress
    pub queued_grace_period: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            running_grace_period: Duration::from_secs(300),
            queued_grace_period: Duration::from_secs(60),
        }
    }
}

/// Background sweeper, one per orchestrator deployment
pub struct RecoverySweeper {
    tasks: Arc<dyn TaskRepository>,
    orchestrator: Arc<WorkflowOrchestrator>,
    queue: Arc<dyn WorkQueue>,
    config: RecoveryConfig,
}

impl RecoverySweeper {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        orchestrator: Arc<WorkflowOrchestrator>,
        queue: Arc<dyn WorkQueue>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            tasks,
            orchestrator,
            queue,
            config,
        }
    }

    /// Spawn the sweep loop; drop the returned sender (or send `true`) to stop it
    pub fn spawn(self: Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep_once().await {
                            warn!(error = %err, "recovery sweep failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        shutdown_tx
    }

    /// One pass: reclaim stale running tasks, then requeue stale queued tasks
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<(), OrchestratorError> {
        let running_cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(self.config.running_grace_period)
                .unwrap_or(chrono::Duration::zero());
        for task in self.tasks.find_stale_running(running_cutoff).await? {
            warn!(task_id = %task.id, workflow_id = %task.workflow_id, "reclaiming timed-out task");
            match self
                .orchestrator
                .on_task_timeout(task.workflow_id, task.id)
                .await
            {
                Ok(()) | Err(OrchestratorError::Entity(_)) => {}
                Err(err) if WorkflowOrchestrator::is_not_found(&err) => {}
                Err(err) => return Err(err),
            }
        }

        let queued_cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(self.config.queued_grace_period)
                .unwrap_or(chrono::Duration::zero());
        for task in self.tasks.find_stale_queued(queued_cutoff).await? {
            warn!(task_id = %task.id, workflow_id = %task.workflow_id, "re-publishing stale queued task");
            self.queue
                .publish(TaskReadyMessage {
                    task_id: task.id,
                    workflow_id: task.workflow_id,
                    attempt: task.retry_count,
                })
                .await?;
        }

        Ok(())
    }
}
