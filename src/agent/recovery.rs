//! Startup reconstruction of the record tree from the last checkpoint.
//!
//! Recovery runs exactly once, before the event loop starts draining the
//! queue, so nothing observes a half-rebuilt tree. In `Reconnect` mode
//! surviving executors are given a window to re-register over a fresh link;
//! in `Cleanup` mode every recovered executor is shut down immediately.
//!
//! Strict recovery turns any inconsistency (unreadable checkpoint, missing
//! run directory, an executor footprint the ledger cannot admit) into a
//! fatal error. Lax recovery logs, skips the damaged record, and keeps the
//! node in service.

use crate::config::RecoveryMode;
use crate::error::{AgentError, Result};
use crate::messages::{AgentEvent, ExecutorId, FrameworkId};
use crate::state::Framework;

use super::{Agent, RecoveryPhase};

impl Agent {
    pub async fn recover(&mut self, mode: RecoveryMode, strict: bool) -> Result<()> {
        if self.recovery != RecoveryPhase::Pending {
            return Err(AgentError::RecoveryAlreadyAttempted);
        }
        self.recovery = RecoveryPhase::InProgress;

        let store = self.checkpoint.clone();
        let loaded = tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| AgentError::Internal(format!("checkpoint load task failed: {}", e)))?;

        let snapshot = match loaded {
            Ok(snapshot) => snapshot,
            Err(e) if strict => {
                return Err(AgentError::Recovery(format!(
                    "cannot read checkpoint: {}",
                    e
                )))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot read checkpoint, starting clean");
                None
            }
        };

        let Some(snapshot) = snapshot else {
            tracing::info!("No checkpoint found, starting clean");
            self.recovery = RecoveryPhase::Done;
            return Ok(());
        };

        tracing::info!(
            mode = ?mode,
            strict,
            frameworks = snapshot.frameworks.len(),
            "Recovering from checkpoint"
        );
        self.agent_id = snapshot.agent_id.clone();

        let mut to_shutdown: Vec<(FrameworkId, ExecutorId)> = Vec::new();
        let mut any_awaiting = false;

        for framework_snapshot in &snapshot.frameworks {
            let mut framework = Framework::new(
                framework_snapshot.id.clone(),
                framework_snapshot.spec.clone(),
                framework_snapshot.scheduler_addr.clone(),
                self.config.clone(),
            );
            framework.shutting_down = framework_snapshot.shutting_down;

            for executor_snapshot in &framework_snapshot.executors {
                if !executor_snapshot.directory.exists() {
                    let detail = format!(
                        "executor {} run directory {} is missing",
                        executor_snapshot.id,
                        executor_snapshot.directory.display()
                    );
                    if strict {
                        return Err(AgentError::Recovery(detail));
                    }
                    tracing::warn!("{}, skipping executor", detail);
                    continue;
                }

                let mut executor = executor_snapshot
                    .restore(framework.id.clone(), self.config.max_completed_tasks_per_executor);

                // Re-admit the executor's full footprint: launched tasks are
                // carried on the record, queued specs are not.
                let mut footprint = executor.resources;
                for spec in executor.queued.values() {
                    footprint = footprint.add(&spec.resources);
                }
                if !self.ledger.reserve(&footprint) {
                    let detail = format!(
                        "executor {} footprint {} does not fit the agent's resources",
                        executor.id, footprint
                    );
                    if strict {
                        return Err(AgentError::Recovery(detail));
                    }
                    tracing::warn!("{}, skipping executor", detail);
                    continue;
                }

                match mode {
                    RecoveryMode::Reconnect => {
                        executor.awaiting_reregistration = true;
                        any_awaiting = true;
                    }
                    RecoveryMode::Cleanup => {
                        to_shutdown.push((framework.id.clone(), executor.id.clone()));
                    }
                }

                tracing::info!(
                    framework_id = %framework.id,
                    executor_id = %executor.id,
                    run_id = %executor.run_id,
                    launched = executor.launched.len(),
                    queued = executor.queued.len(),
                    "Recovered executor"
                );
                framework.restore_executor(executor);
            }

            if !framework.executors.is_empty() {
                self.frameworks.insert(framework.id.clone(), framework);
            }
        }

        self.recovery = RecoveryPhase::Done;

        for (framework_id, executor_id) in to_shutdown {
            self.shutdown_executor(&framework_id, &executor_id);
        }
        if any_awaiting {
            self.arm_timer(
                self.config.executor_reregister_timeout,
                AgentEvent::ReregisterTimeout,
            );
        }

        self.checkpoint_state();
        Ok(())
    }
}
