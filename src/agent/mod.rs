//! The agent state machine.
//!
//! One [`Agent`] per node, driven by a single mpsc event queue: master
//! messages, executor messages, isolator reports, timers, and async
//! completions all arrive as [`AgentEvent`]s and are processed strictly one
//! at a time. No record is ever touched from outside this loop, so the
//! framework/executor/task tree needs no locking.
//!
//! Recovery runs once, before the loop starts draining events; everything
//! sent earlier simply waits in the queue.

pub mod recovery;
pub mod snapshot;
pub mod stats;

pub use snapshot::AgentView;
pub use stats::Stats;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::checkpoint::{AgentSnapshot, CheckpointStore};
use crate::config::AgentConfig;
use crate::gc::{self, DirectoryGc, DiskProbe};
use crate::isolator::Isolator;
use crate::messages::{
    AgentEvent, AgentId, AgentInfo, ExecutorId, ExecutorLink, ExecutorMessage, FrameworkId,
    FrameworkSpec, MasterLink, MasterMessage, StatusUpdate, TaskId, TaskSpec, TaskState,
};
use crate::resources::ResourceLedger;
use crate::state::Framework;
use crate::updates::UpdateManager;

/// Depth of the agent event queue. Senders back off when the loop falls
/// this far behind.
pub const EVENT_QUEUE_DEPTH: usize = 1024;

/// External subsystems the agent delegates to.
pub struct Collaborators {
    pub isolator: Arc<dyn Isolator>,
    pub updates: Arc<dyn UpdateManager>,
    pub checkpoint: Arc<dyn CheckpointStore>,
    pub disk_probe: Arc<dyn DiskProbe>,
    pub gc: Arc<dyn DirectoryGc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecoveryPhase {
    Pending,
    InProgress,
    Done,
}

pub struct Agent {
    config: AgentConfig,
    events_tx: mpsc::Sender<AgentEvent>,

    isolator: Arc<dyn Isolator>,
    updates: Arc<dyn UpdateManager>,
    checkpoint: Arc<dyn CheckpointStore>,
    disk_probe: Arc<dyn DiskProbe>,
    gc: Arc<dyn DirectoryGc>,

    master: Option<MasterLink>,
    agent_id: Option<AgentId>,
    connected: bool,

    ledger: ResourceLedger,
    frameworks: HashMap<FrameworkId, Framework>,
    completed_frameworks: VecDeque<Arc<Framework>>,

    stats: Stats,
    started_at: DateTime<Utc>,
    recovery: RecoveryPhase,
    halting: bool,
}

/// What a run-task instruction resolved to, decided while the framework
/// record is borrowed and acted on afterwards.
enum LaunchDisposition {
    NewExecutor {
        executor_id: ExecutorId,
        spec: crate::messages::ExecutorSpec,
        directory: std::path::PathBuf,
    },
    Dispatch {
        link: ExecutorLink,
        task: TaskSpec,
    },
    Queued,
    Denied {
        reason: String,
    },
}

enum KillAction {
    /// The task never reached the executor; synthesize the terminal update
    /// locally.
    Local {
        executor_id: ExecutorId,
        released: crate::resources::Resources,
    },
    Forward(ExecutorLink),
    Unreachable,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        events_tx: mpsc::Sender<AgentEvent>,
        collaborators: Collaborators,
    ) -> Self {
        let ledger = ResourceLedger::new(config.resources);
        Self {
            config,
            events_tx,
            isolator: collaborators.isolator,
            updates: collaborators.updates,
            checkpoint: collaborators.checkpoint,
            disk_probe: collaborators.disk_probe,
            gc: collaborators.gc,
            master: None,
            agent_id: None,
            connected: false,
            ledger,
            frameworks: HashMap::new(),
            completed_frameworks: VecDeque::new(),
            stats: Stats::default(),
            started_at: Utc::now(),
            recovery: RecoveryPhase::Pending,
            halting: false,
        }
    }

    /// Clone of the event queue sender, for collaborators and tests.
    pub fn event_sender(&self) -> mpsc::Sender<AgentEvent> {
        self.events_tx.clone()
    }

    /// Drive the agent until shutdown completes. [`Agent::recover`] must
    /// have succeeded first; events sent in the meantime wait in the queue.
    pub async fn run(mut self, mut events: mpsc::Receiver<AgentEvent>) {
        if self.recovery != RecoveryPhase::Done {
            tracing::error!("Agent started before recovery completed, refusing to run");
            return;
        }

        self.arm_timer(self.config.disk_check_interval, AgentEvent::CheckDiskUsage);

        while let Some(event) = events.recv().await {
            self.handle(event).await;
            if self.halting && self.frameworks.is_empty() {
                break;
            }
        }

        tracing::info!("Agent event loop stopped");
    }

    /// Process one event. Public so tests can drive the state machine
    /// deterministically without spawning the loop.
    pub async fn handle(&mut self, event: AgentEvent) {
        if self.recovery != RecoveryPhase::Done {
            match event {
                AgentEvent::Snapshot { reply } => {
                    let _ = reply.send(self.view());
                }
                AgentEvent::Ping { reply } => {
                    let _ = reply.send(());
                }
                AgentEvent::Shutdown => self.handle_agent_shutdown(),
                other => {
                    tracing::warn!(event = ?other, "Dropping event received before recovery completed");
                }
            }
            return;
        }

        match event {
            AgentEvent::NewMasterDetected { master } => self.handle_new_master(master),
            AgentEvent::NoMasterDetected => {
                tracing::warn!("Lost contact with the master");
                self.master = None;
                self.connected = false;
                self.updates.master_changed(None);
            }
            AgentEvent::Registered { agent_id } => self.handle_registered(agent_id),
            AgentEvent::Reregistered { agent_id } => self.handle_reregistered(agent_id),
            AgentEvent::RegistrationRetry => {
                // Stale once registration has succeeded.
                if !self.connected && self.master.is_some() && !self.halting {
                    self.try_register();
                }
            }

            AgentEvent::RunTask {
                framework,
                framework_id,
                scheduler_addr,
                task,
            } => self.handle_run_task(framework, framework_id, scheduler_addr, task),
            AgentEvent::KillTask {
                framework_id,
                task_id,
            } => self.handle_kill_task(framework_id, task_id),
            AgentEvent::ShutdownFramework { framework_id } => {
                self.handle_shutdown_framework(framework_id)
            }
            AgentEvent::SchedulerToExecutor {
                framework_id,
                executor_id,
                data,
            } => self.handle_scheduler_to_executor(framework_id, executor_id, data),
            AgentEvent::UpdateFramework {
                framework_id,
                scheduler_addr,
            } => match self.frameworks.get_mut(&framework_id) {
                Some(framework) => {
                    tracing::info!(framework_id = %framework_id, scheduler_addr, "Framework scheduler moved");
                    framework.scheduler_addr = scheduler_addr;
                }
                None => {
                    tracing::warn!(framework_id = %framework_id, "Scheduler update for unknown framework")
                }
            },
            AgentEvent::StatusUpdateAcknowledged {
                framework_id,
                task_id,
                update_id,
            } => self.handle_master_acknowledgment(framework_id, task_id, update_id),

            AgentEvent::RegisterExecutor {
                framework_id,
                executor_id,
                link,
            } => self.handle_register_executor(framework_id, executor_id, link),
            AgentEvent::ReregisterExecutor {
                framework_id,
                executor_id,
                link,
                tasks,
                updates,
            } => self.handle_reregister_executor(framework_id, executor_id, link, tasks, updates),
            AgentEvent::StatusUpdate { update } => self.handle_status_update(update),
            AgentEvent::ExecutorToScheduler {
                framework_id,
                executor_id,
                data,
            } => self.handle_executor_to_scheduler(framework_id, executor_id, data),
            AgentEvent::Ping { reply } => {
                let _ = reply.send(());
            }

            AgentEvent::ExecutorStarted {
                framework_id,
                executor_id,
                pid,
            } => {
                tracing::info!(framework_id = %framework_id, executor_id = %executor_id, pid, "Executor process started");
            }
            AgentEvent::ExecutorTerminated {
                framework_id,
                executor_id,
                exit_code,
                destroyed,
                message,
            } => self.handle_executor_terminated(
                framework_id,
                executor_id,
                exit_code,
                destroyed,
                message,
            ),

            AgentEvent::UpdateDelivered { update, result } => {
                self.handle_update_delivered(update, result)
            }
            AgentEvent::AcknowledgmentProcessed {
                framework_id,
                task_id,
                update_id,
                result,
            } => self.handle_acknowledgment_processed(framework_id, task_id, update_id, result),
            AgentEvent::DiskUsageChecked { result } => self.handle_disk_usage_checked(result),

            AgentEvent::ShutdownExecutorTimeout {
                framework_id,
                executor_id,
                run_id,
            } => self.handle_shutdown_executor_timeout(framework_id, executor_id, run_id),
            AgentEvent::ReregisterTimeout => self.handle_reregister_timeout(),
            AgentEvent::CheckDiskUsage => self.handle_check_disk_usage(),

            AgentEvent::Snapshot { reply } => {
                let _ = reply.send(self.view());
            }
            AgentEvent::Shutdown => self.handle_agent_shutdown(),
        }
    }

    // ---- master registration -------------------------------------------

    fn handle_new_master(&mut self, master: MasterLink) {
        tracing::info!("New master detected");
        self.updates.master_changed(Some(master.clone()));
        self.master = Some(master);
        self.connected = false;
        self.try_register();
    }

    fn try_register(&self) {
        let Some(master) = &self.master else {
            return;
        };

        let message = match &self.agent_id {
            None => MasterMessage::Register {
                info: self.agent_info(),
            },
            Some(agent_id) => MasterMessage::Reregister {
                agent_id: agent_id.clone(),
                info: self.agent_info(),
            },
        };

        if let Err(e) = master.try_send(message) {
            tracing::warn!(error = %e, "Failed to send registration to master");
        }

        // Keep retrying on a jittered schedule until the master confirms.
        self.arm_timer(
            registration_backoff(
                self.config.registration_backoff_min_ms,
                self.config.registration_backoff_max_ms,
            ),
            AgentEvent::RegistrationRetry,
        );
    }

    fn handle_registered(&mut self, agent_id: AgentId) {
        if let Some(existing) = &self.agent_id {
            if *existing != agent_id {
                tracing::warn!(
                    existing = %existing,
                    assigned = %agent_id,
                    "Master assigned a conflicting agent id, ignoring"
                );
                return;
            }
        }
        tracing::info!(agent_id = %agent_id, "Registered with master");
        self.agent_id = Some(agent_id);
        self.connected = true;
        self.checkpoint_state();
    }

    fn handle_reregistered(&mut self, agent_id: AgentId) {
        if self.agent_id.as_ref() != Some(&agent_id) {
            tracing::warn!(agent_id = %agent_id, "Re-registration confirmation for a different agent id");
            return;
        }
        tracing::info!(agent_id = %agent_id, "Re-registered with master");
        self.connected = true;
    }

    fn agent_info(&self) -> AgentInfo {
        AgentInfo {
            hostname: self.config.hostname.clone(),
            resources: *self.ledger.total(),
            attributes: self.config.attributes.clone(),
        }
    }

    // ---- task launch ----------------------------------------------------

    fn handle_run_task(
        &mut self,
        framework_spec: FrameworkSpec,
        framework_id: FrameworkId,
        scheduler_addr: String,
        task: TaskSpec,
    ) {
        if self.halting {
            tracing::warn!(task_id = %task.id, "Ignoring task launch while shutting down");
            return;
        }

        let Some(agent_id) = self.agent_id.clone() else {
            tracing::warn!(task_id = %task.id, "Task launch before registration");
            self.report_lost(framework_id, None, task.id, "Agent is not registered");
            return;
        };

        if self.master.is_none() {
            self.report_lost(framework_id, None, task.id, "Agent has no master");
            return;
        }

        if !self.frameworks.contains_key(&framework_id) {
            tracing::info!(framework_id = %framework_id, name = %framework_spec.name, "Adding framework");
            self.frameworks.insert(
                framework_id.clone(),
                Framework::new(
                    framework_id.clone(),
                    framework_spec,
                    scheduler_addr.clone(),
                    self.config.clone(),
                ),
            );
        }

        let shutting_down = self
            .frameworks
            .get(&framework_id)
            .map(|framework| framework.shutting_down)
            .unwrap_or(false);
        if shutting_down {
            self.report_lost(framework_id, None, task.id, "Framework is shutting down");
            return;
        }

        // Admission against the ledger before any record is mutated.
        if !self.ledger.reserve(&task.resources) {
            let reason = format!(
                "Insufficient resources: task needs {}, agent has {} available",
                task.resources,
                self.ledger.available()
            );
            tracing::warn!(task_id = %task.id, %reason, "Rejecting task");
            self.report_lost(framework_id, None, task.id, &reason);
            return;
        }

        tracing::info!(framework_id = %framework_id, task_id = %task.id, "Launching task");
        self.stats.record_task_state(TaskState::Staging);
        let task_resources = task.resources;
        let task_id = task.id.clone();

        let disposition = {
            let Some(framework) = self.frameworks.get_mut(&framework_id) else {
                return;
            };
            framework.scheduler_addr = scheduler_addr;

            let spec = framework.executor_spec_for(&task);
            if framework.executors.contains_key(&spec.id) {
                let Some(executor) = framework.executors.get_mut(&spec.id) else {
                    return;
                };
                if executor.shutting_down {
                    LaunchDisposition::Denied {
                        reason: "Executor is shutting down".to_string(),
                    }
                } else {
                    match executor.link.clone() {
                        Some(link) => {
                            executor.add_task(task.clone());
                            LaunchDisposition::Dispatch { link, task }
                        }
                        None => {
                            executor.queued.insert(task.id.clone(), task);
                            LaunchDisposition::Queued
                        }
                    }
                }
            } else {
                let executor = framework.create_executor(&agent_id, spec);
                executor.queued.insert(task.id.clone(), task);
                LaunchDisposition::NewExecutor {
                    executor_id: executor.id.clone(),
                    spec: executor.spec.clone(),
                    directory: executor.directory.clone(),
                }
            }
        };

        match disposition {
            LaunchDisposition::NewExecutor {
                executor_id,
                spec,
                directory,
            } => {
                tracing::info!(
                    framework_id = %framework_id,
                    executor_id = %executor_id,
                    directory = %directory.display(),
                    "Launching new executor"
                );
                let resources = spec.resources;
                self.isolator
                    .launch(&framework_id, &executor_id, &spec, &directory, &resources);
            }
            LaunchDisposition::Dispatch { link, task } => {
                send_to_executor(&link, ExecutorMessage::RunTask { task });
            }
            LaunchDisposition::Queued => {
                tracing::debug!(task_id = %task_id, "Task queued pending executor registration");
            }
            LaunchDisposition::Denied { reason } => {
                self.ledger.release(&task_resources);
                self.report_lost(framework_id, None, task_id, &reason);
                return;
            }
        }

        self.checkpoint_state();
    }

    // ---- task kill ------------------------------------------------------

    fn handle_kill_task(&mut self, framework_id: FrameworkId, task_id: TaskId) {
        if !self.frameworks.contains_key(&framework_id) {
            tracing::warn!(framework_id = %framework_id, task_id = %task_id, "Kill for unknown framework");
            self.report_lost(
                framework_id,
                None,
                task_id,
                "Cannot kill a task of an unknown framework",
            );
            return;
        }

        let action = {
            let Some(framework) = self.frameworks.get_mut(&framework_id) else {
                return;
            };
            if framework.shutting_down {
                tracing::warn!(framework_id = %framework_id, "Ignoring kill while framework shuts down");
                return;
            }
            match framework.executor_id_for_task(&task_id) {
                None => None,
                Some(executor_id) => {
                    let Some(executor) = framework.executors.get_mut(&executor_id) else {
                        return;
                    };
                    if executor.queued.contains_key(&task_id) {
                        let released = executor
                            .remove_task(&task_id)
                            .map(|removed| removed.resources())
                            .unwrap_or_default();
                        Some(KillAction::Local {
                            executor_id,
                            released,
                        })
                    } else if let Some(link) = executor.link.clone() {
                        Some(KillAction::Forward(link))
                    } else {
                        Some(KillAction::Unreachable)
                    }
                }
            }
        };

        match action {
            None => {
                tracing::warn!(task_id = %task_id, "Kill for a task with no executor");
                self.report_lost(
                    framework_id,
                    None,
                    task_id,
                    "Cannot find the executor for this task",
                );
            }
            Some(KillAction::Local {
                executor_id,
                released,
            }) => {
                self.ledger.release(&released);
                self.stats.record_task_state(TaskState::Killed);
                let update = self.synthesize_update(
                    framework_id,
                    Some(executor_id),
                    task_id,
                    TaskState::Killed,
                    "Task killed before delivery to the executor",
                );
                self.forward_update(update);
                self.checkpoint_state();
            }
            Some(KillAction::Forward(link)) => {
                send_to_executor(&link, ExecutorMessage::KillTask { task_id });
            }
            Some(KillAction::Unreachable) => {
                tracing::warn!(task_id = %task_id, "Executor not yet registered, dropping kill");
            }
        }
    }

    // ---- framework lifecycle -------------------------------------------

    fn handle_shutdown_framework(&mut self, framework_id: FrameworkId) {
        let executor_ids: Vec<ExecutorId> = match self.frameworks.get_mut(&framework_id) {
            Some(framework) => {
                tracing::info!(framework_id = %framework_id, "Shutting down framework");
                framework.shutting_down = true;
                framework.executors.keys().cloned().collect()
            }
            None => {
                tracing::warn!(framework_id = %framework_id, "Shutdown for unknown framework");
                return;
            }
        };

        for executor_id in executor_ids {
            self.shutdown_executor(&framework_id, &executor_id);
        }
        self.cleanup_framework(&framework_id);
        self.checkpoint_state();
    }

    fn cleanup_framework(&mut self, framework_id: &FrameworkId) {
        // While halting, pending acknowledgments cannot gate removal: the
        // master may already be gone, so only executor exits are waited on.
        let removable = self
            .frameworks
            .get(framework_id)
            .map(|framework| {
                if self.halting {
                    framework.shutting_down && framework.executors.is_empty()
                } else {
                    framework.removable()
                }
            })
            .unwrap_or(false);
        if !removable {
            return;
        }

        if let Some(framework) = self.frameworks.remove(framework_id) {
            tracing::info!(framework_id = %framework_id, "Removing framework");
            if self.completed_frameworks.len() == self.config.max_completed_frameworks {
                self.completed_frameworks.pop_front();
            }
            self.completed_frameworks.push_back(Arc::new(framework));
            self.checkpoint_state();
        }
    }

    // ---- executor shutdown protocol ------------------------------------

    /// Two phases: ask nicely over the executor link, then force a kill
    /// through the isolator if it has not exited within the grace period.
    /// Executors with no liveness handle are force killed immediately.
    fn shutdown_executor(&mut self, framework_id: &FrameworkId, executor_id: &ExecutorId) {
        let handle = {
            let Some(framework) = self.frameworks.get_mut(framework_id) else {
                return;
            };
            let Some(executor) = framework.executors.get_mut(executor_id) else {
                return;
            };
            if executor.shutting_down {
                return;
            }
            executor.shutting_down = true;
            (executor.link.clone(), executor.run_id)
        };

        tracing::info!(framework_id = %framework_id, executor_id = %executor_id, "Shutting down executor");

        match handle.0 {
            Some(link) => {
                send_to_executor(&link, ExecutorMessage::Shutdown);
                self.arm_timer(
                    self.config.executor_shutdown_grace,
                    AgentEvent::ShutdownExecutorTimeout {
                        framework_id: framework_id.clone(),
                        executor_id: executor_id.clone(),
                        run_id: handle.1,
                    },
                );
            }
            None => self.isolator.kill(framework_id, executor_id),
        }
    }

    fn handle_shutdown_executor_timeout(
        &mut self,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        run_id: Uuid,
    ) {
        let still_running = self
            .frameworks
            .get(&framework_id)
            .and_then(|framework| framework.executors.get(&executor_id))
            .map(|executor| executor.run_id == run_id && executor.shutting_down)
            .unwrap_or(false);

        // Stale if the executor exited or a new run took its id.
        if !still_running {
            return;
        }

        tracing::warn!(
            framework_id = %framework_id,
            executor_id = %executor_id,
            "Executor ignored shutdown, force killing"
        );
        self.isolator.kill(&framework_id, &executor_id);
    }

    // ---- executor registration -----------------------------------------

    fn handle_register_executor(
        &mut self,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        link: ExecutorLink,
    ) {
        let Some(agent_id) = self.agent_id.clone() else {
            tracing::warn!(executor_id = %executor_id, "Executor registration before agent registration");
            send_to_executor(&link, ExecutorMessage::Shutdown);
            return;
        };

        let flush = {
            let Some(executor) = self
                .frameworks
                .get_mut(&framework_id)
                .and_then(|framework| framework.executors.get_mut(&executor_id))
            else {
                tracing::warn!(
                    framework_id = %framework_id,
                    executor_id = %executor_id,
                    "Unknown executor attempted to register, shutting it down"
                );
                send_to_executor(&link, ExecutorMessage::Shutdown);
                return;
            };

            if executor.shutting_down {
                send_to_executor(&link, ExecutorMessage::Shutdown);
                return;
            }
            if executor.is_registered() {
                tracing::warn!(executor_id = %executor_id, "Duplicate executor registration, ignoring");
                return;
            }

            tracing::info!(framework_id = %framework_id, executor_id = %executor_id, "Executor registered");
            executor.link = Some(link.clone());
            executor.awaiting_reregistration = false;

            let specs: Vec<TaskSpec> = executor.queued.drain().map(|(_, spec)| spec).collect();
            for spec in &specs {
                executor.add_task(spec.clone());
            }
            specs
        };

        send_to_executor(
            &link,
            ExecutorMessage::Registered {
                agent_id,
                framework_id,
                executor_id,
            },
        );
        for task in flush {
            send_to_executor(&link, ExecutorMessage::RunTask { task });
        }
        self.checkpoint_state();
    }

    fn handle_reregister_executor(
        &mut self,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        link: ExecutorLink,
        tasks: Vec<TaskSpec>,
        updates: Vec<StatusUpdate>,
    ) {
        let Some(agent_id) = self.agent_id.clone() else {
            tracing::warn!(executor_id = %executor_id, "Executor re-registration before agent registration");
            send_to_executor(&link, ExecutorMessage::Shutdown);
            return;
        };

        let (flush, unknown) = {
            let Some(executor) = self
                .frameworks
                .get_mut(&framework_id)
                .and_then(|framework| framework.executors.get_mut(&executor_id))
            else {
                tracing::warn!(
                    framework_id = %framework_id,
                    executor_id = %executor_id,
                    "Unknown executor attempted to re-register, shutting it down"
                );
                send_to_executor(&link, ExecutorMessage::Shutdown);
                return;
            };

            if executor.shutting_down {
                send_to_executor(&link, ExecutorMessage::Shutdown);
                return;
            }

            tracing::info!(
                framework_id = %framework_id,
                executor_id = %executor_id,
                reported_tasks = tasks.len(),
                buffered_updates = updates.len(),
                "Executor re-registered"
            );
            executor.link = Some(link.clone());
            executor.awaiting_reregistration = false;

            let flush: Vec<TaskSpec> = executor.queued.drain().map(|(_, spec)| spec).collect();
            let unknown: Vec<TaskSpec> = tasks
                .into_iter()
                .filter(|spec| !executor.has_task(&spec.id))
                .collect();
            (flush, unknown)
        };

        // Reconcile tasks the executor reports but the checkpoint lost.
        for spec in unknown {
            if self.ledger.reserve(&spec.resources) {
                if let Some(executor) = self
                    .frameworks
                    .get_mut(&framework_id)
                    .and_then(|framework| framework.executors.get_mut(&executor_id))
                {
                    tracing::info!(task_id = %spec.id, "Re-admitting task reported by executor");
                    executor.add_task(spec);
                }
            } else {
                tracing::warn!(task_id = %spec.id, "Cannot re-admit reported task, killing it");
                send_to_executor(&link, ExecutorMessage::KillTask { task_id: spec.id });
            }
        }

        send_to_executor(&link, ExecutorMessage::Reregistered { agent_id });
        {
            let Some(executor) = self
                .frameworks
                .get_mut(&framework_id)
                .and_then(|framework| framework.executors.get_mut(&executor_id))
            else {
                return;
            };
            for spec in &flush {
                executor.add_task(spec.clone());
            }
        }
        for task in flush {
            send_to_executor(&link, ExecutorMessage::RunTask { task });
        }

        // Replay updates the executor buffered while we were away.
        for update in updates {
            self.handle_status_update(update);
        }
        self.checkpoint_state();
    }

    fn handle_reregister_timeout(&mut self) {
        let orphaned: Vec<(FrameworkId, ExecutorId)> = self
            .frameworks
            .values()
            .flat_map(|framework| {
                framework
                    .executors
                    .values()
                    .filter(|executor| {
                        executor.awaiting_reregistration && !executor.is_registered()
                    })
                    .map(|executor| (framework.id.clone(), executor.id.clone()))
            })
            .collect();

        for (framework_id, executor_id) in orphaned {
            tracing::warn!(
                framework_id = %framework_id,
                executor_id = %executor_id,
                "Executor did not re-register in time, shutting it down"
            );
            self.shutdown_executor(&framework_id, &executor_id);
        }
    }

    // ---- status updates -------------------------------------------------

    fn handle_status_update(&mut self, update: StatusUpdate) {
        if !self.frameworks.contains_key(&update.framework_id) {
            tracing::warn!(
                framework_id = %update.framework_id,
                task_id = %update.task_id,
                "Status update for unknown framework"
            );
            self.stats.invalid_status_updates += 1;
            return;
        }

        tracing::info!(
            task_id = %update.task_id,
            state = %update.state,
            "Status update"
        );
        self.stats.valid_status_updates += 1;
        self.stats.record_task_state(update.state);

        let released = {
            let Some(framework) = self.frameworks.get_mut(&update.framework_id) else {
                return;
            };
            let mut released = None;
            match framework.executor_id_for_task(&update.task_id) {
                Some(executor_id) => {
                    if let Some(executor) = framework.executors.get_mut(&executor_id) {
                        executor.update_task_state(&update.task_id, update.state);
                        if update.state.is_terminal() {
                            released = executor
                                .remove_task(&update.task_id)
                                .map(|removed| removed.resources());
                        }
                    }
                }
                None => {
                    // The executor may be gone already; the master still
                    // needs to hear about the task.
                    tracing::debug!(task_id = %update.task_id, "Update for a task with no active executor");
                }
            }
            released
        };

        if let Some(resources) = released {
            self.ledger.release(&resources);
        }
        self.forward_update(update);
        self.checkpoint_state();
    }

    /// Record the update as pending acknowledgment and hand it to the
    /// reliable delivery subsystem; its completion re-enters the loop.
    fn forward_update(&mut self, update: StatusUpdate) {
        if let Some(framework) = self.frameworks.get_mut(&update.framework_id) {
            framework.updates.insert(update.update_id, update.clone());
        }

        let completion = self.updates.submit(update.clone());
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = match completion.await {
                Ok(result) => result,
                Err(_) => Err("status update manager dropped the completion".to_string()),
            };
            let _ = events
                .send(AgentEvent::UpdateDelivered { update, result })
                .await;
        });
    }

    fn handle_update_delivered(
        &mut self,
        update: StatusUpdate,
        result: std::result::Result<(), String>,
    ) {
        if let Err(e) = result {
            // The update stays pending; the delivery subsystem owns retries.
            tracing::warn!(
                task_id = %update.task_id,
                update_id = %update.update_id,
                error = %e,
                "Status update delivery failed"
            );
            return;
        }

        // Acknowledge the originating executor, if it is still around.
        let link = self
            .frameworks
            .get(&update.framework_id)
            .and_then(|framework| {
                update
                    .executor_id
                    .as_ref()
                    .and_then(|executor_id| framework.executors.get(executor_id))
            })
            .and_then(|executor| executor.link.clone());

        if let Some(link) = link {
            send_to_executor(
                &link,
                ExecutorMessage::UpdateAcknowledged {
                    task_id: update.task_id,
                    update_id: update.update_id,
                },
            );
        }
    }

    fn handle_master_acknowledgment(
        &mut self,
        framework_id: FrameworkId,
        task_id: TaskId,
        update_id: Uuid,
    ) {
        let completion = self.updates.acknowledge(&framework_id, &task_id, update_id);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = match completion.await {
                Ok(result) => result,
                Err(_) => Err("status update manager dropped the completion".to_string()),
            };
            let _ = events
                .send(AgentEvent::AcknowledgmentProcessed {
                    framework_id,
                    task_id,
                    update_id,
                    result,
                })
                .await;
        });
    }

    fn handle_acknowledgment_processed(
        &mut self,
        framework_id: FrameworkId,
        task_id: TaskId,
        update_id: Uuid,
        result: std::result::Result<(), String>,
    ) {
        match result {
            Ok(()) => {
                if let Some(framework) = self.frameworks.get_mut(&framework_id) {
                    if framework.updates.remove(&update_id).is_none() {
                        tracing::warn!(
                            update_id = %update_id,
                            task_id = %task_id,
                            "Acknowledgment for unknown status update"
                        );
                    }
                }
                self.cleanup_framework(&framework_id);
            }
            Err(e) => {
                tracing::warn!(update_id = %update_id, error = %e, "Failed to process acknowledgment");
            }
        }
    }

    // ---- executor termination ------------------------------------------

    fn handle_executor_terminated(
        &mut self,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        exit_code: Option<i32>,
        destroyed: bool,
        message: String,
    ) {
        let live: Vec<TaskId> = {
            let Some(executor) = self
                .frameworks
                .get(&framework_id)
                .and_then(|framework| framework.executors.get(&executor_id))
            else {
                tracing::warn!(
                    framework_id = %framework_id,
                    executor_id = %executor_id,
                    "Termination notice for unknown executor"
                );
                return;
            };
            executor
                .queued
                .keys()
                .cloned()
                .chain(
                    executor
                        .launched
                        .values()
                        .filter(|task| !task.state().is_terminal())
                        .map(|task| task.id.clone()),
                )
                .collect()
        };

        tracing::info!(
            framework_id = %framework_id,
            executor_id = %executor_id,
            exit_code,
            destroyed,
            %message,
            "Executor terminated"
        );

        let reason = match exit_code {
            Some(code) => format!("Executor terminated with exit code {}: {}", code, message),
            None => format!("Executor terminated: {}", message),
        };
        for task_id in live {
            let update = self.synthesize_update(
                framework_id.clone(),
                Some(executor_id.clone()),
                task_id,
                TaskState::Lost,
                &reason,
            );
            self.handle_status_update(update);
        }

        let retired = self
            .frameworks
            .get_mut(&framework_id)
            .and_then(|framework| framework.destroy_executor(&executor_id));

        if let Some(executor) = retired {
            // Live-task loss above should have drained the footprint; any
            // remainder is returned here so the ledger cannot leak.
            if !executor.resources.is_zero() {
                tracing::warn!(executor_id = %executor_id, "Executor retired with a non-zero footprint");
                self.ledger.release(&executor.resources);
            }
            self.gc
                .schedule(executor.directory.clone(), self.config.gc_delay);
        }

        self.cleanup_framework(&framework_id);
        self.checkpoint_state();
    }

    // ---- framework message relays --------------------------------------

    fn handle_scheduler_to_executor(
        &mut self,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    ) {
        let link = self
            .frameworks
            .get(&framework_id)
            .and_then(|framework| framework.executors.get(&executor_id))
            .and_then(|executor| executor.link.clone());

        match link {
            Some(link) => {
                send_to_executor(&link, ExecutorMessage::FrameworkMessage { data });
                self.stats.valid_framework_messages += 1;
            }
            None => {
                tracing::warn!(
                    framework_id = %framework_id,
                    executor_id = %executor_id,
                    "Dropping framework message for unreachable executor"
                );
                self.stats.invalid_framework_messages += 1;
            }
        }
    }

    fn handle_executor_to_scheduler(
        &mut self,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    ) {
        match &self.master {
            Some(master) => {
                let _ = master.try_send(MasterMessage::FrameworkMessage {
                    framework_id,
                    executor_id,
                    data,
                });
                self.stats.valid_framework_messages += 1;
            }
            None => {
                tracing::warn!(framework_id = %framework_id, "Dropping framework message, no master");
                self.stats.invalid_framework_messages += 1;
            }
        }
    }

    // ---- housekeeping ---------------------------------------------------

    fn handle_check_disk_usage(&mut self) {
        let completion = self.disk_probe.sample();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = match completion.await {
                Ok(result) => result,
                Err(_) => Err("disk probe dropped the completion".to_string()),
            };
            let _ = events.send(AgentEvent::DiskUsageChecked { result }).await;
        });
    }

    fn handle_disk_usage_checked(&mut self, result: std::result::Result<f64, String>) {
        match result {
            Ok(usage) => {
                let max_age = gc::executor_dir_max_age(self.config.gc_delay, usage);
                tracing::debug!(usage, max_age_secs = max_age.as_secs(), "Disk usage sampled");
                self.gc.prune(max_age);
            }
            Err(e) => tracing::warn!(error = %e, "Disk usage check failed"),
        }

        if !self.halting {
            self.arm_timer(self.config.disk_check_interval, AgentEvent::CheckDiskUsage);
        }
    }

    // ---- agent shutdown -------------------------------------------------

    fn handle_agent_shutdown(&mut self) {
        if self.halting {
            return;
        }
        tracing::info!("Agent shutting down");
        self.halting = true;

        let framework_ids: Vec<FrameworkId> = self.frameworks.keys().cloned().collect();
        for framework_id in framework_ids {
            self.handle_shutdown_framework(framework_id);
        }
    }

    // ---- helpers --------------------------------------------------------

    fn synthesize_update(
        &self,
        framework_id: FrameworkId,
        executor_id: Option<ExecutorId>,
        task_id: TaskId,
        state: TaskState,
        message: &str,
    ) -> StatusUpdate {
        StatusUpdate {
            update_id: Uuid::new_v4(),
            framework_id,
            executor_id,
            agent_id: self.agent_id.clone(),
            task_id,
            state,
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Report a task as lost without involving any executor.
    fn report_lost(
        &mut self,
        framework_id: FrameworkId,
        executor_id: Option<ExecutorId>,
        task_id: TaskId,
        reason: &str,
    ) {
        self.stats.record_task_state(TaskState::Lost);
        let update =
            self.synthesize_update(framework_id, executor_id, task_id, TaskState::Lost, reason);
        self.forward_update(update);
    }

    fn arm_timer(&self, delay: Duration, event: AgentEvent) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event).await;
        });
    }

    fn checkpoint_state(&self) {
        let snapshot = AgentSnapshot::capture(self.agent_id.as_ref(), &self.frameworks);
        let store = self.checkpoint.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.save(&snapshot) {
                tracing::warn!(error = %e, "Failed to write checkpoint");
            }
        });
    }
}

fn send_to_executor(link: &ExecutorLink, message: ExecutorMessage) {
    if let Err(e) = link.try_send(message) {
        tracing::warn!(error = %e, "Failed to send to executor");
    }
}

fn registration_backoff(min_ms: u64, max_ms: u64) -> Duration {
    let mut rng = rand::thread_rng();
    Duration::from_millis(rng.gen_range(min_ms..=max_ms))
}
