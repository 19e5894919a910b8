//! Executor process containment boundary.
//!
//! The agent never touches executor processes directly: it asks the isolator
//! to launch or kill them, and the isolator reports lifecycle transitions
//! back into the agent's event queue. Requests are fire-and-forget so the
//! event loop never blocks on process management.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;

use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use crate::messages::{AgentEvent, ExecutorId, ExecutorSpec, FrameworkId};
use crate::resources::Resources;

pub trait Isolator: Send + Sync {
    /// Start an executor process in `directory`. Reports
    /// [`AgentEvent::ExecutorStarted`] once the process is up and
    /// [`AgentEvent::ExecutorTerminated`] when it exits.
    fn launch(
        &self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        spec: &ExecutorSpec,
        directory: &Path,
        resources: &Resources,
    );

    /// Forcibly destroy a running executor. The resulting termination is
    /// reported like any other exit, with `destroyed` set.
    fn kill(&self, framework_id: &FrameworkId, executor_id: &ExecutorId);
}

/// Runs executors as plain `sh -c` child processes with stdout/stderr
/// captured into their run directory. No containment beyond a working
/// directory; real deployments substitute their own isolator.
pub struct CommandIsolator {
    events: mpsc::Sender<AgentEvent>,
    kill_switches: Mutex<HashMap<(FrameworkId, ExecutorId), oneshot::Sender<()>>>,
}

impl CommandIsolator {
    pub fn new(events: mpsc::Sender<AgentEvent>) -> Self {
        Self {
            events,
            kill_switches: Mutex::new(HashMap::new()),
        }
    }

    async fn terminated(
        events: &mpsc::Sender<AgentEvent>,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        exit_code: Option<i32>,
        destroyed: bool,
        message: String,
    ) {
        let _ = events
            .send(AgentEvent::ExecutorTerminated {
                framework_id,
                executor_id,
                exit_code,
                destroyed,
                message,
            })
            .await;
    }
}

impl Isolator for CommandIsolator {
    fn launch(
        &self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        spec: &ExecutorSpec,
        directory: &Path,
        _resources: &Resources,
    ) {
        let events = self.events.clone();
        let framework_id = framework_id.clone();
        let executor_id = executor_id.clone();
        let command = spec.command.value.clone();
        let directory = directory.to_path_buf();

        let (kill_tx, mut kill_rx) = oneshot::channel();
        self.kill_switches
            .lock()
            .expect("isolator kill switch lock poisoned")
            .insert((framework_id.clone(), executor_id.clone()), kill_tx);

        tokio::spawn(async move {
            if let Err(e) = tokio::fs::create_dir_all(&directory).await {
                Self::terminated(
                    &events,
                    framework_id,
                    executor_id,
                    None,
                    false,
                    format!("Failed to create executor directory: {}", e),
                )
                .await;
                return;
            }

            let stdout = std::fs::File::create(directory.join("stdout"));
            let stderr = std::fs::File::create(directory.join("stderr"));

            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&command).current_dir(&directory);
            match (stdout, stderr) {
                (Ok(out), Ok(err)) => {
                    cmd.stdout(Stdio::from(out)).stderr(Stdio::from(err));
                }
                _ => {
                    cmd.stdout(Stdio::null()).stderr(Stdio::null());
                }
            }

            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(e) => {
                    tracing::error!(
                        framework_id = %framework_id,
                        executor_id = %executor_id,
                        error = %e,
                        "Failed to launch executor"
                    );
                    Self::terminated(
                        &events,
                        framework_id,
                        executor_id,
                        None,
                        false,
                        format!("Failed to launch executor: {}", e),
                    )
                    .await;
                    return;
                }
            };

            let _ = events
                .send(AgentEvent::ExecutorStarted {
                    framework_id: framework_id.clone(),
                    executor_id: executor_id.clone(),
                    pid: child.id().unwrap_or(0),
                })
                .await;

            tokio::select! {
                _ = &mut kill_rx => {
                    let _ = child.start_kill();
                    let status = child.wait().await;
                    Self::terminated(
                        &events,
                        framework_id,
                        executor_id,
                        status.ok().and_then(|s| s.code()),
                        true,
                        "Executor destroyed by isolator".to_string(),
                    )
                    .await;
                }
                status = child.wait() => {
                    let exit_code = status.ok().and_then(|s| s.code());
                    Self::terminated(
                        &events,
                        framework_id,
                        executor_id,
                        exit_code,
                        false,
                        "Executor exited".to_string(),
                    )
                    .await;
                }
            }
        });
    }

    fn kill(&self, framework_id: &FrameworkId, executor_id: &ExecutorId) {
        let switch = self
            .kill_switches
            .lock()
            .expect("isolator kill switch lock poisoned")
            .remove(&(framework_id.clone(), executor_id.clone()));

        match switch {
            Some(kill_tx) => {
                let _ = kill_tx.send(());
            }
            None => {
                tracing::warn!(
                    framework_id = %framework_id,
                    executor_id = %executor_id,
                    "Kill requested for unknown executor"
                );
            }
        }
    }
}
