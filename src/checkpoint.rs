//! Persisted snapshot of the agent's record tree.
//!
//! Written incrementally as state changes and read once at startup by the
//! recovery controller. The snapshot captures exactly what reconstruction
//! needs: frameworks, their executors (with run ids and directories), and
//! per-executor queued specs and launched task states.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::messages::{
    AgentId, ExecutorId, ExecutorSpec, FrameworkId, FrameworkSpec, TaskId, TaskSpec, TaskState,
};
use crate::resources::Resources;
use crate::state::{Executor, Framework, Task};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub resources: Resources,
    pub state: TaskState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSnapshot {
    pub id: ExecutorId,
    pub spec: ExecutorSpec,
    pub run_id: Uuid,
    pub directory: PathBuf,
    pub shutting_down: bool,
    pub queued: Vec<TaskSpec>,
    pub tasks: Vec<TaskSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkSnapshot {
    pub id: FrameworkId,
    pub spec: FrameworkSpec,
    pub scheduler_addr: String,
    pub shutting_down: bool,
    pub executors: Vec<ExecutorSnapshot>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent_id: Option<AgentId>,
    pub frameworks: Vec<FrameworkSnapshot>,
}

impl AgentSnapshot {
    pub fn capture(
        agent_id: Option<&AgentId>,
        frameworks: &HashMap<FrameworkId, Framework>,
    ) -> Self {
        let mut captured: Vec<FrameworkSnapshot> = frameworks
            .values()
            .map(FrameworkSnapshot::capture)
            .collect();
        // Deterministic output keeps checkpoint diffs readable.
        captured.sort_by(|a, b| a.id.0.cmp(&b.id.0));

        Self {
            agent_id: agent_id.cloned(),
            frameworks: captured,
        }
    }
}

impl FrameworkSnapshot {
    fn capture(framework: &Framework) -> Self {
        let mut executors: Vec<ExecutorSnapshot> = framework
            .executors
            .values()
            .map(ExecutorSnapshot::capture)
            .collect();
        executors.sort_by(|a, b| a.id.0.cmp(&b.id.0));

        Self {
            id: framework.id.clone(),
            spec: framework.spec.clone(),
            scheduler_addr: framework.scheduler_addr.clone(),
            shutting_down: framework.shutting_down,
            executors,
        }
    }
}

impl ExecutorSnapshot {
    fn capture(executor: &Executor) -> Self {
        Self {
            id: executor.id.clone(),
            spec: executor.spec.clone(),
            run_id: executor.run_id,
            directory: executor.directory.clone(),
            shutting_down: executor.shutting_down,
            queued: executor.queued.values().cloned().collect(),
            tasks: executor
                .launched
                .values()
                .map(|task| TaskSnapshot {
                    id: task.id.clone(),
                    name: task.name.clone(),
                    resources: task.resources,
                    state: task.state(),
                })
                .collect(),
        }
    }

    /// Rebuild the executor record, preserving run id, directory, and task
    /// states. The liveness link stays unset until the executor process
    /// re-registers.
    pub fn restore(&self, framework_id: FrameworkId, max_completed_tasks: usize) -> Executor {
        let mut executor = Executor::new(
            framework_id,
            self.spec.clone(),
            self.run_id,
            self.directory.clone(),
            max_completed_tasks,
        );
        executor.shutting_down = self.shutting_down;
        for spec in &self.queued {
            executor.queued.insert(spec.id.clone(), spec.clone());
        }
        for task in &self.tasks {
            executor.restore_task(Task::restored(
                task.id.clone(),
                task.name.clone(),
                task.resources,
                task.state,
            ));
        }
        executor
    }
}

/// Durable storage for [`AgentSnapshot`].
pub trait CheckpointStore: Send + Sync {
    fn save(&self, snapshot: &AgentSnapshot) -> Result<()>;

    /// `Ok(None)` means no checkpoint exists: a clean start.
    fn load(&self) -> Result<Option<AgentSnapshot>>;
}

/// JSON checkpoint on the local filesystem, replaced atomically via a
/// temporary file and rename.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, snapshot: &AgentSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn load(&self) -> Result<Option<AgentSnapshot>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::CommandSpec;

    fn sample_snapshot() -> AgentSnapshot {
        AgentSnapshot {
            agent_id: Some(AgentId::from("a1")),
            frameworks: vec![FrameworkSnapshot {
                id: FrameworkId::from("f1"),
                spec: FrameworkSpec {
                    name: "analytics".into(),
                    user: "nobody".into(),
                },
                scheduler_addr: "scheduler@10.0.0.1:5050".into(),
                shutting_down: false,
                executors: vec![ExecutorSnapshot {
                    id: ExecutorId::from("e1"),
                    spec: ExecutorSpec {
                        id: ExecutorId::from("e1"),
                        name: "e1".into(),
                        source: "e1".into(),
                        command: CommandSpec {
                            value: "sleep 60".into(),
                        },
                        resources: Resources::ZERO,
                    },
                    run_id: Uuid::new_v4(),
                    directory: PathBuf::from("/tmp/run"),
                    shutting_down: false,
                    queued: vec![],
                    tasks: vec![TaskSnapshot {
                        id: TaskId::from("t1"),
                        name: "t1".into(),
                        resources: Resources::new(1.0, 128, 0),
                        state: TaskState::Running,
                    }],
                }],
            }],
        }
    }

    #[test]
    fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoint.json"));

        assert!(store.load().unwrap().is_none());

        let snapshot = sample_snapshot();
        store.save(&snapshot).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.agent_id, Some(AgentId::from("a1")));
        assert_eq!(loaded.frameworks.len(), 1);
        assert_eq!(loaded.frameworks[0].executors[0].tasks[0].state, TaskState::Running);
    }

    #[test]
    fn save_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoint.json"));

        store.save(&sample_snapshot()).unwrap();
        store.save(&AgentSnapshot::default()).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert!(loaded.frameworks.is_empty());
        assert!(loaded.agent_id.is_none());
    }

    #[test]
    fn executor_snapshot_restores_tasks_and_resources() {
        let snapshot = sample_snapshot();
        let executor_snapshot = &snapshot.frameworks[0].executors[0];
        let executor = executor_snapshot.restore(FrameworkId::from("f1"), 100);

        assert_eq!(executor.run_id, executor_snapshot.run_id);
        assert_eq!(executor.launched.len(), 1);
        assert_eq!(executor.resources, Resources::new(1.0, 128, 0));
        assert!(!executor.is_registered());
    }
}
