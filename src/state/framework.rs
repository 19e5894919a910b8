use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use uuid::Uuid;

use crate::config::AgentConfig;
use crate::messages::{
    AgentId, CommandSpec, ExecutorId, ExecutorSpec, FrameworkId, FrameworkSpec, StatusUpdate,
    TaskId, TaskSpec,
};
use crate::paths;
use crate::state::executor::Executor;

/// Name of the generic launcher binary that runs inline-command tasks.
pub const COMMAND_EXECUTOR_BINARY: &str = "drover-executor";

/// One framework and the executors it is running on this node.
#[derive(Debug)]
pub struct Framework {
    pub id: FrameworkId,
    pub spec: FrameworkSpec,

    /// Current scheduler address; frameworks may migrate.
    pub scheduler_addr: String,

    pub shutting_down: bool,

    pub executors: HashMap<ExecutorId, Executor>,

    /// Status updates awaiting acknowledgment from the master, keyed by
    /// update id. Purged only once the delivery subsystem confirms.
    pub updates: HashMap<Uuid, StatusUpdate>,

    completed: VecDeque<Arc<Executor>>,

    config: AgentConfig,
}

impl Framework {
    pub fn new(
        id: FrameworkId,
        spec: FrameworkSpec,
        scheduler_addr: String,
        config: AgentConfig,
    ) -> Self {
        Self {
            id,
            spec,
            scheduler_addr,
            shutting_down: false,
            executors: HashMap::new(),
            updates: HashMap::new(),
            completed: VecDeque::new(),
            config,
        }
    }

    /// Resolve the executor specification a task should run under.
    ///
    /// Tasks carrying an inline command get a synthesized executor: its id
    /// equals the task id, its name embeds a preview of the command, and the
    /// command itself is rewritten to invoke the generic launcher binary
    /// (or to report the resolution failure and exit non-zero). Tasks that
    /// reference a registered executor return it unchanged.
    ///
    /// Panics unless exactly one of {inline command, registered executor} is
    /// present on the task.
    pub fn executor_spec_for(&self, task: &TaskSpec) -> ExecutorSpec {
        assert!(
            task.executor.is_some() != task.command.is_some(),
            "task {} must carry exactly one of an executor or a command",
            task.id
        );

        if let Some(spec) = &task.executor {
            return spec.clone();
        }

        let command = task.command.as_ref().cloned().unwrap_or_else(|| {
            unreachable!("exactly-one-of checked above");
        });

        let mut name = format!("(Task: {}) (Command: sh -c '", task.id);
        if command.value.chars().count() > 15 {
            // Char-based so a preview boundary inside a multi-byte
            // character cannot split it.
            name.extend(command.value.chars().take(12));
            name.push_str("...')");
        } else {
            name.push_str(&command.value);
            name.push_str("')");
        }

        let launcher = self.config.launcher_dir.join(COMMAND_EXECUTOR_BINARY);
        let value = match std::fs::canonicalize(&launcher) {
            Ok(path) => path.display().to_string(),
            Err(e) => format!("echo '{}: {}'; exit 1", launcher.display(), e),
        };

        ExecutorSpec {
            id: ExecutorId(task.id.0.clone()),
            name: format!("Command Executor {}", name),
            source: task.id.0.clone(),
            command: CommandSpec { value },
            resources: task.resources,
        }
    }

    /// Register a fresh executor instance under `spec.id`, with a new run id
    /// and its own run directory.
    ///
    /// Panics if an active executor with that id exists; callers must
    /// destroy or await the prior instance first.
    pub fn create_executor(&mut self, agent_id: &AgentId, spec: ExecutorSpec) -> &mut Executor {
        assert!(
            !self.executors.contains_key(&spec.id),
            "framework {} already has an active executor {}",
            self.id,
            spec.id
        );

        let run_id = Uuid::new_v4();
        let directory = paths::executor_run_directory(
            &self.config.work_dir,
            agent_id,
            &self.id,
            &spec.id,
            &run_id,
        );

        let executor = Executor::new(
            self.id.clone(),
            spec,
            run_id,
            directory,
            self.config.max_completed_tasks_per_executor,
        );
        let id = executor.id.clone();
        self.executors.entry(id).or_insert(executor)
    }

    /// Used by recovery to re-insert an executor rebuilt from a checkpoint.
    pub fn restore_executor(&mut self, executor: Executor) {
        self.executors.insert(executor.id.clone(), executor);
    }

    /// Move an executor from the active set into the completed history,
    /// evicting the oldest entry at capacity. Returns a handle to the
    /// retired executor, or `None` if it was not active.
    pub fn destroy_executor(&mut self, executor_id: &ExecutorId) -> Option<Arc<Executor>> {
        let executor = Arc::new(self.executors.remove(executor_id)?);
        if self.completed.len() == self.config.max_completed_executors_per_framework {
            self.completed.pop_front();
        }
        self.completed.push_back(executor.clone());
        Some(executor)
    }

    /// Find which active executor owns a task. Linear scan; executor counts
    /// per framework are small.
    pub fn executor_id_for_task(&self, task_id: &TaskId) -> Option<ExecutorId> {
        self.executors
            .values()
            .find(|executor| executor.has_task(task_id))
            .map(|executor| executor.id.clone())
    }

    /// A framework is dropped once it is shutting down with no active
    /// executors and no updates pending acknowledgment.
    pub fn removable(&self) -> bool {
        self.shutting_down && self.executors.is_empty() && self.updates.is_empty()
    }

    pub fn completed_executors(&self) -> impl Iterator<Item = &Arc<Executor>> {
        self.completed.iter()
    }
}
