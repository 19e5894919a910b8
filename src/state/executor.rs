use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use uuid::Uuid;

use crate::messages::{ExecutorId, ExecutorLink, ExecutorSpec, FrameworkId, TaskId, TaskSpec, TaskState};
use crate::resources::Resources;
use crate::state::task::Task;

/// What `remove_task` found, so the caller can return the footprint to the
/// agent ledger.
#[derive(Debug)]
pub enum RemovedTask {
    Queued(TaskSpec),
    Launched(Resources),
}

impl RemovedTask {
    pub fn resources(&self) -> Resources {
        match self {
            RemovedTask::Queued(spec) => spec.resources,
            RemovedTask::Launched(resources) => *resources,
        }
    }
}

/// One executor instance and the tasks it is responsible for.
///
/// A task id lives in at most one of `queued`, `launched`, or the completed
/// history at any time. `resources` is always the sum of launched task
/// footprints.
#[derive(Debug)]
pub struct Executor {
    pub id: ExecutorId,
    pub spec: ExecutorSpec,
    pub framework_id: FrameworkId,

    /// Distinguishes this instance from earlier runs of the same executor id.
    pub run_id: Uuid,

    pub directory: PathBuf,

    /// Set once the executor process announces itself.
    pub link: Option<ExecutorLink>,

    pub shutting_down: bool,

    /// Recovery found this executor in the checkpoint and is waiting for it
    /// to re-register.
    pub awaiting_reregistration: bool,

    /// Sum of launched task footprints.
    pub resources: Resources,

    /// Accepted but not yet acknowledged by the executor process.
    pub queued: HashMap<TaskId, TaskSpec>,

    pub launched: HashMap<TaskId, Task>,

    completed: VecDeque<Task>,
    max_completed: usize,
}

impl Executor {
    pub fn new(
        framework_id: FrameworkId,
        spec: ExecutorSpec,
        run_id: Uuid,
        directory: PathBuf,
        max_completed: usize,
    ) -> Self {
        Self {
            id: spec.id.clone(),
            spec,
            framework_id,
            run_id,
            directory,
            link: None,
            shutting_down: false,
            awaiting_reregistration: false,
            resources: Resources::ZERO,
            queued: HashMap::new(),
            launched: HashMap::new(),
            completed: VecDeque::new(),
            max_completed,
        }
    }

    /// Launch a task on this executor. The task starts in `staging` and its
    /// footprint is added to consumed resources.
    ///
    /// Panics if the task id is already launched; the master enforces unique
    /// task ids and a duplicate here means corrupted bookkeeping.
    pub fn add_task(&mut self, spec: TaskSpec) -> &Task {
        assert!(
            !self.launched.contains_key(&spec.id),
            "executor {} already launched task {}",
            self.id,
            spec.id
        );

        let task = Task::new(spec.id.clone(), spec.name.clone(), spec.resources);
        self.resources = self.resources.add(&spec.resources);
        self.launched.entry(spec.id).or_insert(task)
    }

    /// Re-insert a task recovered from a checkpoint or reported by a
    /// re-registering executor, preserving its state.
    pub fn restore_task(&mut self, task: Task) {
        self.resources = self.resources.add(&task.resources);
        self.launched.insert(task.id.clone(), task);
    }

    /// Drop a queued task or retire a launched one into the completed
    /// history (evicting the oldest entry when full). No-op if the task is
    /// in neither set.
    pub fn remove_task(&mut self, task_id: &TaskId) -> Option<RemovedTask> {
        if let Some(spec) = self.queued.remove(task_id) {
            return Some(RemovedTask::Queued(spec));
        }

        let task = self.launched.remove(task_id)?;
        let footprint = task.resources;
        self.resources = self
            .resources
            .checked_sub(&footprint)
            .unwrap_or_else(|| {
                panic!(
                    "executor {} consumed resources went negative removing task {}",
                    self.id, task_id
                )
            });

        if self.completed.len() == self.max_completed {
            self.completed.pop_front();
        }
        self.completed.push_back(task);

        Some(RemovedTask::Launched(footprint))
    }

    /// Apply a state change to a launched task. Updates for tasks already
    /// removed or completed are stale and silently dropped.
    pub fn update_task_state(&mut self, task_id: &TaskId, state: TaskState) {
        if let Some(task) = self.launched.get_mut(task_id) {
            task.set_state(state);
        }
    }

    pub fn has_task(&self, task_id: &TaskId) -> bool {
        self.queued.contains_key(task_id) || self.launched.contains_key(task_id)
    }

    pub fn is_registered(&self) -> bool {
        self.link.is_some()
    }

    pub fn completed_tasks(&self) -> impl Iterator<Item = &Task> {
        self.completed.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::CommandSpec;

    fn test_executor(max_completed: usize) -> Executor {
        let spec = ExecutorSpec {
            id: ExecutorId::from("e1"),
            name: "test executor".into(),
            source: "test".into(),
            command: CommandSpec {
                value: "sleep 1".into(),
            },
            resources: Resources::ZERO,
        };
        Executor::new(
            FrameworkId::from("f1"),
            spec,
            Uuid::new_v4(),
            PathBuf::from("/tmp/e1"),
            max_completed,
        )
    }

    fn task_spec(id: &str, cpus: f64) -> TaskSpec {
        TaskSpec {
            id: TaskId::from(id),
            name: id.to_string(),
            resources: Resources::new(cpus, 64, 0),
            executor: None,
            command: Some(CommandSpec {
                value: "true".into(),
            }),
        }
    }

    #[test]
    fn add_task_accumulates_resources() {
        let mut executor = test_executor(10);
        executor.add_task(task_spec("t1", 1.0));
        executor.add_task(task_spec("t2", 0.5));
        assert_eq!(executor.resources, Resources::new(1.5, 128, 0));
        assert_eq!(executor.launched.len(), 2);
    }

    #[test]
    #[should_panic(expected = "already launched")]
    fn add_task_rejects_duplicate_id() {
        let mut executor = test_executor(10);
        executor.add_task(task_spec("t1", 1.0));
        executor.add_task(task_spec("t1", 1.0));
    }

    #[test]
    fn remove_task_releases_resources_and_retires() {
        let mut executor = test_executor(10);
        executor.add_task(task_spec("t1", 1.0));
        executor.add_task(task_spec("t2", 0.5));

        let removed = executor.remove_task(&TaskId::from("t1"));
        assert!(matches!(removed, Some(RemovedTask::Launched(_))));
        assert_eq!(executor.resources, Resources::new(0.5, 64, 0));
        assert!(!executor.launched.contains_key(&TaskId::from("t1")));
        assert_eq!(executor.completed_tasks().count(), 1);

        // Resources equal the sum of remaining launched footprints after
        // any add/remove sequence.
        executor.remove_task(&TaskId::from("t2"));
        assert_eq!(executor.resources, Resources::ZERO);
    }

    #[test]
    fn remove_task_discards_queued_without_retiring() {
        let mut executor = test_executor(10);
        executor
            .queued
            .insert(TaskId::from("t1"), task_spec("t1", 1.0));

        let removed = executor.remove_task(&TaskId::from("t1"));
        assert!(matches!(removed, Some(RemovedTask::Queued(_))));
        assert_eq!(executor.resources, Resources::ZERO);
        assert_eq!(executor.completed_tasks().count(), 0);
    }

    #[test]
    fn remove_unknown_task_is_noop() {
        let mut executor = test_executor(10);
        assert!(executor.remove_task(&TaskId::from("nope")).is_none());
    }

    #[test]
    fn task_id_never_in_queued_and_launched() {
        let mut executor = test_executor(10);
        executor
            .queued
            .insert(TaskId::from("t1"), task_spec("t1", 1.0));
        let spec = executor.queued.remove(&TaskId::from("t1")).unwrap();
        executor.add_task(spec);
        assert!(!executor.queued.contains_key(&TaskId::from("t1")));
        assert!(executor.launched.contains_key(&TaskId::from("t1")));
    }

    #[test]
    fn completed_history_evicts_oldest_at_capacity() {
        let mut executor = test_executor(3);
        for i in 0..4 {
            let id = format!("t{}", i);
            executor.add_task(task_spec(&id, 0.1));
            executor.remove_task(&TaskId(id));
        }
        let completed: Vec<String> = executor
            .completed_tasks()
            .map(|t| t.id.0.clone())
            .collect();
        assert_eq!(completed, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn stale_state_updates_are_dropped() {
        let mut executor = test_executor(10);
        executor.add_task(task_spec("t1", 1.0));
        executor.remove_task(&TaskId::from("t1"));

        // Task is completed; the update must not resurrect it.
        executor.update_task_state(&TaskId::from("t1"), TaskState::Running);
        assert!(!executor.launched.contains_key(&TaskId::from("t1")));
    }

    #[test]
    fn update_task_state_applies_to_launched() {
        let mut executor = test_executor(10);
        executor.add_task(task_spec("t1", 1.0));
        executor.update_task_state(&TaskId::from("t1"), TaskState::Running);
        assert_eq!(
            executor.launched[&TaskId::from("t1")].state(),
            TaskState::Running
        );
    }
}
