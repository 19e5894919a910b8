use crate::messages::{TaskId, TaskState};
use crate::resources::Resources;

/// A single task: immutable identity and footprint, mutable state.
///
/// This is a passive value object. `set_state` applies whatever the caller
/// hands it; ordering is the master's responsibility.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub resources: Resources,
    state: TaskState,
}

impl Task {
    pub fn new(id: TaskId, name: String, resources: Resources) -> Self {
        Self {
            id,
            name,
            resources,
            state: TaskState::Staging,
        }
    }

    /// Rebuild a task in a known state, used by recovery.
    pub fn restored(id: TaskId, name: String, resources: Resources, state: TaskState) -> Self {
        Self {
            id,
            name,
            resources,
            state,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_tasks_are_staging() {
        let task = Task::new(TaskId::from("t1"), "t".into(), Resources::ZERO);
        assert_eq!(task.state(), TaskState::Staging);
    }

    #[test]
    fn any_transition_is_accepted() {
        let mut task = Task::new(TaskId::from("t1"), "t".into(), Resources::ZERO);
        task.set_state(TaskState::Finished);
        task.set_state(TaskState::Running);
        assert_eq!(task.state(), TaskState::Running);
    }
}
