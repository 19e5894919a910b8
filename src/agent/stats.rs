use std::collections::HashMap;

use crate::messages::TaskState;

/// Operational counters owned by the agent and mutated only through these
/// explicit increments. Gives operators a health signal without log
/// inspection.
#[derive(Debug, Default, Clone)]
pub struct Stats {
    tasks: HashMap<TaskState, u64>,
    pub valid_status_updates: u64,
    pub invalid_status_updates: u64,
    pub valid_framework_messages: u64,
    pub invalid_framework_messages: u64,
}

impl Stats {
    pub fn record_task_state(&mut self, state: TaskState) {
        *self.tasks.entry(state).or_default() += 1;
    }

    pub fn task_count(&self, state: TaskState) -> u64 {
        self.tasks.get(&state).copied().unwrap_or(0)
    }

    pub fn task_states(&self) -> &HashMap<TaskState, u64> {
        &self.tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_states_accumulate() {
        let mut stats = Stats::default();
        stats.record_task_state(TaskState::Staging);
        stats.record_task_state(TaskState::Staging);
        stats.record_task_state(TaskState::Lost);
        assert_eq!(stats.task_count(TaskState::Staging), 2);
        assert_eq!(stats.task_count(TaskState::Lost), 1);
        assert_eq!(stats.task_count(TaskState::Finished), 0);
    }
}
