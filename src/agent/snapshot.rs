//! Read-only projections of agent state for external monitoring.
//!
//! Introspection surfaces (HTTP or otherwise) consume these views through
//! the [`AgentEvent::Snapshot`](crate::messages::AgentEvent::Snapshot)
//! query; nothing here can mutate agent state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::messages::{AgentId, ExecutorId, FrameworkId, TaskId};
use crate::resources::{Attributes, Resources};
use crate::state::{Executor, Framework, Task};

use super::Agent;

#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub id: TaskId,
    pub name: String,
    pub state: String,
    pub resources: Resources,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutorView {
    pub id: ExecutorId,
    pub run_id: Uuid,
    pub directory: String,
    pub registered: bool,
    pub shutting_down: bool,
    pub resources: Resources,
    pub queued_tasks: Vec<TaskId>,
    pub tasks: Vec<TaskView>,
    pub completed_tasks: Vec<TaskView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameworkView {
    pub id: FrameworkId,
    pub name: String,
    pub user: String,
    pub scheduler_addr: String,
    pub shutting_down: bool,
    pub pending_updates: usize,
    pub executors: Vec<ExecutorView>,
    pub completed_executors: Vec<ExecutorView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourcesView {
    pub total: Resources,
    pub allocated: Resources,
    pub available: Resources,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsView {
    pub tasks: BTreeMap<String, u64>,
    pub valid_status_updates: u64,
    pub invalid_status_updates: u64,
    pub valid_framework_messages: u64,
    pub invalid_framework_messages: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentView {
    pub agent_id: Option<AgentId>,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    pub connected: bool,
    pub halting: bool,
    pub resources: ResourcesView,
    pub attributes: Attributes,
    pub stats: StatsView,
    pub frameworks: Vec<FrameworkView>,
    pub completed_frameworks: Vec<FrameworkId>,
}

fn task_view(task: &Task) -> TaskView {
    TaskView {
        id: task.id.clone(),
        name: task.name.clone(),
        state: task.state().to_string(),
        resources: task.resources,
    }
}

fn executor_view(executor: &Executor) -> ExecutorView {
    ExecutorView {
        id: executor.id.clone(),
        run_id: executor.run_id,
        directory: executor.directory.display().to_string(),
        registered: executor.is_registered(),
        shutting_down: executor.shutting_down,
        resources: executor.resources,
        queued_tasks: executor.queued.keys().cloned().collect(),
        tasks: executor.launched.values().map(task_view).collect(),
        completed_tasks: executor.completed_tasks().map(task_view).collect(),
    }
}

fn framework_view(framework: &Framework) -> FrameworkView {
    FrameworkView {
        id: framework.id.clone(),
        name: framework.spec.name.clone(),
        user: framework.spec.user.clone(),
        scheduler_addr: framework.scheduler_addr.clone(),
        shutting_down: framework.shutting_down,
        pending_updates: framework.updates.len(),
        executors: framework.executors.values().map(executor_view).collect(),
        completed_executors: framework
            .completed_executors()
            .map(|executor| executor_view(executor))
            .collect(),
    }
}

impl Agent {
    /// Project the entire record tree into a serializable, read-only view.
    pub fn view(&self) -> AgentView {
        AgentView {
            agent_id: self.agent_id.clone(),
            hostname: self.config.hostname.clone(),
            started_at: self.started_at,
            connected: self.connected,
            halting: self.halting,
            resources: ResourcesView {
                total: *self.ledger.total(),
                allocated: *self.ledger.allocated(),
                available: self.ledger.available(),
            },
            attributes: self.config.attributes.clone(),
            stats: StatsView {
                tasks: self
                    .stats
                    .task_states()
                    .iter()
                    .map(|(state, count)| (state.to_string(), *count))
                    .collect(),
                valid_status_updates: self.stats.valid_status_updates,
                invalid_status_updates: self.stats.invalid_status_updates,
                valid_framework_messages: self.stats.valid_framework_messages,
                invalid_framework_messages: self.stats.invalid_framework_messages,
            },
            frameworks: self.frameworks.values().map(framework_view).collect(),
            completed_frameworks: self
                .completed_frameworks
                .iter()
                .map(|framework| framework.id.clone())
                .collect(),
        }
    }
}
