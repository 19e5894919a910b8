//! Message contracts between the agent, the master, and executor processes.
//!
//! The wire encoding of the cluster protocol is out of scope here: links to
//! the master and to executor processes are typed channels carrying these
//! contracts directly. The agent itself is driven by [`AgentEvent`], the
//! single inbound queue that every message, timer, and async completion
//! re-enters through.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::agent::AgentView;
use crate::resources::{Attributes, Resources};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameworkId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutorId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl fmt::Display for FrameworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for FrameworkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for ExecutorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a task. Transitions are not validated at this layer;
/// the master is trusted to send sensible orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Staging,
    Starting,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Killed | TaskState::Lost
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Staging => write!(f, "staging"),
            TaskState::Starting => write!(f, "starting"),
            TaskState::Running => write!(f, "running"),
            TaskState::Finished => write!(f, "finished"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::Killed => write!(f, "killed"),
            TaskState::Lost => write!(f, "lost"),
        }
    }
}

/// Identity the agent registers with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub hostname: String,
    pub resources: Resources,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkSpec {
    pub name: String,
    pub user: String,
}

/// A shell command, run via `sh -c`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSpec {
    pub id: ExecutorId,
    pub name: String,
    /// Identifies what this executor runs, for operators (the task id for
    /// synthesized command executors).
    pub source: String,
    pub command: CommandSpec,
    pub resources: Resources,
}

/// A task-launch instruction. Exactly one of `executor` and `command` must
/// be set; carrying both or neither is a fatal precondition failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    pub name: String,
    pub resources: Resources,
    pub executor: Option<ExecutorSpec>,
    pub command: Option<CommandSpec>,
}

/// A task state change flowing from an executor (or synthesized locally)
/// toward the master. `update_id` keys acknowledgment tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub update_id: Uuid,
    pub framework_id: FrameworkId,
    pub executor_id: Option<ExecutorId>,
    pub agent_id: Option<AgentId>,
    pub task_id: TaskId,
    pub state: TaskState,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Messages the agent sends to the master.
#[derive(Debug, Clone)]
pub enum MasterMessage {
    Register {
        info: AgentInfo,
    },
    Reregister {
        agent_id: AgentId,
        info: AgentInfo,
    },
    StatusUpdate {
        update: StatusUpdate,
    },
    FrameworkMessage {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },
}

/// Messages the agent sends to an executor process.
#[derive(Debug, Clone)]
pub enum ExecutorMessage {
    Registered {
        agent_id: AgentId,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
    },
    Reregistered {
        agent_id: AgentId,
    },
    RunTask {
        task: TaskSpec,
    },
    KillTask {
        task_id: TaskId,
    },
    Shutdown,
    FrameworkMessage {
        data: Vec<u8>,
    },
    UpdateAcknowledged {
        task_id: TaskId,
        update_id: Uuid,
    },
}

/// Outbound channel to the master.
pub type MasterLink = mpsc::Sender<MasterMessage>;

/// The liveness handle of a registered executor process.
pub type ExecutorLink = mpsc::Sender<ExecutorMessage>;

/// Everything that can drive the agent state machine: master messages,
/// executor messages, isolator reports, timers, and async completions.
/// Processed strictly one at a time by the agent's event loop.
#[derive(Debug)]
pub enum AgentEvent {
    // Master detection and registration.
    NewMasterDetected {
        master: MasterLink,
    },
    NoMasterDetected,
    Registered {
        agent_id: AgentId,
    },
    Reregistered {
        agent_id: AgentId,
    },
    RegistrationRetry,

    // Instructions from the master.
    RunTask {
        framework: FrameworkSpec,
        framework_id: FrameworkId,
        scheduler_addr: String,
        task: TaskSpec,
    },
    KillTask {
        framework_id: FrameworkId,
        task_id: TaskId,
    },
    ShutdownFramework {
        framework_id: FrameworkId,
    },
    SchedulerToExecutor {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },
    UpdateFramework {
        framework_id: FrameworkId,
        scheduler_addr: String,
    },
    StatusUpdateAcknowledged {
        framework_id: FrameworkId,
        task_id: TaskId,
        update_id: Uuid,
    },

    // Messages from executor processes.
    RegisterExecutor {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        link: ExecutorLink,
    },
    ReregisterExecutor {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        link: ExecutorLink,
        tasks: Vec<TaskSpec>,
        updates: Vec<StatusUpdate>,
    },
    StatusUpdate {
        update: StatusUpdate,
    },
    ExecutorToScheduler {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },
    Ping {
        reply: oneshot::Sender<()>,
    },

    // Isolator reports.
    ExecutorStarted {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        pid: u32,
    },
    ExecutorTerminated {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        exit_code: Option<i32>,
        destroyed: bool,
        message: String,
    },

    // Async completions re-entering the loop.
    UpdateDelivered {
        update: StatusUpdate,
        result: std::result::Result<(), String>,
    },
    AcknowledgmentProcessed {
        framework_id: FrameworkId,
        task_id: TaskId,
        update_id: Uuid,
        result: std::result::Result<(), String>,
    },
    DiskUsageChecked {
        result: std::result::Result<f64, String>,
    },

    // Timers. Handlers must re-check current state; cancellation is
    // best-effort and a stale timer must no-op.
    ShutdownExecutorTimeout {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        run_id: Uuid,
    },
    ReregisterTimeout,
    CheckDiskUsage,

    // Introspection and shutdown.
    Snapshot {
        reply: oneshot::Sender<AgentView>,
    },
    Shutdown,
}
