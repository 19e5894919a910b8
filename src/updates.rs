//! Contract with the reliable status-update delivery subsystem.
//!
//! The delivery subsystem guarantees at-least-once, in-order handoff of
//! status updates toward the master. The agent only purges its local
//! pending-update bookkeeping once a completion arrives; completions
//! re-enter the event loop, never mutate agent state directly.

use std::sync::Mutex;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::messages::{FrameworkId, MasterLink, MasterMessage, StatusUpdate, TaskId};

/// Completion of a delivery-subsystem operation.
pub type UpdateCompletion = oneshot::Receiver<Result<(), String>>;

pub trait UpdateManager: Send + Sync {
    /// The agent detected a new master (or lost the current one).
    fn master_changed(&self, master: Option<MasterLink>);

    /// Hand an update off for delivery to the master. The completion
    /// resolves once the subsystem has durably taken responsibility for it.
    fn submit(&self, update: StatusUpdate) -> UpdateCompletion;

    /// Record a master acknowledgment. The completion resolves once the
    /// update is durably marked delivered.
    fn acknowledge(
        &self,
        framework_id: &FrameworkId,
        task_id: &TaskId,
        update_id: Uuid,
    ) -> UpdateCompletion;
}

/// Minimal in-process delivery: forwards each update straight to the
/// current master link and completes immediately. Stands in for the real
/// retrying subsystem in local setups.
pub struct DirectUpdateManager {
    master: Mutex<Option<MasterLink>>,
}

impl DirectUpdateManager {
    pub fn new() -> Self {
        Self {
            master: Mutex::new(None),
        }
    }
}

impl Default for DirectUpdateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateManager for DirectUpdateManager {
    fn master_changed(&self, master: Option<MasterLink>) {
        *self.master.lock().expect("master link lock poisoned") = master;
    }

    fn submit(&self, update: StatusUpdate) -> UpdateCompletion {
        let (tx, rx) = oneshot::channel();
        let master = self
            .master
            .lock()
            .expect("master link lock poisoned")
            .clone();

        match master {
            Some(link) => {
                let result = link
                    .try_send(MasterMessage::StatusUpdate { update })
                    .map_err(|e| format!("master link unavailable: {}", e));
                let _ = tx.send(result);
            }
            None => {
                // No master yet; the update stays pending at the agent and
                // a real delivery subsystem would buffer it.
                let _ = tx.send(Err("no master detected".to_string()));
            }
        }
        rx
    }

    fn acknowledge(
        &self,
        _framework_id: &FrameworkId,
        _task_id: &TaskId,
        _update_id: Uuid,
    ) -> UpdateCompletion {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(()));
        rx
    }
}
