use std::path::PathBuf;
use std::time::Duration;

use crate::resources::{Attributes, Resources};

/// How recovery treats executors found in the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Wait for live executors to re-register with the restarted agent.
    Reconnect,
    /// Proactively shut down everything found in the checkpoint.
    Cleanup,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Hostname advertised to the master.
    pub hostname: String,

    /// Root of all executor run directories and the checkpoint.
    pub work_dir: PathBuf,

    /// Directory containing the `drover-executor` launcher binary used for
    /// inline-command tasks.
    pub launcher_dir: PathBuf,

    /// Total capacity offered to the cluster.
    pub resources: Resources,

    pub attributes: Attributes,

    /// Grace period between asking an executor to shut down and forcing a
    /// kill through the isolator.
    pub executor_shutdown_grace: Duration,

    /// How long recovered executors get to re-register before they are
    /// presumed orphaned and shut down.
    pub executor_reregister_timeout: Duration,

    /// Jittered retry range for (re-)registration with the master.
    pub registration_backoff_min_ms: u64,
    pub registration_backoff_max_ms: u64,

    /// How often disk usage is sampled to tune directory retention.
    pub disk_check_interval: Duration,

    /// Maximum retention of old run directories at zero disk usage. Shrinks
    /// linearly as usage grows.
    pub gc_delay: Duration,

    pub max_completed_tasks_per_executor: usize,
    pub max_completed_executors_per_framework: usize,
    pub max_completed_frameworks: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            work_dir: PathBuf::from("/tmp/drover"),
            launcher_dir: PathBuf::from("/usr/libexec/drover"),
            resources: Resources::new(1.0, 1024, 10_240),
            attributes: Attributes::new(),
            executor_shutdown_grace: Duration::from_secs(5),
            executor_reregister_timeout: Duration::from_secs(10),
            registration_backoff_min_ms: 500,
            registration_backoff_max_ms: 2_000,
            disk_check_interval: Duration::from_secs(60),
            gc_delay: Duration::from_secs(7 * 24 * 3600),
            max_completed_tasks_per_executor: 1_000,
            max_completed_executors_per_framework: 150,
            max_completed_frameworks: 50,
        }
    }
}

impl AgentConfig {
    pub fn new(hostname: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            hostname: hostname.into(),
            work_dir: work_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Where the checkpointed state snapshot lives.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.work_dir.join("checkpoint.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.hostname, "localhost");
        assert_eq!(cfg.executor_shutdown_grace, Duration::from_secs(5));
        assert_eq!(cfg.max_completed_tasks_per_executor, 1_000);
        assert_eq!(cfg.max_completed_executors_per_framework, 150);
        assert!(cfg.registration_backoff_min_ms <= cfg.registration_backoff_max_ms);
    }

    #[test]
    fn config_builders() {
        let cfg = AgentConfig::new("node-7", "/var/lib/drover")
            .with_resources(Resources::new(8.0, 16_384, 0))
            .with_attribute("rack", "r2");
        assert_eq!(cfg.hostname, "node-7");
        assert_eq!(cfg.resources.cpus, 8.0);
        assert_eq!(cfg.attributes.get("rack").map(String::as_str), Some("r2"));
        assert_eq!(
            cfg.checkpoint_path(),
            PathBuf::from("/var/lib/drover/checkpoint.json")
        );
    }
}
