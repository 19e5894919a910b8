use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::messages::{AgentId, ExecutorId, FrameworkId};

/// Derive the working directory for one executor run. The run id keeps
/// restarts of the same executor id from sharing a directory.
pub fn executor_run_directory(
    work_dir: &Path,
    agent_id: &AgentId,
    framework_id: &FrameworkId,
    executor_id: &ExecutorId,
    run_id: &Uuid,
) -> PathBuf {
    work_dir
        .join("agents")
        .join(&agent_id.0)
        .join("frameworks")
        .join(&framework_id.0)
        .join("executors")
        .join(&executor_id.0)
        .join("runs")
        .join(run_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_directory_layout() {
        let run_id = Uuid::new_v4();
        let dir = executor_run_directory(
            Path::new("/var/lib/drover"),
            &AgentId::from("a1"),
            &FrameworkId::from("f1"),
            &ExecutorId::from("e1"),
            &run_id,
        );
        assert_eq!(
            dir,
            PathBuf::from(format!(
                "/var/lib/drover/agents/a1/frameworks/f1/executors/e1/runs/{}",
                run_id
            ))
        );
    }

    #[test]
    fn distinct_runs_get_distinct_directories() {
        let work = Path::new("/tmp/w");
        let a = AgentId::from("a");
        let f = FrameworkId::from("f");
        let e = ExecutorId::from("e");
        let d1 = executor_run_directory(work, &a, &f, &e, &Uuid::new_v4());
        let d2 = executor_run_directory(work, &a, &f, &e, &Uuid::new_v4());
        assert_ne!(d1, d2);
    }
}
