//! Disk housekeeping collaborators: a capacity probe and a directory
//! garbage collector.
//!
//! The agent periodically samples disk usage and derives a maximum
//! retention age for old run directories as a decreasing function of the
//! usage fraction. This is advisory housekeeping, not correctness-critical.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Maximum retention age for old run directories, shrinking linearly from
/// the full delay at an empty disk to zero at a full one.
pub fn executor_dir_max_age(gc_delay: Duration, usage: f64) -> Duration {
    gc_delay.mul_f64((1.0 - usage).clamp(0.0, 1.0))
}

pub trait DiskProbe: Send + Sync {
    /// Sample the usage fraction (0.0 = empty, 1.0 = full) of the volume
    /// backing the work directory.
    fn sample(&self) -> oneshot::Receiver<Result<f64, String>>;
}

/// Shells out to `df` for the usage fraction.
pub struct DfProbe {
    path: PathBuf,
}

impl DfProbe {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl DiskProbe for DfProbe {
    fn sample(&self) -> oneshot::Receiver<Result<f64, String>> {
        let (tx, rx) = oneshot::channel();
        let path = self.path.clone();

        tokio::spawn(async move {
            let output = Command::new("df")
                .arg("--output=pcent")
                .arg(&path)
                .output()
                .await;

            let result = match output {
                Ok(output) if output.status.success() => {
                    parse_df_pcent(&String::from_utf8_lossy(&output.stdout))
                }
                Ok(output) => Err(format!(
                    "df exited with {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr)
                )),
                Err(e) => Err(format!("failed to run df: {}", e)),
            };

            let _ = tx.send(result);
        });

        rx
    }
}

fn parse_df_pcent(stdout: &str) -> Result<f64, String> {
    let line = stdout
        .lines()
        .nth(1)
        .ok_or_else(|| "unexpected df output".to_string())?;
    let percent: f64 = line
        .trim()
        .trim_end_matches('%')
        .parse()
        .map_err(|e| format!("unparsable df output {:?}: {}", line, e))?;
    Ok(percent / 100.0)
}

pub trait DirectoryGc: Send + Sync {
    /// Schedule a directory for removal once it is `max_age` old.
    fn schedule(&self, path: PathBuf, max_age: Duration);

    /// Advisory: remove already-scheduled directories older than `max_age`
    /// ahead of their original deadline. Called as disk usage grows.
    fn prune(&self, max_age: Duration);
}

struct ScheduledRemoval {
    path: PathBuf,
    scheduled_at: Instant,
}

/// Keeps an in-memory schedule and deletes directories when they expire or
/// when a prune lowers the retention age below their current age.
pub struct DeferredRemover {
    scheduled: std::sync::Arc<Mutex<Vec<ScheduledRemoval>>>,
}

impl DeferredRemover {
    pub fn new() -> Self {
        Self {
            scheduled: std::sync::Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn remove(path: PathBuf) {
        tokio::spawn(async move {
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => tracing::info!(path = %path.display(), "Removed old run directory"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove run directory")
                }
            }
        });
    }
}

impl Default for DeferredRemover {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryGc for DeferredRemover {
    fn schedule(&self, path: PathBuf, max_age: Duration) {
        let scheduled_at = Instant::now();
        self.scheduled
            .lock()
            .expect("gc schedule lock poisoned")
            .push(ScheduledRemoval {
                path: path.clone(),
                scheduled_at,
            });

        tracing::info!(
            path = %path.display(),
            max_age_secs = max_age.as_secs(),
            "Scheduled run directory for removal"
        );

        // Deadline removal; a prune may get there first.
        let scheduled = self.scheduled.clone();
        tokio::spawn(async move {
            tokio::time::sleep(max_age).await;
            let still_scheduled = {
                let mut scheduled = scheduled.lock().expect("gc schedule lock poisoned");
                match scheduled.iter().position(|entry| entry.path == path) {
                    Some(index) => {
                        scheduled.swap_remove(index);
                        true
                    }
                    None => false,
                }
            };
            if still_scheduled {
                Self::remove(path);
            }
        });
    }

    fn prune(&self, max_age: Duration) {
        let mut scheduled = self.scheduled.lock().expect("gc schedule lock poisoned");
        let now = Instant::now();
        let mut index = 0;
        while index < scheduled.len() {
            if now.duration_since(scheduled[index].scheduled_at) >= max_age {
                let expired = scheduled.swap_remove(index);
                Self::remove(expired.path);
            } else {
                index += 1;
            }
        }
    }
}
