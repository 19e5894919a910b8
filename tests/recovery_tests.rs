
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use drover::checkpoint::{
    AgentSnapshot, ExecutorSnapshot, FrameworkSnapshot, TaskSnapshot,
};
use drover::config::RecoveryMode;
use drover::error::AgentError;
use drover::messages::{
    AgentEvent, AgentId, CommandSpec, ExecutorId, ExecutorMessage, ExecutorSpec, FrameworkId,
    FrameworkSpec, TaskId, TaskState,
};
use drover::resources::Resources;
use test_harness::{executor_link, TestAgent};

/// A checkpoint with one framework running one executor with a single
/// running task.
fn snapshot_with_executor(directory: PathBuf) -> AgentSnapshot {
    AgentSnapshot {
        agent_id: Some(AgentId::from("a1")),
        frameworks: vec![FrameworkSnapshot {
            id: FrameworkId::from("f1"),
            spec: FrameworkSpec {
                name: "analytics".to_string(),
                user: "nobody".to_string(),
            },
            scheduler_addr: "scheduler@10.0.0.1:5050".to_string(),
            shutting_down: false,
            executors: vec![ExecutorSnapshot {
                id: ExecutorId::from("e1"),
                spec: ExecutorSpec {
                    id: ExecutorId::from("e1"),
                    name: "e1".to_string(),
                    source: "e1".to_string(),
                    command: CommandSpec {
                        value: "sleep 60".to_string(),
                    },
                    resources: Resources::new(1.0, 512, 0),
                },
                run_id: uuid::Uuid::new_v4(),
                directory,
                shutting_down: false,
                queued: vec![],
                tasks: vec![TaskSnapshot {
                    id: TaskId::from("t1"),
                    name: "t1".to_string(),
                    resources: Resources::new(1.0, 512, 0),
                    state: TaskState::Running,
                }],
            }],
        }],
    }
}

#[tokio::test(start_paused = true)]
async fn no_checkpoint_means_clean_start() {
    let mut harness = TestAgent::new().await;

    harness
        .agent
        .recover(RecoveryMode::Reconnect, true)
        .await
        .unwrap();

    let view = harness.agent.view();
    assert!(view.frameworks.is_empty());
    assert!(view.agent_id.is_none());
    assert!(view.resources.allocated.is_zero());
}

#[tokio::test(start_paused = true)]
async fn recovery_runs_at_most_once() {
    let mut harness = TestAgent::new().await;

    harness
        .agent
        .recover(RecoveryMode::Reconnect, false)
        .await
        .unwrap();

    let second = harness.agent.recover(RecoveryMode::Reconnect, false).await;
    assert!(matches!(second, Err(AgentError::RecoveryAlreadyAttempted)));
}

#[tokio::test(start_paused = true)]
async fn reconnect_restores_records_and_footprints() {
    let mut harness = TestAgent::new().await;
    let run_dir = harness.work_dir.path().join("run-e1");
    std::fs::create_dir_all(&run_dir).unwrap();
    *harness.checkpoint.snapshot.lock().unwrap() = Some(snapshot_with_executor(run_dir));

    harness
        .agent
        .recover(RecoveryMode::Reconnect, true)
        .await
        .unwrap();

    let view = harness.agent.view();
    assert_eq!(view.agent_id, Some(AgentId::from("a1")));
    assert_eq!(view.frameworks.len(), 1);
    let executor = &view.frameworks[0].executors[0];
    assert!(!executor.registered);
    assert_eq!(executor.tasks.len(), 1);
    assert_eq!(executor.tasks[0].state, "running");
    assert_eq!(view.resources.allocated, Resources::new(1.0, 512, 0));
    // Nothing is killed while the re-registration window is open.
    assert!(harness.isolator.killed.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn executors_that_never_reregister_are_shut_down() {
    let mut harness = TestAgent::new().await;
    let run_dir = harness.work_dir.path().join("run-e1");
    std::fs::create_dir_all(&run_dir).unwrap();
    *harness.checkpoint.snapshot.lock().unwrap() = Some(snapshot_with_executor(run_dir));

    harness
        .agent
        .recover(RecoveryMode::Reconnect, true)
        .await
        .unwrap();

    // The paused clock jumps past the re-registration window.
    harness.pump_all().await;

    assert_eq!(
        harness.isolator.killed.lock().unwrap().as_slice(),
        &[(FrameworkId::from("f1"), ExecutorId::from("e1"))]
    );
}

#[tokio::test(start_paused = true)]
async fn reregistering_executor_survives_the_window() {
    let mut harness = TestAgent::new().await;
    let run_dir = harness.work_dir.path().join("run-e1");
    std::fs::create_dir_all(&run_dir).unwrap();
    *harness.checkpoint.snapshot.lock().unwrap() = Some(snapshot_with_executor(run_dir));

    harness
        .agent
        .recover(RecoveryMode::Reconnect, true)
        .await
        .unwrap();

    let (link, mut from_agent) = executor_link();
    harness
        .agent
        .handle(AgentEvent::ReregisterExecutor {
            framework_id: FrameworkId::from("f1"),
            executor_id: ExecutorId::from("e1"),
            link,
            tasks: vec![],
            updates: vec![],
        })
        .await;

    assert!(matches!(
        from_agent.try_recv().unwrap(),
        ExecutorMessage::Reregistered { .. }
    ));

    harness.pump_all().await;
    assert!(harness.isolator.killed.lock().unwrap().is_empty());
    assert!(harness.agent.view().frameworks[0].executors[0].registered);
}

#[tokio::test(start_paused = true)]
async fn cleanup_mode_shuts_down_everything_recovered() {
    let mut harness = TestAgent::new().await;
    let run_dir = harness.work_dir.path().join("run-e1");
    std::fs::create_dir_all(&run_dir).unwrap();
    *harness.checkpoint.snapshot.lock().unwrap() = Some(snapshot_with_executor(run_dir));

    harness
        .agent
        .recover(RecoveryMode::Cleanup, true)
        .await
        .unwrap();

    // No link survives a restart, so the kill goes through the isolator.
    assert_eq!(
        harness.isolator.killed.lock().unwrap().as_slice(),
        &[(FrameworkId::from("f1"), ExecutorId::from("e1"))]
    );
    assert!(harness.agent.view().frameworks[0].executors[0].shutting_down);
}

#[tokio::test(start_paused = true)]
async fn strict_recovery_fails_on_missing_run_directory() {
    let mut harness = TestAgent::new().await;
    let missing = harness.work_dir.path().join("does-not-exist");
    *harness.checkpoint.snapshot.lock().unwrap() = Some(snapshot_with_executor(missing));

    let result = harness.agent.recover(RecoveryMode::Reconnect, true).await;
    assert!(matches!(result, Err(AgentError::Recovery(_))));
}

#[tokio::test(start_paused = true)]
async fn lax_recovery_skips_damaged_executors() {
    let mut harness = TestAgent::new().await;
    let missing = harness.work_dir.path().join("does-not-exist");
    *harness.checkpoint.snapshot.lock().unwrap() = Some(snapshot_with_executor(missing));

    harness
        .agent
        .recover(RecoveryMode::Reconnect, false)
        .await
        .unwrap();

    let view = harness.agent.view();
    assert!(view.frameworks.is_empty());
    assert!(view.resources.allocated.is_zero());
}

#[tokio::test(start_paused = true)]
async fn unreadable_checkpoint_is_fatal_only_when_strict() {
    let mut strict = TestAgent::new().await;
    strict.checkpoint.fail_load.store(true, Ordering::SeqCst);
    let result = strict.agent.recover(RecoveryMode::Reconnect, true).await;
    assert!(matches!(result, Err(AgentError::Recovery(_))));

    let mut lax = TestAgent::new().await;
    lax.checkpoint.fail_load.store(true, Ordering::SeqCst);
    lax.agent
        .recover(RecoveryMode::Reconnect, false)
        .await
        .unwrap();
    assert!(lax.agent.view().frameworks.is_empty());
}

#[tokio::test(start_paused = true)]
async fn events_before_recovery_are_refused() {
    let mut harness = TestAgent::new().await;

    harness
        .agent
        .handle(test_harness::run_task_event(
            "f1",
            test_harness::command_task("t1", 1.0, 512),
        ))
        .await;

    assert!(harness.isolator.launched.lock().unwrap().is_empty());
    assert!(harness.updates.submitted.lock().unwrap().is_empty());
}
