use taskmanager_domain::{
    JobStore, OperationResult, OperationResultStatus, ScheduleSpec, TaskExecutionStatus,
    TaskModification, TaskWaitingReason, TriggerSpec,
};
use taskmanager_engine::StopWait;
use taskmanager_errors::TaskManagerError;
use taskmanager_testing_utils::{TaskObjectBuilder, TestTaskManager};

/// 已初始化但调度器未启动，任务不会被执行
async fn initialized(node_id: &str) -> TestTaskManager {
    let env = TestTaskManager::new(node_id);
    let mut result = OperationResult::new("init");
    env.manager.init(&mut result).await.unwrap();
    env
}

#[tokio::test]
async fn test_add_task_creates_job_and_trigger() {
    let env = initialized("node-1").await;
    let oid = env
        .add(TaskObjectBuilder::new("recurring").recurring_every(60).build())
        .await;

    assert!(env.job_store.check_exists(&oid).await.unwrap());
    let triggers = env.job_store.triggers_of(&oid).await.unwrap();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].spec, TriggerSpec::Interval { seconds: 60 });
    assert!(!triggers[0].paused);
}

#[tokio::test]
async fn test_suspended_task_has_no_active_trigger() {
    let env = initialized("node-1").await;
    let oid = env
        .add(TaskObjectBuilder::new("recurring").recurring_every(60).build())
        .await;

    let mut result = OperationResult::new("test");
    let stopped = env
        .manager
        .suspend_task(&oid, StopWait::DoNotWait, &mut result)
        .await
        .unwrap();
    assert!(stopped);
    assert_eq!(env.get(&oid).await.execution_status, TaskExecutionStatus::Suspended);

    let triggers = env.job_store.triggers_of(&oid).await.unwrap();
    assert!(triggers.iter().all(|t| t.paused));
    let next = env.manager.get_next_run_start_time(&oid, &mut result).await.unwrap();
    assert!(next.is_none());
}

#[tokio::test]
async fn test_suspend_is_idempotent() {
    let env = initialized("node-1").await;
    let oid = env.add(TaskObjectBuilder::new("single").build()).await;

    let mut result = OperationResult::new("test");
    env.manager
        .suspend_task(&oid, StopWait::DoNotWait, &mut result)
        .await
        .unwrap();
    let first = env.get(&oid).await;

    let stopped = env
        .manager
        .suspend_task(&oid, StopWait::DoNotWait, &mut result)
        .await
        .unwrap();
    assert!(stopped);
    let second = env.get(&oid).await;
    assert_eq!(second.execution_status, TaskExecutionStatus::Suspended);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_suspend_missing_task_propagates_not_found() {
    let env = initialized("node-1").await;
    let mut result = OperationResult::new("test");
    let err = env
        .manager
        .suspend_task("no-such-oid", StopWait::DoNotWait, &mut result)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(result.last_subresult_status(), OperationResultStatus::FatalError);
}

#[tokio::test]
async fn test_resume_from_runnable_is_fatal_and_keeps_status() {
    let env = initialized("node-1").await;
    let oid = env.add(TaskObjectBuilder::new("single").build()).await;

    let mut result = OperationResult::new("test");
    let err = env.manager.resume_task(&oid, &mut result).await.unwrap_err();
    assert!(matches!(err, TaskManagerError::IllegalState(_)));
    assert_eq!(result.last_subresult_status(), OperationResultStatus::FatalError);
    assert_eq!(env.get(&oid).await.execution_status, TaskExecutionStatus::Runnable);
}

#[tokio::test]
async fn test_suspend_then_resume_reactivates_trigger() {
    let env = initialized("node-1").await;
    let oid = env
        .add(TaskObjectBuilder::new("recurring").recurring_every(30).build())
        .await;

    let mut result = OperationResult::new("test");
    env.manager
        .suspend_task(&oid, StopWait::DoNotWait, &mut result)
        .await
        .unwrap();
    env.manager.resume_task(&oid, &mut result).await.unwrap();

    let task = env.get(&oid).await;
    assert_eq!(task.execution_status, TaskExecutionStatus::Runnable);
    assert_eq!(task.waiting_reason, None);
    let triggers = env.job_store.triggers_of(&oid).await.unwrap();
    assert_eq!(triggers.len(), 1);
    assert!(!triggers[0].paused);
}

#[tokio::test]
async fn test_pause_and_unpause_restore_runnable() {
    let env = initialized("node-1").await;
    let oid = env
        .add(TaskObjectBuilder::new("recurring").recurring_every(30).build())
        .await;

    let mut result = OperationResult::new("test");
    env.manager
        .pause_task(&oid, TaskWaitingReason::Workflow, &mut result)
        .await
        .unwrap();
    let paused = env.get(&oid).await;
    assert_eq!(paused.execution_status, TaskExecutionStatus::Waiting);
    assert_eq!(paused.waiting_reason, Some(TaskWaitingReason::Workflow));
    assert!(env.job_store.check_exists(&oid).await.unwrap());
    assert!(env.job_store.triggers_of(&oid).await.unwrap().iter().all(|t| t.paused));

    env.manager.unpause_task(&oid, &mut result).await.unwrap();
    let unpaused = env.get(&oid).await;
    assert_eq!(unpaused.execution_status, TaskExecutionStatus::Runnable);
    assert_eq!(unpaused.waiting_reason, None);
    assert!(env.job_store.triggers_of(&oid).await.unwrap().iter().all(|t| !t.paused));
}

#[tokio::test]
async fn test_pause_requires_runnable() {
    let env = initialized("node-1").await;
    let oid = env.add(TaskObjectBuilder::new("suspended").suspended().build()).await;

    let mut result = OperationResult::new("test");
    let err = env
        .manager
        .pause_task(&oid, TaskWaitingReason::Other, &mut result)
        .await
        .unwrap_err();
    assert!(matches!(err, TaskManagerError::IllegalState(_)));
    assert_eq!(env.get(&oid).await.execution_status, TaskExecutionStatus::Suspended);

    let err = env.manager.unpause_task(&oid, &mut result).await.unwrap_err();
    assert!(matches!(err, TaskManagerError::IllegalState(_)));
}

#[tokio::test]
async fn test_close_removes_job_and_is_idempotent() {
    let env = initialized("node-1").await;
    let oid = env
        .add(TaskObjectBuilder::new("recurring").recurring_every(30).build())
        .await;
    assert!(env.job_store.check_exists(&oid).await.unwrap());

    let mut result = OperationResult::new("test");
    env.manager.close_task(&oid, &mut result).await.unwrap();
    let closed = env.get(&oid).await;
    assert_eq!(closed.execution_status, TaskExecutionStatus::Closed);
    assert!(closed.completion_timestamp.is_some());
    assert!(!env.job_store.check_exists(&oid).await.unwrap());

    env.manager.close_task(&oid, &mut result).await.unwrap();
    let again = env.get(&oid).await;
    assert_eq!(again.completion_timestamp, closed.completion_timestamp);
    assert!(!env.job_store.check_exists(&oid).await.unwrap());
}

#[tokio::test]
async fn test_suspend_closed_task_is_noop() {
    let env = initialized("node-1").await;
    let oid = env
        .add(TaskObjectBuilder::new("closed").closed_days_ago(1).build())
        .await;

    let mut result = OperationResult::new("test");
    let stopped = env
        .manager
        .suspend_task(&oid, StopWait::DoNotWait, &mut result)
        .await
        .unwrap();
    assert!(stopped);
    assert_eq!(env.get(&oid).await.execution_status, TaskExecutionStatus::Closed);
}

#[tokio::test]
async fn test_schedule_now_reopens_closed_task() {
    let env = initialized("node-1").await;
    let oid = env
        .add(TaskObjectBuilder::new("closed").closed_days_ago(1).build())
        .await;
    assert!(!env.job_store.check_exists(&oid).await.unwrap());

    let mut result = OperationResult::new("test");
    env.manager.schedule_task_now(&oid, &mut result).await.unwrap();
    let task = env.get(&oid).await;
    assert_eq!(task.execution_status, TaskExecutionStatus::Runnable);
    assert!(task.completion_timestamp.is_none());
    assert!(env.job_store.check_exists(&oid).await.unwrap());
}

#[tokio::test]
async fn test_schedule_now_rejects_suspended_task() {
    let env = initialized("node-1").await;
    let oid = env.add(TaskObjectBuilder::new("suspended").suspended().build()).await;

    let mut result = OperationResult::new("test");
    let err = env.manager.schedule_task_now(&oid, &mut result).await.unwrap_err();
    assert!(matches!(err, TaskManagerError::IllegalState(_)));
    assert_eq!(result.last_subresult_status(), OperationResultStatus::FatalError);
}

#[tokio::test]
async fn test_bulk_resume_isolates_failures() {
    let env = initialized("node-1").await;
    let suspended = env.add(TaskObjectBuilder::new("a").suspended().build()).await;
    let runnable = env.add(TaskObjectBuilder::new("b").build()).await;

    let mut result = OperationResult::new("test");
    env.manager
        .resume_tasks(
            &[runnable.clone(), "missing".to_string(), suspended.clone()],
            &mut result,
        )
        .await;

    assert_eq!(env.get(&suspended).await.execution_status, TaskExecutionStatus::Runnable);
    assert_eq!(env.get(&runnable).await.execution_status, TaskExecutionStatus::Runnable);
    assert_eq!(result.last_subresult_status(), OperationResultStatus::PartialError);
}

#[tokio::test]
async fn test_add_waiting_task_defaults_reason() {
    let env = initialized("node-1").await;
    let mut task = TaskObjectBuilder::new("waiting").build();
    task.execution_status = TaskExecutionStatus::Waiting;
    let oid = env.add(task).await;

    let stored = env.get(&oid).await;
    assert_eq!(stored.waiting_reason, Some(TaskWaitingReason::Other));
}

#[tokio::test]
async fn test_add_task_rejects_invalid_cron() {
    let env = initialized("node-1").await;
    let mut result = OperationResult::new("test");
    let err = env
        .manager
        .add_task(
            TaskObjectBuilder::new("bad").recurring_cron("not a cron").build(),
            &mut result,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TaskManagerError::InvalidCron { .. }));
}

#[tokio::test]
async fn test_modify_schedule_recreates_trigger() {
    let env = initialized("node-1").await;
    let oid = env
        .add(TaskObjectBuilder::new("recurring").recurring_every(60).build())
        .await;

    let mut result = OperationResult::new("test");
    env.manager
        .modify_task(
            &oid,
            &[TaskModification::Schedule(Some(ScheduleSpec::interval(120)))],
            &mut result,
        )
        .await
        .unwrap();

    let triggers = env.job_store.triggers_of(&oid).await.unwrap();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].spec, TriggerSpec::Interval { seconds: 120 });
}

#[tokio::test]
async fn test_switch_to_background_persists_transient_task() {
    let env = initialized("node-1").await;
    let mut task = env.manager.create_task_instance("import");
    assert!(task.is_transient());
    task.set_name("background import");

    let mut result = OperationResult::new("test");
    let oid = env
        .manager
        .switch_to_background(&mut task, &mut result)
        .await
        .unwrap();

    assert!(task.is_persistent());
    assert_eq!(task.oid(), Some(oid.as_str()));
    let stored = env.get(&oid).await;
    assert_eq!(stored.name, "background import");
    assert_eq!(stored.execution_status, TaskExecutionStatus::Runnable);
    assert!(stored.result.unwrap().is_in_progress());
    assert_eq!(result.last_subresult_status(), OperationResultStatus::InProgress);
}

#[tokio::test]
async fn test_full_sync_removes_orphan_jobs() {
    let env = initialized("node-1").await;
    let oid = env.add(TaskObjectBuilder::new("single").build()).await;
    env.job_store.add_job("orphan", true).await.unwrap();

    let mut result = OperationResult::new("test");
    env.manager.synchronize_tasks(&mut result).await;

    assert!(!env.job_store.check_exists("orphan").await.unwrap());
    assert!(env.job_store.check_exists(&oid).await.unwrap());
}
