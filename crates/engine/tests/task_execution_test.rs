use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskmanager_core::TaskManagerConfig;
use taskmanager_domain::{
    JobStore, OperationResult, OperationResultStatus, TaskExecutionStatus, TaskFilter,
    TaskManagerResult, TaskModification, TaskObject, TaskRepository, TaskWaitingReason,
};
use taskmanager_engine::{StopWait, TaskManager, TaskRunResultStatus, NOOP_HANDLER_URI};
use taskmanager_infrastructure::{
    InMemoryJobStore, InMemoryNodeRepository, InMemoryTaskRepository, JobStoreConfig,
};
use taskmanager_testing_utils::{
    BlockingHandler, CountingHandler, ScriptedNodeClient, TaskObjectBuilder, TestEnv,
    TestTaskManager,
};
use tokio::sync::Notify;

const COUNTING_URI: &str = "http://example.com/handlers/counting";
const BLOCKING_URI: &str = "http://example.com/handlers/blocking";
const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_single_task_runs_once_and_closes() {
    let env = TestTaskManager::started("node-1").await;
    let handler = CountingHandler::finishing();
    env.manager.register_handler(COUNTING_URI, handler.clone());

    let oid = env
        .add(TaskObjectBuilder::new("single").with_handler(COUNTING_URI).build())
        .await;

    assert!(
        env.wait_for_task(&oid, |t| t.execution_status == TaskExecutionStatus::Closed, WAIT)
            .await
    );
    let task = env.get(&oid).await;
    assert_eq!(handler.runs(), 1);
    assert_eq!(task.progress, 1);
    assert!(task.node.is_none());
    assert!(task.last_run_start_timestamp.is_some());
    assert!(task.last_run_finish_timestamp.is_some());
    assert!(task.completion_timestamp.is_some());
    assert_eq!(task.result.unwrap().status, OperationResultStatus::Success);

    env.shutdown().await;
}

#[tokio::test]
async fn test_recurring_task_keeps_running_until_suspended() {
    let env = TestTaskManager::started("node-1").await;
    let handler = CountingHandler::finishing();
    env.manager.register_handler(COUNTING_URI, handler.clone());

    let oid = env
        .add(
            TaskObjectBuilder::new("recurring")
                .with_handler(COUNTING_URI)
                .recurring_every(1)
                .build(),
        )
        .await;

    let ran_twice = TestEnv::wait_for(|| async { handler.runs() >= 2 }, WAIT).await;
    assert!(ran_twice);
    assert_eq!(env.get(&oid).await.execution_status, TaskExecutionStatus::Runnable);

    let mut result = OperationResult::new("test");
    let stopped = env
        .manager
        .suspend_task(&oid, StopWait::For(Duration::from_secs(2)), &mut result)
        .await
        .unwrap();
    assert!(stopped);
    let runs_after_suspend = handler.runs();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(handler.runs(), runs_after_suspend);

    env.shutdown().await;
}

#[tokio::test]
async fn test_recurring_task_with_permanent_error_is_suspended() {
    let env = TestTaskManager::started("node-1").await;
    let handler = CountingHandler::new(TaskRunResultStatus::PermanentError);
    env.manager.register_handler(COUNTING_URI, handler.clone());

    let oid = env
        .add(
            TaskObjectBuilder::new("failing")
                .with_handler(COUNTING_URI)
                .recurring_every(1)
                .build(),
        )
        .await;

    assert!(
        env.wait_for_task(&oid, |t| t.execution_status == TaskExecutionStatus::Suspended, WAIT)
            .await
    );
    assert_eq!(handler.runs(), 1);
    assert!(env.get(&oid).await.result.unwrap().is_error());

    env.shutdown().await;
}

#[tokio::test]
async fn test_single_task_with_permanent_error_is_closed() {
    let env = TestTaskManager::started("node-1").await;
    let handler = CountingHandler::new(TaskRunResultStatus::PermanentError);
    env.manager.register_handler(COUNTING_URI, handler.clone());

    let oid = env
        .add(TaskObjectBuilder::new("failing").with_handler(COUNTING_URI).build())
        .await;

    assert!(
        env.wait_for_task(&oid, |t| t.execution_status == TaskExecutionStatus::Closed, WAIT)
            .await
    );
    assert_eq!(
        env.get(&oid).await.result.unwrap().status,
        OperationResultStatus::FatalError
    );

    env.shutdown().await;
}

#[tokio::test]
async fn test_task_without_registered_handler_is_closed_with_fatal_result() {
    let env = TestTaskManager::started("node-1").await;
    let oid = env
        .add(
            TaskObjectBuilder::new("orphan")
                .with_handler("http://example.com/handlers/unknown")
                .build(),
        )
        .await;

    assert!(
        env.wait_for_task(&oid, |t| t.execution_status == TaskExecutionStatus::Closed, WAIT)
            .await
    );
    assert_eq!(
        env.get(&oid).await.result.unwrap().status,
        OperationResultStatus::FatalError
    );

    env.shutdown().await;
}

#[tokio::test]
async fn test_suspend_stops_running_task_and_waits() {
    let env = TestTaskManager::started("node-1").await;
    let handler = BlockingHandler::new();
    env.manager.register_handler(BLOCKING_URI, handler.clone());

    let oid = env
        .add(TaskObjectBuilder::new("blocking").with_handler(BLOCKING_URI).build())
        .await;
    assert!(TestEnv::wait_for(|| async { handler.has_started() }, WAIT).await);
    assert!(env.manager.execution_manager().is_task_running_locally(&oid).await);

    let mut result = OperationResult::new("test");
    let stopped = env
        .manager
        .suspend_task(&oid, StopWait::For(Duration::from_secs(2)), &mut result)
        .await
        .unwrap();

    assert!(stopped);
    assert!(handler.has_stopped());
    assert!(
        env.wait_for_task(&oid, |t| t.node.is_none(), WAIT).await,
        "运行节点应在结束后清除"
    );
    let task = env.get(&oid).await;
    assert_eq!(task.execution_status, TaskExecutionStatus::Suspended);
    assert!(!env.manager.execution_manager().is_task_running_locally(&oid).await);

    env.shutdown().await;
}

#[tokio::test]
async fn test_running_task_is_reported_by_search() {
    let env = TestTaskManager::started("node-1").await;
    let handler = BlockingHandler::new();
    env.manager.register_handler(BLOCKING_URI, handler.clone());

    let oid = env
        .add(TaskObjectBuilder::new("blocking").with_handler(BLOCKING_URI).build())
        .await;
    assert!(TestEnv::wait_for(|| async { handler.has_started() }, WAIT).await);

    let mut result = OperationResult::new("test");
    let task = env
        .manager
        .get_task_object(&oid, Default::default(), &mut result)
        .await
        .unwrap();
    assert_eq!(task.node.as_deref(), Some("node-1"));
    let running = env.manager.locally_running_tasks().await;
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].oid, oid);

    env.manager
        .suspend_task(&oid, StopWait::For(Duration::from_secs(2)), &mut result)
        .await
        .unwrap();
    env.shutdown().await;
}

#[tokio::test]
async fn test_waiting_parent_runs_after_child_closes() {
    let env = TestTaskManager::started("node-1").await;
    let handler = CountingHandler::finishing();
    env.manager.register_handler(COUNTING_URI, handler.clone());

    let parent = env
        .add(
            TaskObjectBuilder::new("parent")
                .with_handler(COUNTING_URI)
                .waiting(TaskWaitingReason::OtherTasks)
                .build(),
        )
        .await;
    let child = env
        .add(
            TaskObjectBuilder::new("child")
                .with_handler(COUNTING_URI)
                .with_parent("test-parent")
                .build(),
        )
        .await;

    assert!(
        env.wait_for_task(&child, |t| t.execution_status == TaskExecutionStatus::Closed, WAIT)
            .await
    );
    assert!(
        env.wait_for_task(&parent, |t| t.execution_status == TaskExecutionStatus::Closed, WAIT)
            .await
    );
    assert_eq!(handler.runs(), 2);

    env.shutdown().await;
}

#[tokio::test]
async fn test_noop_handler_reports_steps_as_progress() {
    let env = TestTaskManager::started("node-1").await;
    env.manager.register_builtin_handlers();

    let oid = env
        .add(
            TaskObjectBuilder::new("noop")
                .with_handler(NOOP_HANDLER_URI)
                .with_extension(serde_json::json!({ "steps": 3, "delay_ms": 1 }))
                .build(),
        )
        .await;

    assert!(
        env.wait_for_task(&oid, |t| t.execution_status == TaskExecutionStatus::Closed, WAIT)
            .await
    );
    assert_eq!(env.get(&oid).await.progress, 3);

    env.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_local_tasks() {
    let env = TestTaskManager::started("node-1").await;
    let handler = BlockingHandler::new();
    env.manager.register_handler(BLOCKING_URI, handler.clone());

    env.add(TaskObjectBuilder::new("blocking").with_handler(BLOCKING_URI).build())
        .await;
    assert!(TestEnv::wait_for(|| async { handler.has_started() }, WAIT).await);

    env.shutdown().await;

    assert!(handler.has_stopped());
    assert!(env.manager.locally_running_tasks().await.is_empty());
    assert!(!env.manager.is_running().await);
}

/// 启用后，下一次 `get_task` 先读取快照，再等待放行后返回该快照
struct StaleReadRepository {
    inner: InMemoryTaskRepository,
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl StaleReadRepository {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryTaskRepository::new(),
            armed: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }
}

#[async_trait]
impl TaskRepository for StaleReadRepository {
    async fn get_task(&self, oid: &str) -> TaskManagerResult<TaskObject> {
        let snapshot = self.inner.get_task(oid).await;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        snapshot
    }

    async fn search_tasks(&self, filter: &TaskFilter) -> TaskManagerResult<Vec<TaskObject>> {
        self.inner.search_tasks(filter).await
    }

    async fn count_tasks(&self, filter: &TaskFilter) -> TaskManagerResult<usize> {
        self.inner.count_tasks(filter).await
    }

    async fn add_task(&self, task: &TaskObject) -> TaskManagerResult<String> {
        self.inner.add_task(task).await
    }

    async fn modify_task(
        &self,
        oid: &str,
        modifications: &[TaskModification],
    ) -> TaskManagerResult<()> {
        self.inner.modify_task(oid, modifications).await
    }

    async fn delete_task(&self, oid: &str) -> TaskManagerResult<()> {
        self.inner.delete_task(oid).await
    }
}

#[tokio::test]
async fn test_suspend_between_fire_and_run_is_not_confirmed_and_skips_run() {
    let config = TaskManagerConfig::for_testing("node-1");
    let repo = StaleReadRepository::new();
    let job_store = Arc::new(InMemoryJobStore::new(JobStoreConfig {
        thread_pool_size: config.scheduler.thread_pool_size,
        poll_interval: config.scheduler.poll_interval(),
    }));
    let manager = TaskManager::new(
        config,
        repo.clone(),
        Arc::new(InMemoryNodeRepository::new()),
        job_store.clone(),
        Arc::new(ScriptedNodeClient::new()),
    );
    let handler = CountingHandler::finishing();
    manager.register_handler(COUNTING_URI, handler.clone());

    let mut result = OperationResult::new("test");
    manager.init(&mut result).await.unwrap();
    manager.post_init(&mut result).await.unwrap();
    manager.execution_manager().stop_local_scheduler().await.unwrap();

    let oid = manager
        .add_task(
            TaskObjectBuilder::new("single")
                .with_handler(COUNTING_URI)
                .suspended()
                .build(),
            &mut result,
        )
        .await
        .unwrap();
    manager.resume_task(&oid, &mut result).await.unwrap();

    // 作业触发后执行器读到 RUNNABLE，尚未登记本地运行
    repo.armed.store(true, Ordering::SeqCst);
    manager.execution_manager().start_local_scheduler().await.unwrap();
    tokio::time::timeout(WAIT, repo.entered.notified())
        .await
        .expect("job should fire");

    let stopped = manager
        .suspend_task(&oid, StopWait::For(Duration::from_millis(300)), &mut result)
        .await
        .unwrap();
    assert!(!stopped);

    repo.release.notify_one();
    assert!(
        TestEnv::wait_for(
            || {
                let job_store = job_store.clone();
                async move { job_store.currently_executing().await.is_empty() }
            },
            WAIT,
        )
        .await
    );

    assert_eq!(handler.runs(), 0);
    assert!(manager.locally_running_tasks().await.is_empty());
    assert_eq!(
        repo.get_task(&oid).await.unwrap().execution_status,
        TaskExecutionStatus::Suspended
    );

    let mut result = OperationResult::new("test");
    manager.shutdown(&mut result).await;
}
