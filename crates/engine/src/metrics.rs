use ::metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::debug;

/// 任务管理器指标
///
/// 未安装 recorder 时所有句柄都是空操作，测试中可以直接构造。
pub struct TaskManagerMetrics {
    // Task lifecycle metrics
    tasks_suspended_total: Counter,
    tasks_resumed_total: Counter,
    tasks_deleted_total: Counter,
    task_runs_total: Counter,
    task_run_failures_total: Counter,
    task_run_duration: Histogram,
    locally_running_tasks: Gauge,

    // Cleanup metrics
    cleanup_deleted_total: Counter,
    cleanup_problems_total: Counter,

    // Scheduler metrics
    scheduler_sync_failures_total: Counter,
    job_store_syncs_total: Counter,

    // Cluster metrics
    node_communication_errors_total: Counter,
    cluster_status_queries_total: Counter,
    cluster_status_query_duration: Histogram,
    heartbeats_total: Counter,
}

impl TaskManagerMetrics {
    pub fn new() -> Self {
        Self {
            tasks_suspended_total: counter!("taskmanager_tasks_suspended_total"),
            tasks_resumed_total: counter!("taskmanager_tasks_resumed_total"),
            tasks_deleted_total: counter!("taskmanager_tasks_deleted_total"),
            task_runs_total: counter!("taskmanager_task_runs_total"),
            task_run_failures_total: counter!("taskmanager_task_run_failures_total"),
            task_run_duration: histogram!("taskmanager_task_run_duration_seconds"),
            locally_running_tasks: gauge!("taskmanager_locally_running_tasks"),
            cleanup_deleted_total: counter!("taskmanager_cleanup_deleted_total"),
            cleanup_problems_total: counter!("taskmanager_cleanup_problems_total"),
            scheduler_sync_failures_total: counter!("taskmanager_scheduler_sync_failures_total"),
            job_store_syncs_total: counter!("taskmanager_job_store_syncs_total"),
            node_communication_errors_total: counter!(
                "taskmanager_node_communication_errors_total"
            ),
            cluster_status_queries_total: counter!("taskmanager_cluster_status_queries_total"),
            cluster_status_query_duration: histogram!(
                "taskmanager_cluster_status_query_duration_seconds"
            ),
            heartbeats_total: counter!("taskmanager_heartbeats_total"),
        }
    }

    pub fn record_tasks_suspended(&self, count: usize) {
        self.tasks_suspended_total.increment(count as u64);
    }

    pub fn record_tasks_resumed(&self, count: usize) {
        self.tasks_resumed_total.increment(count as u64);
    }

    pub fn record_task_deleted(&self) {
        self.tasks_deleted_total.increment(1);
    }

    pub fn record_task_run(&self, handler_uri: &str, outcome: &str, duration_seconds: f64) {
        self.task_runs_total.increment(1);
        self.task_run_duration.record(duration_seconds);
        debug!(
            handler_uri = handler_uri,
            outcome = outcome,
            duration_seconds = duration_seconds,
            "任务运行结束"
        );
    }

    pub fn record_task_run_failure(&self) {
        self.task_run_failures_total.increment(1);
    }

    pub fn set_locally_running_tasks(&self, count: usize) {
        self.locally_running_tasks.set(count as f64);
    }

    pub fn record_cleanup(&self, deleted: usize, problems: usize) {
        self.cleanup_deleted_total.increment(deleted as u64);
        self.cleanup_problems_total.increment(problems as u64);
    }

    pub fn record_scheduler_sync_failure(&self) {
        self.scheduler_sync_failures_total.increment(1);
    }

    pub fn record_job_store_sync(&self) {
        self.job_store_syncs_total.increment(1);
    }

    pub fn record_node_communication_error(&self, node_id: &str) {
        self.node_communication_errors_total.increment(1);
        debug!(node_id = node_id, "节点通信失败已计数");
    }

    pub fn record_cluster_status_query(&self, duration_seconds: f64) {
        self.cluster_status_queries_total.increment(1);
        self.cluster_status_query_duration.record(duration_seconds);
    }

    pub fn record_heartbeat(&self) {
        self.heartbeats_total.increment(1);
    }
}

impl Default for TaskManagerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
