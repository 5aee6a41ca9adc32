//! 调度引擎抽象
//!
//! 每个持久化任务对应一个作业，作业键即任务 OID。作业至多挂一个触发器，
//! 触发器决定何时调用已注册的 `JobRunner`。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskmanager_errors::TaskManagerResult;

pub type JobKey = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerSpec {
    /// 在指定时间触发一次
    Once { at: DateTime<Utc> },
    Interval { seconds: u64 },
    Cron { expression: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub spec: TriggerSpec,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub paused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStoreState {
    Standby,
    Started,
    Shutdown,
}

/// 协作式取消标志，由任务处理器轮询
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn can_run(&self) -> bool {
        !self.is_cancelled()
    }
}

/// 触发器触发时被调用
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn execute(&self, job_key: &str, cancel: CancellationFlag);
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn start(&self) -> TaskManagerResult<()>;
    /// 暂停触发，已在执行的作业不受影响
    async fn standby(&self) -> TaskManagerResult<()>;
    async fn shutdown(&self, wait_for_jobs: bool) -> TaskManagerResult<()>;
    async fn state(&self) -> JobStoreState;

    async fn check_exists(&self, job_key: &str) -> TaskManagerResult<bool>;
    /// 作业已存在且 `replace` 为 false 时返回 `ObjectAlreadyExists`
    async fn add_job(&self, job_key: &str, replace: bool) -> TaskManagerResult<()>;
    /// 删除作业及其触发器，返回作业之前是否存在
    async fn delete_job(&self, job_key: &str) -> TaskManagerResult<bool>;
    async fn pause_job(&self, job_key: &str) -> TaskManagerResult<()>;
    async fn resume_job(&self, job_key: &str) -> TaskManagerResult<()>;

    /// 替换作业的触发器，返回下次触发时间
    async fn schedule_trigger(
        &self,
        job_key: &str,
        spec: TriggerSpec,
        paused: bool,
    ) -> TaskManagerResult<Option<DateTime<Utc>>>;
    async fn unschedule_triggers(&self, job_key: &str) -> TaskManagerResult<()>;
    async fn triggers_of(&self, job_key: &str) -> TaskManagerResult<Vec<TriggerInfo>>;
    async fn job_keys(&self) -> TaskManagerResult<Vec<JobKey>>;
    /// 立即触发一次，不影响已有触发器
    async fn trigger_now(&self, job_key: &str) -> TaskManagerResult<()>;
    async fn currently_executing(&self) -> Vec<JobKey>;

    fn set_job_runner(&self, runner: Arc<dyn JobRunner>);
}
