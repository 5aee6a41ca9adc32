//! 内存作业存储
//!
//! 自带触发循环：按 `poll_interval` 检查到期的触发器，在信号量限定的工作池中
//! 调用 `JobRunner`。同一作业不会并发执行，到期但仍在执行中的作业留到下一轮。

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskmanager_domain::{
    CancellationFlag, JobKey, JobRunner, JobStore, JobStoreState, TriggerInfo, TriggerSpec,
};
use taskmanager_errors::{TaskManagerError, TaskManagerResult};
use tokio::sync::{broadcast, Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::cron_utils::CronScheduler;

#[derive(Debug, Clone)]
pub struct JobStoreConfig {
    pub thread_pool_size: usize,
    pub poll_interval: Duration,
}

impl Default for JobStoreConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: 10,
            poll_interval: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone)]
struct TriggerEntry {
    spec: TriggerSpec,
    next_fire: Option<DateTime<Utc>>,
    paused: bool,
}

impl TriggerEntry {
    fn new(spec: TriggerSpec, paused: bool, now: DateTime<Utc>) -> TaskManagerResult<Self> {
        let next_fire = match &spec {
            TriggerSpec::Once { at } => Some(*at),
            TriggerSpec::Interval { seconds } => {
                if *seconds == 0 {
                    return Err(TaskManagerError::illegal_argument("触发间隔必须大于 0"));
                }
                Some(now)
            }
            TriggerSpec::Cron { expression } => {
                CronScheduler::new(expression)?.next_execution_time(now)
            }
        };
        Ok(Self {
            spec,
            next_fire,
            paused,
        })
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.paused && self.next_fire.map(|t| t <= now).unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct JobEntry {
    paused: bool,
    fire_now: bool,
    trigger: Option<TriggerEntry>,
}

impl JobEntry {
    /// 触发后推进触发器；一次性触发器被消费
    fn advance_trigger(&mut self, now: DateTime<Utc>) {
        let Some(trigger) = self.trigger.as_mut() else {
            return;
        };
        let consumed = match &trigger.spec {
            TriggerSpec::Once { .. } => true,
            TriggerSpec::Interval { seconds } => {
                trigger.next_fire = Some(now + chrono::Duration::seconds(*seconds as i64));
                false
            }
            TriggerSpec::Cron { expression } => {
                trigger.next_fire = CronScheduler::new(expression)
                    .ok()
                    .and_then(|c| c.next_execution_time(now));
                false
            }
        };
        if consumed {
            self.trigger = None;
        }
    }
}

struct Inner {
    config: JobStoreConfig,
    jobs: RwLock<HashMap<JobKey, JobEntry>>,
    state: RwLock<JobStoreState>,
    executing: RwLock<HashMap<JobKey, CancellationFlag>>,
    runner: StdRwLock<Option<Arc<dyn JobRunner>>>,
    semaphore: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

pub struct InMemoryJobStore {
    inner: Arc<Inner>,
}

impl InMemoryJobStore {
    pub fn new(config: JobStoreConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let semaphore = Arc::new(Semaphore::new(config.thread_pool_size.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                jobs: RwLock::new(HashMap::new()),
                state: RwLock::new(JobStoreState::Standby),
                executing: RwLock::new(HashMap::new()),
                runner: StdRwLock::new(None),
                semaphore,
                shutdown_tx,
                loop_handle: Mutex::new(None),
            }),
        }
    }
}

impl Inner {
    fn runner(&self) -> Option<Arc<dyn JobRunner>> {
        self.runner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn spawn_trigger_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let poll_interval = self.config.poll_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        inner.fire_due_jobs().await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("作业存储触发循环收到停止信号");
                        break;
                    }
                }
            }
        })
    }

    async fn fire_due_jobs(self: &Arc<Self>) {
        if *self.state.read().await != JobStoreState::Started {
            return;
        }
        let Some(runner) = self.runner() else {
            return;
        };

        let now = Utc::now();
        let mut to_fire: Vec<(JobKey, CancellationFlag, OwnedSemaphorePermit)> = Vec::new();
        {
            let mut jobs = self.jobs.write().await;
            let mut executing = self.executing.write().await;
            for (key, entry) in jobs.iter_mut() {
                if executing.contains_key(key) {
                    continue;
                }
                let due_by_trigger = !entry.paused
                    && entry
                        .trigger
                        .as_ref()
                        .map(|t| t.is_due(now))
                        .unwrap_or(false);
                if !entry.fire_now && !due_by_trigger {
                    continue;
                }

                let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        debug!("工作线程已满，剩余到期作业留待下一轮");
                        break;
                    }
                };

                let once_pending = matches!(
                    entry.trigger.as_ref().map(|t| &t.spec),
                    Some(TriggerSpec::Once { .. })
                );
                if due_by_trigger || (entry.fire_now && once_pending) {
                    entry.advance_trigger(now);
                }
                entry.fire_now = false;

                let flag = CancellationFlag::new();
                executing.insert(key.clone(), flag.clone());
                to_fire.push((key.clone(), flag, permit));
            }
        }

        for (key, flag, permit) in to_fire {
            let inner = Arc::clone(self);
            let runner = Arc::clone(&runner);
            tokio::spawn(async move {
                let _permit = permit;
                debug!("触发作业: {}", key);
                let job_key = key.clone();
                let outcome =
                    tokio::spawn(async move { runner.execute(&job_key, flag).await }).await;
                if let Err(e) = outcome {
                    error!("作业 {} 执行异常终止: {}", key, e);
                }
                inner.executing.write().await.remove(&key);
            });
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn start(&self) -> TaskManagerResult<()> {
        {
            let mut state = self.inner.state.write().await;
            if *state == JobStoreState::Shutdown {
                return Err(TaskManagerError::illegal_state("作业存储已关闭，无法启动"));
            }
            *state = JobStoreState::Started;
        }

        let mut handle = self.inner.loop_handle.lock().await;
        if handle.is_none() {
            *handle = Some(self.inner.spawn_trigger_loop());
        }
        info!("作业存储已启动");
        Ok(())
    }

    async fn standby(&self) -> TaskManagerResult<()> {
        let mut state = self.inner.state.write().await;
        if *state == JobStoreState::Shutdown {
            return Err(TaskManagerError::illegal_state("作业存储已关闭"));
        }
        *state = JobStoreState::Standby;
        info!("作业存储进入待机状态");
        Ok(())
    }

    async fn shutdown(&self, wait_for_jobs: bool) -> TaskManagerResult<()> {
        *self.inner.state.write().await = JobStoreState::Shutdown;
        let _ = self.inner.shutdown_tx.send(());

        if let Some(handle) = self.inner.loop_handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("等待触发循环结束失败: {}", e);
            }
        }

        if wait_for_jobs {
            while !self.inner.executing.read().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        } else {
            for flag in self.inner.executing.read().await.values() {
                flag.cancel();
            }
        }
        info!("作业存储已关闭");
        Ok(())
    }

    async fn state(&self) -> JobStoreState {
        *self.inner.state.read().await
    }

    async fn check_exists(&self, job_key: &str) -> TaskManagerResult<bool> {
        Ok(self.inner.jobs.read().await.contains_key(job_key))
    }

    async fn add_job(&self, job_key: &str, replace: bool) -> TaskManagerResult<()> {
        let mut jobs = self.inner.jobs.write().await;
        if jobs.contains_key(job_key) {
            if replace {
                return Ok(());
            }
            return Err(TaskManagerError::ObjectAlreadyExists(format!(
                "作业 {job_key}"
            )));
        }
        jobs.insert(job_key.to_string(), JobEntry::default());
        debug!("添加作业: {}", job_key);
        Ok(())
    }

    async fn delete_job(&self, job_key: &str) -> TaskManagerResult<bool> {
        let removed = self.inner.jobs.write().await.remove(job_key).is_some();
        if removed {
            debug!("删除作业: {}", job_key);
        }
        Ok(removed)
    }

    async fn pause_job(&self, job_key: &str) -> TaskManagerResult<()> {
        let mut jobs = self.inner.jobs.write().await;
        let entry = jobs
            .get_mut(job_key)
            .ok_or_else(|| TaskManagerError::job_store(format!("作业不存在: {job_key}")))?;
        entry.paused = true;
        if let Some(trigger) = entry.trigger.as_mut() {
            trigger.paused = true;
        }
        Ok(())
    }

    async fn resume_job(&self, job_key: &str) -> TaskManagerResult<()> {
        let mut jobs = self.inner.jobs.write().await;
        let entry = jobs
            .get_mut(job_key)
            .ok_or_else(|| TaskManagerError::job_store(format!("作业不存在: {job_key}")))?;
        entry.paused = false;
        if let Some(trigger) = entry.trigger.as_mut() {
            trigger.paused = false;
        }
        Ok(())
    }

    async fn schedule_trigger(
        &self,
        job_key: &str,
        spec: TriggerSpec,
        paused: bool,
    ) -> TaskManagerResult<Option<DateTime<Utc>>> {
        let trigger = TriggerEntry::new(spec, paused, Utc::now())?;
        let next_fire = trigger.next_fire;

        let mut jobs = self.inner.jobs.write().await;
        let entry = jobs
            .get_mut(job_key)
            .ok_or_else(|| TaskManagerError::job_store(format!("作业不存在: {job_key}")))?;
        entry.paused = paused;
        entry.trigger = Some(trigger);
        debug!("作业 {} 设置触发器，下次触发: {:?}", job_key, next_fire);
        Ok(next_fire)
    }

    async fn unschedule_triggers(&self, job_key: &str) -> TaskManagerResult<()> {
        if let Some(entry) = self.inner.jobs.write().await.get_mut(job_key) {
            entry.trigger = None;
        }
        Ok(())
    }

    async fn triggers_of(&self, job_key: &str) -> TaskManagerResult<Vec<TriggerInfo>> {
        let jobs = self.inner.jobs.read().await;
        Ok(jobs
            .get(job_key)
            .and_then(|entry| {
                entry.trigger.as_ref().map(|t| TriggerInfo {
                    spec: t.spec.clone(),
                    next_fire_time: t.next_fire,
                    paused: entry.paused || t.paused,
                })
            })
            .into_iter()
            .collect())
    }

    async fn job_keys(&self) -> TaskManagerResult<Vec<JobKey>> {
        let mut keys: Vec<JobKey> = self.inner.jobs.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn trigger_now(&self, job_key: &str) -> TaskManagerResult<()> {
        let mut jobs = self.inner.jobs.write().await;
        let entry = jobs
            .get_mut(job_key)
            .ok_or_else(|| TaskManagerError::job_store(format!("作业不存在: {job_key}")))?;
        entry.fire_now = true;
        Ok(())
    }

    async fn currently_executing(&self) -> Vec<JobKey> {
        self.inner.executing.read().await.keys().cloned().collect()
    }

    fn set_job_runner(&self, runner: Arc<dyn JobRunner>) {
        *self
            .inner
            .runner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(runner);
    }
}
