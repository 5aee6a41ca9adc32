use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use taskmanager_domain::{CancellationFlag, JobRunner, JobStore, JobStoreState, TriggerSpec};
use taskmanager_infrastructure::{InMemoryJobStore, JobStoreConfig};

#[derive(Default)]
struct RecordingRunner {
    runs: Mutex<HashMap<String, usize>>,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
    delay: Duration,
}

impl RecordingRunner {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn runs_of(&self, key: &str) -> usize {
        self.runs.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl JobRunner for RecordingRunner {
    async fn execute(&self, job_key: &str, cancel: CancellationFlag) {
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        *self.runs.lock().unwrap().entry(job_key.to_string()).or_default() += 1;

        let mut waited = Duration::ZERO;
        while waited < self.delay && cancel.can_run() {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }
        self.concurrent.fetch_sub(1, Ordering::SeqCst);
    }
}

fn store() -> InMemoryJobStore {
    InMemoryJobStore::new(JobStoreConfig {
        thread_pool_size: 4,
        poll_interval: Duration::from_millis(10),
    })
}

#[tokio::test]
async fn test_once_trigger_fires_exactly_once() {
    let store = store();
    let runner = Arc::new(RecordingRunner::default());
    store.set_job_runner(runner.clone());
    store.start().await.unwrap();

    store.add_job("job-1", false).await.unwrap();
    store
        .schedule_trigger("job-1", TriggerSpec::Once { at: Utc::now() }, false)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(runner.runs_of("job-1"), 1);
    assert!(store.triggers_of("job-1").await.unwrap().is_empty());
    assert!(store.check_exists("job-1").await.unwrap());

    store.shutdown(true).await.unwrap();
    assert_eq!(store.state().await, JobStoreState::Shutdown);
}

#[tokio::test]
async fn test_paused_job_does_not_fire_until_resumed() {
    let store = store();
    let runner = Arc::new(RecordingRunner::default());
    store.set_job_runner(runner.clone());
    store.start().await.unwrap();

    store.add_job("job-1", false).await.unwrap();
    store
        .schedule_trigger("job-1", TriggerSpec::Once { at: Utc::now() }, true)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runner.runs_of("job-1"), 0);
    assert!(store.triggers_of("job-1").await.unwrap()[0].paused);

    store.resume_job("job-1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runner.runs_of("job-1"), 1);

    store.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_standby_defers_firing() {
    let store = store();
    let runner = Arc::new(RecordingRunner::default());
    store.set_job_runner(runner.clone());

    store.add_job("job-1", false).await.unwrap();
    store.trigger_now("job-1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(runner.runs_of("job-1"), 0);

    store.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runner.runs_of("job-1"), 1);

    store.standby().await.unwrap();
    store.trigger_now("job-1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(runner.runs_of("job-1"), 1);

    store.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_same_job_never_runs_concurrently() {
    let store = store();
    let runner = Arc::new(RecordingRunner::with_delay(Duration::from_millis(150)));
    store.set_job_runner(runner.clone());
    store.start().await.unwrap();

    store.add_job("job-1", false).await.unwrap();
    store.trigger_now("job-1").await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(store.currently_executing().await, vec!["job-1".to_string()]);
    // 执行中再次触发，会等当前执行结束后再运行
    store.trigger_now("job-1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(runner.max_concurrent.load(Ordering::SeqCst), 1);
    assert_eq!(runner.runs_of("job-1"), 2);
    store.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_delete_job_is_idempotent_and_shutdown_cancels() {
    let store = store();
    let runner = Arc::new(RecordingRunner::with_delay(Duration::from_secs(30)));
    store.set_job_runner(runner.clone());
    store.start().await.unwrap();

    store.add_job("job-1", false).await.unwrap();
    assert!(store.add_job("job-1", false).await.is_err());
    store.add_job("job-1", true).await.unwrap();
    store.trigger_now("job-1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert!(store.delete_job("job-1").await.unwrap());
    assert!(!store.delete_job("job-1").await.unwrap());
    assert!(store.job_keys().await.unwrap().is_empty());

    store.shutdown(false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(store.currently_executing().await.is_empty());
    assert!(store.start().await.is_err());
}

#[tokio::test]
async fn test_cron_trigger_reports_next_fire_time() {
    let store = store();
    store.add_job("job-1", false).await.unwrap();
    let next = store
        .schedule_trigger(
            "job-1",
            TriggerSpec::Cron {
                expression: "0 0 3 * * *".to_string(),
            },
            false,
        )
        .await
        .unwrap()
        .unwrap();
    assert!(next > Utc::now());

    let bad = store
        .schedule_trigger(
            "job-1",
            TriggerSpec::Cron {
                expression: "nope".to_string(),
            },
            false,
        )
        .await;
    assert!(bad.is_err());
    assert!(store
        .schedule_trigger("missing", TriggerSpec::Interval { seconds: 5 }, false)
        .await
        .is_err());
}
