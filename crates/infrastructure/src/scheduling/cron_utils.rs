use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use taskmanager_errors::{TaskManagerError, TaskManagerResult};

/// CRON表达式解析工具（秒级，6 或 7 个字段）
pub struct CronScheduler {
    schedule: Schedule,
}

impl CronScheduler {
    pub fn new(cron_expr: &str) -> TaskManagerResult<Self> {
        let schedule =
            Schedule::from_str(cron_expr).map_err(|e| TaskManagerError::InvalidCron {
                expr: cron_expr.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self { schedule })
    }

    /// 获取下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> TaskManagerResult<()> {
        Self::new(cron_expr).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_next_execution_time() {
        let scheduler = CronScheduler::new("0 */5 * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 10, 2, 0).unwrap();
        let next = scheduler.next_execution_time(from).unwrap();
        assert_eq!(next.minute(), 5);
        assert_eq!(scheduler.upcoming_times(from, 3).len(), 3);
    }

    #[test]
    fn test_invalid_expression() {
        let err = CronScheduler::validate_cron_expression("not a cron").unwrap_err();
        assert!(matches!(err, TaskManagerError::InvalidCron { .. }));
    }
}
