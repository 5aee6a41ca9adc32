pub mod cron_utils;
pub mod job_store;
