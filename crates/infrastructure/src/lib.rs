pub mod database;
pub mod memory;
pub mod node_client;
pub mod scheduling;

pub use database::sqlite::{SqliteNodeRepository, SqliteTaskRepository};
pub use database::DatabaseManager;
pub use memory::{InMemoryNodeRepository, InMemoryTaskRepository};
pub use node_client::HttpNodeClient;
pub use scheduling::cron_utils::CronScheduler;
pub use scheduling::job_store::{InMemoryJobStore, JobStoreConfig};
