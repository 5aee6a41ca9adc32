pub mod entities;
pub mod operation_result;
pub mod ports;
pub mod queries;
pub mod repositories;
pub mod task_query_builder;

pub use entities::*;
pub use operation_result::{OperationResult, OperationResultStatus};
pub use ports::node_client::NodeClient;
pub use ports::scheduling::{
    CancellationFlag, JobKey, JobRunner, JobStore, JobStoreState, TriggerInfo, TriggerSpec,
};
pub use queries::*;
pub use repositories::*;
pub use taskmanager_errors::{TaskManagerError, TaskManagerResult};
