//! 内存仓储实现，适用于单节点部署和测试

mod node_repository;
mod task_repository;

pub use node_repository::InMemoryNodeRepository;
pub use task_repository::InMemoryTaskRepository;
