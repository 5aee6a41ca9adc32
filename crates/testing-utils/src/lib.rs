//! # Task Manager Testing Utils
//!
//! 各 crate 测试共用的工具：
//!
//! - **Builders**: 带合理默认值的任务、节点构造器
//! - **Mocks**: 可编排的远程节点客户端、计数和阻塞的任务处理器
//! - **Helpers**: 组装内存版任务管理器、等待条件成立
//!
//! 作为 dev-dependency 使用，只在 `tests/` 集成测试中引用：
//!
//! ```toml
//! [dev-dependencies]
//! taskmanager-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
