//! 内置任务处理器

mod cleanup;
mod noop;

pub use cleanup::CleanupTaskHandler;
pub use noop::{NoOpParams, NoOpTaskHandler};

pub const NOOP_HANDLER_URI: &str = "http://midpoint.evolveum.com/xml/ns/public/task/noop/handler-3";
pub const CLEANUP_HANDLER_URI: &str =
    "http://midpoint.evolveum.com/xml/ns/public/task/cleanup/handler-3";
