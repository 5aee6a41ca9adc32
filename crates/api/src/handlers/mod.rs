pub mod health;
pub mod metrics;
pub mod node;
pub mod nodes;
pub mod tasks;
