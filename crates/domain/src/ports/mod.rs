pub mod node_client;
pub mod scheduling;
