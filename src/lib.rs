pub mod client;
pub mod engine;
pub mod limits;
pub mod model;
pub mod monitor;
pub mod observability;
pub mod processor;
pub mod proto;
pub mod server;
