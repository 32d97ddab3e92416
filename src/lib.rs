pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod queue;
pub mod reconciler;
pub mod routes;
pub mod scheduler;
pub mod shutdown;
