pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod relay;
pub mod schema;
