pub mod api;
pub mod config;
pub mod flags;
pub mod gate;
pub mod health;
pub mod metrics;
pub mod performance;
pub mod router;
pub mod server;
pub mod subject;
pub mod telemetry;

// Shared with the integration tests, so it can't sit behind cfg(test)
pub mod test_utils;
