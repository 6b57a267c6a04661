//! Operator for an externally managed Geoweaver server: idempotent
//! lifecycle control driven by its health endpoint, and an offline
//! compaction pipeline for the embedded H2 database.

mod artifact;
pub mod compact;
pub mod config;
pub mod disk;
pub mod h2;
pub mod health;
pub mod locator;
pub mod logging;
pub mod paths;
pub mod platform;
pub mod progress;
pub mod supervisor;
mod support;

pub use compact::CompactionPipeline;
pub use config::OperatorConfig;
pub use health::HealthProbe;
pub use progress::{LogProgress, NoopProgress, ProgressReporter};
pub use supervisor::{ProcessSupervisor, StartOptions};
