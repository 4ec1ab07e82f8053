//! Monitor run orchestration: configuration, change detection and the
//! load → extract → diff → notify → save pipeline.

mod config;
mod diff;
mod pipeline;

pub use config::{MonitorConfig, StoreConfig, DEFAULT_USER_AGENT};
pub use diff::detect_changes;
pub use pipeline::{run_once_from_env, MonitorPipeline, RunError, RunOptions, RunStage, RunSummary};

pub const CRATE_NAME: &str = "stockwatch-sync";
