pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use app::{DispatchService, Scheduler, SchedulerConfig, SchedulerSummary};
pub use config::{cli::LocalStorage, toml_config::TomlConfig, CliConfig};
pub use core::dispatch::{CycleReport, DispatchEngine};
pub use utils::error::{DispatchError, Result};
