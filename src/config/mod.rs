pub mod cli;
pub mod toml_config;

use crate::utils::error::Result;
use crate::utils::validation::{validate_path, validate_positive_number, validate_range, Validate};
#[cfg(feature = "cli")]
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(Parser))]
#[cfg_attr(feature = "cli", command(name = "seaplane-dispatch"))]
#[cfg_attr(
    feature = "cli",
    command(about = "Seaplane dispatch and locker allocation for the Galápagos research network")
)]
pub struct CliConfig {
    #[cfg_attr(feature = "cli", arg(long, default_value = "dispatch-config.toml"))]
    pub config: String,

    #[cfg_attr(feature = "cli", arg(long, default_value = "10"))]
    pub cycles: usize,

    #[cfg_attr(feature = "cli", arg(long, default_value = "500"))]
    pub interval_ms: u64,

    #[cfg_attr(feature = "cli", arg(long, default_value = "15"))]
    pub minutes_per_tick: i64,

    #[cfg_attr(feature = "cli", arg(long, help = "Write a JSON state snapshot here when done"))]
    pub snapshot: Option<String>,

    #[cfg_attr(feature = "cli", arg(long, help = "Enable verbose output"))]
    pub verbose: bool,

    #[cfg_attr(feature = "cli", arg(long, help = "Emit logs as JSON lines"))]
    pub json_logs: bool,

    #[cfg_attr(feature = "cli", arg(long, help = "Plan cycles without committing"))]
    pub dry_run: bool,
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validate_path("config", &self.config)?;
        validate_positive_number("cycles", self.cycles, 1)?;
        validate_positive_number("interval_ms", self.interval_ms as usize, 1)?;
        validate_range("minutes_per_tick", self.minutes_per_tick, 1, 24 * 60)?;
        if let Some(snapshot) = &self.snapshot {
            validate_path("snapshot", snapshot)?;
        }
        Ok(())
    }
}
