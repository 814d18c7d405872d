//! Process mode: which pipeline components this process runs.
//!
//! `AppMode` is used both as the `--mode` CLI flag value and the `mode`
//! config key. Splitting the API, relay and workers into separate
//! processes lets each scale on its own; `all` runs everything in one.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::AppError;

/// Top-level component selection for the process.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppMode {
    /// API, relay and workers in one process. Default mode.
    #[default]
    All,
    /// HTTP API only.
    Api,
    /// Outbox relay only.
    Relay,
    /// Consumer worker pool only.
    Workers,
}

impl AppMode {
    /// Whether the HTTP API is started in this mode.
    #[must_use]
    pub fn runs_api(self) -> bool {
        matches!(self, Self::All | Self::Api)
    }

    /// Whether the outbox relay is started in this mode.
    #[must_use]
    pub fn runs_relay(self) -> bool {
        matches!(self, Self::All | Self::Relay)
    }

    /// Whether the consumer worker pool is started in this mode.
    #[must_use]
    pub fn runs_workers(self) -> bool {
        matches!(self, Self::All | Self::Workers)
    }
}

impl Display for AppMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::All => "all",
            Self::Api => "api",
            Self::Relay => "relay",
            Self::Workers => "workers",
        };
        f.write_str(name)
    }
}

impl FromStr for AppMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "api" => Ok(Self::Api),
            "relay" => Ok(Self::Relay),
            "workers" => Ok(Self::Workers),
            other => Err(AppError::Config(format!("unknown mode: {other}"))),
        }
    }
}
