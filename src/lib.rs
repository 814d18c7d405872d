#![forbid(unsafe_code)]

pub mod api;
pub mod broker;
pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod errors;
pub mod metrics;
pub mod mode;
pub mod models;
pub mod persistence;
pub mod timer;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
