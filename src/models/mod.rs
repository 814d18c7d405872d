//! Domain models.

pub mod timer;

pub use timer::{SetTimerCommand, Timer, TimerState};
