// Scheduler core: state machine, claims, timers, completion handling

pub mod engine;

pub use engine::{SchedulerConfig, SchedulerCore};
