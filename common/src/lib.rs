// Common library for the chime durable callback scheduler

pub mod config;
pub mod errors;
pub mod events;
pub mod executor;
pub mod models;
pub mod retry;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod template;
