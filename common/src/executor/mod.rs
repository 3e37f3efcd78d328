// Callback dispatch

pub mod http;

pub use http::HttpCallbackExecutor;

use crate::errors::DispatchError;
use crate::models::{JobExecutionResponse, ScheduledJob};
use async_trait::async_trait;

/// CallbackExecutor performs a single dispatch attempt and classifies it.
///
/// Implementations carry no scheduling semantics and mutate no scheduler
/// state; every transition happens in the completion handlers that consume
/// the returned [`JobExecutionResponse`]. A failed callback is a normal
/// outcome, not an error: `Err` is reserved for requests that cannot be
/// built at all.
#[async_trait]
pub trait CallbackExecutor: Send + Sync {
    async fn execute(&self, job: &ScheduledJob) -> Result<JobExecutionResponse, DispatchError>;
}
