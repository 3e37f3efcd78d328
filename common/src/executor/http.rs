// HTTP callback executor
//
// Builds the outbound request from the recipient descriptor, sends it with a
// bounded timeout, and classifies the result: 2xx is success, every other
// status, timeout, or transport failure is a retryable failure outcome.

use crate::errors::DispatchError;
use crate::executor::CallbackExecutor;
use crate::models::{HttpMethod, JobExecutionResponse, ResponseCode, ScheduledJob};
use crate::template::PayloadRenderer;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Url};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Failure messages keep at most this much of the response body.
const MAX_MESSAGE_LEN: usize = 512;

/// HttpCallbackExecutor dispatches firings as outbound HTTP calls
pub struct HttpCallbackExecutor {
    client: Client,
    renderer: PayloadRenderer,
}

impl HttpCallbackExecutor {
    /// Create a new executor with the given per-call timeout.
    pub fn new(timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            renderer: PayloadRenderer::new()?,
        })
    }

    fn convert_method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Delete => Method::DELETE,
        }
    }

    fn build_headers(
        headers: &HashMap<String, String>,
        correlation_id: Uuid,
    ) -> Result<HeaderMap, DispatchError> {
        let mut map = HeaderMap::with_capacity(headers.len() + 1);
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| DispatchError::InvalidHeader(key.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| DispatchError::InvalidHeader(key.clone()))?;
            map.insert(name, value);
        }
        let correlation = HeaderValue::from_str(&correlation_id.to_string())
            .map_err(|_| DispatchError::InvalidHeader("x-correlation-id".to_string()))?;
        map.insert(HeaderName::from_static("x-correlation-id"), correlation);
        Ok(map)
    }

    fn placeholder_values(
        job: &ScheduledJob,
        correlation_id: Uuid,
        remaining: Option<u32>,
    ) -> HashMap<String, String> {
        let mut values = HashMap::with_capacity(3);
        values.insert("job_id".to_string(), job.job.id.to_string());
        values.insert("correlation_id".to_string(), correlation_id.to_string());
        values.insert(
            "remaining_repetitions".to_string(),
            remaining.map_or_else(|| "null".to_string(), |n| n.to_string()),
        );
        values
    }

    fn truncate_message(body: String) -> Option<String> {
        if body.is_empty() {
            return None;
        }
        let mut message = body;
        if message.len() > MAX_MESSAGE_LEN {
            let mut cut = MAX_MESSAGE_LEN;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        Some(message)
    }
}

#[async_trait]
impl CallbackExecutor for HttpCallbackExecutor {
    #[tracing::instrument(skip(self, job), fields(job_id = %job.job.id, url = %job.job.recipient.url))]
    async fn execute(&self, job: &ScheduledJob) -> Result<JobExecutionResponse, DispatchError> {
        let recipient = &job.job.recipient;
        let job_id = job.job.id;
        let correlation_id = Uuid::new_v4();
        let remaining = job.remaining_repetitions();

        let url = Url::parse(&recipient.url).map_err(|e| DispatchError::InvalidUrl {
            url: recipient.url.clone(),
            reason: e.to_string(),
        })?;

        let headers = Self::build_headers(&recipient.headers, correlation_id)?;

        let mut request = self
            .client
            .request(Self::convert_method(recipient.method), url)
            .headers(headers);

        // The receiver reports progress from this count
        if let Some(remaining) = remaining {
            request = request.query(&[("remaining_repetitions", remaining.to_string())]);
        }

        if let Some(template) = &recipient.payload_template {
            let values = Self::placeholder_values(job, correlation_id, remaining);
            let body = self.renderer.render(template, &values)?;
            request = request.body(body);
        }

        tracing::debug!(correlation_id = %correlation_id, "Dispatching callback");

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let code = status.as_u16();

                if status.is_success() {
                    tracing::debug!(status = code, "Callback succeeded");
                    Ok(JobExecutionResponse::succeeded(job_id, code))
                } else {
                    let body = response.text().await.unwrap_or_default();
                    tracing::debug!(status = code, "Callback returned non-success status");
                    Ok(JobExecutionResponse::failed(
                        job_id,
                        ResponseCode::Status(code),
                        Self::truncate_message(body),
                    ))
                }
            }
            Err(e) if e.is_timeout() => {
                tracing::debug!(error = %e, "Callback timed out");
                Ok(JobExecutionResponse::failed(
                    job_id,
                    ResponseCode::Timeout,
                    Some(e.to_string()),
                ))
            }
            Err(e) => {
                tracing::debug!(error = %e, "Callback transport failure");
                Ok(JobExecutionResponse::failed(
                    job_id,
                    ResponseCode::Unreachable,
                    Some(e.to_string()),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Job, Recipient, Schedule};
    use chrono::Utc;

    fn scheduled(url: &str, template: Option<&str>) -> ScheduledJob {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            priority: 0,
            recipient: Recipient {
                url: url.to_string(),
                method: HttpMethod::Post,
                headers: HashMap::new(),
                payload_template: template.map(|t| t.to_string()),
            },
            schedule: Schedule::OneShot { fire_at: now },
        };
        ScheduledJob::new(job, now)
    }

    #[test]
    fn test_convert_method() {
        assert_eq!(
            HttpCallbackExecutor::convert_method(HttpMethod::Get),
            Method::GET
        );
        assert_eq!(
            HttpCallbackExecutor::convert_method(HttpMethod::Post),
            Method::POST
        );
        assert_eq!(
            HttpCallbackExecutor::convert_method(HttpMethod::Put),
            Method::PUT
        );
        assert_eq!(
            HttpCallbackExecutor::convert_method(HttpMethod::Delete),
            Method::DELETE
        );
    }

    #[tokio::test]
    async fn test_invalid_url_is_a_contract_violation() {
        let executor = HttpCallbackExecutor::new(Duration::from_secs(5)).unwrap();
        let job = scheduled("not a url", None);

        let result = executor.execute(&job).await;
        assert!(matches!(result, Err(DispatchError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_invalid_header_is_a_contract_violation() {
        let executor = HttpCallbackExecutor::new(Duration::from_secs(5)).unwrap();
        let mut job = scheduled("http://localhost:9999/hook", None);
        job.job
            .recipient
            .headers
            .insert("bad header\n".to_string(), "x".to_string());

        let result = executor.execute(&job).await;
        assert!(matches!(result, Err(DispatchError::InvalidHeader(_))));
    }

    #[test]
    fn test_placeholder_values_for_bounded_job() {
        let job = scheduled("http://localhost:9999/hook", None);
        let correlation_id = Uuid::new_v4();
        let values = HttpCallbackExecutor::placeholder_values(&job, correlation_id, Some(1));

        assert_eq!(values["job_id"], job.job.id.to_string());
        assert_eq!(values["correlation_id"], correlation_id.to_string());
        assert_eq!(values["remaining_repetitions"], "1");
    }

    #[test]
    fn test_placeholder_values_for_unbounded_job() {
        let job = scheduled("http://localhost:9999/hook", None);
        let values = HttpCallbackExecutor::placeholder_values(&job, Uuid::new_v4(), None);
        assert_eq!(values["remaining_repetitions"], "null");
    }

    #[test]
    fn test_truncate_message() {
        assert_eq!(HttpCallbackExecutor::truncate_message(String::new()), None);
        let long = "x".repeat(2 * MAX_MESSAGE_LEN);
        let truncated = HttpCallbackExecutor::truncate_message(long).unwrap();
        assert_eq!(truncated.len(), MAX_MESSAGE_LEN);
    }
}
