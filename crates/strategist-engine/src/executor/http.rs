//! Remote agent executor over HTTP.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use strategist_core::{TaskDefinition, TaskOutput};

use super::{AgentExecutor, ExecutorError, TaskRequest};

/// Body sent to the remote capability provider.
#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    name: &'a str,
    purpose: &'a str,
    outputs: &'a [String],
    request: &'a TaskRequest,
}

/// Delegates each invocation to `POST {base_url}/v1/tasks/{task_id}/invoke`.
///
/// The provider must answer with a JSON `TaskOutput`.
pub struct HttpExecutor {
    inner: reqwest::Client,
    base_url: String,
}

impl HttpExecutor {
    /// Create a new HTTP executor.
    pub fn new(base_url: &str) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AgentExecutor for HttpExecutor {
    async fn invoke(
        &self,
        definition: &TaskDefinition,
        request: TaskRequest,
    ) -> Result<TaskOutput, ExecutorError> {
        let url = format!("{}/v1/tasks/{}/invoke", self.base_url, request.task_id);
        debug!(url = %url, attempt = request.attempt, "POST invocation");

        let body = InvokeRequest {
            name: &definition.name,
            purpose: &definition.purpose,
            outputs: &definition.outputs,
            request: &request,
        };
        let response = self
            .inner
            .post(&url)
            .timeout(std::time::Duration::from_millis(request.timeout_ms))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            return Err(ExecutorError::Unavailable(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(ExecutorError::Failed(format!("HTTP {}: {}", status, url)));
        }

        response
            .json()
            .await
            .map_err(|e| ExecutorError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use axum::{
        extract::Path,
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::post,
        Json, Router,
    };
    use strategist_core::{Category, TaskDefId};
    use tokio::net::TcpListener;

    use super::*;

    async fn invoke_handler(
        Path(task_id): Path<String>,
        Json(body): Json<serde_json::Value>,
    ) -> Response {
        match task_id.as_str() {
            "down" => StatusCode::SERVICE_UNAVAILABLE.into_response(),
            "busy" => StatusCode::TOO_MANY_REQUESTS.into_response(),
            "broken" => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
            "garbled" => (StatusCode::OK, "not json").into_response(),
            "mistyped" => Json(serde_json::json!({"summary": 5})).into_response(),
            _ => {
                let name = body["name"].as_str().unwrap_or_default().to_string();
                let attempt = body["request"]["attempt"].as_u64().unwrap_or_default();
                Json(
                    TaskOutput::new(format!("{name} attempt {attempt}"))
                        .with_section("Plan", vec!["step one".to_string()]),
                )
                .into_response()
            }
        }
    }

    async fn spawn_provider() -> String {
        let app = Router::new().route("/v1/tasks/:task_id/invoke", post(invoke_handler));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{addr}/")
    }

    fn request(task_id: &str) -> (TaskDefinition, TaskRequest) {
        let definition =
            TaskDefinition::new(task_id, "Remote Agent", Category::Growth).with_outputs(&["Plan"]);
        let request = TaskRequest {
            task_id: TaskDefId::new(task_id),
            attempt: 2,
            timeout_ms: 5_000,
            inputs: BTreeMap::new(),
            missing_inputs: Vec::new(),
            upstream: BTreeMap::new(),
        };
        (definition, request)
    }

    async fn invoke(executor: &HttpExecutor, task_id: &str) -> Result<TaskOutput, ExecutorError> {
        let (definition, request) = request(task_id);
        executor.invoke(&definition, request).await
    }

    #[tokio::test]
    async fn test_status_and_body_mapping() {
        let executor = HttpExecutor::new(&spawn_provider().await);

        let output = invoke(&executor, "planner").await.unwrap();
        assert_eq!(output.summary, "Remote Agent attempt 2");
        assert!(output.missing_outputs(&["Plan".to_string()]).is_empty());

        assert!(matches!(invoke(&executor, "down").await, Err(ExecutorError::Unavailable(_))));
        assert!(matches!(invoke(&executor, "busy").await, Err(ExecutorError::Unavailable(_))));
        assert!(matches!(invoke(&executor, "broken").await, Err(ExecutorError::Failed(_))));
        assert!(matches!(invoke(&executor, "garbled").await, Err(ExecutorError::Malformed(_))));
        assert!(matches!(invoke(&executor, "mistyped").await, Err(ExecutorError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let executor = HttpExecutor::new(&format!("http://{addr}"));
        assert!(matches!(invoke(&executor, "planner").await, Err(ExecutorError::Http(_))));
    }
}
