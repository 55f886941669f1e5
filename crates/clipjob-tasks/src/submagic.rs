//! Submagic captioning API adapter.

use std::time::Duration;

use async_trait::async_trait;
use clipjob_models::{TaskHandle, TaskStatus};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::api::{PollPolicy, TaskApi};
use crate::error::{TaskApiError, TaskApiResult};
use crate::http::{build_client, normalize_base_url, read_json};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone)]
pub struct SubmagicConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl SubmagicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.submagic.co/v1".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> TaskApiResult<Self> {
        let api_key = std::env::var("SUBMAGIC_API_KEY")
            .map_err(|_| TaskApiError::config("SUBMAGIC_API_KEY not set"))?;
        if api_key.trim().is_empty() {
            return Err(TaskApiError::config("SUBMAGIC_API_KEY cannot be empty"));
        }

        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("SUBMAGIC_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(secs) = std::env::var("SUBMAGIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct CreateProjectResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectResponse {
    id: String,
    status: String,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    failure_reason: Option<String>,
}

impl ProjectResponse {
    fn into_status(self) -> TaskApiResult<TaskStatus> {
        match self.status.as_str() {
            "processing" | "transcribing" | "exporting" => Ok(TaskStatus::processing()),
            // No download URL until an export runs; the project ID is the handle
            "completed" => Ok(TaskStatus::ready(self.download_url.unwrap_or(self.id))),
            "failed" => Ok(TaskStatus::error(
                self.failure_reason
                    .unwrap_or_else(|| format!("Submagic project {} failed", self.id)),
            )),
            other => Err(TaskApiError::invalid_response(format!(
                "unknown Submagic status '{}' for {}",
                other, self.id
            ))),
        }
    }
}

/// Submagic caption projects.
#[derive(Clone)]
pub struct SubmagicClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl SubmagicClient {
    pub fn new(config: SubmagicConfig) -> TaskApiResult<Self> {
        Ok(Self {
            http: build_client(config.timeout)?,
            base_url: normalize_base_url(&config.base_url)?,
            api_key: config.api_key,
        })
    }

    pub fn from_env() -> TaskApiResult<Self> {
        Self::new(SubmagicConfig::from_env()?)
    }

    fn project_body(payload: &Value) -> TaskApiResult<Value> {
        let video_url = payload
            .get("videoUrl")
            .or_else(|| payload.get("url"))
            .and_then(Value::as_str)
            .ok_or_else(|| TaskApiError::invalid_request("Submagic payload needs a video URL"))?;

        let mut body = json!({
            "title": payload.get("title").and_then(Value::as_str).unwrap_or("clipjob"),
            "language": payload.get("language").and_then(Value::as_str).unwrap_or("en"),
            "videoUrl": video_url,
        });
        for key in ["templateName", "webhookUrl"] {
            if let Some(value) = payload.get(key) {
                body[key] = value.clone();
            }
        }
        Ok(body)
    }
}

#[async_trait]
impl TaskApi for SubmagicClient {
    fn name(&self) -> &str {
        "submagic"
    }

    fn poll_policy(&self) -> PollPolicy {
        PollPolicy::task_status()
    }

    async fn create_task(&self, payload: &Value) -> TaskApiResult<TaskHandle> {
        let body = Self::project_body(payload)?;
        let url = format!("{}/projects", self.base_url);
        debug!("POST {}", url);

        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;
        let created: CreateProjectResponse = read_json(response).await?;
        Ok(TaskHandle::new(created.id))
    }

    async fn task_status(&self, task_id: &str) -> TaskApiResult<TaskStatus> {
        let url = format!("{}/projects/{}", self.base_url, task_id);
        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        let project: ProjectResponse = read_json(response).await?;
        project.into_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipjob_models::TaskState;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> SubmagicClient {
        SubmagicClient::new(SubmagicConfig::new("sm-key").with_base_url(server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_create_project_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects"))
            .and(header("x-api-key", "sm-key"))
            .and(body_json(json!({
                "title": "clipjob",
                "language": "en",
                "videoUrl": "https://cdn.example.com/a.mp4",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "proj-1" })))
            .expect(1)
            .mount(&server)
            .await;

        let handle = client(&server)
            .create_task(&json!({ "url": "https://cdn.example.com/a.mp4" }))
            .await
            .unwrap();
        assert_eq!(handle.task_id, "proj-1");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        for (id, body) in [
            ("a", json!({ "id": "a", "status": "transcribing" })),
            ("b", json!({ "id": "b", "status": "completed", "downloadUrl": "https://dl/b.mp4" })),
            ("c", json!({ "id": "c", "status": "completed" })),
            ("d", json!({ "id": "d", "status": "failed", "failureReason": "no speech" })),
        ] {
            Mock::given(method("GET"))
                .and(path(format!("/projects/{}", id)))
                .respond_with(ResponseTemplate::new(200).set_body_json(body))
                .mount(&server)
                .await;
        }

        let client = client(&server);
        assert_eq!(client.task_status("a").await.unwrap().state, TaskState::Processing);
        assert_eq!(
            client.task_status("b").await.unwrap().output_ref.as_deref(),
            Some("https://dl/b.mp4")
        );
        assert_eq!(client.task_status("c").await.unwrap().output_ref.as_deref(), Some("c"));

        let failed = client.task_status("d").await.unwrap();
        assert_eq!(failed.state, TaskState::Error);
        assert_eq!(failed.error.as_deref(), Some("no speech"));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/p1"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = client(&server).task_status("p1").await.unwrap_err();
        assert!(matches!(err, TaskApiError::Server { status: 502, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_missing_video_url_rejected_locally() {
        let server = MockServer::start().await;
        let err = client(&server)
            .create_task(&json!({ "title": "x" }))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskApiError::InvalidRequest(_)));
    }
}
