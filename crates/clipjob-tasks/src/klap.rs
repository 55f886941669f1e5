//! Klap API adapters.
//!
//! Klap turns a long video into short clips in two phases, each of which is
//! a separately polled task:
//! - `video-to-shorts` generation (`KlapClient`, polled every 30s)
//! - export of a generated project (`KlapExportApi`, polled every 15s)

use std::time::Duration;

use async_trait::async_trait;
use clipjob_models::{TaskHandle, TaskState, TaskStatus};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::api::{PollPolicy, TaskApi};
use crate::error::{TaskApiError, TaskApiResult};
use crate::http::{build_client, normalize_base_url, read_json};

/// Klap client configuration.
#[derive(Debug, Clone)]
pub struct KlapConfig {
    /// API key (Bearer token)
    pub api_key: String,
    /// Base URL including version
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl KlapConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.klap.app/v2".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> TaskApiResult<Self> {
        let api_key = std::env::var("KLAP_API_KEY")
            .map_err(|_| TaskApiError::config("KLAP_API_KEY not set"))?;
        if api_key.trim().is_empty() {
            return Err(TaskApiError::config("KLAP_API_KEY cannot be empty"));
        }

        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("KLAP_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(secs) = std::env::var("KLAP_TIMEOUT_SECS")
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

/// Task and export status body shared by both Klap endpoints.
#[derive(Debug, Deserialize)]
struct KlapStatusResponse {
    id: String,
    status: String,
    #[serde(default)]
    output_id: Option<String>,
    #[serde(default)]
    src_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl KlapStatusResponse {
    fn into_status(self, output: Option<String>) -> TaskApiResult<TaskStatus> {
        match self.status.as_str() {
            "processing" | "queued" | "pending" => Ok(TaskStatus::processing()),
            // Without an output the poller falls back to the task ID
            "ready" => Ok(TaskStatus {
                state: TaskState::Ready,
                progress: Some(100),
                output_ref: output,
                error: None,
            }),
            "error" | "failed" => Ok(TaskStatus::error(
                self.error
                    .unwrap_or_else(|| format!("Klap task {} failed", self.id)),
            )),
            other => Err(TaskApiError::invalid_response(format!(
                "unknown Klap status '{}' for {}",
                other, self.id
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct KlapCreateResponse {
    id: String,
}

/// Shared HTTP state for the two Klap adapters.
#[derive(Clone)]
struct KlapHttp {
    http: Client,
    base_url: String,
    api_key: String,
}

impl KlapHttp {
    fn new(config: &KlapConfig) -> TaskApiResult<Self> {
        Ok(Self {
            http: build_client(config.timeout)?,
            base_url: normalize_base_url(&config.base_url)?,
            api_key: config.api_key.clone(),
        })
    }

    async fn post(&self, path: &str, body: &Value) -> TaskApiResult<KlapCreateResponse> {
        let url = format!("{}/{}", self.base_url, path);
        debug!("POST {}", url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        read_json(response).await
    }

    async fn get(&self, path: &str) -> TaskApiResult<KlapStatusResponse> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self.http.get(&url).bearer_auth(&self.api_key).send().await?;
        read_json(response).await
    }
}

/// Klap `video-to-shorts` generation tasks.
#[derive(Clone)]
pub struct KlapClient {
    inner: KlapHttp,
}

impl KlapClient {
    pub fn new(config: KlapConfig) -> TaskApiResult<Self> {
        Ok(Self {
            inner: KlapHttp::new(&config)?,
        })
    }

    /// Build the request body, accepting either `source_video_url` or `url`.
    fn task_body(payload: &Value) -> TaskApiResult<Value> {
        let mut body = match payload {
            Value::Object(map) => map.clone(),
            _ => return Err(TaskApiError::invalid_request("Klap payload must be a JSON object")),
        };

        if !body.contains_key("source_video_url") {
            let url = body
                .remove("url")
                .filter(Value::is_string)
                .ok_or_else(|| TaskApiError::invalid_request("Klap payload needs a source video URL"))?;
            body.insert("source_video_url".to_string(), url);
        }

        Ok(Value::Object(body))
    }
}

#[async_trait]
impl TaskApi for KlapClient {
    fn name(&self) -> &str {
        "klap"
    }

    fn poll_policy(&self) -> PollPolicy {
        PollPolicy::task_status()
    }

    async fn create_task(&self, payload: &Value) -> TaskApiResult<TaskHandle> {
        let body = Self::task_body(payload)?;
        let created = self.inner.post("tasks/video-to-shorts", &body).await?;
        Ok(TaskHandle::new(created.id))
    }

    async fn task_status(&self, task_id: &str) -> TaskApiResult<TaskStatus> {
        let response = self.inner.get(&format!("tasks/{}", task_id)).await?;
        // A ready task points at the generated project folder
        let output = response.output_id.clone();
        response.into_status(output)
    }
}

/// Klap project exports.
///
/// The task ID is the export's resource path below `projects/`, so status
/// checks need no extra state.
#[derive(Clone)]
pub struct KlapExportApi {
    inner: KlapHttp,
}

impl KlapExportApi {
    pub fn new(config: KlapConfig) -> TaskApiResult<Self> {
        Ok(Self {
            inner: KlapHttp::new(&config)?,
        })
    }
}

#[async_trait]
impl TaskApi for KlapExportApi {
    fn name(&self) -> &str {
        "klap-export"
    }

    fn poll_policy(&self) -> PollPolicy {
        PollPolicy::export_status()
    }

    async fn create_task(&self, payload: &Value) -> TaskApiResult<TaskHandle> {
        let project_path = payload
            .get("project_path")
            .and_then(Value::as_str)
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .ok_or_else(|| TaskApiError::invalid_request("Klap export payload needs project_path"))?;

        let mut body = json!({});
        if let Some(watermark) = payload.get("watermark") {
            body["watermark"] = watermark.clone();
        }

        let created = self
            .inner
            .post(&format!("projects/{}/exports", project_path), &body)
            .await?;
        Ok(TaskHandle::new(format!("{}/exports/{}", project_path, created.id)))
    }

    async fn task_status(&self, task_id: &str) -> TaskApiResult<TaskStatus> {
        let response = self.inner.get(&format!("projects/{}", task_id)).await?;
        let output = response.src_url.clone();
        response.into_status(output)
    }
}
