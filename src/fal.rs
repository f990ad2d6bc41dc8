use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::models::SourceImage;

#[derive(Debug, Error)]
pub enum FalError {
    #[error("FAL API key is not configured")]
    Configuration,
    #[error("image upload failed: {0}")]
    Upload(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not parse provider response: {0}")]
    Parse(String),
    #[error("no image generated")]
    NoImage,
    #[error("no video generated")]
    NoVideo,
    #[error("{0} did not complete in time")]
    Timeout(String),
    #[error("generation failed: {0}")]
    Failed(String),
}

/// Raw bytes fetched from a provider URL.
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Everything the clients need from the provider.
#[async_trait]
pub trait FalTransport: Send + Sync {
    fn has_credentials(&self) -> bool;

    /// Stores the file on the provider CDN and returns a public URL.
    async fn upload(&self, file: &SourceImage) -> Result<String, FalError>;

    /// Submits `input` to a model endpoint and waits for its output.
    async fn subscribe(&self, endpoint: &str, input: Value) -> Result<Value, FalError>;

    async fn fetch(&self, url: &str) -> Result<FetchedMedia, FalError>;
}

// Shortens long string values (prompts, URLs) so payload logs stay readable.
fn truncate_long_strings_in_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (_, val) in map.iter_mut() {
                truncate_long_strings_in_json(val);
            }
        }
        Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_long_strings_in_json(val);
            }
        }
        Value::String(s) if s.chars().count() > 120 => {
            let head: String = s.chars().take(80).collect();
            *s = format!("{}...[{} chars total]", head, s.chars().count());
        }
        _ => {}
    }
}

fn upload_error(e: reqwest::Error, url: &str) -> FalError {
    match transport_error(e, url) {
        FalError::Http(message) => FalError::Upload(message),
        other => other,
    }
}

fn loggable(value: &Value) -> String {
    let mut copy = value.clone();
    truncate_long_strings_in_json(&mut copy);
    serde_json::to_string_pretty(&copy).unwrap_or_default()
}

// Elapsed timeouts get their own variant so the session reports them as such.
fn transport_error(e: reqwest::Error, url: &str) -> FalError {
    if e.is_timeout() {
        error!("❌ Timed out talking to {}", url);
        FalError::Timeout(url.to_string())
    } else {
        FalError::Http(e.to_string())
    }
}

pub struct FalClient {
    client: Client,
    api_key: Option<String>,
    queue_base: String,
    rest_base: String,
    poll_interval: Duration,
    poll_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct UploadInitiated {
    upload_url: String,
    file_url: String,
}

#[derive(Debug, Deserialize)]
struct QueueSubmission {
    request_id: String,
    status_url: String,
    response_url: String,
}

#[derive(Debug, Deserialize)]
struct QueueStatus {
    status: String,
    #[serde(default)]
    queue_position: Option<u64>,
    #[serde(default)]
    logs: Option<Vec<QueueLog>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueueLog {
    message: String,
}

impl FalClient {
    pub fn new(config: &Config) -> Result<Self, FalError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FalError::Http(e.to_string()))?;
        Ok(Self {
            client,
            api_key: config.fal_key.clone(),
            queue_base: config.queue_base.clone(),
            rest_base: config.rest_base.clone(),
            poll_interval: config.poll_interval,
            poll_timeout: config.poll_timeout,
        })
    }

    fn auth_header(&self) -> Result<String, FalError> {
        self.api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .map(|key| format!("Key {key}"))
            .ok_or(FalError::Configuration)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, FalError> {
        let response = self.client
            .get(url)
            .header(header::AUTHORIZATION, self.auth_header()?)
            .send()
            .await
            .map_err(|e| transport_error(e, url))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| transport_error(e, url))?;
        if !status.is_success() {
            return Err(FalError::Status { status: status.as_u16(), body });
        }
        serde_json::from_str(&body).map_err(|e| FalError::Parse(format!("{}: {}", e, body)))
    }

    async fn wait_for_completion(&self, endpoint: &str, submission: &QueueSubmission) -> Result<(), FalError> {
        let started = Instant::now();
        let status_url = format!("{}?logs=1", submission.status_url);
        let mut seen_logs = 0;

        loop {
            let update: QueueStatus = self.get_json(&status_url).await?;
            // Progress is advisory only.
            match update.status.as_str() {
                "COMPLETED" => {
                    if let Some(err) = update.error {
                        return Err(FalError::Failed(err));
                    }
                    info!("✅ {} request {} completed in {:?}", endpoint, submission.request_id, started.elapsed());
                    return Ok(());
                }
                "IN_QUEUE" => {
                    info!("⏳ Queue update: IN_QUEUE (position {:?})", update.queue_position);
                }
                "IN_PROGRESS" => {
                    info!("⏳ Queue update: IN_PROGRESS");
                    let logs = update.logs.unwrap_or_default();
                    for log in logs.iter().skip(seen_logs) {
                        info!("📝 {}", log.message);
                    }
                    seen_logs = seen_logs.max(logs.len());
                }
                other => {
                    warn!("⚠️ Unknown queue status '{}' for {}", other, submission.request_id);
                }
            }

            if started.elapsed() >= self.poll_timeout {
                error!("❌ {} request {} still pending after {:?}", endpoint, submission.request_id, self.poll_timeout);
                return Err(FalError::Timeout(format!("request {}", submission.request_id)));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl FalTransport for FalClient {
    fn has_credentials(&self) -> bool {
        self.auth_header().is_ok()
    }

    async fn upload(&self, file: &SourceImage) -> Result<String, FalError> {
        let auth = self.auth_header()?;
        info!("📤 Uploading '{}' ({} bytes, {}) to fal storage", file.file_name, file.bytes.len(), file.content_type);

        let initiate_url = format!("{}/storage/upload/initiate?storage_type=fal-cdn-v3", self.rest_base);
        let response = self.client
            .post(&initiate_url)
            .header(header::AUTHORIZATION, auth)
            .json(&json!({
                "content_type": file.content_type,
                "file_name": file.file_name,
            }))
            .send()
            .await
            .map_err(|e| upload_error(e, &initiate_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("❌ Upload initiation failed: status={} body={}", status, body);
            return Err(FalError::Upload(format!("status={} body={}", status, body)));
        }
        let initiated: UploadInitiated = response.json().await
            .map_err(|e| upload_error(e, &initiate_url))?;

        let response = self.client
            .put(&initiated.upload_url)
            .header(header::CONTENT_TYPE, file.content_type.as_str())
            .body(file.bytes.clone())
            .send()
            .await
            .map_err(|e| upload_error(e, &initiated.upload_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("❌ Upload failed: status={} body={}", status, body);
            return Err(FalError::Upload(format!("status={} body={}", status, body)));
        }
        if initiated.file_url.is_empty() {
            return Err(FalError::Upload("storage returned an empty file url".into()));
        }

        info!("✅ Upload result URL: {}", initiated.file_url);
        Ok(initiated.file_url)
    }

    async fn subscribe(&self, endpoint: &str, input: Value) -> Result<Value, FalError> {
        let auth = self.auth_header()?;
        let url = format!("{}/{}", self.queue_base, endpoint);

        info!("🔗 Submitting request to: {}", endpoint);
        info!("📤 Request payload: {}", loggable(&input));

        let response = self.client
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .json(&input)
            .send()
            .await
            .map_err(|e| transport_error(e, &url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("❌ API Error response: {}", body);
            return Err(FalError::Status { status: status.as_u16(), body });
        }
        let submission: QueueSubmission = response.json().await
            .map_err(|e| if e.is_timeout() { transport_error(e, &url) } else { FalError::Parse(e.to_string()) })?;
        info!("📥 Queued as request {}", submission.request_id);

        self.wait_for_completion(endpoint, &submission).await?;

        let output: Value = self.get_json(&submission.response_url).await?;
        info!("📥 Raw fal response: {}", loggable(&output));
        Ok(output)
    }

    async fn fetch(&self, url: &str) -> Result<FetchedMedia, FalError> {
        let response = self.client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(e, url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FalError::Status { status: status.as_u16(), body: String::new() });
        }
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(|e| transport_error(e, url))?;
        Ok(FetchedMedia { bytes, content_type })
    }
}
