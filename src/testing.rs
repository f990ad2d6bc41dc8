//! Scriptable stand-in for the fal provider used across unit tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::fal::{FalError, FalTransport, FetchedMedia};
use crate::models::SourceImage;

pub const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

pub fn image_response(url: &str) -> Value {
    json!({ "images": [{ "url": url }], "description": "mockup ready" })
}

pub fn video_response(url: &str) -> Value {
    json!({ "video": { "url": url } })
}

pub fn source(name: &str) -> SourceImage {
    SourceImage {
        file_name: name.to_string(),
        content_type: "image/jpeg".to_string(),
        bytes: Bytes::from_static(b"\xff\xd8\xff\xe0 fake jpeg"),
    }
}

pub struct FakeTransport {
    pub credentials: bool,
    pub fail_upload: Mutex<bool>,
    pub fail_fetch: Mutex<bool>,
    pub fetch_content_type: Mutex<Option<String>>,
    pub uploads: Mutex<Vec<String>>,
    pub calls: Mutex<Vec<(String, Value)>>,
    responses: Mutex<VecDeque<Result<Value, FalError>>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            credentials: true,
            fail_upload: Mutex::new(false),
            fail_fetch: Mutex::new(false),
            fetch_content_type: Mutex::new(Some("image/png".to_string())),
            uploads: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            gate: Mutex::new(None),
        }
    }
}

impl FakeTransport {
    pub fn without_credentials() -> Self {
        Self { credentials: false, ..Self::default() }
    }

    pub fn respond(&self, response: Result<Value, FalError>) {
        self.responses.lock().push_back(response);
    }

    /// Makes the next `subscribe` calls wait until the returned notify fires.
    pub fn hold(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock() = Some(Arc::clone(&notify));
        notify
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    pub fn last_call(&self) -> Option<(String, Value)> {
        self.calls.lock().last().cloned()
    }
}

#[async_trait]
impl FalTransport for FakeTransport {
    fn has_credentials(&self) -> bool {
        self.credentials
    }

    async fn upload(&self, file: &SourceImage) -> Result<String, FalError> {
        if *self.fail_upload.lock() {
            return Err(FalError::Upload("storage unavailable".into()));
        }
        self.uploads.lock().push(file.file_name.clone());
        Ok(format!("https://fal.media/uploads/{}", file.file_name))
    }

    async fn subscribe(&self, endpoint: &str, input: Value) -> Result<Value, FalError> {
        self.calls.lock().push((endpoint.to_string(), input));
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(FalError::Failed("no scripted response".into())))
    }

    async fn fetch(&self, url: &str) -> Result<FetchedMedia, FalError> {
        if *self.fail_fetch.lock() {
            return Err(FalError::Http(format!("connection reset fetching {url}")));
        }
        Ok(FetchedMedia {
            bytes: Bytes::from_static(PNG_MAGIC),
            content_type: self.fetch_content_type.lock().clone(),
        })
    }
}
