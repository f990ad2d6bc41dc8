use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};

use mockup_studio::config::Config;
use mockup_studio::fal::{FalClient, FalError, FalTransport};
use mockup_studio::models::SourceImage;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

#[derive(Clone, Default)]
struct FakeFal {
    base: Arc<Mutex<String>>,
    polls: Arc<AtomicUsize>,
    uploaded: Arc<Mutex<Vec<u8>>>,
    submitted: Arc<Mutex<Option<Value>>>,
    auth: Arc<Mutex<Vec<String>>>,
    empty_output: bool,
}

impl FakeFal {
    fn record_auth(&self, headers: &HeaderMap) {
        if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            self.auth.lock().push(value.to_string());
        }
    }
}

async fn initiate(State(fal): State<FakeFal>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    fal.record_auth(&headers);
    let base = fal.base.lock().clone();
    assert_eq!(body["file_name"], "front.jpg");
    Json(json!({ "upload_url": format!("{base}/upload/abc"), "file_url": format!("{base}/files/front.jpg") }))
}

async fn receive_upload(State(fal): State<FakeFal>, body: Bytes) -> StatusCode {
    *fal.uploaded.lock() = body.to_vec();
    StatusCode::OK
}

async fn submit(State(fal): State<FakeFal>, headers: HeaderMap, Json(input): Json<Value>) -> Json<Value> {
    fal.record_auth(&headers);
    let base = fal.base.lock().clone();
    *fal.submitted.lock() = Some(input);
    Json(json!({
        "request_id": "req-1",
        "status_url": format!("{base}/requests/req-1/status"),
        "response_url": format!("{base}/requests/req-1"),
    }))
}

async fn status(State(fal): State<FakeFal>) -> Json<Value> {
    match fal.polls.fetch_add(1, Ordering::SeqCst) {
        0 => Json(json!({ "status": "IN_QUEUE", "queue_position": 2 })),
        1 => Json(json!({ "status": "IN_PROGRESS", "logs": [{ "message": "step 1" }] })),
        _ => Json(json!({ "status": "COMPLETED" })),
    }
}

async fn output(State(fal): State<FakeFal>) -> Json<Value> {
    let base = fal.base.lock().clone();
    if fal.empty_output {
        return Json(json!({ "images": [] }));
    }
    Json(json!({ "images": [{ "url": format!("{base}/files/out.png") }] }))
}

async fn never_answers() -> StatusCode {
    tokio::time::sleep(Duration::from_secs(3600)).await;
    StatusCode::OK
}

async fn image() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/png")], PNG)
}

async fn spawn_fake(fal: FakeFal) -> Config {
    let app = Router::new()
        .route("/storage/upload/initiate", post(initiate))
        .route("/upload/abc", put(receive_upload))
        .route("/fal-ai/qwen-image-edit-2511", post(submit))
        .route("/requests/req-1/status", get(status))
        .route("/requests/req-1", get(output))
        .route("/files/out.png", get(image))
        .route("/files/stuck.png", get(never_answers))
        .with_state(fal.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    *fal.base.lock() = base.clone();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Config {
        fal_key: Some("test-key".into()),
        queue_base: base.clone(),
        rest_base: base,
        poll_interval: Duration::from_millis(5),
        poll_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_millis(200),
        ..Config::default()
    }
}

fn source() -> SourceImage {
    SourceImage {
        file_name: "front.jpg".into(),
        content_type: "image/jpeg".into(),
        bytes: Bytes::from_static(b"\xff\xd8\xff\xe0jpeg"),
    }
}

#[tokio::test]
async fn upload_then_subscribe_then_fetch() {
    let fal = FakeFal::default();
    let config = spawn_fake(fal.clone()).await;
    let client = FalClient::new(&config).unwrap();
    assert!(client.has_credentials());

    let url = client.upload(&source()).await.unwrap();
    assert_eq!(url, format!("{}/files/front.jpg", config.rest_base));
    assert_eq!(fal.uploaded.lock().as_slice(), b"\xff\xd8\xff\xe0jpeg");

    let input = json!({ "prompt": "p", "image_urls": [url] });
    let result = client.subscribe("fal-ai/qwen-image-edit-2511", input.clone()).await.unwrap();
    assert_eq!(fal.submitted.lock().clone(), Some(input));
    assert!(fal.polls.load(Ordering::SeqCst) >= 3);

    let image_url = result["images"][0]["url"].as_str().unwrap().to_string();
    let media = client.fetch(&image_url).await.unwrap();
    assert_eq!(media.bytes.as_ref(), PNG);
    assert_eq!(media.content_type.as_deref(), Some("image/png"));

    assert!(fal.auth.lock().iter().all(|v| v == "Key test-key"));
    assert_eq!(fal.auth.lock().len(), 2);
}

#[tokio::test]
async fn empty_output_is_passed_back_for_the_caller_to_judge() {
    let fal = FakeFal { empty_output: true, ..FakeFal::default() };
    let config = spawn_fake(fal).await;
    let client = FalClient::new(&config).unwrap();

    let result = client.subscribe("fal-ai/qwen-image-edit-2511", json!({})).await.unwrap();
    assert_eq!(result, json!({ "images": [] }));
}

#[tokio::test]
async fn unknown_endpoint_reports_status() {
    let config = spawn_fake(FakeFal::default()).await;
    let client = FalClient::new(&config).unwrap();

    let err = client.subscribe("fal-ai/does-not-exist", json!({})).await.unwrap_err();
    assert!(matches!(err, FalError::Status { status: 404, .. }));
}

#[tokio::test]
async fn poll_timeout_settles_the_call() {
    let fal = FakeFal::default();
    let mut config = spawn_fake(fal).await;
    config.poll_timeout = Duration::from_millis(0);
    let client = FalClient::new(&config).unwrap();

    let err = client.subscribe("fal-ai/qwen-image-edit-2511", json!({})).await.unwrap_err();
    assert!(matches!(err, FalError::Timeout(ref what) if what == "request req-1"));
    assert_eq!(err.to_string(), "request req-1 did not complete in time");
}

#[tokio::test]
async fn missing_key_never_reaches_the_network() {
    let config = Config { queue_base: "http://127.0.0.1:9".into(), ..Config::default() };
    let client = FalClient::new(&config).unwrap();
    let err = client.subscribe("fal-ai/qwen-image-edit-2511", json!({})).await.unwrap_err();
    assert!(matches!(err, FalError::Configuration));
}

#[tokio::test]
async fn stalled_exchange_times_out_instead_of_hanging() {
    let config = spawn_fake(FakeFal::default()).await;
    let client = FalClient::new(&config).unwrap();
    let url = format!("{}/files/stuck.png", config.rest_base);

    let outcome = tokio::time::timeout(Duration::from_secs(5), client.fetch(&url)).await;
    let err = outcome.expect("fetch must settle on its own").unwrap_err();
    assert!(matches!(err, FalError::Timeout(ref what) if *what == url));
}
