use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::fal::{FalError, FalTransport};

pub const STATUE_VIDEO_ENDPOINT: &str = "fal-ai/veo3.1/fast/first-last-frame-to-video";
pub const PAINTING_VIDEO_ENDPOINT: &str = "fal-ai/wan-25-preview/image-to-video";

pub const STATUE_MOTION_PROMPT: &str = "A smooth 180-degree rotation of the sculpture, showing its details from different angles. \
    The camera slowly orbits around the statue.";

pub const PAINTING_MOTION_PROMPT: &str = "A slow, cinematic camera movement. The camera slowly pans from left to right \
    while gently zooming in on the painting. The movement is smooth and elegant, like in a museum documentary. \
    The painting remains static and still, only the camera moves.";

pub fn statue_video_input(first_frame_url: &str, last_frame_url: &str, motion_prompt: &str) -> Value {
    json!({
        "prompt": motion_prompt,
        "first_frame_url": first_frame_url,
        "last_frame_url": last_frame_url,
        "aspect_ratio": "9:16",
        "duration": "4s",
        "resolution": "720p",
        "generate_audio": false
    })
}

pub fn painting_video_input(image_url: &str) -> Value {
    json!({
        "image_url": image_url,
        "prompt": PAINTING_MOTION_PROMPT,
        "resolution": "720p",
        "duration": "5"
    })
}

#[derive(Debug, Deserialize)]
struct VideoOutput {
    #[serde(default)]
    video: Option<VideoFile>,
}

#[derive(Debug, Deserialize)]
struct VideoFile {
    #[serde(default)]
    url: String,
}

fn video_url(output: Value) -> Result<String, FalError> {
    let output: VideoOutput = serde_json::from_value(output).map_err(|e| FalError::Parse(e.to_string()))?;
    output
        .video
        .map(|v| v.url)
        .filter(|url| !url.is_empty())
        .ok_or(FalError::NoVideo)
}

/// One-shot video synthesis; callers only see pending vs settled.
pub struct VideoClient {
    transport: Arc<dyn FalTransport>,
}

impl VideoClient {
    pub fn new(transport: Arc<dyn FalTransport>) -> Self {
        Self { transport }
    }

    pub async fn generate_statue_video(&self, first_frame_url: &str, last_frame_url: &str, motion_prompt: &str) -> Result<String, FalError> {
        self.run(STATUE_VIDEO_ENDPOINT, statue_video_input(first_frame_url, last_frame_url, motion_prompt)).await
    }

    pub async fn generate_painting_video(&self, image_url: &str) -> Result<String, FalError> {
        self.run(PAINTING_VIDEO_ENDPOINT, painting_video_input(image_url)).await
    }

    async fn run(&self, endpoint: &str, input: Value) -> Result<String, FalError> {
        if !self.transport.has_credentials() {
            return Err(FalError::Configuration);
        }
        info!("🎬 Starting video generation with {}", endpoint);
        let output = self.transport.subscribe(endpoint, input).await?;
        match video_url(output) {
            Ok(url) => {
                info!("✅ Successfully generated video: {}", url);
                Ok(url)
            }
            Err(e) => {
                error!("❌ {} returned no video: {}", endpoint, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{video_response, FakeTransport};
    use pretty_assertions::assert_eq;

    fn client(transport: &Arc<FakeTransport>) -> VideoClient {
        let dyn_transport: Arc<dyn FalTransport> = transport.clone();
        VideoClient::new(dyn_transport)
    }

    #[tokio::test]
    async fn statue_video_interpolates_both_frames() {
        let transport = Arc::new(FakeTransport::default());
        transport.respond(Ok(video_response("https://fal.media/files/spin.mp4")));

        let url = client(&transport)
            .generate_statue_video("https://f/front.png", "https://f/back.png", STATUE_MOTION_PROMPT)
            .await
            .unwrap();
        assert_eq!(url, "https://fal.media/files/spin.mp4");

        let (endpoint, input) = transport.last_call().unwrap();
        assert_eq!(endpoint, STATUE_VIDEO_ENDPOINT);
        assert_eq!(input["first_frame_url"], "https://f/front.png");
        assert_eq!(input["last_frame_url"], "https://f/back.png");
        assert_eq!(input["duration"], "4s");
        assert_eq!(input["generate_audio"], false);
    }

    #[tokio::test]
    async fn painting_video_uses_fixed_pan() {
        let transport = Arc::new(FakeTransport::default());
        transport.respond(Ok(video_response("https://fal.media/files/pan.mp4")));

        let url = client(&transport).generate_painting_video("https://f/wall.png").await.unwrap();
        assert_eq!(url, "https://fal.media/files/pan.mp4");

        let (endpoint, input) = transport.last_call().unwrap();
        assert_eq!(endpoint, PAINTING_VIDEO_ENDPOINT);
        assert_eq!(input["image_url"], "https://f/wall.png");
        assert_eq!(input["prompt"], PAINTING_MOTION_PROMPT);
        assert_eq!(input["duration"], "5");
    }

    #[tokio::test]
    async fn empty_video_url_is_an_error() {
        let transport = Arc::new(FakeTransport::default());
        transport.respond(Ok(json!({ "video": { "url": "" } })));
        transport.respond(Ok(json!({})));
        let client = client(&transport);

        assert!(matches!(client.generate_painting_video("u").await, Err(FalError::NoVideo)));
        assert!(matches!(client.generate_painting_video("u").await, Err(FalError::NoVideo)));
    }

    #[tokio::test]
    async fn provider_errors_pass_through() {
        let transport = Arc::new(FakeTransport::default());
        transport.respond(Err(FalError::Status { status: 429, body: "rate limited".into() }));

        let err = client(&transport).generate_painting_video("u").await.unwrap_err();
        assert!(matches!(err, FalError::Status { status: 429, .. }));
        assert_eq!(transport.calls().len(), 1);
    }
}
