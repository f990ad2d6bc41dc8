use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::blobs::BlobStore;
use crate::export::{self, FALLBACK_DOWNLOAD_NAME};
use crate::fal::{FalError, FalTransport};
use crate::models::{AspectRatio, GeneratedArtwork, ModelKind, Selections, SourceImage};
use crate::prompt::build_prompt;

pub const LAST_FRAME_ENDPOINT: &str = "fal-ai/gemini-3-pro-image-preview/edit";
pub const LAST_FRAME_PROMPT: &str = "Change the statue in the image 1 with the statue in the image 2";

/// A model endpoint plus the input it expects.
#[derive(Debug, Clone, PartialEq)]
pub struct EditRequest {
    pub endpoint: &'static str,
    pub input: Value,
}

struct ModelRoute {
    endpoint: &'static str,
    shape: fn(&str, &str, AspectRatio) -> Value,
}

fn route(model: ModelKind) -> ModelRoute {
    match model {
        ModelKind::NanoBananaNew => ModelRoute { endpoint: "fal-ai/gemini-3-pro-image-preview/edit", shape: nano_banana_input },
        ModelKind::GptImage15 => ModelRoute { endpoint: "fal-ai/gpt-image-1.5/edit", shape: gpt_image_input },
        ModelKind::Seedream => ModelRoute { endpoint: "fal-ai/bytedance/seedream/v4.5/edit", shape: seedream_input },
        ModelKind::Qwen => ModelRoute { endpoint: "fal-ai/qwen-image-edit-2511", shape: qwen_input },
    }
}

fn nano_banana_input(prompt: &str, image_url: &str, ratio: AspectRatio) -> Value {
    json!({
        "prompt": prompt,
        "image_urls": [image_url],
        "num_images": 1,
        "aspect_ratio": ratio.token(),
        "output_format": "png",
        "resolution": "1K"
    })
}

// GPT Image 1.5 only accepts a few sizes; we always ask for 2:3 portrait.
fn gpt_image_input(prompt: &str, image_url: &str, _ratio: AspectRatio) -> Value {
    json!({
        "prompt": prompt,
        "image_urls": [image_url],
        "num_images": 1,
        "image_size": "1024x1536",
        "quality": "high",
        "input_fidelity": "high",
        "output_format": "png"
    })
}

// Seedream sides must stay within 1920..=4096.
fn seedream_input(prompt: &str, image_url: &str, ratio: AspectRatio) -> Value {
    let (width, height) = match ratio {
        AspectRatio::Portrait => (1920, 3413),
        AspectRatio::ThreeFour => (2048, 2730),
    };
    json!({
        "prompt": prompt,
        "image_urls": [image_url],
        "num_images": 1,
        "image_size": { "width": width, "height": height },
        "enable_safety_checker": true
    })
}

fn qwen_input(prompt: &str, image_url: &str, ratio: AspectRatio) -> Value {
    let (width, height) = match ratio {
        AspectRatio::Portrait => (768, 1365),
        AspectRatio::ThreeFour => (1024, 1365),
    };
    json!({
        "prompt": prompt,
        "image_urls": [image_url],
        "num_images": 1,
        "image_size": { "width": width, "height": height },
        "output_format": "png",
        "enable_safety_checker": true
    })
}

pub fn edit_request(model: ModelKind, prompt: &str, image_url: &str, ratio: AspectRatio) -> EditRequest {
    let ModelRoute { endpoint, shape } = route(model);
    EditRequest { endpoint, input: shape(prompt, image_url, ratio) }
}

pub fn last_frame_request(first_frame_url: &str, back_image_url: &str) -> EditRequest {
    EditRequest {
        endpoint: LAST_FRAME_ENDPOINT,
        input: json!({
            "prompt": LAST_FRAME_PROMPT,
            "image_urls": [first_frame_url, back_image_url],
            "num_images": 1,
            "aspect_ratio": AspectRatio::Portrait.token(),
            "output_format": "png",
            "resolution": "1K"
        }),
    }
}

#[derive(Debug, Deserialize)]
struct EditOutput {
    #[serde(default)]
    images: Vec<OutputImage>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputImage {
    #[serde(default)]
    url: String,
}

fn parse_edit_output(output: Value) -> Result<EditOutput, FalError> {
    serde_json::from_value(output).map_err(|e| FalError::Parse(e.to_string()))
}

fn first_image_url(output: &EditOutput) -> Result<String, FalError> {
    output
        .images
        .first()
        .map(|img| img.url.clone())
        .filter(|url| !url.is_empty())
        .ok_or(FalError::NoImage)
}

/// Turns an artwork photo into a staged mockup, and a mockup plus a back
/// view into the last frame of a statue animation.
pub struct GenerationClient {
    transport: Arc<dyn FalTransport>,
    blobs: Arc<BlobStore>,
}

impl GenerationClient {
    pub fn new(transport: Arc<dyn FalTransport>, blobs: Arc<BlobStore>) -> Self {
        Self { transport, blobs }
    }

    pub async fn generate_artwork(&self, source: &SourceImage, selections: &Selections) -> Result<GeneratedArtwork, FalError> {
        if !self.transport.has_credentials() {
            error!("❌ FAL API key not configured");
            return Err(FalError::Configuration);
        }

        let image_url = self.transport.upload(source).await?;
        let prompt = build_prompt(selections);
        let request = edit_request(selections.model, &prompt, &image_url, selections.aspect_ratio);
        info!("🎯 Generating {:?} mockup with {} ({:?})", selections.artwork, request.endpoint, selections.aspect_ratio);

        let output = parse_edit_output(self.transport.subscribe(request.endpoint, request.input).await?)?;
        let remote_url = first_image_url(&output).map_err(|e| {
            error!("❌ No images in fal response");
            e
        })?;
        info!("✅ Successfully generated artwork: {}", remote_url);

        Ok(self.normalize(remote_url, output.description).await)
    }

    /// Keeps a local copy of the generated image when it can be fetched,
    /// otherwise falls back to displaying the remote URL.
    async fn normalize(&self, remote_url: String, text: Option<String>) -> GeneratedArtwork {
        let fetched = self.transport.fetch(&remote_url).await
            .and_then(|media| if media.bytes.is_empty() { Err(FalError::Parse("empty image body".into())) } else { Ok(media) });

        match fetched {
            Ok(media) => {
                let mime = export::media_type(media.content_type.as_deref(), &media.bytes);
                let download_name = export::download_name(&mime);
                info!("🖼️ Normalized generated image: {} as {}", mime, download_name);
                let handle = self.blobs.insert(media.bytes, mime);
                GeneratedArtwork {
                    image_url: handle.url(),
                    text,
                    download_name,
                    handle: Some(handle),
                    source_url: remote_url,
                    created_at: Utc::now(),
                }
            }
            Err(e) => {
                warn!("⚠️ Could not normalise generated image for download: {}", e);
                GeneratedArtwork {
                    image_url: remote_url.clone(),
                    text,
                    download_name: FALLBACK_DOWNLOAD_NAME.to_string(),
                    handle: None,
                    source_url: remote_url,
                    created_at: Utc::now(),
                }
            }
        }
    }

    pub async fn generate_last_frame(&self, first_frame_url: &str, back_image: &SourceImage) -> Result<String, FalError> {
        if !self.transport.has_credentials() {
            return Err(FalError::Configuration);
        }

        let back_url = self.transport.upload(back_image).await?;
        info!("🎯 Generating last frame from {} and {}", first_frame_url, back_url);
        let request = last_frame_request(first_frame_url, &back_url);

        let output = parse_edit_output(self.transport.subscribe(request.endpoint, request.input).await?)?;
        if output.images.len() > 1 {
            warn!("⚠️ Last frame call returned {} images, keeping the first", output.images.len());
        }
        let url = first_image_url(&output)?;
        info!("✅ Successfully generated last frame: {}", url);
        Ok(url)
    }
}
