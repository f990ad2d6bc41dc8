use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};
use bytes::Bytes;

use crate::blobs::BlobHandle;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArtworkKind {
    #[default]
    Painting,
    Statue,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrameStyle {
    #[default]
    None,
    Black,
    White,
}

/// Shared by wall, room and pedestal pickers.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tint {
    #[default]
    White,
    Black,
    Gray,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    NanoBananaNew,
    #[serde(rename = "gpt_image_15")]
    GptImage15,
    Seedream,
    #[default]
    Qwen,
}

impl ModelKind {
    #[cfg(test)]
    pub const ALL: [ModelKind; 4] = [ModelKind::NanoBananaNew, ModelKind::GptImage15, ModelKind::Seedream, ModelKind::Qwen];

    /// GPT Image renders at a fixed size, so the ratio picker is hidden for it.
    pub fn supports_aspect_ratio(self) -> bool {
        !matches!(self, ModelKind::GptImage15)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "3:4")]
    ThreeFour,
}

impl AspectRatio {
    pub fn token(self) -> &'static str {
        match self {
            AspectRatio::Portrait => "9:16",
            AspectRatio::ThreeFour => "3:4",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selections {
    pub artwork: ArtworkKind,
    pub frame: FrameStyle,
    pub wall: Tint,
    pub room: Tint,
    pub pedestal: Tint,
    pub model: ModelKind,
    pub aspect_ratio: AspectRatio,
}

impl Selections {
    pub fn visible_options(&self) -> OptionVisibility {
        let painting = self.artwork == ArtworkKind::Painting;
        OptionVisibility {
            frame: painting,
            wall: painting,
            room: !painting,
            pedestal: !painting,
            aspect_ratio: self.model.supports_aspect_ratio(),
        }
    }

    pub fn apply(&mut self, patch: &SelectionPatch) {
        if let Some(artwork) = patch.artwork {
            self.artwork = artwork;
        }
        if let Some(frame) = patch.frame {
            self.frame = frame;
        }
        if let Some(wall) = patch.wall {
            self.wall = wall;
        }
        if let Some(room) = patch.room {
            self.room = room;
        }
        if let Some(pedestal) = patch.pedestal {
            self.pedestal = pedestal;
        }
        if let Some(model) = patch.model {
            self.model = model;
        }
        if let Some(ratio) = patch.aspect_ratio {
            self.aspect_ratio = ratio;
        }
    }
}

/// Which pickers the selection screen should show for the current choices.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct OptionVisibility {
    pub frame: bool,
    pub wall: bool,
    pub room: bool,
    pub pedestal: bool,
    pub aspect_ratio: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SelectionPatch {
    #[serde(default)]
    pub artwork: Option<ArtworkKind>,
    #[serde(default)]
    pub frame: Option<FrameStyle>,
    #[serde(default)]
    pub wall: Option<Tint>,
    #[serde(default)]
    pub room: Option<Tint>,
    #[serde(default)]
    pub pedestal: Option<Tint>,
    #[serde(default)]
    pub model: Option<ModelKind>,
    #[serde(default)]
    pub aspect_ratio: Option<AspectRatio>,
}

/// Overrides accepted when regenerating from the result screen.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct RegenerateRequest {
    #[serde(default)]
    pub model: Option<ModelKind>,
    #[serde(default)]
    pub aspect_ratio: Option<AspectRatio>,
    #[serde(default)]
    pub room: Option<Tint>,
    #[serde(default)]
    pub pedestal: Option<Tint>,
    #[serde(default)]
    pub wall: Option<Tint>,
}

impl From<&RegenerateRequest> for SelectionPatch {
    fn from(req: &RegenerateRequest) -> Self {
        SelectionPatch {
            model: req.model,
            aspect_ratio: req.aspect_ratio,
            room: req.room,
            pedestal: req.pedestal,
            wall: req.wall,
            ..SelectionPatch::default()
        }
    }
}

/// A user supplied photo (front view or back view of the artwork).
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct SourceView {
    pub file_name: String,
    pub content_type: String,
    pub size: usize,
}

impl SourceImage {
    pub fn view(&self) -> SourceView {
        SourceView {
            file_name: self.file_name.clone(),
            content_type: self.content_type.clone(),
            size: self.bytes.len(),
        }
    }
}

/// The staged mockup returned by the image model.
///
/// `handle` points at the locally cached copy; it is absent when the remote
/// image could not be fetched, in which case `image_url` is the remote URL.
#[derive(Debug)]
pub struct GeneratedArtwork {
    pub image_url: String,
    pub text: Option<String>,
    pub download_name: String,
    pub handle: Option<BlobHandle>,
    pub source_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ArtworkView {
    pub image_url: String,
    pub text: Option<String>,
    pub download_name: String,
    pub has_payload: bool,
    pub source_url: String,
    pub created_at: DateTime<Utc>,
}

impl GeneratedArtwork {
    pub fn view(&self) -> ArtworkView {
        ArtworkView {
            image_url: self.image_url.clone(),
            text: self.text.clone(),
            download_name: self.download_name.clone(),
            has_payload: self.handle.is_some(),
            source_url: self.source_url.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct VideoView {
    pub url: String,
    pub download_name: &'static str,
}
