use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use bytes::Bytes;

use crate::blobs::BlobStore;
use crate::models::GeneratedArtwork;

pub const FALLBACK_DOWNLOAD_NAME: &str = "artwork.jpg";
pub const VIDEO_DOWNLOAD_NAME: &str = "sculpture-animation.mp4";

/// Resolves the MIME type of fetched image bytes, sniffing them when the
/// provider sent no usable `Content-Type`.
pub fn media_type(content_type: Option<&str>, bytes: &[u8]) -> String {
    let declared = content_type
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase())
        .filter(|ct| ct.starts_with("image/"));
    if let Some(ct) = declared {
        return ct;
    }
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => "image/png".to_string(),
        _ => "image/jpeg".to_string(),
    }
}

pub fn download_name(media_type: &str) -> String {
    let extension = if media_type.contains("png") { "png" } else { "jpg" };
    format!("artwork.{extension}")
}

#[derive(Debug, PartialEq, Eq)]
pub enum DownloadTarget {
    /// The retained payload, saved under the suggested name.
    Attachment { bytes: Bytes, content_type: String, filename: String },
    /// No local copy: the client opens the provider URL instead.
    Remote(String),
}

pub fn resolve_download(artwork: &GeneratedArtwork, blobs: &BlobStore) -> DownloadTarget {
    let blob = artwork.handle.as_ref().and_then(|handle| blobs.get(&handle.id()));
    match blob {
        Some(blob) => DownloadTarget::Attachment {
            bytes: blob.bytes,
            content_type: blob.content_type,
            filename: artwork.download_name.clone(),
        },
        None => DownloadTarget::Remote(artwork.source_url.clone()),
    }
}

impl IntoResponse for DownloadTarget {
    fn into_response(self) -> Response {
        match self {
            DownloadTarget::Attachment { bytes, content_type, filename } => {
                let mut headers = HeaderMap::new();
                if let Ok(value) = content_type.parse() {
                    headers.insert(header::CONTENT_TYPE, value);
                }
                if let Ok(value) = format!("attachment; filename=\"{}\"", filename).parse() {
                    headers.insert(header::CONTENT_DISPOSITION, value);
                }
                (StatusCode::OK, headers, bytes).into_response()
            }
            DownloadTarget::Remote(url) => Redirect::temporary(&url).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn artwork(handle: Option<crate::blobs::BlobHandle>) -> GeneratedArtwork {
        GeneratedArtwork {
            image_url: "https://fal.media/out.png".into(),
            text: None,
            download_name: "artwork.png".into(),
            handle,
            source_url: "https://fal.media/out.png".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn extension_follows_content_type() {
        assert_eq!(download_name("image/png"), "artwork.png");
        assert_eq!(download_name("image/jpeg"), "artwork.jpg");
        assert_eq!(download_name("image/webp"), "artwork.jpg");
    }

    #[test]
    fn media_type_sniffs_when_header_is_unhelpful() {
        assert_eq!(media_type(Some("image/PNG; charset=binary"), b""), "image/png");
        assert_eq!(media_type(Some("application/octet-stream"), crate::testing::PNG_MAGIC), "image/png");
        assert_eq!(media_type(None, b"\xff\xd8\xff\xe0"), "image/jpeg");
        assert_eq!(media_type(None, b"garbage"), "image/jpeg");
    }

    #[test]
    fn download_uses_payload_when_retained() {
        let blobs = BlobStore::new();
        let handle = blobs.insert(Bytes::from_static(b"png-bytes"), "image/png");
        let art = artwork(Some(handle));
        assert_eq!(
            resolve_download(&art, &blobs),
            DownloadTarget::Attachment {
                bytes: Bytes::from_static(b"png-bytes"),
                content_type: "image/png".into(),
                filename: "artwork.png".into(),
            }
        );
    }

    #[test]
    fn download_falls_back_to_remote_url() {
        let blobs = BlobStore::new();
        let art = artwork(None);
        assert_eq!(resolve_download(&art, &blobs), DownloadTarget::Remote("https://fal.media/out.png".into()));

        let response = DownloadTarget::Remote("https://fal.media/out.png".into()).into_response();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[header::LOCATION], "https://fal.media/out.png");
    }
}
