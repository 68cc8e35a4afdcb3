//! Image uploads proxied to object storage.
//!
//! Files land under the uploader's own prefix, `{user_id}/{uuid}.{ext}`,
//! which is what later ownership checks rely on.

use axum::{
    Json,
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::StatusCode,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::middleware::RequireUser;
use crate::state::AppState;

/// Multipart field carrying the file.
pub const FILE_FIELD: &str = "file";

/// Lifetime of the signed URL returned after an upload.
pub const PREVIEW_URL_TTL_SECS: u64 = 3600;

/// Accepted image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Webp,
}

impl ImageKind {
    /// Kind for a declared content type.
    #[must_use]
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next()?.trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/webp" => Some(Self::Webp),
            _ => None,
        }
    }

    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }

    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
        }
    }

    /// Whether `bytes` start with this format's magic number.
    #[must_use]
    pub fn matches(self, bytes: &[u8]) -> bool {
        match self {
            Self::Jpeg => bytes.starts_with(&[0xFF, 0xD8, 0xFF]),
            Self::Png => bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
            Self::Webp => bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP".as_slice()),
        }
    }
}

/// Stored upload.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Storage path to reference in later requests.
    pub path: String,
    /// Short-lived URL for previewing the image.
    pub url: String,
    pub expires_in: u64,
}

/// POST /api/uploads
///
/// # Errors
///
/// - 400 for a missing `file` field, an unsupported type, or bytes that
///   do not match the declared type
/// - 413 when the file exceeds the configured maximum
/// - 502 when storage refuses the object
pub async fn upload(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let max_bytes = state.config().upload_max_bytes;
    let mut multipart =
        multipart.map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e.body_text())))?;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(&e, max_bytes))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let kind = field
            .content_type()
            .and_then(ImageKind::from_content_type)
            .ok_or_else(|| {
                AppError::BadRequest("Only JPEG, PNG, and WebP images are accepted".to_string())
            })?;

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| multipart_error(&e, max_bytes))?
        {
            if bytes.len() + chunk.len() > max_bytes {
                return Err(AppError::PayloadTooLarge(format!(
                    "File exceeds {max_bytes} bytes"
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        if bytes.is_empty() {
            return Err(AppError::BadRequest("File is empty".to_string()));
        }
        if !kind.matches(&bytes) {
            return Err(AppError::BadRequest(
                "File content does not match its type".to_string(),
            ));
        }

        let path = format!("{}/{}.{}", user.id, Uuid::new_v4(), kind.extension());
        let size = bytes.len();
        state
            .storage()
            .upload(&path, bytes, kind.content_type())
            .await?;
        let signed = state
            .storage()
            .signed_url(&path, PREVIEW_URL_TTL_SECS)
            .await?;

        info!(user_id = %user.id, path = %path, size, "Image uploaded");
        return Ok((
            StatusCode::CREATED,
            Json(UploadResponse {
                path,
                url: signed.url,
                expires_in: signed.expires_in,
            }),
        ));
    }

    Err(AppError::BadRequest(format!(
        "Missing multipart field '{FILE_FIELD}'"
    )))
}

/// Map a body read failure; hitting the body limit is a 413 like any
/// oversized file.
fn multipart_error(err: &MultipartError, max_bytes: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(format!("File exceeds {max_bytes} bytes"))
    } else {
        AppError::BadRequest(format!("Invalid multipart body: {}", err.body_text()))
    }
}
