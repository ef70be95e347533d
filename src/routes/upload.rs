/**
 * Image Uploads
 * Shared multipart handling for avatars and course covers
 */
use axum::extract::Multipart;
use std::path::Path;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub const MAX_FILE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

pub const AVATAR_DIR: &str = "avatars";
pub const COVER_DIR: &str = "covers";

/// A stored upload, addressed by its public `/uploads/...` URL.
#[derive(Debug, Clone)]
pub struct SavedImage {
    pub url: String,
    pub filename: String,
    pub size: usize,
}

fn detect_image_mime(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some("image/png"),
        // RIFF....WEBP
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some("image/webp"),
        _ => None,
    }
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        _ => "webp",
    }
}

fn has_allowed_extension(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Check an uploaded file by name and content. Returns the detected MIME type.
pub fn validate_image(filename: &str, bytes: &[u8]) -> AppResult<&'static str> {
    if !has_allowed_extension(filename) {
        return Err(AppError::Validation(
            "Images only! Allowed: JPEG, PNG, WebP.".to_string(),
        ));
    }
    if bytes.is_empty() {
        return Err(AppError::Validation("Empty file".to_string()));
    }
    if bytes.len() > MAX_FILE_SIZE {
        return Err(AppError::Validation(
            "File too large. Maximum size is 5MB.".to_string(),
        ));
    }
    detect_image_mime(bytes).ok_or_else(|| {
        AppError::Validation("File content does not match an allowed image type.".to_string())
    })
}

/// Pull the file in multipart field `field_name`, validate it and write it
/// to `<upload_root>/<subdir>/<uuid>.<ext>`. Other fields are skipped.
pub async fn save_image_field(
    multipart: &mut Multipart,
    field_name: &str,
    upload_root: &Path,
    subdir: &str,
    missing_message: &str,
) -> AppResult<SavedImage> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(field_name) {
            continue;
        }

        let original_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await?;
        let mime = validate_image(&original_name, &bytes)?;

        let dir = upload_root.join(subdir);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            tracing::error!("Failed to create upload directory {}: {}", dir.display(), e);
            AppError::internal("Failed to initialize upload directory")
        })?;

        let filename = format!("{}.{}", Uuid::new_v4(), extension_for(mime));
        let path = dir.join(&filename);
        tokio::fs::write(&path, &bytes).await.map_err(|e| {
            tracing::error!("Failed to write upload file {}: {}", path.display(), e);
            AppError::internal("Failed to save file")
        })?;

        tracing::info!("Image uploaded: {}/{} ({} bytes)", subdir, filename, bytes.len());

        return Ok(SavedImage {
            url: format!("/uploads/{}/{}", subdir, filename),
            filename,
            size: bytes.len(),
        });
    }

    Err(AppError::Validation(missing_message.to_string()))
}
