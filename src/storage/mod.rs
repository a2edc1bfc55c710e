use std::path::{Path, PathBuf};

use uuid::Uuid;

pub const UPLOAD_DIR: &str = "uploads";

/// Hard cap on stored image size in bytes.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

const ALLOWED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

#[derive(thiserror::Error, Debug)]
pub enum ImageStoreError {
    #[error("unsupported image type '{0}', expected one of jpg, jpeg, png, gif, webp")]
    UnsupportedType(String),

    #[error("image is larger than the {MAX_IMAGE_BYTES} byte limit")]
    TooLarge,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub async fn ensure_upload_dir() -> std::io::Result<()> {
    tokio::fs::create_dir_all(UPLOAD_DIR).await
}

/// Stores an uploaded image under a random name and returns its public URL.
pub async fn save_image(original_name: &str, data: &[u8]) -> Result<String, ImageStoreError> {
    let ext = image_extension(original_name)?;

    if data.len() > MAX_IMAGE_BYTES {
        return Err(ImageStoreError::TooLarge);
    }

    let unique_name = format!("{}.{}", Uuid::new_v4(), ext);
    let upload_path = PathBuf::from(UPLOAD_DIR).join(&unique_name);
    tokio::fs::write(&upload_path, data).await?;

    Ok(format!("/{}/{}", UPLOAD_DIR, unique_name))
}

/// Best-effort removal of a previously stored image. URLs that do not point
/// into the upload directory are ignored.
pub async fn remove_image(public_url: &str) {
    let Some(file_name) = public_url.strip_prefix("/uploads/") else {
        return;
    };

    // Only plain file names ever come out of save_image.
    if file_name.is_empty() || file_name.contains('/') || file_name.contains("..") {
        return;
    }

    let _ = tokio::fs::remove_file(PathBuf::from(UPLOAD_DIR).join(file_name)).await;
}

fn image_extension(original_name: &str) -> Result<String, ImageStoreError> {
    let ext = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(ImageStoreError::UnsupportedType(
            original_name.to_string(),
        ))
    }
}
