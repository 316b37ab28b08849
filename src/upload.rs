use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::app::AppError;

pub const DEFAULT_FILENAME: &str = "image.jpg";
pub const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

const MAX_FILENAME_LEN: usize = 120;

/// Replace everything outside `[A-Za-z0-9_.-]` with `_`.
pub fn sanitize_filename(filename: &str) -> String {
    let safe: String = filename
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILENAME_LEN)
        .collect();

    if safe.is_empty() {
        DEFAULT_FILENAME.to_string()
    } else {
        safe
    }
}

/// Unique storage key under `posts/`.
pub fn object_key(filename: &str) -> String {
    format!(
        "posts/{}-{}",
        rusty_ulid::generate_ulid_string().to_lowercase(),
        sanitize_filename(filename)
    )
}

/// Decode a base64 payload, tolerating a `data:<mime>;base64,` prefix.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, AppError> {
    let payload = payload.trim();
    let payload = match payload.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or_default(),
        None => payload,
    };

    let bytes = STANDARD.decode(payload)?;
    if bytes.is_empty() {
        return Err(AppError::BadRequest("base64 payload is empty".to_string()));
    }

    Ok(bytes)
}

/// Explicit content type, else the sniffed one, else JPEG.
pub fn content_type(explicit: Option<&str>, bytes: &[u8]) -> String {
    explicit
        .map(str::trim)
        .filter(|ct| !ct.is_empty())
        .map(str::to_string)
        .or_else(|| infer::get(bytes).map(|kind| kind.mime_type().to_string()))
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}
