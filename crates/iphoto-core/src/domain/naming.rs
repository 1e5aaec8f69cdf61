//! Filename normalization for downloaded photos
//!
//! Remote filenames are untrusted: they may contain path separators, NUL
//! bytes, or trailing characters Windows cannot round-trip. The engine
//! normalizes every remote name before it becomes a key or a path component.

use super::errors::DomainError;

/// Normalizes a remote filename into a filesystem-safe name.
///
/// Applied steps, in order:
/// 1. Drop path separators (`/` and `\`) and NUL bytes entirely.
/// 2. Trim trailing dots and whitespace (Windows strips these on create,
///    which would make the stored key diverge from the on-disk name).
///
/// Returns [`DomainError::UnusableFilename`] when the result is empty,
/// which callers treat as skip-with-warning.
pub fn normalize_filename(raw: &str) -> Result<String, DomainError> {
    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .collect();

    let normalized = stripped.trim_end_matches(['.', ' ', '\t']).to_string();

    if normalized.is_empty() {
        return Err(DomainError::UnusableFilename(raw.to_string()));
    }
    Ok(normalized)
}

/// Normalizes an album name into a safe directory name.
///
/// Same rules as [`normalize_filename`]; album names additionally keep
/// their interior whitespace untouched so `"Summer 2024"` stays readable.
pub fn normalize_album_dir(raw: &str) -> Result<String, DomainError> {
    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .collect();

    let normalized = stripped.trim_end_matches(['.', ' ', '\t']).to_string();

    if normalized.is_empty() {
        return Err(DomainError::UnusableAlbumName(raw.to_string()));
    }
    Ok(normalized)
}

/// Builds the tracker-relative path `<album_dir>/<filename>`.
///
/// Always uses `/` as the separator; the filesystem layer converts to the
/// platform separator when touching disk.
pub fn relpath(album_dir: &str, filename: &str) -> String {
    format!("{}/{}", album_dir, filename)
}
