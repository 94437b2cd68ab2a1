//! Helpers for normalizing client-supplied upload names.

use super::types::UploadError;
use crate::extract::DocumentKind;
use std::path::Path;

/// Number of hex characters of the document hash prefixed to stored filenames.
const STORED_PREFIX_LEN: usize = 12;

/// Reduce a client-supplied filename to a bare, space-free name.
///
/// Directory components (either separator) are stripped, whitespace runs become underscores,
/// and control characters are dropped. Returns `None` when nothing usable remains.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| !c.is_control())
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Upload size limit in bytes for a limit of `max_upload_mb` megabytes.
pub fn upload_limit_bytes(max_upload_mb: usize) -> usize {
    max_upload_mb.saturating_mul(1024 * 1024)
}

/// Validate an upload and return its sanitized name.
///
/// Checks run in order: name and extension, emptiness, then size.
pub fn validate_upload(
    raw_name: &str,
    size: usize,
    max_upload_mb: usize,
) -> Result<String, UploadError> {
    let name = sanitize_filename(raw_name).ok_or(UploadError::UnsupportedFormat)?;
    if DocumentKind::from_path(Path::new(&name)).is_none() {
        return Err(UploadError::UnsupportedFormat);
    }
    if size == 0 {
        return Err(UploadError::Empty);
    }
    if size > upload_limit_bytes(max_upload_mb) {
        return Err(UploadError::TooLarge {
            max_mb: max_upload_mb,
        });
    }
    Ok(name)
}

/// Stored filename for a document: `{first 12 hash chars}_{name}`.
pub fn stored_filename(doc_id: &str, name: &str) -> String {
    let prefix = doc_id.get(..STORED_PREFIX_LEN).unwrap_or(doc_id);
    format!("{prefix}_{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_directories_and_spaces() {
        assert_eq!(
            sanitize_filename("../../etc/My Paper  v2.pdf").as_deref(),
            Some("My_Paper_v2.pdf")
        );
        assert_eq!(
            sanitize_filename(r"C:\Users\me\notes.md").as_deref(),
            Some("notes.md")
        );
        assert_eq!(sanitize_filename("..").as_deref(), None);
        assert_eq!(sanitize_filename("dir/").as_deref(), None);
        assert_eq!(sanitize_filename(".hidden.md").as_deref(), Some("hidden.md"));
    }

    #[test]
    fn validate_upload_checks_extension_then_size() {
        assert_eq!(validate_upload("a.MD", 10, 1).expect("ok"), "a.MD");
        assert!(matches!(
            validate_upload("photo.png", 10, 1),
            Err(UploadError::UnsupportedFormat)
        ));
        assert!(matches!(
            validate_upload("a.pdf", 0, 1),
            Err(UploadError::Empty)
        ));
        assert!(matches!(
            validate_upload("a.pdf", 1024 * 1024 + 1, 1),
            Err(UploadError::TooLarge { max_mb: 1 })
        ));
        assert!(validate_upload("a.pdf", 1024 * 1024, 1).is_ok());
        assert_eq!(upload_limit_bytes(20), 20 * 1024 * 1024);
        assert_eq!(upload_limit_bytes(usize::MAX), usize::MAX);
    }

    #[test]
    fn stored_filename_uses_hash_prefix() {
        let doc_id = "0123456789abcdef0123";
        assert_eq!(stored_filename(doc_id, "notes.md"), "0123456789ab_notes.md");
    }
}
