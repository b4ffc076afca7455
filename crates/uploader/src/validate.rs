use crate::api::RequestMeta;
use crate::errors::UploadError;

/// Sanitize a client-supplied relative path. Backslashes are normalized to
/// forward slashes first (Windows folder drops), then anything that could
/// escape the destination folder is rejected: a leading slash, `.` or `..`
/// segments, control characters, or an empty result.
pub fn sanitize_rel_path(value: &str) -> Option<String> {
    let value = value.replace('\\', "/");
    if value.starts_with('/') {
        return None;
    }
    if value.chars().any(|c| c.is_control()) {
        return None;
    }
    let parts: Vec<&str> = value.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return None;
    }
    if parts.iter().any(|p| *p == "." || *p == "..") {
        return None;
    }
    Some(parts.join("/"))
}

/// Normalize an extension allow-list: trimmed, leading dot stripped,
/// lowercased, empties dropped.
pub fn normalize_extensions(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

/// An empty allow-list permits everything; otherwise the file needs a
/// matching extension.
pub fn extension_allowed(name: &str, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    !ext.is_empty() && allowed.iter().any(|a| *a == ext)
}

/// Validate one candidate against the request gate, returning the sanitized
/// relative path. Runs entirely before any network call.
pub fn validate_candidate(
    name: &str,
    size: u64,
    rel_path: &str,
    meta: &RequestMeta,
) -> Result<String, UploadError> {
    let Some(rel_path) = sanitize_rel_path(rel_path) else {
        return Err(UploadError::InvalidPath);
    };
    let allowed = normalize_extensions(&meta.allowed_extensions);
    if !extension_allowed(name, &allowed) {
        return Err(UploadError::UnsupportedType);
    }
    if let Some(max) = meta.max_file_size.filter(|m| *m > 0) {
        if size > max {
            return Err(UploadError::TooLarge);
        }
    }
    Ok(rel_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_rel_path_accepts_clean_paths() {
        assert_eq!(sanitize_rel_path("photo.jpg").as_deref(), Some("photo.jpg"));
        assert_eq!(
            sanitize_rel_path("album/photo.jpg").as_deref(),
            Some("album/photo.jpg")
        );
        // Backslash folder drops normalize instead of failing.
        assert_eq!(
            sanitize_rel_path("album\\photo.jpg").as_deref(),
            Some("album/photo.jpg")
        );
        assert_eq!(
            sanitize_rel_path("a//b///c.png").as_deref(),
            Some("a/b/c.png")
        );
    }

    #[test]
    fn test_sanitize_rel_path_rejects_escapes() {
        assert_eq!(sanitize_rel_path("/etc/passwd"), None);
        assert_eq!(sanitize_rel_path("\\\\server\\share"), None);
        assert_eq!(sanitize_rel_path("a/../b.jpg"), None);
        assert_eq!(sanitize_rel_path("./b.jpg"), None);
        assert_eq!(sanitize_rel_path("a/\x00/b.jpg"), None);
        assert_eq!(sanitize_rel_path("a\x1fb.jpg"), None);
        assert_eq!(sanitize_rel_path(""), None);
        assert_eq!(sanitize_rel_path("///"), None);
    }

    #[test]
    fn test_extension_allow_list() {
        let allowed = normalize_extensions(&[".JPG".into(), "png ".into(), "".into()]);
        assert_eq!(allowed, vec!["jpg", "png"]);
        assert!(extension_allowed("photo.JPG", &allowed));
        assert!(extension_allowed("a.b.png", &allowed));
        assert!(!extension_allowed("evil.exe", &allowed));
        assert!(!extension_allowed("noext", &allowed));
        assert!(extension_allowed("anything.xyz", &[]));
    }

    #[test]
    fn test_validate_candidate() {
        let meta = RequestMeta {
            allowed_extensions: vec!["jpg".into(), "png".into()],
            max_file_size: Some(1000),
            ..Default::default()
        };
        assert_eq!(
            validate_candidate("p.jpg", 500, "p.jpg", &meta).unwrap(),
            "p.jpg"
        );
        assert!(matches!(
            validate_candidate("evil.exe", 500, "evil.exe", &meta),
            Err(UploadError::UnsupportedType)
        ));
        assert!(matches!(
            validate_candidate("p.jpg", 1001, "p.jpg", &meta),
            Err(UploadError::TooLarge)
        ));
        assert!(matches!(
            validate_candidate("p.jpg", 500, "../p.jpg", &meta),
            Err(UploadError::InvalidPath)
        ));
    }
}
