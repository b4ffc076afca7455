pub mod controller;
pub mod errors;
pub mod events;
pub mod media;
pub mod session;
pub mod sources;
pub mod status;

pub use controller::{AdaptivePlayer, PlayerHandle};
pub use errors::PlayerError;
pub use events::{MediaEvent, PlayerEvent};
pub use media::{AttachMode, MediaElement};
pub use sources::{PrepareTarget, ShareLocator, SourcesApi, VideoSourceSet};

use std::sync::OnceLock;

/// One encoded rendition of a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Original,
    Fast,
    Hd,
    Hls,
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Original => "Original",
            SourceKind::Fast => "Fast",
            SourceKind::Hd => "HD",
            SourceKind::Hls => "Adaptive",
        }
    }
}

/// User-level quality policy, distinct from the currently attached rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualityMode {
    #[default]
    Auto,
    Hd,
    Fast,
}

impl QualityMode {
    /// Cycle order of the quality button: auto -> hd -> fast -> auto.
    pub fn next(&self) -> QualityMode {
        match self {
            QualityMode::Auto => QualityMode::Hd,
            QualityMode::Hd => QualityMode::Fast,
            QualityMode::Fast => QualityMode::Auto,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            QualityMode::Auto => "Auto",
            QualityMode::Hd => "HD",
            QualityMode::Fast => "Fast",
        }
    }

    /// Parse a user-provided mode string, falling back to `Auto` on anything
    /// unrecognized.
    pub fn parse(value: &str) -> QualityMode {
        match value.trim().to_lowercase().as_str() {
            "hd" => QualityMode::Hd,
            "fast" => QualityMode::Fast,
            _ => QualityMode::Auto,
        }
    }
}

/// Platform quirks resolved once at startup instead of scattering UA checks
/// through the control logic.
#[derive(Debug, Clone, Copy)]
pub struct PlayerCapabilities {
    /// Certain mobile media stacks mishandle mid-playback source swaps; when
    /// false, auto mode pins to HD instead of switching dynamically.
    pub auto_switch_enabled: bool,
    /// Whether the platform can play an adaptive manifest, natively or via a
    /// polyfill engine.
    pub adaptive_supported: bool,
}

impl Default for PlayerCapabilities {
    fn default() -> Self {
        Self {
            auto_switch_enabled: true,
            adaptive_supported: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub base_url: String,
    pub share: String,
    pub file_path: String,
    pub initial_quality: QualityMode,
    pub capabilities: PlayerCapabilities,
}

fn share_hash_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("static regex"))
}

pub fn is_valid_share_hash(share: &str) -> bool {
    share_hash_regex().is_match(share)
}

/// Validate and normalize a relative file path. Returns `None` for anything
/// that could escape the share root: a leading slash, any backslash, an empty
/// path or a `..` segment.
pub fn safe_rel_path(value: &str) -> Option<String> {
    if value.starts_with('/') || value.starts_with('\\') {
        return None;
    }
    if value.contains('\\') {
        return None;
    }
    let parts: Vec<&str> = value.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return None;
    }
    if parts.iter().any(|p| *p == "..") {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_hash_validation() {
        assert!(is_valid_share_hash("abc123"));
        assert!(is_valid_share_hash("a"));
        assert!(is_valid_share_hash("A-Z_09"));
        assert!(!is_valid_share_hash(""));
        assert!(!is_valid_share_hash("abc/123"));
        assert!(!is_valid_share_hash("abc 123"));
        assert!(!is_valid_share_hash(&"x".repeat(65)));
    }

    #[test]
    fn test_safe_rel_path() {
        assert_eq!(safe_rel_path("clip.mp4").as_deref(), Some("clip.mp4"));
        assert_eq!(
            safe_rel_path("folder//clip.mp4").as_deref(),
            Some("folder/clip.mp4")
        );
        assert_eq!(safe_rel_path("/clip.mp4"), None);
        assert_eq!(safe_rel_path("\\clip.mp4"), None);
        assert_eq!(safe_rel_path("folder\\clip.mp4"), None);
        assert_eq!(safe_rel_path("folder/../clip.mp4"), None);
        assert_eq!(safe_rel_path(""), None);
        assert_eq!(safe_rel_path("///"), None);
    }

    #[test]
    fn test_quality_mode_cycle() {
        assert_eq!(QualityMode::Auto.next(), QualityMode::Hd);
        assert_eq!(QualityMode::Hd.next(), QualityMode::Fast);
        assert_eq!(QualityMode::Fast.next(), QualityMode::Auto);
    }

    #[test]
    fn test_quality_mode_parse() {
        assert_eq!(QualityMode::parse("HD "), QualityMode::Hd);
        assert_eq!(QualityMode::parse("fast"), QualityMode::Fast);
        assert_eq!(QualityMode::parse("auto"), QualityMode::Auto);
        assert_eq!(QualityMode::parse("1080p"), QualityMode::Auto);
    }
}
