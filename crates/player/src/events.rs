use crate::{QualityMode, SourceKind};

/// Media element notifications fed into the controller by the host. These
/// mirror the events a browser media element emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    Play,
    Playing,
    Pause,
    Waiting,
    Stalled,
    Seeking,
    Seeked,
    TimeUpdate,
    Progress,
    LoadedMetadata,
    Error,
    /// Error reported by the adaptive (HLS) engine rather than the media
    /// element itself. Non-fatal engine errors are ignored.
    AdaptiveError { fatal: bool },
}

#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// Derived status line, recomputed on a fixed tick. Observational only.
    Status { text: String, clock: String },
    SourceChanged { source: SourceKind },
    QualityModeChanged { mode: QualityMode },
    /// Terminal playback failure for the active path. The page survives; the
    /// host shows a recoverable error tile.
    PlaybackFailed { title: String, message: String },
}
