use std::time::Duration;

use tokio::time::Instant;

use crate::sources::VideoSourceSet;
use crate::{PlayerCapabilities, QualityMode, SourceKind};

const HD_FAILURE_BASE_COOLDOWN: Duration = Duration::from_secs(15);
const HD_FAILURE_MAX_COOLDOWN: Duration = Duration::from_secs(5 * 60);
const HD_FAILURE_DISABLE_AFTER: u32 = 3;
const HD_FAILURE_COUNT_CAP: u32 = 10;

/// HD failure/backoff bookkeeping. Each failure doubles a cooldown window
/// during which automatic upgrade to HD is suppressed; repeated failures trip
/// a disable latch that only a manual quality-mode cycle clears.
#[derive(Debug, Clone, Default)]
pub struct HdHealth {
    pub failure_count: u32,
    pub suppressed_until: Option<Instant>,
    pub auto_disabled: bool,
}

impl HdHealth {
    pub fn cooldown(&self) -> Duration {
        let exp = self.failure_count.saturating_sub(1).min(31);
        let ms = HD_FAILURE_BASE_COOLDOWN.as_millis() as u64 * (1u64 << exp);
        Duration::from_millis(ms).min(HD_FAILURE_MAX_COOLDOWN)
    }

    pub fn note_failure(&mut self, now: Instant) {
        self.failure_count = (self.failure_count + 1).min(HD_FAILURE_COUNT_CAP);
        self.suppressed_until = Some(now + self.cooldown());
        if self.failure_count >= HD_FAILURE_DISABLE_AFTER {
            self.auto_disabled = true;
        }
    }

    /// Reset after HD played continuously long enough to be trusted again.
    pub fn note_stable(&mut self) {
        self.failure_count = 0;
        self.suppressed_until = None;
        self.auto_disabled = false;
    }

    pub fn is_suppressed(&self, now: Instant) -> bool {
        self.suppressed_until.is_some_and(|until| now < until)
    }

    /// Seconds until the suppression window ends, rounded up. None when not
    /// suppressed.
    pub fn retry_in_secs(&self, now: Instant) -> Option<u64> {
        let until = self.suppressed_until?;
        if now >= until {
            return None;
        }
        let remaining = until - now;
        Some((remaining.as_millis() as u64).div_ceil(1000).max(1))
    }
}

/// Mutable per-view playback state. One per controller, dropped with it.
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    pub quality_mode: QualityMode,
    pub active_source: Option<SourceKind>,
    pub switch_in_progress: bool,
    pub hd: HdHealth,
    pub is_interacting: bool,
}

impl PlaybackSession {
    pub fn new(quality_mode: QualityMode) -> Self {
        Self {
            quality_mode,
            active_source: None,
            switch_in_progress: false,
            hd: HdHealth::default(),
            is_interacting: false,
        }
    }

    /// The rendition the current mode would like to play, before readiness
    /// fallback. Under auto the answer shifts with playback context: fast
    /// while paused/seeking/scrubbing to keep seeks cheap, hd while steadily
    /// playing, the adaptive manifest whenever it is ready and supported.
    pub fn desired_for_mode(
        &self,
        sources: &VideoSourceSet,
        caps: &PlayerCapabilities,
        paused: bool,
        seeking: bool,
    ) -> SourceKind {
        match self.quality_mode {
            QualityMode::Fast => SourceKind::Fast,
            QualityMode::Hd => SourceKind::Hd,
            QualityMode::Auto => {
                if caps.adaptive_supported && sources.hls.ready {
                    return SourceKind::Hls;
                }
                if !caps.auto_switch_enabled {
                    return SourceKind::Hd;
                }
                if self.hd.auto_disabled || paused || self.is_interacting || seeking {
                    return SourceKind::Fast;
                }
                SourceKind::Hd
            }
        }
    }

    /// Manual quality cycle. Re-enables HD auto-upgrade: the disable latch
    /// and the backoff window are user-visible state, and the cycle button is
    /// the documented way out of them.
    pub fn cycle_quality_mode(&mut self) -> QualityMode {
        self.quality_mode = self.quality_mode.next();
        self.hd.note_stable();
        self.quality_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{AdaptiveSource, RenditionSource};

    #[test]
    fn test_hd_cooldown_monotone_and_capped() {
        let mut hd = HdHealth::default();
        let now = Instant::now();
        let mut previous = Duration::ZERO;
        for _ in 0..12 {
            hd.note_failure(now);
            let cooldown = hd.cooldown();
            assert!(cooldown >= previous, "cooldown shrank");
            assert!(cooldown <= Duration::from_secs(300));
            previous = cooldown;
        }
        assert_eq!(previous, Duration::from_secs(300));
        assert_eq!(hd.failure_count, 10);
    }

    #[test]
    fn test_hd_disable_after_three_failures() {
        let mut hd = HdHealth::default();
        let now = Instant::now();
        hd.note_failure(now);
        hd.note_failure(now);
        assert!(!hd.auto_disabled);
        hd.note_failure(now);
        assert!(hd.auto_disabled);

        let mut session = PlaybackSession::new(QualityMode::Auto);
        session.hd = hd;
        session.cycle_quality_mode();
        assert!(!session.hd.auto_disabled);
        assert_eq!(session.hd.failure_count, 0);
        assert!(session.hd.suppressed_until.is_none());
    }

    #[test]
    fn test_suppression_window() {
        let mut hd = HdHealth::default();
        let now = Instant::now();
        hd.note_failure(now);
        assert!(hd.is_suppressed(now));
        assert_eq!(hd.retry_in_secs(now), Some(15));
        assert!(!hd.is_suppressed(now + Duration::from_secs(15)));
        hd.note_stable();
        assert!(!hd.is_suppressed(now));
    }

    fn sources(fast: bool, hd: bool, hls: bool) -> VideoSourceSet {
        let mut set = VideoSourceSet::new("/orig".to_string());
        set.fast = RenditionSource {
            url: Some("/fast".into()),
            ready: fast,
            size: None,
        };
        set.hd = RenditionSource {
            url: Some("/hd".into()),
            ready: hd,
            size: None,
        };
        set.hls = AdaptiveSource {
            url: Some("/hls".into()),
            ready: hls,
            variants: vec![],
        };
        set
    }

    #[test]
    fn test_desired_for_mode() {
        let caps = PlayerCapabilities {
            auto_switch_enabled: true,
            adaptive_supported: true,
        };
        let mut session = PlaybackSession::new(QualityMode::Auto);

        assert_eq!(
            session.desired_for_mode(&sources(true, true, true), &caps, false, false),
            SourceKind::Hls
        );
        assert_eq!(
            session.desired_for_mode(&sources(true, true, false), &caps, false, false),
            SourceKind::Hd
        );
        // Paused or scrubbing prefers the cheap rendition.
        assert_eq!(
            session.desired_for_mode(&sources(true, true, false), &caps, true, false),
            SourceKind::Fast
        );
        session.is_interacting = true;
        assert_eq!(
            session.desired_for_mode(&sources(true, true, false), &caps, false, false),
            SourceKind::Fast
        );
        session.is_interacting = false;

        session.hd.auto_disabled = true;
        assert_eq!(
            session.desired_for_mode(&sources(true, true, false), &caps, false, false),
            SourceKind::Fast
        );
        session.hd.auto_disabled = false;

        // Platform with switching disabled pins auto to HD.
        let pinned = PlayerCapabilities {
            auto_switch_enabled: false,
            adaptive_supported: false,
        };
        assert_eq!(
            session.desired_for_mode(&sources(true, true, false), &pinned, true, false),
            SourceKind::Hd
        );

        session.quality_mode = QualityMode::Fast;
        assert_eq!(
            session.desired_for_mode(&sources(false, false, false), &caps, false, false),
            SourceKind::Fast
        );
        session.quality_mode = QualityMode::Hd;
        assert_eq!(
            session.desired_for_mode(&sources(false, false, false), &caps, false, false),
            SourceKind::Hd
        );
    }
}
