use std::time::Duration;

use crate::{QualityMode, SourceKind};

const LOADING_LABEL_GRACE: Duration = Duration::from_secs(2);

/// Snapshot the status line is derived from. Built by the controller on each
/// tick; drives no control decisions.
#[derive(Debug, Clone, Default)]
pub struct StatusInput {
    pub mode: QualityMode,
    pub active_source: Option<SourceKind>,
    pub has_error: bool,
    pub seeking: bool,
    pub paused: bool,
    pub ready_state: u8,
    pub current_time: f64,
    pub duration: Option<f64>,
    pub buffered: Vec<(f64, f64)>,
    /// Time since the current source was attached.
    pub load_elapsed: Option<Duration>,
    pub fast_ready: bool,
    pub hd_ready: bool,
    pub hls_ready: bool,
    pub fast_preparing: bool,
    pub hd_preparing: bool,
    pub hls_preparing: bool,
    pub auto_switch_enabled: bool,
    pub adaptive_supported: bool,
    pub hd_auto_disabled: bool,
    pub hd_retry_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BufferedInfo {
    pub duration: Option<f64>,
    pub current: f64,
    /// Fraction of the whole file buffered, when the duration is known.
    pub percent: Option<f64>,
    /// Seconds buffered ahead of the playhead.
    pub ahead: f64,
}

pub fn buffered_info(current: f64, duration: Option<f64>, ranges: &[(f64, f64)]) -> BufferedInfo {
    let current = if current.is_finite() { current } else { 0.0 };
    let duration = duration.filter(|d| d.is_finite() && *d > 0.0);

    let mut total = 0.0;
    let mut ahead = 0.0;
    for &(start, end) in ranges {
        if !start.is_finite() || !end.is_finite() || end <= start {
            continue;
        }
        total += end - start;
        if current >= start && current <= end {
            ahead = (end - current).max(0.0);
        }
    }

    let percent = duration.map(|d| (total / d).clamp(0.0, 1.0));
    BufferedInfo {
        duration,
        current,
        percent,
        ahead,
    }
}

pub fn format_clock(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "--:--".to_string();
    }
    let total = seconds.floor() as u64;
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

/// Coarse playback state. The "Loading …" label only appears after a short
/// grace so brief attaches do not flicker.
pub fn state_label(input: &StatusInput) -> String {
    if input.has_error {
        return "Error".to_string();
    }
    if input.seeking {
        return "Seeking".to_string();
    }

    if input.ready_state == 0
        && input
            .load_elapsed
            .is_some_and(|elapsed| elapsed > LOADING_LABEL_GRACE)
    {
        return match input.active_source {
            Some(SourceKind::Fast) => "Loading fast preview…".to_string(),
            Some(SourceKind::Hd) => "Loading HD…".to_string(),
            _ => "Loading original…".to_string(),
        };
    }

    if !input.paused && input.ready_state < 3 {
        return "Buffering".to_string();
    }
    if !input.paused {
        return "Playing".to_string();
    }
    if input.current_time > 0.0 {
        return "Paused".to_string();
    }
    if input.ready_state >= 2 {
        return "Ready".to_string();
    }
    "Loading".to_string()
}

/// Compose the human status line and the time clock.
pub fn compose(input: &StatusInput) -> (String, String) {
    let info = buffered_info(input.current_time, input.duration, &input.buffered);

    let clock = match info.duration {
        Some(duration) => format!(
            "{} / {}",
            format_clock(info.current),
            format_clock(duration)
        ),
        None => format_clock(info.current),
    };

    let state = state_label(input);
    let mode_label = input.mode.label();
    let mut text = match input.active_source {
        Some(source) => format!("{mode_label} • {} • {state}", source.label()),
        None => format!("{mode_label} • {state}"),
    };

    if let Some(percent) = info.percent {
        text.push_str(&format!(" • Buffered {}%", (percent * 100.0).round() as u64));
        if info.ahead > 0.0 {
            text.push_str(&format!(" • Ahead {}s", info.ahead.round() as u64));
        }
    }

    let auto = input.mode == QualityMode::Auto;
    if (auto || input.mode == QualityMode::Hd) && !input.hd_ready && input.hd_preparing {
        text.push_str(" • Preparing HD…");
    }
    if (auto || input.mode == QualityMode::Fast) && !input.fast_ready && input.fast_preparing {
        text.push_str(" • Preparing Fast…");
    }
    if auto && input.adaptive_supported && !input.hls_ready && input.hls_preparing {
        text.push_str(" • Preparing Adaptive…");
    }

    if auto && !input.auto_switch_enabled {
        text.push_str(" • Auto locked to HD");
    }

    if auto && input.hd_ready && input.active_source != Some(SourceKind::Hd) {
        if input.hd_auto_disabled {
            text.push_str(" • HD off (tap HD)");
        } else if let Some(secs) = input.hd_retry_secs {
            text.push_str(&format!(" • HD retry in {secs}s"));
        }
    }

    (text, clock)
}
