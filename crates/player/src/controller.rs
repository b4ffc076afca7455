use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::errors::PlayerError;
use crate::events::{MediaEvent, PlayerEvent};
use crate::media::{AttachMode, MediaElement};
use crate::session::PlaybackSession;
use crate::sources::{PrepareTarget, ShareLocator, SourcesApi, SourcesResponse, VideoSourceSet};
use crate::status::{self, StatusInput};
use crate::{is_valid_share_hash, safe_rel_path, PlayerConfig, QualityMode, SourceKind};

const AUTO_STALL_FALLBACK: Duration = Duration::from_millis(3500);
const AUTO_STALL_FALLBACK_INITIAL: Duration = Duration::from_secs(8);
const STALL_INITIAL_WINDOW: Duration = Duration::from_secs(6);
const HD_STABLE_RESET: Duration = Duration::from_secs(5);
const AUTO_HD_UPGRADE_DELAY: Duration = Duration::from_millis(1200);
const SOURCES_POLL_INTERVAL: Duration = Duration::from_secs(2);
const SOURCES_POLL_MAX: Duration = Duration::from_secs(10 * 60);
const INTERACTION_IDLE: Duration = Duration::from_millis(800);
const HD_SWITCH_RETRY: Duration = Duration::from_millis(500);
const STATUS_TICK: Duration = Duration::from_millis(500);
/// Keep restored positions off the very end of the file, where a seek can
/// wedge some media stacks.
const END_SEEK_MARGIN: f64 = 0.25;

const COMMAND_CHANNEL_SIZE: usize = 64;
const EVENT_CHANNEL_SIZE: usize = 64;

#[derive(Debug)]
pub(crate) enum PlayerCommand {
    Media(MediaEvent),
    CycleQuality,
    Reload,
    Shutdown,
    SourcesFetched {
        result: Result<SourcesResponse, PlayerError>,
        from_poll: bool,
    },
}

/// Cloneable handle for feeding the controller from the host: media element
/// events, the quality/reload buttons, shutdown.
#[derive(Clone)]
pub struct PlayerHandle {
    tx: mpsc::Sender<PlayerCommand>,
    events: broadcast::Sender<PlayerEvent>,
}

impl PlayerHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub async fn media_event(&self, event: MediaEvent) {
        let _ = self.tx.send(PlayerCommand::Media(event)).await;
    }

    pub async fn cycle_quality(&self) {
        let _ = self.tx.send(PlayerCommand::CycleQuality).await;
    }

    pub async fn reload(&self) {
        let _ = self.tx.send(PlayerCommand::Reload).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(PlayerCommand::Shutdown).await;
    }
}

struct PendingSwitch {
    target: SourceKind,
    time: Option<f64>,
    should_play: bool,
}

/// Adaptive video-source selection and playback-resilience state machine.
///
/// Owns one media session: it reacts to media element events and readiness
/// polling, arbitrates automatic vs. user-forced quality, and recovers from
/// stalls and errors by demoting quality with exponential backoff on HD.
/// All state lives in this single task; `run` is the event loop.
pub struct AdaptivePlayer {
    share: String,
    config: PlayerConfig,
    media: Arc<dyn MediaElement>,
    api: Arc<dyn SourcesApi>,
    sources: VideoSourceSet,
    session: PlaybackSession,

    tx: mpsc::Sender<PlayerCommand>,
    rx: mpsc::Receiver<PlayerCommand>,
    events: broadcast::Sender<PlayerEvent>,

    pending_switch: Option<PendingSwitch>,
    source_load_started_at: Option<Instant>,

    stall_deadline: Option<Instant>,
    hd_stable_deadline: Option<Instant>,
    hd_upgrade_deadline: Option<Instant>,
    hd_switch_retry_deadline: Option<Instant>,
    interaction_idle_deadline: Option<Instant>,
    last_interaction_at: Option<Instant>,

    poll_deadline: Option<Instant>,
    poll_started_at: Option<Instant>,
    poll_in_flight: bool,
    fast_preparing: bool,
    hd_preparing: bool,
    hls_preparing: bool,

    status_tick_at: Instant,
    last_status: String,
    quit: bool,
}

impl AdaptivePlayer {
    /// Validates the share hash and file path before anything else; a bad
    /// link fails fast here, without any network traffic.
    pub fn new(
        config: PlayerConfig,
        media: Arc<dyn MediaElement>,
        api: Arc<dyn SourcesApi>,
    ) -> Result<(Self, PlayerHandle), PlayerError> {
        if !is_valid_share_hash(&config.share) {
            return Err(PlayerError::InvalidShare);
        }
        let Some(file_path) = safe_rel_path(&config.file_path) else {
            return Err(PlayerError::InvalidFilePath);
        };

        let locator = ShareLocator {
            base_url: config.base_url.clone(),
            share: config.share.clone(),
            file_path,
        };
        let sources = VideoSourceSet::new(locator.inline_url());

        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let handle = PlayerHandle {
            tx: tx.clone(),
            events: events.clone(),
        };

        let player = Self {
            share: config.share.clone(),
            session: PlaybackSession::new(config.initial_quality),
            config,
            media,
            api,
            sources,
            tx,
            rx,
            events,
            pending_switch: None,
            source_load_started_at: None,
            stall_deadline: None,
            hd_stable_deadline: None,
            hd_upgrade_deadline: None,
            hd_switch_retry_deadline: None,
            interaction_idle_deadline: None,
            last_interaction_at: None,
            poll_deadline: None,
            poll_started_at: None,
            poll_in_flight: false,
            fast_preparing: false,
            hd_preparing: false,
            hls_preparing: false,
            status_tick_at: Instant::now() + STATUS_TICK,
            last_status: String::new(),
            quit: false,
        };
        Ok((player, handle))
    }

    pub fn locator(&self) -> ShareLocator {
        ShareLocator {
            base_url: self.config.base_url.clone(),
            share: self.config.share.clone(),
            file_path: self.config.file_path.clone(),
        }
    }

    /// Run the controller until shutdown. Attaches the initial source, then
    /// multiplexes host commands, media events and timer deadlines.
    pub async fn run(&mut self) {
        self.load_initial().await;

        while !self.quit {
            let deadline = self.next_deadline();
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => self.handle_deadlines(),
            }
        }
        log::debug!("[{}] player loop exited", self.share);
    }

    async fn load_initial(&mut self) {
        self.refresh_status();

        match self.api.fetch_sources(&[]).await {
            Ok(data) => self.sources.apply(&data),
            Err(e) => log::warn!("[{}] initial sources fetch failed: {e}", self.share),
        }

        let caps = self.config.capabilities;
        match self.session.quality_mode {
            QualityMode::Auto => {
                if caps.adaptive_supported && !self.sources.hls.ready {
                    self.ensure_prepared(&[PrepareTarget::Hls]);
                }
                if !self.sources.fast.ready {
                    self.ensure_prepared(&[PrepareTarget::Fast]);
                }
            }
            QualityMode::Hd => {
                if !self.sources.hd.ready {
                    self.ensure_prepared(&[PrepareTarget::Hd]);
                }
            }
            QualityMode::Fast => {
                if !self.sources.fast.ready {
                    self.ensure_prepared(&[PrepareTarget::Fast]);
                }
            }
        }

        let desired = self.session.desired_for_mode(
            &self.sources,
            &caps,
            self.media.paused(),
            self.media.seeking(),
        );
        let initial = self
            .sources
            .pick_playable(desired, None, caps.adaptive_supported);
        self.set_source(initial, Some(0.0), false, false);
    }

    fn handle_command(&mut self, command: PlayerCommand) {
        match command {
            PlayerCommand::Media(event) => self.handle_media_event(event),
            PlayerCommand::CycleQuality => self.cycle_quality(),
            PlayerCommand::Reload => self.reload(),
            PlayerCommand::Shutdown => self.quit = true,
            PlayerCommand::SourcesFetched { result, from_poll } => {
                self.handle_sources_fetched(result, from_poll)
            }
        }
        self.refresh_status();
    }

    fn handle_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::Play => self.on_play(),
            MediaEvent::Playing => self.on_playing(),
            MediaEvent::Pause => self.hd_stable_deadline = None,
            MediaEvent::Waiting | MediaEvent::Stalled => {
                self.hd_stable_deadline = None;
                self.schedule_stall_fallback();
            }
            MediaEvent::Seeking => {
                self.hd_stable_deadline = None;
                if !self.session.switch_in_progress {
                    self.note_interaction(true);
                }
            }
            MediaEvent::Seeked => self.note_interaction(false),
            MediaEvent::TimeUpdate | MediaEvent::Progress => {}
            MediaEvent::LoadedMetadata => self.on_loaded_metadata(),
            MediaEvent::Error => self.on_media_error(),
            MediaEvent::AdaptiveError { fatal } => {
                if fatal {
                    self.on_adaptive_fatal();
                }
            }
        }
    }

    fn on_play(&mut self) {
        let caps = self.config.capabilities;
        let auto = self.session.quality_mode == QualityMode::Auto;
        if auto && caps.adaptive_supported && !self.sources.hls.ready && !self.hls_preparing {
            self.ensure_prepared(&[PrepareTarget::Hls]);
        }
        if auto && !self.sources.fast.ready && !self.fast_preparing {
            self.ensure_prepared(&[PrepareTarget::Fast]);
        }
        let wants_hd = self.session.quality_mode == QualityMode::Hd
            || (auto && !self.session.hd.auto_disabled);
        if wants_hd && !self.sources.hd.ready && !self.hd_preparing {
            self.ensure_prepared(&[PrepareTarget::Hd]);
        }
        if self.session.quality_mode == QualityMode::Fast
            && !self.sources.fast.ready
            && !self.fast_preparing
        {
            self.ensure_prepared(&[PrepareTarget::Fast]);
        }
    }

    fn on_playing(&mut self) {
        self.stall_deadline = None;
        if self.session.active_source == Some(SourceKind::Hd) {
            self.hd_stable_deadline = Some(Instant::now() + HD_STABLE_RESET);
        }
        if self.session.quality_mode == QualityMode::Auto {
            self.schedule_hd_upgrade(AUTO_HD_UPGRADE_DELAY);
        }
    }

    fn on_loaded_metadata(&mut self) {
        let Some(pending) = self.pending_switch.take() else {
            return;
        };
        if let Some(time) = pending.time {
            let time = time.max(0.0);
            let clamped = match self.media.duration() {
                Some(duration) if duration.is_finite() => {
                    time.min((duration - END_SEEK_MARGIN).max(0.0))
                }
                _ => time,
            };
            self.media.set_current_time(clamped);
        }
        if pending.should_play {
            self.media.play();
        }
        self.session.switch_in_progress = false;
        self.emit(PlayerEvent::SourceChanged {
            source: pending.target,
        });
    }

    fn on_media_error(&mut self) {
        self.hd_stable_deadline = None;
        let pending = self.pending_switch.take();
        self.session.switch_in_progress = false;

        if self.session.quality_mode == QualityMode::Auto
            && self.session.active_source == Some(SourceKind::Hd)
        {
            log::warn!("[{}] hd playback error, demoting", self.share);
            self.note_hd_failure();
            let time = pending
                .as_ref()
                .and_then(|p| p.time)
                .unwrap_or_else(|| self.media.current_time());
            let should_play = pending
                .map(|p| p.should_play)
                .unwrap_or_else(|| !self.media.paused());
            let fallback = self.sources.pick_playable(
                SourceKind::Fast,
                Some(SourceKind::Hd),
                self.config.capabilities.adaptive_supported,
            );
            self.set_source(fallback, Some(time), should_play, false);
            return;
        }

        self.emit(PlayerEvent::PlaybackFailed {
            title: "Could not load video".to_string(),
            message: "Try refreshing the page. If it keeps failing, go back to the gallery."
                .to_string(),
        });
    }

    fn on_adaptive_fatal(&mut self) {
        log::warn!("[{}] fatal adaptive engine error", self.share);
        self.media.detach();
        let pending = self.pending_switch.take();
        self.session.switch_in_progress = false;

        if self.session.quality_mode == QualityMode::Auto {
            let time = pending
                .as_ref()
                .and_then(|p| p.time)
                .unwrap_or_else(|| self.media.current_time());
            let should_play = pending
                .map(|p| p.should_play)
                .unwrap_or_else(|| !self.media.paused());
            let fallback = self.sources.pick_playable(
                SourceKind::Fast,
                Some(SourceKind::Hls),
                self.config.capabilities.adaptive_supported,
            );
            self.set_source(fallback, Some(time), should_play, false);
        }
    }

    /// Attach a rendition. Exactly one switch may be in flight; requests
    /// arriving during one are dropped, not queued.
    fn set_source(
        &mut self,
        kind: SourceKind,
        time: Option<f64>,
        should_play: bool,
        cache_bust: bool,
    ) {
        if self.session.switch_in_progress {
            log::debug!("[{}] switch already in flight, dropping {kind:?}", self.share);
            return;
        }
        let Some(url) = self.sources.url_for(kind).map(str::to_string) else {
            self.emit(PlayerEvent::PlaybackFailed {
                title: "Could not load video".to_string(),
                message: "Missing source URL.".to_string(),
            });
            return;
        };
        let url = if cache_bust {
            let sep = if url.contains('?') { '&' } else { '?' };
            format!("{url}{sep}v={}", chrono::Utc::now().timestamp_millis())
        } else {
            url
        };

        log::info!("[{}] attaching {} source", self.share, kind.label());
        self.session.switch_in_progress = true;
        self.stall_deadline = None;
        self.session.active_source = Some(kind);
        self.source_load_started_at = Some(Instant::now());

        self.media.pause();
        self.media.detach();
        let mode = if kind == SourceKind::Hls {
            AttachMode::Adaptive
        } else {
            AttachMode::Direct
        };
        self.media.attach(&url, mode);

        self.pending_switch = Some(PendingSwitch {
            target: kind,
            time,
            should_play,
        });
        self.refresh_status();
    }

    fn note_hd_failure(&mut self) {
        self.session.hd.note_failure(Instant::now());
        self.hd_stable_deadline = None;
        self.hd_upgrade_deadline = None;
    }

    fn schedule_stall_fallback(&mut self) {
        if self.session.quality_mode != QualityMode::Auto
            || !self.config.capabilities.auto_switch_enabled
            || self.session.active_source != Some(SourceKind::Hd)
            || self.session.switch_in_progress
            || self.media.paused()
        {
            return;
        }
        let now = Instant::now();
        let elapsed = self
            .source_load_started_at
            .map(|at| now - at)
            .unwrap_or(Duration::MAX);
        let delay = if elapsed < STALL_INITIAL_WINDOW {
            AUTO_STALL_FALLBACK_INITIAL
        } else {
            AUTO_STALL_FALLBACK
        };
        self.stall_deadline = Some(now + delay);
    }

    fn fire_stall_fallback(&mut self) {
        if self.session.quality_mode != QualityMode::Auto
            || self.session.active_source != Some(SourceKind::Hd)
            || self.session.switch_in_progress
            || self.media.paused()
        {
            return;
        }
        log::warn!("[{}] hd stalled without recovery, demoting", self.share);
        self.note_hd_failure();
        let fallback = self.sources.pick_playable(
            SourceKind::Fast,
            Some(SourceKind::Hd),
            self.config.capabilities.adaptive_supported,
        );
        self.set_source(fallback, Some(self.media.current_time()), true, false);
    }

    fn schedule_hd_upgrade(&mut self, delay: Duration) {
        if self.session.quality_mode != QualityMode::Auto
            || !self.config.capabilities.auto_switch_enabled
            || self.session.hd.auto_disabled
        {
            return;
        }
        self.hd_upgrade_deadline = Some(Instant::now() + delay);
    }

    fn maybe_upgrade_to_hd(&mut self) {
        let now = Instant::now();
        if self.session.quality_mode != QualityMode::Auto
            || !self.config.capabilities.auto_switch_enabled
            || self.session.hd.auto_disabled
            || self.session.is_interacting
            || self.media.seeking()
            || self.session.active_source == Some(SourceKind::Hd)
            || !self.sources.hd.ready
            || self.session.hd.is_suppressed(now)
            || self.session.switch_in_progress
            || self.media.paused()
        {
            return;
        }
        self.set_source(SourceKind::Hd, Some(self.media.current_time()), true, false);
    }

    /// Seek/scrub handling. Entering interaction cancels pending upgrades
    /// and, under auto, drops to the fast rendition to keep seeks cheap; the
    /// HD re-upgrade waits for the idle window.
    fn note_interaction(&mut self, allow_fast_switch: bool) {
        let now = Instant::now();
        self.last_interaction_at = Some(now);

        if !self.session.is_interacting {
            self.session.is_interacting = true;
            self.hd_upgrade_deadline = None;
            if self.session.quality_mode == QualityMode::Auto {
                if !self.sources.fast.ready && !self.fast_preparing {
                    self.ensure_prepared(&[PrepareTarget::Fast]);
                }
                if self.config.capabilities.auto_switch_enabled
                    && allow_fast_switch
                    && self.sources.fast.ready
                    && self.session.active_source != Some(SourceKind::Fast)
                    && !self.session.switch_in_progress
                {
                    self.set_source(
                        SourceKind::Fast,
                        Some(self.media.current_time()),
                        !self.media.paused(),
                        false,
                    );
                }
            }
        }

        self.interaction_idle_deadline = Some(now + INTERACTION_IDLE + Duration::from_millis(25));
    }

    fn fire_interaction_idle(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_interaction_at {
            if now - last < INTERACTION_IDLE {
                self.interaction_idle_deadline =
                    Some(last + INTERACTION_IDLE + Duration::from_millis(25));
                return;
            }
        }
        if !self.session.is_interacting {
            return;
        }
        self.session.is_interacting = false;

        if self.session.quality_mode == QualityMode::Auto && !self.media.paused() {
            if self.config.capabilities.auto_switch_enabled
                && !self.session.hd.auto_disabled
                && !self.sources.hd.ready
                && !self.hd_preparing
            {
                self.ensure_prepared(&[PrepareTarget::Hd]);
            }
            self.schedule_hd_upgrade(AUTO_HD_UPGRADE_DELAY);
        }
    }

    fn cycle_quality(&mut self) {
        let mode = self.session.cycle_quality_mode();
        log::info!("[{}] quality mode -> {}", self.share, mode.label());
        self.emit(PlayerEvent::QualityModeChanged { mode });

        let caps = self.config.capabilities;
        let time = self.media.current_time();
        let should_play = !self.media.paused();
        let desired = self.session.desired_for_mode(
            &self.sources,
            &caps,
            self.media.paused(),
            self.media.seeking(),
        );

        if matches!(mode, QualityMode::Auto | QualityMode::Hd) && !self.sources.hd.ready {
            self.ensure_prepared(&[PrepareTarget::Hd]);
        }
        if mode == QualityMode::Auto && !self.sources.fast.ready {
            self.ensure_prepared(&[PrepareTarget::Fast]);
        }
        if mode == QualityMode::Auto && caps.adaptive_supported && !self.sources.hls.ready {
            self.ensure_prepared(&[PrepareTarget::Hls]);
        }
        if mode == QualityMode::Fast && !self.sources.fast.ready {
            self.ensure_prepared(&[PrepareTarget::Fast]);
        }

        let target = self
            .sources
            .pick_playable(desired, None, caps.adaptive_supported);
        self.set_source(target, Some(time), should_play, false);
    }

    fn reload(&mut self) {
        let caps = self.config.capabilities;
        let time = self.media.current_time();
        let should_play = !self.media.paused();
        let target = self.session.active_source.unwrap_or_else(|| {
            let desired = self.session.desired_for_mode(
                &self.sources,
                &caps,
                self.media.paused(),
                self.media.seeking(),
            );
            self.sources
                .pick_playable(desired, None, caps.adaptive_supported)
        });
        self.set_source(target, Some(time), should_play, true);
    }

    /// Request preparation of one or more targets and start the readiness
    /// poller.
    fn ensure_prepared(&mut self, targets: &[PrepareTarget]) {
        if targets.is_empty() {
            return;
        }
        for target in targets {
            match target {
                PrepareTarget::Fast => self.fast_preparing = true,
                PrepareTarget::Hd => self.hd_preparing = true,
                PrepareTarget::Hls => self.hls_preparing = true,
            }
        }
        self.spawn_fetch(targets.to_vec(), false);
        self.start_poller();
    }

    fn spawn_fetch(&self, targets: Vec<PrepareTarget>, from_poll: bool) {
        let api = Arc::clone(&self.api);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_sources(&targets).await;
            let _ = tx
                .send(PlayerCommand::SourcesFetched { result, from_poll })
                .await;
        });
    }

    fn start_poller(&mut self) {
        if self.poll_deadline.is_some() {
            return;
        }
        let now = Instant::now();
        self.poll_started_at = Some(now);
        self.poll_deadline = Some(now + SOURCES_POLL_INTERVAL);
    }

    fn stop_poller(&mut self) {
        self.poll_deadline = None;
        self.poll_started_at = None;
    }

    fn fire_poll(&mut self) {
        let now = Instant::now();
        if let Some(started) = self.poll_started_at {
            if now - started > SOURCES_POLL_MAX {
                log::warn!("[{}] sources poll window elapsed", self.share);
                self.stop_poller();
                self.fast_preparing = false;
                self.hd_preparing = false;
                self.hls_preparing = false;
                return;
            }
        }
        self.poll_deadline = Some(now + SOURCES_POLL_INTERVAL);
        if self.poll_in_flight {
            return;
        }
        self.poll_in_flight = true;
        self.spawn_fetch(Vec::new(), true);
    }

    fn handle_sources_fetched(
        &mut self,
        result: Result<SourcesResponse, PlayerError>,
        from_poll: bool,
    ) {
        if from_poll {
            self.poll_in_flight = false;
        }

        match result {
            Ok(data) => self.sources.apply(&data),
            Err(e) => {
                log::warn!("[{}] sources fetch failed: {e}", self.share);
                return;
            }
        }
        if !from_poll {
            // Prepare acknowledgements only merge data; the poller evaluates.
            return;
        }

        if self.fast_preparing && self.sources.fast.ready {
            self.on_fast_ready();
        }
        if self.hd_preparing && self.sources.hd.ready {
            self.on_hd_ready();
        }
        if self.hls_preparing && self.sources.hls.ready {
            self.on_hls_ready();
        }
        if !self.fast_preparing && !self.hd_preparing && !self.hls_preparing {
            self.stop_poller();
        }
    }

    fn on_fast_ready(&mut self) {
        self.fast_preparing = false;
        if self.session.switch_in_progress {
            return;
        }
        let should_play = !self.media.paused();
        let active_fast = self.session.active_source == Some(SourceKind::Fast);
        match self.session.quality_mode {
            QualityMode::Fast if !active_fast => {
                self.set_source(
                    SourceKind::Fast,
                    Some(self.media.current_time()),
                    should_play,
                    false,
                );
            }
            QualityMode::Auto if self.config.capabilities.auto_switch_enabled => {
                let scrubbing =
                    self.session.is_interacting || self.media.seeking() || self.media.paused();
                if scrubbing && !active_fast {
                    self.set_source(
                        SourceKind::Fast,
                        Some(self.media.current_time()),
                        should_play,
                        false,
                    );
                }
            }
            _ => {}
        }
    }

    fn on_hd_ready(&mut self) {
        self.hd_preparing = false;
        if self.session.switch_in_progress {
            // wait for the current switch to finish
            return;
        }
        match self.session.quality_mode {
            QualityMode::Hd => self.attempt_hd_switch(),
            QualityMode::Auto
                if self.config.capabilities.auto_switch_enabled && !self.media.paused() =>
            {
                self.schedule_hd_upgrade(AUTO_HD_UPGRADE_DELAY);
            }
            _ => {}
        }
    }

    /// Forced-HD switch, deferred in short steps while the user is scrubbing.
    fn attempt_hd_switch(&mut self) {
        if self.session.quality_mode != QualityMode::Hd
            || self.session.active_source == Some(SourceKind::Hd)
        {
            self.hd_switch_retry_deadline = None;
            return;
        }
        if self.session.switch_in_progress {
            self.hd_switch_retry_deadline = None;
            return;
        }
        if self.session.is_interacting || self.media.seeking() {
            self.hd_switch_retry_deadline = Some(Instant::now() + HD_SWITCH_RETRY);
            return;
        }
        self.hd_switch_retry_deadline = None;
        self.set_source(
            SourceKind::Hd,
            Some(self.media.current_time()),
            !self.media.paused(),
            false,
        );
    }

    fn on_hls_ready(&mut self) {
        self.hls_preparing = false;
        if self.session.quality_mode == QualityMode::Auto
            && self.config.capabilities.adaptive_supported
            && self.session.active_source != Some(SourceKind::Hls)
            && !self.session.switch_in_progress
        {
            self.set_source(
                SourceKind::Hls,
                Some(self.media.current_time()),
                !self.media.paused(),
                false,
            );
        }
    }

    fn next_deadline(&self) -> Instant {
        let mut deadline = self.status_tick_at;
        for candidate in [
            self.stall_deadline,
            self.hd_stable_deadline,
            self.hd_upgrade_deadline,
            self.hd_switch_retry_deadline,
            self.interaction_idle_deadline,
            self.poll_deadline,
        ]
        .into_iter()
        .flatten()
        {
            deadline = deadline.min(candidate);
        }
        deadline
    }

    fn handle_deadlines(&mut self) {
        let now = Instant::now();

        if self.status_tick_at <= now {
            self.status_tick_at = now + STATUS_TICK;
            self.refresh_status();
        }
        if self.poll_deadline.is_some_and(|at| at <= now) {
            self.fire_poll();
        }
        if self.stall_deadline.is_some_and(|at| at <= now) {
            self.stall_deadline = None;
            self.fire_stall_fallback();
        }
        if self.hd_stable_deadline.is_some_and(|at| at <= now) {
            self.hd_stable_deadline = None;
            self.fire_hd_stable();
        }
        if self.hd_upgrade_deadline.is_some_and(|at| at <= now) {
            self.hd_upgrade_deadline = None;
            self.maybe_upgrade_to_hd();
        }
        if self.hd_switch_retry_deadline.is_some_and(|at| at <= now) {
            self.hd_switch_retry_deadline = None;
            self.attempt_hd_switch();
        }
        if self.interaction_idle_deadline.is_some_and(|at| at <= now) {
            self.interaction_idle_deadline = None;
            self.fire_interaction_idle();
        }
        self.refresh_status();
    }

    fn fire_hd_stable(&mut self) {
        if self.session.active_source != Some(SourceKind::Hd)
            || self.media.paused()
            || self.media.seeking()
            || self.media.has_error()
        {
            return;
        }
        log::debug!("[{}] hd stable, clearing failure backoff", self.share);
        self.session.hd.note_stable();
    }

    fn status_input(&self, now: Instant) -> StatusInput {
        StatusInput {
            mode: self.session.quality_mode,
            active_source: self.session.active_source,
            has_error: self.media.has_error(),
            seeking: self.media.seeking(),
            paused: self.media.paused(),
            ready_state: self.media.ready_state(),
            current_time: self.media.current_time(),
            duration: self.media.duration(),
            buffered: self.media.buffered(),
            load_elapsed: self.source_load_started_at.map(|at| now - at),
            fast_ready: self.sources.fast.ready,
            hd_ready: self.sources.hd.ready,
            hls_ready: self.sources.hls.ready,
            fast_preparing: self.fast_preparing,
            hd_preparing: self.hd_preparing,
            hls_preparing: self.hls_preparing,
            auto_switch_enabled: self.config.capabilities.auto_switch_enabled,
            adaptive_supported: self.config.capabilities.adaptive_supported,
            hd_auto_disabled: self.session.hd.auto_disabled,
            hd_retry_secs: self.session.hd.retry_in_secs(now),
        }
    }

    fn refresh_status(&mut self) {
        let input = self.status_input(Instant::now());
        let (text, clock) = status::compose(&input);
        if text != self.last_status {
            self.last_status = text.clone();
            self.emit(PlayerEvent::Status { text, clock });
        }
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }
}
