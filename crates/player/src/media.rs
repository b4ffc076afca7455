/// How a source URL is handed to the media stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachMode {
    /// Progressive URL set directly on the element.
    Direct,
    /// Adaptive manifest, loaded through the platform's HLS engine.
    Adaptive,
}

/// The media element the controller drives. Mutations are fire-and-forget
/// (the browser cancels in-flight media fetches when the source is removed,
/// so detach doubles as cancellation); completions and failures come back as
/// [`crate::MediaEvent`]s fed by the host.
pub trait MediaElement: Send + Sync {
    fn attach(&self, url: &str, mode: AttachMode);
    fn detach(&self);
    fn play(&self);
    fn pause(&self);
    fn set_current_time(&self, seconds: f64);

    fn current_time(&self) -> f64;
    fn duration(&self) -> Option<f64>;
    fn paused(&self) -> bool;
    fn seeking(&self) -> bool;
    fn has_error(&self) -> bool;
    /// Standard media readiness levels, HAVE_NOTHING(0) .. HAVE_ENOUGH_DATA(4).
    fn ready_state(&self) -> u8;
    /// Buffered time ranges as (start, end) pairs in seconds.
    fn buffered(&self) -> Vec<(f64, f64)>;
}
