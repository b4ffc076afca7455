use uuid::Uuid;

/// Observational upload events broadcast to the host UI. Dropping the
/// receiver loses nothing but display updates.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    EntryAdded { id: Uuid, name: String },
    /// A candidate failed validation and never entered the queue.
    EntryRejected { name: String, reason: String },
    EntryProgress { id: Uuid, percent: u8 },
    EntryDone { id: Uuid },
    EntryFailed { id: Uuid, reason: String },
    /// CAPTCHA gate state, updated from every server reply. Requirements can
    /// be imposed mid-session.
    CaptchaState {
        required: bool,
        enabled: bool,
        site_key: Option<String>,
    },
    BatchFinished { failures: usize },
}
