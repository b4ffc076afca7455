use thiserror::Error;

/// Upload failure taxonomy. Validation variants carry the exact strings shown
/// next to a rejected file; protocol variants come out of `classify_status`.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Password required or incorrect")]
    Auth,
    #[error("Verification required")]
    VerificationRequired,
    #[error("This request link has expired")]
    LinkExpired,
    #[error("Too many uploads, please slow down")]
    RateLimited,
    #[error("{reason}")]
    Rejected { reason: String },
    #[error("Upload failed ({status})")]
    Http { status: u16 },
    #[error("Network error during upload")]
    Network,
    #[error("Upload offset conflict persisted after {retries} resyncs")]
    OffsetConflict { retries: u32 },
    #[error("Server never confirmed upload completion")]
    MissingCompletion,
    #[error("Invalid file path.")]
    InvalidPath,
    #[error("Unsupported file type.")]
    UnsupportedType,
    #[error("File exceeds the maximum allowed size.")]
    TooLarge,
    #[error("Upload aborted")]
    Aborted,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        log::debug!("transport error: {e}");
        UploadError::Network
    }
}

/// Map a terminal (non-retried) HTTP status to a user-facing error. The
/// server's own `error` string wins for rejected-content statuses when
/// present.
pub fn classify_status(status: u16, server_error: Option<&str>) -> UploadError {
    match status {
        401 => UploadError::Auth,
        403 => UploadError::VerificationRequired,
        410 => UploadError::LinkExpired,
        429 => UploadError::RateLimited,
        400 | 413 | 415 => UploadError::Rejected {
            reason: server_error
                .filter(|m| !m.is_empty())
                .unwrap_or("Upload rejected")
                .to_string(),
        },
        other => UploadError::Http { status: other },
    }
}

/// Statuses worth an automatic retry: transient gateway failures only.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 502 | 503 | 504)
}
