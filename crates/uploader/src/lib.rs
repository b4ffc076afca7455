pub mod api;
pub mod chunked;
pub mod errors;
pub mod events;
pub mod hints;
pub mod parallel;
pub mod queue;
pub mod store;
pub mod validate;

pub use api::{ApiReply, HttpUploadApi, RequestMeta, UploadApi, UploadReply};
pub use chunked::{TransferJob, TransferUpdate, CHUNK_SIZE, CHUNK_THRESHOLD};
pub use errors::UploadError;
pub use events::UploadEvent;
pub use hints::{EffectiveType, NetworkHints, NetworkHintsProvider, NoNetworkHints};
pub use parallel::{ParallelConfig, ParallelUploader, UploadStats};
pub use queue::{CaptchaState, EntryStatus, FileCandidate, UploadEntry, UploadQueue};
pub use store::{MemoryStore, ParallelSessionRecord, SessionStore};
