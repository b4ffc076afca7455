use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::api::{RequestMeta, UploadApi, UploadReply};
use crate::chunked::{self, TransferJob, TransferUpdate, CHUNK_SIZE, CHUNK_THRESHOLD};
use crate::errors::UploadError;
use crate::events::UploadEvent;
use crate::validate;

const EVENT_CHANNEL_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Queued,
    Uploading,
    Done,
    Error,
}

/// One accepted file in the queue. Mutated only by the queue; a failed entry
/// is retried in place on the next upload pass.
#[derive(Debug, Clone)]
pub struct UploadEntry {
    pub id: Uuid,
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub rel_path: String,
    pub status: EntryStatus,
    pub progress: u8,
    pub upload_id: Option<String>,
}

/// A user-selected file before validation.
#[derive(Debug, Clone)]
pub struct FileCandidate {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub rel_path: String,
}

/// CAPTCHA gate state, merged from the initial metadata and from every
/// subsequent upload reply.
#[derive(Debug, Clone, Default)]
pub struct CaptchaState {
    pub required: bool,
    pub enabled: bool,
    pub site_key: Option<String>,
}

impl CaptchaState {
    fn absorb_meta(&mut self, meta: &RequestMeta) {
        self.required = meta.captcha_required;
        self.enabled = meta.captcha_enabled;
        if meta.captcha_site_key.is_some() {
            self.site_key = meta.captcha_site_key.clone();
        }
    }

    /// Merge reply fields. Returns true when anything changed.
    pub fn absorb(&mut self, reply: &UploadReply) -> bool {
        let mut changed = false;
        if let Some(required) = reply.captcha_required {
            changed |= self.required != required;
            self.required = required;
        }
        if let Some(enabled) = reply.captcha_enabled {
            changed |= self.enabled != enabled;
            self.enabled = enabled;
        }
        if let Some(site_key) = &reply.captcha_site_key {
            changed |= self.site_key.as_deref() != Some(site_key);
            self.site_key = Some(site_key.clone());
        }
        changed
    }
}

/// Upload queue for one request link: validates candidates, then uploads the
/// accepted files strictly sequentially, single-shot below the chunk
/// threshold and chunked at or above it.
pub struct UploadQueue {
    hash: String,
    api: Arc<dyn UploadApi>,
    events: broadcast::Sender<UploadEvent>,
    meta: Option<RequestMeta>,
    entries: Vec<UploadEntry>,
    password: Option<String>,
    captcha_token: Option<String>,
    captcha: CaptchaState,
}

impl UploadQueue {
    pub fn new(hash: String, api: Arc<dyn UploadApi>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            hash,
            api,
            events,
            meta: None,
            entries: Vec::new(),
            password: None,
            captcha_token: None,
            captcha: CaptchaState::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    pub fn set_password(&mut self, password: Option<String>) {
        self.password = password;
    }

    /// A freshly solved token; clears any mid-session verification hold.
    pub fn set_captcha_token(&mut self, token: Option<String>) {
        self.captcha_token = token;
    }

    pub fn entries(&self) -> &[UploadEntry] {
        &self.entries
    }

    pub fn captcha(&self) -> &CaptchaState {
        &self.captcha
    }

    /// Fetch the gate description for this request link. Must succeed before
    /// candidates can be validated meaningfully.
    pub async fn load_request(&mut self) -> Result<RequestMeta, UploadError> {
        let meta = self
            .api
            .fetch_meta(&self.hash, self.password.as_deref())
            .await?;
        self.captcha.absorb_meta(&meta);
        self.emit_captcha();
        self.meta = Some(meta.clone());
        Ok(meta)
    }

    /// Validate and enqueue one candidate. Invalid files are rejected
    /// individually with a reason; the rest of the selection is unaffected.
    pub fn add_file(&mut self, candidate: FileCandidate) -> bool {
        let meta = self.meta.clone().unwrap_or_default();
        match validate::validate_candidate(
            &candidate.name,
            candidate.size,
            &candidate.rel_path,
            &meta,
        ) {
            Ok(rel_path) => {
                let entry = UploadEntry {
                    id: Uuid::new_v4(),
                    path: candidate.path,
                    name: candidate.name,
                    size: candidate.size,
                    rel_path,
                    status: EntryStatus::Queued,
                    progress: 0,
                    upload_id: None,
                };
                self.emit(UploadEvent::EntryAdded {
                    id: entry.id,
                    name: entry.name.clone(),
                });
                self.entries.push(entry);
                true
            }
            Err(err) => {
                log::info!("[{}] rejected {}: {err}", self.hash, candidate.name);
                self.emit(UploadEvent::EntryRejected {
                    name: candidate.name,
                    reason: err.to_string(),
                });
                false
            }
        }
    }

    /// Replace the queue with a fresh selection.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Upload every entry that is not already done, strictly in order. A
    /// failed entry stops only its own chain; later entries still run.
    /// Returns the number of failures.
    pub async fn upload_all(&mut self) -> usize {
        let mut failures = 0usize;

        for i in 0..self.entries.len() {
            if self.entries[i].status == EntryStatus::Done {
                continue;
            }
            if self.captcha.required && self.captcha_token.is_none() {
                self.fail_entry(i, UploadError::VerificationRequired.to_string());
                failures += 1;
                continue;
            }

            self.entries[i].status = EntryStatus::Uploading;
            let entry = self.entries[i].clone();
            log::info!("[{}] uploading {} ({} bytes)", self.hash, entry.name, entry.size);

            let was_required = self.captcha.required;
            let result = {
                let job = TransferJob {
                    hash: &self.hash,
                    file: &entry.path,
                    rel_path: &entry.rel_path,
                    size: entry.size,
                    chunk_size: CHUNK_SIZE,
                    password: self.password.as_deref(),
                    captcha_token: self.captcha_token.as_deref(),
                };
                let events = self.events.clone();
                let captcha = &mut self.captcha;
                let id = entry.id;
                let mut observe = |update: TransferUpdate| match update {
                    TransferUpdate::Progress(percent) => {
                        let _ = events.send(UploadEvent::EntryProgress { id, percent });
                    }
                    TransferUpdate::Reply(reply) => {
                        if captcha.absorb(&reply) {
                            let _ = events.send(UploadEvent::CaptchaState {
                                required: captcha.required,
                                enabled: captcha.enabled,
                                site_key: captcha.site_key.clone(),
                            });
                        }
                    }
                };

                if entry.size < CHUNK_THRESHOLD {
                    chunked::upload_single_shot(self.api.as_ref(), &job, &entry.name, &mut observe)
                        .await
                        .map(|_| None)
                } else {
                    chunked::upload_chunked(self.api.as_ref(), &job, &mut observe).await
                }
            };

            // A requirement imposed mid-session invalidates the current
            // token; further entries wait for a freshly solved one.
            if !was_required && self.captcha.required {
                self.captcha_token = None;
            }

            match result {
                Ok(upload_id) => {
                    let entry = &mut self.entries[i];
                    entry.status = EntryStatus::Done;
                    entry.progress = 100;
                    entry.upload_id = upload_id;
                    let id = entry.id;
                    self.emit(UploadEvent::EntryDone { id });
                }
                Err(err) => {
                    log::warn!("[{}] upload of {} failed: {err}", self.hash, entry.name);
                    self.fail_entry(i, err.to_string());
                    failures += 1;
                }
            }
        }

        self.emit(UploadEvent::BatchFinished { failures });
        failures
    }

    fn fail_entry(&mut self, index: usize, reason: String) {
        let entry = &mut self.entries[index];
        entry.status = EntryStatus::Error;
        let id = entry.id;
        self.emit(UploadEvent::EntryFailed { id, reason });
    }

    fn emit_captcha(&self) {
        self.emit(UploadEvent::CaptchaState {
            required: self.captcha.required,
            enabled: self.captcha.enabled,
            site_key: self.captcha.site_key.clone(),
        });
    }

    fn emit(&self, event: UploadEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiReply, ChunkUpload, SingleUpload};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::sync::Mutex;

    struct QueueApi {
        meta: RequestMeta,
        replies: Mutex<VecDeque<ApiReply>>,
        single_calls: Mutex<Vec<String>>,
    }

    impl QueueApi {
        fn new(meta: RequestMeta, replies: Vec<ApiReply>) -> Arc<Self> {
            Arc::new(Self {
                meta,
                replies: Mutex::new(replies.into()),
                single_calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl UploadApi for QueueApi {
        async fn fetch_meta(
            &self,
            _hash: &str,
            _password: Option<&str>,
        ) -> Result<RequestMeta, UploadError> {
            Ok(self.meta.clone())
        }

        async fn upload_single(&self, req: SingleUpload) -> Result<ApiReply, UploadError> {
            self.single_calls.lock().unwrap().push(req.file_name);
            Ok(self.replies.lock().unwrap().pop_front().unwrap())
        }

        async fn upload_chunk(&self, _req: ChunkUpload) -> Result<ApiReply, UploadError> {
            Ok(self.replies.lock().unwrap().pop_front().unwrap())
        }
    }

    fn reply(status: u16, body: UploadReply) -> ApiReply {
        ApiReply { status, body }
    }

    fn done_reply() -> ApiReply {
        reply(
            200,
            UploadReply {
                complete: Some(true),
                ..Default::default()
            },
        )
    }

    fn candidate(file: &tempfile::NamedTempFile, name: &str, size: u64) -> FileCandidate {
        FileCandidate {
            path: file.path().to_path_buf(),
            name: name.to_string(),
            size,
            rel_path: name.to_string(),
        }
    }

    fn fixture(bytes: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![1u8; bytes]).unwrap();
        file
    }

    #[tokio::test]
    async fn test_invalid_candidates_never_enter_the_queue() {
        let meta = RequestMeta {
            allowed_extensions: vec!["jpg".into(), "png".into()],
            max_file_size: Some(1000),
            ..Default::default()
        };
        let api = QueueApi::new(meta, vec![]);
        let mut queue = UploadQueue::new("req1".into(), api);
        let mut events = queue.subscribe();
        queue.load_request().await.unwrap();

        let file = fixture(4);
        assert!(!queue.add_file(candidate(&file, "evil.exe", 4)));
        assert!(!queue.add_file(candidate(&file, "big.jpg", 2000)));
        let mut bad_path = candidate(&file, "ok.jpg", 4);
        bad_path.rel_path = "../ok.jpg".into();
        assert!(!queue.add_file(bad_path));
        assert!(queue.add_file(candidate(&file, "ok.jpg", 4)));
        assert_eq!(queue.entries().len(), 1);

        let mut reasons = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let UploadEvent::EntryRejected { reason, .. } = event {
                reasons.push(reason);
            }
        }
        assert_eq!(
            reasons,
            vec![
                "Unsupported file type.",
                "File exceeds the maximum allowed size.",
                "Invalid file path."
            ]
        );
    }

    #[tokio::test]
    async fn test_retry_pass_skips_done_entries() {
        let api = QueueApi::new(
            RequestMeta::default(),
            vec![
                done_reply(),
                reply(401, UploadReply::default()),
                done_reply(),
            ],
        );
        let mut queue = UploadQueue::new("req1".into(), api.clone());
        queue.load_request().await.unwrap();

        let a = fixture(4);
        let b = fixture(4);
        queue.add_file(candidate(&a, "a.bin", 4));
        queue.add_file(candidate(&b, "b.bin", 4));

        assert_eq!(queue.upload_all().await, 1);
        assert_eq!(queue.entries()[0].status, EntryStatus::Done);
        assert_eq!(queue.entries()[1].status, EntryStatus::Error);

        // Second pass retries only the failed entry.
        assert_eq!(queue.upload_all().await, 0);
        assert_eq!(queue.entries()[1].status, EntryStatus::Done);
        let calls = api.single_calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["a.bin", "b.bin", "b.bin"]);
    }

    #[tokio::test]
    async fn test_mid_session_captcha_regates_later_entries() {
        let api = QueueApi::new(
            RequestMeta::default(),
            vec![reply(
                200,
                UploadReply {
                    complete: Some(true),
                    captcha_required: Some(true),
                    captcha_enabled: Some(true),
                    ..Default::default()
                },
            )],
        );
        let mut queue = UploadQueue::new("req1".into(), api.clone());
        queue.load_request().await.unwrap();
        queue.set_captcha_token(Some("old-token".into()));

        let a = fixture(4);
        let b = fixture(4);
        queue.add_file(candidate(&a, "a.bin", 4));
        queue.add_file(candidate(&b, "b.bin", 4));

        // First entry succeeds but its reply imposes CAPTCHA; the second is
        // held back without any network call.
        assert_eq!(queue.upload_all().await, 1);
        assert_eq!(queue.entries()[0].status, EntryStatus::Done);
        assert_eq!(queue.entries()[1].status, EntryStatus::Error);
        assert_eq!(api.single_calls.lock().unwrap().len(), 1);
        assert!(queue.captcha().required);

        // A freshly solved token lets the retry pass proceed.
        queue.set_captcha_token(Some("fresh-token".into()));
        api.replies.lock().unwrap().push_back(done_reply());
        assert_eq!(queue.upload_all().await, 0);
        assert_eq!(queue.entries()[1].status, EntryStatus::Done);
    }
}
