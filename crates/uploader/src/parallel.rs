use std::collections::{BTreeSet, VecDeque};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinSet;

use crate::api::{ChunkUpload, UploadApi};
use crate::chunked::CHUNK_SIZE;
use crate::errors::{classify_status, UploadError};
use crate::hints::{EffectiveType, NetworkHints, NetworkHintsProvider};
use crate::store::{self, ParallelSessionRecord, SessionStore};

const MIN_CHUNK_FLOOR: u64 = 256 * 1024;

#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Base chunk size before adaptive scaling.
    pub chunk_size: u64,
    pub min_chunk_size: u64,
    /// Zero means derive the ceiling from the base size.
    pub max_chunk_size: u64,
    /// In-flight chunk cap; None derives it from the network hints.
    pub max_parallel: Option<usize>,
    /// Per-chunk retries before the whole upload fails.
    pub max_retries: u32,
    pub adaptive_chunking: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            min_chunk_size: MIN_CHUNK_FLOOR,
            max_chunk_size: 0,
            max_parallel: None,
            max_retries: 3,
            adaptive_chunking: true,
        }
    }
}

/// Scale the base chunk size by the reported connection quality, bounded so a
/// misreporting platform can never produce degenerate chunks.
pub fn compute_chunk_size(config: &ParallelConfig, hints: &NetworkHints) -> u64 {
    let mut size = config.chunk_size as f64;

    if let Some(downlink) = hints.downlink_mbps {
        if downlink >= 20.0 {
            size *= 2.0;
        } else if downlink >= 10.0 {
            size *= 1.5;
        } else if downlink >= 5.0 {
            size *= 1.25;
        } else if downlink > 0.0 && downlink < 1.0 {
            size *= 0.6;
        } else if downlink == 0.0 {
            size *= 0.9;
        }
    }
    match hints.effective_type {
        EffectiveType::Slow2g | EffectiveType::TwoG => size *= 0.6,
        EffectiveType::ThreeG => size *= 0.85,
        _ => {}
    }

    let min = config
        .min_chunk_size
        .max(config.chunk_size / 2)
        .max(MIN_CHUNK_FLOOR);
    let max = if config.max_chunk_size > min {
        config.max_chunk_size
    } else {
        (config.chunk_size * 3).max(min)
    };
    (size as u64).clamp(min, max)
}

/// Concurrency budget per connection class.
pub fn optimal_parallel_chunks(hints: &NetworkHints) -> usize {
    match hints.effective_type {
        EffectiveType::FourG => 6,
        EffectiveType::ThreeG => 3,
        EffectiveType::TwoG | EffectiveType::Slow2g => 1,
        EffectiveType::Unknown => 4,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UploadStats {
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub failed_chunks: usize,
    pub active: usize,
    pub bytes_done: u64,
    pub total_bytes: u64,
    /// Average bytes per second since the upload started.
    pub speed_bps: f64,
    pub eta_secs: Option<f64>,
}

#[derive(Default)]
struct StatsInner {
    total_chunks: usize,
    completed_chunks: usize,
    failed_chunks: usize,
    active: usize,
    bytes_done: u64,
    resumed_bytes: u64,
    total_bytes: u64,
    started_at: Option<tokio::time::Instant>,
}

/// Parallel chunk uploader: a bounded worker pool over fixed byte ranges,
/// out-of-order completion, per-chunk retry, and a resumable session saved
/// after every completed chunk.
pub struct ParallelUploader {
    api: Arc<dyn UploadApi>,
    store: Arc<dyn SessionStore>,
    hints: Arc<dyn NetworkHintsProvider>,
    config: ParallelConfig,
    hash: String,
    password: Option<String>,
    captcha_token: Option<String>,
    aborted: Arc<AtomicBool>,
    stats: Arc<Mutex<StatsInner>>,
}

struct ChunkTask {
    api: Arc<dyn UploadApi>,
    hash: String,
    file: PathBuf,
    rel_path: String,
    total: u64,
    chunk_size: u64,
    index: usize,
    upload_id: Arc<Mutex<Option<String>>>,
    password: Option<String>,
    captcha_token: Option<String>,
    max_retries: u32,
}

impl ParallelUploader {
    pub fn new(
        config: ParallelConfig,
        api: Arc<dyn UploadApi>,
        store: Arc<dyn SessionStore>,
        hints: Arc<dyn NetworkHintsProvider>,
        hash: String,
    ) -> Self {
        Self {
            api,
            store,
            hints,
            config,
            hash,
            password: None,
            captcha_token: None,
            aborted: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(Mutex::new(StatsInner::default())),
        }
    }

    pub fn set_password(&mut self, password: Option<String>) {
        self.password = password;
    }

    pub fn set_captcha_token(&mut self, token: Option<String>) {
        self.captcha_token = token;
    }

    /// Stop scheduling new chunks. In-flight chunks drain; the upload then
    /// fails with [`UploadError::Aborted`] and keeps its session for resume.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> UploadStats {
        let inner = match self.stats.lock() {
            Ok(inner) => inner,
            Err(_) => return UploadStats::default(),
        };
        let elapsed = inner
            .started_at
            .map(|at| at.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let fresh_bytes = inner.bytes_done.saturating_sub(inner.resumed_bytes);
        let speed_bps = if elapsed > 0.0 {
            fresh_bytes as f64 / elapsed
        } else {
            0.0
        };
        let remaining = inner.total_bytes.saturating_sub(inner.bytes_done);
        let eta_secs = (speed_bps > 0.0).then(|| remaining as f64 / speed_bps);
        UploadStats {
            total_chunks: inner.total_chunks,
            completed_chunks: inner.completed_chunks,
            failed_chunks: inner.failed_chunks,
            active: inner.active,
            bytes_done: inner.bytes_done,
            total_bytes: inner.total_bytes,
            speed_bps,
            eta_secs,
        }
    }

    /// Upload one file. `on_progress` receives (bytes done, total bytes),
    /// including the bytes restored from a resumed session.
    pub async fn upload(
        &self,
        file: &Path,
        name: &str,
        size: u64,
        rel_path: &str,
        mut on_progress: impl FnMut(u64, u64),
    ) -> Result<(), UploadError> {
        self.aborted.store(false, Ordering::SeqCst);

        let chunk_size = if self.config.adaptive_chunking {
            compute_chunk_size(&self.config, &self.hints.hints())
        } else {
            self.config.chunk_size
        };
        let chunk_count = size.div_ceil(chunk_size).max(1) as usize;

        let key = store::session_key(name, size);
        let upload_id = Arc::new(Mutex::new(None::<String>));
        let mut completed: BTreeSet<usize> = BTreeSet::new();
        if let Some(session) = store::load_session(self.store.as_ref(), &key, chunk_size) {
            log::info!(
                "[{}] resuming {name}: {} of {chunk_count} chunks done",
                self.hash,
                session.completed_chunks.len()
            );
            if let Ok(mut id) = upload_id.lock() {
                *id = Some(session.upload_id);
            }
            completed = session
                .completed_chunks
                .into_iter()
                .filter(|i| *i < chunk_count)
                .collect();
        }

        let parallel = self
            .config
            .max_parallel
            .unwrap_or_else(|| optimal_parallel_chunks(&self.hints.hints()))
            .max(1);

        let chunk_len = |index: usize| -> u64 {
            let start = index as u64 * chunk_size;
            chunk_size.min(size - start.min(size))
        };
        let resumed_bytes: u64 = completed.iter().map(|i| chunk_len(*i)).sum();
        if let Ok(mut stats) = self.stats.lock() {
            *stats = StatsInner {
                total_chunks: chunk_count,
                completed_chunks: completed.len(),
                bytes_done: resumed_bytes,
                resumed_bytes,
                total_bytes: size,
                started_at: Some(tokio::time::Instant::now()),
                ..Default::default()
            };
        }
        on_progress(resumed_bytes, size);

        let mut pending: VecDeque<usize> =
            (0..chunk_count).filter(|i| !completed.contains(i)).collect();
        let mut join_set: JoinSet<(usize, Result<u64, UploadError>)> = JoinSet::new();
        let mut bytes_done = resumed_bytes;

        loop {
            while join_set.len() < parallel
                && !pending.is_empty()
                && !self.aborted.load(Ordering::SeqCst)
            {
                let index = pending.pop_front().unwrap_or_default();
                let task = ChunkTask {
                    api: Arc::clone(&self.api),
                    hash: self.hash.clone(),
                    file: file.to_path_buf(),
                    rel_path: rel_path.to_string(),
                    total: size,
                    chunk_size,
                    index,
                    upload_id: Arc::clone(&upload_id),
                    password: self.password.clone(),
                    captcha_token: self.captcha_token.clone(),
                    max_retries: self.config.max_retries,
                };
                join_set.spawn(run_chunk(task));
                if let Ok(mut stats) = self.stats.lock() {
                    stats.active += 1;
                }
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            if let Ok(mut stats) = self.stats.lock() {
                stats.active = stats.active.saturating_sub(1);
            }
            let (index, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("[{}] chunk task panicked: {e}", self.hash);
                    return Err(UploadError::Network);
                }
            };

            match result {
                Ok(bytes) => {
                    completed.insert(index);
                    bytes_done += bytes;
                    if let Ok(mut stats) = self.stats.lock() {
                        stats.completed_chunks = completed.len();
                        stats.bytes_done = bytes_done;
                    }
                    let id = upload_id
                        .lock()
                        .ok()
                        .and_then(|id| id.clone())
                        .unwrap_or_default();
                    store::save_session(
                        self.store.as_ref(),
                        &key,
                        &ParallelSessionRecord {
                            upload_id: id,
                            completed_chunks: completed.iter().copied().collect(),
                            chunk_size,
                            timestamp: chrono::Utc::now().timestamp_millis(),
                        },
                    );
                    on_progress(bytes_done, size);
                }
                Err(e) => {
                    log::warn!("[{}] chunk {index} of {name} failed: {e}", self.hash);
                    if let Ok(mut stats) = self.stats.lock() {
                        stats.failed_chunks += 1;
                    }
                    return Err(e);
                }
            }
        }

        if completed.len() < chunk_count {
            return Err(UploadError::Aborted);
        }
        self.store.remove(&key);
        Ok(())
    }
}

async fn run_chunk(task: ChunkTask) -> (usize, Result<u64, UploadError>) {
    let mut attempt = 0u32;
    loop {
        match send_chunk(&task).await {
            Ok(bytes) => return (task.index, Ok(bytes)),
            Err(e) if attempt < task.max_retries => {
                log::debug!(
                    "[{}] chunk {} attempt {} failed: {e}",
                    task.hash,
                    task.index,
                    attempt + 1
                );
                tokio::time::sleep(Duration::from_secs(1u64 << attempt.min(16))).await;
                attempt += 1;
            }
            Err(e) => return (task.index, Err(e)),
        }
    }
}

async fn send_chunk(task: &ChunkTask) -> Result<u64, UploadError> {
    let offset = task.index as u64 * task.chunk_size;
    let end = (offset + task.chunk_size).min(task.total);

    let mut file = tokio::fs::File::open(&task.file).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut body = vec![0u8; (end - offset) as usize];
    file.read_exact(&mut body).await?;
    let bytes = body.len() as u64;

    let current_id = task.upload_id.lock().ok().and_then(|id| id.clone());
    let reply = task
        .api
        .upload_chunk(ChunkUpload {
            hash: task.hash.clone(),
            rel_path: task.rel_path.clone(),
            offset,
            total: task.total,
            upload_id: current_id,
            password: task.password.clone(),
            captcha_token: task.captcha_token.clone(),
            body,
        })
        .await?;

    if !(200..300).contains(&reply.status) {
        return Err(classify_status(reply.status, reply.body.error.as_deref()));
    }
    if let Some(id) = reply.body.upload_id.filter(|id| !id.is_empty()) {
        if let Ok(mut shared) = task.upload_id.lock() {
            shared.get_or_insert(id);
        }
    }
    Ok(bytes)
}
