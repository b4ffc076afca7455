use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::api::{ApiReply, ChunkUpload, SingleUpload, UploadApi, UploadReply};
use crate::errors::{classify_status, is_transient_status, UploadError};

pub const CHUNK_SIZE: u64 = 8 * 1024 * 1024;
/// Files at or above this size go through the chunked path.
pub const CHUNK_THRESHOLD: u64 = 32 * 1024 * 1024;

/// Consecutive 409 offset resyncs tolerated per file before a hard error.
const OFFSET_MISMATCH_RETRIES: u32 = 2;

const TRANSIENT_RETRIES: u32 = 4;
const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_CAP: Duration = Duration::from_secs(30);

/// One file to transfer. `chunk_size` is a parameter so the protocol can be
/// driven on small fixtures; production callers pass [`CHUNK_SIZE`].
#[derive(Clone, Copy, Debug)]
pub struct TransferJob<'a> {
    pub hash: &'a str,
    pub file: &'a Path,
    pub rel_path: &'a str,
    pub size: u64,
    pub chunk_size: u64,
    pub password: Option<&'a str>,
    pub captcha_token: Option<&'a str>,
}

/// Mid-transfer observations: coarse percent progress and every server reply
/// body (the latter feeds CAPTCHA re-gating).
#[derive(Debug, Clone)]
pub enum TransferUpdate {
    Progress(u8),
    Reply(UploadReply),
}

/// Full-jitter exponential backoff for transient failures.
fn backoff_delay(attempt: u32) -> Duration {
    let cap = RETRY_BASE
        .saturating_mul(1u32 << attempt.min(16))
        .min(RETRY_CAP);
    let ms = rand::thread_rng().gen_range(0..=cap.as_millis() as u64);
    Duration::from_millis(ms)
}

/// Run one request, retrying network errors and transient gateway statuses
/// with jittered backoff. Protocol-level statuses pass straight through.
async fn send_with_retry<F, Fut>(mut op: F) -> Result<ApiReply, UploadError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<ApiReply, UploadError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(reply) if is_transient_status(reply.status) && attempt < TRANSIENT_RETRIES => {
                log::warn!("transient status {}, retrying", reply.status);
            }
            Ok(reply) => return Ok(reply),
            Err(UploadError::Network) if attempt < TRANSIENT_RETRIES => {
                log::warn!("network error, retrying");
            }
            Err(e) => return Err(e),
        }
        tokio::time::sleep(backoff_delay(attempt)).await;
        attempt += 1;
    }
}

async fn read_range(file: &mut tokio::fs::File, offset: u64, end: u64) -> std::io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; (end - offset) as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Single-shot multipart upload for files under the chunk threshold.
pub async fn upload_single_shot(
    api: &dyn UploadApi,
    job: &TransferJob<'_>,
    file_name: &str,
    observe: &mut dyn FnMut(TransferUpdate),
) -> Result<(), UploadError> {
    let reply = send_with_retry(|| {
        api.upload_single(SingleUpload {
            hash: job.hash.to_string(),
            file: job.file.to_path_buf(),
            file_name: file_name.to_string(),
            rel_path: (job.rel_path != file_name).then(|| job.rel_path.to_string()),
            password: job.password.map(str::to_string),
            captcha_token: job.captcha_token.map(str::to_string),
        })
    })
    .await?;

    observe(TransferUpdate::Reply(reply.body.clone()));
    if !(200..300).contains(&reply.status) {
        return Err(classify_status(reply.status, reply.body.error.as_deref()));
    }
    observe(TransferUpdate::Progress(100));
    Ok(())
}

/// Sequential chunked upload against a server-authoritative offset.
///
/// The client never trusts its own optimistic advance over the server's: the
/// next offset is `max(local end, server offset)`. Completion is signalled
/// only by `complete: true`; a local offset reaching the file size without it
/// is a protocol error. A 409 with a server offset resyncs and retries, at
/// most [`OFFSET_MISMATCH_RETRIES`] consecutive times.
///
/// Returns the server-assigned upload id.
pub async fn upload_chunked(
    api: &dyn UploadApi,
    job: &TransferJob<'_>,
    observe: &mut dyn FnMut(TransferUpdate),
) -> Result<Option<String>, UploadError> {
    let mut file = tokio::fs::File::open(job.file).await?;
    let mut offset: u64 = 0;
    let mut upload_id: Option<String> = None;
    let mut mismatch_retries = 0u32;

    loop {
        let end = (offset + job.chunk_size).min(job.size);
        let body = read_range(&mut file, offset, end).await?;

        let reply = send_with_retry(|| {
            api.upload_chunk(ChunkUpload {
                hash: job.hash.to_string(),
                rel_path: job.rel_path.to_string(),
                offset,
                total: job.size,
                upload_id: upload_id.clone(),
                password: job.password.map(str::to_string),
                captcha_token: job.captcha_token.map(str::to_string),
                body: body.clone(),
            })
        })
        .await?;

        observe(TransferUpdate::Reply(reply.body.clone()));

        if (200..300).contains(&reply.status) {
            if let Some(id) = reply.body.upload_id.filter(|id| !id.is_empty()) {
                upload_id = Some(id);
            }
            if reply.body.complete == Some(true) {
                observe(TransferUpdate::Progress(100));
                return Ok(upload_id);
            }
            let next = end.max(reply.body.offset.unwrap_or(end));
            if next >= job.size {
                return Err(UploadError::MissingCompletion);
            }
            let percent = ((next * 100) / job.size).clamp(1, 99) as u8;
            observe(TransferUpdate::Progress(percent));
            offset = next;
            mismatch_retries = 0;
            continue;
        }

        if reply.status == 409 {
            if let Some(server_offset) = reply.body.offset {
                mismatch_retries += 1;
                if mismatch_retries > OFFSET_MISMATCH_RETRIES {
                    return Err(UploadError::OffsetConflict {
                        retries: OFFSET_MISMATCH_RETRIES,
                    });
                }
                log::info!(
                    "[{}] offset conflict, resyncing {} -> {}",
                    job.hash,
                    offset,
                    server_offset
                );
                offset = server_offset.min(job.size);
                continue;
            }
        }

        return Err(classify_status(reply.status, reply.body.error.as_deref()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::sync::Mutex;

    struct ScriptedApi {
        replies: Mutex<VecDeque<Result<ApiReply, UploadError>>>,
        chunks: Mutex<Vec<(u64, Option<String>, usize)>>,
    }

    impl ScriptedApi {
        fn new(replies: Vec<Result<ApiReply, UploadError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                chunks: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<(u64, Option<String>, usize)> {
            self.chunks.lock().unwrap().clone()
        }
    }

    fn ok(body: UploadReply) -> Result<ApiReply, UploadError> {
        Ok(ApiReply { status: 200, body })
    }

    fn status(status: u16, body: UploadReply) -> Result<ApiReply, UploadError> {
        Ok(ApiReply { status, body })
    }

    #[async_trait]
    impl UploadApi for ScriptedApi {
        async fn fetch_meta(
            &self,
            _hash: &str,
            _password: Option<&str>,
        ) -> Result<crate::api::RequestMeta, UploadError> {
            Ok(crate::api::RequestMeta::default())
        }

        async fn upload_single(&self, _req: SingleUpload) -> Result<ApiReply, UploadError> {
            self.replies.lock().unwrap().pop_front().unwrap()
        }

        async fn upload_chunk(&self, req: ChunkUpload) -> Result<ApiReply, UploadError> {
            self.chunks
                .lock()
                .unwrap()
                .push((req.offset, req.upload_id.clone(), req.body.len()));
            self.replies.lock().unwrap().pop_front().unwrap()
        }
    }

    fn fixture(bytes: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![7u8; bytes]).unwrap();
        file
    }

    fn job<'a>(file: &'a tempfile::NamedTempFile, size: u64, chunk: u64) -> TransferJob<'a> {
        TransferJob {
            hash: "req1",
            file: file.path(),
            rel_path: "clip.bin",
            size,
            chunk_size: chunk,
            password: None,
            captcha_token: None,
        }
    }

    #[tokio::test]
    async fn test_offsets_monotone_and_id_carried() {
        let file = fixture(10);
        let api = ScriptedApi::new(vec![
            // Server lags behind the optimistic advance; client keeps max().
            ok(UploadReply {
                upload_id: Some("u1".into()),
                offset: Some(2),
                ..Default::default()
            }),
            ok(UploadReply {
                offset: Some(8),
                ..Default::default()
            }),
            ok(UploadReply {
                complete: Some(true),
                ..Default::default()
            }),
        ]);

        let mut updates = Vec::new();
        let id = upload_chunked(&api, &job(&file, 10, 4), &mut |u| updates.push(u))
            .await
            .unwrap();
        assert_eq!(id.as_deref(), Some("u1"));

        let sent = api.sent();
        assert_eq!(sent[0].0, 0);
        assert_eq!(sent[1].0, 4, "max(local end, server offset)");
        assert_eq!(sent[2].0, 8);
        assert_eq!(sent[0].1, None, "no id before the first ack");
        assert_eq!(sent[1].1.as_deref(), Some("u1"));
        assert_eq!(sent[2].1.as_deref(), Some("u1"));

        let last_progress = updates
            .iter()
            .filter_map(|u| match u {
                TransferUpdate::Progress(p) => Some(*p),
                _ => None,
            })
            .next_back();
        assert_eq!(last_progress, Some(100));
    }

    #[tokio::test]
    async fn test_server_offset_ahead_skips_bytes() {
        let file = fixture(10);
        let api = ScriptedApi::new(vec![
            ok(UploadReply {
                offset: Some(8),
                ..Default::default()
            }),
            ok(UploadReply {
                complete: Some(true),
                ..Default::default()
            }),
        ]);

        upload_chunked(&api, &job(&file, 10, 4), &mut |_| {})
            .await
            .unwrap();
        let sent = api.sent();
        assert_eq!(sent[1].0, 8);
        assert_eq!(sent[1].2, 2, "short final chunk");
    }

    #[tokio::test]
    async fn test_offset_at_size_without_complete_is_an_error() {
        let file = fixture(4);
        let api = ScriptedApi::new(vec![ok(UploadReply {
            offset: Some(4),
            ..Default::default()
        })]);

        let err = upload_chunked(&api, &job(&file, 4, 4), &mut |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::MissingCompletion));
    }

    #[tokio::test]
    async fn test_409_resync_recovers() {
        let file = fixture(8);
        let api = ScriptedApi::new(vec![
            status(
                409,
                UploadReply {
                    offset: Some(4),
                    ..Default::default()
                },
            ),
            ok(UploadReply {
                complete: Some(true),
                ..Default::default()
            }),
        ]);

        upload_chunked(&api, &job(&file, 8, 4), &mut |_| {})
            .await
            .unwrap();
        let sent = api.sent();
        assert_eq!(sent[0].0, 0);
        assert_eq!(sent[1].0, 4, "resynced to the server offset");
    }

    #[tokio::test]
    async fn test_repeated_409_terminates() {
        let file = fixture(8);
        let conflict = || {
            status(
                409,
                UploadReply {
                    offset: Some(0),
                    ..Default::default()
                },
            )
        };
        let api = ScriptedApi::new(vec![conflict(), conflict(), conflict()]);

        let err = upload_chunked(&api, &job(&file, 8, 4), &mut |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::OffsetConflict { retries: 2 }));
        assert_eq!(api.sent().len(), 3, "two resyncs then a hard error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retry_then_succeed() {
        let file = fixture(4);
        let api = ScriptedApi::new(vec![
            status(503, UploadReply::default()),
            Err(UploadError::Network),
            ok(UploadReply {
                complete: Some(true),
                ..Default::default()
            }),
        ]);

        upload_chunked(&api, &job(&file, 4, 4), &mut |_| {})
            .await
            .unwrap();
        assert_eq!(api.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_terminal_status_classified() {
        let file = fixture(4);
        let api = ScriptedApi::new(vec![status(401, UploadReply::default())]);
        let err = upload_chunked(&api, &job(&file, 4, 4), &mut |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Auth));
    }

    #[tokio::test]
    async fn test_single_shot_surfaces_rejection() {
        let file = fixture(4);
        let api = ScriptedApi::new(vec![status(
            415,
            UploadReply {
                error: Some("Type not allowed".into()),
                ..Default::default()
            },
        )]);
        let err = upload_single_shot(&api, &job(&file, 4, 4), "clip.bin", &mut |_| {})
            .await
            .unwrap_err();
        match err {
            UploadError::Rejected { reason } => assert_eq!(reason, "Type not allowed"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
