use std::collections::HashMap;
use std::sync::Mutex;

const SESSION_TTL_HOURS: i64 = 24;

/// Resumable parallel-upload bookkeeping, one record per (name, size) pair.
/// `chunk_size` is stored so a resume with a different chunk grid is detected
/// and discarded instead of silently corrupting offsets.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug)]
pub struct ParallelSessionRecord {
    pub upload_id: String,
    pub completed_chunks: Vec<usize>,
    pub chunk_size: u64,
    /// Wall-clock millis at last save.
    pub timestamp: i64,
}

/// Key-value persistence seam standing in for browser local storage. May be
/// unavailable or full; implementations swallow their own failures and the
/// callers treat every read as best-effort.
pub trait SessionStore: Send + Sync {
    fn load(&self, key: &str) -> Option<String>;
    fn save(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

#[derive(Default)]
pub struct MemoryStore(Mutex<HashMap<String, String>>);

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn load(&self, key: &str) -> Option<String> {
        self.0.lock().ok()?.get(key).cloned()
    }

    fn save(&self, key: &str, value: &str) {
        if let Ok(mut map) = self.0.lock() {
            map.insert(key.to_string(), value.to_string());
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut map) = self.0.lock() {
            map.remove(key);
        }
    }
}

pub fn session_key(name: &str, size: u64) -> String {
    format!("droppr_upload_parallel_{name}_{size}")
}

/// Load an unexpired, grid-compatible session. Anything stale, unparsable or
/// sized for a different chunk grid is removed and ignored.
pub fn load_session(
    store: &dyn SessionStore,
    key: &str,
    expected_chunk_size: u64,
) -> Option<ParallelSessionRecord> {
    let raw = store.load(key)?;
    let record: ParallelSessionRecord = match serde_json::from_str(&raw) {
        Ok(record) => record,
        Err(e) => {
            log::debug!("[{key}] dropping unparsable session: {e}");
            store.remove(key);
            return None;
        }
    };
    let age_ms = chrono::Utc::now().timestamp_millis() - record.timestamp;
    if age_ms > SESSION_TTL_HOURS * 3600 * 1000 {
        log::info!("[{key}] session expired, starting fresh");
        store.remove(key);
        return None;
    }
    if record.chunk_size != expected_chunk_size {
        log::info!(
            "[{key}] session chunk size {} != {}, starting fresh",
            record.chunk_size,
            expected_chunk_size
        );
        store.remove(key);
        return None;
    }
    Some(record)
}

pub fn save_session(store: &dyn SessionStore, key: &str, record: &ParallelSessionRecord) {
    match serde_json::to_string(record) {
        Ok(raw) => store.save(key, &raw),
        Err(e) => log::warn!("[{key}] failed to serialize session: {e}"),
    }
}
