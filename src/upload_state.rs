//! Upload-state manager: server-side visibility into in-flight uploads.
//!
//! Each state is an opaque id owning an ordered list of [`TrackedFile`]
//! records. Clients poll and snapshot-update these so a page reload can
//! observe a pipeline that kept running. States live in memory only; they
//! describe progress, not documents, and expire after a configurable idle
//! period.
//!
//! Reconciliation rule: a file still `pending` with no server-side payload
//! reference can never resume — its bytes existed only in the client. On
//! every `get` such files are rewritten to `error` before being returned.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_ERROR: &str = "error";

pub const PAYLOAD_INVALIDATED: &str =
    "upload payload invalidated (client reload lost the file); please upload again";

/// One named pipeline step with its own status and progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedStep {
    pub name: String,
    pub status: String,
    pub progress: u8,
}

/// One file tracked within an upload state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedFile {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub status: String,
    pub progress: u8,
    pub current_step: usize,
    pub steps: Vec<TrackedStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Names the server-persisted copy of the upload. Absent for files that
    /// only ever existed client-side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_ref: Option<String>,
}

struct UploadState {
    files: Vec<TrackedFile>,
    last_accessed: Instant,
}

/// In-memory registry of upload states, keyed by opaque state id.
pub struct UploadStateManager {
    idle_ttl: Duration,
    states: Mutex<HashMap<String, UploadState>>,
}

impl UploadStateManager {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            idle_ttl,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Create a new empty state and return its id.
    pub async fn create(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(Uuid::new_v4().as_bytes());
        hasher.update(chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
        let state_id = format!("{:x}", hasher.finalize());

        let mut states = self.states.lock().await;
        Self::sweep(&mut states, self.idle_ttl);
        states.insert(
            state_id.clone(),
            UploadState {
                files: Vec::new(),
                last_accessed: Instant::now(),
            },
        );
        state_id
    }

    /// Fetch the file list, applying the payload reconciliation rule.
    /// Returns `None` for unknown or expired ids.
    pub async fn get(&self, state_id: &str) -> Option<Vec<TrackedFile>> {
        let mut states = self.states.lock().await;
        Self::sweep(&mut states, self.idle_ttl);

        let state = states.get_mut(state_id)?;
        state.last_accessed = Instant::now();

        for file in &mut state.files {
            if file.status == STATUS_PENDING && file.payload_ref.is_none() {
                file.status = STATUS_ERROR.to_string();
                file.error = Some(PAYLOAD_INVALIDATED.to_string());
            }
        }

        Some(state.files.clone())
    }

    /// Replace the file list wholesale (last-write-wins, no merge).
    /// Returns `false` for unknown or expired ids.
    pub async fn update(&self, state_id: &str, files: Vec<TrackedFile>) -> bool {
        let mut states = self.states.lock().await;
        Self::sweep(&mut states, self.idle_ttl);

        match states.get_mut(state_id) {
            Some(state) => {
                state.files = files;
                state.last_accessed = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Remove the state. Idempotent: deleting an absent id succeeds.
    pub async fn delete(&self, state_id: &str) {
        let mut states = self.states.lock().await;
        states.remove(state_id);
    }

    fn sweep(states: &mut HashMap<String, UploadState>, idle_ttl: Duration) {
        states.retain(|_, s| s.last_accessed.elapsed() <= idle_ttl);
    }
}

/// Build the initial step list for a freshly accepted upload.
pub fn initial_steps(stage_names: &[&str]) -> Vec<TrackedStep> {
    stage_names
        .iter()
        .map(|name| TrackedStep {
            name: name.to_string(),
            status: STATUS_PENDING.to_string(),
            progress: 0,
        })
        .collect()
}
