use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::config::UploadOptions;
use crate::coordinator::controller::{UploadController, UploadHandle};
use crate::coordinator::error::{CoordinatorError, CoordinatorResult};
use crate::coordinator::types::ProgressSnapshot;
use crate::hash::HashService;
use crate::provider::{ControlPlaneClient, ProviderClient, DEFAULT_REQUEST_TIMEOUT};
use crate::source::ByteSource;

/// Registry of independent upload sessions, routed by session id.
///
/// Each session gets its own provider adapter and controller task; the
/// engine only holds handles. Everything is injected at construction, so
/// two engines in one process never share state. Must be created inside a
/// tokio runtime (it spawns the hashing service).
pub struct UploadEngine {
    control: ControlPlaneClient,
    request_timeout: Duration,
    hasher: HashService,
    sessions: DashMap<String, UploadHandle>,
}

impl UploadEngine {
    pub fn new(control: ControlPlaneClient) -> Self {
        Self::with_request_timeout(control, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_request_timeout(control: ControlPlaneClient, request_timeout: Duration) -> Self {
        Self {
            control,
            request_timeout,
            hasher: HashService::spawn(),
            sessions: DashMap::new(),
        }
    }

    /// Start uploading `source` and return the new session's id.
    pub fn start(
        &self,
        source: Arc<dyn ByteSource>,
        filename: impl Into<String>,
        options: UploadOptions,
    ) -> CoordinatorResult<String> {
        let adapter = Arc::new(ProviderClient::new(
            options.provider,
            self.control.clone(),
            self.request_timeout,
        ));
        let handle = UploadController::spawn(
            source,
            adapter,
            self.hasher.clone(),
            filename.into(),
            options,
        )?;

        let session_id = handle.session_id().to_string();
        self.sessions.insert(session_id.clone(), handle);
        Ok(session_id)
    }

    pub fn list(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn progress(&self, session_id: &str) -> CoordinatorResult<ProgressSnapshot> {
        Ok(self.handle(session_id)?.progress())
    }

    pub fn subscribe(&self, session_id: &str) -> CoordinatorResult<watch::Receiver<ProgressSnapshot>> {
        Ok(self.handle(session_id)?.subscribe())
    }

    pub async fn pause(&self, session_id: &str) -> CoordinatorResult<()> {
        self.handle(session_id)?.pause().await
    }

    pub async fn resume(&self, session_id: &str) -> CoordinatorResult<()> {
        self.handle(session_id)?.resume().await
    }

    pub async fn cancel(&self, session_id: &str) -> CoordinatorResult<()> {
        self.handle(session_id)?.cancel().await
    }

    pub async fn retry(&self, session_id: &str) -> CoordinatorResult<()> {
        self.handle(session_id)?.retry().await
    }

    /// Drop a terminal session from the registry.
    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    fn handle(&self, session_id: &str) -> CoordinatorResult<UploadHandle> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoordinatorError::NotFound(session_id.to_string()))
    }
}
