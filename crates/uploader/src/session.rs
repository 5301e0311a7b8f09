//! Upload session state machine.
//!
//! One session drives one file: init, then chunks in strict order with at
//! most one in flight, then completion. Pause and offline close a gate that
//! the loop checks before each transfer and again before completion.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hugeup_protocol::{CompleteUploadRequest, CompleteUploadResponse, InitUploadRequest};
use hugeup_transfer::{
    ChunkPlan, FailureClass, FileHandle, RetryDecision, RetryPolicy, is_valid_digest,
};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::UploadError;
use crate::events::{EventBus, EventKind, FailureReport, RetryNotice, SubscriptionId, UploadEvent};
use crate::transport::ChunkTransport;
use crate::types::{
    Checkpoint, NetworkState, PauseReason, SessionConfig, SessionState, Stage, normalize_endpoint,
};

/// Conditions that halt the chunk loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Gate {
    paused: bool,
    offline: bool,
}

impl Gate {
    fn is_open(&self) -> bool {
        !self.paused && !self.offline
    }

    fn reason(&self) -> Option<PauseReason> {
        if self.offline {
            Some(PauseReason::Offline)
        } else if self.paused {
            Some(PauseReason::User)
        } else {
            None
        }
    }
}

struct SessionInner {
    state: SessionState,
    network: NetworkState,
    upload_id: Option<String>,
    /// The next chunk index is always `acknowledgements.len()`.
    acknowledgements: Vec<String>,
    retry_count: u32,
}

impl SessionInner {
    fn next_chunk(&self) -> u64 {
        self.acknowledgements.len() as u64
    }

    /// Reflects the gate in `state` while the chunk loop is active.
    fn apply_gate(&mut self, gate: Gate) {
        match (self.state, gate.reason()) {
            (
                SessionState::Transferring | SessionState::Retrying | SessionState::Paused(_),
                Some(reason),
            ) => self.state = SessionState::Paused(reason),
            (SessionState::Paused(_), None) => self.state = SessionState::Transferring,
            _ => {}
        }
    }
}

/// A resumable chunked upload of one file.
///
/// Share it in an [`Arc`] to call [`pause`](Self::pause),
/// [`resume`](Self::resume) or [`set_network_status`](Self::set_network_status)
/// while [`start`](Self::start) is running.
pub struct UploadSession {
    file: Arc<dyn FileHandle>,
    transport: Box<dyn ChunkTransport>,
    plan: ChunkPlan,
    policy: RetryPolicy,
    endpoint: String,
    digest: String,
    extra_fields: Map<String, Value>,
    inner: Mutex<SessionInner>,
    gate: watch::Sender<Gate>,
    events: EventBus,
}

impl UploadSession {
    /// Validates `config` against `file` and creates an idle session.
    pub fn new<T>(
        file: Arc<dyn FileHandle>,
        transport: T,
        config: SessionConfig,
    ) -> Result<Self, UploadError>
    where
        T: ChunkTransport + 'static,
    {
        let (endpoint, plan) = validate(file.as_ref(), &config)?;
        Ok(Self::build(
            file,
            Box::new(transport),
            config,
            endpoint,
            plan,
            None,
            Vec::new(),
        ))
    }

    /// Recreates a session that already has an upload id and some acked
    /// chunks. [`start`](Self::start) skips init and resumes at the first
    /// unacknowledged chunk.
    pub fn from_checkpoint<T>(
        file: Arc<dyn FileHandle>,
        transport: T,
        config: SessionConfig,
        checkpoint: Checkpoint,
    ) -> Result<Self, UploadError>
    where
        T: ChunkTransport + 'static,
    {
        let (endpoint, plan) = validate(file.as_ref(), &config)?;
        if checkpoint.upload_id.trim().is_empty() {
            return Err(UploadError::Validation(
                "checkpoint has no upload id".into(),
            ));
        }
        let acked = checkpoint.acknowledgements.len() as u64;
        if acked > plan.total_chunks() {
            return Err(UploadError::Validation(format!(
                "checkpoint has {acked} acknowledgements but the file has {} chunks",
                plan.total_chunks()
            )));
        }
        Ok(Self::build(
            file,
            Box::new(transport),
            config,
            endpoint,
            plan,
            Some(checkpoint.upload_id),
            checkpoint.acknowledgements,
        ))
    }

    fn build(
        file: Arc<dyn FileHandle>,
        transport: Box<dyn ChunkTransport>,
        config: SessionConfig,
        endpoint: String,
        plan: ChunkPlan,
        upload_id: Option<String>,
        acknowledgements: Vec<String>,
    ) -> Self {
        let (gate, _) = watch::channel(Gate::default());
        Self {
            file,
            transport,
            plan,
            policy: RetryPolicy::new(config.retries, config.retry_delay),
            endpoint,
            digest: config.digest,
            extra_fields: config.extra_fields,
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                network: NetworkState::Online,
                upload_id,
                acknowledgements,
                retry_count: 0,
            }),
            gate,
            events: EventBus::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn gate(&self) -> Gate {
        *self.gate.borrow()
    }

    // -- Accessors ----------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn network_state(&self) -> NetworkState {
        self.lock().network
    }

    /// Upload id assigned by the endpoint; `None` until init succeeds.
    pub fn upload_id(&self) -> Option<String> {
        self.lock().upload_id.clone()
    }

    /// Index of the next chunk to send.
    pub fn current_chunk_index(&self) -> u64 {
        self.lock().next_chunk()
    }

    /// Ack tokens collected so far, in chunk order.
    pub fn acknowledgements(&self) -> Vec<String> {
        self.lock().acknowledgements.clone()
    }

    /// Retries spent on the current chunk.
    pub fn retry_count(&self) -> u32 {
        self.lock().retry_count
    }

    pub fn total_chunks(&self) -> u64 {
        self.plan.total_chunks()
    }

    pub fn chunk_size(&self) -> u64 {
        self.plan.chunk_size()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn file_name(&self) -> &str {
        self.file.name()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Shorthand for `events().on(kind, subscriber)`.
    pub fn on<F>(&self, kind: EventKind, subscriber: F) -> SubscriptionId
    where
        F: Fn(&UploadEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, subscriber)
    }

    /// Resumable state, available once an upload id exists.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        let inner = self.lock();
        inner.upload_id.as_ref().map(|upload_id| Checkpoint {
            upload_id: upload_id.clone(),
            acknowledgements: inner.acknowledgements.clone(),
        })
    }

    // -- Control ------------------------------------------------------------

    /// Halts the chunk loop before its next transfer. Ignored once the
    /// session is finished or failed.
    pub fn pause(&self) {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return;
        }
        self.gate.send_modify(|gate| gate.paused = true);
        inner.apply_gate(self.gate());
        let next_chunk = inner.next_chunk();
        drop(inner);
        info!(next_chunk, "upload paused");
    }

    /// Clears a user pause. The loop stays halted while offline.
    pub fn resume(&self) {
        let mut inner = self.lock();
        if inner.state.is_terminal() || !self.gate().paused {
            return;
        }
        self.gate.send_modify(|gate| gate.paused = false);
        inner.apply_gate(self.gate());
        let next_chunk = inner.next_chunk();
        let offline = self.gate().offline;
        drop(inner);
        info!(next_chunk, offline, "upload resumed");
    }

    /// Feeds a network-status notification. Emits `online`/`offline` on
    /// transitions only.
    pub fn set_network_status(&self, status: NetworkState) {
        {
            let mut inner = self.lock();
            if inner.network == status {
                return;
            }
            inner.network = status;
            self.gate
                .send_modify(|gate| gate.offline = status == NetworkState::Offline);
            inner.apply_gate(self.gate());
        }

        match status {
            NetworkState::Online => {
                info!("network online");
                self.events.emit(&UploadEvent::Online);
            }
            NetworkState::Offline => {
                warn!("network offline");
                self.events.emit(&UploadEvent::Offline);
            }
        }
    }

    // -- Driver -------------------------------------------------------------

    /// Runs the upload to completion and returns the completion response.
    ///
    /// Every failure other than calling this twice moves the session to
    /// `Failed` and emits a single `error` event.
    pub async fn start(&self) -> Result<CompleteUploadResponse, UploadError> {
        let resume_id = {
            let mut inner = self.lock();
            if inner.state != SessionState::Idle {
                return Err(UploadError::InvalidSequence(format!(
                    "start called in state {:?}",
                    inner.state
                )));
            }
            inner.state = if inner.upload_id.is_some() {
                SessionState::Transferring
            } else {
                SessionState::Initializing
            };
            inner.upload_id.clone()
        };

        match self.run(resume_id).await {
            Ok(response) => Ok(response),
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    async fn run(&self, resume_id: Option<String>) -> Result<CompleteUploadResponse, UploadError> {
        let upload_id = match resume_id {
            Some(upload_id) => {
                info!(
                    upload_id = %upload_id,
                    next_chunk = self.current_chunk_index(),
                    total_chunks = self.plan.total_chunks(),
                    "resuming upload"
                );
                upload_id
            }
            None => self.init().await?,
        };

        self.transfer_chunks(&upload_id).await?;
        self.complete(&upload_id).await
    }

    async fn init(&self) -> Result<String, UploadError> {
        let request = InitUploadRequest::new(
            self.file.name(),
            self.plan.file_size(),
            &self.digest,
            self.plan.total_chunks(),
            &self.extra_fields,
        );
        let upload_id = self
            .transport
            .init_upload(&request)
            .await
            .map_err(|source| UploadError::Permanent {
                stage: Stage::Init,
                source,
            })?;

        {
            let mut inner = self.lock();
            inner.upload_id = Some(upload_id.clone());
            inner.state = SessionState::Transferring;
        }
        info!(
            upload_id = %upload_id,
            file = %self.file.name(),
            total_chunks = self.plan.total_chunks(),
            "upload initialized"
        );
        Ok(upload_id)
    }

    async fn transfer_chunks(&self, upload_id: &str) -> Result<(), UploadError> {
        loop {
            self.wait_for_gate().await;

            let index = self.current_chunk_index();
            if index >= self.plan.total_chunks() {
                return Ok(());
            }
            let data = self.read_chunk(index).await?;

            let retries_used = {
                let inner = self.lock();
                if !self.gate().is_open() {
                    continue;
                }
                inner.retry_count
            };

            let bytes = data.len();
            debug!(chunk = index, bytes, retries = retries_used, "sending chunk");
            let result = self.transport.upload_chunk(upload_id, index, data).await;
            let gate_open = self.gate().is_open();

            let err = match result {
                Ok(etag) => {
                    let percent = {
                        let mut inner = self.lock();
                        inner.acknowledgements.push(etag);
                        inner.retry_count = 0;
                        self.plan.percent(inner.next_chunk())
                    };
                    debug!(chunk = index, percent, "chunk acknowledged");
                    self.events.emit(&UploadEvent::Progress(percent));
                    continue;
                }
                Err(err) => err,
            };

            if !gate_open {
                debug!(chunk = index, error = %err, "discarding failed result while halted");
                continue;
            }

            match self.policy.decide(err.class(), retries_used) {
                RetryDecision::Retry {
                    delay,
                    retries_left,
                } => {
                    {
                        let mut inner = self.lock();
                        inner.retry_count = retries_used + 1;
                        if inner.state == SessionState::Transferring {
                            inner.state = SessionState::Retrying;
                        }
                    }
                    warn!(
                        chunk = index,
                        retries_left,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "chunk failed, retrying"
                    );
                    self.events
                        .emit(&UploadEvent::FileRetry(RetryNotice::new(index, retries_left)));

                    tokio::time::sleep(delay).await;

                    let mut inner = self.lock();
                    if inner.state == SessionState::Retrying {
                        inner.state = SessionState::Transferring;
                    }
                }
                RetryDecision::GiveUp {
                    class: FailureClass::Transient,
                } => {
                    return Err(UploadError::RetriesExhausted {
                        chunk_index: index,
                        retries: retries_used,
                        source: err,
                    });
                }
                RetryDecision::GiveUp {
                    class: FailureClass::Permanent,
                } => {
                    return Err(UploadError::Permanent {
                        stage: Stage::Chunk(index),
                        source: err,
                    });
                }
            }
        }
    }

    async fn complete(&self, upload_id: &str) -> Result<CompleteUploadResponse, UploadError> {
        let etags = loop {
            self.wait_for_gate().await;

            let mut inner = self.lock();
            if !self.gate().is_open() {
                continue;
            }
            if inner.next_chunk() != self.plan.total_chunks() {
                return Err(UploadError::InvalidSequence(format!(
                    "completion with {} of {} chunks acknowledged",
                    inner.next_chunk(),
                    self.plan.total_chunks()
                )));
            }
            inner.state = SessionState::Completing;
            break inner.acknowledgements.clone();
        };

        let request = CompleteUploadRequest {
            upload_id: upload_id.to_string(),
            etags,
        };
        let response = self
            .transport
            .complete_upload(&request)
            .await
            .map_err(|source| UploadError::Permanent {
                stage: Stage::Complete,
                source,
            })?;

        self.lock().state = SessionState::Finished;
        info!(
            upload_id = %upload_id,
            location = response.location().unwrap_or("-"),
            "upload complete"
        );
        self.events.emit(&UploadEvent::Finish(response.clone()));
        Ok(response)
    }

    /// Returns once neither a user pause nor an offline condition holds.
    async fn wait_for_gate(&self) {
        if self.gate().is_open() {
            return;
        }

        let reason = {
            let mut inner = self.lock();
            inner.apply_gate(self.gate());
            self.gate().reason()
        };
        debug!(?reason, "transfer loop halted");

        let mut rx = self.gate.subscribe();
        let _ = rx.wait_for(Gate::is_open).await;

        let mut inner = self.lock();
        if let SessionState::Paused(_) = inner.state {
            inner.state = SessionState::Transferring;
        }
    }

    async fn read_chunk(&self, index: u64) -> Result<Vec<u8>, UploadError> {
        let range = self.plan.range(index).ok_or_else(|| {
            UploadError::InvalidSequence(format!("chunk {index} is outside the plan"))
        })?;
        let file = Arc::clone(&self.file);
        let data = tokio::task::spawn_blocking(move || file.read_range(range.start, range.end))
            .await
            .map_err(|e| UploadError::Task(e.to_string()))??;
        Ok(data)
    }

    fn fail(&self, err: &UploadError) {
        self.lock().state = SessionState::Failed;
        error!(
            file = %self.file.name(),
            chunk = err.chunk_index(),
            status = err.status(),
            error = %err,
            "upload failed"
        );
        self.events.emit(&UploadEvent::Error(FailureReport {
            status: err.status(),
            chunk_index: err.chunk_index(),
            message: err.to_string(),
        }));
    }
}

/// Returns the normalized endpoint and the chunk plan.
fn validate(
    file: &dyn FileHandle,
    config: &SessionConfig,
) -> Result<(String, ChunkPlan), UploadError> {
    let endpoint = normalize_endpoint(&config.endpoint)?;
    if config.chunk_size == 0 {
        return Err(UploadError::Validation("chunk size must be positive".into()));
    }
    if config.retries == 0 {
        return Err(UploadError::Validation("retries must be positive".into()));
    }
    if config.digest.is_empty() {
        return Err(UploadError::Validation("file digest is required".into()));
    }
    if !is_valid_digest(&config.digest) {
        return Err(UploadError::Validation(format!(
            "malformed MD5 digest: {}",
            config.digest
        )));
    }
    if file.is_empty() {
        return Err(UploadError::Validation(format!(
            "file {} is empty",
            file.name()
        )));
    }

    let plan = ChunkPlan::new(file.len(), config.chunk_size)
        .map_err(|e| UploadError::Validation(e.to_string()))?;
    Ok((endpoint, plan))
}
