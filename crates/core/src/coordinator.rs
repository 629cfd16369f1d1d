use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::progress::{ProgressSink, TransferProgress, percent};
use crate::storage::{BlobStorage, UploadOutcome, resolve_outcome};
use crate::{Error, Result};

/// Terminal callbacks for one upload attempt. A cancelled attempt invokes
/// neither method.
pub trait OutcomeSink: Send + Sync {
    fn on_success(&self);
    fn on_failure(&self, error: &Error);
}

/// Owns the single in-flight upload session and bridges its background
/// events to the caller's sinks.
///
/// At most one session is active at a time; starting a new upload cancels
/// the previous handle before the new one exists. All sink deliveries happen
/// from one forwarder task per session and are gated on the session still
/// being current, so a superseded upload can never reach sinks registered
/// for a later one.
pub struct UploadCoordinator<S: BlobStorage> {
    storage: Arc<S>,
    state: Arc<Mutex<CoordinatorState>>,
}

#[derive(Default)]
struct CoordinatorState {
    next_session_id: u64,
    active: Option<ActiveSession>,
    progress_percent: u8,
}

impl CoordinatorState {
    fn current_session(&self) -> Option<u64> {
        self.active.as_ref().map(|s| s.session_id)
    }
}

struct ActiveSession {
    session_id: u64,
    cancel: CancellationToken,
}

impl<S: BlobStorage> UploadCoordinator<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            state: Arc::new(Mutex::new(CoordinatorState::default())),
        }
    }

    /// Starts uploading `source` under its base name, superseding any upload
    /// still in flight. Returns once the transfer is started; outcomes and
    /// progress arrive through the sinks.
    pub fn start_upload(
        &self,
        source: &Path,
        outcome_sink: Arc<dyn OutcomeSink>,
        progress_sink: Arc<dyn ProgressSink>,
    ) -> Result<()> {
        if !source.is_file() {
            return Err(Error::InvalidConfig {
                message: format!("source must be an existing file: {}", source.display()),
            });
        }
        let destination_key = source
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| Error::NonUtf8Path {
                path: source.to_path_buf(),
            })?;

        let mut state = self.lock_state();

        if let Some(previous) = state.active.take() {
            previous.cancel.cancel();
            debug!(
                event = "upload.superseded",
                session_id = previous.session_id,
                "upload.superseded"
            );
        }

        let session_id = state.next_session_id;
        state.next_session_id += 1;

        // Created under the lock so the supersede above is ordered before
        // the new handle exists.
        let handle = self.storage.begin_upload(source, &destination_key)?;
        state.active = Some(ActiveSession {
            session_id,
            cancel: handle.cancel_token(),
        });
        drop(state);

        info!(
            event = "upload.start",
            provider = self.storage.provider(),
            key = %destination_key,
            session_id,
            "upload.start"
        );

        let (_, progress_rx, outcome_rx) = handle.into_parts();
        tokio::spawn(forward_events(
            self.state.clone(),
            session_id,
            destination_key,
            progress_rx,
            outcome_rx,
            outcome_sink,
            progress_sink,
        ));
        Ok(())
    }

    /// Cancels the active upload if there is one. Always resets the progress
    /// display, active upload or not.
    pub fn cancel_upload(&self, progress_sink: &dyn ProgressSink) {
        let mut state = self.lock_state();
        if let Some(active) = state.active.take() {
            active.cancel.cancel();
            debug!(
                event = "upload.cancel",
                session_id = active.session_id,
                "upload.cancel"
            );
        }
        state.progress_percent = 0;
        drop(state);
        progress_sink.on_progress(0);
    }

    pub fn progress_percent(&self) -> u8 {
        self.lock_state().progress_percent
    }

    pub fn is_busy(&self) -> bool {
        self.lock_state().active.is_some()
    }

    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().expect("coordinator state mutex poisoned")
    }
}

/// Per-session forwarder. Owns both sinks; every delivery is serialized
/// through this task, so sinks are never called from storage internals or
/// from two contexts at once.
async fn forward_events(
    state: Arc<Mutex<CoordinatorState>>,
    session_id: u64,
    key: String,
    mut progress_rx: mpsc::UnboundedReceiver<TransferProgress>,
    mut outcome_rx: oneshot::Receiver<UploadOutcome>,
    outcome_sink: Arc<dyn OutcomeSink>,
    progress_sink: Arc<dyn ProgressSink>,
) {
    let outcome = loop {
        tokio::select! {
            // Queued progress drains before a ready outcome is looked at.
            biased;
            event = progress_rx.recv() => match event {
                Some(p) => {
                    let pct = percent(p.bytes_transferred, p.total_bytes);
                    let current = {
                        let mut state = lock(&state);
                        if state.current_session() == Some(session_id) {
                            state.progress_percent = pct;
                            true
                        } else {
                            false
                        }
                    };
                    if !current {
                        return;
                    }
                    progress_sink.on_progress(pct);
                }
                None => break resolve_outcome((&mut outcome_rx).await),
            },
            res = &mut outcome_rx => break resolve_outcome(res),
        }
    };

    {
        let mut state = lock(&state);
        if state.current_session() != Some(session_id) {
            debug!(
                event = "upload.stale_outcome",
                session_id, "upload.stale_outcome"
            );
            return;
        }
        state.active = None;
        if matches!(&outcome, UploadOutcome::Failed(Error::Storage { .. })) {
            state.progress_percent = 0;
        }
    }

    match outcome {
        UploadOutcome::Completed => {
            info!(
                event = "upload.finish",
                key = %key,
                session_id,
                status = "succeeded",
                "upload.finish"
            );
            outcome_sink.on_success();
        }
        UploadOutcome::Cancelled | UploadOutcome::Failed(Error::Cancelled) => {
            debug!(
                event = "upload.finish",
                key = %key,
                session_id,
                status = "cancelled",
                "upload.finish"
            );
        }
        UploadOutcome::Failed(e @ Error::Storage { .. }) => {
            error!(
                event = "upload.finish",
                key = %key,
                session_id,
                status = "failed",
                error_code = e.code(),
                error = %e,
                "upload.finish"
            );
            progress_sink.on_progress(0);
            outcome_sink.on_failure(&e);
        }
        UploadOutcome::Failed(e) => {
            error!(
                event = "upload.finish",
                key = %key,
                session_id,
                status = "failed",
                error_code = e.code(),
                error = %e,
                "upload.finish"
            );
            outcome_sink.on_failure(&e);
        }
    }
}

fn lock(state: &Mutex<CoordinatorState>) -> MutexGuard<'_, CoordinatorState> {
    state.lock().expect("coordinator state mutex poisoned")
}
