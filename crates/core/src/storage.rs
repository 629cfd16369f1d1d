use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::ObjectStoreConfig;
use crate::progress::TransferProgress;
use crate::{Error, Result};

const PUT_CHUNK_BYTES: usize = 64 * 1024;

/// Terminal state of one transfer. Cancellation is a first-class outcome,
/// never a failure.
#[derive(Debug)]
pub enum UploadOutcome {
    Completed,
    Failed(Error),
    Cancelled,
}

/// Cancellable reference to an in-flight transfer.
///
/// Storage implementations construct one per `begin_upload` call and drive
/// the progress/outcome senders from their own background task.
pub struct UploadHandle {
    cancel: CancellationToken,
    progress: mpsc::UnboundedReceiver<TransferProgress>,
    outcome: oneshot::Receiver<UploadOutcome>,
}

impl UploadHandle {
    pub fn new(
        cancel: CancellationToken,
        progress: mpsc::UnboundedReceiver<TransferProgress>,
        outcome: oneshot::Receiver<UploadOutcome>,
    ) -> Self {
        Self {
            cancel,
            progress,
            outcome,
        }
    }

    /// Requests cancellation. Best-effort: the transfer observes the token
    /// asynchronously and reports `UploadOutcome::Cancelled` when it stops.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn next_progress(&mut self) -> Option<TransferProgress> {
        self.progress.recv().await
    }

    /// Awaits the terminal outcome, discarding any remaining progress events.
    pub async fn wait(self) -> UploadOutcome {
        let Self {
            progress, outcome, ..
        } = self;
        drop(progress);
        resolve_outcome(outcome.await)
    }

    pub fn into_parts(
        self,
    ) -> (
        CancellationToken,
        mpsc::UnboundedReceiver<TransferProgress>,
        oneshot::Receiver<UploadOutcome>,
    ) {
        (self.cancel, self.progress, self.outcome)
    }
}

/// A dropped sender means the storage task died without a terminal event.
pub(crate) fn resolve_outcome(
    res: std::result::Result<UploadOutcome, oneshot::error::RecvError>,
) -> UploadOutcome {
    res.unwrap_or_else(|_| {
        UploadOutcome::Failed(Error::Storage {
            message: "storage client dropped the upload without reporting an outcome".to_string(),
        })
    })
}

pub trait BlobStorage: Send + Sync {
    fn provider(&self) -> &'static str;

    /// Starts a transfer of `source` to `destination_key` and returns a
    /// handle for observing and cancelling it. Does not block on the
    /// transfer itself.
    fn begin_upload(&self, source: &Path, destination_key: &str) -> Result<UploadHandle>;
}

/// Object store client speaking plain HTTP PUT against an S3-compatible
/// endpoint. Chunking, retries and resumability are the server's problem.
pub struct HttpBlobStorage {
    config: ObjectStoreConfig,
    client: reqwest::Client,
}

impl HttpBlobStorage {
    pub fn new(config: ObjectStoreConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn object_url(&self, destination_key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket,
            destination_key
        )
    }
}

impl BlobStorage for HttpBlobStorage {
    fn provider(&self) -> &'static str {
        "objectstore.http"
    }

    fn begin_upload(&self, source: &Path, destination_key: &str) -> Result<UploadHandle> {
        let url = self.object_url(destination_key);
        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let client = self.client.clone();
        let auth_token = self.config.auth_token.clone();
        let source = source.to_path_buf();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let outcome =
                run_put(client, url, auth_token, source, progress_tx, task_cancel).await;
            let _ = outcome_tx.send(outcome);
        });

        Ok(UploadHandle::new(cancel, progress_rx, outcome_rx))
    }
}

async fn run_put(
    client: reqwest::Client,
    url: String,
    auth_token: Option<String>,
    source: std::path::PathBuf,
    progress_tx: mpsc::UnboundedSender<TransferProgress>,
    cancel: CancellationToken,
) -> UploadOutcome {
    let mut file = match tokio::fs::File::open(&source).await {
        Ok(file) => file,
        Err(e) => return UploadOutcome::Failed(Error::Io(e)),
    };
    let total_bytes = match file.metadata().await {
        Ok(meta) => meta.len(),
        Err(e) => return UploadOutcome::Failed(Error::Io(e)),
    };

    // Bytes are counted as they are handed to the transport, not as the
    // server acknowledges them.
    let (body_tx, body_rx) = mpsc::channel::<std::io::Result<Bytes>>(4);
    let reader_cancel = cancel.clone();
    let reader = tokio::spawn(async move {
        let mut transferred = 0u64;
        let mut buf = vec![0u8; PUT_CHUNK_BYTES];
        loop {
            if reader_cancel.is_cancelled() {
                return;
            }
            match file.read(&mut buf).await {
                Ok(0) => return,
                Ok(n) => {
                    transferred += n as u64;
                    if body_tx
                        .send(Ok(Bytes::copy_from_slice(&buf[..n])))
                        .await
                        .is_err()
                    {
                        return;
                    }
                    let _ = progress_tx.send(TransferProgress {
                        bytes_transferred: transferred,
                        total_bytes,
                    });
                }
                Err(e) => {
                    let _ = body_tx.send(Err(e)).await;
                    return;
                }
            }
        }
    });

    let mut request = client
        .put(&url)
        .header(reqwest::header::CONTENT_LENGTH, total_bytes)
        .body(reqwest::Body::wrap_stream(ReceiverStream::new(body_rx)));
    if let Some(token) = auth_token {
        request = request.bearer_auth(token);
    }

    let sent = tokio::select! {
        _ = cancel.cancelled() => {
            reader.abort();
            debug!(event = "io.http.upload_cancelled", url = %url, "io.http.upload_cancelled");
            return UploadOutcome::Cancelled;
        }
        sent = request.send() => sent,
    };

    let response = match sent {
        Ok(response) => response,
        Err(e) => {
            if cancel.is_cancelled() {
                return UploadOutcome::Cancelled;
            }
            error!(
                event = "io.http.upload_failed",
                url = %url,
                error = %e,
                "io.http.upload_failed"
            );
            return UploadOutcome::Failed(Error::Storage {
                message: format!("request failed: {e}"),
            });
        }
    };

    let status = response.status();
    if status.is_success() {
        return UploadOutcome::Completed;
    }
    let body = response.text().await.unwrap_or_default();
    error!(
        event = "io.http.upload_failed",
        url = %url,
        status = %status,
        "io.http.upload_failed"
    );
    UploadOutcome::Failed(Error::Storage {
        message: format!("http {status}: {body}"),
    })
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryBlobStorage {
    inner: Arc<InMemoryInner>,
}

#[derive(Debug, Default)]
struct InMemoryInner {
    uploaded: AtomicUsize,
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStorage {
    const PROGRESS_STEPS: u64 = 4;

    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.objects.lock().await.get(key).cloned()
    }

    pub async fn object_count(&self) -> usize {
        self.inner.objects.lock().await.len()
    }

    pub fn uploaded_count(&self) -> usize {
        self.inner.uploaded.load(Ordering::Relaxed)
    }
}

impl BlobStorage for InMemoryBlobStorage {
    fn provider(&self) -> &'static str {
        "test.mem"
    }

    fn begin_upload(&self, source: &Path, destination_key: &str) -> Result<UploadHandle> {
        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let inner = self.inner.clone();
        let source = source.to_path_buf();
        let key = destination_key.to_string();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let data = match tokio::fs::read(&source).await {
                Ok(data) => data,
                Err(e) => {
                    let _ = outcome_tx.send(UploadOutcome::Failed(Error::Io(e)));
                    return;
                }
            };
            let total_bytes = data.len() as u64;

            for step in 1..=InMemoryBlobStorage::PROGRESS_STEPS {
                if task_cancel.is_cancelled() {
                    let _ = outcome_tx.send(UploadOutcome::Cancelled);
                    return;
                }
                let _ = progress_tx.send(TransferProgress {
                    bytes_transferred: total_bytes * step / InMemoryBlobStorage::PROGRESS_STEPS,
                    total_bytes,
                });
                tokio::task::yield_now().await;
            }

            if task_cancel.is_cancelled() {
                let _ = outcome_tx.send(UploadOutcome::Cancelled);
                return;
            }
            inner.objects.lock().await.insert(key, data);
            inner.uploaded.fetch_add(1, Ordering::Relaxed);
            let _ = outcome_tx.send(UploadOutcome::Completed);
        });

        Ok(UploadHandle::new(cancel, progress_rx, outcome_rx))
    }
}
