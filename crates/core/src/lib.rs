mod config;
mod coordinator;
mod error;
mod materialize;
mod progress;
mod storage;

pub const APP_NAME: &str = "Docdrop";

pub use config::ObjectStoreConfig;
pub use coordinator::{OutcomeSink, UploadCoordinator};
pub use error::{Error, Result};
pub use materialize::materialize_temp_file;
pub use progress::{ProgressSink, TransferProgress, percent};
pub use storage::{BlobStorage, HttpBlobStorage, InMemoryBlobStorage, UploadHandle, UploadOutcome};
