use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Connection settings for an S3-compatible object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl ObjectStoreConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(Error::InvalidConfig {
                message: "endpoint must start with http:// or https://".to_string(),
            });
        }
        if self.bucket.is_empty() {
            return Err(Error::InvalidConfig {
                message: "bucket must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
