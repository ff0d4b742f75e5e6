pub mod provider;
pub mod local;
pub mod cos;

pub use provider::*;
pub use local::*;
pub use cos::*;

use std::sync::Arc;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::StorageLocation;

/// A configured cloud bucket and the provider serving it
#[derive(Clone)]
struct CloudBucket {
    name: String,
    provider: Arc<dyn StorageProvider>,
}

/// Resolves a record's storage location to the provider holding its blob
#[derive(Clone)]
pub struct StorageManager {
    local: Arc<LocalStorage>,
    cloud: Option<CloudBucket>,
}

impl StorageManager {
    pub fn new(local: LocalStorage, cloud: Option<CosStorage>) -> Self {
        Self {
            local: Arc::new(local),
            cloud: cloud.map(|cos| CloudBucket {
                name: cos.bucket().to_string(),
                provider: Arc::new(cos),
            }),
        }
    }

    /// Local storage plus an arbitrary provider standing in for `bucket`
    #[cfg(test)]
    pub(crate) fn with_cloud_provider(
        local: LocalStorage,
        bucket: &str,
        provider: Arc<dyn StorageProvider>,
    ) -> Self {
        Self {
            local: Arc::new(local),
            cloud: Some(CloudBucket {
                name: bucket.to_string(),
                provider,
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let local = LocalStorage::new(config.storage.data_path());
        let cloud = config.cos.clone().map(CosStorage::new);
        Self::new(local, cloud)
    }

    pub fn local(&self) -> &LocalStorage {
        &self.local
    }

    /// Provider for an existing location. Fails if the record was placed in a
    /// bucket this instance is not configured for.
    pub fn provider(&self, location: &StorageLocation) -> Result<&dyn StorageProvider> {
        match location {
            StorageLocation::Local => Ok(self.local.as_ref()),
            StorageLocation::Cloud { bucket } => match &self.cloud {
                Some(cloud) if cloud.name == *bucket => Ok(cloud.provider.as_ref()),
                _ => Err(AppError::Storage(format!(
                    "Cloud bucket {} is not configured",
                    bucket
                ))),
            },
        }
    }

    /// Where new uploads go
    pub fn default_location(&self) -> StorageLocation {
        match &self.cloud {
            Some(cloud) => StorageLocation::Cloud {
                bucket: cloud.name.clone(),
            },
            None => StorageLocation::Local,
        }
    }
}
