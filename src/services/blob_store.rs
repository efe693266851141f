use crate::config::BlobConfig;
use anyhow::{Context, Result};
use object_store::{aws::AmazonS3Builder, path::Path as ObjectPath, ObjectStore, PutPayload};
use std::sync::Arc;
use tracing::{debug, info};

/// Raw payloads below the threshold are inlined on the document row; larger
/// ones go to object storage and only the key is persisted.
pub struct BlobStore {
    store: Option<Arc<dyn ObjectStore>>,
    threshold_bytes: usize,
}

impl BlobStore {
    pub fn new(config: &BlobConfig) -> Result<Self> {
        let store = match &config.bucket {
            Some(bucket) => {
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
                if let Some(region) = &config.region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = &config.endpoint {
                    builder = builder.with_endpoint(endpoint);
                }
                if let Some(key_id) = &config.access_key_id {
                    builder = builder.with_access_key_id(key_id);
                }
                if let Some(secret) = &config.secret_access_key {
                    builder = builder.with_secret_access_key(secret);
                }
                let store = builder.build().context("Failed to configure blob store")?;
                info!("Blob store configured (bucket={})", bucket);
                Some(Arc::new(store) as Arc<dyn ObjectStore>)
            }
            None => None,
        };

        Ok(Self {
            store,
            threshold_bytes: config.threshold_bytes,
        })
    }

    pub fn threshold_bytes(&self) -> usize {
        self.threshold_bytes
    }

    /// Whether a payload of this size should be offloaded. Without a
    /// configured bucket everything stays inline regardless of size.
    pub fn should_offload(&self, size: usize) -> bool {
        self.store.is_some() && size > self.threshold_bytes
    }

    pub async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let store = self
            .store
            .as_ref()
            .context("Blob store is not configured")?;
        let size = bytes.len();
        store
            .put(&ObjectPath::from(key), PutPayload::from(bytes))
            .await
            .with_context(|| format!("Failed to upload blob {key}"))?;
        debug!("Uploaded blob {} ({} bytes)", key, size);
        Ok(())
    }
}
