//! Object storage used by bulk uploads
//!
//! Only the interface and an in-memory store live here; real backends
//! plug in behind [`ObjectStore`].

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::{GatewayError, Result};

/// Bucket/object addressed blob storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, object: &str) -> Result<Bytes>;

    async fn put(&self, bucket: &str, object: &str, data: Bytes) -> Result<()>;
}

/// Process-local store
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<(String, String), Bytes>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, bucket: &str, object: &str) -> Result<Bytes> {
        self.objects
            .read()
            .get(&(bucket.to_string(), object.to_string()))
            .cloned()
            .ok_or_else(|| GatewayError::ObjectStore(format!("{}/{} not found", bucket, object)))
    }

    async fn put(&self, bucket: &str, object: &str, data: Bytes) -> Result<()> {
        self.objects
            .write()
            .insert((bucket.to_string(), object.to_string()), data);
        Ok(())
    }
}
