use std::{io::Cursor, path::Path as FsPath, sync::Arc, time::Duration};

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{
    ObjectStore, PutPayload, gcp::GoogleCloudStorageBuilder, local::LocalFileSystem,
    memory::InMemory, path::Path as ObjectPath,
};
use polars::prelude::*;
use tracing::warn;

use crate::{
    config::GcsConfig,
    error::{StorageError, TickforgeResult},
};

const WRITE_ATTEMPTS: u32 = 3;
const WRITE_BACKOFF: Duration = Duration::from_millis(500);

/// The single handle to the bucket holding every durable artifact.
///
/// Wraps an `ObjectStore` trait object so production (GCS), local runs
/// (filesystem) and tests (in-memory) share one code path. Built once at
/// orchestrator start, shared via `Arc`, never mutated. Object puts are
/// replace-all-or-nothing, which gives the atomic-upload guarantee.
#[derive(Debug, Clone)]
pub struct TickStore {
    inner: Arc<dyn ObjectStore>,
    label: String,
}

impl TickStore {
    pub fn gcs(config: &GcsConfig) -> TickforgeResult<Self> {
        let store = GoogleCloudStorageBuilder::new()
            .with_bucket_name(&config.bucket)
            .with_service_account_path(&config.credentials_path)
            .build()
            .map_err(|e| StorageError::StoreBuild(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(store),
            label: format!("gs://{}", config.bucket),
        })
    }

    pub fn local(root: &FsPath) -> TickforgeResult<Self> {
        std::fs::create_dir_all(root).map_err(StorageError::Io)?;
        let store = LocalFileSystem::new_with_prefix(root)
            .map_err(|e| StorageError::StoreBuild(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(store),
            label: root.display().to_string(),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
            label: "memory".to_string(),
        }
    }

    /// Human-readable location, for logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    fn object_path(path: &str) -> Result<ObjectPath, StorageError> {
        ObjectPath::parse(path).map_err(|_| StorageError::PathBuild(path.to_string()))
    }

    /// Writes bytes, retrying transient storage failures with backoff. The
    /// final attempt's error is returned; callers decide whether that fails
    /// the run or just the target.
    pub async fn put_bytes(&self, path: &str, bytes: Bytes) -> TickforgeResult<()> {
        let object_path = Self::object_path(path)?;
        let mut last_error = None;

        for attempt in 0..WRITE_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(WRITE_BACKOFF * 2u32.pow(attempt - 1)).await;
            }
            match self
                .inner
                .put(&object_path, PutPayload::from_bytes(bytes.clone()))
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(path, attempt = attempt + 1, error = %e, "Object write failed");
                    last_error = Some(e);
                }
            }
        }

        Err(StorageError::WriteFailed {
            path: path.to_string(),
            msg: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        }
        .into())
    }

    pub async fn get_bytes(&self, path: &str) -> TickforgeResult<Bytes> {
        let object_path = Self::object_path(path)?;
        let result = self.inner.get(&object_path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => StorageError::NotFound(path.to_string()),
            other => StorageError::ReadFailed {
                path: path.to_string(),
                msg: other.to_string(),
            },
        })?;

        result.bytes().await.map_err(|e| {
            StorageError::ReadFailed {
                path: path.to_string(),
                msg: e.to_string(),
            }
            .into()
        })
    }

    pub async fn exists(&self, path: &str) -> TickforgeResult<bool> {
        let object_path = Self::object_path(path)?;
        match self.inner.head(&object_path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::ReadFailed {
                path: path.to_string(),
                msg: e.to_string(),
            }
            .into()),
        }
    }

    /// Lists every object path under a prefix. Pagination is handled by the
    /// underlying store's listing stream.
    pub async fn list(&self, prefix: &str) -> TickforgeResult<Vec<String>> {
        let prefix_path = Self::object_path(prefix.trim_end_matches('/'))?;
        let metas: Vec<_> = self
            .inner
            .list(Some(&prefix_path))
            .try_collect()
            .await
            .map_err(|e| StorageError::ListFailed {
                prefix: prefix.to_string(),
                msg: e.to_string(),
            })?;
        Ok(metas.into_iter().map(|m| m.location.to_string()).collect())
    }

    pub async fn delete(&self, path: &str) -> TickforgeResult<()> {
        let object_path = Self::object_path(path)?;
        self.inner
            .delete(&object_path)
            .await
            .map_err(|e| match e {
                object_store::Error::NotFound { .. } => StorageError::NotFound(path.to_string()),
                other => StorageError::WriteFailed {
                    path: path.to_string(),
                    msg: other.to_string(),
                },
            })?;
        Ok(())
    }

    // ============================================================================================
    // Columnar helpers
    // ============================================================================================

    /// Encodes a frame as snappy-compressed parquet and uploads it.
    pub async fn put_frame(&self, path: &str, frame: &mut DataFrame) -> TickforgeResult<()> {
        let bytes = frame_to_parquet(frame)?;
        self.put_bytes(path, bytes).await
    }

    pub async fn get_frame(&self, path: &str) -> TickforgeResult<DataFrame> {
        let bytes = self.get_bytes(path).await?;
        parquet_to_frame(path, bytes)
    }

    /// Reads the first candidate path that exists. Returns the frame together
    /// with the path it came from, or `None` when every candidate is absent.
    pub async fn get_frame_with_fallbacks(
        &self,
        candidates: &[String],
    ) -> TickforgeResult<Option<(DataFrame, String)>> {
        for path in candidates {
            match self.get_bytes(path).await {
                Ok(bytes) => return Ok(Some((parquet_to_frame(path, bytes)?, path.clone()))),
                Err(crate::error::TickforgeError::Storage(StorageError::NotFound(_))) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

pub fn frame_to_parquet(frame: &mut DataFrame) -> Result<Bytes, StorageError> {
    let mut buffer = Vec::new();
    ParquetWriter::new(&mut buffer)
        .with_compression(ParquetCompression::Snappy)
        .finish(frame)
        .map_err(|e| StorageError::ParquetEncode(e.to_string()))?;
    Ok(Bytes::from(buffer))
}

pub fn parquet_to_frame(path: &str, bytes: Bytes) -> TickforgeResult<DataFrame> {
    ParquetReader::new(Cursor::new(bytes))
        .finish()
        .map_err(|e| {
            StorageError::ParquetDecode {
                path: path.to_string(),
                msg: e.to_string(),
            }
            .into()
        })
}
