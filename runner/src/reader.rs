use crate::error::LoaderError;
use crate::error::LoaderResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io;

/// Reads the bytes of a resource.
#[async_trait]
pub trait ResourceReader: Send + Sync {
    async fn read(&self, path: &str) -> LoaderResult<Bytes>;
}

/// Reads resources from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsResourceReader;

#[async_trait]
impl ResourceReader for FsResourceReader {
    async fn read(&self, path: &str) -> LoaderResult<Bytes> {
        tokio::fs::read(path)
            .await
            .map(Bytes::from)
            .map_err(|err| LoaderError::io(path, err))
    }
}

/// Serves resources from memory, for tests and embedders that already hold
/// the content.
#[derive(Debug, Clone, Default)]
pub struct MemoryResourceReader {
    files: HashMap<String, Bytes>,
}

impl MemoryResourceReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }
}

#[async_trait]
impl ResourceReader for MemoryResourceReader {
    async fn read(&self, path: &str) -> LoaderResult<Bytes> {
        self.files.get(path).cloned().ok_or_else(|| {
            LoaderError::io(
                path,
                io::Error::new(io::ErrorKind::NotFound, "no such resource"),
            )
        })
    }
}
