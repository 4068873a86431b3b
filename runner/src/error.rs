use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::context::DependencySnapshot;

pub type LoaderResult<T, E = LoaderError> = Result<T, E>;

#[derive(Debug, Error)]
pub enum LoaderError {
    /// A hook reported a plain failure message.
    #[error("{0}")]
    Message(String),

    #[error("invalid loader request: {0}")]
    InvalidRequest(String),

    #[error("failed to resolve loader `{loader}`: {message}")]
    Resolve { loader: String, message: String },

    #[error("I/O error while reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A hook completed more than once or asked for the async callback after
    /// it had already completed.
    #[error("{0}")]
    Protocol(String),

    #[error("loader `{loader}` dropped its callback without completing")]
    CallbackDropped { loader: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LoaderError {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn resolve(loader: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolve {
            loader: loader.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Terminal failure of a run. The dependency snapshot and named context
/// values collected up to the failure are kept so a build graph can still
/// record partial information.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    #[source]
    pub error: LoaderError,
    pub dependencies: DependencySnapshot,
    pub values: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error while reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML config {path:?}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to parse JSON config {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid loader entry in {path:?}: {source}")]
    Loader {
        path: PathBuf,
        #[source]
        source: LoaderError,
    },
}
