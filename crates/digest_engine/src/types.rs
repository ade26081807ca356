use std::collections::BTreeMap;
use std::fmt;
use std::io;

use chrono::{DateTime, Utc};
use digest_core::{ConfigError, ContractViolation, SourceRef};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::persist::PersistError;
use crate::render::BindingError;

/// A source-scoped failure. Absorbed by the aggregator unless every source fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("source #{source_index} ({source_label}): {kind}: {message}")]
pub struct FetchError {
    pub source_index: usize,
    pub source_label: String,
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub fn new(origin: &SourceRef, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            source_index: origin.index,
            source_label: origin.label.clone(),
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    RedirectLimitExceeded,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    Decode,
    InvalidSelector,
    Network,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RedirectLimitExceeded => write!(f, "redirect limit exceeded"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::Decode => write!(f, "decode failure"),
            FailureKind::InvalidSelector => write!(f, "invalid selector"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A task-scoped failure; the task produces no snapshot.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task {task_name:?}: all {} sources failed", .errors.len())]
    AllSourcesFailed {
        task_name: String,
        errors: Vec<FetchError>,
    },
    #[error("task {task_name:?}: configuration contract violated: {violation}")]
    ContractViolation {
        task_name: String,
        violation: ContractViolation,
    },
    #[error("worker pool closed")]
    PoolClosed,
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Write(#[from] WriteError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("template {template_id:?} not found")]
    TemplateNotFound { template_id: String },
    #[error("template {template_id:?} failed to bind items: {source}")]
    Binding {
        template_id: String,
        #[source]
        source: BindingError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("invalid output path {0:?}")]
    InvalidPath(String),
    #[error("snapshot index is corrupt: {0}")]
    CorruptIndex(String),
    #[error("failed to serialize snapshot index: {0}")]
    Serialize(String),
}

impl WriteError {
    pub(crate) fn io(path: impl Into<String>, source: io::Error) -> Self {
        WriteError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures while assembling an orchestrator, before any task runs.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// In-memory output of a render: relative `/`-separated path to file bytes.
///
/// Ordered by path so iteration, digests and writes are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileTree {
    files: BTreeMap<String, Vec<u8>>,
}

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), bytes.into());
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(p, b)| (p.as_str(), b.as_slice()))
    }

    /// SHA-256 over every path and its bytes, hex encoded.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, bytes) in &self.files {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(64);
        for byte in digest.iter() {
            use std::fmt::Write;
            let _ = write!(&mut hex, "{byte:02x}");
        }
        hex
    }
}

/// One committed task run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub slug: String,
    /// Hour-granularity directory key, e.g. `2026-2-14-12`.
    pub key: String,
    /// Start of the hour the key names.
    pub generated_at: DateTime<Utc>,
    /// `<slug>/<key>` on the output surface.
    pub path: String,
    pub digest: String,
    pub file_count: usize,
}
