//! On-disk index artifacts: the flat vector index and the chunk metadata sidecar.

pub mod metadata;
pub mod vector;

pub use metadata::{ChunkRecord, MetadataStore};
pub use vector::{FlatIndex, NeighborHits};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the persisted vector index inside the index directory.
pub const VECTOR_INDEX_FILE: &str = "global.index";
/// File name of the chunk metadata sidecar inside the index directory.
pub const METADATA_FILE: &str = "chunks.jsonl";

/// Errors raised while reading or writing index artifacts.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An artifact does not exist; the index has to be rebuilt.
    #[error("Index artifact not found at {}", .0.display())]
    IndexNotFound(PathBuf),
    /// An artifact exists but cannot be decoded.
    #[error("Index artifact {} is corrupt: {reason}", .path.display())]
    IndexCorrupt {
        /// Offending artifact.
        path: PathBuf,
        /// What failed to decode.
        reason: String,
    },
    /// A vector does not match the dimension of the index.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of the index.
        expected: usize,
        /// Dimension of the rejected vector.
        actual: usize,
    },
    /// Filesystem failure other than a missing artifact.
    #[error("Index I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// Metadata record could not be serialized.
    #[error("Failed to serialize chunk record: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::IndexCorrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Locations of the two persisted artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    /// Vector index file.
    pub vectors: PathBuf,
    /// Chunk metadata file.
    pub metadata: PathBuf,
}

impl IndexPaths {
    /// Standard artifact locations inside `index_dir`.
    pub fn in_dir(index_dir: &Path) -> Self {
        Self {
            vectors: index_dir.join(VECTOR_INDEX_FILE),
            metadata: index_dir.join(METADATA_FILE),
        }
    }

    /// Whether both artifacts are present.
    pub fn exist(&self) -> bool {
        self.vectors.is_file() && self.metadata.is_file()
    }

    /// Delete both artifacts, ignoring ones that are already gone.
    pub fn remove(&self) -> Result<(), StoreError> {
        for path in [&self.vectors, &self.metadata] {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed index artifact"),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => return Err(error.into()),
            }
        }
        Ok(())
    }
}

pub(crate) fn open_artifact(path: &Path) -> Result<std::fs::File, StoreError> {
    std::fs::File::open(path).map_err(|error| {
        if error.kind() == std::io::ErrorKind::NotFound {
            StoreError::IndexNotFound(path.to_path_buf())
        } else {
            StoreError::Io(error)
        }
    })
}
