use crate::block_addr::ObjectKey;
use crate::object_store::ObjectStoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the File I/O Engine to its caller.
///
/// Partial reads and partial writes are *not* errors — see spec §7 — they
/// are returned as plain `usize` counts from [`crate::engine::FileHandle`].
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("local I/O error")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("object store error")]
    Backend {
        #[from]
        source: ObjectStoreError,
    },

    /// The reconciler could not make the cached version agree with the
    /// object store's before the configured timeout elapsed (spec §4.3,
    /// §7). The filesystem is marked damaged before this is returned.
    #[error("version tag for {key} did not converge before the timeout")]
    PropagationTimeout { key: ObjectKey },

    /// The damaged bit is set; the caller must fail the operation until a
    /// consistency check clears it.
    #[error("filesystem is marked damaged, refusing operation")]
    FilesystemDamaged,
}
