//! The object-store client capability set (spec §6). Authentication, HTTP
//! transport, and payload encryption/compression live in whatever
//! implements this trait (out of scope here, spec §1); this crate only
//! depends on the shape of the interface.

use crate::block_addr::ObjectKey;
use std::path::Path;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ObjectStoreError>;

/// Opaque token returned by the object store that changes on every
/// successful overwrite.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct VersionTag(pub String);

impl std::fmt::Display for VersionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("no object found for {key}")]
    NotFound { key: ObjectKey },

    #[error("local I/O error")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("object store is temporarily unavailable")]
    Transient {
        source: anyhow::Error,
    },

    #[error("object store error")]
    Other {
        #[from]
        source: anyhow::Error,
    },
}

/// Blocking capability-set for the remote eventually-consistent key/value
/// object service (spec §6). All operations may block and may fail with
/// transient or permanent errors.
pub trait ObjectStore: Send + Sync {
    /// Lists keys sharing the given prefix.
    fn list(&self, prefix: &str) -> Result<Vec<ObjectKey>>;

    /// Returns the current version tag for `key` without transferring the
    /// payload.
    fn lookup(&self, key: &ObjectKey) -> Result<VersionTag>;

    /// Downloads the payload for `key` to `path`, returning the version
    /// tag observed at download time.
    fn fetch_to_file(&self, key: &ObjectKey, path: &Path) -> Result<VersionTag>;

    /// Uploads the payload at `path` as `key`, returning the new version
    /// tag.
    fn store_from_file(&self, key: &ObjectKey, path: &Path) -> Result<VersionTag>;

    /// Best-effort delete; callers must not treat failure here as fatal
    /// (spec §4.4 truncate step 2).
    fn delete(&self, key: &ObjectKey) -> Result<()>;
}
