use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration options recognized by the engine (spec §6).
///
/// `blocksize` is immutable after filesystem creation; the remaining
/// options may be adjusted across mounts. Loading this struct from a file
/// or command-line flags is the out-of-scope configuration loader (spec
/// §1); the engine only ever consumes an already-populated value.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bytes per block.
    pub blocksize: u64,

    /// Local cache byte budget.
    pub cachesize: u64,

    /// Directory for block files.
    pub cachedir: PathBuf,

    /// If true, keys derive from inode numbers only. If false, keys embed
    /// the pathname (legacy, discouraged). This crate only ever produces
    /// `obfuscate_keys = true` addressing (spec §4.5); the flag is kept so
    /// a catalog built under the legacy scheme can still be read.
    pub obfuscate_keys: bool,

    /// Reconciliation ceiling.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            blocksize: 4 * 1024 * 1024,
            cachesize: 256 * 1024 * 1024,
            cachedir: PathBuf::from("/var/lib/poolfs/cache"),
            obfuscate_keys: true,
            timeout: Duration::from_secs(30),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
