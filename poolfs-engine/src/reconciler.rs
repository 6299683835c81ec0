//! Moves object payloads between the local cache and the object store
//! under an eventual-consistency model (spec §4.3).

use crate::block_addr::BlockAddress;
use crate::catalog::Catalog;
use crate::error::{EngineError, Result};
use crate::object_store::{ObjectStore, VersionTag};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, warn};

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(10);
const RETRY_MULTIPLIER: f64 = 1.5;

pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Downloads the payload for `address` to `local_path`.
    ///
    /// If `prior_tag` is `Some`, the freshly downloaded tag must match it;
    /// on mismatch we enter the bounded exponential backoff retry loop
    /// described in spec §4.3 before giving up and marking the filesystem
    /// damaged.
    pub fn fetch(
        &self,
        address: BlockAddress,
        local_path: &Path,
        prior_tag: Option<&VersionTag>,
        catalog: &dyn Catalog,
    ) -> Result<VersionTag> {
        let key = address.key();
        let tag = self.store.fetch_to_file(&key, local_path)?;

        let prior = match prior_tag {
            None => return Ok(tag),
            Some(prior) if *prior == tag => return Ok(tag),
            Some(prior) => prior,
        };

        warn!(%key, "fetched version tag does not match catalog; retrying for propagation");

        let deadline = Instant::now() + self.timeout;
        let mut delay = INITIAL_RETRY_DELAY;
        loop {
            if Instant::now() >= deadline {
                error!(%key, "propagation did not converge before timeout; marking filesystem damaged");
                catalog.mark_damaged(address.inode);
                return Err(EngineError::PropagationTimeout { key });
            }

            thread::sleep(delay);
            delay = delay.mul_f64(RETRY_MULTIPLIER);

            let looked_up = self.store.lookup(&key)?;
            if looked_up == *prior {
                let tag = self.store.fetch_to_file(&key, local_path)?;
                return Ok(tag);
            }
        }
    }

    /// Uploads the payload at `local_path` as `address`'s object, returning
    /// the new version tag observed by the store.
    pub fn store(&self, address: BlockAddress, local_path: &Path) -> Result<VersionTag> {
        Ok(self.store.store_from_file(&address.key(), local_path)?)
    }

    /// Best-effort delete; failures are not propagated (spec §4.4 truncate
    /// step 2).
    pub fn delete_best_effort(&self, address: BlockAddress) {
        let key = address.key();
        if let Err(source) = self.store.delete(&key) {
            warn!(%key, %source, "best-effort delete of remote object failed");
        }
    }
}
