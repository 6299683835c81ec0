//! Disk-backed cache of fixed-size block payloads, keyed by object name;
//! enforces a byte budget by least-recently-used eviction (spec §4.2).
//!
//! Every operation here assumes the caller already holds the key lock for
//! the block in question (spec §4.2 precondition). File handles are kept
//! only in this in-memory map — never in the catalog — per the
//! catalog-ownership design note in spec §9: the catalog row only records
//! whether a block is currently open.

use crate::block_addr::ObjectKey;
use crate::catalog::{Catalog, ObjectRow};
use crate::error::Result;
use crate::keylock::KeyLockRegistry;
use crate::reconciler::Reconciler;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::info;

/// Result of asking the cache for a block.
pub enum BlockLookup {
    Hit,
    Miss,
}

pub struct BlockCache {
    cachedir: PathBuf,
    budget: u64,
    handles: Mutex<HashMap<ObjectKey, File>>,
}

impl BlockCache {
    pub fn new(cachedir: impl Into<PathBuf>, budget: u64) -> io::Result<Self> {
        let cachedir = cachedir.into();
        std::fs::create_dir_all(&cachedir)?;
        Ok(Self {
            cachedir,
            budget,
            handles: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn local_path(&self, key: &ObjectKey) -> PathBuf {
        self.cachedir.join(key.cache_filename())
    }

    /// `open_block(key, create)` from spec §4.2.
    ///
    /// On a cache hit the existing handle is kept as-is. On a miss with an
    /// existing catalog row, the reconciler fetches the payload to local
    /// disk. On a miss with no row and `create`, a new empty block is
    /// allocated. Every call bumps the row's atime.
    pub fn open_block(
        &self,
        key: &ObjectKey,
        inode: crate::block_addr::InodeId,
        offset: crate::block_addr::BlockOffset,
        create: bool,
        blocksize: u64,
        catalog: &dyn Catalog,
        keylocks: &KeyLockRegistry,
        reconciler: &Reconciler,
    ) -> Result<BlockLookup> {
        if self.handles.lock().contains_key(key) {
            catalog.update_object_row(key, &mut |row| row.atime = SystemTime::now());
            return Ok(BlockLookup::Hit);
        }

        // the block about to be opened is, by definition, not among the
        // catalog's open rows yet, so eviction can never pick it as its
        // own victim and self-deadlock on its key lock.
        self.evict_until_free(blocksize, catalog, keylocks, reconciler)?;

        let path = self.local_path(key);

        let outcome = match catalog.get_object_row(key) {
            Some(row) => {
                let address = crate::block_addr::BlockAddress { inode, offset };
                let tag = reconciler.fetch(address, &path, row.etag.as_ref(), catalog)?;
                let file = OpenOptions::new().read(true).write(true).open(&path)?;
                self.handles.lock().insert(key.clone(), file);
                catalog.update_object_row(key, &mut |row| {
                    row.is_open = true;
                    row.dirty = false;
                    row.etag = Some(tag.clone());
                    row.atime = SystemTime::now();
                });
                BlockLookup::Hit
            }
            None if create => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)?;
                self.handles.lock().insert(key.clone(), file);
                catalog.insert_object_row(ObjectRow::new_open(key.clone(), inode, offset));
                BlockLookup::Hit
            }
            None => return Ok(BlockLookup::Miss),
        };

        Ok(outcome)
    }

    /// Runs `f` against the open local file for `key`. Panics if `key`
    /// isn't currently open — callers must call [`Self::open_block`] and
    /// observe [`BlockLookup::Hit`] first.
    pub fn with_file<R>(&self, key: &ObjectKey, f: impl FnOnce(&mut File) -> io::Result<R>) -> io::Result<R> {
        let mut handles = self.handles.lock();
        let file = handles
            .get_mut(key)
            .expect("with_file called without a prior open_block hit");
        f(file)
    }

    /// `mark_dirty(key)` from spec §4.2. Valid only while the block is
    /// cached (design note §9: mark-dirty is valid only on `Cached`).
    pub fn mark_dirty(&self, key: &ObjectKey, catalog: &dyn Catalog) {
        assert!(
            self.handles.lock().contains_key(key),
            "mark_dirty on a block with no open handle"
        );
        catalog.update_object_row(key, &mut |row| row.dirty = true);
    }

    /// `drop(key)` from spec §4.2: closes and unlinks the local file and
    /// removes the catalog row. Used by truncate.
    pub fn drop_block(&self, key: &ObjectKey, catalog: &dyn Catalog) -> io::Result<()> {
        self.handles.lock().remove(key);
        let path = self.local_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        catalog.update_object_row(key, &mut |row| {
            row.is_open = false;
        });
        Ok(())
    }

    /// `evict_until_free(bytes_needed)` from spec §4.2.
    pub fn evict_until_free(
        &self,
        bytes_needed: u64,
        catalog: &dyn Catalog,
        keylocks: &KeyLockRegistry,
        reconciler: &Reconciler,
    ) -> Result<()> {
        loop {
            let cached = catalog.cached_rows();
            let used: u64 = cached.iter().map(|row| row.size).sum();
            if used + bytes_needed <= self.budget {
                return Ok(());
            }

            let victim = cached
                .iter()
                .min_by(|a, b| a.atime.cmp(&b.atime).then_with(|| a.key.cmp(&b.key)))
                .cloned();

            let Some(victim) = victim else {
                // nothing left to evict but we're still over budget: the
                // budget is smaller than a single resident block. Nothing
                // more we can do here.
                return Ok(());
            };

            let _guard = keylocks.lock(victim.key.clone());

            // Information may have changed while we waited for the lock.
            let Some(row) = catalog.get_object_row(&victim.key) else {
                continue; // deleted out from under us, retry selection
            };
            if !row.is_open {
                continue; // already flushed by someone else, retry selection
            }

            let path = self.local_path(&victim.key);
            self.with_file(&victim.key, |file| file.sync_all())?;
            self.handles.lock().remove(&victim.key);

            if row.dirty {
                let address = crate::block_addr::BlockAddress {
                    inode: row.inode,
                    offset: row.offset,
                };
                let tag = reconciler.store(address, &path)?;
                catalog.update_object_row(&victim.key, &mut |row| {
                    row.dirty = false;
                    row.etag = Some(tag.clone());
                });
            }

            std::fs::remove_file(&path)?;
            catalog.update_object_row(&victim.key, &mut |row| {
                row.is_open = false;
            });
            info!(key = %victim.key, "evicted block from local cache");
        }
    }
}
