//! In-memory fixtures for exercising the engine without a network or a
//! real catalog, patterned on the teacher's
//! `backends::test::InMemoryBackend`.

use crate::block_addr::{BlockOffset, InodeId, ObjectKey};
use crate::catalog::{Catalog, Inode, ObjectRow};
use crate::object_store::{ObjectStore, ObjectStoreError, Result as StoreResult, VersionTag};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::time::SystemTime;

struct ObjectSlot {
    bytes: Vec<u8>,
    tag: VersionTag,
    stale_bytes: Vec<u8>,
    stale_tag: VersionTag,
    stale_reads_remaining: u32,
}

impl ObjectSlot {
    fn settled(bytes: Vec<u8>, tag: VersionTag) -> Self {
        Self {
            stale_bytes: bytes.clone(),
            stale_tag: tag.clone(),
            bytes,
            tag,
            stale_reads_remaining: 0,
        }
    }

    /// Consumes one access; returns the stale view while reads remain,
    /// then the settled view forever after.
    fn access(&mut self) -> (&[u8], VersionTag) {
        if self.stale_reads_remaining > 0 {
            self.stale_reads_remaining -= 1;
            (&self.stale_bytes, self.stale_tag.clone())
        } else {
            (&self.bytes, self.tag.clone())
        }
    }
}

/// An in-memory object store that can simulate propagation delay: after a
/// write, `lookup`/`fetch_to_file` can be told to return a stale version
/// tag for a fixed number of accesses before settling (spec §8 scenarios
/// S3/S4).
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<ObjectKey, ObjectSlot>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `key` with settled content; every access returns it.
    pub fn seed(&self, key: &ObjectKey, bytes: &[u8], tag: impl Into<String>) {
        self.objects.lock().insert(
            key.clone(),
            ObjectSlot::settled(bytes.to_vec(), VersionTag(tag.into())),
        );
    }

    /// Seeds `key` so that the first `stale_reads` accesses (lookups or
    /// fetches) observe `(stale_bytes, stale_tag)`, and every access after
    /// that observes `(fresh_bytes, fresh_tag)`.
    pub fn seed_with_propagation_delay(
        &self,
        key: &ObjectKey,
        stale_bytes: &[u8],
        stale_tag: impl Into<String>,
        fresh_bytes: &[u8],
        fresh_tag: impl Into<String>,
        stale_reads: u32,
    ) {
        self.objects.lock().insert(
            key.clone(),
            ObjectSlot {
                bytes: fresh_bytes.to_vec(),
                tag: VersionTag(fresh_tag.into()),
                stale_bytes: stale_bytes.to_vec(),
                stale_tag: VersionTag(stale_tag.into()),
                stale_reads_remaining: stale_reads,
            },
        );
    }

    /// Seeds `key` so that it never converges: every access forever
    /// returns the stale view (spec §8 scenario S4).
    pub fn seed_never_converging(&self, key: &ObjectKey, stale_bytes: &[u8]) {
        self.seed_with_propagation_delay(
            key,
            stale_bytes,
            "stale-forever",
            stale_bytes,
            "unreachable-settled",
            u32::MAX,
        );
    }
}

impl ObjectStore for MemoryObjectStore {
    fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectKey>> {
        Ok(self
            .objects
            .lock()
            .keys()
            .filter(|k| k.as_str().starts_with(prefix))
            .cloned()
            .collect())
    }

    fn lookup(&self, key: &ObjectKey) -> StoreResult<VersionTag> {
        let mut objects = self.objects.lock();
        let slot = objects
            .get_mut(key)
            .ok_or_else(|| ObjectStoreError::NotFound { key: key.clone() })?;
        Ok(slot.access().1)
    }

    fn fetch_to_file(&self, key: &ObjectKey, path: &Path) -> StoreResult<VersionTag> {
        let mut objects = self.objects.lock();
        let slot = objects
            .get_mut(key)
            .ok_or_else(|| ObjectStoreError::NotFound { key: key.clone() })?;
        let (bytes, tag) = slot.access();
        std::fs::write(path, bytes)?;
        Ok(tag)
    }

    fn store_from_file(&self, key: &ObjectKey, path: &Path) -> StoreResult<VersionTag> {
        let bytes = std::fs::read(path)?;
        let mut objects = self.objects.lock();
        let next_tag = objects
            .get(key)
            .map(|slot| slot.tag.0.parse::<u64>().unwrap_or(0) + 1)
            .unwrap_or(1);
        let tag = VersionTag(next_tag.to_string());
        objects.insert(key.clone(), ObjectSlot::settled(bytes, tag.clone()));
        Ok(tag)
    }

    fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        self.objects.lock().remove(key);
        Ok(())
    }
}

#[derive(Default)]
struct CatalogState {
    objects: HashMap<ObjectKey, ObjectRow>,
    inodes: HashMap<InodeId, Inode>,
}

/// An in-memory catalog, guarded by a single mutex the way the cache's
/// test fixtures guard their state (spec §6 catalog interface).
#[derive(Default)]
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn inode_mut<'a>(state: &'a mut CatalogState, id: InodeId) -> &'a mut Inode {
        state.inodes.entry(id).or_insert_with(|| Inode {
            id,
            size: 0,
            atime: SystemTime::now(),
            mtime: SystemTime::now(),
            ctime: SystemTime::now(),
            damaged: false,
        })
    }
}

impl Catalog for MemoryCatalog {
    fn get_object_row(&self, key: &ObjectKey) -> Option<ObjectRow> {
        self.state.lock().objects.get(key).cloned()
    }

    fn insert_object_row(&self, row: ObjectRow) {
        self.state.lock().objects.insert(row.key.clone(), row);
    }

    fn update_object_row(&self, key: &ObjectKey, f: &mut dyn FnMut(&mut ObjectRow)) {
        if let Some(row) = self.state.lock().objects.get_mut(key) {
            f(row);
        }
    }

    fn take_object_rows_from(&self, inode: InodeId, from_offset: BlockOffset) -> Vec<ObjectRow> {
        let mut state = self.state.lock();
        let matching: Vec<ObjectKey> = state
            .objects
            .values()
            .filter(|row| row.inode == inode && row.offset >= from_offset)
            .map(|row| row.key.clone())
            .collect();

        matching
            .into_iter()
            .filter_map(|key| state.objects.remove(&key))
            .collect()
    }

    fn object_rows_after(&self, inode: InodeId, than_offset: BlockOffset) -> Vec<ObjectRow> {
        self.state
            .lock()
            .objects
            .values()
            .filter(|row| row.inode == inode && row.offset > than_offset)
            .cloned()
            .collect()
    }

    fn object_rows_for_inode(&self, inode: InodeId) -> Vec<ObjectRow> {
        self.state
            .lock()
            .objects
            .values()
            .filter(|row| row.inode == inode)
            .cloned()
            .collect()
    }

    fn cached_rows(&self) -> Vec<ObjectRow> {
        self.state
            .lock()
            .objects
            .values()
            .filter(|row| row.is_open)
            .cloned()
            .collect()
    }

    fn get_inode(&self, id: InodeId) -> Inode {
        let mut state = self.state.lock();
        *Self::inode_mut(&mut state, id)
    }

    fn update_inode_size(&self, id: InodeId, size: u64) {
        let mut state = self.state.lock();
        Self::inode_mut(&mut state, id).size = size;
    }

    fn touch_inode(
        &self,
        id: InodeId,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
        ctime: Option<SystemTime>,
    ) {
        let mut state = self.state.lock();
        let inode = Self::inode_mut(&mut state, id);
        if let Some(atime) = atime {
            inode.atime = atime;
        }
        if let Some(mtime) = mtime {
            inode.mtime = mtime;
        }
        if let Some(ctime) = ctime {
            inode.ctime = ctime;
        }
    }

    fn mark_damaged(&self, id: InodeId) {
        let mut state = self.state.lock();
        Self::inode_mut(&mut state, id).damaged = true;
    }
}
