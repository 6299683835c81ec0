//! The metadata catalog interface (spec §6): a transactional key/value
//! store consulted by the engine but owned and implemented elsewhere.
//! This crate only depends on the typed operations the engine actually
//! issues against the `s3_objects` and `inodes` tables.

use crate::block_addr::{BlockOffset, InodeId, ObjectKey};
use crate::object_store::VersionTag;
use std::time::SystemTime;

/// A row of the `s3_objects` table.
#[derive(Clone, Debug)]
pub struct ObjectRow {
    pub key: ObjectKey,
    pub inode: InodeId,
    pub offset: BlockOffset,
    /// `true` iff the cache holds an open local file handle for this row
    /// (spec §9 design note: the live fd itself is never catalog state,
    /// only this boolean, restored to `false` on startup).
    pub is_open: bool,
    pub dirty: bool,
    pub size: u64,
    pub atime: SystemTime,
    pub etag: Option<VersionTag>,
}

impl ObjectRow {
    pub fn new_open(key: ObjectKey, inode: InodeId, offset: BlockOffset) -> Self {
        Self {
            key,
            inode,
            offset,
            is_open: true,
            dirty: true,
            size: 0,
            atime: SystemTime::now(),
            etag: None,
        }
    }
}

/// A row of the `inodes` table; only the columns the engine touches.
#[derive(Clone, Copy, Debug)]
pub struct Inode {
    pub id: InodeId,
    pub size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    /// Sticky bit set once the filesystem has failed an integrity check
    /// (spec §7); blocks subsequent mounts until cleared offline.
    pub damaged: bool,
}

/// The catalog operations the engine issues. Implementations own their
/// own transactional isolation; the core uses no catalog-specific
/// features beyond the methods below (spec §6).
pub trait Catalog: Send + Sync {
    fn get_object_row(&self, key: &ObjectKey) -> Option<ObjectRow>;
    fn insert_object_row(&self, row: ObjectRow);
    fn update_object_row(&self, key: &ObjectKey, f: &mut dyn FnMut(&mut ObjectRow));

    /// Atomically reads and removes every row for `inode` with
    /// `offset >= from_offset`. The read-then-delete must happen as one
    /// transaction so a concurrent writer cannot resurrect a block
    /// between the two steps (spec §4.4 truncate step 1).
    fn take_object_rows_from(&self, inode: InodeId, from_offset: BlockOffset) -> Vec<ObjectRow>;

    /// Rows for `inode` whose offset is strictly greater than
    /// `than_offset`; used by `write` to decide whether the inode's size
    /// column should move (spec §4.4 write step 6).
    fn object_rows_after(&self, inode: InodeId, than_offset: BlockOffset) -> Vec<ObjectRow>;

    /// Every row for `inode`, regardless of offset; used by `fsync` to
    /// find every dirty block (spec §4.4 fsync).
    fn object_rows_for_inode(&self, inode: InodeId) -> Vec<ObjectRow>;

    /// All rows currently backed by an open local file, for eviction
    /// accounting (spec §4.2 `evict_until_free`).
    fn cached_rows(&self) -> Vec<ObjectRow>;

    fn get_inode(&self, id: InodeId) -> Inode;
    fn update_inode_size(&self, id: InodeId, size: u64);
    fn touch_inode(
        &self,
        id: InodeId,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
        ctime: Option<SystemTime>,
    );

    fn mark_damaged(&self, id: InodeId);
}
