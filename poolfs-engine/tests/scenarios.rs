//! End-to-end scenarios against the full `Engine`, wired up with the
//! in-memory fixtures. blocksize = 16, cachesize = 64 throughout, matching
//! the sizes used to describe these scenarios.

use poolfs_engine::testing::{MemoryCatalog, MemoryObjectStore};
use poolfs_engine::{BlockAddress, BlockCache, Catalog, Engine, KeyLockRegistry, Reconciler};
use std::sync::Arc;
use std::time::Duration;

const BLOCKSIZE: u64 = 16;
const CACHESIZE: u64 = 64;

fn engine(
    store: Arc<MemoryObjectStore>,
    catalog: Arc<MemoryCatalog>,
    cachedir: &std::path::Path,
) -> (Engine, Arc<BlockCache>) {
    let cache = Arc::new(BlockCache::new(cachedir, CACHESIZE).unwrap());
    let reconciler = Arc::new(Reconciler::new(store, Duration::from_secs(5)));
    let engine = Engine::new(
        BLOCKSIZE,
        Arc::new(KeyLockRegistry::new()),
        cache.clone(),
        reconciler,
        catalog,
    );
    (engine, cache)
}

#[test]
fn s1_sparse_read_returns_zeroes_without_touching_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let catalog = Arc::new(MemoryCatalog::new());
    let (engine, _cache) = engine(store.clone(), catalog.clone(), dir.path());

    let bytes = engine.read(1, 5, 10).unwrap();
    assert_eq!(bytes, vec![0u8; 10]);
    assert!(catalog.get_object_row(&BlockAddress { inode: 1, offset: 0 }.key()).is_none());
}

#[test]
fn s2_split_write_crosses_block_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let catalog = Arc::new(MemoryCatalog::new());
    let (engine, _cache) = engine(store, catalog.clone(), dir.path());

    let payload = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

    let n1 = engine.write(1, 10, payload).unwrap();
    assert_eq!(n1, 6); // fills block 0 from offset 10 to 16

    let n2 = engine.write(1, 16, &payload[6..]).unwrap();
    assert_eq!(n2, 16); // fills block 1 entirely

    let n3 = engine.write(1, 32, &payload[22..]).unwrap();
    assert_eq!(n3, 4); // remaining tail in block 2

    assert_eq!(catalog.get_inode(1).size, 36);
    for offset in [0, 16, 32] {
        assert!(catalog
            .get_object_row(&BlockAddress { inode: 1, offset }.key())
            .is_some());
    }
}

#[test]
fn s3_propagation_retry_converges_without_damaging_the_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let catalog = Arc::new(MemoryCatalog::new());
    let (engine, cache) = engine(store.clone(), catalog.clone(), dir.path());

    engine.write(1, 0, b"hello-world-12345").unwrap();
    engine.fsync(1, false).unwrap();

    let key = BlockAddress { inode: 1, offset: 0 }.key();
    let row = catalog.get_object_row(&key).unwrap();
    let settled_tag = row.etag.clone().unwrap();

    // simulate the store lagging by one read before it returns the tag
    // the catalog already expects (which forces the eviction path to
    // re-fetch from disk rather than the store, so seed the store's
    // *current* slot to go stale-then-settle on the version it already
    // holds).
    store.seed_with_propagation_delay(
        &key,
        b"stale-payload-16",
        "stale",
        b"hello-world-12345",
        &settled_tag.0,
        1,
    );

    cache.drop_block(&key, &*catalog).unwrap();

    let bytes = engine.read(1, 0, 16).unwrap();
    assert_eq!(&bytes, b"hello-world-1234");
    assert!(!catalog.get_inode(1).damaged);
}

#[test]
fn s4_propagation_never_converging_damages_the_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let catalog = Arc::new(MemoryCatalog::new());
    let reconciler = Arc::new(Reconciler::new(store.clone(), Duration::from_millis(30)));
    let cache = Arc::new(BlockCache::new(dir.path(), CACHESIZE).unwrap());
    let engine = Engine::new(
        BLOCKSIZE,
        Arc::new(KeyLockRegistry::new()),
        cache.clone(),
        reconciler,
        catalog.clone(),
    );

    engine.write(1, 0, b"hello-world-12345").unwrap();
    engine.fsync(1, false).unwrap();

    let key = BlockAddress { inode: 1, offset: 0 }.key();
    store.seed_never_converging(&key, b"stale-payload-16");
    cache.drop_block(&key, &*catalog).unwrap();

    let result = engine.read(1, 0, 16);
    assert!(result.is_err());
    assert!(catalog.get_inode(1).damaged);
}

#[test]
fn s5_truncate_shrink_drops_trailing_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let catalog = Arc::new(MemoryCatalog::new());
    let (engine, _cache) = engine(store, catalog.clone(), dir.path());

    engine.write(1, 0, &[b'a'; 16]).unwrap();
    engine.write(1, 16, &[b'b'; 16]).unwrap();
    engine.write(1, 32, &[b'c'; 8]).unwrap();
    assert_eq!(catalog.get_inode(1).size, 40);

    engine.truncate(1, 20).unwrap();

    assert_eq!(catalog.get_inode(1).size, 20);
    assert!(catalog
        .get_object_row(&BlockAddress { inode: 1, offset: 32 }.key())
        .is_none());

    let bytes = engine.read(1, 20, 10).unwrap();
    assert_eq!(bytes, vec![0u8; 10]);
}

#[test]
fn s6_concurrent_fsync_and_write_preserves_the_later_payload() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let catalog = Arc::new(MemoryCatalog::new());
    let (engine, _cache) = engine(store, catalog.clone(), dir.path());

    engine.write(1, 0, b"before").unwrap();

    // fsync uploads "before"; a write lands logically "during" the
    // upload window in the sense that it happens after the dirty flag
    // was cleared but before the next fsync. Since our fixture store is
    // synchronous there is no real race window to land the write inside,
    // but the dirty-then-reset-then-dirty-again sequence is what the
    // invariant actually requires, so we exercise exactly that sequence.
    engine.fsync(1, false).unwrap();
    engine.write(1, 0, b"after!").unwrap();

    let key = BlockAddress { inode: 1, offset: 0 }.key();
    assert!(catalog.get_object_row(&key).unwrap().dirty);

    engine.fsync(1, false).unwrap();
    assert!(!catalog.get_object_row(&key).unwrap().dirty);

    let bytes = engine.read(1, 0, 6).unwrap();
    assert_eq!(&bytes, b"after!");
}

#[test]
fn write_fsync_evict_read_returns_the_written_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let catalog = Arc::new(MemoryCatalog::new());
    let keylocks = Arc::new(KeyLockRegistry::new());
    let reconciler = Arc::new(Reconciler::new(store.clone(), Duration::from_secs(5)));
    let cache = Arc::new(BlockCache::new(dir.path(), CACHESIZE).unwrap());
    let engine = Engine::new(
        BLOCKSIZE,
        keylocks.clone(),
        cache.clone(),
        reconciler.clone(),
        catalog.clone(),
    );

    engine.write(1, 0, b"roundtrip-bytes!").unwrap();
    engine.fsync(1, false).unwrap();

    let key = BlockAddress { inode: 1, offset: 0 }.key();
    cache
        .evict_until_free(CACHESIZE, &*catalog, &*keylocks, &*reconciler)
        .unwrap();
    assert!(!catalog.get_object_row(&key).unwrap().is_open);

    let bytes = engine.read(1, 0, 16).unwrap();
    assert_eq!(&bytes, b"roundtrip-bytes!");
}

#[test]
fn second_fsync_on_an_unchanged_block_performs_no_upload() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let catalog = Arc::new(MemoryCatalog::new());
    let (engine, _cache) = engine(store, catalog.clone(), dir.path());

    engine.write(1, 0, b"stable-content!!").unwrap();
    engine.fsync(1, false).unwrap();

    let key = BlockAddress { inode: 1, offset: 0 }.key();
    let row_after_first = catalog.get_object_row(&key).unwrap();
    assert!(!row_after_first.dirty);

    // unchanged since the first fsync: the second call must skip the row
    // entirely (dirty == false), so the store never issues a second PUT
    // and the recorded etag is untouched.
    engine.fsync(1, false).unwrap();
    let row_after_second = catalog.get_object_row(&key).unwrap();
    assert_eq!(row_after_first.etag, row_after_second.etag);
}

#[test]
fn truncate_to_the_same_length_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let catalog = Arc::new(MemoryCatalog::new());
    let (engine, _cache) = engine(store, catalog.clone(), dir.path());

    engine.write(1, 0, &[b'x'; 16]).unwrap();
    engine.write(1, 16, &[b'y'; 16]).unwrap();
    engine.write(1, 32, &[b'z'; 8]).unwrap();

    let overlap_key = BlockAddress { inode: 1, offset: 16 }.key();
    let removed_key = BlockAddress { inode: 1, offset: 32 }.key();

    engine.truncate(1, 20).unwrap();
    let size_once = catalog.get_inode(1).size;
    let overlap_row_once = catalog.get_object_row(&overlap_key).unwrap();

    engine.truncate(1, 20).unwrap();
    let size_twice = catalog.get_inode(1).size;
    let overlap_row_twice = catalog.get_object_row(&overlap_key).unwrap();

    assert_eq!(size_once, size_twice);
    assert_eq!(overlap_row_once.size, overlap_row_twice.size);
    assert!(catalog.get_object_row(&removed_key).is_none());
}
