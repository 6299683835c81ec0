//! The File I/O Engine (spec §4.4): the six operations a filesystem
//! binding calls per open file, composed from the key-lock registry, the
//! block cache, the reconciler, and the catalog.

use crate::block_addr::{BlockAddress, InodeId};
use crate::cache::{BlockCache, BlockLookup};
use crate::catalog::{Catalog, Inode};
use crate::error::{EngineError, Result};
use crate::keylock::KeyLockRegistry;
use crate::reconciler::Reconciler;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::instrument;

/// Shared, cloneable handle onto one mounted filesystem's engine state.
/// One `Engine` typically backs every open file of a mount; `inode`
/// identifies which file a given caller is operating on.
#[derive(Clone)]
pub struct Engine {
    blocksize: u64,
    keylocks: Arc<KeyLockRegistry>,
    cache: Arc<BlockCache>,
    reconciler: Arc<Reconciler>,
    catalog: Arc<dyn Catalog>,
}

impl Engine {
    pub fn new(
        blocksize: u64,
        keylocks: Arc<KeyLockRegistry>,
        cache: Arc<BlockCache>,
        reconciler: Arc<Reconciler>,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        Self {
            blocksize,
            keylocks,
            cache,
            reconciler,
            catalog,
        }
    }

    fn check_not_damaged(&self, inode: InodeId) -> Result<()> {
        if self.catalog.get_inode(inode).damaged {
            return Err(EngineError::FilesystemDamaged);
        }
        Ok(())
    }

    /// `read(length, offset)` from spec §4.4.
    #[instrument(skip(self))]
    pub fn read(&self, inode: InodeId, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.check_not_damaged(inode)?;

        let address = BlockAddress::containing(inode, offset, self.blocksize);
        let block_end = address.offset + self.blocksize;
        let length = if offset + length as u64 > block_end {
            (block_end - offset) as usize
        } else {
            length
        };

        let key = address.key();
        let _guard = self.keylocks.lock(key.clone());

        let lookup = self
            .cache
            .open_block(&key, inode, address.offset, false, self.blocksize, &*self.catalog, &self.keylocks, &self.reconciler)?;

        let result = match lookup {
            BlockLookup::Miss => vec![0u8; length],
            BlockLookup::Hit => {
                let local_offset = offset - address.offset;
                self.cache.with_file(&key, |file| {
                    let file_len = file.metadata()?.len();
                    if local_offset >= file_len {
                        return Ok(vec![0u8; length]);
                    }
                    file.seek(SeekFrom::Start(local_offset))?;
                    let mut buf = vec![0u8; length];
                    let n = file.read(&mut buf)?;
                    buf.truncate(n);
                    buf.resize(length, 0);
                    Ok(buf)
                })?
            }
        };

        self.catalog.touch_inode(inode, Some(SystemTime::now()), None, None);
        Ok(result)
    }

    /// `write(buffer, offset)` from spec §4.4.
    #[instrument(skip(self, buffer))]
    pub fn write(&self, inode: InodeId, offset: u64, buffer: &[u8]) -> Result<usize> {
        self.check_not_damaged(inode)?;

        let address = BlockAddress::containing(inode, offset, self.blocksize);
        let maxwrite = (address.offset + self.blocksize - offset) as usize;
        let to_write = buffer.len().min(maxwrite);

        let key = address.key();
        let _guard = self.keylocks.lock(key.clone());

        self.cache
            .open_block(&key, inode, address.offset, true, self.blocksize, &*self.catalog, &self.keylocks, &self.reconciler)?;

        let local_offset = offset - address.offset;
        let new_local_size = self.cache.with_file(&key, |file| {
            file.seek(SeekFrom::Start(local_offset))?;
            file.write_all(&buffer[..to_write])?;
            Ok(file.metadata()?.len())
        })?;

        self.catalog
            .update_object_row(&key, &mut |row| row.size = new_local_size);

        if self.catalog.object_rows_after(inode, address.offset).is_empty() {
            let new_inode_size = address.offset + new_local_size;
            self.catalog.update_inode_size(inode, new_inode_size);
            self.catalog.touch_inode(inode, None, None, Some(SystemTime::now()));
        }

        self.cache.mark_dirty(&key, &*self.catalog);
        self.catalog.touch_inode(inode, None, Some(SystemTime::now()), None);

        Ok(to_write)
    }

    /// `truncate(new_length)` from spec §4.4.
    #[instrument(skip(self))]
    pub fn truncate(&self, inode: InodeId, new_length: u64) -> Result<()> {
        self.check_not_damaged(inode)?;

        let removed = self.catalog.take_object_rows_from(inode, new_length);
        for row in removed {
            self.cache.drop_block(&row.key, &*self.catalog)?;
            let address = BlockAddress {
                inode: row.inode,
                offset: row.offset,
            };
            self.reconciler.delete_best_effort(address);
        }

        if new_length == 0 {
            self.catalog.update_inode_size(inode, 0);
            self.catalog.touch_inode(inode, None, Some(SystemTime::now()), None);
            return Ok(());
        }

        let address = BlockAddress::containing(inode, new_length - 1, self.blocksize);
        let key = address.key();
        let _guard = self.keylocks.lock(key.clone());

        // `create=true` is harmless when the row already survived step 1;
        // `open_block` only allocates a fresh block when none exists.
        self.cache
            .open_block(&key, inode, address.offset, true, self.blocksize, &*self.catalog, &self.keylocks, &self.reconciler)?;

        let local_new_length = new_length - address.offset;
        let local_cur_length = self.cache.with_file(&key, |file| Ok(file.metadata()?.len()))?;

        if new_length > address.offset + local_cur_length {
            // extending: materialize a sparse tail by writing the last byte.
            self.cache.with_file(&key, |file| {
                file.seek(SeekFrom::Start(local_new_length - 1))?;
                file.write_all(&[0u8])
            })?;
        } else {
            self.cache.with_file(&key, |file| file.set_len(local_new_length))?;
        }

        self.catalog
            .update_object_row(&key, &mut |row| row.size = local_new_length);
        self.cache.mark_dirty(&key, &*self.catalog);
        self.catalog.update_inode_size(inode, new_length);
        self.catalog.touch_inode(inode, None, Some(SystemTime::now()), None);

        Ok(())
    }

    /// `fsync(dataonly)` from spec §4.4. Does not take any key lock; the
    /// dirty flag is cleared before the upload begins so a racing writer's
    /// `mark_dirty` under its own key-lock hold is never lost (spec
    /// rationale in §4.4).
    #[instrument(skip(self))]
    pub fn fsync(&self, inode: InodeId, _dataonly: bool) -> Result<()> {
        self.check_not_damaged(inode)?;

        for row in self.catalog.object_rows_for_inode(inode) {
            if !row.dirty || !row.is_open {
                continue;
            }

            self.catalog
                .update_object_row(&row.key, &mut |row| row.dirty = false);

            self.cache.with_file(&row.key, |file| file.sync_all())?;

            let address = BlockAddress {
                inode: row.inode,
                offset: row.offset,
            };
            let path = self.cache.local_path(&row.key);
            let tag = self.reconciler.store(address, &path)?;
            self.catalog
                .update_object_row(&row.key, &mut |row| row.etag = Some(tag.clone()));
        }

        Ok(())
    }

    /// `flush`: equivalent to `fsync(false)` (spec §4.4).
    pub fn flush(&self, inode: InodeId) -> Result<()> {
        self.fsync(inode, false)
    }

    /// `release`: no-op (spec §4.4).
    pub fn release(&self, _inode: InodeId) -> Result<()> {
        Ok(())
    }

    /// `fgetattr`: delegates to the catalog (spec §4.4).
    pub fn fgetattr(&self, inode: InodeId) -> Result<Inode> {
        Ok(self.catalog.get_inode(inode))
    }
}
