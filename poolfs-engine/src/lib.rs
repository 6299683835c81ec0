#![deny(clippy::all)]
#![allow(clippy::too_many_arguments)]

pub mod block_addr;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod keylock;
pub mod object_store;
pub mod reconciler;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use block_addr::{BlockAddress, BlockOffset, InodeId, ObjectKey};
pub use cache::BlockCache;
pub use catalog::{Catalog, Inode, ObjectRow};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use keylock::KeyLockRegistry;
pub use object_store::{ObjectStore, ObjectStoreError, VersionTag};
pub use reconciler::Reconciler;

pub use anyhow;
