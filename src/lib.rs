//! Keel - the core of a disk-backed relational storage engine
//!
//! This crate provides the two tightly coupled subsystems at the heart of a
//! disk-oriented DBMS: a page cache (buffer pool) mediating all access to a
//! paginated backing store, and a B+tree index built entirely on top of it.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): disk I/O and well-known pages
//!   - `DiskManager`: reads/writes fixed-size pages, allocates identifiers
//!   - `DiskScheduler`: background worker processing page I/O requests
//!   - `HeaderPage`: page 0, maps index names to root page identifiers
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPool`: fetches pages into frames, pins them for callers and
//!     evicts the least recently used unpinned page under memory pressure
//!   - `LruReplacer`: strict LRU eviction policy
//!   - `Frame`: per-frame metadata and the page buffer itself
//!
//! - **Index** (`index`): the B+tree
//!   - `BPlusTree`: unique-key point lookup, insertion with recursive
//!     splits, deletion with coalesce/redistribute
//!   - `InternalNode`/`LeafNode`: layout adapters interpreting a raw frame
//!     as a tree node
//!   - `IndexIterator`: ordered iteration across the leaf chain
//!   - `KeyComparator`: pluggable total order over fixed-width keys
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keel::buffer::BufferPool;
//! use keel::index::{BPlusTree, IntegerComparator};
//! use keel::storage::disk::DiskManager;
//! use keel::{PageId, RecordId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let pool = Arc::new(BufferPool::new(64, disk_manager));
//!
//! let mut index = BPlusTree::new(
//!     "orders_pk",
//!     Arc::clone(&pool),
//!     Arc::new(IntegerComparator),
//!     32,
//!     32,
//! );
//!
//! let key = 42u64.to_le_bytes();
//! let rid = RecordId::new(PageId::new(7), SlotId::new(0));
//! index.insert(&key, rid).unwrap();
//! assert_eq!(index.get_value(&key).unwrap(), Some(rid));
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{IndexKey, KeelError, PageId, RecordId, Result, SlotId};
