/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Width in bytes of an index key
pub const KEY_SIZE: usize = 8;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// Well-known page holding the index name -> root page id records
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

use super::types::PageId;
