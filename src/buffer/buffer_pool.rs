use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, MutexGuard};

use crate::common::{FrameId, KeelError, PageId, Result, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{Frame, LruReplacer};

/// Bookkeeping shared by all pool operations. The mutex around this struct
/// is the single coarse latch: every public pool operation holds it from
/// entry to exit, which makes the operations linearizable.
struct PoolState {
    /// Page table: maps resident page IDs to frame IDs
    page_table: HashMap<PageId, FrameId>,
    /// Frames that currently hold no page
    free_list: VecDeque<FrameId>,
    /// LRU replacer for eviction decisions
    replacer: LruReplacer,
}

/// BufferPool mediates all access to the paginated backing store. It owns a
/// fixed array of frames, fetches pages from disk on demand, and evicts the
/// least recently used unpinned page when it needs room.
///
/// A successful `fetch_page`/`new_page` pins the frame; the caller must
/// balance it with exactly one `unpin_page`, passing `is_dirty = true` if it
/// mutated the page contents.
pub struct BufferPool {
    /// Number of frames in the buffer pool
    pool_size: usize,
    /// The buffer pool frames, created once at construction
    frames: Vec<Arc<Frame>>,
    /// State guarded by the pool latch
    state: Mutex<PoolState>,
    /// Disk scheduler for page I/O
    disk_scheduler: DiskScheduler,
}

impl BufferPool {
    /// Creates a new BufferPool with the given number of frames.
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        assert!(pool_size > 0);

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(Frame::new(frame_id)));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                replacer: LruReplacer::new(),
            }),
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Fetches the requested page into the pool, pinning it.
    ///
    /// On a page-table hit the pin count is bumped and the resident frame
    /// returned. Otherwise a frame is taken from the free list (back first)
    /// or evicted from the replacer, the victim is written back if dirty,
    /// and the page is read from disk. Fails with `BufferPoolFull` when
    /// every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<Frame>> {
        if page_id == INVALID_PAGE_ID {
            return Err(KeelError::InvalidPageId(page_id));
        }

        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.as_usize()];
            frame.pin();
            state.replacer.pin(frame_id);
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.acquire_free_frame(&mut state)?;
        let frame = &self.frames[frame_id.as_usize()];

        state.page_table.insert(page_id, frame_id);
        frame.set_page_id(page_id);
        frame.pin();
        state.replacer.pin(frame_id);

        // The frame buffer was zeroed when the frame was freed; fill it from
        // disk while still holding the latch so no one can see a half-read
        // page.
        let mut data = [0u8; PAGE_SIZE];
        self.disk_scheduler.schedule_read_sync(page_id, &mut data)?;
        frame.copy_from(&data);

        Ok(Arc::clone(frame))
    }

    /// Allocates a brand-new page and pins it in a frame.
    ///
    /// The victim frame is secured before asking the disk manager for a new
    /// page identifier, so a full pool cannot leak identifiers. The returned
    /// frame holds the new page id, a pin count of 1 and zeroed contents.
    pub fn new_page(&self) -> Result<Arc<Frame>> {
        let mut state = self.state.lock();

        let frame_id = self.acquire_free_frame(&mut state)?;
        let frame = &self.frames[frame_id.as_usize()];

        let page_id = self.disk_scheduler.disk_manager().allocate_page()?;

        state.page_table.insert(page_id, frame_id);
        frame.set_page_id(page_id);
        frame.pin();
        state.replacer.pin(frame_id);

        Ok(Arc::clone(frame))
    }

    /// Releases one pin on the page. When the count drops to zero the frame
    /// becomes an eviction candidate. The dirty hint is OR-ed into the
    /// frame's dirty flag, so a clean unpin can never hide an earlier
    /// mutation. Returns false when the page is not resident.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };

        let frame = &self.frames[frame_id.as_usize()];
        if is_dirty {
            frame.set_dirty(true);
        }
        if let Some(0) = frame.unpin() {
            state.replacer.unpin(frame_id);
        }
        true
    }

    /// Writes the page's frame back to disk and clears its dirty flag.
    /// Pin state is unaffected. Returns false for INVALID_PAGE_ID or a page
    /// that is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Ok(false);
        }

        let state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };

        self.write_frame(frame_id, page_id)?;
        Ok(true)
    }

    /// Deletes a page from the pool and the disk. Returns true when there is
    /// nothing to do (INVALID_PAGE_ID or not resident), false when the page
    /// is pinned. A dirty page is written back before its identifier is
    /// returned to the allocator.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Ok(true);
        }

        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(true);
        };

        let frame = &self.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Ok(false);
        }

        if frame.is_dirty() {
            self.write_frame(frame_id, page_id)?;
        }

        state.page_table.remove(&page_id);
        self.disk_scheduler.disk_manager().deallocate_page(page_id);
        state.replacer.pin(frame_id);
        frame.reset();
        state.free_list.push_back(frame_id);

        Ok(true)
    }

    /// Flushes every resident page to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let state = self.state.lock();

        for (&page_id, &frame_id) in state.page_table.iter() {
            self.write_frame(frame_id, page_id)?;
        }

        Ok(())
    }

    /// Returns the pin count of a resident page, or None if it is not in
    /// the pool.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|frame_id| self.frames[frame_id.as_usize()].pin_count())
    }

    /// Sum of pin counts across all frames. Zero whenever every caller has
    /// balanced its fetches with unpins.
    pub fn total_pin_count(&self) -> u32 {
        let _state = self.state.lock();
        self.frames.iter().map(|frame| frame.pin_count()).sum()
    }

    /// Returns the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of frames holding no page.
    pub fn free_frame_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    /// Returns a reference to the underlying DiskManager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_scheduler.disk_manager()
    }

    /// Secures a frame for a new occupant: the back of the free list first,
    /// then the replacer's LRU victim (written back first when dirty). The
    /// returned frame is reset: empty, unpinned, clean, zeroed.
    fn acquire_free_frame(&self, state: &mut MutexGuard<'_, PoolState>) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop_back() {
            return Ok(frame_id);
        }

        let Some(frame_id) = state.replacer.victim() else {
            return Err(KeelError::BufferPoolFull);
        };

        let frame = &self.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            self.write_frame(frame_id, old_page_id)?;
        }
        debug!("evicting page {} from frame {}", old_page_id, frame_id);

        state.page_table.remove(&old_page_id);
        frame.reset();

        Ok(frame_id)
    }

    /// Writes a frame's contents to disk at `page_id` and clears the dirty
    /// flag.
    fn write_frame(&self, frame_id: FrameId, page_id: PageId) -> Result<()> {
        let frame = &self.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        self.disk_scheduler.schedule_write_sync(page_id, &data)?;
        frame.set_dirty(false);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_pool(pool_size: usize) -> (BufferPool, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        (BufferPool::new(pool_size, dm), temp_file)
    }

    #[test]
    fn test_buffer_pool_new() {
        let (pool, _temp) = create_pool(10);
        assert_eq!(pool.pool_size(), 10);
        assert_eq!(pool.free_frame_count(), 10);
    }

    #[test]
    fn test_buffer_pool_new_page_is_pinned() {
        let (pool, _temp) = create_pool(10);

        let frame = pool.new_page().unwrap();
        let page_id = frame.page_id();

        assert_eq!(pool.pin_count(page_id), Some(1));
        assert_eq!(pool.free_frame_count(), 9);

        assert!(pool.unpin_page(page_id, false));
        assert_eq!(pool.pin_count(page_id), Some(0));
    }

    #[test]
    fn test_buffer_pool_fetch_hit_bumps_pin() {
        let (pool, _temp) = create_pool(10);

        let frame = pool.new_page().unwrap();
        let page_id = frame.page_id();

        let again = pool.fetch_page(page_id).unwrap();
        assert_eq!(again.page_id(), page_id);
        assert_eq!(pool.pin_count(page_id), Some(2));

        assert!(pool.unpin_page(page_id, false));
        assert!(pool.unpin_page(page_id, false));
        assert_eq!(pool.pin_count(page_id), Some(0));
    }

    #[test]
    fn test_buffer_pool_write_survives_eviction() {
        let (pool, _temp) = create_pool(1);

        let frame = pool.new_page().unwrap();
        let page_id = frame.page_id();
        {
            let mut guard = frame.write_data();
            guard[0] = 0xAB;
        }
        pool.unpin_page(page_id, true);
        drop(frame);

        // Force the only frame to turn over
        let other = pool.new_page().unwrap();
        let other_id = other.page_id();
        assert_eq!(pool.pin_count(page_id), None);
        pool.unpin_page(other_id, false);
        drop(other);

        let frame = pool.fetch_page(page_id).unwrap();
        assert_eq!(frame.read_data()[0], 0xAB);
        pool.unpin_page(page_id, false);
    }

    #[test]
    fn test_buffer_pool_full() {
        let (pool, _temp) = create_pool(2);

        let f1 = pool.new_page().unwrap();
        let f2 = pool.new_page().unwrap();

        assert!(matches!(pool.new_page(), Err(KeelError::BufferPoolFull)));
        assert!(matches!(
            pool.fetch_page(PageId::new(99)),
            Err(KeelError::BufferPoolFull)
        ));

        pool.unpin_page(f1.page_id(), false);
        pool.unpin_page(f2.page_id(), false);
        assert!(pool.new_page().is_ok());
    }

    #[test]
    fn test_buffer_pool_unpin_dirty_hint_is_sticky() {
        let (pool, _temp) = create_pool(1);

        let frame = pool.new_page().unwrap();
        let page_id = frame.page_id();
        {
            let mut guard = frame.write_data();
            guard[0] = 0xCD;
        }
        // Pin once more, then unpin dirty followed by clean: dirtiness must
        // survive the second unpin.
        let _extra = pool.fetch_page(page_id).unwrap();
        pool.unpin_page(page_id, true);
        pool.unpin_page(page_id, false);
        drop(frame);

        let other = pool.new_page().unwrap();
        pool.unpin_page(other.page_id(), false);
        drop(other);

        let frame = pool.fetch_page(page_id).unwrap();
        assert_eq!(frame.read_data()[0], 0xCD);
        pool.unpin_page(page_id, false);
    }

    #[test]
    fn test_buffer_pool_unpin_missing_page() {
        let (pool, _temp) = create_pool(2);
        assert!(!pool.unpin_page(PageId::new(42), false));
    }

    #[test]
    fn test_buffer_pool_flush() {
        let (pool, temp) = create_pool(10);

        let frame = pool.new_page().unwrap();
        let page_id = frame.page_id();
        {
            let mut guard = frame.write_data();
            guard[0] = 42;
        }
        pool.unpin_page(page_id, true);
        drop(frame);

        assert!(pool.flush_page(page_id).unwrap());
        assert!(!pool.flush_page(INVALID_PAGE_ID).unwrap());
        assert!(!pool.flush_page(PageId::new(9999)).unwrap());

        // A fresh pool over the same file sees the flushed bytes
        drop(pool);
        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let pool2 = BufferPool::new(10, dm);
        let frame = pool2.fetch_page(page_id).unwrap();
        assert_eq!(frame.read_data()[0], 42);
        pool2.unpin_page(page_id, false);
    }

    #[test]
    fn test_buffer_pool_delete_page() {
        let (pool, _temp) = create_pool(10);

        let frame = pool.new_page().unwrap();
        let page_id = frame.page_id();

        // Pinned pages cannot be deleted
        assert!(!pool.delete_page(page_id).unwrap());

        pool.unpin_page(page_id, false);
        drop(frame);
        assert!(pool.delete_page(page_id).unwrap());
        assert_eq!(pool.pin_count(page_id), None);
        assert_eq!(pool.free_frame_count(), 10);

        // Deleting again (or deleting INVALID) is a no-op success
        assert!(pool.delete_page(page_id).unwrap());
        assert!(pool.delete_page(INVALID_PAGE_ID).unwrap());
    }

    #[test]
    fn test_buffer_pool_lru_eviction_order() {
        let (pool, _temp) = create_pool(3);

        let mut page_ids = Vec::new();
        for _ in 0..3 {
            let frame = pool.new_page().unwrap();
            page_ids.push(frame.page_id());
        }
        // Unpin in order 1, 0, 2: page_ids[1] becomes least recently used
        pool.unpin_page(page_ids[1], false);
        pool.unpin_page(page_ids[0], false);
        pool.unpin_page(page_ids[2], false);

        let frame = pool.new_page().unwrap();
        assert_eq!(pool.pin_count(page_ids[1]), None);
        assert_eq!(pool.pin_count(page_ids[0]), Some(0));
        assert_eq!(pool.pin_count(page_ids[2]), Some(0));
        pool.unpin_page(frame.page_id(), false);
    }

    #[test]
    fn test_buffer_pool_free_list_used_before_eviction() {
        let (pool, _temp) = create_pool(2);

        let frame = pool.new_page().unwrap();
        let resident = frame.page_id();
        pool.unpin_page(resident, false);
        drop(frame);

        // One frame is still free; the resident page must not be evicted
        let frame = pool.new_page().unwrap();
        assert_eq!(pool.free_frame_count(), 0);
        assert_eq!(pool.pin_count(resident), Some(0));
        pool.unpin_page(frame.page_id(), false);
    }

    #[test]
    fn test_buffer_pool_flush_all() {
        let (pool, temp) = create_pool(4);

        let mut page_ids = Vec::new();
        for i in 0..3u8 {
            let frame = pool.new_page().unwrap();
            {
                let mut guard = frame.write_data();
                guard[0] = i + 1;
            }
            pool.unpin_page(frame.page_id(), true);
            page_ids.push(frame.page_id());
        }

        pool.flush_all_pages().unwrap();
        drop(pool);

        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let pool2 = BufferPool::new(4, dm);
        for (i, &page_id) in page_ids.iter().enumerate() {
            let frame = pool2.fetch_page(page_id).unwrap();
            assert_eq!(frame.read_data()[0], i as u8 + 1);
            pool2.unpin_page(page_id, false);
        }
    }
}
