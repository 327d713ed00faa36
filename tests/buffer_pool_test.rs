//! Integration tests for the buffer pool

use std::sync::Arc;

use keel::buffer::BufferPool;
use keel::common::{KeelError, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use keel::storage::disk::DiskManager;
use tempfile::NamedTempFile;

fn create_pool(pool_size: usize) -> (Arc<BufferPool>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    (Arc::new(BufferPool::new(pool_size, dm)), temp_file)
}

#[test]
fn test_buffer_pool_basic_round_trip() {
    let (pool, _temp) = create_pool(10);

    let frame = pool.new_page().unwrap();
    let page_id = frame.page_id();
    {
        let mut guard = frame.write_data();
        guard[0] = 0xDE;
        guard[1] = 0xAD;
        guard[PAGE_SIZE - 1] = 0xEF;
    }
    pool.unpin_page(page_id, true);
    drop(frame);

    let frame = pool.fetch_page(page_id).unwrap();
    {
        let guard = frame.read_data();
        assert_eq!(guard[0], 0xDE);
        assert_eq!(guard[1], 0xAD);
        assert_eq!(guard[PAGE_SIZE - 1], 0xEF);
    }
    pool.unpin_page(page_id, false);
}

#[test]
fn test_buffer_pool_pin_accounting() {
    // Fetch the same page twice, unpin twice: the pin count returns to 0
    // and the frame becomes evictable.
    let (pool, _temp) = create_pool(3);

    let frame = pool.new_page().unwrap();
    let page_id = frame.page_id();
    drop(frame);
    assert_eq!(pool.pin_count(page_id), Some(1));

    let f1 = pool.fetch_page(page_id).unwrap();
    assert_eq!(pool.pin_count(page_id), Some(2));
    drop(f1);

    assert!(pool.unpin_page(page_id, false));
    assert!(pool.unpin_page(page_id, false));
    assert_eq!(pool.pin_count(page_id), Some(0));
    assert_eq!(pool.total_pin_count(), 0);

    // Fill the rest of the pool and force one eviction: the page goes
    let others: Vec<_> = (0..3).map(|_| pool.new_page().unwrap()).collect();
    assert_eq!(pool.pin_count(page_id), None);
    for frame in others {
        pool.unpin_page(frame.page_id(), false);
    }
}

#[test]
fn test_buffer_pool_all_frames_pinned() {
    let (pool, _temp) = create_pool(2);

    let f1 = pool.new_page().unwrap();
    let f2 = pool.new_page().unwrap();

    assert!(matches!(pool.new_page(), Err(KeelError::BufferPoolFull)));

    pool.unpin_page(f1.page_id(), false);
    pool.unpin_page(f2.page_id(), false);
    drop(f1);
    drop(f2);

    let f3 = pool.new_page().unwrap();
    pool.unpin_page(f3.page_id(), false);
}

#[test]
fn test_buffer_pool_eviction_is_lru() {
    let (pool, _temp) = create_pool(3);

    let mut page_ids = Vec::new();
    for _ in 0..3 {
        let frame = pool.new_page().unwrap();
        page_ids.push(frame.page_id());
    }

    pool.unpin_page(page_ids[2], false);
    pool.unpin_page(page_ids[0], false);
    pool.unpin_page(page_ids[1], false);

    // First eviction takes page_ids[2], the least recently unpinned
    let extra1 = pool.new_page().unwrap();
    assert_eq!(pool.pin_count(page_ids[2]), None);
    assert_eq!(pool.pin_count(page_ids[0]), Some(0));

    // Second takes page_ids[0]
    let extra2 = pool.new_page().unwrap();
    assert_eq!(pool.pin_count(page_ids[0]), None);
    assert_eq!(pool.pin_count(page_ids[1]), Some(0));

    pool.unpin_page(extra1.page_id(), false);
    pool.unpin_page(extra2.page_id(), false);
}

#[test]
fn test_buffer_pool_dirty_page_written_back_on_eviction() {
    let (pool, _temp) = create_pool(1);

    let frame = pool.new_page().unwrap();
    let page_id = frame.page_id();
    {
        let mut guard = frame.write_data();
        guard[123] = 45;
    }
    pool.unpin_page(page_id, true);
    drop(frame);

    // Turn the single frame over twice
    for _ in 0..2 {
        let frame = pool.new_page().unwrap();
        pool.unpin_page(frame.page_id(), false);
    }

    let frame = pool.fetch_page(page_id).unwrap();
    assert_eq!(frame.read_data()[123], 45);
    pool.unpin_page(page_id, false);
}

#[test]
fn test_buffer_pool_delete_semantics() {
    let (pool, _temp) = create_pool(4);

    let frame = pool.new_page().unwrap();
    let page_id = frame.page_id();

    // Pinned: refused
    assert!(!pool.delete_page(page_id).unwrap());

    pool.unpin_page(page_id, true);
    drop(frame);

    // Unpinned: deleted, frame returns to the free list
    let free_before = pool.free_frame_count();
    assert!(pool.delete_page(page_id).unwrap());
    assert_eq!(pool.free_frame_count(), free_before + 1);
    assert_eq!(pool.pin_count(page_id), None);

    // Not resident / INVALID: trivially true
    assert!(pool.delete_page(page_id).unwrap());
    assert!(pool.delete_page(INVALID_PAGE_ID).unwrap());

    // The deallocated identifier is recycled by the allocator
    let frame = pool.new_page().unwrap();
    assert_eq!(frame.page_id(), page_id);
    pool.unpin_page(page_id, false);
}

#[test]
fn test_buffer_pool_flush_semantics() {
    let (pool, _temp) = create_pool(4);

    assert!(!pool.flush_page(INVALID_PAGE_ID).unwrap());
    assert!(!pool.flush_page(PageId::new(999)).unwrap());

    let frame = pool.new_page().unwrap();
    let page_id = frame.page_id();
    {
        let mut guard = frame.write_data();
        guard[0] = 1;
    }
    pool.unpin_page(page_id, true);
    drop(frame);

    // Flush does not change pin state or residency
    assert!(pool.flush_page(page_id).unwrap());
    assert_eq!(pool.pin_count(page_id), Some(0));
}

#[test]
fn test_buffer_pool_persistence_across_instances() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let page_id;
    {
        let dm = Arc::new(DiskManager::new(&path).unwrap());
        let pool = BufferPool::new(4, dm);
        let frame = pool.new_page().unwrap();
        page_id = frame.page_id();
        {
            let mut guard = frame.write_data();
            guard[7] = 77;
        }
        pool.unpin_page(page_id, true);
        drop(frame);
        pool.flush_all_pages().unwrap();
    }

    let dm = Arc::new(DiskManager::new(&path).unwrap());
    let pool = BufferPool::new(4, dm);
    let frame = pool.fetch_page(page_id).unwrap();
    assert_eq!(frame.read_data()[7], 77);
    pool.unpin_page(page_id, false);
}
