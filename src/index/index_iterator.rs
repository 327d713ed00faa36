use std::sync::Arc;

use crate::buffer::{BufferPool, Frame};
use crate::common::{IndexKey, PageId, RecordId, Result, INVALID_PAGE_ID};

use super::leaf_page::LeafNodeRef;

/// Cursor over the leaf chain in key order.
///
/// The iterator keeps its current leaf pinned for as long as it points at
/// it; advancing past the last slot releases the leaf and pins its
/// successor. Dropping the iterator releases the pin. The tree must not be
/// mutated while an iterator is live.
pub struct IndexIterator {
    pool: Arc<BufferPool>,
    frame: Arc<Frame>,
    page_id: PageId,
    index: usize,
}

impl IndexIterator {
    /// Pins `page_id` and positions the cursor at `index`.
    pub(crate) fn new(pool: Arc<BufferPool>, page_id: PageId, index: usize) -> Result<Self> {
        let frame = pool.fetch_page(page_id)?;
        Ok(Self {
            pool,
            frame,
            page_id,
            index,
        })
    }

    /// True once the cursor has moved past the last entry of the last leaf.
    pub fn is_end(&self) -> bool {
        let guard = self.frame.read_data();
        let leaf = LeafNodeRef::new(&guard[..]);
        self.index >= leaf.size() && leaf.next_page_id() == INVALID_PAGE_ID
    }

    /// The mapping under the cursor, or None when the cursor is past the
    /// current leaf's entries.
    pub fn current(&self) -> Option<(IndexKey, RecordId)> {
        let guard = self.frame.read_data();
        let leaf = LeafNodeRef::new(&guard[..]);
        if self.index < leaf.size() {
            Some(leaf.get_item(self.index))
        } else {
            None
        }
    }

    /// Moves the cursor one slot forward, hopping to the next leaf when the
    /// current one is exhausted.
    pub fn advance(&mut self) -> Result<()> {
        self.index += 1;
        self.skip_exhausted_leaf()
    }

    /// Yields the mapping under the cursor and advances, or None at the end.
    pub fn next(&mut self) -> Result<Option<(IndexKey, RecordId)>> {
        loop {
            if self.is_end() {
                return Ok(None);
            }
            match self.current() {
                Some(item) => {
                    self.advance()?;
                    return Ok(Some(item));
                }
                // Past the current leaf's entries but not at the end: a
                // successor exists (e.g. a seek landed one past the last
                // key of a leaf). Hop and retry.
                None => self.skip_exhausted_leaf()?,
            }
        }
    }

    /// While the cursor sits past the current leaf's entries and a
    /// successor leaf exists, swap the pin over to the successor.
    fn skip_exhausted_leaf(&mut self) -> Result<()> {
        loop {
            let next = {
                let guard = self.frame.read_data();
                let leaf = LeafNodeRef::new(&guard[..]);
                if self.index < leaf.size() {
                    return Ok(());
                }
                leaf.next_page_id()
            };
            if next == INVALID_PAGE_ID {
                return Ok(());
            }

            self.pool.unpin_page(self.page_id, false);
            self.frame = self.pool.fetch_page(next)?;
            self.page_id = next;
            self.index = 0;
        }
    }
}

impl Iterator for IndexIterator {
    type Item = Result<(IndexKey, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match IndexIterator::next(self) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl Drop for IndexIterator {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, false);
    }
}
