use std::sync::Arc;

use log::debug;

use crate::buffer::{BufferPool, Frame};
use crate::common::{
    IndexKey, PageId, RecordId, Result, HEADER_PAGE_ID, INVALID_PAGE_ID, KEY_SIZE,
};
use crate::storage::page::{HeaderPage, HeaderPageRef};

use super::btree_page::{self, BTreePageMut, BTreePageRef, PageType};
use super::index_iterator::IndexIterator;
use super::internal_page::{InternalNode, InternalNodeRef};
use super::key_comparator::KeyComparator;
use super::leaf_page::{LeafNode, LeafNodeRef};

/// A B+tree index over unique fixed-width keys, stored one node per page
/// and driven entirely through the buffer pool.
///
/// The only in-memory state is the root page id; it is persisted in the
/// header page under the index name on every change. Nodes reference each
/// other by page id and every navigation re-enters the pool, so the
/// lifetime of any node access is bounded by a pin/unpin pair.
///
/// The tree is not safe for concurrent mutation; a higher layer must
/// serialize mutators (`insert`/`remove` take `&mut self`).
pub struct BPlusTree {
    index_name: String,
    root_page_id: PageId,
    pool: Arc<BufferPool>,
    comparator: Arc<dyn KeyComparator>,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl BPlusTree {
    /// Creates a new, empty tree. Nothing is written until the first insert.
    pub fn new(
        index_name: impl Into<String>,
        pool: Arc<BufferPool>,
        comparator: Arc<dyn KeyComparator>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Self {
        assert!(leaf_max_size >= 2);
        assert!(internal_max_size >= 3);

        Self {
            index_name: index_name.into(),
            root_page_id: INVALID_PAGE_ID,
            pool,
            comparator,
            leaf_max_size,
            internal_max_size,
        }
    }

    /// Opens an existing tree by looking its root up in the header page.
    /// An unknown name yields an empty tree.
    pub fn open(
        index_name: impl Into<String>,
        pool: Arc<BufferPool>,
        comparator: Arc<dyn KeyComparator>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let mut tree = Self::new(index_name, pool, comparator, leaf_max_size, internal_max_size);

        let frame = tree.pool.fetch_page(HEADER_PAGE_ID)?;
        tree.root_page_id = {
            let guard = frame.read_data();
            HeaderPageRef::new(&guard[..])
                .get_root_id(&tree.index_name)
                .unwrap_or(INVALID_PAGE_ID)
        };
        tree.pool.unpin_page(HEADER_PAGE_ID, false);

        Ok(tree)
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Point lookup. Returns the record for `key`, or None.
    pub fn get_value(&self, key: &IndexKey) -> Result<Option<RecordId>> {
        if self.is_empty() {
            return Ok(None);
        }

        let frame = self.find_leaf(key, false)?;
        let leaf_id = frame.page_id();

        let result = {
            let guard = frame.read_data();
            LeafNodeRef::new(&guard[..]).lookup(key, self.comparator.as_ref())
        };
        self.pool.unpin_page(leaf_id, false);

        Ok(result)
    }

    /// Inserts a unique key. Returns false (and changes nothing) when the
    /// key is already present.
    pub fn insert(&mut self, key: &IndexKey, value: RecordId) -> Result<bool> {
        if self.is_empty() {
            self.start_new_tree(key, value)?;
            return Ok(true);
        }

        let frame = self.find_leaf(key, false)?;
        let leaf_id = frame.page_id();

        let duplicate = {
            let guard = frame.read_data();
            LeafNodeRef::new(&guard[..])
                .lookup(key, self.comparator.as_ref())
                .is_some()
        };
        if duplicate {
            self.pool.unpin_page(leaf_id, false);
            return Ok(false);
        }

        let new_size = {
            let mut guard = frame.write_data();
            LeafNode::new(&mut guard[..]).insert(key, value, self.comparator.as_ref())
        };

        if new_size > self.leaf_max_size {
            let new_frame = self.split_leaf(&frame)?;
            let separator = {
                let guard = new_frame.read_data();
                LeafNodeRef::new(&guard[..]).key_at(0)
            };
            self.insert_into_parent(&frame, &separator, &new_frame)?;
        }

        self.pool.unpin_page(leaf_id, true);
        Ok(true)
    }

    /// Removes `key` if present. Underflowing nodes are rebalanced by
    /// coalescing with or borrowing from a sibling, cascading up to the
    /// root when necessary.
    pub fn remove(&mut self, key: &IndexKey) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let frame = self.find_leaf(key, false)?;
        let leaf_id = frame.page_id();

        let (new_size, min_size) = {
            let mut guard = frame.write_data();
            let mut leaf = LeafNode::new(&mut guard[..]);
            (
                leaf.remove_and_delete_record(key, self.comparator.as_ref()),
                leaf.min_size(),
            )
        };

        if new_size < min_size {
            self.coalesce_or_redistribute(frame)?;
        } else {
            self.pool.unpin_page(leaf_id, true);
        }
        Ok(())
    }

    /// Iterator over the whole tree in key order. None when empty.
    pub fn begin(&self) -> Result<Option<IndexIterator>> {
        if self.is_empty() {
            return Ok(None);
        }

        let frame = self.find_leaf(&[0u8; KEY_SIZE], true)?;
        let page_id = frame.page_id();

        let iter = IndexIterator::new(Arc::clone(&self.pool), page_id, 0)?;
        self.pool.unpin_page(page_id, false);
        Ok(Some(iter))
    }

    /// Iterator positioned at the first entry whose key is >= `key`.
    pub fn begin_at(&self, key: &IndexKey) -> Result<Option<IndexIterator>> {
        if self.is_empty() {
            return Ok(None);
        }

        let frame = self.find_leaf(key, false)?;
        let page_id = frame.page_id();

        let index = {
            let guard = frame.read_data();
            LeafNodeRef::new(&guard[..]).key_index(key, self.comparator.as_ref())
        };

        let iter = IndexIterator::new(Arc::clone(&self.pool), page_id, index)?;
        self.pool.unpin_page(page_id, false);
        Ok(Some(iter))
    }

    /// Iterator positioned at the last entry. `is_end()` remains the
    /// authoritative terminator; this is not a past-the-end sentinel.
    pub fn end(&self) -> Result<Option<IndexIterator>> {
        if self.is_empty() {
            return Ok(None);
        }

        let mut frame = self.find_leaf(&[0u8; KEY_SIZE], true)?;
        loop {
            let next = {
                let guard = frame.read_data();
                LeafNodeRef::new(&guard[..]).next_page_id()
            };
            if next == INVALID_PAGE_ID {
                break;
            }
            self.pool.unpin_page(frame.page_id(), false);
            frame = self.pool.fetch_page(next)?;
        }

        let page_id = frame.page_id();
        let index = {
            let guard = frame.read_data();
            LeafNodeRef::new(&guard[..]).size().saturating_sub(1)
        };

        let iter = IndexIterator::new(Arc::clone(&self.pool), page_id, index)?;
        self.pool.unpin_page(page_id, false);
        Ok(Some(iter))
    }

    /// Descends from the root to the leaf responsible for `key` (or the
    /// leftmost leaf), unpinning each internal node on the way down.
    /// Returns the still-pinned leaf frame. Callers check for the empty
    /// tree first.
    fn find_leaf(&self, key: &IndexKey, leftmost: bool) -> Result<Arc<Frame>> {
        debug_assert!(!self.is_empty());

        let mut page_id = self.root_page_id;
        loop {
            let frame = self.pool.fetch_page(page_id)?;
            let next = {
                let guard = frame.read_data();
                let page = BTreePageRef::new(&guard[..]);
                if page.is_leaf() {
                    None
                } else {
                    let node = InternalNodeRef::new(&guard[..]);
                    Some(if leftmost {
                        node.value_at(0)
                    } else {
                        node.lookup(key, self.comparator.as_ref())
                    })
                }
            };

            match next {
                None => return Ok(frame),
                Some(child) => {
                    self.pool.unpin_page(page_id, false);
                    page_id = child;
                }
            }
        }
    }

    /// First insert into an empty tree: a single leaf becomes the root and
    /// the header page gets the new record.
    fn start_new_tree(&mut self, key: &IndexKey, value: RecordId) -> Result<()> {
        let frame = self.pool.new_page()?;
        let page_id = frame.page_id();

        {
            let mut guard = frame.write_data();
            let mut leaf =
                LeafNode::init(&mut guard[..], page_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf.insert(key, value, self.comparator.as_ref());
        }

        self.root_page_id = page_id;
        self.update_root_page_id(true)?;
        self.pool.unpin_page(page_id, true);

        debug!("index {}: new tree rooted at {}", self.index_name, page_id);
        Ok(())
    }

    /// Splits an overflowing leaf. The new right leaf takes the upper half
    /// and is spliced into the sibling chain; it comes back pinned for
    /// `insert_into_parent` to consume.
    fn split_leaf(&mut self, frame: &Arc<Frame>) -> Result<Arc<Frame>> {
        let new_frame = self.pool.new_page()?;
        let new_id = new_frame.page_id();

        {
            let mut guard = frame.write_data();
            let mut leaf = LeafNode::new(&mut guard[..]);
            let mut new_guard = new_frame.write_data();
            let mut new_leaf = LeafNode::init(
                &mut new_guard[..],
                new_id,
                leaf.parent_page_id(),
                leaf.max_size(),
            );
            leaf.move_half_to(&mut new_leaf);
        }

        Ok(new_frame)
    }

    /// Splits an overflowing internal node; the moved children are
    /// reparented through the pool. The new node comes back pinned.
    fn split_internal(&mut self, frame: &Arc<Frame>) -> Result<Arc<Frame>> {
        let new_frame = self.pool.new_page()?;
        let new_id = new_frame.page_id();

        {
            let mut guard = frame.write_data();
            let mut node = InternalNode::new(&mut guard[..]);
            let mut new_guard = new_frame.write_data();
            let mut new_node = InternalNode::init(
                &mut new_guard[..],
                new_id,
                node.parent_page_id(),
                node.max_size(),
            );
            node.move_half_to(&mut new_node, &self.pool)?;
        }

        Ok(new_frame)
    }

    /// Hooks a freshly split-off node into the tree: either under the
    /// existing parent (splitting it recursively when it overflows) or
    /// under a brand-new root. Consumes the pin on `new_frame`; the pin on
    /// `old_frame` stays with the caller.
    fn insert_into_parent(
        &mut self,
        old_frame: &Arc<Frame>,
        key: &IndexKey,
        new_frame: &Arc<Frame>,
    ) -> Result<()> {
        let old_id = old_frame.page_id();
        let new_id = new_frame.page_id();

        if old_id == self.root_page_id {
            let root_frame = self.pool.new_page()?;
            let root_id = root_frame.page_id();

            {
                let mut guard = root_frame.write_data();
                let mut root = InternalNode::init(
                    &mut guard[..],
                    root_id,
                    INVALID_PAGE_ID,
                    self.internal_max_size,
                );
                root.populate_new_root(old_id, key, new_id);
            }
            {
                let mut guard = old_frame.write_data();
                BTreePageMut::new(&mut guard[..]).set_parent_page_id(root_id);
            }
            {
                let mut guard = new_frame.write_data();
                BTreePageMut::new(&mut guard[..]).set_parent_page_id(root_id);
            }

            self.root_page_id = root_id;
            self.update_root_page_id(false)?;
            self.pool.unpin_page(new_id, true);
            self.pool.unpin_page(root_id, true);

            debug!("index {}: root split, new root {}", self.index_name, root_id);
            return Ok(());
        }

        let parent_id = {
            let guard = old_frame.read_data();
            BTreePageRef::new(&guard[..]).parent_page_id()
        };
        let parent_frame = self.pool.fetch_page(parent_id)?;

        {
            let mut guard = new_frame.write_data();
            BTreePageMut::new(&mut guard[..]).set_parent_page_id(parent_id);
        }
        self.pool.unpin_page(new_id, true);

        let new_size = {
            let mut guard = parent_frame.write_data();
            InternalNode::new(&mut guard[..]).insert_node_after(old_id, key, new_id)
        };

        if new_size > self.internal_max_size {
            let split_frame = self.split_internal(&parent_frame)?;
            // The moved slot-0 key of the new node is the separator to push up
            let separator = {
                let guard = split_frame.read_data();
                InternalNodeRef::new(&guard[..]).key_at(0)
            };
            self.insert_into_parent(&parent_frame, &separator, &split_frame)?;
        }

        self.pool.unpin_page(parent_id, true);
        Ok(())
    }

    /// Restores the min-size invariant of an underflowing node, consuming
    /// its pin. Prefers the left sibling; the leftmost child borrows from
    /// (or merges with) its right sibling instead.
    fn coalesce_or_redistribute(&mut self, frame: Arc<Frame>) -> Result<()> {
        let page_id = frame.page_id();

        if page_id == self.root_page_id {
            return self.adjust_root(frame);
        }

        let (parent_id, node_size, node_max) = {
            let guard = frame.read_data();
            let page = BTreePageRef::new(&guard[..]);
            (page.parent_page_id(), page.size(), page.max_size())
        };

        let parent_frame = self.pool.fetch_page(parent_id)?;
        let (index, sibling_id, sibling_index) = {
            let guard = parent_frame.read_data();
            let parent = InternalNodeRef::new(&guard[..]);
            let index = parent
                .value_index(page_id)
                .expect("node missing from its parent");
            let sibling_index = if index == 0 { 1 } else { index - 1 };
            (index, parent.value_at(sibling_index), sibling_index)
        };

        let sibling_frame = self.pool.fetch_page(sibling_id)?;
        let sibling_size = {
            let guard = sibling_frame.read_data();
            BTreePageRef::new(&guard[..]).size()
        };

        if node_size + sibling_size <= node_max {
            // Merge into whichever of the pair sits on the left
            let (left, right, right_index) = if index == 0 {
                (frame, sibling_frame, sibling_index)
            } else {
                (sibling_frame, frame, index)
            };
            self.coalesce(left, right, parent_frame, right_index)
        } else {
            // The separator between the two siblings sits at the index of
            // the right-hand one
            let middle_index = if index == 0 { 1 } else { index };
            let middle_key = {
                let guard = parent_frame.read_data();
                InternalNodeRef::new(&guard[..]).key_at(middle_index)
            };
            self.pool.unpin_page(parent_id, false);
            self.redistribute(sibling_frame, frame, index, &middle_key)
        }
    }

    /// Merges `right` into `left`, removes the separator from the parent
    /// and deletes the emptied page. Consumes the pins on all three frames,
    /// recursing when the parent underflows in turn.
    fn coalesce(
        &mut self,
        left: Arc<Frame>,
        right: Arc<Frame>,
        parent: Arc<Frame>,
        right_index: usize,
    ) -> Result<()> {
        let left_id = left.page_id();
        let right_id = right.page_id();
        let parent_id = parent.page_id();

        let middle_key = {
            let guard = parent.read_data();
            InternalNodeRef::new(&guard[..]).key_at(right_index)
        };

        {
            let mut right_guard = right.write_data();
            let mut left_guard = left.write_data();
            if btree_page::page_type(&right_guard[..]) == PageType::Leaf {
                let mut right_node = LeafNode::new(&mut right_guard[..]);
                let mut left_node = LeafNode::new(&mut left_guard[..]);
                right_node.move_all_to(&mut left_node);
            } else {
                let mut right_node = InternalNode::new(&mut right_guard[..]);
                let mut left_node = InternalNode::new(&mut left_guard[..]);
                right_node.move_all_to(&mut left_node, &middle_key, &self.pool)?;
            }
        }

        self.pool.unpin_page(right_id, true);
        let deleted = self.pool.delete_page(right_id)?;
        debug_assert!(deleted, "merged-away page was still pinned");
        self.pool.unpin_page(left_id, true);

        let (parent_size, parent_min) = {
            let mut guard = parent.write_data();
            let mut node = InternalNode::new(&mut guard[..]);
            node.remove(right_index);
            (node.size(), node.min_size())
        };

        if parent_size < parent_min {
            self.coalesce_or_redistribute(parent)
        } else {
            self.pool.unpin_page(parent_id, true);
            Ok(())
        }
    }

    /// Moves one entry from `sibling` into `node`. `node_index` is the
    /// node's slot in the parent: 0 means the sibling is on the right and
    /// lends its first entry, otherwise the sibling is on the left and
    /// lends its last. Consumes the pins on both frames.
    fn redistribute(
        &mut self,
        sibling: Arc<Frame>,
        node: Arc<Frame>,
        node_index: usize,
        middle_key: &IndexKey,
    ) -> Result<()> {
        let sibling_id = sibling.page_id();
        let node_id = node.page_id();

        {
            let mut sibling_guard = sibling.write_data();
            let mut node_guard = node.write_data();
            if btree_page::page_type(&sibling_guard[..]) == PageType::Leaf {
                let mut sibling_node = LeafNode::new(&mut sibling_guard[..]);
                let mut node_node = LeafNode::new(&mut node_guard[..]);
                if node_index == 0 {
                    sibling_node.move_first_to_end_of(&mut node_node, &self.pool)?;
                } else {
                    sibling_node.move_last_to_front_of(&mut node_node, &self.pool)?;
                }
            } else {
                let mut sibling_node = InternalNode::new(&mut sibling_guard[..]);
                let mut node_node = InternalNode::new(&mut node_guard[..]);
                if node_index == 0 {
                    sibling_node.move_first_to_end_of(
                        &mut node_node,
                        middle_key,
                        &self.pool,
                        self.comparator.as_ref(),
                    )?;
                } else {
                    sibling_node.move_last_to_front_of(
                        &mut node_node,
                        middle_key,
                        &self.pool,
                        self.comparator.as_ref(),
                    )?;
                }
            }
        }

        self.pool.unpin_page(node_id, true);
        self.pool.unpin_page(sibling_id, true);
        Ok(())
    }

    /// Handles the root's special underflow cases, consuming the pin on the
    /// old root. An emptied root leaf ends the tree; an internal root left
    /// with a single child collapses onto it.
    fn adjust_root(&mut self, frame: Arc<Frame>) -> Result<()> {
        let root_id = frame.page_id();

        let (is_leaf, size) = {
            let guard = frame.read_data();
            let page = BTreePageRef::new(&guard[..]);
            (page.is_leaf(), page.size())
        };

        if is_leaf && size == 0 {
            self.pool.unpin_page(root_id, false);
            let deleted = self.pool.delete_page(root_id)?;
            debug_assert!(deleted, "empty root leaf was still pinned");

            self.root_page_id = INVALID_PAGE_ID;
            self.update_root_page_id(false)?;

            debug!("index {}: tree is now empty", self.index_name);
            return Ok(());
        }

        if !is_leaf && size == 1 {
            let child_id = {
                let mut guard = frame.write_data();
                InternalNode::new(&mut guard[..]).remove_and_return_only_child()
            };

            let child_frame = self.pool.fetch_page(child_id)?;
            {
                let mut guard = child_frame.write_data();
                BTreePageMut::new(&mut guard[..]).set_parent_page_id(INVALID_PAGE_ID);
            }

            self.root_page_id = child_id;
            self.update_root_page_id(false)?;
            self.pool.unpin_page(child_id, true);

            self.pool.unpin_page(root_id, false);
            let deleted = self.pool.delete_page(root_id)?;
            debug_assert!(deleted, "collapsed root was still pinned");

            debug!(
                "index {}: root collapsed onto {}",
                self.index_name, child_id
            );
            return Ok(());
        }

        self.pool.unpin_page(root_id, true);
        Ok(())
    }

    /// Persists the root page id in the header page. `insert_record` is set
    /// only when the record is first created.
    fn update_root_page_id(&self, insert_record: bool) -> Result<()> {
        let frame = self.pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut guard = frame.write_data();
            let mut header = HeaderPage::new(&mut guard[..]);
            let recorded = if insert_record {
                header.insert_record(&self.index_name, self.root_page_id)
            } else {
                header.update_record(&self.index_name, self.root_page_id)
            };
            assert!(
                recorded,
                "header page rejected root record for {}",
                self.index_name
            );
        }
        self.pool.unpin_page(HEADER_PAGE_ID, true);
        Ok(())
    }
}
