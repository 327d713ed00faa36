pub mod b_plus_tree;
pub mod btree_page;
pub mod index_iterator;
pub mod internal_page;
pub mod key_comparator;
pub mod leaf_page;

pub use b_plus_tree::BPlusTree;
pub use btree_page::{BTreePageMut, BTreePageRef, PageType};
pub use index_iterator::IndexIterator;
pub use internal_page::{InternalNode, InternalNodeRef, DEFAULT_INTERNAL_MAX_SIZE, INTERNAL_CAPACITY};
pub use key_comparator::{BytewiseComparator, IntegerComparator, KeyComparator};
pub use leaf_page::{LeafNode, LeafNodeRef, DEFAULT_LEAF_MAX_SIZE, LEAF_CAPACITY};
