use solana_program::pubkey::Pubkey;

use crate::error::{require_data, Result, RiskError};
use crate::state::orderbook::bookside::{BookSide, BookSideType};
use crate::state::orderbook::nodes::{new_node_key, AnyNode, InnerNode, LeafNode, NodeHandle};
use crate::state::orderbook::order_type::OrderType;

/// Builds valid book side snapshots by crit-bit insertion.
///
/// Used for fixtures and simulations; the result serializes into the exact
/// account layout with `to_bytes()`.
pub struct BookSideBuilder {
    book_side: BookSide,
    seq_num: u64,
    owner: Pubkey,
}

impl BookSideBuilder {
    pub fn new(book_side_type: BookSideType) -> Self {
        Self {
            book_side: BookSide::new_empty(book_side_type),
            seq_num: 0,
            owner: Pubkey::default(),
        }
    }

    pub fn with_owner(mut self, owner: Pubkey) -> Self {
        self.owner = owner;
        self
    }

    /// Adds a non-expiring limit order behind all existing orders at that price.
    pub fn add_order(&mut self, price_lots: i64, quantity: i64) -> Result<NodeHandle> {
        self.add_order_with_expiry(price_lots, quantity, 0, 0)
    }

    pub fn add_order_with_expiry(
        &mut self,
        price_lots: i64,
        quantity: i64,
        timestamp: u64,
        time_in_force: u8,
    ) -> Result<NodeHandle> {
        let key = new_node_key(self.book_side.side(), price_lots, self.seq_num);
        let leaf = LeafNode::new(
            0,
            key,
            self.owner,
            quantity,
            self.seq_num,
            timestamp,
            OrderType::Limit,
            time_in_force,
        );
        let (handle, _) = self.insert_leaf(&leaf)?;
        self.seq_num += 1;
        Ok(handle)
    }

    fn insert(&mut self, val: AnyNode) -> Result<NodeHandle> {
        let book = &mut self.book_side;
        if book.free_list_len == 0 {
            require_data!(
                (book.bump_index as usize) < book.nodes.len(),
                "bookside",
                "book is full"
            );

            let key = book.bump_index as NodeHandle;
            book.nodes[key as usize] = val;
            book.bump_index += 1;
            return Ok(key);
        }

        let key = book.free_list_head;
        let next = match book.nodes[key as usize] {
            AnyNode::Free { next } | AnyNode::LastFree { next } => next,
            _ => 0,
        };
        book.free_list_head = next;
        book.free_list_len -= 1;
        book.nodes[key as usize] = val;
        Ok(key)
    }

    /// Inserts a leaf, replacing (and returning) a leaf with the same key.
    pub fn insert_leaf(&mut self, new_leaf: &LeafNode) -> Result<(NodeHandle, Option<LeafNode>)> {
        // deal with inserts into an empty tree
        let mut root: NodeHandle = match self.book_side.root() {
            Some(h) => h,
            None => {
                // create a new root if none exists
                let handle = self.insert(AnyNode::Leaf(*new_leaf))?;
                self.book_side.root_node = handle;
                self.book_side.leaf_count = 1;
                return Ok((handle, None));
            }
        };

        // walk down the tree until we find the insert location
        loop {
            let root_contents = self.book_side.nodes[root as usize];
            let root_key = root_contents.key().ok_or_else(|| {
                RiskError::malformed("bookside", format!("node {root} is not in the tree"))
            })?;
            if root_key == new_leaf.key {
                if let AnyNode::Leaf(old_root_as_leaf) = root_contents {
                    // clobber the existing leaf
                    self.book_side.nodes[root as usize] = AnyNode::Leaf(*new_leaf);
                    return Ok((root, Some(old_root_as_leaf)));
                }
                // InnerNodes have a random child's key, so matching can happen and is fine
            }
            let shared_prefix_len: u32 = (root_key ^ new_leaf.key).leading_zeros();
            if let AnyNode::Inner(inner) = root_contents {
                let keep_old_root = shared_prefix_len >= inner.prefix_len;
                if keep_old_root {
                    root = inner.walk_down(new_leaf.key).0;
                    continue;
                }
            }
            // implies root is a Leaf or Inner where shared_prefix_len < prefix_len
            // we'll replace root with a new InnerNode that has new_leaf and root as children

            // change the root in place to represent the LCA of [new_leaf] and [root]
            let crit_bit_mask: i128 = 1i128 << (127 - shared_prefix_len);
            let new_leaf_crit_bit = (crit_bit_mask & new_leaf.key) != 0;
            let old_root_crit_bit = !new_leaf_crit_bit;

            let free_slots = self.book_side.free_list_len as usize
                + self.book_side.nodes.len().saturating_sub(self.book_side.bump_index as usize);
            require_data!(free_slots >= 2, "bookside", "book is full");

            let new_leaf_handle = self.insert(AnyNode::Leaf(*new_leaf))?;
            let moved_root_handle = self.insert(root_contents)?;

            let mut new_root = InnerNode::new(shared_prefix_len, new_leaf.key);
            new_root.children[new_leaf_crit_bit as usize] = new_leaf_handle;
            new_root.children[old_root_crit_bit as usize] = moved_root_handle;
            self.book_side.nodes[root as usize] = AnyNode::Inner(new_root);

            self.book_side.leaf_count += 1;
            return Ok((new_leaf_handle, None));
        }
    }

    pub fn book_side(&self) -> &BookSide {
        &self.book_side
    }

    pub fn build(self) -> BookSide {
        self.book_side
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.book_side.to_bytes()
    }
}
