use arrayref::{array_ref, array_refs, mut_array_refs};
use itertools::Itertools;
use static_assertions::const_assert_eq;

use crate::error::{require_data, Result, RiskError};
use crate::i80f48::I80F48;
use crate::state::market_info::PerpMarketInfo;
use crate::state::metadata::{DataType, MetaData, METADATA_SIZE};
use crate::state::orderbook::bookside_iterator::BookSideIter;
use crate::state::orderbook::nodes::{AnyNode, LeafNode, NodeHandle, NODE_SIZE};
use crate::state::orderbook::order_type::Side;

pub const MAX_BOOK_NODES: usize = 1024;
const HEADER_SIZE: usize = 40;
pub const BOOKSIDE_SIZE: usize = HEADER_SIZE + MAX_BOOK_NODES * NODE_SIZE;
const_assert_eq!(BOOKSIDE_SIZE, 90152);

#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub enum BookSideType {
    Bids,
    Asks,
}

impl BookSideType {
    pub fn side(self) -> Side {
        match self {
            BookSideType::Bids => Side::Bid,
            BookSideType::Asks => Side::Ask,
        }
    }

    fn data_type(self) -> DataType {
        match self {
            BookSideType::Bids => DataType::Bids,
            BookSideType::Asks => DataType::Asks,
        }
    }
}

/// One aggregated price level of a book side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BookLevel {
    pub price_lots: i64,
    pub size_lots: i64,
    /// native quote per native base
    pub native_price: I80F48,
    /// native base units
    pub native_size: i64,
}

/// A binary tree on AnyNode::key()
///
/// The key encodes the price in the top 64 bits.
///
/// A decoded `BookSide` has been validated: every node reachable from the root
/// is an inner node or a leaf, every child handle is in bounds, the tree is
/// acyclic and ordered on its crit bits, and it holds exactly `leaf_count`
/// leaves. Traversal therefore never fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookSide {
    pub meta_data: MetaData,
    pub book_side_type: BookSideType,
    pub bump_index: u64,
    pub free_list_len: u64,
    pub free_list_head: NodeHandle,
    pub root_node: NodeHandle,
    pub leaf_count: u64,
    pub(crate) nodes: Vec<AnyNode>,
}

impl BookSide {
    pub(crate) fn new_empty(book_side_type: BookSideType) -> Self {
        Self {
            meta_data: MetaData::new(book_side_type.data_type(), 0, true),
            book_side_type,
            bump_index: 0,
            free_list_len: 0,
            free_list_head: 0,
            root_node: 0,
            leaf_count: 0,
            nodes: vec![AnyNode::Uninitialized; MAX_BOOK_NODES],
        }
    }

    /// Decodes and validates a bids or asks account.
    pub fn decode(data: &[u8]) -> Result<Self> {
        require_data!(
            data.len() == BOOKSIDE_SIZE,
            "bookside",
            "expected {} bytes, got {}",
            BOOKSIDE_SIZE,
            data.len()
        );
        let data = array_ref![data, 0, BOOKSIDE_SIZE];
        let (meta, bump_index, free_list_len, free_list_head, root_node, leaf_count, nodes) =
            array_refs![data, METADATA_SIZE, 8, 8, 4, 4, 8, MAX_BOOK_NODES * NODE_SIZE];

        let meta_data = MetaData::unpack(meta)?;
        let book_side_type = match meta_data.data_type {
            DataType::Bids => BookSideType::Bids,
            DataType::Asks => BookSideType::Asks,
            other => {
                return Err(RiskError::malformed(
                    "bookside",
                    format!("data type {other:?} is not a book side"),
                ))
            }
        };

        let nodes = nodes
            .chunks_exact(NODE_SIZE)
            .map(|chunk| AnyNode::unpack(array_ref![chunk, 0, NODE_SIZE]))
            .collect::<Result<Vec<_>>>()?;

        let book_side = Self {
            meta_data,
            book_side_type,
            bump_index: u64::from_le_bytes(*bump_index),
            free_list_len: u64::from_le_bytes(*free_list_len),
            free_list_head: u32::from_le_bytes(*free_list_head),
            root_node: u32::from_le_bytes(*root_node),
            leaf_count: u64::from_le_bytes(*leaf_count),
            nodes,
        };
        book_side.validate()?;
        Ok(book_side)
    }

    /// Serializes back into the account layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; BOOKSIDE_SIZE];
        {
            let dst = arrayref::array_mut_ref![data, 0, BOOKSIDE_SIZE];
            let (meta, bump_index, free_list_len, free_list_head, root_node, leaf_count, nodes) =
                mut_array_refs![dst, METADATA_SIZE, 8, 8, 4, 4, 8, MAX_BOOK_NODES * NODE_SIZE];
            self.meta_data.pack_into(meta);
            *bump_index = self.bump_index.to_le_bytes();
            *free_list_len = self.free_list_len.to_le_bytes();
            *free_list_head = self.free_list_head.to_le_bytes();
            *root_node = self.root_node.to_le_bytes();
            *leaf_count = self.leaf_count.to_le_bytes();
            for (node, chunk) in self.nodes.iter().zip(nodes.chunks_exact_mut(NODE_SIZE)) {
                node.pack_into(arrayref::array_mut_ref![chunk, 0, NODE_SIZE]);
            }
        }
        data
    }

    fn validate(&self) -> Result<()> {
        let root = match self.root() {
            Some(root) => root,
            None => return Ok(()),
        };
        require_data!(
            (root as usize) < self.nodes.len(),
            "bookside",
            "root {} out of bounds",
            root
        );

        let mut visited = vec![false; self.nodes.len()];
        let mut leaves = 0u64;
        let mut stack = vec![root];
        while let Some(handle) = stack.pop() {
            let index = handle as usize;
            require_data!(!visited[index], "bookside", "node {} reached twice", handle);
            visited[index] = true;

            match &self.nodes[index] {
                AnyNode::Leaf(_) => leaves += 1,
                AnyNode::Inner(inner) => {
                    require_data!(
                        inner.prefix_len < 128,
                        "bookside",
                        "inner node {} has prefix_len {}",
                        handle,
                        inner.prefix_len
                    );
                    let crit_bit_mask = 1i128 << (127 - inner.prefix_len);
                    for (crit_bit, child) in inner.children.iter().enumerate() {
                        let child_node = self.nodes.get(*child as usize).ok_or_else(|| {
                            RiskError::malformed(
                                "bookside",
                                format!("child {child} of node {handle} out of bounds"),
                            )
                        })?;
                        let child_key = match child_node {
                            AnyNode::Leaf(leaf) => leaf.key,
                            AnyNode::Inner(child_inner) => {
                                require_data!(
                                    child_inner.prefix_len > inner.prefix_len,
                                    "bookside",
                                    "inner node {} does not extend the prefix of {}",
                                    child,
                                    handle
                                );
                                child_inner.key
                            }
                            other => {
                                return Err(RiskError::malformed(
                                    "bookside",
                                    format!("child {child} of node {handle} is {:?}", other.tag()),
                                ))
                            }
                        };
                        require_data!(
                            (inner.key ^ child_key).leading_zeros() >= inner.prefix_len,
                            "bookside",
                            "child {} does not share the prefix of node {}",
                            child,
                            handle
                        );
                        require_data!(
                            ((child_key & crit_bit_mask) != 0) == (crit_bit == 1),
                            "bookside",
                            "child {} sits on the wrong side of node {}",
                            child,
                            handle
                        );
                        stack.push(*child);
                    }
                }
                other => {
                    return Err(RiskError::malformed(
                        "bookside",
                        format!("reachable node {handle} is {:?}", other.tag()),
                    ))
                }
            }
        }

        require_data!(
            leaves == self.leaf_count,
            "bookside",
            "leaf_count is {} but the tree holds {} leaves",
            self.leaf_count,
            leaves
        );
        Ok(())
    }

    pub fn side(&self) -> Side {
        self.book_side_type.side()
    }

    /// Iterate over all entries, including expired orders
    ///
    /// smallest to highest for asks
    /// highest to smallest for bids
    pub fn iter(&self) -> BookSideIter<'_> {
        BookSideIter::new(self, 0)
    }

    /// Iterate over all entries in the book filtering out expired orders
    pub fn iter_valid(&self, now_ts: u64) -> BookSideIter<'_> {
        BookSideIter::new(self, now_ts)
    }

    pub fn root(&self) -> Option<NodeHandle> {
        if self.leaf_count == 0 {
            None
        } else {
            Some(self.root_node)
        }
    }

    /// Inner and leaf nodes only; free and uninitialized slots are `None`.
    pub fn get(&self, handle: NodeHandle) -> Option<&AnyNode> {
        match self.nodes.get(handle as usize) {
            Some(node @ AnyNode::Inner(_)) | Some(node @ AnyNode::Leaf(_)) => Some(node),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.leaf_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    pub fn find_min(&self) -> Option<NodeHandle> {
        self.find_min_max(false)
    }

    pub fn find_max(&self) -> Option<NodeHandle> {
        self.find_min_max(true)
    }

    fn find_min_max(&self, find_max: bool) -> Option<NodeHandle> {
        let mut root: NodeHandle = self.root()?;

        let i = if find_max { 1 } else { 0 };
        loop {
            match self.get(root)? {
                AnyNode::Inner(inner) => {
                    root = inner.children[i];
                }
                _ => return Some(root),
            }
        }
    }

    pub fn get_min(&self) -> Option<&LeafNode> {
        self.get(self.find_min()?)?.as_leaf()
    }

    pub fn get_max(&self) -> Option<&LeafNode> {
        self.get(self.find_max()?)?.as_leaf()
    }

    /// The order with the highest priority: first in iteration order.
    pub fn best_order(&self) -> Option<&LeafNode> {
        self.iter().next().map(|(_, leaf)| leaf)
    }

    /// The order with the lowest priority: last in iteration order.
    pub fn worst_order(&self) -> Option<&LeafNode> {
        match self.book_side_type {
            BookSideType::Bids => self.get_min(),
            BookSideType::Asks => self.get_max(),
        }
    }

    /// Sum of all resting quantity, in base lots.
    pub fn total_quantity(&self) -> i128 {
        self.iter().map(|(_, leaf)| leaf.quantity as i128).sum()
    }

    /// Merges consecutive orders of equal price into levels, best first,
    /// stopping after `depth` levels. Returns `(price_lots, size_lots)`.
    pub fn levels_lots(&self, depth: usize) -> Result<Vec<(i64, i64)>> {
        self.iter()
            .map(|(_, leaf)| leaf)
            .group_by(|leaf| leaf.price())
            .into_iter()
            .take(depth)
            .map(|(price, mut group)| {
                let size = group.try_fold(0i64, |acc, leaf| {
                    acc.checked_add(leaf.quantity).ok_or(RiskError::OutOfRange)
                })?;
                Ok((price, size))
            })
            .collect()
    }

    /// L2 levels with native price and size attached.
    pub fn aggregate_levels(&self, market: &PerpMarketInfo, depth: usize) -> Result<Vec<BookLevel>> {
        self.levels_lots(depth)?
            .into_iter()
            .map(|(price_lots, size_lots)| {
                Ok(BookLevel {
                    price_lots,
                    size_lots,
                    native_price: market.lot_to_native_price(price_lots)?,
                    native_size: size_lots
                        .checked_mul(market.base_lot_size)
                        .ok_or(RiskError::OutOfRange)?,
                })
            })
            .collect()
    }

    /// Price of the order at which the cumulative size, walking from the best
    /// order, first reaches `quantity` lots. `None` if the book is too thin.
    pub fn impact_price_lots(&self, quantity: i64) -> Option<i64> {
        let mut cumulative = 0i64;
        for (_, leaf) in self.iter() {
            cumulative = cumulative.saturating_add(leaf.quantity);
            if cumulative >= quantity {
                return Some(leaf.price());
            }
        }
        None
    }

    pub fn impact_price_native(
        &self,
        market: &PerpMarketInfo,
        quantity: i64,
    ) -> Result<Option<I80F48>> {
        self.impact_price_lots(quantity)
            .map(|price| market.lot_to_native_price(price))
            .transpose()
    }
}
