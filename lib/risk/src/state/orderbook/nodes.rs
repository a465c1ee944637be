use arrayref::{array_refs, mut_array_refs};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use solana_program::pubkey::Pubkey;

use super::order_type::{OrderType, Side};
use crate::error::{Result, RiskError};

pub type NodeHandle = u32;
pub const NODE_SIZE: usize = 88;

#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum NodeTag {
    Uninitialized = 0,
    InnerNode = 1,
    LeafNode = 2,
    FreeNode = 3,
    LastFreeNode = 4,
}

/// Creates a binary tree node key.
///
/// It's used for sorting nodes (ascending for asks, descending for bids)
/// and encodes the price in the top 64 bits followed by an ordering number
/// in the lower bits.
///
/// The `seq_num` that's passed should increase monotonically. It's used to
/// choose the ordering number such that orders placed later for the same price
/// are ordered after earlier orders.
pub fn new_node_key(side: Side, price_lots: i64, seq_num: u64) -> i128 {
    let seq_num = if side == Side::Bid { !seq_num } else { seq_num };

    let upper = (price_lots as i128) << 64;
    upper | (seq_num as i128)
}

/// InnerNodes and LeafNodes compose the binary tree of orders.
///
/// Each InnerNode has exactly two children, which are either InnerNodes themselves,
/// or LeafNodes. The children share the top `prefix_len` bits of `key`. The left
/// child has a 0 in the next bit, and the right a 1.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InnerNode {
    /// number of highest `key` bits that all children share
    /// e.g. if it's 2, the two highest bits of `key` will be the same on all children
    pub prefix_len: u32,

    /// only the top `prefix_len` bits of `key` are relevant
    pub key: i128,

    /// indexes into `BookSide::nodes`
    pub children: [NodeHandle; 2],
}

impl InnerNode {
    pub fn new(prefix_len: u32, key: i128) -> Self {
        Self {
            prefix_len,
            key,
            children: [0; 2],
        }
    }

    /// Returns the handle of the child that may contain the search key
    /// and 0 or 1 depending on which child it was.
    pub(crate) fn walk_down(&self, search_key: i128) -> (NodeHandle, bool) {
        let crit_bit_mask = 1i128 << (127 - self.prefix_len);
        let crit_bit = (search_key & crit_bit_mask) != 0;
        (self.children[crit_bit as usize], crit_bit)
    }
}

/// LeafNodes represent an order in the binary tree
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LeafNode {
    /// Index into the owning account's open orders arrays
    pub owner_slot: u8,
    pub order_type: OrderType,
    pub version: u8,

    /// Time in seconds after `timestamp` at which the order expires.
    /// A value of 0 means no expiry.
    pub time_in_force: u8,

    /// The binary tree key
    pub key: i128,

    pub owner: Pubkey,
    pub quantity: i64,
    pub client_order_id: u64,

    // Best initial price
    pub best_initial: i64,

    // The time the order was placed
    pub timestamp: u64,
}

impl LeafNode {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner_slot: u8,
        key: i128,
        owner: Pubkey,
        quantity: i64,
        client_order_id: u64,
        timestamp: u64,
        order_type: OrderType,
        time_in_force: u8,
    ) -> Self {
        Self {
            owner_slot,
            order_type,
            version: 1,
            time_in_force,
            key,
            owner,
            quantity,
            client_order_id,
            best_initial: (key >> 64) as i64,
            timestamp,
        }
    }

    /// Price in lots: the top 64 bits of the key, arithmetic shift.
    #[inline(always)]
    pub fn price(&self) -> i64 {
        (self.key >> 64) as i64
    }

    /// Time at which this order will expire, u64::MAX if never
    #[inline(always)]
    pub fn expiry(&self) -> u64 {
        if self.time_in_force == 0 {
            u64::MAX
        } else {
            self.timestamp.saturating_add(self.time_in_force as u64)
        }
    }

    #[inline(always)]
    pub fn is_valid(&self, now_ts: u64) -> bool {
        self.time_in_force == 0 || now_ts < self.expiry()
    }
}

/// One slot of the node array.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AnyNode {
    Uninitialized,
    Inner(InnerNode),
    Leaf(LeafNode),
    Free { next: NodeHandle },
    LastFree { next: NodeHandle },
}

impl AnyNode {
    pub fn tag(&self) -> NodeTag {
        match self {
            AnyNode::Uninitialized => NodeTag::Uninitialized,
            AnyNode::Inner(_) => NodeTag::InnerNode,
            AnyNode::Leaf(_) => NodeTag::LeafNode,
            AnyNode::Free { .. } => NodeTag::FreeNode,
            AnyNode::LastFree { .. } => NodeTag::LastFreeNode,
        }
    }

    pub fn key(&self) -> Option<i128> {
        match self {
            AnyNode::Inner(inner) => Some(inner.key),
            AnyNode::Leaf(leaf) => Some(leaf.key),
            _ => None,
        }
    }

    #[inline]
    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            AnyNode::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    #[inline]
    pub fn as_inner(&self) -> Option<&InnerNode> {
        match self {
            AnyNode::Inner(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn unpack(src: &[u8; NODE_SIZE]) -> Result<Self> {
        let (tag, header, key, body) = array_refs![src, 4, 4, 16, 64];
        let tag = u32::from_le_bytes(*tag);
        let tag = NodeTag::try_from(tag)
            .map_err(|_| RiskError::malformed("book node", format!("unknown node tag {tag}")))?;
        Ok(match tag {
            NodeTag::Uninitialized => AnyNode::Uninitialized,
            NodeTag::InnerNode => {
                let (children, _padding) = array_refs![body, 8, 56];
                let (left, right) = array_refs![children, 4, 4];
                AnyNode::Inner(InnerNode {
                    prefix_len: u32::from_le_bytes(*header),
                    key: i128::from_le_bytes(*key),
                    children: [u32::from_le_bytes(*left), u32::from_le_bytes(*right)],
                })
            }
            NodeTag::LeafNode => {
                let (owner, quantity, client_order_id, best_initial, timestamp) =
                    array_refs![body, 32, 8, 8, 8, 8];
                let [owner_slot, order_type, version, time_in_force] = *header;
                let order_type = OrderType::try_from(order_type).map_err(|_| {
                    RiskError::malformed("book node", format!("unknown order type {order_type}"))
                })?;
                AnyNode::Leaf(LeafNode {
                    owner_slot,
                    order_type,
                    version,
                    time_in_force,
                    key: i128::from_le_bytes(*key),
                    owner: Pubkey::new_from_array(*owner),
                    quantity: i64::from_le_bytes(*quantity),
                    client_order_id: u64::from_le_bytes(*client_order_id),
                    best_initial: i64::from_le_bytes(*best_initial),
                    timestamp: u64::from_le_bytes(*timestamp),
                })
            }
            NodeTag::FreeNode => AnyNode::Free {
                next: u32::from_le_bytes(*header),
            },
            NodeTag::LastFreeNode => AnyNode::LastFree {
                next: u32::from_le_bytes(*header),
            },
        })
    }

    pub fn pack_into(&self, dst: &mut [u8; NODE_SIZE]) {
        *dst = [0u8; NODE_SIZE];
        let (tag, header, key, body) = mut_array_refs![dst, 4, 4, 16, 64];
        *tag = u32::from(self.tag()).to_le_bytes();
        match self {
            AnyNode::Uninitialized => {}
            AnyNode::Inner(inner) => {
                *header = inner.prefix_len.to_le_bytes();
                *key = inner.key.to_le_bytes();
                let (children, _padding) = mut_array_refs![body, 8, 56];
                let (left, right) = mut_array_refs![children, 4, 4];
                *left = inner.children[0].to_le_bytes();
                *right = inner.children[1].to_le_bytes();
            }
            AnyNode::Leaf(leaf) => {
                *header = [
                    leaf.owner_slot,
                    leaf.order_type.into(),
                    leaf.version,
                    leaf.time_in_force,
                ];
                *key = leaf.key.to_le_bytes();
                let (owner, quantity, client_order_id, best_initial, timestamp) =
                    mut_array_refs![body, 32, 8, 8, 8, 8];
                *owner = leaf.owner.to_bytes();
                *quantity = leaf.quantity.to_le_bytes();
                *client_order_id = leaf.client_order_id.to_le_bytes();
                *best_initial = leaf.best_initial.to_le_bytes();
                *timestamp = leaf.timestamp.to_le_bytes();
            }
            AnyNode::Free { next } | AnyNode::LastFree { next } => {
                *header = next.to_le_bytes();
            }
        }
    }
}

impl From<LeafNode> for AnyNode {
    fn from(leaf: LeafNode) -> Self {
        AnyNode::Leaf(leaf)
    }
}

impl From<InnerNode> for AnyNode {
    fn from(inner: InnerNode) -> Self {
        AnyNode::Inner(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_key_ordering() {
        // asks: same price, earlier order sorts first (ascending)
        let a1 = new_node_key(Side::Ask, 100, 1);
        let a2 = new_node_key(Side::Ask, 100, 2);
        assert!(a1 < a2);
        assert!(new_node_key(Side::Ask, 99, 5) < a1);

        // bids: same price, earlier order sorts first when iterating descending
        let b1 = new_node_key(Side::Bid, 100, 1);
        let b2 = new_node_key(Side::Bid, 100, 2);
        assert!(b1 > b2);
        assert!(new_node_key(Side::Bid, 101, 5) > b1);
    }

    #[test]
    fn test_leaf_price_uses_top_bits() {
        let key = new_node_key(Side::Bid, 12345, 7);
        let leaf = LeafNode::new(0, key, Pubkey::default(), 1, 0, 0, OrderType::Limit, 0);
        assert_eq!(leaf.price(), 12345);
        assert_eq!(leaf.best_initial, 12345);
    }

    #[test]
    fn test_leaf_expiry() {
        let leaf = LeafNode::new(0, 0, Pubkey::default(), 1, 0, 1000, OrderType::Limit, 10);
        assert_eq!(leaf.expiry(), 1010);
        assert!(leaf.is_valid(1009));
        assert!(!leaf.is_valid(1010));

        let forever = LeafNode::new(0, 0, Pubkey::default(), 1, 0, 1000, OrderType::Limit, 0);
        assert_eq!(forever.expiry(), u64::MAX);
        assert!(forever.is_valid(u64::MAX));
    }

    #[test]
    fn test_node_pack_unpack() {
        let leaf = LeafNode::new(
            3,
            new_node_key(Side::Ask, 42, 9),
            Pubkey::new_unique(),
            17,
            99,
            1_650_000_000,
            OrderType::PostOnly,
            60,
        );
        let mut inner = InnerNode::new(63, leaf.key);
        inner.children = [5, 1023];

        for node in [
            AnyNode::Uninitialized,
            AnyNode::Leaf(leaf),
            AnyNode::Inner(inner),
            AnyNode::Free { next: 12 },
            AnyNode::LastFree { next: 0 },
        ] {
            let mut buf = [0u8; NODE_SIZE];
            node.pack_into(&mut buf);
            assert_eq!(AnyNode::unpack(&buf).unwrap(), node);
        }
    }

    #[test]
    fn test_node_leaf_offsets() {
        let mut buf = [0u8; NODE_SIZE];
        buf[0] = 2; // leaf tag
        buf[4] = 7; // owner_slot
        buf[5] = 3; // market order
        buf[7] = 5; // time in force
        buf[16..24].copy_from_slice(&100i64.to_le_bytes()); // price in top half of key
        buf[56..64].copy_from_slice(&(-3i64).to_le_bytes());
        buf[80..88].copy_from_slice(&55u64.to_le_bytes());
        let leaf = *AnyNode::unpack(&buf).unwrap().as_leaf().unwrap();
        assert_eq!(leaf.owner_slot, 7);
        assert_eq!(leaf.order_type, OrderType::Market);
        assert_eq!(leaf.time_in_force, 5);
        assert_eq!(leaf.price(), 100);
        assert_eq!(leaf.quantity, -3);
        assert_eq!(leaf.timestamp, 55);
    }

    #[test]
    fn test_node_unknown_tag() {
        let mut buf = [0u8; NODE_SIZE];
        buf[0] = 9;
        assert!(matches!(
            AnyNode::unpack(&buf),
            Err(RiskError::MalformedData { .. })
        ));
        buf[0] = 2;
        buf[5] = 200;
        assert!(AnyNode::unpack(&buf).is_err());
    }
}
