use crate::state::orderbook::bookside::{BookSide, BookSideType};
use crate::state::orderbook::nodes::{AnyNode, InnerNode, LeafNode, NodeHandle};

/// Iterate over orders in order (bids=descending, asks=ascending)
///
/// Each call to `BookSide::iter` starts a fresh walk over the immutable
/// snapshot, so iteration is restartable.
#[derive(Clone)]
pub struct BookSideIter<'a> {
    book_side: &'a BookSide,
    /// InnerNodes where the right side still needs to be iterated on
    stack: Vec<&'a InnerNode>,
    /// To be returned on `next()`
    next_leaf: Option<(NodeHandle, &'a LeafNode)>,

    /// either 0, 1 to iterate low-to-high, or 1, 0 to iterate high-to-low
    left: usize,
    right: usize,

    now_ts: u64,
}

impl<'a> BookSideIter<'a> {
    pub fn new(book_side: &'a BookSide, now_ts: u64) -> Self {
        let (left, right) = if book_side.book_side_type == BookSideType::Bids {
            (1, 0)
        } else {
            (0, 1)
        };

        let mut iter = Self {
            book_side,
            stack: vec![],
            next_leaf: None,
            left,
            right,
            now_ts,
        };
        if let Some(root) = book_side.root() {
            iter.next_leaf = iter.find_leftmost_valid_leaf(root);
        }
        iter
    }

    pub fn is_bids(&self) -> bool {
        self.left == 1
    }

    pub fn peek(&self) -> Option<(NodeHandle, &'a LeafNode)> {
        self.next_leaf
    }

    fn find_leftmost_valid_leaf(
        &mut self,
        start: NodeHandle,
    ) -> Option<(NodeHandle, &'a LeafNode)> {
        let mut current = start;
        loop {
            // decoded books only reach inner nodes and leaves
            match self.book_side.get(current)? {
                AnyNode::Inner(inner) => {
                    self.stack.push(inner);
                    current = inner.children[self.left];
                }
                AnyNode::Leaf(leaf) => {
                    if leaf.is_valid(self.now_ts) {
                        return Some((current, leaf));
                    }
                    current = self.stack.pop()?.children[self.right];
                }
                _ => return None,
            }
        }
    }
}

impl<'a> Iterator for BookSideIter<'a> {
    type Item = (NodeHandle, &'a LeafNode);

    fn next(&mut self) -> Option<Self::Item> {
        // no next leaf? done
        let current_leaf = self.next_leaf?;

        // start popping from stack and get the other child
        self.next_leaf = match self.stack.pop() {
            None => None,
            Some(inner) => {
                let start = inner.children[self.right];
                // go down the left branch as much as possible until reaching a valid leaf
                self.find_leftmost_valid_leaf(start)
            }
        };

        Some(current_leaf)
    }
}
