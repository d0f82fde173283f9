//! The buddy tree: which parts of the pool are free, allocated, or split.
//!
//! Nodes live in an implicit array of `2 * NUM_LEAVES - 1` slots, the root
//! at index 0 and the children of `i` at `2i + 1` and `2i + 2`. A node's
//! byte range is arithmetic on its index, so no links are stored:
//!
//! ```text
//!                ┌───────────── 0 ─────────────┐      MEM_SIZE
//!          ┌──── 1 ────┐                 ┌──── 2 ────┐    /2
//!          3           4                 5           6    /4
//!         ...                                            ...
//! ```
//!
//! A slot is part of the tree iff it is reachable from the root without
//! descending through a leaf; slots below a leaf always read `Free`, which
//! split and merge maintain. Splitting turns a free leaf into a parent with
//! two free halves, and freeing eagerly merges buddy pairs back together,
//! so no parent ever holds two free leaves.

use std::fmt;

use tracing::debug;

/// What a tree slot says about its byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Free,
    Allocated,
    Parent,
}

/// Returned by [`BuddyTree::allocate`] when no free block is large enough,
/// whether from exhaustion or from fragmentation; the two are
/// indistinguishable to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    OutOfMemory,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::OutOfMemory => write!(f, "No free block large enough"),
        }
    }
}

impl std::error::Error for AllocError {}

/// Returned by [`BuddyTree::free`] for references that are out of range or
/// do not fall inside an allocated block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeError {
    InvalidRef,
}

impl fmt::Display for FreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreeError::InvalidRef => write!(f, "Reference does not name an allocated block"),
        }
    }
}

impl std::error::Error for FreeError {}

const fn left_child(node: usize) -> usize {
    2 * node + 1
}

const fn right_child(node: usize) -> usize {
    2 * node + 2
}

const fn parent(node: usize) -> Option<usize> {
    if node == 0 {
        None
    } else {
        Some((node - 1) / 2)
    }
}

const fn level(node: usize) -> u32 {
    (node + 1).ilog2()
}

/// The buddy tree over a pool of `MEM_SIZE` bytes.
///
/// `DEPTH` fixes the whole geometry: the smallest block is `1 << DEPTH`
/// bytes and there are `1 << DEPTH` of them.
pub struct BuddyTree<const DEPTH: usize = 4> {
    slots: Box<[NodeState]>,
}

impl<const DEPTH: usize> BuddyTree<DEPTH> {
    /// Size in bytes of a smallest block.
    pub const LEAF_SIZE: usize = 1 << DEPTH;
    /// Number of smallest blocks in the pool.
    pub const NUM_LEAVES: usize = 1 << DEPTH;
    /// Total pool size covered by the root.
    pub const MEM_SIZE: usize = Self::NUM_LEAVES * Self::LEAF_SIZE;

    const SLOT_COUNT: usize = 2 * Self::NUM_LEAVES - 1;

    /// A tree whose root is a single free block covering the whole pool.
    pub fn new() -> Self {
        Self {
            slots: vec![NodeState::Free; Self::SLOT_COUNT].into_boxed_slice(),
        }
    }

    /// Byte size of the block at `node`.
    pub fn node_size(node: usize) -> usize {
        Self::MEM_SIZE >> level(node)
    }

    /// Byte offset of the leftmost address covered by `node`.
    pub fn base_offset(node: usize) -> usize {
        let level = level(node);
        let first_at_level = (1usize << level) - 1;
        (node - first_at_level) * (Self::MEM_SIZE >> level)
    }

    /// State of the slot at `node`. The index must come from [`locate`]
    /// or a visit; slots outside the array panic.
    ///
    /// [`locate`]: Self::locate
    pub fn state(&self, node: usize) -> NodeState {
        self.slots[node]
    }

    /// The leaf containing the byte at `offset`, or `None` when `offset`
    /// is outside the pool.
    ///
    /// Descends from the root; bit `n` of `offset / LEAF_SIZE`, for `n`
    /// from `DEPTH - 1` down, picks the child at each parent. The walk
    /// stops at the first non-parent node, so the same offset always
    /// yields the same leaf.
    pub fn locate(&self, offset: usize) -> Option<usize> {
        if offset >= Self::MEM_SIZE {
            return None;
        }
        let idx = offset / Self::LEAF_SIZE;
        let mut node = 0;
        let mut n = DEPTH;
        while n > 0 && self.slots[node] == NodeState::Parent {
            n -= 1;
            node = if (idx >> n) & 1 == 1 {
                right_child(node)
            } else {
                left_child(node)
            };
        }
        Some(node)
    }

    /// Allocate the smallest power-of-two block that holds `size` bytes,
    /// never smaller than [`LEAF_SIZE`], and return its base offset.
    /// Leftmost placement always wins.
    ///
    /// [`LEAF_SIZE`]: Self::LEAF_SIZE
    pub fn allocate(&mut self, size: usize) -> Result<usize, AllocError> {
        match self.allocate_in(size, 0, Self::MEM_SIZE) {
            Some(offset) => {
                debug!("allocated {} byte request at offset {}", size, offset);
                Ok(offset)
            }
            None => {
                debug!("no free block for {} byte request", size);
                Err(AllocError::OutOfMemory)
            }
        }
    }

    // Returns the offset relative to `node`, or None when nothing in its
    // subtree can hold the request.
    fn allocate_in(&mut self, size: usize, node: usize, available: usize) -> Option<usize> {
        if size > available {
            return None;
        }
        let half = available / 2;
        match self.slots[node] {
            NodeState::Free => {
                if size <= half && half >= Self::LEAF_SIZE {
                    self.split(node);
                    return self.allocate_in(size, left_child(node), half);
                }
                self.slots[node] = NodeState::Allocated;
                Some(0)
            }
            NodeState::Allocated => None,
            NodeState::Parent => {
                if let Some(offset) = self.allocate_in(size, left_child(node), half) {
                    return Some(offset);
                }
                self.allocate_in(size, right_child(node), half)
                    .map(|offset| offset + half)
            }
        }
    }

    /// Free the allocated block containing `offset` and eagerly merge
    /// free buddy pairs back up the tree.
    ///
    /// Any reference inside the block frees it, not just its base.
    pub fn free(&mut self, offset: usize) -> Result<(), FreeError> {
        let node = self.locate(offset).ok_or(FreeError::InvalidRef)?;
        if self.slots[node] != NodeState::Allocated {
            return Err(FreeError::InvalidRef);
        }
        self.free_and_merge(node);
        debug!("freed block containing offset {}", offset);
        Ok(())
    }

    fn split(&mut self, node: usize) {
        self.slots[node] = NodeState::Parent;
        self.slots[left_child(node)] = NodeState::Free;
        self.slots[right_child(node)] = NodeState::Free;
    }

    fn free_and_merge(&mut self, node: usize) {
        self.slots[node] = NodeState::Free;
        let mut current = node;
        while let Some(up) = parent(current) {
            if self.slots[left_child(up)] != NodeState::Free
                || self.slots[right_child(up)] != NodeState::Free
            {
                break;
            }
            self.slots[up] = NodeState::Free;
            current = up;
        }
    }

    /// Call `f` for every node reachable from the root, parents before
    /// their children, left before right.
    pub fn visit(&self, mut f: impl FnMut(usize, NodeState)) {
        self.visit_in(0, &mut f);
    }

    fn visit_in(&self, node: usize, f: &mut impl FnMut(usize, NodeState)) {
        let state = self.slots[node];
        f(node, state);
        if state == NodeState::Parent {
            self.visit_in(left_child(node), f);
            self.visit_in(right_child(node), f);
        }
    }
}
