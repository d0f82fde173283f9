//! The memory device: a buddy tree and its byte pool behind an access
//! gate, with the lifecycle and the advisory attach flag of the character
//! device it models.
//!
//! Every read and write is gated by the tree: the range's two endpoints
//! must locate to the *same* allocated leaf. For power-of-two blocks the
//! endpoint check is exact — a range whose endpoints share a leaf lies
//! wholly inside it — so nothing else is checked.

use std::fmt;

use tracing::debug;

use crate::pool::Pool;
use crate::tree::{AllocError, BuddyTree, FreeError, NodeState};

/// Returned by the access gate when a range cannot be touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    /// An endpoint lies outside the pool.
    InvalidRef,
    /// The containing block is not allocated.
    NotAllocated,
    /// The endpoints fall into two different blocks.
    CrossesBoundary,
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessError::InvalidRef => write!(f, "Reference out of range"),
            AccessError::NotAllocated => write!(f, "Block not allocated"),
            AccessError::CrossesBoundary => write!(f, "Range crosses a block boundary"),
        }
    }
}

impl std::error::Error for AccessError {}

/// Refusal of a second simultaneous client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    Busy,
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachError::Busy => write!(f, "Device already attached"),
        }
    }
}

impl std::error::Error for AttachError {}

/// A snapshot of the tree, taken by [`MemDevice::stats`].
///
/// `free_bytes` counts every free block; fragmentation may keep it from
/// being usable as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub mem_size: usize,
    pub free_bytes: usize,
    pub allocated_bytes: usize,
    pub node_count: usize,
}

/// The allocator service: pool, tree, and gate as one single-threaded
/// value. All mutation goes through `&mut self`; a carrier that wants
/// threads puts one lock around the whole device.
pub struct MemDevice<const DEPTH: usize = 4> {
    tree: BuddyTree<DEPTH>,
    pool: Pool,
    attached: bool,
}

impl<const DEPTH: usize> MemDevice<DEPTH> {
    /// Size in bytes of a smallest block.
    pub const LEAF_SIZE: usize = BuddyTree::<DEPTH>::LEAF_SIZE;
    /// Number of smallest blocks in the pool.
    pub const NUM_LEAVES: usize = BuddyTree::<DEPTH>::NUM_LEAVES;
    /// Total pool size.
    pub const MEM_SIZE: usize = BuddyTree::<DEPTH>::MEM_SIZE;

    /// A device with a zeroed pool and a single free root block.
    pub fn new() -> Self {
        debug!("buddy pool of {} bytes ready", Self::MEM_SIZE);
        Self {
            tree: BuddyTree::new(),
            pool: Pool::zeroed(Self::MEM_SIZE),
            attached: false,
        }
    }

    /// Claim the device for one client. Advisory only: it refuses a
    /// second attach but protects nothing by itself.
    pub fn attach(&mut self) -> Result<(), AttachError> {
        if self.attached {
            return Err(AttachError::Busy);
        }
        self.attached = true;
        Ok(())
    }

    /// Release the claim taken by [`attach`].
    ///
    /// [`attach`]: Self::attach
    pub fn release(&mut self) {
        self.attached = false;
    }

    /// Allocate a block for `size` bytes, returning its base offset.
    pub fn allocate(&mut self, size: usize) -> Result<usize, AllocError> {
        self.tree.allocate(size)
    }

    /// Free the allocated block containing `offset`.
    pub fn free(&mut self, offset: usize) -> Result<(), FreeError> {
        self.tree.free(offset)
    }

    /// Write the zero-terminated content of `buf` at `offset` and return
    /// the number of bytes written.
    ///
    /// The logical length is the number of bytes before the first zero
    /// (all of `buf` when it has none); the terminator itself is not
    /// written. Use [`write_bytes`] to write a buffer that may contain
    /// zeros.
    ///
    /// [`write_bytes`]: Self::write_bytes
    pub fn write(&mut self, offset: usize, buf: &[u8]) -> Result<usize, AccessError> {
        let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        self.write_bytes(offset, &buf[..len])
    }

    /// Write all of `bytes` at `offset` and return the number of bytes
    /// written. Copies everything or nothing.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<usize, AccessError> {
        self.check_range(offset, bytes.len())?;
        self.pool.write(offset, bytes);
        Ok(bytes.len())
    }

    /// Read `size` bytes starting at `offset`.
    pub fn read(&self, offset: usize, size: usize) -> Result<&[u8], AccessError> {
        self.check_range(offset, size)?;
        Ok(self.pool.read(offset, size))
    }

    // The gate. `end` is the last byte touched; an empty range at offset
    // 0 has no last byte and is rejected, as in the device this models.
    fn check_range(&self, offset: usize, len: usize) -> Result<(), AccessError> {
        let end = offset
            .checked_add(len)
            .and_then(|past| past.checked_sub(1))
            .ok_or(AccessError::InvalidRef)?;
        let first = self.tree.locate(offset).ok_or(AccessError::InvalidRef)?;
        let last = self.tree.locate(end).ok_or(AccessError::InvalidRef)?;
        if first != last {
            return Err(AccessError::CrossesBoundary);
        }
        if self.tree.state(first) != NodeState::Allocated {
            return Err(AccessError::NotAllocated);
        }
        Ok(())
    }

    /// Walk the tree and count nodes and free capacity.
    pub fn stats(&self) -> PoolStats {
        let mut free_bytes = 0;
        let mut node_count = 0;
        self.tree.visit(|node, state| {
            node_count += 1;
            if state == NodeState::Free {
                free_bytes += BuddyTree::<DEPTH>::node_size(node);
            }
        });
        PoolStats {
            mem_size: Self::MEM_SIZE,
            free_bytes,
            allocated_bytes: Self::MEM_SIZE - free_bytes,
            node_count,
        }
    }
}

impl<const DEPTH: usize> Drop for MemDevice<DEPTH> {
    fn drop(&mut self) {
        debug!("buddy pool of {} bytes torn down", Self::MEM_SIZE);
    }
}
