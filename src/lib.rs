#![doc = include_str!("../README.md")]

pub mod device;
mod pool;
pub mod request;
pub mod tree;

pub use device::{AccessError, AttachError, MemDevice, PoolStats};
pub use request::{FreeMem, GetMem, ReadMem, RequestKind, WriteMem, BUF_CAPACITY};
pub use tree::{AllocError, BuddyTree, FreeError, NodeState};
