//! The request surface: four request kinds and their wire records.
//!
//! A record is a `#[repr(C)]` param block. A carrier fills one in, hands
//! the kind number and the record's bytes to [`MemDevice::dispatch`], and
//! the result comes back in the record's `return_val` field — the ioctl
//! shape of the device this crate models. Records can be viewed in place
//! from raw bytes, so the carrier never copies.
//!
//! ```text
//!              ┌──4 byte──┐┌──4 byte──┐
//!  GET_MEM     │   size   ││return_val│
//!              └──────────┘└──────────┘
//!              ┌──4 byte──┐┌──4 byte──┐┌───── BUF_CAPACITY byte ─────┐
//!  WRITE_MEM   │  offset  ││return_val││ buf (zero-terminated bytes) │
//!              └──────────┘└──────────┘└─────────────────────────────┘
//! ```

use tracing::{debug, warn};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::device::MemDevice;
use crate::tree::FreeError;

/// Byte capacity of the inline buffer carried by [`WriteMem`] and
/// [`ReadMem`] records.
pub const BUF_CAPACITY: usize = 4096;

/// The four request kinds a carrier can dispatch, by wire number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RequestKind {
    GetMem = 0,
    FreeMem = 1,
    WriteMem = 2,
    ReadMem = 3,
}

impl TryFrom<u32> for RequestKind {
    type Error = u32;

    fn try_from(kind: u32) -> Result<Self, u32> {
        match kind {
            0 => Ok(RequestKind::GetMem),
            1 => Ok(RequestKind::FreeMem),
            2 => Ok(RequestKind::WriteMem),
            3 => Ok(RequestKind::ReadMem),
            other => Err(other),
        }
    }
}

/// Request a block of at least `size` bytes. `return_val` becomes the
/// block's reference, or −1 when no placement exists.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct GetMem {
    pub size: i32,
    pub return_val: i32,
}

impl GetMem {
    pub fn new(size: i32) -> Self {
        Self {
            size,
            return_val: 0,
        }
    }
}

/// Free the block containing `offset`. `return_val` becomes 0 or −1.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FreeMem {
    pub offset: i32,
    pub return_val: i32,
}

impl FreeMem {
    pub fn new(offset: i32) -> Self {
        Self {
            offset,
            return_val: 0,
        }
    }
}

/// Write the zero-terminated content of `buf` at `offset`. `return_val`
/// becomes the number of bytes written, or −1.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct WriteMem {
    pub offset: i32,
    pub return_val: i32,
    pub buf: [u8; BUF_CAPACITY],
}

impl WriteMem {
    /// A record whose buffer starts with `bytes` and is zero elsewhere.
    ///
    /// Panics when `bytes` is longer than [`BUF_CAPACITY`].
    pub fn new(offset: i32, bytes: &[u8]) -> Self {
        let mut record = Self::new_zeroed();
        record.offset = offset;
        record.buf[..bytes.len()].copy_from_slice(bytes);
        record
    }
}

/// Read `size` bytes at `offset` into `buf`. `return_val` becomes the
/// number of bytes read, or −1 with `buf` untouched.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct ReadMem {
    pub offset: i32,
    pub size: i32,
    pub return_val: i32,
    pub buf: [u8; BUF_CAPACITY],
}

impl ReadMem {
    pub fn new(offset: i32, size: i32) -> Self {
        let mut record = Self::new_zeroed();
        record.offset = offset;
        record.size = size;
        record
    }
}

impl<const DEPTH: usize> MemDevice<DEPTH> {
    /// Handle a [`GetMem`] record.
    pub fn get_mem(&mut self, record: &mut GetMem) {
        record.return_val = match self.allocate(record.size.max(0) as usize) {
            Ok(offset) => offset as i32,
            Err(_) => -1,
        };
    }

    /// Handle a [`FreeMem`] record.
    pub fn free_mem(&mut self, record: &mut FreeMem) {
        let result = usize::try_from(record.offset)
            .map_err(|_| FreeError::InvalidRef)
            .and_then(|offset| self.free(offset));
        record.return_val = match result {
            Ok(()) => 0,
            Err(_) => -1,
        };
    }

    /// Handle a [`WriteMem`] record.
    pub fn write_mem(&mut self, record: &mut WriteMem) {
        let result = usize::try_from(record.offset)
            .ok()
            .map(|offset| self.write(offset, &record.buf));
        record.return_val = match result {
            Some(Ok(written)) => written as i32,
            _ => -1,
        };
    }

    /// Handle a [`ReadMem`] record. On rejection `buf` is untouched.
    pub fn read_mem(&mut self, record: &mut ReadMem) {
        let offset = usize::try_from(record.offset).ok();
        let size = usize::try_from(record.size).ok().filter(|&s| s <= BUF_CAPACITY);
        let (Some(offset), Some(size)) = (offset, size) else {
            record.return_val = -1;
            return;
        };
        match self.read(offset, size) {
            Ok(bytes) => {
                record.buf[..size].copy_from_slice(bytes);
                record.return_val = size as i32;
            }
            Err(_) => record.return_val = -1,
        }
    }

    /// The ioctl switch: decode `payload` in place as the record for
    /// `kind`, execute it, and write the status into its `return_val`.
    ///
    /// Unknown kinds and payloads that are not the record for their kind
    /// are logged and ignored, with no side effects.
    pub fn dispatch(&mut self, kind: u32, payload: &mut [u8]) {
        let Ok(kind) = RequestKind::try_from(kind) else {
            warn!("invalid request kind {}", kind);
            return;
        };
        match kind {
            RequestKind::GetMem => match GetMem::mut_from_bytes(payload) {
                Ok(record) => {
                    debug!("get_mem(size = {})", record.size);
                    self.get_mem(record);
                }
                Err(_) => warn!("malformed GET_MEM record ({} bytes)", payload.len()),
            },
            RequestKind::FreeMem => match FreeMem::mut_from_bytes(payload) {
                Ok(record) => {
                    debug!("free_mem(offset = {})", record.offset);
                    self.free_mem(record);
                }
                Err(_) => warn!("malformed FREE_MEM record ({} bytes)", payload.len()),
            },
            RequestKind::WriteMem => match WriteMem::mut_from_bytes(payload) {
                Ok(record) => {
                    debug!("write_mem(offset = {})", record.offset);
                    self.write_mem(record);
                }
                Err(_) => warn!("malformed WRITE_MEM record ({} bytes)", payload.len()),
            },
            RequestKind::ReadMem => match ReadMem::mut_from_bytes(payload) {
                Ok(record) => {
                    debug!("read_mem(offset = {}, size = {})", record.offset, record.size);
                    self.read_mem(record);
                }
                Err(_) => warn!("malformed READ_MEM record ({} bytes)", payload.len()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Device = MemDevice<4>;

    #[test]
    fn request_kinds_by_wire_number() {
        assert_eq!(RequestKind::try_from(0), Ok(RequestKind::GetMem));
        assert_eq!(RequestKind::try_from(1), Ok(RequestKind::FreeMem));
        assert_eq!(RequestKind::try_from(2), Ok(RequestKind::WriteMem));
        assert_eq!(RequestKind::try_from(3), Ok(RequestKind::ReadMem));
        assert_eq!(RequestKind::try_from(4), Err(4));
    }

    #[test]
    fn get_and_free_via_records() {
        let mut dev = Device::new();

        let mut get = GetMem::new(100);
        dev.get_mem(&mut get);
        assert_eq!(get.return_val, 0);

        let mut free = FreeMem::new(get.return_val);
        dev.free_mem(&mut free);
        assert_eq!(free.return_val, 0);

        // Freeing again carries the failure status back.
        dev.free_mem(&mut free);
        assert_eq!(free.return_val, -1);

        let mut free = FreeMem::new(-3);
        dev.free_mem(&mut free);
        assert_eq!(free.return_val, -1);
    }

    #[test]
    fn write_and_read_via_records() {
        let mut dev = Device::new();

        let mut get = GetMem::new(100);
        dev.get_mem(&mut get);
        assert_eq!(get.return_val, 0);

        let mut write = WriteMem::new(0, b"Hello buddy");
        dev.write_mem(&mut write);
        assert_eq!(write.return_val, 11);

        let mut read = ReadMem::new(3, 10);
        dev.read_mem(&mut read);
        assert_eq!(read.return_val, 10);
        assert_eq!(&read.buf[..10], b"lo buddy\0\0");
    }

    #[test]
    fn read_record_rejects_bad_sizes() {
        let mut dev = Device::new();
        let mut get = GetMem::new(16);
        dev.get_mem(&mut get);

        let mut read = ReadMem::new(0, -1);
        dev.read_mem(&mut read);
        assert_eq!(read.return_val, -1);
        assert_eq!(read.buf, [0u8; BUF_CAPACITY]);

        let mut read = ReadMem::new(0, BUF_CAPACITY as i32 + 1);
        dev.read_mem(&mut read);
        assert_eq!(read.return_val, -1);
    }

    #[test]
    fn dispatch_routes_by_kind() {
        let mut dev = Device::new();

        let mut get = GetMem::new(32);
        dev.dispatch(0, get.as_mut_bytes());
        assert_eq!(get.return_val, 0);

        let mut write = WriteMem::new(0, b"hi");
        dev.dispatch(2, write.as_mut_bytes());
        assert_eq!(write.return_val, 2);

        let mut read = ReadMem::new(0, 2);
        dev.dispatch(3, read.as_mut_bytes());
        assert_eq!(read.return_val, 2);
        assert_eq!(&read.buf[..2], b"hi");

        let mut free = FreeMem::new(0);
        dev.dispatch(1, free.as_mut_bytes());
        assert_eq!(free.return_val, 0);
    }

    #[test]
    fn dispatch_ignores_unknown_kinds() {
        let mut dev = Device::new();
        let mut get = GetMem::new(32);
        get.return_val = 7;
        dev.dispatch(9, get.as_mut_bytes());
        // Untouched: no allocation happened and the record was not written.
        assert_eq!(get.return_val, 7);
        assert_eq!(dev.stats().allocated_bytes, 0);
    }

    #[test]
    fn dispatch_ignores_malformed_payloads() {
        let mut dev = Device::new();
        let mut short = [0u8; 4];
        dev.dispatch(0, &mut short);
        assert_eq!(dev.stats().allocated_bytes, 0);
    }
}
