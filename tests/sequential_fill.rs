use buddypool::{AllocError, MemDevice};

// Fills the pool left to right, hits the fragmentation wall, and frees a
// block to make room again.
#[test]
fn sequential_fill_then_fragmentation() {
    let mut dev: MemDevice<4> = MemDevice::new();

    assert_eq!(dev.allocate(64), Ok(0));
    assert_eq!(dev.allocate(32), Ok(64));
    assert_eq!(dev.allocate(32), Ok(96));
    assert_eq!(dev.allocate(64), Ok(128));
    assert_eq!(dev.allocate(16), Ok(192));
    assert_eq!(dev.allocate(16), Ok(208));

    // 224..256 is a free 32 byte block, not a 64 byte buddy: capacity
    // exists but no placement does.
    assert_eq!(dev.allocate(64), Err(AllocError::OutOfMemory));

    assert_eq!(dev.free(128), Ok(()));
    assert_eq!(dev.allocate(64), Ok(128));
}

#[test]
fn full_free_coalesces_to_a_single_root() {
    let mut dev: MemDevice<4> = MemDevice::new();

    for (size, expected) in [(64, 0), (32, 64), (32, 96), (64, 128), (16, 192), (16, 208)] {
        assert_eq!(dev.allocate(size), Ok(expected));
    }

    for block in [0, 64, 96, 128, 192, 208] {
        assert_eq!(dev.free(block), Ok(()));
    }

    let stats = dev.stats();
    assert_eq!(stats.node_count, 1);
    assert_eq!(stats.free_bytes, stats.mem_size);
}
