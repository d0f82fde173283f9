use buddypool::{FreeMem, GetMem, MemDevice};

// Frees of references that do not name an allocated block carry the
// failure status back in the record, on every path.
#[test]
fn bad_frees_report_failure() {
    let mut dev: MemDevice<4> = MemDevice::new();

    let mut get = GetMem::new(32);
    dev.get_mem(&mut get);
    assert_eq!(get.return_val, 0);

    // 128 points into free memory.
    let mut free = FreeMem::new(128);
    dev.free_mem(&mut free);
    assert_eq!(free.return_val, -1);

    let mut free = FreeMem::new(0);
    dev.free_mem(&mut free);
    assert_eq!(free.return_val, 0);

    // Already free.
    dev.free_mem(&mut free);
    assert_eq!(free.return_val, -1);
}
