//! Cross-component bring-up scenarios.

use core::ffi::c_void;
use core::sync::atomic::{AtomicUsize, Ordering};

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::vec::Vec;

use crate::broadcast::broadcast;
use crate::hal::BringupHal;
use crate::integrity::IntegrityBaseline;
use crate::phys::{PAGE_SIZE, PhysMemPool};
use crate::test_utils::mock::MockHal;

type Hal = MockHal<4>;

struct ActivationCtx {
    pool: PhysMemPool<Hal>,
    per_cpu_pages: Mutex<Vec<(usize, usize)>>,
    activated: AtomicUsize,
}

/// Models per-core virtualization activation: each processor claims one
/// page of per-CPU state from the shared pool and initializes it.
fn activate(context: *mut c_void, processor_id: usize) {
    let ctx = unsafe { &*(context as *const ActivationCtx) };
    let page = ctx.pool.allocate(PAGE_SIZE).unwrap();
    unsafe {
        core::ptr::write_bytes(Hal::phys_to_virt(page), 0xaa, PAGE_SIZE);
    }
    ctx.per_cpu_pages
        .lock()
        .unwrap()
        .push((processor_id, page.as_usize()));
    ctx.activated.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn test_fan_out_allocates_distinct_per_cpu_state() {
    let ctx = ActivationCtx {
        pool: PhysMemPool::new(1).unwrap(),
        per_cpu_pages: Mutex::new(Vec::new()),
        activated: AtomicUsize::new(0),
    };

    broadcast::<Hal>(activate, &ctx as *const ActivationCtx as *mut c_void).unwrap();

    assert_eq!(ctx.activated.load(Ordering::SeqCst), 4);
    let pages = ctx.per_cpu_pages.lock().unwrap();
    assert_eq!(pages.len(), 4);

    let processors: BTreeSet<usize> = pages.iter().map(|&(p, _)| p).collect();
    let addrs: BTreeSet<usize> = pages.iter().map(|&(_, a)| a).collect();
    assert_eq!(processors.len(), 4, "a processor was skipped or ran twice");
    assert_eq!(addrs.len(), 4, "per-CPU pages overlap");

    // Deactivation path: every per-CPU page goes back to the pool.
    for &(_, addr) in pages.iter() {
        ctx.pool.free(addr.into(), PAGE_SIZE).unwrap();
    }
}

#[test]
fn test_baseline_over_pool_backed_region() {
    let pool = PhysMemPool::<Hal>::new(1).unwrap();
    let region = pool.allocate(4 * PAGE_SIZE).unwrap();
    let virt = Hal::phys_to_virt(region);

    // Stamp a recognizable image into the region.
    for offset in 0..4 * PAGE_SIZE {
        unsafe { virt.add(offset).write((offset % 251) as u8) };
    }

    let baseline = unsafe { IntegrityBaseline::initialize(virt, 4 * PAGE_SIZE) }.unwrap();
    assert!(baseline.verify().is_empty());

    // Tampering with one page is pinned to exactly that page.
    unsafe { virt.add(3 * PAGE_SIZE + 17).write(0xff) };
    assert_eq!(baseline.verify(), [3]);

    drop(baseline);
    pool.free(region, 4 * PAGE_SIZE).unwrap();
}
