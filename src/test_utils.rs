//! Shared test doubles.

pub mod mock {
    use core::ffi::c_void;

    use memory_addr::PhysAddr;

    use crate::hal::BringupHal;
    use crate::phys::BLOCK_SIZE;

    use std::alloc::{Layout, alloc_zeroed, dealloc};
    use std::thread;

    fn block_layout() -> Layout {
        Layout::from_size_align(BLOCK_SIZE, BLOCK_SIZE).unwrap()
    }

    fn reserve_host_block() -> Option<PhysAddr> {
        // Identity "phys" addresses: the mock hands out host pointers.
        let ptr = unsafe { alloc_zeroed(block_layout()) };
        if ptr.is_null() {
            None
        } else {
            Some(PhysAddr::from(ptr as usize))
        }
    }

    fn release_host_block(base: PhysAddr) {
        unsafe { dealloc(base.as_usize() as *mut u8, block_layout()) };
    }

    fn spawn_worker(entry: unsafe fn(*mut c_void), arg: *mut c_void) {
        // Raw pointers are not Send; the platform contract keeps `arg`
        // alive until `entry` ran, so shipping it as usize is sound.
        let arg = arg as usize;
        thread::spawn(move || unsafe { entry(arg as *mut c_void) });
    }

    /// A host environment with `N` simulated logical processors. Dispatch
    /// runs each work item on its own std thread; blocks come from the host
    /// allocator with identity phys-to-virt mapping.
    pub struct MockHal<const N: usize>;

    impl<const N: usize> BringupHal for MockHal<N> {
        fn processor_count() -> usize {
            N
        }

        fn current_processor() -> usize {
            0
        }

        fn queue_on_processor(
            _target: usize,
            entry: unsafe fn(*mut c_void),
            arg: *mut c_void,
        ) -> bool {
            spawn_worker(entry, arg);
            true
        }

        fn reserve_block() -> Option<PhysAddr> {
            reserve_host_block()
        }

        fn release_block(base: PhysAddr) {
            release_host_block(base);
        }

        fn phys_to_virt(paddr: PhysAddr) -> *mut u8 {
            paddr.as_usize() as *mut u8
        }
    }

    /// Like [`MockHal`], but the platform declines to queue work for
    /// processor `DECLINED`.
    pub struct DecliningQueueHal<const N: usize, const DECLINED: usize>;

    impl<const N: usize, const DECLINED: usize> BringupHal for DecliningQueueHal<N, DECLINED> {
        fn processor_count() -> usize {
            N
        }

        fn current_processor() -> usize {
            0
        }

        fn queue_on_processor(
            target: usize,
            entry: unsafe fn(*mut c_void),
            arg: *mut c_void,
        ) -> bool {
            if target == DECLINED {
                return false;
            }
            spawn_worker(entry, arg);
            true
        }

        fn reserve_block() -> Option<PhysAddr> {
            reserve_host_block()
        }

        fn release_block(base: PhysAddr) {
            release_host_block(base);
        }

        fn phys_to_virt(paddr: PhysAddr) -> *mut u8 {
            paddr.as_usize() as *mut u8
        }
    }

    /// A platform that is out of physical memory: every block reservation
    /// is declined.
    pub struct OutOfMemoryHal;

    impl BringupHal for OutOfMemoryHal {
        fn processor_count() -> usize {
            1
        }

        fn current_processor() -> usize {
            0
        }

        fn queue_on_processor(
            _target: usize,
            entry: unsafe fn(*mut c_void),
            arg: *mut c_void,
        ) -> bool {
            spawn_worker(entry, arg);
            true
        }

        fn reserve_block() -> Option<PhysAddr> {
            None
        }

        fn release_block(_base: PhysAddr) {
            unreachable!("no block was ever reserved");
        }

        fn phys_to_virt(paddr: PhysAddr) -> *mut u8 {
            paddr.as_usize() as *mut u8
        }
    }
}
