use core::ffi::c_void;

use memory_addr::PhysAddr;

/// Capabilities the hosting environment must supply.
///
/// Everything platform-specific lives behind this trait: how work is pushed
/// to another logical processor, and how raw physically-contiguous memory is
/// obtained before a general-purpose heap exists. On Windows the dispatch
/// capability maps to a high-importance targeted DPC; on UEFI it maps to MP
/// services; in tests it maps to plain threads.
pub trait BringupHal {
    /// Number of logical processors currently online.
    fn processor_count() -> usize;

    /// Identifier of the logical processor executing the caller.
    fn current_processor() -> usize;

    /// Queue `entry(arg)` to run on processor `target` at a priority that
    /// cannot be preempted indefinitely. Returns `false` if the platform
    /// declines, in which case `entry` must never run.
    ///
    /// `arg` must stay valid until `entry` has finished; the rendezvous
    /// engine guarantees this by blocking until every invocation completed.
    fn queue_on_processor(target: usize, entry: unsafe fn(*mut c_void), arg: *mut c_void) -> bool;

    /// Reserve one [`BLOCK_SIZE`](crate::BLOCK_SIZE)-sized,
    /// identically-aligned, physically contiguous block. Returns `None` if
    /// the platform is out of memory. The block is never handed back until
    /// [`release_block`](Self::release_block).
    fn reserve_block() -> Option<PhysAddr>;

    /// Return a block previously obtained from
    /// [`reserve_block`](Self::reserve_block) to the platform.
    fn release_block(base: PhysAddr);

    /// Translate a physical address inside a reserved block to an accessible
    /// pointer. Identity on bare metal.
    fn phys_to_virt(paddr: PhysAddr) -> *mut u8;
}
