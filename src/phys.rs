//! Physical page-pool allocator.
//!
//! Before paging and a general-purpose heap exist, hypervisor memory comes
//! from here: 2 MiB physically contiguous blocks reserved from the platform,
//! each subdivided into 512 base pages of 4 KiB tracked by one bitmap bit
//! apiece. The general-purpose heap above layers on this allocator.
//!
//! The block list is kept sorted by base address so that `free` can locate
//! the owning block with a binary search. Blocks are reserved lazily, one at
//! a time, up to a configured ceiling, and are never returned to the
//! platform while the pool is live (a stated limitation, not a bug); the
//! pool only hands everything back when dropped.

use alloc::vec::Vec;
use core::cmp::Ordering;
use core::marker::PhantomData;

use axerrno::{AxResult, ax_err, ax_err_type};
use bit_field::BitArray;
use memory_addr::PhysAddr;

pub use memory_addr::PAGE_SIZE_4K as PAGE_SIZE;

use crate::hal::BringupHal;
use crate::spinlock::SpinLock;

/// Base pages per reserved block.
pub const PAGES_PER_BLOCK: usize = 512;
/// Size of one block reserved from the platform (2 MiB).
pub const BLOCK_SIZE: usize = PAGES_PER_BLOCK * PAGE_SIZE;
/// Default pool ceiling: 64 blocks, i.e. 128 MiB of reserved memory.
pub const DEFAULT_MAX_BLOCKS: usize = 64;

/// One 2 MiB block and its slot bitmap. Bit `i` is set iff base page `i`
/// is allocated to exactly one outstanding request.
struct PageBlock {
    base: PhysAddr,
    bitmap: [u64; PAGES_PER_BLOCK / 64],
}

impl PageBlock {
    fn new(base: PhysAddr) -> Self {
        Self {
            base,
            bitmap: [0; PAGES_PER_BLOCK / 64],
        }
    }

    /// First-fit scan for a run of `pages` contiguous clear bits.
    fn find_free_run(&self, pages: usize) -> Option<usize> {
        let mut run = 0;
        for bit in 0..PAGES_PER_BLOCK {
            if self.bitmap.get_bit(bit) {
                run = 0;
            } else {
                run += 1;
                if run == pages {
                    return Some(bit + 1 - pages);
                }
            }
        }
        None
    }

    fn set_run(&mut self, first: usize, pages: usize) {
        for bit in first..first + pages {
            self.bitmap.set_bit(bit, true);
        }
    }

    /// Clears `[first, first + pages)`, refusing if any bit is already
    /// clear. Leaves the bitmap untouched on refusal.
    fn clear_run(&mut self, first: usize, pages: usize) -> bool {
        for bit in first..first + pages {
            if !self.bitmap.get_bit(bit) {
                return false;
            }
        }
        for bit in first..first + pages {
            self.bitmap.set_bit(bit, false);
        }
        true
    }

    fn page_addr(&self, slot: usize) -> PhysAddr {
        PhysAddr::from(self.base.as_usize() + slot * PAGE_SIZE)
    }
}

struct PoolInner {
    blocks: Vec<PageBlock>,
}

/// A bitmap-tracked pool of fixed-size physical memory blocks.
///
/// All mutation happens under a single [`SpinLock`], so allocate/free calls
/// are totally ordered across the system. Construct once at bring-up and
/// keep alive for the hypervisor's lifetime; dropping the pool returns every
/// reserved block to the platform.
pub struct PhysMemPool<H: BringupHal> {
    inner: SpinLock<PoolInner>,
    max_blocks: usize,
    _marker: PhantomData<H>,
}

impl<H: BringupHal> PhysMemPool<H> {
    /// Creates an empty pool allowed to reserve at most `max_blocks` blocks
    /// from the platform. The block list itself is allocated up front so
    /// `allocate` never touches the heap.
    pub fn new(max_blocks: usize) -> AxResult<Self> {
        if max_blocks == 0 {
            return ax_err!(InvalidInput, "pool ceiling must be at least one block");
        }
        let mut blocks = Vec::new();
        blocks
            .try_reserve_exact(max_blocks)
            .map_err(|_| ax_err_type!(NoMemory, "block list allocation failed"))?;
        Ok(Self {
            inner: SpinLock::new(PoolInner { blocks }),
            max_blocks,
            _marker: PhantomData,
        })
    }

    /// Allocates `length` bytes of physically contiguous memory, rounded up
    /// to whole base pages. A single request never spans blocks, so the
    /// rounded length must fit in one block.
    pub fn allocate(&self, length: usize) -> AxResult<PhysAddr> {
        if length == 0 {
            return ax_err!(InvalidInput, "zero-length allocation");
        }
        let pages = length.div_ceil(PAGE_SIZE);
        if pages > PAGES_PER_BLOCK {
            return ax_err!(InvalidInput, "request exceeds one block");
        }

        let mut inner = self.inner.lock();
        // Scan existing blocks in reservation (= address) order.
        for block in inner.blocks.iter_mut() {
            if let Some(first) = block.find_free_run(pages) {
                block.set_run(first, pages);
                return Ok(block.page_addr(first));
            }
        }

        // No block has a long-enough run; grow the pool by one block.
        if inner.blocks.len() == self.max_blocks {
            return ax_err!(NoMemory, "block pool reached its configured ceiling");
        }
        let base = H::reserve_block()
            .ok_or_else(|| ax_err_type!(Io, "platform declined block reservation"))?;
        assert_ne!(base.as_usize(), 0);
        debug_assert_eq!(base.as_usize() % BLOCK_SIZE, 0);

        let mut block = PageBlock::new(base);
        block.set_run(0, pages);
        let at = inner.blocks.partition_point(|b| b.base < base);
        inner.blocks.insert(at, block);
        info!(
            "[HvCore] reserved block #{} at {:#x}",
            inner.blocks.len(),
            base
        );
        Ok(base)
    }

    /// Releases the pages backing `(addr, length)`. The range must be
    /// exactly a previously returned allocation; misaligned, foreign or
    /// partially-free ranges are refused with `InvalidInput` and the bitmap
    /// is left unchanged.
    pub fn free(&self, addr: PhysAddr, length: usize) -> AxResult {
        if length == 0 {
            return ax_err!(InvalidInput, "zero-length free");
        }
        if addr.as_usize() % PAGE_SIZE != 0 {
            return ax_err!(InvalidInput, "freed address is not page aligned");
        }
        let pages = length.div_ceil(PAGE_SIZE);

        let mut inner = self.inner.lock();
        let index = match inner.blocks.binary_search_by(|block| {
            if block.base.as_usize() + BLOCK_SIZE <= addr.as_usize() {
                Ordering::Less
            } else if block.base > addr {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }) {
            Ok(index) => index,
            Err(_) => return ax_err!(InvalidInput, "address not owned by the pool"),
        };

        let block = &mut inner.blocks[index];
        let first = (addr.as_usize() - block.base.as_usize()) / PAGE_SIZE;
        if first + pages > PAGES_PER_BLOCK {
            return ax_err!(InvalidInput, "freed range extends past its block");
        }
        if !block.clear_run(first, pages) {
            return ax_err!(InvalidInput, "freed range is not fully allocated");
        }
        debug!("[HvCore] released {:#x} ({} pages)", addr, pages);
        Ok(())
    }

    /// Number of blocks currently reserved from the platform.
    pub fn reserved_blocks(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    /// Invokes `callback(base, BLOCK_SIZE)` for every reserved block, in
    /// address order. Used by callers that register the pool's memory for
    /// protection.
    pub fn enumerate_blocks(&self, mut callback: impl FnMut(PhysAddr, usize)) {
        let inner = self.inner.lock();
        for block in inner.blocks.iter() {
            callback(block.base, BLOCK_SIZE);
        }
    }
}

impl<H: BringupHal> Drop for PhysMemPool<H> {
    fn drop(&mut self) {
        for block in self.inner.get_mut().blocks.drain(..) {
            debug!("[HvCore] returning block {:#x} to the platform", block.base);
            H::release_block(block.base);
        }
    }
}
