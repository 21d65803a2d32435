#![no_std]
#![doc = include_str!("../README.md")]

#[macro_use]
extern crate log;

extern crate alloc;

#[cfg(test)]
extern crate std;

mod broadcast;
mod hal;
mod integrity;
mod phys;
mod spinlock;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod tests;

pub use broadcast::{BroadcastWorker, broadcast};
pub use hal::BringupHal;
pub use integrity::IntegrityBaseline;
pub use phys::{BLOCK_SIZE, DEFAULT_MAX_BLOCKS, PAGE_SIZE, PAGES_PER_BLOCK, PhysMemPool};
pub use spinlock::{RawSpinLock, SpinLock, SpinLockGuard};
