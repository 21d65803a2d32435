//! Synchronous cross-processor rendezvous.
//!
//! Hypervisor bring-up must flip virtualization hardware on (or off) on
//! every logical processor at once; leaving a subset activated is unsafe.
//! [`broadcast`] fans a worker out to each online processor and blocks the
//! caller behind an atomic barrier until the last invocation has finished.
//! There is deliberately no cancellation and no timeout.

use alloc::vec::Vec;
use core::ffi::c_void;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicUsize, Ordering};

use axerrno::{AxResult, ax_err, ax_err_type};

use crate::hal::BringupHal;

/// Routine executed exactly once on every online logical processor.
///
/// Invocations on different processors run truly concurrently with no
/// mutual exclusion or ordering among them; workers touching shared state
/// must synchronize internally. `context` is the pointer passed to
/// [`broadcast`] and must remain valid until the call returns.
pub type BroadcastWorker = fn(context: *mut c_void, processor_id: usize);

/// One per-processor dispatch slot. Lives on the caller's stack (inside
/// [`broadcast`]) until the barrier count drains to zero.
struct DispatchDescriptor {
    worker: BroadcastWorker,
    context: *mut c_void,
    remaining: *const AtomicUsize,
    processor: usize,
}

/// Trampoline handed to the platform dispatch capability.
///
/// The decrement happens strictly after the worker has returned, so the
/// caller's spin loop cannot observe zero while any worker is still running.
unsafe fn broadcast_entry(arg: *mut c_void) {
    let desc = unsafe { &*(arg as *const DispatchDescriptor) };
    (desc.worker)(desc.context, desc.processor);
    unsafe { &*desc.remaining }.fetch_sub(1, Ordering::AcqRel);
}

/// Runs `worker(context, processor_id)` exactly once on every logical
/// processor online at the time of the call, returning only after all
/// invocations have completed.
///
/// Errors:
/// - `NoMemory` if the dispatch descriptors cannot be allocated (nothing is
///   queued in that case).
/// - `Io` if the platform declines to queue work for some processor. The
///   invocations already in flight are still drained before returning, so
///   the caller never races a live worker.
pub fn broadcast<H: BringupHal>(worker: BroadcastWorker, context: *mut c_void) -> AxResult {
    // Snapshot of the online processor count; the platform contract is that
    // it does not change while bring-up is in progress.
    let count = H::processor_count();
    let remaining = AtomicUsize::new(count);

    let mut descriptors: Vec<DispatchDescriptor> = Vec::new();
    descriptors
        .try_reserve_exact(count)
        .map_err(|_| ax_err_type!(NoMemory, "broadcast descriptor allocation failed"))?;
    for processor in 0..count {
        descriptors.push(DispatchDescriptor {
            worker,
            context,
            remaining: &remaining,
            processor,
        });
    }

    // Capacity was reserved up front, so descriptor addresses are stable
    // from here on.
    let mut declined = 0usize;
    for desc in &descriptors {
        let arg = desc as *const DispatchDescriptor as *mut c_void;
        if !H::queue_on_processor(desc.processor, broadcast_entry, arg) {
            // This slot will never run; retire it so the barrier can still
            // drain the work already in flight.
            remaining.fetch_sub(1, Ordering::AcqRel);
            declined += 1;
            warn!(
                "[HvCore] platform declined broadcast work for processor {}",
                desc.processor
            );
        }
    }

    while remaining.load(Ordering::Acquire) != 0 {
        spin_loop();
    }

    if declined != 0 {
        return ax_err!(Io, "broadcast did not reach every processor");
    }
    Ok(())
}
