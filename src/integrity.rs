//! Code-integrity verification.
//!
//! Records one CRC32-C checksum per page over the resident hypervisor image
//! at a trusted point in time and detects later tampering by recomputing
//! them. The checksum engine is selected once at initialization: the SSE4.2
//! `crc32` instruction when the executing processor advertises it, otherwise
//! a table-driven software implementation. Both engines produce bit-identical
//! results for identical input; that equivalence is a required property, not
//! an optimization detail.
//!
//! Verification only reports; reacting to a mismatch is the caller's
//! responsibility.

use alloc::vec::Vec;

use axerrno::{AxResult, ax_err, ax_err_type};

use crate::phys::PAGE_SIZE;

/// Reflected form of the Castagnoli polynomial.
const CRC32C_POLY: u32 = 0x82F6_3B38;

/// Byte-at-a-time lookup table, generated at compile time.
const CRC32C_TABLE: [u32; 256] = build_crc32c_table();

const fn build_crc32c_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut index = 0;
    while index < 256 {
        let mut crc = index as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ CRC32C_POLY
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[index] = crc;
        index += 1;
    }
    table
}

fn crc32c_sw(data: &[u8]) -> u32 {
    let mut crc = !0u32;
    for &byte in data {
        let index = (crc ^ byte as u32) & 0xff;
        crc = CRC32C_TABLE[index as usize] ^ (crc >> 8);
    }
    !crc
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub(crate) fn hardware_crc_supported() -> bool {
            raw_cpuid::CpuId::new()
                .get_feature_info()
                .is_some_and(|f| f.has_sse42())
        }

        /// Caller must have verified SSE4.2 support.
        #[target_feature(enable = "sse4.2")]
        unsafe fn crc32c_hw(data: &[u8]) -> u32 {
            use core::arch::x86_64::{_mm_crc32_u8, _mm_crc32_u64};

            let mut crc = !0u32 as u64;
            let mut chunks = data.chunks_exact(8);
            for chunk in chunks.by_ref() {
                let word = u64::from_le_bytes(chunk.try_into().unwrap());
                crc = unsafe { _mm_crc32_u64(crc, word) };
            }
            let mut crc = crc as u32;
            for &byte in chunks.remainder() {
                crc = unsafe { _mm_crc32_u8(crc, byte) };
            }
            !crc
        }
    } else {
        pub(crate) fn hardware_crc_supported() -> bool {
            false
        }
    }
}

/// Checksum engine, chosen once at [`IntegrityBaseline::initialize`] and
/// carried in the baseline rather than re-dispatched per call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CrcEngine {
    #[cfg_attr(not(target_arch = "x86_64"), allow(dead_code))]
    Hardware,
    Software,
}

impl CrcEngine {
    fn select() -> Self {
        if hardware_crc_supported() {
            CrcEngine::Hardware
        } else {
            CrcEngine::Software
        }
    }

    fn checksum(self, data: &[u8]) -> u32 {
        match self {
            #[cfg(target_arch = "x86_64")]
            CrcEngine::Hardware => unsafe { crc32c_hw(data) },
            _ => crc32c_sw(data),
        }
    }
}

/// Per-page CRC32-C checksums of a region, measured at a trusted point in
/// time. Read-only after [`initialize`](Self::initialize); dropping the
/// baseline releases the checksum table.
pub struct IntegrityBaseline {
    base: *const u8,
    pages: usize,
    checksums: Vec<u32>,
    engine: CrcEngine,
}

// `verify` only reads the measured region and the baseline table, so
// concurrent verification from multiple threads is safe.
unsafe impl Send for IntegrityBaseline {}
unsafe impl Sync for IntegrityBaseline {}

impl IntegrityBaseline {
    /// Measures the region's *current* contents, one checksum per page.
    ///
    /// Fails with `InvalidInput` if `base` is not page aligned, `size` is
    /// zero, or `size` is not a whole multiple of the page size.
    ///
    /// # Safety
    ///
    /// `[base, base + size)` must be mapped and readable for the lifetime of
    /// the returned baseline; [`verify`](Self::verify) re-reads it.
    pub unsafe fn initialize(base: *const u8, size: usize) -> AxResult<Self> {
        if base.is_null() || base as usize % PAGE_SIZE != 0 {
            return ax_err!(InvalidInput, "region is not page aligned");
        }
        if size == 0 || size % PAGE_SIZE != 0 {
            return ax_err!(InvalidInput, "size is not a whole number of pages");
        }

        let pages = size / PAGE_SIZE;
        let engine = CrcEngine::select();
        let mut checksums = Vec::new();
        checksums
            .try_reserve_exact(pages)
            .map_err(|_| ax_err_type!(NoMemory, "checksum table allocation failed"))?;
        for index in 0..pages {
            let page = unsafe { core::slice::from_raw_parts(base.add(index * PAGE_SIZE), PAGE_SIZE) };
            checksums.push(engine.checksum(page));
        }
        info!(
            "[HvCore] integrity baseline: {} pages at {:p}, {:?} engine",
            pages, base, engine
        );
        Ok(Self {
            base,
            pages,
            checksums,
            engine,
        })
    }

    /// Recomputes every page and returns the indices that no longer match
    /// the baseline, in ascending order. Empty means unmodified. Performs no
    /// remediation.
    pub fn verify(&self) -> Vec<usize> {
        let mut mismatches = Vec::new();
        for index in 0..self.pages {
            let page = unsafe {
                core::slice::from_raw_parts(self.base.add(index * PAGE_SIZE), PAGE_SIZE)
            };
            if self.engine.checksum(page) != self.checksums[index] {
                warn!(
                    "[HvCore] integrity mismatch in page {} of region {:p}",
                    index, self.base
                );
                mismatches.push(index);
            }
        }
        mismatches
    }

    /// Base of the measured region.
    pub fn region(&self) -> *const u8 {
        self.base
    }

    /// Number of measured pages.
    pub fn page_count(&self) -> usize {
        self.pages
    }

    /// Baseline checksum of one page, for callers driving incremental
    /// enforcement scans.
    pub fn page_checksum(&self, index: usize) -> Option<u32> {
        self.checksums.get(index).copied()
    }
}

impl Drop for IntegrityBaseline {
    fn drop(&mut self) {
        debug!(
            "[HvCore] integrity baseline over {:p} finalized",
            self.base
        );
    }
}
