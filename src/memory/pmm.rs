//! Physical memory manager.
//!
//! Design summary:
//! - Single flat bitmap over all usable RAM, one bit per 4 KiB frame.
//! - Parallel `u8` refcount array, one entry per frame, backing
//!   copy-on-write sharing between address spaces.
//! - First-fit allocation: scan the bitmap byte by byte, skipping bytes that
//!   are fully allocated (`0xFF`), then bit-scan the first free bit.
//! - Backed by a global spinlock for synchronized access.

use crate::drivers::screen::with_screen;
use crate::memory::bios::{self, BiosInformationBlock, BiosMemoryRegion};
use crate::sync::spinlock::SpinLock;
use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};

extern "C" {
    /// Linker-defined symbol marking the end of the kernel BSS section.
    static __bss_end: u8;
}

/// Size of a single page frame in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// Physical address where the kernel is loaded (1 MiB).
const KERNEL_OFFSET: u32 = 0x100000;

/// Physical address of the boot stack top (end of the reserved stack area).
const STACK_TOP: u32 = 0x400000;

/// Upper bound on physical RAM this PMM can describe (128 MiB), matching the
/// direct-map window the VMM builds at boot.
const MAX_PHYS_MEMORY: u32 = 128 * 1024 * 1024;

/// Total frames the bitmap/refcount arrays can describe.
const MAX_FRAMES: usize = (MAX_PHYS_MEMORY / PAGE_SIZE) as usize;

/// Bitmap size in bytes (one bit per frame).
const BITMAP_BYTES: usize = MAX_FRAMES / 8;

#[inline]
fn align_up(x: u32, align: u32) -> u32 {
    (x + align - 1) & !(align - 1)
}

/// A single allocated page frame, identified by its frame number.
pub struct PageFrame {
    pub pfn: u32,
}

impl PageFrame {
    #[inline]
    pub fn physical_address(&self) -> u32 {
        self.pfn * PAGE_SIZE
    }
}

/// Physical memory manager state: the bitmap, the refcount table, and the
/// total number of frames actually backed by usable RAM.
pub struct PhysicalMemoryManager {
    bitmap: [u8; BITMAP_BYTES],
    refcount: [u8; MAX_FRAMES],
    total_frames: u32,
}

impl PhysicalMemoryManager {
    const fn empty() -> Self {
        Self {
            bitmap: [0xFF; BITMAP_BYTES],
            refcount: [0; MAX_FRAMES],
            total_frames: 0,
        }
    }

    #[inline]
    fn mark_used(&mut self, pfn: u32) {
        let idx = pfn as usize;
        self.bitmap[idx / 8] |= 1 << (idx % 8);
    }

    #[inline]
    fn mark_free(&mut self, pfn: u32) {
        let idx = pfn as usize;
        self.bitmap[idx / 8] &= !(1 << (idx % 8));
    }

    #[inline]
    fn is_used(&self, pfn: u32) -> bool {
        let idx = pfn as usize;
        (self.bitmap[idx / 8] & (1 << (idx % 8))) != 0
    }

    /// Marks every frame in physical range `[start, end)` as used, rounding
    /// `start` down and `end` up to frame boundaries.
    fn reserve_range(&mut self, start: u32, end: u32) {
        if start >= end {
            return;
        }
        let first = start / PAGE_SIZE;
        let last = align_up(end, PAGE_SIZE) / PAGE_SIZE;
        for pfn in first..last.min(self.total_frames) {
            self.mark_used(pfn);
        }
    }

    /// Marks every frame in `[start, end)` free, used while unmarking usable
    /// BIOS memory-map ranges during init.
    fn unreserve_range(&mut self, start: u32, end: u32) {
        if start >= end {
            return;
        }
        let first = align_up(start, PAGE_SIZE) / PAGE_SIZE;
        let last = (end / PAGE_SIZE).min(self.total_frames);
        for pfn in first..last {
            self.mark_free(pfn);
        }
    }

    /// Finds and allocates the first free frame, setting its refcount to 1.
    /// Scans whole bitmap bytes first, skipping fully-used bytes (0xFF),
    /// then bit-scans the first byte with a free bit.
    pub fn alloc(&mut self) -> Option<PageFrame> {
        let used_bytes = align_up(self.total_frames, 8) as usize / 8;
        for byte_idx in 0..used_bytes {
            let byte = self.bitmap[byte_idx];
            if byte == 0xFF {
                continue;
            }
            let bit = (!byte).trailing_zeros();
            let pfn = byte_idx as u32 * 8 + bit;
            if pfn >= self.total_frames {
                continue;
            }
            self.mark_used(pfn);
            self.refcount[pfn as usize] = 1;
            return Some(PageFrame { pfn });
        }
        None
    }

    /// Decrements the frame's refcount; only actually frees the bitmap bit
    /// (and zeroes the refcount) once the count reaches zero. Returns `true`
    /// if the frame was released back to the free pool.
    pub fn free(&mut self, pfn: u32) -> bool {
        if pfn >= self.total_frames || !self.is_used(pfn) {
            return false;
        }
        let count = &mut self.refcount[pfn as usize];
        if *count > 1 {
            *count -= 1;
            return false;
        }
        *count = 0;
        self.mark_free(pfn);
        true
    }

    pub fn inc_ref(&mut self, pfn: u32) {
        if pfn < self.total_frames {
            self.refcount[pfn as usize] = self.refcount[pfn as usize].saturating_add(1);
        }
    }

    pub fn get_ref(&self, pfn: u32) -> u8 {
        if pfn < self.total_frames {
            self.refcount[pfn as usize]
        } else {
            0
        }
    }
}

struct GlobalPmm {
    inner: SpinLock<PhysicalMemoryManager>,
    initialized: AtomicBool,
    debug_enabled: AtomicBool,
}

impl GlobalPmm {
    const fn new() -> Self {
        Self {
            inner: SpinLock::new(PhysicalMemoryManager::empty()),
            initialized: AtomicBool::new(false),
            debug_enabled: AtomicBool::new(false),
        }
    }
}

// SAFETY: all mutable access goes through the SpinLock.
unsafe impl Sync for GlobalPmm {}

static PMM: GlobalPmm = GlobalPmm::new();

#[inline]
fn debug_enabled() -> bool {
    PMM.debug_enabled.load(Ordering::Acquire)
}

/// Initializes the physical memory manager from the BIOS-provided memory
/// map. `debug_output` enables per-alloc/free logging.
pub fn init(debug_output: bool) {
    // SAFETY: `__bss_end` is a linker-provided symbol with static lifetime.
    let kernel_end = unsafe { &__bss_end as *const u8 as u32 };

    // SAFETY: the bootloader populated the BIOS info block and memory map
    // at these fixed physical offsets before kernel entry.
    let (bib, regions) = unsafe {
        (
            &*(bios::BIB_OFFSET as *const BiosInformationBlock),
            bios::MEMORYMAP_OFFSET as *const BiosMemoryRegion,
        )
    };

    let mut pmm = PMM.inner.lock();
    pmm.refcount = [0; MAX_FRAMES];
    pmm.bitmap = [0xFF; BITMAP_BYTES];
    pmm.total_frames = MAX_FRAMES as u32;

    for i in 0..bib.memory_map_entries as usize {
        // SAFETY: `i` is bounded by `memory_map_entries`; `regions` points
        // at a contiguous array supplied by the bootloader.
        let r = unsafe { &*regions.add(i) };
        if r.region_type != 1 {
            continue;
        }
        // Ignore anything at or above 4 GiB; this PMM only tracks 32-bit
        // physical addresses.
        if r.start > u32::MAX as u64 {
            continue;
        }
        let start = r.start as u32;
        let end = start.saturating_add(r.size.min(u32::MAX as u64) as u32);
        pmm.unreserve_range(start, end.min(MAX_PHYS_MEMORY));
    }

    // Re-reserve the kernel image (and everything below it, real-mode data
    // included) plus the boot stack region.
    pmm.reserve_range(0, align_up(kernel_end, PAGE_SIZE));
    pmm.reserve_range(KERNEL_OFFSET.min(STACK_TOP), STACK_TOP);

    drop(pmm);
    PMM.debug_enabled.store(debug_output, Ordering::Release);
    PMM.initialized.store(true, Ordering::Release);
}

/// Executes a closure with exclusive access to the PMM state. The PMM's own
/// internal lock disables interrupts for the duration, so callers need no
/// extra synchronization.
pub fn with_pmm<R>(f: impl FnOnce(&mut PhysicalMemoryManager) -> R) -> R {
    debug_assert!(
        PMM.initialized.load(Ordering::Acquire),
        "PMM not initialized"
    );
    let mut guard = PMM.inner.lock();
    f(&mut guard)
}

/// Allocates a single frame, logging the event if debug output is enabled.
pub fn alloc_frame() -> Option<PageFrame> {
    let frame = with_pmm(|pmm| pmm.alloc());
    if let Some(ref f) = frame {
        if debug_enabled() {
            crate::logging::logln(
                "pmm",
                format_args!("PMM: allocated frame pfn=0x{:x} phys=0x{:x}", f.pfn, f.physical_address()),
            );
        }
    }
    frame
}

/// Drops a reference on `pfn`, actually releasing it once the refcount hits
/// zero.
pub fn free_frame(pfn: u32) {
    let released = with_pmm(|pmm| pmm.free(pfn));
    if debug_enabled() {
        crate::logging::logln(
            "pmm",
            format_args!(
                "PMM: {} frame pfn=0x{:x}",
                if released { "released" } else { "decremented" },
                pfn
            ),
        );
    }
}

/// Increments a frame's refcount (used when a COW-shared mapping or a
/// shared page directory gains another owner).
pub fn inc_ref(pfn: u32) {
    with_pmm(|pmm| pmm.inc_ref(pfn));
}

/// Returns a frame's current refcount.
pub fn get_ref(pfn: u32) -> u8 {
    with_pmm(|pmm| pmm.get_ref(pfn))
}

/// Runs PMM runtime self-tests and prints results to the screen.
pub fn run_self_test(stress_iters: u32) {
    #[inline]
    fn print_test_line(args: core::fmt::Arguments<'_>) {
        with_screen(|screen| {
            let _ = screen.write_fmt(args);
            let _ = writeln!(screen);
        });
    }

    let mut failures = 0u32;
    print_test_line(format_args!(
        "Running PMM self-test (stress: {})...",
        stress_iters
    ));

    let frame0 = match alloc_frame() {
        Some(f) => f,
        None => {
            print_test_line(format_args!("  [FAIL] alloc frame0"));
            return;
        }
    };
    let frame1 = match alloc_frame() {
        Some(f) => f,
        None => {
            print_test_line(format_args!("  [FAIL] alloc frame1"));
            free_frame(frame0.pfn);
            return;
        }
    };
    let frame2 = match alloc_frame() {
        Some(f) => f,
        None => {
            print_test_line(format_args!("  [FAIL] alloc frame2"));
            free_frame(frame1.pfn);
            free_frame(frame0.pfn);
            return;
        }
    };

    if frame0.pfn == frame1.pfn || frame1.pfn == frame2.pfn || frame0.pfn == frame2.pfn {
        failures += 1;
        print_test_line(format_args!("  [FAIL] allocated PFNs are not unique"));
    } else {
        print_test_line(format_args!("  [ OK ] unique PFNs on consecutive allocations"));
    }

    let reserved = |addr: u32| (KERNEL_OFFSET.min(STACK_TOP)..STACK_TOP).contains(&addr);
    if reserved(frame0.physical_address())
        || reserved(frame1.physical_address())
        || reserved(frame2.physical_address())
    {
        failures += 1;
        print_test_line(format_args!("  [FAIL] frame allocated in reserved range"));
    } else {
        print_test_line(format_args!("  [ OK ] reserved range is not allocated"));
    }

    let old_mid_pfn = frame1.pfn;
    free_frame(frame1.pfn);
    let reused = match alloc_frame() {
        Some(f) => f,
        None => {
            print_test_line(format_args!("  [FAIL] re-allocation after release"));
            free_frame(frame2.pfn);
            free_frame(frame0.pfn);
            return;
        }
    };
    if reused.pfn != old_mid_pfn {
        failures += 1;
        print_test_line(format_args!("  [FAIL] released frame was not reused first"));
    } else {
        print_test_line(format_args!("  [ OK ] released frame is reused"));
    }

    // Refcount behavior: a second reference must survive one free.
    inc_ref(reused.pfn);
    free_frame(reused.pfn);
    if get_ref(reused.pfn) == 1 {
        print_test_line(format_args!("  [ OK ] refcounted free keeps shared frame alive"));
    } else {
        failures += 1;
        print_test_line(format_args!("  [FAIL] refcounted free released a shared frame early"));
    }
    free_frame(reused.pfn);

    free_frame(frame2.pfn);
    free_frame(frame0.pfn);

    for i in 0..stress_iters {
        let f = match alloc_frame() {
            Some(f) => f,
            None => {
                failures += 1;
                print_test_line(format_args!("  [FAIL] stress alloc failed at iter {}", i));
                break;
            }
        };
        free_frame(f.pfn);
    }

    if failures == 0 {
        print_test_line(format_args!("PMM self-test PASSED"));
    } else {
        print_test_line(format_args!("PMM self-test FAILED ({} issue(s))", failures));
    }
}
