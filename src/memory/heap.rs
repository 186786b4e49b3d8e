//! Kernel heap manager.
//!
//! Design summary:
//! - Explicit doubly-linked free list threaded directly through block
//!   headers (`next`, `prev`, `size`, `magic`, `is_free`).
//! - First-fit allocation, splitting the found block when the remainder is
//!   worth keeping as its own block.
//! - `kfree` coalesces with its immediate address-order neighbors (found
//!   through `next`/`prev`, not a full-list rescan) when they are free too.
//! - Every header carries a magic constant checked on free; a mismatch is a
//!   corrupted-heap condition and is fatal.
//! - Heap growth beyond the initially reserved region is out of scope.

use alloc::vec::Vec;
use core::fmt::Write;
use core::mem::{align_of, size_of};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::drivers::screen::Screen;
use crate::logging;
use crate::sync::spinlock::SpinLock;

/// Marks a live, uncorrupted block header.
const HEADER_MAGIC: u32 = 0x4B41_4F53; // "KAOS"

const HEADER_SIZE: usize = size_of::<BlockHeader>();
const ALIGNMENT: usize = align_of::<usize>();
/// Minimum remainder size (header + at least a few payload bytes) worth
/// splitting off into its own free block.
const MIN_SPLIT_SIZE: usize = HEADER_SIZE + 16;

/// Virtual start address of the kernel heap arena (inside the direct-map
/// window, just past its first few megabytes).
const HEAP_START: usize = 0xC050_0000;
/// Heap size after `init()`.
const INITIAL_HEAP_SIZE: usize = 0x10000;

/// Per-block metadata stored directly in heap memory. `next`/`prev` chain
/// every block (free or allocated) in address order, so a block's
/// immediate neighbors can always be found without rescanning the heap.
#[repr(C)]
struct BlockHeader {
    next: *mut BlockHeader,
    prev: *mut BlockHeader,
    size: usize,
    magic: u32,
    is_free: bool,
}

impl BlockHeader {
    #[inline]
    fn check_magic(&self) {
        if self.magic != HEADER_MAGIC {
            panic!("kernel heap corruption detected: bad block magic");
        }
    }
}

struct HeapState {
    head: *mut BlockHeader,
    heap_start: usize,
    heap_end: usize,
}

struct GlobalHeap {
    inner: SpinLock<HeapState>,
    initialized: AtomicBool,
}

impl GlobalHeap {
    const fn new() -> Self {
        Self {
            inner: SpinLock::new(HeapState {
                head: core::ptr::null_mut(),
                heap_start: 0,
                heap_end: 0,
            }),
            initialized: AtomicBool::new(false),
        }
    }
}

// SAFETY: `inner` access is synchronized through `SpinLock`.
unsafe impl Sync for GlobalHeap {}

static HEAP: GlobalHeap = GlobalHeap::new();

#[inline]
fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[inline]
fn payload_ptr(block: *mut BlockHeader) -> *mut u8 {
    block.cast::<u8>().wrapping_add(HEADER_SIZE)
}

#[inline]
fn block_from_payload(ptr: *mut u8) -> *mut BlockHeader {
    ptr.wrapping_sub(HEADER_SIZE).cast::<BlockHeader>()
}

fn with_heap<R>(f: impl FnOnce(&mut HeapState) -> R) -> R {
    let mut guard = HEAP.inner.lock();
    f(&mut guard)
}

/// Initializes the heap as a single large free block spanning the whole
/// arena. Returns the heap size.
pub fn init() -> usize {
    let heap_start = HEAP_START;
    let heap_end = HEAP_START + INITIAL_HEAP_SIZE;

    // SAFETY: `heap_start..heap_end` is the reserved kernel heap region,
    // already mapped writable through the direct-map window by the VMM.
    unsafe {
        core::ptr::write_bytes(heap_start as *mut u8, 0, INITIAL_HEAP_SIZE);
        let head = heap_start as *mut BlockHeader;
        (*head).next = core::ptr::null_mut();
        (*head).prev = core::ptr::null_mut();
        (*head).size = INITIAL_HEAP_SIZE;
        (*head).magic = HEADER_MAGIC;
        (*head).is_free = true;

        with_heap(|state| {
            state.head = head;
            state.heap_start = heap_start;
            state.heap_end = heap_end;
        });
    }

    HEAP.initialized.store(true, Ordering::Release);
    INITIAL_HEAP_SIZE
}

pub fn is_initialized() -> bool {
    HEAP.initialized.load(Ordering::Acquire)
}

pub const HEAP_ALIGNMENT: usize = ALIGNMENT;

/// Allocates `size` bytes and returns a pointer to the payload, or null if
/// the heap has no block large enough (heap growth is out of scope).
pub fn malloc(size: usize) -> *mut u8 {
    let mut needed = size + HEADER_SIZE;
    needed = align_up(needed, ALIGNMENT);

    with_heap(|state| {
        let mut cursor = state.head;
        while !cursor.is_null() {
            // SAFETY: `cursor` is a live block header in this heap's chain.
            let block = unsafe { &mut *cursor };
            block.check_magic();

            if block.is_free && block.size >= needed {
                split_and_claim(block, cursor, needed);
                let ptr = payload_ptr(cursor);
                logging::logln(
                    "heap",
                    format_args!(
                        "[heap] alloc ptr={:#x} requested={} block={}",
                        ptr as usize, size, block.size
                    ),
                );
                return ptr;
            }
            cursor = block.next;
        }
        core::ptr::null_mut()
    })
}

/// Splits `block` if the remainder after satisfying `needed` bytes is
/// large enough to stand on its own, then marks the (possibly shrunk)
/// block allocated.
fn split_and_claim(block: &mut BlockHeader, block_ptr: *mut BlockHeader, needed: usize) {
    if block.size >= needed + MIN_SPLIT_SIZE {
        let remainder_addr = (block_ptr as usize) + needed;
        let remainder_size = block.size - needed;
        // SAFETY: `remainder_addr` lies strictly inside `block`'s own
        // extent, which is heap memory owned by this allocator.
        unsafe {
            let remainder = remainder_addr as *mut BlockHeader;
            (*remainder).size = remainder_size;
            (*remainder).magic = HEADER_MAGIC;
            (*remainder).is_free = true;
            (*remainder).next = block.next;
            (*remainder).prev = block_ptr;
            if !block.next.is_null() {
                (*block.next).prev = remainder;
            }
            block.next = remainder;
        }
        block.size = needed;
    }
    block.is_free = false;
}

/// Frees a previously allocated heap pointer, coalescing with free
/// neighbors found via `next`/`prev`.
pub fn free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    let block_ptr = block_from_payload(ptr);

    with_heap(|_state| {
        // SAFETY: `ptr` was returned by `malloc`, so `block_ptr` is a live
        // header.
        let block = unsafe { &mut *block_ptr };
        block.check_magic();
        block.is_free = true;
        logging::logln(
            "heap",
            format_args!("[heap] free ptr={:#x} block={}", ptr as usize, block.size),
        );

        coalesce_forward(block_ptr);
        let prev = block.prev;
        if !prev.is_null() {
            coalesce_forward(prev);
        }
    });
}

/// If `block_ptr`'s immediate successor is also free, merges it in place.
fn coalesce_forward(block_ptr: *mut BlockHeader) {
    // SAFETY: `block_ptr` is a live header belonging to this heap.
    let block = unsafe { &mut *block_ptr };
    if !block.is_free {
        return;
    }
    let next_ptr = block.next;
    if next_ptr.is_null() {
        return;
    }
    // SAFETY: `next_ptr`, if non-null, is a live header in this chain.
    let next = unsafe { &mut *next_ptr };
    next.check_magic();
    if !next.is_free {
        return;
    }

    block.size += next.size;
    block.next = next.next;
    if !next.next.is_null() {
        // SAFETY: `next.next`, if non-null, is a live header.
        unsafe { (*next.next).prev = block_ptr; }
    }
}

/// Runs heap self-tests and prints results to the screen.
pub fn run_self_test(screen: &mut Screen) {
    let mut failures = 0u32;
    if is_initialized() {
        logging::logln("heap", format_args!("[heap-test] reinitializing heap"));
    }
    init();

    // S1: alloc A, B, C (256B each); free B, A, C; alloc D (768B); D == A.
    let a = malloc(256);
    let b = malloc(256);
    let c = malloc(256);
    free(b);
    free(a);
    free(c);
    let d = malloc(768);

    if d == a {
        writeln!(screen, "  [ OK ] heap coalescing reuses freed span").unwrap();
    } else {
        failures += 1;
        writeln!(screen, "  [FAIL] heap coalescing reuses freed span").unwrap();
    }
    free(d);

    let mut values: Vec<u64> = Vec::with_capacity(16);
    for i in 0..16u64 {
        values.push(i);
    }
    if values.len() == 16 && values[0] == 0 && values[15] == 15 {
        writeln!(screen, "  [ OK ] rust alloc (Vec) on heap").unwrap();
    } else {
        failures += 1;
        writeln!(screen, "  [FAIL] rust alloc (Vec) on heap").unwrap();
    }

    if failures == 0 {
        writeln!(screen, "Heap self-test complete (OK).").unwrap();
    } else {
        writeln!(screen, "Heap self-test complete ({} failures).", failures).unwrap();
    }
}
