//! The refcounted allocator the generated programs link against: a
//! header-prefixed heap cell with an atomic reference count. This crate's
//! version is instrumented with counters so the lifetime simulation can
//! assert the balance invariant (1 from allocation + increments ==
//! decrements over every cell's lifetime).

use std::alloc::{Layout, alloc as raw_alloc, dealloc, handle_alloc_error};
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Cell header, stored immediately before the payload. The payload size
/// is kept so release can rebuild the allocation layout.
#[repr(C)]
struct Head {
    count: AtomicU32,
    size: u32,
}

const HEAD_SIZE: usize = size_of::<Head>();
const CELL_ALIGN: usize = 8;

/// An instrumented refcounted heap. Count operations are atomic so
/// concurrent holders in the generated program's execution model cannot
/// race to free or double-count a cell.
#[derive(Debug, Default)]
pub struct Heap {
    allocated: AtomicUsize,
    freed: AtomicUsize,
    increments: AtomicUsize,
    decrements: AtomicUsize,
    over_releases: AtomicUsize,
}

impl Heap {
    pub fn new() -> Self {
        Heap::default()
    }

    fn layout(size: usize) -> Layout {
        Layout::from_size_align(HEAD_SIZE + size, CELL_ALIGN).expect("cell layout")
    }

    fn head(ptr: *mut u8) -> *mut Head {
        unsafe { ptr.sub(HEAD_SIZE) as *mut Head }
    }

    /// Reserve header + payload and return a pointer past the header. The
    /// count starts at 1: the allocation itself is the first owner.
    pub fn alloc(&self, size: usize) -> *mut u8 {
        let layout = Self::layout(size);
        let base = unsafe { raw_alloc(layout) };
        if base.is_null() {
            handle_alloc_error(layout);
        }
        unsafe {
            ptr::write(
                base as *mut Head,
                Head {
                    count: AtomicU32::new(1),
                    size: size as u32,
                },
            );
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        unsafe { base.add(HEAD_SIZE) }
    }

    /// Atomically increment the count. Returns the same pointer so the
    /// call composes in expression position.
    ///
    /// # Safety
    /// `ptr` must be a payload pointer returned by [`Heap::alloc`] whose
    /// cell has not been released.
    pub unsafe fn add_ref(&self, ptr: *mut u8) -> *mut u8 {
        unsafe { &(*Self::head(ptr)).count }.fetch_add(1, Ordering::AcqRel);
        self.increments.fetch_add(1, Ordering::Relaxed);
        ptr
    }

    /// Atomically decrement the count; at zero the whole cell (header +
    /// payload) is released. Decrementing a cell already at zero is a
    /// defensive no-op: the count never goes negative.
    ///
    /// # Safety
    /// `ptr` must be a payload pointer returned by [`Heap::alloc`] whose
    /// cell has not been released.
    pub unsafe fn remove_ref(&self, ptr: *mut u8) {
        let head = Self::head(ptr);
        let result = unsafe { &(*head).count }.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |count| count.checked_sub(1),
        );
        match result {
            Err(_) => {
                self.over_releases.fetch_add(1, Ordering::Relaxed);
            }
            Ok(previous) => {
                self.decrements.fetch_add(1, Ordering::Relaxed);
                if previous == 1 {
                    let size = unsafe { (*head).size } as usize;
                    unsafe { dealloc(head as *mut u8, Self::layout(size)) };
                    self.freed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn freed(&self) -> usize {
        self.freed.load(Ordering::Relaxed)
    }

    /// Cells allocated but not yet released.
    pub fn live(&self) -> usize {
        self.allocated() - self.freed()
    }

    pub fn increments(&self) -> usize {
        self.increments.load(Ordering::Relaxed)
    }

    pub fn decrements(&self) -> usize {
        self.decrements.load(Ordering::Relaxed)
    }

    pub fn over_releases(&self) -> usize {
        self.over_releases.load(Ordering::Relaxed)
    }
}
