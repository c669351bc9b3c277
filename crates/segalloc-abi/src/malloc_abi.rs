//! ABI layer for the allocation entry points (`seg_malloc`, `seg_free`,
//! `seg_calloc`, `seg_realloc`, `seg_checkheap`, `seg_usable_size`).
//!
//! One process-wide allocator lives behind a `parking_lot::Mutex` and is
//! built from the `SEGALLOC_*` environment on first use. The lock only
//! covers allocator metadata; callers keep writing their own blocks while it
//! is held, which [`MmapRegion`] tolerates by never borrowing the arena as a
//! slice.
//!
//! The symbols carry a `seg_` prefix, so the crate never shadows the system
//! allocator (test binaries included).
//!
//! Lifecycle records are only kept when `SEGALLOC_LOG` is set; they are then
//! written to stderr after each call.

use std::ffi::{c_int, c_void};

use parking_lot::Mutex;
use segalloc_core::config::ENV_LOG;
use segalloc_core::{AllocatorConfig, HeapError, SegAllocator};

use crate::mmap_region::MmapRegion;

static ALLOCATOR: Mutex<Option<SegAllocator<MmapRegion>>> = Mutex::new(None);

fn config_from_env() -> AllocatorConfig {
    let config = AllocatorConfig::from_env();
    if std::env::var_os(ENV_LOG).is_none() {
        return config.with_log_level(None);
    }
    config
}

fn build(config: AllocatorConfig) -> Result<SegAllocator<MmapRegion>, HeapError> {
    let region = MmapRegion::reserve(config.max_heap)?;
    SegAllocator::init(region, config)
}

/// Run `f` on the global allocator, creating it on first use. `None` when the
/// allocator cannot be set up.
fn with_allocator<T>(f: impl FnOnce(&mut SegAllocator<MmapRegion>) -> T) -> Option<T> {
    let mut guard = ALLOCATOR.lock();
    if guard.is_none() {
        match build(config_from_env()) {
            Ok(alloc) => *guard = Some(alloc),
            Err(err) => {
                eprintln!("segalloc: init failed: {err}");
                return None;
            }
        }
    }
    let alloc = guard.as_mut()?;
    let out = f(alloc);
    flush_logs(alloc);
    Some(out)
}

fn flush_logs(alloc: &mut SegAllocator<MmapRegion>) {
    if alloc.config().log_level.is_none() {
        return;
    }
    for rec in alloc.drain_lifecycle_logs() {
        eprintln!(
            "segalloc: {} {} {} outcome={} addr={:?} size={:?} {}",
            rec.level.as_str(),
            rec.trace_id,
            rec.event,
            rec.outcome,
            rec.addr,
            rec.size,
            rec.details
        );
    }
}

#[cfg(target_os = "linux")]
fn set_errno(value: c_int) {
    // SAFETY: `__errno_location` returns this thread's errno slot.
    unsafe {
        *libc::__errno_location() = value;
    }
}

#[cfg(not(target_os = "linux"))]
fn set_errno(_value: c_int) {}

fn to_ptr(alloc: &SegAllocator<MmapRegion>, addr: Option<usize>) -> *mut c_void {
    addr.map_or(std::ptr::null_mut(), |addr| alloc.region().pointer(addr))
}

fn to_addr(ptr: *mut c_void) -> Option<usize> {
    (!ptr.is_null()).then_some(ptr as usize)
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

/// (Re)create the global allocator from the environment. Returns 0 on
/// success and -1 if the region cannot be reserved or grown.
///
/// # Safety
///
/// Every pointer obtained before the call is invalidated.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn seg_init() -> c_int {
    let mut guard = ALLOCATOR.lock();
    *guard = None;
    match build(config_from_env()) {
        Ok(alloc) => {
            *guard = Some(alloc);
            0
        }
        Err(err) => {
            eprintln!("segalloc: init failed: {err}");
            -1
        }
    }
}

// ---------------------------------------------------------------------------
// malloc / free
// ---------------------------------------------------------------------------

/// Allocate `size` bytes of uninitialized, 8-byte aligned memory.
///
/// Returns null for `size == 0` and, with `errno = ENOMEM`, when the heap
/// cannot grow.
///
/// # Safety
///
/// The returned pointer must be released exactly once with `seg_free` or
/// `seg_realloc`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn seg_malloc(size: usize) -> *mut c_void {
    let out = with_allocator(|a| {
        let addr = a.allocate(size);
        to_ptr(a, addr)
    })
    .unwrap_or(std::ptr::null_mut());
    if out.is_null() && size != 0 {
        set_errno(libc::ENOMEM);
    }
    out
}

/// Release memory from `seg_malloc`/`seg_calloc`/`seg_realloc`. Null is a
/// no-op; pointers the allocator does not own are ignored.
///
/// # Safety
///
/// `ptr` must not be used after the call, and no other thread may access
/// its block during the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn seg_free(ptr: *mut c_void) {
    let Some(addr) = to_addr(ptr) else {
        return;
    };
    with_allocator(|a| a.deallocate(Some(addr)));
}

// ---------------------------------------------------------------------------
// calloc / realloc
// ---------------------------------------------------------------------------

/// Allocate zeroed memory for `nmemb` elements of `size` bytes. Overflow of
/// `nmemb * size` returns null with `errno = ENOMEM`.
///
/// # Safety
///
/// As for `seg_malloc`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn seg_calloc(nmemb: usize, size: usize) -> *mut c_void {
    let out = with_allocator(|a| {
        let addr = a.allocate_zeroed(nmemb, size);
        to_ptr(a, addr)
    })
    .unwrap_or(std::ptr::null_mut());
    if out.is_null() && nmemb != 0 && size != 0 {
        set_errno(libc::ENOMEM);
    }
    out
}

/// Resize an allocation. Null `ptr` allocates; `size == 0` frees and returns
/// null. On failure the original block is untouched and null is returned.
///
/// # Safety
///
/// `ptr` must be null or a live pointer from this allocator, and no other
/// thread may access its block during the call. On success the old pointer
/// must no longer be used.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn seg_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    let out = with_allocator(|a| {
        let addr = a.reallocate(to_addr(ptr), size);
        to_ptr(a, addr)
    })
    .unwrap_or(std::ptr::null_mut());
    if out.is_null() && size != 0 {
        set_errno(libc::ENOMEM);
    }
    out
}

// ---------------------------------------------------------------------------
// introspection
// ---------------------------------------------------------------------------

/// Run the heap validator: 0 when consistent, 1 otherwise. Non-zero
/// `verbose` prints each violation and a heap dump to stderr.
///
/// # Safety
///
/// Safe to call at any time; marked `unsafe` for symmetry with the C ABI.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn seg_checkheap(verbose: c_int) -> c_int {
    with_allocator(|a| a.check(verbose != 0)).unwrap_or(1)
}

/// Usable bytes behind a live pointer; 0 for null or unknown pointers.
///
/// # Safety
///
/// Safe to call at any time; marked `unsafe` for symmetry with the C ABI.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn seg_usable_size(ptr: *mut c_void) -> usize {
    let Some(addr) = to_addr(ptr) else {
        return 0;
    };
    with_allocator(|a| a.usable_size(addr))
        .flatten()
        .unwrap_or(0)
}
