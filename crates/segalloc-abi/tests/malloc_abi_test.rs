#![cfg(unix)]

use std::ffi::c_void;

use parking_lot::{Mutex, MutexGuard};
use segalloc_abi::malloc_abi::{
    seg_calloc, seg_checkheap, seg_free, seg_init, seg_malloc, seg_realloc, seg_usable_size,
};
use segalloc_core::config::ENV_MAX_HEAP;

/// The entry points share one global allocator; tests take turns.
static TEST_LOCK: Mutex<()> = Mutex::new(());

fn fresh_heap() -> MutexGuard<'static, ()> {
    let guard = TEST_LOCK.lock();
    // SAFETY: no pointers from earlier tests are used after re-init.
    assert_eq!(unsafe { seg_init() }, 0);
    guard
}

unsafe fn fill(ptr: *mut c_void, len: usize, byte: u8) {
    // SAFETY: caller guarantees `len` usable bytes at `ptr`.
    unsafe { std::ptr::write_bytes(ptr.cast::<u8>(), byte, len) };
}

unsafe fn all_equal(ptr: *const c_void, len: usize, byte: u8) -> bool {
    // SAFETY: caller guarantees `len` readable bytes at `ptr`.
    let bytes = unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len) };
    bytes.iter().all(|&b| b == byte)
}

#[test]
fn malloc_free_round_trip() {
    let _guard = fresh_heap();
    unsafe {
        let p = seg_malloc(100);
        assert!(!p.is_null());
        assert_eq!(p as usize % 8, 0);
        assert!(seg_usable_size(p) >= 100);
        fill(p, 100, 0xA5);
        assert!(all_equal(p, 100, 0xA5));
        seg_free(p);
        assert_eq!(seg_usable_size(p), 0);
        assert_eq!(seg_checkheap(0), 0);
    }
}

#[test]
fn freed_memory_is_reused() {
    let _guard = fresh_heap();
    unsafe {
        let p = seg_malloc(64);
        seg_free(p);
        let q = seg_malloc(64);
        assert_eq!(p, q);
        seg_free(q);
    }
}

#[test]
fn null_and_zero_edge_cases() {
    let _guard = fresh_heap();
    unsafe {
        assert!(seg_malloc(0).is_null());
        seg_free(std::ptr::null_mut());
        let p = seg_realloc(std::ptr::null_mut(), 32);
        assert!(!p.is_null());
        assert!(seg_realloc(p, 0).is_null());
        assert_eq!(seg_usable_size(std::ptr::null_mut()), 0);
        assert_eq!(seg_checkheap(1), 0);
    }
}

#[test]
fn calloc_zeroes_and_rejects_overflow() {
    let _guard = fresh_heap();
    unsafe {
        let p = seg_malloc(256);
        fill(p, 256, 0xFF);
        seg_free(p);
        let z = seg_calloc(32, 8);
        assert!(!z.is_null());
        assert!(all_equal(z, 256, 0));
        assert!(seg_calloc(usize::MAX, 16).is_null());
        seg_free(z);
    }
}

#[test]
fn realloc_keeps_contents() {
    let _guard = fresh_heap();
    unsafe {
        let p = seg_malloc(100);
        let _fence = seg_malloc(8);
        fill(p, 100, 0x3C);
        let q = seg_realloc(p, 4000);
        assert!(!q.is_null());
        assert!(all_equal(q, 100, 0x3C));
        assert!(seg_usable_size(q) >= 4000);
        assert_eq!(seg_checkheap(0), 0);
    }
}

#[test]
fn foreign_pointers_are_ignored() {
    let _guard = fresh_heap();
    let mut local = [0u64; 4];
    unsafe {
        let p = seg_malloc(24);
        seg_free(local.as_mut_ptr().cast());
        assert_eq!(seg_usable_size(local.as_mut_ptr().cast()), 0);
        assert!(seg_usable_size(p) >= 24);
        assert_eq!(seg_checkheap(0), 0);
    }
}

#[cfg(target_os = "linux")]
fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(target_os = "linux")]
fn clear_errno() {
    // SAFETY: `__errno_location` returns this thread's errno slot.
    unsafe { *libc::__errno_location() = 0 };
}

#[cfg(target_os = "linux")]
#[test]
fn exhausted_heap_sets_enomem() {
    let _guard = TEST_LOCK.lock();
    // SAFETY: the environment is only read under TEST_LOCK, which this test
    // holds until the variable is removed again.
    unsafe { std::env::set_var(ENV_MAX_HEAP, "4096") };
    unsafe {
        assert_eq!(seg_init(), 0);

        clear_errno();
        assert!(seg_malloc(1 << 20).is_null());
        assert_eq!(errno(), libc::ENOMEM);

        clear_errno();
        assert!(seg_calloc(usize::MAX, 2).is_null());
        assert_eq!(errno(), libc::ENOMEM);

        let p = seg_malloc(64);
        assert!(!p.is_null());
        fill(p, 64, 0x11);
        clear_errno();
        assert!(seg_realloc(p, 1 << 20).is_null());
        assert_eq!(errno(), libc::ENOMEM);
        assert!(all_equal(p, 64, 0x11));
        assert_eq!(seg_checkheap(0), 0);

        std::env::remove_var(ENV_MAX_HEAP);
        assert_eq!(seg_init(), 0);
    }
}

#[test]
fn threads_write_payloads_while_others_allocate() {
    let _guard = fresh_heap();
    let workers: Vec<_> = (0..4u8)
        .map(|tag| {
            std::thread::spawn(move || {
                for round in 0..500usize {
                    let len = 16 + (round * 37 + usize::from(tag) * 11) % 400;
                    // SAFETY: each thread only touches blocks it allocated.
                    unsafe {
                        let p = seg_malloc(len);
                        assert!(!p.is_null());
                        fill(p, len, tag);
                        let q = seg_realloc(p, len * 2);
                        assert!(!q.is_null());
                        assert!(all_equal(q, len, tag));
                        seg_free(q);
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }
    assert_eq!(unsafe { seg_checkheap(0) }, 0);
}
