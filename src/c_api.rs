//! C `malloc` family over a process-wide [`ArenaAllocator`].
//!
//! Enabled with `--features c_api`. Link the `cdylib` or `staticlib` ahead of
//! libc (or `LD_PRELOAD` it) to replace the system allocator.

use core::{
  alloc::{GlobalAlloc, Layout},
  ptr::{self, NonNull, null_mut},
};

use crate::arena::ArenaAllocator;

static ALLOCATOR: ArenaAllocator = ArenaAllocator::new();

const MALLOC_ALIGN: usize = 16;

#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc(size: usize) -> *mut u8 {
  ALLOCATOR.allocate(size).as_ptr()
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut u8) {
  if let Some(ptr) = NonNull::new(ptr) {
    unsafe { ALLOCATOR.free(ptr) }
  }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut u8 {
  let Some(total) = nmemb.checked_mul(size) else {
    return null_mut();
  };
  let ptr = ALLOCATOR.allocate(total).as_ptr();
  // Recycled slots carry old contents; fresh mappings are already zero.
  unsafe { ptr::write_bytes(ptr, 0, total) };
  ptr
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn realloc(ptr: *mut u8, size: usize) -> *mut u8 {
  let Some(old) = NonNull::new(ptr) else {
    return ALLOCATOR.allocate(size).as_ptr();
  };
  if size == 0 {
    unsafe { ALLOCATOR.free(old) };
    return null_mut();
  }
  unsafe { ALLOCATOR.reallocate(old, size) }.as_ptr()
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn posix_memalign(memptr: *mut *mut u8, alignment: usize, size: usize) -> i32 {
  if !alignment.is_power_of_two() || alignment < size_of::<*mut u8>() {
    return libc::EINVAL;
  }
  let layout = match Layout::from_size_align(size, alignment.max(MALLOC_ALIGN)) {
    Ok(layout) => layout,
    Err(_) => return libc::ENOMEM,
  };

  let ptr = unsafe { ALLOCATOR.alloc(layout) };
  unsafe { *memptr = ptr };
  0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn aligned_alloc(alignment: usize, size: usize) -> *mut u8 {
  unsafe { memalign(alignment, size) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memalign(alignment: usize, size: usize) -> *mut u8 {
  if !alignment.is_power_of_two() {
    return null_mut();
  }
  match Layout::from_size_align(size, alignment.max(MALLOC_ALIGN)) {
    Ok(layout) => unsafe { ALLOCATOR.alloc(layout) },
    Err(_) => null_mut(),
  }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc_usable_size(ptr: *mut u8) -> usize {
  match NonNull::new(ptr) {
    Some(ptr) => unsafe { ALLOCATOR.usable_size(ptr) },
    None => 0,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn malloc_family_round_trip() {
    unsafe {
      let ptr = malloc(40);
      assert_eq!(malloc_usable_size(ptr), 64);
      ptr.write_bytes(0x11, 40);

      let grown = realloc(ptr, 10_000);
      assert!(core::slice::from_raw_parts(grown, 40).iter().all(|&b| b == 0x11));
      assert!(malloc_usable_size(grown) >= 10_000);
      free(grown);

      let zeroed = calloc(16, 8);
      assert!(core::slice::from_raw_parts(zeroed, 128).iter().all(|&b| b == 0));
      free(zeroed);

      assert!(calloc(usize::MAX, 2).is_null());
      assert!(realloc(malloc(8), 0).is_null());
      free(null_mut());
      assert_eq!(malloc_usable_size(null_mut()), 0);
    }
  }

  #[test]
  fn posix_memalign_validates_and_aligns() {
    unsafe {
      let mut out = null_mut();
      assert_eq!(posix_memalign(&mut out, 3, 64), libc::EINVAL);
      assert_eq!(posix_memalign(&mut out, 2, 64), libc::EINVAL);

      for alignment in [8, 64, 4096] {
        assert_eq!(posix_memalign(&mut out, alignment, 100), 0);
        assert_eq!(out as usize % alignment, 0);
        free(out);
      }
    }
  }
}
