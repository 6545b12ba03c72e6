//! Page-mapping substrate shared by both allocator designs.

use core::ptr::{NonNull, null_mut};

use crate::error::{AllocError, last_errno};

/// Granularity of every mapping the allocators request.
pub const PAGE_SIZE: usize = 4096;
pub(crate) const PAGE_SHIFT: u32 = PAGE_SIZE.trailing_zeros();

const _: () = assert!(PAGE_SIZE.is_power_of_two());

unsafe fn os_mmap(size: usize) -> *mut u8 {
  let ptr = unsafe {
    libc::mmap(
      null_mut(),
      size,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
      -1,
      0,
    )
  };

  if ptr == libc::MAP_FAILED {
    null_mut()
  } else {
    ptr as *mut u8
  }
}

unsafe fn os_munmap(ptr: *mut u8, size: usize) -> bool {
  unsafe { libc::munmap(ptr.cast(), size) == 0 }
}

/// Hands out whole, zero-filled, read/write pages straight from the OS.
///
/// Every mapping is released with exactly the `count` it was created with;
/// unmapping a sub-range of a mapping is not supported.
pub struct PageSource;

impl PageSource {
  #[inline]
  pub fn map_page() -> Result<NonNull<u8>, AllocError> {
    Self::map_pages(1)
  }

  pub fn map_pages(count: usize) -> Result<NonNull<u8>, AllocError> {
    debug_assert!(count > 0);
    let len = count
      .checked_mul(PAGE_SIZE)
      .ok_or(AllocError::SizeOverflow { size: usize::MAX })?;

    let ptr = unsafe { os_mmap(len) };
    NonNull::new(ptr).ok_or_else(|| AllocError::MapFailed {
      pages: count,
      errno: last_errno(),
    })
  }

  /// # Safety
  ///
  /// `base` and `count` must describe one earlier [`PageSource::map_pages`]
  /// call, and nothing may touch the pages afterwards.
  pub unsafe fn unmap_pages(base: NonNull<u8>, count: usize) -> Result<(), AllocError> {
    debug_assert_eq!(base.as_ptr() as usize % PAGE_SIZE, 0);
    if unsafe { os_munmap(base.as_ptr(), count * PAGE_SIZE) } {
      Ok(())
    } else {
      Err(AllocError::UnmapFailed {
        addr: base.as_ptr() as usize,
        pages: count,
        errno: last_errno(),
      })
    }
  }

  /// Pages needed to hold `bytes`.
  #[inline]
  pub const fn pages_for(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
  }
}
