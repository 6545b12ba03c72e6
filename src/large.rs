//! Dedicated mappings for requests too big for the free list or the buckets.
//!
//! The returned pointer is preceded by a [`BlockHeader`] tagged as large, so a
//! free needs nothing but the pointer to unmap exactly what was mapped.

use core::ptr::NonNull;

use crate::block::{BLOCK_ALIGN, BlockHeader, HEADER_SIZE, align_up};
use crate::error::AllocError;
use crate::platform::{PAGE_SIZE, PageSource};

pub(crate) struct LargeBlock {
  pub ptr: NonNull<u8>,
  pub pages: usize,
}

/// Maps pages for `size` bytes whose payload is aligned to `align`.
pub(crate) fn map(size: usize, align: usize) -> Result<LargeBlock, AllocError> {
  debug_assert!(align.is_power_of_two());
  let align = align.max(BLOCK_ALIGN);
  let total = size
    .checked_add(HEADER_SIZE + (align - BLOCK_ALIGN))
    .ok_or(AllocError::SizeOverflow { size })?;

  let pages = PageSource::pages_for(total);
  let base = PageSource::map_pages(pages)?;

  let payload = align_up(base.as_ptr() as usize + HEADER_SIZE, align);
  let offset = payload - HEADER_SIZE - base.as_ptr() as usize;
  unsafe {
    let header = base.as_ptr().add(offset).cast::<BlockHeader>();
    header.write(BlockHeader::large(pages * PAGE_SIZE, offset));
    Ok(LargeBlock {
      ptr: NonNull::new_unchecked(BlockHeader::payload(header)),
      pages,
    })
  }
}

/// Unmaps the mapping behind a large `header`, returning its page count.
///
/// # Safety
///
/// `header` must belong to a live block produced by [`map`].
pub(crate) unsafe fn release(header: *mut BlockHeader) -> Result<usize, AllocError> {
  let BlockHeader { size, .. } = unsafe { *header };
  let offset = unsafe { (*header).large_offset() };
  let pages = size / PAGE_SIZE;
  unsafe {
    let base = NonNull::new_unchecked(header.cast::<u8>().sub(offset));
    PageSource::unmap_pages(base, pages)?;
  }
  Ok(pages)
}

/// Bytes available to the caller behind a large `header`.
pub(crate) fn usable_size(header: &BlockHeader) -> usize {
  header.size - header.large_offset() - HEADER_SIZE
}
