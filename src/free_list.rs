//! Address-ordered, self-coalescing list of free blocks.
//!
//! The list is threaded through the free blocks themselves: each free block's
//! [`BlockHeader::link`] holds the address of the next one. All raw pointer
//! chasing of the coalescing design lives here.

use core::ptr::{NonNull, null_mut};

use crate::block::{BlockHeader, MIN_FREE_CELL};
use crate::error::AllocError;

pub(crate) struct FreeList {
  head: *mut BlockHeader,
}

unsafe impl Send for FreeList {}

/// Position of a first-fit block, valid until the list is next mutated.
pub(crate) struct Fit {
  prev: *mut BlockHeader,
  block: NonNull<BlockHeader>,
}

impl Fit {
  #[inline]
  pub(crate) fn block(&self) -> NonNull<BlockHeader> {
    self.block
  }
}

impl FreeList {
  pub(crate) const fn new() -> Self {
    Self { head: null_mut() }
  }

  pub(crate) fn len(&self) -> usize {
    self.blocks().count()
  }

  /// `(address, size)` of every free block, lowest address first.
  pub(crate) fn blocks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
    let mut cur = self.head;
    core::iter::from_fn(move || {
      if cur.is_null() {
        return None;
      }
      let header = unsafe { *cur };
      let item = (cur as usize, header.size);
      cur = header.link as *mut BlockHeader;
      Some(item)
    })
  }

  /// First block, by address, whose span is at least `size` bytes.
  pub(crate) fn first_free(&self, size: usize) -> Option<Fit> {
    let mut prev = null_mut();
    let mut cur = self.head;
    while let Some(block) = NonNull::new(cur) {
      let header = unsafe { *cur };
      if header.size >= size {
        return Some(Fit { prev, block });
      }
      prev = cur;
      cur = header.link as *mut BlockHeader;
    }
    None
  }

  /// Removes the block at `fit`, keeping the tail on the list when it is
  /// still a usable free cell. Returns the number of bytes awarded from the
  /// front of the block, which is `size` or the whole block.
  ///
  /// # Safety
  ///
  /// `fit` must come from [`FreeList::first_free`] on this list with no
  /// mutation in between, for a `size` no larger than the one it was found for.
  pub(crate) unsafe fn take(&mut self, fit: Fit, size: usize) -> Result<usize, AllocError> {
    let block = fit.block.as_ptr();
    let header = unsafe { *block };
    debug_assert!(header.size >= size);

    let (replacement, awarded) = if header.size - size >= MIN_FREE_CELL {
      let rest = unsafe { split(block, size)? };
      unsafe { (*rest).link = header.link };
      (rest as usize, size)
    } else {
      (header.link, header.size)
    };

    if fit.prev.is_null() {
      self.head = replacement as *mut BlockHeader;
    } else {
      unsafe { (*fit.prev).link = replacement };
    }
    Ok(awarded)
  }

  /// Links `block` in address order, merging it with whichever neighbours it
  /// touches.
  ///
  /// # Safety
  ///
  /// `block` must carry a valid `size`, must not overlap any block already on
  /// the list and must stay untouched by its previous owner.
  pub(crate) unsafe fn insert(&mut self, block: NonNull<BlockHeader>) {
    let block = block.as_ptr();
    let addr = block as usize;

    let mut prev: *mut BlockHeader = null_mut();
    let mut next = self.head;
    while !next.is_null() && (next as usize) < addr {
      prev = next;
      next = unsafe { (*next).link } as *mut BlockHeader;
    }
    debug_assert_ne!(next as usize, addr, "block {addr:#x} is already free");

    unsafe {
      (*block).link = next as usize;
      if !next.is_null() && addr + (*block).size == next as usize {
        (*block).size += (*next).size;
        (*block).link = (*next).link;
      }

      if prev.is_null() {
        self.head = block;
      } else if prev as usize + (*prev).size == addr {
        (*prev).size += (*block).size;
        (*prev).link = (*block).link;
      } else {
        (*prev).link = addr;
      }
    }
  }
}

/// Cuts `block` after its first `front` bytes and writes a header for the
/// remainder, which is returned unlinked.
///
/// # Safety
///
/// `block` must be a valid header whose `size` exceeds `front`, and the caller
/// must own the whole span.
pub(crate) unsafe fn split(
  block: *mut BlockHeader,
  front: usize,
) -> Result<*mut BlockHeader, AllocError> {
  let size = unsafe { (*block).size };
  let rest_size = size.saturating_sub(front);
  if rest_size < MIN_FREE_CELL {
    return Err(AllocError::FreeCellTooSmall {
      size: rest_size,
      min: MIN_FREE_CELL,
    });
  }

  unsafe {
    let rest = block.cast::<u8>().add(front).cast::<BlockHeader>();
    rest.write(BlockHeader::live(rest_size));
    (*block).size = front;
    Ok(rest)
  }
}
