//! In-band block header shared by the free list and dedicated mappings.

use core::mem::size_of;

/// Every block starts on this boundary, so every returned pointer does too.
pub(crate) const BLOCK_ALIGN: usize = 16;
pub(crate) const HEADER_SIZE: usize = size_of::<BlockHeader>();
/// Smallest span worth keeping on the free list: room for a size and a link.
pub(crate) const MIN_FREE_CELL: usize = HEADER_SIZE;

/// Low bit of `link` on a live dedicated mapping. Offsets are multiples of
/// `BLOCK_ALIGN`, so the bit is otherwise always clear.
const LARGE_MARK: usize = 1;

const _: () = assert!(HEADER_SIZE == BLOCK_ALIGN);
const _: () = assert!(MIN_FREE_CELL >= 2 * size_of::<usize>());

/// Prefix of every block, free or live.
///
/// * free: `size` spans to the next block's header, `link` is the address of
///   the next free block (0 ends the list).
/// * live, free-list owned: `size` is the whole block, `link` is 0.
/// * live, dedicated mapping: `size` is the mapped length, `link` is the
///   header's offset from the mapping base with `LARGE_MARK` set.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockHeader {
  pub size: usize,
  pub link: usize,
}

impl BlockHeader {
  #[inline]
  pub(crate) const fn live(size: usize) -> Self {
    Self { size, link: 0 }
  }

  #[inline]
  pub(crate) const fn large(mapped: usize, offset: usize) -> Self {
    Self {
      size: mapped,
      link: offset | LARGE_MARK,
    }
  }

  #[inline]
  pub(crate) const fn is_large(&self) -> bool {
    self.link & LARGE_MARK != 0
  }

  /// Distance from the mapping base to this header. Only meaningful when
  /// [`BlockHeader::is_large`].
  #[inline]
  pub(crate) const fn large_offset(&self) -> usize {
    self.link & !LARGE_MARK
  }

  /// Header of the block whose payload starts at `ptr`.
  ///
  /// # Safety
  ///
  /// `ptr` must be a payload pointer handed out by this crate.
  #[inline]
  pub(crate) unsafe fn of(ptr: *mut u8) -> *mut BlockHeader {
    unsafe { ptr.sub(HEADER_SIZE).cast() }
  }

  #[inline]
  pub(crate) fn payload(header: *mut BlockHeader) -> *mut u8 {
    header.cast::<u8>().wrapping_add(HEADER_SIZE)
  }
}

/// Whole block size for a `request`-byte allocation, header included.
#[inline]
pub(crate) const fn block_size_for(request: usize) -> Option<usize> {
  let request = if request == 0 { 1 } else { request };
  match request.checked_add(HEADER_SIZE + BLOCK_ALIGN - 1) {
    Some(v) => Some(v & !(BLOCK_ALIGN - 1)),
    None => None,
  }
}

/// Rounds `x` up to the next multiple of alignment `align`. Alignment must be a power of 2.
#[inline(always)]
pub(crate) const fn align_up(x: usize, align: usize) -> usize {
  let mask = align - 1;
  (x + mask) & !mask
}
