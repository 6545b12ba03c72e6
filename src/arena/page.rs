//! Bucket pages: fixed page-multiple mappings split into equal slots.

use core::{
  mem::size_of,
  ptr::{NonNull, null_mut},
};

use super::size_class::{CLASS_COUNT, class_size};
use crate::error::AllocError;
use crate::platform::{PAGE_SIZE, PageSource};

/// OS pages behind one bucket page.
pub(crate) const PAGE_SPAN: usize = 16;
pub(crate) const PAGE_BYTES: usize = PAGE_SPAN * PAGE_SIZE; // 64KB
pub(crate) const PAGE_HEADER_SIZE: usize = size_of::<PageHeader>();
/// Every slot is aligned to at least `min(slot size, SLOT_ALIGN)`.
pub(crate) const SLOT_ALIGN: usize = PAGE_HEADER_SIZE;

/// Magic number to identify valid PageHeaders
const PAGE_MAGIC: u64 = 0x484D_414C_4C4F_4321; // "HMALLOC!"

const _: () = assert!(PAGE_HEADER_SIZE == 128);
const _: () = assert!(size_of::<FreeCell>() <= class_size(0));
const _: () = assert!(slot_capacity(CLASS_COUNT - 1) >= 2);

/// Metadata at offset 0 of each bucket page.
///
/// Written once when the page is mapped and read-only afterwards, except for
/// `next`, which belongs to the owning bucket's lock.
#[repr(C, align(128))]
pub(crate) struct PageHeader {
  magic: u64,
  /// Next page in the owning bucket's chain.
  pub next: *mut PageHeader,
  slot_size: usize,
  slots: usize,
  arena: usize,
  class: usize,
}

/// A run of `run` consecutive free slots, threaded through the first one.
#[repr(C)]
pub(crate) struct FreeCell {
  pub next: *mut FreeCell,
  pub run: usize,
}

/// Slots that fit after the header of a page of `class`.
pub(crate) const fn slot_capacity(class: usize) -> usize {
  (PAGE_BYTES - PAGE_HEADER_SIZE) / class_size(class)
}

impl PageHeader {
  /// Maps a page for `class` owned by `arena`, marking every slot free with a
  /// single cell that spans the whole usable region.
  pub(crate) fn create(
    arena: usize,
    class: usize,
  ) -> Result<(NonNull<PageHeader>, NonNull<FreeCell>), AllocError> {
    let base = PageSource::map_pages(PAGE_SPAN)?;
    let slots = slot_capacity(class);

    unsafe {
      let header = base.cast::<PageHeader>();
      header.as_ptr().write(PageHeader {
        magic: PAGE_MAGIC,
        next: null_mut(),
        slot_size: class_size(class),
        slots,
        arena,
        class,
      });

      let cell = base.add(PAGE_HEADER_SIZE).cast::<FreeCell>();
      cell.as_ptr().write(FreeCell {
        next: null_mut(),
        run: slots,
      });
      Ok((header, cell))
    }
  }

  /// # Safety
  ///
  /// `page` must come from [`PageHeader::create`], and no slot of it may be
  /// used afterwards.
  pub(crate) unsafe fn unmap(page: NonNull<PageHeader>) -> Result<(), AllocError> {
    unsafe { PageSource::unmap_pages(page.cast(), PAGE_SPAN) }
  }

  #[inline]
  pub(crate) fn is_valid(&self) -> bool {
    self.magic == PAGE_MAGIC
  }

  #[inline]
  pub(crate) fn arena(&self) -> usize {
    self.arena
  }

  #[inline]
  pub(crate) fn class(&self) -> usize {
    self.class
  }

  #[inline]
  pub(crate) fn slot_size(&self) -> usize {
    self.slot_size
  }

  #[inline]
  pub(crate) fn slots(&self) -> usize {
    self.slots
  }

  #[inline]
  fn first_slot(&self) -> usize {
    self as *const Self as usize + PAGE_HEADER_SIZE
  }

  /// Whether `ptr` is the start of one of this page's slots.
  pub(crate) fn is_slot(&self, ptr: *const u8) -> bool {
    let Some(offset) = (ptr as usize).checked_sub(self.first_slot()) else {
      return false;
    };
    offset % self.slot_size() == 0 && offset / self.slot_size() < self.slots()
  }
}
