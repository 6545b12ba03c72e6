//! One size class inside one arena: a chain of bucket pages plus the cells of
//! free slots scattered across them.

use core::ptr::{NonNull, null_mut};

use super::directory::PageDirectory;
use super::page::{FreeCell, PageHeader};
use super::size_class::class_size;
use crate::error::{AllocError, OrAbort};

pub(crate) struct Bucket {
  class: usize,
  first_page: *mut PageHeader,
  last_page: *mut PageHeader,
  /// Head of the free cells, most recently freed first.
  free: *mut FreeCell,
  pages: usize,
}

// Only ever touched under the owning arena's lock.
unsafe impl Send for Bucket {}

impl Bucket {
  pub(crate) const fn new(class: usize) -> Self {
    Self {
      class,
      first_page: null_mut(),
      last_page: null_mut(),
      free: null_mut(),
      pages: 0,
    }
  }

  #[cfg(test)]
  pub(crate) fn pages(&self) -> usize {
    self.pages
  }

  /// Hands out a free slot, mapping and registering a new page when none is
  /// left. The flag reports whether a page was mapped.
  pub(crate) fn first_free_block(
    &mut self,
    arena: usize,
    directory: &PageDirectory,
  ) -> Result<(NonNull<u8>, bool), AllocError> {
    if let Some(slot) = unsafe { self.pop() } {
      return Ok((slot, false));
    }
    self.grow(arena, directory)?;
    match unsafe { self.pop() } {
      Some(slot) => Ok((slot, true)),
      None => unreachable!("a fresh page has at least two slots"),
    }
  }

  /// Takes the first slot of the head cell.
  unsafe fn pop(&mut self) -> Option<NonNull<u8>> {
    let cell = NonNull::new(self.free)?;
    unsafe {
      let FreeCell { next, run } = cell.as_ptr().read();
      self.free = if run > 1 {
        let rest = cell.as_ptr().byte_add(class_size(self.class));
        rest.write(FreeCell { next, run: run - 1 });
        rest
      } else {
        next
      };
    }
    Some(cell.cast())
  }

  /// Returns `slot` to the bucket as a one-slot cell.
  ///
  /// # Safety
  ///
  /// `slot` must be a slot of a page in this bucket that is currently handed
  /// out.
  pub(crate) unsafe fn push(&mut self, slot: NonNull<u8>) {
    let cell = slot.cast::<FreeCell>();
    unsafe {
      cell.as_ptr().write(FreeCell {
        next: self.free,
        run: 1,
      })
    };
    self.free = cell.as_ptr();
  }

  fn grow(&mut self, arena: usize, directory: &PageDirectory) -> Result<(), AllocError> {
    let (page, cell) = PageHeader::create(arena, self.class)?;
    if let Err(err) = directory.register(page) {
      unsafe { PageHeader::unmap(page)? };
      return Err(err);
    }

    match NonNull::new(self.last_page) {
      Some(last) => unsafe { (*last.as_ptr()).next = page.as_ptr() },
      None => self.first_page = page.as_ptr(),
    }
    self.last_page = page.as_ptr();
    self.pages += 1;

    unsafe { (*cell.as_ptr()).next = self.free };
    self.free = cell.as_ptr();
    Ok(())
  }

  /// Number of cells on the free list.
  pub(crate) fn free_cells(&self) -> usize {
    self.cells().count()
  }

  /// Number of free slots across all cells.
  #[cfg(test)]
  pub(crate) fn free_slots(&self) -> usize {
    self.cells().map(|cell| unsafe { (*cell).run }).sum()
  }

  fn cells(&self) -> impl Iterator<Item = *mut FreeCell> + '_ {
    let mut cursor = self.free;
    core::iter::from_fn(move || {
      let cell = NonNull::new(cursor)?;
      cursor = unsafe { (*cell.as_ptr()).next };
      Some(cell.as_ptr())
    })
  }

  /// Unmaps every page of the chain and returns how many there were.
  ///
  /// # Safety
  ///
  /// No slot of this bucket may be used afterwards, and the directory entries
  /// pointing at these pages must never be looked up again.
  pub(crate) unsafe fn release_pages(&mut self) -> usize {
    let released = self.pages;
    let mut page = self.first_page;
    while let Some(current) = NonNull::new(page) {
      unsafe {
        page = (*current.as_ptr()).next;
        PageHeader::unmap(current).or_abort();
      }
    }
    *self = Self::new(self.class);
    released
  }
}
