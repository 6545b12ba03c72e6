//! Address-indexed lookup from any interior pointer to its bucket page.
//!
//! A two-level radix table keyed by OS page number. Every OS page of a bucket
//! page points at that page's header, so a free only has to round the pointer
//! down to its OS page. Tables live in their own mappings and never touch the
//! heap they index.

use core::{
  mem::size_of,
  ptr::{NonNull, null_mut},
  sync::atomic::{AtomicPtr, Ordering},
};

use super::page::{PAGE_SPAN, PageHeader};
use crate::error::{AllocError, OrAbort};
use crate::platform::{PAGE_SHIFT, PAGE_SIZE, PageSource};

/// User-space virtual address width covered by the table.
const ADDRESS_BITS: u32 = 48;
const LEAF_BITS: u32 = 18;
const ROOT_BITS: u32 = ADDRESS_BITS - PAGE_SHIFT - LEAF_BITS;

const LEAF_LEN: usize = 1 << LEAF_BITS;
const ROOT_LEN: usize = 1 << ROOT_BITS;

struct Leaf {
  pages: [AtomicPtr<PageHeader>; LEAF_LEN],
}

struct Root {
  leaves: [AtomicPtr<Leaf>; ROOT_LEN],
}

const LEAF_PAGES: usize = size_of::<Leaf>() / PAGE_SIZE;
const ROOT_PAGES: usize = size_of::<Root>() / PAGE_SIZE;

const _: () = assert!(size_of::<Leaf>() % PAGE_SIZE == 0);
const _: () = assert!(size_of::<Root>() % PAGE_SIZE == 0);

/// Maps a zeroed table, which reads as all-null pointers.
fn map_table<T>(pages: usize) -> Result<NonNull<T>, AllocError> {
  Ok(PageSource::map_pages(pages)?.cast())
}

/// Root index and leaf index of the OS page holding `addr`.
fn split_key(addr: usize) -> Result<(usize, usize), AllocError> {
  let key = (addr as u64) >> PAGE_SHIFT;
  if key >> (ROOT_BITS + LEAF_BITS) != 0 {
    return Err(AllocError::AddressOutOfRange { addr });
  }
  Ok(((key >> LEAF_BITS) as usize, key as usize & (LEAF_LEN - 1)))
}

/// Installs a table into `slot` unless another thread got there first.
fn install<T>(slot: &AtomicPtr<T>, pages: usize) -> Result<NonNull<T>, AllocError> {
  if let Some(table) = NonNull::new(slot.load(Ordering::Acquire)) {
    return Ok(table);
  }

  let fresh = map_table::<T>(pages)?;
  match slot.compare_exchange(
    null_mut(),
    fresh.as_ptr(),
    Ordering::AcqRel,
    Ordering::Acquire,
  ) {
    Ok(_) => Ok(fresh),
    Err(winner) => {
      unsafe { PageSource::unmap_pages(fresh.cast(), pages)? };
      Ok(unsafe { NonNull::new_unchecked(winner) })
    }
  }
}

pub(crate) struct PageDirectory {
  root: AtomicPtr<Root>,
}

impl PageDirectory {
  pub(crate) const fn new() -> Self {
    Self {
      root: AtomicPtr::new(null_mut()),
    }
  }

  /// Points every OS page of `page` at its header.
  ///
  /// The header must be fully written before this call; lookups that observe
  /// the entry also observe the header.
  pub(crate) fn register(&self, page: NonNull<PageHeader>) -> Result<(), AllocError> {
    let root = unsafe { install(&self.root, ROOT_PAGES)?.as_ref() };

    for i in 0..PAGE_SPAN {
      let addr = page.as_ptr() as usize + i * PAGE_SIZE;
      let (r, l) = split_key(addr)?;
      let leaf = unsafe { install(&root.leaves[r], LEAF_PAGES)?.as_ref() };
      leaf.pages[l].store(page.as_ptr(), Ordering::Release);
    }
    Ok(())
  }

  /// Bucket page containing `ptr`, if any.
  pub(crate) fn lookup(&self, ptr: *const u8) -> Option<NonNull<PageHeader>> {
    let root = unsafe { self.root.load(Ordering::Acquire).as_ref()? };
    let (r, l) = split_key(ptr as usize).ok()?;
    let leaf = unsafe { root.leaves[r].load(Ordering::Acquire).as_ref()? };
    NonNull::new(leaf.pages[l].load(Ordering::Acquire))
  }
}

impl Drop for PageDirectory {
  fn drop(&mut self) {
    let Some(root) = NonNull::new(*self.root.get_mut()) else {
      return;
    };
    unsafe {
      for leaf in &root.as_ref().leaves {
        if let Some(leaf) = NonNull::new(leaf.load(Ordering::Relaxed)) {
          PageSource::unmap_pages(leaf.cast(), LEAF_PAGES).or_abort();
        }
      }
      PageSource::unmap_pages(root.cast(), ROOT_PAGES).or_abort();
    }
  }
}
