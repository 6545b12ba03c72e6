//! Single-lock allocator over an address-ordered, coalescing free list.
//!
//! Small blocks are carved first-fit from the free list, which grows one page
//! at a time. Anything that would not fit in a page gets its own mapping and
//! is unmapped again on free.

use core::{
  alloc::{GlobalAlloc, Layout},
  ptr::{self, NonNull},
};

use crate::block::{BLOCK_ALIGN, BlockHeader, HEADER_SIZE, MIN_FREE_CELL, block_size_for};
use crate::error::{AllocError, OrAbort, fatal};
use crate::free_list::{self, FreeList};
use crate::large;
use crate::platform::{PAGE_SIZE, PageSource};
use crate::stats::{self, Counters, Stats};
use crate::sync::SpinMutex;

struct Heap {
  free: FreeList,
  counters: Counters,
}

/// Coalescing free-list allocator.
///
/// Every operation is serialized by one lock that guards the free list, the
/// headers being split or merged, and the statistics.
pub struct Allocator {
  heap: SpinMutex<Heap>,
}

impl Default for Allocator {
  fn default() -> Self {
    Self::new()
  }
}

impl Allocator {
  pub const fn new() -> Self {
    Self {
      heap: SpinMutex::new(Heap {
        free: FreeList::new(),
        counters: Counters::new(),
      }),
    }
  }

  /// Returns at least `size` usable bytes aligned to 16.
  ///
  /// Aborts the process if the OS refuses to map memory.
  pub fn allocate(&self, size: usize) -> NonNull<u8> {
    let Some(block_size) = block_size_for(size) else {
      fatal(AllocError::SizeOverflow { size });
    };
    if block_size >= PAGE_SIZE {
      return self.allocate_large(size, BLOCK_ALIGN);
    }

    let mut heap = self.heap.lock();
    heap.counters.chunks_allocated += 1;

    let (block, awarded, fresh_page) = match heap.free.first_free(block_size) {
      Some(fit) => {
        let block = fit.block();
        let awarded = unsafe { heap.free.take(fit, block_size) }.or_abort();
        (block, awarded, false)
      }
      None => {
        let page = PageSource::map_page().or_abort().cast::<BlockHeader>();
        heap.counters.pages_mapped += 1;
        unsafe { page.as_ptr().write(BlockHeader::live(PAGE_SIZE)) };

        let awarded = if block_size + MIN_FREE_CELL <= PAGE_SIZE {
          let rest = unsafe { free_list::split(page.as_ptr(), block_size) }.or_abort();
          unsafe { heap.free.insert(NonNull::new_unchecked(rest)) };
          block_size
        } else {
          PAGE_SIZE
        };
        (page, awarded, true)
      }
    };
    drop(heap);

    if fresh_page {
      log::trace!("mapped a page for a {block_size}-byte block at {block:p}");
    }

    unsafe {
      block.as_ptr().write(BlockHeader::live(awarded));
      NonNull::new_unchecked(BlockHeader::payload(block.as_ptr()))
    }
  }

  fn allocate_large(&self, size: usize, align: usize) -> NonNull<u8> {
    let block = large::map(size, align).or_abort();

    let mut heap = self.heap.lock();
    heap.counters.chunks_allocated += 1;
    heap.counters.pages_mapped += block.pages as u64;
    drop(heap);

    log::debug!("mapped {} page(s) for {size} bytes at {:p}", block.pages, block.ptr);
    block.ptr
  }

  /// Returns the block behind `ptr` to the free list, or unmaps it if it owns
  /// a dedicated mapping.
  ///
  /// # Safety
  ///
  /// `ptr` must come from this allocator and must not have been freed.
  pub unsafe fn free(&self, ptr: NonNull<u8>) {
    let header = unsafe { BlockHeader::of(ptr.as_ptr()) };

    if unsafe { (*header).is_large() } {
      let pages = unsafe { large::release(header) }.or_abort();
      let mut heap = self.heap.lock();
      heap.counters.chunks_freed += 1;
      heap.counters.pages_unmapped += pages as u64;
      drop(heap);
      log::debug!("unmapped {pages} page(s) at {ptr:p}");
      return;
    }

    let mut heap = self.heap.lock();
    heap.counters.chunks_freed += 1;
    unsafe { heap.free.insert(NonNull::new_unchecked(header)) };
  }

  /// Resizes the allocation at `ptr`.
  ///
  /// Shrinks in place when the released tail is big enough to be a free cell,
  /// keeps the block when it already fits `new_size`, and otherwise moves the
  /// contents to a new block.
  ///
  /// # Safety
  ///
  /// `ptr` must come from this allocator and must not have been freed. It is
  /// invalid afterwards unless it is the returned pointer.
  pub unsafe fn reallocate(&self, ptr: NonNull<u8>, new_size: usize) -> NonNull<u8> {
    let Some(new_block) = block_size_for(new_size) else {
      fatal(AllocError::SizeOverflow { size: new_size });
    };
    let header = unsafe { BlockHeader::of(ptr.as_ptr()) };
    let current = unsafe { *header };

    if current.is_large() {
      let usable = large::usable_size(&current);
      if new_size > usable {
        return unsafe { self.relocate(ptr, usable, new_size) };
      }
      // A shrunk mapping without alignment padding joins the free list.
      if current.large_offset() == 0 && new_block < PAGE_SIZE {
        unsafe { self.shrink_in_place(header, new_block) };
      }
      return ptr;
    }

    if new_block < current.size && current.size - new_block >= MIN_FREE_CELL {
      unsafe { self.shrink_in_place(header, new_block) };
      return ptr;
    }
    if new_block <= current.size {
      return ptr;
    }
    unsafe { self.relocate(ptr, current.size - HEADER_SIZE, new_size) }
  }

  /// Keeps the first `new_block` bytes live and frees the rest.
  unsafe fn shrink_in_place(&self, header: *mut BlockHeader, new_block: usize) {
    let mut heap = self.heap.lock();
    unsafe {
      let total = (*header).size;
      header.write(BlockHeader::live(total));
      let rest = free_list::split(header, new_block).or_abort();
      heap.free.insert(NonNull::new_unchecked(rest));
    }
  }

  unsafe fn relocate(&self, ptr: NonNull<u8>, old_usable: usize, new_size: usize) -> NonNull<u8> {
    let new_ptr = self.allocate(new_size);
    unsafe {
      ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_usable.min(new_size));
      self.free(ptr);
    }
    new_ptr
  }

  /// Bytes the caller may use behind `ptr`.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live allocation from this allocator.
  pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
    let header = unsafe { *BlockHeader::of(ptr.as_ptr()) };
    if header.is_large() {
      large::usable_size(&header)
    } else {
      header.size - HEADER_SIZE
    }
  }

  /// Snapshot of the counters; the free-list length is walked under the lock.
  pub fn stats(&self) -> Stats {
    let heap = self.heap.lock();
    heap.counters.snapshot(heap.free.len())
  }

  pub fn print_stats(&self) {
    stats::print(&self.stats());
  }
}

unsafe impl GlobalAlloc for Allocator {
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    if layout.align() > BLOCK_ALIGN {
      return self.allocate_large(layout.size(), layout.align()).as_ptr();
    }
    self.allocate(layout.size()).as_ptr()
  }

  unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
    if let Some(ptr) = NonNull::new(ptr) {
      unsafe { self.free(ptr) };
    }
  }

  unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
    let Some(old) = NonNull::new(ptr) else {
      return unsafe { self.alloc(Layout::from_size_align_unchecked(new_size, layout.align())) };
    };

    if layout.align() <= BLOCK_ALIGN {
      return unsafe { self.reallocate(old, new_size) }.as_ptr();
    }

    if new_size <= unsafe { self.usable_size(old) } {
      return ptr;
    }
    let new_ptr = self.allocate_large(new_size, layout.align());
    unsafe {
      ptr::copy_nonoverlapping(ptr, new_ptr.as_ptr(), layout.size().min(new_size));
      self.free(old);
    }
    new_ptr.as_ptr()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn first_allocation_maps_one_page_and_leaves_the_rest_free() {
    let heap = Allocator::new();
    let ptr = heap.allocate(100);

    let stats = heap.stats();
    assert_eq!(stats.pages_mapped, 1);
    assert_eq!(stats.chunks_allocated, 1);
    assert_eq!(stats.free_list_length, 1);
    assert_eq!(unsafe { heap.usable_size(ptr) }, 112);

    unsafe { heap.free(ptr) };
    let stats = heap.stats();
    assert_eq!(stats.free_list_length, 1);
    assert_eq!(stats.live_chunks(), 0);
  }

  #[test]
  fn freed_space_is_reused_before_mapping_again() {
    let heap = Allocator::new();
    let a = heap.allocate(64);
    unsafe { heap.free(a) };
    let b = heap.allocate(64);
    assert_eq!(a, b);
    assert_eq!(heap.stats().pages_mapped, 1);
    unsafe { heap.free(b) };
  }

  #[test]
  fn largest_small_block_still_leaves_a_free_cell() {
    let heap = Allocator::new();
    // 4064 + 16 is 4080, which leaves exactly one minimal free cell.
    let ptr = heap.allocate(4064);
    let stats = heap.stats();
    assert_eq!(stats.pages_mapped, 1);
    assert_eq!(stats.free_list_length, 1);

    unsafe { heap.free(ptr) };
    assert_eq!(heap.stats().free_list_length, 1);
  }

  #[test]
  fn page_sized_requests_bypass_the_free_list() {
    let heap = Allocator::new();
    let ptr = heap.allocate(PAGE_SIZE);
    let stats = heap.stats();
    assert_eq!(stats.pages_mapped, 2);
    assert_eq!(stats.free_list_length, 0);

    unsafe { heap.free(ptr) };
    let stats = heap.stats();
    assert_eq!(stats.pages_unmapped, 2);
    assert_eq!(stats.free_list_length, 0);
  }

  #[test]
  fn shrink_releases_tail_and_grow_moves_contents() {
    let heap = Allocator::new();
    let ptr = heap.allocate(1000);
    unsafe { ptr.as_ptr().write_bytes(0x7E, 1000) };

    let shrunk = unsafe { heap.reallocate(ptr, 100) };
    assert_eq!(shrunk, ptr);
    assert_eq!(unsafe { heap.usable_size(shrunk) }, 112);

    let grown = unsafe { heap.reallocate(shrunk, 3000) };
    let bytes = unsafe { core::slice::from_raw_parts(grown.as_ptr(), 100) };
    assert!(bytes.iter().all(|&b| b == 0x7E));
    unsafe { heap.free(grown) };
    assert_eq!(heap.stats().live_chunks(), 0);
  }

  #[test]
  fn over_aligned_layouts_are_honoured() {
    let heap = Allocator::new();
    let layout = Layout::from_size_align(48, 256).unwrap();
    unsafe {
      let ptr = heap.alloc(layout);
      assert_eq!(ptr as usize % 256, 0);
      let moved = heap.realloc(ptr, layout, 10_000);
      assert_eq!(moved as usize % 256, 0);
      heap.dealloc(moved, Layout::from_size_align(10_000, 256).unwrap());
    }
    let stats = heap.stats();
    assert_eq!(stats.live_pages(), 0);
    assert_eq!(stats.live_chunks(), 0);
  }
}
