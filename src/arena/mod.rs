//! Segregated-fit allocator with per-thread arena affinity.
//!
//! Requests up to [`MAX_CLASS_SIZE`] are rounded to a power-of-two class and
//! served from a bucket of that class in one of [`ARENA_COUNT`] arenas. Each
//! thread prefers one arena and moves to the next one when it finds its
//! favorite locked. Bigger requests get a dedicated mapping.

pub mod size_class;

mod bucket;
mod directory;
mod page;

use core::{
  alloc::{GlobalAlloc, Layout},
  cell::Cell,
  ptr::{self, NonNull},
  sync::atomic::{AtomicUsize, Ordering},
};

use self::bucket::Bucket;
use self::directory::PageDirectory;
use self::page::{PAGE_SPAN, SLOT_ALIGN};
use self::size_class::{CLASS_COUNT, class_of};
use crate::block::{BLOCK_ALIGN, BlockHeader};
use crate::error::{AllocError, OrAbort, fatal};
use crate::large;
use crate::stats::{self, AtomicCounters, Stats};
use crate::sync::{SpinMutex, SpinMutexGuard};

pub use self::size_class::MAX_CLASS_SIZE;

/// Number of independent arenas.
pub const ARENA_COUNT: usize = 4;

const _: () = assert!(ARENA_COUNT >= 2);

const NO_FAVORITE: usize = usize::MAX;

/// Hands out initial favorites round-robin.
static NEXT_FAVORITE: AtomicUsize = AtomicUsize::new(0);

thread_local! {
  static FAVORITE: Cell<usize> = const { Cell::new(NO_FAVORITE) };
}

/// This thread's favorite arena. Threads whose TLS is gone fall back to the
/// first arena.
fn favorite() -> usize {
  FAVORITE
    .try_with(|favorite| {
      if favorite.get() == NO_FAVORITE {
        favorite.set(NEXT_FAVORITE.fetch_add(1, Ordering::Relaxed) % ARENA_COUNT);
      }
      favorite.get()
    })
    .unwrap_or(0)
}

fn set_favorite(arena: usize) {
  let _ = FAVORITE.try_with(|favorite| favorite.set(arena));
}

type Arena = [Bucket; CLASS_COUNT];

const fn new_arena() -> Arena {
  let mut buckets = [const { Bucket::new(0) }; CLASS_COUNT];
  let mut class = 1;
  while class < CLASS_COUNT {
    buckets[class] = Bucket::new(class);
    class += 1;
  }
  buckets
}

/// Arena allocator.
///
/// Bucket pages, free cells and page chains are guarded by their arena's lock.
/// The page directory and the counters are shared lock-free.
pub struct ArenaAllocator {
  arenas: [SpinMutex<Arena>; ARENA_COUNT],
  directory: PageDirectory,
  counters: AtomicCounters,
}

impl Default for ArenaAllocator {
  fn default() -> Self {
    Self::new()
  }
}

impl ArenaAllocator {
  pub const fn new() -> Self {
    Self {
      arenas: [const { SpinMutex::new(new_arena()) }; ARENA_COUNT],
      directory: PageDirectory::new(),
      counters: AtomicCounters::new(),
    }
  }

  /// Locks the favorite arena, or the one after it when the favorite is busy.
  ///
  /// The flag is set when the favorite moved.
  fn lock_arena(&self) -> (usize, SpinMutexGuard<'_, Arena>, bool) {
    let favorite = favorite();
    if let Some(arena) = self.arenas[favorite].try_lock() {
      return (favorite, arena, false);
    }

    let next = (favorite + 1) % ARENA_COUNT;
    set_favorite(next);
    (next, self.arenas[next].lock(), true)
  }

  /// Returns at least `size` usable bytes aligned to 16.
  ///
  /// Aborts the process if the OS refuses to map memory.
  pub fn allocate(&self, size: usize) -> NonNull<u8> {
    match class_of(size) {
      Some(class) => self.allocate_class(class),
      None => self.allocate_large(size, BLOCK_ALIGN),
    }
  }

  fn allocate_class(&self, class: usize) -> NonNull<u8> {
    let (index, mut arena, moved) = self.lock_arena();
    let (slot, grew) = arena[class]
      .first_free_block(index, &self.directory)
      .or_abort();
    drop(arena);

    self.counters.allocated();
    if grew {
      self.counters.mapped(PAGE_SPAN);
    }

    if moved {
      log::trace!("arena {} busy, moved to arena {index}", (index + ARENA_COUNT - 1) % ARENA_COUNT);
    }
    if grew {
      log::trace!("arena {index} mapped a page for class {class} at {slot:p}");
    }
    slot
  }

  fn allocate_large(&self, size: usize, align: usize) -> NonNull<u8> {
    let block = large::map(size, align).or_abort();
    self.counters.allocated();
    self.counters.mapped(block.pages);
    log::debug!("mapped {} page(s) for {size} bytes at {:p}", block.pages, block.ptr);
    block.ptr
  }

  fn allocate_layout(&self, layout: Layout) -> NonNull<u8> {
    if layout.align() <= SLOT_ALIGN {
      if let Some(class) = class_of(layout.size().max(layout.align())) {
        return self.allocate_class(class);
      }
    }
    self.allocate_large(layout.size(), layout.align())
  }

  /// Returns `ptr` to the bucket it came from, or unmaps its dedicated
  /// mapping.
  ///
  /// Aborts if `ptr` is neither a bucket slot nor a dedicated mapping.
  ///
  /// # Safety
  ///
  /// `ptr` must come from this allocator and must not have been freed.
  pub unsafe fn free(&self, ptr: NonNull<u8>) {
    if let Some(page) = self.directory.lookup(ptr.as_ptr()) {
      let page = unsafe { page.as_ref() };
      if !page.is_valid() || !page.is_slot(ptr.as_ptr()) {
        fatal(AllocError::UnknownPointer {
          addr: ptr.as_ptr() as usize,
        });
      }

      let mut arena = self.arenas[page.arena()].lock();
      unsafe { arena[page.class()].push(ptr) };
      drop(arena);
      self.counters.freed();
      return;
    }

    let header = unsafe { BlockHeader::of(ptr.as_ptr()) };
    if !unsafe { (*header).is_large() } {
      fatal(AllocError::UnknownPointer {
        addr: ptr.as_ptr() as usize,
      });
    }
    let pages = unsafe { large::release(header) }.or_abort();
    self.counters.freed();
    self.counters.unmapped(pages);
    log::debug!("unmapped {pages} page(s) at {ptr:p}");
  }

  /// Moves the allocation at `ptr` to a block for `new_size` bytes, copying
  /// as much of the old contents as fits.
  ///
  /// # Safety
  ///
  /// `ptr` must come from this allocator and must not have been freed. It is
  /// invalid afterwards.
  pub unsafe fn reallocate(&self, ptr: NonNull<u8>, new_size: usize) -> NonNull<u8> {
    let old_size = unsafe { self.usable_size(ptr) };
    let new_ptr = self.allocate(new_size);
    unsafe {
      ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size.min(new_size));
      self.free(ptr);
    }
    new_ptr
  }

  /// Bytes the caller may use behind `ptr`: the slot size, or what the
  /// dedicated mapping holds after its header.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live allocation from this allocator.
  pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
    match self.directory.lookup(ptr.as_ptr()) {
      Some(page) => unsafe { page.as_ref().slot_size() },
      None => large::usable_size(unsafe { &*BlockHeader::of(ptr.as_ptr()) }),
    }
  }

  /// Arena whose bucket handed out `ptr`, or `None` for dedicated mappings.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live allocation from this allocator.
  pub unsafe fn arena_of(&self, ptr: NonNull<u8>) -> Option<usize> {
    self
      .directory
      .lookup(ptr.as_ptr())
      .map(|page| unsafe { page.as_ref().arena() })
  }

  /// Snapshot of the counters. The free-list length counts free cells over
  /// every bucket, each arena walked under its own lock.
  pub fn stats(&self) -> Stats {
    let cells = self
      .arenas
      .iter()
      .map(|arena| arena.lock().iter().map(Bucket::free_cells).sum::<usize>())
      .sum();
    self.counters.snapshot(cells)
  }

  pub fn print_stats(&self) {
    stats::print(&self.stats());
  }
}

impl Drop for ArenaAllocator {
  fn drop(&mut self) {
    let mut pages = 0;
    for arena in &mut self.arenas {
      for bucket in arena.get_mut() {
        pages += unsafe { bucket.release_pages() } * PAGE_SPAN;
      }
    }
    self.counters.unmapped(pages);
    log::debug!("released {pages} bucket page(s)");
  }
}

unsafe impl GlobalAlloc for ArenaAllocator {
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    self.allocate_layout(layout).as_ptr()
  }

  unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
    if let Some(ptr) = NonNull::new(ptr) {
      unsafe { self.free(ptr) };
    }
  }

  unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
    let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
    let Some(old) = NonNull::new(ptr) else {
      return unsafe { self.alloc(new_layout) };
    };

    let new_ptr = self.allocate_layout(new_layout);
    unsafe {
      ptr::copy_nonoverlapping(ptr, new_ptr.as_ptr(), layout.size().min(new_size));
      self.free(old);
    }
    new_ptr.as_ptr()
  }
}
