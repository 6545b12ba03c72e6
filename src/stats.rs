use core::{
  fmt,
  sync::atomic::{AtomicU64, Ordering},
};
use std::io::{self, Write};

/// Point-in-time allocator counters.
///
/// Purely observational: nothing in the allocators reads these back to make a
/// decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
  pub pages_mapped: u64,
  pub pages_unmapped: u64,
  pub chunks_allocated: u64,
  pub chunks_freed: u64,
  pub free_list_length: u64,
}

impl Stats {
  /// Allocations handed out and not yet freed.
  pub fn live_chunks(&self) -> u64 {
    self.chunks_allocated.saturating_sub(self.chunks_freed)
  }

  /// Pages currently held from the OS.
  pub fn live_pages(&self) -> u64 {
    self.pages_mapped.saturating_sub(self.pages_unmapped)
  }
}

impl fmt::Display for Stats {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "== hmalloc stats ==")?;
    writeln!(f, "Mapped:   {}", self.pages_mapped)?;
    writeln!(f, "Unmapped: {}", self.pages_unmapped)?;
    writeln!(f, "Allocs:   {}", self.chunks_allocated)?;
    writeln!(f, "Frees:    {}", self.chunks_freed)?;
    write!(f, "Freelen:  {}", self.free_list_length)
  }
}

/// Writes `stats` to stderr without going through the heap.
pub(crate) fn print(stats: &Stats) {
  let _ = writeln!(io::stderr(), "\n{stats}");
}

/// Counters mutated only under the free-list lock.
#[derive(Debug, Default)]
pub(crate) struct Counters {
  pub pages_mapped: u64,
  pub pages_unmapped: u64,
  pub chunks_allocated: u64,
  pub chunks_freed: u64,
}

impl Counters {
  pub(crate) const fn new() -> Self {
    Self {
      pages_mapped: 0,
      pages_unmapped: 0,
      chunks_allocated: 0,
      chunks_freed: 0,
    }
  }

  pub(crate) fn snapshot(&self, free_list_length: usize) -> Stats {
    Stats {
      pages_mapped: self.pages_mapped,
      pages_unmapped: self.pages_unmapped,
      chunks_allocated: self.chunks_allocated,
      chunks_freed: self.chunks_freed,
      free_list_length: free_list_length as u64,
    }
  }
}

/// Counters shared by arenas that do not share a lock.
#[derive(Debug, Default)]
pub(crate) struct AtomicCounters {
  pages_mapped: AtomicU64,
  pages_unmapped: AtomicU64,
  chunks_allocated: AtomicU64,
  chunks_freed: AtomicU64,
}

impl AtomicCounters {
  pub(crate) const fn new() -> Self {
    Self {
      pages_mapped: AtomicU64::new(0),
      pages_unmapped: AtomicU64::new(0),
      chunks_allocated: AtomicU64::new(0),
      chunks_freed: AtomicU64::new(0),
    }
  }

  #[inline]
  pub(crate) fn mapped(&self, pages: usize) {
    self.pages_mapped.fetch_add(pages as u64, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn unmapped(&self, pages: usize) {
    self.pages_unmapped.fetch_add(pages as u64, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn allocated(&self) {
    self.chunks_allocated.fetch_add(1, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn freed(&self) {
    self.chunks_freed.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn snapshot(&self, free_list_length: usize) -> Stats {
    Stats {
      pages_mapped: self.pages_mapped.load(Ordering::Relaxed),
      pages_unmapped: self.pages_unmapped.load(Ordering::Relaxed),
      chunks_allocated: self.chunks_allocated.load(Ordering::Relaxed),
      chunks_freed: self.chunks_freed.load(Ordering::Relaxed),
      free_list_length: free_list_length as u64,
    }
  }
}
