//! Page-mapped heap allocators.
//!
//! Two interchangeable designs share one page source and one statistics
//! shape:
//!
//! * [`Allocator`]: a single-lock, address-ordered free list that splits and
//!   coalesces blocks.
//! * [`ArenaAllocator`]: power-of-two size classes spread over
//!   [`ARENA_COUNT`] arenas with per-thread affinity.
//!
//! Both implement [`GlobalAlloc`](core::alloc::GlobalAlloc) and never allocate
//! from the heap internally, so either can be the process allocator:
//!
//! ```no_run
//! #[global_allocator]
//! static GLOBAL: hmalloc::ArenaAllocator = hmalloc::ArenaAllocator::new();
//! ```
//!
//! Requests the OS cannot satisfy abort the process.

#![allow(clippy::missing_safety_doc)]

pub mod arena;
mod block;
mod coalescing;
mod error;
mod free_list;
mod large;
mod platform;
mod stats;
mod sync;

#[cfg(feature = "c_api")]
pub mod c_api;

pub use arena::size_class::{CLASS_COUNT, MAX_CLASS_SIZE, class_of, class_size};
pub use arena::{ARENA_COUNT, ArenaAllocator};
pub use coalescing::Allocator;
pub use error::AllocError;
pub use platform::{PAGE_SIZE, PageSource};
pub use stats::Stats;
