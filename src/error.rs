use std::io::{self, Write};

/// Failures inside the allocator.
///
/// None of these can be returned to a caller of `malloc`-style APIs: the public
/// surface routes every `Err` into [`fatal`], matching the contract of a memory
/// allocation primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
  #[error("mapping {pages} page(s) failed (errno {errno})")]
  MapFailed { pages: usize, errno: i32 },

  #[error("unmapping {pages} page(s) at {addr:#x} failed (errno {errno})")]
  UnmapFailed { addr: usize, pages: usize, errno: i32 },

  #[error("request of {size} bytes overflows the address space")]
  SizeOverflow { size: usize },

  #[error("address {addr:#x} is outside the page directory range")]
  AddressOutOfRange { addr: usize },

  #[error("pointer {addr:#x} was not handed out by this allocator")]
  UnknownPointer { addr: usize },

  #[error("free cell of {size} bytes is below the {min}-byte minimum")]
  FreeCellTooSmall { size: usize, min: usize },
}

pub(crate) fn last_errno() -> i32 {
  io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Reports `err` and aborts the process.
///
/// Written straight to stderr: a logger may allocate, and the caller may be
/// holding an allocator lock.
#[cold]
#[inline(never)]
pub(crate) fn fatal(err: AllocError) -> ! {
  let _ = writeln!(io::stderr(), "hmalloc: fatal: {err}");
  std::process::abort()
}

pub(crate) trait OrAbort<T> {
  fn or_abort(self) -> T;
}

impl<T> OrAbort<T> for Result<T, AllocError> {
  #[inline]
  fn or_abort(self) -> T {
    match self {
      Ok(v) => v,
      Err(err) => fatal(err),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn messages_name_the_failure() {
    let err = AllocError::MapFailed { pages: 3, errno: 12 };
    assert_eq!(err.to_string(), "mapping 3 page(s) failed (errno 12)");

    let err = AllocError::UnknownPointer { addr: 0x1000 };
    assert_eq!(
      err.to_string(),
      "pointer 0x1000 was not handed out by this allocator"
    );
  }

  #[test]
  fn or_abort_passes_ok_through() {
    let ok: Result<u32, AllocError> = Ok(7);
    assert_eq!(ok.or_abort(), 7);
  }
}
