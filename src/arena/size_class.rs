//! Power-of-two size classes for the arena allocator.

/// Smallest class: 16 bytes, enough for a free cell.
pub const MIN_CLASS_SHIFT: u32 = 4;
/// Largest class: 8 KiB. Bigger requests get a dedicated mapping.
pub const MAX_CLASS_SHIFT: u32 = 13;

pub const CLASS_COUNT: usize = (MAX_CLASS_SHIFT - MIN_CLASS_SHIFT + 1) as usize;
pub const MAX_CLASS_SIZE: usize = 1 << MAX_CLASS_SHIFT;

/// Class of the smallest power of two that holds `size` bytes, or `None`
/// above [`MAX_CLASS_SIZE`].
#[inline(always)]
pub const fn class_of(size: usize) -> Option<usize> {
  if size > MAX_CLASS_SIZE {
    return None;
  }
  let size = if size < (1 << MIN_CLASS_SHIFT) {
    1 << MIN_CLASS_SHIFT
  } else {
    size
  };
  Some((size.next_power_of_two().trailing_zeros() - MIN_CLASS_SHIFT) as usize)
}

/// Slot size of `class`.
#[inline(always)]
pub const fn class_size(class: usize) -> usize {
  1 << (class as u32 + MIN_CLASS_SHIFT)
}

const _: () = assert!(class_size(0) == 16);
const _: () = assert!(class_size(CLASS_COUNT - 1) == MAX_CLASS_SIZE);

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tiny_requests_share_the_smallest_class() {
    assert_eq!(class_of(0), Some(0));
    assert_eq!(class_of(1), Some(0));
    assert_eq!(class_of(16), Some(0));
  }

  #[test]
  fn every_size_lands_in_the_next_power_of_two() {
    for k in MIN_CLASS_SHIFT + 1..=MAX_CLASS_SHIFT {
      let lo = (1usize << (k - 1)) + 1;
      let hi = 1usize << k;
      for size in [lo, (lo + hi) / 2, hi] {
        let class = class_of(size).unwrap();
        assert_eq!(class_size(class), hi, "size {size}");
      }
    }
  }

  #[test]
  fn oversized_requests_have_no_class() {
    assert_eq!(class_of(MAX_CLASS_SIZE + 1), None);
    assert_eq!(class_of(usize::MAX), None);
  }
}
