//! The arena allocator installed as the process allocator.

use std::{collections::BTreeMap, sync::Arc, thread};

use hmalloc::ArenaAllocator;

#[global_allocator]
static GLOBAL: ArenaAllocator = ArenaAllocator::new();

#[repr(align(256))]
struct Aligned256([u8; 300]);

#[repr(align(8192))]
struct AlignedPage(u64);

#[test]
fn collections_grow_and_shrink() {
  let mut v: Vec<u64> = Vec::new();
  for i in 0..100_000 {
    v.push(i);
  }
  assert_eq!(v.iter().sum::<u64>(), 99_999 * 100_000 / 2);
  v.truncate(10);
  v.shrink_to_fit();
  assert_eq!(v, (0..10).collect::<Vec<_>>());

  let mut s = String::new();
  for word in ["alpha", "beta", "gamma"].iter().cycle().take(3000) {
    s.push_str(word);
  }
  assert!(s.starts_with("alphabetagamma"));

  let map: BTreeMap<u32, String> = (0..5000).map(|i| (i, i.to_string())).collect();
  assert_eq!(map[&4321], "4321");
}

#[test]
fn over_aligned_boxes() {
  let a = Box::new(Aligned256([7; 300]));
  assert_eq!(&*a as *const _ as usize % 256, 0);
  assert!(a.0.iter().all(|&b| b == 7));

  let p = Box::new(AlignedPage(42));
  assert_eq!(&*p as *const _ as usize % 8192, 0);
  assert_eq!(p.0, 42);

  let v: Vec<Aligned256> = (0..50).map(|i| Aligned256([i; 300])).collect();
  for (i, item) in v.iter().enumerate() {
    assert_eq!(item as *const _ as usize % 256, 0);
    assert_eq!(item.0[299], i as u8);
  }
}

#[test]
fn threads_share_the_heap() {
  let shared = Arc::new((0..1000).map(|i| i * 2).collect::<Vec<u32>>());
  let handles: Vec<_> = (0..8)
    .map(|t| {
      let shared = Arc::clone(&shared);
      thread::spawn(move || {
        let mut local = Vec::new();
        for i in 0..2000u32 {
          local.push(format!("{t}-{i}-{}", shared[(i % 1000) as usize]));
        }
        local.len()
      })
    })
    .collect();
  for handle in handles {
    assert_eq!(handle.join().unwrap(), 2000);
  }
}

#[test]
fn stats_reflect_process_traffic() {
  let before = GLOBAL.stats();
  let boxed = std::hint::black_box(Box::new([0u8; 100]));
  drop(boxed);
  let after = GLOBAL.stats();
  assert!(after.chunks_allocated > before.chunks_allocated);
  assert!(after.chunks_freed > before.chunks_freed);
}
