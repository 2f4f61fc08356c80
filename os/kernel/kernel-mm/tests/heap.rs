mod common;

use common::{Arena, TestSched};
use kernel_mm::node::{MM_MIN_CHUNK, MM_MIN_REGION_SIZE, SIZEOF_ALLOCNODE};
use kernel_mm::{Heap, HeapError};

fn heap_over(arena: &mut Arena) -> Heap {
    let heap = Heap::new();
    unsafe { heap.initialize(arena.ptr(), arena.len()) }.unwrap();
    heap
}

#[test]
fn free_node_fills_region_between_guards() {
    let sched = TestSched::new();
    for size in (MM_MIN_REGION_SIZE..MM_MIN_REGION_SIZE + 40 * MM_MIN_CHUNK).step_by(MM_MIN_CHUNK) {
        let mut arena = Arena::new(size);
        let heap = heap_over(&mut arena);
        let info = heap.mallinfo(&sched).unwrap();
        assert_eq!(info.ordblks, 1);
        assert_eq!(info.fordblks, size - 2 * SIZEOF_ALLOCNODE);
        assert_eq!(info.mxordblk, info.fordblks);
        assert_eq!(info.arena, size);
    }
}

#[test]
fn unaligned_length_is_trimmed() {
    let sched = TestSched::new();
    let mut arena = Arena::new(1024);
    let heap = Heap::new();
    unsafe { heap.initialize(arena.ptr(), 1024 - 5) }.unwrap();
    assert_eq!(heap.heapsize(), 1024 - MM_MIN_CHUNK);
    assert_eq!(
        heap.mallinfo(&sched).unwrap().fordblks,
        1024 - MM_MIN_CHUNK - 2 * SIZEOF_ALLOCNODE
    );
}

#[test]
fn overflowing_start_leaves_heap_untouched() {
    let mut arena = Arena::new(512);
    let heap = heap_over(&mut arena);
    let start = std::ptr::without_provenance_mut::<u8>(usize::MAX - 1);
    let err = unsafe { heap.add_region(start, 64) }.unwrap_err();
    assert!(matches!(err, HeapError::AlignmentOverflow { .. }));
    assert_eq!(err.errno(), -22);
    assert_eq!(heap.nregions(), 1);
    assert_eq!(heap.heapsize(), 512);
}

#[test]
fn too_small_region_leaves_heapsize_unchanged() {
    let mut arena = Arena::new(512);
    let mut tiny = Arena::new(MM_MIN_REGION_SIZE);
    let heap = heap_over(&mut arena);
    for size in [1, 2 * SIZEOF_ALLOCNODE, 2 * SIZEOF_ALLOCNODE + 1, MM_MIN_REGION_SIZE - 1] {
        let err = unsafe { heap.add_region(tiny.ptr(), size) }.unwrap_err();
        assert_eq!(err, HeapError::RegionTooSmall { size: size & !(MM_MIN_CHUNK - 1) });
    }
    assert_eq!(heap.heapsize(), 512);
    assert_eq!(heap.nregions(), 1);
}

#[test]
fn failed_initialize_reports_errno() {
    let heap = Heap::new();
    let err = unsafe { heap.initialize(std::ptr::null_mut(), 4096) }.unwrap_err();
    assert_eq!(err, HeapError::NullStart);
    assert_eq!(err.errno(), -22);
}

#[test]
fn every_region_walks_from_head_to_tail_guard() {
    let sched = TestSched::new();
    let mut a = Arena::new(2048);
    let mut b = Arena::new(1024);
    let heap = heap_over(&mut a);
    unsafe { heap.add_region(b.ptr(), b.len()) }.unwrap();

    let mut live = Vec::new();
    for i in 1..40 {
        if let Some(p) = heap.malloc(&sched, i * 7) {
            live.push(p);
        }
        if i % 3 == 0 && !live.is_empty() {
            let p = live.swap_remove(live.len() / 2);
            unsafe { heap.free(&sched, p.as_ptr()) };
        }
    }

    let mut seen: Vec<Vec<usize>> = vec![Vec::new(); heap.nregions()];
    heap.walk(&sched, |region, node| seen[region].push(node.addr))
        .unwrap();

    for (index, addrs) in seen.iter().enumerate() {
        let region = heap.region(index).unwrap();
        assert_eq!(addrs.first().copied(), Some(region.start.addr()));
        assert_eq!(addrs.last().copied(), Some(region.end.addr()));
        assert!(addrs.windows(2).all(|w| w[0] < w[1]));
        assert!(addrs.iter().all(|&a| a <= region.end.addr()));
    }

    for p in live {
        unsafe { heap.free(&sched, p.as_ptr()) };
    }
    assert_eq!(heap.mallinfo(&sched).unwrap().ordblks, 2);
}

#[test]
fn allocation_spills_into_second_region() {
    let sched = TestSched::new();
    let mut a = Arena::new(512);
    let mut b = Arena::new(512);
    let heap = heap_over(&mut a);
    unsafe { heap.add_region(b.ptr(), b.len()) }.unwrap();

    let in_b = |p: std::ptr::NonNull<u8>| {
        let r = heap.region(1).unwrap();
        (r.start.addr()..r.end.addr()).contains(&p.as_ptr().addr())
    };

    let mut got = Vec::new();
    while let Some(p) = heap.malloc(&sched, 100) {
        got.push(p);
    }
    assert!(got.iter().any(|&p| in_b(p)));
    assert!(got.iter().any(|&p| !in_b(p)));
}

#[test]
fn mallinfo_balances_after_churn() {
    let sched = TestSched::new();
    let mut arena = Arena::new(8192);
    let heap = heap_over(&mut arena);

    let mut live = Vec::new();
    let mut seed = 0x2545_f491_u32;
    for _ in 0..200 {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        if seed % 3 != 0 || live.is_empty() {
            if let Some(p) = heap.malloc(&sched, (seed % 300) as usize + 1) {
                live.push(p);
            }
        } else {
            let p = live.swap_remove(seed as usize % live.len());
            unsafe { heap.free(&sched, p.as_ptr()) };
        }
        let info = heap.mallinfo(&sched).unwrap();
        assert_eq!(info.uordblks + info.fordblks, info.arena);
    }
}

#[test]
fn reinitialize_forgets_previous_regions() {
    let sched = TestSched::new();
    let mut a = Arena::new(1024);
    let mut b = Arena::new(1024);
    let heap = heap_over(&mut a);
    unsafe { heap.add_region(b.ptr(), b.len()) }.unwrap();
    let _ = heap.malloc(&sched, 64);

    unsafe { heap.initialize(a.ptr(), a.len()) }.unwrap();
    assert_eq!(heap.nregions(), 1);
    assert_eq!(heap.heapsize(), 1024);
    assert_eq!(heap.mallinfo(&sched).unwrap().ordblks, 1);
}
