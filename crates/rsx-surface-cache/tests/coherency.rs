mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use pretty_assertions::assert_eq;
use rsx_surface_cache::{BackendOp, BindOutcome, SurfaceCacheConfig, SurfaceSlot};

use common::{b8_surface, fault_from_foreign_thread, software_cache};

#[test]
fn rebinding_an_unchanged_descriptor_keeps_the_resource() {
    let (mut cache, _memory) = software_cache(0x10000, SurfaceCacheConfig::default());
    let desc = b8_surface(0x1000, 64, 64);

    let first = cache.bind_surface(SurfaceSlot::Color(0), Some(desc)).unwrap();
    let resource = cache.section(first.key().unwrap()).unwrap().resource();
    let second = cache.bind_surface(SurfaceSlot::Color(0), Some(desc)).unwrap();

    assert_eq!(second, BindOutcome::Unchanged(first.key().unwrap()));
    assert_eq!(
        cache.bound_section(SurfaceSlot::Color(0)).unwrap().resource(),
        resource
    );
    let creates = cache
        .backend()
        .ops()
        .iter()
        .filter(|op| matches!(op, BackendOp::Create { .. }))
        .count();
    assert_eq!(creates, 1);
    assert_eq!(cache.stats().snapshot().bind_hits, 1);
}

#[test]
fn overlapping_bind_flushes_the_victim_once_before_dropping_it() {
    let (mut cache, memory) = software_cache(0x10000, SurfaceCacheConfig::default());

    // A covers [0x1000, 0x2000).
    cache
        .bind_surface(SurfaceSlot::Color(0), Some(b8_surface(0x1000, 256, 16)))
        .unwrap();
    let a = cache.bound_section(SurfaceSlot::Color(0)).unwrap().resource();
    cache.set_clear_color(0x0000_0011);
    cache.on_clear(SurfaceSlot::Color(0)).unwrap();
    cache.backend_mut().clear_ops();

    // B covers [0x1800, 0x2800).
    let outcome = cache
        .bind_surface(SurfaceSlot::Color(1), Some(b8_surface(0x1800, 256, 16)))
        .unwrap();
    assert!(matches!(outcome, BindOutcome::Created { evicted: 1, .. }));

    let ops = cache.backend().ops();
    assert_eq!(cache.backend().read_back_count(a), 1);
    assert_eq!(ops[0], BackendOp::ReadBack(a));
    assert_eq!(ops[1], BackendOp::Destroy(a));
    assert!(matches!(ops[2], BackendOp::Create { .. }));

    // A's cleared contents reached guest memory and seeded B's overlapping half.
    assert_eq!(memory.read_u8(0x1FFF), Ok(0x11));
    assert!(cache.bound_section(SurfaceSlot::Color(0)).is_none());
    assert_eq!(cache.lookup(0x1000), None);
    assert_eq!(cache.stats().snapshot().sections_evicted, 1);
}

#[test]
fn fault_resolution_follows_half_open_section_bounds() {
    let (mut cache, _memory) = software_cache(0x10000, SurfaceCacheConfig::default());
    // [0x1000, 0x2000)
    cache
        .bind_surface(SurfaceSlot::Color(0), Some(b8_surface(0x1000, 256, 16)))
        .unwrap();

    assert!(!fault_from_foreign_thread(&mut cache, 0x0FFF));
    assert!(fault_from_foreign_thread(&mut cache, 0x1000));
    assert!(fault_from_foreign_thread(&mut cache, 0x1FFF));
    assert!(!fault_from_foreign_thread(&mut cache, 0x2000));

    let stats = cache.stats().snapshot();
    assert_eq!(stats.flush_requests_posted, 2);
    assert_eq!(stats.flush_requests_serviced, 2);
}

#[test]
fn synchronize_is_idempotent() {
    let (mut cache, _memory) = software_cache(0x10000, SurfaceCacheConfig::default());
    for (index, address) in [0x1000u32, 0x2000, 0x3000].into_iter().enumerate() {
        cache
            .bind_surface(
                SurfaceSlot::Color(index as u8),
                Some(b8_surface(address, 64, 16)),
            )
            .unwrap();
    }
    cache.end_draw();
    assert_eq!(cache.registry().dirty_count(), 3);

    let first = cache.synchronize();
    assert_eq!(first.written, 3);
    assert_eq!(cache.registry().dirty_count(), 0);
    let write_backs = cache.stats().snapshot().write_backs;
    let read_backs = cache.backend().total_read_backs();

    let second = cache.synchronize();
    assert_eq!(second.written, 0);
    assert_eq!(cache.stats().snapshot().write_backs, write_backs);
    assert_eq!(cache.backend().total_read_backs(), read_backs);
}

#[test]
fn requests_complete_in_posting_order() {
    let (mut cache, _memory) = software_cache(0x10000, SurfaceCacheConfig::default());
    cache
        .bind_surface(SurfaceSlot::Color(0), Some(b8_surface(0x1000, 64, 16)))
        .unwrap();
    cache
        .bind_surface(SurfaceSlot::Color(1), Some(b8_surface(0x2000, 64, 16)))
        .unwrap();
    cache.end_draw();

    let barrier = Arc::new(Barrier::new(2));
    let first = {
        let handler = cache.fault_handler();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let request = handler.post_flush_request(0x1000).unwrap();
            barrier.wait();
            request.wait().unwrap();
            request
        })
    };
    let second = {
        let handler = cache.fault_handler();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            let request = handler.post_flush_request(0x2000).unwrap();
            request.wait().unwrap();
            request
        })
    };

    while cache.pending_flush_requests() < 2 {
        thread::yield_now();
    }
    assert_eq!(cache.drain_pending(), 2);

    let r1 = first.join().unwrap();
    let r2 = second.join().unwrap();
    assert!(r1.ticket() < r2.ticket());
    assert!(r1.completion_index().unwrap() < r2.completion_index().unwrap());
    assert_eq!(cache.registry().dirty_count(), 0);
}

#[test]
fn cleared_surface_is_materialized_for_a_foreign_reader() {
    let (mut cache, memory) = software_cache(0x20000, SurfaceCacheConfig::default());
    let desc = rsx_surface_cache::GuestSurfaceDescriptor::color(
        0x10000,
        256,
        rsx_surface_cache::ColorFormat::B8,
        64,
        64,
    );
    cache.bind_surface(SurfaceSlot::Color(0), Some(desc)).unwrap();
    cache.set_clear_color(0x00C0_FFEE);
    cache.on_clear(SurfaceSlot::Color(0)).unwrap();
    assert!(cache.bound_section(SurfaceSlot::Color(0)).unwrap().is_dirty());

    assert!(fault_from_foreign_thread(&mut cache, 0x10000 + 10));

    assert_eq!(memory.read_u8(0x10000 + 10), Ok(0xEE));
    // Bytes between the end of a row and the next pitch boundary stay untouched.
    assert_eq!(memory.read_u8(0x10000 + 64), Ok(0x00));
    assert_eq!(memory.read_u8(0x10000 + 63 * 256 + 63), Ok(0xEE));
    assert!(!cache.bound_section(SurfaceSlot::Color(0)).unwrap().is_dirty());
    assert_eq!(cache.stats().snapshot().flush_requests_serviced, 1);
}
