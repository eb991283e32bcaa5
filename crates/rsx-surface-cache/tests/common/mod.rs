//! Shared helpers for `rsx-surface-cache` integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;

use rsx_surface_cache::{
    ColorFormat, GuestSurfaceDescriptor, SoftwareBackend, SurfaceCache, SurfaceCacheConfig,
    VecGuestMemory,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn require_webgpu() -> bool {
    let Ok(raw) = std::env::var("RSX_REQUIRE_WEBGPU") else {
        return false;
    };

    let v = raw.trim();
    v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
}

pub fn skip_or_panic(test_name: &str, reason: &str) {
    if require_webgpu() {
        panic!("RSX_REQUIRE_WEBGPU is enabled but {test_name} cannot run: {reason}");
    }
    eprintln!("skipping {test_name}: {reason}");
}

/// Software-backed cache over `mem_size` bytes of zeroed guest RAM.
pub fn software_cache(
    mem_size: usize,
    config: SurfaceCacheConfig,
) -> (SurfaceCache<SoftwareBackend>, Arc<VecGuestMemory>) {
    init_tracing();
    let memory = Arc::new(VecGuestMemory::new(mem_size));
    let cache = SurfaceCache::new(SoftwareBackend::with_op_log(), memory.clone(), config);
    (cache, memory)
}

/// 8-bit colour surface whose pitch equals its width.
pub fn b8_surface(address: u32, width: u16, height: u16) -> GuestSurfaceDescriptor {
    GuestSurfaceDescriptor::color(address, u32::from(width), ColorFormat::B8, width, height)
}

/// Raise a fault from a non-render thread while pumping the queue on this one.
pub fn fault_from_foreign_thread(cache: &mut SurfaceCache<SoftwareBackend>, address: u32) -> bool {
    let handler = cache.fault_handler();
    let worker = thread::spawn(move || handler.on_memory_fault(address, false));
    while !worker.is_finished() {
        cache.drain_pending();
        thread::yield_now();
    }
    worker.join().unwrap()
}
