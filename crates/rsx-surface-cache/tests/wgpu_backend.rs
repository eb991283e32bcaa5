mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rsx_surface_cache::{
    BackendError, ClearValue, ColorFormat, DepthFormat, GuestSurfaceDescriptor, HostBackend,
    SurfaceCache, SurfaceCacheConfig, SurfaceFormat, SurfaceSlot, VecGuestMemory, WgpuBackend,
};

use common::{init_tracing, skip_or_panic};

fn backend(test_name: &str) -> Option<WgpuBackend> {
    init_tracing();
    match pollster::block_on(WgpuBackend::new_headless()) {
        Ok(backend) => Some(backend),
        Err(BackendError::AdapterNotFound) => {
            skip_or_panic(test_name, "wgpu adapter not found");
            None
        }
        Err(err) => {
            skip_or_panic(test_name, &format!("failed to create device: {err}"));
            None
        }
    }
}

#[test]
fn clear_then_read_back_matches_guest_encoding() {
    let Some(mut backend) = backend(concat!(module_path!(), "::clear_then_read_back")) else {
        return;
    };

    for (format, argb) in [
        (ColorFormat::A8R8G8B8, 0x8040_2010u32),
        (ColorFormat::A8B8G8R8, 0x8040_2010),
        (ColorFormat::B8, 0x0000_00FF),
        (ColorFormat::G8B8, 0x0000_80FF),
    ] {
        let format = SurfaceFormat::Color(format);
        let id = backend.create_surface(format, 4, 3).unwrap();
        backend.clear_surface(id, ClearValue::Color(argb)).unwrap();
        let texel = format.encode_clear(ClearValue::Color(argb)).unwrap();
        assert_eq!(backend.read_back(id).unwrap(), texel.repeat(12), "{format}");
        backend.destroy_surface(id);
    }
}

#[test]
fn upload_round_trips_through_padded_rows() {
    let Some(mut backend) = backend(concat!(module_path!(), "::upload_round_trips")) else {
        return;
    };
    // 3 texels * 4 bytes per row: well below the copy row alignment.
    let format = SurfaceFormat::Color(ColorFormat::A8R8G8B8);
    let id = backend.create_surface(format, 3, 5).unwrap();
    let texels: Vec<u8> = (0..3 * 5 * 4).map(|i| i as u8).collect();
    backend.upload_surface(id, &texels).unwrap();
    assert_eq!(backend.read_back(id).unwrap(), texels);
}

#[test]
fn depth16_clear_is_exact() {
    let Some(mut backend) = backend(concat!(module_path!(), "::depth16_clear_is_exact")) else {
        return;
    };
    let id = backend
        .create_surface(DepthFormat::Z16.into(), 4, 4)
        .unwrap();
    backend
        .clear_surface(id, ClearValue::DepthStencil(0x1234_5600))
        .unwrap();
    assert_eq!(backend.read_back(id).unwrap(), [0x34u8, 0x12].repeat(16));
}

#[test]
fn unsupported_formats_fail_the_bind() {
    let Some(backend) = backend(concat!(module_path!(), "::unsupported_formats_fail_the_bind"))
    else {
        return;
    };
    assert!(!backend.supports_format(ColorFormat::R5G6B5.into()));
    assert!(!backend.supports_format(DepthFormat::Z24S8.into()));

    let memory = Arc::new(VecGuestMemory::new(0x10000));
    let mut cache = SurfaceCache::new(backend, memory, SurfaceCacheConfig::default());
    let depth = GuestSurfaceDescriptor::depth(0x1000, 16, DepthFormat::Z24S8, 4, 4);
    assert!(cache.bind_surface(SurfaceSlot::Depth, Some(depth)).is_err());
}

#[test]
fn cache_writes_gpu_clear_back_to_guest_memory() {
    let Some(backend) = backend(concat!(module_path!(), "::cache_writes_gpu_clear_back")) else {
        return;
    };
    let memory = Arc::new(VecGuestMemory::new(0x20000));
    let mut cache = SurfaceCache::new(backend, memory.clone(), SurfaceCacheConfig::default());
    let desc = GuestSurfaceDescriptor::color(0x10000, 256, ColorFormat::B8, 64, 64);
    cache.bind_surface(SurfaceSlot::Color(0), Some(desc)).unwrap();
    cache.set_clear_color(0x0000_00AB);
    cache.on_clear(SurfaceSlot::Color(0)).unwrap();

    assert!(cache.on_memory_fault(0x10000 + 10, false));
    assert_eq!(memory.read_u8(0x10000 + 10), Ok(0xAB));
    assert_eq!(memory.read_u8(0x10000 + 64), Ok(0));
}
