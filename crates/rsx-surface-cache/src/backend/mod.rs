//! Host graphics API boundary.
//!
//! The cache never talks to a graphics API directly. It drives a [`HostBackend`], a capability
//! set covering surface allocation, clears, uploads and read-back, plus the per-draw and per-frame
//! lifecycle hooks. One implementation exists per target API and the choice is made when the
//! [`crate::SurfaceCache`] is constructed:
//! - [`SoftwareBackend`] keeps surfaces in host memory (headless runs, tests),
//! - `WgpuBackend` (feature `wgpu-backend`) keeps them in a `wgpu::Device`.

use core::fmt;

use crate::error::BackendError;
use crate::format::{ClearValue, SurfaceFormat};

mod software;
#[cfg(all(feature = "wgpu-backend", not(target_arch = "wasm32")))]
mod wgpu_backend;

pub use software::{BackendOp, SoftwareBackend};
#[cfg(all(feature = "wgpu-backend", not(target_arch = "wasm32")))]
pub use wgpu_backend::WgpuBackend;

/// Opaque handle of a host surface resource (framebuffer attachment or texture).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Software,
    Wgpu,
}

pub trait HostBackend {
    fn kind(&self) -> BackendKind;

    /// Whether `format` can be stored without substituting a different texel layout.
    fn supports_format(&self, format: SurfaceFormat) -> bool;

    fn create_surface(
        &mut self,
        format: SurfaceFormat,
        width: u32,
        height: u32,
    ) -> Result<ResourceId, BackendError>;

    fn destroy_surface(&mut self, id: ResourceId);

    fn clear_surface(&mut self, id: ResourceId, value: ClearValue) -> Result<(), BackendError>;

    /// Replace the surface contents with tightly packed texels (`width * texel_size` per row).
    fn upload_surface(&mut self, id: ResourceId, texels: &[u8]) -> Result<(), BackendError>;

    /// Read the surface contents back as tightly packed texels (`width * texel_size` per row).
    fn read_back(&mut self, id: ResourceId) -> Result<Vec<u8>, BackendError>;

    fn begin_draw(&mut self) {}

    fn end_draw(&mut self) {}

    fn flip(&mut self, _buffer: u32) {}
}

impl<B: HostBackend + ?Sized> HostBackend for Box<B> {
    fn kind(&self) -> BackendKind {
        (**self).kind()
    }

    fn supports_format(&self, format: SurfaceFormat) -> bool {
        (**self).supports_format(format)
    }

    fn create_surface(
        &mut self,
        format: SurfaceFormat,
        width: u32,
        height: u32,
    ) -> Result<ResourceId, BackendError> {
        (**self).create_surface(format, width, height)
    }

    fn destroy_surface(&mut self, id: ResourceId) {
        (**self).destroy_surface(id)
    }

    fn clear_surface(&mut self, id: ResourceId, value: ClearValue) -> Result<(), BackendError> {
        (**self).clear_surface(id, value)
    }

    fn upload_surface(&mut self, id: ResourceId, texels: &[u8]) -> Result<(), BackendError> {
        (**self).upload_surface(id, texels)
    }

    fn read_back(&mut self, id: ResourceId) -> Result<Vec<u8>, BackendError> {
        (**self).read_back(id)
    }

    fn begin_draw(&mut self) {
        (**self).begin_draw()
    }

    fn end_draw(&mut self) {
        (**self).end_draw()
    }

    fn flip(&mut self, buffer: u32) {
        (**self).flip(buffer)
    }
}
