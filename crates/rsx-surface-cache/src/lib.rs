//! `rsx-surface-cache` keeps guest render surfaces resident in host GPU memory and coherent with
//! guest system memory.
//!
//! Currently this crate provides:
//! - An address-indexed registry of GPU-resident surfaces with bind/evict/invalidate policy
//!   (see [`SectionRegistry`]).
//! - A cross-thread flush queue through which any thread can ask the render thread to write a
//!   surface back before touching its memory (see [`FlushQueue`] and [`FaultHandler`]).
//! - The render-thread entry points tying both together (see [`SurfaceCache`]).
//! - Host backends: [`SoftwareBackend`] and, behind the `wgpu-backend` feature, `WgpuBackend`.

mod config;
mod coordinator;
mod error;
mod flush_queue;
mod registry;
mod sync;

pub mod backend;
pub mod descriptor;
pub mod format;
pub mod guest_memory;
pub mod stats;

pub use backend::{BackendKind, BackendOp, HostBackend, ResourceId, SoftwareBackend};
#[cfg(all(feature = "wgpu-backend", not(target_arch = "wasm32")))]
pub use backend::WgpuBackend;
pub use config::SurfaceCacheConfig;
pub use coordinator::{ClearFlags, FaultHandler, SurfaceCache};
pub use descriptor::{GuestRange, GuestSurfaceDescriptor, SurfaceSet, SurfaceSlot};
pub use error::{BackendError, CacheError, FlushError};
pub use flush_queue::{FlushQueue, FlushRequest};
pub use format::{ClearValue, ColorFormat, DepthFormat, SurfaceFormat};
pub use guest_memory::{GuestMemory, GuestMemoryError, VecGuestMemory};
pub use registry::{
    BindOutcome, CachedSection, FlushSummary, SectionIndex, SectionKey, SectionRegistry,
};
pub use stats::{SurfaceCacheStats, SurfaceCacheStatsSnapshot};
