use crate::backend::{BackendKind, ResourceId};
use crate::descriptor::SurfaceSlot;
use crate::format::SurfaceFormat;
use crate::guest_memory::GuestMemoryError;
use crate::registry::SectionKey;

/// Failures reported by a host backend.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("host surface allocation failed: out of memory")]
    OutOfMemory,
    #[error("unknown host resource {0}")]
    UnknownResource(ResourceId),
    #[error("texel data size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("no suitable adapter found")]
    AdapterNotFound,
    #[error("{0}")]
    Other(String),
}

/// Outcome of a failed write-back; carried by a `FlushRequest` back to its waiter.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FlushError {
    #[error("section {section:?} was evicted before the flush was serviced")]
    StaleSection { section: SectionKey },
    #[error("read-back failed: {0}")]
    Backend(BackendError),
    #[error("write to guest memory failed: {0}")]
    GuestMemory(GuestMemoryError),
    #[error("surface cache shut down before the flush was serviced")]
    ShutDown,
}

impl From<BackendError> for FlushError {
    fn from(err: BackendError) -> Self {
        FlushError::Backend(err)
    }
}

impl From<GuestMemoryError> for FlushError {
    fn from(err: GuestMemoryError) -> Self {
        FlushError::GuestMemory(err)
    }
}

/// Errors surfaced by bind/clear/export calls on the render thread.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("{backend:?} backend cannot represent {format} (bound to {slot})")]
    UnsupportedFormat {
        slot: SurfaceSlot,
        format: SurfaceFormat,
        backend: BackendKind,
    },
    #[error("invalid surface descriptor for {slot}: {reason}")]
    InvalidDescriptor {
        slot: SurfaceSlot,
        reason: &'static str,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    GuestMemory(#[from] GuestMemoryError),
    #[error(transparent)]
    Flush(#[from] FlushError),
}
