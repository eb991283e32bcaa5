use std::collections::{HashMap, HashSet};

use super::{BackendKind, HostBackend, ResourceId};
use crate::error::BackendError;
use crate::format::{ClearValue, SurfaceFormat};

/// One call made against a [`SoftwareBackend`], in call order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendOp {
    Create {
        id: ResourceId,
        format: SurfaceFormat,
        width: u32,
        height: u32,
    },
    Destroy(ResourceId),
    Clear {
        id: ResourceId,
        value: ClearValue,
    },
    Upload(ResourceId),
    ReadBack(ResourceId),
    BeginDraw,
    EndDraw,
    Flip(u32),
}

#[derive(Debug)]
struct SoftSurface {
    format: SurfaceFormat,
    width: u32,
    height: u32,
    texels: Vec<u8>,
}

/// Host surfaces kept in plain host memory.
///
/// Used for headless runs and as the deterministic backend in tests. The operation log and the
/// failure switches double as debug hooks: callers can inspect exactly which write-backs happened
/// and inject read-back failures without a real GPU. The log is off unless the backend is built
/// with [`SoftwareBackend::with_op_log`] or [`SoftwareBackend::set_record_ops`] turns it on.
#[derive(Debug, Default)]
pub struct SoftwareBackend {
    surfaces: HashMap<ResourceId, SoftSurface>,
    next_id: u64,
    unsupported: HashSet<SurfaceFormat>,
    fail_read_backs: bool,
    record_ops: bool,
    ops: Vec<BackendOp>,
    read_backs: usize,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that records every call in its operation log.
    pub fn with_op_log() -> Self {
        Self {
            record_ops: true,
            ..Self::default()
        }
    }

    /// A backend that reports `formats` as unsupported.
    pub fn with_unsupported_formats(formats: impl IntoIterator<Item = SurfaceFormat>) -> Self {
        Self {
            unsupported: formats.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Make every subsequent read-back fail (simulates a lost device).
    pub fn set_fail_read_backs(&mut self, fail: bool) {
        self.fail_read_backs = fail;
    }

    pub fn set_record_ops(&mut self, record: bool) {
        self.record_ops = record;
    }

    /// Calls recorded while the operation log was on.
    pub fn ops(&self) -> &[BackendOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Read-backs of `id` seen by the operation log.
    pub fn read_back_count(&self, id: ResourceId) -> usize {
        self.ops
            .iter()
            .filter(|op| **op == BackendOp::ReadBack(id))
            .count()
    }

    /// Successful read-backs since construction, logged or not.
    pub fn total_read_backs(&self) -> usize {
        self.read_backs
    }

    pub fn live_surfaces(&self) -> usize {
        self.surfaces.len()
    }

    pub fn texels(&self, id: ResourceId) -> Option<&[u8]> {
        self.surfaces.get(&id).map(|s| s.texels.as_slice())
    }

    fn surface_mut(&mut self, id: ResourceId) -> Result<&mut SoftSurface, BackendError> {
        self.surfaces
            .get_mut(&id)
            .ok_or(BackendError::UnknownResource(id))
    }

    fn record(&mut self, op: BackendOp) {
        if self.record_ops {
            self.ops.push(op);
        }
    }
}

impl HostBackend for SoftwareBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn supports_format(&self, format: SurfaceFormat) -> bool {
        !self.unsupported.contains(&format)
    }

    fn create_surface(
        &mut self,
        format: SurfaceFormat,
        width: u32,
        height: u32,
    ) -> Result<ResourceId, BackendError> {
        if !self.supports_format(format) {
            return Err(BackendError::Validation(format!(
                "unsupported surface format {format}"
            )));
        }
        let len = format
            .surface_len(width, height)
            .ok_or(BackendError::OutOfMemory)?;
        let mut texels = Vec::new();
        texels
            .try_reserve_exact(len)
            .map_err(|_| BackendError::OutOfMemory)?;
        texels.resize(len, 0);

        self.next_id += 1;
        let id = ResourceId(self.next_id);
        self.surfaces.insert(
            id,
            SoftSurface {
                format,
                width,
                height,
                texels,
            },
        );
        self.record(BackendOp::Create {
            id,
            format,
            width,
            height,
        });
        Ok(id)
    }

    fn destroy_surface(&mut self, id: ResourceId) {
        if self.surfaces.remove(&id).is_some() {
            self.record(BackendOp::Destroy(id));
        }
    }

    fn clear_surface(&mut self, id: ResourceId, value: ClearValue) -> Result<(), BackendError> {
        let surface = self.surface_mut(id)?;
        let texel = surface.format.encode_clear(value).ok_or_else(|| {
            BackendError::Validation(format!(
                "clear value {value:?} does not apply to {} surface",
                surface.format
            ))
        })?;
        for dst in surface.texels.chunks_exact_mut(texel.len()) {
            dst.copy_from_slice(&texel);
        }
        self.record(BackendOp::Clear { id, value });
        Ok(())
    }

    fn upload_surface(&mut self, id: ResourceId, texels: &[u8]) -> Result<(), BackendError> {
        let surface = self.surface_mut(id)?;
        if texels.len() != surface.texels.len() {
            return Err(BackendError::SizeMismatch {
                expected: surface.texels.len(),
                actual: texels.len(),
            });
        }
        surface.texels.copy_from_slice(texels);
        self.record(BackendOp::Upload(id));
        Ok(())
    }

    fn read_back(&mut self, id: ResourceId) -> Result<Vec<u8>, BackendError> {
        if self.fail_read_backs {
            return Err(BackendError::Other("simulated device loss".into()));
        }
        let surface = self.surface_mut(id)?;
        debug_assert_eq!(
            Some(surface.texels.len()),
            surface.format.surface_len(surface.width, surface.height)
        );
        let out = surface.texels.clone();
        self.read_backs += 1;
        self.record(BackendOp::ReadBack(id));
        Ok(out)
    }

    fn begin_draw(&mut self) {
        self.record(BackendOp::BeginDraw);
    }

    fn end_draw(&mut self) {
        self.record(BackendOp::EndDraw);
    }

    fn flip(&mut self, buffer: u32) {
        self.record(BackendOp::Flip(buffer));
    }
}
