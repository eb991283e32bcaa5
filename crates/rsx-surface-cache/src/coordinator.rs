use std::thread::{self, ThreadId};

use tracing::{debug, info, warn};

use crate::backend::{BackendKind, HostBackend, ResourceId};
use crate::config::SurfaceCacheConfig;
use crate::descriptor::{GuestSurfaceDescriptor, SurfaceSet, SurfaceSlot, COLOR_SLOT_COUNT};
use crate::error::{BackendError, CacheError, FlushError};
use crate::flush_queue::{FlushQueue, FlushRequest};
use crate::format::{ClearValue, DepthFormat, SurfaceFormat};
use crate::guest_memory::{GuestMemory, GuestMemoryError};
use crate::registry::{
    BindOutcome, CachedSection, FlushSummary, SectionIndex, SectionKey, SectionRegistry,
    SectionStorage,
};
use crate::stats::SurfaceCacheStats;
use crate::sync::{self, Arc, RwLock};

bitflags::bitflags! {
    /// Guest clear mask: which planes a clear command touches.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u32 {
        const DEPTH = 1 << 0;
        const STENCIL = 1 << 1;
        const COLOR_R = 1 << 4;
        const COLOR_G = 1 << 5;
        const COLOR_B = 1 << 6;
        const COLOR_A = 1 << 7;

        const COLOR = Self::COLOR_R.bits()
            | Self::COLOR_G.bits()
            | Self::COLOR_B.bits()
            | Self::COLOR_A.bits();
        const DEPTH_STENCIL = Self::DEPTH.bits() | Self::STENCIL.bits();
    }
}

/// State reachable from foreign threads.
struct Shared {
    queue: FlushQueue,
    index: Arc<SectionIndex>,
    render_thread: RwLock<ThreadId>,
    stats: SurfaceCacheStats,
}

impl Shared {
    fn is_render_thread(&self) -> bool {
        *sync::read(&self.render_thread) == thread::current().id()
    }
}

/// GPU-resident surface cache.
///
/// Owned by the render thread, which is the only thread allowed to bind, clear, evict or write
/// back sections. Other threads interact through a [`FaultHandler`].
pub struct SurfaceCache<B: HostBackend> {
    backend: B,
    memory: Arc<dyn GuestMemory>,
    config: SurfaceCacheConfig,
    registry: SectionRegistry,
    shared: Arc<Shared>,
    clear_color: u32,
    clear_depth_stencil: u32,
}

impl<B: HostBackend> SurfaceCache<B> {
    /// The calling thread becomes the render thread.
    pub fn new(backend: B, memory: Arc<dyn GuestMemory>, config: SurfaceCacheConfig) -> Self {
        let index = Arc::new(SectionIndex::new());
        let shared = Arc::new(Shared {
            queue: FlushQueue::new(),
            index: Arc::clone(&index),
            render_thread: RwLock::new(thread::current().id()),
            stats: SurfaceCacheStats::new(),
        });
        Self {
            backend,
            memory,
            config,
            registry: SectionRegistry::new(index),
            shared,
            clear_color: 0,
            clear_depth_stencil: 0xFFFF_FF00,
        }
    }

    /// Make the calling thread the render thread (after moving the cache onto it).
    pub fn on_init_thread(&self) {
        *sync::write(&self.shared.render_thread) = thread::current().id();
    }

    pub fn is_render_thread(&self) -> bool {
        self.shared.is_render_thread()
    }

    pub fn fault_handler(&self) -> FaultHandler {
        FaultHandler {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn config(&self) -> &SurfaceCacheConfig {
        &self.config
    }

    pub fn stats(&self) -> &SurfaceCacheStats {
        &self.shared.stats
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn guest_memory(&self) -> &Arc<dyn GuestMemory> {
        &self.memory
    }

    pub fn registry(&self) -> &SectionRegistry {
        &self.registry
    }

    pub fn lookup(&self, address: u32) -> Option<SectionKey> {
        self.registry.lookup(address)
    }

    pub fn section(&self, key: SectionKey) -> Option<&CachedSection> {
        self.registry.get(key)
    }

    pub fn bound_section(&self, slot: SurfaceSlot) -> Option<&CachedSection> {
        self.registry.get(self.registry.bound(slot)?)
    }

    pub fn mark_dirty(&mut self, key: SectionKey) -> bool {
        self.registry.mark_dirty(key)
    }

    pub fn pending_flush_requests(&self) -> usize {
        self.shared.queue.pending_len()
    }

    /// Bind every slot of `set`. Slots whose descriptor did not change since the previous call
    /// keep their section untouched.
    pub fn bind_surfaces(&mut self, set: &SurfaceSet) -> Result<(), CacheError> {
        for (slot, desc) in set.iter() {
            self.bind_surface(slot, desc)?;
        }
        Ok(())
    }

    pub fn bind_surface(
        &mut self,
        slot: SurfaceSlot,
        desc: Option<GuestSurfaceDescriptor>,
    ) -> Result<BindOutcome, CacheError> {
        let outcome = {
            let (registry, mut storage) = self.split();
            registry.bind(slot, desc, &mut storage)?
        };

        let stats = &self.shared.stats;
        match outcome {
            BindOutcome::Unbound => {}
            BindOutcome::Unchanged(_) => {
                stats.inc_bind_hits();
                if self.config.verbose {
                    debug!(%slot, "surface unchanged");
                }
            }
            BindOutcome::Reused(key) => {
                stats.inc_bind_hits();
                debug!(%slot, section = ?key, "reusing cached section");
            }
            BindOutcome::Created { key, evicted } => {
                stats.inc_bind_misses();
                debug!(%slot, section = ?key, evicted, "created section");
            }
        }
        Ok(outcome)
    }

    pub fn set_clear_color(&mut self, argb: u32) {
        self.clear_color = argb;
    }

    /// `depth24 << 8 | stencil8`.
    pub fn set_clear_depth_stencil(&mut self, z24s8: u32) {
        self.clear_depth_stencil = z24s8;
    }

    /// Clear the section bound to `slot` on the GPU with the latched clear value. The section is
    /// then ahead of guest memory.
    pub fn on_clear(&mut self, slot: SurfaceSlot) -> Result<(), CacheError> {
        let Some(key) = self.registry.bound(slot) else {
            warn!(%slot, "clear targets an unbound slot");
            return Ok(());
        };
        let Some(section) = self.registry.get(key) else {
            return Ok(());
        };
        let value = if slot.is_depth() {
            ClearValue::DepthStencil(self.clear_depth_stencil)
        } else {
            ClearValue::Color(self.clear_color)
        };
        self.backend.clear_surface(section.resource(), value)?;
        self.registry.mark_dirty(key);
        self.shared.stats.inc_clears();
        debug!(%slot, section = ?key, ?value, "cleared section");
        Ok(())
    }

    /// Mask-driven clear of every bound slot the mask touches.
    ///
    /// Channel and plane masks select slots; a touched slot is cleared whole.
    pub fn clear_surface(&mut self, flags: ClearFlags) -> Result<(), CacheError> {
        if flags.intersects(ClearFlags::COLOR) {
            for index in 0..COLOR_SLOT_COUNT as u8 {
                let slot = SurfaceSlot::Color(index);
                if self.registry.bound(slot).is_some() {
                    self.on_clear(slot)?;
                }
            }
        }
        if flags.intersects(ClearFlags::DEPTH_STENCIL)
            && self.registry.bound(SurfaceSlot::Depth).is_some()
        {
            self.on_clear(SurfaceSlot::Depth)?;
        }
        Ok(())
    }

    /// Bind the draw's surfaces and run the backend's per-draw setup.
    pub fn begin_draw(&mut self, set: &SurfaceSet) -> Result<(), CacheError> {
        self.bind_surfaces(set)?;
        self.backend.begin_draw();
        self.shared.stats.inc_draws();
        Ok(())
    }

    /// Every bound section was rendered to and is now ahead of guest memory.
    pub fn end_draw(&mut self) {
        for slot in SurfaceSlot::ALL {
            if let Some(key) = self.registry.bound(slot) {
                self.registry.mark_dirty(key);
            }
        }
        self.backend.end_draw();
    }

    /// Service the flush requests posted by foreign threads, in posting order. Returns the number
    /// of requests completed.
    pub fn drain_pending(&mut self) -> usize {
        let shared = Arc::clone(&self.shared);
        let (registry, mut storage) = self.split();
        let serviced = shared.queue.drain_with(|request| {
            match registry.flush(request.section(), &mut storage) {
                Ok(_) => Ok(()),
                Err(err) => {
                    if let FlushError::StaleSection { .. } = err {
                        shared.stats.inc_stale_flush_requests();
                    }
                    debug!(
                        address = format_args!("{:#x}", request.address()),
                        %err,
                        "flush request failed"
                    );
                    Err(err)
                }
            }
        });
        if serviced > 0 {
            shared.stats.add_flush_requests_serviced(serviced as u64);
            debug!(serviced, "drained flush requests");
        }
        serviced
    }

    /// Fault raised on the render thread: write the containing section back inline.
    ///
    /// Returns `true` when `address` lies in a live section and its contents are now in guest
    /// memory.
    pub fn on_memory_fault(&mut self, address: u32, is_write: bool) -> bool {
        let Some(key) = self.registry.lookup(address) else {
            return false;
        };
        let (registry, mut storage) = self.split();
        match registry.flush(key, &mut storage) {
            Ok(_) => true,
            Err(err) => {
                warn!(
                    address = format_args!("{:#x}", address),
                    is_write,
                    %err,
                    "inline flush failed"
                );
                false
            }
        }
    }

    /// Write every dirty section back to guest memory.
    pub fn synchronize(&mut self) -> FlushSummary {
        let (registry, mut storage) = self.split();
        let summary = registry.flush_all(&mut storage);
        if summary.written > 0 || summary.failed > 0 {
            debug!(written = summary.written, failed = summary.failed, "synchronized");
        }
        summary
    }

    /// Frame-boundary bulk write of every bound surface.
    pub fn write_buffers(&mut self) -> FlushSummary {
        self.synchronize()
    }

    /// Re-upload guest memory into every bound section that holds no unwritten GPU data.
    /// Returns the number of sections refreshed.
    pub fn read_buffers(&mut self) -> Result<usize, CacheError> {
        let mut keys: Vec<SectionKey> = SurfaceSlot::ALL
            .into_iter()
            .filter_map(|slot| self.registry.bound(slot))
            .collect();
        keys.sort_unstable();
        keys.dedup();

        let mut refreshed = 0;
        for key in keys {
            let Some(section) = self.registry.get(key) else {
                continue;
            };
            if section.is_dirty() {
                continue;
            }
            let texels = read_guest_texels(&*self.memory, section.descriptor())?;
            self.backend.upload_surface(section.resource(), &texels)?;
            refreshed += 1;
        }
        Ok(refreshed)
    }

    /// Synchronize (if configured), then hand over to the backend's present hook.
    pub fn flip(&mut self, buffer: u32) -> FlushSummary {
        let summary = if self.config.synchronize_on_flip {
            self.synchronize()
        } else {
            FlushSummary::default()
        };
        self.backend.flip(buffer);
        self.shared.stats.inc_frames();
        summary
    }

    /// Tightly packed texels of each bound colour slot; unbound slots yield an empty buffer.
    pub fn export_color_surfaces(&mut self) -> Result<[Vec<u8>; COLOR_SLOT_COUNT], CacheError> {
        self.synchronize();
        let mut out: [Vec<u8>; COLOR_SLOT_COUNT] = Default::default();
        for (index, buf) in out.iter_mut().enumerate() {
            let slot = SurfaceSlot::Color(index as u8);
            if let Some(resource) = self.bound_resource(slot) {
                *buf = self.backend.read_back(resource)?;
            }
        }
        Ok(out)
    }

    /// Depth and stencil planes of the depth slot.
    ///
    /// Z24S8 yields 4-byte depth values (24 significant bits) and one stencil byte per texel; Z16
    /// yields 2-byte depth values and no stencil plane.
    pub fn export_depth_stencil(&mut self) -> Result<[Vec<u8>; 2], CacheError> {
        self.synchronize();
        let Some(section) = self.bound_section(SurfaceSlot::Depth) else {
            return Ok(Default::default());
        };
        let format = section.format();
        let resource = section.resource();
        let texels = self.backend.read_back(resource)?;

        match format {
            SurfaceFormat::Depth(DepthFormat::Z24S8) => {
                let texel_count = texels.len() / 4;
                let mut depth = Vec::with_capacity(texel_count * 4);
                let mut stencil = Vec::with_capacity(texel_count);
                for c in texels.chunks_exact(4) {
                    let v = u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
                    depth.extend_from_slice(&(v >> 8).to_le_bytes());
                    stencil.push(v as u8);
                }
                Ok([depth, stencil])
            }
            _ => Ok([texels, Vec::new()]),
        }
    }

    /// Evict every section intersecting `[address, address + length)`, writing dirty ones back
    /// first. Returns the number of sections dropped.
    pub fn invalidate(&mut self, address: u32, length: u32) -> usize {
        let (registry, mut storage) = self.split();
        registry.invalidate(address, length, &mut storage)
    }

    /// Write everything back, release every host resource and fail all present and future flush
    /// requests with [`FlushError::ShutDown`].
    pub fn shutdown(&mut self) -> FlushSummary {
        self.drain_pending();
        let summary = self.synchronize();
        let released = {
            let (registry, mut storage) = self.split();
            registry.evict_all(&mut storage)
        };
        let abandoned = self.shared.queue.close();
        info!(
            written = summary.written,
            failed = summary.failed,
            released,
            abandoned,
            "surface cache shut down"
        );
        summary
    }

    fn bound_resource(&self, slot: SurfaceSlot) -> Option<ResourceId> {
        self.bound_section(slot).map(CachedSection::resource)
    }

    fn split(&mut self) -> (&mut SectionRegistry, Storage<'_, B>) {
        (
            &mut self.registry,
            Storage {
                backend: &mut self.backend,
                memory: &*self.memory,
                config: &self.config,
                stats: &self.shared.stats,
            },
        )
    }
}

impl<B: HostBackend> Drop for SurfaceCache<B> {
    fn drop(&mut self) {
        // Waiters must not outlive the render thread.
        self.shared.queue.close();
    }
}

/// Cloneable handle through which non-render threads resolve memory faults.
#[derive(Clone)]
pub struct FaultHandler {
    shared: Arc<Shared>,
}

impl FaultHandler {
    /// Live section containing `address`, as last published by the render thread.
    pub fn lookup(&self, address: u32) -> Option<SectionKey> {
        self.shared.index.lookup(address)
    }

    /// Post a write-back request for the section containing `address` without waiting.
    pub fn post_flush_request(&self, address: u32) -> Option<Arc<FlushRequest>> {
        let section = self.shared.index.lookup(address)?;
        self.shared.stats.inc_flush_requests_posted();
        Some(self.shared.queue.post(address, section))
    }

    /// Resolve a guest access to `address` from a foreign thread.
    ///
    /// Blocks until the render thread has written the containing section back. Returns `false`
    /// when no section contains `address`, when the write-back failed, or when called on the
    /// render thread itself (which must use [`SurfaceCache::on_memory_fault`]).
    pub fn on_memory_fault(&self, address: u32, is_write: bool) -> bool {
        if self.shared.is_render_thread() {
            warn!(
                address = format_args!("{:#x}", address),
                "fault handler invoked on the render thread"
            );
            return false;
        }
        let Some(request) = self.post_flush_request(address) else {
            return false;
        };
        debug!(
            address = format_args!("{:#x}", address),
            is_write,
            ticket = request.ticket(),
            "waiting for section write-back"
        );
        match request.wait() {
            Ok(()) => true,
            Err(err) => {
                debug!(address = format_args!("{:#x}", address), %err, "fault left unresolved");
                false
            }
        }
    }
}

/// Host-side half of the registry's work, borrowed from the cache.
struct Storage<'a, B: HostBackend> {
    backend: &'a mut B,
    memory: &'a dyn GuestMemory,
    config: &'a SurfaceCacheConfig,
    stats: &'a SurfaceCacheStats,
}

impl<B: HostBackend> SectionStorage for Storage<'_, B> {
    fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    fn supports(&self, format: SurfaceFormat) -> bool {
        self.backend.supports_format(format)
    }

    fn allocate(&mut self, desc: &GuestSurfaceDescriptor) -> Result<ResourceId, CacheError> {
        let id = self.backend.create_surface(
            desc.format,
            u32::from(desc.width),
            u32::from(desc.height),
        )?;
        if self.config.initialize_from_guest_memory {
            match read_guest_texels(self.memory, desc) {
                Ok(texels) => {
                    if let Err(err) = self.backend.upload_surface(id, &texels) {
                        self.backend.destroy_surface(id);
                        return Err(err.into());
                    }
                }
                Err(err) => warn!(
                    address = format_args!("{:#x}", desc.address),
                    %err,
                    "guest memory unreadable; section starts uninitialised"
                ),
            }
        }
        self.stats.inc_sections_created();
        Ok(id)
    }

    fn write_back(&mut self, section: &CachedSection) -> Result<(), FlushError> {
        let result = write_back(self.backend, self.memory, section);
        match &result {
            Ok(()) => self.stats.inc_write_backs(),
            Err(_) => self.stats.inc_write_back_failures(),
        }
        result
    }

    fn release(&mut self, resource: ResourceId) {
        self.backend.destroy_surface(resource);
        self.stats.inc_sections_evicted();
    }
}

/// Gather the surface's rows from guest memory into a tightly packed buffer.
fn read_guest_texels(
    memory: &dyn GuestMemory,
    desc: &GuestSurfaceDescriptor,
) -> Result<Vec<u8>, GuestMemoryError> {
    let row_bytes = desc.row_bytes() as usize;
    let mut texels = vec![0u8; desc.packed_size_bytes()];
    for (row, dst) in texels.chunks_exact_mut(row_bytes).enumerate() {
        memory.read(desc.row_address(row as u16), dst)?;
    }
    Ok(texels)
}

/// Read the section back from the host and scatter its rows into guest memory at `pitch`.
fn write_back<B: HostBackend>(
    backend: &mut B,
    memory: &dyn GuestMemory,
    section: &CachedSection,
) -> Result<(), FlushError> {
    let desc = section.descriptor();
    let texels = backend.read_back(section.resource())?;
    let expected = desc.packed_size_bytes();
    if texels.len() != expected {
        return Err(BackendError::SizeMismatch {
            expected,
            actual: texels.len(),
        }
        .into());
    }
    for (row, src) in texels.chunks_exact(desc.row_bytes() as usize).enumerate() {
        memory.write(desc.row_address(row as u16), src)?;
    }
    debug!(
        address = format_args!("{:#x}", desc.address),
        bytes = texels.len(),
        "wrote section back"
    );
    Ok(())
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::backend::{BackendOp, SoftwareBackend};
    use crate::format::ColorFormat;
    use crate::guest_memory::VecGuestMemory;
    use pretty_assertions::assert_eq;

    fn cache(mem_size: usize) -> (SurfaceCache<SoftwareBackend>, Arc<VecGuestMemory>) {
        let memory = Arc::new(VecGuestMemory::new(mem_size));
        let cache = SurfaceCache::new(
            SoftwareBackend::with_op_log(),
            memory.clone(),
            SurfaceCacheConfig::default(),
        );
        (cache, memory)
    }

    fn b8(address: u32, size: u16) -> GuestSurfaceDescriptor {
        GuestSurfaceDescriptor::color(address, u32::from(size), ColorFormat::B8, size, size)
    }

    #[test]
    fn new_sections_start_with_guest_contents() {
        let (mut cache, memory) = cache(0x2000);
        memory.fill(0x1000, 0x10, 0x5A).unwrap();
        cache
            .bind_surface(SurfaceSlot::Color(0), Some(b8(0x1000, 4)))
            .unwrap();
        let resource = cache
            .bound_section(SurfaceSlot::Color(0))
            .unwrap()
            .resource();
        assert_eq!(cache.backend().texels(resource), Some(&[0x5Au8; 16][..]));
        assert!(!cache.bound_section(SurfaceSlot::Color(0)).unwrap().is_dirty());
    }

    #[test]
    fn write_back_honours_pitch() {
        let (mut cache, memory) = cache(0x2000);
        memory.fill(0x1000, 0x40, 0xEE).unwrap();
        let desc = GuestSurfaceDescriptor::color(0x1000, 0x10, ColorFormat::B8, 4, 4);
        cache.bind_surface(SurfaceSlot::Color(0), Some(desc)).unwrap();
        cache.set_clear_color(0x0000_0077);
        cache.on_clear(SurfaceSlot::Color(0)).unwrap();
        assert_eq!(cache.synchronize().written, 1);

        for row in 0..4u64 {
            let base = 0x1000 + row * 0x10;
            assert_eq!(memory.read_u32(base), Ok(0x7777_7777));
            // Padding between rows is left alone.
            assert_eq!(memory.read_u8(base + 4), Ok(0xEE));
        }
    }

    #[test]
    fn clear_flags_select_slots() {
        let (mut cache, _memory) = cache(0x10000);
        let depth = GuestSurfaceDescriptor::depth(0x8000, 16, DepthFormat::Z24S8, 4, 4);
        let set = SurfaceSet::new()
            .with_color(0, b8(0x1000, 4))
            .with_color(2, b8(0x2000, 4))
            .with_depth(depth);
        cache.bind_surfaces(&set).unwrap();

        cache.clear_surface(ClearFlags::COLOR_G).unwrap();
        assert_eq!(cache.stats().snapshot().clears, 2);
        assert!(!cache.bound_section(SurfaceSlot::Depth).unwrap().is_dirty());

        cache.clear_surface(ClearFlags::STENCIL).unwrap();
        assert_eq!(cache.stats().snapshot().clears, 3);
        assert!(cache.bound_section(SurfaceSlot::Depth).unwrap().is_dirty());
    }

    #[test]
    fn clearing_an_unbound_slot_is_a_no_op() {
        let (mut cache, _memory) = cache(0x1000);
        cache.on_clear(SurfaceSlot::Color(3)).unwrap();
        assert_eq!(cache.stats().snapshot().clears, 0);
        assert!(cache.backend().ops().is_empty());
    }

    #[test]
    fn end_draw_marks_bound_sections_dirty() {
        let (mut cache, _memory) = cache(0x4000);
        let set = SurfaceSet::new().with_color(1, b8(0x1000, 8));
        cache.begin_draw(&set).unwrap();
        cache.end_draw();
        assert!(cache.bound_section(SurfaceSlot::Color(1)).unwrap().is_dirty());
        assert_eq!(cache.stats().snapshot().draws, 1);
        let ops = cache.backend().ops();
        assert_eq!(&ops[ops.len() - 2..], &[BackendOp::BeginDraw, BackendOp::EndDraw]);
    }

    #[test]
    fn flip_synchronizes_then_presents() {
        let (mut cache, _memory) = cache(0x4000);
        cache
            .bind_surface(SurfaceSlot::Color(0), Some(b8(0x1000, 8)))
            .unwrap();
        cache.end_draw();
        cache.backend_mut().clear_ops();

        let summary = cache.flip(1);
        assert_eq!(summary.written, 1);
        let ops = cache.backend().ops();
        assert!(matches!(ops[0], BackendOp::ReadBack(_)));
        assert_eq!(ops.last(), Some(&BackendOp::Flip(1)));
        assert_eq!(cache.stats().snapshot().frames, 1);
    }

    #[test]
    fn read_buffers_skips_dirty_sections() {
        let (mut cache, memory) = cache(0x4000);
        let set = SurfaceSet::new()
            .with_color(0, b8(0x1000, 4))
            .with_color(1, b8(0x2000, 4));
        cache.bind_surfaces(&set).unwrap();
        cache.on_clear(SurfaceSlot::Color(1)).unwrap();

        memory.fill(0x1000, 0x10, 0x33).unwrap();
        assert_eq!(cache.read_buffers().unwrap(), 1);
        let resource = cache
            .bound_section(SurfaceSlot::Color(0))
            .unwrap()
            .resource();
        assert_eq!(cache.backend().texels(resource), Some(&[0x33u8; 16][..]));
    }

    #[test]
    fn export_splits_depth_and_stencil() {
        let (mut cache, _memory) = cache(0x4000);
        let depth = GuestSurfaceDescriptor::depth(0x1000, 8, DepthFormat::Z24S8, 2, 1);
        cache
            .bind_surface(SurfaceSlot::Depth, Some(depth))
            .unwrap();
        cache.set_clear_depth_stencil(0xABCD_EF12);
        cache.on_clear(SurfaceSlot::Depth).unwrap();

        let [depth, stencil] = cache.export_depth_stencil().unwrap();
        assert_eq!(depth, [0xEFu8, 0xCD, 0xAB, 0x00].repeat(2));
        assert_eq!(stencil, vec![0x12u8, 0x12]);

        let colors = cache.export_color_surfaces().unwrap();
        assert!(colors.iter().all(Vec::is_empty));
    }

    #[test]
    fn render_thread_fault_flushes_inline() {
        let (mut cache, memory) = cache(0x4000);
        cache
            .bind_surface(SurfaceSlot::Color(0), Some(b8(0x1000, 4)))
            .unwrap();
        cache.set_clear_color(0x0000_0042);
        cache.on_clear(SurfaceSlot::Color(0)).unwrap();

        assert!(!cache.fault_handler().on_memory_fault(0x1000, false));
        assert!(cache.on_memory_fault(0x1005, true));
        assert_eq!(memory.read_u8(0x1005), Ok(0x42));
        assert!(!cache.on_memory_fault(0x1010, false));
    }

    #[test]
    fn unreadable_guest_memory_leaves_section_uninitialised() {
        let memory = Arc::new(VecGuestMemory::new(0x100));
        let mut cache = SurfaceCache::new(
            SoftwareBackend::with_op_log(),
            memory,
            SurfaceCacheConfig::default(),
        );
        cache
            .bind_surface(SurfaceSlot::Color(0), Some(b8(0x1000, 4)))
            .unwrap();
        assert_eq!(cache.backend().live_surfaces(), 1);
        assert!(!cache
            .backend()
            .ops()
            .iter()
            .any(|op| matches!(op, BackendOp::Upload(_))));
    }

    #[test]
    fn shutdown_releases_everything() {
        let (mut cache, memory) = cache(0x4000);
        cache
            .bind_surface(SurfaceSlot::Color(0), Some(b8(0x1000, 4)))
            .unwrap();
        cache.set_clear_color(0x0000_0009);
        cache.on_clear(SurfaceSlot::Color(0)).unwrap();

        let summary = cache.shutdown();
        assert_eq!(summary.written, 1);
        assert_eq!(memory.read_u8(0x1000), Ok(9));
        assert_eq!(cache.backend().live_surfaces(), 0);
        assert!(cache.registry().is_empty());
    }
}
