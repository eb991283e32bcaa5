//! Address-indexed table of GPU-resident surfaces.
//!
//! Every live [`CachedSection`] covers a half-open guest range and no two live ranges overlap.
//! Sections are stored in a slot map, so a [`SectionKey`] carries a generation: a key kept past
//! its section's eviction (a stale slot binding, a queued flush request) simply stops resolving
//! instead of aliasing whatever section reuses the slot.
//!
//! The registry itself is only touched by the render thread. Faulting threads see a read-only
//! mirror of the live ranges through [`SectionIndex`].

use std::collections::BTreeMap;

use slotmap::SlotMap;
use tracing::{debug, warn};

use crate::backend::{BackendKind, ResourceId};
use crate::descriptor::{GuestRange, GuestSurfaceDescriptor, SurfaceSlot, SURFACE_SLOT_COUNT};
use crate::error::{CacheError, FlushError};
use crate::format::SurfaceFormat;
use crate::sync::{self, Arc, RwLock};

slotmap::new_key_type! {
    /// Generation-tagged handle of a cached section.
    pub struct SectionKey;
}

/// One GPU-resident surface and the guest range it mirrors.
#[derive(Debug)]
pub struct CachedSection {
    descriptor: GuestSurfaceDescriptor,
    range: GuestRange,
    resource: ResourceId,
    dirty: bool,
}

impl CachedSection {
    pub fn descriptor(&self) -> &GuestSurfaceDescriptor {
        &self.descriptor
    }

    pub fn address(&self) -> u32 {
        self.descriptor.address
    }

    pub fn range(&self) -> GuestRange {
        self.range
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn format(&self) -> SurfaceFormat {
        self.descriptor.format
    }

    /// The GPU copy holds data that has not been written back to guest memory.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindOutcome {
    /// Degenerate or absent descriptor; the slot has no section.
    Unbound,
    /// Same descriptor as the previous bind of this slot; nothing was touched.
    Unchanged(SectionKey),
    /// A live section with an identical descriptor was attached to the slot.
    Reused(SectionKey),
    /// A new section was created after evicting `evicted` overlapping sections.
    Created { key: SectionKey, evicted: usize },
}

impl BindOutcome {
    pub fn key(&self) -> Option<SectionKey> {
        match *self {
            BindOutcome::Unbound => None,
            BindOutcome::Unchanged(key) | BindOutcome::Reused(key) => Some(key),
            BindOutcome::Created { key, .. } => Some(key),
        }
    }
}

/// Result of a bulk write-back pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub written: usize,
    pub failed: usize,
}

/// Host-side operations the registry needs while creating and evicting sections.
pub(crate) trait SectionStorage {
    fn backend_kind(&self) -> BackendKind;
    fn supports(&self, format: SurfaceFormat) -> bool;
    fn allocate(&mut self, desc: &GuestSurfaceDescriptor) -> Result<ResourceId, CacheError>;
    /// Copy the section's GPU contents into guest memory.
    fn write_back(&mut self, section: &CachedSection) -> Result<(), FlushError>;
    fn release(&mut self, resource: ResourceId);
}

/// Read-only mirror of the live section ranges, shared with faulting threads.
#[derive(Debug)]
pub struct SectionIndex {
    ranges: RwLock<BTreeMap<u32, (u64, SectionKey)>>,
}

impl SectionIndex {
    pub fn new() -> Self {
        Self {
            ranges: RwLock::new(BTreeMap::new()),
        }
    }

    /// Key of the section whose range contains `address`, if any.
    pub fn lookup(&self, address: u32) -> Option<SectionKey> {
        let ranges = sync::read(&self.ranges);
        let (_, &(end, key)) = ranges.range(..=address).next_back()?;
        (u64::from(address) < end).then_some(key)
    }

    pub fn len(&self) -> usize {
        sync::read(&self.ranges).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, range: GuestRange, key: SectionKey) {
        sync::write(&self.ranges).insert(range.start, (range.end, key));
    }

    fn retract(&self, start: u32) {
        sync::write(&self.ranges).remove(&start);
    }
}

impl Default for SectionIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct SlotBinding {
    descriptor: Option<GuestSurfaceDescriptor>,
    section: Option<SectionKey>,
}

pub struct SectionRegistry {
    sections: SlotMap<SectionKey, CachedSection>,
    by_start: BTreeMap<u32, SectionKey>,
    slots: [SlotBinding; SURFACE_SLOT_COUNT],
    index: Arc<SectionIndex>,
}

impl SectionRegistry {
    pub(crate) fn new(index: Arc<SectionIndex>) -> Self {
        Self {
            sections: SlotMap::with_key(),
            by_start: BTreeMap::new(),
            slots: [SlotBinding::default(); SURFACE_SLOT_COUNT],
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn get(&self, key: SectionKey) -> Option<&CachedSection> {
        self.sections.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SectionKey, &CachedSection)> + '_ {
        self.sections.iter()
    }

    pub fn dirty_count(&self) -> usize {
        self.sections.values().filter(|s| s.dirty).count()
    }

    /// Key of the section whose range contains `address`. No side effects.
    pub fn lookup(&self, address: u32) -> Option<SectionKey> {
        let (_, &key) = self.by_start.range(..=address).next_back()?;
        self.sections
            .get(key)
            .filter(|s| s.range.contains(address))
            .map(|_| key)
    }

    /// Live section currently attached to `slot`.
    pub fn bound(&self, slot: SurfaceSlot) -> Option<SectionKey> {
        let key = self.slots.get(slot.index()?)?.section?;
        self.sections.contains_key(key).then_some(key)
    }

    pub fn bound_descriptor(&self, slot: SurfaceSlot) -> Option<GuestSurfaceDescriptor> {
        self.slots.get(slot.index()?)?.descriptor
    }

    /// Record that the GPU copy of `key` moved ahead of guest memory.
    pub fn mark_dirty(&mut self, key: SectionKey) -> bool {
        match self.sections.get_mut(key) {
            Some(section) => {
                section.dirty = true;
                true
            }
            None => false,
        }
    }

    pub(crate) fn bind<S: SectionStorage>(
        &mut self,
        slot: SurfaceSlot,
        desc: Option<GuestSurfaceDescriptor>,
        storage: &mut S,
    ) -> Result<BindOutcome, CacheError> {
        let idx = slot.index().ok_or(CacheError::InvalidDescriptor {
            slot,
            reason: "colour slot index out of range",
        })?;

        let desc = match desc {
            Some(desc) if !desc.is_degenerate() => desc,
            _ => {
                self.slots[idx] = SlotBinding::default();
                return Ok(BindOutcome::Unbound);
            }
        };

        let prev = self.slots[idx];
        if prev.descriptor == Some(desc) {
            let live = prev
                .section
                .filter(|&key| self.sections.get(key).is_some_and(|s| s.descriptor == desc));
            if let Some(key) = live {
                return Ok(BindOutcome::Unchanged(key));
            }
        }

        // The slot stays unbound unless a section ends up attached below.
        self.slots[idx] = SlotBinding::default();

        if slot.is_depth() != desc.is_depth() {
            return Err(CacheError::InvalidDescriptor {
                slot,
                reason: "surface kind does not match the slot",
            });
        }
        let range = desc
            .validate()
            .map_err(|reason| CacheError::InvalidDescriptor { slot, reason })?;
        if !storage.supports(desc.format) {
            return Err(CacheError::UnsupportedFormat {
                slot,
                format: desc.format,
                backend: storage.backend_kind(),
            });
        }

        if let Some(key) = self.exact_match(&desc) {
            self.slots[idx] = SlotBinding {
                descriptor: Some(desc),
                section: Some(key),
            };
            return Ok(BindOutcome::Reused(key));
        }

        let victims = self.overlapping(range);
        for &victim in &victims {
            debug!(
                %slot,
                new_range = %range,
                victim = ?victim,
                "evicting overlapping section"
            );
            self.evict(victim, storage);
        }

        let resource = storage.allocate(&desc)?;
        let key = self.insert(desc, range, resource);
        self.slots[idx] = SlotBinding {
            descriptor: Some(desc),
            section: Some(key),
        };
        Ok(BindOutcome::Created {
            key,
            evicted: victims.len(),
        })
    }

    /// Write `key` back if it is dirty. Returns whether a write-back happened.
    pub(crate) fn flush<S: SectionStorage>(
        &mut self,
        key: SectionKey,
        storage: &mut S,
    ) -> Result<bool, FlushError> {
        let section = self
            .sections
            .get_mut(key)
            .ok_or(FlushError::StaleSection { section: key })?;
        if !section.dirty {
            return Ok(false);
        }
        storage.write_back(section)?;
        section.dirty = false;
        Ok(true)
    }

    pub(crate) fn flush_all<S: SectionStorage>(&mut self, storage: &mut S) -> FlushSummary {
        let dirty: Vec<SectionKey> = self
            .sections
            .iter()
            .filter(|(_, s)| s.dirty)
            .map(|(key, _)| key)
            .collect();

        let mut summary = FlushSummary::default();
        for key in dirty {
            match self.flush(key, storage) {
                Ok(true) => summary.written += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(section = ?key, %err, "write-back failed during synchronize");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Evict every section intersecting `[address, address + length)`.
    pub(crate) fn invalidate<S: SectionStorage>(
        &mut self,
        address: u32,
        length: u32,
        storage: &mut S,
    ) -> usize {
        let range = GuestRange::new(address, u64::from(length));
        if range.is_empty() {
            return 0;
        }
        let victims = self.overlapping(range);
        victims
            .into_iter()
            .filter(|&key| self.evict(key, storage))
            .count()
    }

    /// Flush (if dirty) then drop `key`. A failed write-back is logged and the section is dropped
    /// anyway.
    pub(crate) fn evict<S: SectionStorage>(&mut self, key: SectionKey, storage: &mut S) -> bool {
        let Some(section) = self.sections.get(key) else {
            return false;
        };
        if section.dirty {
            if let Err(err) = storage.write_back(section) {
                warn!(
                    address = format_args!("{:#x}", section.address()),
                    %err,
                    "write-back failed while evicting section; guest memory may be stale"
                );
            }
        }
        let Some(section) = self.remove(key) else {
            return false;
        };
        storage.release(section.resource);
        true
    }

    /// Evict every section.
    pub(crate) fn evict_all<S: SectionStorage>(&mut self, storage: &mut S) -> usize {
        let keys: Vec<SectionKey> = self.sections.keys().collect();
        keys.into_iter()
            .filter(|&key| self.evict(key, storage))
            .count()
    }

    fn exact_match(&self, desc: &GuestSurfaceDescriptor) -> Option<SectionKey> {
        let key = *self.by_start.get(&desc.address)?;
        let section = self.sections.get(key)?;
        (section.descriptor == *desc).then_some(key)
    }

    fn overlapping(&self, range: GuestRange) -> Vec<SectionKey> {
        let mut out = Vec::new();
        // At most one section starting below `range.start` can reach into it.
        if let Some((_, &key)) = self.by_start.range(..range.start).next_back() {
            if self
                .sections
                .get(key)
                .is_some_and(|s| s.range.overlaps(&range))
            {
                out.push(key);
            }
        }
        for (&start, &key) in self.by_start.range(range.start..) {
            if u64::from(start) >= range.end {
                break;
            }
            out.push(key);
        }
        out
    }

    fn insert(
        &mut self,
        descriptor: GuestSurfaceDescriptor,
        range: GuestRange,
        resource: ResourceId,
    ) -> SectionKey {
        debug_assert!(self.overlapping(range).is_empty());
        let key = self.sections.insert(CachedSection {
            descriptor,
            range,
            resource,
            dirty: false,
        });
        self.by_start.insert(range.start, key);
        self.index.publish(range, key);
        key
    }

    fn remove(&mut self, key: SectionKey) -> Option<CachedSection> {
        let section = self.sections.remove(key)?;
        self.by_start.remove(&section.range.start);
        self.index.retract(section.range.start);
        Some(section)
    }
}
