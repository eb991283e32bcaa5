use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the surface cache.
///
/// Updated on the render thread (and by faulting threads when they post requests); safe to read
/// from any thread.
#[derive(Debug, Default)]
pub struct SurfaceCacheStats {
    sections_created: AtomicU64,
    sections_evicted: AtomicU64,
    bind_hits: AtomicU64,
    bind_misses: AtomicU64,
    write_backs: AtomicU64,
    write_back_failures: AtomicU64,
    flush_requests_posted: AtomicU64,
    flush_requests_serviced: AtomicU64,
    stale_flush_requests: AtomicU64,
    clears: AtomicU64,
    draws: AtomicU64,
    frames: AtomicU64,
}

impl SurfaceCacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_sections_created(&self) {
        self.sections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sections_evicted(&self) {
        self.sections_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_bind_hits(&self) {
        self.bind_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_bind_misses(&self) {
        self.bind_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_write_backs(&self) {
        self.write_backs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_write_back_failures(&self) {
        self.write_back_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_flush_requests_posted(&self) {
        self.flush_requests_posted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_flush_requests_serviced(&self, n: u64) {
        self.flush_requests_serviced.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_stale_flush_requests(&self) {
        self.stale_flush_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_clears(&self) {
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_draws(&self) {
        self.draws.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_frames(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SurfaceCacheStatsSnapshot {
        SurfaceCacheStatsSnapshot {
            sections_created: self.sections_created.load(Ordering::Relaxed),
            sections_evicted: self.sections_evicted.load(Ordering::Relaxed),
            bind_hits: self.bind_hits.load(Ordering::Relaxed),
            bind_misses: self.bind_misses.load(Ordering::Relaxed),
            write_backs: self.write_backs.load(Ordering::Relaxed),
            write_back_failures: self.write_back_failures.load(Ordering::Relaxed),
            flush_requests_posted: self.flush_requests_posted.load(Ordering::Relaxed),
            flush_requests_serviced: self.flush_requests_serviced.load(Ordering::Relaxed),
            stale_flush_requests: self.stale_flush_requests.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
            draws: self.draws.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
        }
    }

    /// Returns a JSON object as a string.
    pub fn to_json(&self) -> String {
        self.snapshot().to_json()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SurfaceCacheStatsSnapshot {
    pub sections_created: u64,
    pub sections_evicted: u64,
    pub bind_hits: u64,
    pub bind_misses: u64,
    pub write_backs: u64,
    pub write_back_failures: u64,
    pub flush_requests_posted: u64,
    pub flush_requests_serviced: u64,
    pub stale_flush_requests: u64,
    pub clears: u64,
    pub draws: u64,
    pub frames: u64,
}

impl SurfaceCacheStatsSnapshot {
    pub fn to_json(self) -> String {
        // Hand-built to keep the render thread free of serializer allocations.
        format!(
            "{{\"sections_created\":{},\"sections_evicted\":{},\"bind_hits\":{},\"bind_misses\":{},\"write_backs\":{},\"write_back_failures\":{},\"flush_requests\":{{\"posted\":{},\"serviced\":{},\"stale\":{}}},\"clears\":{},\"draws\":{},\"frames\":{}}}",
            self.sections_created,
            self.sections_evicted,
            self.bind_hits,
            self.bind_misses,
            self.write_backs,
            self.write_back_failures,
            self.flush_requests_posted,
            self.flush_requests_serviced,
            self.stale_flush_requests,
            self.clears,
            self.draws,
            self.frames,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_json_contains_counters() {
        let stats = SurfaceCacheStats::new();
        stats.inc_sections_created();
        stats.inc_write_backs();
        stats.inc_write_backs();
        stats.inc_flush_requests_posted();
        stats.add_flush_requests_serviced(1);
        let json = stats.to_json();
        assert!(json.contains("\"sections_created\":1"));
        assert!(json.contains("\"write_backs\":2"));
        assert!(json.contains("\"flush_requests\":{\"posted\":1,\"serviced\":1,\"stale\":0}"));
    }
}
