#[derive(Clone, Debug)]
pub struct SurfaceCacheConfig {
    /// Upload the guest memory a new section covers when it is created, so the section starts in
    /// sync with system memory. When disabled, new sections start with undefined contents and
    /// are only written back once the GPU has drawn or cleared into them.
    pub initialize_from_guest_memory: bool,
    /// Write every dirty section back before the backend's flip hook runs.
    pub synchronize_on_flip: bool,
    /// Trace binds whose descriptor did not change.
    pub verbose: bool,
}

impl Default for SurfaceCacheConfig {
    fn default() -> Self {
        Self {
            initialize_from_guest_memory: true,
            synchronize_on_flip: true,
            verbose: false,
        }
    }
}

impl SurfaceCacheConfig {
    pub fn initialize_from_guest_memory(mut self, enabled: bool) -> Self {
        self.initialize_from_guest_memory = enabled;
        self
    }

    pub fn synchronize_on_flip(mut self, enabled: bool) -> Self {
        self.synchronize_on_flip = enabled;
        self
    }

    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }
}
