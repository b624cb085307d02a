//! Render graph configuration.

/// Configuration for building and compiling render graphs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderGraphConfig {
    /// Let transients with disjoint lifetimes share memory.
    /// When disabled every transient gets its own range.
    pub aliasing: bool,
    /// Re-check the packed layout after aliasing
    pub validate_layout: bool,
    /// Lower bound applied to every transient's alignment
    pub min_alignment: u64,
    /// Wrap each pass in a debug group named after the pass
    pub debug_labels: bool,
    /// Number of frame slots used by `FramesInFlight::from_config`
    pub frames_in_flight: usize,
}

impl Default for RenderGraphConfig {
    fn default() -> Self {
        Self {
            aliasing: true,
            validate_layout: cfg!(debug_assertions),
            min_alignment: 1,
            debug_labels: true,
            frames_in_flight: 2,
        }
    }
}

impl RenderGraphConfig {
    pub fn with_aliasing(mut self, aliasing: bool) -> Self {
        self.aliasing = aliasing;
        self
    }

    pub fn with_layout_validation(mut self, validate: bool) -> Self {
        self.validate_layout = validate;
        self
    }

    pub fn with_min_alignment(mut self, alignment: u64) -> Self {
        self.min_alignment = alignment.max(1);
        self
    }

    pub fn with_debug_labels(mut self, debug_labels: bool) -> Self {
        self.debug_labels = debug_labels;
        self
    }

    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }
}
