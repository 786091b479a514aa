use crate::error::Result;
use crate::frame::FrameData;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// A per-frame image transform inserted between capture and the consumers.
///
/// Implementations must be cheap to call from the delivery task; heavy GPU
/// work belongs inside `process` behind whatever submission mechanism the
/// filter uses.
pub trait FrameFilter: Send + Sync {
    fn name(&self) -> &str;

    /// Transform one frame. The input buffer is shared; produce a new frame
    /// rather than mutating in place.
    fn process(&self, frame: &FrameData) -> Result<FrameData>;
}

/// Single-slot holder for the active filter.
///
/// Replacement is the only mutation. Every installation bumps a generation
/// counter; the delivery task takes one `snapshot()` per frame, so each frame
/// is processed entirely by one generation and both consumers observe the
/// same generation sequence. The old filter's `Arc` is dropped here on
/// replacement and freed once the last in-flight frame holding a clone
/// completes.
pub struct FilterSlot {
    inner: RwLock<SlotState>,
}

struct SlotState {
    filter: Option<Arc<dyn FrameFilter>>,
    generation: u64,
}

impl FilterSlot {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(SlotState {
                filter: None,
                generation: 0,
            }),
        }
    }

    /// Install a filter (or clear the slot with `None`). Returns the new
    /// generation; the swap is atomic with respect to `snapshot()`.
    pub fn install(&self, filter: Option<Arc<dyn FrameFilter>>) -> u64 {
        let mut state = self.inner.write();
        state.generation += 1;
        match &filter {
            Some(f) => debug!("Filter '{}' installed (generation {})", f.name(), state.generation),
            None => debug!("Filter slot cleared (generation {})", state.generation),
        }
        state.filter = filter;
        state.generation
    }

    /// Atomic view of the current filter and its generation. Held only for
    /// the duration of one frame's processing.
    pub fn snapshot(&self) -> (Option<Arc<dyn FrameFilter>>, u64) {
        let state = self.inner.read();
        (state.filter.clone(), state.generation)
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    pub fn is_installed(&self) -> bool {
        self.inner.read().filter.is_some()
    }
}

impl Default for FilterSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity filter, useful as a placeholder in demos and tests.
pub struct PassthroughFilter;

impl FrameFilter for PassthroughFilter {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn process(&self, frame: &FrameData) -> Result<FrameData> {
        Ok(frame.clone())
    }
}

/// Inverts every payload byte. A stand-in for a real GPU stage that makes
/// filtered output distinguishable in tests.
pub struct InvertFilter;

impl FrameFilter for InvertFilter {
    fn name(&self) -> &str {
        "invert"
    }

    fn process(&self, frame: &FrameData) -> Result<FrameData> {
        let data: Vec<u8> = frame.data.iter().map(|b| !b).collect();
        Ok(FrameData {
            data: Arc::new(data),
            ..frame.clone()
        })
    }
}
