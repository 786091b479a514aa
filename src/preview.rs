use crate::frame::ProcessedFrame;
use parking_lot::Mutex;
use std::sync::Arc;

/// Render target the session binds frames to while previewing.
///
/// The render backend itself lives outside this crate; implementations
/// receive processed frames in capture order and must return quickly, the
/// delivery task calls them inline.
pub trait PreviewSink: Send + Sync {
    fn render(&self, frame: &ProcessedFrame);
}

/// Sink that discards frames, for headless runs.
pub struct NullPreviewSink;

impl PreviewSink for NullPreviewSink {
    fn render(&self, _frame: &ProcessedFrame) {}
}

/// Sink that records what it was asked to render, for tests.
pub struct RecordingPreviewSink {
    frames: Mutex<Vec<ProcessedFrame>>,
}

impl RecordingPreviewSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
        })
    }

    pub fn rendered(&self) -> Vec<ProcessedFrame> {
        self.frames.lock().clone()
    }

    pub fn rendered_count(&self) -> usize {
        self.frames.lock().len()
    }
}

impl PreviewSink for RecordingPreviewSink {
    fn render(&self, frame: &ProcessedFrame) {
        self.frames.lock().push(frame.clone());
    }
}
