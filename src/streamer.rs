use crate::error::Result;
use crate::frame::ProcessedFrame;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Connectivity state the streamer collaborator reports about itself.
///
/// This is the collaborator's own report, relayed for display; the capture
/// core never owns or drives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamerState {
    Idle,
    Connecting,
    Streaming,
    Error,
}

/// External encode-and-push collaborator.
///
/// Consumes the processed frame stream while streaming is active. Encoding,
/// muxing, bitrate adaptation and reconnect logic all live behind this
/// boundary; the session only sequences `start_streaming`/`stop_streaming`
/// around its own Previewing <-> Streaming transitions and guarantees the
/// frame source handed over is never stale across a camera switch or filter
/// swap.
pub trait Streamer: Send + Sync {
    fn start_streaming(&self) -> Result<()>;

    fn stop_streaming(&self) -> Result<()>;

    /// Called from the delivery task for every frame while streaming.
    /// Must not block; drop or queue internally under backpressure.
    fn push_frame(&self, frame: &ProcessedFrame);

    fn state(&self) -> StreamerState;
}

/// Streamer double that records pushed frames, for tests and demo runs.
pub struct RecordingStreamer {
    state: Mutex<StreamerState>,
    frames: Mutex<Vec<ProcessedFrame>>,
}

impl RecordingStreamer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(StreamerState::Idle),
            frames: Mutex::new(Vec::new()),
        })
    }

    pub fn pushed(&self) -> Vec<ProcessedFrame> {
        self.frames.lock().clone()
    }

    pub fn pushed_count(&self) -> usize {
        self.frames.lock().len()
    }
}

impl Streamer for RecordingStreamer {
    fn start_streaming(&self) -> Result<()> {
        *self.state.lock() = StreamerState::Streaming;
        Ok(())
    }

    fn stop_streaming(&self) -> Result<()> {
        *self.state.lock() = StreamerState::Idle;
        Ok(())
    }

    fn push_frame(&self, frame: &ProcessedFrame) {
        self.frames.lock().push(frame.clone());
    }

    fn state(&self) -> StreamerState {
        *self.state.lock()
    }
}
