use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Raw pixel format a capture device emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// YUV 4:2:0 semi-planar, 1.5 bytes per pixel
    Nv12,
    /// BGRA, 4 bytes per pixel
    Bgra,
    /// RGBA, 4 bytes per pixel
    Rgba,
}

impl FrameFormat {
    /// Buffer size in bytes for a frame of the given dimensions.
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            FrameFormat::Nv12 => pixels * 3 / 2,
            FrameFormat::Bgra | FrameFormat::Rgba => pixels * 4,
        }
    }
}

/// A captured frame and its metadata.
///
/// The payload is `Arc`-shared: the delivery path, preview sink and streamer
/// all hold the same buffer without copies.
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Monotonic sequence number within one acquired device
    pub sequence: u64,
    /// Capture timestamp
    pub timestamp: SystemTime,
    /// Raw frame payload
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel format
    pub format: FrameFormat,
    /// Which acquired device produced this frame; used by the delivery task
    /// to arbitrate frames around a camera switch
    pub source_generation: u64,
}

impl FrameData {
    pub fn new(
        sequence: u64,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
        source_generation: u64,
    ) -> Self {
        Self {
            sequence,
            timestamp: SystemTime::now(),
            data: Arc::new(data),
            width,
            height,
            format,
            source_generation,
        }
    }

    /// Validate payload size against the format's expected size.
    pub fn validate_size(&self) -> bool {
        self.data.len() == self.format.buffer_size(self.width, self.height)
    }

    /// Frame age in milliseconds.
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A frame after the filter slot, tagged with the filter generation that
/// produced it. Generation 0 means no filter was installed (passthrough).
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub frame: FrameData,
    pub filter_generation: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_size() {
        assert_eq!(FrameFormat::Nv12.buffer_size(640, 360), 345_600);
        assert_eq!(FrameFormat::Bgra.buffer_size(2, 2), 16);
    }

    #[test]
    fn test_validate_size() {
        let frame = FrameData::new(0, vec![0u8; 345_600], 640, 360, FrameFormat::Nv12, 1);
        assert!(frame.validate_size());

        let bad = FrameData::new(0, vec![0u8; 100], 640, 360, FrameFormat::Nv12, 1);
        assert!(!bad.validate_size());
    }
}
