pub mod auth;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod filter;
pub mod frame;
pub mod pipeline;
pub mod preview;
pub mod session;
pub mod streamer;

pub use auth::{AuthorizationProvider, AuthorizationStatus, FixedAuthorization};
pub use config::{
    CameraPosition, CaptureConfiguration, ConfigStore, InterfaceOrientation, StreamKitConfig,
    TorchMode, VideoOrientation, VideoResolution,
};
pub use device::{CameraDevice, CameraProfile, DeviceEvent, DeviceProvider, SimulatedProvider};
pub use error::{ConfigError, DeviceError, Result, SessionError, StreamKitError};
pub use events::{EventBus, StreamKitEvent};
pub use filter::{FilterSlot, FrameFilter, InvertFilter, PassthroughFilter};
pub use frame::{FrameData, FrameFormat, ProcessedFrame};
pub use pipeline::FramePipeline;
pub use preview::{NullPreviewSink, PreviewSink, RecordingPreviewSink};
pub use session::{CaptureState, StreamKit};
pub use streamer::{RecordingStreamer, Streamer, StreamerState};
