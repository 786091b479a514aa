use crate::error::ConfigError;
use config::{Config, Environment, File};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// User-defined resolution bounds, in the width >= height orientation.
pub const MIN_WIDTH: u32 = 160;
pub const MAX_WIDTH: u32 = 1280;
pub const MIN_HEIGHT: u32 = 90;
pub const MAX_HEIGHT: u32 = 720;

/// Valid frame rate range in frames per second.
pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 30;

/// Capture resolution: a fixed preset or a user-defined pair.
///
/// User-defined pairs are stored normalized: the larger value is always the
/// width (whether the output is portrait is decided by [`VideoOrientation`]),
/// and both dimensions are rounded up to a multiple of 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoResolution {
    /// 640x360 (16:9)
    Preset360p,
    /// 640x480 (4:3)
    Preset480p,
    /// 960x540 (16:9)
    Preset540p,
    /// 1280x720 (16:9)
    Preset720p,
    /// User-defined width x height, normalized on entry
    UserDefined { width: u32, height: u32 },
}

impl VideoResolution {
    /// Stored pixel dimensions (width >= height).
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            VideoResolution::Preset360p => (640, 360),
            VideoResolution::Preset480p => (640, 480),
            VideoResolution::Preset540p => (960, 540),
            VideoResolution::Preset720p => (1280, 720),
            VideoResolution::UserDefined { width, height } => (*width, *height),
        }
    }

    /// Normalize and validate a user-defined pair.
    ///
    /// The larger value becomes the width, the pair is range-checked strictly
    /// (out-of-range input is rejected, never clamped), then both dimensions
    /// are rounded up to the next multiple of 4. The bounds themselves are
    /// round-up safe: 1280 and 720 are already multiples of 4.
    pub fn user_defined(width: u32, height: u32) -> Result<Self, ConfigError> {
        let (w, h) = if width >= height {
            (width, height)
        } else {
            (height, width)
        };

        if !(MIN_WIDTH..=MAX_WIDTH).contains(&w) {
            return Err(ConfigError::Validation {
                field: "resolution",
                details: format!("width {} outside [{}, {}]", w, MIN_WIDTH, MAX_WIDTH),
            });
        }
        if !(MIN_HEIGHT..=MAX_HEIGHT).contains(&h) {
            return Err(ConfigError::Validation {
                field: "resolution",
                details: format!("height {} outside [{}, {}]", h, MIN_HEIGHT, MAX_HEIGHT),
            });
        }

        Ok(VideoResolution::UserDefined {
            width: round_up_to_multiple_of_4(w),
            height: round_up_to_multiple_of_4(h),
        })
    }
}

fn round_up_to_multiple_of_4(value: u32) -> u32 {
    (value + 3) & !3
}

/// Physical camera position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraPosition {
    Front,
    Back,
}

impl CameraPosition {
    pub fn opposite(&self) -> Self {
        match self {
            CameraPosition::Front => CameraPosition::Back,
            CameraPosition::Back => CameraPosition::Front,
        }
    }
}

/// Capture orientation, one of four fixed rotations.
///
/// Portrait orientations produce output with width < height; landscape
/// orientations with width > height. The stored resolution pair is always
/// width >= height and is swapped at the output boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoOrientation {
    Portrait,
    PortraitUpsideDown,
    LandscapeRight,
    LandscapeLeft,
}

impl VideoOrientation {
    pub fn is_portrait(&self) -> bool {
        matches!(
            self,
            VideoOrientation::Portrait | VideoOrientation::PortraitUpsideDown
        )
    }

    /// Map a UI interface orientation onto the matching capture orientation.
    pub fn from_interface(orientation: InterfaceOrientation) -> Self {
        match orientation {
            InterfaceOrientation::Portrait => VideoOrientation::Portrait,
            InterfaceOrientation::PortraitUpsideDown => VideoOrientation::PortraitUpsideDown,
            InterfaceOrientation::LandscapeRight => VideoOrientation::LandscapeRight,
            InterfaceOrientation::LandscapeLeft => VideoOrientation::LandscapeLeft,
        }
    }
}

/// Orientation of the hosting UI, used to derive the capture orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceOrientation {
    Portrait,
    PortraitUpsideDown,
    LandscapeRight,
    LandscapeLeft,
}

/// Torch (flash LED) mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorchMode {
    Off,
    On,
}

impl TorchMode {
    pub fn toggled(&self) -> Self {
        match self {
            TorchMode::Off => TorchMode::On,
            TorchMode::On => TorchMode::Off,
        }
    }
}

/// Desired capture parameters.
///
/// A snapshot of this value is taken when preview starts; later store
/// mutations never affect a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfiguration {
    pub resolution: VideoResolution,
    pub frame_rate: u32,
    pub camera_position: CameraPosition,
    pub orientation: VideoOrientation,
}

impl CaptureConfiguration {
    /// Oriented output dimensions: portrait orientations swap the stored
    /// width >= height pair.
    pub fn output_size(&self) -> (u32, u32) {
        let (w, h) = self.resolution.dimensions();
        if self.orientation.is_portrait() {
            (h, w)
        } else {
            (w, h)
        }
    }
}

impl Default for CaptureConfiguration {
    fn default() -> Self {
        Self {
            resolution: VideoResolution::Preset360p,
            frame_rate: 15,
            camera_position: CameraPosition::Back,
            orientation: VideoOrientation::LandscapeRight,
        }
    }
}

/// Configuration store: validated capture parameters plus a freeze latch.
///
/// The session state machine freezes the store on the Idle -> Previewing
/// transition and unfreezes it on `stop_preview`. While frozen every mutation
/// fails with [`ConfigError::Locked`]; validation failures leave the previous
/// value untouched in every state.
pub struct ConfigStore {
    current: RwLock<CaptureConfiguration>,
    frozen: AtomicBool,
}

impl ConfigStore {
    pub fn new(initial: CaptureConfiguration) -> Self {
        Self {
            current: RwLock::new(initial),
            frozen: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> CaptureConfiguration {
        *self.current.read()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    fn check_unlocked(&self, field: &'static str) -> Result<(), ConfigError> {
        if self.is_frozen() {
            Err(ConfigError::Locked { field })
        } else {
            Ok(())
        }
    }

    /// Set a preset resolution.
    pub fn set_resolution(&self, resolution: VideoResolution) -> Result<(), ConfigError> {
        self.check_unlocked("resolution")?;
        let normalized = match resolution {
            VideoResolution::UserDefined { width, height } => {
                VideoResolution::user_defined(width, height)?
            }
            preset => preset,
        };
        self.current.write().resolution = normalized;
        debug!("Resolution set to {:?}", normalized);
        Ok(())
    }

    /// Set a user-defined resolution (normalized per [`VideoResolution::user_defined`]).
    pub fn set_user_defined_resolution(&self, width: u32, height: u32) -> Result<(), ConfigError> {
        self.check_unlocked("resolution")?;
        let normalized = VideoResolution::user_defined(width, height)?;
        self.current.write().resolution = normalized;
        debug!("User-defined resolution set to {:?}", normalized);
        Ok(())
    }

    pub fn set_frame_rate(&self, fps: u32) -> Result<(), ConfigError> {
        self.check_unlocked("frame_rate")?;
        if !(MIN_FPS..=MAX_FPS).contains(&fps) {
            return Err(ConfigError::Validation {
                field: "frame_rate",
                details: format!("{} outside [{}, {}]", fps, MIN_FPS, MAX_FPS),
            });
        }
        self.current.write().frame_rate = fps;
        debug!("Frame rate set to {}fps", fps);
        Ok(())
    }

    pub fn set_camera_position(&self, position: CameraPosition) -> Result<(), ConfigError> {
        self.check_unlocked("camera_position")?;
        self.current.write().camera_position = position;
        debug!("Camera position set to {:?}", position);
        Ok(())
    }

    pub fn set_orientation(&self, orientation: VideoOrientation) -> Result<(), ConfigError> {
        self.check_unlocked("orientation")?;
        self.current.write().orientation = orientation;
        debug!("Orientation set to {:?}", orientation);
        Ok(())
    }

    pub(crate) fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
        debug!("Configuration store frozen");
    }

    pub(crate) fn unfreeze(&self) {
        self.frozen.store(false, Ordering::Release);
        debug!("Configuration store unfrozen");
    }

    /// Session-internal position update after a successful camera switch.
    /// Bypasses the freeze latch: the switch is the one sanctioned mutation
    /// while a session is active.
    pub(crate) fn record_camera_position(&self, position: CameraPosition) {
        self.current.write().camera_position = position;
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(CaptureConfiguration::default())
    }
}

/// Top-level file/environment configuration for the kit.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StreamKitConfig {
    pub capture: CaptureSection,
    pub session: SessionSection,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureSection {
    /// Capture width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Capture height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// Frames per second, valid range [1, 30]
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Initial camera position
    #[serde(default = "default_camera_position")]
    pub camera_position: CameraPosition,

    /// Capture orientation
    #[serde(default = "default_orientation")]
    pub orientation: VideoOrientation,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionSection {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Frame channel capacity between device and delivery task
    #[serde(default = "default_frame_channel_capacity")]
    pub frame_channel_capacity: usize,

    /// Bounded teardown timeout in milliseconds
    #[serde(default = "default_teardown_timeout_ms")]
    pub teardown_timeout_ms: u64,

    /// Camera-switch first-frame timeout in milliseconds
    #[serde(default = "default_switch_timeout_ms")]
    pub switch_timeout_ms: u64,
}

impl StreamKitConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_file("streamkit.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("capture.width", default_width())?
            .set_default("capture.height", default_height())?
            .set_default("capture.fps", default_fps())?
            .set_default("capture.camera_position", "back")?
            .set_default("capture.orientation", "landscape_right")?
            .set_default(
                "session.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default(
                "session.frame_channel_capacity",
                default_frame_channel_capacity() as i64,
            )?
            .set_default(
                "session.teardown_timeout_ms",
                default_teardown_timeout_ms() as i64,
            )?
            .set_default(
                "session.switch_timeout_ms",
                default_switch_timeout_ms() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(Environment::with_prefix("STREAMKIT").separator("_"))
            .build()?;

        let config: StreamKitConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        self.capture_configuration()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;

        if self.session.event_bus_capacity == 0 {
            return Err(config::ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        if self.session.frame_channel_capacity == 0 {
            return Err(config::ConfigError::Message(
                "Frame channel capacity must be greater than 0".to_string(),
            ));
        }

        if self.session.teardown_timeout_ms == 0 {
            return Err(config::ConfigError::Message(
                "Teardown timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Build the initial capture configuration, applying the same validation
    /// the runtime store enforces.
    pub fn capture_configuration(&self) -> Result<CaptureConfiguration, ConfigError> {
        let resolution = VideoResolution::user_defined(self.capture.width, self.capture.height)?;
        if !(MIN_FPS..=MAX_FPS).contains(&self.capture.fps) {
            return Err(ConfigError::Validation {
                field: "frame_rate",
                details: format!("{} outside [{}, {}]", self.capture.fps, MIN_FPS, MAX_FPS),
            });
        }
        Ok(CaptureConfiguration {
            resolution,
            frame_rate: self.capture.fps,
            camera_position: self.capture.camera_position,
            orientation: self.capture.orientation,
        })
    }
}

impl Default for StreamKitConfig {
    fn default() -> Self {
        Self {
            capture: CaptureSection {
                width: default_width(),
                height: default_height(),
                fps: default_fps(),
                camera_position: default_camera_position(),
                orientation: default_orientation(),
            },
            session: SessionSection {
                event_bus_capacity: default_event_bus_capacity(),
                frame_channel_capacity: default_frame_channel_capacity(),
                teardown_timeout_ms: default_teardown_timeout_ms(),
                switch_timeout_ms: default_switch_timeout_ms(),
            },
        }
    }
}

// Default value functions
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    360
}
fn default_fps() -> u32 {
    15
}
fn default_camera_position() -> CameraPosition {
    CameraPosition::Back
}
fn default_orientation() -> VideoOrientation {
    VideoOrientation::LandscapeRight
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_frame_channel_capacity() -> usize {
    8
}
fn default_teardown_timeout_ms() -> u64 {
    2000
}
fn default_switch_timeout_ms() -> u64 {
    1500
}
