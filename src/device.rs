use crate::config::{CameraPosition, CaptureConfiguration, TorchMode};
use crate::error::DeviceError;
use crate::frame::{FrameData, FrameFormat};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Asynchronous hardware events a driver can deliver while a device is
/// acquired. The session translates these into a forced `Interrupted`
/// transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The device was claimed by another client or suspended
    Interrupted,
    /// The device was physically removed
    Removed,
}

/// An acquired physical camera/microphone pair.
///
/// This is the capability-scoped view of the underlying driver handle: torch,
/// exposure and focus are the only mutators it exposes. Format, frame rate
/// and resolution are deliberately absent from this surface; they belong to
/// the configuration store and are fixed for the lifetime of the acquisition.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    fn position(&self) -> CameraPosition;

    /// Whether this device has a torch. Typically only back cameras do.
    fn is_torch_supported(&self) -> bool;

    fn torch_mode(&self) -> TorchMode;

    /// Set the torch mode. Returns `false` as a safe no-op when the device
    /// has no torch.
    fn set_torch_mode(&self, mode: TorchMode) -> bool;

    fn set_exposure_bias(&self, bias: f32);

    fn set_focus_point(&self, x: f32, y: f32);

    /// Start delivering captured frames, tagged with `generation`, into the
    /// channel until the token is cancelled. Must not block the caller.
    fn start_delivery(
        &self,
        frames: mpsc::Sender<FrameData>,
        generation: u64,
        cancel: CancellationToken,
    );

    /// Release the underlying driver handle. May take driver-dependent time;
    /// the session bounds it with a teardown timeout.
    async fn release(&self) -> Result<(), DeviceError>;
}

/// Acquires camera devices by position. Platform driver internals live
/// behind this boundary.
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Acquire the device at `position` configured per `config`. Returns
    /// `DeviceError::Unsupported` when that device cannot satisfy the
    /// configuration (the caller treats this as a clean switch failure).
    async fn acquire(
        &self,
        position: CameraPosition,
        config: &CaptureConfiguration,
        events: mpsc::Sender<DeviceEvent>,
    ) -> Result<Arc<dyn CameraDevice>, DeviceError>;
}

/// Capability profile of one simulated camera position.
#[derive(Debug, Clone, Copy)]
pub struct CameraProfile {
    pub torch_supported: bool,
    /// Largest width x height (width >= height) the device can deliver
    pub max_dimensions: (u32, u32),
}

impl CameraProfile {
    fn supports(&self, config: &CaptureConfiguration) -> bool {
        let (w, h) = config.resolution.dimensions();
        w <= self.max_dimensions.0 && h <= self.max_dimensions.1
    }
}

/// In-process device provider generating synthetic frames.
///
/// Stands in for the platform driver in tests and headless runs: per-position
/// capability profiles, injectable interruption events and a configurable
/// release delay to exercise the bounded-teardown path.
pub struct SimulatedProvider {
    front: Mutex<Option<CameraProfile>>,
    back: Mutex<Option<CameraProfile>>,
    release_delay: Mutex<Option<Duration>>,
    event_sender: Mutex<Option<mpsc::Sender<DeviceEvent>>>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self {
            front: Mutex::new(Some(CameraProfile {
                torch_supported: false,
                max_dimensions: (1280, 720),
            })),
            back: Mutex::new(Some(CameraProfile {
                torch_supported: true,
                max_dimensions: (1280, 720),
            })),
            release_delay: Mutex::new(None),
            event_sender: Mutex::new(None),
        }
    }

    pub fn with_front_profile(self, profile: Option<CameraProfile>) -> Self {
        *self.front.lock() = profile;
        self
    }

    pub fn with_back_profile(self, profile: Option<CameraProfile>) -> Self {
        *self.back.lock() = profile;
        self
    }

    /// Delay every `release()` call, simulating uncooperative hardware.
    pub fn with_release_delay(self, delay: Duration) -> Self {
        *self.release_delay.lock() = Some(delay);
        self
    }

    /// Inject a driver event into the most recently acquired device.
    pub async fn inject_event(&self, event: DeviceEvent) {
        let sender = self.event_sender.lock().clone();
        if let Some(sender) = sender {
            if sender.send(event).await.is_err() {
                warn!("Injected device event dropped: no listener");
            }
        } else {
            warn!("Injected device event dropped: no device acquired yet");
        }
    }

    fn profile(&self, position: CameraPosition) -> Option<CameraProfile> {
        match position {
            CameraPosition::Front => *self.front.lock(),
            CameraPosition::Back => *self.back.lock(),
        }
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceProvider for SimulatedProvider {
    async fn acquire(
        &self,
        position: CameraPosition,
        config: &CaptureConfiguration,
        events: mpsc::Sender<DeviceEvent>,
    ) -> Result<Arc<dyn CameraDevice>, DeviceError> {
        let profile = self.profile(position).ok_or_else(|| DeviceError::Acquisition {
            position,
            details: "no camera present at this position".to_string(),
        })?;

        if !profile.supports(config) {
            let (w, h) = config.resolution.dimensions();
            return Err(DeviceError::Unsupported {
                position,
                details: format!(
                    "{}x{} exceeds device maximum {}x{}",
                    w, h, profile.max_dimensions.0, profile.max_dimensions.1
                ),
            });
        }

        *self.event_sender.lock() = Some(events);

        info!(
            "Acquired simulated {:?} camera ({}x{} @ {}fps)",
            position,
            config.output_size().0,
            config.output_size().1,
            config.frame_rate
        );

        Ok(Arc::new(SimulatedCamera {
            position,
            profile,
            config: *config,
            torch: Mutex::new(TorchMode::Off),
            exposure_bias: Mutex::new(0.0),
            focus_point: Mutex::new((0.5, 0.5)),
            sequence: AtomicU64::new(0),
            release_delay: *self.release_delay.lock(),
        }))
    }
}

/// Simulated camera producing correctly sized NV12 frames on a tokio
/// interval, the way a driver callback stream would.
pub struct SimulatedCamera {
    position: CameraPosition,
    profile: CameraProfile,
    config: CaptureConfiguration,
    torch: Mutex<TorchMode>,
    exposure_bias: Mutex<f32>,
    focus_point: Mutex<(f32, f32)>,
    sequence: AtomicU64,
    release_delay: Option<Duration>,
}

#[async_trait]
impl CameraDevice for SimulatedCamera {
    fn position(&self) -> CameraPosition {
        self.position
    }

    fn is_torch_supported(&self) -> bool {
        self.profile.torch_supported
    }

    fn torch_mode(&self) -> TorchMode {
        *self.torch.lock()
    }

    fn set_torch_mode(&self, mode: TorchMode) -> bool {
        if !self.profile.torch_supported {
            debug!("Torch not supported on {:?} camera, ignoring", self.position);
            return false;
        }
        *self.torch.lock() = mode;
        debug!("Torch set to {:?} on {:?} camera", mode, self.position);
        true
    }

    fn set_exposure_bias(&self, bias: f32) {
        *self.exposure_bias.lock() = bias;
    }

    fn set_focus_point(&self, x: f32, y: f32) {
        *self.focus_point.lock() = (x, y);
    }

    fn start_delivery(
        &self,
        frames: mpsc::Sender<FrameData>,
        generation: u64,
        cancel: CancellationToken,
    ) {
        let (width, height) = self.config.output_size();
        let format = FrameFormat::Nv12;
        let frame_interval = Duration::from_millis(1000 / self.config.frame_rate as u64);
        let position = self.position;
        // Sequence continues across start_delivery calls on the same handle
        let start_sequence = self.sequence.load(Ordering::Relaxed);

        tokio::spawn(async move {
            let mut ticker = interval(frame_interval);
            let mut sequence = start_sequence;

            debug!(
                "Simulated {:?} capture loop started ({}ms interval, generation {})",
                position,
                frame_interval.as_millis(),
                generation
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Simulated {:?} capture loop cancelled", position);
                        break;
                    }
                    _ = ticker.tick() => {
                        let buffer = vec![0u8; format.buffer_size(width, height)];
                        let frame = FrameData::new(
                            sequence, buffer, width, height, format, generation,
                        );
                        sequence += 1;

                        if frames.send(frame).await.is_err() {
                            debug!("Frame channel closed, stopping {:?} capture loop", position);
                            break;
                        }
                    }
                }
            }
        });
    }

    async fn release(&self) -> Result<(), DeviceError> {
        if let Some(delay) = self.release_delay {
            warn!(
                "Simulated {:?} camera delaying release by {:?}",
                self.position, delay
            );
            sleep(delay).await;
        }
        info!("Released simulated {:?} camera", self.position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VideoResolution;

    fn test_config() -> CaptureConfiguration {
        CaptureConfiguration {
            resolution: VideoResolution::UserDefined {
                width: 160,
                height: 92,
            },
            frame_rate: 30,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_acquire_and_deliver_frames() {
        let provider = SimulatedProvider::new();
        let (event_tx, _event_rx) = mpsc::channel(4);
        let device = provider
            .acquire(CameraPosition::Back, &test_config(), event_tx)
            .await
            .unwrap();

        let (frame_tx, mut frame_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        device.start_delivery(frame_tx, 1, cancel.clone());

        let frame = frame_rx.recv().await.unwrap();
        assert_eq!(frame.source_generation, 1);
        assert_eq!((frame.width, frame.height), (160, 92));
        assert!(frame.validate_size());

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_unsupported_configuration_rejected() {
        let provider = SimulatedProvider::new().with_front_profile(Some(CameraProfile {
            torch_supported: false,
            max_dimensions: (640, 480),
        }));
        let config = CaptureConfiguration {
            resolution: VideoResolution::Preset720p,
            ..Default::default()
        };

        let (event_tx, _event_rx) = mpsc::channel(4);
        let err = provider
            .acquire(CameraPosition::Front, &config, event_tx)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DeviceError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_torch_capability() {
        let provider = SimulatedProvider::new();
        let (event_tx, _event_rx) = mpsc::channel(4);

        let back = provider
            .acquire(CameraPosition::Back, &test_config(), event_tx.clone())
            .await
            .unwrap();
        assert!(back.is_torch_supported());
        assert!(back.set_torch_mode(TorchMode::On));
        assert_eq!(back.torch_mode(), TorchMode::On);

        let front = provider
            .acquire(CameraPosition::Front, &test_config(), event_tx)
            .await
            .unwrap();
        assert!(!front.is_torch_supported());
        // Safe no-op on an unsupported device
        assert!(!front.set_torch_mode(TorchMode::On));
        assert_eq!(front.torch_mode(), TorchMode::Off);
    }

    #[tokio::test]
    async fn test_injected_event_reaches_listener() {
        let provider = SimulatedProvider::new();
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let _device = provider
            .acquire(CameraPosition::Back, &test_config(), event_tx)
            .await
            .unwrap();

        provider.inject_event(DeviceEvent::Interrupted).await;
        assert_eq!(event_rx.recv().await.unwrap(), DeviceEvent::Interrupted);
    }
}
