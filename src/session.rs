use crate::auth::{AuthorizationProvider, AuthorizationStatus};
use crate::config::{ConfigStore, StreamKitConfig, TorchMode};
use crate::device::{CameraDevice, DeviceEvent, DeviceProvider};
use crate::error::{Result, SessionError};
use crate::events::{EventBus, StreamKitEvent};
use crate::filter::{FilterSlot, FrameFilter};
use crate::pipeline::FramePipeline;
use crate::preview::PreviewSink;
use crate::streamer::Streamer;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Capture session state. Exactly one instance of this state exists per
/// process, owned by [`StreamKit`]; transitions are the only way it changes
/// and every read is a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureState {
    /// No device acquired; configuration is mutable
    Idle,
    /// Device acquired, frames flowing to the preview sink
    Previewing,
    /// Previewing plus frames flowing to the streamer collaborator
    Streaming,
    /// Device lost to an asynchronous hardware event; recover with
    /// `start_preview`
    Interrupted,
    /// Camera/microphone permission denied; only `stop_preview` and state
    /// inspection are serviced
    Error,
}

impl CaptureState {
    /// Human-readable state name.
    pub fn name(&self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Previewing => "previewing",
            CaptureState::Streaming => "streaming",
            CaptureState::Interrupted => "interrupted",
            CaptureState::Error => "error",
        }
    }
}

// The capture hardware supports exactly one live session per process.
// Claimed on construction, released on Drop.
static INSTANCE_ALIVE: AtomicBool = AtomicBool::new(false);

struct ControlState {
    session_id: Option<Uuid>,
    device: Option<Arc<dyn CameraDevice>>,
    pipeline: Option<FramePipeline>,
    capture_cancel: Option<CancellationToken>,
    monitor_cancel: Option<CancellationToken>,
}

struct KitInner {
    store: ConfigStore,
    events: EventBus,
    provider: Arc<dyn DeviceProvider>,
    authorization: Arc<dyn AuthorizationProvider>,
    streamer: Arc<dyn Streamer>,
    filter_slot: Arc<FilterSlot>,
    config: StreamKitConfig,
    state: RwLock<CaptureState>,
    control: Mutex<ControlState>,
    device_generation: AtomicU64,
}

/// The session state machine and orchestrator.
///
/// Owns the capture device lifecycle, the filter slot and the frame delivery
/// pipeline, and sequences the preview sink and streamer collaborators around
/// state transitions. Every transition operation serializes on a single
/// control mutex; the frame delivery path runs decoupled on its own task and
/// only ever takes short lock snapshots.
pub struct StreamKit {
    inner: Arc<KitInner>,
}

impl StreamKit {
    /// Create the kit. Refuses a second live instance: the capture hardware
    /// supports exactly one session, so construction is where the rule is
    /// enforced.
    pub fn new(
        config: StreamKitConfig,
        provider: Arc<dyn DeviceProvider>,
        authorization: Arc<dyn AuthorizationProvider>,
        streamer: Arc<dyn Streamer>,
    ) -> Result<Self> {
        // Validate before claiming the instance slot so a bad config does
        // not leak the claim.
        let capture = config.capture_configuration()?;

        if INSTANCE_ALIVE.swap(true, Ordering::AcqRel) {
            return Err(SessionError::AlreadyRunning.into());
        }

        info!(
            "StreamKit created ({}x{} @ {}fps, {:?} camera)",
            capture.resolution.dimensions().0,
            capture.resolution.dimensions().1,
            capture.frame_rate,
            capture.camera_position
        );

        Ok(Self {
            inner: Arc::new(KitInner {
                store: ConfigStore::new(capture),
                events: EventBus::new(config.session.event_bus_capacity),
                provider,
                authorization,
                streamer,
                filter_slot: Arc::new(FilterSlot::new()),
                config,
                state: RwLock::new(CaptureState::Idle),
                control: Mutex::new(ControlState {
                    session_id: None,
                    device: None,
                    pipeline: None,
                    capture_cancel: None,
                    monitor_cancel: None,
                }),
                device_generation: AtomicU64::new(0),
            }),
        })
    }

    /// Current capture state snapshot.
    pub fn capture_state(&self) -> CaptureState {
        *self.inner.state.read()
    }

    /// Name of the current capture state.
    pub fn capture_state_name(&self) -> &'static str {
        self.capture_state().name()
    }

    /// The configuration store. Mutable until `start_preview`, frozen while
    /// a session is active.
    pub fn config(&self) -> &ConfigStore {
        &self.inner.store
    }

    /// Subscribe to state-change and session notifications.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StreamKitEvent> {
        self.inner.events.subscribe()
    }

    /// Start the preview: acquire the device per the frozen configuration
    /// snapshot, bind the delivery pipeline to `sink` and transition to
    /// `Previewing`.
    ///
    /// Valid from `Idle` and, as the recovery path, from `Interrupted`.
    /// Authorization is requested first; a denial transitions to `Error` and
    /// every later operation except `stop_preview` and state inspection is
    /// refused until then.
    pub async fn start_preview(&self, sink: Arc<dyn PreviewSink>) -> Result<()> {
        let mut control = self.inner.control.lock().await;

        let state = self.capture_state();
        match state {
            CaptureState::Idle | CaptureState::Interrupted => {}
            CaptureState::Error => return Err(SessionError::PermissionDenied.into()),
            _ => {
                return Err(SessionError::InvalidTransition {
                    from: state,
                    operation: "start_preview",
                }
                .into())
            }
        }

        // Settings lock down for the whole attempt; the store stays frozen
        // in every non-Idle state, including Error after a denial. Recovery
        // from Interrupted reuses the still-frozen snapshot.
        let was_frozen = self.inner.store.is_frozen();
        self.inner.store.freeze();

        match self.inner.authorization.request_access() {
            AuthorizationStatus::Granted => {}
            AuthorizationStatus::Pending => {
                debug!("Authorization pending, preview not started");
                if !was_frozen {
                    self.inner.store.unfreeze();
                }
                return Err(SessionError::AuthorizationPending.into());
            }
            AuthorizationStatus::Denied => {
                error!("Camera/microphone authorization denied");
                self.inner.transition(CaptureState::Error);
                return Err(SessionError::PermissionDenied.into());
            }
        }

        let capture = self.inner.store.snapshot();

        let generation = self.inner.device_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (device_events_tx, device_events_rx) = mpsc::channel(8);

        let device = match self
            .inner
            .provider
            .acquire(capture.camera_position, &capture, device_events_tx)
            .await
        {
            Ok(device) => device,
            Err(e) => {
                if !was_frozen {
                    self.inner.store.unfreeze();
                }
                warn!("Device acquisition failed, state unchanged: {}", e);
                return Err(e.into());
            }
        };

        let pipeline = FramePipeline::start(
            self.inner.config.session.frame_channel_capacity,
            generation,
            Arc::clone(&self.inner.filter_slot),
            sink,
        );

        let capture_cancel = CancellationToken::new();
        device.start_delivery(pipeline.frame_sender(), generation, capture_cancel.clone());

        let session_id = Uuid::new_v4();
        info!("Preview session {} started", session_id);

        control.session_id = Some(session_id);
        control.device = Some(device);
        control.pipeline = Some(pipeline);
        control.capture_cancel = Some(capture_cancel);
        control.monitor_cancel = Some(self.spawn_device_monitor(device_events_rx));

        self.inner.transition(CaptureState::Previewing);
        Ok(())
    }

    /// Stop the preview, the stream if one is active, and release the
    /// device. Idempotent from `Idle` (no-op, no notification). Completes
    /// even if the device stops cooperating: teardown is bounded and the
    /// handle is force-released on expiry, reported as a
    /// [`SessionError::TeardownTimeout`] after the session has still fully
    /// returned to `Idle`.
    pub async fn stop_preview(&self) -> Result<()> {
        let mut control = self.inner.control.lock().await;

        let state = self.capture_state();
        if state == CaptureState::Idle {
            debug!("stop_preview while idle, nothing to do");
            return Ok(());
        }

        if state == CaptureState::Streaming {
            self.stop_streaming_locked(&mut control);
        }

        // Stop the monitor first so a late device event cannot race teardown
        if let Some(cancel) = control.monitor_cancel.take() {
            cancel.cancel();
        }
        if let Some(cancel) = control.capture_cancel.take() {
            cancel.cancel();
        }
        if let Some(pipeline) = control.pipeline.take() {
            pipeline.shutdown();
        }

        let teardown = match control.device.take() {
            Some(device) => self.inner.release_device(device, "stop_preview").await,
            None => Ok(()),
        };

        if let Some(session_id) = control.session_id.take() {
            info!("Preview session {} stopped", session_id);
        }

        // The filter binding lives only for the duration of the session
        self.inner.filter_slot.install(None);
        self.inner.store.unfreeze();
        self.inner.transition(CaptureState::Idle);

        teardown.map_err(Into::into)
    }

    /// Begin streaming: hand the processed frame stream to the streamer
    /// collaborator and transition `Previewing` -> `Streaming`.
    pub async fn start_streaming(&self) -> Result<()> {
        let control = self.inner.control.lock().await;

        let state = self.capture_state();
        match state {
            CaptureState::Previewing => {}
            CaptureState::Error => return Err(SessionError::PermissionDenied.into()),
            _ => {
                return Err(SessionError::InvalidTransition {
                    from: state,
                    operation: "start_streaming",
                }
                .into())
            }
        }

        self.inner.streamer.start_streaming()?;

        let Some(pipeline) = control.pipeline.as_ref() else {
            return Err(SessionError::NotAcquired {
                operation: "start_streaming",
            }
            .into());
        };
        pipeline.attach_streamer(Arc::clone(&self.inner.streamer));

        self.inner
            .events
            .publish(StreamKitEvent::streamer_state_changed(
                self.inner.streamer.state(),
            ));
        self.inner.transition(CaptureState::Streaming);
        Ok(())
    }

    /// Stop streaming and fall back to `Previewing`. Idempotent from
    /// `Previewing` (no-op, no notification).
    pub async fn stop_streaming(&self) -> Result<()> {
        let mut control = self.inner.control.lock().await;

        let state = self.capture_state();
        match state {
            CaptureState::Streaming => {}
            CaptureState::Previewing => {
                debug!("stop_streaming while previewing, nothing to do");
                return Ok(());
            }
            CaptureState::Error => return Err(SessionError::PermissionDenied.into()),
            _ => {
                return Err(SessionError::InvalidTransition {
                    from: state,
                    operation: "stop_streaming",
                }
                .into())
            }
        }

        self.stop_streaming_locked(&mut control);
        self.inner.transition(CaptureState::Previewing);
        Ok(())
    }

    /// Switch to the opposite-position camera with the same frozen
    /// configuration.
    ///
    /// Returns `Ok(false)` and changes nothing when the target device cannot
    /// be acquired or cannot satisfy the configuration. On success the
    /// handoff is gapless: the old device keeps delivering until the new
    /// device's first frame arrives, and only then is it released and the
    /// stored camera position updated.
    pub async fn switch_camera(&self) -> Result<bool> {
        let mut control = self.inner.control.lock().await;

        let state = self.capture_state();
        match state {
            CaptureState::Previewing | CaptureState::Streaming => {}
            CaptureState::Error => return Err(SessionError::PermissionDenied.into()),
            _ => {
                return Err(SessionError::NotAcquired {
                    operation: "switch_camera",
                }
                .into())
            }
        }

        let mut capture = self.inner.store.snapshot();
        let target = capture.camera_position.opposite();
        capture.camera_position = target;

        let generation = self.inner.device_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (device_events_tx, device_events_rx) = mpsc::channel(8);

        let new_device = match self
            .inner
            .provider
            .acquire(target, &capture, device_events_tx)
            .await
        {
            Ok(device) => device,
            Err(e) => {
                info!("Camera switch to {:?} refused: {}", target, e);
                return Ok(false);
            }
        };

        let Some(pipeline) = control.pipeline.as_ref() else {
            return Err(SessionError::NotAcquired {
                operation: "switch_camera",
            }
            .into());
        };

        let first_frame = pipeline.stage_switch(generation);
        let new_cancel = CancellationToken::new();
        new_device.start_delivery(pipeline.frame_sender(), generation, new_cancel.clone());

        let switch_timeout = Duration::from_millis(self.inner.config.session.switch_timeout_ms);
        let switched = match timeout(switch_timeout, first_frame).await {
            Ok(Ok(())) => true,
            // The first frame can land just as the timeout fires; if the
            // pipeline already flipped, the new device is the live source
            // and the switch must complete, not roll back
            Ok(Err(_)) | Err(_) => pipeline.cancel_switch(generation),
        };
        if !switched {
            warn!(
                "New {:?} camera produced no frame within {:?}, keeping current device",
                target, switch_timeout
            );
            new_cancel.cancel();
            if let Err(e) = self.inner.release_device(new_device, "switch_camera").await {
                warn!("Releasing unused switch target failed: {}", e);
            }
            return Ok(false);
        }

        // The new device is live; retire the old one
        if let Some(cancel) = control.capture_cancel.replace(new_cancel) {
            cancel.cancel();
        }
        if let Some(cancel) = control.monitor_cancel.take() {
            cancel.cancel();
        }
        control.monitor_cancel = Some(self.spawn_device_monitor(device_events_rx));

        if let Some(old_device) = control.device.replace(new_device) {
            if let Err(e) = self.inner.release_device(old_device, "switch_camera").await {
                warn!("Releasing previous device failed: {}", e);
            }
        }

        self.inner.store.record_camera_position(target);
        self.inner
            .events
            .publish(StreamKitEvent::camera_switched(target));
        info!("Camera switched to {:?}", target);
        Ok(true)
    }

    /// Install, replace or clear (`None`) the active filter. Valid in any
    /// state; while frames are flowing the swap takes effect at the next
    /// frame boundary and the old filter is released after its last
    /// in-flight frame completes.
    pub async fn setup_filter(&self, filter: Option<Arc<dyn FrameFilter>>) -> Result<()> {
        // Holding the control mutex serializes the swap against camera
        // switches and start/stop transitions.
        let _control = self.inner.control.lock().await;

        if self.capture_state() == CaptureState::Error {
            return Err(SessionError::PermissionDenied.into());
        }

        let generation = self.inner.filter_slot.install(filter);
        self.inner
            .events
            .publish(StreamKitEvent::filter_changed(generation));
        Ok(())
    }

    /// Whether the acquired device has a torch. `false` when no device is
    /// acquired.
    pub async fn is_torch_supported(&self) -> bool {
        let control = self.inner.control.lock().await;
        control
            .device
            .as_ref()
            .map(|device| device.is_torch_supported())
            .unwrap_or(false)
    }

    /// Toggle the torch. Returns `Ok(false)` as a safe no-op when the device
    /// has no torch; `NotAcquired` before `start_preview`.
    pub async fn toggle_torch(&self) -> Result<bool> {
        let control = self.inner.control.lock().await;

        if self.capture_state() == CaptureState::Error {
            return Err(SessionError::PermissionDenied.into());
        }

        let device = control.device.as_ref().ok_or(SessionError::NotAcquired {
            operation: "toggle_torch",
        })?;

        if !device.is_torch_supported() {
            debug!("toggle_torch on a device without torch, no-op");
            return Ok(false);
        }

        let mode = device.torch_mode().toggled();
        let applied = device.set_torch_mode(mode);
        if applied {
            self.inner.events.publish(StreamKitEvent::torch_changed(mode));
        }
        Ok(applied)
    }

    /// Set the torch mode explicitly. Same contract as [`Self::toggle_torch`].
    pub async fn set_torch_mode(&self, mode: TorchMode) -> Result<bool> {
        let control = self.inner.control.lock().await;

        if self.capture_state() == CaptureState::Error {
            return Err(SessionError::PermissionDenied.into());
        }

        let device = control.device.as_ref().ok_or(SessionError::NotAcquired {
            operation: "set_torch_mode",
        })?;

        if !device.is_torch_supported() {
            debug!("set_torch_mode on a device without torch, no-op");
            return Ok(false);
        }

        let applied = device.set_torch_mode(mode);
        if applied {
            self.inner.events.publish(StreamKitEvent::torch_changed(mode));
        }
        Ok(applied)
    }

    /// Scoped access to the acquired device's capability surface (torch,
    /// exposure, focus). `NotAcquired` before `start_preview`; format, frame
    /// rate and resolution are not reachable through this view.
    pub async fn with_device<R>(&self, f: impl FnOnce(&dyn CameraDevice) -> R) -> Result<R> {
        let control = self.inner.control.lock().await;
        let device = control.device.as_ref().ok_or(SessionError::NotAcquired {
            operation: "with_device",
        })?;
        Ok(f(device.as_ref()))
    }

    fn stop_streaming_locked(&self, control: &mut ControlState) {
        if let Some(pipeline) = control.pipeline.as_ref() {
            pipeline.detach_streamer();
        }
        if let Err(e) = self.inner.streamer.stop_streaming() {
            warn!("Streamer stop reported an error: {}", e);
        }
        self.inner
            .events
            .publish(StreamKitEvent::streamer_state_changed(
                self.inner.streamer.state(),
            ));
    }

    fn spawn_device_monitor(&self, mut events: mpsc::Receiver<DeviceEvent>) -> CancellationToken {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => {
                            warn!("Device event received: {:?}", event);
                            inner.force_interruption().await;
                            break;
                        }
                        None => break,
                    },
                }
            }
        });

        cancel
    }
}

impl KitInner {
    fn transition(&self, new_state: CaptureState) {
        let previous = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, new_state)
        };
        if previous != new_state {
            debug!("Capture state {} -> {}", previous.name(), new_state.name());
            self.events.publish(StreamKitEvent::state_changed(new_state));
        }
    }

    /// Release an acquired device under the bounded teardown timeout. On
    /// expiry the handle is force-dropped and the timeout is surfaced as a
    /// warning event plus an error to the caller.
    async fn release_device(
        &self,
        device: Arc<dyn CameraDevice>,
        stage: &'static str,
    ) -> std::result::Result<(), SessionError> {
        let timeout_ms = self.config.session.teardown_timeout_ms;
        match timeout(Duration::from_millis(timeout_ms), device.release()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("Device release failed during {}: {}", stage, e);
                Ok(())
            }
            Err(_) => {
                warn!(
                    "Device did not release within {}ms during {}, force-releasing",
                    timeout_ms, stage
                );
                self.events
                    .publish(StreamKitEvent::teardown_timed_out(stage));
                // Dropping the Arc here is the force-release
                Err(SessionError::TeardownTimeout { stage, timeout_ms })
            }
        }
    }

    /// Forced transition driven by an asynchronous hardware event. The
    /// configuration stays frozen: recovery re-runs `start_preview` with the
    /// same snapshot.
    async fn force_interruption(&self) {
        let mut control = self.control.lock().await;

        let state = *self.state.read();
        if !matches!(state, CaptureState::Previewing | CaptureState::Streaming) {
            debug!("Device event ignored in state {}", state.name());
            return;
        }

        error!("Capture interrupted by device event");

        if state == CaptureState::Streaming {
            if let Some(pipeline) = control.pipeline.as_ref() {
                pipeline.detach_streamer();
            }
            if let Err(e) = self.streamer.stop_streaming() {
                warn!("Streamer stop during interruption failed: {}", e);
            }
        }

        control.monitor_cancel = None;
        if let Some(cancel) = control.capture_cancel.take() {
            cancel.cancel();
        }
        if let Some(pipeline) = control.pipeline.take() {
            pipeline.shutdown();
        }
        if let Some(device) = control.device.take() {
            if let Err(e) = self.release_device(device, "interruption").await {
                warn!("Device release after interruption failed: {}", e);
            }
        }
        if let Some(session_id) = control.session_id.take() {
            info!("Preview session {} interrupted", session_id);
        }

        self.transition(CaptureState::Interrupted);
    }
}

impl Drop for StreamKit {
    fn drop(&mut self) {
        // Best-effort cleanup when dropped without stop_preview
        if let Ok(mut control) = self.inner.control.try_lock() {
            if let Some(cancel) = control.monitor_cancel.take() {
                cancel.cancel();
            }
            if let Some(cancel) = control.capture_cancel.take() {
                cancel.cancel();
            }
            if let Some(pipeline) = control.pipeline.take() {
                pipeline.shutdown();
            }
        }
        INSTANCE_ALIVE.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::FixedAuthorization;
    use crate::config::CameraPosition;
    use crate::device::{CameraProfile, DeviceEvent, SimulatedProvider};
    use crate::error::{ConfigError, StreamKitError};
    use crate::filter::InvertFilter;
    use crate::preview::RecordingPreviewSink;
    use crate::frame::ProcessedFrame;
    use crate::streamer::{RecordingStreamer, StreamerState};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::broadcast;
    use tokio::time::sleep;

    // The single-instance rule is process-wide; session tests serialize on
    // this to keep cargo's parallel test threads from tripping it.
    static KIT_GUARD: StdMutex<()> = StdMutex::new(());

    fn kit_lock() -> std::sync::MutexGuard<'static, ()> {
        KIT_GUARD.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn test_config() -> StreamKitConfig {
        let mut config = StreamKitConfig::default();
        config.capture.width = 160;
        config.capture.height = 90;
        config.capture.fps = 30;
        config.session.switch_timeout_ms = 1000;
        config
    }

    fn build_kit(
        provider: Arc<SimulatedProvider>,
        authorization: Arc<FixedAuthorization>,
    ) -> (StreamKit, Arc<RecordingStreamer>) {
        let streamer = RecordingStreamer::new();
        let kit = StreamKit::new(test_config(), provider, authorization, streamer.clone())
            .expect("kit construction");
        (kit, streamer)
    }

    async fn wait_for_event<F>(
        receiver: &mut broadcast::Receiver<StreamKitEvent>,
        mut predicate: F,
    ) -> StreamKitEvent
    where
        F: FnMut(&StreamKitEvent) -> bool,
    {
        timeout(Duration::from_secs(2), async {
            loop {
                let event = receiver.recv().await.expect("event bus closed");
                if predicate(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event not observed in time")
    }

    #[tokio::test]
    async fn test_second_instance_refused_until_drop() {
        let _guard = kit_lock();
        let (kit, _) = build_kit(
            Arc::new(SimulatedProvider::new()),
            Arc::new(FixedAuthorization::granted()),
        );

        let err = StreamKit::new(
            test_config(),
            Arc::new(SimulatedProvider::new()),
            Arc::new(FixedAuthorization::granted()),
            RecordingStreamer::new(),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            StreamKitError::Session(SessionError::AlreadyRunning)
        ));

        drop(kit);
        let again = StreamKit::new(
            test_config(),
            Arc::new(SimulatedProvider::new()),
            Arc::new(FixedAuthorization::granted()),
            RecordingStreamer::new(),
        );
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_start_preview_freezes_config_and_delivers_frames() {
        let _guard = kit_lock();
        let (kit, _) = build_kit(
            Arc::new(SimulatedProvider::new()),
            Arc::new(FixedAuthorization::granted()),
        );
        let sink = RecordingPreviewSink::new();
        let mut events = kit.subscribe();

        kit.start_preview(sink.clone()).await.unwrap();
        assert_eq!(kit.capture_state(), CaptureState::Previewing);

        wait_for_event(&mut events, |e| {
            matches!(
                e,
                StreamKitEvent::StateChanged {
                    state: CaptureState::Previewing,
                    ..
                }
            )
        })
        .await;

        // Configuration is frozen for the duration of the session
        let err = kit.config().set_frame_rate(10).unwrap_err();
        assert!(matches!(err, ConfigError::Locked { .. }));

        // Frames reach the sink
        timeout(Duration::from_secs(2), async {
            while sink.rendered_count() == 0 {
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("no frames rendered");

        kit.stop_preview().await.unwrap();
        assert_eq!(kit.capture_state(), CaptureState::Idle);
        assert!(kit.config().set_frame_rate(10).is_ok());
    }

    #[tokio::test]
    async fn test_double_start_preview_rejected() {
        let _guard = kit_lock();
        let (kit, _) = build_kit(
            Arc::new(SimulatedProvider::new()),
            Arc::new(FixedAuthorization::granted()),
        );

        kit.start_preview(RecordingPreviewSink::new()).await.unwrap();

        let err = kit
            .start_preview(RecordingPreviewSink::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreamKitError::Session(SessionError::InvalidTransition {
                from: CaptureState::Previewing,
                ..
            })
        ));
        assert_eq!(kit.capture_state(), CaptureState::Previewing);

        kit.stop_preview().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_preview_while_idle_is_silent_noop() {
        let _guard = kit_lock();
        let (kit, _) = build_kit(
            Arc::new(SimulatedProvider::new()),
            Arc::new(FixedAuthorization::granted()),
        );
        let mut events = kit.subscribe();

        kit.stop_preview().await.unwrap();
        assert_eq!(kit.capture_state(), CaptureState::Idle);
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_permission_denied_is_fatal_until_stop() {
        let _guard = kit_lock();
        let (kit, _) = build_kit(
            Arc::new(SimulatedProvider::new()),
            Arc::new(FixedAuthorization::denied()),
        );
        let mut events = kit.subscribe();

        let err = kit
            .start_preview(RecordingPreviewSink::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreamKitError::Session(SessionError::PermissionDenied)
        ));
        assert_eq!(kit.capture_state(), CaptureState::Error);

        wait_for_event(&mut events, |e| {
            matches!(
                e,
                StreamKitEvent::StateChanged {
                    state: CaptureState::Error,
                    ..
                }
            )
        })
        .await;

        // Everything except stop_preview and inspection is refused
        let err = kit.setup_filter(None).await.unwrap_err();
        assert!(matches!(
            err,
            StreamKitError::Session(SessionError::PermissionDenied)
        ));
        let err = kit.start_streaming().await.unwrap_err();
        assert!(matches!(
            err,
            StreamKitError::Session(SessionError::PermissionDenied)
        ));
        assert_eq!(kit.capture_state_name(), "error");

        // The store froze for the attempt and stays locked while not Idle
        assert!(matches!(
            kit.config().set_frame_rate(10).unwrap_err(),
            ConfigError::Locked { .. }
        ));

        kit.stop_preview().await.unwrap();
        assert_eq!(kit.capture_state(), CaptureState::Idle);
        assert!(kit.config().set_frame_rate(10).is_ok());
    }

    #[tokio::test]
    async fn test_pending_authorization_is_retriable() {
        let _guard = kit_lock();
        let (kit, _) = build_kit(
            Arc::new(SimulatedProvider::new()),
            Arc::new(FixedAuthorization::pending()),
        );

        let err = kit
            .start_preview(RecordingPreviewSink::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreamKitError::Session(SessionError::AuthorizationPending)
        ));
        // Not fatal: state stays Idle and the config is still mutable
        assert_eq!(kit.capture_state(), CaptureState::Idle);
        assert!(kit.config().set_frame_rate(20).is_ok());
    }

    #[tokio::test]
    async fn test_streaming_lifecycle() {
        let _guard = kit_lock();
        let (kit, streamer) = build_kit(
            Arc::new(SimulatedProvider::new()),
            Arc::new(FixedAuthorization::granted()),
        );

        // Streaming requires a running preview
        let err = kit.start_streaming().await.unwrap_err();
        assert!(matches!(
            err,
            StreamKitError::Session(SessionError::InvalidTransition { .. })
        ));

        kit.start_preview(RecordingPreviewSink::new()).await.unwrap();
        kit.start_streaming().await.unwrap();
        assert_eq!(kit.capture_state(), CaptureState::Streaming);
        assert_eq!(streamer.state(), StreamerState::Streaming);

        timeout(Duration::from_secs(2), async {
            while streamer.pushed_count() == 0 {
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("no frames streamed");

        kit.stop_streaming().await.unwrap();
        assert_eq!(kit.capture_state(), CaptureState::Previewing);
        assert_eq!(streamer.state(), StreamerState::Idle);

        // Idempotent from Previewing
        kit.stop_streaming().await.unwrap();
        assert_eq!(kit.capture_state(), CaptureState::Previewing);

        kit.stop_preview().await.unwrap();
    }

    struct FailingStreamer;

    impl Streamer for FailingStreamer {
        fn start_streaming(&self) -> crate::error::Result<()> {
            Err(StreamKitError::streamer("connection refused"))
        }

        fn stop_streaming(&self) -> crate::error::Result<()> {
            Ok(())
        }

        fn push_frame(&self, _frame: &ProcessedFrame) {}

        fn state(&self) -> StreamerState {
            StreamerState::Error
        }
    }

    #[tokio::test]
    async fn test_streamer_start_failure_keeps_previewing() {
        let _guard = kit_lock();
        let kit = StreamKit::new(
            test_config(),
            Arc::new(SimulatedProvider::new()),
            Arc::new(FixedAuthorization::granted()),
            Arc::new(FailingStreamer),
        )
        .unwrap();

        kit.start_preview(RecordingPreviewSink::new()).await.unwrap();

        let err = kit.start_streaming().await.unwrap_err();
        assert!(matches!(err, StreamKitError::Streamer { .. }));
        assert_eq!(kit.capture_state(), CaptureState::Previewing);

        kit.stop_preview().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_preview_while_streaming_stops_stream_first() {
        let _guard = kit_lock();
        let (kit, streamer) = build_kit(
            Arc::new(SimulatedProvider::new()),
            Arc::new(FixedAuthorization::granted()),
        );

        kit.start_preview(RecordingPreviewSink::new()).await.unwrap();
        kit.start_streaming().await.unwrap();

        kit.stop_preview().await.unwrap();
        assert_eq!(kit.capture_state(), CaptureState::Idle);
        assert_eq!(streamer.state(), StreamerState::Idle);
    }

    #[tokio::test]
    async fn test_switch_camera_success_updates_position() {
        let _guard = kit_lock();
        let (kit, _) = build_kit(
            Arc::new(SimulatedProvider::new()),
            Arc::new(FixedAuthorization::granted()),
        );
        let mut events = kit.subscribe();

        kit.start_preview(RecordingPreviewSink::new()).await.unwrap();
        assert_eq!(
            kit.config().snapshot().camera_position,
            CameraPosition::Back
        );

        assert!(kit.switch_camera().await.unwrap());
        assert_eq!(
            kit.config().snapshot().camera_position,
            CameraPosition::Front
        );
        assert_eq!(kit.capture_state(), CaptureState::Previewing);

        wait_for_event(&mut events, |e| {
            matches!(
                e,
                StreamKitEvent::CameraSwitched {
                    position: CameraPosition::Front,
                    ..
                }
            )
        })
        .await;

        kit.stop_preview().await.unwrap();
    }

    #[tokio::test]
    async fn test_switch_camera_failure_changes_nothing() {
        let _guard = kit_lock();
        // Front camera tops out below the configured resolution
        let provider = Arc::new(SimulatedProvider::new().with_front_profile(Some(CameraProfile {
            torch_supported: false,
            max_dimensions: (100, 90),
        })));
        let (kit, _) = build_kit(provider, Arc::new(FixedAuthorization::granted()));

        kit.start_preview(RecordingPreviewSink::new()).await.unwrap();
        let before = kit.config().snapshot().camera_position;

        assert!(!kit.switch_camera().await.unwrap());
        assert_eq!(kit.config().snapshot().camera_position, before);
        assert_eq!(kit.capture_state(), CaptureState::Previewing);
        assert!(kit
            .with_device(|d| d.position() == CameraPosition::Back)
            .await
            .unwrap());

        kit.stop_preview().await.unwrap();
    }

    #[tokio::test]
    async fn test_switch_camera_requires_acquisition() {
        let _guard = kit_lock();
        let (kit, _) = build_kit(
            Arc::new(SimulatedProvider::new()),
            Arc::new(FixedAuthorization::granted()),
        );

        let err = kit.switch_camera().await.unwrap_err();
        assert!(matches!(
            err,
            StreamKitError::Session(SessionError::NotAcquired { .. })
        ));
    }

    #[tokio::test]
    async fn test_torch_operations() {
        let _guard = kit_lock();
        let (kit, _) = build_kit(
            Arc::new(SimulatedProvider::new()),
            Arc::new(FixedAuthorization::granted()),
        );

        // Device-only operation before acquisition
        let err = kit.toggle_torch().await.unwrap_err();
        assert!(matches!(
            err,
            StreamKitError::Session(SessionError::NotAcquired { .. })
        ));
        assert!(!kit.is_torch_supported().await);

        // Back camera has a torch
        kit.start_preview(RecordingPreviewSink::new()).await.unwrap();
        assert!(kit.is_torch_supported().await);
        assert!(kit.toggle_torch().await.unwrap());
        assert!(kit
            .with_device(|d| d.torch_mode() == TorchMode::On)
            .await
            .unwrap());
        assert!(kit.set_torch_mode(TorchMode::Off).await.unwrap());

        // Front camera does not; the operation is a safe no-op
        assert!(kit.switch_camera().await.unwrap());
        assert!(!kit.is_torch_supported().await);
        assert!(!kit.toggle_torch().await.unwrap());
        assert!(!kit.set_torch_mode(TorchMode::On).await.unwrap());

        kit.stop_preview().await.unwrap();
    }

    #[tokio::test]
    async fn test_filter_swap_publishes_generation() {
        let _guard = kit_lock();
        let (kit, _) = build_kit(
            Arc::new(SimulatedProvider::new()),
            Arc::new(FixedAuthorization::granted()),
        );
        let mut events = kit.subscribe();

        // Valid while idle
        kit.setup_filter(Some(Arc::new(InvertFilter))).await.unwrap();
        wait_for_event(&mut events, |e| {
            matches!(e, StreamKitEvent::FilterChanged { generation: 1, .. })
        })
        .await;

        // And mid-session
        kit.start_preview(RecordingPreviewSink::new()).await.unwrap();
        kit.setup_filter(None).await.unwrap();
        wait_for_event(&mut events, |e| {
            matches!(e, StreamKitEvent::FilterChanged { generation: 2, .. })
        })
        .await;

        kit.stop_preview().await.unwrap();
    }

    #[tokio::test]
    async fn test_interruption_and_recovery() {
        let _guard = kit_lock();
        let provider = Arc::new(SimulatedProvider::new());
        let (kit, _) = build_kit(Arc::clone(&provider), Arc::new(FixedAuthorization::granted()));
        let mut events = kit.subscribe();

        kit.start_preview(RecordingPreviewSink::new()).await.unwrap();

        provider.inject_event(DeviceEvent::Interrupted).await;
        wait_for_event(&mut events, |e| {
            matches!(
                e,
                StreamKitEvent::StateChanged {
                    state: CaptureState::Interrupted,
                    ..
                }
            )
        })
        .await;
        assert_eq!(kit.capture_state(), CaptureState::Interrupted);

        // Configuration stays frozen across the interruption
        assert!(matches!(
            kit.config().set_frame_rate(10).unwrap_err(),
            ConfigError::Locked { .. }
        ));

        // Recovery: start_preview again from Interrupted
        kit.start_preview(RecordingPreviewSink::new()).await.unwrap();
        assert_eq!(kit.capture_state(), CaptureState::Previewing);

        kit.stop_preview().await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_timeout_force_releases() {
        let _guard = kit_lock();
        let provider = Arc::new(
            SimulatedProvider::new().with_release_delay(Duration::from_millis(500)),
        );
        let streamer = RecordingStreamer::new();
        let mut config = test_config();
        config.session.teardown_timeout_ms = 100;
        let kit = StreamKit::new(
            config,
            provider,
            Arc::new(FixedAuthorization::granted()),
            streamer,
        )
        .unwrap();
        let mut events = kit.subscribe();

        kit.start_preview(RecordingPreviewSink::new()).await.unwrap();

        let err = kit.stop_preview().await.unwrap_err();
        assert!(matches!(
            err,
            StreamKitError::Session(SessionError::TeardownTimeout { .. })
        ));
        // The session still fully returned to Idle
        assert_eq!(kit.capture_state(), CaptureState::Idle);
        assert!(kit.config().set_frame_rate(20).is_ok());

        wait_for_event(&mut events, |e| {
            matches!(e, StreamKitEvent::TeardownTimedOut { .. })
        })
        .await;
    }
}
