use crate::config::{CameraPosition, TorchMode};
use crate::session::CaptureState;
use crate::streamer::StreamerState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Notifications published by the session state machine.
///
/// `StateChanged` is the only supported way external code learns of
/// asynchronous transitions; there is no polling guarantee between events.
/// Rejected or no-op operations never publish anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamKitEvent {
    /// The capture state changed; carries the new state
    StateChanged {
        state: CaptureState,
        timestamp: DateTime<Utc>,
    },
    /// A camera switch completed successfully
    CameraSwitched {
        position: CameraPosition,
        timestamp: DateTime<Utc>,
    },
    /// The filter slot was replaced; carries the new filter generation
    FilterChanged {
        generation: u64,
        timestamp: DateTime<Utc>,
    },
    /// The torch mode changed on the acquired device
    TorchChanged {
        mode: TorchMode,
        timestamp: DateTime<Utc>,
    },
    /// A teardown stage exceeded its bounded timeout and was force-released
    TeardownTimedOut {
        stage: String,
        timestamp: DateTime<Utc>,
    },
    /// Relay of the streamer collaborator's own connectivity report
    StreamerStateChanged {
        state: StreamerState,
        timestamp: DateTime<Utc>,
    },
}

impl StreamKitEvent {
    pub fn state_changed(state: CaptureState) -> Self {
        Self::StateChanged {
            state,
            timestamp: Utc::now(),
        }
    }

    pub fn camera_switched(position: CameraPosition) -> Self {
        Self::CameraSwitched {
            position,
            timestamp: Utc::now(),
        }
    }

    pub fn filter_changed(generation: u64) -> Self {
        Self::FilterChanged {
            generation,
            timestamp: Utc::now(),
        }
    }

    pub fn torch_changed(mode: TorchMode) -> Self {
        Self::TorchChanged {
            mode,
            timestamp: Utc::now(),
        }
    }

    pub fn teardown_timed_out(stage: &str) -> Self {
        Self::TeardownTimedOut {
            stage: stage.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn streamer_state_changed(state: StreamerState) -> Self {
        Self::StreamerStateChanged {
            state,
            timestamp: Utc::now(),
        }
    }

    /// Event type as a string for filtering and logs.
    pub fn event_type(&self) -> &'static str {
        match self {
            StreamKitEvent::StateChanged { .. } => "state_changed",
            StreamKitEvent::CameraSwitched { .. } => "camera_switched",
            StreamKitEvent::FilterChanged { .. } => "filter_changed",
            StreamKitEvent::TorchChanged { .. } => "torch_changed",
            StreamKitEvent::TeardownTimedOut { .. } => "teardown_timed_out",
            StreamKitEvent::StreamerStateChanged { .. } => "streamer_state_changed",
        }
    }

    /// Human-readable description for logs.
    pub fn description(&self) -> String {
        match self {
            StreamKitEvent::StateChanged { state, .. } => {
                format!("Capture state changed to {}", state.name())
            }
            StreamKitEvent::CameraSwitched { position, .. } => {
                format!("Camera switched to {:?}", position)
            }
            StreamKitEvent::FilterChanged { generation, .. } => {
                format!("Filter changed (generation {})", generation)
            }
            StreamKitEvent::TorchChanged { mode, .. } => {
                format!("Torch {:?}", mode)
            }
            StreamKitEvent::TeardownTimedOut { stage, .. } => {
                format!("Teardown timed out during {}", stage)
            }
            StreamKitEvent::StreamerStateChanged { state, .. } => {
                format!("Streamer reported {:?}", state)
            }
        }
    }
}

/// Broadcast event bus the session publishes notifications on.
pub struct EventBus {
    sender: broadcast::Sender<StreamKitEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<StreamKitEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers.
    ///
    /// Publishing with no subscribers is not an error: the notification
    /// channel is observational, the session never depends on delivery.
    pub fn publish(&self, event: StreamKitEvent) -> usize {
        match &event {
            StreamKitEvent::StateChanged { state, .. } => {
                info!("Capture state changed to {}", state.name());
            }
            StreamKitEvent::TeardownTimedOut { stage, .. } => {
                warn!("Teardown timed out during {}", stage);
            }
            _ => {
                debug!("Event: {}", event.description());
            }
        }

        self.sender.send(event).unwrap_or(0)
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
