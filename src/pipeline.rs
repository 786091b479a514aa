use crate::filter::FilterSlot;
use crate::frame::{FrameData, ProcessedFrame};
use crate::preview::PreviewSink;
use crate::streamer::Streamer;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

struct PendingSwitch {
    generation: u64,
    first_frame: oneshot::Sender<()>,
}

struct PipelineShared {
    current_generation: AtomicU64,
    pending_switch: Mutex<Option<PendingSwitch>>,
    streaming: AtomicBool,
    streamer: RwLock<Option<Arc<dyn Streamer>>>,
    delivered: AtomicU64,
}

/// Single delivery task between the capture callback stream and the
/// consumers.
///
/// Every acquired device sends into the same bounded channel; one task drains
/// it, applies the filter slot snapshot and fans the processed frame out to
/// the preview sink and, while streaming is enabled, the streamer. One task
/// means capture-order delivery and a consistent filter-generation sequence
/// for both consumers by construction.
///
/// Camera switches are a swap-then-drain handoff: `stage_switch` registers
/// the new device generation, the first frame carrying it flips the active
/// generation and resolves the returned channel, and stale frames from the
/// old device are dropped from then on. Control operations never block this
/// path beyond a lock snapshot.
pub struct FramePipeline {
    frames_tx: mpsc::Sender<FrameData>,
    shared: Arc<PipelineShared>,
    cancel: CancellationToken,
}

impl FramePipeline {
    /// Spawn the delivery task bound to `preview`, starting at device
    /// generation `initial_generation`.
    pub fn start(
        channel_capacity: usize,
        initial_generation: u64,
        filter_slot: Arc<FilterSlot>,
        preview: Arc<dyn PreviewSink>,
    ) -> Self {
        let (frames_tx, frames_rx) = mpsc::channel(channel_capacity);
        let shared = Arc::new(PipelineShared {
            current_generation: AtomicU64::new(initial_generation),
            pending_switch: Mutex::new(None),
            streaming: AtomicBool::new(false),
            streamer: RwLock::new(None),
            delivered: AtomicU64::new(0),
        });

        let task_shared = Arc::clone(&shared);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            Self::delivery_loop(frames_rx, task_shared, filter_slot, preview, task_cancel).await;
        });

        Self {
            frames_tx,
            shared,
            cancel,
        }
    }

    /// Sender the acquired device feeds captured frames into.
    pub fn frame_sender(&self) -> mpsc::Sender<FrameData> {
        self.frames_tx.clone()
    }

    /// Register an upcoming device generation. The returned channel resolves
    /// when the first frame of that generation is delivered; the old device
    /// must only be released after that.
    pub fn stage_switch(&self, generation: u64) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.shared.pending_switch.lock();
        if pending.is_some() {
            warn!("Replacing an unconsumed staged switch");
        }
        *pending = Some(PendingSwitch {
            generation,
            first_frame: tx,
        });
        debug!("Staged source switch to generation {}", generation);
        rx
    }

    /// Abandon a staged switch whose device never produced a frame. Returns
    /// `true` when the staged generation already became active, meaning the
    /// switch completed after all and must not be rolled back.
    pub fn cancel_switch(&self, generation: u64) -> bool {
        let mut pending = self.shared.pending_switch.lock();
        let staged = pending
            .as_ref()
            .map_or(false, |switch| switch.generation == generation);
        if staged {
            *pending = None;
            debug!("Staged source switch abandoned");
            return false;
        }
        // The generation flips under the pending lock, so this read cannot
        // tear against accept_generation
        self.shared.current_generation.load(Ordering::Acquire) == generation
    }

    /// Bind the streamer and start pushing frames to it.
    pub fn attach_streamer(&self, streamer: Arc<dyn Streamer>) {
        *self.shared.streamer.write() = Some(streamer);
        self.shared.streaming.store(true, Ordering::Release);
        debug!("Streamer attached to delivery path");
    }

    /// Stop pushing frames to the streamer and drop the binding.
    pub fn detach_streamer(&self) {
        self.shared.streaming.store(false, Ordering::Release);
        *self.shared.streamer.write() = None;
        debug!("Streamer detached from delivery path");
    }

    pub fn current_generation(&self) -> u64 {
        self.shared.current_generation.load(Ordering::Acquire)
    }

    /// Total frames delivered to consumers so far.
    pub fn delivered_count(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    /// Stop the delivery task. Completes without waiting on further frames.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn delivery_loop(
        mut frames_rx: mpsc::Receiver<FrameData>,
        shared: Arc<PipelineShared>,
        filter_slot: Arc<FilterSlot>,
        preview: Arc<dyn PreviewSink>,
        cancel: CancellationToken,
    ) {
        debug!("Frame delivery task started");

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Frame delivery task cancelled");
                    break;
                }
                frame = frames_rx.recv() => match frame {
                    Some(frame) => frame,
                    None => {
                        debug!("All frame senders dropped, delivery task ending");
                        break;
                    }
                },
            };

            if !Self::accept_generation(&shared, frame.source_generation) {
                trace!(
                    "Dropping stale frame {} from generation {}",
                    frame.sequence,
                    frame.source_generation
                );
                continue;
            }

            // One snapshot per frame: the whole frame is processed by exactly
            // one filter generation.
            let (filter, generation) = filter_slot.snapshot();
            let processed = match &filter {
                Some(filter) => match filter.process(&frame) {
                    Ok(output) => ProcessedFrame {
                        frame: output,
                        filter_generation: generation,
                    },
                    Err(e) => {
                        // Keep the stream alive; deliver the unfiltered frame
                        error!("Filter '{}' failed, delivering raw frame: {}", filter.name(), e);
                        ProcessedFrame {
                            frame: frame.clone(),
                            filter_generation: generation,
                        }
                    }
                },
                None => ProcessedFrame {
                    frame: frame.clone(),
                    filter_generation: generation,
                },
            };

            preview.render(&processed);

            if shared.streaming.load(Ordering::Acquire) {
                if let Some(streamer) = shared.streamer.read().as_ref() {
                    streamer.push_frame(&processed);
                }
            }

            shared.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Decide whether a frame's device generation is deliverable, flipping
    /// the active generation when a staged switch sees its first frame.
    fn accept_generation(shared: &PipelineShared, generation: u64) -> bool {
        if generation == shared.current_generation.load(Ordering::Acquire) {
            return true;
        }

        let mut pending = shared.pending_switch.lock();
        let staged = pending
            .as_ref()
            .map_or(false, |switch| switch.generation == generation);
        if staged {
            if let Some(switch) = pending.take() {
                shared
                    .current_generation
                    .store(generation, Ordering::Release);
                debug!("Source switch complete, now delivering generation {}", generation);
                // The session may have timed out and dropped the receiver
                let _ = switch.first_frame.send(());
            }
            return true;
        }

        false
    }
}
