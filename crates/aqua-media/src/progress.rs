//! Progress reporting for the frame pipeline.
//!
//! The pipeline emits events into a bounded channel without ever waiting on
//! the consumer: when the channel is full the event is dropped, so a slow UI
//! can never stall decoding.

use tokio::sync::mpsc;

/// Default channel capacity.
pub const DEFAULT_CAPACITY: usize = 64;

/// Progress event emitted while a video is annotated.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Stream opened
    Started { total_frames: u64 },

    /// One more frame has been written to the output
    Frame {
        processed: u64,
        total: u64,
        fraction: f64,
    },

    /// Detection failed on a sampled frame and the cached result was reused
    DetectionFailed { frame_index: u64, error: String },

    /// All frames written
    Complete { frames_written: u64 },

    /// Processing failed
    Failed { error: String },
}

impl ProgressEvent {
    /// Progress fraction carried by the event, if any.
    pub fn fraction(&self) -> Option<f64> {
        match self {
            ProgressEvent::Started { .. } => Some(0.0),
            ProgressEvent::Frame { fraction, .. } => Some(*fraction),
            ProgressEvent::Complete { .. } => Some(1.0),
            _ => None,
        }
    }
}

/// Fraction of the stream done after `processed` frames.
///
/// Clamped to `[0, 1]`; 0 when the total is unknown.
pub fn progress_fraction(processed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (processed as f64 / total as f64).clamp(0.0, 1.0)
}

/// Progress sender for async contexts.
#[derive(Clone)]
pub struct ProgressSender {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSender {
    /// Create a new progress sender.
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sender that discards every event.
    pub fn noop() -> Self {
        Self { tx: None }
    }

    /// Send a progress event (non-blocking).
    pub fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // Drop the event if the consumer is behind or gone
            let _ = tx.try_send(event);
        }
    }

    /// Send started event.
    pub fn started(&self, total_frames: u64) {
        self.send(ProgressEvent::Started { total_frames });
    }

    /// Send per-frame progress.
    pub fn frame(&self, processed: u64, total: u64) {
        self.send(ProgressEvent::Frame {
            processed,
            total,
            fraction: progress_fraction(processed, total),
        });
    }

    /// Send detection failure event.
    pub fn detection_failed(&self, frame_index: u64, error: impl Into<String>) {
        self.send(ProgressEvent::DetectionFailed {
            frame_index,
            error: error.into(),
        });
    }

    /// Send complete event.
    pub fn complete(&self, frames_written: u64) {
        self.send(ProgressEvent::Complete { frames_written });
    }

    /// Send failed event.
    pub fn failed(&self, error: impl Into<String>) {
        self.send(ProgressEvent::Failed {
            error: error.into(),
        });
    }
}

/// Progress receiver for collecting events.
pub struct ProgressReceiver {
    rx: mpsc::Receiver<ProgressEvent>,
}

impl ProgressReceiver {
    /// Receive the next progress event.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Try to receive a progress event without blocking.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain every event currently buffered.
    pub fn drain(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Create a progress channel pair with the given capacity.
pub fn channel(capacity: usize) -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ProgressSender::new(tx), ProgressReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_progress_channel() {
        let (sender, mut receiver) = channel(8);

        sender.started(10);
        sender.frame(5, 10);
        sender.complete(10);

        assert_eq!(
            receiver.recv().await,
            Some(ProgressEvent::Started { total_frames: 10 })
        );
        let frame = receiver.recv().await.unwrap();
        assert_eq!(frame.fraction(), Some(0.5));
        assert!(matches!(
            receiver.recv().await,
            Some(ProgressEvent::Complete { frames_written: 10 })
        ));
    }

    #[test]
    fn test_receiver_wakes_on_event() {
        let (sender, mut receiver) = channel(4);
        let mut next = task::spawn(receiver.recv());
        assert_pending!(next.poll());

        sender.started(3);
        assert!(next.is_woken());
        assert_eq!(
            assert_ready!(next.poll()),
            Some(ProgressEvent::Started { total_frames: 3 })
        );
    }

    #[test]
    fn test_full_channel_drops_events() {
        let (sender, mut receiver) = channel(2);
        for i in 1..=5 {
            sender.frame(i, 5);
        }
        assert_eq!(receiver.drain().len(), 2);
    }

    #[test]
    fn test_noop_sender() {
        ProgressSender::noop().complete(3);
    }

    #[test]
    fn test_progress_fraction() {
        assert_eq!(progress_fraction(0, 0), 0.0);
        assert_eq!(progress_fraction(3, 30), 0.1);
        assert_eq!(progress_fraction(30, 30), 1.0);
        // Container frame counts can undercount
        assert_eq!(progress_fraction(31, 30), 1.0);
    }
}
