//! Progress publication from inside the job orchestrator (§6 "Progress events").
//!
//! Generalizes the GUI progress-emit pattern into a trait so the CLI, tests, and any
//! embedding host can each supply their own sink without the orchestrator depending
//! on a specific transport.

use serde::Serialize;

/// One progress checkpoint: `{progress: 0..100, message}`, published between pipeline
/// stages only, never from inside a tight loop (§5).
#[derive(Clone, Debug, Serialize)]
pub struct ProgressEvent {
    pub progress: f64,
    pub message: String,
}

/// Receives progress checkpoints published by the orchestrator.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

/// Prints each checkpoint to stdout as `[ NN%] message`, used by the CLI binary.
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn on_progress(&self, event: ProgressEvent) {
        println!("[{:>3.0}%] {}", event.progress, event.message);
    }
}

/// Discards every checkpoint. Used by tests and by callers that only want the final
/// result.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn on_progress(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressSink for RecordingSink {
        fn on_progress(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn recording_sink_captures_events_in_order() {
        let sink = RecordingSink { events: Mutex::new(Vec::new()) };
        sink.on_progress(ProgressEvent { progress: 0.0, message: "starting".into() });
        sink.on_progress(ProgressEvent { progress: 55.0, message: "analyzing links".into() });
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].progress, 0.0);
        assert_eq!(events[1].message, "analyzing links");
    }
}
