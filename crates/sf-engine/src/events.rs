//! Engine events for external consumers (logging, UIs, notebooks).

use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Notable things the search loop did. Delivered on the channel supplied in
/// the engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Started {
        run_id: Uuid,
        run: u64,
        spaces: Vec<String>,
    },
    Improved {
        space_id: String,
        round: u64,
        score: f64,
        previous: Option<f64>,
    },
    CandidateFailed {
        space_id: String,
        round: u64,
        error: String,
    },
    EnsembleUpdated {
        members: Vec<String>,
        score: f64,
    },
    Stopped {
        run_id: Uuid,
        rounds: u64,
        reason: String,
    },
    Fatal {
        run_id: Uuid,
        error: String,
    },
}

/// Non-blocking wrapper around an optional event sender.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink {
    sender: Option<Sender<EngineEvent>>,
}

impl EventSink {
    pub(crate) fn new(sender: Option<Sender<EngineEvent>>) -> Self {
        Self { sender }
    }

    /// Events are dropped rather than stalling the loop on a full channel.
    pub(crate) fn emit(&self, event: EngineEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(event)) => {
                warn!(?event, "event channel full, dropping event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};

    #[test]
    fn emit_without_sender_is_noop() {
        EventSink::default().emit(EngineEvent::Fatal {
            run_id: Uuid::nil(),
            error: "x".into(),
        });
    }

    #[test]
    fn full_or_closed_channel_never_blocks() {
        let (tx, rx) = bounded(1);
        let sink = EventSink::new(Some(tx));
        for round in 0..3 {
            sink.emit(EngineEvent::CandidateFailed {
                space_id: "knn".into(),
                round,
                error: "boom".into(),
            });
        }
        assert_eq!(rx.len(), 1);
        drop(rx);
        sink.emit(EngineEvent::EnsembleUpdated {
            members: vec![],
            score: 0.5,
        });
    }

    #[test]
    fn events_are_tagged_json() {
        let (tx, rx) = unbounded();
        EventSink::new(Some(tx)).emit(EngineEvent::Improved {
            space_id: "lr".into(),
            round: 3,
            score: 0.91,
            previous: None,
        });
        let json = serde_json::to_value(rx.recv().unwrap()).unwrap();
        assert_eq!(json["type"], "improved");
        assert_eq!(json["space_id"], "lr");
    }
}
