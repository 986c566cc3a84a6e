//! Run event stream.
//!
//! Every pipeline step produces a [`PipelineEvent`]. Events are appended to
//! the owning run's log (see [`crate::registry`]) and fanned out to live
//! subscribers through bounded per-subscriber channels. Delivery is
//! best-effort: a subscriber whose queue is full or whose receiver is gone
//! is dropped without affecting the others. Ordering is preserved per run;
//! `pipeline_done` is always the last event of a run.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Queue capacity per subscriber before it is considered too slow.
const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// Names of the events emitted over a run's lifecycle, in approximate order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    PipelineStart,
    CloneStart,
    CloneDone,
    DetectDone,
    TestsDiscovered,
    TestsStart,
    TestsDone,
    IterationStart,
    FixGenerateStart,
    FixGenerateDone,
    FixApplied,
    BranchReady,
    Committed,
    Pushed,
    CiTriggerStart,
    CiTriggered,
    CiPollStart,
    CiStatus,
    PipelineDone,
}

/// One structured step in a run's lifecycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEvent {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub event: EventName,
    pub agent: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl PipelineEvent {
    pub fn new(run_id: &str, event: EventName, agent: &str, message: impl Into<String>) -> Self {
        Self {
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            event,
            agent: agent.to_string(),
            message: message.into(),
            data: None,
            progress: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Broadcast fan-out for pipeline events.
///
/// Cheap to clone; every clone publishes into the same subscriber set.
/// Events from concurrent runs interleave on the stream; consumers filter
/// by `run_id`.
#[derive(Clone)]
pub struct EventBus {
    senders: Arc<Mutex<Vec<flume::Sender<PipelineEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            senders: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Registers a subscriber; it receives every event published after this
    /// call, up to its queue capacity.
    pub fn subscribe(&self) -> flume::Receiver<PipelineEvent> {
        let (tx, rx) = flume::bounded(SUBSCRIBER_QUEUE_CAPACITY);
        self.senders.lock().expect("event bus lock").push(tx);
        rx
    }

    /// Publishes to all live subscribers, pruning full or disconnected ones.
    pub fn publish(&self, event: &PipelineEvent) {
        let mut senders = self.senders.lock().expect("event bus lock");
        senders.retain(|tx| tx.try_send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().expect("event bus lock").len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(run_id: &str, name: EventName) -> PipelineEvent {
        PipelineEvent::new(run_id, name, "orchestrator", "msg")
    }

    #[test]
    fn subscribers_receive_in_publish_order() {
        let bus = EventBus::new();
        let rx = bus.subscribe();

        bus.publish(&event("r1", EventName::PipelineStart));
        bus.publish(&event("r1", EventName::CloneStart));
        bus.publish(&event("r1", EventName::PipelineDone));

        let received: Vec<EventName> = rx.drain().map(|e| e.event).collect();
        assert_eq!(
            received,
            vec![
                EventName::PipelineStart,
                EventName::CloneStart,
                EventName::PipelineDone
            ]
        );
    }

    #[test]
    fn late_subscribers_miss_earlier_events() {
        let bus = EventBus::new();
        bus.publish(&event("r1", EventName::PipelineStart));

        let rx = bus.subscribe();
        bus.publish(&event("r1", EventName::PipelineDone));

        let received: Vec<EventName> = rx.drain().map(|e| e.event).collect();
        assert_eq!(received, vec![EventName::PipelineDone]);
    }

    #[test]
    fn slow_subscriber_is_dropped_without_affecting_others() {
        let bus = EventBus::new();
        let slow = bus.subscribe();
        let fast = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        // Saturate both queues, then drain only the fast subscriber. The
        // next publish overflows the slow queue and prunes it alone.
        for _ in 0..SUBSCRIBER_QUEUE_CAPACITY {
            bus.publish(&event("r1", EventName::CiStatus));
        }
        assert_eq!(fast.drain().count(), SUBSCRIBER_QUEUE_CAPACITY);
        bus.publish(&event("r1", EventName::PipelineDone));

        assert_eq!(bus.subscriber_count(), 1);
        drop(slow);
        let last = fast.drain().last().unwrap();
        assert_eq!(last.event, EventName::PipelineDone);
    }

    #[test]
    fn disconnected_subscriber_is_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);
        bus.publish(&event("r1", EventName::PipelineStart));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn event_names_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&EventName::PipelineDone).unwrap(),
            "\"pipeline_done\""
        );
        assert_eq!(
            serde_json::to_string(&EventName::FixGenerateStart).unwrap(),
            "\"fix_generate_start\""
        );
    }

    #[test]
    fn event_json_uses_camel_case_keys() {
        let e = event("r1", EventName::TestsDone).with_progress(30);
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["runId"], "r1");
        assert_eq!(json["event"], "tests_done");
        assert_eq!(json["progress"], 30);
        assert!(json.get("data").is_none());
    }
}
