use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::metrics::consts::{
    TELEMETRY_DROPPED_COUNTER, TELEMETRY_SENT_COUNTER, TELEMETRY_SINK_ERRORS_COUNTER,
};
use crate::metrics::utils::{inc, label};
use crate::telemetry::sink::{MetricEvent, MetricsSink};

/// Fire-and-forget handle in front of the metrics sinks.
///
/// `emit` never waits: events go into a bounded queue drained by a forwarder task, and are
/// dropped when the queue is full. A slow or failing sink therefore never holds up the
/// caller.
#[derive(Debug, Clone)]
pub struct TelemetryEmitter {
    sender: mpsc::Sender<MetricEvent>,
}

impl TelemetryEmitter {
    /// Starts the forwarder task that delivers queued events to every sink in turn.
    pub fn spawn(sinks: Vec<Arc<dyn MetricsSink>>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (emitter, receiver) = Self::channel(capacity);
        let handle = tokio::spawn(forward(receiver, sinks));
        (emitter, handle)
    }

    /// An emitter whose queue is read by the caller instead of a forwarder task.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<MetricEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Queues an event. Returns false when it was dropped.
    pub fn emit(&self, event: MetricEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(
                    metric = %event.metric,
                    subject_key = %event.subject.key,
                    "telemetry queue full, dropping event"
                );
                inc(TELEMETRY_DROPPED_COUNTER, &[label("reason", "full")], 1);
                false
            }
            Err(TrySendError::Closed(event)) => {
                debug!(metric = %event.metric, "telemetry forwarder stopped, dropping event");
                inc(TELEMETRY_DROPPED_COUNTER, &[label("reason", "closed")], 1);
                false
            }
        }
    }
}

async fn forward(mut receiver: mpsc::Receiver<MetricEvent>, sinks: Vec<Arc<dyn MetricsSink>>) {
    while let Some(event) = receiver.recv().await {
        for sink in &sinks {
            match sink.emit(&event).await {
                Ok(()) => inc(TELEMETRY_SENT_COUNTER, &[label("sink", sink.name())], 1),
                Err(e) => {
                    // At most once: no retry, the next tick brings a fresher sample anyway
                    warn!(sink = sink.name(), error = %e, "failed to emit telemetry");
                    inc(
                        TELEMETRY_SINK_ERRORS_COUNTER,
                        &[label("sink", sink.name())],
                        1,
                    );
                }
            }
        }
    }
    debug!("telemetry forwarder stopped");
}
