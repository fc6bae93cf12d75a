//! Side channels of the task scheduler.
//!
//! [`ProgressSink`] brackets every task; [`NotificationSink`] receives
//! a transient message when a task fails. Neither affects task results.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Busy indicator driven by the scheduler.
pub trait ProgressSink: Send + Sync {
    /// A task is about to run.
    fn on_task_start(&self, label: &str);

    /// The running task finished, successfully or not.
    fn on_task_end(&self);
}

/// Receiver of user-facing transient messages.
pub trait NotificationSink: Send + Sync {
    /// Show `message` for roughly `duration`.
    fn notify(&self, message: &str, duration: Duration);
}

/// Logs task boundaries at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn on_task_start(&self, label: &str) {
        tracing::debug!(task = label, "task started");
    }

    fn on_task_end(&self) {
        tracing::debug!("task finished");
    }
}

/// Logs notifications as warnings.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    #[allow(clippy::cast_possible_truncation)]
    fn notify(&self, message: &str, duration: Duration) {
        tracing::warn!(duration_ms = duration.as_millis() as u64, "{message}");
    }
}

/// What a [`RecordingSink`] saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Started(String),
    Ended,
    Notified { message: String, duration: Duration },
}

/// Collects every progress and notification event.
///
/// Used by embedders that render progress themselves, and by tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Only the notification messages.
    #[must_use]
    pub fn notifications(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Notified { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: SinkEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl ProgressSink for RecordingSink {
    fn on_task_start(&self, label: &str) {
        self.push(SinkEvent::Started(label.to_owned()));
    }

    fn on_task_end(&self) {
        self.push(SinkEvent::Ended);
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, message: &str, duration: Duration) {
        self.push(SinkEvent::Notified {
            message: message.to_owned(),
            duration,
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        sink.on_task_start("detect");
        sink.notify("detect failed: boom", Duration::from_secs(5));
        sink.on_task_end();
        assert_eq!(
            sink.events(),
            vec![
                SinkEvent::Started("detect".into()),
                SinkEvent::Notified {
                    message: "detect failed: boom".into(),
                    duration: Duration::from_secs(5),
                },
                SinkEvent::Ended,
            ]
        );
        assert_eq!(sink.notifications(), vec!["detect failed: boom"]);
    }
}
