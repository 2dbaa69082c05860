use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventStatus {
    InProgress,
    Success,
    Error,
    Info,
    LoginWait,
}

/// One progress update, serialized as the SSE `data` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub message: String,
    pub status: EventStatus,
    /// Set on the final event of a run only.
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

impl ProgressEvent {
    pub fn new(status: EventStatus, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status,
            complete: false,
            count: None,
        }
    }

    pub fn keepalive() -> Self {
        Self::new(EventStatus::InProgress, "Processing...")
    }
}

/// Write side of a run's progress channel. Sending never fails the run: once the
/// consumer is gone events are only logged.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        match event.status {
            EventStatus::Error => warn!("{}", event.message),
            EventStatus::Success | EventStatus::LoginWait => info!("{}", event.message),
            _ => debug!("{}", event.message),
        }
        if self.tx.send(event).is_err() {
            debug!("Progress consumer dropped; event discarded");
        }
    }

    pub fn in_progress(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::new(EventStatus::InProgress, message));
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::new(EventStatus::Success, message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::new(EventStatus::Error, message));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::new(EventStatus::Info, message));
    }

    pub fn login_wait(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::new(EventStatus::LoginWait, message));
    }

    /// Terminal event. Nothing should be emitted after it.
    pub fn finish(&self, status: EventStatus, message: impl Into<String>, count: Option<u32>) {
        self.emit(ProgressEvent {
            message: message.into(),
            status,
            complete: true,
            count,
        });
    }
}
