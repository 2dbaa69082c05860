//! Per-run plumbing: progress events, cancellation and the manual-login signal.

pub mod handlers;
pub mod progress;
pub mod registry;

pub use progress::{EventStatus, ProgressEvent, ProgressSink};
pub use registry::{RunControl, RunHandle, RunRegistry};
