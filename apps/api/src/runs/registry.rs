use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tracing::debug;
use uuid::Uuid;

use crate::runs::progress::{ProgressEvent, ProgressSink};

/// Signals shared between a running worker and the HTTP handlers.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    cancelled: Arc<AtomicBool>,
    login_confirmed: Arc<Notify>,
}

impl RunControl {
    /// Also releases a pending login wait so the worker can wind down.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.login_confirmed.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// A confirmation sent before the worker starts waiting is not lost.
    pub fn confirm_login(&self) {
        self.login_confirmed.notify_one();
    }

    /// Waits for `confirm_login`. Returns `false` on timeout.
    pub async fn wait_for_login(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.login_confirmed.notified())
            .await
            .is_ok()
    }
}

/// How long a finished run's events wait for a subscriber before they are dropped.
pub const UNCLAIMED_TTL: Duration = Duration::from_secs(10 * 60);

/// Handed to the worker task when a run starts.
pub struct RunHandle {
    pub id: Uuid,
    pub progress: ProgressSink,
    pub control: RunControl,
}

struct RunEntry {
    receiver: Option<mpsc::UnboundedReceiver<ProgressEvent>>,
    control: RunControl,
    finished: bool,
}

/// Live runs keyed by run id.
///
/// A run is forgotten once a stream has delivered its terminal event, or once
/// its worker is done and nobody has claimed the events for `unclaimed_ttl`.
#[derive(Clone)]
pub struct RunRegistry {
    runs: Arc<Mutex<HashMap<Uuid, RunEntry>>>,
    unclaimed_ttl: Duration,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::with_ttl(UNCLAIMED_TTL)
    }
}

impl RunRegistry {
    pub fn with_ttl(unclaimed_ttl: Duration) -> Self {
        Self {
            runs: Arc::new(Mutex::new(HashMap::new())),
            unclaimed_ttl,
        }
    }

    /// The lock is never held across an await, so a poisoned map is still consistent.
    fn entries(&self) -> MutexGuard<'_, HashMap<Uuid, RunEntry>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start(&self) -> RunHandle {
        let id = Uuid::new_v4();
        let (progress, receiver) = ProgressSink::channel();
        let control = RunControl::default();

        self.entries().insert(
            id,
            RunEntry {
                receiver: Some(receiver),
                control: control.clone(),
                finished: false,
            },
        );

        RunHandle {
            id,
            progress,
            control,
        }
    }

    /// Starts a run on its own task and marks it finished when the worker returns.
    pub fn launch<F, Fut>(&self, work: F) -> Uuid
    where
        F: FnOnce(RunHandle) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = self.start();
        let id = handle.id;
        let worker = work(handle);
        let registry = self.clone();
        tokio::spawn(async move {
            worker.await;
            registry.finish(id);
        });
        id
    }

    /// Hands out the event receiver. Only one subscriber holds it at a time.
    pub fn take_receiver(&self, id: Uuid) -> Option<mpsc::UnboundedReceiver<ProgressEvent>> {
        self.entries()
            .get_mut(&id)
            .and_then(|entry| entry.receiver.take())
    }

    /// Returns a subscriber's receiver. `None` means the terminal event went
    /// out and the run is forgotten; `Some` lets a later subscriber resume.
    pub fn release(&self, id: Uuid, receiver: Option<mpsc::UnboundedReceiver<ProgressEvent>>) {
        let mut runs = self.entries();
        let Some(receiver) = receiver else {
            runs.remove(&id);
            return;
        };
        let finished = match runs.get_mut(&id) {
            Some(entry) => {
                entry.receiver = Some(receiver);
                entry.finished
            }
            None => false,
        };
        drop(runs);
        if finished {
            self.expire_unclaimed(id);
        }
    }

    /// Called once the worker is done. Its remaining events stay claimable for
    /// `unclaimed_ttl`.
    pub fn finish(&self, id: Uuid) {
        let unclaimed = match self.entries().get_mut(&id) {
            Some(entry) => {
                entry.finished = true;
                entry.receiver.is_some()
            }
            None => false,
        };
        if unclaimed {
            self.expire_unclaimed(id);
        }
    }

    fn expire_unclaimed(&self, id: Uuid) {
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(registry.unclaimed_ttl).await;
            let mut runs = registry.entries();
            if runs.get(&id).is_some_and(|entry| entry.receiver.is_some()) {
                runs.remove(&id);
                debug!("Dropped unclaimed events of run {id}");
            }
        });
    }

    pub fn control(&self, id: Uuid) -> Option<RunControl> {
        self.entries().get(&id).map(|entry| entry.control.clone())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runs::EventStatus;

    #[tokio::test]
    async fn test_receiver_is_handed_out_once() {
        let registry = RunRegistry::default();
        let handle = registry.start();

        assert!(registry.take_receiver(handle.id).is_some());
        assert!(registry.take_receiver(handle.id).is_none());
        assert!(registry.take_receiver(Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn test_cancel_is_visible_to_worker() {
        let registry = RunRegistry::default();
        let handle = registry.start();

        assert!(!handle.control.is_cancelled());
        registry.control(handle.id).unwrap().cancel();
        assert!(handle.control.is_cancelled());

        let rx = registry.take_receiver(handle.id);
        registry.release(handle.id, rx);
        assert!(registry.control(handle.id).is_some());

        registry.release(handle.id, None);
        assert!(registry.control(handle.id).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_wait_times_out_without_confirmation() {
        let control = RunControl::default();
        assert!(!control.wait_for_login(Duration::from_secs(300)).await);
    }

    #[tokio::test]
    async fn test_early_confirmation_is_not_lost() {
        let control = RunControl::default();
        control.confirm_login();
        assert!(control.wait_for_login(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_cancel_releases_login_wait() {
        let control = RunControl::default();
        let waiter = control.clone();
        let wait = tokio::spawn(async move { waiter.wait_for_login(Duration::from_secs(60)).await });

        control.cancel();
        assert!(wait.await.unwrap());
        assert!(control.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_run_nobody_streams_is_forgotten() {
        let registry = RunRegistry::with_ttl(Duration::from_secs(60));
        let id = registry.launch(|handle| async move {
            handle
                .progress
                .finish(EventStatus::Success, "Campaign complete: 0 sent", Some(0));
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(registry.len(), 1, "events stay claimable for a while");
        assert!(registry.control(id).is_some());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(registry.len(), 0);
        assert!(registry.take_receiver(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receiver_returned_after_disconnect_expires_once_finished() {
        let registry = RunRegistry::with_ttl(Duration::from_secs(60));
        let handle = registry.start();
        let id = handle.id;

        // A subscriber leaves mid-run; a new one can pick the stream up
        let rx = registry.take_receiver(id);
        registry.release(id, rx);
        let rx = registry.take_receiver(id);
        assert!(rx.is_some());

        registry.finish(id);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(registry.len(), 1, "a live stream is never expired");

        registry.release(id, rx);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(registry.len(), 0);
    }
}
