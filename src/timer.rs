use log::trace;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A single delayed action. Scheduling again replaces the pending one, so at
/// most one is ever armed.
#[derive(Debug, Default)]
pub struct ScheduledTask {
    name: &'static str,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduledTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            pending: Mutex::new(None),
        }
    }

    pub fn schedule<F>(&self, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });
        let previous = self
            .pending
            .lock()
            .expect("Mutex should not be poisoned")
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        trace!(target: "Timer", "Armed '{}' for {:?}", self.name, delay);
    }

    pub fn cancel(&self) {
        if let Some(handle) = self
            .pending
            .lock()
            .expect("Mutex should not be poisoned")
            .take()
        {
            handle.abort();
            trace!(target: "Timer", "Cancelled '{}'", self.name);
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending
            .lock()
            .expect("Mutex should not be poisoned")
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_pending_action() {
        let task = ScheduledTask::new("test");
        let fired = Arc::new(AtomicU32::new(0));

        let f = fired.clone();
        task.schedule(Duration::from_secs(3), async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(2)).await;

        let f = fired.clone();
        task.schedule(Duration::from_secs(3), async move {
            f.fetch_add(10, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
        assert!(!task.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let task = ScheduledTask::new("test");
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        task.schedule(Duration::from_secs(1), async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(task.is_armed());
        task.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
