use log::{debug, error};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A named background thread that runs a job on a fixed interval until stopped.
///
/// The first run happens one full interval after spawning. Stopping wakes the
/// thread immediately and joins it, so no tick fires after `stop` returns.
pub struct PeriodicTask {
    name: String,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    pub fn spawn<F>(name: &str, interval: Duration, mut job: F) -> PeriodicTask
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => job(),
                    // explicit stop or the owner dropped the sender
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        debug!("Periodic task {thread_name} exiting");
                        break;
                    }
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Failed to spawn periodic task {name}: {e}");
                None
            }
        };

        PeriodicTask {
            name: name.to_string(),
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the task and wait for it to finish. Safe to call twice.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            // a task stopping itself from inside its own job must not join itself
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("Periodic task {} panicked", self.name);
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_task_ticks_until_stopped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let ticks = Arc::clone(&counter);
        let mut task = PeriodicTask::spawn("test-ticker", Duration::from_millis(10), move || {
            ticks.fetch_add(1, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(120));
        task.stop();
        let after_stop = counter.load(Ordering::SeqCst);
        assert!(after_stop >= 2);
        assert!(!task.is_running());

        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_stop_is_idempotent_and_prompt() {
        let mut task = PeriodicTask::spawn("slow-ticker", Duration::from_secs(3600), || {});
        assert!(task.is_running());
        let started = std::time::Instant::now();
        task.stop();
        task.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
