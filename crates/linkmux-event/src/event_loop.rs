use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::{EventError, Result};
use crate::scheduler::{Action, EventScheduler};

/// Worker thread that executes events from one scheduler.
///
/// This is the only thread that runs protocol actions. Stopping the loop
/// lets it drain every event already queued (including events those events
/// schedule) before the thread exits, so in-flight close handshakes finish.
pub struct EventLoop<A: Action> {
    scheduler: Arc<EventScheduler<A>>,
    worker: Option<JoinHandle<usize>>,
}

impl<A: Action> EventLoop<A> {
    /// Spawn the worker thread.
    pub fn start(scheduler: Arc<EventScheduler<A>>) -> Result<Self> {
        scheduler.set_stopping(false);
        let worker_scheduler = Arc::clone(&scheduler);
        let worker = thread::Builder::new()
            .name("linkmux-events".into())
            .spawn(move || {
                let mut executed = 0usize;
                while let Some(event) = worker_scheduler.wait_next() {
                    worker_scheduler.execute(event);
                    executed += 1;
                }
                executed
            })
            .map_err(EventError::Spawn)?;

        debug!("event loop started");
        Ok(Self {
            scheduler,
            worker: Some(worker),
        })
    }

    pub fn scheduler(&self) -> &Arc<EventScheduler<A>> {
        &self.scheduler
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Ask the loop to finish, drain the queue and join the worker.
    ///
    /// Returns the number of events the worker executed over its lifetime.
    /// Calling `stop` from inside an action would deadlock, so it is refused.
    pub fn stop(&mut self) -> usize {
        let Some(worker) = self.worker.take() else {
            return 0;
        };
        if worker.thread().id() == thread::current().id() {
            warn!("event loop stop requested from its own worker; ignoring");
            self.worker = Some(worker);
            return 0;
        }

        self.scheduler.set_stopping(true);
        match worker.join() {
            Ok(executed) => {
                debug!(executed, "event loop stopped");
                executed
            }
            Err(_) => {
                warn!("event loop worker panicked");
                0
            }
        }
    }
}

impl<A: Action> Drop for EventLoop<A> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::priority::Priority;
    use crate::scheduler::SchedulerConfig;

    struct Notify(mpsc::Sender<u32>, u32);

    impl Action for Notify {
        type Error = std::convert::Infallible;

        fn execute(self) -> std::result::Result<(), Self::Error> {
            let _ = self.0.send(self.1);
            Ok(())
        }
    }

    #[test]
    fn executes_scheduled_events() {
        let scheduler = Arc::new(EventScheduler::new(SchedulerConfig::default()));
        let mut event_loop = EventLoop::start(Arc::clone(&scheduler)).unwrap();
        assert!(event_loop.is_running());

        let (tx, rx) = mpsc::channel();
        scheduler
            .schedule(Priority::MEDIUM, Notify(tx.clone(), 1), &[])
            .unwrap();
        scheduler.schedule(Priority::MEDIUM, Notify(tx, 2), &[]).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 2);
        assert_eq!(event_loop.stop(), 2);
        assert!(!event_loop.is_running());
    }

    #[test]
    fn stop_drains_queue() {
        let scheduler = Arc::new(EventScheduler::new(SchedulerConfig::default()));
        let (tx, rx) = mpsc::channel();
        for i in 0..16 {
            scheduler
                .schedule(Priority::LOW, Notify(tx.clone(), i), &[])
                .unwrap();
        }

        let mut event_loop = EventLoop::start(Arc::clone(&scheduler)).unwrap();
        event_loop.stop();

        let received: Vec<u32> = rx.try_iter().collect();
        assert_eq!(received, (0..16).collect::<Vec<_>>());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn stop_twice_is_harmless() {
        let scheduler: Arc<EventScheduler<Notify>> =
            Arc::new(EventScheduler::new(SchedulerConfig::default()));
        let mut event_loop = EventLoop::start(scheduler).unwrap();
        event_loop.stop();
        assert_eq!(event_loop.stop(), 0);
    }
}
