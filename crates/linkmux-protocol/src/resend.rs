//! Retransmission of important packets.
//!
//! A transport binding registers every important frame it writes. A timer
//! thread waits for the earliest deadline and rewrites overdue frames
//! byte-for-byte with a fresh deadline. When a frame runs out of retries it
//! is dropped and its connection is closed as unrecoverable.

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use linkmux_transport::{ImportanceId, ImportanceIds, TransportError};
use tracing::{debug, trace, warn};

use crate::config::ResendConfig;
use crate::connection::{Connection, WeakConnection};
use crate::error::{ProtocolError, Result};

/// One outstanding important packet.
#[derive(Debug, Clone)]
pub struct ResendEntry {
    pub frame: Bytes,
    pub connection: WeakConnection,
    pub retries_left: u32,
    pub deadline: Instant,
}

struct Inner {
    entries: BTreeMap<ImportanceId, ResendEntry>,
    ids: ImportanceIds,
    stopped: bool,
}

/// Work found by one timer pass, carried out after the lock is released.
enum Due {
    Resend(ImportanceId, Bytes),
    Exhausted(ImportanceId, WeakConnection),
}

/// Outstanding important packets of one transport binding.
pub struct ResendRegistry {
    config: ResendConfig,
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl ResendRegistry {
    pub fn new(config: ResendConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: BTreeMap::new(),
                ids: ImportanceIds::new(),
                stopped: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn config(&self) -> &ResendConfig {
        &self.config
    }

    /// Track an important frame about to be written and return its
    /// importance id. Fails without side effects when every id is taken.
    pub fn register(
        &self,
        frame: Bytes,
        connection: &Connection,
    ) -> linkmux_transport::Result<ImportanceId> {
        let mut inner = self.lock();
        let outstanding = inner.entries.len();
        if outstanding >= usize::from(u8::MAX) {
            return Err(TransportError::ImportanceIdsExhausted { outstanding });
        }
        let id = loop {
            let candidate = inner.ids.next_id();
            if !inner.entries.contains_key(&candidate) {
                break candidate;
            }
        };
        inner.entries.insert(
            id,
            ResendEntry {
                frame,
                connection: connection.downgrade(),
                retries_left: self.config.retries,
                deadline: Instant::now() + self.config.timeout,
            },
        );
        drop(inner);

        trace!(importance_id = id.get(), "important packet registered");
        self.changed.notify_all();
        Ok(id)
    }

    /// Forget an acknowledged packet. Returns whether it was outstanding.
    pub fn remove(&self, id: ImportanceId) -> bool {
        let removed = self.lock().entries.remove(&id).is_some();
        if removed {
            trace!(importance_id = id.get(), "important packet released");
        }
        removed
    }

    pub fn contains(&self, id: ImportanceId) -> bool {
        self.lock().entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the timer and abandon every outstanding entry.
    pub fn stop(&self) {
        let mut inner = self.lock();
        inner.stopped = true;
        inner.entries.clear();
        drop(inner);
        self.changed.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Timer loop: runs until [`ResendRegistry::stop`].
    ///
    /// `resend` rewrites one frame; a failed rewrite is logged and retried
    /// at the next deadline like a lost packet.
    pub fn run<F>(&self, mut resend: F)
    where
        F: FnMut(&Bytes) -> Result<()>,
    {
        loop {
            let due = {
                let mut inner = self.lock();
                loop {
                    if inner.stopped {
                        return;
                    }
                    let now = Instant::now();
                    match inner.entries.values().map(|e| e.deadline).min() {
                        Some(deadline) if deadline <= now => break,
                        Some(deadline) => {
                            inner = self
                                .changed
                                .wait_timeout(inner, deadline - now)
                                .unwrap_or_else(PoisonError::into_inner)
                                .0;
                        }
                        None => {
                            inner = self
                                .changed
                                .wait(inner)
                                .unwrap_or_else(PoisonError::into_inner);
                        }
                    }
                }
                self.collect_due(&mut inner)
            };

            for item in due {
                match item {
                    Due::Resend(id, frame) => {
                        debug!(importance_id = id.get(), "resending important packet");
                        if let Err(err) = resend(&frame) {
                            warn!(importance_id = id.get(), error = %err, "resend failed");
                        }
                    }
                    Due::Exhausted(id, connection) => {
                        let Some(connection) = connection.upgrade() else {
                            continue;
                        };
                        let err = ProtocolError::Unacknowledged {
                            id,
                            retries: self.config.retries,
                        };
                        warn!(
                            connection = connection.id(),
                            importance_id = id.get(),
                            "important packet never acknowledged, closing connection"
                        );
                        connection.report(&err);
                        if let Err(err) = connection.close() {
                            connection.report(&err);
                        }
                    }
                }
            }
        }
    }

    fn collect_due(&self, inner: &mut Inner) -> Vec<Due> {
        let now = Instant::now();
        let mut due = Vec::new();
        let mut exhausted = Vec::new();

        for (id, entry) in inner.entries.iter_mut() {
            if entry.deadline > now {
                continue;
            }
            if entry.retries_left == 0 {
                exhausted.push(*id);
                continue;
            }
            entry.retries_left -= 1;
            entry.deadline = now + self.config.timeout;
            due.push(Due::Resend(*id, entry.frame.clone()));
        }
        for id in exhausted {
            if let Some(entry) = inner.entries.remove(&id) {
                due.push(Due::Exhausted(id, entry.connection));
            }
        }
        due
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ResendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResendRegistry")
            .field("config", &self.config)
            .field("outstanding", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::connection::{ConnectionState, Scheduler};
    use crate::transport::Transport;

    struct Sink;

    impl Transport for Sink {
        fn write(
            &self,
            _frame: Bytes,
            _important: bool,
            _connection: &Connection,
        ) -> linkmux_transport::Result<Option<ImportanceId>> {
            Ok(None)
        }

        fn ack(&self, _id: ImportanceId, _connection: &Connection) {}

        fn on_connection_open(&self, _connection: &Connection) -> linkmux_transport::Result<()> {
            Ok(())
        }

        fn on_connection_close(&self, _connection: &Connection) {}
    }

    fn connection() -> (Arc<Scheduler>, Connection) {
        let scheduler = Arc::new(Scheduler::default());
        let conn = Connection::open(Arc::clone(&scheduler), Arc::new(Sink), None)
            .expect("connection should open");
        (scheduler, conn)
    }

    fn fast(retries: u32) -> ResendConfig {
        ResendConfig {
            timeout: Duration::from_millis(15),
            retries,
        }
    }

    #[test]
    fn ids_are_unique_while_outstanding() {
        let (_scheduler, conn) = connection();
        let registry = ResendRegistry::new(ResendConfig::default());

        let a = registry.register(Bytes::from_static(b"a"), &conn).expect("id");
        let b = registry.register(Bytes::from_static(b"b"), &conn).expect("id");
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(a));
        assert!(!registry.remove(a), "second release is a no-op");
        assert!(!registry.contains(a));
        assert!(registry.contains(b));
    }

    #[test]
    fn all_ids_outstanding_is_reported() {
        let (_scheduler, conn) = connection();
        let registry = ResendRegistry::new(ResendConfig::default());
        for _ in 0..u8::MAX {
            registry.register(Bytes::new(), &conn).expect("id");
        }
        let err = registry
            .register(Bytes::new(), &conn)
            .expect_err("ids exhausted");
        assert!(matches!(err, TransportError::ImportanceIdsExhausted { outstanding: 255 }));
    }

    #[test]
    fn overdue_frames_are_resent_then_abandoned() {
        let (scheduler, conn) = connection();
        let registry = Arc::new(ResendRegistry::new(fast(2)));
        registry
            .register(Bytes::from_static(b"frame"), &conn)
            .expect("id");

        let resent = Arc::new(Mutex::new(Vec::new()));
        let timer = {
            let registry = Arc::clone(&registry);
            let resent = Arc::clone(&resent);
            thread::spawn(move || {
                registry.run(|frame| {
                    resent.lock().expect("resent lock").push(frame.clone());
                    Ok(())
                })
            })
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while !registry.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(registry.is_empty(), "entry should run out of retries");

        // Exhaustion asks the connection to close.
        let closing = Instant::now() + Duration::from_secs(5);
        while scheduler.len() == 0 && Instant::now() < closing {
            thread::sleep(Duration::from_millis(5));
        }
        scheduler.run_until_idle();
        assert_eq!(conn.state(), ConnectionState::Closed);

        registry.stop();
        timer.join().expect("timer thread should exit");
        assert_eq!(
            *resent.lock().expect("resent lock"),
            vec![Bytes::from_static(b"frame"); 2]
        );
    }

    #[test]
    fn stop_abandons_outstanding_entries() {
        let (_scheduler, conn) = connection();
        let registry = Arc::new(ResendRegistry::new(ResendConfig::default()));
        registry.register(Bytes::from_static(b"x"), &conn).expect("id");

        let timer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.run(|_| Ok(())))
        };
        registry.stop();
        timer.join().expect("timer thread should exit");

        assert!(registry.is_stopped());
        assert!(registry.is_empty());
    }
}
