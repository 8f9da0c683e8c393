use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{trace, warn};

use crate::error::{EventError, Result};
use crate::pool::{EventPool, PoolPolicy};
use crate::priority::Priority;

/// Identifier returned by [`EventScheduler::schedule`]. Never reused.
pub type EventId = u64;

/// Maximum number of dependencies a single event may declare.
pub const MAX_DEPENDENCIES: usize = 10;

/// Work carried by an event.
///
/// Actions are consumed when they run. A failed action is handed to the
/// scheduler's error sink; it never unwinds through the event loop.
pub trait Action: Send + 'static {
    type Error: fmt::Display + Send + 'static;

    fn execute(self) -> std::result::Result<(), Self::Error>;
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of events that may exist before the pool policy applies. Default: 32.
    pub pool_size: usize,
    /// What to do when the pool is full. Default: elastic.
    pub pool_policy: PoolPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: 32,
            pool_policy: PoolPolicy::Elastic,
        }
    }
}

/// An event popped from the scheduler, ready to execute.
pub struct Event<A> {
    id: EventId,
    slot: usize,
    priority: Priority,
    action: A,
}

impl<A> Event<A> {
    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn action(&self) -> &A {
        &self.action
    }
}

impl<A: fmt::Debug> fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("action", &self.action)
            .finish()
    }
}

struct Queued<A> {
    priority: Priority,
    action: A,
    deps: Vec<EventId>,
}

type OrderKey = (Reverse<Priority>, EventId);

struct Inner<A> {
    next_id: EventId,
    order: BTreeSet<OrderKey>,
    /// Queued event id to pool slot.
    slots: HashMap<EventId, usize>,
    pool: EventPool<Queued<A>>,
    stopping: bool,
}

impl<A> Inner<A> {
    fn queued(&self, id: EventId) -> Option<&Queued<A>> {
        self.slots.get(&id).and_then(|&slot| self.pool.get(slot))
    }

    fn pop(&mut self) -> Option<Event<A>> {
        let &(_, head) = self.order.iter().next()?;
        let id = self.resolve(head);
        let slot = self.slots.remove(&id)?;
        let queued = self.pool.detach(slot)?;
        self.order.remove(&(Reverse(queued.priority), id));
        Some(Event {
            id,
            slot,
            priority: queued.priority,
            action: queued.action,
        })
    }

    /// Follow the dependency chain from `id` down to an event with nothing
    /// left to wait for, pruning dependencies that have already run.
    ///
    /// Dependencies always have smaller ids than their dependents, so the
    /// chain is finite.
    fn resolve(&mut self, mut id: EventId) -> EventId {
        loop {
            let Some(queued) = self.queued(id) else {
                return id;
            };
            let pending: Vec<EventId> = queued
                .deps
                .iter()
                .copied()
                .filter(|dep| self.slots.contains_key(dep))
                .collect();
            let next = pending
                .iter()
                .filter_map(|dep| self.queued(*dep).map(|q| (Reverse(q.priority), *dep)))
                .min();
            if let Some(queued) = self
                .slots
                .get(&id)
                .copied()
                .and_then(|slot| self.pool.get_mut(slot))
            {
                queued.deps = pending;
            }
            match next {
                Some((_, dep)) => {
                    trace!(event = id, dependency = dep, "event waits on dependency");
                    id = dep;
                }
                None => return id,
            }
        }
    }
}

type ErrorSink<E> = Box<dyn Fn(EventId, E) + Send + Sync>;

/// Priority queue of deferred actions with inter-event dependencies.
///
/// Safe for any number of producers. Consumption is normally done by one
/// [`crate::EventLoop`]; tests may drive it with [`EventScheduler::run_until_idle`].
pub struct EventScheduler<A: Action> {
    inner: Mutex<Inner<A>>,
    ready: Condvar,
    on_error: ErrorSink<A::Error>,
}

impl<A: Action> EventScheduler<A> {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                order: BTreeSet::new(),
                slots: HashMap::with_capacity(config.pool_size),
                pool: EventPool::new(config.pool_size, config.pool_policy),
                stopping: false,
            }),
            ready: Condvar::new(),
            on_error: Box::new(|id: EventId, err: A::Error| {
                warn!(event = id, error = %err, "event failed");
            }),
        }
    }

    /// Replace the sink that receives errors from failed actions.
    pub fn with_error_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(EventId, A::Error) + Send + Sync + 'static,
    {
        self.on_error = Box::new(sink);
        self
    }

    /// Enqueue an action.
    ///
    /// `deps` must name events previously returned by this scheduler. Ids
    /// that are unknown or have already executed count as satisfied.
    pub fn schedule(&self, priority: Priority, action: A, deps: &[EventId]) -> Result<EventId> {
        if deps.len() > MAX_DEPENDENCIES {
            return Err(EventError::TooManyDependencies {
                count: deps.len(),
                max: MAX_DEPENDENCIES,
            });
        }

        let mut inner = self.lock();
        let deps: Vec<EventId> = deps
            .iter()
            .copied()
            .filter(|dep| inner.slots.contains_key(dep))
            .collect();
        let slot = inner.pool.insert(Queued {
            priority,
            action,
            deps,
        })?;

        let id = inner.next_id;
        inner.next_id += 1;
        inner.slots.insert(id, slot);
        inner.order.insert((Reverse(priority), id));
        drop(inner);

        trace!(event = id, %priority, "event scheduled");
        self.ready.notify_one();
        Ok(id)
    }

    /// Remove and return the next runnable event, if any.
    ///
    /// The returned event still holds its pool slot; pass it to
    /// [`EventScheduler::execute`] to run it and release the slot.
    pub fn pop(&self) -> Option<Event<A>> {
        self.lock().pop()
    }

    /// Run a popped event and give its pool slot back.
    pub fn execute(&self, event: Event<A>) {
        let Event {
            id,
            slot,
            priority,
            action,
        } = event;
        trace!(event = id, %priority, "event executing");
        if let Err(err) = action.execute() {
            (self.on_error)(id, err);
        }
        self.lock().pool.give_back(slot);
    }

    /// Number of queued events, excluding any currently executing.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current pool capacity (grows under the elastic policy).
    pub fn pool_capacity(&self) -> usize {
        self.lock().pool.capacity()
    }

    /// Execute events on the calling thread until the queue is empty.
    ///
    /// Returns the number of events executed. Events scheduled by the
    /// executed actions are run as well.
    pub fn run_until_idle(&self) -> usize {
        let mut executed = 0;
        while let Some(event) = self.pop() {
            self.execute(event);
            executed += 1;
        }
        executed
    }

    /// Block until an event is runnable or a stop was requested and the
    /// queue has drained. Returns `None` only in the latter case.
    pub(crate) fn wait_next(&self) -> Option<Event<A>> {
        let mut inner = self.lock();
        loop {
            if let Some(event) = inner.pop() {
                return Some(event);
            }
            if inner.stopping {
                return None;
            }
            inner = self
                .ready
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn set_stopping(&self, stopping: bool) {
        self.lock().stopping = stopping;
        self.ready.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, Inner<A>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A: Action> Default for EventScheduler<A> {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl<A: Action> fmt::Debug for EventScheduler<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("EventScheduler")
            .field("queued", &inner.slots.len())
            .field("pool", &inner.pool)
            .field("stopping", &inner.stopping)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Records its label into a shared log when executed.
    struct Record {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl Action for Record {
        type Error = String;

        fn execute(self) -> std::result::Result<(), String> {
            self.log.lock().unwrap().push(self.label);
            if self.fail {
                Err(format!("{} failed", self.label))
            } else {
                Ok(())
            }
        }
    }

    struct Harness {
        scheduler: EventScheduler<Record>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Harness {
        fn new(config: SchedulerConfig) -> Self {
            Self {
                scheduler: EventScheduler::new(config),
                log: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn add(&self, priority: Priority, label: &'static str, deps: &[EventId]) -> EventId {
            self.scheduler
                .schedule(
                    priority,
                    Record {
                        label,
                        log: Arc::clone(&self.log),
                        fail: false,
                    },
                    deps,
                )
                .unwrap()
        }

        fn run(&self) -> Vec<&'static str> {
            self.scheduler.run_until_idle();
            self.log.lock().unwrap().clone()
        }
    }

    #[test]
    fn higher_priority_first() {
        let h = Harness::new(SchedulerConfig::default());
        h.add(Priority::LOW, "low", &[]);
        h.add(Priority::MEDIUM, "medium", &[]);
        h.add(Priority::HIGH, "high", &[]);

        assert_eq!(h.run(), vec!["high", "medium", "low"]);
    }

    #[test]
    fn equal_priority_in_insertion_order() {
        let h = Harness::new(SchedulerConfig::default());
        for label in ["a", "b", "c", "d"] {
            h.add(Priority::MEDIUM, label, &[]);
        }
        assert_eq!(h.run(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn dependency_runs_before_dependent() {
        let h = Harness::new(SchedulerConfig::default());
        let dep = h.add(Priority::LOW, "dep", &[]);
        h.add(Priority::MEDIUM, "other", &[]);
        h.add(Priority::HIGH, "dependent", &[dep]);

        assert_eq!(h.run(), vec!["dep", "dependent", "other"]);
    }

    #[test]
    fn dependency_chain_resolves_transitively() {
        let h = Harness::new(SchedulerConfig::default());
        let a = h.add(Priority::LOW, "a", &[]);
        let b = h.add(Priority::LOW, "b", &[a]);
        h.add(Priority::LOW, "filler", &[]);
        h.add(Priority::HIGH, "c", &[b]);

        assert_eq!(h.run(), vec!["a", "b", "c", "filler"]);
    }

    #[test]
    fn unknown_and_executed_dependencies_are_satisfied() {
        let h = Harness::new(SchedulerConfig::default());
        let first = h.add(Priority::MEDIUM, "first", &[]);
        h.scheduler.run_until_idle();

        h.add(Priority::MEDIUM, "second", &[first, 9_999]);
        assert_eq!(h.run(), vec!["first", "second"]);
    }

    #[test]
    fn too_many_dependencies_rejected() {
        let h = Harness::new(SchedulerConfig::default());
        let deps: Vec<EventId> = (0..=MAX_DEPENDENCIES as EventId).collect();
        let err = h
            .scheduler
            .schedule(
                Priority::LOW,
                Record {
                    label: "x",
                    log: Arc::clone(&h.log),
                    fail: false,
                },
                &deps,
            )
            .unwrap_err();
        assert!(matches!(err, EventError::TooManyDependencies { .. }));
        assert!(h.scheduler.is_empty());
    }

    #[test]
    fn fixed_pool_exhaustion() {
        let h = Harness::new(SchedulerConfig {
            pool_size: 2,
            pool_policy: PoolPolicy::Fixed,
        });
        h.add(Priority::LOW, "a", &[]);
        h.add(Priority::LOW, "b", &[]);
        let err = h
            .scheduler
            .schedule(
                Priority::LOW,
                Record {
                    label: "c",
                    log: Arc::clone(&h.log),
                    fail: false,
                },
                &[],
            )
            .unwrap_err();
        assert!(matches!(err, EventError::PoolExhausted { capacity: 2 }));

        // Executing frees slots again.
        h.scheduler.run_until_idle();
        h.add(Priority::LOW, "c", &[]);
        assert_eq!(h.run(), vec!["a", "b", "c"]);
    }

    #[test]
    fn popped_event_holds_slot_until_executed() {
        let h = Harness::new(SchedulerConfig {
            pool_size: 1,
            pool_policy: PoolPolicy::Fixed,
        });
        h.add(Priority::LOW, "a", &[]);
        let event = h.scheduler.pop().unwrap();
        assert_eq!(h.scheduler.len(), 0);
        assert_eq!(event.action().label, "a");

        let blocked = h.scheduler.schedule(
            Priority::LOW,
            Record {
                label: "b",
                log: Arc::clone(&h.log),
                fail: false,
            },
            &[],
        );
        assert!(blocked.is_err());

        h.scheduler.execute(event);
        h.add(Priority::LOW, "b", &[]);
        assert_eq!(h.scheduler.len(), 1);
    }

    #[test]
    fn executed_slots_are_reused() {
        let h = Harness::new(SchedulerConfig {
            pool_size: 1,
            pool_policy: PoolPolicy::Fixed,
        });
        for _ in 0..100 {
            h.add(Priority::MEDIUM, "again", &[]);
            assert_eq!(h.scheduler.run_until_idle(), 1);
        }
        assert_eq!(h.scheduler.pool_capacity(), 1);
        assert_eq!(h.log.lock().unwrap().len(), 100);
    }

    #[test]
    fn elastic_pool_grows() {
        let h = Harness::new(SchedulerConfig {
            pool_size: 2,
            pool_policy: PoolPolicy::Elastic,
        });
        for label in ["a", "b", "c", "d", "e"] {
            h.add(Priority::LOW, label, &[]);
        }
        assert_eq!(h.scheduler.pool_capacity(), 8);
        assert_eq!(h.scheduler.len(), 5);
    }

    #[test]
    fn failed_action_goes_to_error_sink() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink_errors = Arc::clone(&errors);
        let log = Arc::new(Mutex::new(Vec::new()));
        let scheduler = EventScheduler::<Record>::new(SchedulerConfig::default())
            .with_error_sink(move |id, err: String| sink_errors.lock().unwrap().push((id, err)));

        let id = scheduler
            .schedule(
                Priority::MEDIUM,
                Record {
                    label: "boom",
                    log: Arc::clone(&log),
                    fail: true,
                },
                &[],
            )
            .unwrap();
        assert_eq!(scheduler.run_until_idle(), 1);
        assert_eq!(
            errors.lock().unwrap().as_slice(),
            &[(id, "boom failed".to_string())]
        );
    }
}
