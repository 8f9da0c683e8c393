use std::fmt;

use crate::error::{EventError, Result};

/// How the event pool reacts when every slot is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolPolicy {
    /// Reject new events with [`EventError::PoolExhausted`].
    Fixed,
    /// Double the capacity and carry on.
    #[default]
    Elastic,
}

enum Slot<T> {
    Free,
    /// Reserved. The value is `None` once it has been detached for execution.
    Held(Option<T>),
}

/// Reusable slot storage for events.
///
/// [`EventPool::insert`] places a value in a free slot (reusing returned
/// slots first), [`EventPool::detach`] moves it out while keeping the slot
/// reserved, and [`EventPool::give_back`] clears the slot for reuse. Queued
/// and executing events therefore both count against capacity.
pub struct EventPool<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    capacity: usize,
    policy: PoolPolicy,
}

impl<T> EventPool<T> {
    pub fn new(capacity: usize, policy: PoolPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::with_capacity(capacity),
            capacity,
            policy,
        }
    }

    /// Store `value` and return the index of its slot.
    pub fn insert(&mut self, value: T) -> Result<usize> {
        if let Some(index) = self.free.pop() {
            self.slots[index] = Slot::Held(Some(value));
            return Ok(index);
        }

        if self.slots.len() >= self.capacity {
            match self.policy {
                PoolPolicy::Fixed => {
                    return Err(EventError::PoolExhausted {
                        capacity: self.capacity,
                    })
                }
                PoolPolicy::Elastic => {
                    self.capacity *= 2;
                    self.slots.reserve(self.capacity - self.slots.len());
                    tracing::debug!(capacity = self.capacity, "event pool grown");
                }
            }
        }
        self.slots.push(Slot::Held(Some(value)));
        Ok(self.slots.len() - 1)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        match self.slots.get(index) {
            Some(Slot::Held(value)) => value.as_ref(),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        match self.slots.get_mut(index) {
            Some(Slot::Held(value)) => value.as_mut(),
            _ => None,
        }
    }

    /// Move the value out. The slot stays reserved until [`EventPool::give_back`].
    pub fn detach(&mut self, index: usize) -> Option<T> {
        match self.slots.get_mut(index) {
            Some(Slot::Held(value)) => value.take(),
            _ => None,
        }
    }

    /// Clear a slot and make it available again.
    pub fn give_back(&mut self, index: usize) {
        match self.slots.get_mut(index) {
            Some(slot) if matches!(slot, Slot::Held(_)) => {
                *slot = Slot::Free;
                self.free.push(index);
            }
            _ => tracing::warn!(slot = index, "event pool slot returned twice"),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently reserved.
    pub fn in_use(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn policy(&self) -> PoolPolicy {
        self.policy
    }
}

impl<T> fmt::Debug for EventPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPool")
            .field("capacity", &self.capacity)
            .field("in_use", &self.in_use())
            .field("policy", &self.policy)
            .finish()
    }
}
