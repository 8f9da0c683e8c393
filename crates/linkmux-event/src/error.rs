/// Errors that can occur while scheduling events.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The event pool is full and configured not to grow.
    #[error("event pool exhausted ({capacity} events in use)")]
    PoolExhausted { capacity: usize },

    /// More dependencies than an event can carry.
    #[error("too many event dependencies ({count}, max {max})")]
    TooManyDependencies { count: usize, max: usize },

    /// The event loop worker thread could not be started.
    #[error("failed to spawn event loop thread: {0}")]
    Spawn(std::io::Error),
}

pub type Result<T> = std::result::Result<T, EventError>;
