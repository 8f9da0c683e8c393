use std::fmt;

/// Scheduling priority of an event. Higher values run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

impl Priority {
    /// Teardown work that should yield to everything else.
    pub const LOW: Priority = Priority(20);
    /// Application requests and inbound message handling.
    pub const MEDIUM: Priority = Priority(125);
    /// Work that unblocks a waiting channel, such as the next important send.
    pub const HIGH: Priority = Priority(235);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::MEDIUM
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Priority::LOW => f.write_str("low"),
            Priority::MEDIUM => f.write_str("medium"),
            Priority::HIGH => f.write_str("high"),
            Priority(other) => write!(f, "{other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(Priority::HIGH > Priority::MEDIUM);
        assert!(Priority::MEDIUM > Priority::LOW);
        assert_eq!(Priority::default(), Priority::MEDIUM);
    }

    #[test]
    fn display_names_levels() {
        assert_eq!(Priority::HIGH.to_string(), "high");
        assert_eq!(Priority(7).to_string(), "7");
    }
}
