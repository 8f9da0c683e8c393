use std::num::NonZeroU8;

/// Token identifying one outstanding important packet on a transport binding.
///
/// Zero is reserved for "no importance", so the type is non-zero by
/// construction and `Option<ImportanceId>` stays one byte wide.
pub type ImportanceId = NonZeroU8;

/// Round-robin allocator for importance ids (1..=255, skipping 0).
#[derive(Debug, Clone)]
pub struct ImportanceIds {
    next: NonZeroU8,
}

impl ImportanceIds {
    pub fn new() -> Self {
        Self {
            next: NonZeroU8::MIN,
        }
    }

    /// Hand out the next id, wrapping from 255 back to 1.
    pub fn next_id(&mut self) -> ImportanceId {
        let id = self.next;
        self.next = id.checked_add(1).unwrap_or(NonZeroU8::MIN);
        id
    }
}

impl Default for ImportanceIds {
    fn default() -> Self {
        Self::new()
    }
}
