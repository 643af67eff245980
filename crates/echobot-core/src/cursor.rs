use crate::domain::Batch;

/// Next-offset bookkeeping for the long-poll protocol.
///
/// Owned by the poll loop, which is its only writer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    next_offset: i64,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_offset(&self) -> i64 {
        self.next_offset
    }

    /// Move past every update in `batch`. Empty batches leave the cursor alone,
    /// and the offset is never lowered.
    pub fn advance(&mut self, batch: &Batch) {
        let Some(max_id) = batch.iter().map(|u| u.id.0).max() else {
            return;
        };
        self.next_offset = self.next_offset.max(max_id.saturating_add(1));
    }
}
