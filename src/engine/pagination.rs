//! Offset bookkeeping for backward paging through history.

/// Current history window of a scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    offset: u64,
    limit: u32,
}

impl Pagination {
    pub fn new(limit: u32) -> Self {
        Self { offset: 0, limit }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// 1-based page number.
    pub fn page_number(&self) -> u64 {
        self.offset / u64::from(self.limit.max(1)) + 1
    }

    /// Offset of the next (older) page, if there may be one.
    pub fn next_offset(&self, has_more: bool) -> Option<u64> {
        has_more.then(|| self.offset + u64::from(self.limit))
    }

    /// Offset of the previous (newer) page, or None at the first page.
    pub fn prev_offset(&self) -> Option<u64> {
        (self.offset > 0).then(|| self.offset.saturating_sub(u64::from(self.limit)))
    }

    pub fn move_to(&mut self, offset: u64) {
        self.offset = offset;
    }

    pub fn reset(&mut self) {
        self.offset = 0;
    }
}
