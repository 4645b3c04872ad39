use shared::protocol::{PageResult, DEFAULT_PAGE_LIMIT};

/// Page bookkeeping for the current query lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationState {
    pub current_page: u32,
    pub current_limit: u32,
    pub total: u64,
    pub total_pages: u32,
    pub last_batch_count: usize,
}

impl Default for PaginationState {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_LIMIT)
    }
}

/// Values to fall back on for metadata the server left out of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFallback {
    pub page: u32,
    pub total: u64,
}

impl PaginationState {
    pub fn new(limit: u32) -> Self {
        Self {
            current_page: 1,
            current_limit: limit,
            total: 0,
            total_pages: 0,
            last_batch_count: 0,
        }
    }

    pub fn effective_limit(&self) -> u32 {
        if self.current_limit == 0 {
            DEFAULT_PAGE_LIMIT
        } else {
            self.current_limit
        }
    }

    /// Folds a response into the state. `batch_len` is the number of events
    /// the response carried, independent of how many survived deduplication.
    pub fn record(&mut self, response: &PageResult, batch_len: usize, fallback: PageFallback) {
        self.last_batch_count = batch_len;
        self.total = response.total.unwrap_or(fallback.total);
        self.current_page = response.page.unwrap_or(fallback.page);
        self.current_limit = response.limit.unwrap_or(self.current_limit);
        self.total_pages = match (response.total_pages, response.total) {
            (Some(pages), _) => pages,
            (None, Some(total)) => {
                let limit = u64::from(self.current_limit.max(1));
                u32::try_from(total.div_ceil(limit)).unwrap_or(u32::MAX)
            }
            // Nothing reported by the server: leave it to the batch heuristic.
            (None, None) => 0,
        };
    }

    /// A full batch from a server that never reports totals is taken as
    /// "there may be more"; a short or empty batch ends the results.
    pub fn has_more(&self) -> bool {
        if self.total_pages > 0 {
            return self.current_page < self.total_pages;
        }
        let limit = usize::try_from(self.effective_limit()).unwrap_or(usize::MAX);
        self.last_batch_count > 0 && self.last_batch_count >= limit
    }
}
