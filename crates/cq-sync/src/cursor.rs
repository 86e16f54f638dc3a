use cq_adapters::Page;
use cq_storage::HttpFetcher;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

/// When a listing walk keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePolicy {
    pub limit: usize,
    /// Upstream pages occasionally report one item short of a full page.
    pub tolerance: usize,
    pub max_pages: Option<usize>,
}

impl PagePolicy {
    pub fn is_full_page(&self, items: usize) -> bool {
        items + self.tolerance >= self.limit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkStatus {
    Running,
    /// Short page or no `next` link.
    Exhausted,
    /// A page came back with no items.
    Empty,
    FetchFailed,
    PageLimitReached,
}

impl WalkStatus {
    /// The listing was read to its end.
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Exhausted | Self::Empty)
    }
}

/// Iterative pagination state for one listing walk; never persisted.
#[derive(Debug, Clone)]
pub struct PageCursor {
    next_url: Option<String>,
    items_key: &'static str,
    policy: PagePolicy,
    pages_fetched: usize,
    offset: usize,
    status: WalkStatus,
}

impl PageCursor {
    pub fn new(start_url: impl Into<String>, items_key: &'static str, policy: PagePolicy) -> Self {
        Self {
            next_url: Some(start_url.into()),
            items_key,
            policy,
            pages_fetched: 0,
            offset: 0,
            status: WalkStatus::Running,
        }
    }

    pub fn status(&self) -> WalkStatus {
        self.status
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Items yielded so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Fetch the next page's items, or `None` once the walk has ended.
    pub async fn next_page(&mut self, fetcher: &HttpFetcher) -> Option<Vec<JsonValue>> {
        if self.status != WalkStatus::Running {
            return None;
        }
        let Some(url) = self.next_url.take() else {
            self.status = WalkStatus::Exhausted;
            return None;
        };
        if let Some(max) = self.policy.max_pages {
            if self.pages_fetched >= max {
                warn!(max_pages = max, offset = self.offset, "page limit reached; stopping walk");
                self.status = WalkStatus::PageLimitReached;
                return None;
            }
        }

        let Some(body) = fetcher.fetch_json(&url).await else {
            self.status = WalkStatus::FetchFailed;
            return None;
        };
        self.pages_fetched += 1;

        let page = Page::parse(&body, self.items_key);
        if page.items.is_empty() {
            debug!(page = self.pages_fetched, "empty page; walk complete");
            self.status = WalkStatus::Empty;
            return None;
        }

        self.offset += page.items.len();
        match page.next {
            Some(next) if self.policy.is_full_page(page.items.len()) => {
                self.next_url = Some(next);
            }
            _ => self.status = WalkStatus::Exhausted,
        }
        debug!(
            page = self.pages_fetched,
            items = page.items.len(),
            offset = self.offset,
            more = self.next_url.is_some(),
            "page fetched"
        );
        Some(page.items)
    }
}
