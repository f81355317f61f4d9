use std::sync::Arc;

use tracing::debug;

use super::{PageFetcher, RemoteItem, Resource};
use crate::context::RunContext;
use crate::error::FetchError;

/// One fetched batch plus whether it was the resource's last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub offset: u32,
    pub items: Vec<RemoteItem>,
    pub exhausted: bool,
}

impl Page {
    /// A page is final exactly when it came back shorter than requested.
    pub fn new(offset: u32, requested: u32, items: Vec<RemoteItem>) -> Self {
        let exhausted = items.len() < requested as usize;
        Self {
            offset,
            items,
            exhausted,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Ready { offset: u32 },
    Exhausted,
    Failed,
}

/// Forward-only walk over every page of one resource: offsets 0, n, 2n, ...
/// until a short page. Once exhausted or failed it never fetches again.
pub struct PageCursor {
    fetcher: Arc<dyn PageFetcher>,
    resource: Resource,
    page_size: u32,
    state: CursorState,
}

impl PageCursor {
    pub fn new(fetcher: Arc<dyn PageFetcher>, resource: Resource, page_size: u32) -> Self {
        Self {
            fetcher,
            resource,
            page_size: page_size.max(1),
            state: CursorState::Ready { offset: 0 },
        }
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    /// Offset of the next request, `None` once the cursor is finished.
    pub fn offset(&self) -> Option<u32> {
        match self.state {
            CursorState::Ready { offset } => Some(offset),
            CursorState::Exhausted | CursorState::Failed => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.state == CursorState::Failed
    }

    /// Fetch the next page. `Ok(None)` once the resource is exhausted or after
    /// an earlier error killed the cursor.
    pub async fn next_page(&mut self, ctx: &RunContext) -> Result<Option<Page>, FetchError> {
        let CursorState::Ready { offset } = self.state else {
            return Ok(None);
        };

        let fetched = ctx
            .guard(self.fetcher.fetch_page(self.resource, offset, self.page_size))
            .await
            .map_err(FetchError::from)
            .and_then(|res| res);
        let items = match fetched {
            Ok(items) => items,
            Err(err) => {
                self.state = CursorState::Failed;
                return Err(err);
            }
        };

        let page = Page::new(offset, self.page_size, items);
        self.state = if page.exhausted {
            CursorState::Exhausted
        } else {
            match offset.checked_add(self.page_size) {
                Some(next) => CursorState::Ready { offset: next },
                None => CursorState::Exhausted,
            }
        };
        debug!(
            resource = %self.resource,
            offset,
            items = page.len(),
            exhausted = page.exhausted,
            "page fetched"
        );
        Ok(Some(page))
    }
}
