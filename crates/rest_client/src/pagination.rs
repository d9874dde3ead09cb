//! Cursor pagination over the authority's list endpoints.
//!
//! Cursors are opaque continuation tokens scoped to the query that produced
//! them; this module never inspects or constructs one, it only carries the
//! token between requests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// One page of a cursor-paginated listing. An absent `next_page` cursor
/// signals end-of-list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_page: Option<String>,
}

impl<T> CursorPage<T> {
    pub fn end_of_list(&self) -> bool {
        self.next_page.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub size: u32,
}

impl PageQuery {
    pub fn first(size: u32) -> Self {
        Self { cursor: None, size }
    }

    pub fn after(cursor: impl Into<String>, size: u32) -> Self {
        Self {
            cursor: Some(cursor.into()),
            size,
        }
    }
}

impl Default for PageQuery {
    fn default() -> Self {
        Self::first(DEFAULT_PAGE_SIZE)
    }
}

/// One listing query; implementations bind the endpoint and any fixed
/// parameters (e.g. the chat a message history belongs to).
#[async_trait]
pub trait FetchPage: Send + Sync {
    type Item;

    async fn fetch(&self, query: &PageQuery) -> Result<CursorPage<Self::Item>>;
}

/// Walks one listing front to back, carrying the opaque cursor between calls.
pub struct Paginator<F: FetchPage> {
    fetcher: F,
    size: u32,
    cursor: Option<String>,
    started: bool,
    done: bool,
}

impl<F: FetchPage> Paginator<F> {
    pub fn new(fetcher: F, size: u32) -> Self {
        Self {
            fetcher,
            size,
            cursor: None,
            started: false,
            done: false,
        }
    }

    /// Fetches the next page, or `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<F::Item>>> {
        if self.done {
            return Ok(None);
        }
        let query = match self.cursor.take() {
            Some(cursor) => PageQuery::after(cursor, self.size),
            None if !self.started => PageQuery::first(self.size),
            None => return Ok(None),
        };
        self.started = true;
        let page = self.fetcher.fetch(&query).await?;
        self.done = page.end_of_list();
        self.cursor = page.next_page;
        Ok(Some(page.items))
    }

    pub fn is_exhausted(&self) -> bool {
        self.done
    }
}
