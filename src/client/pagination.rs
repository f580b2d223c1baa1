//! Paged listings
//!
//! List endpoints answer with `{total, limit, items}`. [`Manager::get_items`]
//! walks pages from 1 until the collected length equals `total`.

use super::arguments::Arguments;
use super::error::{Error, Result};
use super::manager::Manager;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::value::RawValue;
use tracing::Instrument;

#[derive(Deserialize)]
struct PageEnvelope {
    total: usize,
    limit: usize,
    items: Box<RawValue>,
}

/// Accumulation state of a multi-page fetch
#[derive(Debug)]
pub struct PageCursor<T> {
    items: Vec<T>,
    page: usize,
    total: usize,
    limit: usize,
}

impl<T> Default for PageCursor<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            page: 1,
            total: 0,
            limit: 0,
        }
    }
}

impl<T> PageCursor<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current page number, 1-based
    pub fn page(&self) -> usize {
        self.page
    }

    pub fn collected(&self) -> usize {
        self.items.len()
    }

    /// Record the metadata of the page just fetched
    pub fn observe(&mut self, total: usize, limit: usize) {
        self.total = total;
        self.limit = limit;
    }

    /// Number of items the current page should hold
    pub fn expected_page_size(&self) -> usize {
        self.total
            .saturating_sub(self.limit.saturating_mul(self.page - 1))
            .min(self.limit)
    }

    /// Append one page, preserving server order
    pub fn push_page(&mut self, page: Vec<T>) {
        self.items.extend(page);
    }

    pub fn is_complete(&self) -> bool {
        self.items.len() == self.total
    }

    pub fn advance(&mut self) {
        self.page += 1;
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

impl Manager {
    /// Fetch every item of a paged listing.
    ///
    /// Any failing page aborts the whole fetch; nothing partial is returned.
    pub async fn get_items<T>(&self, path: &str, args: &Arguments) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        async {
            let mut cursor = PageCursor::<T>::new();

            loop {
                let page = cursor.page();
                let query = args.merged(&Arguments::new().with("page", page.to_string()));

                let envelope: PageEnvelope = self
                    .get(path, &query)
                    .await?
                    .ok_or_else(|| Error::EmptyResponse {
                        url: format!("{}?page={}", path, page),
                    })?;
                cursor.observe(envelope.total, envelope.limit);

                let expected = cursor.expected_page_size();
                let items: Vec<T> =
                    serde_json::from_str(envelope.items.get()).map_err(|source| Error::Decode {
                        url: format!("{}, page {}", path, page),
                        payload: envelope.items.get().to_string(),
                        source,
                    })?;

                if items.len() != expected {
                    tracing::warn!(
                        "[bcc] Page {} of {} has {} items, expected {}",
                        page,
                        path,
                        items.len(),
                        expected
                    );
                }

                let received = items.len();
                cursor.push_page(items);

                if cursor.is_complete() {
                    tracing::debug!("[bcc] Fetched {} items from {}", cursor.collected(), path);
                    return Ok(cursor.into_items());
                }

                if received == 0 || cursor.collected() > envelope.total {
                    return Err(Error::Pagination {
                        url: path.to_string(),
                        page,
                        collected: cursor.collected(),
                        total: envelope.total,
                    });
                }

                cursor.advance();
            }
        }
        .instrument(self.span().clone())
        .await
    }
}
