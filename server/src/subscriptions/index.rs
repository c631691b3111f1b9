//! Lazy, page-at-a-time iteration over an entity's subscribers.

use super::{Registry, StoreError, SubscriptionIndex};

/// Finite sequence of subscriber pages for one entity key.
///
/// Nothing is fetched until [`next_page`](Self::next_page) is awaited, and only
/// one page is held at a time. A new sequence restarts from the first
/// subscriber; progress is not persisted anywhere.
pub struct SubscriberPages<'a> {
    index: &'a dyn SubscriptionIndex,
    registry: Registry,
    entity_key: String,
    page_size: usize,
    cursor: Option<String>,
    exhausted: bool,
}

impl<'a> SubscriberPages<'a> {
    pub fn new(
        index: &'a dyn SubscriptionIndex,
        registry: Registry,
        entity_key: &str,
        page_size: usize,
    ) -> Self {
        Self {
            index,
            registry,
            entity_key: entity_key.to_string(),
            page_size: page_size.max(1),
            cursor: None,
            exhausted: false,
        }
    }

    /// Fetch the next non-empty page, or `None` when the sequence is done.
    ///
    /// An error leaves the sequence exhausted; callers abandon this key.
    pub async fn next_page(&mut self) -> Result<Option<Vec<String>>, StoreError> {
        while !self.exhausted {
            let page = match self
                .index
                .fetch_page(
                    self.registry,
                    &self.entity_key,
                    self.cursor.as_deref(),
                    self.page_size,
                )
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    self.exhausted = true;
                    return Err(e);
                }
            };

            match page.next_cursor {
                Some(cursor) => self.cursor = Some(cursor),
                None => self.exhausted = true,
            }

            if !page.connection_ids.is_empty() {
                return Ok(Some(page.connection_ids));
            }
        }
        Ok(None)
    }
}
