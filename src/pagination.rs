//! Cursor-based retrieval of complete collections from paged list endpoints
//!
//! The Backlog API never reports a total count, so a collection is exhausted
//! once a page comes back shorter than the requested page size.

use anyhow::Result;
use std::fmt;
use std::future::Future;

use crate::config::MAX_PAGE_SIZE;

/// Items carrying a numeric id, used to advance id-based cursors
pub trait Identified {
    fn id(&self) -> u64;
}

/// Position of the next page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// Numeric offset, advanced by the page size each round
    Offset(u64),
    /// Minimum id (inclusive), omitted on the first request
    MinId(Option<u64>),
}

impl Cursor {
    fn advance<T: Identified>(self, page: &[T], page_size: usize) -> Cursor {
        match self {
            Cursor::Offset(offset) => Cursor::Offset(offset + page_size as u64),
            Cursor::MinId(previous) => {
                let next = page.iter().map(Identified::id).max().map(|id| id + 1);
                Cursor::MinId(next.or(previous))
            }
        }
    }
}

/// Items gathered before a page request failed
pub struct PartialPages<T> {
    pub items: Vec<T>,
    pub error: anyhow::Error,
}

impl<T> fmt::Debug for PartialPages<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialPages")
            .field("items", &self.items.len())
            .field("error", &self.error)
            .finish()
    }
}

/// Repeats list requests until a short page signals the end of the collection
#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    page_size: usize,
    max_items: Option<usize>,
}

impl Paginator {
    /// `page_size` is clamped to the server's per-request cap
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            max_items: None,
        }
    }

    /// Stop once this many items have been collected
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fetch every page starting at `start`.
    ///
    /// `fetch_page` receives the cursor and page size for each request. On a
    /// failed request the items collected so far are handed back with the error.
    pub async fn fetch_all<T, F, Fut>(
        &self,
        start: Cursor,
        mut fetch_page: F,
    ) -> std::result::Result<Vec<T>, PartialPages<T>>
    where
        T: Identified,
        F: FnMut(Cursor, usize) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let mut items = Vec::new();
        let mut cursor = start;

        loop {
            let page = match fetch_page(cursor, self.page_size).await {
                Ok(page) => page,
                Err(error) => return Err(PartialPages { items, error }),
            };

            let received = page.len();
            cursor = cursor.advance(&page, self.page_size);
            items.extend(page);

            if let Some(max) = self.max_items {
                if items.len() >= max {
                    items.truncate(max);
                    break;
                }
            }

            if received < self.page_size {
                break;
            }
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Item(u64);

    impl Identified for Item {
        fn id(&self) -> u64 {
            self.0
        }
    }

    fn collection(total: u64) -> Vec<Item> {
        (1..=total).map(Item).collect()
    }

    fn serve_offset(all: &[Item], cursor: Cursor, size: usize) -> Vec<Item> {
        match cursor {
            Cursor::Offset(offset) => all.iter().skip(offset as usize).take(size).cloned().collect(),
            Cursor::MinId(_) => panic!("unexpected cursor {:?}", cursor),
        }
    }

    fn serve_min_id(all: &[Item], cursor: Cursor, size: usize) -> Vec<Item> {
        match cursor {
            Cursor::MinId(min) => all
                .iter()
                .filter(|item| min.map_or(true, |m| item.0 >= m))
                .take(size)
                .cloned()
                .collect(),
            Cursor::Offset(_) => panic!("unexpected cursor {:?}", cursor),
        }
    }

    #[tokio::test]
    async fn test_offset_pagination_terminates_on_short_page() {
        let all = collection(250);
        let requests = Mutex::new(Vec::new());

        let items = Paginator::new(100)
            .fetch_all(Cursor::Offset(0), |cursor, size| {
                requests.lock().unwrap().push(cursor);
                let page = serve_offset(&all, cursor, size);
                async move { Ok::<_, anyhow::Error>(page) }
            })
            .await
            .unwrap();

        assert_eq!(items, all);
        assert_eq!(
            *requests.lock().unwrap(),
            vec![Cursor::Offset(0), Cursor::Offset(100), Cursor::Offset(200)]
        );
    }

    #[tokio::test]
    async fn test_min_id_cursor_follows_last_id() {
        let all: Vec<Item> = (0..230).map(|n| Item(10 + n * 3)).collect();
        let requests = Mutex::new(Vec::new());

        let items = Paginator::new(100)
            .fetch_all(Cursor::MinId(None), |cursor, size| {
                requests.lock().unwrap().push(cursor);
                let page = serve_min_id(&all, cursor, size);
                async move { Ok::<_, anyhow::Error>(page) }
            })
            .await
            .unwrap();

        assert_eq!(items.len(), 230);
        let requests = requests.lock().unwrap();
        assert_eq!(requests[0], Cursor::MinId(None));
        assert_eq!(requests[1], Cursor::MinId(Some(all[99].0 + 1)));
        assert_eq!(requests[2], Cursor::MinId(Some(all[199].0 + 1)));
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_first_page_is_empty_collection() {
        let items: Vec<Item> = Paginator::new(100)
            .fetch_all(Cursor::Offset(0), |_, _| async { Ok::<_, anyhow::Error>(Vec::new()) })
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_max_items_truncates() {
        let all = collection(450);
        let calls = Mutex::new(0);

        let items = Paginator::new(100)
            .with_max_items(150)
            .fetch_all(Cursor::Offset(0), |cursor, size| {
                *calls.lock().unwrap() += 1;
                let page = serve_offset(&all, cursor, size);
                async move { Ok::<_, anyhow::Error>(page) }
            })
            .await
            .unwrap();

        assert_eq!(items.len(), 150);
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failure_returns_partial_items() {
        let all = collection(300);

        let result = Paginator::new(100)
            .fetch_all(Cursor::Offset(0), |cursor, size| {
                let page = serve_offset(&all, cursor, size);
                async move {
                    if cursor == Cursor::Offset(100) {
                        Err(anyhow!("boom"))
                    } else {
                        Ok(page)
                    }
                }
            })
            .await;

        let partial = result.unwrap_err();
        assert_eq!(partial.items.len(), 100);
        assert_eq!(partial.error.to_string(), "boom");
    }

    #[test]
    fn test_page_size_is_clamped() {
        assert_eq!(Paginator::new(1000).page_size(), 100);
        assert_eq!(Paginator::new(0).page_size(), 1);
    }
}
