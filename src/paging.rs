//! Paged upstream listings and the bounded collector that drains them.
//!
//! Datto RMM listing endpoints return one page at a time:
//!
//! ```json
//! { "pageDetails": { "count": 250, "nextPageUrl": "https://..." }, "devices": [ ... ] }
//! ```
//!
//! The client turns these into a lazy stream of items (see
//! [`DattoClient`](crate::client::DattoClient)). [`collect_bounded`] pulls from
//! such a stream until it has `max` items or the stream ends, so no page past
//! the one holding item `max` is ever requested.

use futures::{Stream, StreamExt, TryStreamExt};
use serde_json::Value;

/// Default number of items returned by listing tools.
pub const DEFAULT_MAX: usize = 50;

/// Drain at most `max` items from `stream`, preserving order.
///
/// Stops polling as soon as `max` items are held; `max == 0` never polls.
/// The first error from the stream is returned and the items gathered so far
/// are dropped.
pub async fn collect_bounded<S, T, E>(stream: S, max: usize) -> Result<Vec<T>, E>
where
    S: Stream<Item = Result<T, E>>,
{
    if max == 0 {
        return Ok(Vec::new());
    }
    stream.take(max).try_collect().await
}

/// One page of a paged listing.
#[derive(Debug)]
pub struct Page {
    pub items: Vec<Value>,
    /// Absolute URL of the next page, `None` on the last page.
    pub next_page_url: Option<String>,
}

impl Page {
    /// Split a raw page body into its items (under `items_key`) and next-page link.
    ///
    /// A missing or non-array `items_key` yields an empty page rather than an
    /// error; an empty or null `nextPageUrl` ends the listing.
    pub fn from_value(mut body: Value, items_key: &str) -> Page {
        let next_page_url = body
            .pointer("/pageDetails/nextPageUrl")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(String::from);

        let items = match body.get_mut(items_key).map(Value::take) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };

        Page {
            items,
            next_page_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use futures::stream;
    use serde_json::json;

    use super::*;

    /// A stream of `0..len` that counts how many items were pulled from it.
    fn counted(len: usize, pulls: Arc<AtomicUsize>) -> impl Stream<Item = Result<usize, String>> {
        stream::iter(0..len).map(move |i| {
            pulls.fetch_add(1, Ordering::SeqCst);
            Ok(i)
        })
    }

    #[tokio::test]
    async fn returns_min_of_len_and_max_in_order() {
        for (len, max) in [(0, 5), (3, 5), (5, 5), (10, 5), (10, 1), (7, 50)] {
            let pulls = Arc::new(AtomicUsize::new(0));
            let items = collect_bounded(counted(len, pulls.clone()), max)
                .await
                .unwrap();
            let expected: Vec<usize> = (0..len.min(max)).collect();
            assert_eq!(items, expected, "len={len} max={max}");
            assert!(pulls.load(Ordering::SeqCst) <= max, "len={len} max={max}");
        }
    }

    #[tokio::test]
    async fn stops_pulling_once_max_is_reached() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let items = collect_bounded(counted(1_000, pulls.clone()), 3)
            .await
            .unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(pulls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_max_never_polls() {
        let polled = Arc::new(AtomicUsize::new(0));
        let flag = polled.clone();
        let source = stream::poll_fn(move |_| {
            flag.fetch_add(1, Ordering::SeqCst);
            std::task::Poll::Ready(Some(Ok::<_, String>(1)))
        });
        let items = collect_bounded(source, 0).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(polled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unbounded_source_terminates() {
        let source = stream::repeat(Ok::<_, String>("device"));
        let items = collect_bounded(source, 4).await.unwrap();
        assert_eq!(items, vec!["device"; 4]);
    }

    #[tokio::test]
    async fn mid_stream_error_propagates() {
        let source = stream::iter(vec![Ok(1), Ok(2), Err("page 2 failed".to_string()), Ok(4)]);
        let err = collect_bounded(source, 10).await.unwrap_err();
        assert_eq!(err, "page 2 failed");
    }

    #[tokio::test]
    async fn error_past_the_bound_is_never_reached() {
        let source = stream::iter(vec![Ok(1), Ok(2), Err("unreached".to_string())]);
        let items = collect_bounded(source, 2).await.unwrap();
        assert_eq!(items, vec![1, 2]);
    }

    #[test]
    fn page_extracts_items_and_next_link() {
        let page = Page::from_value(
            json!({
                "pageDetails": { "count": 2, "nextPageUrl": "https://concord-api.centrastage.net/api/v2/account/devices?page=1" },
                "devices": [{ "uid": "a" }, { "uid": "b" }]
            }),
            "devices",
        );
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[1]["uid"], "b");
        assert!(page.next_page_url.unwrap().ends_with("page=1"));
    }

    #[test]
    fn page_with_null_next_link_is_last() {
        let page = Page::from_value(
            json!({ "pageDetails": { "nextPageUrl": null }, "sites": [] }),
            "sites",
        );
        assert!(page.items.is_empty());
        assert!(page.next_page_url.is_none());
    }

    #[test]
    fn page_missing_items_key_is_empty() {
        let page = Page::from_value(json!({ "pageDetails": {} }), "alerts");
        assert!(page.items.is_empty());
        assert!(page.next_page_url.is_none());
    }
}
