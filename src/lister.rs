use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::error::StoreError;
use crate::store::ObjectStore;

/// Keys buffered ahead of the consumer; roughly one listing page.
pub const LIST_BUFFER: usize = 1000;

/// Streams the keys of `bucket`, optionally restricted to `prefix`.
///
/// Pages are fetched by a background task and handed over through a bounded
/// channel, so at most one page plus the buffer is held in memory. A listing
/// error is yielded as the last item. Dropping the stream stops the listing.
pub fn list_keys(
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: Option<String>,
) -> ReceiverStream<Result<String, StoreError>> {
    let (tx, rx) = mpsc::channel(LIST_BUFFER);

    tokio::spawn(async move {
        let mut continuation_token = None;
        loop {
            let page = match store
                .list_page(&bucket, prefix.as_deref(), continuation_token.take())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            debug!(bucket = %bucket, keys = page.keys.len(), "listed page");

            for key in page.keys {
                if tx.send(Ok(key)).await.is_err() {
                    return;
                }
            }

            match page.next {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }
    });

    ReceiverStream::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::MemoryStore;
    use futures_util::StreamExt;

    async fn collect(
        store: &MemoryStore,
        prefix: Option<&str>,
    ) -> Vec<Result<String, StoreError>> {
        list_keys(
            Arc::new(store.clone()),
            "src".to_string(),
            prefix.map(str::to_owned),
        )
        .collect()
        .await
    }

    #[tokio::test]
    async fn lists_every_page() {
        let store = MemoryStore::with_page_size(3);
        let expected: Vec<String> = (0..10).map(|i| format!("key-{i:02}")).collect();
        for key in &expected {
            store.put("src", key, "x");
        }

        let keys: Vec<String> = collect(&store, None)
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn prefix_restricts_keys() {
        let store = MemoryStore::with_page_size(1);
        for key in ["a/1", "a/2", "b/1"] {
            store.put("src", key, "x");
        }

        let keys: Vec<String> = collect(&store, Some("a/"))
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(keys, vec!["a/1", "a/2"]);
    }

    #[tokio::test]
    async fn listing_error_ends_stream() {
        let store = MemoryStore::new();
        store.put("src", "k", "x");
        store.fail_listing(ErrorKind::AccessDenied.into());

        let items = collect(&store, None).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap_err().kind, ErrorKind::AccessDenied);
    }
}
