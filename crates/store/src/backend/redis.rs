//! Redis backend and the "refresh token created" event feed.
//!
//! Entries are stored under the raw token as key with `SET key value EX ttl`,
//! so every replica sharing the Redis instance sees the same sessions.

use super::KeyValueBackend;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, future};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use refresh_flow_types::traits::Result;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

/// First delay before resubscribing after the feed drops.
const RESUBSCRIBE_MIN: Duration = Duration::from_millis(500);
/// Upper bound of the resubscribe backoff.
const RESUBSCRIBE_MAX: Duration = Duration::from_secs(30);

/// Raw payloads of one pub/sub subscription.
type Payloads = BoxStream<'static, String>;

/// A shared [`KeyValueBackend`] over one multiplexed Redis connection.
#[derive(Clone)]
pub struct RedisBackend {
    conn: MultiplexedConnection,
}

impl RedisBackend {
    /// Opens a multiplexed connection to `url` (e.g. `"redis://127.0.0.1:6379/0"`).
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError::Storage`](refresh_flow_types::RefreshError::Storage)
    /// if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValueBackend for RedisBackend {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: usize = conn.del(key).await?;
        Ok(())
    }
}

/// Subscribes to `channel` and forwards every JSON payload into a bounded
/// channel of `buffer` events.
///
/// Payloads that are not JSON are logged and skipped. If the connection
/// drops, the subscription is re-established with exponential backoff. The
/// forwarder only stops once the returned receiver is dropped.
///
/// # Errors
///
/// Returns [`RefreshError::Storage`](refresh_flow_types::RefreshError::Storage)
/// if the initial subscription cannot be established.
pub async fn subscribe_events(
    url: &str,
    channel: &str,
    buffer: usize,
) -> Result<mpsc::Receiver<Value>> {
    let client = Client::open(url)?;
    let feed = open_feed(&client, channel).await?;
    tracing::info!(channel, "subscribed to refresh token events");

    let (tx, rx) = mpsc::channel(buffer.max(1));
    let channel = channel.to_string();
    let reopen = {
        let channel = channel.clone();
        move || {
            let client = client.clone();
            let channel = channel.clone();
            async move { open_feed(&client, &channel).await }
        }
    };
    tokio::spawn(async move { forward(&channel, feed, reopen, tx).await });

    Ok(rx)
}

async fn open_feed(client: &Client, channel: &str) -> Result<Payloads> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    let channel = channel.to_string();
    let payloads = pubsub.into_on_message().filter_map(move |msg| {
        let payload = msg
            .get_payload::<String>()
            .map_err(|e| {
                tracing::warn!(channel = %channel, error = %e, "dropping unreadable event");
            })
            .ok();
        future::ready(payload)
    });
    Ok(payloads.boxed())
}

/// Pumps `feed` into `tx`, calling `reopen` whenever the feed ends.
async fn forward<F, Fut>(channel: &str, mut feed: Payloads, mut reopen: F, tx: mpsc::Sender<Value>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Payloads>>,
{
    loop {
        loop {
            let raw = tokio::select! {
                () = tx.closed() => return,
                raw = feed.next() => match raw {
                    Some(raw) => raw,
                    None => break,
                },
            };
            let event = match serde_json::from_str::<Value>(&raw) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(channel, error = %e, "dropping unreadable event");
                    continue;
                }
            };
            if tx.send(event).await.is_err() {
                return;
            }
        }

        tracing::warn!(channel, "event feed lost; resubscribing");
        let Some(next) = resubscribe(channel, &mut reopen, &tx).await else {
            return;
        };
        feed = next;
        tracing::info!(channel, "resubscribed to refresh token events");
    }
}

/// Retries `reopen` with exponential backoff. Returns `None` once the
/// receiver is gone.
async fn resubscribe<F, Fut>(
    channel: &str,
    reopen: &mut F,
    tx: &mpsc::Sender<Value>,
) -> Option<Payloads>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Payloads>>,
{
    let mut delay = RESUBSCRIBE_MIN;
    loop {
        tokio::select! {
            () = tx.closed() => return None,
            () = tokio::time::sleep(delay) => {}
        }
        match reopen().await {
            Ok(feed) => return Some(feed),
            Err(e) => {
                delay = (delay * 2).min(RESUBSCRIBE_MAX);
                tracing::warn!(channel, error = %e, retry_in = ?delay, "resubscribe failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use refresh_flow_types::RefreshError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn payloads(raw: &[&str]) -> Payloads {
        stream::iter(raw.iter().map(ToString::to_string).collect::<Vec<_>>()).boxed()
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let err = RedisBackend::connect("not-a-redis-url").await.err().unwrap();
        assert!(matches!(err, RefreshError::Storage(_)));
    }

    #[tokio::test]
    async fn test_subscribe_rejects_bad_url() {
        let err = subscribe_events("not-a-redis-url", "events", 8)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RefreshError::Storage(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forward_resubscribes_after_feed_ends() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let reopen = {
            let attempts = Arc::clone(&attempts);
            move || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                future::ready(if n == 0 {
                    Err(RefreshError::Storage("connection refused".into()))
                } else {
                    Ok(payloads(&[r#"{"token":"tok-2"}"#])
                        .chain(stream::pending())
                        .boxed())
                })
            }
        };
        let (tx, mut rx) = mpsc::channel(8);
        let feed = payloads(&[r#"{"token":"tok-1"}"#, "not json"]);
        tokio::spawn(async move { forward("events", feed, reopen, tx).await });

        assert_eq!(rx.recv().await.unwrap()["token"], "tok-1");
        assert_eq!(rx.recv().await.unwrap()["token"], "tok-2");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forward_stops_when_receiver_dropped() {
        let reopen = || future::ready(Err(RefreshError::Storage("connection refused".into())));
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(async move { forward("events", payloads(&[]), reopen, tx).await });

        tokio::time::sleep(RESUBSCRIBE_MAX * 3).await;
        assert!(!task.is_finished());

        drop(rx);
        task.await.unwrap();
    }
}
