//! Line-oriented front end.
//!
//! One JSON request envelope per input line, one JSON reply per output
//! line. Requests run concurrently; replies are written in input order.

use std::future::Future;
use std::io;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{FuturesOrdered, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, info, warn};

use fxql_common::FxqlError;
use fxql_protocol::{Reply, RequestEnvelope};

use crate::service::FxqlService;

/// Requests read ahead of the oldest unanswered one.
pub const MAX_PENDING_LINES: usize = 256;

/// Serve requests from `input` until it closes or `shutdown` resolves.
///
/// Blank lines are skipped. A line that is not an envelope gets an
/// `InvalidRequest` reply in its place.
pub async fn serve_lines<R, W, S>(
    service: Arc<FxqlService>,
    input: R,
    mut output: W,
    shutdown: S,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    let mut lines = input.lines();
    let mut pending = FuturesOrdered::new();
    let mut input_open = true;
    tokio::pin!(shutdown);

    while input_open || !pending.is_empty() {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!(pending = pending.len(), "Shutdown signal received");
                break;
            }
            Some(reply) = pending.next(), if !pending.is_empty() => {
                write_reply(&mut output, &reply).await?;
            }
            line = lines.next_line(), if input_open && pending.len() < MAX_PENDING_LINES => {
                match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => pending.push_back(dispatch(&service, &line)),
                    None => {
                        info!("Input closed");
                        input_open = false;
                    }
                }
            }
        }
    }

    output.flush().await
}

fn dispatch(service: &Arc<FxqlService>, line: &str) -> BoxFuture<'static, Reply> {
    match serde_json::from_str::<RequestEnvelope>(line) {
        Ok(envelope) => {
            let service = Arc::clone(service);
            let task = tokio::spawn(async move { service.handle_envelope(envelope).await });
            async move {
                task.await.unwrap_or_else(|e| {
                    error!(error = %e, "Request task failed");
                    Reply::error(&FxqlError::Internal(e.to_string()))
                })
            }
            .boxed()
        }
        Err(e) => {
            warn!(error = %e, "Unreadable request line");
            future::ready(Reply::error(&FxqlError::InvalidRequest(e.to_string()))).boxed()
        }
    }
}

async fn write_reply<W: AsyncWrite + Unpin>(output: &mut W, reply: &Reply) -> io::Result<()> {
    let mut out = serde_json::to_vec(reply)?;
    out.push(b'\n');
    output.write_all(&out).await?;
    output.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::Barrier;

    use fxql_common::{ParsedEntry, PersistedEntry, Result};
    use fxql_store::{EntryStore, MemoryEntryStore};

    use crate::config::GatewayConfig;

    async fn running(store: Arc<dyn EntryStore>) -> Arc<FxqlService> {
        let service = Arc::new(FxqlService::new(GatewayConfig::default(), store));
        service.start().await.unwrap();
        service
    }

    async fn serve(service: Arc<FxqlService>, input: &str) -> Vec<Value> {
        let mut output = Vec::new();
        let served = serve_lines(service, input.as_bytes(), &mut output, future::pending());
        tokio::time::timeout(Duration::from_secs(5), served)
            .await
            .expect("serving stalled")
            .unwrap();

        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    /// Holds each batch until the barrier's full party has arrived.
    struct RendezvousStore {
        barrier: Barrier,
        inner: MemoryEntryStore,
    }

    #[async_trait]
    impl EntryStore for RendezvousStore {
        async fn accept(&self, entries: Vec<ParsedEntry>) -> Result<Vec<PersistedEntry>> {
            self.barrier.wait().await;
            self.inner.accept(entries).await
        }
    }

    #[tokio::test]
    async fn test_replies_follow_input_order() {
        let service = running(Arc::new(MemoryEntryStore::new())).await;
        let input = concat!(
            r#"{"caller":"alpha","FXQL":"USD-GBP { BUY 1 SELL 2 CAP 3 }"}"#,
            "\n\n",
            "not json\n",
            r#"{"FXQL":"USD-GBP { BUY 1 SELL 2 CAP 3 }"}"#,
            "\n",
            r#"{"caller":"beta","FXQL":"XXX-GBP { BUY 1 SELL 2 CAP 3 }"}"#,
            "\n",
        );

        let replies = serve(service.clone(), input).await;

        let outcomes: Vec<_> = replies
            .iter()
            .map(|r| (r["status"].as_u64().unwrap(), r["response"]["code"].as_str().unwrap()))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                (200, "FXQL-200"),
                (400, "FXQL_E_INVALID_REQUEST"),
                (400, "FXQL_E_INVALID_REQUEST"),
                (400, "FXQL_E_BAD_ISO"),
            ]
        );
        assert!(replies[1]["response"]["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid request: "));
        assert_eq!(
            replies[2]["response"]["message"],
            "Invalid request: caller is required"
        );

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_requests_run_concurrently() {
        // Neither batch can finish until both have reached the store.
        let store = Arc::new(RendezvousStore {
            barrier: Barrier::new(2),
            inner: MemoryEntryStore::new(),
        });
        let service = running(store.clone()).await;
        let input = concat!(
            r#"{"caller":"alpha","FXQL":"USD-GBP { BUY 1 SELL 2 CAP 3 }"}"#,
            "\n",
            r#"{"caller":"beta","FXQL":"EUR-USD { BUY 1 SELL 2 CAP 3 }"}"#,
            "\n",
        );

        let replies = serve(service.clone(), input).await;

        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|r| r["status"] == 200));
        assert_eq!(replies[0]["response"]["data"][0]["sourceCurrency"], "USD");
        assert_eq!(replies[1]["response"]["data"][0]["sourceCurrency"], "EUR");
        assert_eq!(store.inner.batch_count(), 2);

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_reading() {
        let service = running(Arc::new(MemoryEntryStore::new())).await;
        let mut output = Vec::new();

        serve_lines(
            service.clone(),
            "{\"caller\":\"alpha\",\"FXQL\":\"USD-GBP { BUY 1 SELL 2 CAP 3 }\"}\n".as_bytes(),
            &mut output,
            future::ready(()),
        )
        .await
        .unwrap();

        assert!(output.is_empty());
        service.stop().await.unwrap();
    }
}
