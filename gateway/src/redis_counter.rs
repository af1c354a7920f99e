//! Redis-backed rate counter.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tokio::sync::OnceCell;

use crate::rate_counter::{CounterError, CounterHit, RemoteCounter};

/// Increment, start the window if the key has no TTL yet, report the TTL.
const INCREMENT_SCRIPT: &str = r#"
local hits = redis.call('INCR', KEYS[1])
if redis.call('PTTL', KEYS[1]) < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return {hits, redis.call('PTTL', KEYS[1])}
"#;

/// Counter shared by every gateway instance pointing at the same Redis.
pub struct RedisCounter {
    client: redis::Client,
    manager: OnceCell<ConnectionManager>,
    script: Script,
    prefix: String,
}

impl RedisCounter {
    /// Create a counter for `url`. Connects lazily on first use.
    pub fn new(url: &str, prefix: impl Into<String>) -> Result<Self, CounterError> {
        let client = redis::Client::open(url)
            .map_err(|err| CounterError::Unavailable(format!("redis client: {err}")))?;
        Ok(Self {
            client,
            manager: OnceCell::new(),
            script: Script::new(INCREMENT_SCRIPT),
            prefix: prefix.into(),
        })
    }

    fn namespaced_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    async fn connection(&self) -> Result<ConnectionManager, CounterError> {
        self.manager
            .get_or_try_init(|| async {
                ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(|err| CounterError::Unavailable(format!("redis connect: {err}")))
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl RemoteCounter for RedisCounter {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterHit, CounterError> {
        let mut conn = self.connection().await?;
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);

        let (hits, ttl_ms): (u64, i64) = self
            .script
            .key(self.namespaced_key(key))
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|err| CounterError::Unavailable(format!("redis increment: {err}")))?;

        if hits == 0 {
            return Err(CounterError::Protocol("counter reported zero hits".to_string()));
        }

        Ok(CounterHit {
            count: hits,
            time_remaining: Duration::from_millis(u64::try_from(ttl_ms).unwrap_or(0)),
        })
    }

    async fn ping(&self) -> Result<(), CounterError> {
        let mut conn = self.connection().await?;
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|err| CounterError::Unavailable(format!("redis ping: {err}")))?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(CounterError::Protocol(format!("unexpected ping reply {reply:?}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced() {
        let counter = RedisCounter::new("redis://localhost:6379", "throttle").unwrap();
        assert_eq!(counter.namespaced_key("alpha:burst"), "throttle:alpha:burst");
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(matches!(
            RedisCounter::new("not a url", "throttle"),
            Err(CounterError::Unavailable(_))
        ));
    }
}
