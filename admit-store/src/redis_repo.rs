use redis::RedisResult;

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    /// Fixed-window counter. Returns `false` once `limit` is exceeded within the window.
    pub async fn check_rate_limit(&self, key: &str, limit: i64, window_seconds: i64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, window_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count <= limit)
    }
}

/// Rate limit bucket for a caller; anonymous callers share one bucket per address.
pub fn rate_limit_key(subject: &str, minute: i64) -> String {
    format!("ratelimit:{}:{}", subject, minute)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_key_rolls_per_minute() {
        assert_eq!(rate_limit_key("user-1", 42), "ratelimit:user-1:42");
        assert_ne!(rate_limit_key("user-1", 42), rate_limit_key("user-1", 43));
    }
}
