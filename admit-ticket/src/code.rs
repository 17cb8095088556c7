use admit_core::repository::{StoreResult, TICKET_CODE_CONSTRAINT};
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::future::Future;
use tracing::warn;

use crate::error::{TicketError, TicketResult};

const MIN_ATTEMPTS: u32 = 4;
const MAX_ATTEMPTS: u32 = 8;
const RANDOM_SUFFIX_LEN: usize = 6;

/// Issues ticket codes of the form `PREFIX-<base36 ms>-<6 alphanumerics>`.
#[derive(Debug, Clone)]
pub struct TicketCodeAllocator {
    prefix: String,
    max_attempts: u32,
}

impl TicketCodeAllocator {
    pub fn new(prefix: impl Into<String>, max_attempts: u32) -> Self {
        let prefix = prefix.into().trim().to_uppercase();
        Self {
            prefix: if prefix.is_empty() { "ADM".to_string() } else { prefix },
            max_attempts: max_attempts.clamp(MIN_ATTEMPTS, MAX_ATTEMPTS),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn generate(&self, now: DateTime<Utc>) -> String {
        let millis = now.timestamp_millis().max(0) as u64;
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(RANDOM_SUFFIX_LEN)
            .map(char::from)
            .collect();
        format!("{}-{}-{}", self.prefix, to_base36(millis), suffix.to_uppercase())
    }

    /// Random scan token, independent of the ticket code.
    pub fn barcode() -> String {
        format!("BC{:032X}", rand::thread_rng().gen::<u128>())
    }

    /// Runs `insert` with fresh codes until it stops colliding on the ticket-code
    /// constraint. Any other store error is returned unchanged.
    pub async fn allocate<T, F, Fut>(&self, now: DateTime<Utc>, mut insert: F) -> TicketResult<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        for attempt in 1..=self.max_attempts {
            let code = self.generate(now);
            match insert(code.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_duplicate_of(TICKET_CODE_CONSTRAINT) => {
                    warn!(attempt, code = %code, "Ticket code collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(TicketError::AllocationExhausted(self.max_attempts))
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use admit_core::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_code_format() {
        let allocator = TicketCodeAllocator::new("adm", 6);
        let code = allocator.generate(Utc::now());
        let parts: Vec<&str> = code.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ADM");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));

        let barcode = TicketCodeAllocator::barcode();
        assert!(barcode.starts_with("BC"));
        assert_eq!(barcode.len(), 34);
    }

    #[test]
    fn test_attempts_are_clamped() {
        assert_eq!(TicketCodeAllocator::new("ADM", 1).max_attempts(), 4);
        assert_eq!(TicketCodeAllocator::new("ADM", 50).max_attempts(), 8);
        assert_eq!(TicketCodeAllocator::new("ADM", 6).max_attempts(), 6);
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "Z");
        assert_eq!(to_base36(36), "10");
    }

    #[tokio::test]
    async fn test_retries_on_code_collision_then_succeeds() {
        let allocator = TicketCodeAllocator::new("ADM", 6);
        let calls = AtomicU32::new(0);
        let result = allocator
            .allocate(Utc::now(), |code| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(StoreError::duplicate(TICKET_CODE_CONSTRAINT))
                    } else {
                        Ok(code)
                    }
                }
            })
            .await
            .unwrap();
        assert!(result.starts_with("ADM-"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_fatal() {
        let allocator = TicketCodeAllocator::new("ADM", 5);
        let calls = AtomicU32::new(0);
        let result: TicketResult<()> = allocator
            .allocate(Utc::now(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::duplicate(TICKET_CODE_CONSTRAINT)) }
            })
            .await;
        assert!(matches!(result, Err(TicketError::AllocationExhausted(5))));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_unrelated_errors_propagate_immediately() {
        let allocator = TicketCodeAllocator::new("ADM", 6);
        let calls = AtomicU32::new(0);
        let result: TicketResult<()> = allocator
            .allocate(Utc::now(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::duplicate("uq_tickets_payment_reference")) }
            })
            .await;
        assert!(matches!(result, Err(TicketError::Store(StoreError::Duplicate { .. }))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
