//! # Stop Sign
//!
//! Cooperative cancellation with a shutdown audit.
//!
//! Signing is a one-way transition (until [`StopSign::reset`]). Every actor
//! that notices the sign and stops producing work reports it through
//! [`StopSign::deal`] under its own actor code, which lets a caller check
//! how completely the shutdown propagated.
//!
//! Internally the sign also owns a [`CancellationToken`], so async loops can
//! wait on [`StopSign::cancelled`] inside a `select!` instead of polling.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug)]
struct StopSignState {
    signed: bool,
    deals: HashMap<String, u32>,
    token: CancellationToken,
}

/// Cancellation token with per-actor "dealt" counters.
#[derive(Debug)]
pub struct StopSign {
    state: RwLock<StopSignState>,
}

impl StopSign {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StopSignState {
                signed: false,
                deals: HashMap::new(),
                token: CancellationToken::new(),
            }),
        }
    }

    /// Signs the stop sign. Returns `false` if it was already signed.
    pub fn sign(&self) -> bool {
        let mut state = self.state.write();
        if state.signed {
            return false;
        }
        state.signed = true;
        state.token.cancel();
        info!("Stop sign signed");
        true
    }

    pub fn signed(&self) -> bool {
        self.state.read().signed
    }

    /// Clears the signed flag and all deal counters.
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.signed = false;
        state.deals.clear();
        state.token = CancellationToken::new();
    }

    /// Records that the actor identified by `code` honoured the sign.
    /// Ignored while the sign is not signed.
    pub fn deal(&self, code: &str) {
        let mut state = self.state.write();
        if !state.signed {
            return;
        }
        debug!("Stop sign dealt by {}", code);
        *state.deals.entry(code.to_string()).or_insert(0) += 1;
    }

    /// Number of distinct actors that dealt with the sign.
    pub fn deal_count(&self) -> u32 {
        self.state.read().deals.len() as u32
    }

    /// Total number of deal reports.
    pub fn deal_total(&self) -> u32 {
        self.state.read().deals.values().sum()
    }

    /// Resolves once the sign is signed.
    pub async fn cancelled(&self) {
        let token = self.state.read().token.clone();
        token.cancelled().await;
    }

    pub fn summary(&self) -> StopSignSummary {
        let state = self.state.read();
        let mut deals: Vec<(String, u32)> = state
            .deals
            .iter()
            .map(|(code, count)| (code.clone(), *count))
            .collect();
        deals.sort();
        StopSignSummary {
            signed: state.signed,
            deals,
        }
    }
}

impl Default for StopSign {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of a [`StopSign`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StopSignSummary {
    pub signed: bool,
    pub deals: Vec<(String, u32)>,
}

impl fmt::Display for StopSignSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "signed: {}", self.signed)?;
        if !self.deals.is_empty() {
            let deals = self
                .deals
                .iter()
                .map(|(code, count)| format!("{}: {}", code, count))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, ", dealt: [{}]", deals)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn test_sign_only_once() {
        let sign = StopSign::new();
        assert!(!sign.signed());
        assert!(sign.sign());
        assert!(sign.signed());
        assert!(!sign.sign());
    }

    #[test]
    fn test_deal_counts() {
        let sign = StopSign::new();
        sign.deal("downloader-1");
        assert_eq!(sign.deal_total(), 0, "deals before signing are ignored");

        sign.sign();
        sign.deal("downloader-1");
        sign.deal("downloader-1");
        sign.deal("analyzer-2");
        assert_eq!(sign.deal_count(), 2);
        assert_eq!(sign.deal_total(), 3);

        let summary = sign.summary();
        assert_eq!(
            summary.to_string(),
            "signed: true, dealt: [analyzer-2: 1, downloader-1: 2]"
        );
    }

    #[test]
    fn test_reset() {
        let sign = StopSign::new();
        sign.sign();
        sign.deal("scheduler");
        sign.reset();
        assert!(!sign.signed());
        assert_eq!(sign.deal_count(), 0);
        assert_eq!(sign.deal_total(), 0);
        assert!(sign.sign());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sign_succeeds_exactly_once() {
        let sign = Arc::new(StopSign::new());
        let winners = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for i in 0..32 {
            let sign = Arc::clone(&sign);
            let winners = Arc::clone(&winners);
            handles.push(tokio::spawn(async move {
                if sign.sign() {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
                sign.deal(&format!("actor-{}", i % 4));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(sign.deal_count(), 4);
        assert_eq!(sign.deal_total(), 32);
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_sign() {
        let sign = Arc::new(StopSign::new());
        let waiter = {
            let sign = Arc::clone(&sign);
            tokio::spawn(async move { sign.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        sign.sign();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake up")
            .unwrap();
    }
}
