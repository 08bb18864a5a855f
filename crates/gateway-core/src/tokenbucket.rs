//! C1: the adaptive token bucket. Gates admission when the global budget is
//! exhausted and paces admission as the budget depletes, via a production
//! rule and a tiered consumption-wait rule table.

use gateway_common::{GatewayError, Result};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub type RuleId = u32;

#[derive(Debug, Clone, Copy)]
pub struct ProductionRule {
    pub interval: Duration,
    pub increment: u32,
}

impl ProductionRule {
    fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(GatewayError::Config("production interval must be greater than 0".into()));
        }
        if self.increment == 0 {
            return Err(GatewayError::Config("production increment must be greater than 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumptionRule {
    pub rest_threshold: u32,
    pub wait: Duration,
    pub rule_id: RuleId,
}

/// The five-tier default table: abundant tokens pace at zero wait, scarce
/// tokens pace progressively slower.
pub fn default_consumption_rules() -> Vec<ConsumptionRule> {
    vec![
        ConsumptionRule { rest_threshold: 40, wait: Duration::ZERO, rule_id: 1 },
        ConsumptionRule { rest_threshold: 30, wait: Duration::from_millis(100), rule_id: 2 },
        ConsumptionRule { rest_threshold: 20, wait: Duration::from_millis(500), rule_id: 3 },
        ConsumptionRule { rest_threshold: 10, wait: Duration::from_secs(2), rule_id: 4 },
        ConsumptionRule { rest_threshold: 0, wait: Duration::from_secs(3), rule_id: 5 },
    ]
}

pub fn default_production_rule() -> ProductionRule {
    ProductionRule { interval: Duration::from_secs(60), increment: 60 }
}

struct Inner {
    curr_tokens: u32,
    last_consumed_at: Instant,
    next_production_at: Instant,
}

enum TryConsume {
    Consumed(RuleId),
    NoToken,
    MustWait(Duration),
}

/// Global admission signal shared by the split and merge schedulers. Long
/// lived: constructed once at start-up and never torn down until
/// [`AdaptiveTokenBucket::stop`] is called (normally only at process exit).
pub struct AdaptiveTokenBucket {
    inner: Mutex<Inner>,
    max_tokens: u32,
    production_rule: ProductionRule,
    consumption_rules: Vec<ConsumptionRule>,
    signal_tx: mpsc::Sender<()>,
    signal_rx: AsyncMutex<mpsc::Receiver<()>>,
    stop: CancellationToken,
}

impl AdaptiveTokenBucket {
    pub fn new(
        max_tokens: u32,
        initial_tokens: u32,
        production_rule: ProductionRule,
        consumption_rules: Vec<ConsumptionRule>,
    ) -> Result<Arc<Self>> {
        production_rule.validate()?;
        if max_tokens == 0 {
            return Err(GatewayError::Config("maxTokens must be greater than 0".into()));
        }
        if consumption_rules.last().map(|r| r.rest_threshold) != Some(0) {
            return Err(GatewayError::Config(
                "consumption rule table must end with restThreshold=0".into(),
            ));
        }

        let now = Instant::now();
        let (signal_tx, signal_rx) = mpsc::channel(1);
        let bucket = Arc::new(Self {
            inner: Mutex::new(Inner {
                curr_tokens: initial_tokens.min(max_tokens),
                last_consumed_at: now,
                next_production_at: now + production_rule.interval,
            }),
            max_tokens,
            production_rule,
            consumption_rules,
            signal_tx,
            signal_rx: AsyncMutex::new(signal_rx),
            stop: CancellationToken::new(),
        });
        Self::spawn_producer(bucket.clone());
        Ok(bucket)
    }

    /// Constructs a bucket using the defaults shared by both schedulers:
    /// max=60, initial=60, +60/minute, the five-tier rule table.
    pub fn with_defaults() -> Arc<Self> {
        Self::new(60, 60, default_production_rule(), default_consumption_rules())
            .expect("default token bucket configuration is always valid")
    }

    fn spawn_producer(bucket: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(bucket.production_rule.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; the production rule's
            // interval should elapse before the first production.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = bucket.stop.cancelled() => return,
                    _ = ticker.tick() => {
                        bucket.produce();
                        let _ = bucket.signal_tx.try_send(());
                    }
                }
            }
        });
    }

    fn produce(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.curr_tokens = (inner.curr_tokens + self.production_rule.increment).min(self.max_tokens);
        inner.next_production_at = Instant::now() + self.production_rule.interval;
    }

    fn try_consume(&self) -> TryConsume {
        let mut inner = self.inner.lock().unwrap();
        let curr = inner.curr_tokens;
        if curr == 0 {
            return TryConsume::NoToken;
        }
        let now = Instant::now();
        for rule in &self.consumption_rules {
            if curr >= rule.rest_threshold {
                let elapsed = now.saturating_duration_since(inner.last_consumed_at);
                let mut wait = inner.next_production_at.saturating_duration_since(now) / curr;
                if wait > rule.wait {
                    wait = rule.wait;
                }
                if elapsed < wait {
                    return TryConsume::MustWait(wait - elapsed);
                }
                inner.curr_tokens -= 1;
                inner.last_consumed_at = now;
                return TryConsume::Consumed(rule.rule_id);
            }
        }
        unreachable!("consumption rule table must always have a restThreshold=0 fallback")
    }

    /// Blocks until a token has been debited or `cancel` fires. Returns the
    /// id of the consumption rule that fired.
    pub async fn consume(&self, cancel: &CancellationToken) -> Result<RuleId> {
        loop {
            match self.try_consume() {
                TryConsume::Consumed(id) => return Ok(id),
                TryConsume::NoToken => {
                    let mut rx = self.signal_rx.lock().await;
                    tokio::select! {
                        _ = self.stop.cancelled() => return Err(GatewayError::Stopped),
                        _ = cancel.cancelled() => {
                            return Err(GatewayError::AdmissionCancelled("request cancelled".into()));
                        }
                        got = rx.recv() => {
                            if got.is_some() {
                                // Hand off: re-signal so the next waiter also
                                // gets a chance to check for tokens.
                                let _ = self.signal_tx.try_send(());
                            }
                        }
                    }
                }
                TryConsume::MustWait(wait) => {
                    tokio::select! {
                        _ = self.stop.cancelled() => return Err(GatewayError::Stopped),
                        _ = cancel.cancelled() => {
                            return Err(GatewayError::AdmissionCancelled("request cancelled".into()));
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    /// Idempotent; wakes any in-flight consumer with a "stopped" error.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Current token count, for metrics sampling. Not part of the admission
    /// protocol itself (see [`Self::consume`]).
    pub fn current_tokens(&self) -> u32 {
        self.inner.lock().unwrap().curr_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn never_cancelled() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test(start_paused = true)]
    async fn currtokens_stays_in_bounds_under_production() {
        let bucket = AdaptiveTokenBucket::new(
            5,
            5,
            ProductionRule { interval: Duration::from_millis(10), increment: 5 },
            default_consumption_rules(),
        )
        .unwrap();
        for _ in 0..5 {
            bucket.consume(&never_cancelled()).await.unwrap();
        }
        assert_eq!(bucket.current_tokens(), 0);
        tokio::time::advance(Duration::from_millis(15)).await;
        tokio::task::yield_now().await;
        assert!(bucket.current_tokens() <= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn first_consumption_is_immediate_when_tokens_plentiful() {
        let bucket = AdaptiveTokenBucket::new(
            60,
            60,
            default_production_rule(),
            default_consumption_rules(),
        )
        .unwrap();
        let rule_id = bucket.consume(&never_cancelled()).await.unwrap();
        assert_eq!(rule_id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn consume_blocks_until_production_when_empty() {
        let bucket = AdaptiveTokenBucket::new(
            2,
            0,
            ProductionRule { interval: Duration::from_millis(50), increment: 1 },
            default_consumption_rules(),
        )
        .unwrap();
        let cancel = never_cancelled();
        let consume = tokio::spawn({
            let bucket = bucket.clone();
            let cancel = cancel.clone();
            async move { bucket.consume(&cancel).await }
        });
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(60)).await;
        let result = consume.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_wakes_waiters() {
        let bucket = AdaptiveTokenBucket::new(
            1,
            0,
            ProductionRule { interval: Duration::from_secs(60), increment: 1 },
            default_consumption_rules(),
        )
        .unwrap();
        let cancel = never_cancelled();
        let waiter = tokio::spawn({
            let bucket = bucket.clone();
            async move { bucket.consume(&cancel).await }
        });
        tokio::task::yield_now().await;
        bucket.stop();
        bucket.stop();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(GatewayError::Stopped)));
    }

    #[test]
    fn rejects_malformed_rule_table() {
        let bad_rules = vec![ConsumptionRule { rest_threshold: 10, wait: Duration::ZERO, rule_id: 1 }];
        let result = AdaptiveTokenBucket::new(10, 10, default_production_rule(), bad_rules);
        assert!(result.is_err());
    }
}
