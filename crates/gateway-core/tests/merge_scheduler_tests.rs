use gateway_core::tokenbucket::{AdaptiveTokenBucket, ConsumptionRule, ProductionRule};
use gateway_core::{ConcurrencyLimiter, MergeScheduler};
use gateway_llm::mock::MockGenerator;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn single_rule_bucket() -> Arc<AdaptiveTokenBucket> {
    AdaptiveTokenBucket::new(
        1000,
        1000,
        ProductionRule { interval: Duration::from_secs(60), increment: 1000 },
        vec![ConsumptionRule { rest_threshold: 0, wait: Duration::ZERO, rule_id: 1 }],
    )
    .unwrap()
}

#[tokio::test]
async fn two_concurrent_same_destination_requests_share_one_upstream_call() {
    let reply = "英语 -> 中文\n----begin----\nA\n----end----\n----begin----\nB\n----end----";
    let llm = Arc::new(MockGenerator::always(reply));
    let counter = llm.clone();
    let bucket = single_rule_bucket();
    let limiter = ConcurrencyLimiter::with_default_capacity();
    let scheduler = MergeScheduler::spawn(llm, bucket, limiter, "key".to_string(), None);

    let s1 = scheduler.clone();
    let s2 = scheduler.clone();
    let a = s1.translate("first".to_string(), "中文".to_string(), CancellationToken::new());
    let b = s2.translate("second".to_string(), "中文".to_string(), CancellationToken::new());
    let (ra, rb) = tokio::join!(a, b);

    assert_eq!(ra.unwrap(), "A");
    assert_eq!(rb.unwrap(), "B");
    assert_eq!(counter.call_count(), 1);
}
