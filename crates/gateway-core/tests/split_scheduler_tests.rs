use gateway_core::tokenbucket::{AdaptiveTokenBucket, ConsumptionRule, ProductionRule};
use gateway_core::{ConcurrencyLimiter, SplitScheduler, TranslateRequest};
use gateway_llm::mock::MockGenerator;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn single_rule_bucket() -> Arc<AdaptiveTokenBucket> {
    // One consumption rule, always immediate: lets tests focus on the
    // split/reassemble path rather than admission pacing.
    AdaptiveTokenBucket::new(
        1000,
        1000,
        ProductionRule { interval: Duration::from_secs(60), increment: 1000 },
        vec![ConsumptionRule { rest_threshold: 0, wait: Duration::ZERO, rule_id: 1 }],
    )
    .unwrap()
}

#[tokio::test]
async fn translate_splits_into_one_part_and_reassembles() {
    let reply = "英语 -> 中文\n----begin----\n你好\n----end----\n----begin----\n世界\n----end----";
    let llm = Arc::new(MockGenerator::always(reply));
    let bucket = single_rule_bucket();
    let limiter = ConcurrencyLimiter::with_default_capacity();
    let scheduler = SplitScheduler::new(llm, bucket, limiter, "key".to_string(), None);

    let req = TranslateRequest::new("hello\nworld", vec!["中文(简体)".to_string()], None).unwrap();
    let resp = scheduler.translate(&req, &CancellationToken::new()).await.unwrap();

    assert_eq!(resp.result, vec!["你好".to_string(), "世界".to_string()]);
    assert_eq!(resp.from, "英语");
    assert_eq!(resp.to, "中文");
    assert_eq!(resp.text, req.text);
}

#[tokio::test]
async fn translate_honours_cancellation_before_any_token_is_available() {
    let bucket = AdaptiveTokenBucket::new(
        1,
        0,
        ProductionRule { interval: Duration::from_secs(3600), increment: 1 },
        vec![gateway_core::tokenbucket::ConsumptionRule {
            rest_threshold: 0,
            wait: Duration::ZERO,
            rule_id: 1,
        }],
    )
    .unwrap();
    let llm = Arc::new(MockGenerator::always("unused"));
    let limiter = ConcurrencyLimiter::with_default_capacity();
    let scheduler = SplitScheduler::new(llm, bucket, limiter, "key".to_string(), None);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let req = TranslateRequest::new("hello", vec!["中文".to_string()], None).unwrap();
    let err = scheduler.translate(&req, &cancel).await.unwrap_err();
    assert!(matches!(err, gateway_common::GatewayError::AdmissionCancelled(_)));
}
