//! C4: the merge-flow scheduler (endpoint B). A single background
//! dispatcher batches many small incoming requests bound for the same
//! destination language into one upstream call, then fans the joined reply
//! back out to each original caller.

use crate::session::TranslationSession;
use crate::tokenbucket::{AdaptiveTokenBucket, RuleId};
use crate::limiter::ConcurrencyLimiter;
use gateway_common::{GatewayError, Result};
use gateway_llm::TextGenerator;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Separates independently-translatable chunks within one merged request's
/// text (e.g. a page's several UI strings submitted as one call).
pub const SUB_SPLITTER: &str = "<Keep This Symbol>";

/// Batching window: once a token is available, wait this long for more
/// requests bound for the same destination to arrive before dispatching.
const COLLECT_WINDOW: Duration = Duration::from_millis(300);

const MERGE_MAX_BYTES_TABLE: [(RuleId, usize); 5] = [(1, 600), (2, 1200), (3, 1500), (4, 1800), (5, 2000)];

fn merge_max_bytes(rule_id: RuleId) -> usize {
    MERGE_MAX_BYTES_TABLE
        .iter()
        .find(|(id, _)| *id == rule_id)
        .map(|(_, bytes)| *bytes)
        .unwrap_or_else(|| MERGE_MAX_BYTES_TABLE[MERGE_MAX_BYTES_TABLE.len() - 1].1)
}

struct PendingRequest {
    text: String,
    to: String,
    cancel: CancellationToken,
    response_tx: oneshot::Sender<Result<String>>,
}

/// Batches merge-flow requests behind one background dispatcher task. Cheap
/// to clone (an `Arc` handle); one instance should be shared for the
/// lifetime of the process.
pub struct MergeScheduler {
    llm: Arc<dyn TextGenerator>,
    bucket: Arc<AdaptiveTokenBucket>,
    limiter: Arc<ConcurrencyLimiter>,
    api_key: String,
    model_name: Option<String>,
    input_tx: mpsc::UnboundedSender<PendingRequest>,
}

impl MergeScheduler {
    /// Starts the background dispatcher and returns a handle to submit work
    /// to it.
    pub fn spawn(
        llm: Arc<dyn TextGenerator>,
        bucket: Arc<AdaptiveTokenBucket>,
        limiter: Arc<ConcurrencyLimiter>,
        api_key: String,
        model_name: Option<String>,
    ) -> Arc<Self> {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let this = Arc::new(Self { llm, bucket, limiter, api_key, model_name, input_tx });
        tokio::spawn(this.clone().dispatch_loop(input_rx));
        this
    }

    /// Submits `text` (possibly several [`SUB_SPLITTER`]-separated chunks)
    /// for translation into `to`, batched with other concurrent requests.
    /// Resolves once the dispatcher's batch containing this request
    /// completes, or `cancel` fires first.
    pub async fn translate(&self, text: String, to: String, cancel: CancellationToken) -> Result<String> {
        let (response_tx, response_rx) = oneshot::channel();
        let pending = PendingRequest { text, to, cancel: cancel.clone(), response_tx };
        self.input_tx
            .send(pending)
            .map_err(|_| GatewayError::Internal("merge dispatcher is no longer running".into()))?;

        tokio::select! {
            _ = cancel.cancelled() => Err(GatewayError::AdmissionCancelled("request cancelled".into())),
            result = response_rx => result
                .map_err(|_| GatewayError::Internal("merge dispatcher dropped the response channel".into()))?,
        }
    }

    async fn dispatch_loop(self: Arc<Self>, mut input: mpsc::UnboundedReceiver<PendingRequest>) {
        let mut next_head: Option<PendingRequest> = None;
        loop {
            let head = match next_head.take() {
                Some(head) => head,
                None => match input.recv().await {
                    Some(head) => head,
                    None => return,
                },
            };

            // Dispatch-time admission is never cancelled by an individual
            // request; it only ever stops when the bucket itself stops.
            let rule_id = match self.bucket.consume(&CancellationToken::new()).await {
                Ok(id) => id,
                Err(_) => return,
            };
            let max_bytes = merge_max_bytes(rule_id);
            tokio::time::sleep(COLLECT_WINDOW).await;

            let (batch, carry) = collect(head, max_bytes, &mut input);
            next_head = carry;
            gateway_obs::observe_merge_batch_size(batch.len());
            tracing::debug!(target: "gateway_core::merge", "dispatching batch of {} requests", batch.len());
            let this = self.clone();
            tokio::spawn(async move { this.handle_batch(batch, false).await });
        }
    }

    /// The first batch reuses the token already consumed by the dispatcher;
    /// every retry draws a fresh one.
    async fn handle_batch(&self, requests: Vec<PendingRequest>, mut need_token: bool) {
        let all_cancelled = spawn_all_cancelled_signal(&requests);
        loop {
            if need_token {
                match self.bucket.consume(&CancellationToken::new()).await {
                    Ok(_) => {}
                    Err(_) => return,
                }
            }
            need_token = true;

            let mut mapping = Vec::new();
            let mut input = Vec::new();
            for (idx, req) in requests.iter().enumerate() {
                for part in req.text.split(SUB_SPLITTER) {
                    input.push(part.trim().to_string());
                    mapping.push(idx);
                }
            }
            let to = requests[0].to.clone();
            let session = TranslationSession::new(
                self.llm.clone(),
                self.limiter.clone(),
                self.api_key.clone(),
                self.model_name.clone(),
            );

            let attempt = tokio::select! {
                _ = all_cancelled.cancelled() => return,
                result = session.fire(std::slice::from_ref(&to), &input) => result,
            };

            match attempt {
                Ok(result) if result.result.len() == input.len() => {
                    let mut per_request: Vec<Vec<String>> = (0..requests.len()).map(|_| Vec::new()).collect();
                    for (i, translated) in result.result.into_iter().enumerate() {
                        per_request[mapping[i]].push(translated);
                    }
                    let joiner = format!("\n{SUB_SPLITTER}\n");
                    for (req, pieces) in requests.into_iter().zip(per_request.into_iter()) {
                        let _ = req.response_tx.send(Ok(pieces.join(&joiner)));
                    }
                    return;
                }
                Ok(result) => {
                    gateway_obs::record_upstream_retry();
                    tracing::warn!(
                        target: "gateway_core::merge",
                        "batch has {} sub-inputs, but got {} results; retrying",
                        input.len(),
                        result.result.len()
                    );
                }
                Err(err) if err.is_retryable() => {
                    gateway_obs::record_upstream_retry();
                    tracing::warn!(target: "gateway_core::merge", "translate error: {}; retrying", err);
                }
                Err(err) => {
                    for req in requests {
                        let _ = req.response_tx.send(Err(err.clone()));
                    }
                    return;
                }
            }
        }
    }
}

/// Greedily folds further same-destination requests already queued (without
/// blocking) into `head`'s batch, stopping once `max_bytes` is reached. A
/// request bound for a different destination is handed back as the next
/// batch's head.
fn collect(
    head: PendingRequest,
    max_bytes: usize,
    input: &mut mpsc::UnboundedReceiver<PendingRequest>,
) -> (Vec<PendingRequest>, Option<PendingRequest>) {
    let to = head.to.clone();
    let mut sum = head.text.len();
    let mut batch = vec![head];
    loop {
        if sum >= max_bytes {
            return (batch, None);
        }
        match input.try_recv() {
            Ok(req) => {
                if req.to != to {
                    return (batch, Some(req));
                }
                sum += req.text.len();
                batch.push(req);
            }
            Err(_) => return (batch, None),
        }
    }
}

fn spawn_all_cancelled_signal(requests: &[PendingRequest]) -> CancellationToken {
    let aggregate = CancellationToken::new();
    let remaining = Arc::new(AtomicUsize::new(requests.len()));
    for req in requests {
        let cancel = req.cancel.clone();
        let aggregate = aggregate.clone();
        let remaining = remaining.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                aggregate.cancel();
            }
        });
    }
    aggregate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::ConcurrencyLimiter;
    use crate::tokenbucket::AdaptiveTokenBucket;
    use gateway_llm::mock::MockGenerator;

    fn pending(text: &str, to: &str) -> (PendingRequest, oneshot::Receiver<Result<String>>) {
        let (tx, rx) = oneshot::channel();
        (
            PendingRequest { text: text.to_string(), to: to.to_string(), cancel: CancellationToken::new(), response_tx: tx },
            rx,
        )
    }

    #[test]
    fn merge_max_bytes_table_has_expected_tiers() {
        assert_eq!(merge_max_bytes(1), 600);
        assert_eq!(merge_max_bytes(2), 1200);
        assert_eq!(merge_max_bytes(3), 1500);
        assert_eq!(merge_max_bytes(4), 1800);
        assert_eq!(merge_max_bytes(5), 2000);
        assert_eq!(merge_max_bytes(99), 2000);
    }

    #[test]
    fn collect_hands_back_a_destination_mismatch_as_next_head() {
        let (head, _rx0) = pending("abc", "中文");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (other, _rx1) = pending("xyz", "英语");
        tx.send(other).unwrap();
        drop(tx);

        let (batch, carry) = collect(head, 10_000, &mut rx);
        assert_eq!(batch.len(), 1);
        assert_eq!(carry.unwrap().to, "英语");
    }

    #[test]
    fn collect_stops_once_max_bytes_reached() {
        let (head, _rx0) = pending("xxxxx", "中文");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (more, _rx1) = pending("yyyyy", "中文");
        tx.send(more).unwrap();
        drop(tx);

        let (batch, carry) = collect(head, 6, &mut rx);
        assert_eq!(batch.len(), 2);
        assert!(carry.is_none());
    }

    #[test]
    fn collect_drains_only_what_is_already_queued() {
        let (head, _rx0) = pending("a", "中文");
        let (_tx, mut rx) = mpsc::unbounded_channel::<PendingRequest>();
        let (batch, carry) = collect(head, 10_000, &mut rx);
        assert_eq!(batch.len(), 1);
        assert!(carry.is_none());
    }

    #[tokio::test]
    async fn translate_returns_chunks_joined_back_in_order() {
        let reply = "英语 -> 中文\n----begin----\nA\n----end----\n----begin----\nB\n----end----";
        let mock = Arc::new(MockGenerator::always(reply));
        let bucket = AdaptiveTokenBucket::with_defaults();
        let limiter = ConcurrencyLimiter::with_default_capacity();
        let scheduler = MergeScheduler::spawn(mock, bucket, limiter, "key".into(), None);

        let text = format!("first{SUB_SPLITTER}second");
        let result = scheduler
            .translate(text, "中文(简体)".to_string(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, format!("A\n{SUB_SPLITTER}\nB"));
    }

    #[tokio::test]
    async fn translate_retries_after_a_transient_error_then_succeeds() {
        let reply = "英语 -> 中文\n----begin----\nA\n----end----";
        let mock = Arc::new(MockGenerator::new(vec![
            Err(GatewayError::UpstreamTransient("boom".into())),
            Ok(reply.to_string()),
        ]));
        let call_counter = mock.clone();
        let bucket = AdaptiveTokenBucket::with_defaults();
        let limiter = ConcurrencyLimiter::with_default_capacity();
        let scheduler = MergeScheduler::spawn(mock, bucket, limiter, "key".into(), None);

        let result = scheduler
            .translate("solo".to_string(), "中文".to_string(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, "A");
        assert_eq!(call_counter.call_count(), 2);
    }
}
