//! C3: the split-flow scheduler (endpoint A). Splits one large request's
//! lines across 1..N parallel upstream calls, sized by the current
//! admission-rule tier, then reassembles in original order.

use crate::session::TranslationSession;
use crate::tokenbucket::{AdaptiveTokenBucket, RuleId};
use crate::limiter::ConcurrencyLimiter;
use crate::types::{TranslateRequest, TranslateResponse};
use gateway_common::{GatewayError, Result};
use gateway_llm::TextGenerator;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// `ruleID -> maxParts`: under token abundance, split into up to 8 parallel
/// sub-requests; under scarcity, fall back to serial (1 part).
const MAX_PARTS_TABLE: [(RuleId, usize); 5] = [(1, 8), (2, 4), (3, 3), (4, 2), (5, 1)];

fn max_parts(rule_id: RuleId) -> usize {
    MAX_PARTS_TABLE
        .iter()
        .find(|(id, _)| *id == rule_id)
        .map(|(_, parts)| *parts)
        .unwrap_or(1)
}

/// A subset of the original input lines routed to its own upstream call,
/// with `index` mapping each line back to its position in the original text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubRequest {
    pub lines: Vec<String>,
    pub index: Vec<usize>,
    pub total_chars: usize,
}

/// Greedy longest-processing-time partition: sort lines by length
/// descending, then place each into the currently-lightest bucket. Drops
/// empty trailing buckets (fewer lines than requested parts).
pub fn split_lines(lines: &[String], parts: usize) -> Vec<SubRequest> {
    if parts <= 1 {
        return vec![SubRequest {
            lines: lines.to_vec(),
            index: (0..lines.len()).collect(),
            total_chars: lines.iter().map(|l| l.len()).sum(),
        }];
    }

    let mut by_len: Vec<usize> = (0..lines.len()).collect();
    by_len.sort_by(|&a, &b| lines[b].len().cmp(&lines[a].len()));

    let mut buckets: Vec<SubRequest> = (0..parts).map(|_| SubRequest::default()).collect();
    for idx in by_len {
        let mut picked = 0usize;
        for i in 1..buckets.len() {
            if buckets[i].total_chars < buckets[picked].total_chars {
                picked = i;
            }
        }
        let bucket = &mut buckets[picked];
        bucket.lines.push(lines[idx].clone());
        bucket.index.push(idx);
        bucket.total_chars += lines[idx].len();
    }

    while buckets.last().map_or(false, |b| b.total_chars == 0) {
        buckets.pop();
    }
    buckets
}

struct SubResult {
    index: Vec<usize>,
    translated: Vec<String>,
    from: String,
    to: String,
}

#[derive(Clone)]
pub struct SplitScheduler {
    llm: Arc<dyn TextGenerator>,
    bucket: Arc<AdaptiveTokenBucket>,
    limiter: Arc<ConcurrencyLimiter>,
    api_key: String,
    model_name: Option<String>,
}

impl SplitScheduler {
    pub fn new(
        llm: Arc<dyn TextGenerator>,
        bucket: Arc<AdaptiveTokenBucket>,
        limiter: Arc<ConcurrencyLimiter>,
        api_key: String,
        model_name: Option<String>,
    ) -> Self {
        Self { llm, bucket, limiter, api_key, model_name }
    }

    pub async fn translate(
        &self,
        req: &TranslateRequest,
        cancel: &CancellationToken,
    ) -> Result<TranslateResponse> {
        let rule_id = self.bucket.consume(cancel).await?;
        let lines: Vec<String> = req.lines().into_iter().map(str::to_string).collect();
        let total_lines = lines.len();
        let parts = max_parts(rule_id);
        let subs = split_lines(&lines, parts);
        gateway_obs::observe_split_parts(subs.len());
        tracing::debug!(target: "gateway_core::split", "request split into {} sub requests", subs.len());

        let mut handles = Vec::with_capacity(subs.len());
        for (idx, sub) in subs.into_iter().enumerate() {
            let this = self.clone();
            let destinations = req.destinations.clone();
            let cancel = cancel.clone();
            let need_token = idx != 0;
            handles.push(tokio::spawn(async move {
                this.handle_sub_request(&destinations, sub, need_token, &cancel).await
            }));
        }

        let mut sub_results = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = handle
                .await
                .map_err(|e| GatewayError::Internal(format!("sub request task panicked: {e}")))??;
            sub_results.push(result);
        }

        reassemble(req, total_lines, sub_results)
    }

    /// The first sub-request reuses the token already consumed at entry
    /// (`need_token=false`); every retry, and every other sub-request, draws
    /// a fresh one.
    async fn handle_sub_request(
        &self,
        destinations: &[String],
        sub: SubRequest,
        mut need_token: bool,
        cancel: &CancellationToken,
    ) -> Result<SubResult> {
        loop {
            if cancel.is_cancelled() {
                return Err(GatewayError::AdmissionCancelled("context done".into()));
            }
            if need_token {
                self.bucket.consume(cancel).await?;
            }
            need_token = true;

            let session = TranslationSession::new(
                self.llm.clone(),
                self.limiter.clone(),
                self.api_key.clone(),
                self.model_name.clone(),
            );
            let attempt = session.fire(destinations, &sub.lines).await;

            match attempt {
                Ok(result) if result.result.len() == sub.lines.len() => {
                    return Ok(SubResult {
                        index: sub.index,
                        translated: result.result,
                        from: result.from,
                        to: result.to,
                    });
                }
                Ok(result) => {
                    gateway_obs::record_upstream_retry();
                    tracing::warn!(
                        target: "gateway_core::split",
                        "sub request has {} lines, but got {} results; retrying",
                        sub.lines.len(),
                        result.result.len()
                    );
                }
                Err(err) if err.is_retryable() => {
                    gateway_obs::record_upstream_retry();
                    tracing::warn!(target: "gateway_core::split", "translate error: {}; retrying", err);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn reassemble(
    req: &TranslateRequest,
    total_lines: usize,
    sub_results: Vec<SubResult>,
) -> Result<TranslateResponse> {
    let mut lines = vec![String::new(); total_lines];
    let (mut from, mut to) = (String::new(), String::new());
    for (i, sub) in sub_results.into_iter().enumerate() {
        if i == 0 {
            from = sub.from;
            to = sub.to;
        }
        for (pos, translated) in sub.index.into_iter().zip(sub.translated.into_iter()) {
            lines[pos] = translated;
        }
    }
    Ok(TranslateResponse { from, to, text: req.text.clone(), result: lines })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_part_keeps_original_order() {
        let lines = vec!["a".into(), "bb".into(), "ccc".into()];
        let subs = split_lines(&lines, 1);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].index, vec![0, 1, 2]);
    }

    #[test]
    fn balanced_split_covers_every_index_exactly_once() {
        let lines: Vec<String> = (0..16).map(|i| "x".repeat(i + 1)).collect();
        for parts in 1..=8 {
            let subs = split_lines(&lines, parts);
            let mut seen: Vec<usize> = subs.iter().flat_map(|s| s.index.clone()).collect();
            seen.sort_unstable();
            assert_eq!(seen, (0..lines.len()).collect::<Vec<_>>());
        }
    }

    #[test]
    fn fewer_lines_than_parts_drops_empty_buckets() {
        let lines = vec!["only".to_string(), "two".to_string()];
        let subs = split_lines(&lines, 8);
        assert_eq!(subs.len(), 2);
        assert!(subs.iter().all(|s| s.total_chars > 0));
    }

    #[test]
    fn max_parts_table_has_expected_tiers() {
        assert_eq!(max_parts(1), 8);
        assert_eq!(max_parts(2), 4);
        assert_eq!(max_parts(3), 3);
        assert_eq!(max_parts(4), 2);
        assert_eq!(max_parts(5), 1);
        assert_eq!(max_parts(99), 1);
    }

    #[test]
    fn reassemble_preserves_input_order() {
        let req = TranslateRequest::new("a\nb\nc", vec!["中文".into()], None).unwrap();
        let sub_results = vec![
            SubResult { index: vec![2, 0], translated: vec!["C".into(), "A".into()], from: "英语".into(), to: "中文".into() },
            SubResult { index: vec![1], translated: vec!["B".into()], from: "英语".into(), to: "中文".into() },
        ];
        let resp = reassemble(&req, 3, sub_results).unwrap();
        assert_eq!(resp.result, vec!["A".to_string(), "B".to_string(), "C".to_string()]);
    }
}
