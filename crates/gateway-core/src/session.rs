//! C2: one attempt at translating a fixed list of input paragraphs to a
//! destination language via the upstream LLM — prompt construction, the
//! call itself, and structured-reply parsing.

use crate::limiter::ConcurrencyLimiter;
use gateway_common::{GatewayError, Result};
use gateway_llm::{GenerateTextConfig, TextGenerator};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

const BEGIN_MARKER: &str = "----begin----";
const END_MARKER: &str = "----end----";

static RESULT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\s*(.*?)->(.*?)\n\s*(.*?)\z").expect("result pattern is valid"));

/// The outcome of one LLM call: detected source, resolved target, and one
/// translated paragraph per input paragraph.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub from: String,
    pub to: String,
    pub result: Vec<String>,
}

/// One attempt at translating `paragraphs` into `destinations[0]` (or, if a
/// second destination is given, "translate into destinations[0]; if already
/// in destinations[0], translate into destinations[1]").
pub struct TranslationSession {
    llm: Arc<dyn TextGenerator>,
    limiter: Arc<ConcurrencyLimiter>,
    api_key: String,
    model_name: Option<String>,
}

impl TranslationSession {
    pub fn new(
        llm: Arc<dyn TextGenerator>,
        limiter: Arc<ConcurrencyLimiter>,
        api_key: String,
        model_name: Option<String>,
    ) -> Self {
        Self { llm, limiter, api_key, model_name }
    }

    /// One attempt — no retry. Callers (the split/merge schedulers) own the
    /// retry-on-error/mismatch policy. The concurrency limiter is acquired
    /// here, around the single upstream call site, so neither caller has to
    /// remember to gate it themselves.
    pub async fn fire(&self, destinations: &[String], paragraphs: &[String]) -> Result<SessionResult> {
        let prompt = build_prompt(destinations, paragraphs);
        tracing::debug!(target: "gateway_core::session", "ask: {}", prompt);
        let permit = self.limiter.acquire().await;
        gateway_obs::record_upstream_call();
        let reply = self
            .llm
            .generate_text(GenerateTextConfig {
                api_key: self.api_key.clone(),
                model_name: self.model_name.clone(),
                prompt,
            })
            .await;
        drop(permit);
        let reply = reply?;
        tracing::debug!(target: "gateway_core::session", "answer: {}", reply);
        parse_reply(&reply).ok_or(GatewayError::ParseFailure)
    }
}

fn build_prompt(destinations: &[String], paragraphs: &[String]) -> String {
    let content: Vec<String> = paragraphs
        .iter()
        .map(|p| format!("{BEGIN_MARKER}\n{p}\n{END_MARKER}"))
        .collect();
    let content = content.join("\n");

    let mut out = String::new();
    out.push_str(
        "你是一名翻译员，精通各国语言，尤其是英语和中文；同时你也精通各种计算机技术，习惯在 github 或 stackoverflow 等网站发表专业评论。\n",
    );
    out.push_str("请帮我完成一些翻译，我现在会描述输入和输出的规则，真正需要翻译的内容我会在末尾给出。\n\n");
    out.push_str(
        "输入要求：待翻译的内容被特殊标记包裹，每个段落以 \"----begin----\" 开始，以 \"----end----\" 结尾；可能存在多个段落。\n\n",
    );
    out.push_str(
        "输出要求：请按格式输出翻译结果，输出的第一行首先写从哪个语种翻译到哪个语种，格式为 \"{source} -> {destination}\"，语种用中文表达；紧接着输出每段的翻译，同样用 \"----begin----\" 和 \"----end----\" 包裹。\n\n",
    );

    if destinations.len() >= 2 {
        out.push_str(&format!(
            "翻译要求：请把内容翻译成{}。如果它已经是{}，则把它翻译成{}。",
            destinations[0], destinations[0], destinations[1]
        ));
    } else {
        out.push_str(&format!("翻译要求：请把内容翻译成{}。", destinations[0]));
    }
    out.push_str(
        "采用意译的翻译手法，含义准确，尽量使用常见的单词和句式，符合母语人士的表达习惯。必要时可以采用多阶段翻译，例如先直译一遍，然后在直译的基础上适当调整文法表达，或根据内容含义重新组织输出。每个段落独立翻译，每个段落都要有对应的翻译输出，即输入有多少段，输出就要有多少段，不能多也不能少。\n\n",
    );
    out.push_str("以下是待翻译内容：\n");
    out.push_str(&content);
    out
}

fn parse_reply(text: &str) -> Option<SessionResult> {
    let caps = RESULT_PATTERN.captures(text)?;
    let from = caps.get(1)?.as_str().trim().to_string();
    let to = caps.get(2)?.as_str().trim().to_string();
    let body = caps.get(3)?.as_str();

    let mut result = Vec::new();
    let mut rest = body;
    while let Some(begin_pos) = rest.find(BEGIN_MARKER) {
        rest = &rest[begin_pos + BEGIN_MARKER.len()..];
        let Some(end_pos) = rest.find(END_MARKER) else { break };
        result.push(rest[..end_pos].trim().to_string());
        rest = &rest[end_pos + END_MARKER.len()..];
    }
    if result.is_empty() {
        return None;
    }
    Some(SessionResult { from, to, result })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_llm::mock::MockGenerator;

    #[test]
    fn parses_a_well_formed_reply() {
        let reply = "英语 -> 中文\n----begin----\n你好\n----end----\n----begin----\n世界\n----end----";
        let parsed = parse_reply(reply).unwrap();
        assert_eq!(parsed.from, "英语");
        assert_eq!(parsed.to, "中文");
        assert_eq!(parsed.result, vec!["你好".to_string(), "世界".to_string()]);
    }

    #[test]
    fn rejects_reply_with_no_arrow() {
        assert!(parse_reply("nothing resembling the protocol here").is_none());
    }

    #[test]
    fn rejects_reply_with_zero_paragraphs() {
        assert!(parse_reply("英语 -> 中文\nno begin/end markers at all").is_none());
    }

    #[test]
    fn prompt_build_then_parse_round_trips_paragraph_list() {
        let paragraphs = vec!["hello".to_string(), "world".to_string()];
        let prompt = build_prompt(&["中文(简体)".to_string()], &paragraphs);
        assert!(prompt.contains("----begin----\nhello\n----end----"));
        assert!(prompt.contains("----begin----\nworld\n----end----"));

        let synthetic_reply = "英语 -> 中文\n----begin----\n你好\n----end----\n----begin----\n世界\n----end----";
        let parsed = parse_reply(synthetic_reply).unwrap();
        assert_eq!(parsed.result.len(), paragraphs.len());
    }

    #[tokio::test]
    async fn fire_surfaces_parse_failure_as_retryable() {
        let mock = Arc::new(MockGenerator::always("not a valid reply"));
        let session = TranslationSession::new(mock, ConcurrencyLimiter::with_default_capacity(), "key".into(), None);
        let err = session
            .fire(&["中文(简体)".to_string()], &["hello".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, GatewayError::ParseFailure));
    }

    #[tokio::test]
    async fn fire_returns_paragraphs_on_success() {
        let reply = "英语 -> 中文\n----begin----\n你好\n----end----";
        let mock = Arc::new(MockGenerator::always(reply));
        let session = TranslationSession::new(mock, ConcurrencyLimiter::with_default_capacity(), "key".into(), None);
        let result = session
            .fire(&["中文(简体)".to_string()], &["hello".to_string()])
            .await
            .unwrap();
        assert_eq!(result.result, vec!["你好".to_string()]);
    }
}
