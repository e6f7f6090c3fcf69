use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use tokio::time::Instant;

use crate::analysis::{AiAnalysis, AnalysisProvider, AnalysisRequest};
use crate::error::CoreError;
use crate::models::{normalize_confidence, SignalAction};
use crate::retry::RetryPolicy;

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const MAX_TOKENS: u32 = 600;
const RECENT_CANDLES: usize = 12;

const SYSTEM_PROMPT: &str = "You are an expert cryptocurrency futures analyst. \
Given indicator values and recent candles across timeframes, decide BUY, SELL or HOLD. \
Always respond with valid JSON only, no markdown formatting.";

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: String,
}

/// Verdict as the model writes it; confidence may be a fraction or a percentage
#[derive(Debug, Deserialize)]
struct ModelVerdict {
    action: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    entry_price: Option<f64>,
    #[serde(default)]
    stop_loss: Option<f64>,
    #[serde(default)]
    take_profit: Option<f64>,
}

/// Chat-completions backed analysis provider (OpenAI or any compatible endpoint)
pub struct OpenAiAnalysisProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

impl OpenAiAnalysisProvider {
    /// Blank or missing keys leave the provider unconfigured
    pub fn new(api_key: Option<String>, base_url: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn build_prompt(&self, request: &AnalysisRequest) -> String {
        let mut prompt = format!("Symbol: {}\n\n", request.symbol);

        for (timeframe, snapshot) in &request.indicators {
            let _ = writeln!(prompt, "## {} indicators", timeframe);
            for (name, value) in snapshot.to_map() {
                let _ = writeln!(prompt, "- {}: {:.6}", name, value);
            }
            prompt.push('\n');
        }

        for (timeframe, candles) in &request.candles {
            let start = candles.len().saturating_sub(RECENT_CANDLES);
            let _ = writeln!(prompt, "## {} recent candles (time, open, high, low, close, volume)", timeframe);
            for c in &candles[start..] {
                let _ = writeln!(
                    prompt,
                    "{} {:.6} {:.6} {:.6} {:.6} {:.2}",
                    c.timestamp.format("%Y-%m-%d %H:%M"),
                    c.open,
                    c.high,
                    c.low,
                    c.close,
                    c.volume
                );
            }
            prompt.push('\n');
        }

        prompt.push_str(
            "Respond with JSON in this exact format:\n\
             {\"action\": \"BUY\" | \"SELL\" | \"HOLD\", \"confidence\": 0.0-1.0, \
             \"reasoning\": \"one or two sentences\", \"entry_price\": number or null, \
             \"stop_loss\": number or null, \"take_profit\": number or null}",
        );

        prompt
    }
}

/// Strip markdown code fences (```json ... ``` or ``` ... ```)
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    trimmed
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

fn parse_verdict(content: &str) -> Result<AiAnalysis, CoreError> {
    let text = strip_code_fences(content);
    let verdict: ModelVerdict = serde_json::from_str(text).map_err(|e| {
        CoreError::AnalysisUnavailable(format!("unparseable model output: {} (text: {})", e, text))
    })?;

    let action = SignalAction::parse_loose(&verdict.action).ok_or_else(|| {
        CoreError::AnalysisUnavailable(format!("unknown action '{}'", verdict.action))
    })?;

    Ok(AiAnalysis {
        action,
        confidence: normalize_confidence(verdict.confidence),
        reasoning: verdict.reasoning.trim().to_string(),
        entry_price: verdict.entry_price.filter(|p| *p > 0.0),
        stop_loss: verdict.stop_loss.filter(|p| *p > 0.0),
        take_profit: verdict.take_profit.filter(|p| *p > 0.0),
    })
}

#[async_trait]
impl AnalysisProvider for OpenAiAnalysisProvider {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn analyze(
        &self,
        request: &AnalysisRequest,
        timeout: Duration,
    ) -> Result<AiAnalysis, CoreError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CoreError::AnalysisUnavailable("no API key configured".to_string()))?;

        let body = ChatRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            temperature: 0.0,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: self.build_prompt(request),
                },
            ],
        };

        let url = format!("{}/chat/completions", self.base_url);
        let deadline = Instant::now() + timeout;
        let mut retry = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CoreError::AnalysisTimeout(timeout));
            }

            let last_error = match self
                .client
                .post(&url)
                .bearer_auth(api_key)
                .timeout(remaining)
                .json(&body)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    let chat: ChatResponse = response.json().await.map_err(|e| {
                        CoreError::AnalysisUnavailable(format!("JSON decode error: {}", e))
                    })?;
                    let content = chat
                        .choices
                        .first()
                        .map(|c| c.message.content.as_str())
                        .ok_or_else(|| {
                            CoreError::AnalysisUnavailable("response had no choices".to_string())
                        })?;
                    return parse_verdict(content);
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    let error = format!("OpenAI API error {}: {}", status, text);

                    // Only rate limits and server errors are worth another attempt
                    if status.as_u16() != 429 && !status.is_server_error() {
                        return Err(CoreError::AnalysisUnavailable(error));
                    }
                    error
                }
                Err(e) if e.is_timeout() => return Err(CoreError::AnalysisTimeout(timeout)),
                Err(e) => format!("Network error: {}", e),
            };

            retry += 1;
            if !self.retry.allows(retry) {
                return Err(CoreError::AnalysisUnavailable(last_error));
            }

            tracing::warn!(
                symbol = %request.symbol,
                attempt = retry,
                max_retries = self.retry.max_retries,
                "{}, retrying",
                last_error
            );
            self.retry.wait(retry).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorSnapshot;
    use crate::models::Timeframe;
    use std::collections::BTreeMap;

    fn request() -> AnalysisRequest {
        let mut indicators = BTreeMap::new();
        indicators.insert(Timeframe::H1, IndicatorSnapshot::neutral(100.0));
        AnalysisRequest {
            symbol: "BTCUSDT".to_string(),
            candles: BTreeMap::new(),
            indicators,
        }
    }

    fn completion(content: &str) -> String {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
        .to_string()
    }

    fn provider(url: &str) -> OpenAiAnalysisProvider {
        OpenAiAnalysisProvider::new(Some("sk-test".to_string()), url, DEFAULT_MODEL)
            .with_retry_policy(RetryPolicy::immediate(2))
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {}  "), "{}");
    }

    #[test]
    fn test_parse_verdict_normalizes_percent_confidence() {
        let analysis = parse_verdict(
            r#"{"action":"buy","confidence":75,"reasoning":"trend","stop_loss":95.0,"take_profit":null}"#,
        )
        .unwrap();
        assert_eq!(analysis.action, SignalAction::Buy);
        assert_eq!(analysis.confidence, 0.75);
        assert_eq!(analysis.stop_loss, Some(95.0));
        assert_eq!(analysis.take_profit, None);
    }

    #[test]
    fn test_parse_verdict_rejects_unknown_action() {
        assert!(parse_verdict(r#"{"action":"MOON","confidence":0.9}"#).is_err());
    }

    #[test]
    fn test_blank_key_is_unconfigured() {
        let provider = OpenAiAnalysisProvider::new(Some("  ".to_string()), OPENAI_API_BASE, DEFAULT_MODEL);
        assert!(!provider.is_configured());
        assert!(!OpenAiAnalysisProvider::new(None, OPENAI_API_BASE, DEFAULT_MODEL).is_configured());
    }

    #[test]
    fn test_prompt_lists_indicators() {
        let prompt = provider(OPENAI_API_BASE).build_prompt(&request());
        assert!(prompt.contains("## 1h indicators"));
        assert!(prompt.contains("- rsi: 50.000000"));
    }

    #[tokio::test]
    async fn test_analyze_parses_fenced_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_body(completion(
                "```json\n{\"action\":\"SELL\",\"confidence\":0.64,\"reasoning\":\"lower highs\"}\n```",
            ))
            .create_async()
            .await;

        let analysis = provider(&server.url())
            .analyze(&request(), Duration::from_secs(5))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(analysis.action, SignalAction::Sell);
        assert_eq!(analysis.confidence, 0.64);
        assert_eq!(analysis.reasoning, "lower highs");
    }

    #[tokio::test]
    async fn test_analyze_retries_rate_limits_then_gives_up() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("slow down")
            .expect(3)
            .create_async()
            .await;

        let err = provider(&server.url())
            .analyze(&request(), Duration::from_secs(5))
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, CoreError::AnalysisUnavailable(_)));
    }

    #[tokio::test]
    async fn test_analyze_does_not_retry_client_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("bad key")
            .expect(1)
            .create_async()
            .await;

        let err = provider(&server.url())
            .analyze(&request(), Duration::from_secs(5))
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(err.to_string().contains("401"));
    }
}
