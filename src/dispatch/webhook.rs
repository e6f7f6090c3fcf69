use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{DeliveryResult, SignalSink};
use crate::models::Signal;

/// POSTs each signal as JSON to every configured URL
pub struct WebhookSignalSink {
    client: Client,
    urls: Vec<String>,
}

impl WebhookSignalSink {
    pub fn new(urls: Vec<String>, timeout: Duration) -> crate::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, urls })
    }
}

#[async_trait]
impl SignalSink for WebhookSignalSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, signal: &Signal) -> Vec<DeliveryResult> {
        let mut results = Vec::with_capacity(self.urls.len());

        for url in &self.urls {
            let result = match self.client.post(url).json(signal).send().await {
                Ok(response) if response.status().is_success() => DeliveryResult::ok(url),
                Ok(response) => DeliveryResult::failed(url, format!("HTTP {}", response.status())),
                Err(e) => DeliveryResult::failed(url, e.to_string()),
            };
            results.push(result);
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SignalAction, SignalSource};
    use chrono::Utc;

    fn signal() -> Signal {
        Signal {
            symbol: "BTCUSDT".to_string(),
            action: SignalAction::Sell,
            confidence: 0.7,
            entry_price: Some(50_000.0),
            stop_loss: Some(51_000.0),
            take_profit: Some(48_500.0),
            strategy: "technical".to_string(),
            reasoning: "Technical score -0.70".to_string(),
            source: SignalSource::Technical,
            generated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_posts_signal_json() {
        let mut server = mockito::Server::new_async().await;
        let hook = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"symbol":"BTCUSDT","action":"SELL"}"#.to_string(),
            ))
            .with_status(200)
            .create_async()
            .await;

        let sink = WebhookSignalSink::new(
            vec![format!("{}/hook", server.url())],
            Duration::from_secs(5),
        )
        .unwrap();

        let results = sink.deliver(&signal()).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        hook.assert_async().await;
    }

    #[tokio::test]
    async fn test_one_failing_url_does_not_block_others() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server
            .mock("POST", "/ok")
            .with_status(204)
            .create_async()
            .await;
        let _bad = server
            .mock("POST", "/bad")
            .with_status(500)
            .create_async()
            .await;

        let sink = WebhookSignalSink::new(
            vec![format!("{}/bad", server.url()), format!("{}/ok", server.url())],
            Duration::from_secs(5),
        )
        .unwrap();

        let results = sink.deliver(&signal()).await;
        assert!(!results[0].success);
        assert_eq!(results[0].error.as_deref(), Some("HTTP 500 Internal Server Error"));
        assert!(results[1].success);
    }
}
