use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{AiAnalysis, AnalysisProvider, AnalysisRequest, TechnicalScorer};
use crate::coordination::CoordinationStore;
use crate::error::CoreError;
use crate::models::{normalize_confidence, Signal, SignalAction, SignalSource, Timeframe};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Lock expiry; bounds how long a crashed holder can block other workers
    pub lock_ttl: Duration,
    /// Must stay below `lock_ttl`
    pub cache_ttl: Duration,
    /// Must stay below `lock_ttl` so the lock outlives the provider call
    pub ai_timeout: Duration,
    /// Bound on every coordination store round trip
    pub store_timeout: Duration,
    /// How long a worker that lost the lock waits before re-reading the cache
    pub lock_wait: Duration,
    pub cache_bucket: Duration,
    pub worker_id: String,
    pub strategy: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(25),
            ai_timeout: Duration::from_secs(20),
            store_timeout: Duration::from_secs(2),
            lock_wait: Duration::from_secs(2),
            cache_bucket: Duration::from_secs(60),
            worker_id: "worker".to_string(),
            strategy: "ai_augmented".to_string(),
        }
    }
}

/// AI verdict as stored in the coordination store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedAnalysis {
    pub action: SignalAction,
    pub confidence: f64,
    pub reasoning: String,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub expires_at: DateTime<Utc>,
}

/// `analysis:{symbol}:{timeframes}:{bucket}` with timeframes sorted by duration
pub fn cache_key(
    symbol: &str,
    timeframes: &[Timeframe],
    now: DateTime<Utc>,
    bucket: Duration,
) -> String {
    let mut sorted = timeframes.to_vec();
    sorted.sort();
    sorted.dedup();
    let joined: Vec<&str> = sorted.iter().map(|tf| tf.as_str()).collect();

    let bucket_secs = bucket.as_secs().max(1) as i64;
    format!(
        "analysis:{}:{}:{}",
        symbol,
        joined.join(","),
        now.timestamp().div_euclid(bucket_secs)
    )
}

pub fn lock_key(symbol: &str) -> String {
    format!("lock:analysis:{}", symbol)
}

/// Deduplicates AI analysis across workers
///
/// One worker per symbol holds the lock and calls the provider; everyone else reads
/// its cached result or falls back to the technical scorer. Never returns an error:
/// every failure ends in a fallback signal whose reasoning names the cause.
pub struct AnalysisCoordinator {
    store: Arc<dyn CoordinationStore>,
    provider: Arc<dyn AnalysisProvider>,
    scorer: TechnicalScorer,
    config: CoordinatorConfig,
}

impl AnalysisCoordinator {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        provider: Arc<dyn AnalysisProvider>,
        mut config: CoordinatorConfig,
    ) -> Self {
        if config.ai_timeout >= config.lock_ttl {
            let clamped = config.lock_ttl.mul_f64(0.8);
            tracing::warn!(
                ai_timeout = ?config.ai_timeout,
                lock_ttl = ?config.lock_ttl,
                clamped = ?clamped,
                "AI timeout must be shorter than lock TTL, clamping"
            );
            config.ai_timeout = clamped;
        }

        if config.cache_ttl >= config.lock_ttl {
            tracing::warn!(
                cache_ttl = ?config.cache_ttl,
                lock_ttl = ?config.lock_ttl,
                "cache TTL should be shorter than lock TTL"
            );
        }

        Self {
            store,
            provider,
            scorer: TechnicalScorer::new(&config.strategy),
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub async fn analyze(&self, request: &AnalysisRequest) -> Signal {
        self.analyze_at(request, Utc::now()).await
    }

    /// Same as `analyze` with an explicit clock for cache bucketing and timestamps
    pub async fn analyze_at(&self, request: &AnalysisRequest, now: DateTime<Utc>) -> Signal {
        let symbol = request.symbol.as_str();

        if request.indicators.is_empty() {
            return Signal::error_default(
                symbol,
                &self.config.strategy,
                "no indicator data for any timeframe",
                now,
            );
        }

        if !self.provider.is_configured() {
            tracing::debug!(symbol = %symbol, "AI provider not configured, using technical scorer");
            return self.fallback(request, "AI provider not configured", now);
        }

        let key = cache_key(
            symbol,
            &request.timeframes(),
            now,
            self.config.cache_bucket,
        );

        match self.read_cache(&key, now).await {
            Ok(Some(cached)) => {
                tracing::debug!(symbol = %symbol, key = %key, "analysis cache hit");
                return self.cached_signal(symbol, cached, now);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "coordination store read failed");
                return self.fallback(request, &format!("coordination store unavailable: {}", e), now);
            }
        }

        let lock = lock_key(symbol);
        let owner = format!("{}:{}", self.config.worker_id, Uuid::new_v4());

        match self
            .store_call("set_if_absent", self.store.set_if_absent(&lock, &owner, self.config.lock_ttl))
            .await
        {
            Ok(true) => {
                let signal = self.run_provider(request, &key, now).await;
                self.release(&lock, &owner).await;
                signal
            }
            Ok(false) => self.wait_for_holder(request, &key, now).await,
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "lock acquisition failed");
                self.fallback(request, &format!("coordination store unavailable: {}", e), now)
            }
        }
    }

    async fn run_provider(&self, request: &AnalysisRequest, key: &str, now: DateTime<Utc>) -> Signal {
        let symbol = request.symbol.as_str();
        let ai_timeout = self.config.ai_timeout;

        let outcome = match tokio::time::timeout(ai_timeout, self.provider.analyze(request, ai_timeout)).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::AnalysisTimeout(ai_timeout)),
        };

        match outcome {
            Ok(analysis) => {
                let analysis = normalize(analysis, request);
                self.write_cache(key, &analysis, now).await;
                tracing::info!(
                    symbol = %symbol,
                    action = %analysis.action,
                    confidence = analysis.confidence,
                    "AI analysis complete"
                );
                self.ai_signal(symbol, analysis, SignalSource::Ai, now)
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "AI analysis failed, falling back");
                let reason = match e {
                    CoreError::AnalysisTimeout(d) => format!("AI timeout after {}s", d.as_secs_f64()),
                    other => other.to_string(),
                };
                self.fallback(request, &reason, now)
            }
        }
    }

    async fn wait_for_holder(&self, request: &AnalysisRequest, key: &str, now: DateTime<Utc>) -> Signal {
        let symbol = request.symbol.as_str();
        tracing::debug!(symbol = %symbol, wait = ?self.config.lock_wait, "analysis lock held elsewhere, waiting");

        tokio::time::sleep(self.config.lock_wait).await;

        match self.read_cache(key, now).await {
            Ok(Some(cached)) => self.cached_signal(symbol, cached, now),
            Ok(None) => self.fallback(request, "analysis in progress on another worker", now),
            Err(e) => self.fallback(request, &format!("coordination store unavailable: {}", e), now),
        }
    }

    async fn read_cache(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CachedAnalysis>, CoreError> {
        let Some(raw) = self.store_call("get", self.store.get(key)).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<CachedAnalysis>(&raw) {
            Ok(cached) if cached.expires_at > now => Ok(Some(cached)),
            Ok(_) => Ok(None),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "discarding unreadable cached analysis");
                Ok(None)
            }
        }
    }

    async fn write_cache(&self, key: &str, analysis: &AiAnalysis, now: DateTime<Utc>) {
        let ttl = self.config.cache_ttl;
        let expires_at = now
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));

        let cached = CachedAnalysis {
            action: analysis.action,
            confidence: analysis.confidence,
            reasoning: analysis.reasoning.clone(),
            entry_price: analysis.entry_price,
            stop_loss: analysis.stop_loss,
            take_profit: analysis.take_profit,
            expires_at,
        };

        let payload = match serde_json::to_string(&cached) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to serialize analysis for cache");
                return;
            }
        };

        if let Err(e) = self.store_call("setex", self.store.setex(key, ttl, &payload)).await {
            tracing::warn!(key = %key, error = %e, "failed to cache analysis");
        }
    }

    async fn release(&self, lock: &str, owner: &str) {
        match self
            .store_call("delete_if_equals", self.store.delete_if_equals(lock, owner))
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::warn!(lock = %lock, "analysis lock expired before release"),
            Err(e) => tracing::warn!(lock = %lock, error = %e, "failed to release analysis lock"),
        }
    }

    async fn store_call<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, CoreError>>,
    ) -> Result<T, CoreError> {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Store(format!(
                "{} timed out after {:?}",
                operation, self.config.store_timeout
            ))),
        }
    }

    fn ai_signal(&self, symbol: &str, analysis: AiAnalysis, source: SignalSource, now: DateTime<Utc>) -> Signal {
        let prefix = match source {
            SignalSource::Cached => "AI analysis (cached)",
            _ => "AI analysis",
        };

        Signal {
            symbol: symbol.to_string(),
            action: analysis.action,
            confidence: analysis.confidence,
            entry_price: analysis.entry_price,
            stop_loss: analysis.stop_loss,
            take_profit: analysis.take_profit,
            strategy: self.config.strategy.clone(),
            reasoning: format!("{}: {}", prefix, analysis.reasoning),
            source,
            generated_at: now,
        }
    }

    fn cached_signal(&self, symbol: &str, cached: CachedAnalysis, now: DateTime<Utc>) -> Signal {
        let analysis = AiAnalysis {
            action: cached.action,
            confidence: normalize_confidence(cached.confidence),
            reasoning: cached.reasoning,
            entry_price: cached.entry_price,
            stop_loss: cached.stop_loss,
            take_profit: cached.take_profit,
        };
        self.ai_signal(symbol, analysis, SignalSource::Cached, now)
    }

    fn fallback(&self, request: &AnalysisRequest, reason: &str, now: DateTime<Utc>) -> Signal {
        if request.indicators.is_empty() {
            return Signal::error_default(
                &request.symbol,
                &self.config.strategy,
                &format!("{}; no indicator data", reason),
                now,
            );
        }

        let mut signal = self
            .scorer
            .score_timeframes(&request.symbol, &request.indicators, now);
        signal.source = SignalSource::Fallback;
        signal.reasoning = format!("Technical fallback ({}): {}", reason, signal.reasoning);
        signal
    }
}

fn normalize(mut analysis: AiAnalysis, request: &AnalysisRequest) -> AiAnalysis {
    analysis.confidence = normalize_confidence(analysis.confidence);
    if analysis.reasoning.trim().is_empty() {
        analysis.reasoning = "no reasoning provided".to_string();
    }
    if analysis.action != SignalAction::Hold && analysis.entry_price.is_none() {
        analysis.entry_price = request.last_close();
    }
    analysis
}
