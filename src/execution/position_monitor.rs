use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};

use super::{CleanupReport, OrderCleanupService};
use crate::db::PositionRepository;
use crate::dispatch::PerformanceConsumer;
use crate::error::CoreError;
use crate::models::{CloseReason, Position};
use crate::venue::ExecutionVenue;

const DEFAULT_VENUE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub checked: usize,
    pub updated: usize,
    pub tp_hits: usize,
    pub sl_hits: usize,
    pub manual_closes: usize,
    /// Closed by another monitor between load and update
    pub already_closed: usize,
    /// Closes whose order cleanup left something behind
    pub cleanup_failures: usize,
    pub errors: usize,
    pub unreachable_errors: usize,
    pub consecutive_failed_cycles: u32,
}

impl CycleReport {
    pub fn closed(&self) -> usize {
        self.tp_hits + self.sl_hits + self.manual_closes
    }
}

enum Outcome {
    Updated,
    Closed(CloseReason, CleanupReport),
    AlreadyClosed,
}

/// Tracks OPEN positions against the venue until they close
pub struct PositionMonitor {
    repository: Arc<dyn PositionRepository>,
    venue: Arc<dyn ExecutionVenue>,
    cleanup: OrderCleanupService,
    performance: Arc<dyn PerformanceConsumer>,
    venue_timeout: Duration,
    consecutive_failed_cycles: AtomicU32,
}

impl PositionMonitor {
    pub fn new(
        repository: Arc<dyn PositionRepository>,
        venue: Arc<dyn ExecutionVenue>,
        cleanup: OrderCleanupService,
        performance: Arc<dyn PerformanceConsumer>,
    ) -> Self {
        Self {
            repository,
            venue,
            cleanup,
            performance,
            venue_timeout: DEFAULT_VENUE_TIMEOUT,
            consecutive_failed_cycles: AtomicU32::new(0),
        }
    }

    pub fn with_venue_timeout(mut self, venue_timeout: Duration) -> Self {
        self.venue_timeout = venue_timeout;
        self
    }

    pub fn consecutive_failed_cycles(&self) -> u32 {
        self.consecutive_failed_cycles.load(Ordering::SeqCst)
    }

    /// Poll until `shutdown` flips to true or its sender is dropped
    pub async fn run(&self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("👁️  Position monitor started (every {:?})", poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    if report.checked > 0 {
                        tracing::debug!(?report, "Monitor cycle complete");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Position monitor stopped");
    }

    pub async fn run_cycle(&self) -> CycleReport {
        self.run_cycle_at(Utc::now()).await
    }

    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::default();

        let positions = match self.repository.open_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load open positions");
                report.errors = 1;
                report.consecutive_failed_cycles = self.consecutive_failed_cycles();
                return report;
            }
        };

        for position in positions {
            report.checked += 1;
            let position_id = position.id;
            let symbol = position.symbol.clone();

            match self.check_position(position, now).await {
                Ok(Outcome::Updated) => report.updated += 1,
                Ok(Outcome::Closed(reason, cleanup)) => {
                    match reason {
                        CloseReason::TpHit => report.tp_hits += 1,
                        CloseReason::SlHit => report.sl_hits += 1,
                        CloseReason::Manual => report.manual_closes += 1,
                    }
                    if !cleanup.success {
                        report.cleanup_failures += 1;
                    }
                }
                Ok(Outcome::AlreadyClosed) => report.already_closed += 1,
                Err(e) => {
                    report.errors += 1;
                    if e.is_venue_unreachable() {
                        report.unreachable_errors += 1;
                    }
                    tracing::warn!(
                        position_id = %position_id,
                        symbol = %symbol,
                        error = %e,
                        "Failed to check position"
                    );
                }
            }
        }

        if report.checked > 0 && report.unreachable_errors == report.checked {
            let failed = self.consecutive_failed_cycles.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::error!(
                positions = report.checked,
                consecutive_failed_cycles = failed,
                "🚨 Venue unreachable for every open position"
            );
            report.consecutive_failed_cycles = failed;
        } else {
            self.consecutive_failed_cycles.store(0, Ordering::SeqCst);
        }

        if report.closed() > 0 {
            tracing::info!(
                tp = report.tp_hits,
                sl = report.sl_hits,
                manual = report.manual_closes,
                "Closed {} position(s) this cycle",
                report.closed()
            );
        }

        report
    }

    async fn check_position(&self, position: Position, now: DateTime<Utc>) -> Result<Outcome, CoreError> {
        let venue_position = self
            .venue_call("get_position", self.venue.get_position(&position.symbol))
            .await?;

        let Some(venue_position) = venue_position else {
            let detail = format!("position {} is OPEN locally but absent on venue", position.id);
            return self.close_mismatched(position, detail, now).await;
        };

        if venue_position.side != position.side {
            let detail = format!(
                "position {} is {} locally but {} on venue",
                position.id,
                position.side.as_str(),
                venue_position.side.as_str()
            );
            return self.close_mismatched(position, detail, now).await;
        }

        let mark = if venue_position.mark_price > 0.0 {
            venue_position.mark_price
        } else {
            self.venue_call("get_mark_price", self.venue.get_mark_price(&position.symbol))
                .await?
        };

        let unrealized = position.pnl_at(mark);
        self.repository
            .update_unrealized_pnl(position.id, unrealized)
            .await?;

        match position.exit_trigger(mark) {
            Some(reason) => self.close_position(position, mark, reason, now).await,
            None => Ok(Outcome::Updated),
        }
    }

    /// Venue truth contradicts the local record: log it and close MANUAL at the best known price
    async fn close_mismatched(
        &self,
        position: Position,
        detail: String,
        now: DateTime<Utc>,
    ) -> Result<Outcome, CoreError> {
        let exit_price = self.best_exit_price(&position).await;
        let mismatch = CoreError::ReconciliationMismatch {
            symbol: position.symbol.clone(),
            detail: format!("{}; closing at {}", detail, exit_price),
        };
        tracing::warn!(position_id = %position.id, "{}", mismatch);

        self.close_position(position, exit_price, CloseReason::Manual, now)
            .await
    }

    async fn close_position(
        &self,
        position: Position,
        exit_price: f64,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> Result<Outcome, CoreError> {
        let mut closed = position;
        closed.close(exit_price, reason, now)?;

        if !self.repository.close(&closed).await? {
            tracing::debug!(position_id = %closed.id, "Position already closed elsewhere");
            return Ok(Outcome::AlreadyClosed);
        }

        let emoji = match reason {
            CloseReason::TpHit => "🎯",
            CloseReason::SlHit => "🛑",
            CloseReason::Manual => "✋",
        };
        tracing::info!(
            position_id = %closed.id,
            symbol = %closed.symbol,
            side = closed.side.as_str(),
            exit_price,
            realized_pnl = closed.realized_pnl,
            "{} Position closed: {}",
            emoji,
            reason.as_str()
        );

        let cleanup = self.cleanup.cleanup(&closed).await;
        if !cleanup.success {
            tracing::warn!(
                position_id = %closed.id,
                failed = cleanup.failed_count,
                "Some conditional orders could not be cancelled"
            );
        }

        if let Err(e) = self.performance.on_position_closed(&closed).await {
            tracing::warn!(position_id = %closed.id, error = %e, "Performance update failed");
        }

        Ok(Outcome::Closed(reason, cleanup))
    }

    /// Last fill, else mark, else entry
    async fn best_exit_price(&self, position: &Position) -> f64 {
        match self
            .venue_call("last_fill_price", self.venue.last_fill_price(&position.symbol))
            .await
        {
            Ok(Some(price)) if price > 0.0 => return price,
            Ok(_) => {}
            Err(e) => tracing::debug!(symbol = %position.symbol, error = %e, "No last fill price"),
        }

        match self
            .venue_call("get_mark_price", self.venue.get_mark_price(&position.symbol))
            .await
        {
            Ok(price) if price > 0.0 => price,
            Ok(_) => position.entry_price,
            Err(e) => {
                tracing::debug!(symbol = %position.symbol, error = %e, "No mark price, using entry");
                position.entry_price
            }
        }
    }

    async fn venue_call<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, CoreError>>,
    ) -> Result<T, CoreError> {
        match timeout(self.venue_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::VenueUnreachable(format!(
                "{} timed out after {:?}",
                operation, self.venue_timeout
            ))),
        }
    }
}
