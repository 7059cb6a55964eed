//! The polling loop.
//!
//! One task owns all upstream I/O. Each tick reads the market set, queries
//! market books in bounded batches, suppresses unchanged markets, settles
//! markets that have just closed and hands events to the publisher. Errors
//! are absorbed at the tick boundary; only cancellation ends the loop.

use crate::backoff::Backoff;
use crate::change_detector::fingerprint;
use crate::settlement::{resolve, SettlementResolver};
use crate::state::{PollerState, PollerStats, PollerStatsSnapshot};
use auth::{AuthError, SessionManager};
use chrono::Utc;
use exchange_core::api::{MarketBookBatch, MarketBookSource};
use exchange_core::config::PollerConfig;
use exchange_core::db::ResultsSink;
use exchange_core::market_set::MarketSetProvider;
use exchange_core::types::{MarketBook, MarketStatus, UpdateEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Receiver of update events. Must not block.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: UpdateEvent);
}

/// Summary of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub markets: usize,
    pub batches: usize,
    pub skipped_batches: usize,
    pub published: usize,
    pub settled: usize,
    pub malformed: usize,
    pub rate_limited: bool,
    pub idle: bool,
}

enum FetchError {
    Auth(AuthError),
    Upstream(exchange_core::Error),
}

pub struct Poller {
    config: PollerConfig,
    sessions: Arc<SessionManager>,
    source: Arc<dyn MarketBookSource>,
    markets: Arc<dyn MarketSetProvider>,
    resolver: SettlementResolver,
    publisher: Arc<dyn EventPublisher>,
    state: PollerState,
    backoff: Backoff,
    /// Batch to start the next tick from, so a rate-limited tick cannot keep
    /// starving the batches after the one that tripped it.
    batch_cursor: usize,
    stats: Arc<PollerStats>,
}

impl Poller {
    pub fn new(
        config: PollerConfig,
        sessions: Arc<SessionManager>,
        source: Arc<dyn MarketBookSource>,
        markets: Arc<dyn MarketSetProvider>,
        sink: Arc<dyn ResultsSink>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let backoff = Backoff::new(
            config.poll_interval(),
            config.backoff_ceiling(),
            config.unavailable_backoff(),
        );
        Self {
            config,
            sessions,
            source,
            markets,
            resolver: SettlementResolver::new(sink),
            publisher,
            state: PollerState::new(),
            backoff,
            batch_cursor: 0,
            stats: Arc::new(PollerStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<PollerStats> {
        self.stats.clone()
    }

    pub fn state(&self) -> &PollerState {
        &self.state
    }

    /// Current backoff interval, ignoring any one-off penalty.
    pub fn current_interval(&self) -> Duration {
        self.backoff.current()
    }

    /// Run the loop on its own task until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> PollerHandle {
        let stats = self.stats();
        let task = tokio::spawn(self.run(cancel.clone()));
        PollerHandle {
            cancel,
            task,
            stats,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            interval_secs = self.config.poll_interval_secs,
            batch_size = self.config.max_markets_per_batch,
            "Poller started"
        );

        while !cancel.is_cancelled() {
            let report = self.tick().await;
            let delay = self.next_delay(&report);
            debug!(delay_ms = delay.as_millis() as u64, "Sleeping until next tick");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(ticks = self.stats.snapshot().ticks, "Poller stopped");
    }

    /// Delay before the tick after `report`.
    pub fn next_delay(&mut self, report: &TickReport) -> Duration {
        if report.idle {
            self.config.idle_interval()
        } else {
            self.backoff.next_delay()
        }
    }

    /// Execute one polling pass.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        let market_ids = match self.markets.get_market_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Failed to read market set");
                Vec::new()
            }
        };

        let removed = self.state.retain_current(&market_ids);
        if removed > 0 {
            debug!(removed, "Dropped markets no longer tracked");
        }

        self.retry_pending_settlements(&mut report).await;

        if market_ids.is_empty() {
            report.idle = true;
            self.stats.record_tick(self.state.len());
            debug!("No markets to poll");
            return report;
        }
        report.markets = market_ids.len();

        let batch_size = self.config.max_markets_per_batch.max(1);
        let batches: Vec<&[String]> = market_ids.chunks(batch_size).collect();
        let start = self.batch_cursor % batches.len();
        let mut fetched = false;

        for step in 0..batches.len() {
            let index = (start + step) % batches.len();
            let batch = batches[index];
            report.batches += 1;

            match self.fetch_batch(batch).await {
                Ok(books) => {
                    fetched = true;
                    report.malformed += books.malformed.len();
                    for book in &books.books {
                        self.process_book(book, &mut report).await;
                    }
                }
                Err(FetchError::Upstream(e)) if e.is_rate_limited() => {
                    self.backoff.on_rate_limited();
                    self.stats.record_rate_limited();
                    report.rate_limited = true;
                    report.skipped_batches += 1;
                    self.batch_cursor = (index + 1) % batches.len();
                    warn!(
                        error = %e,
                        batch = index,
                        next_interval_secs = self.backoff.current().as_secs(),
                        "Rate limited, abandoning remaining batches"
                    );
                    break;
                }
                Err(FetchError::Upstream(e)) => {
                    report.skipped_batches += 1;
                    match e {
                        exchange_core::Error::UpstreamUnavailable { .. } => {
                            self.backoff.on_unavailable();
                            warn!(error = %e, batch = report.batches, "Upstream unavailable");
                        }
                        exchange_core::Error::Unauthorized { .. } => {
                            self.sessions.invalidate().await;
                            warn!(error = %e, batch = report.batches, "Session rejected after re-login, skipping batch");
                        }
                        _ => warn!(error = %e, batch = report.batches, "Market book request failed"),
                    }
                }
                Err(FetchError::Auth(e)) => {
                    report.skipped_batches += 1;
                    self.backoff.on_unavailable();
                    if e.is_fatal() {
                        error!(error = %e, "Cannot authenticate with exchange, skipping tick");
                    } else {
                        warn!(error = %e, "Login failed, skipping tick");
                    }
                    break;
                }
            }
        }

        if fetched && !report.rate_limited {
            self.backoff.on_success();
        }

        self.stats.record_tick(self.state.len());
        info!(
            markets = report.markets,
            batches = report.batches,
            skipped = report.skipped_batches,
            published = report.published,
            settled = report.settled,
            "Tick complete"
        );
        report
    }

    /// Query one batch, re-authenticating once if the session was rejected.
    async fn fetch_batch(&self, market_ids: &[String]) -> Result<MarketBookBatch, FetchError> {
        let token = self.sessions.ensure_valid().await.map_err(FetchError::Auth)?;

        match self.source.list_market_books(&token, market_ids).await {
            Err(e) if e.is_unauthorized() => {
                info!(error = %e, "Session rejected, re-authenticating");
                self.sessions.invalidate().await;
                let token = self.sessions.ensure_valid().await.map_err(FetchError::Auth)?;
                self.source
                    .list_market_books(&token, market_ids)
                    .await
                    .map_err(FetchError::Upstream)
            }
            other => other.map_err(FetchError::Upstream),
        }
    }

    async fn process_book(&mut self, book: &MarketBook, report: &mut TickReport) {
        let fp = fingerprint(book);
        let changed = self.state.detector.has_changed(&book.market_id, fp);

        let tracked = self.state.track(&book.market_id);
        let previous_status = tracked.last_status.replace(book.status);
        tracked.last_fingerprint = Some(fp);

        let closing = book.status == MarketStatus::Closed
            && previous_status != Some(MarketStatus::Closed)
            && !tracked.settled;

        if closing {
            let settlement = resolve(book, Utc::now());
            let event = UpdateEvent::market_closed(book, settlement.clone());
            match self.resolver.persist(&settlement).await {
                Ok(_) => {
                    self.state.mark_settled(&book.market_id);
                    self.stats.record_settlement();
                    report.settled += 1;
                }
                Err(e) => {
                    warn!(market_id = %book.market_id, error = %e, "Settlement write failed, will retry");
                    self.state.track(&book.market_id).pending_settlement = Some(settlement);
                }
            }
            self.emit(event, report);
            return;
        }

        // A closed market has had its market_closed; later changes are not news.
        if changed && book.status != MarketStatus::Closed {
            self.emit(UpdateEvent::market_update(book, Utc::now()), report);
        }
    }

    /// Retry failed settlement writes, including for markets no longer polled.
    async fn retry_pending_settlements(&mut self, report: &mut TickReport) {
        for pending in self.state.pending_settlements() {
            match self.resolver.persist(&pending).await {
                Ok(_) => {
                    info!(market_id = %pending.market_id, "Stored pending settlement");
                    self.state.mark_settled(&pending.market_id);
                    self.stats.record_settlement();
                    report.settled += 1;
                }
                Err(e) => {
                    warn!(market_id = %pending.market_id, error = %e, "Settlement write still failing");
                }
            }
        }
    }

    fn emit(&self, event: UpdateEvent, report: &mut TickReport) {
        debug!(market_id = %event.market_id, kind = event.kind().as_str(), "Publishing event");
        self.publisher.publish(event);
        self.stats.record_published();
        report.published += 1;
    }
}

/// Handle to a spawned poller.
pub struct PollerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    stats: Arc<PollerStats>,
}

impl PollerHandle {
    pub fn stats(&self) -> PollerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn shared_stats(&self) -> Arc<PollerStats> {
        self.stats.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the loop to stop and wait for it to finish its current tick.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "Poller task ended abnormally");
        }
    }
}
