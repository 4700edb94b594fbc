//! Drives the pipeline on 6-hour boundaries.
//!
//! State machine: `Idle -> Waiting(next boundary) -> Running -> Idle`. A stop
//! signal interrupts `Waiting` (or the error backoff), after which one final
//! pass runs before the task ends in `Stopped`.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::compressor::{CompressionReport, SummaryCompressor};
use crate::config::ConsolidationConfig;
use crate::consolidation::{PeriodConsolidator, PeriodReport};
use crate::edges::EdgeBuilder;
use crate::error::ConsolidationResult;
use crate::period::{floor_to_period, is_first_of_month, next_run, Period};
use crate::retention::{RetentionManager, RetentionReport};
use crate::rollup::{DailyRollup, RollupReport};
use crate::store::GraphStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Waiting { next_run: DateTime<Utc> },
    Running,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Catch-up windows examined this pass, whether or not they had work.
    pub periods_visited: usize,
    pub periods_consolidated: usize,
    pub summaries_created: usize,
    pub summaries_failed: usize,
    pub edges_created: usize,
    pub raw_nodes_deleted: usize,
    pub correlations_deleted: usize,
    pub cleanup_skipped: usize,
    pub rollup: Option<RollupReport>,
    pub compression: Option<CompressionReport>,
}

impl RunReport {
    fn absorb_period(&mut self, period: &PeriodReport) {
        let created = period.created();
        if created > 0 {
            self.periods_consolidated += 1;
        }
        self.summaries_created += created;
        self.summaries_failed += period.failed();
    }

    fn absorb_retention(&mut self, retention: &RetentionReport) {
        self.raw_nodes_deleted += retention.raw_nodes_deleted;
        self.correlations_deleted += retention.correlations_deleted;
        self.cleanup_skipped += retention.cleanup_skipped;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub last_consolidation: Option<DateTime<Utc>>,
    pub periods_consolidated_total: u64,
    pub last_error: Option<String>,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self {
            state: SchedulerState::Idle,
            last_consolidation: None,
            periods_consolidated_total: 0,
            last_error: None,
        }
    }
}

pub struct Scheduler {
    store: Arc<dyn GraphStore>,
    clock: Arc<dyn Clock>,
    config: ConsolidationConfig,
    consolidator: PeriodConsolidator,
    edges: Arc<EdgeBuilder>,
    retention: RetentionManager,
    rollup: DailyRollup,
    compressor: SummaryCompressor,
    status: Arc<Mutex<SchedulerStatus>>,
    /// Catch-up resumes from here; windows before it are not rescanned.
    /// Held in memory only, so a restart scans from the oldest record again.
    catch_up_cursor: Mutex<Option<DateTime<Utc>>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn GraphStore>, clock: Arc<dyn Clock>, config: ConsolidationConfig) -> Self {
        let edges = Arc::new(EdgeBuilder::new(store.clone(), clock.clone()));
        Self {
            consolidator: PeriodConsolidator::new(store.clone(), clock.clone(), &config),
            retention: RetentionManager::new(store.clone(), clock.clone(), &config),
            rollup: DailyRollup::new(store.clone(), clock.clone(), edges.clone(), &config),
            compressor: SummaryCompressor::new(store.clone(), clock.clone(), &config),
            edges,
            store,
            clock,
            config,
            status: Arc::new(Mutex::new(SchedulerStatus::default())),
            catch_up_cursor: Mutex::new(None),
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        match self.status.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update_status(&self, f: impl FnOnce(&mut SchedulerStatus)) {
        match self.status.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn set_state(&self, state: SchedulerState) {
        self.update_status(|s| s.state = state);
    }

    fn cursor(&self) -> Option<DateTime<Utc>> {
        match self.catch_up_cursor.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_cursor(&self, at: DateTime<Utc>) {
        match self.catch_up_cursor.lock() {
            Ok(mut guard) => *guard = Some(at),
            Err(poisoned) => *poisoned.into_inner() = Some(at),
        }
    }

    /// Catch-up windows for `now`: at most `max_catch_up_periods` consecutive
    /// periods starting at the oldest unconsolidated raw record past the
    /// cursor, all closed before `now - catch_up_lag`.
    pub async fn plan(&self, now: DateTime<Utc>) -> ConsolidationResult<Vec<Period>> {
        let horizon = now - self.config.catch_up_lag();
        let since = self.cursor().unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut periods = Vec::new();
        if let Some(earliest) = self.store.earliest_unconsolidated(since).await? {
            let mut period = Period::containing(earliest);
            while period.end <= horizon && periods.len() < self.config.max_catch_up_periods {
                periods.push(period);
                period = period.next();
            }
        }
        Ok(periods)
    }

    /// One full pass: consolidate, link, clean up, and on day/month
    /// boundaries roll up and compress.
    pub async fn run_once(&self, now: DateTime<Utc>) -> ConsolidationResult<RunReport> {
        let mut report = RunReport::default();
        let backlog = self.plan(now).await?;
        if !backlog.is_empty() {
            info!(
                "[Scheduler] Catching up from {} ({} candidate periods, cap {})",
                backlog[0],
                backlog.len(),
                self.config.max_catch_up_periods
            );
        }

        let mut worked = 0;
        let mut retry_from = None;
        for period in &backlog {
            let period_report = self.consolidate_and_link(period, &mut report).await;
            report.periods_visited += 1;
            if period_report.failed() > 0 && retry_from.is_none() {
                retry_from = Some(period.start);
            }
            if period_report.created() > 0 || period_report.failed() > 0 {
                worked += 1;
            }
        }
        if let Some(last) = backlog.last() {
            let resume = retry_from.unwrap_or(last.end);
            debug!("[Scheduler] Catch-up resumes from {}", resume);
            self.set_cursor(resume);
        }
        if worked == 0 {
            let period = Period::last_closed(now);
            self.consolidate_and_link(&period, &mut report).await;
        }

        match self.retention.run().await {
            Ok(retention) => report.absorb_retention(&retention),
            Err(e) => warn!("[Scheduler] Retention pass failed: {}", e),
        }

        let boundary = floor_to_period(now);
        if boundary.hour() == 0 {
            match self.run_rollups(now).await {
                Ok(r) => report.rollup = Some(r),
                Err(e) => warn!("[Scheduler] Daily rollup failed: {}", e),
            }
            if is_first_of_month(boundary) {
                match self.run_compression(now).await {
                    Ok(c) => report.compression = Some(c),
                    Err(e) => warn!("[Scheduler] Compression failed: {}", e),
                }
            }
        }

        let periods = report.periods_consolidated as u64;
        self.update_status(|s| {
            s.last_consolidation = Some(now);
            s.periods_consolidated_total += periods;
            s.last_error = None;
        });
        Ok(report)
    }

    /// Daily rollups, holding back any day that still has catch-up work.
    pub async fn run_rollups(&self, now: DateTime<Utc>) -> ConsolidationResult<RollupReport> {
        let since = self.cursor().unwrap_or(DateTime::<Utc>::MIN_UTC);
        let pending = self.store.earliest_unconsolidated(since).await?;
        self.rollup.run_before(now, pending).await
    }

    pub async fn run_compression(&self, now: DateTime<Utc>) -> ConsolidationResult<CompressionReport> {
        self.compressor.run(now).await
    }

    async fn consolidate_and_link(&self, period: &Period, report: &mut RunReport) -> PeriodReport {
        let period_report = self.consolidator.consolidate(period).await;
        report.absorb_period(&period_report);

        let summaries = period_report.summary_ids();
        if !summaries.is_empty() {
            match self.edges.link_period(period, &summaries).await {
                Ok(n) => report.edges_created += n,
                Err(e) => warn!("[Scheduler] Edge creation for {} failed: {}", period, e),
            }
        }
        period_report
    }

    async fn wait_for_stop(stop_rx: &mut mpsc::Receiver<()>, duration: Duration) -> bool {
        tokio::select! {
            _ = stop_rx.recv() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    /// The scheduling loop. Returns after a stop signal (or the sender being
    /// dropped) and the final pass.
    pub async fn run(self: Arc<Self>, mut stop_rx: mpsc::Receiver<()>) {
        info!("[Scheduler] Starting consolidation loop");
        loop {
            let now = self.clock.now();
            let next = next_run(now);
            self.set_state(SchedulerState::Waiting { next_run: next });
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!("[Scheduler] Next run at {} (in {:?})", next, wait);
            if Self::wait_for_stop(&mut stop_rx, wait).await {
                break;
            }

            self.set_state(SchedulerState::Running);
            match self.run_once(self.clock.now()).await {
                Ok(report) => {
                    info!(
                        "[Scheduler] Pass complete: {} periods, {} summaries, {} edges, {} raw nodes deleted",
                        report.periods_consolidated,
                        report.summaries_created,
                        report.edges_created,
                        report.raw_nodes_deleted
                    );
                    self.set_state(SchedulerState::Idle);
                }
                Err(e) => {
                    let backoff = self.config.error_backoff();
                    error!("[Scheduler] Pass failed: {}; retrying in {:?}", e, backoff);
                    self.update_status(|s| {
                        s.state = SchedulerState::Idle;
                        s.last_error = Some(e.to_string());
                    });
                    if Self::wait_for_stop(&mut stop_rx, backoff).await {
                        break;
                    }
                }
            }
        }

        if self.config.run_final_pass_on_stop {
            info!("[Scheduler] Stop requested, running final consolidation pass");
            self.set_state(SchedulerState::Running);
            if let Err(e) = self.run_once(self.clock.now()).await {
                warn!("[Scheduler] Final pass incomplete: {}", e);
            }
        }
        self.set_state(SchedulerState::Stopped);
        info!("[Scheduler] Stopped");
    }
}
