//! Service facade over the scheduler.
//!
//! Every collaborator is wired in [`ConsolidationService::new`]; `start` and
//! `stop` only manage the background task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::ConsolidationConfig;
use crate::error::ConsolidationResult;
use crate::scheduler::{RunReport, Scheduler, SchedulerState};
use crate::store::GraphStore;

pub const SERVICE_NAME: &str = "TSDBConsolidationService";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCapabilities {
    pub service_name: String,
    pub version: String,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service_name: String,
    pub healthy: bool,
    pub state: SchedulerState,
    pub last_consolidation: Option<DateTime<Utc>>,
    pub periods_consolidated_total: u64,
    pub last_error: Option<String>,
}

struct Running {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct ConsolidationService {
    scheduler: Arc<Scheduler>,
    clock: Arc<dyn Clock>,
    running: Mutex<Option<Running>>,
}

impl ConsolidationService {
    pub fn new(store: Arc<dyn GraphStore>, clock: Arc<dyn Clock>, config: ConsolidationConfig) -> Self {
        Self {
            scheduler: Arc::new(Scheduler::new(store, clock.clone(), config)),
            clock,
            running: Mutex::new(None),
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Spawn the scheduling loop. A second call while running is a no-op.
    pub fn start(&self) {
        let Ok(mut guard) = self.running.lock() else {
            warn!("Service state lock poisoned, not starting");
            return;
        };
        if guard.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let handle = tokio::spawn(self.scheduler.clone().run(stop_rx));
        *guard = Some(Running { stop_tx, handle });
        info!("{} started", SERVICE_NAME);
    }

    /// Signal the loop, wait for its final pass and join the task.
    pub async fn stop(&self) {
        let running = match self.running.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        let Some(Running { stop_tx, handle }) = running else {
            return;
        };
        if stop_tx.send(()).await.is_err() {
            warn!("Scheduler task already gone before stop");
        }
        if let Err(e) = handle.await {
            warn!("Scheduler task ended abnormally: {}", e);
        }
        info!("{} stopped", SERVICE_NAME);
    }

    /// One synchronous pass at the current clock time.
    pub async fn consolidate_once(&self) -> ConsolidationResult<RunReport> {
        self.scheduler.run_once(self.clock.now()).await
    }

    pub fn get_capabilities(&self) -> ServiceCapabilities {
        ServiceCapabilities {
            service_name: SERVICE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            actions: [
                "consolidate_period",
                "link_summaries",
                "cleanup_raw_data",
                "daily_rollup",
                "compress_summaries",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }

    pub fn get_status(&self) -> ServiceStatus {
        let status = self.scheduler.status();
        ServiceStatus {
            service_name: SERVICE_NAME.to_string(),
            healthy: status.last_error.is_none() && status.state != SchedulerState::Stopped,
            state: status.state,
            last_consolidation: status.last_consolidation,
            periods_consolidated_total: status.periods_consolidated_total,
            last_error: status.last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryGraphStore;
    use chrono::TimeZone;

    fn service() -> ConsolidationService {
        let now = Utc.with_ymd_and_hms(2025, 7, 14, 9, 0, 0).unwrap();
        ConsolidationService::new(
            Arc::new(InMemoryGraphStore::new()),
            Arc::new(ManualClock::new(now)),
            ConsolidationConfig::default(),
        )
    }

    #[test]
    fn test_capabilities() {
        let caps = service().get_capabilities();
        assert_eq!(caps.service_name, SERVICE_NAME);
        assert!(caps.actions.contains(&"consolidate_period".to_string()));
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let svc = service();
        assert_eq!(svc.get_status().state, SchedulerState::Idle);
        svc.start();
        assert!(svc.is_running());
        svc.stop().await;
        assert!(!svc.is_running());
        let status = svc.get_status();
        assert_eq!(status.state, SchedulerState::Stopped);
        assert!(!status.healthy);
        assert!(status.last_consolidation.is_some());
    }
}
