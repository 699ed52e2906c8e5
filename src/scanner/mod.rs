//! 沿线扫描：调度、运行代际、结果汇总

pub mod aggregator;
pub mod run;
pub mod scheduler;
pub mod types;

pub use aggregator::{ResultAggregator, Verdict, CLUSTER_RADIUS_M};
pub use run::{RunContext, RunRegistry};
pub use scheduler::{Pipeline, ScanPlan, Scheduler, SchedulerSettings};
pub use types::{
    AcceptedListing, Cluster, ClusterUpdate, ListingSummary, ScanEvent, ScanRequest, Terminal,
    MIN_STEP_M,
};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// 进程内统计
#[derive(Debug, Default)]
pub struct ScanStats {
    runs_started: AtomicU64,
    listings_found: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub runs_started: u64,
    pub listings_found: u64,
}

impl ScanStats {
    pub fn record_run(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_listing(&self) {
        self.listings_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            listings_found: self.listings_found.load(Ordering::Relaxed),
        }
    }
}
