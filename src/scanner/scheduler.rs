//! 扫描调度
//!
//! W 个 worker 共享一个原子游标依次领取采样点。每个采样点：
//! 反向编码区域 -> 获取列表（运行内缓存）-> 去重领取 -> 分批补全详情 ->
//! 走廊过滤 -> 聚类 -> 推送事件。

use super::aggregator::{ResultAggregator, Verdict};
use super::run::RunContext;
use super::types::{ScanEvent, ScanRequest, Terminal};
use super::ScanStats;
use crate::cache::ScopedCache;
use crate::config::ScoutConfig;
use crate::error::FetchError;
use crate::geocoding::{AreaCode, GeoResolver};
use crate::listings::{CachedListings, DetailEnricher, EnrichedListing, ListingQuery, RawListing};
use crate::route::{densify, RouteSample, RouteSampler};
use async_channel::Sender;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub workers: usize,
    /// 每个采样点最多补全的新广告数
    pub detail_limit: usize,
    /// 详情补全的并发批大小
    pub detail_batch: usize,
}

impl From<&ScoutConfig> for SchedulerSettings {
    fn from(config: &ScoutConfig) -> Self {
        Self {
            workers: config.worker_count.max(1),
            detail_limit: config.detail_limit,
            detail_batch: config.detail_batch.max(1),
        }
    }
}

/// 一次运行使用的上游组件
pub struct Pipeline {
    pub resolver: Arc<GeoResolver>,
    pub listings: CachedListings,
    pub enricher: DetailEnricher,
}

/// 采样结果与列表查询
pub struct ScanPlan {
    pub samples: Vec<RouteSample>,
    pub query: ListingQuery,
}

impl ScanPlan {
    /// 稀疏路线先按四分之一步长加密再采样
    pub fn prepare(request: &ScanRequest) -> Self {
        let dense = densify(&request.route, request.step_m / 4.0);
        let samples: Vec<RouteSample> = RouteSampler::new(&dense, request.step_m).samples().collect();
        Self {
            samples,
            query: request.listing_query(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleOutcome {
    /// 区域已解析且列表获取成功（可能为空）
    Fetched,
    Unresolved,
    Cancelled,
}

/// 区域缓存的键：坐标保留三位小数
fn area_key(lat: f64, lon: f64) -> (i64, i64) {
    ((lat * 1000.0).round() as i64, (lon * 1000.0).round() as i64)
}

pub struct Scheduler {
    ctx: RunContext,
    plan: ScanPlan,
    pipeline: Pipeline,
    aggregator: Arc<ResultAggregator>,
    events: Sender<ScanEvent>,
    stats: Arc<ScanStats>,
    settings: SchedulerSettings,
    cursor: AtomicUsize,
    completed: AtomicUsize,
    fetched: AtomicUsize,
    progress: Mutex<u8>,
    areas: ScopedCache<(i64, i64), AreaCode>,
}

impl Scheduler {
    pub fn new(
        ctx: RunContext,
        plan: ScanPlan,
        pipeline: Pipeline,
        aggregator: Arc<ResultAggregator>,
        events: Sender<ScanEvent>,
        stats: Arc<ScanStats>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            ctx,
            plan,
            pipeline,
            aggregator,
            events,
            stats,
            settings,
            cursor: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            fetched: AtomicUsize::new(0),
            progress: Mutex::new(0),
            areas: ScopedCache::new(),
        }
    }

    /// 执行到结束，恰好发送一个终止事件
    pub async fn run(self: Arc<Self>) -> Terminal {
        let total = self.plan.samples.len();
        let workers = self.settings.workers.min(total);

        log::info!(
            "[Scanner] 运行 {} 开始，共 {} 个采样点，{} 个 worker",
            self.ctx.generation(),
            total,
            workers
        );

        if total == 0 {
            self.report_progress(0, 0);
        }

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let this = self.clone();
                tokio::spawn(async move { this.worker(id).await })
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("[Scanner] worker 异常退出: {}", e);
            }
        }

        let terminal = self.terminal(total);
        log::info!(
            "[Scanner] 运行 {} 结束: {:?}，完成 {}/{}，接受 {} 条",
            self.ctx.generation(),
            terminal,
            self.completed.load(Ordering::Relaxed),
            total,
            self.aggregator.accepted_count()
        );

        let _ = self.events.try_send(ScanEvent::Finished(terminal.clone()));
        self.events.close();
        terminal
    }

    fn terminal(&self, total: usize) -> Terminal {
        if self.ctx.is_cancelled() || !self.ctx.is_live() {
            return Terminal::Aborted;
        }
        if total > 0 && self.fetched.load(Ordering::Relaxed) == 0 {
            return Terminal::Error("所有采样点都无法解析区域或获取列表".to_string());
        }
        Terminal::Done
    }

    async fn worker(&self, id: usize) {
        loop {
            if self.ctx.is_cancelled() {
                log::debug!("[Scanner] worker {} 收到取消", id);
                break;
            }

            let next = self.cursor.fetch_add(1, Ordering::SeqCst);
            let Some(sample) = self.plan.samples.get(next) else {
                break;
            };

            match self.process_sample(sample).await {
                SampleOutcome::Cancelled => break,
                SampleOutcome::Fetched => {
                    self.fetched.fetch_add(1, Ordering::Relaxed);
                }
                SampleOutcome::Unresolved => {}
            }

            let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
            self.report_progress(done, self.plan.samples.len());
        }
    }

    async fn process_sample(&self, sample: &RouteSample) -> SampleOutcome {
        let cancel = self.ctx.token();
        let (lat, lon) = (sample.point.lat, sample.point.lon);

        let Some(area) = self.area_for(lat, lon).await else {
            if cancel.is_cancelled() {
                return SampleOutcome::Cancelled;
            }
            log::info!("[Scanner] 采样点 {} ({:.5}, {:.5}) 无法解析区域，跳过", sample.index, lat, lon);
            return SampleOutcome::Unresolved;
        };

        let listings = match self.pipeline.listings.fetch(&self.plan.query, &area, cancel).await {
            Ok(listings) => listings,
            Err(FetchError::Cancelled) => return SampleOutcome::Cancelled,
            Err(_) => return SampleOutcome::Unresolved,
        };

        let Some(fresh) = self.claim_fresh(&listings) else {
            return SampleOutcome::Cancelled;
        };
        log::debug!(
            "[Scanner] 采样点 {} 区域 {}: {} 条候选，{} 条新",
            sample.index,
            area,
            listings.len(),
            fresh.len()
        );

        for batch in fresh.chunks(self.settings.detail_batch) {
            let mut pending: FuturesUnordered<_> = batch
                .iter()
                .map(|listing| self.pipeline.enricher.enrich(listing, true, cancel))
                .collect();

            while let Some(enriched) = pending.next().await {
                if cancel.is_cancelled() {
                    return SampleOutcome::Cancelled;
                }
                self.apply(enriched, sample.index);
            }
        }

        SampleOutcome::Fetched
    }

    async fn area_for(&self, lat: f64, lon: f64) -> Option<AreaCode> {
        let key = area_key(lat, lon);
        if let Some(area) = self.areas.get(&key) {
            return Some(area);
        }
        let area = self
            .pipeline
            .resolver
            .reverse_area(lat, lon, self.ctx.token())
            .await?;
        Some(self.areas.put(key, area))
    }

    /// 领取未见过的广告，最多 `detail_limit` 条；未领取的留给后续采样点
    fn claim_fresh(&self, listings: &[RawListing]) -> Option<Vec<RawListing>> {
        let mut fresh = Vec::new();
        for listing in listings {
            if fresh.len() >= self.settings.detail_limit {
                break;
            }
            if self.ctx.guarded(|| self.aggregator.claim(&listing.url))? {
                fresh.push(listing.clone());
            }
        }
        Some(fresh)
    }

    fn apply(&self, enriched: EnrichedListing, sample_index: usize) {
        match self.aggregator.check(&enriched) {
            Verdict::Inside { lat, lon, distance_m } => {
                self.ctx.guarded(|| {
                    let (accepted, update) =
                        self.aggregator.accept(enriched, lat, lon, distance_m, sample_index);
                    self.stats.record_listing();
                    let _ = self.events.try_send(ScanEvent::Listing(accepted));
                    let _ = self.events.try_send(ScanEvent::Cluster(update));
                });
            }
            Verdict::Outside { distance_m } => {
                log::debug!("[Scanner] {} 距路线 {:.0} 米，超出走廊", enriched.url(), distance_m);
            }
            Verdict::Unlocated => {
                log::debug!("[Scanner] {} 无法定位，丢弃", enriched.url());
            }
        }
    }

    /// 进度只增不减；在锁内比较并发送以保证事件顺序
    fn report_progress(&self, done: usize, total: usize) {
        let percent = if total == 0 {
            100
        } else {
            (done.min(total) * 100 / total) as u8
        };
        self.ctx.guarded(|| {
            let mut last = self.progress.lock();
            if percent > *last {
                *last = percent;
                let _ = self.events.try_send(ScanEvent::Progress(percent));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::RoutePoint;

    fn request(route: Vec<RoutePoint>, step_m: f64) -> ScanRequest {
        ScanRequest::new(route, "fahrrad", step_m, 2000.0)
    }

    #[test]
    fn test_plan_densifies_sparse_route() {
        let route = vec![RoutePoint::new(9.10, 48.70), RoutePoint::new(9.30, 48.75)];
        let plan = ScanPlan::prepare(&request(route, 5000.0));
        assert_eq!(plan.samples.len(), 3);
        assert_eq!(plan.query.radius_km, 3);
        for (i, s) in plan.samples.iter().enumerate() {
            assert_eq!(s.index, i);
        }
    }

    #[test]
    fn test_plan_short_route_has_no_samples() {
        let route = vec![RoutePoint::new(9.10, 48.70), RoutePoint::new(9.101, 48.70)];
        assert!(ScanPlan::prepare(&request(route, 5000.0)).samples.is_empty());
    }

    #[test]
    fn test_area_key_rounds_to_three_decimals() {
        assert_eq!(area_key(48.70049, 9.10001), area_key(48.7, 9.1));
        assert_ne!(area_key(48.7006, 9.1), area_key(48.7, 9.1));
    }
}
