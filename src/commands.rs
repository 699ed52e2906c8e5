//! 对外接口：启动/取消扫描、地理编码、详情查询、统计

use async_channel::Receiver;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ScoutConfig;
use crate::detail_proxy::{DetailProxy, DocumentFetcher};
use crate::error::{FetchError, ScoutError};
use crate::geocoding::{GeoResolver, GeoapifyProvider, GeocodeProvider, GeocodeResult, NominatimProvider};
use crate::http::build_client;
use crate::listings::extract::{extract_detail, ListingDetail};
use crate::listings::{CachedListings, DetailEnricher, KleinanzeigenSource, ListingSource};
use crate::route::SpatialIndex;
use crate::scanner::{
    AcceptedListing, Cluster, Pipeline, ResultAggregator, RunContext, RunRegistry, ScanEvent,
    ScanPlan, ScanRequest, ScanStats, Scheduler, SchedulerSettings, StatsSnapshot,
};

/// 运行信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub id: Uuid,
    pub generation: u64,
    pub started_at: DateTime<Utc>,
    pub samples: usize,
}

/// 一次扫描的句柄
pub struct RunHandle {
    info: RunInfo,
    events: Receiver<ScanEvent>,
    ctx: RunContext,
}

impl RunHandle {
    pub fn info(&self) -> &RunInfo {
        &self.info
    }

    pub fn generation(&self) -> u64 {
        self.info.generation
    }

    pub fn events(&self) -> &Receiver<ScanEvent> {
        &self.events
    }

    /// 下一个事件；终止事件之后返回 None
    pub async fn next_event(&self) -> Option<ScanEvent> {
        self.events.recv().await.ok()
    }

    /// 读取全部事件直到通道关闭
    pub async fn collect(self) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.recv().await {
            events.push(event);
        }
        events
    }

    pub fn cancel(&self) {
        log::info!("[Scanner] 取消运行 {}", self.info.generation);
        self.ctx.cancel();
    }
}

pub struct Scout {
    config: ScoutConfig,
    providers: Vec<Arc<dyn GeocodeProvider>>,
    source: Arc<dyn ListingSource>,
    fetcher: Arc<dyn DocumentFetcher>,
    registry: Arc<RunRegistry>,
    current: RwLock<Option<Arc<ResultAggregator>>>,
    stats: Arc<ScanStats>,
}

impl Scout {
    /// 按配置创建真实的上游组件
    pub fn new(config: ScoutConfig) -> Result<Self, ScoutError> {
        config.validate()?;
        let endpoints = &config.endpoints;
        let client = build_client(config.request_timeout_secs, &endpoints.user_agent)?;

        let mut providers: Vec<Arc<dyn GeocodeProvider>> = Vec::new();
        match endpoints.geoapify_api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => {
                providers.push(Arc::new(GeoapifyProvider::new(
                    client.clone(),
                    &endpoints.geoapify_url,
                    key.to_string(),
                    &config.country_code,
                )));
            }
            _ => log::warn!("[Geoapify] 未配置 API Key，只使用 Nominatim"),
        }
        providers.push(Arc::new(NominatimProvider::new(
            client.clone(),
            &endpoints.nominatim_url,
            &config.country_code,
            Duration::from_millis(config.throttle_interval_ms),
            config.retry_attempts,
        )));

        let fetcher: Arc<dyn DocumentFetcher> = Arc::new(DetailProxy::new(&config)?);
        let source: Arc<dyn ListingSource> = Arc::new(KleinanzeigenSource::new(
            client,
            endpoints.listings_api_urls.clone(),
            &endpoints.listings_site_url,
            fetcher.clone(),
        )
        .with_page_count(config.page_count));

        Ok(Self::with_components(config, providers, source, fetcher))
    }

    /// 使用给定的上游组件（测试时传入假实现）
    pub fn with_components(
        config: ScoutConfig,
        providers: Vec<Arc<dyn GeocodeProvider>>,
        source: Arc<dyn ListingSource>,
        fetcher: Arc<dyn DocumentFetcher>,
    ) -> Self {
        Self {
            config,
            providers,
            source,
            fetcher,
            registry: RunRegistry::new(),
            current: RwLock::new(None),
            stats: Arc::new(ScanStats::default()),
        }
    }

    pub fn config(&self) -> &ScoutConfig {
        &self.config
    }

    /// 每次运行新建，服务禁用状态只在本次运行内有效
    fn resolver(&self) -> Arc<GeoResolver> {
        Arc::new(GeoResolver::new(
            self.providers.clone(),
            self.config.country.clone(),
            self.config.country_code.clone(),
        ))
    }

    /// 开始新扫描，正在进行的扫描被取代
    ///
    /// 必须在 tokio 运行时内调用。参数无效时返回错误，不影响当前运行。
    pub fn start(&self, request: ScanRequest) -> Result<RunHandle, ScoutError> {
        request.validate()?;

        let plan = ScanPlan::prepare(&request);
        let index = if self.config.force_linear_scan {
            SpatialIndex::linear(&request.route)
        } else {
            SpatialIndex::build(&request.route)
        };
        let aggregator = Arc::new(ResultAggregator::new(Arc::new(index), request.corridor_m));

        let ctx = self.registry.begin();
        *self.current.write() = Some(aggregator.clone());
        self.stats.record_run();

        let info = RunInfo {
            id: Uuid::new_v4(),
            generation: ctx.generation(),
            started_at: Utc::now(),
            samples: plan.samples.len(),
        };
        log::info!(
            "[Scanner] 新运行 {} (代际 {})，搜索 \"{}\"，步长 {} 米，走廊 {} 米",
            info.id,
            info.generation,
            request.query.trim(),
            request.step_m,
            request.corridor_m
        );

        let resolver = self.resolver();
        let pipeline = Pipeline {
            resolver: resolver.clone(),
            listings: CachedListings::new(self.source.clone()),
            enricher: DetailEnricher::new(self.fetcher.clone(), resolver),
        };

        let (tx, rx) = async_channel::unbounded();
        let scheduler = Arc::new(Scheduler::new(
            ctx.clone(),
            plan,
            pipeline,
            aggregator,
            tx,
            self.stats.clone(),
            SchedulerSettings::from(&self.config),
        ));
        tokio::spawn(scheduler.run());

        Ok(RunHandle {
            info,
            events: rx,
            ctx,
        })
    }

    /// 取消当前运行
    pub fn cancel_current(&self) -> bool {
        match self.registry.cancel_current() {
            Some(generation) => {
                log::info!("[Scanner] 取消运行 {}", generation);
                true
            }
            None => false,
        }
    }

    pub async fn geocode(&self, text: &str) -> GeocodeResult {
        self.resolver()
            .forward_geocode(text, &CancellationToken::new())
            .await
    }

    pub async fn autocomplete(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return vec![];
        }
        self.resolver()
            .autocomplete(text, &CancellationToken::new())
            .await
    }

    /// 单条广告详情，经中转抓取
    pub async fn listing_detail(&self, url: &str) -> Result<ListingDetail, FetchError> {
        let html = self
            .fetcher
            .fetch_document(url, &CancellationToken::new())
            .await?;
        Ok(extract_detail(&html))
    }

    /// 当前运行的聚类快照
    pub fn clusters(&self) -> Vec<Cluster> {
        self.current
            .read()
            .as_ref()
            .map(|agg| agg.clusters())
            .unwrap_or_default()
    }

    /// 当前运行已接受的广告
    pub fn accepted(&self) -> Vec<AcceptedListing> {
        self.current
            .read()
            .as_ref()
            .map(|agg| agg.accepted())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::RoutePoint;
    use crate::geocoding::GeocodeHit;
    use crate::testing::{FakeFetcher, FakeGeocoder, FakeListings};

    fn scout(geocoder: FakeGeocoder, fetcher: FakeFetcher) -> Scout {
        Scout::with_components(
            ScoutConfig::default(),
            vec![Arc::new(geocoder)],
            Arc::new(FakeListings::new()),
            Arc::new(fetcher),
        )
    }

    #[tokio::test]
    async fn test_malformed_request_does_not_start_run() {
        let scout = scout(FakeGeocoder::new("geo"), FakeFetcher::new());
        let request = ScanRequest::new(vec![RoutePoint::new(9.1, 48.7)], "sofa", 5000.0, 2000.0);
        assert!(scout.start(request).is_err());
        assert_eq!(scout.stats().runs_started, 0);
        assert!(!scout.cancel_current());
    }

    #[tokio::test]
    async fn test_geocode_and_autocomplete() {
        let hit = GeocodeHit {
            lat: 48.74,
            lon: 9.31,
            label: "Esslingen am Neckar".to_string(),
        };
        let scout = scout(
            FakeGeocoder::new("geo").with_place("Esslingen", hit),
            FakeFetcher::new(),
        );
        assert_eq!(scout.geocode("Esslingen").await.coords(), Some((48.74, 9.31)));
        assert!(!scout.geocode("  ").await.is_resolved());
        assert_eq!(scout.autocomplete("ess").await, vec!["Esslingen".to_string()]);
        assert!(scout.autocomplete("").await.is_empty());
    }

    #[tokio::test]
    async fn test_listing_detail_extracts_fields() {
        let url = "https://www.kleinanzeigen.de/s-anzeige/sofa/1";
        let fetcher = FakeFetcher::new().with_page(
            url,
            "<html><body><h1>Sofa</h1><p>70173 Stuttgart</p><p>80 € VB</p></body></html>",
        );
        let scout = scout(FakeGeocoder::new("geo"), fetcher);
        let detail = scout.listing_detail(url).await.unwrap();
        assert_eq!(detail.postal.as_deref(), Some("70173"));
        assert_eq!(detail.city.as_deref(), Some("Stuttgart"));

        let missing = scout.listing_detail("https://www.kleinanzeigen.de/s-anzeige/x/2").await;
        assert!(matches!(missing, Err(FetchError::Status(404))));
    }
}
