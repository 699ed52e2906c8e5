//! 测试用的假实现，不访问网络

use crate::coords::haversine_m;
use crate::detail_proxy::DocumentFetcher;
use crate::error::FetchError;
use crate::geocoding::{AreaCode, GeocodeHit, GeocodeProvider};
use crate::http::cancellable;
use crate::listings::{ListingQuery, ListingSource, RawListing};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn raw_listing(id: &str, price: &str) -> RawListing {
    RawListing {
        id: id.to_string(),
        url: format!("https://www.kleinanzeigen.de/s-anzeige/test/{}", id),
        title: format!("Anzeige {}", id),
        raw_price: price.to_string(),
        thumbnail_url: None,
        description: String::new(),
    }
}

async fn pause(delay: Option<Duration>, cancel: &CancellationToken) -> Result<(), FetchError> {
    match delay {
        Some(d) => {
            cancellable(cancel, async {
                tokio::time::sleep(d).await;
                Ok(())
            })
            .await
        }
        None => Ok(()),
    }
}

#[derive(Clone, Copy)]
enum Failure {
    Denied,
    Network,
}

/// 地理编码服务的假实现
pub struct FakeGeocoder {
    name: &'static str,
    area: Option<AreaCode>,
    areas_at: Vec<(f64, f64, AreaCode)>,
    places: HashMap<String, GeocodeHit>,
    postals: HashMap<String, GeocodeHit>,
    failure: Option<Failure>,
    calls: AtomicUsize,
}

impl FakeGeocoder {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            area: None,
            areas_at: Vec::new(),
            places: HashMap::new(),
            postals: HashMap::new(),
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// 所有反向查询都返回该邮编
    pub fn with_area(mut self, code: &str) -> Self {
        self.area = Some(AreaCode(code.to_string()));
        self
    }

    /// 反向查询返回距离最近的登记点的邮编
    pub fn with_area_at(mut self, lat: f64, lon: f64, code: &str) -> Self {
        self.areas_at.push((lat, lon, AreaCode(code.to_string())));
        self
    }

    pub fn with_place(mut self, text: &str, hit: GeocodeHit) -> Self {
        self.places.insert(text.to_string(), hit);
        self
    }

    pub fn with_postal(mut self, postal: &str, hit: GeocodeHit) -> Self {
        self.postals.insert(postal.to_string(), hit);
        self
    }

    /// 每次请求都返回 403
    pub fn denied(mut self) -> Self {
        self.failure = Some(Failure::Denied);
        self
    }

    /// 每次请求都网络失败
    pub fn failing(mut self) -> Self {
        self.failure = Some(Failure::Network);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<(), FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure {
            Some(Failure::Denied) => Err(FetchError::Denied(403)),
            Some(Failure::Network) => Err(FetchError::Network("connection refused".to_string())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl GeocodeProvider for FakeGeocoder {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn forward(
        &self,
        text: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<GeocodeHit>, FetchError> {
        self.begin()?;
        Ok(self.places.get(text).cloned().into_iter().collect())
    }

    async fn reverse(
        &self,
        lat: f64,
        lon: f64,
        _cancel: &CancellationToken,
    ) -> Result<Option<AreaCode>, FetchError> {
        self.begin()?;
        let nearest = self
            .areas_at
            .iter()
            .map(|(alat, alon, code)| (haversine_m(lat, lon, *alat, *alon), code))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, code)| code.clone());
        Ok(nearest.or_else(|| self.area.clone()))
    }

    async fn postal(
        &self,
        postal: &str,
        _country_code: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<GeocodeHit>, FetchError> {
        self.begin()?;
        Ok(self.postals.get(postal).cloned().into_iter().collect())
    }

    async fn autocomplete(
        &self,
        text: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<String>, FetchError> {
        self.begin()?;
        Ok(self
            .places
            .keys()
            .filter(|k| k.to_lowercase().starts_with(&text.to_lowercase()))
            .cloned()
            .collect())
    }
}

/// 列表来源的假实现，按邮编返回固定结果
#[derive(Default)]
pub struct FakeListings {
    by_area: HashMap<String, Vec<RawListing>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeListings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_area(mut self, code: &str, listings: Vec<RawListing>) -> Self {
        self.by_area.insert(code.to_string(), listings);
        self
    }

    pub fn failing_area(mut self, code: &str) -> Self {
        self.failing.insert(code.to_string());
        self
    }

    /// 每次搜索前等待，等待期间可被取消
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListingSource for FakeListings {
    async fn search(
        &self,
        _query: &ListingQuery,
        area: &AreaCode,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawListing>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        pause(self.delay, cancel).await?;
        if self.failing.contains(area.as_str()) {
            return Err(FetchError::Status(502));
        }
        Ok(self.by_area.get(area.as_str()).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct FetcherState {
    pages: HashMap<String, String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// 文档抓取的假实现；未登记的地址返回 404
#[derive(Clone, Default)]
pub struct FakeFetcher {
    state: Arc<Mutex<FetcherState>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.add_page(url, html);
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.state.lock().delay = Some(delay);
        self
    }

    pub fn add_page(&self, url: &str, html: &str) {
        self.state.lock().pages.insert(url.to_string(), html.to_string());
    }

    pub fn calls(&self) -> usize {
        self.state.lock().calls.load(Ordering::SeqCst)
    }

    /// 同时进行中的请求数峰值
    pub fn peak_in_flight(&self) -> usize {
        self.state.lock().peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentFetcher for FakeFetcher {
    async fn fetch_document(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, FetchError> {
        let delay = {
            let state = self.state.lock();
            state.calls.fetch_add(1, Ordering::SeqCst);
            let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            state.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            state.delay
        };
        let paused = pause(delay, cancel).await;

        let state = self.state.lock();
        state.in_flight.fetch_sub(1, Ordering::SeqCst);
        paused?;
        state.pages.get(url).cloned().ok_or(FetchError::Status(404))
    }
}

/// 带坐标的详情页（链接数据）
pub fn detail_page(title: &str, price: &str, lat: f64, lon: f64) -> String {
    format!(
        r#"<html><head><script type="application/ld+json">
        {{"@type":"Product","name":"{}","offers":{{"price":"{}"}},
          "geo":{{"latitude":{},"longitude":{}}}}}</script></head><body></body></html>"#,
        title, price, lat, lon
    )
}
