//! 地理编码
//!
//! 主服务（Geoapify，需要 Key）失败时回退到公共 Nominatim。
//! 鉴权失败的服务在本次运行内被禁用。

pub mod geoapify;
pub mod nominatim;
pub mod throttle;

pub use geoapify::GeoapifyProvider;
pub use nominatim::NominatimProvider;

use crate::error::FetchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 邮编/行政区标识，作为列表搜索的 location
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AreaCode(pub String);

impl AreaCode {
    /// 从服务返回的 postcode 字段取第一个编码
    pub fn from_postcode(raw: &str) -> Option<Self> {
        let code = raw.split([';', ',']).next()?.trim();
        (!code.is_empty()).then(|| AreaCode(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AreaCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeHit {
    pub lat: f64,
    pub lon: f64,
    pub label: String,
}

/// 地理编码结果；要么完整，要么全部为空
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    lat: Option<f64>,
    lon: Option<f64>,
    label: Option<String>,
}

impl GeocodeResult {
    pub fn unresolved() -> Self {
        Self::default()
    }

    pub fn coords(&self) -> Option<(f64, f64)> {
        Some((self.lat?, self.lon?))
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn is_resolved(&self) -> bool {
        self.coords().is_some()
    }
}

impl From<GeocodeHit> for GeocodeResult {
    fn from(hit: GeocodeHit) -> Self {
        Self {
            lat: Some(hit.lat),
            lon: Some(hit.lon),
            label: Some(hit.label),
        }
    }
}

#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// 自由文本 -> 坐标
    async fn forward(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<GeocodeHit>, FetchError>;

    /// 坐标 -> 邮编
    async fn reverse(
        &self,
        lat: f64,
        lon: f64,
        cancel: &CancellationToken,
    ) -> Result<Option<AreaCode>, FetchError>;

    /// 结构化邮编查询
    async fn postal(
        &self,
        postal: &str,
        country_code: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<GeocodeHit>, FetchError>;

    async fn autocomplete(
        &self,
        _text: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<String>, FetchError> {
        Ok(vec![])
    }
}

#[derive(Clone, Copy)]
enum Lookup<'a> {
    Forward(&'a str),
    Reverse(f64, f64),
    Postal(&'a str),
    Autocomplete(&'a str),
}

enum Found {
    Hit(GeocodeHit),
    Area(AreaCode),
    Labels(Vec<String>),
}

struct ProviderSlot {
    provider: Arc<dyn GeocodeProvider>,
    disabled: AtomicBool,
}

/// 按顺序尝试各服务，第一个成功的结果胜出
pub struct GeoResolver {
    slots: Vec<ProviderSlot>,
    country: String,
    country_code: String,
}

impl GeoResolver {
    pub fn new(
        providers: Vec<Arc<dyn GeocodeProvider>>,
        country: impl Into<String>,
        country_code: impl Into<String>,
    ) -> Self {
        Self {
            slots: providers
                .into_iter()
                .map(|provider| ProviderSlot {
                    provider,
                    disabled: AtomicBool::new(false),
                })
                .collect(),
            country: country.into(),
            country_code: country_code.into(),
        }
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    /// 服务是否已被禁用
    pub fn is_disabled(&self, name: &str) -> bool {
        self.slots
            .iter()
            .any(|s| s.provider.name() == name && s.disabled.load(Ordering::Acquire))
    }

    pub async fn forward_geocode(&self, text: &str, cancel: &CancellationToken) -> GeocodeResult {
        let text = text.trim();
        if text.is_empty() {
            return GeocodeResult::unresolved();
        }
        match self.run_chain(Lookup::Forward(text), cancel).await {
            Some(Found::Hit(hit)) => hit.into(),
            _ => GeocodeResult::unresolved(),
        }
    }

    pub async fn reverse_area(
        &self,
        lat: f64,
        lon: f64,
        cancel: &CancellationToken,
    ) -> Option<AreaCode> {
        match self.run_chain(Lookup::Reverse(lat, lon), cancel).await {
            Some(Found::Area(area)) => Some(area),
            _ => None,
        }
    }

    pub async fn resolve_postal(&self, postal: &str, cancel: &CancellationToken) -> GeocodeResult {
        match self.run_chain(Lookup::Postal(postal), cancel).await {
            Some(Found::Hit(hit)) => hit.into(),
            _ => GeocodeResult::unresolved(),
        }
    }

    /// 城市名补全国家后正向编码
    pub async fn resolve_city(&self, city: &str, cancel: &CancellationToken) -> GeocodeResult {
        self.forward_geocode(&format!("{}, {}", city.trim(), self.country), cancel)
            .await
    }

    pub async fn autocomplete(&self, text: &str, cancel: &CancellationToken) -> Vec<String> {
        match self.run_chain(Lookup::Autocomplete(text), cancel).await {
            Some(Found::Labels(labels)) => labels,
            _ => vec![],
        }
    }

    async fn run_chain(&self, lookup: Lookup<'_>, cancel: &CancellationToken) -> Option<Found> {
        for slot in &self.slots {
            if slot.disabled.load(Ordering::Acquire) {
                continue;
            }
            if cancel.is_cancelled() {
                return None;
            }

            let provider = &slot.provider;
            let attempt = match lookup {
                Lookup::Forward(text) => provider
                    .forward(text, cancel)
                    .await
                    .map(|hits| hits.into_iter().next().map(Found::Hit)),
                Lookup::Reverse(lat, lon) => provider
                    .reverse(lat, lon, cancel)
                    .await
                    .map(|area| area.map(Found::Area)),
                Lookup::Postal(postal) => provider
                    .postal(postal, &self.country_code, cancel)
                    .await
                    .map(|hits| hits.into_iter().next().map(Found::Hit)),
                Lookup::Autocomplete(text) => provider
                    .autocomplete(text, cancel)
                    .await
                    .map(|labels| (!labels.is_empty()).then_some(Found::Labels(labels))),
            };

            match attempt {
                Ok(Some(found)) => return Some(found),
                Ok(None) => {
                    log::debug!("[{}] 无结果，尝试下一个服务", provider.name());
                }
                Err(FetchError::Cancelled) => return None,
                Err(e) if e.is_denial() => {
                    if !slot.disabled.swap(true, Ordering::AcqRel) {
                        log::warn!(
                            "[{}] 服务拒绝访问 ({})，本次运行内改用备用服务",
                            provider.name(),
                            e
                        );
                    }
                }
                Err(e) => {
                    log::warn!("[{}] 请求失败: {}", provider.name(), e);
                }
            }
        }
        None
    }
}
