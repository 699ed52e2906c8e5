//! 分类广告列表：搜索、缓存、详情补全

pub mod detail;
pub mod extract;
pub mod kleinanzeigen;
pub mod price;

pub use detail::DetailEnricher;
pub use kleinanzeigen::KleinanzeigenSource;

use crate::cache::ScopedCache;
use crate::error::FetchError;
use crate::geocoding::AreaCode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 搜索结果中的一条广告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    #[serde(alias = "adid")]
    pub id: String,
    /// 全局唯一键
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "price")]
    pub raw_price: String,
    #[serde(default, alias = "image", alias = "thumbnail")]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// 补全后的广告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedListing {
    pub listing: RawListing,
    pub title: String,
    /// 规范化后的价格；补全失败时保留原始格式
    pub price: String,
    pub image: Option<String>,
    pub postal: Option<String>,
    pub city: Option<String>,
    /// (lat, lon)
    pub coords: Option<(f64, f64)>,
}

impl EnrichedListing {
    /// 未补全：保留原始字段，无坐标
    pub fn unresolved(listing: &RawListing) -> Self {
        Self {
            title: listing.title.clone(),
            price: listing.raw_price.clone(),
            image: listing.thumbnail_url.clone(),
            postal: None,
            city: None,
            coords: None,
            listing: listing.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.listing.url
    }
}

/// 搜索条件；半径单位为公里，仅用于上游列表接口
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListingQuery {
    pub keywords: String,
    pub radius_km: u32,
    pub min_price: Option<u32>,
    pub max_price: Option<u32>,
}

#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn search(
        &self,
        query: &ListingQuery,
        area: &AreaCode,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawListing>, FetchError>;
}

/// 运行期列表缓存，同一区域在一次运行中只请求一次
pub struct CachedListings {
    source: Arc<dyn ListingSource>,
    cache: ScopedCache<(AreaCode, ListingQuery), Arc<Vec<RawListing>>>,
}

impl CachedListings {
    pub fn new(source: Arc<dyn ListingSource>) -> Self {
        Self {
            source,
            cache: ScopedCache::new(),
        }
    }

    /// 失败时记录日志并视为无结果，失败结果不缓存
    pub async fn fetch(
        &self,
        query: &ListingQuery,
        area: &AreaCode,
        cancel: &CancellationToken,
    ) -> Result<Arc<Vec<RawListing>>, FetchError> {
        let key = (area.clone(), query.clone());
        if let Some(hit) = self.cache.get(&key) {
            log::debug!("[Listings] 缓存命中: {}", area);
            return Ok(hit);
        }

        match self.source.search(query, area, cancel).await {
            Ok(listings) => {
                log::info!("[Listings] {} 找到 {} 条", area, listings.len());
                Ok(self.cache.put(key, Arc::new(listings)))
            }
            Err(FetchError::Cancelled) => Err(FetchError::Cancelled),
            Err(e) => {
                log::warn!("[Listings] {} 获取失败: {}", area, e);
                Err(e)
            }
        }
    }

    pub fn cached_areas(&self) -> usize {
        self.cache.len()
    }
}
