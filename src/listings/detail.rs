//! 详情页补全：抓取、提取、地理定位

use super::extract::{extract_detail, ListingDetail};
use super::price::parse_price;
use super::{EnrichedListing, RawListing};
use crate::detail_proxy::DocumentFetcher;
use crate::error::FetchError;
use crate::geocoding::GeoResolver;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct DetailEnricher {
    fetcher: Arc<dyn DocumentFetcher>,
    resolver: Arc<GeoResolver>,
}

impl DetailEnricher {
    pub fn new(fetcher: Arc<dyn DocumentFetcher>, resolver: Arc<GeoResolver>) -> Self {
        Self { fetcher, resolver }
    }

    /// 只抓取并提取详情，不做地理定位
    pub async fn fetch_detail(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<ListingDetail, FetchError> {
        let html = self.fetcher.fetch_document(url, cancel).await?;
        Ok(extract_detail(&html))
    }

    /// 补全一条广告
    ///
    /// `want_detail` 为 false 时只规范化价格；抓取失败时返回未补全的记录。
    pub async fn enrich(
        &self,
        listing: &RawListing,
        want_detail: bool,
        cancel: &CancellationToken,
    ) -> EnrichedListing {
        if !want_detail {
            let mut enriched = EnrichedListing::unresolved(listing);
            enriched.price = parse_price(&listing.raw_price).label();
            return enriched;
        }

        let detail = match self.fetch_detail(&listing.url, cancel).await {
            Ok(detail) => detail,
            Err(FetchError::Cancelled) => return EnrichedListing::unresolved(listing),
            Err(e) => {
                log::warn!("[Detail] {} 详情获取失败: {}", listing.url, e);
                return EnrichedListing::unresolved(listing);
            }
        };

        let coords = self.locate(&detail, cancel).await;
        let price = parse_price(detail.price.as_deref().unwrap_or(&listing.raw_price)).label();

        EnrichedListing {
            title: detail
                .title
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| listing.title.clone()),
            price,
            image: detail.image.clone().or_else(|| listing.thumbnail_url.clone()),
            postal: detail.postal.clone(),
            city: detail.city.clone(),
            coords,
            listing: listing.clone(),
        }
    }

    /// 坐标优先，其次邮编，最后城市名
    async fn locate(&self, detail: &ListingDetail, cancel: &CancellationToken) -> Option<(f64, f64)> {
        if let Some(coords) = detail.coords() {
            return Some(coords);
        }
        if let Some(postal) = &detail.postal {
            if let Some(coords) = self.resolver.resolve_postal(postal, cancel).await.coords() {
                return Some(coords);
            }
        }
        if let Some(city) = &detail.city {
            return self.resolver.resolve_city(city, cancel).await.coords();
        }
        None
    }
}
