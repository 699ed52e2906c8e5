//! Kleinanzeigen 列表来源
//!
//! 先依次尝试各个列表 API 地址（`/inserate`、`/api/inserate`），
//! 全部不可用时通过中转抓取站点搜索页并解析 HTML。

use super::{ListingQuery, ListingSource, RawListing};
use crate::detail_proxy::DocumentFetcher;
use crate::error::FetchError;
use crate::geocoding::AreaCode;
use crate::http::get_json;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const API_PATHS: [&str; 2] = ["/inserate", "/api/inserate"];

pub struct KleinanzeigenSource {
    client: Client,
    api_urls: Vec<String>,
    site_url: String,
    fetcher: Arc<dyn DocumentFetcher>,
    page_count: u32,
}

#[derive(Debug, Deserialize)]
struct InserateResponse {
    #[serde(default)]
    data: Vec<RawListing>,
}

impl KleinanzeigenSource {
    pub fn new(
        client: Client,
        api_urls: Vec<String>,
        site_url: &str,
        fetcher: Arc<dyn DocumentFetcher>,
    ) -> Self {
        Self {
            client,
            api_urls: api_urls
                .into_iter()
                .map(|u| u.trim_end_matches('/').to_string())
                .collect(),
            site_url: site_url.trim_end_matches('/').to_string(),
            fetcher,
            page_count: 1,
        }
    }

    pub fn with_page_count(mut self, page_count: u32) -> Self {
        self.page_count = page_count.max(1);
        self
    }

    async fn search_api(
        &self,
        endpoint: &str,
        query: &ListingQuery,
        area: &AreaCode,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawListing>, FetchError> {
        let mut params = vec![
            ("query", query.keywords.clone()),
            ("location", area.to_string()),
            ("radius", query.radius_km.to_string()),
            ("page_count", self.page_count.to_string()),
        ];
        if let Some(min) = query.min_price {
            params.push(("min_price", min.to_string()));
        }
        if let Some(max) = query.max_price {
            params.push(("max_price", max.to_string()));
        }

        let response: InserateResponse =
            get_json(self.client.get(endpoint).query(&params), cancel).await?;
        Ok(response.data)
    }

    async fn search_site(
        &self,
        query: &ListingQuery,
        area: &AreaCode,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawListing>, FetchError> {
        let mut results = Vec::new();
        for page in 1..=self.page_count {
            let url = build_search_url(&self.site_url, query, Some(area.as_str()), page);
            match self.fetcher.fetch_document(&url, cancel).await {
                Ok(html) => results.extend(parse_search_page(&html, &self.site_url)),
                Err(e) if page == 1 || matches!(e, FetchError::Cancelled) => return Err(e),
                // 后续页失败时保留已取得的结果
                Err(e) => {
                    log::warn!("[Kleinanzeigen] 第 {} 页抓取失败: {}", page, e);
                    break;
                }
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl ListingSource for KleinanzeigenSource {
    async fn search(
        &self,
        query: &ListingQuery,
        area: &AreaCode,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawListing>, FetchError> {
        let mut last_error = FetchError::Network("没有可用的列表接口".to_string());

        for base in &self.api_urls {
            for path in API_PATHS {
                let endpoint = format!("{}{}", base, path);
                match self.search_api(&endpoint, query, area, cancel).await {
                    Ok(listings) => return Ok(listings),
                    Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                    Err(e) => {
                        log::warn!("[Kleinanzeigen] 接口 {} 不可用: {}", endpoint, e);
                        last_error = e;
                    }
                }
            }
        }

        log::info!("[Kleinanzeigen] 接口均不可用，直接抓取搜索页");
        match self.search_site(query, area, cancel).await {
            Ok(listings) => Ok(listings),
            Err(FetchError::Cancelled) => Err(FetchError::Cancelled),
            Err(e) => {
                log::warn!("[Kleinanzeigen] 搜索页抓取失败: {}", e);
                Err(last_error)
            }
        }
    }
}

/// 站点搜索地址
///
/// 带价格区间时位置写在路径中（`/s-<ort>/preis:<min>:<max>/seite:<n>`），
/// 不带价格时额外附带 `locationStr` 参数。
pub fn build_search_url(
    base: &str,
    query: &ListingQuery,
    location: Option<&str>,
    page: u32,
) -> String {
    let has_price_bounds = query.min_price.is_some() || query.max_price.is_some();
    let slug = location
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| l.replace(' ', "-"));

    let path = match (has_price_bounds, &slug) {
        (true, _) => {
            let min = query.min_price.map(|v| v.to_string()).unwrap_or_default();
            let max = query.max_price.map(|v| v.to_string()).unwrap_or_default();
            match &slug {
                Some(s) => format!("/s-{}/preis:{}:{}/seite:{}", s, min, max, page),
                None => format!("/s-preis:{}:{}/seite:{}", min, max, page),
            }
        }
        (false, Some(s)) => format!("/s-{}/seite:{}", s, page),
        (false, None) => format!("/s-seite:{}", page),
    };

    let mut params = url::form_urlencoded::Serializer::new(String::new());
    if !query.keywords.trim().is_empty() {
        params.append_pair("keywords", query.keywords.trim());
    }
    let nonzero_bounds = query.min_price.unwrap_or(0) != 0 || query.max_price.unwrap_or(0) != 0;
    if let (Some(loc), false) = (location.filter(|l| !l.trim().is_empty()), nonzero_bounds) {
        params.append_pair("locationStr", loc.trim());
    }
    if query.radius_km > 0 {
        params.append_pair("radius", &query.radius_km.to_string());
    }
    let params = params.finish();

    if params.is_empty() {
        format!("{}{}", base, path)
    } else {
        format!("{}{}?{}", base, path, params)
    }
}

static AD_ITEMS: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".ad-listitem:not(.is-topad):not(.badge-hint-pro-small-srp)").expect("selector")
});
static ARTICLE: Lazy<Selector> = Lazy::new(|| Selector::parse("article").expect("selector"));
static TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h2.text-module-begin a.ellipsis").expect("selector"));
static PRICE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("p.aditem-main--middle--price-shipping--price").expect("selector")
});
static DESCRIPTION: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p.aditem-main--middle--description").expect("selector"));
static IMAGE: Lazy<Selector> = Lazy::new(|| Selector::parse(".imagebox img").expect("selector"));

fn inner_text(parent: &ElementRef, selector: &Selector) -> String {
    parent
        .select(selector)
        .next()
        .map(|e| e.text().collect::<Vec<_>>().join(" "))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}

/// 解析站点搜索结果页，跳过置顶广告
pub fn parse_search_page(html: &str, base: &str) -> Vec<RawListing> {
    let doc = Html::parse_document(html);
    let mut results = Vec::new();

    for item in doc.select(&AD_ITEMS) {
        let Some(article) = item.select(&ARTICLE).next() else {
            continue;
        };
        let (Some(adid), Some(href)) = (
            article.value().attr("data-adid"),
            article.value().attr("data-href"),
        ) else {
            continue;
        };

        let url = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("{}{}", base, href)
        };
        let thumbnail_url = article
            .select(&IMAGE)
            .next()
            .and_then(|img| img.value().attr("src").or_else(|| img.value().attr("data-imgsrc")))
            .map(|s| s.to_string());

        results.push(RawListing {
            id: adid.to_string(),
            url,
            title: inner_text(&article, &TITLE),
            raw_price: inner_text(&article, &PRICE),
            thumbnail_url,
            description: inner_text(&article, &DESCRIPTION),
        });
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFetcher;

    const BASE: &str = "https://www.kleinanzeigen.de";

    fn query(min: Option<u32>, max: Option<u32>) -> ListingQuery {
        ListingQuery {
            keywords: "rennrad".to_string(),
            radius_km: 10,
            min_price: min,
            max_price: max,
        }
    }

    #[test]
    fn test_search_url_without_price() {
        let url = build_search_url(BASE, &query(None, None), Some("70173"), 1);
        assert_eq!(
            url,
            "https://www.kleinanzeigen.de/s-70173/seite:1?keywords=rennrad&locationStr=70173&radius=10"
        );
    }

    #[test]
    fn test_search_url_with_price_bounds() {
        let url = build_search_url(BASE, &query(Some(100), None), Some("Bad Cannstatt"), 2);
        assert_eq!(
            url,
            "https://www.kleinanzeigen.de/s-Bad-Cannstatt/preis:100:/seite:2?keywords=rennrad&radius=10"
        );

        let url = build_search_url(BASE, &query(None, Some(500)), None, 1);
        assert_eq!(
            url,
            "https://www.kleinanzeigen.de/s-preis::500/seite:1?keywords=rennrad&radius=10"
        );
    }

    #[test]
    fn test_search_url_bare() {
        let q = ListingQuery {
            keywords: String::new(),
            radius_km: 0,
            min_price: None,
            max_price: None,
        };
        assert_eq!(build_search_url(BASE, &q, None, 1), "https://www.kleinanzeigen.de/s-seite:1");
    }

    const RESULT_PAGE: &str = r#"<html><body><ul id="srchrslt-adtable">
        <li class="ad-listitem is-topad"><article class="aditem" data-adid="1" data-href="/s-anzeige/top/1">
            <h2 class="text-module-begin"><a class="ellipsis">Top Anzeige</a></h2></article></li>
        <li class="ad-listitem"><article class="aditem" data-adid="2845937261" data-href="/s-anzeige/rennrad-canyon/2845937261-217-9280">
            <div class="imagebox"><img src="https://img.kleinanzeigen.de/api/v1/prod-ads/images/1.jpg"></div>
            <h2 class="text-module-begin"><a class="ellipsis">Rennrad   Canyon</a></h2>
            <p class="aditem-main--middle--price-shipping--price">
                1.250 € VB</p>
            <p class="aditem-main--middle--description">Top Zustand</p></article></li>
        <li class="ad-listitem"><article class="aditem"><h2>ohne id</h2></article></li>
        </ul></body></html>"#;

    #[test]
    fn test_parse_search_page_skips_top_ads() {
        let listings = parse_search_page(RESULT_PAGE, BASE);
        assert_eq!(listings.len(), 1);
        let l = &listings[0];
        assert_eq!(l.id, "2845937261");
        assert_eq!(
            l.url,
            "https://www.kleinanzeigen.de/s-anzeige/rennrad-canyon/2845937261-217-9280"
        );
        assert_eq!(l.title, "Rennrad Canyon");
        assert_eq!(l.raw_price, "1.250 € VB");
        assert_eq!(l.description, "Top Zustand");
        assert!(l.thumbnail_url.as_deref().unwrap().ends_with("1.jpg"));
    }

    fn page(ids: &[&str]) -> String {
        let items: String = ids
            .iter()
            .map(|id| {
                format!(
                    r#"<li class="ad-listitem"><article data-adid="{id}" data-href="/s-anzeige/rad/{id}">
                    <h2 class="text-module-begin"><a class="ellipsis">Rad {id}</a></h2></article></li>"#
                )
            })
            .collect();
        format!("<html><body><ul>{}</ul></body></html>", items)
    }

    fn site_source(fetcher: &FakeFetcher, pages: u32) -> KleinanzeigenSource {
        KleinanzeigenSource::new(Client::new(), vec![], BASE, Arc::new(fetcher.clone()))
            .with_page_count(pages)
    }

    #[tokio::test]
    async fn test_site_search_walks_all_pages() {
        let q = query(None, None);
        let fetcher = FakeFetcher::new()
            .with_page(&build_search_url(BASE, &q, Some("70173"), 1), &page(&["1", "2"]))
            .with_page(&build_search_url(BASE, &q, Some("70173"), 2), &page(&["3"]));

        let listings = site_source(&fetcher, 2)
            .search(&q, &AreaCode("70173".to_string()), &CancellationToken::new())
            .await
            .unwrap();
        let ids: Vec<&str> = listings.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_site_search_keeps_results_when_later_page_fails() {
        let q = query(None, None);
        let fetcher = FakeFetcher::new()
            .with_page(&build_search_url(BASE, &q, Some("70173"), 1), &page(&["1"]));

        let listings = site_source(&fetcher, 3)
            .search(&q, &AreaCode("70173".to_string()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(listings.len(), 1);
        // 第 2 页失败后不再请求第 3 页
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_site_search_fails_when_first_page_fails() {
        let q = query(None, None);
        let fetcher = FakeFetcher::new();
        let result = site_source(&fetcher, 2)
            .search(&q, &AreaCode("70173".to_string()), &CancellationToken::new())
            .await;
        assert!(result.is_err());
    }
}
