//! OpenStreetMap Nominatim 地理编码
//!
//! 无需 API Key，但有速率限制，所有请求都经过 [`RequestQueue`] 串行发送。

use super::throttle::RequestQueue;
use super::{AreaCode, GeocodeHit, GeocodeProvider};
use crate::error::FetchError;
use crate::http::{cancellable, get_json};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct NominatimProvider {
    client: Client,
    base_url: String,
    country_code: String,
    queue: RequestQueue,
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct NominatimReverse {
    address: Option<NominatimAddress>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    postcode: Option<String>,
}

impl NominatimProvider {
    pub fn new(
        client: Client,
        base_url: &str,
        country_code: &str,
        interval: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            country_code: country_code.to_string(),
            queue: RequestQueue::new(interval, attempts),
        }
    }

    async fn queued<T: DeserializeOwned>(
        &self,
        path: &str,
        params: Vec<(&'static str, String)>,
        cancel: &CancellationToken,
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        cancellable(
            cancel,
            self.queue.run(|| {
                let request = self
                    .client
                    .get(&url)
                    .query(&params)
                    .query(&[("format", "jsonv2")]);
                get_json::<T>(request, cancel)
            }),
        )
        .await
    }

    async fn search(
        &self,
        params: Vec<(&'static str, String)>,
        cancel: &CancellationToken,
    ) -> Result<Vec<GeocodeHit>, FetchError> {
        let places: Vec<NominatimPlace> = self.queued("/search", params, cancel).await?;
        Ok(hits_from(places))
    }
}

fn hits_from(places: Vec<NominatimPlace>) -> Vec<GeocodeHit> {
    places
        .into_iter()
        .filter_map(|p| {
            Some(GeocodeHit {
                lat: p.lat.parse().ok()?,
                lon: p.lon.parse().ok()?,
                label: p.display_name,
            })
        })
        .collect()
}

fn area_from(reverse: NominatimReverse) -> Option<AreaCode> {
    if let Some(err) = reverse.error {
        log::debug!("[Nominatim] 反向编码无结果: {}", err);
        return None;
    }
    reverse
        .address?
        .postcode
        .as_deref()
        .and_then(AreaCode::from_postcode)
}

#[async_trait]
impl GeocodeProvider for NominatimProvider {
    fn name(&self) -> &'static str {
        "Nominatim"
    }

    async fn forward(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<GeocodeHit>, FetchError> {
        self.search(
            vec![
                ("q", text.to_string()),
                ("limit", "1".to_string()),
                ("countrycodes", self.country_code.clone()),
            ],
            cancel,
        )
        .await
    }

    async fn reverse(
        &self,
        lat: f64,
        lon: f64,
        cancel: &CancellationToken,
    ) -> Result<Option<AreaCode>, FetchError> {
        let reverse: NominatimReverse = self
            .queued(
                "/reverse",
                vec![
                    ("lat", lat.to_string()),
                    ("lon", lon.to_string()),
                    ("zoom", "16".to_string()),
                    ("addressdetails", "1".to_string()),
                ],
                cancel,
            )
            .await?;
        Ok(area_from(reverse))
    }

    async fn postal(
        &self,
        postal: &str,
        country_code: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<GeocodeHit>, FetchError> {
        self.search(
            vec![
                ("postalcode", postal.to_string()),
                ("countrycodes", country_code.to_string()),
                ("limit", "1".to_string()),
            ],
            cancel,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_places() {
        let raw = r#"[{"lat":"48.7406","lon":"9.3108","display_name":"Esslingen am Neckar, Baden-Württemberg, Deutschland"},
                      {"lat":"n/a","lon":"9.0","display_name":"kaputt"}]"#;
        let places: Vec<NominatimPlace> = serde_json::from_str(raw).unwrap();
        let hits = hits_from(places);
        assert_eq!(hits.len(), 1);
        assert!((hits[0].lon - 9.3108).abs() < 1e-9);
    }

    #[test]
    fn test_reverse_postcode() {
        let raw = r#"{"address":{"road":"Königstraße","postcode":"70173","city":"Stuttgart"}}"#;
        let reverse: NominatimReverse = serde_json::from_str(raw).unwrap();
        assert_eq!(area_from(reverse).unwrap().as_str(), "70173");

        let raw = r#"{"error":"Unable to geocode"}"#;
        let reverse: NominatimReverse = serde_json::from_str(raw).unwrap();
        assert!(area_from(reverse).is_none());
    }
}
