//! Geoapify 结构化地理编码（需要 API Key）

use super::{AreaCode, GeocodeHit, GeocodeProvider};
use crate::error::FetchError;
use crate::http::get_json;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

pub struct GeoapifyProvider {
    client: Client,
    base_url: String,
    api_key: String,
    country_code: String,
}

#[derive(Debug, Deserialize)]
struct GeoapifyResponse {
    #[serde(default)]
    results: Vec<GeoapifyResult>,
}

#[derive(Debug, Deserialize)]
struct GeoapifyResult {
    lat: Option<f64>,
    lon: Option<f64>,
    formatted: Option<String>,
    postcode: Option<String>,
    city: Option<String>,
}

impl GeoapifyProvider {
    pub fn new(client: Client, base_url: &str, api_key: String, country_code: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            country_code: country_code.to_string(),
        }
    }

    async fn query(
        &self,
        path: &str,
        params: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<GeoapifyResponse, FetchError> {
        let request = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(params)
            .query(&[
                ("format", "json"),
                ("lang", "de"),
                ("apiKey", self.api_key.as_str()),
            ]);
        get_json(request, cancel).await
    }
}

fn hits_from(response: GeoapifyResponse) -> Vec<GeocodeHit> {
    response
        .results
        .into_iter()
        .filter_map(|r| {
            let label = r
                .formatted
                .or(r.city)
                .or(r.postcode)
                .unwrap_or_default();
            Some(GeocodeHit {
                lat: r.lat?,
                lon: r.lon?,
                label,
            })
        })
        .collect()
}

#[async_trait]
impl GeocodeProvider for GeoapifyProvider {
    fn name(&self) -> &'static str {
        "Geoapify"
    }

    async fn forward(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<GeocodeHit>, FetchError> {
        let response = self
            .query(
                "/v1/geocode/search",
                &[("text", text.to_string()), ("limit", "1".to_string())],
                cancel,
            )
            .await?;
        Ok(hits_from(response))
    }

    async fn reverse(
        &self,
        lat: f64,
        lon: f64,
        cancel: &CancellationToken,
    ) -> Result<Option<AreaCode>, FetchError> {
        let response = self
            .query(
                "/v1/geocode/reverse",
                &[("lat", lat.to_string()), ("lon", lon.to_string())],
                cancel,
            )
            .await?;
        Ok(response
            .results
            .iter()
            .find_map(|r| r.postcode.as_deref().and_then(AreaCode::from_postcode)))
    }

    async fn postal(
        &self,
        postal: &str,
        country_code: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<GeocodeHit>, FetchError> {
        let response = self
            .query(
                "/v1/geocode/search",
                &[
                    ("postcode", postal.to_string()),
                    ("type", "postcode".to_string()),
                    ("filter", format!("countrycode:{}", country_code)),
                    ("limit", "1".to_string()),
                ],
                cancel,
            )
            .await?;
        Ok(hits_from(response))
    }

    async fn autocomplete(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, FetchError> {
        let response = self
            .query(
                "/v1/geocode/autocomplete",
                &[
                    ("text", text.to_string()),
                    ("filter", format!("countrycode:{}", self.country_code)),
                    ("limit", "5".to_string()),
                ],
                cancel,
            )
            .await?;
        Ok(response
            .results
            .into_iter()
            .filter_map(|r| r.formatted)
            .collect())
    }
}
