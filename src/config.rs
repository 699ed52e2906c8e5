use crate::error::ScoutError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 站点最多翻到的结果页
pub const MAX_PAGE_COUNT: u32 = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoutConfig {
    /// 每次运行的 worker 数
    pub worker_count: usize,
    /// 每个采样点最多补全的新列表数
    pub detail_limit: usize,
    /// 详情补全的并发批大小
    pub detail_batch: usize,
    /// 每个区域抓取的搜索结果页数
    pub page_count: u32,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
    /// 公共地理编码服务两次请求的最小间隔（毫秒）
    pub throttle_interval_ms: u64,
    /// 公共地理编码服务重试次数
    pub retry_attempts: u32,
    /// 默认采样步长（米）
    pub default_step_m: f64,
    /// 默认走廊半径（米）
    pub default_corridor_m: f64,
    /// 结构化地理编码时附带的国家
    pub country: String,
    pub country_code: String,
    pub endpoints: Endpoints,
    /// 中转抓取允许的主机
    pub proxy_allow_hosts: Vec<String>,
    /// 强制空间索引走线性扫描
    pub force_linear_scan: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub geoapify_url: String,
    pub geoapify_api_key: Option<String>,
    pub nominatim_url: String,
    /// 列表 API，按顺序尝试
    pub listings_api_urls: Vec<String>,
    /// 直接抓取搜索页时使用的站点
    pub listings_site_url: String,
    pub user_agent: String,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            detail_limit: 10,
            detail_batch: 4,
            page_count: 1,
            request_timeout_secs: 10,
            throttle_interval_ms: 1000,
            retry_attempts: 3,
            default_step_m: 5000.0,
            default_corridor_m: 2000.0,
            country: "Deutschland".to_string(),
            country_code: "de".to_string(),
            endpoints: Endpoints::default(),
            proxy_allow_hosts: vec!["kleinanzeigen.de".to_string()],
            force_linear_scan: false,
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            geoapify_url: "https://api.geoapify.com".to_string(),
            geoapify_api_key: None,
            nominatim_url: "https://nominatim.openstreetmap.org".to_string(),
            listings_api_urls: vec!["http://localhost:8000".to_string()],
            listings_site_url: "https://www.kleinanzeigen.de".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
        }
    }
}

impl ScoutConfig {
    /// 环境变量覆盖
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("GEOAPIFY_API_KEY") {
            if !key.trim().is_empty() {
                self.endpoints.geoapify_api_key = Some(key.trim().to_string());
            }
        }
        if let Ok(hosts) = std::env::var("PROXY_ALLOW_HOSTS") {
            self.proxy_allow_hosts = split_list(&hosts);
        }
        if let Ok(urls) = std::env::var("SCOUT_LISTINGS_API") {
            self.endpoints.listings_api_urls = split_list(&urls);
        }
    }

    pub fn validate(&self) -> Result<(), ScoutError> {
        if self.worker_count == 0 {
            return Err(ScoutError::Config("worker_count 必须大于 0".to_string()));
        }
        if self.detail_batch == 0 || self.detail_batch > self.detail_limit.max(1) {
            return Err(ScoutError::Config(
                "detail_batch 必须在 1..=detail_limit 之间".to_string(),
            ));
        }
        if !(1..=MAX_PAGE_COUNT).contains(&self.page_count) {
            return Err(ScoutError::Config(format!(
                "page_count 必须在 1..={} 之间",
                MAX_PAGE_COUNT
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ScoutError::Config("request_timeout_secs 必须大于 0".to_string()));
        }
        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn config_path() -> PathBuf {
    PathBuf::from("scout_config.json")
}

pub fn load_config_from(path: &Path) -> Result<ScoutConfig, ScoutError> {
    let mut config = if path.exists() {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| ScoutError::Config(e.to_string()))?
    } else {
        ScoutConfig::default()
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
}

pub fn load_config() -> Result<ScoutConfig, ScoutError> {
    load_config_from(&config_path())
}

pub fn save_config(path: &Path, config: &ScoutConfig) -> Result<(), ScoutError> {
    let content =
        serde_json::to_string_pretty(config).map_err(|e| ScoutError::Config(e.to_string()))?;
    fs::write(path, content)?;
    Ok(())
}
