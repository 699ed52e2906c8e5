//! 中转抓取详情页/搜索页
//!
//! 只允许白名单主机，拒绝解析到内网地址的目标。

use crate::config::ScoutConfig;
use crate::error::{FetchError, ScoutError};
use crate::http::{build_client, cancellable, get_text};
use async_trait::async_trait;
use ipnet::IpNet;
use reqwest::Client;
use std::net::IpAddr;
use tokio_util::sync::CancellationToken;

/// 获取一个可解析的文档
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch_document(&self, url: &str, cancel: &CancellationToken)
        -> Result<String, FetchError>;
}

pub struct DetailProxy {
    client: Client,
    allow_hosts: Vec<String>,
    blocked_cidrs: Vec<IpNet>,
}

impl DetailProxy {
    pub fn new(config: &ScoutConfig) -> Result<Self, ScoutError> {
        Ok(Self {
            client: build_client(config.request_timeout_secs, &config.endpoints.user_agent)?,
            allow_hosts: config
                .proxy_allow_hosts
                .iter()
                .map(|h| h.trim().to_lowercase())
                .collect(),
            blocked_cidrs: default_blocked_cidrs(),
        })
    }

    fn host_allowed(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.allow_hosts
            .iter()
            .any(|allowed| host == *allowed || host.ends_with(&format!(".{}", allowed)))
    }

    fn ip_blocked(&self, ip: IpAddr) -> bool {
        self.blocked_cidrs.iter().any(|cidr| cidr.contains(&ip))
    }

    /// 静态校验：协议、白名单、字面 IP
    pub fn validate(&self, raw: &str) -> Result<url::Url, FetchError> {
        let parsed = url::Url::parse(raw).map_err(|e| FetchError::Blocked(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::Blocked(format!("协议 {}", parsed.scheme())));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| FetchError::Blocked("缺少主机".to_string()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        if let Ok(ip) = host.parse::<IpAddr>() {
            if self.ip_blocked(ip) {
                return Err(FetchError::Blocked(ip.to_string()));
            }
        }
        if !self.host_allowed(&host) {
            return Err(FetchError::Blocked(host));
        }
        Ok(parsed)
    }

    /// 解析 DNS，任何一个地址落在内网段都拒绝
    async fn validate_resolved(&self, parsed: &url::Url) -> Result<(), FetchError> {
        let host = parsed.host_str().unwrap_or_default();
        if host.trim_matches(|c: char| c == '[' || c == ']').parse::<IpAddr>().is_ok() {
            return Ok(());
        }
        let port = parsed.port_or_known_default().unwrap_or(443);
        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| FetchError::Network(format!("DNS 解析失败 {}: {}", host, e)))?;
        for addr in addrs {
            if self.ip_blocked(addr.ip()) {
                return Err(FetchError::Blocked(format!("{} -> {}", host, addr.ip())));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentFetcher for DetailProxy {
    async fn fetch_document(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, FetchError> {
        let parsed = self.validate(url)?;
        cancellable(cancel, self.validate_resolved(&parsed)).await?;

        log::debug!("[Proxy] GET {}", parsed);
        get_text(
            self.client
                .get(parsed.as_str())
                .header("Accept", "text/html,application/xhtml+xml")
                .header("Accept-Language", "de-DE,de;q=0.9"),
            cancel,
        )
        .await
    }
}

fn default_blocked_cidrs() -> Vec<IpNet> {
    [
        "0.0.0.0/8",
        "10.0.0.0/8",
        "100.64.0.0/10",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "::1/128",
        "fc00::/7",
        "fe80::/10",
    ]
    .iter()
    .filter_map(|c| c.parse().ok())
    .collect()
}
