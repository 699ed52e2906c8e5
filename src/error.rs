//! 错误类型
//!
//! `FetchError` 覆盖所有上游请求（地理编码、列表、详情页），
//! `ScoutError` 是对外暴露的启动/配置错误。

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("请求失败: {0}")]
    Network(String),

    #[error("请求超时")]
    Timeout,

    #[error("HTTP {0}")]
    Status(u16),

    #[error("访问被拒绝 (HTTP {0})")]
    Denied(u16),

    #[error("请求过于频繁 (429)")]
    RateLimited,

    #[error("解析响应失败: {0}")]
    Decode(String),

    #[error("目标地址不允许: {0}")]
    Blocked(String),

    #[error("已取消")]
    Cancelled,
}

impl FetchError {
    /// 按 HTTP 状态码分类
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => FetchError::Denied(status.as_u16()),
            429 => FetchError::RateLimited,
            code => FetchError::Status(code),
        }
    }

    /// 可重试的错误：网络、超时、5xx、429
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout | FetchError::RateLimited => true,
            FetchError::Status(code) => *code >= 500,
            _ => false,
        }
    }

    /// 永久拒绝（鉴权失败），本次运行内不再请求该上游
    pub fn is_denial(&self) -> bool {
        matches!(self, FetchError::Denied(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::from_status(status)
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ScoutError {
    #[error("路线为空或少于两个点")]
    EmptyRoute,

    #[error("搜索词为空")]
    EmptyQuery,

    #[error("参数无效: {0}")]
    InvalidInput(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}
