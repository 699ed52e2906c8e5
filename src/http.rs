//! HTTP 客户端与可取消请求

use crate::error::{FetchError, ScoutError};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn build_client(timeout_secs: u64, user_agent: &str) -> Result<Client, ScoutError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(user_agent)
        .build()
        .map_err(|e| ScoutError::Config(format!("创建 HTTP 客户端失败: {}", e)))
}

/// 与取消令牌竞争，取消时立即放弃请求
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        result = fut => result,
    }
}

async fn send(request: RequestBuilder) -> Result<reqwest::Response, FetchError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::from_status(status));
    }
    Ok(response)
}

pub async fn get_json<T: DeserializeOwned>(
    request: RequestBuilder,
    cancel: &CancellationToken,
) -> Result<T, FetchError> {
    cancellable(cancel, async {
        let response = send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    })
    .await
}

pub async fn get_text(
    request: RequestBuilder,
    cancel: &CancellationToken,
) -> Result<String, FetchError> {
    cancellable(cancel, async {
        let response = send(request).await?;
        Ok(response.text().await?)
    })
    .await
}
