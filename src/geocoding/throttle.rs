//! 请求串行队列
//!
//! 公共 Nominatim 服务要求每秒最多一次请求。队列持锁串行执行，
//! 两次请求间至少间隔 `interval`，临时错误按线性退避重试。

use crate::error::FetchError;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct RequestQueue {
    last: Mutex<Option<Instant>>,
    interval: Duration,
    attempts: u32,
    backoff: Duration,
}

impl RequestQueue {
    pub fn new(interval: Duration, attempts: u32) -> Self {
        Self {
            last: Mutex::new(None),
            interval,
            attempts: attempts.max(1),
            backoff: interval,
        }
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut last = self.last.lock().await;
        let mut attempt = 0;

        loop {
            if let Some(prev) = *last {
                let elapsed = prev.elapsed();
                if elapsed < self.interval {
                    tokio::time::sleep(self.interval - elapsed).await;
                }
            }
            *last = Some(Instant::now());
            attempt += 1;

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    log::debug!("[Queue] 第 {} 次请求失败，稍后重试: {}", attempt, e);
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
