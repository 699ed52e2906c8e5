//! 运行代际与取消
//!
//! 同一时刻只有一个有效运行。开始新运行时代际加一并取消旧运行的令牌；
//! 所有对外可见的副作用都在注册表读锁内校验代际后执行，
//! 因此被取代的运行不会再产生任何效果。

use parking_lot::RwLock;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct Live {
    generation: u64,
    cancel: CancellationToken,
}

pub struct RunRegistry {
    live: RwLock<Live>,
}

impl RunRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            live: RwLock::new(Live {
                generation: 0,
                cancel: CancellationToken::new(),
            }),
        })
    }

    /// 开始新运行，旧运行立即失效
    pub fn begin(self: &Arc<Self>) -> RunContext {
        let mut live = self.live.write();
        live.cancel.cancel();
        live.generation += 1;
        live.cancel = CancellationToken::new();

        log::debug!("[Scanner] 运行代际 -> {}", live.generation);
        RunContext {
            generation: live.generation,
            cancel: live.cancel.clone(),
            registry: self.clone(),
        }
    }

    pub fn current_generation(&self) -> u64 {
        self.live.read().generation
    }

    /// 取消当前运行；返回被取消的代际
    pub fn cancel_current(&self) -> Option<u64> {
        let live = self.live.read();
        if live.generation == 0 || live.cancel.is_cancelled() {
            return None;
        }
        live.cancel.cancel();
        Some(live.generation)
    }
}

/// 一次运行的句柄，传入每个工作单元
#[derive(Clone)]
pub struct RunContext {
    generation: u64,
    cancel: CancellationToken,
    registry: Arc<RunRegistry>,
}

impl RunContext {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 仍是当前运行且未被取消
    pub fn is_live(&self) -> bool {
        let live = self.registry.live.read();
        self.is_live_under(&live)
    }

    fn is_live_under(&self, live: &Live) -> bool {
        live.generation == self.generation && !self.cancel.is_cancelled()
    }

    /// 在代际校验通过时执行副作用
    ///
    /// 执行期间持有读锁，`begin` 必须等待其完成。
    pub fn guarded<R>(&self, effect: impl FnOnce() -> R) -> Option<R> {
        let live = self.registry.live.read();
        if !self.is_live_under(&live) {
            return None;
        }
        Some(effect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_supersedes_previous() {
        let registry = RunRegistry::new();
        let a = registry.begin();
        assert!(a.is_live());

        let b = registry.begin();
        assert!(a.is_cancelled());
        assert!(!a.is_live());
        assert!(b.is_live());
        assert_eq!(b.generation(), a.generation() + 1);

        assert_eq!(a.guarded(|| 1), None);
        assert_eq!(b.guarded(|| 2), Some(2));
    }

    #[test]
    fn test_cancel_current() {
        let registry = RunRegistry::new();
        assert_eq!(registry.cancel_current(), None);

        let run = registry.begin();
        assert_eq!(registry.cancel_current(), Some(run.generation()));
        assert!(run.guarded(|| ()).is_none());
        assert_eq!(registry.cancel_current(), None);
    }
}
