//! SDK 生命周期管理
//!
//! 管理 App 前后台切换，统一触发各模块的状态切换：
//! 进入后台时落地待定的 seek，回到前台时触发同步。

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;
use crate::playthrough::seek::SeekCoordinator;
use crate::playthrough::session::PlaybackSession;

/// 生命周期回调 Hook
///
/// 各模块通过实现此 trait 来响应生命周期变化
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// App 切换到后台时调用
    async fn on_background(&self) -> Result<()>;

    /// App 切换到前台时调用
    async fn on_foreground(&self) -> Result<()>;
}

#[derive(Clone, Copy)]
enum Transition {
    Background,
    Foreground,
}

/// 生命周期管理器
pub struct LifecycleManager {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// 注册生命周期回调 Hook
    pub fn register_hook(&mut self, hook: Arc<dyn LifecycleHook>) {
        self.hooks.push(hook);
        info!("✅ 生命周期 Hook 已注册: 当前共 {} 个", self.hooks.len());
    }

    /// 通知所有 Hook：App 切换到后台
    ///
    /// 按注册顺序执行，某个 Hook 失败不影响其他 Hook，最后返回第一个错误
    pub async fn notify_background(&self) -> Result<()> {
        info!("🔄 通知所有模块：App 切换到后台");
        self.notify(Transition::Background).await
    }

    /// 通知所有 Hook：App 切换到前台
    pub async fn notify_foreground(&self) -> Result<()> {
        info!("🔄 通知所有模块：App 切换到前台");
        self.notify(Transition::Foreground).await
    }

    async fn notify(&self, transition: Transition) -> Result<()> {
        let mut first_error = None;
        let mut failed = 0;

        for (index, hook) in self.hooks.iter().enumerate() {
            let result = match transition {
                Transition::Background => hook.on_background().await,
                Transition::Foreground => hook.on_foreground().await,
            };
            if let Err(e) = result {
                warn!("⚠️ Hook #{} 生命周期切换失败: {}", index, e);
                failed += 1;
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => {
                warn!("⚠️ {} 个模块切换失败，但所有模块都已尝试执行", failed);
                Err(e)
            }
            None => {
                info!("✅ 所有模块生命周期切换完成");
                Ok(())
            }
        }
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LifecycleHook for SeekCoordinator {
    async fn on_background(&self) -> Result<()> {
        self.flush_all().await;
        Ok(())
    }

    async fn on_foreground(&self) -> Result<()> {
        Ok(())
    }
}

/// 后台播放时心跳照常运行，只落地待定 seek
#[async_trait]
impl LifecycleHook for PlaybackSession {
    async fn on_background(&self) -> Result<()> {
        self.seek_coordinator().flush_all().await;
        Ok(())
    }

    async fn on_foreground(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeekConfig;
    use crate::error::PlaythroughError;
    use crate::events::EventManager;
    use crate::playthrough::recorder::EventRecorder;
    use crate::playthrough::seek::SeekSource;
    use crate::storage::StorageManager;
    use crate::test_support::{tenant, FakeTransport};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHook {
        background: AtomicUsize,
        foreground: AtomicUsize,
        fail: bool,
    }

    impl CountingHook {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                background: AtomicUsize::new(0),
                foreground: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl LifecycleHook for CountingHook {
        async fn on_background(&self) -> Result<()> {
            self.background.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PlaythroughError::InvalidArgument("boom".into()));
            }
            Ok(())
        }

        async fn on_foreground(&self) -> Result<()> {
            self.foreground.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn failing_hook_does_not_stop_the_others() {
        let failing = CountingHook::new(true);
        let healthy = CountingHook::new(false);
        let mut manager = LifecycleManager::new();
        manager.register_hook(failing.clone());
        manager.register_hook(healthy.clone());
        assert_eq!(manager.hook_count(), 2);

        assert!(manager.notify_background().await.is_err());
        assert_eq!(healthy.background.load(Ordering::SeqCst), 1);

        manager.notify_foreground().await.unwrap();
        assert_eq!(failing.foreground.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.foreground.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn background_flushes_pending_seeks() {
        let transport = Arc::new(FakeTransport::new(100.0, 3_600.0, 1.0));
        let storage = StorageManager::open_in_memory().unwrap();
        let recorder = EventRecorder::new(storage, Arc::new(EventManager::new(16)), "phone");
        let coordinator = Arc::new(SeekCoordinator::new(transport.clone(), recorder, SeekConfig::default()));

        let mut manager = LifecycleManager::new();
        manager.register_hook(coordinator.clone());

        coordinator.seek_to(&tenant(), "pt-1", 900.0, SeekSource::RemoteControl).await;
        manager.notify_background().await.unwrap();

        assert_eq!(transport.seek_calls(), vec![900.0]);
        assert!(!coordinator.has_pending("pt-1"));
    }
}
