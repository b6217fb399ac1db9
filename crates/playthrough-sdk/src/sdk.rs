//! SDK 主接口
//!
//! 分层：
//! - 存储层：StorageManager
//! - 事件层：EventManager
//! - 业务层：EventRecorder / PlaybackSession
//! - 同步层：SyncEngine / SyncScheduler

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::PlaythroughConfig;
use crate::error::{PlaythroughError, Result};
use crate::events::{EventFilter, EventManager, FilteredEventReceiver, PlaybackNotification};
use crate::lifecycle::{LifecycleHook, LifecycleManager};
use crate::playthrough::recorder::EventRecorder;
use crate::playthrough::session::PlaybackSession;
use crate::playthrough::state_cache::{display_state, display_state_for_media, DisplayState};
use crate::storage::entities::{PlaybackEventType, Playthrough, PlaythroughStatus};
use crate::storage::{DaoFactory, StorageManager};
use crate::sync::{HttpRemoteAuthority, RemoteAuthority, SyncEngine, SyncOutcome, SyncScheduler};
use crate::tenant::Tenant;
use crate::transport::PlaybackTransport;

pub struct PlaythroughSdk {
    config: PlaythroughConfig,
    storage: StorageManager,
    event_manager: Arc<EventManager>,
    recorder: EventRecorder,
    sync_engine: Arc<SyncEngine>,
    scheduler: Arc<SyncScheduler>,
    lifecycle_manager: RwLock<LifecycleManager>,
    shutting_down: AtomicBool,
}

impl PlaythroughSdk {
    /// 打开 `{data_dir}/playthroughs.db` 并组装各层
    pub async fn initialize(config: PlaythroughConfig, remote: Arc<dyn RemoteAuthority>) -> Result<Arc<Self>> {
        info!("正在初始化 PlaythroughSdk...");
        config.validate()?;
        let storage = StorageManager::open(&config.data_dir).await?;
        Ok(Self::assemble(config, storage, remote))
    }

    /// 使用内置的 HTTP 远端
    pub async fn initialize_with_http(config: PlaythroughConfig) -> Result<Arc<Self>> {
        let remote = Arc::new(HttpRemoteAuthority::new(&config.http)?);
        Self::initialize(config, remote).await
    }

    /// 不落盘，数据随进程结束丢失
    pub fn initialize_in_memory(config: PlaythroughConfig, remote: Arc<dyn RemoteAuthority>) -> Result<Arc<Self>> {
        config.validate()?;
        let storage = StorageManager::open_in_memory()?;
        Ok(Self::assemble(config, storage, remote))
    }

    fn assemble(config: PlaythroughConfig, storage: StorageManager, remote: Arc<dyn RemoteAuthority>) -> Arc<Self> {
        let event_manager = Arc::new(EventManager::new(config.event_channel_capacity));
        let recorder = EventRecorder::new(storage.clone(), event_manager.clone(), config.device_id.clone());
        let sync_engine = Arc::new(SyncEngine::new(
            storage.clone(),
            remote,
            event_manager.clone(),
            config.sync.push_batch_size,
        ));
        let scheduler = Arc::new(SyncScheduler::new(sync_engine.clone(), config.sync.clone()));

        let mut lifecycle_manager = LifecycleManager::new();
        lifecycle_manager.register_hook(scheduler.clone());

        info!("✅ PlaythroughSdk 初始化完成: device_id={}", config.device_id);
        Arc::new(Self {
            config,
            storage,
            event_manager,
            recorder,
            sync_engine,
            scheduler,
            lifecycle_manager: RwLock::new(lifecycle_manager),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &PlaythroughConfig {
        &self.config
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    pub fn sync_engine(&self) -> &Arc<SyncEngine> {
        &self.sync_engine
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    pub fn event_manager(&self) -> &Arc<EventManager> {
        &self.event_manager
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<PlaybackNotification> {
        self.event_manager.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventReceiver {
        self.event_manager.subscribe_filtered(filter)
    }

    fn check_running(&self) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PlaythroughError::InvalidArgument("SDK 已关闭".into()));
        }
        Ok(())
    }

    /// 开始新一轮播放
    pub async fn start_playthrough(
        &self,
        tenant: &Tenant,
        media_id: &str,
        position: f64,
        rate: f64,
    ) -> Result<Playthrough> {
        self.check_running()?;
        self.recorder.start_playthrough(tenant, media_id, position, rate).await
    }

    /// 记录 resume / finish / abandon / delete
    pub async fn record_transition(
        &self,
        tenant: &Tenant,
        playthrough_id: &str,
        event_type: PlaybackEventType,
    ) -> Result<Option<Playthrough>> {
        self.check_running()?;
        self.recorder.record_transition(tenant, playthrough_id, event_type).await
    }

    /// 为一次播放创建会话；宿主负责把播放后端事件转交给它
    pub async fn open_session(
        &self,
        tenant: &Tenant,
        playthrough_id: &str,
        transport: Arc<dyn PlaybackTransport>,
    ) -> Result<Arc<PlaybackSession>> {
        self.check_running()?;
        let session = Arc::new(PlaybackSession::new(
            tenant.clone(),
            playthrough_id,
            transport,
            self.recorder.clone(),
            &self.config,
        ));
        info!("▶️ 打开播放会话: tenant={}, playthrough={}", tenant, playthrough_id);
        Ok(session)
    }

    pub async fn display_state(&self, tenant: &Tenant, playthrough_id: &str) -> Result<Option<DisplayState>> {
        display_state(&self.storage, tenant, playthrough_id).await
    }

    pub async fn display_state_for_media(&self, tenant: &Tenant, media_id: &str) -> Result<Option<DisplayState>> {
        display_state_for_media(&self.storage, tenant, media_id).await
    }

    pub async fn playthroughs(&self, tenant: &Tenant, status: Option<PlaythroughStatus>) -> Result<Vec<Playthrough>> {
        self.storage
            .with_connection(|conn| DaoFactory::playthrough_dao(conn, tenant).list(status))
            .await
    }

    /// 启动租户的后台同步
    pub fn start_sync(&self, tenant: &Tenant) -> Result<()> {
        self.check_running()?;
        self.scheduler.start(tenant);
        Ok(())
    }

    pub async fn sync_now(&self, tenant: &Tenant) -> Result<SyncOutcome> {
        self.check_running()?;
        self.scheduler.sync_now(tenant).await
    }

    pub async fn register_lifecycle_hook(&self, hook: Arc<dyn LifecycleHook>) {
        self.lifecycle_manager.write().await.register_hook(hook);
    }

    /// 进入后台：已注册的会话 / seek 协调器落地待定 seek
    pub async fn enter_background(&self) -> Result<()> {
        info!("应用进入后台");
        self.lifecycle_manager.read().await.notify_background().await
    }

    /// 回到前台：唤醒所有租户的同步
    pub async fn enter_foreground(&self) -> Result<()> {
        info!("应用进入前台");
        self.lifecycle_manager.read().await.notify_foreground().await
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// 停止后台同步；已经打开的会话由宿主 `unload`
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("正在关闭 PlaythroughSdk...");
        self.scheduler.shutdown().await;
        info!("PlaythroughSdk 关闭完成");
        Ok(())
    }
}
