//! 展示用状态 - 在权威行与 state cache 之间取较新的一方
//!
//! cache 只是提示：它比权威行的 last_event_at 更新时才采用其位置/倍速，
//! status 等其余字段永远来自权威行。

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::entities::{Playthrough, PlaythroughStateCache, PlaythroughStatus};
use crate::storage::{DaoFactory, StorageManager};
use crate::tenant::Tenant;

/// 位置/倍速的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplaySource {
    Playthrough,
    Cache,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayState {
    pub playthrough_id: String,
    pub media_id: String,
    pub status: PlaythroughStatus,
    pub position: f64,
    pub playback_rate: f64,
    pub updated_at: i64,
    pub source: DisplaySource,
}

pub fn resolve_display_state(playthrough: &Playthrough, cache: Option<&PlaythroughStateCache>) -> DisplayState {
    let mut state = DisplayState {
        playthrough_id: playthrough.id.clone(),
        media_id: playthrough.media_id.clone(),
        status: playthrough.status,
        position: playthrough.position,
        playback_rate: playthrough.playback_rate,
        updated_at: playthrough.last_event_at,
        source: DisplaySource::Playthrough,
    };
    if let Some(cache) = cache {
        if cache.updated_at > playthrough.last_event_at {
            state.position = cache.current_position;
            state.playback_rate = cache.current_rate;
            state.updated_at = cache.updated_at;
            state.source = DisplaySource::Cache;
        }
    }
    state
}

/// 读取权威行与 cache 并合成展示状态；权威行不存在时返回 None
pub async fn display_state(
    storage: &StorageManager,
    tenant: &Tenant,
    playthrough_id: &str,
) -> Result<Option<DisplayState>> {
    storage
        .with_connection(|conn| {
            let Some(playthrough) = DaoFactory::playthrough_dao(conn, tenant).get(playthrough_id)? else {
                return Ok(None);
            };
            let cache = DaoFactory::state_cache_dao(conn, tenant).get(playthrough_id)?;
            Ok(Some(resolve_display_state(&playthrough, cache.as_ref())))
        })
        .await
}

/// 某个媒体当前应续播的状态（最近一次未删除的 playthrough）
pub async fn display_state_for_media(
    storage: &StorageManager,
    tenant: &Tenant,
    media_id: &str,
) -> Result<Option<DisplayState>> {
    storage
        .with_connection(|conn| {
            let Some(playthrough) = DaoFactory::playthrough_dao(conn, tenant).latest_for_media(media_id)? else {
                return Ok(None);
            };
            let cache = DaoFactory::state_cache_dao(conn, tenant).get(&playthrough.id)?;
            Ok(Some(resolve_display_state(&playthrough, cache.as_ref())))
        })
        .await
}
