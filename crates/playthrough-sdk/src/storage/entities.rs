//! 数据实体定义
//!
//! 所有时间字段为 UTC 毫秒时间戳，位置单位为秒，倍速为倍数。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 播放事件类型
///
/// 未识别的类型原样保留为 `Unknown`，reducer 对其不做任何处理。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PlaybackEventType {
    Start,
    Resume,
    Finish,
    Abandon,
    Delete,
    Play,
    Pause,
    Seek,
    RateChange,
    Unknown(String),
}

impl PlaybackEventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::Resume => "resume",
            Self::Finish => "finish",
            Self::Abandon => "abandon",
            Self::Delete => "delete",
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Seek => "seek",
            Self::RateChange => "rate_change",
            Self::Unknown(s) => s.as_str(),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "start" => Self::Start,
            "resume" => Self::Resume,
            "finish" => Self::Finish,
            "abandon" => Self::Abandon,
            "delete" => Self::Delete,
            "play" => Self::Play,
            "pause" => Self::Pause,
            "seek" => Self::Seek,
            "rate_change" => Self::RateChange,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// 状态迁移类事件（写入后立即重建派生行）
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::Start | Self::Resume | Self::Finish | Self::Abandon | Self::Delete
        )
    }

    /// 写入后需要同步刷新 state cache 的事件
    pub fn touches_state_cache(&self) -> bool {
        matches!(self, Self::Play | Self::Pause | Self::Seek | Self::RateChange)
    }
}

impl From<String> for PlaybackEventType {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<PlaybackEventType> for String {
    fn from(t: PlaybackEventType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for PlaybackEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 播放事件（写入后不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackEvent {
    pub id: String,
    pub playthrough_id: String,
    #[serde(rename = "type")]
    pub event_type: PlaybackEventType,
    /// 事件发生时间（不是写入时间）
    pub timestamp: i64,
    #[serde(default)]
    pub position: Option<f64>,
    #[serde(default)]
    pub from_position: Option<f64>,
    #[serde(default)]
    pub to_position: Option<f64>,
    #[serde(default)]
    pub playback_rate: Option<f64>,
    #[serde(default)]
    pub previous_rate: Option<f64>,
    #[serde(default)]
    pub media_id: Option<String>,
    pub device_id: String,
    #[serde(default)]
    pub synced_at: Option<i64>,
}

impl PlaybackEvent {
    pub fn new(
        playthrough_id: impl Into<String>,
        event_type: PlaybackEventType,
        timestamp: i64,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            playthrough_id: playthrough_id.into(),
            event_type,
            timestamp,
            position: None,
            from_position: None,
            to_position: None,
            playback_rate: None,
            previous_rate: None,
            media_id: None,
            device_id: device_id.into(),
            synced_at: None,
        }
    }

    pub fn with_position(mut self, position: f64) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_seek(mut self, from: f64, to: f64) -> Self {
        self.from_position = Some(from);
        self.to_position = Some(to);
        self.position = Some(to);
        self
    }

    pub fn with_rate(mut self, rate: f64, previous: Option<f64>) -> Self {
        self.playback_rate = Some(rate);
        self.previous_rate = previous;
        self
    }

    pub fn with_media(mut self, media_id: impl Into<String>) -> Self {
        self.media_id = Some(media_id.into());
        self
    }
}

/// 播放进度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaythroughStatus {
    InProgress,
    Finished,
    Abandoned,
    Deleted,
}

impl PlaythroughStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Finished => "finished",
            Self::Abandoned => "abandoned",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(Self::InProgress),
            "finished" => Some(Self::Finished),
            "abandoned" => Some(Self::Abandoned),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for PlaythroughStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 权威派生行（已完整初始化；status 为空的行不会被读出）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playthrough {
    pub id: String,
    pub url: String,
    pub user_email: String,
    pub media_id: String,
    pub status: PlaythroughStatus,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub abandoned_at: Option<i64>,
    pub deleted_at: Option<i64>,
    pub position: f64,
    pub playback_rate: f64,
    pub last_event_at: i64,
    /// 最近一次成功重建的墙钟时间（与事件时间无关）
    pub refreshed_at: Option<i64>,
}

/// 远端下发的 playthrough 行
///
/// 远端可能直接写入（例如另一台设备上的状态迁移），字段不保证齐全；
/// 不完整（status 缺失、无法识别或必填字段为空）时按未初始化行存储，读接口不会返回它。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaythroughRecord {
    pub id: String,
    #[serde(default)]
    pub media_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub finished_at: Option<i64>,
    #[serde(default)]
    pub abandoned_at: Option<i64>,
    #[serde(default)]
    pub deleted_at: Option<i64>,
    #[serde(default)]
    pub position: Option<f64>,
    #[serde(default)]
    pub playback_rate: Option<f64>,
    #[serde(default)]
    pub last_event_at: Option<i64>,
}

impl PlaythroughRecord {
    pub fn parsed_status(&self) -> Option<PlaythroughStatus> {
        self.status.as_deref().and_then(PlaythroughStatus::parse)
    }

    /// status 可识别且读接口要求的非空字段齐全
    pub fn is_complete(&self) -> bool {
        self.parsed_status().is_some()
            && self.media_id.is_some()
            && self.started_at.is_some()
            && self.position.is_some()
            && self.playback_rate.is_some()
            && self.last_event_at.is_some()
    }
}

impl From<&Playthrough> for PlaythroughRecord {
    fn from(p: &Playthrough) -> Self {
        Self {
            id: p.id.clone(),
            media_id: Some(p.media_id.clone()),
            status: Some(p.status.as_str().to_string()),
            started_at: Some(p.started_at),
            finished_at: p.finished_at,
            abandoned_at: p.abandoned_at,
            deleted_at: p.deleted_at,
            position: Some(p.position),
            playback_rate: Some(p.playback_rate),
            last_event_at: Some(p.last_event_at),
        }
    }
}

/// 位置/倍速快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaythroughStateCache {
    pub playthrough_id: String,
    pub current_position: f64,
    pub current_rate: f64,
    pub updated_at: i64,
}

/// 每个租户的同步游标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    pub url: String,
    pub user_email: String,
    pub last_sync_timestamp: i64,
}

/// 远端删除记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub record_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_event_types_survive_serde() {
        let json = r#"{"id":"e1","playthroughId":"p1","type":"bookmark","timestamp":5,"deviceId":"d"}"#;
        let event: PlaybackEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type, PlaybackEventType::Unknown("bookmark".into()));
        let back = serde_json::to_value(&event).unwrap();
        assert_eq!(back["type"], "bookmark");
    }

    #[test]
    fn event_type_classification() {
        assert!(PlaybackEventType::Start.is_lifecycle());
        assert!(!PlaybackEventType::Seek.is_lifecycle());
        assert!(PlaybackEventType::RateChange.touches_state_cache());
        assert!(!PlaybackEventType::Finish.touches_state_cache());
        assert_eq!(PlaybackEventType::parse("rate_change"), PlaybackEventType::RateChange);
    }

    #[test]
    fn remote_record_tolerates_missing_fields() {
        let record: PlaythroughRecord =
            serde_json::from_str(r#"{"id":"p1","status":"paused_forever","position":12.5}"#).unwrap();
        assert_eq!(record.parsed_status(), None);
        assert_eq!(record.media_id, None);
        assert_eq!(record.position, Some(12.5));
        assert!(!record.is_complete());
    }

    #[test]
    fn seek_builder_sets_all_positions() {
        let e = PlaybackEvent::new("p", PlaybackEventType::Seek, 1, "d").with_seek(10.0, 40.0);
        assert_eq!(e.from_position, Some(10.0));
        assert_eq!(e.to_position, Some(40.0));
        assert_eq!(e.position, Some(40.0));
    }
}
