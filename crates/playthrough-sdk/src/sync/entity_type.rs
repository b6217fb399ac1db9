//! 同步实体类型 - 受控枚举
//!
//! 新增类型需 SDK 与远端同步升级；远端下发的未知类型 tombstone 会被跳过。

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Playthrough,
    PlaybackEvent,
}

/// 每次同步都会拉取的实体类型，同时也是 upsert 的应用顺序
pub const TRACKED_ENTITY_TYPES: [EntityType; 2] = [EntityType::Playthrough, EntityType::PlaybackEvent];

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Playthrough => "playthrough",
            Self::PlaybackEvent => "playback_event",
        }
    }
}

impl FromStr for EntityType {
    type Err = ();

    /// 兼容 snake_case / camelCase / PascalCase
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "playthrough" | "Playthrough" => Ok(Self::Playthrough),
            "playback_event" | "playbackEvent" | "PlaybackEvent" => Ok(Self::PlaybackEvent),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
