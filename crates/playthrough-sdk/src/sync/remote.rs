//! 远端权威接口 - 增量拉取 + 事件推送
//!
//! 协议是至少一次、幂等：同一批变更重复应用结果不变。

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::HttpClientConfig;
use crate::error::{PlaythroughError, Result};
use crate::storage::entities::{PlaybackEvent, PlaythroughRecord, Tombstone};
use crate::tenant::Tenant;

/// 增量拉取结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    #[serde(default)]
    pub playthroughs: Vec<PlaythroughRecord>,
    #[serde(default)]
    pub playback_events: Vec<PlaybackEvent>,
    #[serde(default)]
    pub deletions: Vec<Tombstone>,
    /// 远端时钟；本地游标只会推进到这个值
    pub server_time: i64,
}

/// 推送确认
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAck {
    pub server_time: i64,
}

#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// `since` 为 None 时全量
    async fn fetch_changes(&self, tenant: &Tenant, since: Option<i64>) -> Result<SyncResponse>;

    async fn push_events(&self, tenant: &Tenant, events: &[PlaybackEvent]) -> Result<PushAck>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchChangesRequest<'a> {
    user_email: &'a str,
    since: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PushEventsRequest<'a> {
    user_email: &'a str,
    events: &'a [PlaybackEvent],
}

const SYNC_PATH: &str = "/api/v1/playthroughs/sync";
const EVENTS_PATH: &str = "/api/v1/playthroughs/events";

/// 基于 HTTP/JSON 的远端实现；租户的 url 即服务地址
pub struct HttpRemoteAuthority {
    client: Client,
    auth_token: Option<String>,
}

impl HttpRemoteAuthority {
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        let mut builder = Client::builder();

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| PlaythroughError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        info!("✅ HTTP 同步客户端已创建");

        Ok(Self {
            client,
            auth_token: config.auth_token.clone(),
        })
    }

    async fn post_json<B, R>(&self, url: String, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PlaythroughError::SyncNetwork(format!("请求 {} 失败: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "无法读取错误信息".to_string());
            error!("❌ 同步请求失败，HTTP 状态码: {}, 错误: {}", status, error_text);
            return Err(PlaythroughError::SyncServer {
                status: status.as_u16(),
                message: error_text,
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| PlaythroughError::Json(format!("解析 {} 响应失败: {}", url, e)))
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemoteAuthority {
    async fn fetch_changes(&self, tenant: &Tenant, since: Option<i64>) -> Result<SyncResponse> {
        debug!("📥 拉取远端变更: tenant={}, since={:?}", tenant, since);
        let body = FetchChangesRequest {
            user_email: &tenant.user_email,
            since,
        };
        self.post_json(format!("{}{}", tenant.url, SYNC_PATH), &body).await
    }

    async fn push_events(&self, tenant: &Tenant, events: &[PlaybackEvent]) -> Result<PushAck> {
        debug!("📤 推送 {} 条事件: tenant={}", events.len(), tenant);
        let body = PushEventsRequest {
            user_email: &tenant.user_email,
            events,
        };
        self.post_json(format!("{}{}", tenant.url, EVENTS_PATH), &body).await
    }
}
