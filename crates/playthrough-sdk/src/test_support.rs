//! 测试用的租户、样例数据与假实现

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::watch;

use crate::error::{PlaythroughError, Result};
use crate::storage::entities::{PlaybackEvent, Playthrough, PlaythroughStatus};
use crate::sync::remote::{PushAck, RemoteAuthority, SyncResponse};
use crate::tenant::Tenant;
use crate::transport::{PlaybackTransport, TransportProgress};

pub(crate) fn tenant() -> Tenant {
    Tenant::new("https://books.example.com", "reader@example.com")
}

pub(crate) fn other_tenant() -> Tenant {
    Tenant::new("https://books.example.com", "someone.else@example.com")
}

pub(crate) fn sample_playthrough(tenant: &Tenant, id: &str, last_event_at: i64) -> Playthrough {
    Playthrough {
        id: id.to_string(),
        url: tenant.url.clone(),
        user_email: tenant.user_email.clone(),
        media_id: "book-42".to_string(),
        status: PlaythroughStatus::InProgress,
        started_at: last_event_at - 10_000,
        finished_at: None,
        abandoned_at: None,
        deleted_at: None,
        position: 120.0,
        playback_rate: 1.0,
        last_event_at,
        refreshed_at: Some(last_event_at),
    }
}

/// 可挂起的闸门：关闭时调用方在 `pass()` 上等待
struct Gate(watch::Sender<bool>);

impl Gate {
    fn new() -> Self {
        Self(watch::channel(false).0)
    }

    fn hold(&self) {
        self.0.send_replace(true);
    }

    fn release(&self) {
        self.0.send_replace(false);
    }

    async fn pass(&self) {
        let mut rx = self.0.subscribe();
        loop {
            let held = *rx.borrow_and_update();
            if !held || rx.changed().await.is_err() {
                return;
            }
        }
    }
}

struct TransportState {
    position: f64,
    duration: f64,
    rate: f64,
    seek_calls: Vec<f64>,
    fail_seeks: bool,
}

pub(crate) struct FakeTransport {
    state: Mutex<TransportState>,
    gate: Gate,
}

impl FakeTransport {
    pub(crate) fn new(position: f64, duration: f64, rate: f64) -> Self {
        Self {
            state: Mutex::new(TransportState {
                position,
                duration,
                rate,
                seek_calls: Vec::new(),
                fail_seeks: false,
            }),
            gate: Gate::new(),
        }
    }

    pub(crate) fn seek_calls(&self) -> Vec<f64> {
        self.state.lock().seek_calls.clone()
    }

    pub(crate) fn set_position(&self, position: f64) {
        self.state.lock().position = position;
    }

    pub(crate) fn hold_seeks(&self) {
        self.gate.hold();
    }

    pub(crate) fn release_seeks(&self) {
        self.gate.release();
    }

    pub(crate) fn fail_seeks(&self, fail: bool) {
        self.state.lock().fail_seeks = fail;
    }
}

#[async_trait]
impl PlaybackTransport for FakeTransport {
    async fn seek_to(&self, position: f64) -> Result<()> {
        self.gate.pass().await;
        let mut state = self.state.lock();
        state.seek_calls.push(position);
        if state.fail_seeks {
            return Err(PlaythroughError::Transport("player unavailable".into()));
        }
        state.position = position;
        Ok(())
    }

    async fn set_rate(&self, rate: f64) -> Result<()> {
        self.state.lock().rate = rate;
        Ok(())
    }

    async fn get_progress(&self) -> Result<TransportProgress> {
        let state = self.state.lock();
        Ok(TransportProgress {
            position: state.position,
            duration: state.duration,
        })
    }

    async fn get_rate(&self) -> Result<f64> {
        Ok(self.state.lock().rate)
    }
}

/// 远端故障注入
#[derive(Debug, Clone, Copy)]
pub(crate) enum RemoteFailure {
    Network,
    Server(u16),
}

impl RemoteFailure {
    fn to_error(self) -> PlaythroughError {
        match self {
            RemoteFailure::Network => PlaythroughError::SyncNetwork("connection refused".into()),
            RemoteFailure::Server(status) => PlaythroughError::SyncServer {
                status,
                message: "remote unavailable".into(),
            },
        }
    }
}

#[derive(Default)]
struct RemoteState {
    responses: HashMap<String, SyncResponse>,
    fetch_calls: Vec<(String, Option<i64>)>,
    pushed: Vec<PlaybackEvent>,
    push_server_time: i64,
    fetch_failure: Option<RemoteFailure>,
    push_failure: Option<RemoteFailure>,
}

/// 按租户返回预设响应的远端
pub(crate) struct FakeRemote {
    state: Mutex<RemoteState>,
    fetch_gate: Gate,
}

impl FakeRemote {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RemoteState {
                push_server_time: 1_000,
                ..RemoteState::default()
            }),
            fetch_gate: Gate::new(),
        }
    }

    /// 未设置响应的租户拿到空批次
    pub(crate) fn set_response(&self, tenant: &Tenant, response: SyncResponse) {
        self.state.lock().responses.insert(tenant.key(), response);
    }

    pub(crate) fn set_push_server_time(&self, server_time: i64) {
        self.state.lock().push_server_time = server_time;
    }

    pub(crate) fn fail_fetches(&self, failure: Option<RemoteFailure>) {
        self.state.lock().fetch_failure = failure;
    }

    pub(crate) fn fail_pushes(&self, failure: Option<RemoteFailure>) {
        self.state.lock().push_failure = failure;
    }

    pub(crate) fn hold_fetches(&self) {
        self.fetch_gate.hold();
    }

    pub(crate) fn release_fetches(&self) {
        self.fetch_gate.release();
    }

    /// (tenant key, since)
    pub(crate) fn fetch_calls(&self) -> Vec<(String, Option<i64>)> {
        self.state.lock().fetch_calls.clone()
    }

    pub(crate) fn pushed(&self) -> Vec<PlaybackEvent> {
        self.state.lock().pushed.clone()
    }
}

#[async_trait]
impl RemoteAuthority for FakeRemote {
    async fn fetch_changes(&self, tenant: &Tenant, since: Option<i64>) -> Result<SyncResponse> {
        self.state.lock().fetch_calls.push((tenant.key(), since));
        self.fetch_gate.pass().await;
        let state = self.state.lock();
        if let Some(failure) = state.fetch_failure {
            return Err(failure.to_error());
        }
        Ok(state.responses.get(&tenant.key()).cloned().unwrap_or_else(|| SyncResponse {
            server_time: state.push_server_time,
            ..SyncResponse::default()
        }))
    }

    async fn push_events(&self, _tenant: &Tenant, events: &[PlaybackEvent]) -> Result<PushAck> {
        let mut state = self.state.lock();
        if let Some(failure) = state.push_failure {
            return Err(failure.to_error());
        }
        state.pushed.extend_from_slice(events);
        Ok(PushAck {
            server_time: state.push_server_time,
        })
    }
}
