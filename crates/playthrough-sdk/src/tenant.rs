//! 租户 - 远端端点 + 账号，所有本地数据的隔离边界
//!
//! 每个 DAO / Reducer / Sync 调用都显式接收 `&Tenant`，不存在全局的「当前用户」。

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tenant {
    /// 远端端点标识（去掉末尾 `/`）
    pub url: String,
    /// 账号
    pub user_email: String,
}

impl Tenant {
    pub fn new(url: impl Into<String>, user_email: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            url: url.trim_end_matches('/').to_string(),
            user_email: user_email.into().trim().to_lowercase(),
        }
    }

    /// 稳定、可用作文件名/map key 的租户键
    pub fn key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.url.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.user_email.as_bytes());
        hex::encode(&hasher.finalize()[..12])
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user_email, self.url)
    }
}
