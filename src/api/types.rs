// 后端 API 数据类型定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// 文件元数据（键值对，原样透传给后端）
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// 字节级进度回调：(已发送字节, 总字节)
pub type ByteProgress = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// 后端统一响应包装 `{ data: ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub data: T,
}

// =====================================================
// 上传接口
// =====================================================

/// 批量获取预签名 URL 请求中的单个文件描述
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchFileDescriptor {
    pub file_name: String,
    pub content_type: String,
    pub file_size: u64,
    pub metadata: Metadata,
}

/// `POST /api/v2/uploads/generate-batch-urls` 请求体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchUrlRequest {
    pub files: Vec<BatchFileDescriptor>,
    pub folder: String,
}

/// 预签名上传槽位（与请求中的文件按顺序一一对应）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresignedSlot {
    pub upload_url: String,
    pub public_url: String,
    pub key: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// `POST /api/v2/uploads/verify/:key` 响应
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedUpload {
    pub public_url: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// 直传接口 `POST /api/v2/posts` 返回的单个文件
///
/// 后端只保证 `url` 存在，其余字段缺失时由调用方用本地文件信息补齐
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DirectUploadedFile {
    pub url: String,
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

// =====================================================
// 会话接口
// =====================================================

/// 资料类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProfileType {
    User,
    Company,
}

impl ProfileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileType::User => "user",
            ProfileType::Company => "company",
        }
    }
}

impl fmt::Display for ProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(ProfileType::User),
            "company" => Ok(ProfileType::Company),
            other => Err(format!("未知的资料类型: {}", other)),
        }
    }
}

/// 会话（只关心未读数）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(default, alias = "_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub unread_count: u64,
}

/// `null` 与字段缺失同样视为 0
fn null_as_zero<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<u64>::deserialize(deserializer).map(Option::unwrap_or_default)
}

// =====================================================
// 错误分类
// =====================================================

/// 传输错误类型（决定是否重试）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferErrorKind {
    /// 网络错误（可重试）
    Network,
    /// 超时（可重试）
    Timeout,
    /// 服务器错误（可重试）
    ServerError,
    /// 限流（可重试）
    RateLimited,
    /// 权限不足 / 预签名失效（不可重试）
    Forbidden,
    /// 目标不存在（不可重试）
    NotFound,
    /// 参数错误（不可重试）
    BadRequest,
    /// 已取消（不可重试）
    Cancelled,
    /// 未知错误
    Unknown,
}

impl TransferErrorKind {
    /// 是否可重试
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            TransferErrorKind::Network
                | TransferErrorKind::Timeout
                | TransferErrorKind::ServerError
                | TransferErrorKind::RateLimited
        )
    }

    /// 从 HTTP 状态码转换
    pub fn from_status(status: u16) -> Self {
        match status {
            408 => TransferErrorKind::Timeout,
            429 => TransferErrorKind::RateLimited,
            401 | 403 => TransferErrorKind::Forbidden,
            404 => TransferErrorKind::NotFound,
            400..=499 => TransferErrorKind::BadRequest,
            500..=599 => TransferErrorKind::ServerError,
            _ => TransferErrorKind::Unknown,
        }
    }
}

/// 后端请求错误
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("网络错误: {0}")]
    Transport(String),
    #[error("请求超时")]
    Timeout,
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("响应解析失败: {0}")]
    Decode(String),
    #[error("请求已取消")]
    Aborted,
}

impl ApiError {
    pub fn kind(&self) -> TransferErrorKind {
        match self {
            ApiError::Transport(_) => TransferErrorKind::Network,
            ApiError::Timeout => TransferErrorKind::Timeout,
            ApiError::Status { status, .. } => TransferErrorKind::from_status(*status),
            ApiError::Decode(_) => TransferErrorKind::Unknown,
            ApiError::Aborted => TransferErrorKind::Cancelled,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            ApiError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_retriable() {
        assert!(TransferErrorKind::Network.is_retriable());
        assert!(TransferErrorKind::Timeout.is_retriable());
        assert!(TransferErrorKind::ServerError.is_retriable());
        assert!(TransferErrorKind::RateLimited.is_retriable());

        assert!(!TransferErrorKind::Forbidden.is_retriable());
        assert!(!TransferErrorKind::NotFound.is_retriable());
        assert!(!TransferErrorKind::BadRequest.is_retriable());
        assert!(!TransferErrorKind::Cancelled.is_retriable());
        assert!(!TransferErrorKind::Unknown.is_retriable());
    }

    #[test]
    fn test_status_classification() {
        let err = |status| ApiError::Status {
            status,
            body: String::new(),
        };
        assert_eq!(err(503).kind(), TransferErrorKind::ServerError);
        assert_eq!(err(429).kind(), TransferErrorKind::RateLimited);
        assert_eq!(err(403).kind(), TransferErrorKind::Forbidden);
        assert_eq!(err(422).kind(), TransferErrorKind::BadRequest);
        assert_eq!(ApiError::Transport("reset".into()).kind(), TransferErrorKind::Network);
    }

    #[test]
    fn test_conversation_deserialize() {
        let list: Vec<Conversation> = serde_json::from_str(
            r#"[{"_id":"a","unreadCount":2},{"id":"b"},{"unreadCount":5,"participants":[]}]"#,
        )
        .unwrap();
        assert_eq!(list[0].id.as_deref(), Some("a"));
        assert_eq!(list[0].unread_count, 2);
        assert_eq!(list[1].unread_count, 0);
        assert_eq!(list[2].unread_count, 5);
    }

    #[test]
    fn test_conversation_null_unread_is_zero() {
        let list: Vec<Conversation> = serde_json::from_str(
            r#"[{"_id":"a","unreadCount":null},{"_id":"b","unreadCount":4}]"#,
        )
        .unwrap();
        assert_eq!(list[0].unread_count, 0);
        assert_eq!(list[1].unread_count, 4);
    }

    #[test]
    fn test_profile_type_parse() {
        assert_eq!("Company".parse::<ProfileType>().unwrap(), ProfileType::Company);
        assert_eq!(ProfileType::User.to_string(), "user");
        assert!("admin".parse::<ProfileType>().is_err());
    }

    #[test]
    fn test_presigned_slot_camel_case() {
        let slot: PresignedSlot = serde_json::from_str(
            r#"{"uploadUrl":"https://s3/put","publicUrl":"https://cdn/a","key":"a"}"#,
        )
        .unwrap();
        assert_eq!(slot.upload_url, "https://s3/put");
        assert!(slot.metadata.is_empty());
    }
}
