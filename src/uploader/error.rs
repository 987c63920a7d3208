// 上传错误类型

use crate::api::ApiError;
use crate::uploader::ValidationError;

/// 上传失败原因
#[derive(Debug, Clone, thiserror::Error)]
pub enum UploadError {
    /// 调用参数错误（空文件列表、并发数为 0 等）
    #[error("无效参数: {0}")]
    InvalidInput(String),

    /// 本地校验失败
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// 批量获取预签名 URL 失败
    #[error("获取预签名上传地址失败: {0}")]
    BatchUrl(#[source] ApiError),

    /// 文件上传失败（已用尽重试或不可重试）
    #[error("文件 {file_name} 上传失败（尝试 {attempts} 次）: {source}")]
    Transfer {
        index: usize,
        file_name: String,
        attempts: u32,
        #[source]
        source: ApiError,
    },

    /// 服务端校验失败
    #[error("文件 {key} 校验失败: {source}")]
    Verification {
        key: String,
        #[source]
        source: ApiError,
    },

    /// 直传失败
    #[error("直传失败: {0}")]
    Direct(#[source] ApiError),

    /// 上传被取消
    #[error("上传已取消")]
    Aborted,

    /// 上传任务异常退出
    #[error("上传任务异常: {0}")]
    TaskPanicked(String),
}

impl UploadError {
    /// 是否为取消（调用方不应重试，也不应提示错误）
    pub fn is_abort(&self) -> bool {
        matches!(self, UploadError::Aborted)
    }

    /// 是否需要向用户展示错误提示
    pub fn should_notify_user(&self) -> bool {
        !self.is_abort()
    }
}
