// 待上传文件与本地校验

use anyhow::{Context, Result};
use bytes::Bytes;
use std::path::Path;

use crate::config::UploadConfig;

/// 默认单文件最大大小（10MB）
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// 待上传文件（内容已在内存中，重试时无需重新读取）
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl UploadFile {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    /// 从本地路径读取文件，MIME 类型按扩展名推断
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("无法读取文件: {:?}", path))?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("无效的文件名: {:?}", path))?;

        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(Self::new(file_name, content_type, data))
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// 文件校验规则
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileConstraints {
    /// 允许的 MIME 类型，为空表示不限制
    pub allowed_types: Vec<String>,
    /// 最大字节数（含）
    pub max_size: u64,
}

impl Default for FileConstraints {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

impl FileConstraints {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            allowed_types: config.allowed_types.clone(),
            max_size: config.max_file_size,
        }
    }
}

/// 本地校验失败（不发起任何网络请求）
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("不支持的文件类型: {file_name} ({content_type})，允许的类型: {allowed}")]
    TypeNotAllowed {
        file_name: String,
        content_type: String,
        allowed: String,
    },
    #[error("文件过大: {file_name} 大小 {size} 字节，超过上限 {max_size} 字节")]
    TooLarge {
        file_name: String,
        size: u64,
        max_size: u64,
    },
}

/// 校验单个文件的类型和大小
pub fn validate_file(file: &UploadFile, constraints: &FileConstraints) -> Result<(), ValidationError> {
    if !constraints.allowed_types.is_empty()
        && !constraints
            .allowed_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&file.content_type))
    {
        return Err(ValidationError::TypeNotAllowed {
            file_name: file.file_name.clone(),
            content_type: file.content_type.clone(),
            allowed: constraints.allowed_types.join(", "),
        });
    }

    if file.size() > constraints.max_size {
        return Err(ValidationError::TooLarge {
            file_name: file.file_name.clone(),
            size: file.size(),
            max_size: constraints.max_size,
        });
    }

    Ok(())
}
