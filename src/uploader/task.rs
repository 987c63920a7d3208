// 上传任务定义
//
// 每个文件在流水线中的状态：RequestingUrl → Uploading → Verifying → Completed

use crate::api::{Metadata, PresignedSlot, VerifiedUpload};
use crate::uploader::UploadFile;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 上传阶段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum UploadStage {
    /// 等待预签名 URL
    RequestingUrl,
    /// 上传中
    Uploading,
    /// 服务端校验中
    Verifying,
    /// 已完成
    Completed,
    /// 失败
    Failed,
}

/// 单个文件的最终上传结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    /// 上传地址（预签名 URL 去掉查询串，或直传返回的地址）
    pub url: String,
    /// 公开访问地址
    pub public_url: String,
    /// 存储键
    pub key: String,
    pub size: u64,
    pub mime_type: String,
    /// 在输入列表中的位置
    pub order_index: usize,
    pub metadata: Metadata,
}

/// 上传任务
#[derive(Debug, Clone)]
pub struct UploadTask {
    /// 在输入列表中的位置
    pub order_index: usize,
    pub file: UploadFile,
    /// 用户元数据
    pub metadata: Metadata,
    pub stage: UploadStage,
    /// 已尝试次数
    pub attempts: u32,
    pub upload_url: Option<String>,
    pub key: Option<String>,
    /// 预签名响应中附带的元数据
    pub slot_metadata: Metadata,
    /// 已上传字节（由 PUT 的字节进度回调更新）
    pub uploaded_size: Arc<AtomicU64>,
    pub error: Option<String>,
}

impl UploadTask {
    /// 创建新的上传任务
    pub fn new(order_index: usize, file: UploadFile, metadata: Metadata) -> Self {
        Self {
            order_index,
            file,
            metadata,
            stage: UploadStage::RequestingUrl,
            attempts: 0,
            upload_url: None,
            key: None,
            slot_metadata: Metadata::new(),
            uploaded_size: Arc::new(AtomicU64::new(0)),
            error: None,
        }
    }

    /// 计算进度百分比
    pub fn progress(&self) -> f64 {
        let total = self.file.size();
        if total == 0 {
            return if self.stage >= UploadStage::Verifying {
                100.0
            } else {
                0.0
            };
        }
        (self.uploaded_size.load(Ordering::Relaxed) as f64 / total as f64) * 100.0
    }

    /// 写入预签名槽位（仍停留在 RequestingUrl，等待调度器分配上传名额）
    pub fn assign_slot(&mut self, slot: PresignedSlot) {
        self.upload_url = Some(slot.upload_url);
        self.key = Some(slot.key);
        self.slot_metadata = slot.metadata;
    }

    /// 标记为上传中
    pub fn mark_uploading(&mut self) {
        debug_assert_eq!(self.stage, UploadStage::RequestingUrl);
        self.stage = UploadStage::Uploading;
    }

    /// 记录一次 PUT 尝试
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.uploaded_size.store(0, Ordering::Relaxed);
        self.attempts
    }

    /// 标记为校验中
    pub fn mark_verifying(&mut self) {
        debug_assert_eq!(self.stage, UploadStage::Uploading);
        self.stage = UploadStage::Verifying;
        self.uploaded_size.store(self.file.size(), Ordering::Relaxed);
    }

    /// 合并校验结果，生成最终结果
    ///
    /// 元数据优先级：校验响应 > 预签名响应 > 用户元数据
    pub fn complete(&mut self, verified: VerifiedUpload) -> UploadedFile {
        debug_assert_eq!(self.stage, UploadStage::Verifying);
        self.stage = UploadStage::Completed;

        let mut metadata = self.metadata.clone();
        metadata.extend(self.slot_metadata.clone());
        metadata.extend(verified.metadata);

        let upload_url = self.upload_url.clone().unwrap_or_default();
        let url = upload_url
            .split('?')
            .next()
            .unwrap_or_default()
            .to_string();

        UploadedFile {
            url,
            public_url: verified.public_url,
            key: self.key.clone().unwrap_or_default(),
            size: self.file.size(),
            mime_type: self.file.content_type.clone(),
            order_index: self.order_index,
            metadata,
        }
    }

    /// 标记为失败
    pub fn mark_failed(&mut self, error: String) {
        self.stage = UploadStage::Failed;
        self.error = Some(error);
    }
}
