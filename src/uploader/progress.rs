// 上传进度事件

use serde::Serialize;
use std::sync::Arc;

/// 批量上传所处阶段
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStage {
    /// 正在获取预签名 URL
    RequestingUrls,
    /// 正在上传
    Uploading,
    /// 全部完成
    Completed,
    /// 预签名失败，改为直传
    DirectFallback,
}

/// 上传进度事件
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadProgress {
    /// 批次粒度
    Batch {
        stage: BatchStage,
        completed: usize,
        total: usize,
    },
    /// 单文件粒度
    Single {
        index: usize,
        file_name: String,
        percent: f64,
    },
}

/// 进度回调函数类型
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// 计算百分比（保留一位小数）
pub fn percent(sent: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    ((sent as f64 / total as f64) * 1000.0).round() / 10.0
}
