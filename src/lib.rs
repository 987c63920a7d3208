// MSME Sync Library
// 媒体上传与未读通知客户端核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 后端 API 模块
pub mod api;

// 上传引擎模块
pub mod uploader;

// 未读通知模块
pub mod notification;

// 导出常用类型
pub use api::{ApiClient, ApiError, ProfileType};
pub use config::AppConfig;
pub use notification::{ActiveProfile, NotificationManager};
pub use uploader::{
    UploadError, UploadFile, UploadOptions, UploadProgress, UploadedFile, Uploader,
};
