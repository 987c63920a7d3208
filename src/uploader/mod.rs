// 上传模块
//
// 预签名批量上传流水线：
// - 一次请求获取全部预签名 URL
// - 有界并发 PUT + 指数退避重试
// - 服务端校验，结果按输入顺序返回
// - 可选的 multipart 直传回退

pub mod backend;
pub mod engine;
pub mod error;
pub mod file;
pub mod progress;
pub mod task;

pub use backend::UploadBackend;
pub use engine::{
    backoff_delay, UploadOptions, Uploader, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_BASE_DELAY,
};
pub use error::UploadError;
pub use file::{validate_file, FileConstraints, UploadFile, ValidationError, DEFAULT_MAX_FILE_SIZE};
pub use progress::{percent, BatchStage, ProgressCallback, UploadProgress};
pub use task::{UploadStage, UploadTask, UploadedFile};
