// 上传引擎
//
// 核心功能：
// 1. 一次批量请求获取全部预签名 URL
// 2. 有界并发调度（同一时刻最多 concurrency 个文件处于上传阶段）
// 3. 单文件指数退避重试，失败一个即整批失败
// 4. 上传成功后服务端校验，结果按输入顺序返回
// 5. 取消令牌中止所有进行中的请求
// 6. 预签名失败时可回退为 multipart 直传
//
// 调度器计数器（in_progress / completed）只在调度循环里修改，
// 检查与修改之间没有 await

use crate::api::{ApiError, BatchFileDescriptor, BatchUrlRequest, ByteProgress, Metadata};
use crate::config::UploadConfig;
use crate::uploader::{
    percent, validate_file, BatchStage, FileConstraints, ProgressCallback, UploadBackend,
    UploadError, UploadFile, UploadProgress, UploadTask, UploadedFile,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =====================================================
// 重试配置
// =====================================================

/// 默认并发上传文件数
pub const DEFAULT_CONCURRENCY: usize = 3;

/// 默认最大尝试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 默认退避基础延迟
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(1000);

/// 计算指数退避延迟：`base × 2^(attempt-1)`
///
/// # 延迟序列（base = 1000ms）
/// - attempt=1: 1000ms
/// - attempt=2: 2000ms
/// - attempt=3: 4000ms
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}

// =====================================================
// 上传选项
// =====================================================

/// 单次批量上传的选项
#[derive(Clone)]
pub struct UploadOptions {
    /// 目标目录
    pub folder: String,
    /// 附加到每个文件的用户元数据
    pub user_metadata: Metadata,
    /// 同时上传的文件数（>= 1）
    pub concurrency: usize,
    /// 单文件 PUT 最大尝试次数（>= 1）
    pub max_retries: u32,
    /// 退避基础延迟
    pub retry_base_delay: Duration,
    /// 取消令牌
    pub cancel_token: Option<CancellationToken>,
    /// 预签名失败时回退直传
    pub fallback_to_direct: bool,
    /// 进度回调
    pub on_progress: Option<ProgressCallback>,
    /// 本地校验规则，None 表示不校验
    pub constraints: Option<FileConstraints>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            folder: String::new(),
            user_metadata: Metadata::new(),
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            cancel_token: None,
            fallback_to_direct: false,
            on_progress: None,
            constraints: None,
        }
    }
}

impl UploadOptions {
    /// 按上传配置生成选项（包含文件校验规则）
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            folder: config.default_folder.clone(),
            user_metadata: Metadata::new(),
            concurrency: config.concurrency,
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            cancel_token: None,
            fallback_to_direct: config.fallback_to_direct,
            on_progress: None,
            constraints: Some(FileConstraints::from_config(config)),
        }
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = folder.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.user_metadata = metadata;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    fn emit(&self, event: UploadProgress) {
        if let Some(cb) = &self.on_progress {
            cb(event);
        }
    }

    fn emit_batch(&self, stage: BatchStage, completed: usize, total: usize) {
        self.emit(UploadProgress::Batch {
            stage,
            completed,
            total,
        });
    }
}

// =====================================================
// 上传引擎
// =====================================================

/// 上传引擎
pub struct Uploader {
    backend: Arc<dyn UploadBackend>,
    config: UploadConfig,
}

impl Uploader {
    pub fn new(backend: Arc<dyn UploadBackend>, config: UploadConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// 上传单个文件（使用配置中的默认选项）
    pub async fn upload_file(
        &self,
        file: UploadFile,
        folder: &str,
        metadata: Metadata,
    ) -> Result<UploadedFile, UploadError> {
        let mut results = self.upload_files(vec![file], folder, metadata).await?;
        results
            .pop()
            .ok_or_else(|| UploadError::TaskPanicked("上传结果为空".to_string()))
    }

    /// 上传多个文件（使用配置中的默认选项）
    pub async fn upload_files(
        &self,
        files: Vec<UploadFile>,
        folder: &str,
        metadata: Metadata,
    ) -> Result<Vec<UploadedFile>, UploadError> {
        let options = UploadOptions::from_config(&self.config)
            .with_folder(folder)
            .with_metadata(metadata);
        self.upload_files_with_queue(files, options).await
    }

    /// 批量上传：预签名 → 有界并发 PUT（带重试）→ 校验
    ///
    /// 返回结果与输入顺序一致；任意文件最终失败则整批失败
    pub async fn upload_files_with_queue(
        &self,
        files: Vec<UploadFile>,
        options: UploadOptions,
    ) -> Result<Vec<UploadedFile>, UploadError> {
        check_input(&files, &options)?;

        let cancel = options.cancel_token.clone().unwrap_or_default();
        if cancel.is_cancelled() {
            return Err(UploadError::Aborted);
        }

        let total = files.len();
        info!(
            "开始批量上传: files={}, folder={}, concurrency={}, max_retries={}",
            total, options.folder, options.concurrency, options.max_retries
        );

        // 1. 一次请求获取全部预签名 URL
        options.emit_batch(BatchStage::RequestingUrls, 0, total);
        let request = BatchUrlRequest {
            files: files
                .iter()
                .map(|f| BatchFileDescriptor {
                    file_name: f.file_name.clone(),
                    content_type: f.content_type.clone(),
                    file_size: f.size(),
                    metadata: options.user_metadata.clone(),
                })
                .collect(),
            folder: options.folder.clone(),
        };

        let slots = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Aborted),
            result = self.backend.generate_batch_urls(&request) => result,
        };

        let slots = match slots.and_then(|slots| {
            if slots.len() == total {
                Ok(slots)
            } else {
                Err(ApiError::Decode(format!(
                    "预签名 URL 数量不匹配: 请求 {} 个, 返回 {} 个",
                    total,
                    slots.len()
                )))
            }
        }) {
            Ok(slots) => slots,
            Err(e) if options.fallback_to_direct => {
                warn!("获取预签名 URL 失败，回退为直传: {}", e);
                options.emit_batch(BatchStage::DirectFallback, 0, total);
                return self.upload_files_direct(files, options).await;
            }
            Err(e) => {
                error!("获取预签名 URL 失败: {}", e);
                return Err(UploadError::BatchUrl(e));
            }
        };

        let tasks: Vec<UploadTask> = files
            .into_iter()
            .zip(slots)
            .enumerate()
            .map(|(index, (file, slot))| {
                let mut task = UploadTask::new(index, file, options.user_metadata.clone());
                task.assign_slot(slot);
                task
            })
            .collect();

        // 2-5. 调度上传
        let results = self.run_queue(tasks, &options, &cancel).await?;
        info!("批量上传完成: {} 个文件", results.len());
        Ok(results)
    }

    /// 有界并发调度
    async fn run_queue(
        &self,
        tasks: Vec<UploadTask>,
        options: &UploadOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<UploadedFile>, UploadError> {
        let total = tasks.len();
        let mut queue = tasks.into_iter();
        let mut results: Vec<Option<UploadedFile>> = vec![None; total];
        let mut in_progress = 0usize;
        let mut completed = 0usize;
        let mut join_set: JoinSet<Result<UploadedFile, UploadError>> = JoinSet::new();

        let ctx = FileUploadContext {
            backend: self.backend.clone(),
            max_retries: options.max_retries,
            retry_base_delay: options.retry_base_delay,
            cancel: cancel.clone(),
            on_progress: options.on_progress.clone(),
        };

        options.emit_batch(BatchStage::Uploading, 0, total);

        while completed < total {
            // 填满空闲名额
            while in_progress < options.concurrency {
                let Some(task) = queue.next() else {
                    break;
                };
                in_progress += 1;
                debug!(
                    "[文件#{}] 开始调度 ({} 个进行中)",
                    task.order_index, in_progress
                );
                join_set.spawn(upload_single_file(task, ctx.clone()));
            }

            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    join_set.abort_all();
                    info!("批量上传已取消，丢弃 {} 个已完成结果", completed);
                    return Err(UploadError::Aborted);
                }
                joined = join_set.join_next() => joined,
            };

            match joined {
                Some(Ok(Ok(uploaded))) => {
                    in_progress -= 1;
                    completed += 1;
                    let index = uploaded.order_index;
                    results[index] = Some(uploaded);
                    options.emit_batch(BatchStage::Uploading, completed, total);
                }
                Some(Ok(Err(e))) => {
                    join_set.abort_all();
                    if !e.is_abort() {
                        error!("批量上传失败: {}", e);
                    }
                    return Err(e);
                }
                Some(Err(e)) => {
                    join_set.abort_all();
                    error!("上传任务异常: {}", e);
                    return Err(UploadError::TaskPanicked(e.to_string()));
                }
                None => break,
            }
        }

        options.emit_batch(BatchStage::Completed, completed, total);

        results
            .into_iter()
            .enumerate()
            .map(|(index, r)| {
                r.ok_or_else(|| UploadError::TaskPanicked(format!("缺少第 {} 个文件的结果", index)))
            })
            .collect()
    }

    /// multipart 直传到应用服务器
    pub async fn upload_files_direct(
        &self,
        files: Vec<UploadFile>,
        options: UploadOptions,
    ) -> Result<Vec<UploadedFile>, UploadError> {
        check_input(&files, &options)?;

        let cancel = options.cancel_token.clone().unwrap_or_default();
        let total = files.len();
        info!("开始直传: files={}, folder={}", total, options.folder);
        options.emit_batch(BatchStage::Uploading, 0, total);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Aborted),
            result = self.backend.upload_direct(&files, &options.folder, &options.user_metadata) => result,
        };

        let uploaded = response.map_err(|e| {
            error!("直传失败: {}", e);
            UploadError::Direct(e)
        })?;

        if uploaded.len() != total {
            return Err(UploadError::Direct(ApiError::Decode(format!(
                "直传返回数量不匹配: 上传 {} 个, 返回 {} 个",
                total,
                uploaded.len()
            ))));
        }

        let results: Vec<UploadedFile> = files
            .into_iter()
            .zip(uploaded)
            .enumerate()
            .map(|(index, (file, remote))| UploadedFile {
                public_url: remote.public_url.unwrap_or_else(|| remote.url.clone()),
                url: remote.url,
                key: remote.key.unwrap_or_default(),
                size: remote.size.unwrap_or_else(|| file.size()),
                mime_type: remote.mime_type.unwrap_or(file.content_type),
                order_index: index,
                metadata: remote
                    .metadata
                    .unwrap_or_else(|| options.user_metadata.clone()),
            })
            .collect();

        options.emit_batch(BatchStage::Completed, total, total);
        Ok(results)
    }
}

/// 参数检查 + 本地校验（失败时不发起任何请求）
fn check_input(files: &[UploadFile], options: &UploadOptions) -> Result<(), UploadError> {
    if files.is_empty() {
        return Err(UploadError::InvalidInput("文件列表为空".to_string()));
    }
    if options.concurrency == 0 {
        return Err(UploadError::InvalidInput("concurrency 必须 >= 1".to_string()));
    }
    if options.max_retries == 0 {
        return Err(UploadError::InvalidInput("max_retries 必须 >= 1".to_string()));
    }
    if let Some(constraints) = &options.constraints {
        for file in files {
            validate_file(file, constraints)?;
        }
    }
    Ok(())
}

// =====================================================
// 单文件上传（在 JoinSet 中运行）
// =====================================================

#[derive(Clone)]
struct FileUploadContext {
    backend: Arc<dyn UploadBackend>,
    max_retries: u32,
    retry_base_delay: Duration,
    cancel: CancellationToken,
    on_progress: Option<ProgressCallback>,
}

impl FileUploadContext {
    /// 字节进度写入任务计数器，并转换为单文件进度事件
    fn byte_progress(&self, task: &UploadTask) -> ByteProgress {
        let cb = self.on_progress.clone();
        let uploaded = task.uploaded_size.clone();
        let index = task.order_index;
        let file_name = task.file.file_name.clone();
        Arc::new(move |sent, total| {
            uploaded.store(sent, Ordering::Relaxed);
            if let Some(cb) = &cb {
                cb(UploadProgress::Single {
                    index,
                    file_name: file_name.clone(),
                    percent: percent(sent, total),
                })
            }
        })
    }
}

async fn upload_single_file(
    mut task: UploadTask,
    ctx: FileUploadContext,
) -> Result<UploadedFile, UploadError> {
    task.mark_uploading();
    put_with_retry(&mut task, &ctx).await?;

    task.mark_verifying();
    let key = task.key.clone().unwrap_or_default();
    debug!("[文件#{}] 上传完成，开始校验: key={}", task.order_index, key);

    let verified = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(UploadError::Aborted),
        result = ctx.backend.verify_upload(&key) => result,
    };

    match verified {
        Ok(verified) => {
            let uploaded = task.complete(verified);
            info!(
                "[文件#{}] ✓ {} 上传并校验成功 (尝试 {} 次)",
                uploaded.order_index, task.file.file_name, task.attempts
            );
            Ok(uploaded)
        }
        Err(ApiError::Aborted) => Err(UploadError::Aborted),
        Err(e) => {
            error!("[文件#{}] 校验失败: key={}, 错误: {}", task.order_index, key, e);
            task.mark_failed(e.to_string());
            Err(UploadError::Verification { key, source: e })
        }
    }
}

/// PUT 到预签名 URL，可重试错误按指数退避重试
async fn put_with_retry(task: &mut UploadTask, ctx: &FileUploadContext) -> Result<(), UploadError> {
    let upload_url = task.upload_url.clone().unwrap_or_default();
    let progress = ctx.byte_progress(task);

    loop {
        let attempt = task.begin_attempt();

        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(ApiError::Aborted),
            result = ctx.backend.put_object(
                &upload_url,
                &task.file.content_type,
                task.file.data.clone(),
                Some(progress.clone()),
            ) => result,
        };

        let e = match result {
            Ok(()) => {
                let size = task.file.size();
                progress(size, size);
                return Ok(());
            }
            Err(ApiError::Aborted) => return Err(UploadError::Aborted),
            Err(e) => e,
        };

        let kind = e.kind();
        if !kind.is_retriable() || attempt >= ctx.max_retries {
            error!(
                "[文件#{}] 上传失败（{}）: {:?}, 已尝试 {}/{} 次, 错误: {}",
                task.order_index,
                if kind.is_retriable() { "重试已用尽" } else { "不可重试" },
                kind,
                attempt,
                ctx.max_retries,
                e
            );
            task.mark_failed(e.to_string());
            return Err(UploadError::Transfer {
                index: task.order_index,
                file_name: task.file.file_name.clone(),
                attempts: attempt,
                source: e,
            });
        }

        let delay = backoff_delay(attempt, ctx.retry_base_delay);
        warn!(
            "[文件#{}] 上传失败（已上传 {:.1}%），等待 {:?} 后重试 ({}/{}): {}",
            task.order_index,
            task.progress(),
            delay,
            attempt,
            ctx.max_retries,
            e
        );

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(UploadError::Aborted),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
