// 后端 HTTP 客户端实现

use crate::api::{
    ApiEnvelope, ApiError, BatchUrlRequest, ByteProgress, Conversation, DirectUploadedFile,
    Metadata, PresignedSlot, ProfileType, VerifiedUpload,
};
use crate::config::ApiConfig;
use crate::uploader::UploadFile;
use anyhow::{Context, Result};
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

/// 流式上传时每段大小（驱动单文件进度回调）
const STREAM_PIECE_SIZE: usize = 64 * 1024;

/// 后端 API 客户端
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl ApiClient {
    /// 根据配置创建客户端
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to create HTTP client")?;

        info!(
            "初始化 API 客户端: base_url={}, token={}",
            config.base_url,
            if config.auth_token.is_some() {
                "已设置"
            } else {
                "未设置"
            }
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 附加登录令牌（预签名 URL 请求不使用）
    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// 检查状态码并解析 `{ data: T }`
    async fn decode_envelope<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        let text = response.text().await?;
        let envelope: ApiEnvelope<T> = serde_json::from_str(&text)
            .map_err(|e| ApiError::Decode(format!("{}: body={}", e, text)))?;
        Ok(envelope.data)
    }

    async fn ensure_success(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// 批量获取预签名上传 URL
    pub async fn generate_batch_urls(
        &self,
        request: &BatchUrlRequest,
    ) -> Result<Vec<PresignedSlot>, ApiError> {
        debug!(
            "请求预签名 URL: files={}, folder={}",
            request.files.len(),
            request.folder
        );

        let response = self
            .authorized(self.client.post(self.url("/api/v2/uploads/generate-batch-urls")))
            .json(request)
            .send()
            .await?;

        let slots: Vec<PresignedSlot> = Self::decode_envelope(response).await?;
        if slots.len() != request.files.len() {
            return Err(ApiError::Decode(format!(
                "预签名 URL 数量不匹配: 请求 {} 个, 返回 {} 个",
                request.files.len(),
                slots.len()
            )));
        }
        Ok(slots)
    }

    /// 向预签名 URL PUT 文件内容
    pub async fn put_object(
        &self,
        upload_url: &str,
        content_type: &str,
        data: Bytes,
        progress: Option<ByteProgress>,
    ) -> Result<(), ApiError> {
        let size = data.len();
        debug!("PUT 预签名 URL: size={}, type={}", size, content_type);

        let response = self
            .client
            .put(upload_url)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, size)
            .body(progress_body(data, progress))
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }

    /// 服务端校验上传结果
    pub async fn verify_upload(&self, key: &str) -> Result<VerifiedUpload, ApiError> {
        let path = format!("/api/v2/uploads/verify/{}", urlencoding::encode(key));
        let response = self
            .authorized(self.client.post(self.url(&path)))
            .send()
            .await?;
        Self::decode_envelope(response).await
    }

    /// 直传到应用服务器（multipart）
    pub async fn upload_direct(
        &self,
        files: &[UploadFile],
        folder: &str,
        metadata: &Metadata,
    ) -> Result<Vec<DirectUploadedFile>, ApiError> {
        let mut form = multipart::Form::new()
            .text("metadata", serde_json::to_string(metadata)?)
            .text("folder", folder.to_string());

        for file in files {
            let part = multipart::Part::bytes(file.data.to_vec())
                .file_name(file.file_name.clone())
                .mime_str(&file.content_type)?;
            form = form.part("images[]", part);
        }

        info!("直传 {} 个文件到应用服务器, folder={}", files.len(), folder);

        let response = self
            .authorized(self.client.post(self.url("/api/v2/posts")))
            .multipart(form)
            .send()
            .await?;
        Self::decode_envelope(response).await
    }

    /// 获取资料下的会话列表
    pub async fn profile_conversations(
        &self,
        profile_id: &str,
        profile_type: ProfileType,
    ) -> Result<Vec<Conversation>, ApiError> {
        let response = self
            .authorized(self.client.get(self.url("/api/v2/chat/conversations")))
            .query(&[("profileId", profile_id), ("profileType", profile_type.as_str())])
            .send()
            .await?;
        Self::decode_envelope(response).await
    }
}

/// 把内容切成小段流式发送，每发出一段回调一次进度
fn progress_body(data: Bytes, progress: Option<ByteProgress>) -> reqwest::Body {
    let total = data.len() as u64;
    let pieces: Vec<Bytes> = (0..data.len())
        .step_by(STREAM_PIECE_SIZE)
        .map(|start| data.slice(start..(start + STREAM_PIECE_SIZE).min(data.len())))
        .collect();

    let mut sent = 0u64;
    let stream = futures::stream::iter(pieces).map(move |piece| {
        sent += piece.len() as u64;
        if let Some(cb) = &progress {
            cb(sent, total);
        }
        Ok::<Bytes, std::io::Error>(piece)
    });

    reqwest::Body::wrap_stream(stream)
}
