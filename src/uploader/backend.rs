// 上传后端抽象
//
// 引擎只依赖这个 trait，生产环境由 ApiClient 实现

use crate::api::{
    ApiClient, ApiError, BatchUrlRequest, ByteProgress, DirectUploadedFile, Metadata,
    PresignedSlot, VerifiedUpload,
};
use crate::uploader::UploadFile;
use async_trait::async_trait;
use bytes::Bytes;

#[async_trait]
pub trait UploadBackend: Send + Sync {
    /// 批量获取预签名 URL，返回值与请求按顺序一一对应
    async fn generate_batch_urls(
        &self,
        request: &BatchUrlRequest,
    ) -> Result<Vec<PresignedSlot>, ApiError>;

    /// PUT 文件内容到预签名 URL
    async fn put_object(
        &self,
        upload_url: &str,
        content_type: &str,
        data: Bytes,
        progress: Option<ByteProgress>,
    ) -> Result<(), ApiError>;

    /// 服务端校验
    async fn verify_upload(&self, key: &str) -> Result<VerifiedUpload, ApiError>;

    /// multipart 直传
    async fn upload_direct(
        &self,
        files: &[UploadFile],
        folder: &str,
        metadata: &Metadata,
    ) -> Result<Vec<DirectUploadedFile>, ApiError>;
}

#[async_trait]
impl UploadBackend for ApiClient {
    async fn generate_batch_urls(
        &self,
        request: &BatchUrlRequest,
    ) -> Result<Vec<PresignedSlot>, ApiError> {
        ApiClient::generate_batch_urls(self, request).await
    }

    async fn put_object(
        &self,
        upload_url: &str,
        content_type: &str,
        data: Bytes,
        progress: Option<ByteProgress>,
    ) -> Result<(), ApiError> {
        ApiClient::put_object(self, upload_url, content_type, data, progress).await
    }

    async fn verify_upload(&self, key: &str) -> Result<VerifiedUpload, ApiError> {
        ApiClient::verify_upload(self, key).await
    }

    async fn upload_direct(
        &self,
        files: &[UploadFile],
        folder: &str,
        metadata: &Metadata,
    ) -> Result<Vec<DirectUploadedFile>, ApiError> {
        ApiClient::upload_direct(self, files, folder, metadata).await
    }
}
