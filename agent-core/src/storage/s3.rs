use super::{FileItem, Storage, StorageContext};
use crate::config::S3Settings;
use crate::constants::storage::{
    PRESIGN_EXPIRES_SECS, S3_DEFAULT_MAX_RETRIES, S3_DEFAULT_REGION, S3_DEFAULT_TIMEOUT_SECS,
};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::StorageClass;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, warn};

/// S3 兼容对象存储
///
/// type: s3
/// bucket: my-backups
/// region: us-east-1
/// path: backups
/// access_key_id / secret_access_key (或 access_key_secret) / token
/// endpoint / force_path_style / storage_class / max_retries / timeout
pub struct S3Storage {
    settings: S3Settings,
    ctx: StorageContext,
    client: Option<Client>,
}

impl S3Storage {
    pub fn new(settings: &S3Settings, ctx: StorageContext) -> Self {
        Self {
            settings: settings.clone(),
            ctx,
            client: None,
        }
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| AgentError::storage("S3 存储尚未打开"))
    }

    /// 远端对象键 `<path>/<key>`
    fn remote_key(&self, key: &str) -> String {
        join_key(&self.settings.path, key)
    }

    fn build_client(&self) -> Client {
        let settings = &self.settings;

        let access_key_id = settings.access_key_id.clone().unwrap_or_default();
        let secret_access_key = settings.secret_access_key.clone().unwrap_or_default();
        if access_key_id.is_empty() || secret_access_key.is_empty() {
            warn!(storage = %self.ctx.storage, "access_key_id 或 secret_access_key 为空");
        }

        let region = settings
            .region
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| S3_DEFAULT_REGION.to_string());
        let timeout = Duration::from_secs(settings.timeout.unwrap_or(S3_DEFAULT_TIMEOUT_SECS));
        // 重试次数 + 首次请求
        let max_attempts = settings.max_retries.unwrap_or(S3_DEFAULT_MAX_RETRIES) + 1;

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                settings.token.clone().filter(|t| !t.is_empty()),
                None,
                "launch-agent",
            ))
            .force_path_style(settings.force_path_style)
            .retry_config(RetryConfig::standard().with_max_attempts(max_attempts))
            .timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build());

        if let Some(endpoint) = settings.endpoint.as_deref().filter(|e| !e.is_empty()) {
            builder = builder.endpoint_url(endpoint);
        }

        Client::from_conf(builder.build())
    }
}

/// 拼接对象键，忽略多余的 `/`
pub fn join_key(prefix: &str, key: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let key = key.trim_start_matches('/');
    match (prefix.is_empty(), key.is_empty()) {
        (true, _) => key.to_string(),
        (false, true) => format!("{prefix}/"),
        (false, false) => format!("{prefix}/{key}"),
    }
}

fn s3_error<E>(action: &str, err: E) -> AgentError
where
    E: std::error::Error,
{
    AgentError::storage(format!("{action}: {}", DisplayErrorContext(&err)))
}

#[async_trait]
impl Storage for S3Storage {
    async fn open(&mut self) -> Result<()> {
        if self.settings.bucket.is_empty() {
            return Err(AgentError::storage("S3 bucket 未配置"));
        }
        self.client = Some(self.build_client());
        Ok(())
    }

    async fn close(&mut self) {
        self.client = None;
    }

    async fn upload(&self, key: &str) -> Result<()> {
        let client = self.client()?;
        for (source, remote) in self.ctx.upload_entries(key)? {
            let remote = self.remote_key(&remote);
            let body = ByteStream::from_path(&source)
                .await
                .map_err(|e| s3_error(&format!("读取文件 {} 失败", source.display()), e))?;

            let mut request = client
                .put_object()
                .bucket(&self.settings.bucket)
                .key(&remote)
                .body(body);
            // 部分兼容存储不支持 storage_class，只在配置时传递
            if let Some(class) = self.settings.storage_class.as_deref().filter(|c| !c.is_empty()) {
                request = request.storage_class(StorageClass::from(class));
            }

            request
                .send()
                .await
                .map_err(|e| s3_error(&format!("上传 {remote} 失败"), e))?;
            info!(model = %self.ctx.model, "=> s3://{}/{remote}", self.settings.bucket);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let remote = self.remote_key(key);
        self.client()?
            .delete_object()
            .bucket(&self.settings.bucket)
            .key(&remote)
            .send()
            .await
            .map_err(|e| s3_error(&format!("删除 {remote} 失败"), e))?;
        Ok(())
    }

    async fn list(&self, parent: &str) -> Result<Vec<FileItem>> {
        let client = self.client()?;
        let prefix = join_key(&self.settings.path, parent);
        let strip = join_key(&self.settings.path, "");
        let mut continuation: Option<String> = None;
        let mut items = Vec::new();

        loop {
            let mut request = client
                .list_objects_v2()
                .bucket(&self.settings.bucket)
                .prefix(&prefix);
            // MinIO 等实现不接受空的 continuation token
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let output = request
                .send()
                .await
                .map_err(|e| s3_error("列出对象失败", e))?;

            for object in output.contents() {
                let Some(key) = object.key() else { continue };
                let filename = key.strip_prefix(strip.as_str()).unwrap_or(key).to_string();
                items.push(FileItem {
                    filename,
                    size: object.size().unwrap_or_default().max(0) as u64,
                    last_modified: object
                        .last_modified()
                        .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())),
                });
            }

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(items)
    }

    async fn download(&self, key: &str) -> Result<String> {
        let remote = self.remote_key(key);
        let presigning = PresigningConfig::expires_in(Duration::from_secs(PRESIGN_EXPIRES_SECS))
            .map_err(|e| s3_error("预签名配置无效", e))?;
        let request = self
            .client()?
            .get_object()
            .bucket(&self.settings.bucket)
            .key(&remote)
            .presigned(presigning)
            .await
            .map_err(|e| s3_error(&format!("生成 {remote} 下载链接失败"), e))?;
        Ok(request.uri().to_string())
    }
}
