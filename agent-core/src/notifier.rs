//! Webhook 通知

use crate::config::WebhookConfig;
use crate::constants::notify::{CONTENT_TYPE, DEFAULT_TIMEOUT, USER_AGENT};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE as CONTENT_TYPE_HEADER;
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info};

/// 通知发送
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, target: &WebhookConfig, payload: &Value) -> Result<()>;
}

/// 以 JSON 请求体调用 webhook，非 2xx 响应视为失败
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, target: &WebhookConfig, payload: &Value) -> Result<()> {
        let method = Method::from_bytes(target.method.to_uppercase().as_bytes())
            .map_err(|_| AgentError::notify(format!("无效的 HTTP 方法: {}", target.method)))?;

        info!(url = %target.url, "发送通知");
        let mut request = self
            .client
            .request(method, &target.url)
            .header(CONTENT_TYPE_HEADER, CONTENT_TYPE)
            .body(serde_json::to_vec(payload)?);
        for (key, value) in &target.headers {
            request = request.header(key, value);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(url = %target.url, status = status.as_u16(), body = %body, "通知发送失败");
            return Err(AgentError::notify(format!(
                "status: {}, body: {body}",
                status.as_u16()
            )));
        }

        info!(url = %target.url, "通知发送成功");
        Ok(())
    }
}
