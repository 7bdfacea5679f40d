//! Supervisor 进程状态上报（`d_stat`）
//!
//! 通过 unix socket 调用 Supervisor 的 XML-RPC 接口，按进程组汇总后发送到 pulse webhook。

use crate::config::{SupervisorConfig, WebhookConfig};
use crate::constants::supervisor::{STATE_RUNNING, UNKNOWN_GROUP};
use crate::error::{AgentError, Result};
use crate::notifier::Notifier;
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, info, instrument, warn};

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Supervisor 返回的单个进程信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub name: String,
    pub group: String,
    pub description: String,
    pub start: i64,
    pub stop: i64,
    pub now: i64,
    pub statename: String,
    pub state: i64,
    pub spawnerr: String,
    /// 由本地计算，Supervisor 不返回
    pub uptime: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    FullyRunning,
    PartiallyRunning,
    NotRunning,
}

/// 一个进程组（或查询失败的进程 id）的汇总状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonStatus {
    pub daemon_id: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub statename: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub processes: Vec<ProcessInfo>,
    /// 组内最长的运行时间
    #[serde(rename = "total_uptime")]
    pub uptime: i64,
}

/// 按进程组汇总状态，输出按组名排序
#[derive(Debug, Default)]
pub struct StatusBoard {
    groups: BTreeMap<String, DaemonStatus>,
}

impl StatusBoard {
    pub fn record(&mut self, mut info: ProcessInfo) {
        if info.group.is_empty() {
            info.group = UNKNOWN_GROUP.to_string();
        }

        let status = self
            .groups
            .entry(info.group.clone())
            .or_insert_with(|| DaemonStatus {
                daemon_id: info.group.clone(),
                status: RunStatus::NotRunning,
                error: String::new(),
                group: info.group.clone(),
                statename: info.statename.clone(),
                description: info.description.clone(),
                processes: Vec::new(),
                uptime: 0,
            });

        info.uptime = if info.state == STATE_RUNNING && info.start > 0 {
            info.now - info.start
        } else {
            0
        };
        status.uptime = status.uptime.max(info.uptime);
        status.processes.push(info);
    }

    /// 查询失败的进程 id 记为未运行并附带错误
    pub fn record_error(&mut self, id: &str, error: &AgentError) {
        self.groups.insert(
            id.to_string(),
            DaemonStatus {
                daemon_id: id.to_string(),
                status: RunStatus::NotRunning,
                error: error.to_string(),
                group: String::new(),
                statename: String::new(),
                description: String::new(),
                processes: Vec::new(),
                uptime: 0,
            },
        );
    }

    pub fn finish(self) -> Vec<DaemonStatus> {
        self.groups
            .into_values()
            .map(|mut status| {
                let running = status
                    .processes
                    .iter()
                    .filter(|p| p.state == STATE_RUNNING)
                    .count();
                status.status = if status.processes.is_empty() || running == 0 {
                    RunStatus::NotRunning
                } else if running == status.processes.len() {
                    RunStatus::FullyRunning
                } else {
                    RunStatus::PartiallyRunning
                };
                status
            })
            .collect()
    }
}

#[async_trait]
pub trait SupervisorClient: Send + Sync {
    async fn all_process_info(&self) -> Result<Vec<ProcessInfo>>;
    async fn process_info(&self, id: &str) -> Result<ProcessInfo>;
}

/// 未指定 id 时查询全部进程；单个 id 查询失败不影响其他 id
pub async fn collect_status(client: &dyn SupervisorClient, ids: &[String]) -> Result<Vec<DaemonStatus>> {
    let mut board = StatusBoard::default();

    if ids.is_empty() {
        for info in client.all_process_info().await? {
            board.record(info);
        }
    } else {
        for id in ids {
            match client.process_info(id).await {
                Ok(info) => board.record(info),
                Err(e) => {
                    warn!(daemon = %id, error = %e, "获取进程信息失败");
                    board.record_error(id, &e);
                }
            }
        }
    }

    Ok(board.finish())
}

/// 汇总状态并发送 `{"event":"d_stat","data":[...]}`
#[instrument(skip_all, fields(daemons = ids.len()))]
pub async fn send_daemon_status(
    client: &dyn SupervisorClient,
    ids: &[String],
    notifier: &dyn Notifier,
    webhook: Option<&WebhookConfig>,
) -> Result<Vec<DaemonStatus>> {
    let statuses = collect_status(client, ids).await?;
    let Some(target) = webhook else {
        warn!("未配置 pulse webhook，状态不会上报");
        return Ok(statuses);
    };

    let payload = json!({ "event": "d_stat", "data": statuses });
    debug!(payload = %payload, "发送进程状态");
    notifier.notify(target, &payload).await?;
    info!(groups = statuses.len(), "进程状态已上报");
    Ok(statuses)
}

/// 基于 unix socket 的 XML-RPC 客户端
#[derive(Debug, Clone)]
pub struct UnixRpcClient {
    socket: PathBuf,
    host: String,
    path: String,
}

impl UnixRpcClient {
    pub fn new(config: &SupervisorConfig) -> Result<Self> {
        let url = Url::parse(&config.endpoint)
            .map_err(|e| AgentError::rpc(format!("无效的 endpoint {}: {e}", config.endpoint)))?;
        Ok(Self {
            socket: config.socket.clone(),
            host: url.host_str().unwrap_or("localhost").to_string(),
            path: url.path().to_string(),
        })
    }

    async fn call(&self, method: &str, params: &[&str]) -> Result<xml::Value> {
        let body = xml::method_call(method, params);
        let request = format!(
            "POST {} HTTP/1.0\r\nHost: {}\r\nContent-Type: text/xml\r\nContent-Length: {}\r\n\r\n{}",
            self.path,
            self.host,
            body.len(),
            body
        );

        let exchange = async {
            let mut stream = UnixStream::connect(&self.socket).await?;
            stream.write_all(request.as_bytes()).await?;
            let mut response = Vec::new();
            stream.read_to_end(&mut response).await?;
            Ok::<_, std::io::Error>(response)
        };
        let response = tokio::time::timeout(RPC_TIMEOUT, exchange)
            .await
            .map_err(|_| AgentError::rpc(format!("调用 {method} 超时")))?
            .map_err(|e| {
                AgentError::rpc(format!("连接 {} 失败: {e}", self.socket.display()))
            })?;

        let response = String::from_utf8_lossy(&response);
        let body = http_body(&response).map_err(|e| AgentError::rpc(format!("{method}: {e}")))?;
        xml::parse_response(body).map_err(|e| AgentError::rpc(format!("{method}: {e}")))
    }
}

#[async_trait]
impl SupervisorClient for UnixRpcClient {
    async fn all_process_info(&self) -> Result<Vec<ProcessInfo>> {
        match self.call("supervisor.getAllProcessInfo", &[]).await? {
            xml::Value::Array(items) => items.iter().map(process_from_value).collect(),
            _ => Err(AgentError::rpc("getAllProcessInfo 返回的不是数组")),
        }
    }

    async fn process_info(&self, id: &str) -> Result<ProcessInfo> {
        let value = self.call("supervisor.getProcessInfo", &[id]).await?;
        process_from_value(&value)
    }
}

fn http_body(response: &str) -> std::result::Result<&str, String> {
    let (head, body) = response
        .split_once("\r\n\r\n")
        .ok_or_else(|| "无效的 HTTP 响应".to_string())?;
    let status_line = head.lines().next().unwrap_or_default();
    let code = status_line.split_whitespace().nth(1).unwrap_or_default();
    if code != "200" {
        return Err(format!("HTTP 状态异常: {status_line}"));
    }
    Ok(body)
}

fn process_from_value(value: &xml::Value) -> Result<ProcessInfo> {
    let xml::Value::Struct(fields) = value else {
        return Err(AgentError::rpc("进程信息不是结构体"));
    };
    let text = |key: &str| fields.get(key).and_then(xml::Value::as_str).unwrap_or_default().to_string();
    let int = |key: &str| fields.get(key).and_then(xml::Value::as_i64).unwrap_or_default();

    Ok(ProcessInfo {
        name: text("name"),
        group: text("group"),
        description: text("description"),
        start: int("start"),
        stop: int("stop"),
        now: int("now"),
        statename: text("statename"),
        state: int("state"),
        spawnerr: text("spawnerr"),
        uptime: 0,
    })
}

/// XML-RPC 请求构造与响应解析，只覆盖 Supervisor 用到的类型
mod xml {
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Value {
        Int(i64),
        Bool(bool),
        Double(f64),
        Str(String),
        Array(Vec<Value>),
        Struct(BTreeMap<String, Value>),
        Nil,
    }

    impl Value {
        pub fn as_str(&self) -> Option<&str> {
            match self {
                Value::Str(s) => Some(s),
                _ => None,
            }
        }

        pub fn as_i64(&self) -> Option<i64> {
            match self {
                Value::Int(i) => Some(*i),
                Value::Bool(b) => Some(i64::from(*b)),
                _ => None,
            }
        }
    }

    type ParseResult<T> = std::result::Result<T, String>;

    pub fn method_call(method: &str, params: &[&str]) -> String {
        let mut body = format!(
            "<?xml version=\"1.0\"?><methodCall><methodName>{}</methodName><params>",
            escape(method)
        );
        for param in params {
            body.push_str("<param><value><string>");
            body.push_str(&escape(param));
            body.push_str("</string></value></param>");
        }
        body.push_str("</params></methodCall>");
        body
    }

    pub fn parse_response(input: &str) -> ParseResult<Value> {
        let mut reader = Reader { rest: input };
        reader.expect_open("methodResponse")?;
        match reader.next() {
            Some(Token::Open("params")) => {
                reader.expect_open("param")?;
                reader.expect_open("value")?;
                reader.value()
            }
            Some(Token::Open("fault")) => {
                reader.expect_open("value")?;
                let fault = reader.value()?;
                let (code, message) = match &fault {
                    Value::Struct(fields) => (
                        fields.get("faultCode").and_then(Value::as_i64).unwrap_or_default(),
                        fields
                            .get("faultString")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    ),
                    _ => (0, String::new()),
                };
                Err(format!("fault {code}: {message}"))
            }
            other => Err(format!("意外的响应内容: {other:?}")),
        }
    }

    fn escape(text: &str) -> String {
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
            .replace('\'', "&apos;")
    }

    fn unescape(text: &str) -> String {
        text.replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&apos;", "'")
            .replace("&amp;", "&")
    }

    #[derive(Debug, PartialEq)]
    enum Token<'a> {
        Open(&'a str),
        Close(&'a str),
        Empty(&'a str),
        Text(&'a str),
    }

    struct Reader<'a> {
        rest: &'a str,
    }

    impl<'a> Reader<'a> {
        /// 跳过声明、注释和标签之间的空白
        fn next(&mut self) -> Option<Token<'a>> {
            loop {
                let input = self.rest;
                if input.is_empty() {
                    return None;
                }
                if let Some(tag) = input.strip_prefix('<') {
                    let end = tag.find('>')?;
                    let inner = &tag[..end];
                    self.rest = &tag[end + 1..];
                    if inner.starts_with('?') || inner.starts_with('!') {
                        continue;
                    }
                    if let Some(name) = inner.strip_prefix('/') {
                        return Some(Token::Close(name.trim()));
                    }
                    if let Some(name) = inner.strip_suffix('/') {
                        return Some(Token::Empty(name.trim()));
                    }
                    return Some(Token::Open(inner.split_whitespace().next().unwrap_or_default()));
                }
                let end = input.find('<').unwrap_or(input.len());
                let text = &input[..end];
                self.rest = &input[end..];
                if !text.trim().is_empty() {
                    return Some(Token::Text(text));
                }
            }
        }

        fn expect_open(&mut self, name: &str) -> ParseResult<()> {
            match self.next() {
                Some(Token::Open(tag)) if tag == name => Ok(()),
                other => Err(format!("期望 <{name}>，实际为 {other:?}")),
            }
        }

        fn expect_close(&mut self, name: &str) -> ParseResult<()> {
            match self.next() {
                Some(Token::Close(tag)) if tag == name => Ok(()),
                other => Err(format!("期望 </{name}>，实际为 {other:?}")),
            }
        }

        /// 读取原始文本直到 `</name>`，保留空白
        fn text(&mut self, name: &str) -> ParseResult<String> {
            let close = format!("</{name}>");
            let end = self
                .rest
                .find(&close)
                .ok_or_else(|| format!("缺少 {close}"))?;
            let text = unescape(&self.rest[..end]);
            self.rest = &self.rest[end + close.len()..];
            Ok(text)
        }

        /// 解析 `<value>` 之后的内容，包括结尾的 `</value>`
        fn value(&mut self) -> ParseResult<Value> {
            let trimmed = self.rest.trim_start();
            if !trimmed.starts_with('<') || trimmed.starts_with("</value>") {
                return self.text("value").map(Value::Str);
            }

            let value = match self.next() {
                Some(Token::Empty("nil")) => Value::Nil,
                Some(Token::Empty("string")) => Value::Str(String::new()),
                Some(Token::Open("string")) => Value::Str(self.text("string")?),
                Some(Token::Open(tag @ ("int" | "i4" | "i8"))) => {
                    let raw = self.text(tag)?;
                    Value::Int(raw.trim().parse().map_err(|e| format!("无效的整数 {raw}: {e}"))?)
                }
                Some(Token::Open("boolean")) => Value::Bool(self.text("boolean")?.trim() == "1"),
                Some(Token::Open("double")) => {
                    let raw = self.text("double")?;
                    Value::Double(raw.trim().parse().map_err(|e| format!("无效的浮点数 {raw}: {e}"))?)
                }
                Some(Token::Open(tag @ ("dateTime.iso8601" | "base64"))) => Value::Str(self.text(tag)?),
                Some(Token::Open("array")) => self.array()?,
                Some(Token::Open("struct")) => self.members()?,
                other => return Err(format!("不支持的值: {other:?}")),
            };
            self.expect_close("value")?;
            Ok(value)
        }

        fn array(&mut self) -> ParseResult<Value> {
            let mut items = Vec::new();
            match self.next() {
                Some(Token::Empty("data")) => {}
                Some(Token::Open("data")) => loop {
                    match self.next() {
                        Some(Token::Open("value")) => items.push(self.value()?),
                        Some(Token::Empty("value")) => items.push(Value::Str(String::new())),
                        Some(Token::Close("data")) => break,
                        other => return Err(format!("数组内容无效: {other:?}")),
                    }
                },
                other => return Err(format!("期望 <data>，实际为 {other:?}")),
            }
            self.expect_close("array")?;
            Ok(Value::Array(items))
        }

        fn members(&mut self) -> ParseResult<Value> {
            let mut fields = BTreeMap::new();
            loop {
                match self.next() {
                    Some(Token::Open("member")) => {
                        self.expect_open("name")?;
                        let name = self.text("name")?;
                        let value = match self.next() {
                            Some(Token::Open("value")) => self.value()?,
                            Some(Token::Empty("value")) => Value::Str(String::new()),
                            other => return Err(format!("成员 {name} 缺少值: {other:?}")),
                        };
                        self.expect_close("member")?;
                        fields.insert(name, value);
                    }
                    Some(Token::Close("struct")) => break,
                    other => return Err(format!("结构体内容无效: {other:?}")),
                }
            }
            Ok(Value::Struct(fields))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_method_call_escapes_params() {
            let body = method_call("supervisor.getProcessInfo", &["web:<1>"]);
            assert!(body.contains("<methodName>supervisor.getProcessInfo</methodName>"));
            assert!(body.contains("<string>web:&lt;1&gt;</string>"));
        }

        #[test]
        fn test_parse_scalar_values() {
            let input = "<?xml version='1.0'?>\n<methodResponse>\n<params>\n<param>\n\
                <value><struct>\n\
                <member><name>a</name><value><int>42</int></value></member>\n\
                <member><name>b</name><value>plain &amp; simple</value></member>\n\
                <member><name>c</name><value><string></string></value></member>\n\
                <member><name>d</name><value><boolean>1</boolean></value></member>\n\
                <member><name>e</name><value><string>  </string></value></member>\n\
                </struct></value>\n</param>\n</params>\n</methodResponse>";
            let Value::Struct(fields) = parse_response(input).unwrap() else {
                panic!("expected struct");
            };
            assert_eq!(fields["a"], Value::Int(42));
            assert_eq!(fields["b"], Value::Str("plain & simple".to_string()));
            assert_eq!(fields["c"], Value::Str(String::new()));
            assert_eq!(fields["d"], Value::Bool(true));
            assert_eq!(fields["e"], Value::Str("  ".to_string()));
        }

        #[test]
        fn test_parse_fault() {
            let input = "<methodResponse><fault><value><struct>\
                <member><name>faultCode</name><value><int>10</int></value></member>\
                <member><name>faultString</name><value><string>BAD_NAME: nope</string></value></member>\
                </struct></value></fault></methodResponse>";
            assert_eq!(parse_response(input).unwrap_err(), "fault 10: BAD_NAME: nope");
        }
    }
}
