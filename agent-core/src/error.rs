use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("TOML 解析错误: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML 解析错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("配置文件未找到")]
    ConfigNotFound,

    #[error("调度配置错误: {0}")]
    Schedule(String),

    #[error("HTTP 请求错误: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("ZIP 文件错误: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("目录遍历错误: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("路径错误: {0}")]
    StripPrefix(#[from] std::path::StripPrefixError),

    #[error("数据库导出失败: {0}")]
    Dump(String),

    #[error("归档失败: {0}")]
    Archive(String),

    #[error("压缩失败: {0}")]
    Compress(String),

    #[error("存储失败: {0}")]
    Storage(String),

    #[error("通知发送失败: {0}")]
    Notify(String),

    #[error("Supervisor RPC 错误: {0}")]
    Rpc(String),

    #[error("系统信息采集失败: {0}")]
    Stats(String),

    #[error("执行过程中发生崩溃: {0}")]
    Panic(String),

    #[error("模型不存在: {0}")]
    ModelNotFound(String),

    #[error("自定义错误: {0}")]
    Custom(String),
}

impl AgentError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn schedule(msg: impl Into<String>) -> Self {
        Self::Schedule(msg.into())
    }

    pub fn dump(msg: impl Into<String>) -> Self {
        Self::Dump(msg.into())
    }

    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive(msg.into())
    }

    pub fn compress(msg: impl Into<String>) -> Self {
        Self::Compress(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn notify(msg: impl Into<String>) -> Self {
        Self::Notify(msg.into())
    }

    pub fn rpc(msg: impl Into<String>) -> Self {
        Self::Rpc(msg.into())
    }

    pub fn stats(msg: impl Into<String>) -> Self {
        Self::Stats(msg.into())
    }

    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}
