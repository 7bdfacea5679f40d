//! 代理配置：文件查找、`.env` 变量展开、解析与校验

pub mod store;

use crate::constants::{config as config_consts, notify, schedule as schedule_consts, supervisor};
use crate::error::{AgentError, Result};
use crate::schedule::ScheduleConfig;
use chrono::{DateTime, Local};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

pub use store::ConfigStore;

/// `launch-agent init` 生成的配置模板
pub const CONFIG_TEMPLATE: &str = include_str!("../../templates/launch.toml");

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
}

impl ConfigFormat {
    /// 根据扩展名判断格式，未知扩展名按 TOML 处理
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Toml,
        }
    }
}

/// Webhook 通知目标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_method() -> String {
    notify::DEFAULT_METHOD.to_string()
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
        }
    }
}

/// 心跳（资源使用情况上报）配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_pulse_every")]
    pub every: String,
    /// 未配置时使用全局 webhook
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

fn default_pulse_every() -> String {
    schedule_consts::DEFAULT_PULSE_EVERY.to_string()
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            every: default_pulse_every(),
            webhook: None,
        }
    }
}

/// Supervisor 守护进程状态查询配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_socket")]
    pub socket: PathBuf,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// 为空时查询全部进程
    #[serde(default)]
    pub daemons: Vec<String>,
}

fn default_socket() -> PathBuf {
    PathBuf::from(supervisor::DEFAULT_SOCKET_PATH)
}

fn default_endpoint() -> String {
    supervisor::DEFAULT_RPC_ENDPOINT.to_string()
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            endpoint: default_endpoint(),
            daemons: Vec::new(),
        }
    }
}

/// 数据库导出配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: DatabaseKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DatabaseKind {
    Mysql(SqlSettings),
    Postgresql(SqlSettings),
}

impl DatabaseKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            DatabaseKind::Mysql(_) => "mysql",
            DatabaseKind::Postgresql(_) => "postgresql",
        }
    }

    pub fn settings(&self) -> &SqlSettings {
        match self {
            DatabaseKind::Mysql(s) | DatabaseKind::Postgresql(s) => s,
        }
    }
}

/// SQL 数据库连接与导出参数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlSettings {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub socket: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// 为空时使用配置项 name
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub exclude_tables: Vec<String>,
    /// 追加给导出命令的参数
    #[serde(default)]
    pub args: Option<String>,
}

/// 文件归档配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub includes: Vec<PathBuf>,
    #[serde(default)]
    pub excludes: Vec<PathBuf>,
}

/// 压缩格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressKind {
    #[default]
    Tar,
    Tgz,
    Zip,
}

impl CompressKind {
    /// 产物文件扩展名
    pub fn extension(&self) -> &'static str {
        match self {
            CompressKind::Tar => "tar",
            CompressKind::Tgz => "tar.gz",
            CompressKind::Zip => "zip",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressConfig {
    #[serde(rename = "type", default)]
    pub kind: CompressKind,
}

/// 产物分片配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// 每个分片的字节数
    pub chunk_size: u64,
}

/// 存储目标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub name: String,
    /// 保留的产物数量，<= 0 表示不限制
    #[serde(default)]
    pub keep: i64,
    #[serde(flatten)]
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageBackend {
    Local(LocalSettings),
    S3(S3Settings),
}

impl StorageBackend {
    pub fn type_name(&self) -> &'static str {
        match self {
            StorageBackend::Local(_) => "local",
            StorageBackend::S3(_) => "s3",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSettings {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Settings {
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    /// 对象键前缀
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default, alias = "access_key_secret")]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// 请求超时（秒）
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub storage_class: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

/// 配置文件中的模型定义
#[derive(Debug, Clone, Default, Deserialize)]
struct RawModel {
    #[serde(default)]
    schedule: Option<ScheduleConfig>,
    #[serde(default)]
    databases: Vec<DatabaseConfig>,
    #[serde(default)]
    archive: Option<ArchiveConfig>,
    #[serde(default)]
    compress_with: Option<CompressConfig>,
    #[serde(default)]
    split_with: Option<SplitConfig>,
    #[serde(default)]
    storages: Vec<StorageConfig>,
    #[serde(default)]
    default_storage: Option<String>,
    #[serde(default)]
    webhook: Option<WebhookConfig>,
}

/// 配置文件顶层结构
#[derive(Debug, Clone, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    workdir: Option<PathBuf>,
    #[serde(default)]
    webhook: Option<WebhookConfig>,
    #[serde(default)]
    pulse: PulseConfig,
    #[serde(default)]
    supervisor: SupervisorConfig,
    #[serde(default)]
    models: BTreeMap<String, RawModel>,
}

/// 单个备份模型的完整配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub name: String,
    /// 进程工作目录，相对路径据此解析
    pub work_dir: PathBuf,
    /// 本次加载分配的临时目录 `<workdir>/<纳秒时间戳>`
    pub temp_path: PathBuf,
    /// 导出文件目录 `<temp_path>/<name>`
    pub dump_path: PathBuf,
    pub workdir: PathBuf,
    pub use_temp_work_dir: bool,
    /// None 表示未启用调度
    pub schedule: Option<ScheduleConfig>,
    pub databases: Vec<DatabaseConfig>,
    pub archive: Option<ArchiveConfig>,
    pub compress_with: CompressConfig,
    pub split_with: Option<SplitConfig>,
    pub storages: Vec<StorageConfig>,
    pub default_storage: String,
    /// 已合并全局配置后的通知目标
    pub webhook: Option<WebhookConfig>,
}

impl ModelConfig {
    /// 按名称查找存储，None 时返回默认存储
    pub fn storage(&self, name: Option<&str>) -> Result<&StorageConfig> {
        let name = name.unwrap_or(&self.default_storage);
        self.storages
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| {
                AgentError::config(format!("模型 {} 中不存在存储 {name}", self.name))
            })
    }

    /// 执行结束后需要清理的目录
    pub fn cleanup_path(&self) -> &Path {
        if self.use_temp_work_dir {
            &self.workdir
        } else {
            &self.temp_path
        }
    }
}

/// 代理配置快照，重新加载时整体替换
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub workdir: PathBuf,
    pub use_temp_work_dir: bool,
    pub webhook: Option<WebhookConfig>,
    pub pulse: PulseConfig,
    pub supervisor: SupervisorConfig,
    pub models: BTreeMap<String, Arc<ModelConfig>>,
    /// 配置来源文件
    pub config_file: Option<PathBuf>,
    pub updated_at: DateTime<Local>,
}

impl AgentConfig {
    /// 空配置，调度器在没有任何模型时使用
    pub fn empty() -> Self {
        Self {
            workdir: std::env::temp_dir(),
            use_temp_work_dir: false,
            webhook: None,
            pulse: PulseConfig::default(),
            supervisor: SupervisorConfig::default(),
            models: BTreeMap::new(),
            config_file: None,
            updated_at: Local::now(),
        }
    }

    /// 加载配置：指定了文件时直接读取，否则按搜索路径查找
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) if !p.exists() => return Err(AgentError::ConfigNotFound),
            Some(p) => p.to_path_buf(),
            None => find_config_file()?,
        };
        Self::load_from_file(&file)
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        info!(file = %path.display(), "加载配置文件");

        warn_if_world_readable(&path);

        let content = fs::read_to_string(&path)?;
        let dot_env = path
            .parent()
            .map(|dir| dir.join(config_consts::DOT_ENV_FILE))
            .filter(|p| p.exists());
        let env_vars = match dot_env {
            Some(env_path) => {
                debug!(file = %env_path.display(), "读取 .env 文件");
                parse_dot_env(&fs::read_to_string(&env_path)?)
            }
            None => HashMap::new(),
        };

        let expanded = expand_env(&content, &env_vars);
        let mut config = Self::parse(&expanded, ConfigFormat::from_path(&path))?;
        config.config_file = Some(path);
        info!(models = config.models.len(), "配置加载完成");
        Ok(config)
    }

    /// 解析已展开环境变量的配置内容
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        let raw: RawConfig = match format {
            ConfigFormat::Toml => toml::from_str(content)?,
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
        };
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        if raw.models.is_empty() {
            return Err(AgentError::config("配置中没有任何模型"));
        }

        let (workdir, use_temp_work_dir) = match raw.workdir.filter(|p| !p.as_os_str().is_empty())
        {
            Some(dir) => (dir, false),
            None => (create_temp_workdir()?, true),
        };
        let work_dir = std::env::current_dir()?;

        let mut pulse = raw.pulse;
        if pulse.webhook.is_none() {
            pulse.webhook = raw.webhook.clone();
        }

        let mut models = BTreeMap::new();
        for (name, model) in raw.models {
            let model = build_model(
                &name,
                model,
                &workdir,
                use_temp_work_dir,
                &work_dir,
                raw.webhook.as_ref(),
            )
            .map_err(|e| AgentError::config(format!("加载模型 {name} 失败: {e}")))?;
            models.insert(name, Arc::new(model));
        }

        Ok(Self {
            workdir,
            use_temp_work_dir,
            webhook: raw.webhook,
            pulse,
            supervisor: raw.supervisor,
            models,
            config_file: None,
            updated_at: Local::now(),
        })
    }

    pub fn model(&self, name: &str) -> Result<Arc<ModelConfig>> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::ModelNotFound(name.to_string()))
    }
}

fn build_model(
    name: &str,
    raw: RawModel,
    workdir: &Path,
    use_temp_work_dir: bool,
    work_dir: &Path,
    global_webhook: Option<&WebhookConfig>,
) -> Result<ModelConfig> {
    if raw.storages.is_empty() {
        return Err(AgentError::config(format!("模型 {name} 中没有配置存储")));
    }

    let mut seen = HashSet::new();
    for storage in &raw.storages {
        if !seen.insert(storage.name.as_str()) {
            return Err(AgentError::config(format!("存储名称重复: {}", storage.name)));
        }
    }

    let default_storage = match raw.default_storage {
        Some(default) => {
            if !seen.contains(default.as_str()) {
                return Err(AgentError::config(format!(
                    "默认存储 {default} 不存在"
                )));
            }
            default
        }
        None => raw.storages[0].name.clone(),
    };

    if let Some(split) = raw.split_with {
        if split.chunk_size == 0 {
            return Err(AgentError::config("split_with.chunk_size 必须大于 0"));
        }
    }

    let temp_path = workdir.join(unix_nanos().to_string());
    let dump_path = temp_path.join(name);

    Ok(ModelConfig {
        name: name.to_string(),
        work_dir: work_dir.to_path_buf(),
        temp_path,
        dump_path,
        workdir: workdir.to_path_buf(),
        use_temp_work_dir,
        schedule: raw.schedule,
        databases: raw.databases,
        archive: raw.archive,
        compress_with: raw.compress_with.unwrap_or_default(),
        split_with: raw.split_with,
        storages: raw.storages,
        default_storage,
        webhook: raw.webhook.or_else(|| global_webhook.cloned()),
    })
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

fn create_temp_workdir() -> Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!(
        "{}{}",
        config_consts::TEMP_WORKDIR_PREFIX,
        unix_nanos()
    ));
    fs::create_dir_all(&dir)?;
    debug!(dir = %dir.display(), "未配置 workdir，使用临时目录");
    Ok(dir)
}

/// 按搜索路径查找配置文件
pub fn find_config_file() -> Result<PathBuf> {
    find_config_file_in(&config_consts::get_search_dirs())
}

/// 在给定目录中依次查找 `launch.{toml,yml,yaml}`
pub fn find_config_file_in(dirs: &[PathBuf]) -> Result<PathBuf> {
    for dir in dirs {
        for ext in config_consts::CONFIG_EXTENSIONS {
            let candidate = dir.join(format!("{}.{ext}", config_consts::CONFIG_FILE_STEM));
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }
    Err(AgentError::ConfigNotFound)
}

#[cfg(unix)]
fn warn_if_world_readable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(meta) = fs::metadata(path) {
        let mode = meta.permissions().mode();
        if mode & 0o004 != 0 {
            warn!(
                file = %path.display(),
                mode = format!("{:o}", mode & 0o777),
                "配置文件可被其他用户读取"
            );
        }
    }
}

#[cfg(not(unix))]
fn warn_if_world_readable(_path: &Path) {}

/// 解析 `.env` 文件内容
pub fn parse_dot_env(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        vars.insert(key.trim().to_string(), value.to_string());
    }
    vars
}

/// 展开 `${VAR}` 与 `$VAR`，优先使用 `.env` 中的值，其次是进程环境变量，缺失时替换为空串
pub fn expand_env(content: &str, vars: &HashMap<String, String>) -> String {
    let re = match Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)") {
        Ok(re) => re,
        Err(_) => return content.to_string(),
    };
    re.replace_all(content, |caps: &Captures| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        vars.get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
            .unwrap_or_default()
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TOML_CONFIG: &str = r#"
workdir = "/tmp/launch-test"

[webhook]
url = "https://hooks.example.com/backup"
headers = { Authorization = "Bearer token" }

[pulse]
enabled = true

[models.daily-db]
schedule = { cron = "0 3 * * *" }
compress_with = { type = "tgz" }

[[models.daily-db.databases]]
name = "app"
type = "mysql"
host = "127.0.0.1"
port = 3306
username = "root"

[[models.daily-db.storages]]
name = "local"
type = "local"
path = "/backups"
keep = 3

[[models.daily-db.storages]]
name = "remote"
type = "s3"
bucket = "backups"
access_key_secret = "secret"
keep = 10

[models.files]
default_storage = "disk"
webhook = { url = "https://hooks.example.com/files", method = "PUT" }

[models.files.archive]
includes = ["/etc/nginx"]

[[models.files.storages]]
name = "disk"
type = "local"
path = "/mnt/backups"
"#;

    #[test]
    fn test_parse_toml_config() {
        let config = AgentConfig::parse(TOML_CONFIG, ConfigFormat::Toml).unwrap();
        assert_eq!(config.workdir, PathBuf::from("/tmp/launch-test"));
        assert!(!config.use_temp_work_dir);
        assert_eq!(config.models.len(), 2);
        assert!(config.pulse.enabled);
        assert_eq!(config.pulse.every, "5m");
        assert_eq!(config.pulse.webhook, config.webhook);

        let model = config.model("daily-db").unwrap();
        assert_eq!(model.default_storage, "local");
        assert_eq!(model.compress_with.kind, CompressKind::Tgz);
        assert_eq!(model.dump_path, model.temp_path.join("daily-db"));
        assert!(model.temp_path.starts_with("/tmp/launch-test"));
        assert_eq!(model.storages.len(), 2);
        assert_eq!(model.storages[0].keep, 3);
        match &model.storages[1].backend {
            StorageBackend::S3(s3) => {
                assert_eq!(s3.bucket, "backups");
                assert_eq!(s3.secret_access_key.as_deref(), Some("secret"));
            }
            other => panic!("unexpected backend: {other:?}"),
        }
        match &model.databases[0].kind {
            DatabaseKind::Mysql(settings) => assert_eq!(settings.port, Some(3306)),
            other => panic!("unexpected database: {other:?}"),
        }
        assert_eq!(
            model.webhook.as_ref().map(|w| w.url.as_str()),
            Some("https://hooks.example.com/backup")
        );

        let files = config.model("files").unwrap();
        assert!(files.schedule.is_none());
        assert_eq!(files.compress_with.kind, CompressKind::Tar);
        assert_eq!(files.webhook.as_ref().map(|w| w.method.as_str()), Some("PUT"));
        assert_eq!(files.storage(None).unwrap().name, "disk");
    }

    #[test]
    fn test_parse_yaml_config() {
        let yaml = r#"
workdir: /tmp/launch-yaml
models:
  weekly:
    schedule:
      every: 1d
      at: "04:00"
    storages:
      - name: local
        type: local
        path: /backups
        keep: 2
"#;
        let config = AgentConfig::parse(yaml, ConfigFormat::Yaml).unwrap();
        let model = config.model("weekly").unwrap();
        let schedule = model.schedule.as_ref().unwrap();
        assert_eq!(schedule.every.as_deref(), Some("1d"));
        assert_eq!(schedule.at.as_deref(), Some("04:00"));
        assert_eq!(model.storages[0].keep, 2);
        assert!(model.webhook.is_none());
    }

    #[test]
    fn test_model_without_storage_is_rejected() {
        let content = r#"
workdir = "/tmp/x"
[models.broken]
schedule = { every = "1h" }
"#;
        let err = AgentConfig::parse(content, ConfigFormat::Toml).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_no_models_is_rejected() {
        let err = AgentConfig::parse("workdir = \"/tmp/x\"\n", ConfigFormat::Toml).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_unknown_default_storage_is_rejected() {
        let content = r#"
workdir = "/tmp/x"
[models.m]
default_storage = "missing"
[[models.m.storages]]
name = "local"
type = "local"
path = "/b"
"#;
        assert!(AgentConfig::parse(content, ConfigFormat::Toml).is_err());
    }

    #[test]
    fn test_invalid_schedule_is_accepted_by_loader() {
        let content = r#"
workdir = "/tmp/x"
[models.m]
schedule = { cron = "not a cron" }
[[models.m.storages]]
name = "local"
type = "local"
path = "/b"
"#;
        let config = AgentConfig::parse(content, ConfigFormat::Toml).unwrap();
        assert!(config.model("m").unwrap().schedule.is_some());
    }

    #[test]
    fn test_missing_workdir_uses_temp_dir() {
        let content = r#"
[models.m]
[[models.m.storages]]
name = "local"
type = "local"
path = "/b"
"#;
        let config = AgentConfig::parse(content, ConfigFormat::Toml).unwrap();
        assert!(config.use_temp_work_dir);
        assert!(config.workdir.exists());
        let model = config.model("m").unwrap();
        assert_eq!(model.cleanup_path(), config.workdir.as_path());
        std::fs::remove_dir_all(&config.workdir).unwrap();
    }

    #[test]
    fn test_expand_env_prefers_dot_env() {
        let mut vars = HashMap::new();
        vars.insert("BUCKET".to_string(), "from-dotenv".to_string());
        let out = expand_env(
            "bucket = \"${BUCKET}\"\nother = \"$LAUNCH_TEST_SURELY_UNSET\"",
            &vars,
        );
        assert_eq!(out, "bucket = \"from-dotenv\"\nother = \"\"");
    }

    #[test]
    fn test_parse_dot_env() {
        let vars = parse_dot_env("# comment\nexport A=1\nB=\"two\"\nC='three'\n\ninvalid\n");
        assert_eq!(vars.get("A").map(String::as_str), Some("1"));
        assert_eq!(vars.get("B").map(String::as_str), Some("two"));
        assert_eq!(vars.get("C").map(String::as_str), Some("three"));
        assert_eq!(vars.len(), 3);
    }

    #[test]
    fn test_load_from_file_with_dot_env() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "BACKUP_ROOT=/srv/backups\n").unwrap();
        let config_path = dir.path().join("launch.toml");
        std::fs::write(
            &config_path,
            r#"
workdir = "/tmp/launch-env"
[models.m]
[[models.m.storages]]
name = "local"
type = "local"
path = "${BACKUP_ROOT}/m"
"#,
        )
        .unwrap();

        let config = AgentConfig::load_from_file(&config_path).unwrap();
        let model = config.model("m").unwrap();
        match &model.storages[0].backend {
            StorageBackend::Local(local) => {
                assert_eq!(local.path, PathBuf::from("/srv/backups/m"))
            }
            other => panic!("unexpected backend: {other:?}"),
        }
        assert_eq!(config.config_file.as_deref(), Some(config_path.as_path()));
    }

    #[test]
    fn test_find_config_file_order() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        std::fs::write(second.path().join("launch.yml"), "").unwrap();
        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        assert_eq!(
            find_config_file_in(&dirs).unwrap(),
            second.path().join("launch.yml")
        );

        std::fs::write(first.path().join("launch.toml"), "").unwrap();
        assert_eq!(
            find_config_file_in(&dirs).unwrap(),
            first.path().join("launch.toml")
        );
    }

    #[test]
    fn test_template_is_valid() {
        let config = AgentConfig::parse(CONFIG_TEMPLATE, ConfigFormat::Toml).unwrap();
        assert!(!config.models.is_empty());
        for model in config.models.values() {
            if let Some(schedule) = &model.schedule {
                schedule.resolve().unwrap();
            }
        }
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let result = AgentConfig::load(Some(dir.path().join("launch.toml").as_path()));
        assert!(matches!(result, Err(AgentError::ConfigNotFound)));
    }
}
