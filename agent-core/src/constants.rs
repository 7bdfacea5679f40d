/// 配置文件相关常量
pub mod config {
    use std::path::PathBuf;

    /// 配置文件基础名（不含扩展名）
    pub const CONFIG_FILE_STEM: &str = "launch";

    /// 支持的配置文件扩展名，按优先级排列
    pub const CONFIG_EXTENSIONS: [&str; 3] = ["toml", "yml", "yaml"];

    /// 用户目录下的配置目录名
    pub const USER_CONFIG_DIR_NAME: &str = ".launch";

    /// 系统级配置目录
    pub const SYSTEM_CONFIG_DIR: &str = "/etc/launch-agent";

    /// 与配置文件同目录的环境变量文件
    pub const DOT_ENV_FILE: &str = ".env";

    /// 未配置 workdir 时临时目录的前缀
    pub const TEMP_WORKDIR_PREFIX: &str = "launch";

    /// 配置文件变更检测间隔（秒）
    pub const WATCH_INTERVAL_SECS: u64 = 5;

    /// 获取配置文件搜索目录（当前目录 -> 用户目录 -> 系统目录）
    pub fn get_search_dirs() -> Vec<PathBuf> {
        let mut dirs = vec![PathBuf::from(".")];
        if let Some(home) = dirs::home_dir() {
            dirs.push(home.join(USER_CONFIG_DIR_NAME));
        }
        dirs.push(PathBuf::from(SYSTEM_CONFIG_DIR));
        dirs
    }
}

/// 调度相关常量
pub mod schedule {
    /// Pulse 任务默认执行间隔
    pub const DEFAULT_PULSE_EVERY: &str = "5m";

    /// cron 表达式字段数量: 分 时 日 月 周
    pub const CRON_FIELDS_COUNT: usize = 5;

    /// 计算下一次 cron 触发时间时最多向后搜索的分钟数（4 年）
    pub const CRON_SEARCH_LIMIT_MINUTES: u32 = 4 * 366 * 24 * 60;
}

/// 备份产物相关常量
pub mod artifact {
    /// 产物文件名中的时间戳格式，字符串顺序即时间顺序
    pub const TIMESTAMP_FORMAT: &str = "%Y.%m.%d.%H.%M.%S";

    /// 分片文件后缀的位数，例如 `-000`
    pub const PART_SUFFIX_WIDTH: usize = 3;

    /// 归档步骤生成的文件名
    pub const ARCHIVE_FILE_NAME: &str = "archive.tar";
}

/// 存储相关常量
pub mod storage {
    /// S3 默认重试次数
    pub const S3_DEFAULT_MAX_RETRIES: u32 = 3;

    /// S3 默认请求超时（秒）
    pub const S3_DEFAULT_TIMEOUT_SECS: u64 = 300;

    /// S3 默认区域
    pub const S3_DEFAULT_REGION: &str = "us-east-1";

    /// 预签名下载链接有效期（秒）
    pub const PRESIGN_EXPIRES_SECS: u64 = 3600;
}

/// 通知相关常量
pub mod notify {
    /// 默认 HTTP 方法
    pub const DEFAULT_METHOD: &str = "POST";

    /// 请求体类型
    pub const CONTENT_TYPE: &str = "application/json";

    /// 默认请求超时（秒）
    pub const DEFAULT_TIMEOUT: u64 = 30;

    /// User-Agent头
    pub const USER_AGENT: &str = "launch-agent/1.0";
}

/// Supervisor 相关常量
pub mod supervisor {
    /// 默认 unix socket 路径
    pub const DEFAULT_SOCKET_PATH: &str = "/var/run/supervisor.sock";

    /// 默认 XML-RPC 端点
    pub const DEFAULT_RPC_ENDPOINT: &str = "http://localhost/RPC2";

    /// 进程 RUNNING 状态码
    pub const STATE_RUNNING: i64 = 20;

    /// 分组名缺失时使用的名称
    pub const UNKNOWN_GROUP: &str = "unknown";
}
