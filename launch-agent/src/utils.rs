use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;

/// 日志文件环境变量，设置后日志写入该文件而非终端
pub const LOG_FILE_ENV: &str = "LAUNCH_LOG_FILE";

const DEFAULT_LOG_FILE_NAME: &str = "launch-agent.log";

/// # 日志系统
///
/// 1. **库代码只使用 `tracing` 宏**
/// 2. **应用入口控制日志配置**：在 `main.rs` 中调用 `setup_logging()`
///
/// - `-v, --verbose`：DEBUG 级别
/// - `RUST_LOG`：标准的日志级别控制，优先于 `--verbose`
/// - `LAUNCH_LOG_FILE`：日志文件路径
///
/// ```bash
/// # 守护进程日志写入文件
/// LAUNCH_LOG_FILE=/var/log/launch-agent.log launch-agent run
///
/// # 只看调度器的调试日志
/// RUST_LOG=agent_core::scheduler=debug launch-agent run
/// ```
///
/// 终端输出为简洁格式，文件输出包含模块路径、线程名和行号。
/// 写入文件时返回的 guard 必须保持到进程退出，否则缓冲中的日志会丢失。
pub fn setup_logging(verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Ok(log_file) = std::env::var(LOG_FILE_ENV) {
        let (dir, file_name) = split_log_path(Path::new(&log_file));
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);

        fmt()
            .with_env_filter(env_filter)
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true)
            .init();
        Some(guard)
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_names(false)
            .with_line_number(false)
            .without_time()
            .compact()
            .init();
        None
    }
}

fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_LOG_FILE_NAME.to_string());
    (dir, file_name)
}

/// 字节数转换为便于阅读的形式
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
