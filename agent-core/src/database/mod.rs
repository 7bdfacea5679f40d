//! 数据库导出：调用 `mysqldump` / `pg_dump` 把数据写入 `<dump_path>/<type>/<name>/`

mod mysql;
mod postgresql;

use crate::config::{DatabaseConfig, DatabaseKind, ModelConfig};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument};

pub use mysql::mysqldump_args;
pub use postgresql::pg_dump_args;

/// 单个数据库的导出
#[async_trait]
pub trait Dumper: Send + Sync {
    /// 导出数据库，返回生成的文件路径
    async fn dump(&self, model: &ModelConfig, database: &DatabaseConfig) -> Result<PathBuf>;
}

/// 数据库导出目录 `<dump_path>/<type>/<name>`
pub fn dump_dir(model: &ModelConfig, database: &DatabaseConfig) -> PathBuf {
    model
        .dump_path
        .join(database.kind.type_name())
        .join(&database.name)
}

/// 通过外部命令导出
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandDumper;

#[async_trait]
impl Dumper for CommandDumper {
    #[instrument(skip_all, fields(model = %model.name, database = %database.name, kind = database.kind.type_name()))]
    async fn dump(&self, model: &ModelConfig, database: &DatabaseConfig) -> Result<PathBuf> {
        let dir = dump_dir(model, database);
        tokio::fs::create_dir_all(&dir).await?;
        let output = dir.join(format!("{}.sql", database.name));

        let settings = database.kind.settings();
        let (program, args) = match &database.kind {
            DatabaseKind::Mysql(_) => ("mysqldump", mysqldump_args(&database.name, settings, &output)),
            DatabaseKind::Postgresql(_) => ("pg_dump", pg_dump_args(&database.name, settings, &output)),
        };

        info!("=> 导出数据库 | {}", database.kind.type_name());
        run_dump_command(program, &args, password_env(&database.kind), &model.work_dir).await?;
        info!(file = %output.display(), "数据库导出完成");
        Ok(output)
    }
}

/// 密码只通过环境变量传给导出命令，不出现在进程参数中
fn password_env(kind: &DatabaseKind) -> Vec<(&'static str, String)> {
    let var = match kind {
        DatabaseKind::Mysql(_) => "MYSQL_PWD",
        DatabaseKind::Postgresql(_) => "PGPASSWORD",
    };
    kind.settings()
        .password
        .iter()
        .filter(|p| !p.is_empty())
        .map(|p| (var, p.clone()))
        .collect()
}

async fn run_dump_command(
    program: &str,
    args: &[String],
    envs: Vec<(&str, String)>,
    work_dir: &Path,
) -> Result<()> {
    if which::which(program).is_err() {
        return Err(AgentError::dump(format!("{program} 未安装或不在 PATH 中")));
    }
    debug!(program, args = %redact(args).join(" "), "执行导出命令");

    let mut command = Command::new(program);
    command
        .args(args)
        .envs(envs)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if work_dir.is_dir() {
        command.current_dir(work_dir);
    }

    let output = command.output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AgentError::dump(format!(
            "{program} 退出码 {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }
    Ok(())
}

/// 日志中隐藏 `args` 里手动配置的密码参数
fn redact(args: &[String]) -> Vec<String> {
    args.iter()
        .map(|arg| {
            if arg.starts_with("--password=") {
                "--password=******".to_string()
            } else {
                arg.clone()
            }
        })
        .collect()
}
