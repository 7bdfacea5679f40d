use crate::project_info::{metadata, version_info};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Launch Agent - 定时备份、资源心跳与进程状态上报
#[derive(Parser, Debug)]
#[command(name = "launch-agent")]
#[command(about = metadata::PROJECT_DESCRIPTION)]
#[command(version = version_info::CLI_VERSION)]
#[command(long_about = metadata::display::DESCRIPTION_LONG)]
#[command(author = metadata::PROJECT_AUTHORS)]
pub struct Cli {
    /// 配置文件路径（不指定时依次查找 ./launch.toml、~/.launch、/etc/launch-agent）
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 详细输出
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// 以守护进程方式运行调度器（SIGHUP 重新加载配置）
    Run,
    /// 立即执行备份，不指定模型时执行全部模型
    Backup {
        /// 模型名称，可重复指定
        #[arg(short, long = "model")]
        models: Vec<String>,
        /// 模型名称
        names: Vec<String>,
    },
    /// 采集资源使用情况并发送一次心跳
    Pulse,
    /// 查询 Supervisor 进程状态并上报
    DStat {
        /// 进程 id（group:name），不指定时使用配置中的 daemons
        ids: Vec<String>,
    },
    /// 列出存储中的备份文件
    Files {
        /// 模型名称
        #[arg(short, long)]
        model: String,
        /// 存储名称，默认使用模型的 default_storage
        #[arg(long)]
        storage: Option<String>,
    },
    /// 获取备份文件的下载地址
    Download {
        /// 模型名称
        #[arg(short, long)]
        model: String,
        /// 存储名称，默认使用模型的 default_storage
        #[arg(long)]
        storage: Option<String>,
        /// 文件名（`files` 命令输出的路径）
        key: String,
    },
    /// 校验配置并显示每个模型的调度
    Check,
    /// 生成带注释的配置文件模板
    Init {
        /// 如果配置文件已存在，强制覆盖
        #[arg(long)]
        force: bool,
    },
}

impl Commands {
    /// `backup` 命令中 `-m` 与位置参数合并后的模型列表
    pub fn backup_models(models: Vec<String>, names: Vec<String>) -> Vec<String> {
        let mut all = models;
        for name in names {
            if !all.contains(&name) {
                all.push(name);
            }
        }
        all
    }
}
