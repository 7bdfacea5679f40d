use agent_core::AgentError;
use clap::Parser;
use launch_agent::{AgentApp, Cli, Commands, run_init, setup_logging};
use tracing::error;

#[tokio::main]
async fn main() {
    // 解析命令行参数
    let cli = Cli::parse();

    // 设置日志记录，写文件时 guard 需要在退出前释放以刷新缓冲
    let guard = setup_logging(cli.verbose);

    let ok = run(cli).await;
    drop(guard);
    if !ok {
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> bool {
    // `init` 命令不需要预先加载配置
    if let Commands::Init { force } = cli.command {
        if let Err(e) = run_init(cli.config.as_deref(), force).await {
            error!("❌ 初始化失败: {}", e);
            return false;
        }
        return true;
    }

    let app = match AgentApp::load(cli.config.as_deref()) {
        Ok(app) => app,
        Err(AgentError::ConfigNotFound) => {
            match &cli.config {
                Some(path) => error!("❌ 配置文件 '{}' 未找到。", path.display()),
                None => error!("❌ 未找到配置文件 launch.toml / launch.yml。"),
            }
            error!("👉 请先运行 'launch-agent init' 命令来创建配置文件。");
            return false;
        }
        Err(e) => {
            error!("❌ 应用初始化失败: {}", e);
            return false;
        }
    };

    if let Err(e) = app.run_command(cli.command).await {
        error!("❌ 操作失败: {}", e);
        return false;
    }
    true
}
