use agent_core::config::CONFIG_TEMPLATE;
use agent_core::constants::config::{CONFIG_FILE_STEM, DOT_ENV_FILE};
use agent_core::error::Result;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 写入带注释的配置模板，未指定路径时写到当前目录的 `launch.toml`
pub async fn run_init(path: Option<&Path>, force: bool) -> Result<()> {
    info!("🚀 Launch Agent 初始化");
    info!("======================");

    let target = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(format!("{CONFIG_FILE_STEM}.toml")));

    if target.exists() && !force {
        warn!("⚠️  配置文件已存在: {}", target.display());
        info!("如果您要重新初始化，请使用 --force 参数");
        info!("示例: launch-agent init --force");
        return Ok(());
    }

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&target, CONFIG_TEMPLATE).await?;
    restrict_permissions(&target).await?;
    info!("   ✅ 创建配置文件: {}", target.display());

    info!("🎉 初始化完成！");
    info!("");
    info!("📝 接下来的步骤:");
    info!("   1️⃣  编辑 {} 配置模型、存储和 webhook", target.display());
    info!("   2️⃣  把密码等敏感信息写到同目录的 {DOT_ENV_FILE} 文件中，在配置里用 ${{VAR}} 引用");
    info!("   3️⃣  运行 'launch-agent check' 校验配置");
    info!("   4️⃣  运行 'launch-agent run' 启动调度器");

    Ok(())
}

/// 配置中包含凭据，只允许所有者读写
#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
