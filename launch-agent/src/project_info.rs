/// Launch Agent 项目信息
///
/// 项目元数据统一在这里定义，agent-core 只提供技术性常量。

/// 项目元数据（从 Cargo.toml 同步）
pub mod metadata {
    pub const PROJECT_NAME: &str = env!("CARGO_PKG_NAME");

    pub const PROJECT_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

    pub const PROJECT_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

    /// 用户友好的显示名称
    pub mod display {
        pub const FRIENDLY_NAME: &str = "Launch Agent";

        pub const DESCRIPTION_LONG: &str = "按计划导出数据库、归档文件并分发到多个存储（本地目录、S3），按保留数量自动清理旧备份，同时定期上报主机资源与 Supervisor 进程状态";
    }
}

/// 版本信息
pub mod version_info {
    pub const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// 获取版本信息字符串
pub fn get_version_string() -> String {
    format!("{} v{}", metadata::display::FRIENDLY_NAME, version_info::CLI_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string() {
        let version = get_version_string();
        assert!(version.starts_with("Launch Agent v"));
        assert!(version.ends_with(version_info::CLI_VERSION));
        assert_eq!(metadata::PROJECT_NAME, "launch-agent");
    }
}
