// 私有模块声明
mod app;
mod cli;
mod commands;
mod init;
pub mod project_info;
mod utils;

// 通过 pub use 精确控制对外暴露的接口
pub use app::AgentApp;
pub use cli::{Cli, Commands};
pub use init::run_init;
pub use utils::{LOG_FILE_ENV, setup_logging};
