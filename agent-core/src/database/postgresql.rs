use crate::config::SqlSettings;
use std::path::Path;

/// 构造 `pg_dump` 参数，密码通过 `PGPASSWORD` 环境变量传递
pub fn pg_dump_args(name: &str, settings: &SqlSettings, output: &Path) -> Vec<String> {
    let database = settings.database.as_deref().unwrap_or(name);
    let mut args = Vec::new();

    let host = settings
        .socket
        .as_deref()
        .or(settings.host.as_deref())
        .unwrap_or("127.0.0.1");
    args.push(format!("--host={host}"));
    args.push(format!("--port={}", settings.port.unwrap_or(5432)));
    if let Some(username) = &settings.username {
        args.push(format!("--username={username}"));
    }
    for table in &settings.tables {
        args.push(format!("--table={table}"));
    }
    for table in &settings.exclude_tables {
        args.push(format!("--exclude-table={table}"));
    }
    if let Some(extra) = &settings.args {
        args.extend(extra.split_whitespace().map(str::to_string));
    }
    args.push(format!("--file={}", output.display()));
    args.push(database.to_string());
    args
}
