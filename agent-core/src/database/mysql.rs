use crate::config::SqlSettings;
use std::path::Path;

/// 构造 `mysqldump` 参数，密码通过 `MYSQL_PWD` 环境变量传递
///
/// 未配置 `database` 时使用配置项名称作为库名。
pub fn mysqldump_args(name: &str, settings: &SqlSettings, output: &Path) -> Vec<String> {
    let database = settings.database.as_deref().unwrap_or(name);
    let mut args = Vec::new();

    if let Some(socket) = &settings.socket {
        args.push(format!("--socket={socket}"));
    } else {
        args.push(format!(
            "--host={}",
            settings.host.as_deref().unwrap_or("127.0.0.1")
        ));
        args.push(format!("--port={}", settings.port.unwrap_or(3306)));
    }
    if let Some(username) = &settings.username {
        args.push(format!("--user={username}"));
    }
    if let Some(extra) = &settings.args {
        args.extend(extra.split_whitespace().map(str::to_string));
    }

    args.push(database.to_string());
    args.extend(settings.tables.iter().cloned());
    for table in &settings.exclude_tables {
        args.push(format!("--ignore-table={database}.{table}"));
    }
    args.push(format!("--result-file={}", output.display()));
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysqldump_args() {
        let settings = SqlSettings {
            host: Some("db.internal".to_string()),
            port: Some(3307),
            username: Some("backup".to_string()),
            password: Some("secret".to_string()),
            database: Some("app".to_string()),
            tables: vec!["users".to_string()],
            exclude_tables: vec!["sessions".to_string()],
            args: Some("--single-transaction --quick".to_string()),
            ..Default::default()
        };
        let args = mysqldump_args("main", &settings, Path::new("/tmp/dump/main.sql"));
        assert_eq!(
            args,
            vec![
                "--host=db.internal",
                "--port=3307",
                "--user=backup",
                "--single-transaction",
                "--quick",
                "app",
                "users",
                "--ignore-table=app.sessions",
                "--result-file=/tmp/dump/main.sql",
            ]
        );
        assert!(!args.iter().any(|a| a.contains("secret")));
    }

    #[test]
    fn test_mysqldump_args_with_socket() {
        let settings = SqlSettings {
            socket: Some("/var/run/mysqld/mysqld.sock".to_string()),
            ..Default::default()
        };
        let args = mysqldump_args("main", &settings, Path::new("/tmp/main.sql"));
        assert_eq!(args[0], "--socket=/var/run/mysqld/mysqld.sock");
        assert!(args.contains(&"main".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--host")));
    }
}
