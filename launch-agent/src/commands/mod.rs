mod backup;
mod check;
mod files;
mod run;
mod status;

// Daemon
pub use run::run_daemon;

// Backup commands
pub use backup::run_backup;

// Pulse / supervisor status
pub use status::{run_daemon_status, run_pulse};

// Storage queries
pub use files::{download, list_files};

// Config check
pub use check::run_check;
