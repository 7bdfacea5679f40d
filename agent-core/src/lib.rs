pub mod archive;
pub mod compressor;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod model;
pub mod notifier;
pub mod psutil;
pub mod rpc;
pub mod schedule;
pub mod scheduler;
pub mod storage;

pub use error::{AgentError, Result};
