pub mod config;
pub mod error;
pub mod export;
pub mod format;
pub mod logging;
pub mod scheduler;
pub mod session_log;
pub mod system;
